use chrono::{DateTime, SecondsFormat, Utc};
use rocket::http::Status;
use rocket::request::Request;
use rocket::response::{self, Responder, Response};
use rocket::serde::json::{Json, Value};
use serde::Serializer;

pub fn try_respond(req: &Request, json: Value, status: Status) -> response::Result<'static> {
    Json(json)
        .respond_to(req)
        .map(|resp| Response::build_from(resp).status(status).finalize())
}

pub fn serialize_date<S>(date: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let s = date.to_rfc3339_opts(SecondsFormat::Millis, true);
    serializer.serialize_str(&s)
}
