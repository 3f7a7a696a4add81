#[macro_use]
extern crate rocket;
#[macro_use]
extern crate diesel;
#[macro_use]
extern crate error_chain;
#[macro_use]
extern crate lazy_static;
#[macro_use]
extern crate serde_derive;

mod article;
mod auth;
mod comment;
mod config;
mod db;
mod profile;
mod query;
mod types;
mod users;
mod utils;


use crate::auth::Tokens;
use crate::config::Config;
use crate::db::Pool;
use rocket::http::Status;
use rocket::serde::json::{json, Value};
use rocket::{Build, Request, Rocket};
use std::process;
use tracing::error;
use tracing_subscriber::EnvFilter;

#[catch(400)]
fn bad_request() -> (Status, Value) {
    (Status::BadRequest, json!({ "error": "malformed request" }))
}

#[catch(404)]
fn not_found() -> (Status, Value) {
    (Status::NotFound, json!({ "error": "not found" }))
}

#[catch(422)]
fn unprocessable() -> (Status, Value) {
    (
        Status::UnprocessableEntity,
        json!({ "error": "malformed request body" }),
    )
}

#[catch(default)]
fn fallback(status: Status, _req: &Request) -> (Status, Value) {
    let message = status.reason().unwrap_or("unexpected error");
    (status, json!({ "error": message.to_lowercase() }))
}

pub fn build(pool: Pool, tokens: Tokens) -> Rocket<Build> {
    rocket::build()
        .manage(pool)
        .manage(tokens)
        .mount(
            "/api",
            routes![
                users::register,
                users::login,
                users::current,
                users::update,
                profile::profile,
                profile::follow,
                profile::unfollow,
                article::list,
                article::feed,
                article::show,
                article::create,
                article::update,
                article::remove,
                article::favorite,
                article::unfavorite,
                article::tags,
                comment::add,
                comment::list,
                comment::remove,
            ],
        )
        .register("/", catchers![bad_request, not_found, unprocessable, fallback])
}

#[rocket::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            process::exit(1);
        }
    };
    let pool = match db::init_pool(&config) {
        Ok(pool) => pool,
        Err(e) => {
            error!(error = %e, "failed to create database pool");
            process::exit(1);
        }
    };
    let tokens = match Tokens::new(&config.jwt_secret, &config.jwt_issuer, config.token_ttl) {
        Ok(tokens) => tokens,
        Err(e) => {
            error!(error = %e, "unusable token secret");
            process::exit(1);
        }
    };

    if let Err(e) = build(pool, tokens).launch().await {
        error!(error = %e, "server stopped");
        process::exit(1);
    }
}
