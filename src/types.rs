use crate::utils::try_respond;
use diesel::result::Error as DieselError;
use diesel::PgConnection;
use rocket::http::Status;
use rocket::request::Request;
use rocket::response::{self, Responder};
use rocket::serde::json::{json, Json};
use std::collections::HashMap;
use tracing::error;

pub trait Validate
where
    Self: Sized,
{
    type Error;
    fn validate(self, connection: &mut PgConnection) -> Result<Self, Self::Error>;
}

/// Every failure a handler can produce. Each kind renders with one fixed
/// status; internal causes are logged where they happen and never reach the
/// client.
#[derive(Debug)]
pub enum ApiError {
    Validation(ValidationError),
    NotFound,
    Unauthorized,
    Conflict(&'static str),
    Internal,
}

impl ApiError {
    pub fn status(&self) -> Status {
        match *self {
            ApiError::Validation(_) => Status::UnprocessableEntity,
            ApiError::NotFound => Status::NotFound,
            ApiError::Unauthorized => Status::Unauthorized,
            ApiError::Conflict(_) => Status::Conflict,
            ApiError::Internal => Status::InternalServerError,
        }
    }

    pub fn message(&self) -> &'static str {
        match *self {
            ApiError::Validation(_) => "validation failed",
            ApiError::NotFound => "entity not found",
            ApiError::Unauthorized => "unauthorized",
            ApiError::Conflict(reason) => reason,
            ApiError::Internal => "internal server error",
        }
    }
}

impl From<DieselError> for ApiError {
    fn from(err: DieselError) -> ApiError {
        match err {
            DieselError::NotFound => ApiError::NotFound,
            other => {
                error!(error = %other, "database operation failed");
                ApiError::Internal
            }
        }
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> ApiError {
        ApiError::Validation(err)
    }
}

pub type ApiResult<T> = Result<Json<T>, ApiError>;

#[derive(Debug, Serialize, Default, PartialEq)]
pub struct ValidationError(HashMap<String, Vec<String>>);

impl ValidationError {
    pub fn add_error<K: Into<String>, V: Into<String>>(&mut self, key: K, val: V) {
        let entry = self.0.entry(key.into()).or_insert_with(Vec::default);
        entry.push(val.into());
    }

    pub fn from<K: Into<String>, V: Into<String>>(key: K, val: V) -> Self {
        let mut error = ValidationError::default();
        error.add_error(key, val);
        error
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn merge(&mut self, other: ValidationError) {
        for (key, errors) in other.0.into_iter() {
            let entry = self.0.entry(key).or_default();
            entry.extend(errors);
        }
    }

    pub fn empty(&self) -> bool {
        self.len() == 0
    }

    pub fn messages(&self, key: &str) -> &[String] {
        self.0.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// `Ok(())` when nothing was collected, the collected errors otherwise.
    pub fn into_result(self) -> Result<(), ValidationError> {
        if self.empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl<'r> Responder<'r, 'static> for ApiError {
    fn respond_to(self, req: &'r Request<'_>) -> response::Result<'static> {
        let status = self.status();
        let body = match self {
            ApiError::Validation(errors) => json!({
                "error": "validation failed",
                "errors": errors,
            }),
            other => json!({ "error": other.message() }),
        };
        try_respond(req, body, status)
    }
}

impl<T> Validate for Json<T>
where
    T: Validate,
{
    type Error = <T as Validate>::Error;
    fn validate(self, connection: &mut PgConnection) -> Result<Self, Self::Error> {
        let inner = self.into_inner();
        let validated = inner.validate(connection)?;
        Ok(Json(validated))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(ApiError::Validation(ValidationError::default()), 422)]
    #[case(ApiError::NotFound, 404)]
    #[case(ApiError::Unauthorized, 401)]
    #[case(ApiError::Conflict("article already favorited"), 409)]
    #[case(ApiError::Internal, 500)]
    fn each_kind_has_one_status(#[case] error: ApiError, #[case] code: u16) {
        assert_eq!(error.status().code, code);
    }

    #[test]
    fn internal_message_hides_the_cause() {
        let error: ApiError = DieselError::RollbackTransaction.into();
        assert_eq!(error.message(), "internal server error");
    }

    #[test]
    fn missing_row_is_not_found() {
        let error: ApiError = DieselError::NotFound.into();
        assert_eq!(error.status(), Status::NotFound);
    }

    #[test]
    fn merge_keeps_messages_per_field() {
        let mut errors = ValidationError::from("email", "Invalid email: x");
        let mut other = ValidationError::from("email", "Email already exists");
        other.add_error("password", "Password too short");
        errors.merge(other);

        assert_eq!(errors.len(), 2);
        assert_eq!(errors.messages("email").len(), 2);
        assert_eq!(errors.messages("password"), &["Password too short".to_string()]);
        assert!(errors.into_result().is_err());
        assert!(ValidationError::default().into_result().is_ok());
    }
}
