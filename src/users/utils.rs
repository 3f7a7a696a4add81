use crate::db::schema::users;
use crate::types::{ApiError, ValidationError};
use diesel::dsl::exists;
use diesel::prelude::*;
use diesel::select;
use regex::Regex;

lazy_static! {
    static ref EMAIL_RE: Regex = {
        let pattern = r"(?i)\A[a-z0-9!#$%&'*+/=?^_`{|}~-]+(?:\.[a-z0-9!#$%&'*+/=?^_`{|}~-]+)*@(?:[a-z0-9](?:[a-z0-9-]*[a-z0-9])?\.)+[a-z0-9](?:[a-z0-9-]*[a-z0-9])?\z";
        Regex::new(pattern).unwrap()
    };
}

pub fn validate_email_re(email: &str) -> Result<(), ValidationError> {
    if !EMAIL_RE.is_match(email) {
        Err(ValidationError::from("email", format!("Invalid email: {}", email)))
    } else {
        Ok(())
    }
}

pub fn validate_username_re(username: &str) -> Result<(), ValidationError> {
    if username.trim().chars().count() < 3 {
        Err(ValidationError::from(
            "username",
            format!("Username too short: {}", username),
        ))
    } else {
        Ok(())
    }
}

pub fn validate_password(password: &str) -> Result<(), ValidationError> {
    if password.chars().count() < 5 {
        Err(ValidationError::from("password", "Password too short"))
    } else {
        Ok(())
    }
}

/// True when another user already owns `address`. `except` excludes the
/// caller's own row on updates.
pub fn email_taken(
    address: &str,
    except: Option<i32>,
    connection: &mut PgConnection,
) -> Result<bool, ApiError> {
    let mut query = users::table.filter(users::email.eq(address)).into_boxed();
    if let Some(user_id) = except {
        query = query.filter(users::id.ne(user_id));
    }
    Ok(select(exists(query)).get_result::<bool>(connection)?)
}

pub fn username_taken(
    name: &str,
    except: Option<i32>,
    connection: &mut PgConnection,
) -> Result<bool, ApiError> {
    let mut query = users::table.filter(users::username.eq(name)).into_boxed();
    if let Some(user_id) = except {
        query = query.filter(users::id.ne(user_id));
    }
    Ok(select(exists(query)).get_result::<bool>(connection)?)
}
