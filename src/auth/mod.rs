//! Credentials and session tokens.

pub mod password;
pub mod token;

pub use self::token::{bearer_token, Claims, TokenInvalid, Tokens};
