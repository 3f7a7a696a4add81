use crate::types::ApiError;
use chrono::{DateTime, Duration, Utc};
use hmac::digest::InvalidLength;
use hmac::{Hmac, Mac};
use jwt::{RegisteredClaims, SignWithKey, VerifyWithKey};
use sha2::Sha256;
use std::fmt;
use tracing::error;

/// Any reason a presented token is unusable: malformed, badly signed, expired,
/// wrong issuer or a subject that is not a user id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenInvalid;

impl From<TokenInvalid> for ApiError {
    fn from(_: TokenInvalid) -> ApiError {
        ApiError::Unauthorized
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claims {
    pub user_id: i32,
    pub issuer: String,
    pub expires_at: u64,
}

/// Issues and verifies HS256 session tokens. Managed by Rocket and shared by
/// every request.
#[derive(Clone)]
pub struct Tokens {
    key: Hmac<Sha256>,
    issuer: String,
    ttl: Duration,
}

impl fmt::Debug for Tokens {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Tokens")
            .field("issuer", &self.issuer)
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl Tokens {
    pub fn new(secret: &str, issuer: &str, ttl: Duration) -> Result<Tokens, InvalidLength> {
        Ok(Tokens {
            key: Hmac::new_from_slice(secret.as_bytes())?,
            issuer: issuer.to_string(),
            ttl,
        })
    }

    pub fn issue(&self, user_id: i32) -> Result<String, ApiError> {
        self.issue_at(user_id, Utc::now())
    }

    fn issue_at(&self, user_id: i32, now: DateTime<Utc>) -> Result<String, ApiError> {
        let expires = now.checked_add_signed(self.ttl).ok_or_else(|| {
            error!(ttl = %self.ttl, "session lifetime overflows the clock");
            ApiError::Internal
        })?;
        let claims = RegisteredClaims {
            issuer: Some(self.issuer.clone()),
            subject: Some(user_id.to_string()),
            issued_at: Some(now.timestamp() as u64),
            expiration: Some(expires.timestamp() as u64),
            ..Default::default()
        };
        claims.sign_with_key(&self.key).map_err(|e| {
            error!(error = %e, "failed to sign session token");
            ApiError::Internal
        })
    }

    pub fn verify(&self, token: &str) -> Result<Claims, TokenInvalid> {
        self.verify_at(token, Utc::now())
    }

    fn verify_at(&self, token: &str, now: DateTime<Utc>) -> Result<Claims, TokenInvalid> {
        let claims: RegisteredClaims = token.verify_with_key(&self.key).map_err(|_| TokenInvalid)?;

        if claims.issuer.as_ref() != Some(&self.issuer) {
            return Err(TokenInvalid);
        }
        let expires_at = claims.expiration.ok_or(TokenInvalid)?;
        if expires_at <= now.timestamp() as u64 {
            return Err(TokenInvalid);
        }
        let user_id = claims
            .subject
            .as_ref()
            .and_then(|sub| sub.parse::<i32>().ok())
            .ok_or(TokenInvalid)?;

        Ok(Claims {
            user_id,
            issuer: self.issuer.clone(),
            expires_at,
        })
    }
}

/// Extracts the token from an `Authorization` header value. Accepts the
/// `Bearer` scheme and the `Token` scheme used by RealWorld clients.
pub fn bearer_token(header: Option<&str>) -> Result<&str, TokenInvalid> {
    let mut parts = header.ok_or(TokenInvalid)?.split_whitespace();
    match (parts.next(), parts.next(), parts.next()) {
        (Some("Bearer"), Some(token), None) | (Some("Token"), Some(token), None) => Ok(token),
        _ => Err(TokenInvalid),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn tokens(secret: &str) -> Tokens {
        Tokens::new(secret, "conduit", Duration::hours(1)).unwrap()
    }

    #[test]
    fn issued_token_carries_the_user() {
        let tokens = tokens("secret");
        let token = tokens.issue(42).unwrap();
        let claims = tokens.verify(&token).unwrap();
        assert_eq!(claims.user_id, 42);
        assert_eq!(claims.issuer, "conduit");
    }

    #[test]
    fn other_secret_is_rejected() {
        let token = tokens("secret").issue(42).unwrap();
        assert_eq!(tokens("another").verify(&token), Err(TokenInvalid));
    }

    #[test]
    fn other_issuer_is_rejected() {
        let token = Tokens::new("secret", "elsewhere", Duration::hours(1))
            .unwrap()
            .issue(7)
            .unwrap();
        assert_eq!(tokens("secret").verify(&token), Err(TokenInvalid));
    }

    #[test]
    fn expiry_is_relative_to_issue_time() {
        let tokens = tokens("secret");
        let issued = Utc::now() - Duration::hours(2);
        let stale = tokens.issue_at(1, issued).unwrap();
        assert_eq!(tokens.verify(&stale), Err(TokenInvalid));

        let fresh = tokens.issue_at(1, Utc::now() - Duration::minutes(30)).unwrap();
        let claims = tokens.verify(&fresh).unwrap();
        assert!(claims.expires_at > Utc::now().timestamp() as u64);
    }

    #[test]
    fn overflowing_lifetime_fails_to_issue() {
        let ttl = Duration::try_seconds(100_000_000_000_000).unwrap();
        let tokens = Tokens::new("secret", "conduit", ttl).unwrap();
        assert!(matches!(tokens.issue(1), Err(ApiError::Internal)));
    }

    #[test]
    fn tampered_token_is_rejected() {
        let tokens = tokens("secret");
        let mut token = tokens.issue(3).unwrap();
        token.push('x');
        assert_eq!(tokens.verify(&token), Err(TokenInvalid));
        assert_eq!(tokens.verify("not.a.token"), Err(TokenInvalid));
        assert_eq!(tokens.verify(""), Err(TokenInvalid));
    }

    #[rstest]
    #[case(Some("Bearer abc.def.ghi"), Ok("abc.def.ghi"))]
    #[case(Some("Token abc.def.ghi"), Ok("abc.def.ghi"))]
    #[case(Some("bearer abc.def.ghi"), Err(TokenInvalid))]
    #[case(Some("Bearer"), Err(TokenInvalid))]
    #[case(Some("Bearer a b"), Err(TokenInvalid))]
    #[case(Some("abc.def.ghi"), Err(TokenInvalid))]
    #[case(None, Err(TokenInvalid))]
    fn authorization_header_shapes(
        #[case] header: Option<&str>,
        #[case] expected: Result<&str, TokenInvalid>,
    ) {
        assert_eq!(bearer_token(header), expected);
    }
}
