use crate::types::ApiError;
use pbkdf2::password_hash::{rand_core, PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use pbkdf2::{Params, Pbkdf2};
use tracing::error;

const ROUNDS: u32 = 10_000;
const OUTPUT_LENGTH: usize = 32;

/// PBKDF2-HMAC-SHA256 with a fresh random salt, encoded as a PHC string so the
/// salt and round count travel with the hash.
pub fn hash(password: &str) -> Result<String, ApiError> {
    let salt = SaltString::generate(&mut rand_core::OsRng);
    let params = Params {
        rounds: ROUNDS,
        output_length: OUTPUT_LENGTH,
    };
    Pbkdf2
        .hash_password_customized(password.as_bytes(), None, None, params, &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| {
            error!(error = %e, "password hashing failed");
            ApiError::Internal
        })
}

/// `Ok(false)` on a wrong password. Only an unreadable stored hash is an error.
pub fn verify(hash: &str, password: &str) -> Result<bool, ApiError> {
    let parsed = PasswordHash::new(hash).map_err(|e| {
        error!(error = %e, "stored password hash is unreadable");
        ApiError::Internal
    })?;
    Ok(Pbkdf2.verify_password(password.as_bytes(), &parsed).is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matching_password_verifies() {
        let hashed = hash("pw123").unwrap();
        assert!(verify(&hashed, "pw123").unwrap());
        assert!(!verify(&hashed, "pw124").unwrap());
    }

    #[test]
    fn hashes_are_salted() {
        let first = hash("same password").unwrap();
        let second = hash("same password").unwrap();
        assert_ne!(first, second);
        assert!(first.starts_with("$pbkdf2-sha256$"));
        assert!(verify(&second, "same password").unwrap());
    }

    #[test]
    fn garbage_hash_is_internal() {
        match verify("not a phc string", "pw123") {
            Err(ApiError::Internal) => {}
            other => panic!("unexpected: {:?}", other),
        }
    }
}
