use argon2::password_hash::{PasswordHasher, SaltString};
use argon2::Argon2;
use rand_core::OsRng;
use chrono::{DateTime, Utc};

use crate::errors::AuthzError;

const MIN_PASSWORD_LENGTH: usize = 8;

/// Hash a plain credential for storage on a new user record.
pub fn hash_credential(password: &str) -> Result<String, AuthzError> {
    if password.len() < MIN_PASSWORD_LENGTH {
        return Err(AuthzError::configuration(format!(
            "password must be at least {} characters",
            MIN_PASSWORD_LENGTH
        )));
    }

    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|err| AuthzError::internal(format!("failed to hash password: {err}")))
}

pub fn utc_now() -> DateTime<Utc> {
    Utc::now()
}

pub fn to_db_id(id: u64) -> Result<i64, AuthzError> {
    i64::try_from(id).map_err(|_| AuthzError::internal(format!("id {id} out of storage range")))
}

pub fn from_db_id(id: i64) -> Result<u64, AuthzError> {
    u64::try_from(id).map_err(|_| AuthzError::internal(format!("negative id {id} in storage")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_short_credentials() {
        assert!(matches!(hash_credential("short"), Err(AuthzError::Configuration(_))));
    }

    #[test]
    fn hashes_into_phc_string() {
        let hash = hash_credential("correct horse battery").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(!hash.contains("correct horse"));
    }

    #[test]
    fn id_conversion_is_checked() {
        assert_eq!(to_db_id(7).unwrap(), 7);
        assert!(to_db_id(u64::MAX).is_err());
        assert!(from_db_id(-1).is_err());
    }
}
