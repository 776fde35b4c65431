use argon2::password_hash::SaltString;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use uuid::Uuid;

pub fn now() -> DateTime<Utc> {
    Utc::now()
}

pub fn hash_password(password: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();

    argon2
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| anyhow::anyhow!("Failed to hash password: {}", e))
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    let parsed_hash = match PasswordHash::new(hash) {
        Ok(h) => h,
        Err(_) => return false,
    };

    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok()
}

/// Checks a login attempt. Without an account the password is still run
/// through argon2 against a throwaway hash, so both failures cost the same.
pub fn verify_login(password: &str, hash: Option<&str>) -> bool {
    match hash {
        Some(hash) => verify_password(password, hash),
        None => {
            verify_password(password, dummy_hash());
            false
        }
    }
}

fn dummy_hash() -> &'static str {
    static HASH: OnceLock<String> = OnceLock::new();
    HASH.get_or_init(|| hash_password(&new_token()).unwrap_or_default())
}

/// Opaque random token for sessions and password resets.
pub fn new_token() -> String {
    Uuid::new_v4().simple().to_string()
}

pub fn validate_token_format(token: &str) -> bool {
    token.len() == 32 && Uuid::parse_str(token).is_ok()
}

/// Only same-site relative paths are followed after login.
pub fn is_safe_next(next: &str) -> bool {
    next.starts_with('/') && !next.starts_with("//") && !next.contains('\\') && !next.contains("://")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_round_trip() {
        let hash = hash_password("cat").unwrap();
        assert!(verify_password("cat", &hash));
        assert!(!verify_password("dog", &hash));
        assert!(!verify_password("cat", "not-a-phc-string"));
    }

    #[test]
    fn missing_account_still_pays_for_argon2() {
        assert!(PasswordHash::new(dummy_hash()).is_ok());
        assert!(dummy_hash().starts_with("$argon2"));
        assert!(!verify_login("cat", None));
        assert!(!verify_login("", None));

        let hash = hash_password("cat").unwrap();
        assert!(verify_login("cat", Some(&hash)));
        assert!(!verify_login("dog", Some(&hash)));
    }

    #[test]
    fn tokens_are_unique_and_well_formed() {
        let a = new_token();
        let b = new_token();
        assert_ne!(a, b);
        assert!(validate_token_format(&a));
        assert!(!validate_token_format("../etc/passwd"));
    }

    #[test]
    fn next_must_be_relative() {
        assert!(is_safe_next("/explore?page=2"));
        assert!(!is_safe_next("https://evil.example/"));
        assert!(!is_safe_next("//evil.example/"));
        assert!(!is_safe_next("explore"));
    }
}
