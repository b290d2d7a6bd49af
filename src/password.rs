//! Password hashing and policy validation.
//!
//! Hashes are Argon2id PHC strings. Policy checks are deliberately small:
//! a minimum length and an entirely-numeric rejection, both surfaced as
//! field-scoped validation errors by the operations layer.

use anyhow::{Context, Result, anyhow};
use argon2::password_hash::SaltString;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use rand::rngs::OsRng;

/// A policy violation for a candidate password.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyViolation {
    TooShort { min: usize },
    EntirelyNumeric,
}

impl PolicyViolation {
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::TooShort { .. } => "password_too_short",
            Self::EntirelyNumeric => "password_entirely_numeric",
        }
    }

    #[must_use]
    pub fn message(&self) -> String {
        match self {
            Self::TooShort { min } => {
                format!("This password is too short. It must contain at least {min} characters.")
            }
            Self::EntirelyNumeric => "This password is entirely numeric.".to_string(),
        }
    }
}

/// Validate a candidate password against policy.
#[must_use]
pub fn validate_policy(password: &str, min_length: usize) -> Vec<PolicyViolation> {
    let mut violations = Vec::new();
    if password.chars().count() < min_length {
        violations.push(PolicyViolation::TooShort { min: min_length });
    }
    if !password.is_empty() && password.chars().all(|c| c.is_ascii_digit()) {
        violations.push(PolicyViolation::EntirelyNumeric);
    }
    violations
}

/// Hash a password with Argon2id and a fresh random salt.
///
/// # Errors
///
/// Returns an error if hashing fails.
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|err| anyhow!(err.to_string()))
        .context("failed to hash password")?;
    Ok(hash.to_string())
}

/// Verify a password against a stored PHC hash string.
#[must_use]
pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    PasswordHash::new(stored_hash).is_ok_and(|parsed| {
        Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_and_verify_round_trip() {
        let hash = hash_password("correct horse battery").unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(verify_password("correct horse battery", &hash));
        assert!(!verify_password("wrong password", &hash));
    }

    #[test]
    fn verify_rejects_malformed_hash() {
        assert!(!verify_password("anything", "not-a-phc-string"));
    }

    #[test]
    fn policy_flags_short_passwords() {
        let violations = validate_policy("abc", 8);
        assert_eq!(violations, vec![PolicyViolation::TooShort { min: 8 }]);
        assert_eq!(violations[0].code(), "password_too_short");
    }

    #[test]
    fn policy_flags_numeric_passwords() {
        let violations = validate_policy("1234567890", 8);
        assert_eq!(violations, vec![PolicyViolation::EntirelyNumeric]);
    }

    #[test]
    fn policy_accepts_reasonable_passwords() {
        assert!(validate_policy("StrongPass1!", 8).is_empty());
    }
}
