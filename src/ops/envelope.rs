//! Uniform response envelope.
//!
//! Every operation resolves to `success: bool` plus `errors`, where errors
//! are scoped to the offending input field or, for cross-field and policy
//! failures, to the `nonFieldErrors` bucket. The message catalog mirrors the
//! fixed wording clients key on.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Bucket for errors not attributable to a single input field.
pub const NON_FIELD_ERRORS: &str = "nonFieldErrors";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEntry {
    pub message: String,
    pub code: String,
}

impl ErrorEntry {
    #[must_use]
    pub fn new(message: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: code.into(),
        }
    }

    #[must_use]
    pub fn unauthenticated() -> Self {
        Self::new("Unauthenticated.", "unauthenticated")
    }

    #[must_use]
    pub fn not_verified() -> Self {
        Self::new("Please verify your account.", "not_verified")
    }

    #[must_use]
    pub fn not_verified_password_reset() -> Self {
        Self::new(
            "Please verify your account before requesting the password reset.",
            "not_verified",
        )
    }

    #[must_use]
    pub fn invalid_credentials() -> Self {
        Self::new("Please, enter valid credentials.", "invalid_credentials")
    }

    #[must_use]
    pub fn invalid_password() -> Self {
        Self::new("Invalid password.", "invalid_password")
    }

    #[must_use]
    pub fn invalid_token() -> Self {
        Self::new("Invalid token.", "invalid_token")
    }

    #[must_use]
    pub fn expired_token() -> Self {
        Self::new("Expired token.", "expired_token")
    }

    #[must_use]
    pub fn already_verified() -> Self {
        Self::new("Account already verified.", "already_verified")
    }

    #[must_use]
    pub fn email_in_use() -> Self {
        Self::new("A user with that email already exists.", "email_in_use")
    }

    #[must_use]
    pub fn username_in_use() -> Self {
        Self::new("A user with that username already exists.", "unique")
    }

    #[must_use]
    pub fn no_secondary_email() -> Self {
        Self::new("You do not have a secondary email.", "no_secondary_email")
    }

    #[must_use]
    pub fn email_fail() -> Self {
        Self::new("Failed to send email.", "email_fail")
    }

    #[must_use]
    pub fn password_mismatch() -> Self {
        Self::new("The two password fields didn't match.", "password_mismatch")
    }

    #[must_use]
    pub fn invalid_email() -> Self {
        Self::new("Enter a valid email address.", "invalid")
    }

    #[must_use]
    pub fn required(field: &str) -> Self {
        Self::new(format!("The {field} field is required."), "required")
    }

    #[must_use]
    pub fn unexpected(field: &str) -> Self {
        Self::new(format!("Unexpected field {field}."), "invalid")
    }
}

/// Field-scoped errors keyed by input name or [`NON_FIELD_ERRORS`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ErrorMap(BTreeMap<String, Vec<ErrorEntry>>);

impl ErrorMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn field(field: impl Into<String>, entry: ErrorEntry) -> Self {
        let mut map = Self::new();
        map.push(field, entry);
        map
    }

    #[must_use]
    pub fn non_field(entry: ErrorEntry) -> Self {
        Self::field(NON_FIELD_ERRORS, entry)
    }

    pub fn push(&mut self, field: impl Into<String>, entry: ErrorEntry) {
        self.0.entry(field.into()).or_default().push(entry);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn get(&self, field: &str) -> Option<&[ErrorEntry]> {
        self.0.get(field).map(Vec::as_slice)
    }
}

/// The base `success`/`errors` pair shared by every operation payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub success: bool,
    pub errors: Option<ErrorMap>,
}

impl Envelope {
    #[must_use]
    pub fn ok() -> Self {
        Self {
            success: true,
            errors: None,
        }
    }

    #[must_use]
    pub fn fail(errors: ErrorMap) -> Self {
        Self {
            success: false,
            errors: Some(errors),
        }
    }

    /// Errors attached to the named field, if any.
    #[must_use]
    pub fn field_errors(&self, field: &str) -> Option<&[ErrorEntry]> {
        self.errors.as_ref().and_then(|errors| errors.get(field))
    }

    /// The code of the first error for the named field, if any.
    #[must_use]
    pub fn error_code(&self, field: &str) -> Option<&str> {
        self.field_errors(field)
            .and_then(|entries| entries.first())
            .map(|entry| entry.code.as_str())
    }
}

/// Login result: envelope plus issued credentials and the reactivation flag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginPayload {
    #[serde(flatten)]
    pub envelope: Envelope,
    pub token: Option<String>,
    pub refresh_token: Option<String>,
    pub unarchiving: bool,
}

impl LoginPayload {
    #[must_use]
    pub fn fail(errors: ErrorMap) -> Self {
        Self {
            envelope: Envelope::fail(errors),
            token: None,
            refresh_token: None,
            unarchiving: false,
        }
    }
}

/// Envelope plus a fresh credential pair (register, password change, refresh).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialsPayload {
    #[serde(flatten)]
    pub envelope: Envelope,
    pub token: Option<String>,
    pub refresh_token: Option<String>,
}

impl CredentialsPayload {
    #[must_use]
    pub fn ok(token: Option<String>, refresh_token: Option<String>) -> Self {
        Self {
            envelope: Envelope::ok(),
            token,
            refresh_token,
        }
    }

    #[must_use]
    pub fn fail(errors: ErrorMap) -> Self {
        Self {
            envelope: Envelope::fail(errors),
            token: None,
            refresh_token: None,
        }
    }
}

/// verifyToken result: envelope plus the token's subject claim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenStatusPayload {
    #[serde(flatten)]
    pub envelope: Envelope,
    pub user_id: Option<uuid::Uuid>,
}

impl TokenStatusPayload {
    #[must_use]
    pub fn fail(errors: ErrorMap) -> Self {
        Self {
            envelope: Envelope::fail(errors),
            user_id: None,
        }
    }
}

/// revokeToken result: envelope plus the revocation unix timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevokedPayload {
    #[serde(flatten)]
    pub envelope: Envelope,
    pub revoked: Option<i64>,
}

impl RevokedPayload {
    #[must_use]
    pub fn fail(errors: ErrorMap) -> Self {
        Self {
            envelope: Envelope::fail(errors),
            revoked: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_envelope_serializes_null_errors() {
        let value = serde_json::to_value(Envelope::ok()).unwrap();
        assert_eq!(value["success"], true);
        assert!(value["errors"].is_null());
    }

    #[test]
    fn field_errors_serialize_under_field_name() {
        let envelope = Envelope::fail(ErrorMap::field("password", ErrorEntry::invalid_password()));
        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value["success"], false);
        assert_eq!(value["errors"]["password"][0]["code"], "invalid_password");
    }

    #[test]
    fn non_field_errors_use_dedicated_bucket() {
        let envelope = Envelope::fail(ErrorMap::non_field(ErrorEntry::unauthenticated()));
        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(
            value["errors"]["nonFieldErrors"][0]["code"],
            "unauthenticated"
        );
    }

    #[test]
    fn login_payload_flattens_envelope() {
        let payload = LoginPayload::fail(ErrorMap::non_field(ErrorEntry::invalid_credentials()));
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["success"], false);
        assert_eq!(value["unarchiving"], false);
        assert!(value["token"].is_null());
    }

    #[test]
    fn error_map_accumulates_entries_per_field() {
        let mut map = ErrorMap::new();
        map.push("email", ErrorEntry::invalid_email());
        map.push("email", ErrorEntry::email_in_use());
        assert_eq!(map.get("email").map(<[ErrorEntry]>::len), Some(2));
    }
}
