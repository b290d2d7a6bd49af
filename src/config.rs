//! Engine configuration.
//!
//! One immutable `AuthConfig` is built per process (or per test) and threaded
//! through `AccountService::new`; there is no ambient settings lookup and no
//! reload path.

use secrecy::SecretString;
use time::Duration;

const DEFAULT_ACTIVATION_TOKEN_TTL: Duration = Duration::days(7);
const DEFAULT_PASSWORD_RESET_TOKEN_TTL: Duration = Duration::hours(1);
const DEFAULT_SECONDARY_EMAIL_TOKEN_TTL: Duration = Duration::hours(1);
const DEFAULT_ACCESS_TOKEN_TTL: Duration = Duration::minutes(5);
const DEFAULT_REFRESH_TOKEN_TTL: Duration = Duration::days(7);
const DEFAULT_MIN_PASSWORD_LENGTH: usize = 8;
const DEFAULT_EMAIL_FROM: &str = "no-reply@localhost";
const DEFAULT_ACTIVATION_PATH: &str = "activate";
const DEFAULT_PASSWORD_RESET_PATH: &str = "password-reset";

/// Immutable engine configuration.
///
/// Defaults mirror a permissive development setup: unverified accounts may
/// log in, activation emails are sent, and account deletion is soft.
#[derive(Clone, Debug)]
pub struct AuthConfig {
    secret: SecretString,
    allow_login_not_verified: bool,
    login_allowed_fields: Vec<String>,
    allow_login_with_secondary_email: bool,
    register_required_fields: Vec<String>,
    register_optional_fields: Vec<String>,
    update_fields: Vec<String>,
    activation_token_ttl: Duration,
    password_reset_token_ttl: Duration,
    secondary_email_token_ttl: Duration,
    access_token_ttl: Duration,
    refresh_token_ttl: Duration,
    send_activation_email: bool,
    allow_delete_account: bool,
    email_from: String,
    activation_path: String,
    password_reset_path: String,
    min_password_length: usize,
}

impl AuthConfig {
    /// Build a configuration around the process-wide token signing secret.
    #[must_use]
    pub fn new(secret: SecretString) -> Self {
        Self {
            secret,
            allow_login_not_verified: true,
            login_allowed_fields: vec!["email".to_string(), "username".to_string()],
            allow_login_with_secondary_email: true,
            register_required_fields: vec!["email".to_string(), "username".to_string()],
            register_optional_fields: Vec::new(),
            update_fields: vec!["first_name".to_string(), "last_name".to_string()],
            activation_token_ttl: DEFAULT_ACTIVATION_TOKEN_TTL,
            password_reset_token_ttl: DEFAULT_PASSWORD_RESET_TOKEN_TTL,
            secondary_email_token_ttl: DEFAULT_SECONDARY_EMAIL_TOKEN_TTL,
            access_token_ttl: DEFAULT_ACCESS_TOKEN_TTL,
            refresh_token_ttl: DEFAULT_REFRESH_TOKEN_TTL,
            send_activation_email: true,
            allow_delete_account: false,
            email_from: DEFAULT_EMAIL_FROM.to_string(),
            activation_path: DEFAULT_ACTIVATION_PATH.to_string(),
            password_reset_path: DEFAULT_PASSWORD_RESET_PATH.to_string(),
            min_password_length: DEFAULT_MIN_PASSWORD_LENGTH,
        }
    }

    #[must_use]
    pub fn with_allow_login_not_verified(mut self, allow: bool) -> Self {
        self.allow_login_not_verified = allow;
        self
    }

    #[must_use]
    pub fn with_login_allowed_fields(mut self, fields: Vec<String>) -> Self {
        self.login_allowed_fields = fields;
        self
    }

    #[must_use]
    pub fn with_allow_login_with_secondary_email(mut self, allow: bool) -> Self {
        self.allow_login_with_secondary_email = allow;
        self
    }

    #[must_use]
    pub fn with_register_fields(mut self, required: Vec<String>, optional: Vec<String>) -> Self {
        self.register_required_fields = required;
        self.register_optional_fields = optional;
        self
    }

    #[must_use]
    pub fn with_update_fields(mut self, fields: Vec<String>) -> Self {
        self.update_fields = fields;
        self
    }

    #[must_use]
    pub fn with_activation_token_ttl(mut self, ttl: Duration) -> Self {
        self.activation_token_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_password_reset_token_ttl(mut self, ttl: Duration) -> Self {
        self.password_reset_token_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_secondary_email_token_ttl(mut self, ttl: Duration) -> Self {
        self.secondary_email_token_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_access_token_ttl(mut self, ttl: Duration) -> Self {
        self.access_token_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_refresh_token_ttl(mut self, ttl: Duration) -> Self {
        self.refresh_token_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_send_activation_email(mut self, send: bool) -> Self {
        self.send_activation_email = send;
        self
    }

    #[must_use]
    pub fn with_allow_delete_account(mut self, allow: bool) -> Self {
        self.allow_delete_account = allow;
        self
    }

    #[must_use]
    pub fn with_email_from(mut self, from: String) -> Self {
        self.email_from = from;
        self
    }

    #[must_use]
    pub fn with_activation_path(mut self, path: String) -> Self {
        self.activation_path = path;
        self
    }

    #[must_use]
    pub fn with_password_reset_path(mut self, path: String) -> Self {
        self.password_reset_path = path;
        self
    }

    #[must_use]
    pub fn with_min_password_length(mut self, length: usize) -> Self {
        self.min_password_length = length;
        self
    }

    #[must_use]
    pub fn secret(&self) -> &SecretString {
        &self.secret
    }

    #[must_use]
    pub fn allow_login_not_verified(&self) -> bool {
        self.allow_login_not_verified
    }

    #[must_use]
    pub fn login_allowed_fields(&self) -> &[String] {
        &self.login_allowed_fields
    }

    #[must_use]
    pub fn allow_login_with_secondary_email(&self) -> bool {
        self.allow_login_with_secondary_email
    }

    #[must_use]
    pub fn register_required_fields(&self) -> &[String] {
        &self.register_required_fields
    }

    #[must_use]
    pub fn register_optional_fields(&self) -> &[String] {
        &self.register_optional_fields
    }

    #[must_use]
    pub fn update_fields(&self) -> &[String] {
        &self.update_fields
    }

    #[must_use]
    pub fn activation_token_ttl(&self) -> Duration {
        self.activation_token_ttl
    }

    #[must_use]
    pub fn password_reset_token_ttl(&self) -> Duration {
        self.password_reset_token_ttl
    }

    #[must_use]
    pub fn secondary_email_token_ttl(&self) -> Duration {
        self.secondary_email_token_ttl
    }

    #[must_use]
    pub fn access_token_ttl(&self) -> Duration {
        self.access_token_ttl
    }

    #[must_use]
    pub fn refresh_token_ttl(&self) -> Duration {
        self.refresh_token_ttl
    }

    #[must_use]
    pub fn send_activation_email(&self) -> bool {
        self.send_activation_email
    }

    #[must_use]
    pub fn allow_delete_account(&self) -> bool {
        self.allow_delete_account
    }

    #[must_use]
    pub fn email_from(&self) -> &str {
        &self.email_from
    }

    #[must_use]
    pub fn activation_path(&self) -> &str {
        &self.activation_path
    }

    #[must_use]
    pub fn password_reset_path(&self) -> &str {
        &self.password_reset_path
    }

    #[must_use]
    pub fn min_password_length(&self) -> usize {
        self.min_password_length
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AuthConfig {
        AuthConfig::new(SecretString::from("test-secret".to_string()))
    }

    #[test]
    fn defaults_are_permissive() {
        let config = config();
        assert!(config.allow_login_not_verified());
        assert!(config.allow_login_with_secondary_email());
        assert!(config.send_activation_email());
        assert!(!config.allow_delete_account());
        assert_eq!(config.login_allowed_fields(), ["email", "username"]);
        assert_eq!(config.activation_token_ttl(), Duration::days(7));
        assert_eq!(config.password_reset_token_ttl(), Duration::hours(1));
        assert_eq!(config.min_password_length(), 8);
    }

    #[test]
    fn builders_override_defaults() {
        let config = config()
            .with_allow_login_not_verified(false)
            .with_allow_delete_account(true)
            .with_activation_token_ttl(Duration::minutes(10))
            .with_login_allowed_fields(vec!["username".to_string()]);
        assert!(!config.allow_login_not_verified());
        assert!(config.allow_delete_account());
        assert_eq!(config.activation_token_ttl(), Duration::minutes(10));
        assert_eq!(config.login_allowed_fields(), ["username"]);
    }
}
