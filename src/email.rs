//! Email delivery abstraction and message builders.
//!
//! The engine never renders HTML or talks SMTP; it hands an [`EmailMessage`]
//! (recipient, template name, JSON context) to an [`EmailSender`] and treats
//! failure as a fallible external effect. State is committed before delivery
//! is attempted, so a failed send surfaces as `email_fail` without implying a
//! rollback.

use std::sync::{Mutex, PoisonError};

use anyhow::Result;
use serde_json::json;
use tracing::info;

use crate::config::AuthConfig;

pub const TEMPLATE_ACTIVATION: &str = "activation";
pub const TEMPLATE_RESEND_ACTIVATION: &str = "resend_activation";
pub const TEMPLATE_SECONDARY_EMAIL_ACTIVATION: &str = "secondary_email_activation";
pub const TEMPLATE_PASSWORD_RESET: &str = "password_reset";

#[derive(Clone, Debug)]
pub struct EmailMessage {
    pub to_email: String,
    pub from_email: String,
    pub template: String,
    pub payload_json: String,
}

/// Email delivery abstraction consumed by the engine.
pub trait EmailSender: Send + Sync {
    /// Deliver a message or return an error to report delivery failure.
    ///
    /// # Errors
    ///
    /// Returns an error when the message could not be handed off.
    fn send(&self, message: &EmailMessage) -> Result<()>;
}

/// Local dev sender that logs the payload instead of sending real email.
#[derive(Clone, Debug, Default)]
pub struct LogEmailSender;

impl EmailSender for LogEmailSender {
    fn send(&self, message: &EmailMessage) -> Result<()> {
        info!(
            to_email = %message.to_email,
            template = %message.template,
            payload = %message.payload_json,
            "email send stub"
        );
        Ok(())
    }
}

/// Test sender that records every message it is handed.
#[derive(Debug, Default)]
pub struct MemorySender {
    sent: Mutex<Vec<EmailMessage>>,
}

impl MemorySender {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages handed to this sender so far, in order.
    #[must_use]
    pub fn sent(&self) -> Vec<EmailMessage> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl EmailSender for MemorySender {
    fn send(&self, message: &EmailMessage) -> Result<()> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message.clone());
        Ok(())
    }
}

fn message(
    config: &AuthConfig,
    to: &str,
    template: &str,
    path: &str,
    token: &str,
) -> EmailMessage {
    let payload = json!({
        "token": token,
        "path": format!("{path}/{token}"),
    });
    EmailMessage {
        to_email: to.to_string(),
        from_email: config.email_from().to_string(),
        template: template.to_string(),
        // json! output is always serializable
        payload_json: payload.to_string(),
    }
}

pub(crate) fn activation_message(config: &AuthConfig, to: &str, token: &str) -> EmailMessage {
    message(
        config,
        to,
        TEMPLATE_ACTIVATION,
        config.activation_path(),
        token,
    )
}

pub(crate) fn resend_activation_message(config: &AuthConfig, to: &str, token: &str) -> EmailMessage {
    message(
        config,
        to,
        TEMPLATE_RESEND_ACTIVATION,
        config.activation_path(),
        token,
    )
}

/// Sent to the candidate address, not the account's existing address.
pub(crate) fn secondary_email_activation_message(
    config: &AuthConfig,
    candidate: &str,
    token: &str,
) -> EmailMessage {
    message(
        config,
        candidate,
        TEMPLATE_SECONDARY_EMAIL_ACTIVATION,
        config.activation_path(),
        token,
    )
}

pub(crate) fn password_reset_message(config: &AuthConfig, to: &str, token: &str) -> EmailMessage {
    message(
        config,
        to,
        TEMPLATE_PASSWORD_RESET,
        config.password_reset_path(),
        token,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;

    fn config() -> AuthConfig {
        AuthConfig::new(SecretString::from("secret".to_string()))
    }

    #[test]
    fn activation_message_embeds_token_path() {
        let message = activation_message(&config(), "a@example.com", "tok123");
        assert_eq!(message.to_email, "a@example.com");
        assert_eq!(message.template, TEMPLATE_ACTIVATION);
        let payload: serde_json::Value = serde_json::from_str(&message.payload_json).unwrap();
        assert_eq!(payload["token"], "tok123");
        assert_eq!(payload["path"], "activate/tok123");
    }

    #[test]
    fn password_reset_message_uses_reset_path() {
        let message = password_reset_message(&config(), "a@example.com", "tok");
        let payload: serde_json::Value = serde_json::from_str(&message.payload_json).unwrap();
        assert_eq!(payload["path"], "password-reset/tok");
    }

    #[test]
    fn memory_sender_records_messages() {
        let sender = MemorySender::new();
        sender
            .send(&activation_message(&config(), "a@example.com", "tok"))
            .unwrap();
        let sent = sender.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to_email, "a@example.com");
    }
}
