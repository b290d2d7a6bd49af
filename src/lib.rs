//! Account verification and credential lifecycle engine.
//!
//! veridian is the transport-agnostic core of an account-authentication
//! layer: the account state machine (unverified, verified, archived,
//! deleted), the purpose-scoped token workflows that drive its transitions,
//! and the uniform envelope every mutation resolves to. The web/RPC layer,
//! email templating, and schema migrations are external collaborators
//! reached through narrow interfaces.
//!
//! The usual wiring:
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use secrecy::SecretString;
//! use veridian::{AccountService, AuthConfig, LogEmailSender, MemoryStore};
//!
//! let config = AuthConfig::new(SecretString::from("process-secret".to_string()));
//! let service = AccountService::new(MemoryStore::new(), Arc::new(LogEmailSender), config);
//! ```

pub mod config;
pub mod email;
pub mod error;
pub mod fields;
pub mod ops;
pub mod password;
pub mod session;
pub mod store;
pub mod token;

pub use config::AuthConfig;
pub use email::{EmailMessage, EmailSender, LogEmailSender, MemorySender};
pub use error::Error;
pub use ops::{
    AccountService, Caller, CredentialsPayload, Envelope, ErrorEntry, ErrorMap, LoginPayload,
    NON_FIELD_ERRORS, RevokedPayload, TokenStatusPayload,
};
pub use ops::register::RegisterInput;
pub use store::{
    AccountStatus, MemoryStore, NewUser, PgStore, RefreshCredential, StoreError, UserRecord,
    UserStore,
};
pub use token::{Purpose, TokenError, TokenPayload, TokenSigner};
