//! Secret types for protecting sensitive values from accidental logging.
//!
//! Re-exports the [`secrecy`] types used by the signaling core. TURN relay
//! passwords arrive in plain `key=value` headers and are handed to the media
//! stack; between those two points they must never show up in a log line or
//! a `{:?}` dump.
//!
//! `SecretString` implements `Debug` with redaction, so any struct deriving
//! `Debug` that holds one is safe to trace. Reading the value requires an
//! explicit `expose_secret()` call.
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! #[derive(Debug)]
//! struct RelayCredentials {
//!     username: String,
//!     password: SecretString,
//! }
//!
//! let creds = RelayCredentials {
//!     username: "relay-user".to_string(),
//!     password: SecretString::from("relay-pass"),
//! };
//!
//! assert!(!format!("{creds:?}").contains("relay-pass"));
//! assert_eq!(creds.password.expose_secret(), "relay-pass");
//! ```

pub use secrecy::{ExposeSecret, SecretString};
