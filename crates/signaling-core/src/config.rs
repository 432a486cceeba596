//! Signaling core configuration.
//!
//! Configuration is loaded from environment variables. Every field has a
//! default; unparseable values fall back to it, parsed values that break an
//! invariant are rejected.

use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Default for whether TURN discovery runs at all.
pub const DEFAULT_TURN_DISCOVERY_ENABLED: bool = true;

/// Default TURN discovery response timeout in seconds.
pub const DEFAULT_TURN_DISCOVERY_TIMEOUT_SECONDS: u64 = 10;

/// Default number of out-of-order Locus deltas held before forcing a resync.
pub const DEFAULT_MAX_OUT_OF_ORDER_DELTAS: usize = 5;

/// Default base stall timer in milliseconds.
pub const DEFAULT_STALL_TIMEOUT_MS: u64 = 2000;

/// Default maximum random jitter added to the stall timer in milliseconds.
pub const DEFAULT_STALL_JITTER_MS: u64 = 1000;

/// Default per-meeting actor mailbox size.
pub const DEFAULT_MEETING_CHANNEL_BUFFER: usize = 500;

/// Default client ID prefix.
pub const DEFAULT_CLIENT_ID_PREFIX: &str = "signaling";

/// Signaling core configuration.
#[derive(Clone)]
pub struct Config {
    /// Identifier used in logs for this client instance.
    pub client_id: String,

    /// When false, TURN discovery is always skipped with reason `config`.
    pub turn_discovery_enabled: bool,

    /// How long to wait for a TURN discovery response.
    pub turn_discovery_timeout: Duration,

    /// Backlog size of buffered Locus deltas that forces a resync.
    pub max_out_of_order_deltas: usize,

    /// Base stall timer for a blocked delta buffer.
    pub stall_timeout: Duration,

    /// Upper bound of the random delay added to `stall_timeout`.
    pub stall_jitter: Duration,

    /// Per-meeting actor mailbox size.
    pub meeting_channel_buffer: usize,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("client_id", &self.client_id)
            .field("turn_discovery_enabled", &self.turn_discovery_enabled)
            .field(
                "turn_discovery_timeout_secs",
                &self.turn_discovery_timeout.as_secs(),
            )
            .field("max_out_of_order_deltas", &self.max_out_of_order_deltas)
            .field("stall_timeout_ms", &self.stall_timeout.as_millis())
            .field("stall_jitter_ms", &self.stall_jitter.as_millis())
            .field("meeting_channel_buffer", &self.meeting_channel_buffer)
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            client_id: generate_client_id(),
            turn_discovery_enabled: DEFAULT_TURN_DISCOVERY_ENABLED,
            turn_discovery_timeout: Duration::from_secs(DEFAULT_TURN_DISCOVERY_TIMEOUT_SECONDS),
            max_out_of_order_deltas: DEFAULT_MAX_OUT_OF_ORDER_DELTAS,
            stall_timeout: Duration::from_millis(DEFAULT_STALL_TIMEOUT_MS),
            stall_jitter: Duration::from_millis(DEFAULT_STALL_JITTER_MS),
            meeting_channel_buffer: DEFAULT_MEETING_CHANNEL_BUFFER,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let client_id = vars
            .get("SIGNALING_CLIENT_ID")
            .cloned()
            .unwrap_or_else(generate_client_id);

        let turn_discovery_enabled = vars
            .get("SIGNALING_TURN_DISCOVERY_ENABLED")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_TURN_DISCOVERY_ENABLED);

        let turn_discovery_timeout_seconds: u64 = vars
            .get("SIGNALING_TURN_DISCOVERY_TIMEOUT_SECONDS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_TURN_DISCOVERY_TIMEOUT_SECONDS);

        if turn_discovery_timeout_seconds == 0 {
            return Err(ConfigError::InvalidValue(
                "SIGNALING_TURN_DISCOVERY_TIMEOUT_SECONDS must be greater than 0".to_string(),
            ));
        }

        let max_out_of_order_deltas: usize = vars
            .get("LOCUS_MAX_OUT_OF_ORDER_DELTAS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_MAX_OUT_OF_ORDER_DELTAS);

        if max_out_of_order_deltas == 0 {
            return Err(ConfigError::InvalidValue(
                "LOCUS_MAX_OUT_OF_ORDER_DELTAS must be greater than 0".to_string(),
            ));
        }

        let stall_timeout_ms = vars
            .get("LOCUS_STALL_TIMEOUT_MS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_STALL_TIMEOUT_MS);

        let stall_jitter_ms = vars
            .get("LOCUS_STALL_JITTER_MS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_STALL_JITTER_MS);

        let meeting_channel_buffer: usize = vars
            .get("SIGNALING_MEETING_CHANNEL_BUFFER")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_MEETING_CHANNEL_BUFFER);

        if meeting_channel_buffer == 0 {
            return Err(ConfigError::InvalidValue(
                "SIGNALING_MEETING_CHANNEL_BUFFER must be greater than 0".to_string(),
            ));
        }

        Ok(Config {
            client_id,
            turn_discovery_enabled,
            turn_discovery_timeout: Duration::from_secs(turn_discovery_timeout_seconds),
            max_out_of_order_deltas,
            stall_timeout: Duration::from_millis(stall_timeout_ms),
            stall_jitter: Duration::from_millis(stall_jitter_ms),
            meeting_channel_buffer,
        })
    }
}

fn generate_client_id() -> String {
    let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string());
    let uuid_suffix = uuid::Uuid::new_v4().to_string();
    let short_suffix = uuid_suffix.get(..8).unwrap_or("00000000");
    format!("{DEFAULT_CLIENT_ID_PREFIX}-{hostname}-{short_suffix}")
}
