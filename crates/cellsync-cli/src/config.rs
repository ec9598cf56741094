//! Client configuration.

use std::time::Duration;

use tracing::warn;

/// Configuration for the `cellsync` binary.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Code the cell is registered with
    pub code: String,

    /// Replacement code sent after the first run, if any
    pub set_code: Option<String>,

    /// Inbound frames buffered per controller
    pub channel_capacity: usize,

    /// Loopback kernel pause between `busy` and the result
    pub kernel_delay: Duration,

    /// How long to wait for each expected kernel reply
    pub wait: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            code: "print(1)".to_string(),
            set_code: None,
            channel_capacity: 1024,
            kernel_delay: Duration::from_millis(50),
            wait: Duration::from_secs(5),
        }
    }
}

impl ClientConfig {
    /// Create config from environment variables with sensible defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create config from any key lookup. Unparseable numbers fall back to
    /// their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let code = lookup("CELLSYNC_CODE").unwrap_or(defaults.code);
        let set_code = lookup("CELLSYNC_SET_CODE");

        let channel_capacity =
            parse_or(&lookup, "CELLSYNC_CHANNEL_CAPACITY", defaults.channel_capacity);
        let kernel_delay = parse_or(&lookup, "CELLSYNC_KERNEL_DELAY_MS", 50u64);
        let wait = parse_or(&lookup, "CELLSYNC_WAIT_MS", 5_000u64);

        Self {
            code,
            set_code,
            channel_capacity,
            kernel_delay: Duration::from_millis(kernel_delay),
            wait: Duration::from_millis(wait),
        }
    }
}

fn parse_or<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> T {
    match lookup(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("Invalid {}={:?}, using default", key, raw);
            default
        }),
        None => default,
    }
}
