//! Engine configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

use crate::canonical::canonical_hash_hex;
use crate::types::version::DEFAULT_DISPLAY_LEN;

/// Runtime knobs for sessions and probes.
///
/// Defaults suit interactive command invocations:
/// - Lock wait is a few seconds so a contended call fails fast
/// - Probe budget is generous because deep probes realize every layout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// How long to wait for the document lock (default: 5s).
    pub lock_wait: Duration,
    /// Poll interval while waiting for the lock (default: 50ms).
    pub lock_poll_interval: Duration,
    /// Age after which a lock file is treated as abandoned (default: 10min).
    pub stale_lock_after: Duration,
    /// Deep probe time budget (default: 30s).
    pub probe_timeout: Duration,
    /// Maximum layouts realized by a deep probe (default: 50).
    pub max_probe_layouts: usize,
    /// Hex characters shown when a version token is displayed (default: 16).
    pub token_display_len: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lock_wait: Duration::from_secs(5),
            lock_poll_interval: Duration::from_millis(50),
            stale_lock_after: Duration::from_secs(600),
            probe_timeout: Duration::from_secs(30),
            max_probe_layouts: 50,
            token_display_len: DEFAULT_DISPLAY_LEN,
        }
    }
}

impl EngineConfig {
    /// Defaults overlaid with `DECK_KERNEL_*` environment variables.
    ///
    /// - `DECK_KERNEL_LOCK_WAIT_MS`
    /// - `DECK_KERNEL_STALE_LOCK_MS`
    /// - `DECK_KERNEL_PROBE_TIMEOUT_MS`
    /// - `DECK_KERNEL_MAX_PROBE_LAYOUTS`
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overlaid with values from `lookup`, keyed like [`EngineConfig::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let number = |key: &str| lookup(key).and_then(|raw| parse_number::<u64>(key, &raw));
        let mut config = Self::default();
        if let Some(ms) = number("DECK_KERNEL_LOCK_WAIT_MS") {
            config.lock_wait = Duration::from_millis(ms);
        }
        if let Some(ms) = number("DECK_KERNEL_STALE_LOCK_MS") {
            config.stale_lock_after = Duration::from_millis(ms);
        }
        if let Some(ms) = number("DECK_KERNEL_PROBE_TIMEOUT_MS") {
            config.probe_timeout = Duration::from_millis(ms);
        }
        if let Some(n) = lookup("DECK_KERNEL_MAX_PROBE_LAYOUTS")
            .and_then(|raw| parse_number::<usize>("DECK_KERNEL_MAX_PROBE_LAYOUTS", &raw))
        {
            config.max_probe_layouts = n;
        }
        config
    }

    /// Builder: lock wait.
    pub fn with_lock_wait(mut self, wait: Duration) -> Self {
        self.lock_wait = wait;
        self
    }

    /// Builder: deep probe budget.
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Hash of the configuration, for logs.
    pub fn params_hash(&self) -> String {
        canonical_hash_hex(self).unwrap_or_else(|_| "unhashable".to_string())
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> Option<T> {
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(key, value = %raw, "ignoring malformed configuration value");
            None
        }
    }
}
