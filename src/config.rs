use std::{fs, path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::error::{SyncError, SyncResult};

/// Configuration for the session manager and harvester.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SyncConfig {
    /// Human-readable device name advertised while pairing.
    pub device_name: String,
    /// Reconnect attempts after an established session drops. Zero disables
    /// reconnecting.
    pub max_retries: u32,
    /// Delay before the first reconnect attempt; doubles on each attempt.
    #[serde(rename = "base_delay_ms", with = "duration_ms")]
    pub base_delay: Duration,
    /// Upper bound for a single reconnect delay.
    #[serde(rename = "max_delay_ms", with = "duration_ms")]
    pub max_delay: Duration,
    /// How long to wait for the pairing to be confirmed.
    #[serde(rename = "pairing_timeout_ms", with = "duration_ms")]
    pub pairing_timeout: Duration,
    /// Contact lookups in flight at once during a harvest.
    pub harvest_concurrency: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            device_name: "wa-contact-sync".into(),
            max_retries: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            pairing_timeout: Duration::from_secs(60),
            harvest_concurrency: 4,
        }
    }
}

impl SyncConfig {
    /// Load a JSON config file. Missing fields keep their defaults.
    pub fn load(path: impl AsRef<Path>) -> SyncResult<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the manager cannot run with.
    pub fn validate(&self) -> SyncResult<()> {
        if self.harvest_concurrency == 0 {
            return Err(SyncError::Config(
                "harvest_concurrency must be at least 1".into(),
            ));
        }
        if self.base_delay > self.max_delay {
            return Err(SyncError::Config(format!(
                "base_delay ({:?}) exceeds max_delay ({:?})",
                self.base_delay, self.max_delay
            )));
        }
        if self.pairing_timeout.is_zero() {
            return Err(SyncError::Config("pairing_timeout must be non-zero".into()));
        }
        Ok(())
    }

    /// Override the advertised device name.
    pub fn with_device_name(mut self, name: impl Into<String>) -> Self {
        self.device_name = name.into();
        self
    }

    /// Override the reconnect policy.
    pub fn with_reconnect(mut self, max_retries: u32, base_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.base_delay = base_delay;
        self
    }

    /// Override the cap on a single reconnect delay.
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Override the pairing confirmation timeout.
    pub fn with_pairing_timeout(mut self, timeout: Duration) -> Self {
        self.pairing_timeout = timeout;
        self
    }

    /// Override the harvest lookup concurrency.
    pub fn with_harvest_concurrency(mut self, concurrency: usize) -> Self {
        self.harvest_concurrency = concurrency;
        self
    }
}

/// Serde helper storing a [`Duration`] as integer milliseconds.
pub(crate) mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
