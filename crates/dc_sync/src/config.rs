//! Sync tuning. Every field has a default, so an empty `[sync]` table (or
//! none at all) is a valid configuration.
//!
//! Durations are written in milliseconds in config files:
//!
//! ```toml
//! poll_interval_ms = 2000
//! request_timeout_ms = 15000
//! self_destruct_after_ms = 30000
//! initial_cursor = { mode = "lookback", secs = 3600 }
//!
//! [retry]
//! max_attempts = 3
//! base_delay_ms = 500
//! max_delay_ms = 30000
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use dc_proto::Millis;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Pause between the end of one poll and the start of the next.
    #[serde(rename = "poll_interval_ms", with = "millis")]
    pub poll_interval: Duration,

    /// Any single relay request taking longer counts as a transient failure.
    #[serde(rename = "request_timeout_ms", with = "millis")]
    pub request_timeout: Duration,

    pub retry: RetryPolicy,

    /// Where the cursor of a freshly opened conversation starts.
    pub initial_cursor: InitialCursor,

    /// Delay before an ephemeral message is deleted.
    #[serde(rename = "self_destruct_after_ms", with = "millis")]
    pub self_destruct_after: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            request_timeout: Duration::from_secs(15),
            retry: RetryPolicy::default(),
            initial_cursor: InitialCursor::Epoch,
            self_destruct_after: Duration::from_secs(30),
        }
    }
}

/// `Epoch` replays the whole history on open; `Lookback` only the last
/// `secs` seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum InitialCursor {
    #[default]
    Epoch,
    Lookback { secs: u64 },
}

impl InitialCursor {
    pub fn resolve(self, now: Millis) -> Millis {
        match self {
            Self::Epoch => 0,
            Self::Lookback { secs } => {
                let back = i64::try_from(secs.saturating_mul(1000)).unwrap_or(i64::MAX);
                now.saturating_sub(back).max(0)
            }
        }
    }
}

/// Exponential backoff for transient failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total tries for a user-initiated request, first attempt included.
    pub max_attempts: u32,
    #[serde(rename = "base_delay_ms", with = "millis")]
    pub base_delay: Duration,
    #[serde(rename = "max_delay_ms", with = "millis")]
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay after the `attempt`-th consecutive failure (1-based):
    /// `base_delay * 2^(attempt - 1)`, capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let p = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1000),
        };
        assert_eq!(p.delay_for(1), Duration::from_millis(100));
        assert_eq!(p.delay_for(2), Duration::from_millis(200));
        assert_eq!(p.delay_for(4), Duration::from_millis(800));
        assert_eq!(p.delay_for(5), Duration::from_millis(1000));
        assert_eq!(p.delay_for(64), Duration::from_millis(1000));
    }

    #[test]
    fn initial_cursor_policies() {
        assert_eq!(InitialCursor::Epoch.resolve(10_000_000), 0);
        assert_eq!(InitialCursor::Lookback { secs: 3600 }.resolve(10_000_000), 10_000_000 - 3_600_000);
        assert_eq!(InitialCursor::Lookback { secs: 3600 }.resolve(5), 0);
    }

    #[test]
    fn empty_table_gives_defaults() {
        let cfg: SyncConfig = toml::from_str("").unwrap();
        assert_eq!(cfg, SyncConfig::default());
    }

    #[test]
    fn parses_millisecond_fields_and_lookback() {
        let cfg: SyncConfig = toml::from_str(
            r#"
            poll_interval_ms = 250
            initial_cursor = { mode = "lookback", secs = 60 }
            [retry]
            max_attempts = 7
            "#,
        )
        .unwrap();
        assert_eq!(cfg.poll_interval, Duration::from_millis(250));
        assert_eq!(cfg.initial_cursor, InitialCursor::Lookback { secs: 60 });
        assert_eq!(cfg.retry.max_attempts, 7);
        assert_eq!(cfg.retry.base_delay, RetryPolicy::default().base_delay);
    }
}
