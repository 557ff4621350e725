//! Configuration for sessions and the session lifecycle.
//!
//! Constants carry the defaults; [`SessionConfig`] and
//! [`LifecycleConfig`] are the per-call and per-process inputs.

use crate::{RelayError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default values for session and lifecycle configuration.
pub struct RelayConfig;

impl RelayConfig {
    pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);
    pub const DEFAULT_QUEUE_CAPACITY: usize = 10;
    pub const DEFAULT_FAN_OUT_COUNT: u32 = 5;
    pub const DEFAULT_FAN_OUT_INTERVAL: Duration = Duration::from_millis(100);
    pub const DEFAULT_PROCESSING_DELAY: Duration = Duration::from_millis(200);
    pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);
    pub const MAX_SESSIONS: usize = 10;
}

/// Serialize a `Duration` as integer milliseconds.
mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let millis = u64::try_from(value.as_millis()).unwrap_or(u64::MAX);
        serializer.serialize_u64(millis)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Interaction mode of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Mode {
    /// Many inbound, one outbound summary after end-of-stream.
    CollectThenRespond,
    /// One inbound, `count` paced outbound messages.
    FanOut {
        count: u32,
        #[serde(with = "duration_ms", rename = "interval_ms")]
        interval: Duration,
    },
    /// Each inbound message produces exactly one outbound before the next read.
    LockStep,
    /// Inbound and outbound on independent schedules joined by a bounded queue.
    DecoupledPipeline {
        queue_capacity: usize,
        #[serde(with = "duration_ms", rename = "processing_delay_ms")]
        processing_delay: Duration,
        /// Run processing in its own task between two queues.
        #[serde(default)]
        dedicated_processor: bool,
    },
}

impl Mode {
    /// Fan-out with the default count and pacing.
    pub fn fan_out() -> Self {
        Mode::FanOut {
            count: RelayConfig::DEFAULT_FAN_OUT_COUNT,
            interval: RelayConfig::DEFAULT_FAN_OUT_INTERVAL,
        }
    }

    /// Decoupled pipeline with the default capacity and processing delay.
    pub fn pipeline() -> Self {
        Mode::DecoupledPipeline {
            queue_capacity: RelayConfig::DEFAULT_QUEUE_CAPACITY,
            processing_delay: RelayConfig::DEFAULT_PROCESSING_DELAY,
            dedicated_processor: false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::CollectThenRespond => "collect_then_respond",
            Mode::FanOut { .. } => "fan_out",
            Mode::LockStep => "lock_step",
            Mode::DecoupledPipeline { .. } => "decoupled_pipeline",
        }
    }

    /// Capacity of the queue joining ingress and egress, if the mode has one.
    pub fn queue_capacity(&self) -> Option<usize> {
        match self {
            Mode::DecoupledPipeline { queue_capacity, .. } => Some(*queue_capacity),
            _ => None,
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-session configuration handed to the coordinator at session start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(flatten)]
    pub mode: Mode,
    /// Bound on how long draining may wait for stages before forcing termination.
    #[serde(
        with = "duration_ms",
        rename = "shutdown_timeout_ms",
        default = "default_shutdown_timeout"
    )]
    pub shutdown_timeout: Duration,
}

fn default_shutdown_timeout() -> Duration {
    RelayConfig::DEFAULT_SHUTDOWN_TIMEOUT
}

impl SessionConfig {
    /// Create a config for the given mode with the default shutdown timeout.
    pub fn new(mode: Mode) -> Self {
        Self {
            mode,
            shutdown_timeout: RelayConfig::DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }

    /// Set the shutdown timeout.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Load a config from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| RelayError::io_with_path(e, path))?;
        let config: SessionConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the coordinator cannot run.
    pub fn validate(&self) -> Result<()> {
        match self.mode {
            Mode::FanOut { count: 0, .. } => {
                return Err(RelayError::config("count", "fan-out count must be at least 1"));
            }
            Mode::DecoupledPipeline {
                queue_capacity: 0, ..
            } => {
                return Err(RelayError::config(
                    "queue_capacity",
                    "queue capacity must be at least 1",
                ));
            }
            _ => {}
        }
        if self.shutdown_timeout.is_zero() {
            return Err(RelayError::config(
                "shutdown_timeout",
                "shutdown timeout must be non-zero",
            ));
        }
        Ok(())
    }
}

/// Process-wide lifecycle settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleConfig {
    pub max_sessions: usize,
    #[serde(with = "duration_ms", rename = "shutdown_grace_ms")]
    pub shutdown_grace: Duration,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            max_sessions: RelayConfig::MAX_SESSIONS,
            shutdown_grace: RelayConfig::DEFAULT_SHUTDOWN_GRACE,
        }
    }
}

impl LifecycleConfig {
    pub fn with_max_sessions(mut self, max_sessions: usize) -> Self {
        self.max_sessions = max_sessions;
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_sessions == 0 {
            return Err(RelayError::config(
                "max_sessions",
                "at least one session must be allowed",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_values() {
        assert_eq!(
            Mode::fan_out(),
            Mode::FanOut {
                count: 5,
                interval: Duration::from_millis(100)
            }
        );
        assert_eq!(Mode::pipeline().queue_capacity(), Some(10));
        assert_eq!(
            SessionConfig::new(Mode::LockStep).shutdown_timeout,
            Duration::from_secs(10)
        );
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        let config = SessionConfig::new(Mode::DecoupledPipeline {
            queue_capacity: 0,
            processing_delay: Duration::ZERO,
            dedicated_processor: false,
        });
        let err = config.validate().unwrap_err();
        assert!(matches!(err, RelayError::Config { ref field, .. } if field == "queue_capacity"));
    }

    #[test]
    fn test_validate_rejects_zero_fan_out() {
        let config = SessionConfig::new(Mode::FanOut {
            count: 0,
            interval: Duration::ZERO,
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_json_shape() {
        let config = SessionConfig::new(Mode::fan_out())
            .with_shutdown_timeout(Duration::from_millis(2500));
        let value = serde_json::to_value(&config).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "mode": "fan_out",
                "count": 5,
                "interval_ms": 100,
                "shutdown_timeout_ms": 2500
            })
        );
    }

    #[test]
    fn test_load_from_file_applies_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"mode": "decoupled_pipeline", "queue_capacity": 4, "processing_delay_ms": 50}}"#
        )
        .unwrap();

        let config = SessionConfig::load(file.path()).unwrap();
        assert_eq!(
            config.mode,
            Mode::DecoupledPipeline {
                queue_capacity: 4,
                processing_delay: Duration::from_millis(50),
                dedicated_processor: false,
            }
        );
        assert_eq!(config.shutdown_timeout, RelayConfig::DEFAULT_SHUTDOWN_TIMEOUT);
    }

    #[test]
    fn test_load_missing_file() {
        let err = SessionConfig::load("/nonexistent/relay/session.json").unwrap_err();
        assert!(matches!(err, RelayError::Io { path: Some(_), .. }));
    }

    #[test]
    fn test_lifecycle_validate() {
        assert!(LifecycleConfig::default().validate().is_ok());
        assert!(LifecycleConfig::default()
            .with_max_sessions(0)
            .validate()
            .is_err());
    }
}
