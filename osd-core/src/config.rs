//! Session configuration.

use crate::link::LinkTiming;
use crate::protocol::codec::MAX_MEM_PAYLOAD;
use crate::protocol::ModuleId;
use crate::registry::ModuleKind;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// What to do when core trace deviates from the expected image.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationPolicy {
    /// Record the violation and keep running.
    #[default]
    Record,
    /// End the session at the first violation.
    Abort,
}

impl std::str::FromStr for VerificationPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "record" => Ok(Self::Record),
            "abort" => Ok(Self::Abort),
            other => Err(format!("unknown verification policy '{other}' (expected record or abort)")),
        }
    }
}

type NamingFn = dyn Fn(ModuleKind, ModuleId) -> PathBuf + Send + Sync;

/// Maps a module to the file name of its trace log.
#[derive(Clone)]
pub struct LogNaming(Arc<NamingFn>);

impl LogNaming {
    pub fn new(f: impl Fn(ModuleKind, ModuleId) -> PathBuf + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    pub fn name(&self, kind: ModuleKind, id: ModuleId) -> PathBuf {
        (self.0)(kind, id)
    }
}

/// `stm002.log`, `ctm004.log`, ...
pub fn default_log_name(kind: ModuleKind, id: ModuleId) -> PathBuf {
    PathBuf::from(format!("{}{:03x}.log", kind.short_name(), id.get()))
}

impl Default for LogNaming {
    fn default() -> Self {
        Self::new(default_log_name)
    }
}

impl fmt::Debug for LogNaming {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("LogNaming(..)")
    }
}

/// Session-wide settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Directory trace logs are created in.
    pub log_dir: PathBuf,
    /// Severity of core trace verification failures.
    pub verification_policy: VerificationPolicy,
    /// Per-request response timeout.
    pub response_timeout_ms: u64,
    /// Dispatcher idle poll interval.
    pub poll_interval_ms: u64,
    /// Largest memory write or read burst, in bytes. At most one frame's
    /// memory payload.
    pub memory_burst: usize,
    #[serde(skip)]
    pub log_naming: LogNaming,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("."),
            verification_policy: VerificationPolicy::Record,
            response_timeout_ms: 2_000,
            poll_interval_ms: 10,
            memory_burst: 1024,
            log_naming: LogNaming::default(),
        }
    }
}

impl SessionConfig {
    /// Load from a JSON file. Missing fields keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: Self = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings no session can run with.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.memory_burst > 0, "memory_burst must be positive");
        anyhow::ensure!(
            self.memory_burst <= MAX_MEM_PAYLOAD,
            "memory_burst {} exceeds the {MAX_MEM_PAYLOAD} bytes a frame can carry",
            self.memory_burst
        );
        anyhow::ensure!(self.response_timeout_ms > 0, "response_timeout_ms must be positive");
        anyhow::ensure!(self.poll_interval_ms > 0, "poll_interval_ms must be positive");
        Ok(())
    }

    /// Path of the trace log for a module.
    pub fn log_path(&self, kind: ModuleKind, id: ModuleId) -> PathBuf {
        self.log_dir.join(self.log_naming.name(kind, id))
    }

    pub const fn timing(&self) -> LinkTiming {
        LinkTiming {
            response_timeout: Duration::from_millis(self.response_timeout_ms),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_log_names() {
        assert_eq!(default_log_name(ModuleKind::Stm, ModuleId(2)), PathBuf::from("stm002.log"));
        assert_eq!(default_log_name(ModuleKind::Ctm, ModuleId(0x1a)), PathBuf::from("ctm01a.log"));
    }

    #[test]
    fn test_injected_naming() {
        let config = SessionConfig {
            log_dir: PathBuf::from("/tmp/run"),
            log_naming: LogNaming::new(|kind, id| PathBuf::from(format!("{kind}-{}.trace", id.get()))),
            ..SessionConfig::default()
        };
        assert_eq!(config.log_path(ModuleKind::Ctm, ModuleId(4)), PathBuf::from("/tmp/run/CTM-4.trace"));
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: SessionConfig =
            serde_json::from_str(r#"{ "verification_policy": "abort", "memory_burst": 64 }"#).unwrap();
        assert_eq!(config.verification_policy, VerificationPolicy::Abort);
        assert_eq!(config.memory_burst, 64);
        assert_eq!(config.response_timeout_ms, 2_000);
        assert_eq!(config.timing().poll_interval, Duration::from_millis(10));
    }

    #[test]
    fn test_from_file_rejects_zero_burst() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, r#"{ "memory_burst": 0 }"#).unwrap();
        assert!(SessionConfig::from_file(&path).is_err());
    }

    #[test]
    fn test_burst_must_fit_a_frame() {
        let config = SessionConfig { memory_burst: 100_000, ..SessionConfig::default() };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("memory_burst 100000"));

        let config = SessionConfig { memory_burst: MAX_MEM_PAYLOAD, ..SessionConfig::default() };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_policy_parse() {
        assert_eq!("abort".parse::<VerificationPolicy>().unwrap(), VerificationPolicy::Abort);
        assert!("panic".parse::<VerificationPolicy>().is_err());
    }
}
