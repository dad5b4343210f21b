//! Sandbox configuration stored in `sandbox.toml`.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::diff::DiffSettings;
use crate::core::invariants::LedgerRules;

pub const DEFAULT_CONFIG_FILE: &str = "sandbox.toml";

/// Sandbox configuration (TOML).
///
/// Intended to be edited by humans. Missing fields fall back to the
/// reference bookkeeping rules.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SandboxConfig {
    pub ledger: LedgerRules,
    pub host: HostConfig,
    pub diff: DiffSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HostConfig {
    /// Upper bound on one `run` round trip. `0` waits forever.
    pub run_timeout_secs: u64,

    /// How long a bridge child gets to exit after `shutdown` before it is killed.
    pub shutdown_grace_secs: u64,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            run_timeout_secs: 30,
            shutdown_grace_secs: 5,
        }
    }
}

impl HostConfig {
    pub fn run_timeout(&self) -> Option<Duration> {
        (self.run_timeout_secs > 0).then(|| Duration::from_secs(self.run_timeout_secs))
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

impl SandboxConfig {
    pub fn validate(&self) -> Result<()> {
        let ledger = &self.ledger;
        if ledger.valid_accounts.is_empty() {
            return Err(anyhow!("ledger.valid_accounts must not be empty"));
        }
        if ledger.valid_statuses.is_empty() {
            return Err(anyhow!("ledger.valid_statuses must not be empty"));
        }
        if !ledger.balance_tolerance.is_finite() || ledger.balance_tolerance < 0.0 {
            return Err(anyhow!("ledger.balance_tolerance must be a finite value >= 0"));
        }
        for (field, value) in [
            ("ledger.single_leg_primitive", &ledger.single_leg_primitive),
            ("ledger.balanced_pair_primitive", &ledger.balanced_pair_primitive),
            ("ledger.status_param", &ledger.status_param),
            ("diff.review_primitive", &self.diff.review_primitive),
        ] {
            if value.trim().is_empty() {
                return Err(anyhow!("{field} must not be empty"));
            }
        }
        if !self.diff.review_spike_factor.is_finite() || self.diff.review_spike_factor < 1.0 {
            return Err(anyhow!("diff.review_spike_factor must be >= 1.0"));
        }
        if self.host.shutdown_grace_secs == 0 {
            return Err(anyhow!("host.shutdown_grace_secs must be > 0"));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `SandboxConfig::default()`.
pub fn load_config(path: &Path) -> Result<SandboxConfig> {
    if !path.exists() {
        let cfg = SandboxConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: SandboxConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &SandboxConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
