//! Control configuration stored as TOML (default `.agent-control/config.toml`).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::io::fs_atomic::write_atomic;

/// How the ask dispatcher reaches decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchMode {
    /// Always prompt a human; an interrupted prompt denies.
    Interactive,
    /// Auto-approve unprotected actions and bound free-text prompts by a timeout.
    NonInteractive,
}

/// Control configuration (TOML).
///
/// Missing fields default to the values used by an attended terminal session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ControlConfig {
    pub mode: DispatchMode,

    /// Wall-clock bound for free-text prompts in non-interactive mode.
    pub followup_timeout_secs: u64,

    /// Non-interactive: answer `api_req_failed` with a retry.
    pub auto_retry_failed_requests: bool,

    /// Non-interactive: answer `resume_task` with a resume.
    pub auto_resume: bool,

    /// Answer used when a follow-up has no suggestions and the prompt times out.
    pub fallback_answer: String,

    /// Root directory for per-task delegation records.
    pub delegation_dir: PathBuf,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            mode: DispatchMode::Interactive,
            followup_timeout_secs: 60,
            auto_retry_failed_requests: true,
            auto_resume: true,
            fallback_answer: "Proceed with your best judgement.".to_string(),
            delegation_dir: PathBuf::from(".agent-control").join("tasks"),
        }
    }
}

impl ControlConfig {
    pub fn validate(&self) -> Result<()> {
        if self.followup_timeout_secs == 0 {
            return Err(anyhow!("followup_timeout_secs must be > 0"));
        }
        if self.fallback_answer.trim().is_empty() {
            return Err(anyhow!("fallback_answer must be non-empty"));
        }
        if self.delegation_dir.as_os_str().is_empty() {
            return Err(anyhow!("delegation_dir must be non-empty"));
        }
        Ok(())
    }

    pub fn followup_timeout(&self) -> Duration {
        Duration::from_secs(self.followup_timeout_secs)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `ControlConfig::default()`.
pub fn load_config(path: &Path) -> Result<ControlConfig> {
    if !path.exists() {
        let cfg = ControlConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: ControlConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &ControlConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, buf.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, ControlConfig::default());
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        let cfg = ControlConfig {
            mode: DispatchMode::NonInteractive,
            followup_timeout_secs: 5,
            ..ControlConfig::default()
        };
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    /// Partial files fill the rest from defaults.
    #[test]
    fn partial_file_uses_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(&path, "mode = \"non_interactive\"\n").expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.mode, DispatchMode::NonInteractive);
        assert_eq!(cfg.followup_timeout_secs, 60);
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(&path, "followup_timeout_secs = 0\n").expect("write");
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("followup_timeout_secs"));
    }
}
