//! Orchestrator configuration stored as TOML.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::fingerprint::DEFAULT_MAX_REPEATS_PER_FINGERPRINT;
use crate::core::rules::{RuleSpec, RuleTable};
use crate::core::types::validate_relative_path;

const FALLBACK_APP: &str = include_str!("../../fallback/App.swift");
const FALLBACK_CONTENT_VIEW: &str = include_str!("../../fallback/ContentView.swift");

/// Orchestrator configuration (TOML).
///
/// Missing fields default to values suitable for a local Swift toolchain.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub budget: BudgetConfig,
    pub compiler: CompilerConfig,
    pub generative: GenerativeConfig,
    pub session: SessionConfig,
    pub fallback: FallbackConfig,
    /// Extra classifier rules, consulted before the built-in table.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub rules: Vec<RuleSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BudgetConfig {
    /// Attempts granted to the simplest requests.
    pub baseline_attempts: u32,
    /// Hard cap on attempts regardless of complexity.
    pub max_attempts: u32,
    /// Earlier attempts a fingerprint may appear in before it is considered stuck.
    pub max_repeats_per_fingerprint: u32,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            baseline_attempts: 3,
            max_attempts: 6,
            max_repeats_per_fingerprint: DEFAULT_MAX_REPEATS_PER_FINGERPRINT,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CompilerConfig {
    /// Compiler command; `{root}` is replaced by the session scratch directory.
    pub command: Vec<String>,
    /// Hard timeout for a single build.
    pub timeout_secs: u64,
    /// Truncate captured compiler output beyond this many bytes.
    pub output_limit_bytes: usize,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            command: vec![
                "swift".to_string(),
                "build".to_string(),
                "--package-path".to_string(),
                "{root}".to_string(),
            ],
            timeout_secs: 120,
            output_limit_bytes: 200_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GenerativeConfig {
    /// When false the generative fixer is left out of the cascade.
    pub enabled: bool,
    /// Command for the external fix service (request JSON on stdin, response on stdout).
    pub command: Vec<String>,
    /// Per-call timeout; clipped to the remaining session time.
    pub timeout_secs: u64,
    pub output_limit_bytes: usize,
}

impl Default for GenerativeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            command: Vec::new(),
            timeout_secs: 180,
            output_limit_bytes: 2_000_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SessionConfig {
    /// Wall-clock budget for a whole recovery session.
    pub timeout_secs: u64,
    /// Parent of the per-session scratch directories.
    pub scratch_root: PathBuf,
    /// Where per-session build logs are written.
    pub log_dir: PathBuf,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30 * 60,
            scratch_root: std::env::temp_dir().join("recovery-scratch"),
            log_dir: PathBuf::from("build-logs"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct FallbackConfig {
    /// Minimal known-good tree substituted by the last-resort strategy.
    pub files: BTreeMap<String, String>,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            files: BTreeMap::from([
                ("App.swift".to_string(), FALLBACK_APP.to_string()),
                (
                    "ContentView.swift".to_string(),
                    FALLBACK_CONTENT_VIEW.to_string(),
                ),
            ]),
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            budget: BudgetConfig::default(),
            compiler: CompilerConfig::default(),
            generative: GenerativeConfig::default(),
            session: SessionConfig::default(),
            fallback: FallbackConfig::default(),
            rules: Vec::new(),
        }
    }
}

impl OrchestratorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.budget.baseline_attempts == 0 {
            return Err(anyhow!("budget.baseline_attempts must be > 0"));
        }
        if self.budget.max_attempts < self.budget.baseline_attempts {
            return Err(anyhow!(
                "budget.max_attempts must be >= budget.baseline_attempts"
            ));
        }
        if self.budget.max_repeats_per_fingerprint == 0 {
            return Err(anyhow!("budget.max_repeats_per_fingerprint must be > 0"));
        }
        if self.compiler.command.is_empty() || self.compiler.command[0].trim().is_empty() {
            return Err(anyhow!("compiler.command must be a non-empty array"));
        }
        if self.compiler.timeout_secs == 0 {
            return Err(anyhow!("compiler.timeout_secs must be > 0"));
        }
        if self.compiler.output_limit_bytes == 0 {
            return Err(anyhow!("compiler.output_limit_bytes must be > 0"));
        }
        if self.generative.timeout_secs == 0 {
            return Err(anyhow!("generative.timeout_secs must be > 0"));
        }
        if self.generative.output_limit_bytes == 0 {
            return Err(anyhow!("generative.output_limit_bytes must be > 0"));
        }
        if self.session.timeout_secs == 0 {
            return Err(anyhow!("session.timeout_secs must be > 0"));
        }
        if self.generative.timeout_secs >= self.session.timeout_secs {
            return Err(anyhow!(
                "generative.timeout_secs must be shorter than session.timeout_secs"
            ));
        }
        if self.fallback.files.is_empty() {
            return Err(anyhow!("fallback.files must contain at least one file"));
        }
        for path in self.fallback.files.keys() {
            validate_relative_path(path).context("invalid fallback path")?;
        }
        RuleTable::with_extra(&self.rules).context("invalid classifier rules")?;
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `OrchestratorConfig::default()`.
pub fn load_config(path: &Path) -> Result<OrchestratorConfig> {
    if !path.exists() {
        let cfg = OrchestratorConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: OrchestratorConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &OrchestratorConfig) -> Result<()> {
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
