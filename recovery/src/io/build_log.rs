//! Per-session build log artifacts under the configured log directory.
//!
//! `<session_id>.log` collects the raw compiler output of every attempt in
//! order; `<session_id>.json` is written once the session ends. The text log
//! is made read-only after the summary lands.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use tracing::debug;

use crate::core::types::{AttemptRecord, RecoveryStatus};
use crate::io::build::BuildOutput;

#[derive(Debug, Clone)]
pub struct BuildLogPaths {
    pub dir: PathBuf,
    pub log_path: PathBuf,
    pub summary_path: PathBuf,
}

impl BuildLogPaths {
    pub fn new(log_dir: &Path, session_id: &str) -> Self {
        Self {
            dir: log_dir.to_path_buf(),
            log_path: log_dir.join(format!("{session_id}.log")),
            summary_path: log_dir.join(format!("{session_id}.json")),
        }
    }
}

/// Terminal facts recorded next to the text log.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary<'a> {
    pub session_id: &'a str,
    pub status: RecoveryStatus,
    pub attempts_used: u32,
    pub attempt_budget: u32,
    pub history: &'a [AttemptRecord],
}

#[derive(Debug, Serialize)]
struct SummaryFile<'a> {
    #[serde(flatten)]
    summary: &'a SessionSummary<'a>,
    started_at: &'a str,
    ended_at: String,
}

#[derive(Debug)]
pub struct BuildLog {
    paths: BuildLogPaths,
    file: File,
    started_at: String,
}

impl BuildLog {
    pub fn create(log_dir: &Path, session_id: &str) -> Result<Self> {
        let paths = BuildLogPaths::new(log_dir, session_id);
        fs::create_dir_all(&paths.dir)
            .with_context(|| format!("create log dir {}", paths.dir.display()))?;
        let file = OpenOptions::new()
            .create_new(true)
            .append(true)
            .open(&paths.log_path)
            .with_context(|| format!("create build log {}", paths.log_path.display()))?;
        debug!(path = %paths.log_path.display(), "opened build log");
        Ok(Self {
            paths,
            file,
            started_at: Utc::now().to_rfc3339(),
        })
    }

    pub fn paths(&self) -> &BuildLogPaths {
        &self.paths
    }

    pub fn append_attempt(&mut self, attempt: u32, output: &BuildOutput) -> Result<()> {
        let exit = output
            .exit_code
            .map_or_else(|| "none".to_string(), |code| code.to_string());
        let mut buf = format!(
            "=== attempt {attempt} (exit={exit}, timed_out={}, {} ms) ===\n",
            output.timed_out, output.duration_ms
        );
        buf.push_str(&output.raw_diagnostics);
        if !buf.ends_with('\n') {
            buf.push('\n');
        }
        self.file
            .write_all(buf.as_bytes())
            .with_context(|| format!("append build log {}", self.paths.log_path.display()))
    }

    /// Write the JSON summary and seal the text log.
    pub fn finish(mut self, summary: &SessionSummary<'_>) -> Result<BuildLogPaths> {
        self.file
            .flush()
            .with_context(|| format!("flush build log {}", self.paths.log_path.display()))?;
        drop(self.file);

        let record = SummaryFile {
            summary,
            started_at: &self.started_at,
            ended_at: Utc::now().to_rfc3339(),
        };
        let mut buf = serde_json::to_string_pretty(&record).context("serialize session summary")?;
        buf.push('\n');
        fs::write(&self.paths.summary_path, buf)
            .with_context(|| format!("write {}", self.paths.summary_path.display()))?;

        let mut perms = fs::metadata(&self.paths.log_path)
            .with_context(|| format!("stat {}", self.paths.log_path.display()))?
            .permissions();
        perms.set_readonly(true);
        fs::set_permissions(&self.paths.log_path, perms)
            .with_context(|| format!("seal {}", self.paths.log_path.display()))?;
        Ok(self.paths)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::AttemptOutcome;

    fn output(exit_code: Option<i32>, raw: &str) -> BuildOutput {
        BuildOutput {
            exit_code,
            raw_diagnostics: raw.to_string(),
            duration_ms: 12,
            timed_out: exit_code.is_none(),
            cancelled: false,
        }
    }

    #[test]
    fn log_paths_are_stable() {
        let paths = BuildLogPaths::new(Path::new("logs"), "s-1");
        assert_eq!(paths.log_path, Path::new("logs/s-1.log"));
        assert_eq!(paths.summary_path, Path::new("logs/s-1.json"));
    }

    #[test]
    fn appends_attempts_and_writes_summary() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut log = BuildLog::create(temp.path(), "s-1").expect("create");
        log.append_attempt(1, &output(Some(1), "App.swift:1:1: error: boom"))
            .expect("first");
        log.append_attempt(2, &output(None, "")).expect("second");

        let history = vec![AttemptRecord {
            attempt_number: 1,
            exit_code: Some(1),
            timed_out: false,
            duration_ms: 12,
            diagnostics: Vec::new(),
            stuck: Vec::new(),
            strategy_applied: None,
            outcome: AttemptOutcome::NoFixAvailable,
        }];
        let paths = log
            .finish(&SessionSummary {
                session_id: "s-1",
                status: RecoveryStatus::Exhausted,
                attempts_used: 2,
                attempt_budget: 3,
                history: &history,
            })
            .expect("finish");

        let text = fs::read_to_string(&paths.log_path).expect("read log");
        assert!(text.starts_with("=== attempt 1 (exit=1, timed_out=false, 12 ms) ===\n"));
        assert!(text.contains("App.swift:1:1: error: boom\n"));
        assert!(text.contains("=== attempt 2 (exit=none, timed_out=true, 12 ms) ==="));
        assert!(
            fs::metadata(&paths.log_path)
                .expect("stat")
                .permissions()
                .readonly()
        );

        let summary: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&paths.summary_path).expect("read json"))
                .expect("json");
        assert_eq!(summary["status"], "exhausted");
        assert_eq!(summary["attempts_used"], 2);
        assert_eq!(summary["history"][0]["outcome"], "no_fix_available");
        assert!(summary["started_at"].is_string());
        assert!(summary["ended_at"].is_string());
    }

    #[test]
    fn refuses_to_overwrite_existing_log() {
        let temp = tempfile::tempdir().expect("tempdir");
        let _first = BuildLog::create(temp.path(), "dup").expect("first");
        assert!(BuildLog::create(temp.path(), "dup").is_err());
    }
}
