//! Build adapter abstraction for compiler invocation.
//!
//! The [`BuildAdapter`] trait decouples the recovery controller from the
//! actual toolchain. Tests use scripted adapters that return predetermined
//! diagnostics without spawning processes.

use std::fmt;
use std::path::Path;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::core::cancel::CancelSignal;
use crate::core::types::SourceTree;
use crate::io::config::CompilerConfig;
use crate::io::process::run_command_with_timeout;
use crate::io::scratch::materialize_tree;

/// Placeholder in `compiler.command` replaced by the scratch directory path.
pub const ROOT_PLACEHOLDER: &str = "{root}";

/// Parameters for one build invocation.
#[derive(Debug, Clone, Copy)]
pub struct BuildRequest<'a> {
    pub session_id: &'a str,
    /// 1-indexed attempt number within the session.
    pub attempt: u32,
    /// Session-owned scratch directory the tree is written into.
    pub workdir: &'a Path,
    pub tree: &'a SourceTree,
    pub timeout: Duration,
    pub cancel: &'a CancelSignal,
}

/// What the compiler reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOutput {
    /// `None` when the compiler was killed (timeout or cancellation).
    pub exit_code: Option<i32>,
    /// Combined stdout/stderr with scratch paths made relative.
    pub raw_diagnostics: String,
    pub duration_ms: u64,
    pub timed_out: bool,
    pub cancelled: bool,
}

/// Abstraction over compiler backends.
///
/// An `Err` means the build could not be run at all (e.g. the compiler could
/// not be spawned). The controller treats that as fatal for the session.
pub trait BuildAdapter {
    fn invoke(&self, request: &BuildRequest<'_>) -> Result<BuildOutput>;
}

impl<T: BuildAdapter + ?Sized> BuildAdapter for &T {
    fn invoke(&self, request: &BuildRequest<'_>) -> Result<BuildOutput> {
        (**self).invoke(request)
    }
}

/// Fatal infrastructure failure: the compiler could not be invoked.
///
/// Attached as context to the adapter error so callers can
/// `err.downcast_ref::<BuildSpawnError>()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildSpawnError {
    pub session_id: String,
    pub attempt: u32,
}

impl fmt::Display for BuildSpawnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "build infrastructure failure in session {} (attempt {}): compiler could not be invoked",
            self.session_id, self.attempt
        )
    }
}

impl std::error::Error for BuildSpawnError {}

/// Adapter that writes the tree to the scratch dir and runs the configured compiler.
#[derive(Debug, Clone)]
pub struct CompilerBuildAdapter {
    command: Vec<String>,
    output_limit_bytes: usize,
}

impl CompilerBuildAdapter {
    pub fn new(config: &CompilerConfig) -> Result<Self> {
        if config.command.is_empty() || config.command[0].trim().is_empty() {
            return Err(anyhow!("compiler.command must be a non-empty array"));
        }
        Ok(Self {
            command: config.command.clone(),
            output_limit_bytes: config.output_limit_bytes,
        })
    }

    fn command_for(&self, workdir: &Path) -> Command {
        let root = workdir.display().to_string();
        let mut args = self
            .command
            .iter()
            .map(|arg| arg.replace(ROOT_PLACEHOLDER, &root));
        // `new` guarantees at least one element.
        let program = args.next().unwrap_or_default();
        let mut cmd = Command::new(program);
        cmd.args(args).current_dir(workdir);
        cmd
    }
}

impl BuildAdapter for CompilerBuildAdapter {
    #[instrument(
        skip_all,
        fields(
            session_id = request.session_id,
            attempt = request.attempt,
            timeout_secs = request.timeout.as_secs()
        )
    )]
    fn invoke(&self, request: &BuildRequest<'_>) -> Result<BuildOutput> {
        materialize_tree(request.workdir, request.tree).context("write tree to scratch dir")?;

        info!(program = %self.command[0], "starting build");
        let output = run_command_with_timeout(
            self.command_for(request.workdir),
            None,
            request.timeout,
            self.output_limit_bytes,
            request.cancel,
        )
        .with_context(|| format!("run compiler '{}'", self.command[0]))?;

        if output.timed_out {
            warn!(timeout_secs = request.timeout.as_secs(), "build timed out");
        }
        let raw = relativize_paths(&output.combined_text("compiler"), request.workdir);
        debug!(exit_code = ?output.exit_code(), bytes = raw.len(), "build finished");

        Ok(BuildOutput {
            exit_code: output.exit_code(),
            raw_diagnostics: raw,
            duration_ms: u64::try_from(output.duration.as_millis()).unwrap_or(u64::MAX),
            timed_out: output.timed_out,
            cancelled: output.cancelled,
        })
    }
}

/// Strip the scratch directory prefix so diagnostics name tree-relative paths.
pub fn relativize_paths(raw: &str, workdir: &Path) -> String {
    let mut out = raw.to_string();
    let mut prefixes = vec![workdir.to_path_buf()];
    if let Ok(canonical) = workdir.canonicalize()
        && canonical != workdir
    {
        prefixes.push(canonical);
    }
    // Longest first so a canonical path that extends the raw one is not half-stripped.
    prefixes.sort_by_key(|p| std::cmp::Reverse(p.as_os_str().len()));
    for prefix in prefixes {
        let prefix = format!("{}{}", prefix.display(), std::path::MAIN_SEPARATOR);
        out = out.replace(&prefix, "");
    }
    out
}
