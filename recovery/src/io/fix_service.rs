//! External generative fix service.
//!
//! The service receives the failing diagnostics plus the affected files and
//! answers with complete replacement contents. The [`FixService`] trait keeps
//! the transport out of the strategy: production shells out to a configured
//! command, tests use scripted responses.

use std::collections::BTreeMap;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use jsonschema::validator_for;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::core::cancel::CancelSignal;
use crate::core::source_text::unwrap_code_fence;
use crate::core::types::Diagnostic;
use crate::io::config::GenerativeConfig;
use crate::io::process::run_command_with_timeout;

const RESPONSE_SCHEMA: &str = include_str!("../../schemas/fix_response.schema.json");

/// Payload sent to the fix service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixRequest {
    pub diagnostics: Vec<Diagnostic>,
    /// Current contents of every file named by a diagnostic.
    pub files: BTreeMap<String, String>,
}

/// Replacement contents proposed by the service, keyed by relative path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixResponse {
    pub files: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Per-call limits handed to the service.
#[derive(Debug, Clone, Copy)]
pub struct FixCallOptions<'a> {
    /// Already clipped to the remaining session time.
    pub timeout: Duration,
    pub cancel: &'a CancelSignal,
}

/// Abstraction over generative fix backends.
///
/// An `Err` means no usable answer (timeout, transport failure, malformed
/// response). Callers treat it as "no candidate", never as fatal.
pub trait FixService {
    fn request_fix(
        &self,
        request: &FixRequest,
        options: &FixCallOptions<'_>,
    ) -> Result<FixResponse>;
}

impl<T: FixService + ?Sized> FixService for &T {
    fn request_fix(
        &self,
        request: &FixRequest,
        options: &FixCallOptions<'_>,
    ) -> Result<FixResponse> {
        (**self).request_fix(request, options)
    }
}

/// Service used when generation is switched off; every call fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledFixService;

impl FixService for DisabledFixService {
    fn request_fix(
        &self,
        _request: &FixRequest,
        _options: &FixCallOptions<'_>,
    ) -> Result<FixResponse> {
        Err(anyhow!("generative fix service is disabled"))
    }
}

/// Runs the configured command: request JSON on stdin, response JSON on stdout.
#[derive(Debug, Clone)]
pub struct CommandFixService {
    command: Vec<String>,
    output_limit_bytes: usize,
}

impl CommandFixService {
    pub fn new(config: &GenerativeConfig) -> Result<Self> {
        if config.command.is_empty() || config.command[0].trim().is_empty() {
            return Err(anyhow!("generative.command must be a non-empty array"));
        }
        Ok(Self {
            command: config.command.clone(),
            output_limit_bytes: config.output_limit_bytes,
        })
    }
}

impl FixService for CommandFixService {
    #[instrument(
        skip_all,
        fields(
            files = request.files.len(),
            diagnostics = request.diagnostics.len(),
            timeout_secs = options.timeout.as_secs()
        )
    )]
    fn request_fix(
        &self,
        request: &FixRequest,
        options: &FixCallOptions<'_>,
    ) -> Result<FixResponse> {
        let payload = serde_json::to_vec(request).context("serialize fix request")?;
        let mut cmd = Command::new(&self.command[0]);
        cmd.args(&self.command[1..]);

        info!(program = %self.command[0], "requesting generative fix");
        let output = run_command_with_timeout(
            cmd,
            Some(&payload),
            options.timeout,
            self.output_limit_bytes,
            options.cancel,
        )
        .with_context(|| format!("run fix service '{}'", self.command[0]))?;

        if output.cancelled {
            return Err(anyhow!("fix service call cancelled"));
        }
        if output.timed_out {
            return Err(anyhow!(
                "fix service timed out after {}s",
                options.timeout.as_secs()
            ));
        }
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!(
                "fix service exited with {}: {}",
                output.status,
                stderr.trim()
            ));
        }
        if output.stdout_truncated > 0 {
            warn!(truncated = output.stdout_truncated, "fix service response truncated");
            return Err(anyhow!(
                "fix service response exceeded {} bytes",
                self.output_limit_bytes
            ));
        }

        let raw = String::from_utf8_lossy(&output.stdout);
        let response = parse_fix_response(&raw)?;
        debug!(files = response.files.len(), "fix service answered");
        Ok(response)
    }
}

/// Parse and schema-check a raw service response.
///
/// A response wrapped in a Markdown code fence is accepted.
pub fn parse_fix_response(raw: &str) -> Result<FixResponse> {
    let body = unwrap_code_fence(raw);
    let value: Value = serde_json::from_str(body.trim()).context("parse fix response json")?;
    validate_schema(&value)?;
    serde_json::from_value(value).context("deserialize fix response")
}

fn validate_schema(value: &Value) -> Result<()> {
    let schema: Value =
        serde_json::from_str(RESPONSE_SCHEMA).context("parse fix response schema")?;
    let compiled = validator_for(&schema).map_err(|err| anyhow!("invalid schema: {}", err))?;
    if !compiled.is_valid(value) {
        let messages = compiled
            .iter_errors(value)
            .map(|err| err.to_string())
            .collect::<Vec<_>>();
        return Err(anyhow!(
            "fix response schema validation failed: {}",
            messages.join("; ")
        ));
    }
    Ok(())
}
