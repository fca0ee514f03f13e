//! Model-backed repair through an external [`FixService`].
//!
//! Only the files named by diagnostics are sent, and only those files may
//! come back changed. Every failure mode of the service (error, timeout,
//! cancellation, malformed output) turns into a decline.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::core::budget::clipped_timeout;
use crate::core::source_text::{delimiters_balanced, unwrap_code_fence};
use crate::core::types::{Diagnostic, FixCandidate, SourceTree};
use crate::io::fix_service::{FixCallOptions, FixRequest, FixResponse, FixService};
use crate::strategies::{PassContext, RecoveryStrategy};

pub const GENERATIVE_STRATEGY_NAME: &str = "generative";

const GENERATIVE_CONFIDENCE: f32 = 0.5;

pub struct GenerativeFixer<'a, S: FixService + ?Sized> {
    service: &'a S,
    timeout: Duration,
}

impl<'a, S: FixService + ?Sized> GenerativeFixer<'a, S> {
    pub fn new(service: &'a S, timeout: Duration) -> Self {
        Self { service, timeout }
    }
}

impl<S: FixService + ?Sized> RecoveryStrategy for GenerativeFixer<'_, S> {
    fn name(&self) -> &str {
        GENERATIVE_STRATEGY_NAME
    }

    fn try_fix(
        &self,
        ctx: &PassContext<'_>,
        diagnostics: &[Diagnostic],
        tree: &SourceTree,
    ) -> Option<FixCandidate> {
        let relevant: Vec<Diagnostic> = diagnostics
            .iter()
            .filter(|d| d.is_error() && !d.is_build_timeout())
            .cloned()
            .collect();
        let affected: BTreeSet<String> = relevant
            .iter()
            .filter(|d| tree.contains(&d.file))
            .map(|d| d.file.clone())
            .collect();
        if affected.is_empty() {
            debug!("no diagnostic names a file in the tree");
            return None;
        }
        if ctx.cancel.is_cancelled() {
            return None;
        }
        let timeout = match clipped_timeout(self.timeout, ctx.deadline) {
            Ok(timeout) => timeout,
            Err(err) => {
                debug!(err = %err, "skipping fix service");
                return None;
            }
        };

        let request = FixRequest {
            diagnostics: relevant,
            files: affected
                .iter()
                .filter_map(|path| tree.get(path).map(|c| (path.clone(), c.to_string())))
                .collect(),
        };
        info!(
            files = request.files.len(),
            diagnostics = request.diagnostics.len(),
            timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            "asking fix service"
        );
        let response = match self.service.request_fix(
            &request,
            &FixCallOptions {
                timeout,
                cancel: ctx.cancel,
            },
        ) {
            Ok(response) => response,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "fix service gave no usable answer");
                return None;
            }
        };

        match validate_response(response, &affected, tree) {
            Ok(changes) if changes.is_empty() => {
                debug!("fix service proposed no changes");
                None
            }
            Ok(changes) => Some(FixCandidate::patch(
                GENERATIVE_STRATEGY_NAME,
                changes,
                GENERATIVE_CONFIDENCE,
            )),
            Err(reason) => {
                warn!(reason = %reason, "rejected fix service response");
                None
            }
        }
    }
}

/// Check a response against the files that were sent.
///
/// Every requested file must come back with non-empty, delimiter-balanced
/// content. Files that were not requested are dropped. Returns only the
/// files whose content changed.
fn validate_response(
    response: FixResponse,
    requested: &BTreeSet<String>,
    tree: &SourceTree,
) -> Result<BTreeMap<String, String>, String> {
    let mut files = response.files;
    let extra: Vec<String> = files
        .keys()
        .filter(|path| !requested.contains(*path))
        .cloned()
        .collect();
    if !extra.is_empty() {
        warn!(?extra, "dropping files that were not requested");
        for path in &extra {
            files.remove(path);
        }
    }

    let mut changes = BTreeMap::new();
    for path in requested {
        let Some(content) = files.remove(path) else {
            return Err(format!("response is missing requested file {path}"));
        };
        let content = unwrap_code_fence(&content);
        if content.trim().is_empty() {
            return Err(format!("response for {path} is empty"));
        }
        if !delimiters_balanced(content) {
            return Err(format!("response for {path} has unbalanced delimiters"));
        }
        if tree.get(path) != Some(content) {
            changes.insert(path.clone(), content.to_string());
        }
    }
    Ok(changes)
}
