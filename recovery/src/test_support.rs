//! Test doubles for the build and fix-service seams.

use std::collections::{BTreeMap, VecDeque};
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Result, anyhow};

use crate::core::types::SourceTree;
use crate::io::build::{BuildAdapter, BuildOutput, BuildRequest};
use crate::io::config::OrchestratorConfig;
use crate::io::fix_service::{
    FixCallOptions, FixRequest, FixResponse, FixService, parse_fix_response,
};

/// Canned result for one build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptedBuild {
    pub exit_code: Option<i32>,
    pub output: String,
    pub timed_out: bool,
    pub cancelled: bool,
}

impl ScriptedBuild {
    pub fn success() -> Self {
        Self::output(0, "")
    }

    /// Exit code 1 with the given compiler output.
    pub fn failure(output: &str) -> Self {
        Self::output(1, output)
    }

    pub fn output(exit_code: i32, output: &str) -> Self {
        Self {
            exit_code: Some(exit_code),
            output: output.to_string(),
            timed_out: false,
            cancelled: false,
        }
    }

    pub fn timeout() -> Self {
        Self {
            exit_code: None,
            output: String::new(),
            timed_out: true,
            cancelled: false,
        }
    }

    pub fn cancelled() -> Self {
        Self {
            exit_code: None,
            output: String::new(),
            timed_out: false,
            cancelled: true,
        }
    }

    fn into_output(self) -> BuildOutput {
        BuildOutput {
            exit_code: self.exit_code,
            raw_diagnostics: self.output,
            duration_ms: 1,
            timed_out: self.timed_out,
            cancelled: self.cancelled,
        }
    }
}

/// Build adapter that replays a script and records every tree it was asked to build.
///
/// Once the script runs out, the last entry repeats.
#[derive(Debug)]
pub struct ScriptedBuildAdapter {
    script: Mutex<VecDeque<ScriptedBuild>>,
    last: Mutex<Option<ScriptedBuild>>,
    trees: Mutex<Vec<SourceTree>>,
    spawn_fails: bool,
}

impl ScriptedBuildAdapter {
    pub fn new(script: Vec<ScriptedBuild>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            last: Mutex::new(None),
            trees: Mutex::new(Vec::new()),
            spawn_fails: false,
        }
    }

    /// Adapter whose compiler can never be started.
    pub fn spawn_failure() -> Self {
        Self {
            spawn_fails: true,
            ..Self::new(Vec::new())
        }
    }

    /// Trees passed to each invocation, in order.
    pub fn trees(&self) -> Vec<SourceTree> {
        self.trees.lock().expect("trees lock").clone()
    }

    pub fn invocations(&self) -> usize {
        self.trees.lock().expect("trees lock").len()
    }
}

impl BuildAdapter for ScriptedBuildAdapter {
    fn invoke(&self, request: &BuildRequest<'_>) -> Result<BuildOutput> {
        self.trees
            .lock()
            .expect("trees lock")
            .push(request.tree.clone());
        if self.spawn_fails {
            return Err(anyhow!("spawn compiler: No such file or directory"));
        }
        let next = self.script.lock().expect("script lock").pop_front();
        let mut last = self.last.lock().expect("last lock");
        let build = match next {
            Some(build) => {
                *last = Some(build.clone());
                build
            }
            None => last
                .clone()
                .ok_or_else(|| anyhow!("build script is empty"))?,
        };
        Ok(build.into_output())
    }
}

/// Build adapter that computes each result from the request.
pub struct FnBuildAdapter<F> {
    build: F,
}

impl<F> FnBuildAdapter<F>
where
    F: Fn(&BuildRequest<'_>) -> ScriptedBuild,
{
    pub fn new(build: F) -> Self {
        Self { build }
    }
}

impl<F> BuildAdapter for FnBuildAdapter<F>
where
    F: Fn(&BuildRequest<'_>) -> ScriptedBuild,
{
    fn invoke(&self, request: &BuildRequest<'_>) -> Result<BuildOutput> {
        Ok((self.build)(request).into_output())
    }
}

/// Canned answer from the fix service.
#[derive(Debug, Clone)]
pub enum ScriptedFix {
    Files(BTreeMap<String, String>),
    /// Raw service output, parsed like real stdout.
    Raw(String),
    Fail(String),
}

impl ScriptedFix {
    pub fn files<'a>(files: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        Self::Files(
            files
                .into_iter()
                .map(|(path, content)| (path.to_string(), content.to_string()))
                .collect(),
        )
    }

    pub fn raw(output: &str) -> Self {
        Self::Raw(output.to_string())
    }

    pub fn fail(reason: &str) -> Self {
        Self::Fail(reason.to_string())
    }
}

/// Fix service that replays a script and records each request.
///
/// Fails every call once the script is used up.
#[derive(Debug, Default)]
pub struct ScriptedFixService {
    script: Mutex<VecDeque<ScriptedFix>>,
    requests: Mutex<Vec<FixRequest>>,
}

impl ScriptedFixService {
    pub fn new(script: impl IntoIterator<Item = ScriptedFix>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<FixRequest> {
        self.requests.lock().expect("requests lock").clone()
    }
}

impl FixService for ScriptedFixService {
    fn request_fix(
        &self,
        request: &FixRequest,
        _options: &FixCallOptions<'_>,
    ) -> Result<FixResponse> {
        self.requests
            .lock()
            .expect("requests lock")
            .push(request.clone());
        match self.script.lock().expect("script lock").pop_front() {
            Some(ScriptedFix::Files(files)) => Ok(FixResponse { files, notes: None }),
            Some(ScriptedFix::Raw(output)) => parse_fix_response(&output),
            Some(ScriptedFix::Fail(reason)) => Err(anyhow!(reason)),
            None => Err(anyhow!("fix script is empty")),
        }
    }
}

pub fn tree<'a>(files: impl IntoIterator<Item = (&'a str, &'a str)>) -> SourceTree {
    SourceTree::from_files(files).expect("valid test tree")
}

/// Config with scratch and log dirs under `root` and short timeouts.
pub fn test_config(root: &Path) -> OrchestratorConfig {
    let mut config = OrchestratorConfig::default();
    config.compiler.command = vec!["true".to_string()];
    config.compiler.timeout_secs = 30;
    config.generative.timeout_secs = 5;
    config.session.timeout_secs = 60;
    config.session.scratch_root = root.join("scratch");
    config.session.log_dir = root.join("logs");
    config
}
