//! Delegation to external engines.
//!
//! Each external call is described by a [`ToolInvocation`] and executed by a
//! [`ToolRunner`]. The production runner, [`ProcessRunner`], spawns a child
//! process and waits on it in short slices so that a time limit and a
//! [`CancelToken`] can terminate it. Transient exit codes are retried according
//! to a [`RetryPolicy`].

use crate::{
    error::{PipelineError, WithPathExt},
    utils::CancelToken,
};
use std::{
    ffi::{OsStr, OsString},
    fs::File,
    path::{Path, PathBuf},
    process::{Child, Command, ExitStatus, Stdio},
    thread,
    time::{Duration, Instant},
};
use tracing::{debug, warn};
use wait_timeout::ChildExt;

mod tools;

pub use tools::*;

#[cfg(test)]
pub(crate) mod scripted;

/// The external engines the pipeline delegates to.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum ToolKind {
    AdapterRemoval,
    MergePairs,
    Dereplicate,
    SortBySize,
    ClusterOtus,
    MapReads,
    Classify,
}

/// One call of an external engine.
///
/// Besides the command line, the invocation records which files the call reads
/// and which it is expected to produce, for logging and for runners that stand
/// in for the real engines.
#[derive(Clone, Debug)]
pub struct ToolInvocation {
    pub kind:    ToolKind,
    /// The name reported in errors, such as `usearch -cluster_otus`.
    pub tool:    String,
    pub program: PathBuf,
    pub args:    Vec<OsString>,
    pub inputs:  Vec<PathBuf>,
    pub outputs: Vec<PathBuf>,
    /// Where the child's stdout and stderr go. Inherited from this process
    /// if [`None`].
    pub log:     Option<PathBuf>,
}

impl ToolInvocation {
    pub fn new(kind: ToolKind, tool: impl Into<String>, program: impl Into<PathBuf>) -> Self {
        ToolInvocation {
            kind,
            tool: tool.into(),
            program: program.into(),
            args: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            log: None,
        }
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends an input path as an argument and records it as an input.
    #[must_use]
    pub fn input(mut self, path: impl AsRef<Path>) -> Self {
        self.args.push(path.as_ref().as_os_str().to_owned());
        self.inputs.push(path.as_ref().to_path_buf());
        self
    }

    /// Appends an output path as an argument and records it as an output.
    #[must_use]
    pub fn output(mut self, path: impl AsRef<Path>) -> Self {
        self.args.push(path.as_ref().as_os_str().to_owned());
        self.outputs.push(path.as_ref().to_path_buf());
        self
    }

    #[must_use]
    pub fn log_to(mut self, path: impl Into<PathBuf>) -> Self {
        self.log = Some(path.into());
        self
    }

    /// The value following `flag` on the command line.
    pub fn flag_value(&self, flag: &str) -> Option<&OsStr> {
        self.args
            .iter()
            .position(|a| a == flag)
            .and_then(|i| self.args.get(i + 1))
            .map(OsString::as_os_str)
    }

    /// The command line for display in logs.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_os_str())
            .chain(self.args.iter().map(OsString::as_os_str))
            .map(OsStr::to_string_lossy)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Executes external invocations.
///
/// Implementations must be shareable across the worker pool.
pub trait ToolRunner: Send + Sync {
    /// Runs the invocation to completion.
    ///
    /// ## Errors
    ///
    /// A non-zero exit is [`PipelineError::ExternalTool`]. Runners honoring
    /// limits report [`PipelineError::ToolTimeout`] and
    /// [`PipelineError::Cancelled`].
    fn run(&self, invocation: &ToolInvocation, cancel: &CancelToken) -> Result<(), PipelineError>;
}

/// Which failed calls are attempted again.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RetryPolicy {
    /// Extra attempts after the first failure.
    pub max_retries:     usize,
    /// Exit codes considered transient.
    pub transient_codes: Vec<i32>,
    pub backoff:         Duration,
}

impl RetryPolicy {
    /// A policy that never retries.
    #[inline]
    pub fn none() -> Self {
        Self::default()
    }

    #[inline]
    fn is_retryable(&self, error: &PipelineError) -> bool {
        matches!(error, PipelineError::ExternalTool { code: Some(code), .. } if self.transient_codes.contains(code))
    }
}

/// Runs invocations as child processes.
#[derive(Clone, Debug)]
pub struct ProcessRunner {
    timeout:        Option<Duration>,
    retry:          RetryPolicy,
    /// The longest wait before the cancellation flag is checked again.
    cancel_latency: Duration,
}

impl Default for ProcessRunner {
    fn default() -> Self {
        ProcessRunner {
            timeout:        None,
            retry:          RetryPolicy::none(),
            cancel_latency: Duration::from_millis(50),
        }
    }
}

impl ProcessRunner {
    pub fn new(timeout: Option<Duration>, retry: RetryPolicy) -> Self {
        ProcessRunner {
            timeout,
            retry,
            ..Self::default()
        }
    }

    fn spawn(invocation: &ToolInvocation) -> Result<Child, PipelineError> {
        let mut command = Command::new(&invocation.program);
        command.args(&invocation.args).stdin(Stdio::null());

        if let Some(log) = &invocation.log {
            let file = File::create(log).with_path(log)?;
            let file2 = file.try_clone().with_path(log)?;
            command.stdout(file).stderr(file2);
        }

        command.spawn().map_err(|source| PipelineError::ToolLaunch {
            tool: invocation.tool.clone(),
            source,
        })
    }

    /// Kills and reaps a child. Errors are irrelevant here: the child is
    /// either gone already or about to be.
    fn terminate(child: &mut Child) {
        let _ = child.kill();
        let _ = child.wait();
    }

    fn run_once(&self, invocation: &ToolInvocation, cancel: &CancelToken) -> Result<ExitStatus, PipelineError> {
        debug!(tool = %invocation.tool, command = %invocation.command_line(), "launching external tool");
        let mut child = Self::spawn(invocation)?;
        let started = Instant::now();

        loop {
            let slice = match self.timeout {
                Some(timeout) => timeout.saturating_sub(started.elapsed()).min(self.cancel_latency),
                None => self.cancel_latency,
            };
            match child.wait_timeout(slice) {
                Ok(Some(status)) => return Ok(status),
                Ok(None) => {}
                Err(source) => {
                    Self::terminate(&mut child);
                    return Err(PipelineError::io(&invocation.program, source));
                }
            }

            if cancel.is_cancelled() {
                Self::terminate(&mut child);
                return Err(PipelineError::Cancelled(format!("{} was cancelled", invocation.tool)));
            }

            if let Some(timeout) = self.timeout
                && started.elapsed() >= timeout
            {
                Self::terminate(&mut child);
                return Err(PipelineError::ToolTimeout {
                    tool: invocation.tool.clone(),
                    timeout,
                });
            }
        }
    }
}

impl ToolRunner for ProcessRunner {
    fn run(&self, invocation: &ToolInvocation, cancel: &CancelToken) -> Result<(), PipelineError> {
        let mut attempt = 0;
        loop {
            cancel.check(&invocation.tool)?;

            let status = self.run_once(invocation, cancel)?;
            if status.success() {
                return Ok(());
            }

            let error = PipelineError::ExternalTool {
                tool: invocation.tool.clone(),
                code: status.code(),
            };
            if attempt < self.retry.max_retries && self.retry.is_retryable(&error) {
                attempt += 1;
                warn!(
                    tool = %invocation.tool,
                    code = ?status.code(),
                    attempt,
                    max_retries = self.retry.max_retries,
                    "transient failure, retrying"
                );
                thread::sleep(self.retry.backoff);
                continue;
            }
            return Err(error);
        }
    }
}
