//! Error types shared by every stage of the pipeline.
//!
//! [`PipelineError`] carries the fatal failures. Each variant's message starts
//! with its kind so that the first fatal error can be reported as-is when the
//! process exits. [`CleanupError`] is deliberately not a variant: removing
//! intermediates is best effort, so those failures are only ever logged.

use std::{io, path::PathBuf, time::Duration};
use thiserror::Error;

/// The fatal failures of a pipeline run.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A malformed FASTQ/FASTA record, or an input that is compressed or not
    /// text.
    #[error("InputFormatError: {}: {detail}", .path.display())]
    InputFormat { path: PathBuf, detail: String },

    /// An expected input (usually the reverse mate of a pair) is absent.
    #[error("MissingInputError: expected input {} does not exist", .path.display())]
    MissingInput { path: PathBuf },

    /// The input directory held no forward read files.
    #[error("MissingInputError: no '_R1_' FASTQ files were found in {}", .dir.display())]
    NoSamples { dir: PathBuf },

    /// A delegated process exited unsuccessfully. `code` is [`None`] when the
    /// process was terminated by a signal.
    #[error("ExternalToolError: {tool} failed with {}", exit_code_text(.code))]
    ExternalTool { tool: String, code: Option<i32> },

    /// A delegated process exceeded its time limit and was killed.
    #[error("ExternalToolError: {tool} did not finish within {timeout:?} and was killed")]
    ToolTimeout { tool: String, timeout: Duration },

    /// A delegated process could not be started.
    #[error("ExternalToolError: failed to launch {tool}: {source}")]
    ToolLaunch {
        tool:   String,
        #[source]
        source: io::Error,
    },

    /// A tab-delimited report or mapping row did not have the expected shape.
    #[error("SchemaError: {}, line {line}: {detail}", .path.display())]
    Schema { path: PathBuf, line: usize, detail: String },

    /// A sample job was asked for an output it has not produced yet.
    #[error("StageError: sample '{sample_id}' is at stage {stage}, expected {expected}")]
    Stage {
        sample_id: String,
        stage:     &'static str,
        expected:  &'static str,
    },

    /// The run was cancelled before this unit of work could finish.
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Invalid settings that clap could not reject on its own.
    #[error("ConfigError: {0}")]
    Config(String),

    /// Any other IO failure, with the path it happened on.
    #[error("IOError: {}: {source}", .path.display())]
    Io {
        path:   PathBuf,
        #[source]
        source: io::Error,
    },
}

fn exit_code_text(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "termination by signal".to_string(),
    }
}

impl PipelineError {
    /// Wraps an IO error with the path it occurred on.
    #[inline]
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        PipelineError::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates an [`PipelineError::InputFormat`] for the given path.
    #[inline]
    pub fn input_format(path: impl Into<PathBuf>, detail: impl Into<String>) -> Self {
        PipelineError::InputFormat {
            path:   path.into(),
            detail: detail.into(),
        }
    }

    /// Creates a [`PipelineError::Schema`] for the given path and 1-based line.
    #[inline]
    pub fn schema(path: impl Into<PathBuf>, line: usize, detail: impl Into<String>) -> Self {
        PipelineError::Schema {
            path: path.into(),
            line,
            detail: detail.into(),
        }
    }
}

impl From<PipelineError> for io::Error {
    #[inline]
    fn from(error: PipelineError) -> Self {
        match error {
            PipelineError::Io { path, source } => io::Error::new(
                source.kind(),
                format!("IOError: {path} due to the error:\n{source}", path = path.display()),
            ),
            other => io::Error::other(other),
        }
    }
}

/// A failure to remove an intermediate artifact. Never escalated past the job
/// or run that produced the artifact.
#[derive(Debug, Error)]
#[error("CleanupError: could not remove {}: {source}", .path.display())]
pub struct CleanupError {
    pub path:   PathBuf,
    #[source]
    pub source: io::Error,
}

/// Attaches a path to IO errors, converting them into [`PipelineError::Io`].
pub trait WithPathExt<T> {
    fn with_path<P: AsRef<std::path::Path>>(self, path: P) -> Result<T, PipelineError>;
}

impl<T> WithPathExt<T> for io::Result<T> {
    #[inline]
    fn with_path<P: AsRef<std::path::Path>>(self, path: P) -> Result<T, PipelineError> {
        self.map_err(|e| PipelineError::io(path.as_ref(), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_lead_with_the_error_kind() {
        let tool = PipelineError::ExternalTool {
            tool: "cutadapt".to_string(),
            code: Some(2),
        };
        assert_eq!(tool.to_string(), "ExternalToolError: cutadapt failed with exit code 2");

        let killed = PipelineError::ExternalTool {
            tool: "usearch".to_string(),
            code: None,
        };
        assert!(killed.to_string().ends_with("termination by signal"));

        let schema = PipelineError::schema("report.tsv", 3, "4 columns");
        assert_eq!(schema.to_string(), "SchemaError: report.tsv, line 3: 4 columns");
    }

    #[test]
    fn io_conversion_keeps_the_kind() {
        let err = PipelineError::io("x.fastq", io::Error::new(io::ErrorKind::NotFound, "gone"));
        let io_err: io::Error = err.into();
        assert_eq!(io_err.kind(), io::ErrorKind::NotFound);
        assert!(io_err.to_string().contains("x.fastq"));
    }
}
