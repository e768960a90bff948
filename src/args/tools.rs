use crate::external::{ProcessRunner, RetryPolicy, ToolPaths};
use clap::{Args, ValueHint};
use std::{path::PathBuf, time::Duration};

const RETRY_BACKOFF: Duration = Duration::from_secs(2);

/// Locations and execution limits of the external engines
#[derive(Args, Debug, Clone)]
pub struct ToolArgs {
    #[arg(long, env = "CUTADAPT", default_value = "cutadapt", value_hint = ValueHint::CommandName)]
    /// The adapter removal program
    pub cutadapt: PathBuf,

    #[arg(long, env = "USEARCH", default_value = "usearch", value_hint = ValueHint::CommandName)]
    /// The program used for merging, dereplication, clustering and mapping
    pub usearch: PathBuf,

    #[arg(long, env = "JAVA", default_value = "java", value_hint = ValueHint::CommandName)]
    /// The Java runtime used to run the classifier
    pub java: PathBuf,

    #[arg(long, env = "RDP_CLASSIFIER_JAR", value_hint = ValueHint::FilePath)]
    /// Path to the RDP classifier jar
    pub classifier_jar: PathBuf,

    #[arg(long, value_name = "SECONDS")]
    /// Kill any external tool still running after this many seconds
    pub tool_timeout: Option<u64>,

    #[arg(long, default_value_t = 0)]
    /// Extra attempts for a tool exiting with a transient exit code
    pub tool_retries: usize,

    #[arg(long, value_name = "CODE")]
    /// An exit code treated as transient. May be given more than once
    pub retry_exit_code: Vec<i32>,
}

impl ToolArgs {
    pub fn tool_paths(&self) -> ToolPaths {
        ToolPaths {
            cutadapt:       self.cutadapt.clone(),
            usearch:        self.usearch.clone(),
            java:           self.java.clone(),
            classifier_jar: self.classifier_jar.clone(),
        }
    }

    pub fn runner(&self) -> ProcessRunner {
        ProcessRunner::new(
            self.tool_timeout.map(Duration::from_secs),
            RetryPolicy {
                max_retries:     self.tool_retries,
                transient_codes: self.retry_exit_code.clone(),
                backoff:         RETRY_BACKOFF,
            },
        )
    }
}
