// Description:      Moves one read pair through adapter removal, primer
//                   trimming, merging and barcode tagging.

use crate::{
    error::{CleanupError, PipelineError},
    external::{DEFAULT_FORWARD_ADAPTER, DEFAULT_REVERSE_ADAPTER, ToolPaths, ToolRunner},
    io::{FastqFile, MateRole},
    qc::{PrimerLengths, ReadTransforms, rewrite_fastq_file},
    utils::{CancelToken, JobStage, ReadPair},
};
use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};
use tracing::{debug, info, warn};

/// Settings shared by every sample job.
#[derive(Clone, Debug)]
pub struct SampleJobConfig {
    pub forward_adapter: String,
    pub reverse_adapter: String,
    pub primers:         PrimerLengths,
    /// Maximum expected errors of a merged read.
    pub merge_max_ee:    f64,
}

impl Default for SampleJobConfig {
    fn default() -> Self {
        SampleJobConfig {
            forward_adapter: DEFAULT_FORWARD_ADAPTER.to_string(),
            reverse_adapter: DEFAULT_REVERSE_ADAPTER.to_string(),
            primers:         PrimerLengths::default(),
            merge_max_ee:    1.0,
        }
    }
}

/// The per-sample state machine. A job holds no state of its own; progress is
/// recorded on the [`ReadPair`] it advances.
pub struct SampleJob<'a> {
    pub config:   &'a SampleJobConfig,
    pub tools:    &'a ToolPaths,
    pub runner:   &'a dyn ToolRunner,
    pub cancel:   &'a CancelToken,
    /// Where derived files are written.
    pub work_dir: &'a Path,
}

impl SampleJob<'_> {
    fn derived(&self, stem: &str, suffix: &str) -> PathBuf {
        self.work_dir.join(format!("{stem}{suffix}.fastq"))
    }

    /// Performs the transition out of the pair's current stage and returns the
    /// new stage. A pair at [`JobStage::Tagged`] or later is left unchanged.
    ///
    /// ## Errors
    ///
    /// External tool failures and IO or format errors from the in-process
    /// transforms. The pair keeps the stage it had before the failed step.
    pub fn step(&self, pair: &mut ReadPair) -> Result<JobStage, PipelineError> {
        match pair.stage() {
            JobStage::Raw => self.remove_adapters(pair)?,
            JobStage::AdapterRemoved => self.trim_primers(pair)?,
            JobStage::Trimmed => self.merge(pair)?,
            JobStage::Merged => self.tag(pair)?,
            JobStage::Tagged | JobStage::Cleaned => {}
        }
        Ok(pair.stage())
    }

    /// Steps the pair until it is tagged.
    ///
    /// ## Errors
    ///
    /// The first failed step, or [`PipelineError::Cancelled`] if the token is
    /// cancelled between steps.
    pub fn run(&self, pair: &mut ReadPair) -> Result<(), PipelineError> {
        while pair.stage() < JobStage::Tagged {
            self.cancel.check(&format!("sample '{}'", pair.sample_id))?;
            let from = pair.stage();
            let to = self.step(pair)?;
            debug!(sample = %pair.sample_id, %from, %to, "stage complete");
        }
        info!(
            sample = %pair.sample_id,
            records = pair.tagged_records(),
            "sample tagged"
        );
        Ok(())
    }

    fn remove_adapters(&self, pair: &mut ReadPair) -> Result<(), PipelineError> {
        let forward_out = self.derived(&pair.stem(MateRole::Forward), "_adp");
        let reverse_out = self.derived(&pair.stem(MateRole::Reverse), "_adp");
        let invocation = self.tools.adapter_removal(
            &self.config.forward_adapter,
            &self.config.reverse_adapter,
            &pair.forward,
            &pair.reverse,
            &forward_out,
            &reverse_out,
        );
        self.runner.run(&invocation, self.cancel)?;

        pair.push_artifact(JobStage::AdapterRemoved, Some(MateRole::Forward), forward_out);
        pair.push_artifact(JobStage::AdapterRemoved, Some(MateRole::Reverse), reverse_out);
        pair.set_stage(JobStage::AdapterRemoved);
        Ok(())
    }

    fn trim_primers(&self, pair: &mut ReadPair) -> Result<(), PipelineError> {
        for mate in [MateRole::Forward, MateRole::Reverse] {
            let input = pair
                .artifact(JobStage::AdapterRemoved, Some(mate))
                .map(Path::to_path_buf)
                .ok_or_else(|| missing_artifact(pair, JobStage::AdapterRemoved))?;
            let output = self.derived(&pair.stem(mate), "_adp_trim");

            let primers = self.config.primers;
            let written = rewrite_fastq_file(&FastqFile::new(&input).with_mate(mate), &output, |read| {
                read.trim_primer_for_mate(&primers);
            })?;
            debug!(sample = %pair.sample_id, %mate, records = written, "primers trimmed");

            pair.push_artifact(JobStage::Trimmed, Some(mate), output);
        }
        pair.set_stage(JobStage::Trimmed);
        Ok(())
    }

    fn merge(&self, pair: &mut ReadPair) -> Result<(), PipelineError> {
        let forward = pair
            .artifact(JobStage::Trimmed, Some(MateRole::Forward))
            .ok_or_else(|| missing_artifact(pair, JobStage::Trimmed))?;
        let reverse = pair
            .artifact(JobStage::Trimmed, Some(MateRole::Reverse))
            .ok_or_else(|| missing_artifact(pair, JobStage::Trimmed))?;
        let merged = self.derived(&pair.stem(MateRole::Forward), "_merged");

        let invocation = self
            .tools
            .merge_pairs(forward, reverse, &merged, self.config.merge_max_ee);
        self.runner.run(&invocation, self.cancel)?;

        pair.push_artifact(JobStage::Merged, None, merged);
        pair.set_stage(JobStage::Merged);
        Ok(())
    }

    fn tag(&self, pair: &mut ReadPair) -> Result<(), PipelineError> {
        let merged = pair
            .artifact(JobStage::Merged, None)
            .map(Path::to_path_buf)
            .ok_or_else(|| missing_artifact(pair, JobStage::Merged))?;
        let output = self.derived(&pair.stem(MateRole::Forward), "_rehead");

        let sample_id = pair.sample_id.clone();
        let written = rewrite_fastq_file(&FastqFile::new(merged), &output, |read| {
            read.tag_barcode(&sample_id);
        })?;

        pair.push_artifact(JobStage::Tagged, None, output);
        pair.set_tagged_records(written);
        pair.set_stage(JobStage::Tagged);
        Ok(())
    }
}

fn missing_artifact(pair: &ReadPair, stage: JobStage) -> PipelineError {
    PipelineError::Stage {
        sample_id: pair.sample_id.clone(),
        stage:     pair.stage().name(),
        expected:  stage.name(),
    }
}

/// Removes every derived file of a pair and marks it cleaned. Failures are
/// logged and returned but never escalate; files that are already gone are
/// not failures.
pub fn cleanup(pair: &mut ReadPair) -> Vec<CleanupError> {
    let mut failures = Vec::new();
    for artifact in pair.artifacts() {
        match std::fs::remove_file(&artifact.path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(source) => {
                let failure = CleanupError {
                    path: artifact.path.clone(),
                    source,
                };
                warn!(sample = %pair.sample_id, "{failure}");
                failures.push(failure);
            }
        }
    }
    pair.set_stage(JobStage::Cleaned);
    failures
}
