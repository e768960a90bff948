// Description:      Runs the whole pipeline: discovers the read pairs of an
//                   input directory, runs every sample job on a worker pool,
//                   combines the tagged reads, clusters them into OTUs and
//                   assigns taxonomy.

use crate::{
    args::{ToolArgs, validate_acgtn, validate_max_ee},
    error::{CleanupError, PipelineError, WithPathExt},
    external::{DEFAULT_FORWARD_ADAPTER, DEFAULT_REVERSE_ADAPTER, Radius, ToolPaths, ToolRunner},
    io::persist_file,
    processes::{
        cluster::{ClusterPipeline, ClusterSettings, OtuTable},
        corpus::Corpus,
        sample_job::{SampleJob, SampleJobConfig, cleanup},
        taxonomy::{TaxonomyAssigner, attach_taxonomy, write_taxonomy_file},
    },
    qc::PrimerLengths,
    utils::{
        CancelToken, ReadPair,
        worker_threads,
        paired_reads::{discover_read_pairs, validate_read_pairs},
    },
};
use clap::{Args, ValueHint};
use rayon::prelude::*;
use std::{
    fs,
    num::NonZeroUsize,
    path::{Path, PathBuf},
};
use tracing::{error, info, warn};

/// The persisted corpus of tagged reads.
pub const CORPUS_FILE: &str = "all_seqs.fastq";
/// The persisted abundance table.
pub const OTU_TABLE_FILE: &str = "otu_table.tsv";
/// The persisted taxonomy table.
pub const TAXONOMY_FILE: &str = "otu_taxonomy.tsv";

const WORK_DIR_PREFIX: &str = ".otu-core-";

#[derive(Args, Debug)]
pub struct RunArgs {
    #[arg(value_hint = ValueHint::DirPath)]
    /// Directory of paired FASTQ files, named with '_R1_' and '_R2_'
    pub input_dir: PathBuf,

    #[arg(short = 'o', long, default_value = ".", value_hint = ValueHint::DirPath)]
    /// Directory receiving the corpus, centroids and tables
    pub output_dir: PathBuf,

    #[arg(short = 't', long)]
    /// Number of samples processed concurrently. Defaults to the logical core
    /// count, capped by NSLOTS or IFX_LOCAL_PROCS
    pub threads: Option<NonZeroUsize>,

    #[arg(long, default_value_t = 17)]
    /// Bases clipped from the start of forward reads
    pub forward_primer_len: usize,

    #[arg(long, default_value_t = 21)]
    /// Bases clipped from the start of reverse reads
    pub reverse_primer_len: usize,

    #[arg(long, default_value = DEFAULT_FORWARD_ADAPTER, value_parser = validate_acgtn)]
    /// Adapter literal marking forward reads for removal
    pub forward_adapter: String,

    #[arg(long, default_value = DEFAULT_REVERSE_ADAPTER, value_parser = validate_acgtn)]
    /// Adapter literal marking reverse reads for removal
    pub reverse_adapter: String,

    #[arg(long, default_value = "1.0", value_parser = validate_max_ee)]
    /// Maximum expected errors of a merged read
    pub merge_max_ee: f64,

    #[arg(long, default_value_t = 64)]
    /// Minimum length of a unique sequence kept by dereplication
    pub min_seq_length: usize,

    #[arg(long, default_value_t = 2)]
    /// Minimum abundance of a unique sequence used for clustering
    pub min_cluster_size: usize,

    #[arg(short = 'r', long, default_value = "1")]
    /// OTU radius in percent; the identity threshold is 100 - radius
    pub radius: Radius,

    #[arg(short = 'k', long)]
    /// Keep the work directory with every intermediate file
    pub keep_intermediates: bool,

    #[command(flatten)]
    pub tools: ToolArgs,
}

/// Everything a pipeline run needs besides the tool runner.
#[derive(Clone, Debug)]
pub struct PipelineSettings {
    pub input_dir:          PathBuf,
    pub output_dir:         PathBuf,
    pub threads:            usize,
    pub job:                SampleJobConfig,
    pub cluster:            ClusterSettings,
    pub tools:              ToolPaths,
    pub keep_intermediates: bool,
}

impl From<&RunArgs> for PipelineSettings {
    fn from(args: &RunArgs) -> Self {
        PipelineSettings {
            input_dir:          args.input_dir.clone(),
            output_dir:         args.output_dir.clone(),
            threads:            worker_threads(args.threads),
            job:                SampleJobConfig {
                forward_adapter: args.forward_adapter.clone(),
                reverse_adapter: args.reverse_adapter.clone(),
                primers:         PrimerLengths {
                    forward: args.forward_primer_len,
                    reverse: args.reverse_primer_len,
                },
                merge_max_ee:    args.merge_max_ee,
            },
            cluster:            ClusterSettings {
                min_seq_length:   args.min_seq_length,
                min_cluster_size: args.min_cluster_size,
                radius:           args.radius,
            },
            tools:              args.tools.tool_paths(),
            keep_intermediates: args.keep_intermediates,
        }
    }
}

/// What a successful run produced.
#[derive(Debug)]
pub struct RunSummary {
    /// The corpus, pointing at its persisted location.
    pub corpus:         Corpus,
    pub table:          OtuTable,
    pub centroids:      PathBuf,
    pub uparse_report:  PathBuf,
    pub otu_table:      PathBuf,
    pub taxonomy_table: PathBuf,
    /// The work directory, if it was kept.
    pub work_dir:       Option<PathBuf>,
}

/// Owns the read pairs of a run and sequences every stage over them.
pub struct PipelineDriver<R> {
    settings: PipelineSettings,
    runner:   R,
    cancel:   CancelToken,
}

impl<R: ToolRunner> PipelineDriver<R> {
    pub fn new(settings: PipelineSettings, runner: R) -> Self {
        PipelineDriver {
            settings,
            runner,
            cancel: CancelToken::new(),
        }
    }

    /// Shares an existing cancellation token with the run.
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    #[inline]
    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Runs the pipeline end to end.
    ///
    /// Inputs are validated before any processing. Intermediates live in a
    /// session-unique work directory inside the output directory, and the
    /// persisted outputs are only moved out of it once every stage has
    /// succeeded. The work directory is removed on success and failure alike,
    /// unless intermediates are kept.
    ///
    /// ## Errors
    ///
    /// The first failure, in discovery order for sample jobs.
    pub fn run(&self) -> Result<RunSummary, PipelineError> {
        let settings = &self.settings;
        let mut pairs = discover_read_pairs(&settings.input_dir)?;
        validate_read_pairs(&pairs)?;
        info!(
            pairs = pairs.len(),
            input = %settings.input_dir.display(),
            "discovered read pairs"
        );

        fs::create_dir_all(&settings.output_dir).with_path(&settings.output_dir)?;
        let work_dir = tempfile::Builder::new()
            .prefix(WORK_DIR_PREFIX)
            .tempdir_in(&settings.output_dir)
            .with_path(&settings.output_dir)?;

        let result = self.run_in(&mut pairs, work_dir.path());

        if settings.keep_intermediates {
            let kept = work_dir.keep();
            info!(work_dir = %kept.display(), "intermediate files kept");
            return result.map(|summary| RunSummary {
                work_dir: Some(kept),
                ..summary
            });
        }

        for pair in &mut pairs {
            cleanup(pair);
        }
        let path = work_dir.path().to_path_buf();
        if let Err(source) = work_dir.close() {
            warn!("{}", CleanupError { path, source });
        }
        result
    }

    fn run_in(&self, pairs: &mut [ReadPair], work_dir: &Path) -> Result<RunSummary, PipelineError> {
        let settings = &self.settings;
        let runner: &dyn ToolRunner = &self.runner;

        let job = SampleJob {
            config: &settings.job,
            tools: &settings.tools,
            runner,
            cancel: &self.cancel,
            work_dir,
        };
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(settings.threads)
            .build()
            .map_err(|e| PipelineError::Config(format!("cannot start {} worker threads: {e}", settings.threads)))?;

        let results: Vec<Result<(), PipelineError>> =
            pool.install(|| pairs.par_iter_mut().map(|pair| job.run(pair)).collect());

        let mut first_failure = None;
        for (pair, result) in pairs.iter().zip(results) {
            if let Err(e) = result {
                error!(sample = %pair.sample_id, stage = %pair.stage(), "sample job failed: {e}");
                first_failure.get_or_insert(e);
            }
        }
        if let Some(e) = first_failure {
            return Err(e);
        }

        self.cancel.check("corpus construction")?;
        let mut corpus = Corpus::combine(pairs, work_dir.join(CORPUS_FILE))?;
        let samples = corpus.sample_ids();

        let clustering = ClusterPipeline {
            settings: &settings.cluster,
            tools: &settings.tools,
            runner,
            cancel: &self.cancel,
            work_dir,
        };
        let mut outputs = clustering.run(&corpus, &samples)?;

        let assigner = TaxonomyAssigner {
            tools: &settings.tools,
            runner,
            cancel: &self.cancel,
            work_dir,
        };
        let (taxonomy, report) = assigner.assign(&outputs.centroids)?;
        attach_taxonomy(&mut outputs.table, &taxonomy, &report)?;

        let out = |name: &Path| -> Result<PathBuf, PipelineError> {
            let name = name
                .file_name()
                .ok_or_else(|| PipelineError::Config(format!("{} has no file name", name.display())))?;
            Ok(settings.output_dir.join(name))
        };
        let centroids = out(&outputs.centroids)?;
        let uparse_report = out(&outputs.uparse_report)?;
        let corpus_path = out(&corpus.path)?;
        persist_file(&outputs.centroids, &centroids)?;
        persist_file(&outputs.uparse_report, &uparse_report)?;
        persist_file(&corpus.path, &corpus_path)?;
        corpus.path = corpus_path;

        // The tables go last: their presence marks a complete run.
        let otu_table = outputs
            .table
            .write_abundance_file(settings.output_dir.join(OTU_TABLE_FILE))?;
        let taxonomy_table = write_taxonomy_file(&outputs.table, settings.output_dir.join(TAXONOMY_FILE))?;

        info!(
            otus = outputs.table.otus.len(),
            samples = samples.len(),
            table = %otu_table.display(),
            "pipeline complete"
        );
        Ok(RunSummary {
            corpus,
            table: outputs.table,
            centroids,
            uparse_report,
            otu_table,
            taxonomy_table,
            work_dir: None,
        })
    }
}

/// Cancels `cancel` when the process is interrupted, so running tools are
/// killed and the work directory is still removed.
fn cancel_on_interrupt(cancel: &CancelToken) -> Result<(), ctrlc::Error> {
    let cancel = cancel.clone();
    ctrlc::set_handler(move || {
        warn!("Interrupt received, cancelling the run.");
        cancel.cancel();
    })
}

/// Sub-program running the full amplicon pipeline.
pub fn run_process(args: RunArgs) -> Result<(), std::io::Error> {
    let settings = PipelineSettings::from(&args);
    let driver = PipelineDriver::new(settings, args.tools.runner());
    if let Err(e) = cancel_on_interrupt(driver.cancel_token()) {
        warn!("Cannot install the interrupt handler, Ctrl-C will not stop tools cleanly: {e}");
    }
    let summary = driver.run()?;

    for ((sample, tagged), mapped) in summary.corpus.per_sample.iter().zip(summary.table.column_sums()) {
        info!(sample = %sample, tagged, mapped, "sample summary");
    }
    Ok(())
}
