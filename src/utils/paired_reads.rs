use crate::{
    error::{PipelineError, WithPathExt},
    io::{MateRole, check_plain_fastq},
};
use std::{
    ffi::OsStr,
    fmt::Display,
    fs,
    path::{Path, PathBuf},
};

/// The marker distinguishing forward read files.
pub const FORWARD_MARKER: &str = "_R1_";
/// The marker distinguishing reverse read files.
pub const REVERSE_MARKER: &str = "_R2_";

const FASTQ_EXTENSIONS: [&str; 4] = [".fastq", ".fq", ".fastq.gz", ".fq.gz"];

/// The stages a read pair moves through, in order.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum JobStage {
    Raw,
    AdapterRemoved,
    Trimmed,
    Merged,
    Tagged,
    Cleaned,
}

impl JobStage {
    #[inline]
    pub fn name(self) -> &'static str {
        match self {
            JobStage::Raw => "RAW",
            JobStage::AdapterRemoved => "ADAPTER_REMOVED",
            JobStage::Trimmed => "TRIMMED",
            JobStage::Merged => "MERGED",
            JobStage::Tagged => "TAGGED",
            JobStage::Cleaned => "CLEANED",
        }
    }
}

impl Display for JobStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A file derived from a read pair by one of its stages.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Artifact {
    pub stage: JobStage,
    pub mate:  Option<MateRole>,
    pub path:  PathBuf,
}

/// The forward and reverse files of one sample, and everything derived from
/// them so far.
///
/// Derived files are only ever appended to [`artifacts`](ReadPair::artifacts);
/// a stage never replaces the output of an earlier one.
#[derive(Clone, Debug)]
pub struct ReadPair {
    pub sample_id:  String,
    pub forward:    PathBuf,
    pub reverse:    PathBuf,
    stage:          JobStage,
    artifacts:      Vec<Artifact>,
    tagged_records: usize,
}

impl ReadPair {
    /// Creates the pair for a forward read file, deriving the reverse path and
    /// the sample id from the file name.
    ///
    /// ## Errors
    ///
    /// The file name must contain `_R1_`.
    pub fn from_forward(forward: impl Into<PathBuf>) -> Result<Self, PipelineError> {
        let forward = forward.into();
        let reverse = reverse_mate_path(&forward).ok_or_else(|| {
            PipelineError::input_format(&forward, format!("forward read file name lacks '{FORWARD_MARKER}'"))
        })?;
        let sample_id = sample_id_from(&forward).ok_or_else(|| {
            PipelineError::input_format(&forward, "cannot derive a sample id from the file name")
        })?;

        Ok(ReadPair {
            sample_id,
            forward,
            reverse,
            stage: JobStage::Raw,
            artifacts: Vec::new(),
            tagged_records: 0,
        })
    }

    #[inline]
    pub fn stage(&self) -> JobStage {
        self.stage
    }

    #[inline]
    pub fn artifacts(&self) -> &[Artifact] {
        &self.artifacts
    }

    /// The derived file of a stage for a mate (or for the merged read when
    /// `mate` is [`None`]).
    pub fn artifact(&self, stage: JobStage, mate: Option<MateRole>) -> Option<&Path> {
        self.artifacts
            .iter()
            .find(|a| a.stage == stage && a.mate == mate)
            .map(|a| a.path.as_path())
    }

    /// The tagged reads, once the pair has reached [`JobStage::Tagged`].
    ///
    /// ## Errors
    ///
    /// Any other stage is a [`PipelineError::Stage`] error.
    pub fn tagged_output(&self) -> Result<&Path, PipelineError> {
        match (self.stage, self.artifact(JobStage::Tagged, None)) {
            (JobStage::Tagged, Some(path)) => Ok(path),
            (stage, _) => Err(PipelineError::Stage {
                sample_id: self.sample_id.clone(),
                stage:     stage.name(),
                expected:  JobStage::Tagged.name(),
            }),
        }
    }

    /// How many records the tagging stage wrote.
    #[inline]
    pub fn tagged_records(&self) -> usize {
        self.tagged_records
    }

    /// The input file stem of a mate, used to name its derived files.
    pub(crate) fn stem(&self, mate: MateRole) -> String {
        let path = match mate {
            MateRole::Forward => &self.forward,
            MateRole::Reverse => &self.reverse,
        };
        file_stem(path)
    }

    pub(crate) fn push_artifact(&mut self, stage: JobStage, mate: Option<MateRole>, path: PathBuf) {
        self.artifacts.push(Artifact { stage, mate, path });
    }

    pub(crate) fn set_stage(&mut self, stage: JobStage) {
        self.stage = stage;
    }

    pub(crate) fn set_tagged_records(&mut self, n: usize) {
        self.tagged_records = n;
    }
}

/// The file name without its FASTQ extension(s).
fn file_stem(path: &Path) -> String {
    let name = path.file_name().and_then(OsStr::to_str).unwrap_or_default();
    FASTQ_EXTENSIONS
        .iter()
        .find_map(|ext| name.strip_suffix(ext))
        .unwrap_or(name)
        .to_string()
}

/// Derives the reverse mate path by substituting `_R2_` for `_R1_` in the file
/// name. The directory part is never rewritten.
pub fn reverse_mate_path(forward: &Path) -> Option<PathBuf> {
    let name = forward.file_name()?.to_str()?;
    if !name.contains(FORWARD_MARKER) {
        return None;
    }
    Some(forward.with_file_name(name.replace(FORWARD_MARKER, REVERSE_MARKER)))
}

/// The sample id is the first underscore-delimited token of the forward file
/// name.
pub fn sample_id_from(forward: &Path) -> Option<String> {
    let name = forward.file_name()?.to_str()?;
    name.split('_').next().filter(|id| !id.is_empty()).map(str::to_string)
}

/// Whether a file name looks like a forward FASTQ file.
pub fn is_forward_read_name(name: &str) -> bool {
    name.contains(FORWARD_MARKER) && FASTQ_EXTENSIONS.iter().any(|ext| name.ends_with(ext))
}

/// Scans a directory (non-recursively) for forward read files and pairs each
/// with its reverse mate. Pairs are returned sorted by forward path, which is
/// the order every later stage preserves.
///
/// ## Errors
///
/// An unreadable directory or one without forward files is an error.
pub fn discover_read_pairs(dir: impl AsRef<Path>) -> Result<Vec<ReadPair>, PipelineError> {
    let dir = dir.as_ref();
    let mut forwards = Vec::new();

    for entry in fs::read_dir(dir).with_path(dir)? {
        let path = entry.with_path(dir)?.path();
        if path.is_file()
            && let Some(name) = path.file_name().and_then(OsStr::to_str)
            && is_forward_read_name(name)
        {
            forwards.push(path);
        }
    }

    if forwards.is_empty() {
        return Err(PipelineError::NoSamples { dir: dir.to_path_buf() });
    }

    forwards.sort();
    forwards.into_iter().map(ReadPair::from_forward).collect()
}

/// Checks that both mates of every pair are present, uncompressed FASTQ text.
pub fn validate_read_pairs(pairs: &[ReadPair]) -> Result<(), PipelineError> {
    pairs.iter().try_for_each(|pair| {
        check_plain_fastq(&pair.forward)?;
        check_plain_fastq(&pair.reverse)
    })
}

/// The distinct sample ids of the pairs, in pair order.
pub fn sample_ids(pairs: &[ReadPair]) -> Vec<String> {
    let mut ids: Vec<String> = Vec::with_capacity(pairs.len());
    for pair in pairs {
        if !ids.contains(&pair.sample_id) {
            ids.push(pair.sample_id.clone());
        }
    }
    ids
}
