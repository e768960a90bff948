use super::{ToolInvocation, ToolKind};
use crate::error::PipelineError;
use std::{
    fmt::Display,
    path::{Path, PathBuf},
    str::FromStr,
};

/// The default forward adapter removed before primer trimming.
pub const DEFAULT_FORWARD_ADAPTER: &str = "ATCTCGTATGCCGTCTTCTGCTTG";
/// The default reverse adapter removed before primer trimming.
pub const DEFAULT_REVERSE_ADAPTER: &str = "TCTCGGTGGTCGCCGTATCATT";

/// Where the external engines live.
#[derive(Clone, Debug)]
pub struct ToolPaths {
    pub cutadapt:       PathBuf,
    pub usearch:        PathBuf,
    pub java:           PathBuf,
    pub classifier_jar: PathBuf,
}

impl ToolPaths {
    /// Removes pairs in which either mate carries an adapter.
    pub fn adapter_removal(
        &self, forward_adapter: &str, reverse_adapter: &str, forward: &Path, reverse: &Path, forward_out: &Path,
        reverse_out: &Path,
    ) -> ToolInvocation {
        ToolInvocation::new(ToolKind::AdapterRemoval, "cutadapt", &self.cutadapt)
            .arg("-a")
            .arg(forward_adapter)
            .arg("-A")
            .arg(reverse_adapter)
            .arg("-o")
            .output(forward_out)
            .arg("-p")
            .output(reverse_out)
            .arg("--discard-trimmed")
            .input(forward)
            .input(reverse)
    }

    /// Merges the trimmed mates into single reads, keeping those under the
    /// expected error limit.
    pub fn merge_pairs(&self, forward: &Path, reverse: &Path, merged: &Path, max_ee: f64) -> ToolInvocation {
        self.usearch(ToolKind::MergePairs, "-fastq_mergepairs")
            .input(forward)
            .arg("-reverse")
            .input(reverse)
            .arg("-fastqout")
            .output(merged)
            .arg("-fastq_merge_maxee")
            .arg(max_ee.to_string())
    }

    /// Collapses identical reads, annotating each with `;size=N;`.
    pub fn dereplicate(&self, corpus: &Path, derep: &Path, min_seq_length: usize) -> ToolInvocation {
        self.usearch(ToolKind::Dereplicate, "-derep_fulllength")
            .input(corpus)
            .arg("-fastqout")
            .output(derep)
            .arg("-sizeout")
            .arg("-minseqlength")
            .arg(min_seq_length.to_string())
    }

    /// Sorts unique reads by abundance, dropping those below `min_size`.
    pub fn sort_by_size(&self, derep: &Path, sorted: &Path, min_size: usize) -> ToolInvocation {
        self.usearch(ToolKind::SortBySize, "-sortbysize")
            .input(derep)
            .arg("-fastqout")
            .output(sorted)
            .arg("-minsize")
            .arg(min_size.to_string())
    }

    /// Clusters the sorted reads de novo, writing `OTU_`-relabeled centroids
    /// and the per-read clustering report.
    pub fn cluster_otus(&self, sorted: &Path, centroids: &Path, report: &Path, radius: Radius) -> ToolInvocation {
        self.usearch(ToolKind::ClusterOtus, "-cluster_otus")
            .input(sorted)
            .arg("-otus")
            .output(centroids)
            .arg("-uparseout")
            .output(report)
            .arg("-relabel")
            .arg("OTU_")
            .arg("-sizein")
            .arg("-sizeout")
            .arg("-otu_radius_pct")
            .arg(radius.to_string())
    }

    /// Maps every corpus read to its nearest centroid.
    pub fn map_reads(&self, corpus: &Path, centroids: &Path, readmap: &Path, radius: Radius) -> ToolInvocation {
        self.usearch(ToolKind::MapReads, "-usearch_global")
            .input(corpus)
            .arg("-db")
            .input(centroids)
            .arg("-strand")
            .arg("both")
            .arg("-id")
            .arg(radius.identity_fraction().to_string())
            .arg("-uc")
            .output(readmap)
            .arg("-maxaccepts")
            .arg("8")
            .arg("-maxrejects")
            .arg("64")
            .arg("-top_hit_only")
            .arg("-notrunclabels")
    }

    /// Classifies the centroids with the RDP classifier.
    pub fn classify(&self, centroids: &Path, report: &Path) -> ToolInvocation {
        ToolInvocation::new(ToolKind::Classify, "rdp-classifier", &self.java)
            .arg("-jar")
            .input(&self.classifier_jar)
            .arg("classify")
            .input(centroids)
            .arg("-o")
            .output(report)
    }

    fn usearch(&self, kind: ToolKind, command: &str) -> ToolInvocation {
        ToolInvocation::new(kind, format!("usearch {command}"), &self.usearch).arg(command)
    }
}

/// The clustering radius in percent. The OTU identity threshold is
/// `100 - radius`.
#[derive(Copy, Clone, Debug, PartialEq, PartialOrd)]
pub struct Radius(f64);

impl Radius {
    /// ## Errors
    ///
    /// The radius must lie strictly between 0 and 100.
    pub fn new(percent: f64) -> Result<Self, PipelineError> {
        if percent > 0.0 && percent < 100.0 {
            Ok(Radius(percent))
        } else {
            Err(PipelineError::Config(format!(
                "the clustering radius must lie strictly between 0 and 100, got {percent}"
            )))
        }
    }

    #[inline]
    pub fn percent(self) -> f64 {
        self.0
    }

    /// The identity threshold in percent.
    #[inline]
    pub fn identity_percent(self) -> f64 {
        100.0 - self.0
    }

    /// The identity threshold as a fraction, as passed to `-id`.
    #[inline]
    pub fn identity_fraction(self) -> f64 {
        self.identity_percent() / 100.0
    }

    /// The persisted centroid file name, such as `otus_99.fasta`.
    pub fn centroid_file_name(self) -> String {
        format!("otus_{}.fasta", self.identity_percent())
    }
}

impl Default for Radius {
    fn default() -> Self {
        Radius(1.0)
    }
}

impl Display for Radius {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Radius {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let percent = s
            .trim()
            .parse::<f64>()
            .map_err(|e| format!("'{s}' is not a number: {e}"))?;
        Radius::new(percent).map_err(|e| e.to_string())
    }
}
