// Description:      Dereplicates, filters, clusters and maps the corpus through
//                   the external engines, then folds the read mapping into a
//                   sample by OTU abundance table.

use crate::{
    error::{PipelineError, WithPathExt},
    external::{Radius, ToolPaths, ToolRunner},
    io::{AtomicFile, fasta_id, read_fasta},
    processes::corpus::Corpus,
    qc::find_barcode_label,
    utils::CancelToken,
};
use foldhash::{HashMap, HashMapExt};
use std::{
    fs::File,
    io::{BufRead, BufReader, Write},
    path::{Path, PathBuf},
};
use tracing::info;
use zoe::data::fasta::FastaSeq;

/// The file name of the per-read clustering report.
pub const UPARSE_REPORT: &str = "uparse_out.tsv";
/// The file name of the read to centroid mapping.
pub const READ_MAP: &str = "readmap.uc";

const UC_MIN_COLUMNS: usize = 10;
const UC_QUERY_COLUMN: usize = 8;
const UC_TARGET_COLUMN: usize = 9;

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ClusterSettings {
    /// Shorter unique sequences are discarded during dereplication.
    pub min_seq_length:   usize,
    /// Unique sequences seen fewer times are discarded before clustering.
    pub min_cluster_size: usize,
    pub radius:           Radius,
}

impl Default for ClusterSettings {
    fn default() -> Self {
        ClusterSettings {
            min_seq_length:   64,
            min_cluster_size: 2,
            radius:           Radius::default(),
        }
    }
}

/// An operational taxonomic unit.
#[derive(Clone, Debug, PartialEq)]
pub struct Otu {
    /// The centroid label without size annotations, such as `OTU_3`.
    pub id:        String,
    pub centroid:  Vec<u8>,
    /// Mapped reads per sample, parallel to [`OtuTable::samples`].
    pub abundance: Vec<usize>,
    pub taxonomy:  Option<String>,
}

impl Otu {
    #[inline]
    pub fn total(&self) -> usize {
        self.abundance.iter().sum()
    }
}

/// The sample by OTU abundance matrix. Rows are OTUs in centroid file order and
/// columns are samples in discovery order.
#[derive(Clone, Debug, PartialEq)]
pub struct OtuTable {
    pub samples: Vec<String>,
    pub otus:    Vec<Otu>,
}

impl OtuTable {
    /// Creates an empty table with one row per centroid.
    pub fn new(samples: Vec<String>, centroids: impl IntoIterator<Item = (String, Vec<u8>)>) -> Self {
        let otus = centroids
            .into_iter()
            .map(|(id, centroid)| Otu {
                id,
                centroid,
                abundance: vec![0; samples.len()],
                taxonomy: None,
            })
            .collect();
        OtuTable { samples, otus }
    }

    /// The reads mapped to any OTU, per sample.
    pub fn column_sums(&self) -> Vec<usize> {
        let mut sums = vec![0; self.samples.len()];
        for otu in &self.otus {
            for (sum, n) in sums.iter_mut().zip(&otu.abundance) {
                *sum += n;
            }
        }
        sums
    }

    #[inline]
    pub fn get(&self, id: &str) -> Option<&Otu> {
        self.otus.iter().find(|otu| otu.id == id)
    }

    /// Writes the tab-delimited abundance table: an `OTUId` column followed by
    /// one column per sample.
    pub fn write_abundance<W: Write>(&self, mut writer: W) -> std::io::Result<()> {
        write!(writer, "OTUId")?;
        for sample in &self.samples {
            write!(writer, "\t{sample}")?;
        }
        writeln!(writer)?;

        for otu in &self.otus {
            write!(writer, "{}", otu.id)?;
            for n in &otu.abundance {
                write!(writer, "\t{n}")?;
            }
            writeln!(writer)?;
        }
        Ok(())
    }

    /// Persists the abundance table atomically.
    pub fn write_abundance_file(&self, dest: impl Into<PathBuf>) -> Result<PathBuf, PipelineError> {
        let mut file = AtomicFile::create(dest)?;
        let dest = file.dest().to_path_buf();
        self.write_abundance(&mut file).with_path(&dest)?;
        file.commit()
    }
}

/// Everything clustering produced. The files live in the work directory until
/// the driver persists them.
#[derive(Debug)]
pub struct ClusterOutputs {
    pub centroids:     PathBuf,
    pub uparse_report: PathBuf,
    pub read_map:      PathBuf,
    pub table:         OtuTable,
}

pub struct ClusterPipeline<'a> {
    pub settings: &'a ClusterSettings,
    pub tools:    &'a ToolPaths,
    pub runner:   &'a dyn ToolRunner,
    pub cancel:   &'a CancelToken,
    pub work_dir: &'a Path,
}

impl ClusterPipeline<'_> {
    /// Runs dereplication, abundance filtering, clustering and read mapping in
    /// sequence, then folds the mapping into an [`OtuTable`] whose columns are
    /// `samples`.
    ///
    /// ## Errors
    ///
    /// Any failed stage aborts the remaining ones.
    pub fn run(&self, corpus: &Corpus, samples: &[String]) -> Result<ClusterOutputs, PipelineError> {
        let radius = self.settings.radius;
        let derep = self.work_dir.join("derep.fastq");
        let sorted = self.work_dir.join("sorted.fastq");
        let centroids = self.work_dir.join(radius.centroid_file_name());
        let uparse_report = self.work_dir.join(UPARSE_REPORT);
        let read_map = self.work_dir.join(READ_MAP);

        let stages = [
            self.tools
                .dereplicate(&corpus.path, &derep, self.settings.min_seq_length),
            self.tools
                .sort_by_size(&derep, &sorted, self.settings.min_cluster_size),
            self.tools.cluster_otus(&sorted, &centroids, &uparse_report, radius),
            self.tools.map_reads(&corpus.path, &centroids, &read_map, radius),
        ];
        for invocation in &stages {
            self.cancel.check(&invocation.tool)?;
            info!(tool = %invocation.tool, "clustering stage");
            self.runner.run(invocation, self.cancel)?;
        }

        let otus = read_fasta(&centroids)?
            .into_iter()
            .map(|FastaSeq { name, sequence }| (fasta_id(&name).to_string(), sequence));
        let mut table = OtuTable::new(samples.to_vec(), otus);

        let reader = BufReader::new(File::open(&read_map).with_path(&read_map)?);
        fold_read_map(reader, &read_map, &mut table)?;
        info!(
            otus = table.otus.len(),
            mapped = table.column_sums().iter().sum::<usize>(),
            "abundance table built"
        );

        Ok(ClusterOutputs {
            centroids,
            uparse_report,
            read_map,
            table,
        })
    }
}

/// Counts every hit (`H`) record of a `.uc` read mapping into `table`. The
/// sample comes from the query's barcode label and the OTU from the target
/// label with its `;size=` annotation removed. Other record types are ignored.
///
/// ## Errors
///
/// Rows with too few columns, hits without a barcode label, and hits naming a
/// sample or OTU absent from `table` are [`PipelineError::Schema`] errors.
pub fn fold_read_map<R: BufRead>(reader: R, source: &Path, table: &mut OtuTable) -> Result<(), PipelineError> {
    let mut sample_index = HashMap::with_capacity(table.samples.len());
    for (i, sample) in table.samples.iter().enumerate() {
        sample_index.entry(sample.clone()).or_insert(i);
    }
    let mut otu_index = HashMap::with_capacity(table.otus.len());
    for (i, otu) in table.otus.iter().enumerate() {
        otu_index.insert(otu.id.clone(), i);
    }

    for (i, line) in reader.lines().enumerate() {
        let line_number = i + 1;
        let line = line.with_path(source)?;
        if line.trim().is_empty() {
            continue;
        }

        let columns: Vec<&str> = line.split('\t').collect();
        if columns.len() < UC_MIN_COLUMNS {
            return Err(PipelineError::schema(
                source,
                line_number,
                format!(
                    "expected at least {UC_MIN_COLUMNS} columns, found {}",
                    columns.len()
                ),
            ));
        }
        if columns[0] != "H" {
            continue;
        }

        let query = columns[UC_QUERY_COLUMN];
        let target = columns[UC_TARGET_COLUMN];
        let otu_id = target.split(';').next().unwrap_or_default();

        let label = find_barcode_label(query.as_bytes())
            .map(String::from_utf8_lossy)
            .ok_or_else(|| PipelineError::schema(source, line_number, format!("read '{query}' has no barcode label")))?;
        let Some(&sample) = sample_index.get(&*label) else {
            return Err(PipelineError::schema(
                source,
                line_number,
                format!("read '{query}' belongs to unknown sample '{label}'"),
            ));
        };
        let Some(&otu) = otu_index.get(otu_id) else {
            return Err(PipelineError::schema(
                source,
                line_number,
                format!("hit names unknown OTU '{target}'"),
            ));
        };

        table.otus[otu].abundance[sample] += 1;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn table() -> OtuTable {
        OtuTable::new(
            vec!["A".to_string(), "B".to_string()],
            [("OTU_1".to_string(), b"ACGT".to_vec()), ("OTU_2".to_string(), b"GGCC".to_vec())],
        )
    }

    fn hit(query: &str, target: &str) -> String {
        format!("H\t0\t80\t100.0\t+\t0\t0\t80M\t{query}\t{target}\n")
    }

    #[test]
    fn folds_hits_by_sample_and_otu() {
        let mut uc = String::new();
        uc += &hit("r1 1:N:0:1;barcodelabel=A", "OTU_1;size=4;");
        uc += &hit("r2 1:N:0:1;barcodelabel=A", "OTU_1;size=4;");
        uc += &hit("r3 1:N:0:1;barcodelabel=B", "OTU_2;size=2;");
        uc += &hit("r4;barcodelabel=A;size=1;", "OTU_2");
        uc += "N\t*\t*\t*\t*\t*\t*\t*\tr5;barcodelabel=B\t*\n\n";

        let mut table = table();
        fold_read_map(Cursor::new(uc), Path::new("readmap.uc"), &mut table).unwrap();
        assert_eq!(table.otus[0].abundance, [2, 0]);
        assert_eq!(table.otus[1].abundance, [1, 1]);
        assert_eq!(table.column_sums(), [3, 1]);
        assert_eq!(table.get("OTU_2").unwrap().total(), 2);
    }

    #[test]
    fn fold_rejects_malformed_rows() {
        let short = "H\t0\t80\n";
        match fold_read_map(Cursor::new(short), Path::new("readmap.uc"), &mut table()) {
            Err(PipelineError::Schema { line, .. }) => assert_eq!(line, 1),
            other => panic!("expected a schema error, got {other:?}"),
        }

        let unlabeled = hit("r1 1:N:0:1", "OTU_1");
        assert!(matches!(
            fold_read_map(Cursor::new(unlabeled), Path::new("readmap.uc"), &mut table()),
            Err(PipelineError::Schema { .. })
        ));

        let stranger = format!("{}{}", hit("r1;barcodelabel=A", "OTU_1"), hit("r2;barcodelabel=C", "OTU_1"));
        match fold_read_map(Cursor::new(stranger), Path::new("readmap.uc"), &mut table()) {
            Err(PipelineError::Schema { line, detail, .. }) => {
                assert_eq!(line, 2);
                assert!(detail.contains("'C'"));
            }
            other => panic!("expected a schema error, got {other:?}"),
        }

        let unknown_otu = hit("r1;barcodelabel=A", "OTU_9;size=3;");
        assert!(matches!(
            fold_read_map(Cursor::new(unknown_otu), Path::new("readmap.uc"), &mut table()),
            Err(PipelineError::Schema { .. })
        ));
    }

    #[test]
    fn abundance_table_layout() {
        let mut table = table();
        table.otus[0].abundance = vec![4, 2];
        table.otus[1].abundance = vec![3, 0];

        let mut out = Vec::new();
        table.write_abundance(&mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "OTUId\tA\tB\nOTU_1\t4\t2\nOTU_2\t3\t0\n");

        let dir = tempfile::tempdir().unwrap();
        let path = table.write_abundance_file(dir.path().join("otu_table.tsv")).unwrap();
        assert!(std::fs::read_to_string(path).unwrap().starts_with("OTUId\tA\tB\n"));
    }
}
