use crate::{
    error::{PipelineError, WithPathExt},
    external::{ToolPaths, ToolRunner},
    io::{AtomicFile, WriteFileStdout},
    processes::cluster::OtuTable,
    utils::CancelToken,
};
use clap::Args;
use foldhash::HashMap;
use std::{
    fs::File,
    io::{BufRead, BufReader, Write},
    path::{Path, PathBuf},
};
use tracing::info;

const ID_COLUMN: usize = 0;
const FIRST_NAME_COLUMN: usize = 5;
const TRIPLE_START: usize = 2;
const TRIPLE_WIDTH: usize = 3;
const MIN_COLUMNS: usize = 5;

/// Maps OTU ids to `;`-joined taxon names, in the order the ids were first
/// seen.
#[derive(Clone, Debug, Default)]
pub struct TaxonomyTable {
    entries: Vec<(String, String)>,
    index:   HashMap<String, usize>,
    /// The number of lines read from the report.
    lines:   usize,
}

impl TaxonomyTable {
    /// Parses a tab-delimited classifier report.
    ///
    /// Column 0 is the id (any `;` annotation is dropped), column 1 the strand
    /// flag, and the rest repeating name, rank and confidence triples. The
    /// first triple is the root and is skipped. A later row for the same id
    /// replaces the earlier one but keeps its position.
    ///
    /// ## Errors
    ///
    /// Non-blank rows with fewer than five columns, or with a column count not
    /// of the form `2 + 3k`, are [`PipelineError::Schema`] errors naming the
    /// line and the column count.
    pub fn parse<R: BufRead>(reader: R, source: &Path) -> Result<Self, PipelineError> {
        let mut table = TaxonomyTable::default();

        for (i, line) in reader.lines().enumerate() {
            let line_number = i + 1;
            table.lines = line_number;
            let line = line.with_path(source)?;
            let line = line.trim_end_matches(['\r', '\n']);
            if line.trim().is_empty() {
                continue;
            }

            let columns: Vec<&str> = line.split('\t').collect();
            let n = columns.len();
            if n < MIN_COLUMNS || (n - TRIPLE_START) % TRIPLE_WIDTH != 0 {
                return Err(PipelineError::schema(
                    source,
                    line_number,
                    format!(
                        "found {n} columns, expected an id, a strand flag and complete name/rank/confidence triples"
                    ),
                ));
            }

            let id = columns[ID_COLUMN].split(';').next().unwrap_or_default().trim();
            let names = columns[FIRST_NAME_COLUMN..]
                .iter()
                .step_by(TRIPLE_WIDTH)
                .copied()
                .collect::<Vec<_>>()
                .join(";");
            table.insert(id.to_string(), names);
        }

        Ok(table)
    }

    /// Parses the classifier report at `path`.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, PipelineError> {
        let path = path.as_ref();
        let reader = BufReader::new(File::open(path).with_path(path)?);
        Self::parse(reader, path)
    }

    fn insert(&mut self, id: String, taxonomy: String) {
        match self.index.get(&id) {
            Some(&i) => self.entries[i].1 = taxonomy,
            None => {
                self.index.insert(id.clone(), self.entries.len());
                self.entries.push((id, taxonomy));
            }
        }
    }

    #[inline]
    pub fn get(&self, id: &str) -> Option<&str> {
        self.index.get(id).map(|&i| self.entries[i].1.as_str())
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The `(id, taxonomy)` rows in first-seen order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(id, tax)| (id.as_str(), tax.as_str()))
    }

    /// Writes `id<TAB>taxonomy` rows in first-seen order.
    pub fn write_tsv<W: Write>(&self, mut writer: W) -> std::io::Result<()> {
        for (id, taxonomy) in self.iter() {
            writeln!(writer, "{id}\t{taxonomy}")?;
        }
        Ok(())
    }
}

/// Copies the taxonomy of every OTU from `taxonomy` onto `table`.
///
/// ## Errors
///
/// An OTU without a row in the report is a [`PipelineError::Schema`] error.
pub fn attach_taxonomy(table: &mut OtuTable, taxonomy: &TaxonomyTable, source: &Path) -> Result<(), PipelineError> {
    for otu in &mut table.otus {
        let Some(names) = taxonomy.get(&otu.id) else {
            return Err(PipelineError::schema(
                source,
                taxonomy.lines,
                format!("the report has no row for {}", otu.id),
            ));
        };
        otu.taxonomy = Some(names.to_string());
    }
    Ok(())
}

/// Persists the taxonomy of every OTU, in table order.
pub fn write_taxonomy_file(table: &OtuTable, dest: impl Into<PathBuf>) -> Result<PathBuf, PipelineError> {
    let mut file = AtomicFile::create(dest)?;
    let dest = file.dest().to_path_buf();
    for otu in &table.otus {
        writeln!(file, "{}\t{}", otu.id, otu.taxonomy.as_deref().unwrap_or_default()).with_path(&dest)?;
    }
    file.commit()
}

pub struct TaxonomyAssigner<'a> {
    pub tools:    &'a ToolPaths,
    pub runner:   &'a dyn ToolRunner,
    pub cancel:   &'a CancelToken,
    pub work_dir: &'a Path,
}

impl TaxonomyAssigner<'_> {
    /// Classifies the centroids and parses the resulting report, which stays
    /// in the work directory.
    pub fn assign(&self, centroids: &Path) -> Result<(TaxonomyTable, PathBuf), PipelineError> {
        let report = self.work_dir.join("rdp_report.tsv");
        let invocation = self.tools.classify(centroids, &report);
        self.cancel.check(&invocation.tool)?;
        self.runner.run(&invocation, self.cancel)?;

        let taxonomy = TaxonomyTable::from_file(&report)?;
        info!(otus = taxonomy.len(), "taxonomy assigned");
        Ok((taxonomy, report))
    }
}

#[derive(Args, Debug)]
pub struct ParseTaxonomyArgs {
    /// Tab-delimited report of the RDP classifier
    pub report: PathBuf,

    #[arg(short = 'o', long)]
    /// Output path for the OTU id and taxonomy table. Prints to STDOUT if not
    /// provided
    pub output: Option<PathBuf>,
}

/// Sub-program converting a classifier report to a taxonomy table.
pub fn parse_taxonomy_process(args: ParseTaxonomyArgs) -> Result<(), std::io::Error> {
    let taxonomy = TaxonomyTable::from_file(&args.report)?;
    let mut writer = WriteFileStdout::open(args.output.as_ref())?;
    taxonomy.write_tsv(&mut writer)?;
    writer.finish()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const REPORT: &str = "\
OTU_1;size=6;\t\tRoot\trootrank\t1.0\tBacteria\tdomain\t1.0\tFirmicutes\tphylum\t0.98
OTU_2;size=3;\t-\tRoot\trootrank\t1.0\tBacteria\tdomain\t0.99

OTU_1;size=6;\t\tRoot\trootrank\t1.0\tArchaea\tdomain\t0.7
";

    fn parse(text: &str) -> Result<TaxonomyTable, PipelineError> {
        TaxonomyTable::parse(Cursor::new(text), Path::new("report.tsv"))
    }

    fn rows(table: &TaxonomyTable) -> Vec<(String, String)> {
        table.iter().map(|(a, b)| (a.to_string(), b.to_string())).collect()
    }

    #[test]
    fn names_are_taken_with_stride_three() {
        let table = parse(REPORT).unwrap();
        assert_eq!(
            rows(&table),
            [
                ("OTU_1".to_string(), "Archaea".to_string()),
                ("OTU_2".to_string(), "Bacteria".to_string())
            ]
        );

        let first = parse(REPORT.lines().next().unwrap()).unwrap();
        assert_eq!(first.get("OTU_1"), Some("Bacteria;Firmicutes"));
    }

    #[test]
    fn parsing_is_deterministic_and_idempotent() {
        let once = parse(REPORT).unwrap();
        let twice = parse(REPORT).unwrap();
        assert_eq!(rows(&once), rows(&twice));

        let mut out = Vec::new();
        once.write_tsv(&mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "OTU_1\tArchaea\nOTU_2\tBacteria\n");
    }

    #[test]
    fn bad_column_counts_are_schema_errors() {
        for (text, columns) in [("OTU_1\t\tRoot\trootrank\n", 4), ("OTU_1\t\tRoot\trootrank\t1.0\tBacteria\n", 6)] {
            match parse(&format!("OTU_0\t\tRoot\trootrank\t1.0\n{text}")) {
                Err(PipelineError::Schema { line, detail, .. }) => {
                    assert_eq!(line, 2);
                    assert!(detail.starts_with(&format!("found {columns} columns")));
                }
                other => panic!("expected a schema error, got {other:?}"),
            }
        }
    }

    #[test]
    fn every_otu_needs_a_row() {
        let taxonomy = parse(REPORT).unwrap();
        let mut table = OtuTable::new(
            vec!["A".to_string()],
            [("OTU_1".to_string(), b"ACGT".to_vec()), ("OTU_2".to_string(), b"GGCC".to_vec())],
        );
        attach_taxonomy(&mut table, &taxonomy, Path::new("report.tsv")).unwrap();
        assert_eq!(table.otus[1].taxonomy.as_deref(), Some("Bacteria"));

        let dir = tempfile::tempdir().unwrap();
        let path = write_taxonomy_file(&table, dir.path().join("otu_taxonomy.tsv")).unwrap();
        assert_eq!(
            std::fs::read_to_string(path).unwrap(),
            "OTU_1\tArchaea\nOTU_2\tBacteria\n"
        );

        table.otus.push(table.otus[0].clone());
        table.otus[2].id = "OTU_3".to_string();
        assert!(matches!(
            attach_taxonomy(&mut table, &taxonomy, Path::new("report.tsv")),
            Err(PipelineError::Schema { .. })
        ));
    }
}
