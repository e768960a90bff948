use crate::error::{PipelineError, WithPathExt};
use std::{
    fs::File,
    io::{BufWriter, Read, Stdout, Write, stdout},
    path::{Path, PathBuf},
};
use tempfile::NamedTempFile;
use zoe::define_whichever;

mod fasta;
mod fastq;

pub use fasta::*;
pub use fastq::*;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Checks that an input and an output path are distinct.
///
/// ## Errors
///
/// If the paths are equal, an appropriate error message is provided.
pub(crate) fn check_distinct_files(input: impl AsRef<Path>, output: Option<impl AsRef<Path>>) -> Result<(), PipelineError> {
    if let Some(output) = output
        && input.as_ref() == output.as_ref()
    {
        Err(PipelineError::Config(format!(
            "The input file {} is the same as the output file",
            input.as_ref().display()
        )))
    } else {
        Ok(())
    }
}

/// Checks whether a path names a [gzip
/// file](https://www.rfc-editor.org/rfc/rfc1952#page-5) by its extension.
#[inline]
pub(crate) fn is_gz<P: AsRef<Path>>(path: P) -> bool {
    path.as_ref().extension().is_some_and(|ext| ext == "gz")
}

/// Validates that `path` exists and holds uncompressed FASTQ text.
///
/// An empty file is accepted (it simply contains no reads). Only the leading
/// bytes are inspected; record-level validation happens while parsing.
///
/// ## Errors
///
/// A missing file is a [`MissingInput`](PipelineError::MissingInput) error;
/// gzip data (by extension or magic bytes) or text not starting with `@` is an
/// [`InputFormat`](PipelineError::InputFormat) error.
pub fn check_plain_fastq(path: impl AsRef<Path>) -> Result<(), PipelineError> {
    let path = path.as_ref();
    if !path.is_file() {
        return Err(PipelineError::MissingInput {
            path: path.to_path_buf(),
        });
    }

    let mut head = Vec::with_capacity(64);
    File::open(path)
        .and_then(|f| f.take(64).read_to_end(&mut head))
        .with_path(path)?;

    if is_gz(path) || head.starts_with(&GZIP_MAGIC) {
        return Err(PipelineError::input_format(
            path,
            "gzip-compressed input is not supported; decompress the FASTQ files first",
        ));
    }

    match head.iter().find(|b| !b.is_ascii_whitespace()) {
        None | Some(&RECORD_START) => Ok(()),
        Some(_) => Err(PipelineError::input_format(
            path,
            "not FASTQ text: the first record does not start with '@'",
        )),
    }
}

/// The directory a file lives in, treating a bare file name as the current
/// directory.
fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

/// A persisted output that only appears at its destination once it is
/// completely written.
///
/// Data goes to a temporary file in the destination directory, which
/// [`commit`](AtomicFile::commit) renames over the destination. Dropping an
/// uncommitted [`AtomicFile`] removes the temporary file.
pub struct AtomicFile {
    writer: BufWriter<NamedTempFile>,
    dest:   PathBuf,
}

impl AtomicFile {
    /// Starts writing a new version of `dest`.
    ///
    /// ## Errors
    ///
    /// IO errors when creating the temporary file are propagated.
    pub fn create(dest: impl Into<PathBuf>) -> Result<Self, PipelineError> {
        let dest = dest.into();
        let temp = NamedTempFile::new_in(parent_dir(&dest)).with_path(&dest)?;
        Ok(AtomicFile {
            writer: BufWriter::new(temp),
            dest,
        })
    }

    #[inline]
    pub fn dest(&self) -> &Path {
        &self.dest
    }

    /// Flushes the data and atomically moves it to the destination.
    ///
    /// ## Errors
    ///
    /// IO errors when flushing or renaming are propagated.
    pub fn commit(self) -> Result<PathBuf, PipelineError> {
        let AtomicFile { writer, dest } = self;
        let temp = writer.into_inner().map_err(|e| PipelineError::io(&dest, e.into_error()))?;
        temp.as_file().sync_all().with_path(&dest)?;
        temp.persist(&dest).map_err(|e| PipelineError::io(&dest, e.error))?;
        Ok(dest)
    }
}

impl Write for AtomicFile {
    #[inline]
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.writer.write(buf)
    }

    #[inline]
    fn flush(&mut self) -> std::io::Result<()> {
        self.writer.flush()
    }
}

/// Moves a finished file produced in the work directory to its persisted
/// location. Both must be on the same filesystem for the move to be atomic,
/// which holds for the session work directory.
pub fn persist_file(src: impl AsRef<Path>, dest: impl AsRef<Path>) -> Result<(), PipelineError> {
    std::fs::rename(src.as_ref(), dest.as_ref()).with_path(dest.as_ref())
}

define_whichever! {
    /// An enum for the output types of the standalone subcommands: an atomic
    /// file or stdout.
    pub(crate) enum WriteFileStdout {
        /// A file that is renamed into place when finished.
        File(AtomicFile),
        /// Uncompressed data to stdout.
        Stdout(BufWriter<Stdout>),
    }

    impl Write for WriteFileStdout {}
}

impl WriteFileStdout {
    /// Opens an [`AtomicFile`] if a path is provided, otherwise stdout.
    pub fn open(path: Option<impl AsRef<Path>>) -> Result<Self, PipelineError> {
        match path {
            Some(path) => AtomicFile::create(path.as_ref()).map(Self::File),
            None => Ok(Self::Stdout(BufWriter::new(stdout()))),
        }
    }

    /// Completes the output, committing the file variant.
    pub fn finish(self) -> Result<(), PipelineError> {
        match self {
            Self::File(file) => file.commit().map(|_| ()),
            Self::Stdout(mut out) => out.flush().with_path("<stdout>"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atomic_file_appears_only_on_commit() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("otu_table.tsv");

        let mut file = AtomicFile::create(&dest).unwrap();
        writeln!(file, "OTUId\tA").unwrap();
        file.flush().unwrap();
        assert!(!dest.exists());

        file.commit().unwrap();
        assert_eq!(std::fs::read_to_string(&dest).unwrap(), "OTUId\tA\n");
    }

    #[test]
    fn dropped_atomic_file_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("partial.tsv");
        {
            let mut file = AtomicFile::create(&dest).unwrap();
            writeln!(file, "half").unwrap();
        }
        assert!(!dest.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn plain_fastq_validation() {
        let dir = tempfile::tempdir().unwrap();

        let good = dir.path().join("A_S1_L001_R1_001.fastq");
        std::fs::write(&good, "@r\nA\n+\nI\n").unwrap();
        assert!(check_plain_fastq(&good).is_ok());

        let empty = dir.path().join("E_S1_L001_R1_001.fastq");
        std::fs::write(&empty, "").unwrap();
        assert!(check_plain_fastq(&empty).is_ok());

        let zipped = dir.path().join("Z_S1_L001_R1_001.fastq");
        std::fs::write(&zipped, [0x1f, 0x8b, 0x08, 0x00]).unwrap();
        assert!(matches!(check_plain_fastq(&zipped), Err(PipelineError::InputFormat { .. })));

        let fasta = dir.path().join("F_S1_L001_R1_001.fastq");
        std::fs::write(&fasta, ">r\nA\n").unwrap();
        assert!(matches!(check_plain_fastq(&fasta), Err(PipelineError::InputFormat { .. })));

        let missing = dir.path().join("M_S1_L001_R2_001.fastq");
        assert!(matches!(check_plain_fastq(&missing), Err(PipelineError::MissingInput { .. })));
    }

    #[test]
    fn distinct_files() {
        assert!(check_distinct_files("a.fastq", Some("b.fastq")).is_ok());
        assert!(check_distinct_files("a.fastq", None::<&str>).is_ok());
        assert!(check_distinct_files("a.fastq", Some("a.fastq")).is_err());
    }
}
