// Description:      Appends a sample barcode label to every read header of a
//                   merged FASTQ file.

use crate::{
    error::PipelineError,
    io::{FastqFile, WriteFileStdout, check_distinct_files, check_plain_fastq},
    qc::{ReadTransforms, rewrite_fastq},
    utils::paired_reads::sample_id_from,
};
use clap::Args;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Args, Debug)]
pub struct TaggerArgs {
    /// Path to the uncompressed merged .fastq file
    pub fastq_input_file: PathBuf,

    #[arg(short = 's', long)]
    /// The barcode label to append. Defaults to the first underscore-delimited
    /// token of the input file name
    pub sample_id: Option<String>,

    #[arg(short = 'o', long = "fastq-output")]
    /// Output filepath for tagged reads. Tagged reads print to STDOUT if not
    /// provided
    pub fastq_output_file: Option<PathBuf>,
}

/// Sub-program for tagging one FASTQ file with its sample's barcode label.
pub fn tagger_process(args: TaggerArgs) -> Result<(), std::io::Error> {
    let sample_id = match args.sample_id {
        Some(id) => id,
        None => sample_id_from(&args.fastq_input_file).ok_or_else(|| {
            PipelineError::Config(format!(
                "cannot derive a sample id from {}; pass --sample-id",
                args.fastq_input_file.display()
            ))
        })?,
    };

    let (written, tagged) = tag_file(&args.fastq_input_file, args.fastq_output_file.as_deref(), &sample_id)?;
    info!(sample = %sample_id, records = written, tagged, "tagged reads written");
    Ok(())
}

/// Returns the records written and how many of them gained a label.
fn tag_file(input: &Path, output: Option<&Path>, sample_id: &str) -> Result<(usize, usize), PipelineError> {
    check_plain_fastq(input)?;
    check_distinct_files(input, output)?;

    let mut tagged = 0;
    let writer = WriteFileStdout::open(output)?;
    let (writer, written) = rewrite_fastq(
        &FastqFile::new(input),
        writer,
        output.unwrap_or(Path::new("<stdout>")),
        |read| {
            if read.tag_barcode(sample_id) {
                tagged += 1;
            }
        },
    )?;
    writer.finish()?;
    Ok((written, tagged))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_only_untagged_headers() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("S7_L001_merged.fastq");
        std::fs::write(&input, "@r1 1:N:0:1\nACGT\n+\nIIII\n@r2;barcodelabel=S7\nGGCC\n+r2\nIIII\n").unwrap();

        let output = dir.path().join("rehead.fastq");
        assert_eq!(tag_file(&input, Some(&output), "S7").unwrap(), (2, 1));
        assert_eq!(
            std::fs::read_to_string(&output).unwrap(),
            "@r1 1:N:0:1;barcodelabel=S7\nACGT\n+\nIIII\n@r2;barcodelabel=S7\nGGCC\n+r2\nIIII\n"
        );

        // Tagging the output again changes nothing.
        let again = dir.path().join("rehead2.fastq");
        assert_eq!(tag_file(&output, Some(&again), "S7").unwrap(), (2, 0));
        assert_eq!(std::fs::read(&output).unwrap(), std::fs::read(&again).unwrap());
    }
}
