// Description:      Clips the primer from the start of every read in a FASTQ
//                   file.

use crate::{
    error::PipelineError,
    io::{FastqFile, MateRole, WriteFileStdout, check_distinct_files, check_plain_fastq},
    qc::{PrimerLengths, ReadTransforms, rewrite_fastq},
};
use clap::{Args, ValueEnum, builder::PossibleValue};
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Args, Debug)]
pub struct TrimmerArgs {
    /// Path to the uncompressed .fastq file to be trimmed
    pub fastq_input_file: PathBuf,

    #[arg(short = 'o', long = "fastq-output")]
    /// Output filepath for trimmed reads. Trimmed reads print to STDOUT if not
    /// provided
    pub fastq_output_file: Option<PathBuf>,

    #[arg(short = 'm', long, value_enum, default_value = "f")]
    /// Which mate the reads are: 'f' (forward) or 'r' (reverse). Selects the
    /// default primer length
    pub mate: MateRole,

    #[arg(short = 'n', long)]
    /// Number of bases to clip. Defaults to 17 for forward reads and 21 for
    /// reverse reads
    pub primer_length: Option<usize>,
}

// Allows case insensitivity for mates
impl ValueEnum for MateRole {
    #[inline]
    fn value_variants<'a>() -> &'a [Self] {
        &[Self::Forward, Self::Reverse]
    }

    #[inline]
    fn to_possible_value(&self) -> Option<PossibleValue> {
        match self {
            MateRole::Forward => Some(PossibleValue::new("f").aliases(["F", "forward", "r1", "R1"])),
            MateRole::Reverse => Some(PossibleValue::new("r").aliases(["R", "reverse", "r2", "R2"])),
        }
    }
}

/// Sub-program for trimming primers from one FASTQ file.
pub fn trimmer_process(args: TrimmerArgs) -> Result<(), std::io::Error> {
    let written = trim_file(
        &args.fastq_input_file,
        args.fastq_output_file.as_deref(),
        args.mate,
        args.primer_length,
    )?;
    info!(records = written, "trimmed reads written");
    Ok(())
}

fn trim_file(
    input: &Path, output: Option<&Path>, mate: MateRole, primer_length: Option<usize>,
) -> Result<usize, PipelineError> {
    check_plain_fastq(input)?;
    check_distinct_files(input, output)?;

    let mut primers = PrimerLengths::default();
    if let Some(n) = primer_length {
        primers = PrimerLengths { forward: n, reverse: n };
    }

    let writer = WriteFileStdout::open(output)?;
    let (writer, written) = rewrite_fastq(
        &FastqFile::new(input).with_mate(mate),
        writer,
        output.unwrap_or(Path::new("<stdout>")),
        |read| {
            read.trim_primer_for_mate(&primers);
        },
    )?;
    writer.finish()?;
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trims_by_mate_or_explicit_length() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("A_S1_L001_R2_001.fastq");
        let sequence = "ACGTACGTACGTACGTACGTACGTAC";
        std::fs::write(&input, format!("@r1 2:N:0:1\n{sequence}\n+\n{}\n", "F".repeat(sequence.len()))).unwrap();

        let output = dir.path().join("trimmed.fastq");
        assert_eq!(trim_file(&input, Some(&output), MateRole::Reverse, None).unwrap(), 1);
        assert_eq!(
            std::fs::read_to_string(&output).unwrap(),
            format!("@r1 2:N:0:1\n{}\n+\n{}\n", &sequence[21..], "F".repeat(5))
        );

        assert_eq!(trim_file(&input, Some(&output), MateRole::Reverse, Some(4)).unwrap(), 1);
        assert!(std::fs::read_to_string(&output).unwrap().contains(&sequence[4..]));

        assert!(trim_file(&input, Some(&input), MateRole::Forward, None).is_err());
    }
}
