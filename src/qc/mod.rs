//! The in-process read transforms: primer trimming and barcode tagging.

use crate::{
    error::{PipelineError, WithPathExt},
    io::{FastqFile, FastqRecord, FastqWriter},
};
use std::{io::Write, path::Path};

pub mod fastq;

pub use fastq::{BARCODE_LABEL_KEY, PrimerLengths, find_barcode_label};
pub(crate) use fastq::ReadTransforms;

/// Streams every record of `input` through `edit` and writes the result to
/// `writer`, returning the number of records written.
///
/// ## Errors
///
/// Parse errors are reported against the input path and write errors against
/// `output_name`.
pub(crate) fn rewrite_fastq<W, F>(
    input: &FastqFile, writer: W, output_name: &Path, mut edit: F,
) -> Result<(W, usize), PipelineError>
where
    W: Write,
    F: FnMut(&mut FastqRecord), {
    let mut writer = FastqWriter::new(writer);
    for record in input.records()? {
        let mut record = record.map_err(|e| e.at_path(input.path()))?;
        edit(&mut record);
        writer.write_record(&record).with_path(output_name)?;
    }
    writer.finish().with_path(output_name)
}

/// Like [`rewrite_fastq`], writing to a new file at `output`.
pub(crate) fn rewrite_fastq_file<F>(input: &FastqFile, output: &Path, edit: F) -> Result<usize, PipelineError>
where
    F: FnMut(&mut FastqRecord), {
    let file = std::fs::File::create(output).with_path(output)?;
    let (_, written) = rewrite_fastq(input, std::io::BufWriter::new(file), output, edit)?;
    Ok(written)
}
