use crate::error::{PipelineError, WithPathExt};
use std::path::Path;
use zoe::{data::fasta::FastaSeq, prelude::FastaReader};

/// The record id of a FASTA header: the name up to the first whitespace or `;`
/// annotation, so `OTU_3;size=12;` yields `OTU_3`.
#[inline]
pub fn fasta_id(name: &str) -> &str {
    name.split(|c: char| c == ';' || c.is_ascii_whitespace())
        .next()
        .unwrap_or_default()
}

/// Reads every record of a FASTA file, such as the OTU centroids.
///
/// ## Errors
///
/// IO and parse errors are propagated with the path attached.
pub fn read_fasta(path: impl AsRef<Path>) -> Result<Vec<FastaSeq>, PipelineError> {
    let path = path.as_ref();
    FastaReader::from_filename(path)
        .with_path(path)?
        .collect::<Result<Vec<_>, _>>()
        .with_path(path)
}
