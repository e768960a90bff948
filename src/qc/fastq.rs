use crate::io::{FastqRecord, MateRole};

/// The header segment that carries a sample's barcode label.
pub const BARCODE_LABEL_KEY: &[u8] = b";barcodelabel=";

/// Primer lengths to clip from the start of each mate.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PrimerLengths {
    pub forward: usize,
    pub reverse: usize,
}

impl PrimerLengths {
    /// The primer length configured for the given mate.
    #[inline]
    pub fn for_mate(&self, mate: MateRole) -> usize {
        match mate {
            MateRole::Forward => self.forward,
            MateRole::Reverse => self.reverse,
        }
    }
}

impl Default for PrimerLengths {
    fn default() -> Self {
        PrimerLengths {
            forward: 17,
            reverse: 21,
        }
    }
}

/// Finds the barcode label inside a header or read label: the text after
/// `;barcodelabel=` up to the next `;` or the end.
pub fn find_barcode_label(label: &[u8]) -> Option<&[u8]> {
    let start = label
        .windows(BARCODE_LABEL_KEY.len())
        .position(|w| w == BARCODE_LABEL_KEY)?
        + BARCODE_LABEL_KEY.len();
    let rest = &label[start..];
    let end = rest.iter().position(|&b| b == b';').unwrap_or(rest.len());
    Some(&rest[..end])
}

pub(crate) trait ReadTransforms {
    /// Drops the first `n_bases` of the sequence and quality. The header and
    /// separator are untouched. Asking for at least the whole read leaves an
    /// empty record, which downstream length filtering discards.
    fn trim_primer(&mut self, n_bases: usize) -> &mut Self;

    /// Trims the primer configured for the record's mate. Records without a
    /// mate role are left unchanged.
    fn trim_primer_for_mate(&mut self, primers: &PrimerLengths) -> &mut Self;

    /// The barcode label already present in the header, if any.
    fn barcode_label(&self) -> Option<&[u8]>;

    /// Appends `;barcodelabel=<sample_id>` to the header unless it already
    /// carries a label. Returns whether the header changed.
    fn tag_barcode(&mut self, sample_id: &str) -> bool;
}

impl ReadTransforms for FastqRecord {
    #[inline]
    fn trim_primer(&mut self, n_bases: usize) -> &mut Self {
        let n = n_bases.min(self.sequence.len());
        self.sequence.drain(..n);
        self.quality.drain(..n.min(self.quality.len()));
        self
    }

    #[inline]
    fn trim_primer_for_mate(&mut self, primers: &PrimerLengths) -> &mut Self {
        match self.mate {
            Some(mate) => self.trim_primer(primers.for_mate(mate)),
            None => self,
        }
    }

    #[inline]
    fn barcode_label(&self) -> Option<&[u8]> {
        find_barcode_label(&self.header)
    }

    #[inline]
    fn tag_barcode(&mut self, sample_id: &str) -> bool {
        if self.barcode_label().is_some() {
            return false;
        }
        self.header.extend_from_slice(BARCODE_LABEL_KEY);
        self.header.extend_from_slice(sample_id.as_bytes());
        true
    }
}
