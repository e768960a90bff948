//! Line-oriented FASTQ records.
//!
//! [`FastqReader`] walks the fixed four-line cycle with an explicit
//! [`ParseState`] machine, so every malformed line is reported with the line
//! number and byte offset at which the cycle broke. Fields are kept as raw
//! bytes, and [`FastqWriter`] writes them back unchanged, so a record that is
//! read and written without modification is byte-identical (apart from a
//! stripped `\r` on CRLF input).

use crate::error::{PipelineError, WithPathExt};
use std::{
    fmt::Display,
    fs::File,
    io::{BufRead, BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};
use thiserror::Error;

/// The first byte of every FASTQ header line.
pub const RECORD_START: u8 = b'@';
/// The first byte of every FASTQ separator line.
pub const SEPARATOR_START: u8 = b'+';

/// Which mate of a read pair a record came from.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum MateRole {
    Forward,
    Reverse,
}

impl Display for MateRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MateRole::Forward => f.write_str("forward"),
            MateRole::Reverse => f.write_str("reverse"),
        }
    }
}

/// A single FASTQ record.
///
/// `header` includes the leading `@` and `separator` includes the leading `+`
/// (and any repeated title), so both can be written back verbatim. The
/// sequence and quality always have equal length when produced by
/// [`FastqReader`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FastqRecord {
    pub header:    Vec<u8>,
    pub sequence:  Vec<u8>,
    pub separator: Vec<u8>,
    pub quality:   Vec<u8>,
    /// The mate this record was read as. Merged reads have no mate.
    pub mate:      Option<MateRole>,
}

impl FastqRecord {
    /// Creates a record with a bare `+` separator and no mate role.
    pub fn new(header: impl Into<Vec<u8>>, sequence: impl Into<Vec<u8>>, quality: impl Into<Vec<u8>>) -> Self {
        FastqRecord {
            header:    header.into(),
            sequence:  sequence.into(),
            separator: vec![SEPARATOR_START],
            quality:   quality.into(),
            mate:      None,
        }
    }

    /// The header without its leading `@`, lossily decoded.
    pub fn label(&self) -> std::borrow::Cow<'_, str> {
        let bytes = self.header.strip_prefix(&[RECORD_START]).unwrap_or(&self.header);
        String::from_utf8_lossy(bytes)
    }

    /// The number of bases in the record.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.sequence.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sequence.is_empty()
    }

    /// Writes the record as four newline-terminated lines.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        writer.write_all(&self.header)?;
        writer.write_all(b"\n")?;
        writer.write_all(&self.sequence)?;
        writer.write_all(b"\n")?;
        writer.write_all(&self.separator)?;
        writer.write_all(b"\n")?;
        writer.write_all(&self.quality)?;
        writer.write_all(b"\n")
    }
}

/// The position inside the four-line FASTQ cycle.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ParseState {
    Header,
    Sequence,
    Separator,
    Quality,
}

impl ParseState {
    /// The state expected for the following line.
    #[inline]
    #[must_use]
    pub fn next(self) -> Self {
        match self {
            ParseState::Header => ParseState::Sequence,
            ParseState::Sequence => ParseState::Separator,
            ParseState::Separator => ParseState::Quality,
            ParseState::Quality => ParseState::Header,
        }
    }

    fn expected(self) -> &'static str {
        match self {
            ParseState::Header => "a header line starting with '@'",
            ParseState::Sequence => "a sequence line",
            ParseState::Separator => "a separator line starting with '+'",
            ParseState::Quality => "a quality line",
        }
    }
}

/// An error produced while parsing FASTQ.
#[derive(Debug, Error)]
pub enum FastqError {
    /// The four-line cycle was broken. `line` is 1-based and `offset` is the
    /// byte offset at which the offending line starts.
    #[error("line {line} (byte offset {offset}): {detail}")]
    Format { line: usize, offset: u64, detail: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl FastqError {
    /// Attaches the path of the file being parsed.
    pub fn at_path(self, path: impl AsRef<Path>) -> PipelineError {
        match self {
            format @ FastqError::Format { .. } => PipelineError::input_format(path.as_ref(), format.to_string()),
            FastqError::Io(source) => PipelineError::io(path.as_ref(), source),
        }
    }
}

/// A lazy iterator of [`FastqRecord`] over any buffered reader.
///
/// Iteration stops permanently after the first error.
pub struct FastqReader<R> {
    reader:      R,
    state:       ParseState,
    line:        Vec<u8>,
    line_number: usize,
    offset:      u64,
    blank_at:    Option<(usize, u64)>,
    mate:        Option<MateRole>,
    failed:      bool,
}

impl<R: BufRead> FastqReader<R> {
    pub fn new(reader: R) -> Self {
        FastqReader {
            reader,
            state: ParseState::Header,
            line: Vec::new(),
            line_number: 0,
            offset: 0,
            blank_at: None,
            mate: None,
            failed: false,
        }
    }

    /// Tags every parsed record with the given mate role.
    #[must_use]
    pub fn with_mate(mut self, mate: MateRole) -> Self {
        self.mate = Some(mate);
        self
    }

    /// The number of lines consumed so far.
    #[inline]
    pub fn line_number(&self) -> usize {
        self.line_number
    }

    /// Reads the next line into `self.line` without its line terminator,
    /// returning the line's 1-based number and starting byte offset.
    fn read_line(&mut self) -> Result<Option<(usize, u64)>, FastqError> {
        self.line.clear();
        let n = self.reader.read_until(b'\n', &mut self.line)?;
        if n == 0 {
            return Ok(None);
        }

        let start = self.offset;
        self.offset += n as u64;
        self.line_number += 1;

        if self.line.last() == Some(&b'\n') {
            self.line.pop();
            if self.line.last() == Some(&b'\r') {
                self.line.pop();
            }
        }
        Ok(Some((self.line_number, start)))
    }

    fn format_error(line: usize, offset: u64, detail: impl Into<String>) -> FastqError {
        FastqError::Format {
            line,
            offset,
            detail: detail.into(),
        }
    }

    fn next_record(&mut self) -> Result<Option<FastqRecord>, FastqError> {
        let mut header = Vec::new();
        let mut sequence = Vec::new();
        let mut separator = Vec::new();

        loop {
            let Some((line, offset)) = self.read_line()? else {
                return match self.state {
                    ParseState::Header => Ok(None),
                    state => Err(Self::format_error(
                        self.line_number + 1,
                        self.offset,
                        format!("unexpected end of input, expected {}", state.expected()),
                    )),
                };
            };

            match self.state {
                ParseState::Header => {
                    if self.line.is_empty() {
                        self.blank_at.get_or_insert((line, offset));
                        continue;
                    }
                    if let Some((blank_line, blank_offset)) = self.blank_at {
                        return Err(Self::format_error(
                            blank_line,
                            blank_offset,
                            "blank line between records",
                        ));
                    }
                    if self.line[0] != RECORD_START {
                        return Err(Self::format_error(
                            line,
                            offset,
                            format!("expected {}", ParseState::Header.expected()),
                        ));
                    }
                    header = std::mem::take(&mut self.line);
                }
                ParseState::Sequence => {
                    sequence = std::mem::take(&mut self.line);
                }
                ParseState::Separator => {
                    if self.line.first() != Some(&SEPARATOR_START) {
                        return Err(Self::format_error(
                            line,
                            offset,
                            format!("expected {}", ParseState::Separator.expected()),
                        ));
                    }
                    separator = std::mem::take(&mut self.line);
                }
                ParseState::Quality => {
                    if self.line.len() != sequence.len() {
                        return Err(Self::format_error(
                            line,
                            offset,
                            format!(
                                "quality length {q} does not match sequence length {s}",
                                q = self.line.len(),
                                s = sequence.len()
                            ),
                        ));
                    }
                    self.state = ParseState::Header;
                    return Ok(Some(FastqRecord {
                        header,
                        sequence,
                        separator,
                        quality: std::mem::take(&mut self.line),
                        mate: self.mate,
                    }));
                }
            }

            self.state = self.state.next();
        }
    }
}

impl<R: BufRead> Iterator for FastqReader<R> {
    type Item = Result<FastqRecord, FastqError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.next_record() {
            Ok(record) => record.map(Ok),
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

/// A FASTQ file on disk that can be iterated any number of times.
#[derive(Clone, Debug)]
pub struct FastqFile {
    path: PathBuf,
    mate: Option<MateRole>,
}

impl FastqFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FastqFile {
            path: path.into(),
            mate: None,
        }
    }

    #[must_use]
    pub fn with_mate(mut self, mate: MateRole) -> Self {
        self.mate = Some(mate);
        self
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Opens a fresh pass over the records of the file.
    ///
    /// ## Errors
    ///
    /// IO errors when opening the file are propagated with the path attached.
    pub fn records(&self) -> Result<FastqReader<BufReader<File>>, PipelineError> {
        let file = File::open(&self.path).with_path(&self.path)?;
        let reader = FastqReader::new(BufReader::new(file));
        Ok(match self.mate {
            Some(mate) => reader.with_mate(mate),
            None => reader,
        })
    }

    /// Counts the records in the file, validating each one.
    pub fn count_records(&self) -> Result<usize, PipelineError> {
        self.records()?.try_fold(0, |n, record| {
            record.map(|_| n + 1).map_err(|e| e.at_path(&self.path))
        })
    }
}

/// A buffered FASTQ writer that counts the records written.
pub struct FastqWriter<W: Write> {
    writer:  W,
    written: usize,
}

impl<W: Write> FastqWriter<W> {
    pub fn new(writer: W) -> Self {
        FastqWriter { writer, written: 0 }
    }

    /// Writes one record, keeping the four-line grouping.
    #[inline]
    pub fn write_record(&mut self, record: &FastqRecord) -> std::io::Result<()> {
        record.write_to(&mut self.writer)?;
        self.written += 1;
        Ok(())
    }

    /// Writes every record of an iterator.
    pub fn write_records<'a, I>(&mut self, records: I) -> std::io::Result<()>
    where
        I: IntoIterator<Item = &'a FastqRecord>, {
        records.into_iter().try_for_each(|r| self.write_record(r))
    }

    #[inline]
    pub fn written(&self) -> usize {
        self.written
    }

    /// Flushes and returns the inner writer with the record count.
    pub fn finish(mut self) -> std::io::Result<(W, usize)> {
        self.writer.flush()?;
        Ok((self.writer, self.written))
    }
}

impl FastqWriter<BufWriter<File>> {
    /// Creates or truncates `path`.
    pub fn create(path: impl AsRef<Path>) -> Result<Self, PipelineError> {
        let file = File::create(&path).with_path(&path)?;
        Ok(FastqWriter::new(BufWriter::new(file)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn parse(data: &[u8]) -> Vec<Result<FastqRecord, FastqError>> {
        FastqReader::new(Cursor::new(data.to_vec())).collect()
    }

    #[test]
    fn parses_records_and_round_trips_bytes() {
        let data = b"@r1 1:N:0:1\nACGT\n+r1 1:N:0:1\nIIII\n@r2\nGG\n+\n#!\n";
        let records: Vec<_> = parse(data).into_iter().map(Result::unwrap).collect();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].header, b"@r1 1:N:0:1");
        assert_eq!(records[0].separator, b"+r1 1:N:0:1");
        assert_eq!(records[1].sequence, b"GG");
        assert_eq!(records[1].label(), "r2");

        let mut writer = FastqWriter::new(Vec::new());
        writer.write_records(&records).unwrap();
        let (out, n) = writer.finish().unwrap();
        assert_eq!(n, 2);
        assert_eq!(out, data);
    }

    #[test]
    fn strips_crlf_and_accepts_missing_final_newline() {
        let records: Vec<_> = parse(b"@r1\r\nAC\r\n+\r\nII").into_iter().map(Result::unwrap).collect();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].sequence, b"AC");
        assert_eq!(records[0].quality, b"II");
    }

    #[test]
    fn empty_input_has_no_records() {
        assert!(parse(b"").is_empty());
        assert!(parse(b"\n\n").is_empty());
    }

    #[test]
    fn trailing_blank_lines_are_tolerated() {
        let records = parse(b"@r1\nA\n+\nI\n\n\n");
        assert_eq!(records.len(), 1);
        assert!(records[0].is_ok());
    }

    #[test]
    fn reports_offending_line_and_offset() {
        let data = b"@r1\nACGT\n+\nIIII\nr2\nAC\n+\nII\n";
        let results = parse(data);
        assert_eq!(results.len(), 2);
        match &results[1] {
            Err(FastqError::Format { line, offset, .. }) => {
                assert_eq!(*line, 5);
                assert_eq!(*offset, 16);
            }
            other => panic!("expected a format error, got {other:?}"),
        }
    }

    #[test]
    fn rejects_bad_separator_and_length_mismatch() {
        let bad_sep = parse(b"@r1\nACGT\n-\nIIII\n");
        assert!(matches!(bad_sep[0], Err(FastqError::Format { line: 3, .. })));

        let mismatch = parse(b"@r1\nACGT\n+\nIII\n");
        assert!(matches!(mismatch[0], Err(FastqError::Format { line: 4, .. })));
    }

    #[test]
    fn rejects_truncated_record_and_inner_blank_line() {
        let truncated = parse(b"@r1\nACGT\n+\n");
        assert!(matches!(truncated[0], Err(FastqError::Format { line: 4, offset: 11, .. })));

        let blank = parse(b"@r1\nA\n+\nI\n\n@r2\nA\n+\nI\n");
        assert!(matches!(blank[1], Err(FastqError::Format { line: 5, .. })));
        assert_eq!(blank.len(), 2);
    }

    #[test]
    fn state_machine_cycles() {
        let mut state = ParseState::Header;
        for _ in 0..4 {
            state = state.next();
        }
        assert_eq!(state, ParseState::Header);
        assert_eq!(ParseState::Sequence.next(), ParseState::Separator);
    }

    #[test]
    fn file_is_restartable_and_tags_mates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x_R2_001.fastq");
        std::fs::write(&path, b"@a\nAC\n+\nII\n@b\nGT\n+\nII\n").unwrap();

        let file = FastqFile::new(&path).with_mate(MateRole::Reverse);
        assert_eq!(file.count_records().unwrap(), 2);
        let first_pass: Vec<_> = file.records().unwrap().map(Result::unwrap).collect();
        let second_pass: Vec<_> = file.records().unwrap().map(Result::unwrap).collect();
        assert_eq!(first_pass, second_pass);
        assert!(first_pass.iter().all(|r| r.mate == Some(MateRole::Reverse)));
    }
}
