//! A [`ToolRunner`] that imitates the external engines in-process, so that
//! the stages around them can be tested end to end.

use super::{ToolInvocation, ToolKind, ToolRunner};
use crate::{
    error::{PipelineError, WithPathExt},
    io::{FastqFile, FastqRecord, FastqWriter, read_fasta},
    utils::CancelToken,
};
use std::{
    fs::File,
    io::{BufWriter, Write},
    path::Path,
    sync::Mutex,
};

/// Imitates each tool with a simple deterministic rule:
///
/// * adapter removal drops pairs whose forward read contains the `-a` adapter
///   or whose reverse read contains the `-A` adapter
/// * merging concatenates the forward and reverse sequences
/// * dereplication counts exact duplicates, sorting keeps sizes of at least
///   `-minsize`
/// * every unique sequence becomes its own OTU, and reads map to the OTU with
///   the identical sequence
/// * classification gives every centroid the same lineage
#[derive(Debug, Default)]
pub(crate) struct ScriptedRunner {
    fail:  Option<(ToolKind, i32)>,
    calls: Mutex<Vec<ToolKind>>,
}

pub(crate) const SCRIPTED_LINEAGE: &str = "Bacteria;Firmicutes;Bacilli";

impl ScriptedRunner {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Makes every call of `kind` exit with `code`.
    pub(crate) fn failing(kind: ToolKind, code: i32) -> Self {
        ScriptedRunner {
            fail: Some((kind, code)),
            ..Self::default()
        }
    }

    pub(crate) fn calls(&self) -> Vec<ToolKind> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

impl ToolRunner for ScriptedRunner {
    fn run(&self, invocation: &ToolInvocation, cancel: &CancelToken) -> Result<(), PipelineError> {
        cancel.check(&invocation.tool)?;
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(invocation.kind);
        }

        if let Some((kind, code)) = self.fail
            && kind == invocation.kind
        {
            return Err(PipelineError::ExternalTool {
                tool: invocation.tool.clone(),
                code: Some(code),
            });
        }

        let number = |flag: &str| -> usize {
            invocation
                .flag_value(flag)
                .and_then(|v| v.to_str())
                .and_then(|v| v.parse().ok())
                .unwrap_or(0)
        };
        let text = |flag: &str| -> Vec<u8> {
            invocation
                .flag_value(flag)
                .map(|v| v.to_string_lossy().into_owned().into_bytes())
                .unwrap_or_default()
        };

        let ins = &invocation.inputs;
        let outs = &invocation.outputs;
        match invocation.kind {
            ToolKind::AdapterRemoval => remove_adapters(&ins[0], &ins[1], &outs[0], &outs[1], &text("-a"), &text("-A")),
            ToolKind::MergePairs => merge_pairs(&ins[0], &ins[1], &outs[0]),
            ToolKind::Dereplicate => dereplicate(&ins[0], &outs[0], number("-minseqlength")),
            ToolKind::SortBySize => sort_by_size(&ins[0], &outs[0], number("-minsize")),
            ToolKind::ClusterOtus => cluster(&ins[0], &outs[0], &outs[1]),
            ToolKind::MapReads => map_reads(&ins[0], &ins[1], &outs[0]),
            ToolKind::Classify => classify(&ins[1], &outs[0]),
        }
    }
}

fn read_all(path: &Path) -> Result<Vec<FastqRecord>, PipelineError> {
    FastqFile::new(path)
        .records()?
        .map(|r| r.map_err(|e| e.at_path(path)))
        .collect()
}

fn write_all<'a>(path: &Path, records: impl IntoIterator<Item = &'a FastqRecord>) -> Result<(), PipelineError> {
    let mut writer = FastqWriter::create(path)?;
    writer.write_records(records).with_path(path)?;
    writer.finish().with_path(path)?;
    Ok(())
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    !needle.is_empty() && haystack.windows(needle.len()).any(|w| w == needle)
}

fn size_of(record: &FastqRecord) -> usize {
    record
        .label()
        .split(';')
        .find_map(|f| f.strip_prefix("size="))
        .and_then(|n| n.parse().ok())
        .unwrap_or(1)
}

fn remove_adapters(
    forward: &Path, reverse: &Path, forward_out: &Path, reverse_out: &Path, adapter: &[u8], adapter2: &[u8],
) -> Result<(), PipelineError> {
    let (kept_forward, kept_reverse): (Vec<_>, Vec<_>) = read_all(forward)?
        .into_iter()
        .zip(read_all(reverse)?)
        .filter(|(f, r)| !contains(&f.sequence, adapter) && !contains(&r.sequence, adapter2))
        .unzip();
    write_all(forward_out, &kept_forward)?;
    write_all(reverse_out, &kept_reverse)
}

fn merge_pairs(forward: &Path, reverse: &Path, merged: &Path) -> Result<(), PipelineError> {
    let merged_reads: Vec<_> = read_all(forward)?
        .into_iter()
        .zip(read_all(reverse)?)
        .map(|(mut f, r)| {
            f.sequence.extend_from_slice(&r.sequence);
            f.quality.extend_from_slice(&r.quality);
            f.separator = b"+".to_vec();
            f
        })
        .collect();
    write_all(merged, &merged_reads)
}

fn dereplicate(corpus: &Path, derep: &Path, min_len: usize) -> Result<(), PipelineError> {
    let mut uniques: Vec<(FastqRecord, usize)> = Vec::new();
    for read in read_all(corpus)? {
        if read.len() < min_len {
            continue;
        }
        match uniques.iter_mut().find(|(u, _)| u.sequence == read.sequence) {
            Some((_, n)) => *n += 1,
            None => uniques.push((read, 1)),
        }
    }

    let annotated: Vec<_> = uniques
        .into_iter()
        .enumerate()
        .map(|(i, (read, n))| FastqRecord::new(format!("@Uniq{};size={n};", i + 1), read.sequence, read.quality))
        .collect();
    write_all(derep, &annotated)
}

fn sort_by_size(derep: &Path, sorted: &Path, min_size: usize) -> Result<(), PipelineError> {
    let mut uniques: Vec<_> = read_all(derep)?.into_iter().filter(|u| size_of(u) >= min_size).collect();
    uniques.sort_by_key(|u| std::cmp::Reverse(size_of(u)));
    write_all(sorted, &uniques)
}

fn cluster(sorted: &Path, centroids: &Path, report: &Path) -> Result<(), PipelineError> {
    let mut fasta = BufWriter::new(File::create(centroids).with_path(centroids)?);
    let mut uparse = BufWriter::new(File::create(report).with_path(report)?);
    for (i, unique) in read_all(sorted)?.iter().enumerate() {
        let size = size_of(unique);
        writeln!(fasta, ">OTU_{};size={size};", i + 1).with_path(centroids)?;
        fasta.write_all(&unique.sequence).with_path(centroids)?;
        writeln!(fasta).with_path(centroids)?;
        writeln!(uparse, "{}\totu\t*\t*\tOTU_{}", unique.label(), i + 1).with_path(report)?;
    }
    fasta.flush().with_path(centroids)?;
    uparse.flush().with_path(report)
}

fn map_reads(corpus: &Path, centroids: &Path, readmap: &Path) -> Result<(), PipelineError> {
    let otus = read_fasta(centroids)?;
    let mut uc = BufWriter::new(File::create(readmap).with_path(readmap)?);
    for read in read_all(corpus)? {
        let label = read.label();
        let line = match otus.iter().position(|otu| otu.sequence == read.sequence) {
            Some(i) => format!(
                "H\t{i}\t{len}\t100.0\t+\t0\t0\t{len}M\t{label}\t{target}",
                len = read.len(),
                target = otus[i].name
            ),
            None => format!("N\t*\t*\t*\t*\t*\t*\t*\t{label}\t*"),
        };
        writeln!(uc, "{line}").with_path(readmap)?;
    }
    uc.flush().with_path(readmap)
}

fn classify(centroids: &Path, report: &Path) -> Result<(), PipelineError> {
    let mut out = BufWriter::new(File::create(report).with_path(report)?);
    for otu in read_fasta(centroids)? {
        write!(out, "{}\t\tRoot\trootrank\t1.0", otu.name).with_path(report)?;
        for (name, rank) in SCRIPTED_LINEAGE.split(';').zip(["domain", "phylum", "class"]) {
            write!(out, "\t{name}\t{rank}\t0.97").with_path(report)?;
        }
        writeln!(out).with_path(report)?;
    }
    out.flush().with_path(report)
}
