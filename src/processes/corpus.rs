use crate::{
    error::{PipelineError, WithPathExt},
    io::AtomicFile,
    utils::{ReadPair, paired_reads::sample_ids},
};
use std::{
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
};
use tracing::info;

/// The tagged reads of every sample, concatenated in discovery order.
#[derive(Clone, Debug)]
pub struct Corpus {
    pub path:       PathBuf,
    pub records:    usize,
    /// Tagged record counts per sample id, in discovery order.
    pub per_sample: Vec<(String, usize)>,
}

impl Corpus {
    /// Appends the tagged output of every pair, verbatim and in order, to a new
    /// corpus file at `dest`. The file only appears once it is complete.
    ///
    /// ## Errors
    ///
    /// Every pair must be at [`JobStage::Tagged`](crate::utils::JobStage);
    /// otherwise a [`PipelineError::Stage`] error is returned and nothing is
    /// written.
    pub fn combine(pairs: &[ReadPair], dest: impl AsRef<Path>) -> Result<Self, PipelineError> {
        let dest = dest.as_ref();
        let tagged = pairs
            .iter()
            .map(ReadPair::tagged_output)
            .collect::<Result<Vec<_>, _>>()?;

        let mut out = AtomicFile::create(dest)?;
        for path in tagged {
            let mut reader = BufReader::new(File::open(path).with_path(path)?);
            std::io::copy(&mut reader, &mut out).with_path(dest)?;
        }
        let path = out.commit()?;

        let per_sample = sample_ids(pairs)
            .into_iter()
            .map(|id| {
                let n = pairs
                    .iter()
                    .filter(|p| p.sample_id == id)
                    .map(ReadPair::tagged_records)
                    .sum::<usize>();
                (id, n)
            })
            .collect::<Vec<_>>();
        let records = per_sample.iter().map(|(_, n)| *n).sum::<usize>();

        info!(path = %path.display(), records, samples = per_sample.len(), "corpus written");
        Ok(Corpus {
            path,
            records,
            per_sample,
        })
    }

    /// The sample ids the corpus was built from, in discovery order.
    pub fn sample_ids(&self) -> Vec<String> {
        self.per_sample.iter().map(|(id, _)| id.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        io::{FastqFile, FastqRecord, FastqWriter},
        utils::JobStage,
    };

    fn tagged_pair(dir: &Path, forward: &str, reads: &[&str]) -> ReadPair {
        let mut pair = ReadPair::from_forward(dir.join(forward)).unwrap();
        let path = dir.join(forward.replace(".fastq", "_rehead.fastq"));
        let mut writer = FastqWriter::create(&path).unwrap();
        for (i, seq) in reads.iter().enumerate() {
            let header = format!("@read{i};barcodelabel={}", pair.sample_id);
            let record = FastqRecord::new(header, seq.as_bytes(), vec![b'I'; seq.len()]);
            writer.write_record(&record).unwrap();
        }
        let (_, n) = writer.finish().unwrap();

        pair.push_artifact(JobStage::Tagged, None, path);
        pair.set_tagged_records(n);
        pair.set_stage(JobStage::Tagged);
        pair
    }

    #[test]
    fn record_count_is_the_sum_of_samples() {
        let dir = tempfile::tempdir().unwrap();
        let pairs = vec![
            tagged_pair(dir.path(), "A_L001_R1_001.fastq", &["ACGT", "ACGA", "TTTT"]),
            tagged_pair(dir.path(), "A_L002_R1_001.fastq", &["GGGG"]),
            tagged_pair(dir.path(), "B_L001_R1_001.fastq", &["CCCC", "CCCA"]),
        ];

        let dest = dir.path().join("all_seqs.fastq");
        let corpus = Corpus::combine(&pairs, &dest).unwrap();
        assert_eq!(corpus.records, 6);
        assert_eq!(corpus.per_sample, [("A".to_string(), 4), ("B".to_string(), 2)]);
        assert_eq!(FastqFile::new(&dest).count_records().unwrap(), 6);

        let expected: Vec<u8> = pairs
            .iter()
            .flat_map(|p| std::fs::read(p.tagged_output().unwrap()).unwrap())
            .collect();
        assert_eq!(std::fs::read(&dest).unwrap(), expected);

        let labels: Vec<_> = FastqFile::new(&dest)
            .records()
            .unwrap()
            .map(|r| r.unwrap().label().into_owned())
            .collect();
        assert_eq!(labels.first().unwrap(), "read0;barcodelabel=A");
        assert_eq!(labels.last().unwrap(), "read1;barcodelabel=B");
    }

    #[test]
    fn untagged_pairs_block_the_corpus() {
        let dir = tempfile::tempdir().unwrap();
        let pairs = vec![
            tagged_pair(dir.path(), "A_L001_R1_001.fastq", &["ACGT"]),
            ReadPair::from_forward(dir.path().join("B_L001_R1_001.fastq")).unwrap(),
        ];

        let dest = dir.path().join("all_seqs.fastq");
        match Corpus::combine(&pairs, &dest) {
            Err(PipelineError::Stage { sample_id, .. }) => assert_eq!(sample_id, "B"),
            other => panic!("expected a stage error, got {other:?}"),
        }
        assert!(!dest.exists());
    }
}
