pub mod cluster;
pub mod corpus;
pub mod run;
pub mod sample_job;
pub mod tagger;
pub mod taxonomy;
pub mod trimmer;

pub use cluster::{ClusterPipeline, ClusterSettings, Otu, OtuTable};
pub use corpus::Corpus;
pub use run::*;
pub use sample_job::{SampleJob, SampleJobConfig};
pub use tagger::*;
pub use taxonomy::{ParseTaxonomyArgs, TaxonomyAssigner, TaxonomyTable, parse_taxonomy_process};
pub use trimmer::*;
