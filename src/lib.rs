//! Clusters paired-end amplicon reads from many samples into an OTU abundance
//! table with assigned taxonomy.
//!
//! Adapter removal, read merging, dereplication, clustering, read mapping and
//! classification are delegated to external engines through
//! [`external::ToolRunner`]; the FASTQ record model, primer trimming, barcode
//! tagging, corpus construction, abundance folding and taxonomy parsing run
//! in-process.

pub mod args;
pub mod error;
pub mod external;
pub mod io;
pub mod processes;
pub mod qc;
pub mod utils;

pub use crate::error::PipelineError;
pub use crate::processes::*;
