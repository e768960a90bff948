mod cancel;
pub mod paired_reads;
mod threads;

pub use cancel::CancelToken;
pub use paired_reads::{JobStage, ReadPair};
pub use threads::worker_threads;
