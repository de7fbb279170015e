mod in_memory;
mod jsonl;

use common_error::SieveResult;
pub use in_memory::InMemorySink;
pub use jsonl::JsonlSink;
use sieve_core::Dataset;

/// Receives the final dataset of a run.
///
/// `export` must be idempotent: exporting the same dataset twice leaves the same
/// result as exporting it once, so a failed export can simply be retried.
pub trait DatasetSink: Send + Sync {
    /// Writes the dataset and returns where it went (a path, a branch name, ...).
    fn export(&self, dataset: &Dataset) -> SieveResult<String>;
}
