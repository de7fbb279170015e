mod in_memory;
mod jsonl;

use common_error::SieveResult;
pub use in_memory::InMemorySource;
pub use jsonl::JsonlSource;
use sieve_core::Dataset;

/// Produces the dataset a run starts from.
pub trait DatasetSource: Send + Sync {
    fn name(&self) -> String;

    fn ingest(&self) -> SieveResult<Dataset>;
}
