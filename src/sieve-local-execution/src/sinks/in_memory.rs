use std::sync::Arc;

use common_error::SieveResult;
use parking_lot::Mutex;
use sieve_core::Dataset;

use super::DatasetSink;

/// Keeps the exported dataset in memory, for embedding the executor in a larger program.
#[derive(Clone, Default)]
pub struct InMemorySink {
    exported: Arc<Mutex<Option<Dataset>>>,
}

impl InMemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// The last exported dataset, if any.
    pub fn dataset(&self) -> Option<Dataset> {
        self.exported.lock().clone()
    }
}

impl DatasetSink for InMemorySink {
    fn export(&self, dataset: &Dataset) -> SieveResult<String> {
        *self.exported.lock() = Some(dataset.clone());
        Ok("memory".to_string())
    }
}
