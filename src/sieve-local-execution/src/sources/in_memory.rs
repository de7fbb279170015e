use common_error::SieveResult;
use sieve_core::Dataset;

use super::DatasetSource;

pub struct InMemorySource {
    dataset: Dataset,
}

impl InMemorySource {
    pub fn new(dataset: Dataset) -> Self {
        Self { dataset }
    }
}

impl DatasetSource for InMemorySource {
    fn name(&self) -> String {
        format!("InMemorySource({} rows)", self.dataset.len())
    }

    fn ingest(&self) -> SieveResult<Dataset> {
        Ok(self.dataset.clone())
    }
}
