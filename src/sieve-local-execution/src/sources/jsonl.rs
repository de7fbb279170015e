use std::{
    fs::File,
    io::{BufRead, BufReader},
    path::PathBuf,
};

use common_error::{SieveError, SieveResult};
use sieve_core::{Dataset, Sample};

use super::DatasetSource;

/// Reads one JSON object per line. Blank lines are skipped.
pub struct JsonlSource {
    path: PathBuf,
}

impl JsonlSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl DatasetSource for JsonlSource {
    fn name(&self) -> String {
        format!("JsonlSource({})", self.path.display())
    }

    fn ingest(&self) -> SieveResult<Dataset> {
        let reader = BufReader::new(File::open(&self.path)?);
        let mut dataset = Dataset::empty();
        for (line_no, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let value: serde_json::Value = serde_json::from_str(&line).map_err(|e| {
                SieveError::ValueError(format!(
                    "{}:{}: invalid JSON: {}",
                    self.path.display(),
                    line_no + 1,
                    e
                ))
            })?;
            dataset.push(Sample::from_value(value)?);
        }
        log::debug!("Read {} rows from {}", dataset.len(), self.path.display());
        Ok(dataset)
    }
}
