use std::{
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use common_error::{SieveError, SieveResult};
use sieve_core::Dataset;

use super::DatasetSink;

/// Writes one JSON object per line, stats included under `__stats__`.
///
/// Rows go to a temporary file next to the target which is then renamed over it, so
/// readers never observe a partially written export.
pub struct JsonlSink {
    path: PathBuf,
}

impl JsonlSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DatasetSink for JsonlSink {
    fn export(&self, dataset: &Dataset) -> SieveResult<String> {
        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir)?;

        let tmp = tempfile::NamedTempFile::new_in(dir)?;
        {
            let mut writer = BufWriter::new(tmp.as_file());
            for sample in dataset {
                serde_json::to_writer(&mut writer, sample)?;
                writer.write_all(b"\n")?;
            }
            writer.flush()?;
        }
        tmp.persist(&self.path)
            .map_err(|e| SieveError::IoError(e.error))?;

        log::info!("Exported {} rows to {}", dataset.len(), self.path.display());
        Ok(self.path.display().to_string())
    }
}
