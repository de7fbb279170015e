mod executor;
mod process_context;
mod runtime_stats;
mod sinks;
mod sources;
mod step;

use common_error::SieveError;
pub use executor::{ExecutorState, PipelineExecutor};
pub use process_context::ProcessContext;
pub use runtime_stats::{RunReport, StepStats};
pub use sinks::{DatasetSink, InMemorySink, JsonlSink};
pub use sources::{DatasetSource, InMemorySource, JsonlSource};
use snafu::Snafu;
pub use tokio_util::sync::CancellationToken;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("Error ingesting from {}: {}", source_name, source))]
    IngestError {
        source: SieveError,
        source_name: String,
    },
    #[snafu(display("Error creating operators for step {} ({}): {}", step_index, op_name, source))]
    StepCreationError {
        source: SieveError,
        step_index: usize,
        op_name: String,
    },
    #[snafu(display("Error when running step {} ({}): {}", step_index, op_name, source))]
    PipelineExecutionError {
        source: SieveError,
        step_index: usize,
        op_name: String,
    },
    #[snafu(display("Error exporting dataset: {}", source))]
    ExportError { source: SieveError },
}

impl From<Error> for SieveError {
    fn from(err: Error) -> Self {
        match err {
            Error::IngestError {
                source,
                source_name,
            } => {
                log::error!("Error ingesting from {}", source_name);
                match source {
                    Self::Ingest(_) => source,
                    other => Self::Ingest(Box::new(other)),
                }
            }
            Error::StepCreationError {
                source,
                step_index,
                op_name,
            }
            | Error::PipelineExecutionError {
                source,
                step_index,
                op_name,
            } => {
                log::error!("Error when running step {} ({})", step_index, op_name);
                Self::StepExecution {
                    step_index,
                    op_name,
                    source: Box::new(source),
                }
            }
            Error::ExportError { source } => match source {
                Self::Export(_) => source,
                other => Self::Export(Box::new(other)),
            },
        }
    }
}

type Result<T, E = Error> = std::result::Result<T, E>;
