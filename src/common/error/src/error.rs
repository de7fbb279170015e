use thiserror::Error;

pub type SieveResult<T> = std::result::Result<T, SieveError>;
pub type GenericError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum SieveError {
    #[error("Unknown operator `{name}`")]
    UnknownOperator { name: String },
    #[error("Operator `{name}` is already registered")]
    DuplicateName { name: String },
    #[error("Invalid parameter `{param}` for operator `{op_name}`: {reason}")]
    InvalidParameter {
        op_name: String,
        param: String,
        reason: String,
    },
    #[error("Operator `{op_name}` requires an accelerator but none is available")]
    NoAcceleratorAvailable { op_name: String },
    #[error("Operator `{op_name}` requested {requested} but the host only has {available}")]
    InsufficientResources {
        op_name: String,
        requested: String,
        available: String,
    },
    #[error("Failed to load model {key}: {source}")]
    ModelLoad { key: String, source: GenericError },
    #[error("Model {key} is resident on {current} but {requested} was requested")]
    PlacementConflict {
        key: String,
        current: String,
        requested: String,
    },
    #[error("Step {step_index} (`{op_name}`) failed: {source}")]
    StepExecution {
        step_index: usize,
        op_name: String,
        source: Box<SieveError>,
    },
    #[error("Ingestion failed: {0}")]
    Ingest(GenericError),
    #[error("Export failed: {0}")]
    Export(GenericError),
    #[error("Pipeline run was cancelled before step {step_index}")]
    Cancelled { step_index: usize },
    #[error("{0:?}")]
    SerdeJsonError(#[from] serde_json::Error),
    #[error("{0:?}")]
    SerdeYamlError(#[from] serde_yaml::Error),
    #[error("{0}")]
    ComputeError(String),
    #[error("{0}")]
    FieldNotFound(String),
    #[error("{0}")]
    TypeError(String),
    #[error("{0}")]
    ValueError(String),
    #[error("{0:?}")]
    IoError(#[from] std::io::Error),
    #[error("{0}")]
    InternalError(String),
    #[error("{0:?}")]
    External(GenericError),
}

impl SieveError {
    /// Whether retrying the same call may succeed.
    ///
    /// Model loads and exports are the only failures the pipeline treats as transient.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ModelLoad { .. } | Self::Export(_) => true,
            Self::StepExecution { source, .. } => source.is_retryable(),
            _ => false,
        }
    }

    /// Operator name attached to the error, if it originated in a specific operator.
    pub fn op_name(&self) -> Option<&str> {
        match self {
            Self::InvalidParameter { op_name, .. }
            | Self::NoAcceleratorAvailable { op_name }
            | Self::InsufficientResources { op_name, .. }
            | Self::StepExecution { op_name, .. } => Some(op_name.as_str()),
            Self::UnknownOperator { name } | Self::DuplicateName { name } => Some(name.as_str()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_execution_carries_operator_and_cause() {
        let err = SieveError::StepExecution {
            step_index: 3,
            op_name: "words_num_filter".to_string(),
            source: Box::new(SieveError::ComputeError("boom".to_string())),
        };
        assert_eq!(err.op_name(), Some("words_num_filter"));
        assert_eq!(
            err.to_string(),
            "Step 3 (`words_num_filter`) failed: boom"
        );
        assert!(!err.is_retryable());
    }

    #[test]
    fn model_load_is_retryable() {
        let err = SieveError::ModelLoad {
            key: "huggingface(path=x)".to_string(),
            source: "network unreachable".into(),
        };
        assert!(err.is_retryable());
        assert_eq!(err.op_name(), None);
    }

    fn positive(n: i64) -> SieveResult<i64> {
        crate::ensure!(n > 0, ValueError: "expected a positive value, got {}", n);
        Ok(n)
    }

    #[test]
    fn ensure_returns_string_variant() {
        assert_eq!(positive(3).ok(), Some(3));
        assert!(matches!(
            positive(-1),
            Err(SieveError::ValueError(msg)) if msg == "expected a positive value, got -1"
        ));
    }
}
