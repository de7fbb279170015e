//! Operator-pipeline execution for sample-oriented data processing.
//!
//! A recipe names registered operators; the planner optionally fuses filters that
//! share intermediate variables; the executor runs each step over worker shards
//! with per-worker model caches and exports the surviving samples.

pub use common_error::{SieveError, SieveResult};
pub use common_resource_request::{Allocation, ResourceRequest};
pub use common_sieve_config::SieveExecutionConfig;
pub use common_version::VERSION;

pub mod core {
    pub use sieve_core::*;
}

pub mod ops {
    pub use sieve_ops::*;
}

pub mod plan {
    pub use sieve_plan::*;
}

pub mod model_cache {
    pub use sieve_model_cache::*;
}

pub mod execution {
    pub use sieve_local_execution::*;
}

pub mod functions {
    pub use sieve_functions_text::*;
}

/// A process context over the built-in operators and model providers.
pub fn builtin_process(
    config: SieveExecutionConfig,
) -> SieveResult<std::sync::Arc<execution::ProcessContext>> {
    execution::ProcessContext::init(
        functions::builtin_registry()?,
        functions::builtin_providers()?,
        config,
    )
}
