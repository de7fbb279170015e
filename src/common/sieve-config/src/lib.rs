use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Default number of samples handed to a batched operator at once.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Default field holding the text that text operators read.
pub const DEFAULT_TEXT_KEY: &str = "text";

/// Configurations for Sieve to use during the execution of a recipe.
///  Note that this should be immutable for a given end-to-end pipeline run.
///
/// Execution entails:
/// 1. Planning the recipe, including operator fusion
/// 2. Allocating workers per step from the host capacity
/// 3. Running each step over the dataset
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SieveExecutionConfig {
    /// Fuse adjacent filters that share intermediate variables.
    pub op_fusion: bool,
    /// Samples per call for operators that declare batched execution.
    pub default_batch_size: usize,
    /// Recipe-wide worker count, used when an operator does not declare `num_proc`.
    pub default_num_proc: Option<usize>,
    /// Overrides for the detected host capacity.
    pub num_cpus: Option<f64>,
    pub memory_gb: Option<f64>,
    pub num_gpus: Option<usize>,
    /// Threads of the compute runtime workers run on. Defaults to the available parallelism.
    pub compute_threads: Option<usize>,
}

impl Default for SieveExecutionConfig {
    fn default() -> Self {
        Self {
            op_fusion: false,
            default_batch_size: DEFAULT_BATCH_SIZE,
            default_num_proc: None,
            num_cpus: None,
            memory_gb: None,
            num_gpus: None,
            compute_threads: None,
        }
    }
}

impl SieveExecutionConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = Self::default();
        if let Some(val) = lookup("SIEVE_OP_FUSION") {
            cfg.op_fusion = matches!(val.trim().to_lowercase().as_str(), "1" | "true");
        }
        if let Some(batch_size) = parse_var::<usize>(&lookup, "SIEVE_BATCH_SIZE") {
            cfg.default_batch_size = batch_size.max(1);
        }
        cfg.default_num_proc = parse_var(&lookup, "SIEVE_NUM_PROC").filter(|n: &usize| *n > 0);
        cfg.num_cpus = parse_var(&lookup, "SIEVE_NUM_CPUS");
        cfg.memory_gb = parse_var(&lookup, "SIEVE_MEMORY_GB");
        cfg.num_gpus = parse_var(&lookup, "SIEVE_NUM_GPUS");
        cfg.compute_threads =
            parse_var(&lookup, "SIEVE_COMPUTE_THREADS").filter(|n: &usize| *n > 0);
        cfg
    }

    #[must_use]
    pub fn with_op_fusion(mut self, op_fusion: bool) -> Self {
        self.op_fusion = op_fusion;
        self
    }

    #[must_use]
    pub fn with_default_num_proc(mut self, num_proc: Option<usize>) -> Self {
        self.default_num_proc = num_proc.filter(|n| *n > 0);
        self
    }

    #[must_use]
    pub fn with_compute_threads(mut self, compute_threads: Option<usize>) -> Self {
        self.compute_threads = compute_threads.filter(|n| *n > 0);
        self
    }

    #[must_use]
    pub fn with_host_overrides(
        mut self,
        num_cpus: Option<f64>,
        memory_gb: Option<f64>,
        num_gpus: Option<usize>,
    ) -> Self {
        self.num_cpus = num_cpus;
        self.memory_gb = memory_gb;
        self.num_gpus = num_gpus;
        self
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<T> {
    let raw = lookup(name)?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            log::warn!("Ignoring unparsable value for {}: {:?}", name, raw);
            None
        }
    }
}
