use std::sync::Arc;

use common_error::SieveResult;
use sieve_core::{Dataset, Sample};

use crate::{CommonParams, OpContext, OperatorDescriptor, OperatorKind};

/// Rewrites samples. May emit zero, one or many samples per input.
pub trait Mapper: Send + Sync {
    fn process(&self, sample: Sample, ctx: &mut OpContext<'_>) -> SieveResult<Vec<Sample>>;

    fn process_batched(
        &self,
        samples: Vec<Sample>,
        ctx: &mut OpContext<'_>,
    ) -> SieveResult<Vec<Sample>> {
        let mut out = Vec::with_capacity(samples.len());
        for sample in samples {
            ctx.reset();
            out.extend(self.process(sample, ctx)?);
        }
        Ok(out)
    }
}

/// Computes statistics into a sample's stats namespace, then decides whether it stays.
pub trait Filter: Send + Sync {
    fn compute_stats(&self, sample: &mut Sample, ctx: &mut OpContext<'_>) -> SieveResult<()>;

    fn compute_stats_batched(
        &self,
        samples: &mut [Sample],
        ctx: &mut OpContext<'_>,
    ) -> SieveResult<()> {
        for sample in samples {
            ctx.reset();
            self.compute_stats(sample, ctx)?;
        }
        Ok(())
    }

    /// Reads only the stats written by `compute_stats`.
    fn keep(&self, sample: &Sample) -> bool;
}

/// Removes duplicates. Hashing runs per sample in parallel; the removal itself sees
/// the whole dataset.
pub trait Deduplicator: Send + Sync {
    fn compute_hash(&self, sample: &mut Sample, ctx: &mut OpContext<'_>) -> SieveResult<()>;

    /// Keeps the first occurrence of every duplicate set, in dataset order.
    fn dedup(&self, dataset: Dataset) -> SieveResult<Dataset>;
}

/// Picks a subset of the whole dataset.
pub trait Selector: Send + Sync {
    fn select(&self, dataset: Dataset) -> SieveResult<Dataset>;
}

#[derive(Clone)]
pub enum Operator {
    Mapper(Arc<dyn Mapper>),
    Filter(Arc<dyn Filter>),
    Deduplicator(Arc<dyn Deduplicator>),
    Selector(Arc<dyn Selector>),
}

impl Operator {
    pub fn mapper(op: impl Mapper + 'static) -> Self {
        Self::Mapper(Arc::new(op))
    }

    pub fn filter(op: impl Filter + 'static) -> Self {
        Self::Filter(Arc::new(op))
    }

    pub fn deduplicator(op: impl Deduplicator + 'static) -> Self {
        Self::Deduplicator(Arc::new(op))
    }

    pub fn selector(op: impl Selector + 'static) -> Self {
        Self::Selector(Arc::new(op))
    }

    pub fn kind(&self) -> OperatorKind {
        match self {
            Self::Mapper(_) => OperatorKind::Mapper,
            Self::Filter(_) => OperatorKind::Filter,
            Self::Deduplicator(_) => OperatorKind::Deduplicator,
            Self::Selector(_) => OperatorKind::Selector,
        }
    }
}

impl std::fmt::Debug for Operator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Operator::{:?}", self.kind())
    }
}

/// A constructed operator bound to its validated parameters, ready to run.
#[derive(Clone, Debug)]
pub struct OperatorInstance {
    pub descriptor: Arc<OperatorDescriptor>,
    pub common: CommonParams,
    pub op: Operator,
}

impl OperatorInstance {
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    /// Samples per call when the operator runs batched, `None` for row-wise execution.
    pub fn batch_size(&self, default_batch_size: usize) -> Option<usize> {
        self.descriptor
            .batched
            .then(|| self.common.batch_size.unwrap_or(default_batch_size).max(1))
    }
}
