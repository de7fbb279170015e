use std::sync::Arc;

use common_error::SieveResult;
use common_resource_request::Allocation;
use common_runtime::RuntimeTask;
use sieve_core::{Dataset, Sample};
use sieve_ops::{
    Deduplicator, Filter, Mapper, OpContext, Operator, OperatorInstance, WorkerContext,
};
use sieve_plan::PlanStep;
use snafu::ResultExt;
use tracing::Instrument;

use crate::{
    runtime_stats::StepStatsContext, PipelineExecutionSnafu, ProcessContext, StepCreationSnafu,
    StepStats,
};

#[derive(Clone)]
struct FilterMember {
    name: String,
    filter: Arc<dyn Filter>,
}

/// The per-sample part of a step, cloned into every worker.
#[derive(Clone)]
enum ShardWork {
    Map {
        name: String,
        mapper: Arc<dyn Mapper>,
        batch_size: Option<usize>,
    },
    /// One filter, or the members of a fused group in recipe order.
    Filter {
        members: Vec<FilterMember>,
        batch_size: Option<usize>,
    },
    Hash {
        name: String,
        dedup: Arc<dyn Deduplicator>,
    },
}

impl ShardWork {
    fn run(
        &self,
        step_index: usize,
        shard: Vec<Sample>,
        worker: &WorkerContext,
    ) -> crate::Result<Vec<Sample>> {
        let mut ctx = OpContext::new(worker);
        match self {
            Self::Map {
                name,
                mapper,
                batch_size,
            } => {
                let rows = shard.len();
                let result = match batch_size {
                    Some(batch_size) => map_batched(mapper.as_ref(), shard, *batch_size, &mut ctx),
                    None => map_rows(mapper.as_ref(), shard, &mut ctx),
                };
                let out = result.with_context(|_| PipelineExecutionSnafu {
                    step_index,
                    op_name: name.clone(),
                })?;
                log::trace!("Worker {} mapped {} rows into {}", worker.worker_index, rows, out.len());
                Ok(out)
            }
            Self::Filter {
                members,
                batch_size: Some(batch_size),
            } if members.len() == 1 => {
                let FilterMember { name, filter } = &members[0];
                filter_batched(filter.as_ref(), shard, *batch_size, &mut ctx).with_context(|_| {
                    PipelineExecutionSnafu {
                        step_index,
                        op_name: name.clone(),
                    }
                })
            }
            Self::Filter { members, .. } => {
                let mut out = Vec::with_capacity(shard.len());
                'samples: for mut sample in shard {
                    ctx.reset();
                    for FilterMember { name, filter } in members {
                        filter
                            .compute_stats(&mut sample, &mut ctx)
                            .with_context(|_| PipelineExecutionSnafu {
                                step_index,
                                op_name: name.clone(),
                            })?;
                        if !filter.keep(&sample) {
                            continue 'samples;
                        }
                    }
                    out.push(sample);
                }
                Ok(out)
            }
            Self::Hash { name, dedup } => {
                let mut shard = shard;
                for sample in &mut shard {
                    ctx.reset();
                    dedup
                        .compute_hash(sample, &mut ctx)
                        .with_context(|_| PipelineExecutionSnafu {
                            step_index,
                            op_name: name.clone(),
                        })?;
                }
                Ok(shard)
            }
        }
    }
}

fn map_rows(
    mapper: &dyn Mapper,
    shard: Vec<Sample>,
    ctx: &mut OpContext<'_>,
) -> SieveResult<Vec<Sample>> {
    let mut out = Vec::with_capacity(shard.len());
    for sample in shard {
        ctx.reset();
        out.extend(mapper.process(sample, ctx)?);
    }
    Ok(out)
}

fn map_batched(
    mapper: &dyn Mapper,
    shard: Vec<Sample>,
    batch_size: usize,
    ctx: &mut OpContext<'_>,
) -> SieveResult<Vec<Sample>> {
    let mut out = Vec::with_capacity(shard.len());
    let mut rows = shard.into_iter();
    loop {
        let batch: Vec<Sample> = rows.by_ref().take(batch_size).collect();
        if batch.is_empty() {
            return Ok(out);
        }
        ctx.reset();
        out.extend(mapper.process_batched(batch, ctx)?);
    }
}

fn filter_batched(
    filter: &dyn Filter,
    mut shard: Vec<Sample>,
    batch_size: usize,
    ctx: &mut OpContext<'_>,
) -> SieveResult<Vec<Sample>> {
    for batch in shard.chunks_mut(batch_size) {
        ctx.reset();
        filter.compute_stats_batched(batch, ctx)?;
    }
    shard.retain(|sample| filter.keep(sample));
    Ok(shard)
}

/// Runs one plan step over the dataset with the given allocation.
pub(crate) fn run_step(
    process: &ProcessContext,
    step_index: usize,
    step: &PlanStep,
    allocation: &Allocation,
    dataset: Dataset,
    span: &tracing::Span,
) -> crate::Result<(Dataset, StepStats)> {
    let instances = step
        .ops()
        .iter()
        .map(|op| {
            op.instantiate().with_context(|_| StepCreationSnafu {
                step_index,
                op_name: op.name().to_string(),
            })
        })
        .collect::<crate::Result<Vec<OperatorInstance>>>()?;

    let default_batch_size = process.config().default_batch_size;
    let stats = Arc::new(StepStatsContext::default());
    let rows_in = dataset.len();
    let step_name = step.name();

    let output = match instances.as_slice() {
        [OperatorInstance {
            op: Operator::Mapper(mapper),
            ..
        }] => {
            let work = ShardWork::Map {
                name: step_name.clone(),
                mapper: mapper.clone(),
                batch_size: instances[0].batch_size(default_batch_size),
            };
            run_sharded(process, step_index, &step_name, allocation, &work, dataset, &stats, span)?
        }
        [OperatorInstance {
            op: Operator::Deduplicator(dedup),
            ..
        }] => {
            let work = ShardWork::Hash {
                name: step_name.clone(),
                dedup: dedup.clone(),
            };
            let hashed =
                run_sharded(process, step_index, &step_name, allocation, &work, dataset, &stats, span)?;
            stats
                .timed(|| dedup.dedup(hashed))
                .with_context(|_| PipelineExecutionSnafu {
                    step_index,
                    op_name: step_name.clone(),
                })?
        }
        [OperatorInstance {
            op: Operator::Selector(selector),
            ..
        }] => stats
            .timed(|| selector.select(dataset))
            .with_context(|_| PipelineExecutionSnafu {
                step_index,
                op_name: step_name.clone(),
            })?,
        filters => {
            let members = filters
                .iter()
                .map(|instance| match &instance.op {
                    Operator::Filter(filter) => Ok(FilterMember {
                        name: instance.name().to_string(),
                        filter: filter.clone(),
                    }),
                    other => Err(common_error::SieveError::InternalError(format!(
                        "`{}` is a {} and cannot run in a fused group",
                        instance.name(),
                        other.kind()
                    ))),
                })
                .collect::<SieveResult<Vec<_>>>()
                .with_context(|_| StepCreationSnafu {
                    step_index,
                    op_name: step_name.clone(),
                })?;
            let batch_size = match filters {
                [single] => single.batch_size(default_batch_size),
                _ => None,
            };
            let work = ShardWork::Filter {
                members,
                batch_size,
            };
            run_sharded(process, step_index, &step_name, allocation, &work, dataset, &stats, span)?
        }
    };

    let step_stats = StepStats {
        step_index,
        name: step_name,
        kind: step.kind(),
        num_ops: instances.len(),
        rows_in: rows_in as u64,
        rows_out: output.len() as u64,
        workers: allocation.worker_count,
        gpu_ranks: allocation.gpu_ranks.clone(),
        cpu_us: stats.cpu_us(),
    };
    Ok((output, step_stats))
}

/// Splits the dataset into one contiguous shard per worker, runs `work` on each shard
/// as a compute-runtime task and reassembles the results in shard order.
#[allow(clippy::too_many_arguments)]
fn run_sharded(
    process: &ProcessContext,
    step_index: usize,
    step_name: &str,
    allocation: &Allocation,
    work: &ShardWork,
    dataset: Dataset,
    stats: &Arc<StepStatsContext>,
    span: &tracing::Span,
) -> crate::Result<Dataset> {
    let runtime = process.runtime();
    let tasks: Vec<RuntimeTask<crate::Result<Vec<Sample>>>> = dataset
        .shard(allocation.worker_count)
        .into_iter()
        .enumerate()
        .map(|(worker_index, shard)| {
            let gpu_rank = allocation.gpu_rank_for(worker_index);
            let worker = process.worker_context(worker_index, gpu_rank);
            let work = work.clone();
            let stats = stats.clone();
            let worker_span = tracing::info_span!(
                parent: span,
                "sieve.worker",
                worker.index = worker_index,
                worker.gpu_rank = gpu_rank,
                rows = shard.len(),
            );
            runtime.spawn(
                async move { stats.timed(|| work.run(step_index, shard, &worker)) }
                    .instrument(worker_span),
            )
        })
        .collect();

    let shards = runtime
        .block_on_current_thread(async move {
            let mut shards = Vec::with_capacity(tasks.len());
            for task in tasks {
                match task.await {
                    Ok(result) => shards.push(result),
                    Err(e) => return Err(e),
                }
            }
            Ok(shards)
        })
        .and_then(|shards| shards)
        .with_context(|_| PipelineExecutionSnafu {
            step_index,
            op_name: step_name.to_string(),
        })?;

    let shards = shards.into_iter().collect::<crate::Result<Vec<_>>>()?;
    Ok(Dataset::reassemble(shards))
}
