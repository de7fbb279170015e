use std::{fmt, sync::Arc};

use common_error::{SieveError, SieveResult};
use common_resource_request::{allocate, Allocation, ResourceRequest};
use common_sieve_config::SieveExecutionConfig;
use common_tracing::{trace_block, SpanAttributes};
use sieve_core::Dataset;
use sieve_plan::{ExecutionPlan, FusionPlanner, PlanStep, Recipe};
use snafu::ResultExt;
use tokio_util::sync::CancellationToken;

use crate::{
    sinks::DatasetSink, sources::DatasetSource, step, ExportSnafu, IngestSnafu, ProcessContext,
    RunReport, StepCreationSnafu,
};

/// Where a pipeline run currently is.
///
/// `Done` and `Failed` are terminal. `Failed` is reachable from every other state;
/// `step_index` is set when a plan step was running.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExecutorState {
    Idle,
    Ingesting,
    Running { step_index: usize },
    Exporting,
    Done,
    Failed {
        step_index: Option<usize>,
        cause: String,
    },
}

impl ExecutorState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed { .. })
    }
}

impl fmt::Display for ExecutorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Ingesting => write!(f, "Ingesting"),
            Self::Running { step_index } => write!(f, "Running({step_index})"),
            Self::Exporting => write!(f, "Exporting"),
            Self::Done => write!(f, "Done"),
            Self::Failed {
                step_index: Some(step_index),
                cause,
            } => write!(f, "Failed at step {step_index}: {cause}"),
            Self::Failed {
                step_index: None,
                cause,
            } => write!(f, "Failed: {cause}"),
        }
    }
}

fn step_request(config: &SieveExecutionConfig, step: &PlanStep) -> ResourceRequest {
    step.resource_request().or_num_proc(config.default_num_proc)
}

/// Runs a planned recipe: ingest, every plan step in order, then export.
///
/// Planning, parameter validation and a first allocation of every step happen on
/// construction, so an unsatisfiable recipe fails before any data is read.
pub struct PipelineExecutor {
    process: Arc<ProcessContext>,
    plan: ExecutionPlan,
    allocations: Vec<Allocation>,
    state: ExecutorState,
    cancel: CancellationToken,
    dataset: Option<Dataset>,
    report: RunReport,
}

impl PipelineExecutor {
    pub fn new(process: Arc<ProcessContext>, recipe: &Recipe) -> SieveResult<Self> {
        let plan = FusionPlanner::new(process.registry())
            .with_op_fusion(process.config().op_fusion)
            .plan(recipe)?;
        Self::from_plan(process, plan)
    }

    pub fn from_plan(process: Arc<ProcessContext>, plan: ExecutionPlan) -> SieveResult<Self> {
        let allocations = plan
            .steps()
            .iter()
            .map(|step| {
                allocate(
                    &step.name(),
                    &step_request(process.config(), step),
                    process.host(),
                )
            })
            .collect::<SieveResult<Vec<_>>>()?;
        log::debug!(
            "Planned {} steps for {} operators",
            plan.len(),
            plan.ops().count()
        );
        Ok(Self {
            process,
            plan,
            allocations,
            state: ExecutorState::Idle,
            cancel: CancellationToken::new(),
            dataset: None,
            report: RunReport::default(),
        })
    }

    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token observed between steps. Cancelling it stops the run before the next step.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn plan(&self) -> &ExecutionPlan {
        &self.plan
    }

    /// Allocation per step: the pre-run allocation, replaced by the one actually used
    /// once the step has run.
    pub fn allocations(&self) -> &[Allocation] {
        &self.allocations
    }

    pub fn state(&self) -> &ExecutorState {
        &self.state
    }

    pub fn report(&self) -> &RunReport {
        &self.report
    }

    /// The processed dataset, kept after the steps finish so a failed export can be retried.
    pub fn dataset(&self) -> Option<&Dataset> {
        self.dataset.as_ref()
    }

    pub fn take_dataset(&mut self) -> Option<Dataset> {
        self.dataset.take()
    }

    /// The plan listing followed by each step's worker allocation.
    pub fn explain(&self) -> String {
        let mut lines = self.plan.multiline_display();
        lines.push("Allocations:".to_string());
        for (i, allocation) in self.allocations.iter().enumerate() {
            lines.push(format!("{i}: {}", allocation.multiline_display().join(", ")));
        }
        lines.join("\n")
    }

    fn fail(&mut self, step_index: Option<usize>, err: SieveError) -> SieveError {
        self.state = ExecutorState::Failed {
            step_index,
            cause: err.to_string(),
        };
        err
    }

    /// Ingests, runs every step and exports. Blocks the calling thread, so it must not
    /// be called from inside a tokio runtime; a step started there fails with
    /// `StepExecution` instead of running.
    pub fn run(
        &mut self,
        source: &dyn DatasetSource,
        sink: &dyn DatasetSink,
    ) -> SieveResult<RunReport> {
        if self.state != ExecutorState::Idle {
            return Err(SieveError::InternalError(format!(
                "Pipeline executor can only run from Idle, current state is {}",
                self.state
            )));
        }

        let run_span = trace_block("pipeline.run", None, &SpanAttributes::default());
        let _run_guard = run_span.enter();

        let mut dataset = self
            .ingest(source, &run_span)
            .map_err(|e| self.fail(None, e.into()))?;

        for step_index in 0..self.plan.len() {
            if self.cancel.is_cancelled() {
                log::warn!("Pipeline run cancelled before step {}", step_index);
                return Err(self.fail(Some(step_index), SieveError::Cancelled { step_index }));
            }
            self.state = ExecutorState::Running { step_index };
            dataset = self
                .run_step(step_index, dataset, &run_span)
                .map_err(|e| self.fail(Some(step_index), e.into()))?;
        }

        self.dataset = Some(dataset);
        self.export(sink, &run_span)
    }

    /// Exports the retained dataset again after a failed (or completed) export.
    pub fn retry_export(&mut self, sink: &dyn DatasetSink) -> SieveResult<RunReport> {
        let exportable = matches!(
            self.state,
            ExecutorState::Done
                | ExecutorState::Failed {
                    step_index: None,
                    ..
                }
        );
        if !exportable || self.dataset.is_none() {
            return Err(SieveError::InternalError(format!(
                "No processed dataset to export, executor state is {}",
                self.state
            )));
        }
        let span = trace_block("pipeline.run", None, &SpanAttributes::default());
        let _guard = span.enter();
        self.export(sink, &span)
    }

    fn ingest(&mut self, source: &dyn DatasetSource, parent: &tracing::Span) -> crate::Result<Dataset> {
        self.state = ExecutorState::Ingesting;
        let span = trace_block("pipeline.ingest", Some(parent), &SpanAttributes::default());
        let _guard = span.enter();

        let source_name = source.name();
        let dataset = source.ingest().context(IngestSnafu {
            source_name: source_name.clone(),
        })?;
        span.record("rows_out", dataset.len());
        log::info!("Ingested {} rows from {}", dataset.len(), source_name);
        self.report.rows_ingested = dataset.len() as u64;
        Ok(dataset)
    }

    fn run_step(
        &mut self,
        step_index: usize,
        dataset: Dataset,
        parent: &tracing::Span,
    ) -> crate::Result<Dataset> {
        let step = &self.plan.steps()[step_index];
        let op_name = step.name();
        let request = step_request(self.process.config(), step);
        let allocation =
            allocate(&op_name, &request, self.process.host()).context(StepCreationSnafu {
                step_index,
                op_name: op_name.clone(),
            })?;

        let attributes = SpanAttributes {
            op_name: Some(op_name.clone()),
            step_index: Some(step_index),
            worker_count: Some(allocation.worker_count),
            gpu_ranks: allocation.uses_gpu().then(|| allocation.gpu_ranks.clone()),
            cpu_cores: Some(request.cpu_cores),
            memory_gb: Some(request.memory_gb),
            rows_in: Some(dataset.len()),
            rows_out: None,
        };
        let span = trace_block("pipeline.step", Some(parent), &attributes);
        let _guard = span.enter();

        let (output, stats) =
            step::run_step(&self.process, step_index, step, &allocation, dataset, &span)?;
        span.record("rows_out", output.len());
        log::info!(
            "Step {} ({}): {} -> {} rows on {} workers",
            step_index,
            op_name,
            stats.rows_in,
            stats.rows_out,
            stats.workers
        );

        self.allocations[step_index] = allocation;
        self.report.steps.push(stats);
        Ok(output)
    }

    fn export(
        &mut self,
        sink: &dyn DatasetSink,
        parent: &tracing::Span,
    ) -> SieveResult<RunReport> {
        self.state = ExecutorState::Exporting;
        let span = trace_block("pipeline.export", Some(parent), &SpanAttributes::default());
        let _guard = span.enter();

        let Some(dataset) = self.dataset.as_ref() else {
            return Err(self.fail(
                None,
                SieveError::InternalError("Export requested without a dataset".to_string()),
            ));
        };
        let rows = dataset.len();
        span.record("rows_in", rows);
        match sink.export(dataset).context(ExportSnafu) {
            Ok(location) => {
                self.report.rows_exported = Some(rows as u64);
                self.report.export_location = Some(location);
                self.state = ExecutorState::Done;
                Ok(self.report.clone())
            }
            Err(e) => {
                log::warn!("Export failed, the processed dataset is kept for a retry");
                Err(self.fail(None, e.into()))
            }
        }
    }
}

impl fmt::Debug for PipelineExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineExecutor")
            .field("steps", &self.plan.len())
            .field("state", &self.state)
            .field("allocations", &self.allocations)
            .finish_non_exhaustive()
    }
}
