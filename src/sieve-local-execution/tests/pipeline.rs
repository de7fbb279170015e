use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use common_error::{SieveError, SieveResult};
use common_resource_request::HostCapacity;
use common_sieve_config::SieveExecutionConfig;
use parking_lot::Mutex;
use rstest::rstest;
use serde_json::{json, Value};
use sieve_core::{Dataset, Sample};
use sieve_local_execution::{
    CancellationToken, DatasetSink, DatasetSource, ExecutorState, InMemorySink, InMemorySource,
    JsonlSink, JsonlSource, PipelineExecutor, ProcessContext,
};
use sieve_model_cache::{ModelKey, ModelObject, ModelProvider};
use sieve_ops::{
    Accelerator, Filter, Mapper, OpContext, Operator, OperatorDescriptor, OperatorKind,
    OperatorRegistry,
};
use sieve_plan::{OpConfig, Recipe};

struct DoublingMapper;

impl Mapper for DoublingMapper {
    fn process(&self, sample: Sample, _ctx: &mut OpContext<'_>) -> SieveResult<Vec<Sample>> {
        Ok(vec![sample.clone(), sample])
    }
}

struct FailingMapper;

impl Mapper for FailingMapper {
    fn process(&self, sample: Sample, _ctx: &mut OpContext<'_>) -> SieveResult<Vec<Sample>> {
        if sample.get("poison").is_some() {
            return Err(SieveError::ComputeError("poisoned sample".to_string()));
        }
        Ok(vec![sample])
    }
}

/// Records the size of every batch it is handed.
#[derive(Clone, Default)]
struct BatchRecorder {
    sizes: Arc<Mutex<Vec<usize>>>,
}

impl Mapper for BatchRecorder {
    fn process(&self, _sample: Sample, _ctx: &mut OpContext<'_>) -> SieveResult<Vec<Sample>> {
        Err(SieveError::InternalError("batched mapper ran row-wise".to_string()))
    }

    fn process_batched(
        &self,
        samples: Vec<Sample>,
        _ctx: &mut OpContext<'_>,
    ) -> SieveResult<Vec<Sample>> {
        self.sizes.lock().push(samples.len());
        Ok(samples)
    }
}

impl Filter for BatchRecorder {
    fn compute_stats(&self, _sample: &mut Sample, _ctx: &mut OpContext<'_>) -> SieveResult<()> {
        Err(SieveError::InternalError("batched filter ran row-wise".to_string()))
    }

    fn compute_stats_batched(
        &self,
        samples: &mut [Sample],
        _ctx: &mut OpContext<'_>,
    ) -> SieveResult<()> {
        self.sizes.lock().push(samples.len());
        for sample in samples {
            sample.set_stat("batch_seen", true);
        }
        Ok(())
    }

    fn keep(&self, sample: &Sample) -> bool {
        sample.has_stat("batch_seen")
    }
}

fn hf_key() -> ModelKey {
    ModelKey::new("huggingface").with_param("path", "x")
}

/// Loads the shared model and records its key as a stat.
struct ModelFilter {
    stat: &'static str,
}

impl Filter for ModelFilter {
    fn compute_stats(&self, sample: &mut Sample, ctx: &mut OpContext<'_>) -> SieveResult<()> {
        let model = ctx.load_model(&hf_key())?.downcast::<String>()?;
        sample.set_stat(self.stat, model.as_str());
        Ok(())
    }

    fn keep(&self, _sample: &Sample) -> bool {
        true
    }
}

#[derive(Clone, Default)]
struct CountingProvider {
    loads: Arc<AtomicUsize>,
}

impl ModelProvider for CountingProvider {
    fn name(&self) -> &str {
        "huggingface"
    }

    fn load(&self, key: &ModelKey) -> SieveResult<ModelObject> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(key.to_string()))
    }
}

struct CountingSource {
    dataset: Dataset,
    ingests: AtomicUsize,
}

impl DatasetSource for CountingSource {
    fn name(&self) -> String {
        "CountingSource".to_string()
    }

    fn ingest(&self) -> SieveResult<Dataset> {
        self.ingests.fetch_add(1, Ordering::SeqCst);
        Ok(self.dataset.clone())
    }
}

/// Fails the first `failures` exports, then behaves like an in-memory sink.
struct FlakySink {
    failures: AtomicUsize,
    attempts: AtomicUsize,
    exported: Mutex<Vec<Dataset>>,
}

impl FlakySink {
    fn failing(failures: usize) -> Self {
        Self {
            failures: AtomicUsize::new(failures),
            attempts: AtomicUsize::new(0),
            exported: Mutex::new(vec![]),
        }
    }
}

impl DatasetSink for FlakySink {
    fn export(&self, dataset: &Dataset) -> SieveResult<String> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(SieveError::Export("branch is locked".into()));
        }
        let mut exported = self.exported.lock();
        exported.clear();
        exported.push(dataset.clone());
        Ok("datasets/main".to_string())
    }
}

fn registry() -> SieveResult<OperatorRegistry> {
    let mut registry = sieve_functions_text::builtin_registry()?;
    registry.register(
        OperatorDescriptor::new("doubling_mapper", OperatorKind::Mapper),
        |_| Ok(Operator::mapper(DoublingMapper)),
    )?;
    registry.register(
        OperatorDescriptor::new("failing_mapper", OperatorKind::Mapper),
        |_| Ok(Operator::mapper(FailingMapper)),
    )?;
    registry.register(
        OperatorDescriptor::new("model_filter_a", OperatorKind::Filter),
        |_| Ok(Operator::filter(ModelFilter { stat: "model_a" })),
    )?;
    registry.register(
        OperatorDescriptor::new("model_filter_b", OperatorKind::Filter),
        |_| Ok(Operator::filter(ModelFilter { stat: "model_b" })),
    )?;
    registry.register(
        OperatorDescriptor::new("gpu_model_filter", OperatorKind::Filter)
            .with_accelerator(Accelerator::Cuda),
        |_| Ok(Operator::filter(ModelFilter { stat: "model_a" })),
    )?;
    registry.register(
        OperatorDescriptor::new("gpu_mapper", OperatorKind::Mapper)
            .with_accelerator(Accelerator::Cuda),
        |_| Ok(Operator::mapper(DoublingMapper)),
    )?;
    Ok(registry)
}

fn process_with(
    config: SieveExecutionConfig,
    host: HostCapacity,
) -> SieveResult<(Arc<ProcessContext>, CountingProvider)> {
    let counting = CountingProvider::default();
    let mut providers = sieve_functions_text::builtin_providers()?;
    providers.register(counting.clone())?;
    let process = ProcessContext::with_host(registry()?, providers, config, host)?;
    Ok((process, counting))
}

fn process(op_fusion: bool) -> SieveResult<Arc<ProcessContext>> {
    let config = SieveExecutionConfig::default().with_op_fusion(op_fusion);
    Ok(process_with(config, HostCapacity::new(4.0, 16.0, 0))?.0)
}

fn texts(texts: &[&str]) -> Dataset {
    texts
        .iter()
        .enumerate()
        .map(|(i, text)| Sample::new().with_field("id", i).with_field("text", *text))
        .collect()
}

/// Ten rows, six of which have at least three words.
fn scenario_rows() -> Dataset {
    texts(&[
        "the quick brown fox",
        "hello",
        "a b c",
        "two words",
        "one more sample here",
        "",
        "x y z w",
        "tiny",
        "still three words",
        "and this one has a few more words",
    ])
}

fn ids(dataset: &Dataset) -> Vec<u64> {
    dataset
        .iter()
        .filter_map(|sample| sample.get("id").and_then(Value::as_u64))
        .collect()
}

fn words_recipe() -> Recipe {
    Recipe::default()
        .with_op(OpConfig::new("words_num_filter").with_param("min_num", 3i64))
        .with_op(OpConfig::new("stopwords_filter").with_param("min_ratio", 0.0))
        .with_op(OpConfig::new("doubling_mapper"))
}

#[test]
fn fused_filters_then_doubling_mapper() -> SieveResult<()> {
    let mut executor = PipelineExecutor::new(process(true)?, &words_recipe())?;
    assert_eq!(executor.plan().len(), 2);
    assert_eq!(executor.plan().num_fused(), 1);
    assert_eq!(
        executor.plan().steps()[0].name(),
        "fused[words_num_filter, stopwords_filter]"
    );

    let sink = InMemorySink::new();
    let report = executor.run(&InMemorySource::new(scenario_rows()), &sink)?;

    assert_eq!(report.rows_ingested, 10);
    assert_eq!(report.steps[0].rows_out, 6);
    assert_eq!(report.steps[0].num_ops, 2);
    assert_eq!(report.rows_out(), 12);
    assert_eq!(report.rows_exported, Some(12));
    assert_eq!(report.export_location.as_deref(), Some("memory"));
    assert_eq!(executor.state(), &ExecutorState::Done);

    let exported = sink
        .dataset()
        .ok_or_else(|| SieveError::InternalError("nothing exported".to_string()))?;
    assert_eq!(ids(&exported), vec![0, 0, 2, 2, 4, 4, 6, 6, 8, 8, 9, 9]);
    for sample in &exported {
        assert!(sample.has_stat("num_words"));
        assert!(sample.has_stat("stopwords_ratio"));
    }
    Ok(())
}

#[test]
fn rejected_samples_skip_later_members() -> SieveResult<()> {
    let mut executor = PipelineExecutor::new(process(true)?, &words_recipe())?;
    executor.run(&InMemorySource::new(scenario_rows()), &InMemorySink::new())?;
    // A sample dropped by words_num_filter never gets a stopwords ratio, fused or not.
    let mut unfused = PipelineExecutor::new(process(false)?, &words_recipe())?;
    let sink = InMemorySink::new();
    unfused.run(&InMemorySource::new(scenario_rows()), &sink)?;
    assert_eq!(unfused.plan().num_fused(), 0);
    assert_eq!(executor.dataset(), unfused.dataset());
    Ok(())
}

#[rstest]
#[case(4.0)]
#[case(1.0)]
#[case(3.0)]
fn fusion_does_not_change_results(#[case] cpus: f64) -> SieveResult<()> {
    let recipe = Recipe::default()
        .with_op(OpConfig::new("whitespace_normalization_mapper"))
        .with_op(OpConfig::new("words_num_filter").with_param("min_num", 2i64))
        .with_op(OpConfig::new("word_repetition_filter").with_param("rep_len", 1i64))
        .with_op(OpConfig::new("stopwords_filter").with_param("min_ratio", 0.1))
        .with_op(OpConfig::new("maximum_line_length_filter").with_param("min_len", 3i64))
        .with_op(OpConfig::new("average_line_length_filter").with_param("min_len", 2.5))
        .with_op(OpConfig::new("document_deduplicator"));
    let rows = texts(&[
        "the cat and the dog\nran off",
        "the cat and the dog\nran off",
        "spam spam spam spam",
        "it is what it is",
        "a\nb\nc",
        "on the\u{a0}other hand,\tperhaps not",
        "of the people, by the people, for the people",
        "no stop here",
    ]);

    let mut outputs = vec![];
    for op_fusion in [true, false] {
        let config = SieveExecutionConfig::default().with_op_fusion(op_fusion);
        let (process, _) = process_with(config, HostCapacity::new(cpus, 16.0, 0))?;
        let mut executor = PipelineExecutor::new(process, &recipe)?;
        let sink = InMemorySink::new();
        executor.run(&InMemorySource::new(rows.clone()), &sink)?;
        outputs.push((executor.plan().len(), sink.dataset()));
    }
    let (fused_steps, fused) = &outputs[0];
    let (unfused_steps, unfused) = &outputs[1];
    assert_eq!(*fused_steps, 4);
    assert_eq!(*unfused_steps, 7);
    assert!(fused.as_ref().is_some_and(|dataset| !dataset.is_empty()));
    assert_eq!(fused, unfused);
    Ok(())
}

#[rstest]
#[case(1.0, 1)]
#[case(4.0, 4)]
#[case(8.0, 8)]
fn equal_model_keys_load_once_per_process(
    #[case] cpus: f64,
    #[case] workers: usize,
) -> SieveResult<()> {
    let (process, counting) =
        process_with(SieveExecutionConfig::default(), HostCapacity::new(cpus, 16.0, 0))?;
    let recipe = Recipe::default()
        .with_op(OpConfig::new("model_filter_a"))
        .with_op(OpConfig::new("model_filter_b"));
    let mut executor = PipelineExecutor::new(process.clone(), &recipe)?;
    assert_eq!(executor.allocations()[0].worker_count, workers);
    let sink = InMemorySink::new();
    let report = executor.run(&InMemorySource::new(scenario_rows()), &sink)?;
    assert_eq!(report.steps[0].workers, workers);

    assert_eq!(counting.loads.load(Ordering::SeqCst), 1);
    let stats = process.cache_stats();
    assert_eq!((stats.loads, stats.hits, stats.entries), (1, 19, 1));

    let exported = sink.dataset().unwrap_or_default();
    assert!(exported
        .iter()
        .all(|s| s.stat("model_b") == Some(&json!("huggingface(path=x)"))));

    process.shutdown();
    assert_eq!(process.cache_stats().entries, 0);
    Ok(())
}

#[test]
fn gpu_workers_share_one_load() -> SieveResult<()> {
    let (process, counting) =
        process_with(SieveExecutionConfig::default(), HostCapacity::new(8.0, 16.0, 2))?;
    let recipe = Recipe::default()
        .with_op(OpConfig::new("gpu_model_filter").with_param("num_proc", 4i64))
        .with_op(OpConfig::new("model_filter_b"));
    let mut executor = PipelineExecutor::new(process.clone(), &recipe)?;
    assert_eq!(executor.allocations()[0].gpu_ranks, vec![0, 1]);
    executor.run(&InMemorySource::new(scenario_rows()), &InMemorySink::new())?;

    assert_eq!(counting.loads.load(Ordering::SeqCst), 1);
    let stats = process.cache_stats();
    assert_eq!((stats.loads, stats.moves), (1, 2));
    Ok(())
}

#[test]
fn operator_errors_abort_with_step_context() -> SieveResult<()> {
    let recipe = Recipe::default()
        .with_op(OpConfig::new("text_length_filter").with_param("min_len", 0i64))
        .with_op(OpConfig::new("failing_mapper"))
        .with_op(OpConfig::new("doubling_mapper"));
    let mut rows = scenario_rows().into_samples();
    rows[7].set("poison", true);

    let mut executor = PipelineExecutor::new(process(true)?, &recipe)?;
    let sink = InMemorySink::new();
    let err = executor
        .run(&InMemorySource::new(Dataset::new(rows)), &sink)
        .expect_err("poisoned sample must fail the run");

    match err {
        SieveError::StepExecution {
            step_index,
            op_name,
            source,
        } => {
            assert_eq!(step_index, 1);
            assert_eq!(op_name, "failing_mapper");
            assert!(matches!(*source, SieveError::ComputeError(_)));
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert!(matches!(
        executor.state(),
        ExecutorState::Failed {
            step_index: Some(1),
            ..
        }
    ));
    assert_eq!(executor.report().steps.len(), 1);
    assert!(sink.dataset().is_none());
    Ok(())
}

#[test]
fn gpu_operator_without_gpu_fails_before_ingest() -> SieveResult<()> {
    let recipe = Recipe::default().with_op(OpConfig::new("gpu_mapper"));
    let err = PipelineExecutor::new(process(false)?, &recipe).expect_err("no GPU on this host");
    assert!(matches!(err, SieveError::NoAcceleratorAvailable { .. }));

    let recipe = Recipe::default()
        .with_op(OpConfig::new("doubling_mapper").with_param("cpu_required", 8.0));
    let err = PipelineExecutor::new(process(false)?, &recipe).expect_err("asks for too many CPUs");
    assert!(matches!(err, SieveError::InsufficientResources { .. }));
    Ok(())
}

#[test]
fn gpu_ranks_follow_workers() -> SieveResult<()> {
    let (process, _) =
        process_with(SieveExecutionConfig::default(), HostCapacity::new(16.0, 64.0, 2))?;
    let recipe =
        Recipe::default().with_op(OpConfig::new("gpu_mapper").with_param("num_proc", 10i64));
    let mut executor = PipelineExecutor::new(process, &recipe)?;
    assert_eq!(executor.allocations()[0].worker_count, 2);
    assert_eq!(executor.allocations()[0].gpu_ranks, vec![0, 1]);

    let source = CountingSource {
        dataset: scenario_rows(),
        ingests: AtomicUsize::new(0),
    };
    let report = executor.run(&source, &InMemorySink::new())?;
    assert_eq!(source.ingests.load(Ordering::SeqCst), 1);
    assert_eq!(report.steps[0].gpu_ranks, vec![0, 1]);
    assert_eq!(report.rows_out(), 20);
    Ok(())
}

#[test]
fn failed_export_keeps_dataset_for_retry() -> SieveResult<()> {
    let mut executor = PipelineExecutor::new(process(true)?, &words_recipe())?;
    let sink = FlakySink::failing(2);

    let err = executor
        .run(&InMemorySource::new(scenario_rows()), &sink)
        .expect_err("first export fails");
    assert!(matches!(err, SieveError::Export(_)));
    assert!(matches!(
        executor.state(),
        ExecutorState::Failed {
            step_index: None,
            ..
        }
    ));
    assert_eq!(executor.dataset().map(Dataset::len), Some(12));

    assert!(executor.retry_export(&sink).is_err());
    let report = executor.retry_export(&sink)?;
    assert_eq!(report.rows_exported, Some(12));
    assert_eq!(report.export_location.as_deref(), Some("datasets/main"));
    assert_eq!(executor.state(), &ExecutorState::Done);

    // Exporting again is idempotent.
    executor.retry_export(&sink)?;
    assert_eq!(sink.attempts.load(Ordering::SeqCst), 4);
    let exported = sink.exported.lock();
    assert_eq!(exported.len(), 1);
    assert_eq!(Some(&exported[0]), executor.dataset());
    Ok(())
}

#[test]
fn cancelled_run_stops_at_step_boundary() -> SieveResult<()> {
    let token = CancellationToken::new();
    let mut executor =
        PipelineExecutor::new(process(false)?, &words_recipe())?.with_cancellation(token.clone());
    token.cancel();

    let err = executor
        .run(&InMemorySource::new(scenario_rows()), &InMemorySink::new())
        .expect_err("cancelled before the first step");
    assert!(matches!(err, SieveError::Cancelled { step_index: 0 }));
    assert!(executor.report().steps.is_empty());
    assert!(executor.state().is_terminal());
    assert!(executor
        .run(&InMemorySource::new(scenario_rows()), &InMemorySink::new())
        .is_err());
    Ok(())
}

#[test]
fn jsonl_round_trip_keeps_fields_and_stats() -> SieveResult<()> {
    let dir = tempfile::tempdir()?;
    let input = dir.path().join("input.jsonl");
    let lines = [
        json!({"text": "the first document has words", "meta": {"lang": "en"}}),
        json!({"text": "short"}),
        json!({"text": "the first document has words", "meta": {"lang": "en"}}),
        json!({"text": "another document, long enough", "__stats__": {"text_len": 1000}}),
    ]
    .iter()
    .map(Value::to_string)
    .collect::<Vec<_>>();
    std::fs::write(&input, format!("{}\n\n", lines.join("\n")))?;

    let recipe = Recipe::default()
        .with_op(OpConfig::new("text_length_filter").with_param("min_len", 10i64))
        .with_op(OpConfig::new("document_deduplicator"));
    let output = dir.path().join("out").join("result.jsonl");
    let mut executor = PipelineExecutor::new(process(true)?, &recipe)?;
    let report = executor.run(&JsonlSource::new(&input), &JsonlSink::new(&output))?;
    assert_eq!(report.rows_ingested, 4);
    assert_eq!(report.export_location, Some(output.display().to_string()));

    let written = std::fs::read_to_string(&output)?;
    let rows = written
        .lines()
        .map(serde_json::from_str::<Value>)
        .collect::<Result<Vec<_>, _>>()?;
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["meta"]["lang"], "en");
    assert_eq!(rows[0]["__stats__"]["text_len"], 28);
    // Stats already present in the input are kept, not recomputed.
    assert_eq!(rows[1]["__stats__"]["text_len"], 1000);
    assert!(rows[1]["__stats__"].get("doc_hash").is_none());
    Ok(())
}

#[test]
fn missing_input_fails_as_ingest_error() -> SieveResult<()> {
    let dir = tempfile::tempdir()?;
    let mut executor = PipelineExecutor::new(process(false)?, &words_recipe())?;
    let err = executor
        .run(
            &JsonlSource::new(dir.path().join("missing.jsonl")),
            &InMemorySink::new(),
        )
        .expect_err("input does not exist");
    assert!(matches!(err, SieveError::Ingest(_)));
    assert_eq!(
        executor.state(),
        &ExecutorState::Failed {
            step_index: None,
            cause: err.to_string(),
        }
    );
    Ok(())
}

#[test]
fn empty_recipe_passes_data_through() -> SieveResult<()> {
    let mut executor = PipelineExecutor::new(process(true)?, &Recipe::default())?;
    let sink = InMemorySink::new();
    let report = executor.run(&InMemorySource::new(scenario_rows()), &sink)?;
    assert!(report.steps.is_empty());
    assert_eq!(sink.dataset(), Some(scenario_rows()));
    Ok(())
}

#[test]
fn run_inside_an_async_context_fails_the_step() -> SieveResult<()> {
    let process = process(false)?;
    let runtime = common_runtime::get_compute_runtime()?;
    let mut executor = PipelineExecutor::new(process, &words_recipe())?;
    let result = runtime.block_on_current_thread(async {
        executor.run(&InMemorySource::new(scenario_rows()), &InMemorySink::new())
    })?;
    match result {
        Err(SieveError::StepExecution { step_index, source, .. }) => {
            assert_eq!(step_index, 0);
            assert!(matches!(*source, SieveError::InternalError(_)));
        }
        other => panic!("expected a step failure, got {other:?}"),
    }
    Ok(())
}

#[rstest]
#[case::one_worker(1.0, None, vec![4, 4, 2])]
#[case::two_workers(2.0, None, vec![4, 1, 4, 1])]
#[case::op_batch_size(1.0, Some(3), vec![3, 3, 3, 1])]
fn batched_operators_get_batch_size_chunks(
    #[case] cpus: f64,
    #[case] op_batch_size: Option<i64>,
    #[case] expected: Vec<usize>,
) -> SieveResult<()> {
    let mapper = BatchRecorder::default();
    let filter = BatchRecorder::default();
    let mut registry = registry()?;
    let recorder = mapper.clone();
    registry.register(
        OperatorDescriptor::new("batch_mapper", OperatorKind::Mapper).batched(),
        move |_| Ok(Operator::mapper(recorder.clone())),
    )?;
    let recorder = filter.clone();
    registry.register(
        OperatorDescriptor::new("batch_filter", OperatorKind::Filter).batched(),
        move |_| Ok(Operator::filter(recorder.clone())),
    )?;
    let config = SieveExecutionConfig {
        default_batch_size: 4,
        ..SieveExecutionConfig::default()
    };
    let process = ProcessContext::with_host(
        registry,
        sieve_functions_text::builtin_providers()?,
        config,
        HostCapacity::new(cpus, 16.0, 0),
    )?;

    let with_batch = |op: OpConfig| match op_batch_size {
        Some(batch_size) => op.with_param("batch_size", batch_size),
        None => op,
    };
    let recipe = Recipe::default()
        .with_op(with_batch(OpConfig::new("batch_mapper")))
        .with_op(with_batch(OpConfig::new("batch_filter")));
    let mut executor = PipelineExecutor::new(process, &recipe)?;
    let sink = InMemorySink::new();
    executor.run(&InMemorySource::new(scenario_rows()), &sink)?;

    // Workers record their batches in any order.
    let mut mapped = mapper.sizes.lock().clone();
    let mut filtered = filter.sizes.lock().clone();
    let mut expected_sorted = expected.clone();
    mapped.sort_unstable();
    filtered.sort_unstable();
    expected_sorted.sort_unstable();
    assert_eq!(mapped, expected_sorted);
    assert_eq!(filtered, expected_sorted);
    assert_eq!(sink.dataset().map(|d| ids(&d)), Some((0..10).collect()));
    Ok(())
}
