use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        LazyLock, Mutex,
    },
    time::Duration,
};

use common_error::{SieveError, SieveResult};
use common_runtime::get_io_runtime;
use opentelemetry::{global, trace::TracerProvider, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    trace::{Sampler, SdkTracerProvider},
    Resource,
};
use tracing_chrome::ChromeLayerBuilder;
use tracing_subscriber::{prelude::*, EnvFilter, Layer, Registry};

static TRACING_INIT: AtomicBool = AtomicBool::new(false);

static CHROME_GUARD_HANDLE: LazyLock<Mutex<Option<tracing_chrome::FlushGuard>>> =
    LazyLock::new(|| Mutex::new(None));

static GLOBAL_TRACER_PROVIDER: LazyLock<Mutex<Option<SdkTracerProvider>>> =
    LazyLock::new(|| Mutex::new(None));

const OTEL_EXPORTER_OTLP_ENDPOINT: &str = "SIEVE_DEV_OTEL_EXPORTER_OTLP_ENDPOINT";
const CHROME_TRACE: &str = "SIEVE_DEV_ENABLE_CHROME_TRACE";

pub fn should_enable_opentelemetry() -> bool {
    std::env::var(OTEL_EXPORTER_OTLP_ENDPOINT).is_ok()
}

pub fn should_enable_chrome_trace() -> bool {
    std::env::var(CHROME_TRACE)
        .map(|val| matches!(val.trim().to_lowercase().as_str(), "1" | "true"))
        .unwrap_or(false)
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync + 'static>;

/// Installs the global subscriber: stderr logging filtered by `RUST_LOG`, plus
/// optional chrome trace and OTLP span export.
///
/// `log` records emitted by library code are bridged into the same subscriber.
pub fn init_tracing(enable_chrome_trace: bool) -> SieveResult<()> {
    if TRACING_INIT.swap(true, Ordering::Relaxed) {
        return Err(SieveError::InternalError(
            "Cannot init tracing, already initialized!".to_string(),
        ));
    }

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let mut layers: Vec<BoxedLayer> = vec![tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(env_filter)
        .boxed()];

    if enable_chrome_trace {
        let (chrome_layer, guard) = ChromeLayerBuilder::new()
            .trace_style(tracing_chrome::TraceStyle::Threaded)
            .include_args(true)
            .build();
        layers.push(chrome_layer.boxed());
        *lock(&CHROME_GUARD_HANDLE)? = Some(guard);
    }

    if let Some(telemetry_layer) = init_opentelemetry_layer()? {
        layers.push(telemetry_layer);
    }

    tracing_subscriber::registry()
        .with(layers)
        .try_init()
        .map_err(|e| SieveError::External(e.into()))
}

fn init_opentelemetry_layer() -> SieveResult<Option<BoxedLayer>> {
    let Ok(otlp_endpoint) = std::env::var(OTEL_EXPORTER_OTLP_ENDPOINT) else {
        return Ok(None);
    };

    let mut mg = lock(&GLOBAL_TRACER_PROVIDER)?;
    if mg.is_some() {
        return Err(SieveError::InternalError(
            "Expected tracer provider to be None on init".to_string(),
        ));
    }

    let resource = Resource::builder()
        .with_attribute(KeyValue::new("service.name", "sieve"))
        .build();

    // The tonic channel has to be created inside a tokio context.
    let exporter = get_io_runtime()?.block_on_current_thread(async {
        opentelemetry_otlp::SpanExporter::builder()
            .with_tonic()
            .with_endpoint(otlp_endpoint)
            .with_timeout(Duration::from_secs(10))
            .build()
    })?;
    let exporter = exporter.map_err(|e| SieveError::External(e.into()))?;

    let tracer_provider = SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(resource)
        .with_sampler(Sampler::AlwaysOn)
        .build();
    global::set_tracer_provider(tracer_provider.clone());
    let tracer = tracer_provider.tracer("sieve-otel-tracer");

    let telemetry_layer = tracing_opentelemetry::layer()
        .with_tracer(tracer)
        .with_filter(tracing::level_filters::LevelFilter::INFO)
        .boxed();

    *mg = Some(tracer_provider);
    Ok(Some(telemetry_layer))
}

/// Flushes pending OTLP spans and the chrome trace file, if either is enabled.
pub fn flush_tracing() {
    if let Ok(mg) = GLOBAL_TRACER_PROVIDER.lock() {
        if let Some(tracer_provider) = mg.as_ref() {
            if let Err(e) = tracer_provider.force_flush() {
                log::warn!("Failed to flush OTLP tracer provider: {}", e);
            }
        }
    }
    if let Ok(mut mg) = CHROME_GUARD_HANDLE.lock() {
        if let Some(guard) = mg.as_mut() {
            guard.flush();
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> SieveResult<std::sync::MutexGuard<'_, T>> {
    m.lock()
        .map_err(|_| SieveError::InternalError("tracing state lock poisoned".to_string()))
}

/// Attributes attached to a pipeline span.
///
/// Unset attributes are left empty on the span.
#[derive(Debug, Default, Clone)]
pub struct SpanAttributes {
    pub op_name: Option<String>,
    pub step_index: Option<usize>,
    pub worker_count: Option<usize>,
    pub gpu_ranks: Option<Vec<usize>>,
    pub cpu_cores: Option<f64>,
    pub memory_gb: Option<f64>,
    pub rows_in: Option<usize>,
    pub rows_out: Option<usize>,
}

impl SpanAttributes {
    #[must_use]
    pub fn with_op_name(mut self, op_name: impl Into<String>) -> Self {
        self.op_name = Some(op_name.into());
        self
    }

    #[must_use]
    pub fn with_step_index(mut self, step_index: usize) -> Self {
        self.step_index = Some(step_index);
        self
    }

    #[must_use]
    pub fn with_rows_in(mut self, rows_in: usize) -> Self {
        self.rows_in = Some(rows_in);
        self
    }

    pub fn record(&self, span: &tracing::Span) {
        if let Some(op_name) = &self.op_name {
            span.record("op.name", op_name.as_str());
        }
        if let Some(step_index) = self.step_index {
            span.record("step.index", step_index);
        }
        if let Some(worker_count) = self.worker_count {
            span.record("alloc.workers", worker_count);
        }
        if let Some(gpu_ranks) = &self.gpu_ranks {
            span.record("alloc.gpu_ranks", format!("{gpu_ranks:?}").as_str());
        }
        if let Some(cpu_cores) = self.cpu_cores {
            span.record("request.cpu_cores", cpu_cores);
        }
        if let Some(memory_gb) = self.memory_gb {
            span.record("request.memory_gb", memory_gb);
        }
        if let Some(rows_in) = self.rows_in {
            span.record("rows_in", rows_in);
        }
        if let Some(rows_out) = self.rows_out {
            span.record("rows_out", rows_out);
        }
    }
}

/// Opens a span bracketing one pipeline phase (ingest, a plan step, export).
///
/// Without an explicit `parent` the span nests under the current span. The
/// returned span is not entered; callers enter it for the duration of the block.
pub fn trace_block(
    operation: &str,
    parent: Option<&tracing::Span>,
    attributes: &SpanAttributes,
) -> tracing::Span {
    let parent_id = parent.map_or_else(|| tracing::Span::current().id(), tracing::Span::id);
    let span = tracing::info_span!(
        parent: parent_id,
        "sieve.block",
        otel.name = operation,
        op.name = tracing::field::Empty,
        step.index = tracing::field::Empty,
        alloc.workers = tracing::field::Empty,
        alloc.gpu_ranks = tracing::field::Empty,
        request.cpu_cores = tracing::field::Empty,
        request.memory_gb = tracing::field::Empty,
        rows_in = tracing::field::Empty,
        rows_out = tracing::field::Empty,
    );
    attributes.record(&span);
    span
}

#[cfg(test)]
mod tests {
    use super::{trace_block, SpanAttributes};

    #[test]
    fn trace_block_without_subscriber_is_inert() {
        let attrs = SpanAttributes::default()
            .with_op_name("words_num_filter")
            .with_step_index(2)
            .with_rows_in(10);
        let span = trace_block("pipeline.step", None, &attrs);
        let _entered = span.enter();
        span.record("rows_out", 4usize);
    }

    #[test]
    fn span_attributes_builder_sets_fields() {
        let attrs = SpanAttributes::default()
            .with_op_name("text_chunk_mapper")
            .with_step_index(0);
        assert_eq!(attrs.op_name.as_deref(), Some("text_chunk_mapper"));
        assert_eq!(attrs.step_index, Some(0));
        assert!(attrs.worker_count.is_none());
    }
}
