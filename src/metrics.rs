// Prometheus metrics for the validation and execution engine
//
// The registry is process-local and exposed through the library only; there
// is no serving endpoint here. Counters cover both sides of the engine:
// - validation verdicts (by result)
// - rejections (by failing check)
// - executions (by status)
// - execution latencies (histogram)

use lazy_static::lazy_static;
use prometheus::{CounterVec, Encoder, Histogram, Registry, TextEncoder};
use std::sync::Arc;

lazy_static! {
    pub static ref REGISTRY: Arc<Registry> = Arc::new(Registry::new());

    pub static ref COMMAND_VALIDATIONS_TOTAL: CounterVec = CounterVec::new(
        prometheus::Opts::new("command_validations_total", "Total validation verdicts produced"),
        &["result"]
    ).expect("Failed to create command validations metric");

    pub static ref VALIDATION_REJECTIONS_TOTAL: CounterVec = CounterVec::new(
        prometheus::Opts::new("validation_rejections_total", "Rejections by failing check"),
        &["check"]
    ).expect("Failed to create validation rejections metric");

    pub static ref COMMAND_EXECUTIONS_TOTAL: CounterVec = CounterVec::new(
        prometheus::Opts::new("command_executions_total", "Total command executions by status"),
        &["status"]
    ).expect("Failed to create command executions metric");

    pub static ref EXECUTION_DURATION_SECONDS: Histogram = Histogram::with_opts(
        prometheus::HistogramOpts::new("execution_duration_seconds", "Command execution duration in seconds"),
    ).expect("Failed to create execution duration metric");
}

/// Initialize metrics registry - must be called once at startup
pub fn init() -> prometheus::Result<()> {
    REGISTRY.register(Box::new(COMMAND_VALIDATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(VALIDATION_REJECTIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(COMMAND_EXECUTIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(EXECUTION_DURATION_SECONDS.clone()))?;
    Ok(())
}

/// Gather all metrics in Prometheus text format
pub fn gather_metrics() -> anyhow::Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| anyhow::anyhow!("Failed to encode metrics: {}", e))?;
    String::from_utf8(buffer).map_err(|e| anyhow::anyhow!("Invalid UTF-8 in metrics: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_metrics() {
        // Registration is once-per-process; a second call reports the
        // duplicate, which is fine for tests running in one binary.
        let _ = init();
    }

    #[test]
    fn test_validation_counters() {
        let _ = init();
        COMMAND_VALIDATIONS_TOTAL.with_label_values(&["passed"]).inc();
        VALIDATION_REJECTIONS_TOTAL
            .with_label_values(&["no_shell_metacharacters"])
            .inc();
        assert!(!REGISTRY.gather().is_empty());
    }

    #[test]
    fn test_gather_metrics_text_format() {
        let _ = init();
        COMMAND_EXECUTIONS_TOTAL.with_label_values(&["success"]).inc();
        let text = gather_metrics().unwrap();
        assert!(text.contains("command_executions_total"));
    }
}
