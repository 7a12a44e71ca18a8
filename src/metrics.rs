// Prometheus metrics for the job pipeline
//
// Exposed on the /metrics HTTP endpoint:
// - Job outcomes (counter)
// - Running jobs (gauge)
// - External fetch latency (histogram)
// - Quota reservations and compensations (counter)
// - Tracked entity locks (gauge)

use lazy_static::lazy_static;
use prometheus::{
    Encoder, HistogramVec, IntCounter, IntCounterVec, IntGauge, Registry, TextEncoder,
};
use std::sync::Arc;

lazy_static! {
    pub static ref REGISTRY: Arc<Registry> = Arc::new(Registry::new());

    pub static ref JOBS_SUBMITTED_TOTAL: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new("jobs_submitted_total", "Submitted jobs by terminal outcome"),
        &["outcome"]
    ).expect("Failed to create jobs submitted metric");

    pub static ref JOBS_RUNNING: IntGauge = IntGauge::new(
        "jobs_running",
        "Number of jobs currently holding a concurrency slot"
    ).expect("Failed to create jobs running metric");

    pub static ref FETCH_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        prometheus::HistogramOpts::new("fetch_duration_seconds", "External fetch duration in seconds"),
        &["status"]
    ).expect("Failed to create fetch duration metric");

    pub static ref QUOTA_RESERVATIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new("quota_reservations_total", "Quota reservation attempts by result"),
        &["result"]
    ).expect("Failed to create quota reservations metric");

    pub static ref QUOTA_COMPENSATIONS_TOTAL: IntCounter = IntCounter::new(
        "quota_compensations_total",
        "Reservations rolled back after a failed job"
    ).expect("Failed to create quota compensations metric");

    pub static ref TRACKED_ENTITY_LOCKS: IntGauge = IntGauge::new(
        "tracked_entity_locks",
        "Entities currently tracked by the lock registry"
    ).expect("Failed to create tracked entity locks metric");
}

fn register<M>(collector: &M) -> prometheus::Result<()>
where
    M: prometheus::core::Collector + Clone + 'static,
{
    match REGISTRY.register(Box::new(collector.clone())) {
        Ok(()) | Err(prometheus::Error::AlreadyReg) => Ok(()),
        Err(e) => Err(e),
    }
}

/// Register all collectors with the registry; safe to call more than once
pub fn init() -> prometheus::Result<()> {
    register(&*JOBS_SUBMITTED_TOTAL)?;
    register(&*JOBS_RUNNING)?;
    register(&*FETCH_DURATION_SECONDS)?;
    register(&*QUOTA_RESERVATIONS_TOTAL)?;
    register(&*QUOTA_COMPENSATIONS_TOTAL)?;
    register(&*TRACKED_ENTITY_LOCKS)?;
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
    fn test_init_is_idempotent() {
        assert!(init().is_ok());
        assert!(init().is_ok());
    }

    #[test]
    fn test_gather_includes_job_counters() {
        init().unwrap();
        JOBS_SUBMITTED_TOTAL.with_label_values(&["busy"]).inc();

        let text = gather_metrics().unwrap();
        assert!(text.contains("jobs_submitted_total"));
    }
}
