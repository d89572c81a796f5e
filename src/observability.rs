use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info};

#[cfg(feature = "metrics-server")]
pub mod server;

#[derive(Debug, Default, Serialize, Clone)]
pub struct MetricsSnapshot {
    pub steps: BTreeMap<String, StepMetrics>,
    pub downloads_resolved: u64,
    pub download_polls: u64,
    pub download_wait_ms: f64,
    pub pipelines_succeeded: u64,
    pub pipelines_failed: u64,
    pub total_duration_ms: f64,
}

#[derive(Debug, Default, Serialize, Clone)]
pub struct StepMetrics {
    pub calls: u64,
    pub failures: u64,
    pub total_duration_ms: f64,
    pub max_duration_ms: f64,
}

#[derive(Debug, Default, Clone)]
pub struct MetricsCollector {
    inner: Arc<Mutex<MetricsSnapshot>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start_step(&self, step_tag: &str) -> StepTimer {
        StepTimer {
            step: step_tag.to_string(),
            started_at: Instant::now(),
            collector: self.inner.clone(),
            failed: false,
            recorded: false,
        }
    }

    pub fn record_download(&self, polls: u64, waited: Duration) {
        if let Ok(mut guard) = self.inner.lock() {
            guard.downloads_resolved += 1;
            guard.download_polls += polls;
            guard.download_wait_ms += waited.as_secs_f64() * 1_000.0;
        }
    }

    pub fn record_pipeline(&self, succeeded: bool) {
        if let Ok(mut guard) = self.inner.lock() {
            if succeeded {
                guard.pipelines_succeeded += 1;
            } else {
                guard.pipelines_failed += 1;
            }
        }
    }

    pub fn record_total_duration(&self, duration: Duration) {
        if let Ok(mut guard) = self.inner.lock() {
            guard.total_duration_ms = duration.as_secs_f64() * 1_000.0;
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.inner.lock().map(|g| g.clone()).unwrap_or_default()
    }

    pub fn reset(&self) {
        if let Ok(mut guard) = self.inner.lock() {
            *guard = MetricsSnapshot::default();
        }
    }
}

/// Records the step's duration when dropped.
pub struct StepTimer {
    step: String,
    started_at: Instant,
    collector: Arc<Mutex<MetricsSnapshot>>,
    failed: bool,
    recorded: bool,
}

impl StepTimer {
    pub fn mark_failed(&mut self) {
        self.failed = true;
    }

    fn record(&mut self) {
        if self.recorded {
            return;
        }
        let duration = self.started_at.elapsed();
        let duration_ms = duration.as_secs_f64() * 1_000.0;
        if let Ok(mut guard) = self.collector.lock() {
            let metrics = guard.steps.entry(self.step.clone()).or_default();
            metrics.calls += 1;
            if self.failed {
                metrics.failures += 1;
            }
            metrics.total_duration_ms += duration_ms;
            if duration_ms > metrics.max_duration_ms {
                metrics.max_duration_ms = duration_ms;
            }
        }
        debug!(
            step = self.step.as_str(),
            duration_ms,
            failed = self.failed,
            "Step duration recorded"
        );
        self.recorded = true;
    }
}

impl Drop for StepTimer {
    fn drop(&mut self) {
        self.record();
    }
}

pub fn log_snapshot(snapshot: &MetricsSnapshot) {
    info!(
        total_duration_ms = snapshot.total_duration_ms,
        pipelines_succeeded = snapshot.pipelines_succeeded,
        pipelines_failed = snapshot.pipelines_failed,
        downloads = snapshot.downloads_resolved,
        download_wait_ms = snapshot.download_wait_ms,
        "Run metrics summary"
    );
    for (step, metrics) in &snapshot.steps {
        info!(
            step = step.as_str(),
            calls = metrics.calls,
            failures = metrics.failures,
            total_ms = metrics.total_duration_ms,
            max_ms = metrics.max_duration_ms,
            "Step metrics"
        );
    }
}

impl MetricsSnapshot {
    pub fn to_prometheus(&self) -> String {
        let mut output = String::new();
        push_counter(
            &mut output,
            "pipe_pipelines_succeeded_total",
            "Pipelines that produced a final artifact",
            self.pipelines_succeeded,
        );
        push_counter(
            &mut output,
            "pipe_pipelines_failed_total",
            "Pipelines that stopped on an error",
            self.pipelines_failed,
        );
        push_counter(
            &mut output,
            "pipe_downloads_total",
            "Manual downloads resolved",
            self.downloads_resolved,
        );
        push_counter(
            &mut output,
            "pipe_download_polls_total",
            "Directory polls spent waiting for downloads",
            self.download_polls,
        );
        output.push_str(
            "# HELP pipe_download_wait_seconds_total Time spent waiting for downloads\n",
        );
        output.push_str("# TYPE pipe_download_wait_seconds_total counter\n");
        output.push_str(&format!(
            "pipe_download_wait_seconds_total {:.6}\n",
            self.download_wait_ms / 1_000.0
        ));

        output.push_str("# HELP pipe_step_calls_total Step invocation count\n");
        output.push_str("# TYPE pipe_step_calls_total counter\n");
        output.push_str("# HELP pipe_step_failures_total Step invocations that failed\n");
        output.push_str("# TYPE pipe_step_failures_total counter\n");
        output.push_str(
            "# HELP pipe_step_duration_seconds_total Accumulated step duration in seconds\n",
        );
        output.push_str("# TYPE pipe_step_duration_seconds_total counter\n");
        output.push_str("# HELP pipe_step_duration_seconds_max Maximum step duration in seconds\n");
        output.push_str("# TYPE pipe_step_duration_seconds_max gauge\n");
        for (step, metrics) in &self.steps {
            output.push_str(&format!(
                "pipe_step_calls_total{{step=\"{}\"}} {}\n",
                step, metrics.calls
            ));
            output.push_str(&format!(
                "pipe_step_failures_total{{step=\"{}\"}} {}\n",
                step, metrics.failures
            ));
            output.push_str(&format!(
                "pipe_step_duration_seconds_total{{step=\"{}\"}} {:.6}\n",
                step,
                metrics.total_duration_ms / 1_000.0
            ));
            output.push_str(&format!(
                "pipe_step_duration_seconds_max{{step=\"{}\"}} {:.6}\n",
                step,
                metrics.max_duration_ms / 1_000.0
            ));
        }
        output.push_str("# HELP pipe_run_duration_seconds Total run duration\n");
        output.push_str("# TYPE pipe_run_duration_seconds gauge\n");
        output.push_str(&format!(
            "pipe_run_duration_seconds {:.6}\n",
            self.total_duration_ms / 1_000.0
        ));
        output
    }
}

fn push_counter(output: &mut String, name: &str, help: &str, value: u64) {
    output.push_str(&format!("# HELP {name} {help}\n"));
    output.push_str(&format!("# TYPE {name} counter\n"));
    output.push_str(&format!("{name} {value}\n"));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timers_accumulate_per_step_tag() {
        let metrics = MetricsCollector::new();
        drop(metrics.start_step("trim"));
        let mut failing = metrics.start_step("trim");
        failing.mark_failed();
        drop(failing);
        drop(metrics.start_step("upscale"));
        metrics.record_download(4, Duration::from_millis(1500));
        metrics.record_pipeline(true);
        metrics.record_pipeline(false);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.steps["trim"].calls, 2);
        assert_eq!(snapshot.steps["trim"].failures, 1);
        assert_eq!(snapshot.steps["upscale"].calls, 1);
        assert_eq!(snapshot.download_polls, 4);
        assert_eq!(snapshot.pipelines_failed, 1);

        let prom = snapshot.to_prometheus();
        assert!(prom.contains("pipe_step_calls_total{step=\"trim\"} 2"));
        assert!(prom.contains("pipe_download_wait_seconds_total 1.500000"));
        assert!(prom.contains("pipe_pipelines_succeeded_total 1"));

        metrics.reset();
        assert!(metrics.snapshot().steps.is_empty());
    }
}
