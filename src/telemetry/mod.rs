//! Forwarding of job metrics to experiment trackers.
//!
//! The job reports through a [`Telemetry`] value built from
//! [`TelemetryConfig`]. It fans every call out to its sinks; a failing sink
//! is logged and otherwise ignored.

mod log_sink;
mod memory;
mod mlflow;

pub use log_sink::LogSink;
pub use memory::{MemorySink, RecordedScalar};
pub use mlflow::MlflowSink;

use async_trait::async_trait;
use serde_json::Value;

use crate::config::TelemetryConfig;

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{endpoint} returned {status}: {body}")]
    Api {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("unexpected response from {endpoint}: {message}")]
    Response { endpoint: String, message: String },

    #[error("no task started")]
    NoTask,
}

pub type TelemetryResult<T> = std::result::Result<T, TelemetryError>;

/// A destination for job metrics.
#[async_trait]
pub trait TelemetrySink: Send + Sync {
    /// Short name used in log messages.
    fn name(&self) -> &str;

    /// Begin a task (one job) under a project.
    async fn start_task(&self, project: &str, task: &str) -> TelemetryResult<()>;

    /// Attach the job's parameters to the current task.
    async fn connect(&self, params: &Value) -> TelemetryResult<()>;

    async fn add_tags(&self, tags: &[String]) -> TelemetryResult<()>;

    async fn report_scalar(
        &self,
        title: &str,
        series: &str,
        value: f64,
        step: u64,
    ) -> TelemetryResult<()>;

    /// Flush anything buffered and finish the task.
    async fn close(&self) -> TelemetryResult<()>;
}

/// Fans telemetry calls out to zero or more sinks.
#[derive(Default)]
pub struct Telemetry {
    sinks: Vec<Box<dyn TelemetrySink>>,
}

impl Telemetry {
    /// Telemetry that drops everything.
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn from_config(config: &TelemetryConfig) -> Self {
        let mut telemetry = Self::default();
        if !config.enabled {
            return telemetry;
        }
        if config.log_scalars {
            telemetry.add_sink(LogSink::new());
        }
        if let Some(mlflow) = &config.mlflow {
            telemetry.add_sink(MlflowSink::new(mlflow));
        }
        telemetry
    }

    pub fn add_sink(&mut self, sink: impl TelemetrySink + 'static) {
        self.sinks.push(Box::new(sink));
    }

    pub fn has_sinks(&self) -> bool {
        !self.sinks.is_empty()
    }

    pub async fn start_task(&self, project: &str, task: &str) {
        for sink in &self.sinks {
            if let Err(e) = sink.start_task(project, task).await {
                tracing::warn!("Telemetry sink '{}' failed to start task: {}", sink.name(), e);
            }
        }
    }

    pub async fn connect(&self, params: &Value) {
        for sink in &self.sinks {
            if let Err(e) = sink.connect(params).await {
                tracing::warn!("Telemetry sink '{}' failed to record params: {}", sink.name(), e);
            }
        }
    }

    pub async fn add_tags(&self, tags: &[String]) {
        for sink in &self.sinks {
            if let Err(e) = sink.add_tags(tags).await {
                tracing::warn!("Telemetry sink '{}' failed to add tags: {}", sink.name(), e);
            }
        }
    }

    pub async fn report_scalar(&self, title: &str, series: &str, value: f64, step: u64) {
        for sink in &self.sinks {
            if let Err(e) = sink.report_scalar(title, series, value, step).await {
                tracing::warn!(
                    "Telemetry sink '{}' failed to report {}/{}: {}",
                    sink.name(),
                    title,
                    series,
                    e
                );
            }
        }
    }

    pub async fn close(&self) {
        for sink in &self.sinks {
            if let Err(e) = sink.close().await {
                tracing::warn!("Telemetry sink '{}' failed to close: {}", sink.name(), e);
            }
        }
    }
}

impl std::fmt::Debug for Telemetry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Telemetry")
            .field(
                "sinks",
                &self.sinks.iter().map(|s| s.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MlflowConfig;

    struct FailingSink;

    #[async_trait]
    impl TelemetrySink for FailingSink {
        fn name(&self) -> &str {
            "failing"
        }
        async fn start_task(&self, _: &str, _: &str) -> TelemetryResult<()> {
            Err(TelemetryError::NoTask)
        }
        async fn connect(&self, _: &Value) -> TelemetryResult<()> {
            Err(TelemetryError::NoTask)
        }
        async fn add_tags(&self, _: &[String]) -> TelemetryResult<()> {
            Err(TelemetryError::NoTask)
        }
        async fn report_scalar(&self, _: &str, _: &str, _: f64, _: u64) -> TelemetryResult<()> {
            Err(TelemetryError::NoTask)
        }
        async fn close(&self) -> TelemetryResult<()> {
            Err(TelemetryError::NoTask)
        }
    }

    #[tokio::test]
    async fn failing_sink_does_not_stop_others() {
        let memory = MemorySink::new();
        let mut telemetry = Telemetry::disabled();
        telemetry.add_sink(FailingSink);
        telemetry.add_sink(memory.clone());

        telemetry.start_task("ev-div", "Render heat1").await;
        telemetry.add_tags(&["mfr=4".to_string()]).await;
        telemetry.report_scalar("Render performance", "spf", 1.5, 20).await;
        telemetry.close().await;

        assert_eq!(memory.task().as_deref(), Some("Render heat1"));
        assert_eq!(memory.tags(), vec!["mfr=4"]);
        assert_eq!(memory.scalars().len(), 1);
        assert!(memory.is_closed());
    }

    #[test]
    fn from_config_builds_sinks() {
        let disabled = TelemetryConfig {
            enabled: false,
            log_scalars: true,
            mlflow: None,
        };
        assert!(!Telemetry::from_config(&disabled).has_sinks());

        let config = TelemetryConfig {
            enabled: true,
            log_scalars: true,
            mlflow: Some(MlflowConfig {
                uri: "http://localhost:5000".into(),
                experiment: None,
                timeout_secs: 5,
                metric_batch_size: 10,
            }),
        };
        let telemetry = Telemetry::from_config(&config);
        assert_eq!(format!("{telemetry:?}"), r#"Telemetry { sinks: ["log", "mlflow"] }"#);
    }
}
