use async_trait::async_trait;
use serde_json::Value;

use super::{TelemetryResult, TelemetrySink};

/// Writes telemetry to the tracing log.
#[derive(Debug, Default)]
pub struct LogSink;

impl LogSink {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TelemetrySink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    async fn start_task(&self, project: &str, task: &str) -> TelemetryResult<()> {
        tracing::info!(project, task, "Telemetry task started");
        Ok(())
    }

    async fn connect(&self, params: &Value) -> TelemetryResult<()> {
        tracing::debug!("Job params: {}", params);
        Ok(())
    }

    async fn add_tags(&self, tags: &[String]) -> TelemetryResult<()> {
        tracing::info!("Telemetry tags: {}", tags.join(", "));
        Ok(())
    }

    async fn report_scalar(
        &self,
        title: &str,
        series: &str,
        value: f64,
        step: u64,
    ) -> TelemetryResult<()> {
        tracing::debug!(title, series, value, step, "scalar");
        Ok(())
    }

    async fn close(&self) -> TelemetryResult<()> {
        Ok(())
    }
}
