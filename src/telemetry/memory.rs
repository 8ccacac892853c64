use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use super::{TelemetryResult, TelemetrySink};

/// One scalar as it was reported.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedScalar {
    pub title: String,
    pub series: String,
    pub value: f64,
    pub step: u64,
}

#[derive(Debug, Default)]
struct Recorded {
    project: Option<String>,
    task: Option<String>,
    params: Option<Value>,
    tags: Vec<String>,
    scalars: Vec<RecordedScalar>,
    closed: bool,
}

/// Keeps everything it receives in memory.
///
/// Clones share the same storage, so a clone handed to [`Telemetry`](super::Telemetry)
/// can be inspected through the original.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    inner: Arc<Mutex<Recorded>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn project(&self) -> Option<String> {
        self.inner.lock().project.clone()
    }

    pub fn task(&self) -> Option<String> {
        self.inner.lock().task.clone()
    }

    pub fn params(&self) -> Option<Value> {
        self.inner.lock().params.clone()
    }

    pub fn tags(&self) -> Vec<String> {
        self.inner.lock().tags.clone()
    }

    pub fn scalars(&self) -> Vec<RecordedScalar> {
        self.inner.lock().scalars.clone()
    }

    /// Scalars of one title, in reporting order.
    pub fn series(&self, title: &str) -> Vec<RecordedScalar> {
        self.inner
            .lock()
            .scalars
            .iter()
            .filter(|s| s.title == title)
            .cloned()
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }
}

#[async_trait]
impl TelemetrySink for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    async fn start_task(&self, project: &str, task: &str) -> TelemetryResult<()> {
        let mut inner = self.inner.lock();
        inner.project = Some(project.to_string());
        inner.task = Some(task.to_string());
        Ok(())
    }

    async fn connect(&self, params: &Value) -> TelemetryResult<()> {
        self.inner.lock().params = Some(params.clone());
        Ok(())
    }

    async fn add_tags(&self, tags: &[String]) -> TelemetryResult<()> {
        self.inner.lock().tags.extend(tags.iter().cloned());
        Ok(())
    }

    async fn report_scalar(
        &self,
        title: &str,
        series: &str,
        value: f64,
        step: u64,
    ) -> TelemetryResult<()> {
        self.inner.lock().scalars.push(RecordedScalar {
            title: title.to_string(),
            series: series.to_string(),
            value,
            step,
        });
        Ok(())
    }

    async fn close(&self) -> TelemetryResult<()> {
        self.inner.lock().closed = true;
        Ok(())
    }
}
