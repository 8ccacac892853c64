//! MLflow tracking server sink, over the REST API.

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::{Client, StatusCode};
use serde_json::{json, Map, Value};
use tokio::task::JoinHandle;

use super::{TelemetryError, TelemetryResult, TelemetrySink};
use crate::config::MlflowConfig;

/// MLflow rejects batches with more params than this.
const MAX_PARAMS_PER_BATCH: usize = 100;
/// MLflow's limit on param value length.
const MAX_PARAM_VALUE_LEN: usize = 500;
const LOG_BATCH: &str = "runs/log-batch";

#[derive(Debug, Default)]
struct RunState {
    run_id: Option<String>,
    metrics: Vec<Value>,
}

/// Sends job telemetry to an MLflow tracking server.
///
/// Each task becomes a run inside an experiment named after the project (or
/// the configured experiment). Scalars are buffered and sent with
/// `runs/log-batch`; a full buffer is posted from a background task so
/// reporting never waits on the server, and `close` waits for those posts
/// before sending what is left.
pub struct MlflowSink {
    client: Client,
    base_url: String,
    experiment: Option<String>,
    batch_size: usize,
    state: Mutex<RunState>,
    in_flight: Mutex<Vec<JoinHandle<()>>>,
}

impl MlflowSink {
    pub fn new(config: &MlflowConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!("Failed to build HTTP client: {}", e);
                Client::new()
            });

        Self {
            client,
            base_url: config.uri.trim_end_matches('/').to_string(),
            experiment: config.experiment.clone(),
            batch_size: config.metric_batch_size.max(1),
            state: Mutex::new(RunState::default()),
            in_flight: Mutex::new(Vec::new()),
        }
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/api/2.0/mlflow/{}", self.base_url, endpoint)
    }

    fn run_id(&self) -> TelemetryResult<String> {
        self.state.lock().run_id.clone().ok_or(TelemetryError::NoTask)
    }

    async fn post(&self, endpoint: &str, body: &Value) -> TelemetryResult<Value> {
        post_json(&self.client, self.url(endpoint), endpoint, body).await
    }

    fn spawn_batch(&self, run_id: String, metrics: Vec<Value>) {
        let client = self.client.clone();
        let url = self.url(LOG_BATCH);
        let handle = tokio::spawn(async move {
            let body = json!({ "run_id": run_id, "metrics": metrics });
            if let Err(e) = post_json(&client, url, LOG_BATCH, &body).await {
                tracing::warn!("MLflow metric batch failed: {}", e);
            }
        });

        let mut in_flight = self.in_flight.lock();
        in_flight.retain(|h| !h.is_finished());
        in_flight.push(handle);
    }

    async fn wait_for_batches(&self) {
        let pending = std::mem::take(&mut *self.in_flight.lock());
        for handle in pending {
            if let Err(e) = handle.await {
                tracing::warn!("MLflow metric batch task failed: {}", e);
            }
        }
    }

    async fn experiment_id(&self, name: &str) -> TelemetryResult<String> {
        let endpoint = "experiments/get-by-name";
        let response = self
            .client
            .get(self.url(endpoint))
            .query(&[("experiment_name", name)])
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            tracing::info!("Creating MLflow experiment {}", name);
            let created = self
                .post("experiments/create", &json!({ "name": name }))
                .await?;
            return string_field(&created, &["experiment_id"], "experiments/create");
        }

        let body = read_response(endpoint, response).await?;
        string_field(&body, &["experiment", "experiment_id"], endpoint)
    }

    async fn flush_metrics(&self) -> TelemetryResult<()> {
        let (run_id, metrics) = {
            let mut state = self.state.lock();
            let Some(run_id) = state.run_id.clone() else {
                return Ok(());
            };
            (run_id, std::mem::take(&mut state.metrics))
        };
        if metrics.is_empty() {
            return Ok(());
        }
        self.post(LOG_BATCH, &json!({ "run_id": run_id, "metrics": metrics }))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl TelemetrySink for MlflowSink {
    fn name(&self) -> &str {
        "mlflow"
    }

    async fn start_task(&self, project: &str, task: &str) -> TelemetryResult<()> {
        let experiment = self.experiment.as_deref().unwrap_or(project);
        let experiment_id = self.experiment_id(experiment).await?;

        let created = self
            .post(
                "runs/create",
                &json!({
                    "experiment_id": experiment_id,
                    "run_name": task,
                    "start_time": now_millis(),
                    "tags": [
                        { "key": "mlflow.runName", "value": task },
                        { "key": "project", "value": project },
                    ],
                }),
            )
            .await?;
        let run_id = string_field(&created, &["run", "info", "run_id"], "runs/create")?;
        tracing::info!("Started MLflow run {} for {}", run_id, task);

        let mut state = self.state.lock();
        state.run_id = Some(run_id);
        state.metrics.clear();
        Ok(())
    }

    async fn connect(&self, params: &Value) -> TelemetryResult<()> {
        let run_id = self.run_id()?;
        let mut flat = Vec::new();
        flatten_params("", params, &mut flat);

        for chunk in flat.chunks(MAX_PARAMS_PER_BATCH) {
            let params: Vec<Value> = chunk
                .iter()
                .map(|(key, value)| json!({ "key": key, "value": value }))
                .collect();
            self.post(
                "runs/log-batch",
                &json!({ "run_id": run_id, "params": params }),
            )
            .await?;
        }
        Ok(())
    }

    async fn add_tags(&self, tags: &[String]) -> TelemetryResult<()> {
        let run_id = self.run_id()?;
        let tags: Vec<Value> = tags
            .iter()
            .map(|tag| match tag.split_once('=') {
                Some((key, value)) => json!({ "key": key, "value": value }),
                None => json!({ "key": tag, "value": "true" }),
            })
            .collect();
        self.post("runs/log-batch", &json!({ "run_id": run_id, "tags": tags }))
            .await?;
        Ok(())
    }

    async fn report_scalar(
        &self,
        title: &str,
        series: &str,
        value: f64,
        step: u64,
    ) -> TelemetryResult<()> {
        let batch = {
            let mut state = self.state.lock();
            let Some(run_id) = state.run_id.clone() else {
                return Err(TelemetryError::NoTask);
            };
            state.metrics.push(json!({
                "key": metric_key(title, series),
                "value": value,
                "timestamp": now_millis(),
                "step": step,
            }));
            (state.metrics.len() >= self.batch_size)
                .then(|| (run_id, std::mem::take(&mut state.metrics)))
        };
        if let Some((run_id, metrics)) = batch {
            self.spawn_batch(run_id, metrics);
        }
        Ok(())
    }

    async fn close(&self) -> TelemetryResult<()> {
        self.wait_for_batches().await;
        let flushed = self.flush_metrics().await;

        let run_id = self.state.lock().run_id.take();
        if let Some(run_id) = run_id {
            self.post(
                "runs/update",
                &json!({
                    "run_id": run_id,
                    "status": "FINISHED",
                    "end_time": now_millis(),
                }),
            )
            .await?;
        }
        flushed
    }
}

async fn post_json(
    client: &Client,
    url: String,
    endpoint: &str,
    body: &Value,
) -> TelemetryResult<Value> {
    let response = client.post(url).json(body).send().await?;
    read_response(endpoint, response).await
}

async fn read_response(endpoint: &str, response: reqwest::Response) -> TelemetryResult<Value> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(TelemetryError::Api {
            endpoint: endpoint.to_string(),
            status: status.as_u16(),
            body,
        });
    }
    let text = response.text().await?;
    if text.trim().is_empty() {
        return Ok(Value::Object(Map::new()));
    }
    serde_json::from_str(&text).map_err(|e| TelemetryError::Response {
        endpoint: endpoint.to_string(),
        message: e.to_string(),
    })
}

fn string_field(body: &Value, path: &[&str], endpoint: &str) -> TelemetryResult<String> {
    let mut current = body;
    for key in path {
        current = current.get(key).ok_or_else(|| TelemetryError::Response {
            endpoint: endpoint.to_string(),
            message: format!("missing {}", path.join(".")),
        })?;
    }
    current
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| TelemetryError::Response {
            endpoint: endpoint.to_string(),
            message: format!("{} is not a string", path.join(".")),
        })
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// `title/series`, restricted to the characters MLflow accepts in keys.
fn metric_key(title: &str, series: &str) -> String {
    format!("{title}/{series}")
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | ' ' | '/') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Flatten nested params into dotted keys with string values.
fn flatten_params(prefix: &str, value: &Value, out: &mut Vec<(String, String)>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                let key = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                flatten_params(&key, child, out);
            }
        }
        Value::Null => {}
        other => {
            let mut text = match other {
                Value::String(s) => s.clone(),
                v => v.to_string(),
            };
            if text.len() > MAX_PARAM_VALUE_LEN {
                let mut end = MAX_PARAM_VALUE_LEN;
                while !text.is_char_boundary(end) {
                    end -= 1;
                }
                text.truncate(end);
            }
            out.push((prefix.to_string(), text));
        }
    }
}
