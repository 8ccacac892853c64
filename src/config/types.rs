use renderforged_common::PathsConfig;
use serde::{Deserialize, Serialize};

/// Contents of `renderforged.toml`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TelemetryConfig {
    /// Master switch. When off, no sink receives anything.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Also write every reported scalar to the log at debug level.
    #[serde(default)]
    pub log_scalars: bool,

    #[serde(default)]
    pub mlflow: Option<MlflowConfig>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            log_scalars: false,
            mlflow: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MlflowConfig {
    /// Tracking server base URL, e.g. `http://mlflow.local:5000`.
    pub uri: String,

    /// Experiment to log runs under. Defaults to the batch's project name.
    #[serde(default)]
    pub experiment: Option<String>,

    /// Request timeout in seconds (default: 10)
    #[serde(default = "default_mlflow_timeout")]
    pub timeout_secs: u64,

    /// Metrics are sent in batches of this size (default: 100)
    #[serde(default = "default_metric_batch")]
    pub metric_batch_size: usize,
}

fn default_true() -> bool {
    true
}

fn default_mlflow_timeout() -> u64 {
    10
}

fn default_metric_batch() -> usize {
    100
}
