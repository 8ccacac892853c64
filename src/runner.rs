//! Batch rendering of the items of one division.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use regex::Regex;
use renderforged_common::PathMaker;
use tokio_util::sync::CancellationToken;

use crate::config::{JobParams, TelemetryConfig};
use crate::job::{JobOutcome, RenderJob};
use crate::order::DivisionOrder;
use crate::scanner::HandBrakeScanner;
use crate::telemetry::Telemetry;

type TelemetryFactory = Box<dyn Fn() -> Telemetry + Send + Sync>;

/// What to render and how.
#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Regex selecting item names from the division order.
    pub include: String,
    /// Render parameters file layered under every item.
    pub render_params: Option<PathBuf>,
    pub force_intermediate: bool,
    pub force_final: bool,
    /// Continue with the next item after a failure.
    pub keep_going: bool,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            include: ".*".to_string(),
            render_params: None,
            force_intermediate: false,
            force_final: false,
            keep_going: false,
        }
    }
}

/// Items rendered by a batch.
#[derive(Debug, Default)]
pub struct BatchSummary {
    pub succeeded: Vec<String>,
    /// Item name and error message.
    pub failed: Vec<(String, String)>,
}

/// Runs one [`RenderJob`] per selected item, one after another.
pub struct BatchRunner {
    paths: Arc<PathMaker>,
    telemetry: TelemetryFactory,
    cancel: CancellationToken,
}

impl BatchRunner {
    pub fn new(paths: PathMaker, telemetry: TelemetryConfig) -> Self {
        Self {
            paths: Arc::new(paths),
            telemetry: Box::new(move || Telemetry::from_config(&telemetry)),
            cancel: CancellationToken::new(),
        }
    }

    /// Build each job's telemetry with `factory` instead of from config.
    pub fn with_telemetry<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Telemetry + Send + Sync + 'static,
    {
        self.telemetry = Box::new(factory);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub async fn run(&self, options: &BatchOptions) -> Result<BatchSummary> {
        tracing::info!("Beginning render");
        let include = Regex::new(&options.include)
            .with_context(|| format!("Invalid include pattern: {}", options.include))?;
        let order_path = self.paths.order_path();
        let order = DivisionOrder::load(&order_path)
            .with_context(|| format!("Failed to load division order {}", order_path.display()))?;

        let entries = order.filter(&include);
        if entries.is_empty() {
            tracing::warn!(
                "No items in {} match {}",
                order_path.display(),
                options.include
            );
        }

        let mut summary = BatchSummary::default();
        for entry in entries {
            if self.cancel.is_cancelled() {
                anyhow::bail!("Render batch cancelled");
            }
            match self.run_item(&entry.name, options).await {
                Ok(_) => summary.succeeded.push(entry.name.clone()),
                Err(e) => {
                    tracing::error!("Render of {} failed: {:#}", entry.name, e);
                    if !options.keep_going {
                        return Err(e.context(format!("Render of {} failed", entry.name)));
                    }
                    summary.failed.push((entry.name.clone(), format!("{e:#}")));
                }
            }
        }
        Ok(summary)
    }

    async fn run_item(&self, name: &str, options: &BatchOptions) -> Result<JobOutcome> {
        let item_path = self.paths.item_path(name);
        let params = JobParams::assemble(options.render_params.as_deref(), &item_path)
            .with_context(|| format!("Failed to load parameters for {}", item_path.display()))?;
        let params_json = serde_json::to_value(&params)?;
        let task = format!("Render {}", params.item.name);

        tracing::info!("Contacting trackers...");
        let telemetry = Arc::new((self.telemetry)());
        telemetry
            .start_task(&self.paths.project_name(), &task)
            .await;
        telemetry.connect(&params_json).await;

        tracing::info!("Starting job: {}", task);
        let scanner = Arc::new(HandBrakeScanner::new(
            params.scanner.clone(),
            params.policy.clone(),
            self.cancel.clone(),
        ));
        let mut job = RenderJob::new(
            task,
            params,
            self.paths.clone(),
            scanner,
            telemetry.clone(),
        )
        .with_cancellation(self.cancel.clone());

        let result = job
            .execute(options.force_intermediate, options.force_final)
            .await;
        telemetry.close().await;
        Ok(result?)
    }
}

impl std::fmt::Debug for BatchRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchRunner")
            .field("paths", &self.paths)
            .finish_non_exhaustive()
    }
}
