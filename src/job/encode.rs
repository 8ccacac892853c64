//! The encode stage: compresses the intermediate artifact into the deliverable.

use std::time::Instant;

use async_trait::async_trait;
use renderforged_process::{resolve_program, BlockExtractor, Extracted, Marker, ToolCommand};
use serde_json::Value;

use super::supervise::{ServiceLoop, StageOutput};
use super::{JobError, RenderJob, Stage};
use crate::telemetry::Telemetry;

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

impl RenderJob {
    /// Encode the intermediate artifact once.
    pub(super) async fn encode(&mut self) -> Result<(), JobError> {
        let settings = &self.params.encoder;
        let policy = &self.params.policy;

        let input = self.paths.intermediate_path(&self.params.item.name, false)?;
        let output = self.paths.final_path(&self.params.item.name, true)?;
        let program = resolve_program(&settings.program)?;

        tracing::info!(
            "Launching encoder to render {} from {}",
            output.display(),
            input.display()
        );
        let mut process = ToolCommand::new(program)
            .args(settings.build_args(&input, &output))
            .kill_settle(policy.kill_settle())
            .exit_grace(policy.exit_code_grace())
            .spawn()?;

        let mut extractor =
            BlockExtractor::new(vec![Marker::capture("progress", r"Progress: \{")?]);
        let mut progress = EncodeProgress::new(&self.telemetry);

        let serviced = ServiceLoop::new(Stage::Encode, policy, &self.cancel)
            .run(&mut process, &mut extractor, &mut progress, None)
            .await;
        if let Err(e) = serviced {
            tracing::error!("Encode of {} failed: {}", self.name, e);
            process.kill(&[]).await;
            return Err(e);
        }

        let code = process.exit_code().await;
        if code != Some(0) {
            tracing::error!("+++RETURN CODE {:?}: {}", code, self.name);
            return Err(JobError::ExternalProcess {
                tool: process.program().to_string(),
                code,
            });
        }

        tracing::info!("Successful: {}", self.name);
        if settings.delete_intermediate_on_success {
            let size_gb = tokio::fs::metadata(&input).await?.len() as f64 / BYTES_PER_GB;
            tokio::fs::remove_file(&input).await?;
            tracing::info!(
                "Deleted intermediate file with size {:.2}GB: {}",
                size_gb,
                input.display()
            );
        }
        Ok(())
    }
}

struct EncodeProgress<'a> {
    telemetry: &'a Telemetry,
    iteration: u64,
}

impl<'a> EncodeProgress<'a> {
    fn new(telemetry: &'a Telemetry) -> Self {
        Self {
            telemetry,
            iteration: 0,
        }
    }

    async fn on_progress(&mut self, progress: &Value) {
        if progress.get("State").and_then(Value::as_str) != Some("WORKING") {
            return;
        }

        let working = progress.get("Working");
        let field = |name: &str| {
            working
                .and_then(|w| w.get(name))
                .and_then(Value::as_f64)
                .unwrap_or(0.0)
        };
        let rate = field("Rate");
        let rate_avg = field("RateAvg");

        if self.iteration % 10 == 0 {
            tracing::info!(
                "Encoded {:.2}%, average {:.2} fps, current {:.2} fps",
                100.0 * field("Progress"),
                rate_avg,
                rate
            );
        }

        self.telemetry
            .report_scalar(
                "Encoder performance",
                "Encoding frames per second",
                rate,
                self.iteration,
            )
            .await;
        self.telemetry
            .report_scalar(
                "Encoder performance",
                "Encoding average frames per second",
                rate_avg,
                self.iteration,
            )
            .await;

        self.iteration += 1;
    }
}

#[async_trait]
impl<'a> StageOutput for EncodeProgress<'a> {
    async fn on_extracted(&mut self, item: Extracted, _at: Instant) -> Result<(), JobError> {
        match item {
            Extracted::Block { value, .. } => self.on_progress(&value).await,
            Extracted::Line(line) => tracing::info!("{}", line),
            Extracted::Record { .. } | Extracted::Absorbed => {}
        }
        Ok(())
    }
}
