//! Pipeline end-to-end tests
//!
//! Drives whole render jobs with small shell scripts standing in for the
//! renderer, the encoder and the scanner.

#![cfg(unix)]

use assert_matches::assert_matches;
use renderforged::config::{JobParams, JobPolicy};
use renderforged::job::{JobError, JobState, RenderJob, Stage};
use renderforged::scanner::HandBrakeScanner;
use renderforged::telemetry::{MemorySink, Telemetry};
use renderforged_common::{PathMaker, PathResolver, PathsConfig, ScanOutcome};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::{tempdir, TempDir};
use tokio_util::sync::CancellationToken;

/// Scanner stand-in: a file is valid if it contains the word VALID.
const SCANNER: &str = r#"grep -q VALID "$1""#;

const ENCODER: &str = r#"echo 'Progress: {'
echo '    "State": "WORKING",'
echo '    "Working": {"Progress": 0.5, "Rate": 30.0, "RateAvg": 29.5}'
echo '}'
echo 'Progress: {'
echo '    "State": "MUXING"'
echo '}'
cp "$1" "$2"
"#;

fn tool(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn runs(counter: &Path) -> usize {
    std::fs::read_to_string(counter)
        .map(|s| s.lines().count())
        .unwrap_or(0)
}

struct Fixture {
    dir: TempDir,
    paths: Arc<PathMaker>,
    memory: MemorySink,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempdir().unwrap();
        let paths = PathMaker::new(PathsConfig {
            root: dir.path().join("root"),
            scratch_dir: dir.path().join("scratch"),
            event: "mays2024".into(),
            division: "divm1".into(),
            ..Default::default()
        });
        Self {
            dir,
            paths: Arc::new(paths),
            memory: MemorySink::new(),
        }
    }

    fn tools_dir(&self) -> &Path {
        self.dir.path()
    }

    fn intermediate(&self) -> PathBuf {
        self.paths.intermediate_path("heat1", true).unwrap()
    }

    fn final_artifact(&self) -> PathBuf {
        self.paths.final_path("heat1", true).unwrap()
    }

    fn params(&self, renderer: &str, encoder: &str) -> JobParams {
        let mut params: JobParams = serde_json::from_value(serde_json::json!({
            "item": {"name": "heat1", "project": "heat1.aep", "comp": "Final"}
        }))
        .unwrap();

        params.renderer.program = renderer.to_string();
        params.renderer.args = Some(vec!["{output}".into()]);
        params.encoder.program = encoder.to_string();
        params.encoder.args = Some(vec!["{input}".into(), "{output}".into()]);
        params.scanner.program = tool(self.tools_dir(), "scanner", SCANNER)
            .display()
            .to_string();
        params.scanner.args = Some(vec!["{input}".into()]);
        params.policy = JobPolicy {
            watchdog_timeout_secs: 1,
            watchdog_warning_margin_secs: 0,
            delete_retry_interval_ms: 10,
            service_wait_ms: 20,
            poll_interval_ms: 20,
            kill_settle_ms: 10,
            exit_code_grace_ms: 200,
            ..Default::default()
        };
        params
    }

    fn job(&self, params: JobParams) -> RenderJob {
        let scanner = HandBrakeScanner::new(
            params.scanner.clone(),
            params.policy.clone(),
            CancellationToken::new(),
        );
        let mut telemetry = Telemetry::disabled();
        telemetry.add_sink(self.memory.clone());
        RenderJob::new(
            "Render heat1",
            params,
            self.paths.clone(),
            Arc::new(scanner),
            Arc::new(telemetry),
        )
    }
}

#[tokio::test]
async fn test_missing_intermediate_is_rendered_and_encoded() {
    let fx = Fixture::new();
    let renderer = tool(
        fx.tools_dir(),
        "renderer",
        r#"i=1
while [ $i -le 12 ]; do
  echo "PROGRESS:  0:00:00:00 ($i): 0 Seconds"
  sleep 0.05
  i=$((i+1))
done
echo "Finished composition" >&2
echo VALID > "$1""#,
    );
    let encoder = tool(fx.tools_dir(), "encoder", ENCODER);
    let params = fx.params(&renderer.display().to_string(), &encoder.display().to_string());

    let mut job = fx.job(params);
    let outcome = job.execute(false, false).await.unwrap();

    assert!(outcome.intermediate.valid);
    assert!(outcome.final_scan.valid);
    assert_eq!(outcome.final_scan.result, ScanOutcome::Valid);
    assert_eq!(job.state(), JobState::Done);
    assert!(fx.intermediate().exists());
    assert!(fx.final_artifact().exists());

    // Twelve frames give eleven intervals.
    let intervals = fx.memory.series("Render performance");
    assert_eq!(intervals.len(), 11);
    assert_eq!(intervals[0].step, 2);
    assert_eq!(intervals[10].step, 12);
    assert_eq!(fx.memory.series("Moving average render performance").len(), 11);
    assert!(job.performance().moving_average().is_some());

    let encoder_scalars = fx.memory.series("Encoder performance");
    assert_eq!(encoder_scalars.len(), 2);
    assert_eq!(encoder_scalars[0].value, 30.0);
    assert_eq!(encoder_scalars[1].value, 29.5);
}

#[tokio::test]
async fn test_stalled_render_is_killed_cleaned_up_and_retried() {
    let fx = Fixture::new();
    let counter = fx.tools_dir().join("renderer-runs");
    let stalled = fx.tools_dir().join("stalled-once");
    let renderer = tool(
        fx.tools_dir(),
        "renderer",
        &format!(
            r#"echo run >> "{counter}"
if [ ! -e "{stalled}" ]; then
  touch "{stalled}"
  echo "PROGRESS:  0:00:00:00 (1): 0 Seconds"
  echo partial > "$1"
  sleep 30
fi
if [ -e "$1" ]; then
  echo "stale output left behind" >&2
  exit 5
fi
echo VALID > "$1""#,
            counter = counter.display(),
            stalled = stalled.display()
        ),
    );
    let encoder = tool(fx.tools_dir(), "encoder", ENCODER);
    let params = fx.params(&renderer.display().to_string(), &encoder.display().to_string());

    let mut job = fx.job(params);
    let outcome = job.execute(false, false).await.unwrap();

    assert_eq!(runs(&counter), 2);
    assert!(outcome.intermediate.valid);
    assert!(outcome.final_scan.valid);
    assert_eq!(std::fs::read_to_string(fx.intermediate()).unwrap().trim(), "VALID");
}

#[tokio::test]
async fn test_valid_artifacts_launch_nothing() {
    let fx = Fixture::new();
    std::fs::write(fx.intermediate(), "VALID").unwrap();
    std::fs::write(fx.final_artifact(), "VALID").unwrap();
    let params = fx.params("definitely-not-a-renderer", "definitely-not-an-encoder");

    let mut job = fx.job(params);
    let outcome = job.execute(false, false).await.unwrap();

    assert!(outcome.intermediate.valid);
    assert!(outcome.final_scan.valid);
    assert!(fx.memory.scalars().is_empty());
    assert!(outcome.intermediate.file.is_some());
}

#[tokio::test]
async fn test_renderer_failure_deletes_partial_output() {
    let fx = Fixture::new();
    let renderer = tool(fx.tools_dir(), "renderer", r#"echo "VALID but cut short" > "$1"; exit 3"#);
    let params = fx.params(&renderer.display().to_string(), "definitely-not-an-encoder");

    let mut job = fx.job(params);
    let result = job.execute(false, false).await;

    assert_matches!(result, Err(JobError::ExternalProcess { code: Some(3), .. }));
    assert_eq!(job.state(), JobState::Failed);
    assert!(!fx.intermediate().exists());
}

#[tokio::test]
async fn test_invalid_intermediate_is_rerendered_once_then_fatal() {
    let fx = Fixture::new();
    let counter = fx.tools_dir().join("renderer-runs");
    let renderer = tool(
        fx.tools_dir(),
        "renderer",
        &format!(
            r#"echo run >> "{counter}"
echo CORRUPT > "$1""#,
            counter = counter.display()
        ),
    );
    let params = fx.params(&renderer.display().to_string(), "definitely-not-an-encoder");

    let mut job = fx.job(params);
    let result = job.execute(false, false).await;

    assert_eq!(runs(&counter), 2);
    assert_matches!(
        result,
        Err(JobError::InvalidArtifact { stage: Stage::Render, ref message, .. })
            if message.contains("is present but not valid")
    );
}

#[tokio::test]
async fn test_forced_final_reencodes_valid_output() {
    let fx = Fixture::new();
    let counter = fx.tools_dir().join("encoder-runs");
    std::fs::write(fx.intermediate(), "VALID").unwrap();
    std::fs::write(fx.final_artifact(), "VALID old").unwrap();
    let encoder = tool(
        fx.tools_dir(),
        "encoder",
        &format!("echo run >> \"{}\"\n{ENCODER}", counter.display()),
    );
    let params = fx.params("definitely-not-a-renderer", &encoder.display().to_string());

    let mut job = fx.job(params);
    job.execute(false, true).await.unwrap();

    assert_eq!(runs(&counter), 1);
    assert_eq!(std::fs::read_to_string(fx.final_artifact()).unwrap().trim(), "VALID");
}

#[tokio::test]
async fn test_successful_encode_can_delete_intermediate() {
    let fx = Fixture::new();
    std::fs::write(fx.intermediate(), "VALID").unwrap();
    let encoder = tool(fx.tools_dir(), "encoder", ENCODER);
    let mut params = fx.params("definitely-not-a-renderer", &encoder.display().to_string());
    params.encoder.delete_intermediate_on_success = true;

    let mut job = fx.job(params);
    let outcome = job.execute(false, false).await.unwrap();

    assert!(outcome.final_scan.valid);
    assert!(fx.final_artifact().exists());
    assert!(!fx.intermediate().exists());
}
