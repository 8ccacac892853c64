use std::path::Path;
use std::time::Instant;

use async_trait::async_trait;
use renderforged_common::{scan::flatten_title_set, FileFacts, ScanResult};
use renderforged_process::{resolve_program, BlockExtractor, Extracted, Marker, ToolCommand};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::ArtifactScanner;
use crate::config::{JobPolicy, ScannerSettings};
use crate::job::supervise::{ServiceLoop, StageOutput};
use crate::job::{JobError, Stage};

/// Scans artifacts with `HandBrakeCLI --scan`.
///
/// The artifact is valid when the scan exits with code 0. The title set the
/// scanner prints is attached to the result with its lists flattened.
#[derive(Debug, Clone)]
pub struct HandBrakeScanner {
    settings: ScannerSettings,
    policy: JobPolicy,
    cancel: CancellationToken,
    node: String,
}

impl HandBrakeScanner {
    pub fn new(settings: ScannerSettings, policy: JobPolicy, cancel: CancellationToken) -> Self {
        Self {
            settings,
            policy,
            cancel,
            node: sysinfo::System::host_name().unwrap_or_default(),
        }
    }
}

#[async_trait]
impl ArtifactScanner for HandBrakeScanner {
    async fn scan(&self, path: &Path) -> Result<ScanResult, JobError> {
        if !path.is_file() {
            let result = ScanResult::no_file(path);
            tracing::info!("{}", result.message);
            return Ok(result);
        }

        let file = match FileFacts::collect(path, self.node.as_str()) {
            Ok(facts) => Some(facts),
            Err(e) => {
                tracing::warn!("Failed to read metadata of {}: {}", path.display(), e);
                None
            }
        };

        let program = resolve_program(&self.settings.program)?;
        let mut process = ToolCommand::new(program)
            .args(self.settings.build_args(path))
            .kill_settle(self.policy.kill_settle())
            .exit_grace(self.policy.exit_code_grace())
            .spawn()?;

        let mut extractor = BlockExtractor::new(vec![
            Marker::capture("title_set", r"JSON Title Set: \{")?,
            Marker::discard("progress", r"Progress: \{")?,
        ]);
        let mut output = ScanOutput::default();

        let serviced = ServiceLoop::new(Stage::Scan, &self.policy, &self.cancel)
            .run(&mut process, &mut extractor, &mut output, None)
            .await;
        if let Err(e) = serviced {
            process.kill(&[]).await;
            return Err(e);
        }

        let result = match process.exit_code().await {
            Some(0) => ScanResult::valid(path),
            code => {
                tracing::debug!("Scanner exited with {:?} for {}", code, path.display());
                ScanResult::invalid(path)
            }
        };
        tracing::info!("{}", result.message);
        Ok(result.with_file(file).with_video(output.video))
    }
}

#[derive(Default)]
struct ScanOutput {
    video: Option<Value>,
}

#[async_trait]
impl StageOutput for ScanOutput {
    async fn on_extracted(&mut self, item: Extracted, _at: Instant) -> Result<(), JobError> {
        match item {
            Extracted::Block { mut value, .. } => {
                flatten_title_set(&mut value);
                self.video = Some(value);
            }
            Extracted::Line(line) => tracing::debug!("{}", line),
            Extracted::Record { .. } | Extracted::Absorbed => {}
        }
        Ok(())
    }

    fn on_stderr(&mut self, line: &str) {
        tracing::debug!("{}", line);
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use renderforged_common::ScanOutcome;

    const TITLE_SET: &str = r#"echo 'Progress: {'
echo '    "State": "SCANNING"'
echo '}'
echo 'JSON Title Set: {'
echo '    "MainFeature": 0,'
echo '    "TitleList": ['
echo '        {"AudioList": [{"Codec": "aac"}], "ChapterList": [], "Duration": {"Seconds": 4}}'
echo '    ]'
echo '}'
echo 'Progress: {'
echo '    "State": "WORKDONE"'
echo '}'
"#;

    fn scanner(script: &str) -> HandBrakeScanner {
        let settings = ScannerSettings {
            program: "sh".into(),
            args: Some(vec![
                "-c".into(),
                script.into(),
                "scan".into(),
                "{input}".into(),
            ]),
        };
        let policy = JobPolicy {
            poll_interval_ms: 20,
            service_wait_ms: 20,
            exit_code_grace_ms: 200,
            ..Default::default()
        };
        HandBrakeScanner::new(settings, policy, CancellationToken::new())
    }

    #[tokio::test]
    async fn missing_file_is_not_launched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.mp4");
        let mut scanner = scanner("exit 0");
        scanner.settings.program = "definitely-not-an-installed-tool".into();

        let result = scanner.scan(&path).await.unwrap();
        assert_eq!(result.result, ScanOutcome::NoFile);
        assert!(!result.valid);
        assert!(result.file.is_none());
    }

    #[tokio::test]
    async fn valid_scan_captures_title_set() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("heat1.mp4");
        std::fs::write(&path, b"not really video").unwrap();

        let result = scanner(TITLE_SET).scan(&path).await.unwrap();
        assert!(result.valid);
        assert_eq!(result.result, ScanOutcome::Valid);
        assert_eq!(result.message, format!("File {} is present and valid", path.display()));

        let file = result.file.unwrap();
        assert_eq!(file.size, 16);
        assert!(file.mtime.is_some());

        let video = result.video.unwrap();
        assert!(video.get("TitleList").is_none());
        assert_eq!(video["Title0"]["Audio0"]["Codec"], "aac");
        assert_eq!(video["MainFeature"], 0);
    }

    #[tokio::test]
    async fn failing_scan_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corrupt.mov");
        std::fs::write(&path, b"garbage").unwrap();

        let result = scanner("echo 'No title found' >&2; exit 2")
            .scan(&path)
            .await
            .unwrap();
        assert!(!result.valid);
        assert_eq!(result.result, ScanOutcome::Invalid);
        assert!(result.video.is_none());
    }
}
