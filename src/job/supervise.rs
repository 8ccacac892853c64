//! The servicing loop shared by every stage that runs an external tool.
//!
//! The loop drains the process's event queue in bounded bursts, routes each
//! stdout line through a [`BlockExtractor`] and hands the result to a
//! [`StageOutput`]. Between bursts it checks the stall watchdog and the
//! cancellation token, then sleeps the poll interval. Once both output
//! streams have closed it drains whatever is left in the queue.

use std::time::Instant;

use async_trait::async_trait;
use renderforged_process::{BlockExtractor, Extracted, ManagedProcess, OutputEvent, Payload, StreamKind};
use tokio_util::sync::CancellationToken;

use super::watchdog::{StallWatchdog, WatchdogStatus};
use super::{JobError, Stage};
use crate::config::JobPolicy;

/// Stage-specific handling of a tool's output.
#[async_trait]
pub trait StageOutput: Send {
    /// Handle one stdout line after block extraction.
    async fn on_extracted(&mut self, item: Extracted, at: Instant) -> Result<(), JobError>;

    /// Handle one stderr line.
    fn on_stderr(&mut self, line: &str) {
        tracing::info!("{}: {}", StreamKind::Stderr.tag(), line);
    }

    /// Called after every service burst while the process is running.
    async fn after_burst(&mut self, _process: &ManagedProcess) {}
}

/// Drives one launched process until its output streams close.
pub struct ServiceLoop<'a> {
    stage: Stage,
    policy: &'a JobPolicy,
    cancel: &'a CancellationToken,
}

impl<'a> ServiceLoop<'a> {
    pub fn new(stage: Stage, policy: &'a JobPolicy, cancel: &'a CancellationToken) -> Self {
        Self {
            stage,
            policy,
            cancel,
        }
    }

    /// Service `process` until it stops producing output.
    ///
    /// Every event of either stream counts as activity for `watchdog`. Any
    /// error returned leaves the process running; the caller owns the kill.
    pub async fn run(
        &self,
        process: &mut ManagedProcess,
        extractor: &mut BlockExtractor,
        output: &mut dyn StageOutput,
        mut watchdog: Option<StallWatchdog>,
    ) -> Result<(), JobError> {
        let tool = process.program().to_string();

        loop {
            for _ in 0..self.policy.service_burst {
                let Some(event) = process.next_event(self.policy.service_wait()).await else {
                    break;
                };
                if let Some(dog) = watchdog.as_mut() {
                    dog.record(event.timestamp);
                }
                dispatch(&tool, event, extractor, output).await?;
            }

            output.after_burst(process).await;

            if !process.is_alive() {
                break;
            }

            if let Some(dog) = watchdog.as_mut() {
                match dog.check(Instant::now()) {
                    WatchdogStatus::Ok => {}
                    WatchdogStatus::Warning(idle) => tracing::warn!(
                        "No progress for {} seconds. Approaching watchdog timeout",
                        idle.as_secs()
                    ),
                    WatchdogStatus::Expired(idle) => {
                        tracing::error!(
                            "No progress for {} seconds, watchdog activated",
                            idle.as_secs()
                        );
                        return Err(JobError::StallTimeout { tool, idle });
                    }
                }
            }

            if self.cancel.is_cancelled() {
                return Err(JobError::Cancelled(self.stage));
            }

            tokio::select! {
                _ = tokio::time::sleep(self.policy.poll_interval()) => {}
                _ = self.cancel.cancelled() => return Err(JobError::Cancelled(self.stage)),
            }
        }

        while let Some(event) = process.try_next_event() {
            dispatch(&tool, event, extractor, output).await?;
        }
        Ok(())
    }
}

async fn dispatch(
    tool: &str,
    event: OutputEvent,
    extractor: &mut BlockExtractor,
    output: &mut dyn StageOutput,
) -> Result<(), JobError> {
    let line = match event.payload {
        Payload::Line(line) => line,
        Payload::Error(source) => {
            return Err(JobError::StreamRead {
                tool: tool.to_string(),
                stream: event.stream,
                source,
            })
        }
    };

    match event.stream {
        StreamKind::Stdout => {
            let item = extractor.feed(&line)?;
            output.on_extracted(item, event.timestamp).await
        }
        StreamKind::Stderr => {
            output.on_stderr(&line);
            Ok(())
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use renderforged_process::{Marker, ToolCommand};
    use std::time::Duration;

    #[derive(Default)]
    struct Collect {
        lines: Vec<String>,
        blocks: Vec<serde_json::Value>,
        stderr: Vec<String>,
        bursts: usize,
    }

    #[async_trait]
    impl StageOutput for Collect {
        async fn on_extracted(&mut self, item: Extracted, _at: Instant) -> Result<(), JobError> {
            match item {
                Extracted::Line(line) => self.lines.push(line),
                Extracted::Block { value, .. } => self.blocks.push(value),
                _ => {}
            }
            Ok(())
        }

        fn on_stderr(&mut self, line: &str) {
            self.stderr.push(line.to_string());
        }

        async fn after_burst(&mut self, _process: &ManagedProcess) {
            self.bursts += 1;
        }
    }

    fn fast_policy() -> JobPolicy {
        JobPolicy {
            poll_interval_ms: 20,
            service_wait_ms: 20,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn routes_lines_blocks_and_stderr() {
        let script = r#"echo start; echo 'Progress: {'; echo '    "State": "WORKING"'; echo '}'; echo oops >&2; echo end"#;
        let mut process = ToolCommand::new("sh").args(["-c", script]).spawn().unwrap();
        let mut extractor =
            BlockExtractor::new(vec![Marker::capture("progress", r"Progress: \{").unwrap()]);
        let policy = fast_policy();
        let cancel = CancellationToken::new();
        let mut output = Collect::default();

        ServiceLoop::new(Stage::Encode, &policy, &cancel)
            .run(&mut process, &mut extractor, &mut output, None)
            .await
            .unwrap();

        assert_eq!(output.lines, vec!["start", "end"]);
        assert_eq!(output.blocks, vec![serde_json::json!({"State": "WORKING"})]);
        assert_eq!(output.stderr, vec!["oops"]);
        assert!(output.bursts >= 1);
    }

    #[tokio::test]
    async fn silent_tool_trips_watchdog() {
        let mut process = ToolCommand::new("sh")
            .args(["-c", "echo hello; sleep 30"])
            .kill_settle(Duration::from_millis(10))
            .spawn()
            .unwrap();
        let mut extractor = BlockExtractor::new(Vec::new());
        let policy = fast_policy();
        let cancel = CancellationToken::new();
        let mut output = Collect::default();
        let watchdog =
            StallWatchdog::new(Duration::from_millis(300), Duration::from_millis(100), Instant::now());

        let result = ServiceLoop::new(Stage::Render, &policy, &cancel)
            .run(&mut process, &mut extractor, &mut output, Some(watchdog))
            .await;

        assert_matches!(result, Err(JobError::StallTimeout { ref tool, .. }) if tool == "sh");
        process.kill(&[]).await;
    }

    #[tokio::test]
    async fn cancellation_stops_the_loop() {
        let mut process = ToolCommand::new("sh")
            .args(["-c", "sleep 30"])
            .kill_settle(Duration::from_millis(10))
            .spawn()
            .unwrap();
        let mut extractor = BlockExtractor::new(Vec::new());
        let policy = fast_policy();
        let cancel = CancellationToken::new();
        let mut output = Collect::default();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let result = ServiceLoop::new(Stage::Encode, &policy, &cancel)
            .run(&mut process, &mut extractor, &mut output, None)
            .await;
        assert_matches!(result, Err(JobError::Cancelled(Stage::Encode)));
        process.kill(&[]).await;
    }

    #[tokio::test]
    async fn read_failure_is_a_stream_read_error() {
        let mut extractor = BlockExtractor::new(Vec::new());
        let mut output = Collect::default();
        let event = OutputEvent::error(StreamKind::Stdout, std::io::Error::other("boom"));

        let result = dispatch("blender", event, &mut extractor, &mut output).await;

        assert_matches!(
            result,
            Err(JobError::StreamRead { ref tool, stream: StreamKind::Stdout, .. }) if tool == "blender"
        );
        assert!(output.lines.is_empty());
        assert!(output.stderr.is_empty());
    }

    #[tokio::test]
    async fn malformed_block_is_an_error() {
        let script = r#"echo 'Progress: {'; echo '    not json'; echo '}'"#;
        let mut process = ToolCommand::new("sh").args(["-c", script]).spawn().unwrap();
        let mut extractor =
            BlockExtractor::new(vec![Marker::capture("progress", r"Progress: \{").unwrap()]);
        let policy = fast_policy();
        let cancel = CancellationToken::new();

        let result = ServiceLoop::new(Stage::Encode, &policy, &cancel)
            .run(&mut process, &mut extractor, &mut Collect::default(), None)
            .await;
        assert_matches!(result, Err(JobError::Process(_)));
    }
}
