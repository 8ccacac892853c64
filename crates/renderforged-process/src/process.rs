//! A launched external process and the operations the pipeline needs on it.

use std::collections::HashSet;
use std::time::Duration;

use regex::Regex;
use sysinfo::Pid;
use tokio::process::Child;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::task::JoinHandle;

use crate::event::OutputEvent;
use crate::tree::{ProcessTree, Termination};

/// An external process launched by [`ToolCommand::spawn`](crate::ToolCommand::spawn).
///
/// Owns the OS child handle, the consumer end of the output queue and the two
/// reader tasks feeding it. Dropping it kills the root process.
pub struct ManagedProcess {
    program: String,
    child: Child,
    pid: Option<Pid>,
    events: mpsc::UnboundedReceiver<OutputEvent>,
    readers: [JoinHandle<()>; 2],
    kill_settle: Duration,
    exit_grace: Duration,
}

impl ManagedProcess {
    pub(crate) fn new(
        program: String,
        child: Child,
        events: mpsc::UnboundedReceiver<OutputEvent>,
        readers: [JoinHandle<()>; 2],
        kill_settle: Duration,
        exit_grace: Duration,
    ) -> Self {
        let pid = child.id().map(Pid::from_u32);
        Self {
            program,
            child,
            pid,
            events,
            readers,
            kill_settle,
            exit_grace,
        }
    }

    /// Program name this process was launched from.
    pub fn program(&self) -> &str {
        &self.program
    }

    /// OS process id of the root process.
    pub fn pid(&self) -> Option<Pid> {
        self.pid
    }

    /// True while either output stream is still being read.
    ///
    /// The streams close when the process (and any descendant holding its
    /// pipes) exits, so this doubles as the process liveness check.
    pub fn is_alive(&self) -> bool {
        self.readers.iter().any(|reader| !reader.is_finished())
    }

    /// Wait up to `wait` for the next output event.
    ///
    /// Returns `None` on timeout, or once both readers are done and the queue
    /// is empty.
    pub async fn next_event(&mut self, wait: Duration) -> Option<OutputEvent> {
        tokio::time::timeout(wait, self.events.recv())
            .await
            .ok()
            .flatten()
    }

    /// Take the next queued event without waiting.
    pub fn try_next_event(&mut self) -> Option<OutputEvent> {
        match self.events.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Queue `event` ahead of everything the readers have produced.
    ///
    /// Lets tests exercise consumers against events a live tool cannot be
    /// made to emit, such as a read failure.
    #[cfg(any(test, feature = "test-util"))]
    pub fn inject_event(&mut self, event: OutputEvent) {
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(event);
        let mut pending = std::mem::replace(&mut self.events, rx);
        tokio::spawn(async move {
            while let Some(event) = pending.recv().await {
                if tx.send(event).is_err() {
                    break;
                }
            }
        });
    }

    /// Exit code of the root process.
    ///
    /// Tools can close their output slightly before the OS publishes the exit
    /// status, so a missing code is retried once after the grace period.
    /// Returns `None` if the process is still running after that, or was
    /// ended by a signal.
    pub async fn exit_code(&mut self) -> Option<i32> {
        match self.child.try_wait() {
            Ok(Some(status)) => return status.code(),
            Ok(None) => {}
            Err(e) => {
                tracing::warn!("Failed to query exit status of {}: {}", self.program, e);
                return None;
            }
        }

        tokio::time::sleep(self.exit_grace).await;

        match self.child.try_wait() {
            Ok(Some(status)) => status.code(),
            Ok(None) => {
                tracing::warn!(
                    "{} has not reported an exit status after {:?}",
                    self.program,
                    self.exit_grace
                );
                None
            }
            Err(e) => {
                tracing::warn!("Failed to query exit status of {}: {}", self.program, e);
                None
            }
        }
    }

    /// Whether the root process has exited (reaping it if so).
    pub fn has_exited(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(Some(_)))
    }

    /// Descendants of the root process whose OS name matches `pattern`.
    ///
    /// Processes that exit while the tree is being walked are skipped.
    pub fn discover_children(&self, pattern: &Regex) -> Vec<Pid> {
        match self.pid {
            Some(root) => ProcessTree::snapshot().descendants_matching(root, pattern),
            None => Vec::new(),
        }
    }

    /// Terminate the whole process tree.
    ///
    /// Descendants of the root go first, each followed by the settle delay,
    /// then the root itself, then every pid in `extra_pids` along with its
    /// own descendants. Processes that are already gone count as terminated,
    /// so this never fails.
    pub async fn kill(&mut self, extra_pids: &[Pid]) {
        let tree = ProcessTree::snapshot();
        let mut handled = HashSet::new();

        if let Some(root) = self.pid {
            tracing::info!("Killing process tree with pid: {}", root);
            handled.insert(root);
            for child in tree.descendants(root) {
                if handled.insert(child) {
                    self.terminate_descendant(&tree, child).await;
                }
            }
        }

        self.kill_root().await;

        for &pid in extra_pids {
            if !handled.insert(pid) {
                continue;
            }
            for child in tree.descendants(pid) {
                if handled.insert(child) {
                    self.terminate_descendant(&tree, child).await;
                }
            }
            match tree.terminate(pid) {
                Termination::Killed => tracing::info!("Killed tracked process with pid {}", pid),
                Termination::Gone => {
                    tracing::info!("Tracked process with pid {} no longer active", pid)
                }
                Termination::Refused => {
                    tracing::warn!("Tracked process with pid {} refused to terminate", pid)
                }
            }
        }
    }

    async fn terminate_descendant(&self, tree: &ProcessTree, pid: Pid) {
        match tree.terminate(pid) {
            Termination::Killed => {
                tracing::info!("Killed child process with pid {}", pid);
                tokio::time::sleep(self.kill_settle).await;
            }
            Termination::Gone => {
                tracing::info!("Child process with pid {} no longer active", pid)
            }
            Termination::Refused => {
                tracing::warn!("Child process with pid {} refused to terminate", pid)
            }
        }
    }

    async fn kill_root(&mut self) {
        if self.has_exited() {
            tracing::info!("Parent process {} already exited", self.program);
            return;
        }
        match self.child.start_kill() {
            Ok(()) => tracing::info!("Killed parent process {}", self.program),
            Err(e) => tracing::info!("Parent process {} no longer active: {}", self.program, e),
        }
        // Reap it so the exit status is available to later queries.
        let _ = tokio::time::timeout(self.exit_grace, self.child.wait()).await;
    }
}

impl std::fmt::Debug for ManagedProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedProcess")
            .field("program", &self.program)
            .field("pid", &self.pid)
            .finish_non_exhaustive()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::event::{Payload, StreamKind};
    use crate::ToolCommand;

    async fn drain(process: &mut ManagedProcess) -> Vec<OutputEvent> {
        let mut events = Vec::new();
        while process.is_alive() {
            while let Some(event) = process.next_event(Duration::from_millis(50)).await {
                events.push(event);
            }
        }
        while let Some(event) = process.try_next_event() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn captures_both_streams_in_order() {
        let mut process = ToolCommand::new("sh")
            .args(["-c", "echo out1; echo err1 >&2; sleep 0.1; echo out2"])
            .spawn()
            .unwrap();

        let events = drain(&mut process).await;
        let stdout: Vec<&str> = events
            .iter()
            .filter(|e| e.stream == StreamKind::Stdout)
            .filter_map(|e| e.as_line())
            .collect();
        let stderr: Vec<&str> = events
            .iter()
            .filter(|e| e.stream == StreamKind::Stderr)
            .filter_map(|e| e.as_line())
            .collect();

        assert_eq!(stdout, vec!["out1", "out2"]);
        assert_eq!(stderr, vec!["err1"]);
        assert!(events.iter().all(|e| matches!(e.payload, Payload::Line(_))));
        assert_eq!(process.exit_code().await, Some(0));
    }

    #[tokio::test]
    async fn large_output_on_both_pipes_does_not_deadlock() {
        // Each pipe gets far more than a pipe buffer's worth of data.
        let script = "i=0; while [ $i -lt 20000 ]; do echo line$i; echo err$i >&2; i=$((i+1)); done";
        let mut process = ToolCommand::new("sh").args(["-c", script]).spawn().unwrap();

        let events = tokio::time::timeout(Duration::from_secs(30), drain(&mut process))
            .await
            .expect("draining both pipes should not stall");
        assert_eq!(events.len(), 40_000);
        assert_eq!(process.exit_code().await, Some(0));
    }

    #[tokio::test]
    async fn exit_code_reports_failure() {
        let mut process = ToolCommand::new("sh")
            .args(["-c", "exit 3"])
            .exit_grace(Duration::from_millis(200))
            .spawn()
            .unwrap();
        drain(&mut process).await;
        assert_eq!(process.exit_code().await, Some(3));
        assert!(!process.is_alive());
    }

    #[tokio::test]
    async fn kill_terminates_root_and_tolerates_missing_pids() {
        // The background child exits immediately; the root keeps running.
        let mut process = ToolCommand::new("sh")
            .args(["-c", "true & wait; echo ready; sleep 30"])
            .kill_settle(Duration::from_millis(10))
            .spawn()
            .unwrap();

        let first = process.next_event(Duration::from_secs(5)).await;
        assert_eq!(first.as_ref().and_then(|e| e.as_line()), Some("ready"));

        let vanished = Pid::from_u32(u32::MAX - 7);
        process.kill(&[vanished]).await;

        assert!(process.has_exited());
        tokio::time::timeout(Duration::from_secs(5), async {
            while process.is_alive() {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("streams should close after the tree is killed");
    }

    #[tokio::test]
    async fn kill_after_exit_is_harmless() {
        let mut process = ToolCommand::new("sh").args(["-c", "exit 0"]).spawn().unwrap();
        drain(&mut process).await;
        process.kill(&[]).await;
        assert!(process.has_exited());
    }

    #[tokio::test]
    async fn injected_event_comes_before_tool_output() {
        let mut process = ToolCommand::new("sh").args(["-c", "echo from-tool"]).spawn().unwrap();
        process.inject_event(OutputEvent::error(
            StreamKind::Stdout,
            std::io::Error::other("pipe broke"),
        ));

        let mut events = Vec::new();
        while let Some(event) = process.next_event(Duration::from_secs(5)).await {
            events.push(event);
        }
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0].payload, Payload::Error(_)));
        assert_eq!(events[1].as_line(), Some("from-tool"));
    }

    #[tokio::test]
    async fn discovers_matching_descendants() {
        let mut process = ToolCommand::new("sh")
            .args(["-c", "sleep 30 & echo started; wait"])
            .kill_settle(Duration::from_millis(10))
            .spawn()
            .unwrap();
        let _ = process.next_event(Duration::from_secs(5)).await;

        let pattern = Regex::new(r"^sleep$").unwrap();
        let mut found = Vec::new();
        for _ in 0..50 {
            found = process.discover_children(&pattern);
            if !found.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(found.len(), 1);

        let none = Regex::new(r"After\s*(Effects|FX)").unwrap();
        assert!(process.discover_children(&none).is_empty());

        process.kill(&[]).await;
        assert!(process.has_exited());
    }
}
