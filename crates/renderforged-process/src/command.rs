//! Builder for launching supervised external tool processes.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::event::{OutputEvent, StreamKind};
use crate::process::ManagedProcess;
use crate::{Error, Result};

/// Default pause after terminating each descendant process.
const DEFAULT_KILL_SETTLE: Duration = Duration::from_millis(500);

/// Default wait for the OS to publish an exit code after the streams close.
const DEFAULT_EXIT_GRACE: Duration = Duration::from_secs(1);

/// A builder for constructing and launching external tool invocations.
///
/// # Example
///
/// ```no_run
/// use renderforged_process::ToolCommand;
///
/// # async fn example() -> renderforged_process::Result<()> {
/// let process = ToolCommand::new("aerender")
///     .arg("-project").arg("/projects/heat1.aep")
///     .arg("-comp").arg("Final")
///     .spawn()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: PathBuf,
    args: Vec<String>,
    kill_settle: Duration,
    exit_grace: Duration,
}

impl ToolCommand {
    /// Create a new command for the given program path.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            kill_settle: DEFAULT_KILL_SETTLE,
            exit_grace: DEFAULT_EXIT_GRACE,
        }
    }

    /// Append a single argument.
    pub fn arg(&mut self, s: impl Into<String>) -> &mut Self {
        self.args.push(s.into());
        self
    }

    /// Append multiple arguments.
    pub fn args(&mut self, iter: impl IntoIterator<Item = impl Into<String>>) -> &mut Self {
        self.args.extend(iter.into_iter().map(Into::into));
        self
    }

    /// Set the pause after each descendant termination during a kill.
    pub fn kill_settle(&mut self, d: Duration) -> &mut Self {
        self.kill_settle = d;
        self
    }

    /// Set how long [`ManagedProcess::exit_code`] waits for a late exit code.
    pub fn exit_grace(&mut self, d: Duration) -> &mut Self {
        self.exit_grace = d;
        self
    }

    /// The program that will be executed.
    pub fn program(&self) -> &std::path::Path {
        &self.program
    }

    /// The arguments that will be passed.
    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    /// Program name without directories, for log messages.
    pub fn program_name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.program.to_string_lossy().to_string())
    }

    /// Space-joined command line, for log messages.
    pub fn display(&self) -> String {
        std::iter::once(self.program.display().to_string())
            .chain(self.args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Launch the command.
    ///
    /// Stdout and stderr are piped and each drained by its own reader task
    /// into the returned process's event queue. Must be called from within a
    /// tokio runtime.
    ///
    /// # Errors
    ///
    /// - Returns [`Error::ToolNotFound`] if the executable does not exist.
    /// - Returns [`Error::Spawn`] if the OS refuses to start it.
    pub fn spawn(&self) -> Result<ManagedProcess> {
        let program_name = self.program_name();
        tracing::info!("Executing command: {}", self.display());

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| Error::spawn(program_name.clone(), e))?;

        let stdout = child.stdout.take().ok_or_else(|| Error::MissingPipe {
            program: program_name.clone(),
            stream: "stdout",
        })?;
        let stderr = child.stderr.take().ok_or_else(|| Error::MissingPipe {
            program: program_name.clone(),
            stream: "stderr",
        })?;

        let (tx, rx) = mpsc::unbounded_channel();
        let readers = [
            spawn_reader(stdout, StreamKind::Stdout, tx.clone()),
            spawn_reader(stderr, StreamKind::Stderr, tx),
        ];

        Ok(ManagedProcess::new(
            program_name,
            child,
            rx,
            readers,
            self.kill_settle,
            self.exit_grace,
        ))
    }
}

/// Drain one pipe line by line into the shared queue.
///
/// Lines are decoded lossily so a stray non-UTF-8 byte from a tool does not
/// end the stream. A read failure is forwarded as a single error event.
fn spawn_reader<R>(
    reader: R,
    stream: StreamKind,
    tx: mpsc::UnboundedSender<OutputEvent>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf);
                    let line = line.trim_end_matches(['\n', '\r']);
                    if tx.send(OutputEvent::line(stream, line)).is_err() {
                        // Consumer is gone; nothing left to deliver to.
                        break;
                    }
                }
                Err(e) => {
                    let _ = tx.send(OutputEvent::error(stream, e));
                    break;
                }
            }
        }
    })
}
