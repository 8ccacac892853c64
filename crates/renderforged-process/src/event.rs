//! Output events produced by the stream reader tasks.

use std::fmt;
use std::time::Instant;

/// Which pipe of the child process an event came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

impl StreamKind {
    /// Short tag used when logging a line.
    pub fn tag(self) -> &'static str {
        match self {
            StreamKind::Stdout => "OUT",
            StreamKind::Stderr => "ERR",
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamKind::Stdout => write!(f, "stdout"),
            StreamKind::Stderr => write!(f, "stderr"),
        }
    }
}

/// What a reader task observed.
#[derive(Debug)]
pub enum Payload {
    /// One decoded line, without its line terminator.
    Line(String),
    /// Reading the stream failed. The reader stops after sending this; the
    /// consumer must surface it instead of dropping it.
    Error(std::io::Error),
}

/// One record on a process's output queue.
#[derive(Debug)]
pub struct OutputEvent {
    pub stream: StreamKind,
    /// Monotonic time at which the reader received the data.
    pub timestamp: Instant,
    pub payload: Payload,
}

impl OutputEvent {
    pub fn line(stream: StreamKind, line: impl Into<String>) -> Self {
        Self {
            stream,
            timestamp: Instant::now(),
            payload: Payload::Line(line.into()),
        }
    }

    pub fn error(stream: StreamKind, error: std::io::Error) -> Self {
        Self {
            stream,
            timestamp: Instant::now(),
            payload: Payload::Error(error),
        }
    }

    /// The line carried by this event, if any.
    pub fn as_line(&self) -> Option<&str> {
        match &self.payload {
            Payload::Line(line) => Some(line),
            Payload::Error(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_tags() {
        assert_eq!(StreamKind::Stdout.tag(), "OUT");
        assert_eq!(StreamKind::Stderr.tag(), "ERR");
        assert_eq!(StreamKind::Stderr.to_string(), "stderr");
    }

    #[test]
    fn line_event_exposes_text() {
        let event = OutputEvent::line(StreamKind::Stdout, "PROGRESS: 0:00:01:02 (12)");
        assert_eq!(event.as_line(), Some("PROGRESS: 0:00:01:02 (12)"));
    }

    #[test]
    fn error_event_has_no_line() {
        let event = OutputEvent::error(
            StreamKind::Stderr,
            std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed"),
        );
        assert!(event.as_line().is_none());
        assert!(matches!(event.payload, Payload::Error(_)));
    }
}
