//! Error types for renderforged-process.

use std::path::PathBuf;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while launching or supervising external tools.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A required external tool is not available.
    #[error("tool not found: {tool}")]
    ToolNotFound { tool: String },

    /// The operating system refused to start the tool.
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// A pipe that should have been captured was not available.
    #[error("{program} has no {stream} pipe")]
    MissingPipe { program: String, stream: &'static str },

    /// A captured block did not contain valid JSON.
    #[error("failed to parse {marker} block: {source}")]
    BlockParse {
        marker: String,
        #[source]
        source: serde_json::Error,
    },

    /// A marker pattern failed to compile.
    #[error("invalid marker pattern: {0}")]
    Pattern(#[from] regex::Error),

    /// The specified file was not found.
    #[error("file not found: {}", path.display())]
    FileNotFound { path: PathBuf },

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a tool not found error.
    pub fn tool_not_found(tool: impl Into<String>) -> Self {
        Self::ToolNotFound { tool: tool.into() }
    }

    /// Create a spawn error, mapping a missing executable to [`Error::ToolNotFound`].
    pub fn spawn(program: impl Into<String>, source: std::io::Error) -> Self {
        let program = program.into();
        if source.kind() == std::io::ErrorKind::NotFound {
            Self::ToolNotFound { tool: program }
        } else {
            Self::Spawn { program, source }
        }
    }
}
