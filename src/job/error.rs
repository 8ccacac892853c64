use std::path::PathBuf;
use std::time::Duration;

use renderforged_process::StreamKind;

/// Which step of a job failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Render,
    Encode,
    Scan,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Render => write!(f, "render"),
            Stage::Encode => write!(f, "encode"),
            Stage::Scan => write!(f, "scan"),
        }
    }
}

/// Errors that end a job or one of its stages.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    /// The renderer produced no output for too long.
    #[error("{tool} produced no output for {idle:?}")]
    StallTimeout { tool: String, idle: Duration },

    /// An artifact still scans invalid after the allowed retries.
    #[error("{stage} artifact {} is not valid: {message}", path.display())]
    InvalidArtifact {
        stage: Stage,
        path: PathBuf,
        message: String,
    },

    /// An external tool exited unsuccessfully.
    #[error("{tool} exited with {}", code.map(|c| format!("code {c}")).unwrap_or_else(|| "no exit code".into()))]
    ExternalProcess { tool: String, code: Option<i32> },

    /// Reading a tool's output failed.
    #[error("failed to read {stream} of {tool}: {source}")]
    StreamRead {
        tool: String,
        stream: StreamKind,
        #[source]
        source: std::io::Error,
    },

    /// A partial artifact could not be removed.
    #[error("failed to delete {} after {attempts} attempts", path.display())]
    Cleanup { path: PathBuf, attempts: u32 },

    /// The job was cancelled.
    #[error("{0} cancelled")]
    Cancelled(Stage),

    #[error(transparent)]
    Process(#[from] renderforged_process::Error),

    #[error(transparent)]
    Params(#[from] renderforged_common::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl JobError {
    /// Whether the render stage may be retried after this error.
    pub fn is_stall(&self) -> bool {
        matches!(self, JobError::StallTimeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_stage_and_artifact() {
        let err = JobError::InvalidArtifact {
            stage: Stage::Render,
            path: PathBuf::from("/scratch/heat1 prores.mov"),
            message: "File /scratch/heat1 prores.mov is present but not valid".into(),
        };
        assert_eq!(
            err.to_string(),
            "render artifact /scratch/heat1 prores.mov is not valid: \
             File /scratch/heat1 prores.mov is present but not valid"
        );

        let err = JobError::ExternalProcess {
            tool: "aerender".into(),
            code: Some(3),
        };
        assert_eq!(err.to_string(), "aerender exited with code 3");

        let err = JobError::ExternalProcess {
            tool: "aerender".into(),
            code: None,
        };
        assert_eq!(err.to_string(), "aerender exited with no exit code");

        let err = JobError::Cleanup {
            path: PathBuf::from("/x.mov"),
            attempts: 12,
        };
        assert_eq!(err.to_string(), "failed to delete /x.mov after 12 attempts");
    }

    #[test]
    fn only_stalls_are_retryable() {
        let stall = JobError::StallTimeout {
            tool: "aerender".into(),
            idle: Duration::from_secs(301),
        };
        assert!(stall.is_stall());
        assert!(!JobError::Cancelled(Stage::Render).is_stall());
    }
}
