//! Artifact validation.
//!
//! Before and after each stage the job asks an [`ArtifactScanner`] whether
//! an artifact exists and is readable media. The production scanner runs
//! HandBrakeCLI in scan mode; tests substitute their own.

mod handbrake;

use std::path::Path;

use async_trait::async_trait;
use renderforged_common::ScanResult;

use crate::job::JobError;

pub use handbrake::HandBrakeScanner;

/// Decides whether an artifact is present and valid.
#[async_trait]
pub trait ArtifactScanner: Send + Sync {
    /// Scan `path`. A missing file is a [`ScanOutcome::NoFile`](renderforged_common::ScanOutcome)
    /// result, not an error.
    async fn scan(&self, path: &Path) -> Result<ScanResult, JobError>;
}
