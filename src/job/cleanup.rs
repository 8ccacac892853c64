//! Removal of partial artifacts after a failed stage.

use std::io;
use std::path::Path;
use std::time::Duration;

use super::JobError;
use crate::config::JobPolicy;

/// Delete a possibly corrupt artifact if the policy asks for it.
///
/// A missing file is not an error.
pub async fn delete_on_failure(path: &Path, policy: &JobPolicy) -> Result<(), JobError> {
    if !policy.delete_output_on_failure || !path.exists() {
        return Ok(());
    }
    delete_with_retry(
        path,
        policy.delete_attempts,
        policy.delete_retry_interval(),
        |p| std::fs::remove_file(p),
    )
    .await
}

/// Remove `path`, retrying while it is locked.
///
/// The renderer can keep its output open for a moment after being killed,
/// so lock errors are retried up to `attempts` times, `interval` apart. Other
/// errors fail immediately.
pub async fn delete_with_retry<F>(
    path: &Path,
    attempts: u32,
    interval: Duration,
    mut remove: F,
) -> Result<(), JobError>
where
    F: FnMut(&Path) -> io::Result<()>,
{
    for attempt in 1..=attempts {
        match remove(path) {
            Ok(()) => {
                tracing::info!("Deleted incomplete output file: {}", path.display());
                return Ok(());
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) if is_lock_error(&e) => {
                tracing::warn!(
                    "Attempt {} to delete incomplete output file {} failed, will retry: {}",
                    attempt,
                    path.display(),
                    e
                );
                if attempt < attempts {
                    tokio::time::sleep(interval).await;
                }
            }
            Err(e) => return Err(JobError::Io(e)),
        }
    }

    tracing::error!("Failed to delete incomplete output file: {}", path.display());
    Err(JobError::Cleanup {
        path: path.to_path_buf(),
        attempts,
    })
}

fn is_lock_error(e: &io::Error) -> bool {
    if e.kind() == io::ErrorKind::PermissionDenied {
        return true;
    }
    // ERROR_SHARING_VIOLATION, ERROR_LOCK_VIOLATION
    #[cfg(windows)]
    let lock_codes: &[i32] = &[32, 33];
    // EBUSY, ETXTBSY
    #[cfg(not(windows))]
    let lock_codes: &[i32] = &[16, 26];

    e.raw_os_error().is_some_and(|code| lock_codes.contains(&code))
}
