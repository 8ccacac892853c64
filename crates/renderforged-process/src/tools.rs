//! External tool lookup.

use std::path::{Path, PathBuf};
use std::process::Command;

use crate::{Error, Result};

/// Availability of one external tool, as reported by `check-tools`.
#[derive(Debug, Clone)]
pub struct ToolInfo {
    /// Label the tool is configured under (e.g. "renderer").
    pub name: String,
    /// Whether the executable was found.
    pub available: bool,
    /// First line of the version output, if the tool was asked for one.
    pub version: Option<String>,
    /// Resolved path to the executable.
    pub path: Option<PathBuf>,
}

/// Resolve a configured program to an executable path.
///
/// A value that names an existing file is used directly; anything else is
/// looked up on `PATH`.
///
/// # Errors
///
/// Returns [`Error::ToolNotFound`] if neither lookup finds the program.
pub fn resolve_program(program: &str) -> Result<PathBuf> {
    let direct = Path::new(program);
    if direct.is_file() {
        return Ok(direct.to_path_buf());
    }
    which::which(program).map_err(|_| Error::tool_not_found(program))
}

/// Check whether a tool resolves, optionally asking it for its version.
///
/// Blocks while the tool prints its version; call it from synchronous code
/// such as the `check-tools` command, not from inside the runtime.
pub fn check_tool(name: &str, program: &str, version_arg: Option<&str>) -> ToolInfo {
    let Ok(path) = resolve_program(program) else {
        return ToolInfo {
            name: name.to_string(),
            available: false,
            version: None,
            path: None,
        };
    };

    let version = version_arg.and_then(|arg| detect_version(&path, arg));
    ToolInfo {
        name: name.to_string(),
        available: true,
        version,
        path: Some(path),
    }
}

/// First non-empty stdout line of `path arg`.
///
/// Uses `std::process::Command` because `check-tools` runs before any tokio
/// runtime exists; job stages spawn through [`crate::ToolCommand`] instead.
fn detect_version(path: &Path, arg: &str) -> Option<String> {
    let output = Command::new(path).arg(arg).output().ok()?;
    if !output.status.success() {
        return None;
    }
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(str::to_string)
}
