//! Artifact scan results.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Verdict of a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScanOutcome {
    Valid,
    Invalid,
    NoFile,
}

impl std::fmt::Display for ScanOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScanOutcome::Valid => write!(f, "VALID"),
            ScanOutcome::Invalid => write!(f, "INVALID"),
            ScanOutcome::NoFile => write!(f, "NO_FILE"),
        }
    }
}

/// Filesystem facts recorded alongside a scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileFacts {
    pub path: PathBuf,
    pub size: u64,
    /// RFC 3339 timestamps in local time.
    pub atime: Option<String>,
    pub mtime: Option<String>,
    pub ctime: Option<String>,
    /// Host the scan ran on.
    pub node: String,
}

impl FileFacts {
    /// Read the metadata of `path`.
    pub fn collect(path: &Path, node: impl Into<String>) -> std::io::Result<Self> {
        let metadata = std::fs::metadata(path)?;
        let path = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
        Ok(Self {
            path,
            size: metadata.len(),
            atime: metadata.accessed().ok().map(rfc3339),
            mtime: metadata.modified().ok().map(rfc3339),
            ctime: metadata.created().ok().map(rfc3339),
            node: node.into(),
        })
    }
}

fn rfc3339(time: SystemTime) -> String {
    DateTime::<Local>::from(time).to_rfc3339()
}

/// Result of scanning one artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanResult {
    pub valid: bool,
    pub result: ScanOutcome,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<FileFacts>,
    /// The scanner's structured description of the media, if it produced one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video: Option<Value>,
}

impl ScanResult {
    pub fn no_file(path: &Path) -> Self {
        Self {
            valid: false,
            result: ScanOutcome::NoFile,
            message: format!("File {} does not exist", path.display()),
            file: None,
            video: None,
        }
    }

    pub fn valid(path: &Path) -> Self {
        Self {
            valid: true,
            result: ScanOutcome::Valid,
            message: format!("File {} is present and valid", path.display()),
            file: None,
            video: None,
        }
    }

    pub fn invalid(path: &Path) -> Self {
        Self {
            valid: false,
            result: ScanOutcome::Invalid,
            message: format!("File {} is present but not valid", path.display()),
            file: None,
            video: None,
        }
    }

    pub fn with_file(mut self, file: Option<FileFacts>) -> Self {
        self.file = file;
        self
    }

    pub fn with_video(mut self, video: Option<Value>) -> Self {
        self.video = video;
        self
    }
}

/// Flatten the list fields of a HandBrake title set into indexed keys.
///
/// `TitleList[i]` becomes `Title{i}` on the root object, and inside each
/// title `AudioList[j]` and `ChapterList[j]` become `Audio{j}` and
/// `Chapter{j}`. The list fields are removed. Missing lists are ignored.
pub fn flatten_title_set(value: &mut Value) {
    let Some(root) = value.as_object_mut() else {
        return;
    };
    let Some(Value::Array(titles)) = root.remove("TitleList") else {
        return;
    };
    for (i, mut title) in titles.into_iter().enumerate() {
        if let Some(fields) = title.as_object_mut() {
            spread_list(fields, "AudioList", "Audio");
            spread_list(fields, "ChapterList", "Chapter");
        }
        root.insert(format!("Title{i}"), title);
    }
}

fn spread_list(fields: &mut Map<String, Value>, list_key: &str, prefix: &str) {
    if let Some(Value::Array(items)) = fields.remove(list_key) {
        for (j, item) in items.into_iter().enumerate() {
            fields.insert(format!("{prefix}{j}"), item);
        }
    }
}
