//! Artifact and definition file locations.
//!
//! Everything lives under two roots: the production root (project files,
//! item definitions, final deliverables) and a scratch directory for the
//! large intermediate renders. Below them, paths are organised by event and
//! division, with an optional variant distinguishing alternate cuts.
//!
//! ```text
//! {root}/formatters/{event}/defs-{event}-{division}[-{variant}]/order.json
//! {root}/formatters/{event}/defs-{event}-{division}[-{variant}]/{item}.json
//! {scratch}/{event}/{division}/{item}[-{variant}] prores.mov
//! {root}/final/{event}/{division}/{item}[-{variant}].mp4
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::Result;

/// The `[paths]` section of the environment file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Production root directory.
    #[serde(default)]
    pub root: PathBuf,
    /// Scratch directory for intermediate artifacts.
    #[serde(default)]
    pub scratch_dir: PathBuf,
    /// Default event name.
    #[serde(default)]
    pub event: String,
    /// Default division name.
    #[serde(default)]
    pub division: String,
    /// Default variant, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
    /// Whether final deliverables carry the variant in their file name.
    #[serde(default)]
    pub variant_has_suffix: bool,
}

/// Locates the artifacts of one item.
pub trait PathResolver: Send + Sync {
    /// Where the render stage writes its output.
    fn intermediate_path(&self, item: &str, create_parent: bool) -> Result<PathBuf>;

    /// Where the encode stage writes the deliverable.
    fn final_path(&self, item: &str, create_parent: bool) -> Result<PathBuf>;

    /// Absolute location of a project file given relative to the root.
    fn project_path(&self, relative: &Path) -> PathBuf;
}

/// [`PathResolver`] over a [`PathsConfig`].
#[derive(Debug, Clone)]
pub struct PathMaker {
    config: PathsConfig,
}

impl PathMaker {
    pub fn new(config: PathsConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PathsConfig {
        &self.config
    }

    pub fn set_event(&mut self, event: impl Into<String>) {
        self.config.event = event.into();
    }

    pub fn set_division(&mut self, division: impl Into<String>) {
        self.config.division = division.into();
    }

    /// Set the variant. An empty string clears it.
    pub fn set_variant(&mut self, variant: Option<String>) {
        self.config.variant = variant.filter(|v| !v.is_empty());
    }

    pub fn event(&self) -> &str {
        &self.config.event
    }

    pub fn division(&self) -> &str {
        &self.config.division
    }

    pub fn variant(&self) -> Option<&str> {
        self.config.variant.as_deref().filter(|v| !v.is_empty())
    }

    /// `{event}-{division}[-{variant}]`, used as the telemetry project name.
    pub fn project_name(&self) -> String {
        self.joined(&[self.event(), self.division()])
    }

    /// Directory holding the item definitions and the division order.
    pub fn defs_dir(&self) -> PathBuf {
        let defs_name = self.joined(&["defs", self.event(), self.division()]);
        self.config
            .root
            .join("formatters")
            .join(self.event())
            .join(defs_name)
    }

    pub fn order_path(&self) -> PathBuf {
        self.defs_dir().join("order.json")
    }

    pub fn item_path(&self, name: &str) -> PathBuf {
        self.defs_dir().join(format!("{name}.json"))
    }

    fn joined(&self, parts: &[&str]) -> String {
        let mut parts = parts.to_vec();
        if let Some(variant) = self.variant() {
            parts.push(variant);
        }
        parts.join("-")
    }

    fn intermediate_dir(&self) -> PathBuf {
        self.config
            .scratch_dir
            .join(self.event())
            .join(self.division())
    }

    fn final_dir(&self) -> PathBuf {
        self.config
            .root
            .join("final")
            .join(self.event())
            .join(self.division())
    }
}

impl PathResolver for PathMaker {
    fn intermediate_path(&self, item: &str, create_parent: bool) -> Result<PathBuf> {
        let file_name = match self.variant() {
            Some(variant) => format!("{item}-{variant} prores.mov"),
            None => format!("{item} prores.mov"),
        };
        let path = self.intermediate_dir().join(file_name);
        if create_parent {
            std::fs::create_dir_all(self.intermediate_dir())?;
        }
        Ok(path)
    }

    fn final_path(&self, item: &str, create_parent: bool) -> Result<PathBuf> {
        let file_name = match self.variant() {
            Some(variant) if self.config.variant_has_suffix => format!("{item}-{variant}.mp4"),
            _ => format!("{item}.mp4"),
        };
        let path = self.final_dir().join(file_name);
        if create_parent {
            std::fs::create_dir_all(self.final_dir())?;
        }
        Ok(path)
    }

    fn project_path(&self, relative: &Path) -> PathBuf {
        self.config.root.join(relative)
    }
}
