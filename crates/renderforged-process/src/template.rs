//! `{var}` substitution for tool argument overrides.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::LazyLock;

use regex::{Captures, Regex};

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{(\w+)\}").expect("placeholder pattern is valid"));

/// Variables available to argument templates.
///
/// # Example
///
/// ```
/// use renderforged_process::TemplateContext;
/// use std::path::Path;
///
/// let ctx = TemplateContext::new()
///     .with_paths(Path::new("/scratch/heat1 prores.mov"), Path::new("/final/heat1.mp4"))
///     .with_var("bitrate", "60000");
///
/// assert_eq!(ctx.substitute("{output_stem}.log"), "heat1.log");
/// assert_eq!(ctx.substitute("--vb={bitrate}"), "--vb=60000");
/// ```
#[derive(Debug, Clone, Default)]
pub struct TemplateContext {
    vars: BTreeMap<String, String>,
}

impl TemplateContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `{input}`, `{output}`, `{output_dir}` and `{output_stem}`.
    pub fn with_paths(mut self, input: &Path, output: &Path) -> Self {
        self.set("input", input.display().to_string());
        self.set("output", output.display().to_string());
        if let Some(parent) = output.parent() {
            self.set("output_dir", parent.display().to_string());
        }
        if let Some(stem) = output.file_stem() {
            self.set("output_stem", stem.to_string_lossy());
        }
        self
    }

    pub fn with_var(mut self, key: &str, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.vars.insert(key.to_string(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    /// Replace every known `{var}` in `template` in a single pass, so
    /// substituted values are never expanded again. Unknown names are left
    /// as is.
    pub fn substitute(&self, template: &str) -> String {
        PLACEHOLDER
            .replace_all(template, |caps: &Captures<'_>| match self.get(&caps[1]) {
                Some(value) => value.to_string(),
                None => caps[0].to_string(),
            })
            .into_owned()
    }

    pub fn substitute_all(&self, templates: &[String]) -> Vec<String> {
        templates.iter().map(|t| self.substitute(t)).collect()
    }
}
