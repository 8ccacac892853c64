//! Per-job parameters.
//!
//! A job's parameters are assembled from a [`LayeredParams`] stack: the
//! render parameters file (`render_params.toml`, with `[renderer]`,
//! `[encoder]`, `[scanner]` and `[policy]` tables) at the bottom, then the
//! item definition file under the `item` key. The stack is resolved once into
//! a typed [`JobParams`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Local};
use renderforged_common::{LayeredParams, Result};
use renderforged_process::TemplateContext;
use serde::{Deserialize, Serialize};

/// Default pattern for renderer worker process names.
pub const DEFAULT_CHILD_PROCESS_PATTERN: &str = r"After\s*(Effects|FX)";

/// Everything one job needs to know.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JobParams {
    pub item: ItemParams,

    #[serde(default)]
    pub renderer: RendererSettings,

    #[serde(default)]
    pub encoder: EncoderSettings,

    #[serde(default)]
    pub scanner: ScannerSettings,

    #[serde(default)]
    pub policy: JobPolicy,
}

impl JobParams {
    /// Layer the render parameters file and the item file and resolve them.
    pub fn assemble(render_params: Option<&Path>, item_file: &Path) -> Result<Self> {
        let mut params = LayeredParams::new("render_job");
        params.add_file_to_end("render_params", render_params)?;

        let item = renderforged_common::params::load_file(item_file)?;
        params.add_to_end("item", serde_json::json!({ "item": item }));

        params.extract()
    }
}

/// The tool and policy tables of a render parameters file, without an item.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ToolSettings {
    #[serde(default)]
    pub renderer: RendererSettings,

    #[serde(default)]
    pub encoder: EncoderSettings,

    #[serde(default)]
    pub scanner: ScannerSettings,

    #[serde(default)]
    pub policy: JobPolicy,
}

impl ToolSettings {
    pub fn load(render_params: Option<&Path>) -> Result<Self> {
        let mut params = LayeredParams::new("render_tools");
        params.add_file_to_end("render_params", render_params)?;
        params.extract()
    }
}

/// The item definition file written by `make-item`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ItemParams {
    /// Item name; names the artifacts and the telemetry task.
    pub name: String,

    /// Renderer project file, relative to the production root.
    pub project: PathBuf,

    /// Composition to render.
    pub comp: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_timestamp: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<String>,
}

impl ItemParams {
    /// Describe a new item.
    ///
    /// The name defaults to the composition. A missing project timestamp is
    /// read from the project file's modification time if it can be found,
    /// and a missing creation timestamp is the current time.
    pub fn describe(
        project: PathBuf,
        comp: String,
        name: Option<String>,
        project_timestamp: Option<String>,
        creation_timestamp: Option<String>,
    ) -> Self {
        let project_timestamp = project_timestamp.or_else(|| {
            std::fs::metadata(&project)
                .and_then(|m| m.modified())
                .ok()
                .map(|t| DateTime::<Local>::from(t).to_rfc3339())
        });
        Self {
            name: name.unwrap_or_else(|| comp.clone()),
            project,
            comp,
            project_timestamp,
            creation_timestamp: creation_timestamp.or_else(|| Some(Local::now().to_rfc3339())),
        }
    }

    /// Write the item as pretty-printed JSON, creating the parent directory.
    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        tracing::info!("Render item details written to the file: {}", path.display());
        Ok(())
    }
}

/// Settings for the render stage.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RendererSettings {
    /// Renderer executable; `{major_version}` is substituted.
    #[serde(default = "default_renderer_program")]
    pub program: String,

    #[serde(default)]
    pub major_version: String,

    #[serde(default = "default_verbosity")]
    pub verbosity: String,

    #[serde(default = "default_fifty")]
    pub image_cache_percent: u32,

    #[serde(default = "default_fifty")]
    pub max_mem_percent: u32,

    #[serde(default)]
    pub render_settings_template: Option<String>,

    #[serde(default)]
    pub output_module_template: Option<String>,

    /// Multi-frame rendering.
    #[serde(default = "default_true")]
    pub mfr: bool,

    #[serde(default = "default_mfr_cpu")]
    pub mfr_max_cpu_percent: u32,

    #[serde(default = "default_true")]
    pub play_sound: bool,

    /// Renderer preferences file, with `{user}` and `{version}` placeholders.
    #[serde(default)]
    pub prefs_path: Option<String>,

    /// `major.minor` version used to locate the preferences file.
    #[serde(default)]
    pub condensed_version: Option<String>,

    /// Regex matched against names of renderer worker processes.
    #[serde(default = "default_child_pattern")]
    pub child_process_pattern: String,

    /// Replaces the generated argument list. Supports `{project}`, `{comp}`,
    /// `{output}` and the other template variables.
    #[serde(default)]
    pub args: Option<Vec<String>>,
}

impl Default for RendererSettings {
    fn default() -> Self {
        Self {
            program: default_renderer_program(),
            major_version: String::new(),
            verbosity: default_verbosity(),
            image_cache_percent: default_fifty(),
            max_mem_percent: default_fifty(),
            render_settings_template: None,
            output_module_template: None,
            mfr: true,
            mfr_max_cpu_percent: default_mfr_cpu(),
            play_sound: true,
            prefs_path: None,
            condensed_version: None,
            child_process_pattern: default_child_pattern(),
            args: None,
        }
    }
}

impl RendererSettings {
    pub fn program(&self) -> String {
        self.program.replace("{major_version}", &self.major_version)
    }

    pub fn build_args(&self, project: &Path, comp: &str, output: &Path) -> Vec<String> {
        let ctx = TemplateContext::new()
            .with_paths(project, output)
            .with_var("project", project.display().to_string())
            .with_var("comp", comp)
            .with_var("image_cache_percent", self.image_cache_percent.to_string())
            .with_var("max_mem_percent", self.max_mem_percent.to_string())
            .with_var("mfr_max_cpu_percent", self.mfr_max_cpu_percent.to_string());

        if let Some(args) = &self.args {
            return ctx.substitute_all(args);
        }

        let mut args = vec![
            "-v".to_string(),
            self.verbosity.clone(),
            "-project".to_string(),
            project.display().to_string(),
            "-comp".to_string(),
            comp.to_string(),
            "-mem_usage".to_string(),
            self.image_cache_percent.to_string(),
            self.max_mem_percent.to_string(),
            "-output".to_string(),
            output.display().to_string(),
        ];
        if let Some(template) = &self.render_settings_template {
            args.extend(["-RStemplate".to_string(), template.clone()]);
        }
        if let Some(template) = &self.output_module_template {
            args.extend(["-OMtemplate".to_string(), template.clone()]);
        }
        if self.mfr {
            args.extend([
                "-mfr".to_string(),
                "ON".to_string(),
                self.mfr_max_cpu_percent.to_string(),
            ]);
        } else {
            args.extend(["-mfr".to_string(), "OFF".to_string(), "0".to_string()]);
        }
        if self.play_sound {
            args.extend(["-sound".to_string(), "ON".to_string()]);
        }
        args
    }
}

/// Settings for the encode stage.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EncoderSettings {
    #[serde(default = "default_handbrake")]
    pub program: String,

    /// Video bitrate in kbps.
    #[serde(default = "default_bitrate")]
    pub bitrate: u32,

    /// Audio bitrate in kbps.
    #[serde(default = "default_audio_bitrate")]
    pub audio_bitrate: u32,

    #[serde(default = "default_encoder")]
    pub encoder: String,

    #[serde(default = "default_encoder_preset")]
    pub encoder_preset: String,

    /// Hardware decoder name, or none for software decoding.
    #[serde(default = "default_hw_decoding")]
    pub hw_decoding: Option<String>,

    /// Remove the intermediate artifact once the encode succeeds.
    #[serde(default)]
    pub delete_intermediate_on_success: bool,

    /// Replaces the generated argument list.
    #[serde(default)]
    pub args: Option<Vec<String>>,
}

impl Default for EncoderSettings {
    fn default() -> Self {
        Self {
            program: default_handbrake(),
            bitrate: default_bitrate(),
            audio_bitrate: default_audio_bitrate(),
            encoder: default_encoder(),
            encoder_preset: default_encoder_preset(),
            hw_decoding: default_hw_decoding(),
            delete_intermediate_on_success: false,
            args: None,
        }
    }
}

impl EncoderSettings {
    pub fn build_args(&self, input: &Path, output: &Path) -> Vec<String> {
        let ctx = TemplateContext::new()
            .with_paths(input, output)
            .with_var("bitrate", self.bitrate.to_string())
            .with_var("audio_bitrate", self.audio_bitrate.to_string())
            .with_var("encoder", self.encoder.as_str())
            .with_var("encoder_preset", self.encoder_preset.as_str());

        if let Some(args) = &self.args {
            return ctx.substitute_all(args);
        }

        let mut args = vec!["--ab".to_string(), self.audio_bitrate.to_string()];
        if let Some(decoder) = &self.hw_decoding {
            args.extend(["--enable-hw-decoding".to_string(), decoder.clone()]);
        }
        args.extend([
            "--encoder".to_string(),
            self.encoder.clone(),
            "--encoder-preset".to_string(),
            self.encoder_preset.clone(),
            "--input".to_string(),
            input.display().to_string(),
            "--json".to_string(),
            "--optimize".to_string(),
            "--output".to_string(),
            output.display().to_string(),
            "--turbo".to_string(),
            "--vb".to_string(),
            self.bitrate.to_string(),
        ]);
        args
    }
}

/// Settings for the artifact scanner.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScannerSettings {
    #[serde(default = "default_handbrake")]
    pub program: String,

    /// Replaces the generated argument list. `{input}` is the artifact.
    #[serde(default)]
    pub args: Option<Vec<String>>,
}

impl Default for ScannerSettings {
    fn default() -> Self {
        Self {
            program: default_handbrake(),
            args: None,
        }
    }
}

impl ScannerSettings {
    pub fn build_args(&self, input: &Path) -> Vec<String> {
        match &self.args {
            Some(args) => TemplateContext::new()
                .with_var("input", input.display().to_string())
                .substitute_all(args),
            None => vec![
                "--input".to_string(),
                input.display().to_string(),
                "--json".to_string(),
                "--scan".to_string(),
                "--title".to_string(),
                "0".to_string(),
            ],
        }
    }
}

/// Supervision and retry policy.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JobPolicy {
    /// Fail the render stage when the renderer goes quiet.
    #[serde(default = "default_true")]
    pub watchdog_enabled: bool,

    #[serde(default = "default_watchdog_timeout")]
    pub watchdog_timeout_secs: u64,

    /// Warn this long before the watchdog fires.
    #[serde(default = "default_watchdog_margin")]
    pub watchdog_warning_margin_secs: u64,

    /// Render attempts added after a stall.
    #[serde(default = "default_one")]
    pub stall_retries: u32,

    /// Render attempts added when the rendered artifact scans invalid.
    #[serde(default = "default_one")]
    pub invalid_artifact_retries: u32,

    #[serde(default = "default_true")]
    pub delete_output_on_failure: bool,

    #[serde(default = "default_delete_attempts")]
    pub delete_attempts: u32,

    #[serde(default = "default_delete_interval")]
    pub delete_retry_interval_ms: u64,

    /// Maximum events handled per service burst.
    #[serde(default = "default_service_burst")]
    pub service_burst: usize,

    /// Wait for each event within a burst.
    #[serde(default = "default_service_wait")]
    pub service_wait_ms: u64,

    /// Pause between bursts.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Pause after killing each process of a tree.
    #[serde(default = "default_kill_settle")]
    pub kill_settle_ms: u64,

    /// Wait for a late exit code.
    #[serde(default = "default_exit_grace")]
    pub exit_code_grace_ms: u64,
}

impl Default for JobPolicy {
    fn default() -> Self {
        Self {
            watchdog_enabled: true,
            watchdog_timeout_secs: default_watchdog_timeout(),
            watchdog_warning_margin_secs: default_watchdog_margin(),
            stall_retries: default_one(),
            invalid_artifact_retries: default_one(),
            delete_output_on_failure: true,
            delete_attempts: default_delete_attempts(),
            delete_retry_interval_ms: default_delete_interval(),
            service_burst: default_service_burst(),
            service_wait_ms: default_service_wait(),
            poll_interval_ms: default_poll_interval(),
            kill_settle_ms: default_kill_settle(),
            exit_code_grace_ms: default_exit_grace(),
        }
    }
}

impl JobPolicy {
    pub fn watchdog_timeout(&self) -> Duration {
        Duration::from_secs(self.watchdog_timeout_secs)
    }

    pub fn watchdog_warning_margin(&self) -> Duration {
        Duration::from_secs(self.watchdog_warning_margin_secs)
    }

    pub fn delete_retry_interval(&self) -> Duration {
        Duration::from_millis(self.delete_retry_interval_ms)
    }

    pub fn service_wait(&self) -> Duration {
        Duration::from_millis(self.service_wait_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn kill_settle(&self) -> Duration {
        Duration::from_millis(self.kill_settle_ms)
    }

    pub fn exit_code_grace(&self) -> Duration {
        Duration::from_millis(self.exit_code_grace_ms)
    }
}

fn default_true() -> bool {
    true
}
fn default_one() -> u32 {
    1
}
fn default_fifty() -> u32 {
    50
}
fn default_renderer_program() -> String {
    "aerender".to_string()
}
fn default_verbosity() -> String {
    "ERRORS_AND_PROGRESS".to_string()
}
fn default_mfr_cpu() -> u32 {
    100
}
fn default_child_pattern() -> String {
    DEFAULT_CHILD_PROCESS_PATTERN.to_string()
}
fn default_handbrake() -> String {
    "HandBrakeCLI".to_string()
}
fn default_bitrate() -> u32 {
    60000
}
fn default_audio_bitrate() -> u32 {
    320
}
fn default_encoder() -> String {
    "nvenc_h265".to_string()
}
fn default_encoder_preset() -> String {
    "quality".to_string()
}
fn default_hw_decoding() -> Option<String> {
    Some("nvdec".to_string())
}
fn default_watchdog_timeout() -> u64 {
    300
}
fn default_watchdog_margin() -> u64 {
    30
}
fn default_delete_attempts() -> u32 {
    12
}
fn default_delete_interval() -> u64 {
    1000
}
fn default_service_burst() -> usize {
    100
}
fn default_service_wait() -> u64 {
    100
}
fn default_poll_interval() -> u64 {
    500
}
fn default_kill_settle() -> u64 {
    500
}
fn default_exit_grace() -> u64 {
    1000
}
