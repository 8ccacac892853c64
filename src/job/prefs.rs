//! Multi-frame rendering tags read from the renderer's preferences file.

use std::collections::HashMap;
use std::path::PathBuf;

use crate::config::RendererSettings;

const MFR_SECTION: &str = "Concurrent Frame Rendering";

/// Telemetry tags describing the renderer's concurrent frame settings.
///
/// Returns no tags when no preferences file is configured. A configured file
/// that cannot be found or read is logged and reported as `mfr=unknown`.
pub fn renderer_tags(settings: &RendererSettings) -> Vec<String> {
    let (Some(base), Some(version)) = (&settings.prefs_path, &settings.condensed_version) else {
        return Vec::new();
    };

    let Some(path) = find_prefs_file(base, version) else {
        tracing::warn!(
            "Unable to find renderer preferences file using {} and {}",
            base,
            version
        );
        return vec!["mfr=unknown".to_string()];
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => mfr_tags(&contents),
        Err(e) => {
            tracing::warn!("Failed to read {}: {}", path.display(), e);
            vec!["mfr=unknown".to_string()]
        }
    }
}

/// Search from `minor + 32` down to `minor` for an existing preferences file.
fn find_prefs_file(base: &str, condensed_version: &str) -> Option<PathBuf> {
    let (major, minor) = condensed_version.split_once('.')?;
    let minor: u32 = minor.trim().parse().ok()?;
    let user = std::env::var("USERNAME")
        .or_else(|_| std::env::var("USER"))
        .unwrap_or_default();
    let base = base.replace("{user}", &user);

    (minor..=minor + 32).rev().find_map(|candidate| {
        let version = format!("{}.{}", major.trim(), candidate);
        let path = PathBuf::from(base.replace("{version}", &version));
        if path.is_file() {
            tracing::info!(
                "Using renderer prefs file {} for version {}",
                path.display(),
                version
            );
            Some(path)
        } else {
            None
        }
    })
}

fn mfr_tags(contents: &str) -> Vec<String> {
    let section = parse_section(contents, MFR_SECTION);

    let enabled = section.get("Enable Concurrent Frame Renders");
    let concurrent = section.get("Number of Concurrent Frame Renders");
    if let Some(reserved) = section.get("Reserved CPU Power") {
        if reserved.parse::<i64>().map(|r| r > 10).unwrap_or(false) {
            tracing::warn!("Bad value for Reserved CPU Power {}", reserved);
        }
    }

    let tag = match enabled.map(|v| v.parse::<i64>().unwrap_or(0)) {
        None => "mfr=unknown".to_string(),
        Some(0) => "mfr=off".to_string(),
        Some(_) => match concurrent.and_then(|c| c.parse::<i64>().ok()) {
            Some(count) => format!("mfr={count}"),
            None => "mfr=unknown".to_string(),
        },
    };
    vec![tag]
}

/// Key/value pairs of one `["Section"]` of a preferences file.
fn parse_section(contents: &str, wanted: &str) -> HashMap<String, String> {
    let mut values = HashMap::new();
    let mut current: Option<String> = None;
    for line in contents.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with('[') {
            current = Some(
                trimmed
                    .trim_matches(|c: char| c == '[' || c == ']' || c == '"' || c == ' ')
                    .to_string(),
            );
        } else if current.as_deref() == Some(wanted) {
            if let Some((key, value)) = trimmed.split_once('=') {
                values.insert(
                    key.trim().trim_matches('"').to_string(),
                    value.trim().trim_matches('"').to_string(),
                );
            }
        }
    }
    values
}
