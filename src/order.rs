//! The division order file: which items a division contains, in running order.

use std::path::Path;

use regex::Regex;
use renderforged_common::{params::load_file, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Contents of `order.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DivisionOrder {
    #[serde(default)]
    pub appearance_order: Vec<OrderEntry>,
}

/// One item of the running order. Fields other than `name` are kept as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderEntry {
    pub name: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl DivisionOrder {
    pub fn load(path: &Path) -> Result<Self> {
        Ok(serde_json::from_value(load_file(path)?)?)
    }

    /// Entries whose name contains a match for `include`, in order.
    pub fn filter(&self, include: &Regex) -> Vec<&OrderEntry> {
        self.appearance_order
            .iter()
            .filter(|entry| include.is_match(&entry.name))
            .collect()
    }
}
