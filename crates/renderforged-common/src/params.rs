//! Ordered layers of key/value parameters.
//!
//! A job's settings come from several places (built-in defaults, the render
//! parameters file, the item file). Each source is one named layer; lookups
//! search from the most recently added layer down, and [`LayeredParams::resolve`]
//! flattens the stack into one map once per job.

use std::path::Path;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::{Error, Result};

#[derive(Debug, Clone)]
struct Layer {
    name: String,
    values: Map<String, Value>,
}

/// A stack of named parameter layers.
#[derive(Debug, Clone)]
pub struct LayeredParams {
    name: String,
    layers: Vec<Layer>,
}

impl LayeredParams {
    /// Create an empty stack. `name` appears in lookup errors.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            layers: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Names of the layers, lowest priority first.
    pub fn layer_names(&self) -> Vec<&str> {
        self.layers.iter().map(|l| l.name.as_str()).collect()
    }

    /// Insert a layer below all existing ones.
    pub fn add_to_start(&mut self, name: impl Into<String>, values: Value) {
        let layer = self.make_layer(name.into(), values);
        self.layers.insert(0, layer);
    }

    /// Insert a layer above all existing ones.
    pub fn add_to_end(&mut self, name: impl Into<String>, values: Value) {
        let layer = self.make_layer(name.into(), values);
        self.layers.push(layer);
    }

    /// Load a file and insert it below all existing layers. `None` adds an
    /// empty layer so the layer list stays predictable.
    pub fn add_file_to_start(&mut self, name: impl Into<String>, path: Option<&Path>) -> Result<()> {
        let name = name.into();
        let values = load_layer(&name, path)?;
        self.add_to_start(name, values);
        Ok(())
    }

    /// Load a file and insert it above all existing layers.
    pub fn add_file_to_end(&mut self, name: impl Into<String>, path: Option<&Path>) -> Result<()> {
        let name = name.into();
        let values = load_layer(&name, path)?;
        self.add_to_end(name, values);
        Ok(())
    }

    fn make_layer(&self, name: String, values: Value) -> Layer {
        let values = match values {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                tracing::warn!(
                    "Layer {} of {} params is not a table ({}); using an empty layer",
                    name,
                    self.name,
                    type_name(&other)
                );
                Map::new()
            }
        };
        Layer { name, values }
    }

    /// Whether any layer defines `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Value of `key` from the topmost layer that defines it.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.layers.iter().rev().find_map(|l| l.values.get(key))
    }

    /// Like [`get`](Self::get) but missing keys are an error.
    pub fn require(&self, key: &str) -> Result<&Value> {
        self.get(key)
            .ok_or_else(|| Error::missing_key(&self.name, key))
    }

    pub fn get_str(&self, key: &str) -> Result<&str> {
        self.require(key)?
            .as_str()
            .ok_or_else(|| Error::invalid_value(key, "expected a string"))
    }

    pub fn get_u64(&self, key: &str) -> Result<u64> {
        self.require(key)?
            .as_u64()
            .ok_or_else(|| Error::invalid_value(key, "expected a non-negative integer"))
    }

    pub fn get_f64(&self, key: &str) -> Result<f64> {
        self.require(key)?
            .as_f64()
            .ok_or_else(|| Error::invalid_value(key, "expected a number"))
    }

    pub fn get_bool(&self, key: &str) -> Result<bool> {
        self.require(key)?
            .as_bool()
            .ok_or_else(|| Error::invalid_value(key, "expected a boolean"))
    }

    /// Deserialize one key into a typed value.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        let value = self.require(key)?.clone();
        serde_json::from_value(value).map_err(|e| Error::invalid_value(key, e.to_string()))
    }

    /// Flatten all layers into one map, later layers overriding earlier ones
    /// key by key.
    pub fn resolve(&self) -> Map<String, Value> {
        let mut result = Map::new();
        for layer in &self.layers {
            for (key, value) in &layer.values {
                if let Some(old) = result.get(key) {
                    if old != value {
                        tracing::debug!(
                            "Key {} overridden by layer {}. Old value: {}. New value: {}",
                            key,
                            layer.name,
                            old,
                            value
                        );
                    }
                }
                result.insert(key.clone(), value.clone());
            }
        }
        result
    }

    /// Resolve the stack and deserialize it into `T`.
    pub fn extract<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(Value::Object(self.resolve()))?)
    }
}

/// Read a `.toml` or `.json` parameter file.
pub fn load_file(path: &Path) -> Result<Value> {
    if !path.exists() {
        return Err(Error::NotFound(path.to_path_buf()));
    }
    let contents = std::fs::read_to_string(path)?;
    match path.extension().and_then(|e| e.to_str()) {
        Some("toml") => Ok(toml::from_str(&contents)?),
        Some("json") => Ok(serde_json::from_str(&contents)?),
        _ => Err(Error::UnsupportedFormat(path.to_path_buf())),
    }
}

fn load_layer(name: &str, path: Option<&Path>) -> Result<Value> {
    match path {
        Some(path) => {
            tracing::debug!("Loading {} from {}", name, path.display());
            load_file(path)
        }
        None => {
            tracing::info!("Using empty parameter set for {}", name);
            Ok(Value::Object(Map::new()))
        }
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
