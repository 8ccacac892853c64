//! Renderforged-Common: shared data types for the render pipeline.
//!
//! This crate provides:
//!
//! - **Layered parameters** ([`LayeredParams`]): ordered named layers of
//!   key/value settings where the most recently added layer wins
//! - **Artifact paths** ([`PathResolver`], [`PathMaker`]): intermediate and
//!   final artifact locations derived from event/division/variant naming
//! - **Scan results** ([`ScanResult`]): the verdict of an artifact scan
//! - **Error Handling**: common error type and result alias
//!
//! # Examples
//!
//! ```
//! use renderforged_common::LayeredParams;
//! use serde_json::json;
//!
//! let mut params = LayeredParams::new("render");
//! params.add_to_end("defaults", json!({"bitrate": 40000, "preset": "fast"}));
//! params.add_to_end("project", json!({"bitrate": 60000}));
//!
//! assert_eq!(params.get_u64("bitrate").unwrap(), 60000);
//! assert_eq!(params.get_str("preset").unwrap(), "fast");
//! ```

pub mod error;
pub mod params;
pub mod paths;
pub mod scan;

pub use error::{Error, Result};
pub use params::LayeredParams;
pub use paths::{PathMaker, PathResolver, PathsConfig};
pub use scan::{FileFacts, ScanOutcome, ScanResult};
