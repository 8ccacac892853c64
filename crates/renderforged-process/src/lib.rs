//! # renderforged-process
//!
//! Supervision of the external tools driven by the render pipeline.
//!
//! This crate provides:
//!
//! - **Command launching** ([`ToolCommand`]) -- builder that spawns an
//!   external program with both output pipes drained by two reader tasks into
//!   a single ordered event queue.
//! - **Managed processes** ([`ManagedProcess`]) -- liveness, exit code with a
//!   settle grace period, descendant discovery and process-tree termination.
//! - **Output events** ([`OutputEvent`]) -- tagged stdout/stderr lines, or the
//!   read error that ended a stream.
//! - **Process trees** ([`ProcessTree`], [`ChildProcessSet`]) -- snapshot of
//!   the OS process table used for discovery, CPU sampling and kills.
//! - **Block extraction** ([`BlockExtractor`]) -- recognizes JSON blocks and
//!   single-line records embedded in free-text tool logs.
//! - **Tool lookup** ([`tools`]) and argument templates ([`TemplateContext`]).
//!
//! ## Example
//!
//! ```no_run
//! use renderforged_process::ToolCommand;
//! use std::time::Duration;
//!
//! # async fn example() -> renderforged_process::Result<()> {
//! let mut process = ToolCommand::new("HandBrakeCLI")
//!     .args(["--input", "/scratch/clip.mov", "--json", "--scan"])
//!     .spawn()?;
//!
//! while process.is_alive() {
//!     while let Some(event) = process.next_event(Duration::from_millis(100)).await {
//!         println!("{:?}", event);
//!     }
//! }
//! println!("exit code: {:?}", process.exit_code().await);
//! # Ok(())
//! # }
//! ```

pub mod command;
mod error;
pub mod event;
pub mod extract;
pub mod process;
pub mod template;
pub mod tools;
pub mod tree;

// Re-exports
pub use command::ToolCommand;
pub use error::{Error, Result};
pub use event::{OutputEvent, Payload, StreamKind};
pub use extract::{BlockEnd, BlockExtractor, ColumnZeroBrace, Extracted, Marker, Unindented};
pub use process::ManagedProcess;
pub use sysinfo::Pid;
pub use template::TemplateContext;
pub use tools::{check_tool, resolve_program, ToolInfo};
pub use tree::{ChildProcessSet, CpuSample, ProcessTree, Termination};
