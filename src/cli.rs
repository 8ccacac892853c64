use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "renderforged")]
#[command(author, version, about = "Render and encode pipeline supervisor")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Render every selected item of a division
    Render {
        /// Event name, e.g. mays2024
        #[arg(long)]
        event: Option<String>,

        /// Division name, e.g. divm1
        #[arg(long)]
        division: Option<String>,

        /// Variant name, e.g. nextgen
        #[arg(long)]
        variant: Option<String>,

        /// Regex selecting the names of items to render
        #[arg(long, default_value = ".*")]
        include: String,

        /// Render parameters file (TOML or JSON)
        #[arg(long)]
        render_params: Option<PathBuf>,

        /// Render even if the intermediate file is already valid
        #[arg(long)]
        force_intermediate: bool,

        /// Encode even if the final file is already valid
        #[arg(long)]
        force_final: bool,

        /// Continue with the next item after a failure
        #[arg(long)]
        keep_going: bool,
    },

    /// Scan a media file and print the result as JSON
    Scan {
        /// File to scan
        #[arg(required = true)]
        file: PathBuf,

        /// Render parameters file with scanner settings
        #[arg(long)]
        render_params: Option<PathBuf>,
    },

    /// Write an item definition file
    MakeItem {
        /// Renderer project file
        #[arg(long)]
        project: PathBuf,

        /// Composition in the project
        #[arg(long)]
        comp: String,

        /// Item name (defaults to the composition)
        #[arg(long)]
        name: Option<String>,

        /// Output file (defaults to <name>.json)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Project modification time (defaults to the file's mtime)
        #[arg(long)]
        project_timestamp: Option<String>,

        /// Item creation time (defaults to now)
        #[arg(long)]
        creation_timestamp: Option<String>,
    },

    /// Check that required external tools are available
    CheckTools {
        /// Render parameters file with tool settings
        #[arg(long)]
        render_params: Option<PathBuf>,
    },

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses default if not specified)
        config: Option<PathBuf>,
    },

    /// Display version information
    Version,
}
