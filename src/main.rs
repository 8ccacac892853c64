mod cli;

use renderforged::{
    config::{self, ItemParams, ToolSettings},
    runner::{BatchOptions, BatchRunner},
    scanner::{ArtifactScanner, HandBrakeScanner},
};
use renderforged_common::PathMaker;
use renderforged_process::check_tool;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

/// Cancel `token` on Ctrl-C.
fn cancel_on_ctrl_c(token: &CancellationToken) {
    let token = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, stopping the current job");
            token.cancel();
        }
    });
}

struct RenderArgs {
    event: Option<String>,
    division: Option<String>,
    variant: Option<String>,
    options: BatchOptions,
}

async fn render(args: RenderArgs, config_path: Option<&Path>) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;

    let mut paths = PathMaker::new(config.paths.clone());
    if let Some(event) = args.event {
        paths.set_event(event);
    }
    if let Some(division) = args.division {
        paths.set_division(division);
    }
    if args.variant.is_some() {
        paths.set_variant(args.variant);
    }
    if paths.event().is_empty() || paths.division().is_empty() {
        anyhow::bail!("Event and division must be set in the config file or on the command line");
    }

    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(&cancel);

    let runner = BatchRunner::new(paths, config.telemetry.clone()).with_cancellation(cancel);
    let summary = runner.run(&args.options).await?;

    println!("Rendered {} item(s)", summary.succeeded.len());
    if !summary.failed.is_empty() {
        for (name, error) in &summary.failed {
            println!("  ✗ {}: {}", name, error);
        }
        anyhow::bail!("{} item(s) failed", summary.failed.len());
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "renderforged=trace,renderforged_process=debug,renderforged_common=debug".to_string()
        } else {
            "renderforged=info,renderforged_process=info,renderforged_common=info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .init();

    match cli.command {
        Commands::Render {
            event,
            division,
            variant,
            include,
            render_params,
            force_intermediate,
            force_final,
            keep_going,
        } => {
            let args = RenderArgs {
                event,
                division,
                variant,
                options: BatchOptions {
                    include,
                    render_params,
                    force_intermediate,
                    force_final,
                    keep_going,
                },
            };
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(render(args, cli.config.as_deref()))
        }
        Commands::Scan {
            file,
            render_params,
        } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(scan_file(&file, render_params.as_deref()))
        }
        Commands::MakeItem {
            project,
            comp,
            name,
            output,
            project_timestamp,
            creation_timestamp,
        } => make_item(
            project,
            comp,
            name,
            output,
            project_timestamp,
            creation_timestamp,
        ),
        Commands::CheckTools { render_params } => check_tools(render_params.as_deref()),
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("renderforged {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

async fn scan_file(file: &Path, render_params: Option<&Path>) -> Result<()> {
    let tools = ToolSettings::load(render_params).context("Failed to load render parameters")?;

    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(&cancel);

    let scanner = HandBrakeScanner::new(tools.scanner, tools.policy, cancel);
    let result = scanner.scan(file).await?;

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

fn make_item(
    project: PathBuf,
    comp: String,
    name: Option<String>,
    output: Option<PathBuf>,
    project_timestamp: Option<String>,
    creation_timestamp: Option<String>,
) -> Result<()> {
    let item = ItemParams::describe(project, comp, name, project_timestamp, creation_timestamp);
    let output = output.unwrap_or_else(|| {
        let path = PathBuf::from(format!("{}.json", item.name));
        tracing::info!("--output is not passed, setting it to {} based on name", path.display());
        path
    });

    item.write(&output)
        .with_context(|| format!("Failed to write item file {}", output.display()))?;
    println!("{}", output.display());
    Ok(())
}

fn check_tools(render_params: Option<&Path>) -> Result<()> {
    println!("Checking external tools...\n");

    let tools = ToolSettings::load(render_params).context("Failed to load render parameters")?;
    let renderer = tools.renderer.program();
    let checks = [
        check_tool("renderer", &renderer, None),
        check_tool("encoder", &tools.encoder.program, Some("--version")),
        check_tool("scanner", &tools.scanner.program, Some("--version")),
    ];
    let mut all_ok = true;

    for tool in &checks {
        let status = if tool.available {
            "✓"
        } else {
            all_ok = false;
            "✗"
        };

        print!("{} {}", status, tool.name);

        if let Some(ref version) = tool.version {
            print!(" ({})", version.lines().next().unwrap_or(""));
        }

        if let Some(ref path) = tool.path {
            print!(" - {}", path.display());
        }

        println!();
    }

    println!();
    if all_ok {
        println!("All required tools are available!");
    } else {
        println!("Some tools are missing. Install them or set their paths in the render parameters.");
    }

    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            let config = config::load_config(p)?;
            println!("✓ Configuration is valid");
            println!("  Root: {}", config.paths.root.display());
            println!("  Scratch: {}", config.paths.scratch_dir.display());
            println!("  Event: {}", config.paths.event);
            println!("  Division: {}", config.paths.division);
            if let Some(ref variant) = config.paths.variant {
                println!("  Variant: {}", variant);
            }
            println!("  Telemetry enabled: {}", config.telemetry.enabled);
            if let Some(ref mlflow) = config.telemetry.mlflow {
                println!("  MLflow: {}", mlflow.uri);
            }
        }
        None => {
            println!("No config file specified, using defaults");
            let config = config::Config::default();
            println!("Default config:");
            println!("  Telemetry enabled: {}", config.telemetry.enabled);
        }
    }

    Ok(())
}
