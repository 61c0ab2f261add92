use anyhow::{Context, Result};
use clap::Parser;
use exposure::cli::{Cli, OutputFormat};
use exposure::json_output::JsonOutput;
use exposure::replay::{ReplayLog, ReplaySource};
use exposure::store::TraceStore;
use exposure::tracer::{Tracer, TracerConfig};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber for debug output
fn init_tracing(debug: bool) {
    if debug {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::from_default_env().add_directive(tracing::Level::TRACE.into()),
            )
            .with_writer(std::io::stderr)
            .init();
    }
}

/// Merge the optional config file with command-line flags
fn load_config(args: &Cli) -> Result<TracerConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config {}", path.display()))?;
            serde_json::from_str(&text)
                .with_context(|| format!("Invalid config {}", path.display()))?
        }
        None => TracerConfig::default(),
    };

    if let Some(pattern) = &args.include {
        config.include_pattern = Some(pattern.clone());
    }
    if args.no_exit_locals {
        config.snapshot_exit_locals = false;
    }
    Ok(config)
}

fn main() -> Result<()> {
    let args = Cli::parse();

    // Initialize tracing if --debug flag is set
    init_tracing(args.debug);

    let config = load_config(&args)?;
    let log = ReplayLog::from_file(&args.log)?;
    let store = Arc::new(TraceStore::new());

    let mut tracer = Tracer::new(config, ReplaySource::new(&log), store.clone())
        .context("Invalid tracer configuration")?;
    tracer.start()?;
    let replayed = match args.limit {
        Some(count) => tracer.source().run_first(count),
        None => tracer.source().run(),
    };
    // Stop before reporting a replay failure so the trace is still archived
    let stats = tracer.stop()?;
    replayed.context("Replay aborted")?;

    let trees = store.take_finished();
    match args.format {
        OutputFormat::Text => {
            for tree in &trees {
                print!("{}", tree.render_text(args.locals));
            }
        }
        OutputFormat::Json => {
            let mut output = JsonOutput::new();
            for tree in &trees {
                output.add_tree(tree, args.locals);
            }
            output.set_session_stats(&stats);
            println!("{}", output.to_json()?);
        }
    }

    Ok(())
}
