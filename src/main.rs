//! `puppeteer` audit CLI
//!
//! ```bash
//! # Print a recorded transcript in firing order
//! puppeteer render ~/.puppeteer/transcripts/<id>.jsonl
//!
//! # Print the newest tape in the configured transcript directory
//! puppeteer render
//!
//! # Validate a probe manifest and show the sealed policy table
//! puppeteer check probes.toml
//! ```

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use puppeteer::probe::ProbeManifest;
use puppeteer::session::ProbeEvent;
use puppeteer::sink::TranscriptTape;
use puppeteer::{util, Config, ProbeRegistry};

#[derive(Parser)]
#[command(name = "puppeteer")]
#[command(version, about = "Inspect probe transcripts and manifests", long_about = None)]
struct Cli {
    /// Data directory (defaults to $PUPPETEER_HOME or ~/.puppeteer)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print every probe event of a recorded transcript tape
    Render {
        /// JSONL tape written by a recording session (newest recorded tape if omitted)
        tape: Option<PathBuf>,

        /// Emit the events as a JSON array
        #[arg(long)]
        json: bool,
    },

    /// Build a sealed registry from a probe manifest
    Check {
        /// TOML manifest with `[[probe]]` entries
        manifest: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    util::init_data_dir(cli.data_dir);
    init_logging()?;

    let config = Config::load();
    tracing::debug!(data_dir = %util::data_dir().display(), "configuration loaded");

    match cli.command {
        Commands::Render { tape, json } => {
            let tape = match tape {
                Some(tape) => tape,
                None => latest_tape(&config.transcript.dir)?,
            };
            run_render(tape, json)
        }
        Commands::Check { manifest } => run_check(manifest),
    }
}

fn init_logging() -> Result<()> {
    // Log to file (~/.puppeteer/logs/puppeteer.log)
    fs::create_dir_all(util::logs_dir())?;

    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(util::log_file_path())?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(log_file)
        .with_ansi(false)
        .init();
    Ok(())
}

/// Newest `.jsonl` tape in `dir`; tape names are time-ordered UUIDs
fn latest_tape(dir: &Path) -> Result<PathBuf> {
    let entries = fs::read_dir(dir)
        .with_context(|| format!("failed to list transcripts in {}", dir.display()))?;
    let mut tapes = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.extension().is_some_and(|ext| ext == "jsonl") {
            tapes.push(path);
        }
    }
    tapes.sort();
    tapes
        .pop()
        .ok_or_else(|| anyhow!("no transcript tapes in {}", dir.display()))
}

fn run_render(path: PathBuf, json: bool) -> Result<()> {
    let tape = TranscriptTape::read_jsonl_from_path(&path)
        .with_context(|| format!("failed to read tape {}", path.display()))?;
    let events = tape.events();
    tracing::debug!(path = %path.display(), events = events.len(), "rendering tape");

    if json {
        println!("{}", serde_json::to_string_pretty(&events)?);
        return Ok(());
    }

    if events.is_empty() {
        println!("no probe events recorded");
        return Ok(());
    }
    for (idx, event) in events.iter().enumerate() {
        println!("{}", render_line(idx + 1, event));
    }
    Ok(())
}

fn render_line(position: usize, event: &ProbeEvent) -> String {
    let applied = event
        .applied
        .map(|kind| kind.to_string())
        .unwrap_or_else(|| "-".to_string());
    let location = if event.location.is_empty() {
        "?"
    } else {
        event.location.as_str()
    };
    let mut line = format!(
        "{position:>3}. {:<9} {} @ {} [{}] -> {applied}",
        event.status.as_str(),
        event.probe_id,
        location,
        event.correlation_id,
    );
    if let Some(reason) = &event.reason {
        line.push_str(": ");
        line.push_str(reason);
    }
    for report in &event.reports {
        line.push_str(&format!("\n       report {report}"));
    }
    line
}

fn run_check(path: PathBuf) -> Result<()> {
    let manifest = ProbeManifest::load(&path)
        .with_context(|| format!("invalid manifest {}", path.display()))?;
    let registry = ProbeRegistry::from_manifest(manifest)
        .with_context(|| format!("invalid manifest {}", path.display()))?;
    registry.seal();

    println!("{} probes (sealed)", registry.len());
    for probe in registry.probes() {
        let allow = probe
            .allowed_directives
            .iter()
            .map(|kind| kind.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        let location = if probe.location.is_empty() {
            "?"
        } else {
            probe.location.as_str()
        };
        println!("  {:<24} {:<32} {}", probe.id, location, allow);
    }
    Ok(())
}
