use std::io::Write;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use layerpost::settings::JobConfig;
use layerpost::{init_logging, process_file, LogFormat, BUILD_DATE, VERSION};

/// Post-process sliced G-code
#[derive(Parser)]
#[command(name = "layerpost")]
#[command(about = "Insert pauses, filament changes, cleaning, time-lapse and tool-change code into sliced G-code", long_about = None)]
#[command(version = concat!(env!("CARGO_PKG_VERSION"), " (built ", env!("BUILD_DATE"), ")"))]
struct Cli {
    /// Log as JSON lines on stderr
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a job's scripts over a G-code file
    Run {
        /// Sliced G-code file
        #[arg(name = "INPUT")]
        input: PathBuf,

        /// Output file; G-code goes to stdout when omitted
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Job file (.toml or .json); defaults to the user config directory
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Write a job file listing every script with default settings
    InitConfig {
        /// Where to write it; defaults to the user config directory
        #[arg(name = "PATH")]
        path: Option<PathBuf>,

        /// Replace an existing file
        #[arg(long)]
        force: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(if cli.log_json {
        LogFormat::Json
    } else {
        LogFormat::Text
    })?;
    tracing::debug!("layerpost {} (built {})", VERSION, BUILD_DATE);

    match cli.command {
        Commands::Run {
            input,
            output,
            config,
        } => run(input, output, config),
        Commands::InitConfig { path, force } => init_config(path, force),
    }
}

fn job_path(path: Option<PathBuf>) -> Result<PathBuf> {
    match path {
        Some(path) => Ok(path),
        None => JobConfig::default_path().context("no job file given and no default location"),
    }
}

fn run(input: PathBuf, output: Option<PathBuf>, config: Option<PathBuf>) -> Result<()> {
    let config = job_path(config)?;
    if !config.exists() {
        bail!(
            "job file {} not found; create one with `layerpost init-config`",
            config.display()
        );
    }
    let (job, warnings) = JobConfig::load_from_file(&config)
        .with_context(|| format!("failed to load job file {}", config.display()))?;
    for warning in &warnings {
        eprintln!("warning: {}", warning);
    }

    let outcome = process_file(&input, output.as_deref(), &job)?;
    for message in &outcome.messages {
        eprintln!("{}: {}", message.title, message.text);
    }
    for failure in outcome.failures() {
        eprintln!(
            "{} skipped: {}",
            failure.processor,
            failure.error.as_deref().unwrap_or("unknown error")
        );
    }

    if output.is_none() {
        let mut stdout = std::io::stdout().lock();
        stdout
            .write_all(outcome.gcode.as_bytes())
            .context("failed to write G-code to stdout")?;
        stdout.flush()?;
    }
    tracing::info!(
        "{} scripts ran, {} blocks inserted",
        outcome.reports.len(),
        outcome.insertions()
    );
    Ok(())
}

fn init_config(path: Option<PathBuf>, force: bool) -> Result<()> {
    let path = job_path(path)?;
    if path.exists() && !force {
        bail!("{} already exists; pass --force to replace it", path.display());
    }
    JobConfig::template()
        .save_to_file(&path)
        .with_context(|| format!("failed to write {}", path.display()))?;
    eprintln!("Wrote {}", path.display());
    Ok(())
}
