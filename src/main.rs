//! Posture Pipeline CLI
//!
//! Capture sessions, build the windowed dataset and export the linear model.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use posture_pipeline::{
    capture::{available_ports, CancelFlag, SerialOpener, SystemClock},
    core::{Dataset, DatasetAssembler, ParameterExporter, SessionLoader},
    extractor_for, CaptureOutcome, PipelineConfig, SessionCaptureService, VERSION,
};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "posture")]
#[command(version = VERSION)]
#[command(about = "Capture, window and export posture sensor sessions", long_about = None)]
struct Cli {
    /// Configuration file (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record one complete session from the serial port
    Capture {
        /// Serial port name
        #[arg(long)]
        port: Option<String>,

        /// Serial baud rate
        #[arg(long)]
        baud: Option<u32>,

        /// Required session length in seconds
        #[arg(long)]
        duration_secs: Option<u64>,

        /// Directory to write the session file into
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },

    /// Window all labeled sessions into a feature dataset
    BuildDataset {
        /// Directory containing good_*.csv / bad_*.csv sessions
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Output dataset file
        #[arg(long, short, default_value = "windows_dataset.csv")]
        output: PathBuf,

        /// Samples per window
        #[arg(long)]
        window_size: Option<usize>,

        /// Samples between window starts
        #[arg(long)]
        step_size: Option<usize>,
    },

    /// Fit logistic regression on the dataset and print firmware parameters
    Export {
        /// Windowed dataset file
        #[arg(long, default_value = "windows_dataset.csv")]
        dataset: PathBuf,

        /// Also write model_params.h / model_params.cpp into this directory
        #[arg(long)]
        output_dir: Option<PathBuf>,

        /// Also write model.json (requires --output-dir)
        #[arg(long)]
        json: bool,
    },

    /// List serial ports present on this machine
    Ports,

    /// Show the effective configuration
    Config,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    let result = load_config(cli.config.as_deref()).and_then(|config| match cli.command {
        Commands::Capture {
            port,
            baud,
            duration_secs,
            data_dir,
        } => {
            let mut config = config;
            if let Some(port) = port {
                config.port = port;
            }
            if let Some(baud) = baud {
                config.baud = baud;
            }
            if let Some(secs) = duration_secs {
                config.session_duration = Duration::from_secs(secs);
            }
            if let Some(dir) = data_dir {
                config.data_dir = dir;
            }
            cmd_capture(config)
        }
        Commands::BuildDataset {
            data_dir,
            output,
            window_size,
            step_size,
        } => {
            let mut config = config;
            if let Some(dir) = data_dir {
                config.data_dir = dir;
            }
            if let Some(size) = window_size {
                config.window_size = size;
            }
            if let Some(step) = step_size {
                config.step_size = step;
            }
            cmd_build_dataset(config, &output)
        }
        Commands::Export {
            dataset,
            output_dir,
            json,
        } => cmd_export(&dataset, output_dir.as_deref(), json),
        Commands::Ports => {
            cmd_ports();
            Ok(())
        }
        Commands::Config => cmd_config(&config),
    });

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    match path {
        Some(path) => PipelineConfig::load_from(path)
            .with_context(|| format!("loading config from {}", path.display())),
        None => PipelineConfig::load().context("loading default config"),
    }
}

fn cmd_capture(config: PipelineConfig) -> Result<()> {
    config.validate()?;
    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("creating {}", config.data_dir.display()))?;

    println!("Posture Pipeline v{VERSION}");
    println!();
    println!("  Port: {} @ {} baud", config.port, config.baud);
    println!(
        "  Session length: {}s (file kept only if reached)",
        config.session_duration.as_secs()
    );
    println!("  Output directory: {}", config.data_dir.display());
    println!();
    println!("Press Ctrl+C to stop");
    println!();

    let cancel = CancelFlag::new();
    ctrlc_handler(cancel.clone())?;

    let opener = SerialOpener::new(config.read_timeout);
    let mut service = SessionCaptureService::new(&config, opener, SystemClock::new(), cancel);
    let outcome = service.capture()?;

    println!();
    match outcome {
        CaptureOutcome::Saved(saved) => {
            println!("Finished {}s session.", config.session_duration.as_secs());
            println!("Saved: {}", saved.path.display());
        }
        CaptureOutcome::Discarded(reason) => {
            println!("Session incomplete ({reason}). File discarded.");
        }
    }
    println!();
    println!("{}", service.stats().summary());
    Ok(())
}

fn cmd_build_dataset(config: PipelineConfig, output: &Path) -> Result<()> {
    config.validate()?;

    let sessions = SessionLoader::new(config.label_groups.clone())
        .load_dir(&config.data_dir)
        .context("loading sessions")?;

    let dataset = DatasetAssembler::new(extractor_for(&config))
        .assemble(&sessions)
        .context("assembling dataset")?;

    println!(
        "Window dataset shape: ({}, {})",
        dataset.len(),
        dataset.feature_count() + 3
    );

    dataset
        .write_csv(output)
        .with_context(|| format!("writing {}", output.display()))?;
    println!("Saved window dataset to {}", output.display());
    Ok(())
}

fn cmd_export(dataset_path: &Path, output_dir: Option<&Path>, json: bool) -> Result<()> {
    if json && output_dir.is_none() {
        bail!("--json requires --output-dir");
    }

    let dataset = Dataset::read_csv(dataset_path)
        .with_context(|| format!("reading {}", dataset_path.display()))?;
    println!(
        "Loaded: ({}, {}) from {}",
        dataset.len(),
        dataset.feature_count() + 3,
        dataset_path.display()
    );

    let model = ParameterExporter::default()
        .export(&dataset)
        .context("fitting logistic regression")?;

    println!("Number of features: {}", model.feature_count());
    println!("Training accuracy: {:.3}", model.accuracy(&dataset));
    println!();
    println!("Feature order (must match on device):");
    print!("{}", model.render_manifest());
    println!();
    println!("// ====== model_params.cpp ======");
    print!("{}", model.render_source());
    println!("// ==============================");

    if let Some(dir) = output_dir {
        std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;

        let header_path = dir.join("model_params.h");
        std::fs::write(&header_path, model.render_header())
            .with_context(|| format!("writing {}", header_path.display()))?;
        let source_path = dir.join("model_params.cpp");
        std::fs::write(&source_path, model.render_source())
            .with_context(|| format!("writing {}", source_path.display()))?;
        println!("Wrote {} and {}", header_path.display(), source_path.display());

        if json {
            let json_path = dir.join("model.json");
            std::fs::write(&json_path, serde_json::to_string_pretty(&model)?)
                .with_context(|| format!("writing {}", json_path.display()))?;
            println!("Wrote {}", json_path.display());
        }
    }

    Ok(())
}

fn cmd_ports() {
    let ports = available_ports();
    if ports.is_empty() {
        println!("No serial ports found.");
    } else {
        for port in ports {
            println!("{port}");
        }
    }
}

fn cmd_config(config: &PipelineConfig) -> Result<()> {
    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", PipelineConfig::config_path());
    println!();
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}

/// Set up Ctrl+C handler.
fn ctrlc_handler(cancel: CancelFlag) -> Result<()> {
    ctrlc::set_handler(move || {
        cancel.cancel();
    })
    .context("setting Ctrl+C handler")
}
