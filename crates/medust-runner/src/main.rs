use clap::{Parser, Subcommand};
use medust_model::load_config;
use medust_runner::{init_logging, write_outputs, Pipeline, RunOptions};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::Ordering;
use tracing::{error, info, warn};

/// Detect Mediterranean dust events and measure how long the cloud
/// anomalies that follow them persist.
#[derive(Parser, Debug)]
#[command(name = "medust", version, about, long_about = None)]
struct Cli {
    /// Log level used when RUST_LOG is not set
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a study and write its catalogs
    Run {
        /// Study configuration (YAML)
        #[arg(short, long)]
        config: PathBuf,

        /// Output directory, overriding output.dir
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Run the covariate regression after the per-event fits
        #[arg(long)]
        aggregate: bool,

        /// Worker threads for the per-event analysis (0 = all cores)
        #[arg(long)]
        threads: Option<usize>,
    },

    /// Check a configuration file without running anything
    Validate {
        /// Study configuration (YAML)
        #[arg(short, long)]
        config: PathBuf,
    },
}

fn run(config_path: &Path, options: RunOptions) -> medust_runner::Result<u8> {
    let mut config = load_config(config_path)?;
    options.apply(&mut config)?;

    let pipeline = Pipeline::new(config)?;
    let shutdown = pipeline.shutdown_flag();
    if let Err(e) = ctrlc::set_handler(move || {
        warn!("Shutdown requested, finishing events in flight");
        shutdown.store(true, Ordering::SeqCst);
    }) {
        warn!("Could not install Ctrl-C handler: {}", e);
    }

    let output = pipeline.run()?;
    write_outputs(&pipeline.config().output.dir, &output)?;
    Ok(output.summary.exit_code() as u8)
}

fn validate(config_path: &Path) -> medust_runner::Result<u8> {
    let config = load_config(config_path)?;
    info!(
        "Configuration '{}' is valid: {} regions, {} expected days",
        config.study.name,
        config.regions.len(),
        config.observation_window().expected_days()
    );
    Ok(0)
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli.log_level);
    medust_metrics::describe_metrics();

    let result = match cli.command {
        Command::Run {
            config,
            output,
            aggregate,
            threads,
        } => run(
            &config,
            RunOptions {
                output_dir: output,
                aggregate,
                threads,
            },
        ),
        Command::Validate { config } => validate(&config),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!("{}", e);
            ExitCode::from(1)
        }
    }
}
