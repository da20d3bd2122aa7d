//! microsim command line
//!
//! Runs a simulation from a component configuration file, or lists the event
//! channels and listeners a set of components wires up.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Mutex;

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use microsim::catalog::{ComponentCatalog, ComponentConfiguration};
use microsim::config::{Configuration, Layer};
use microsim::engine::{configure, run_simulation, setup_simulation, Component};
use microsim::results::dump_results;
use microsim::SimResult;

#[derive(Parser, Debug)]
#[command(name = "microsim")]
#[command(about = "Discrete-time population microsimulation")]
struct Cli {
    /// Log at debug level instead of errors only
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Write logs to this file instead of stderr
    #[arg(long, global = true)]
    log: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a simulation
    Run {
        /// Component configuration (JSON)
        components: PathBuf,

        /// Configuration overrides (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Draw number for the randomness streams
        #[arg(short, long, default_value_t = 0)]
        draw: u64,

        /// Where to write the flat results (JSON)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// List event channels and their listeners after setup
    ListEvents {
        /// Component configuration (JSON)
        components: Option<PathBuf>,
    },
}

fn init_logging(verbose: bool, log: Option<&Path>) -> Result<(), String> {
    let level = if verbose { "debug" } else { "error" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match log {
        Some(path) => {
            let file = File::create(path)
                .map_err(|e| format!("cannot open log file {}: {e}", path.display()))?;
            builder.with_ansi(false).with_writer(Mutex::new(file)).init();
        }
        None => builder.with_writer(std::io::stderr).init(),
    }
    Ok(())
}

fn load_components(
    path: Option<&Path>,
    configuration: &Configuration,
) -> SimResult<Vec<std::sync::Arc<dyn Component>>> {
    let Some(path) = path else {
        return Ok(Vec::new());
    };
    let file = ComponentConfiguration::read(path)?;
    if file.configuration.is_object() {
        configuration.read_dict(
            &file.configuration,
            Layer::Override,
            &path.display().to_string(),
        )?;
    }
    ComponentCatalog::with_builtins().resolve(&file.components)
}

fn run(command: Command) -> SimResult<()> {
    let configuration = Configuration::with_defaults();
    match command {
        Command::Run {
            components,
            config,
            draw,
            output,
        } => {
            let components = load_components(Some(&components), &configuration)?;
            configure(&configuration, draw, config.as_deref())?;
            let result = run_simulation(components, configuration)?;
            info!(run_id = %result.run_id, ticks = result.ticks, "run complete");
            if let Some(output) = output {
                dump_results(&result, &output)?;
            }
            let flat = serde_json::to_string_pretty(&result.flat())
                .map_err(|e| microsim::SimError::internal(e.to_string()))?;
            println!("{flat}");
        }
        Command::ListEvents { components } => {
            let components = load_components(components.as_deref(), &configuration)?;
            let context = setup_simulation(components, configuration)?;
            for (channel, listeners) in context.list_events()? {
                println!("{channel}");
                for listener in listeners {
                    println!("  [{}] {}", listener.priority, listener.name);
                }
            }
        }
    }
    Ok(())
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = init_logging(cli.verbose, cli.log.as_deref()) {
        eprintln!("error: {e}");
        process::exit(1);
    }
    if let Err(e) = run(cli.command) {
        error!("{e}");
        eprintln!("error: {e}");
        process::exit(1);
    }
}
