// dagsweep
// Command-line entry point for expanding, planning and running parameter sweeps

mod commands;
mod output;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use commands::plan::PlanArgs;
use commands::run::RunArgs;
use commands::script::ScriptArgs;
use commands::validate::ValidateArgs;

/// Sweep pipelines of external processes over parameter grids
#[derive(Parser, Debug)]
#[command(name = "dagsweep", version, about)]
struct Cli {
    /// Show debug logs (overridden by RUST_LOG)
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check a pipeline definition and optional params file
    Validate(ValidateArgs),
    /// Expand the matrix and list the resulting jobs
    Plan(PlanArgs),
    /// Execute a sweep
    Run(RunArgs),
    /// Write a serial or Slurm driver script for a sweep
    Script(ScriptArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Command::Validate(args) => commands::validate::execute(args),
        Command::Plan(args) => commands::plan::execute(args),
        Command::Run(args) => commands::run::execute(args).await,
        Command::Script(args) => commands::script::execute(args),
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "sweep_service=debug,dagsweep=debug"
    } else {
        "sweep_service=warn,dagsweep=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .init();
}
