use std::error::Error;

use clap::{Parser, Subcommand};
use commands::{
    naming::{self, NameArgs, SplitArgs},
    resolve::{self, ResolveArgs},
};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser, Debug)]
#[command(name = "syst", about = "Systematic-variation bookkeeping CLI")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Resolve the corrections active at one stage from layered configuration files.
    Resolve(ResolveArgs),
    /// Derive the systematic name of a (source, scale) pair.
    Name(NameArgs),
    /// Split a systematic name into its source and scale.
    Split(SplitArgs),
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<(), Box<dyn Error>> {
    init_tracing();
    let cli = Cli::parse();
    match cli.command {
        Command::Resolve(args) => resolve::run(&args),
        Command::Name(args) => naming::run_name(&args),
        Command::Split(args) => naming::run_split(&args),
    }
}
