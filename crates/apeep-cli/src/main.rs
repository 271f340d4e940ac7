mod commands;
mod logging;
mod summary;

use anyhow::Result;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "apeep", about = "ISIIS plankton image processing")]
#[command(version)]
struct Cli {
    /// Enable debug output
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process the acquisition of a project
    Run(commands::pipeline::RunArgs),
    /// Print or save the default configuration
    Config(commands::config::ConfigArgs),
    /// List the video files of a directory
    Info(commands::info::InfoArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_dir = match &cli.command {
        Commands::Run(args) => Some(args.project.join("log")),
        _ => None,
    };
    let _log_guard = logging::init(cli.debug, log_dir.as_deref())?;

    match &cli.command {
        Commands::Run(args) => commands::pipeline::run(args),
        Commands::Config(args) => commands::config::run(args),
        Commands::Info(args) => commands::info::run(args),
    }
}
