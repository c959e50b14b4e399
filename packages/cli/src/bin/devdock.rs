use clap::{Parser, Subcommand};
use colored::*;
use std::path::PathBuf;
use std::process;

mod cli;

use cli::discovery::{handle_kill, handle_scan, handle_watch};
use cli::servers::{handle_detect, handle_start};

#[derive(Parser)]
#[command(name = "devdock")]
#[command(about = "devdock - run local dev servers and find the ones already running")]
#[command(version)]
struct Cli {
    /// Enable debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start dev servers for one or more projects and stream their output
    Start {
        /// Project directories
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        /// Also watch for external servers while running
        #[arg(long)]
        discover: bool,
    },
    /// Scan common development ports once for external servers
    Scan {
        /// Print the snapshot as JSON
        #[arg(long)]
        json: bool,
    },
    /// Keep scanning for external servers and print every update
    Watch,
    /// Kill the external server listening on a port
    Kill {
        /// Port of the external server
        port: u16,
    },
    /// Show how a project would be started
    Detect {
        /// Project directory
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    // Load .env file
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    devdock_cli::init_tracing(cli.verbose);

    match handle_command(cli.command).await {
        Ok(_) => {}
        Err(e) => {
            eprintln!("{} {}", "Error:".red().bold(), e);
            process::exit(1);
        }
    }
}

async fn handle_command(command: Commands) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Commands::Start { paths, discover } => handle_start(paths, discover).await,
        Commands::Scan { json } => handle_scan(json).await,
        Commands::Watch => handle_watch().await,
        Commands::Kill { port } => handle_kill(port).await,
        Commands::Detect { path } => handle_detect(path),
    }
}
