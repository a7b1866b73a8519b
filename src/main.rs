use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file path (defaults to ./toolbridge.toml when present)
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Show debug logging on stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Command to run
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the Language Server Protocol server
    Server {
        /// Listen on a TCP port instead of stdio (useful for debugging)
        #[arg(long)]
        port: Option<u16>,
    },
    /// Serve tool runs on stdio for another toolbridge process
    Runner,
    /// Run the tool once without a document
    Run {
        /// Extra arguments passed to the tool
        #[arg(last = true)]
        args: Vec<String>,
    },
    /// Run the tool on a file
    Check {
        /// File to run the tool on
        file: PathBuf,

        /// Send the file content on stdin instead of passing its path
        #[arg(long)]
        stdin: bool,

        /// Extra arguments passed to the tool
        #[arg(last = true)]
        args: Vec<String>,
    },
    /// Show version information
    Version,
}

fn main() {
    let cli = Cli::parse();

    // stdout carries LSP and runner traffic, so logs always go to stderr
    let mut logger = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"));
    logger.target(env_logger::Target::Stderr);
    if cli.verbose {
        logger.filter_level(log::LevelFilter::Debug);
    }
    logger.init();

    match cli.command {
        Commands::Server { port } => commands::server::handle_server(port, cli.config),
        Commands::Runner => commands::runner::handle_runner(cli.config),
        Commands::Run { args } => commands::run::handle_run(args, cli.config),
        Commands::Check { file, stdin, args } => commands::run::handle_check(&file, stdin, args, cli.config),
        Commands::Version => println!("toolbridge {}", env!("CARGO_PKG_VERSION")),
    }
}
