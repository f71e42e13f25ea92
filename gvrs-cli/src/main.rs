mod inspect;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "gvrs")]
#[command(about = "GVRS raster store CLI tool", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Check a GVRS file's record stream and directory for corruption
    Inspect(inspect::Args),
}

fn main() -> std::process::ExitCode {
    // Initialize logger from RUST_LOG environment variable.
    // Example: RUST_LOG=debug gvrs inspect grid.gvrs
    env_logger::init();

    let cli = Cli::parse();
    let code = match cli.command {
        Commands::Inspect(args) => inspect::run(&args),
    };
    std::process::ExitCode::from(code)
}
