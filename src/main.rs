use anyhow::Result;
use clap::Parser;

use spvcf::cli::{Cli, Commands};
use spvcf::{codec, slice};

fn main() -> Result<()> {
    // Logging goes to stderr so piped output stays clean.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Encode(args) => codec::encode(&args),
        Commands::Squeeze(args) => codec::squeeze(&args),
        Commands::Decode(args) => codec::decode(&args),
        Commands::Tabix(args) => slice::tabix_slice(&args),
    }
}
