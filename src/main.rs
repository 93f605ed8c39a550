//! mantis-monitor - run benchmarks under monitoring tools and merge the results

use anyhow::Result;
use clap::Parser;

mod cli;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = cli::Cli::parse();

    // Initialize logging
    cli::init_tracing(cli.verbose, cli.log_file.as_deref())?;

    cli.run().await
}
