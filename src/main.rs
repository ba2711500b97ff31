use anyhow::Result;
use clap::Parser;
use studyroom::cli::Cli;
use studyroom::logging;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = logging::init_tracing(&cli.logs_dir())?;
    cli.run().await
}
