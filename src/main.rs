use clap::Parser;

use promptme::cli::{self, Cli};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    cli::init_logging(&cli.log_level);
    cli::run(cli).await
}
