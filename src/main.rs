use std::process::ExitCode;

use anyhow::Context as _;
use clap::Parser as _;

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(err) = try_main().await {
        eprintln!("{err:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

async fn try_main() -> anyhow::Result<()> {
    storefront_harvest::logging::init().context("init logging")?;

    let cli = storefront_harvest::cli::Cli::parse();
    tracing::debug!(?cli, "parsed cli");

    match cli.command {
        storefront_harvest::cli::Command::Crawl(args) => {
            storefront_harvest::crawl::run(args).await.context("crawl")?;
        }
        storefront_harvest::cli::Command::Catalog(args) => {
            storefront_harvest::catalog::run(args)
                .await
                .context("catalog")?;
        }
        storefront_harvest::cli::Command::Lookup(args) => {
            storefront_harvest::catalog::lookup(args)
                .await
                .context("lookup")?;
        }
    }

    Ok(())
}
