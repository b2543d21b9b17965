use std::time::Duration;

use anyhow::Context as _;
use clap::{Args, Parser, Subcommand};
use url::Url;

use crate::steam::{DEFAULT_API_BASE_URL, DEFAULT_STORE_BASE_URL, SteamConfig};

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Harvest details and reviews for every app not yet queried.
    Crawl(CrawlArgs),
    /// Fetch (or show) the cached app catalog.
    Catalog(CatalogArgs),
    /// Print the app id for an app name.
    Lookup(LookupArgs),
}

#[derive(Debug, Args)]
pub struct StoreArgs {
    /// Directory for table snapshots, the visited set, catalog and run history.
    #[arg(long, default_value = "data")]
    pub data_dir: String,

    /// Base URL of the storefront (app details and reviews).
    #[arg(long, default_value = DEFAULT_STORE_BASE_URL)]
    pub store_base_url: String,

    /// Base URL of the web API (app list).
    #[arg(long, default_value = DEFAULT_API_BASE_URL)]
    pub api_base_url: String,

    /// Per-request timeout.
    #[arg(long, default_value_t = 10)]
    pub timeout_secs: u64,
}

impl StoreArgs {
    pub fn steam_config(&self) -> anyhow::Result<SteamConfig> {
        check_http_url("--store-base-url", &self.store_base_url)?;
        check_http_url("--api-base-url", &self.api_base_url)?;
        Ok(SteamConfig {
            store_base_url: self.store_base_url.clone(),
            api_base_url: self.api_base_url.clone(),
            timeout: Duration::from_secs(self.timeout_secs.max(1)),
        })
    }
}

fn check_http_url(flag: &str, value: &str) -> anyhow::Result<()> {
    let url = Url::parse(value).with_context(|| format!("parse {flag}"))?;
    if url.scheme() != "http" && url.scheme() != "https" {
        anyhow::bail!("{flag} must be http/https: {url}");
    }
    Ok(())
}

#[derive(Debug, Args)]
pub struct CrawlArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    /// Write a snapshot after this many newly harvested apps.
    #[arg(long, default_value_t = 10, value_parser = clap::value_parser!(u64).range(1..))]
    pub checkpoint_every: u64,

    /// Log review download progress every N reviews (0 disables).
    #[arg(long, default_value_t = 1000)]
    pub review_report_every: u64,

    /// Stop after this many unvisited apps.
    #[arg(long)]
    pub max_items: Option<usize>,

    /// Delay before each app (politeness).
    #[arg(long, default_value_t = 0)]
    pub delay_ms: u64,

    /// Re-download the catalog instead of using the cached copy.
    #[arg(long)]
    pub refresh_catalog: bool,
}

#[derive(Debug, Args)]
pub struct CatalogArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    /// Overwrite the cached catalog.
    #[arg(long)]
    pub refresh: bool,
}

#[derive(Debug, Args)]
pub struct LookupArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    /// App name (case-insensitive, exact).
    #[arg(long)]
    pub name: String,
}
