use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::fs;
use std::path::PathBuf;

mod config;
mod dates;
mod generate;
mod palette;
mod pipeline;
mod poster;
mod refetch;
mod scrape;
mod types;
mod utils;

use config::Config;
use dates::YearMonth;

#[derive(Parser)]
#[command(name = "bgm-review")]
#[command(about = "Seasonal anime review pages from a bgm.tv collection")]
struct Cli {
    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scrape the collection and write the review document with posters
    Generate(RunArgs),
    /// Download the posters referenced by an existing document again
    Refetch {
        /// Review document to read cards from
        #[arg(value_name = "DOCUMENT", default_value = config::DOCUMENT_NAME)]
        document: PathBuf,
        /// Directory the posters are written to
        #[arg(short, long, default_value = refetch::DEFAULT_OUT_DIR)]
        out: PathBuf,
        /// Image size variant to request
        #[arg(long = "type", default_value = refetch::DEFAULT_IMAGE_TYPE)]
        image_type: String,
        /// CONL config file (only network settings are used)
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Proxy for all requests, e.g. http://127.0.0.1:7890
        #[arg(long)]
        proxy: Option<String>,
    },
    /// Remove the output directory of a target month
    Clean(RunArgs),
}

#[derive(Args)]
struct RunArgs {
    /// CONL config file
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Bangumi user id or username
    #[arg(short, long)]
    user: Option<String>,
    /// Target month (YYYY-MM)
    #[arg(short, long)]
    month: Option<YearMonth>,
    /// Proxy for all requests, e.g. http://127.0.0.1:7890
    #[arg(long)]
    proxy: Option<String>,
}

impl RunArgs {
    /// Config file first, then flags on top
    fn resolve(self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::load_path(path)?,
            None => {
                let user = self
                    .user
                    .clone()
                    .context("--user is required when no --config is given")?;
                let month = self
                    .month
                    .context("--month is required when no --config is given")?;
                Config::new(user, month)
            }
        };
        if let Some(user) = self.user {
            config.user_id = user;
        }
        if let Some(month) = self.month {
            config.target = month;
        }
        if self.proxy.is_some() {
            config.proxy = self.proxy;
        }
        config.validate()?;
        Ok(config)
    }
}

fn init_logging(quiet: bool) {
    let default_level = if quiet { "warn" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .init();
}

fn run_refetch(
    document: PathBuf,
    out: PathBuf,
    image_type: String,
    config: Option<PathBuf>,
    proxy: Option<String>,
) -> Result<()> {
    let mut config = match config {
        Some(path) => Config::load_path(path)?,
        None => Config::new(
            String::new(),
            YearMonth::containing(chrono::Local::now().date_naive()),
        ),
    };
    if proxy.is_some() {
        config.proxy = proxy;
    }
    let client = scrape::BgmClient::new(&config)?;

    let summary = refetch::run_refetch(
        &client,
        &document,
        &out,
        &image_type,
        config.poster_delay(),
    )?;
    tracing::info!("{}/{} posters saved to {}", summary.saved, summary.cards, out.display());
    Ok(())
}

fn run_clean(config: &Config) -> Result<()> {
    let dir = config.output_dir();
    if dir.exists() {
        fs::remove_dir_all(&dir)
            .with_context(|| format!("Failed to remove {}", dir.display()))?;
        tracing::info!("removed {}", dir.display());
    } else {
        tracing::info!("nothing to clean at {}", dir.display());
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.quiet);

    match cli.command {
        Commands::Generate(args) => pipeline::run_review(&args.resolve()?),
        Commands::Refetch {
            document,
            out,
            image_type,
            config,
            proxy,
        } => run_refetch(document, out, image_type, config, proxy),
        Commands::Clean(args) => run_clean(&args.resolve()?),
    }
}
