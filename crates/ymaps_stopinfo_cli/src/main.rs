//! Demo CLI for the Yandex Maps stop-info client
//!
//! Fetches arrival predictions for a single stop and prints the raw
//! JSON payload (or just its top-level keys).

#![allow(clippy::print_stdout)]

use clap::{CommandFactory, Parser};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use ymaps_stopinfo::{StopInfoClient, StopInfoConfig, YandexMapsClient};

/// Fetch real-time arrival predictions for a Yandex Maps stop
#[derive(Parser)]
#[command(name = "ymaps-stopinfo", version, about, long_about = None)]
struct Cli {
    /// ID of the stop from Yandex Maps (raw number or stop__<id>)
    #[arg(short, long)]
    stop_id: Option<String>,

    /// Print only the top-level keys of the response
    #[arg(long)]
    keys: bool,

    /// Override the User-Agent sent to the upstream
    #[arg(long)]
    user_agent: Option<String>,

    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

/// Determine log filter level from verbosity count
const fn log_filter_from_verbosity(verbose: u8) -> &'static str {
    match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = log_filter_from_verbosity(cli.verbose);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(filter))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let Some(stop_id) = cli.stop_id else {
        Cli::command().print_help()?;
        return Ok(());
    };

    let mut config = StopInfoConfig::default();
    if let Some(user_agent) = cli.user_agent {
        config.user_agent = user_agent;
    }

    let client = YandexMapsClient::new(&config)?;
    let info = client.stop_info(&stop_id).await?;

    if cli.keys {
        if let Some(object) = info.as_object() {
            for key in object.keys() {
                println!("{key}");
            }
        }
    } else {
        println!("{}", serde_json::to_string_pretty(&info)?);
    }

    Ok(())
}
