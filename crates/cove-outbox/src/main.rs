use anyhow::Result;
use clap::{Parser, Subcommand};
use cove_core::Lane;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "cove-outbox")]
#[command(about = "Inspect and maintain the Cove Mail offline action queue")]
struct Cli {
    /// Config directory (default: platform config dir)
    #[arg(long, global = true, value_name = "DIR")]
    config_dir: Option<PathBuf>,
    /// Data directory (default: platform data dir)
    #[arg(long, global = true, value_name = "DIR", requires = "config_dir")]
    data_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show lane sizes and where they are stored
    Status,
    /// List queued tasks in dispatch order
    List {
        /// Only this lane (primary or secondary)
        #[arg(long, value_parser = parse_lane)]
        lane: Option<Lane>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Drop every queued task owned by a user
    PurgeUser { user_id: String },
    /// Drop every queued task
    Clear,
}

fn parse_lane(value: &str) -> Result<Lane, String> {
    match value {
        "primary" => Ok(Lane::Primary),
        "secondary" => Ok(Lane::Secondary),
        other => Err(format!("unknown lane `{other}`, expected primary or secondary")),
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let outbox = commands::Outbox::open(cli.config_dir.as_deref(), cli.data_dir.as_deref())?;

    match cli.command {
        Command::Status => commands::status(&outbox).await,
        Command::List { lane, json } => commands::list(&outbox, lane, json).await,
        Command::PurgeUser { user_id } => commands::purge_user(&outbox, &user_id).await,
        Command::Clear => commands::clear(&outbox).await,
    }
}
