use clap::Parser;
use client::bot::{self, BotConfig};
use log::info;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:8888")]
    server: String,

    /// Player identifier to log in with
    #[arg(short = 'p', long)]
    player_id: String,

    /// Number of position updates to send once in a room
    #[arg(short = 'u', long, default_value = "20")]
    updates: u32,

    /// Delay between updates in milliseconds
    #[arg(short = 'i', long, default_value = "100")]
    interval_ms: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    info!("Connecting to {} as {}", args.server, args.player_id);

    let config = BotConfig {
        server: args.server,
        player_id: args.player_id,
        updates: args.updates,
        interval: Duration::from_millis(args.interval_ms),
    };

    let report = bot::run(&config).await?;
    info!("Finished in room {}", report.room_id);

    Ok(())
}
