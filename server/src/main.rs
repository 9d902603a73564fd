use clap::Parser;
use log::{error, info};
use server::config::ServerConfig;
use server::network::Server;
use shared::{DEFAULT_MAX_FRAME_SIZE, DEFAULT_PORT};

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Server IP address to bind to
    #[clap(short = 'H', long, default_value = "127.0.0.1")]
    host: String,
    /// Server port to listen on
    #[clap(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,
    /// Largest accepted frame payload in bytes
    #[clap(short, long, default_value_t = DEFAULT_MAX_FRAME_SIZE)]
    max_frame_size: usize,
}

/// Parses command-line arguments, binds the listener and serves until Ctrl+C.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args = Args::parse();
    let config = ServerConfig {
        host: args.host,
        port: args.port,
        max_frame_size: args.max_frame_size,
    };

    let server = match Server::bind(&config).await {
        Ok(server) => server,
        Err(e) => {
            error!("Failed to bind {}: {}", config.address(), e);
            return Err(e);
        }
    };

    tokio::select! {
        _ = server.run() => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
