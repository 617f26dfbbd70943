use clap::Parser;
use log::info;
use server::config::ServerConfig;
use server::game::Game;
use server::network::Server;
use std::sync::Arc;
use std::time::Duration;

/// Main-method of the application.
/// Parses command-line arguments, allocates the board and serves connections.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Command line arguments
    #[derive(Parser, Debug)]
    #[command(author, version, about)]
    struct Args {
        /// Server IP address to bind to
        #[arg(short = 'H', long, default_value = "0.0.0.0")]
        host: String,
        /// Server port to listen on
        #[arg(short, long, env = "PORT", default_value = "8080")]
        port: u16,
        /// Milliseconds between stats broadcasts
        #[arg(short, long, default_value = "100")]
        tick_ms: u64,
    }

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let config = ServerConfig {
        tick_duration: Duration::from_millis(args.tick_ms.max(1)),
        ..ServerConfig::default()
    };

    let game = Arc::new(Game::new());
    let address = format!("{}:{}", args.host, args.port);
    let server = Server::bind(&address, game, config).await?;

    tokio::select! {
        result = server.run() => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
