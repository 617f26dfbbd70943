//! Listener and connection upgrade

use crate::config::ServerConfig;
use crate::game::Game;
use crate::hub::{Hub, HubClosed, HubHandle};
use crate::player::{outbox, Player};
use log::{debug, error, info, warn};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::{accept_hdr_async_with_config, WebSocketStream};

#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("upgrade failed: {0}")]
    Handshake(#[from] WsError),

    #[error(transparent)]
    Hub(#[from] HubClosed),
}

/// Accepts connections and hands each upgraded one to a new player.
pub struct Server {
    listener: TcpListener,
    game: Arc<Game>,
    hub: HubHandle,
    config: Arc<ServerConfig>,
}

impl Server {
    /// Binds the listener and starts the hub.
    pub async fn bind(addr: &str, game: Arc<Game>, config: ServerConfig) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!(
            "Server listening on {} (upgrade path {})",
            listener.local_addr()?,
            config.websocket_path
        );

        let hub = Hub::spawn(Arc::clone(&game), &config);

        Ok(Server {
            listener,
            game,
            hub,
            config: Arc::new(config),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn hub(&self) -> HubHandle {
        self.hub.clone()
    }

    /// Accept loop. Runs for the lifetime of the process.
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        loop {
            let (stream, addr) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!("Error accepting connection: {}", e);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    continue;
                }
            };

            debug!("Accepted TCP connection from {}", addr);
            let game = Arc::clone(&self.game);
            let hub = self.hub.clone();
            let config = Arc::clone(&self.config);

            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, addr, game, hub, config).await {
                    warn!("Connection from {} failed: {}", addr, e);
                }
            });
        }
    }
}

/// Upgrades one TCP connection and serves it as a player until teardown.
pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    game: Arc<Game>,
    hub: HubHandle,
    config: Arc<ServerConfig>,
) -> Result<(), ConnectionError> {
    let ws = upgrade(stream, &config).await?;

    let (outbox, outbound) = outbox(config.outbound_queue_depth);
    let player = Player::new(game, hub.clone(), outbox.clone());
    hub.register(player.id(), outbox).await?;
    info!("Player {} connected from {}", player.id(), addr);

    player.run(ws, outbound, &config).await;
    Ok(())
}

/// Performs the upgrade handshake, refusing any path but the configured one.
async fn upgrade(
    stream: TcpStream,
    config: &ServerConfig,
) -> Result<WebSocketStream<TcpStream>, WsError> {
    let path = config.websocket_path.clone();
    let check_path = move |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        if request.uri().path() == path {
            return Ok(response);
        }
        let mut rejection = ErrorResponse::new(Some(format!(
            "no upgrade endpoint at {}",
            request.uri().path()
        )));
        *rejection.status_mut() = StatusCode::NOT_FOUND;
        Err(rejection)
    };

    let mut ws_config = WebSocketConfig::default();
    ws_config.max_message_size = Some(config.max_message_size);
    ws_config.max_frame_size = Some(config.max_message_size);

    accept_hdr_async_with_config(stream, check_path, Some(ws_config)).await
}
