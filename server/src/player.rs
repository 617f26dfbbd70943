//! Per-connection session
//!
//! Every connection runs two pumps. The reader owns the inbound half of the
//! socket, decodes frames and applies them to the game. The writer owns the
//! outbound half and drains the player's bounded outbound queue, interleaved
//! with keepalive pings.
//!
//! Teardown goes through an explicit [`Shutdown`] signal that both pumps
//! watch. The hub triggers it when unregistering or evicting the player; the
//! writer triggers it when a write fails. The reader always unregisters from
//! the hub before its half of the socket is released.

use crate::config::ServerConfig;
use crate::game::Game;
use crate::hub::HubHandle;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use log::{debug, error, info, warn};
use shared::{CodecError, Coordinates, Message};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use tokio::time::{interval_at, timeout, timeout_at, Instant};
use tokio_tungstenite::tungstenite::error::ProtocolError;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tokio_tungstenite::WebSocketStream;

/// An encoded frame. A broadcast encodes once and hands every recipient the
/// same allocation; the writer still copies it into its own websocket frame.
pub type Payload = Arc<[u8]>;

static NEXT_PLAYER_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PlayerId(u64);

impl PlayerId {
    pub fn next() -> Self {
        PlayerId(NEXT_PLAYER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    #[error("outbound queue is full")]
    Full,

    #[error("outbound queue is closed")]
    Closed,
}

/// One-way latch shared by everything serving a single connection.
#[derive(Debug, Clone)]
pub struct Shutdown {
    signal: Arc<watch::Sender<bool>>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            signal: Arc::new(tx),
        }
    }

    pub fn trigger(&self) {
        self.signal.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.signal.borrow()
    }

    pub fn listen(&self) -> ShutdownListener {
        ShutdownListener {
            signal: self.signal.subscribe(),
        }
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

pub struct ShutdownListener {
    signal: watch::Receiver<bool>,
}

impl ShutdownListener {
    /// Resolves once the shutdown has been triggered. Cancel safe.
    pub async fn triggered(&mut self) {
        loop {
            if *self.signal.borrow() {
                return;
            }
            if self.signal.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Sending side of a player's bounded outbound queue.
///
/// Once closed, every send fails with [`SendError::Closed`].
#[derive(Debug, Clone)]
pub struct Outbox {
    queue: mpsc::Sender<Payload>,
    shutdown: Shutdown,
}

/// Creates an outbound queue holding at most `depth` frames.
pub fn outbox(depth: usize) -> (Outbox, mpsc::Receiver<Payload>) {
    let (tx, rx) = mpsc::channel(depth);
    let outbox = Outbox {
        queue: tx,
        shutdown: Shutdown::new(),
    };
    (outbox, rx)
}

impl Outbox {
    /// Queues a frame without waiting.
    pub fn try_send(&self, payload: Payload) -> Result<(), SendError> {
        if self.is_closed() {
            return Err(SendError::Closed);
        }
        self.queue.try_send(payload).map_err(|e| match e {
            TrySendError::Full(_) => SendError::Full,
            TrySendError::Closed(_) => SendError::Closed,
        })
    }

    /// Queues a frame, waiting for room if the queue is full.
    pub async fn send(&self, payload: Payload) -> Result<(), SendError> {
        if self.is_closed() {
            return Err(SendError::Closed);
        }
        self.queue
            .send(payload)
            .await
            .map_err(|_| SendError::Closed)
    }

    /// Closes the queue and signals the connection to shut down.
    pub fn close(&self) {
        self.shutdown.trigger();
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_triggered() || self.queue.is_closed()
    }

    pub fn shutdown(&self) -> &Shutdown {
        &self.shutdown
    }
}

#[derive(Debug, thiserror::Error)]
enum WriteError {
    #[error("write deadline of {0:?} exceeded")]
    Timeout(Duration),

    #[error(transparent)]
    WebSocket(#[from] WsError),
}

/// Connection-side state of a player.
pub struct Player {
    id: PlayerId,
    game: Arc<Game>,
    hub: HubHandle,
    outbox: Outbox,
}

impl Player {
    pub fn new(game: Arc<Game>, hub: HubHandle, outbox: Outbox) -> Self {
        Self {
            id: PlayerId::next(),
            game,
            hub,
            outbox,
        }
    }

    pub fn id(&self) -> PlayerId {
        self.id
    }

    /// Serves an upgraded connection until either side tears it down.
    ///
    /// The player must already be registered with the hub.
    pub async fn run<S>(
        self,
        ws: WebSocketStream<S>,
        outbound: mpsc::Receiver<Payload>,
        config: &ServerConfig,
    ) where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (sink, stream) = ws.split();

        let writer = tokio::spawn(write_pump(
            sink,
            outbound,
            self.outbox.shutdown().clone(),
            config.write_wait,
            config.ping_period(),
        ));

        self.read_pump(stream, config.pong_wait).await;

        if self.hub.unregister(self.id).await.is_err() {
            warn!("Player {}: hub gone before unregister", self.id);
        }
        // Already closed by the hub in the normal case.
        self.outbox.close();

        if let Err(e) = writer.await {
            error!("Player {}: writer task failed: {}", self.id, e);
        }
        info!("Player {} disconnected", self.id);
    }

    /// Reads frames until the peer goes away, the read deadline lapses or the
    /// connection is shut down.
    ///
    /// Each pong pushes the read deadline out by `pong_wait`.
    pub async fn read_pump<R>(&self, mut stream: R, pong_wait: Duration)
    where
        R: Stream<Item = Result<WsMessage, WsError>> + Unpin,
    {
        let mut shutdown = self.outbox.shutdown().listen();
        let mut deadline = Instant::now() + pong_wait;

        loop {
            let next = tokio::select! {
                biased;
                _ = shutdown.triggered() => {
                    debug!("Player {}: reader stopping on shutdown", self.id);
                    break;
                }
                next = timeout_at(deadline, stream.next()) => next,
            };

            match next {
                Err(_) => {
                    info!("Player {}: read deadline expired", self.id);
                    break;
                }
                Ok(None) => break,
                Ok(Some(Err(e))) => {
                    if is_unexpected_close(&e) {
                        warn!("Player {}: read error: {}", self.id, e);
                    }
                    break;
                }
                Ok(Some(Ok(message))) => match message {
                    WsMessage::Binary(data) => self.handle_message(&data).await,
                    WsMessage::Text(text) => self.handle_message(text.as_bytes()).await,
                    WsMessage::Pong(_) => deadline = Instant::now() + pong_wait,
                    WsMessage::Close(_) => break,
                    WsMessage::Ping(_) | WsMessage::Frame(_) => {}
                },
            }
        }
    }

    /// Applies one inbound frame. Bad frames are logged and dropped.
    pub async fn handle_message(&self, frame: &[u8]) {
        let message = match Message::from_bytes(frame) {
            Ok(message) => message,
            Err(CodecError::UnknownType(tag)) => {
                warn!("Player {}: unknown message type {}", self.id, tag);
                return;
            }
            Err(e) => {
                warn!("Player {}: cannot parse message: {}", self.id, e);
                return;
            }
        };

        match message {
            Message::BoxCheckRequest(coordinates) => {
                self.game.uncover_box(coordinates);
            }
            Message::ChunkRequest(chunks) => self.send_chunks(&chunks).await,
            other => warn!(
                "Player {}: unexpected message type {:?}",
                self.id,
                other.message_type()
            ),
        }
    }

    /// Replies with the requested chunks on this player's own queue.
    async fn send_chunks(&self, requested: &[Coordinates]) {
        let response = Message::ChunksResponse(self.game.chunks(requested));
        let payload = match response.to_bytes() {
            Ok(bytes) => Payload::from(bytes),
            Err(e) => {
                error!("Player {}: cannot encode chunks response: {}", self.id, e);
                return;
            }
        };

        if let Err(e) = self.outbox.send(payload).await {
            debug!("Player {}: dropping chunks response: {}", self.id, e);
        }
    }
}

/// Drains the outbound queue onto the socket and keeps the peer alive with
/// pings. Once shutdown is signalled, frames already queued are still written,
/// then a close frame is sent.
///
/// A failed write only triggers the shutdown signal; unregistering is left to
/// the reader.
pub async fn write_pump<W>(
    mut sink: W,
    mut outbound: mpsc::Receiver<Payload>,
    shutdown: Shutdown,
    write_wait: Duration,
    ping_period: Duration,
) where
    W: Sink<WsMessage, Error = WsError> + Unpin,
{
    let mut listener = shutdown.listen();
    let mut ping = interval_at(Instant::now() + ping_period, ping_period);

    loop {
        let frame = tokio::select! {
            biased;
            _ = listener.triggered() => None,
            payload = outbound.recv() => payload.map(|p| WsMessage::Binary(p.to_vec())),
            _ = ping.tick() => Some(WsMessage::Ping(Vec::new())),
        };

        let Some(frame) = frame else {
            outbound.close();
            while let Ok(payload) = outbound.try_recv() {
                let frame = WsMessage::Binary(payload.to_vec());
                if let Err(e) = write_frame(&mut sink, frame, write_wait).await {
                    debug!("Queued frame not delivered: {}", e);
                    return;
                }
            }
            if let Err(e) = write_frame(&mut sink, WsMessage::Close(None), write_wait).await {
                debug!("Close frame not delivered: {}", e);
            }
            break;
        };

        if let Err(e) = write_frame(&mut sink, frame, write_wait).await {
            debug!("Write failed: {}", e);
            shutdown.trigger();
            break;
        }
    }
}

async fn write_frame<W>(sink: &mut W, frame: WsMessage, write_wait: Duration) -> Result<(), WriteError>
where
    W: Sink<WsMessage, Error = WsError> + Unpin,
{
    match timeout(write_wait, sink.send(frame)).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(WriteError::Timeout(write_wait)),
    }
}

/// Errors worth logging, as opposed to the peer simply going away.
fn is_unexpected_close(err: &WsError) -> bool {
    !matches!(
        err,
        WsError::ConnectionClosed
            | WsError::AlreadyClosed
            | WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::Board;
    use crate::hub::Hub;
    use futures_util::stream;
    use tokio::io::{duplex, DuplexStream};
    use tokio_tungstenite::tungstenite::protocol::Role;

    fn test_player() -> (Player, mpsc::Receiver<Payload>, Arc<Game>) {
        let game = Arc::new(Game::with_board(Board::with_side(64)));
        let (_hub, handle) = Hub::new(Arc::clone(&game), &ServerConfig::default());
        let (outbox, rx) = outbox(10);
        let player = Player::new(Arc::clone(&game), handle, outbox);
        (player, rx, game)
    }

    fn frame(message: Message) -> Vec<u8> {
        message.to_bytes().unwrap()
    }

    /// Server-side websocket over an in-memory pipe, plus the raw client end.
    async fn server_socket(buffer: usize) -> (WebSocketStream<DuplexStream>, DuplexStream) {
        let (server_io, client_io) = duplex(buffer);
        let ws = WebSocketStream::from_raw_socket(server_io, Role::Server, None).await;
        (ws, client_io)
    }

    #[test]
    fn test_player_ids_are_unique() {
        let a = PlayerId::next();
        let b = PlayerId::next();
        assert_ne!(a, b);
    }

    #[test]
    fn test_outbox_full_and_closed() {
        let (outbox, _rx) = outbox(2);

        assert_eq!(outbox.try_send(Payload::from(vec![1])), Ok(()));
        assert_eq!(outbox.try_send(Payload::from(vec![2])), Ok(()));
        assert_eq!(outbox.try_send(Payload::from(vec![3])), Err(SendError::Full));

        outbox.close();
        assert!(outbox.is_closed());
        assert_eq!(outbox.try_send(Payload::from(vec![4])), Err(SendError::Closed));
    }

    #[test]
    fn test_outbox_closed_when_receiver_dropped() {
        let (outbox, rx) = outbox(2);
        drop(rx);

        assert!(outbox.is_closed());
        assert_eq!(outbox.try_send(Payload::from(vec![1])), Err(SendError::Closed));
    }

    #[tokio::test]
    async fn test_outbox_send_after_close_fails() {
        let (outbox, _rx) = outbox(2);
        outbox.close();

        assert_eq!(outbox.send(Payload::from(vec![1])).await, Err(SendError::Closed));
    }

    #[tokio::test]
    async fn test_shutdown_listener_wakes() {
        let shutdown = Shutdown::new();
        let mut listener = shutdown.listen();
        assert!(!shutdown.is_triggered());

        let trigger = shutdown.clone();
        tokio::spawn(async move { trigger.trigger() });

        timeout(Duration::from_secs(1), listener.triggered())
            .await
            .expect("listener should wake");
        assert!(shutdown.is_triggered());

        // A listener created after the fact resolves immediately.
        let mut late = shutdown.listen();
        tokio_test::assert_ready!(tokio_test::task::spawn(late.triggered()).poll());
    }

    #[tokio::test]
    async fn test_box_check_request_uncovers() {
        let (player, mut rx, game) = test_player();

        player
            .handle_message(&frame(Message::BoxCheckRequest(Coordinates::new(3, 4))))
            .await;

        assert!(game.board().is_uncovered(3, 4));
        assert_eq!(game.uncovered_count(), 1);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_chunk_request_replies_to_sender() {
        let (player, mut rx, game) = test_player();
        game.uncover_box(Coordinates::new(33, 1));

        let request = Message::ChunkRequest(vec![Coordinates::new(1, 0), Coordinates::new(50, 50)]);
        player.handle_message(&frame(request)).await;

        let reply = rx.try_recv().unwrap();
        match Message::from_bytes(&reply).unwrap() {
            Message::ChunksResponse(chunks) => {
                assert_eq!(chunks.len(), 2);
                assert_eq!(chunks[0].coordinates, Coordinates::new(1, 0));
                assert!(chunks[0].chunk.is_uncovered(1, 1));
                assert_eq!(chunks[0].chunk.uncovered_cells(), 1);
                assert_eq!(chunks[1].chunk.uncovered_cells(), 0);
            }
            other => panic!("Unexpected reply {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_bad_frames_are_dropped() {
        let (player, mut rx, game) = test_player();

        player.handle_message(&[]).await;
        player.handle_message(&[0x00, 0x01]).await;
        player.handle_message(&[0x09, 0x00, 0x00]).await;
        player.handle_message(&[0xff]).await;
        player
            .handle_message(&frame(Message::BoxesUncovered(vec![Coordinates::new(1, 1)])))
            .await;

        assert_eq!(game.uncovered_count(), 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_text_frames_are_handled() {
        let (player, _rx, game) = test_player();
        let text = String::from_utf8(vec![0x00, 0x00, 0x05, 0x00, 0x06]).unwrap();

        let frames = stream::iter(vec![Ok(WsMessage::Text(text))]);
        player.read_pump(frames, Duration::from_secs(5)).await;

        assert!(game.board().is_uncovered(5, 6));
    }

    #[tokio::test]
    async fn test_read_pump_stops_at_close_frame() {
        let (player, _rx, game) = test_player();

        let frames = stream::iter(vec![
            Ok(WsMessage::Binary(frame(Message::BoxCheckRequest(Coordinates::new(1, 1))))),
            Ok(WsMessage::Pong(Vec::new())),
            Ok(WsMessage::Close(None)),
            Ok(WsMessage::Binary(frame(Message::BoxCheckRequest(Coordinates::new(2, 2))))),
        ]);
        player.read_pump(frames, Duration::from_secs(5)).await;

        assert!(game.board().is_uncovered(1, 1));
        assert!(!game.board().is_uncovered(2, 2));
    }

    #[tokio::test]
    async fn test_read_pump_stops_on_error() {
        let (player, _rx, game) = test_player();

        let frames = stream::iter(vec![
            Err(WsError::ConnectionClosed),
            Ok(WsMessage::Binary(frame(Message::BoxCheckRequest(Coordinates::new(1, 1))))),
        ]);
        player.read_pump(frames, Duration::from_secs(5)).await;

        assert!(!game.board().is_uncovered(1, 1));
    }

    #[tokio::test]
    async fn test_read_pump_deadline_expires() {
        let (player, _rx, _game) = test_player();

        let silent = stream::pending::<Result<WsMessage, WsError>>();
        timeout(
            Duration::from_secs(2),
            player.read_pump(silent, Duration::from_millis(50)),
        )
        .await
        .expect("reader should give up after the read deadline");
    }

    #[tokio::test]
    async fn test_read_pump_stops_on_shutdown() {
        let (player, _rx, _game) = test_player();
        player.outbox.close();

        let silent = stream::pending::<Result<WsMessage, WsError>>();
        timeout(
            Duration::from_secs(1),
            player.read_pump(silent, Duration::from_secs(60)),
        )
        .await
        .expect("reader should stop once shutdown is triggered");
    }

    #[tokio::test]
    async fn test_write_pump_flushes_queue_then_closes() {
        let (ws, client_io) = server_socket(4096).await;
        let (outbox, rx) = outbox(10);
        outbox.try_send(Payload::from(vec![4])).unwrap();
        outbox.close();

        timeout(
            Duration::from_secs(2),
            write_pump(
                ws,
                rx,
                outbox.shutdown().clone(),
                Duration::from_secs(1),
                Duration::from_secs(60),
            ),
        )
        .await
        .expect("writer should stop once shutdown is triggered");

        let mut peer = WebSocketStream::from_raw_socket(client_io, Role::Client, None).await;
        let first = peer.next().await.unwrap().unwrap();
        assert_eq!(first, WsMessage::Binary(vec![4]));
        let second = peer.next().await.unwrap().unwrap();
        assert_eq!(second, WsMessage::Close(None));
    }

    #[tokio::test]
    async fn test_write_pump_error_triggers_shutdown() {
        let (ws, client_io) = server_socket(4096).await;
        drop(client_io);

        let (outbox, rx) = outbox(10);
        outbox.try_send(Payload::from(vec![1, 2, 3])).unwrap();

        timeout(
            Duration::from_secs(2),
            write_pump(
                ws,
                rx,
                outbox.shutdown().clone(),
                Duration::from_secs(1),
                Duration::from_secs(60),
            ),
        )
        .await
        .expect("writer should stop after a failed write");

        assert!(outbox.is_closed());
    }

    #[tokio::test]
    async fn test_write_pump_gives_up_after_write_wait() {
        // The client end stays open but is never read, so the pipe fills up.
        let (ws, _client_io) = server_socket(64).await;
        let (outbox, rx) = outbox(10);
        outbox.try_send(Payload::from(vec![7u8; 1024])).unwrap();

        let started = Instant::now();
        timeout(
            Duration::from_secs(2),
            write_pump(
                ws,
                rx,
                outbox.shutdown().clone(),
                Duration::from_millis(50),
                Duration::from_secs(60),
            ),
        )
        .await
        .expect("writer should stop once the write deadline passes");

        assert!(started.elapsed() >= Duration::from_millis(50));
        assert!(outbox.is_closed());
    }

    #[test]
    fn test_unexpected_close_classification() {
        assert!(!is_unexpected_close(&WsError::ConnectionClosed));
        assert!(!is_unexpected_close(&WsError::AlreadyClosed));
        assert!(!is_unexpected_close(&WsError::Protocol(
            ProtocolError::ResetWithoutClosingHandshake
        )));
        assert!(is_unexpected_close(&WsError::Utf8));
    }
}
