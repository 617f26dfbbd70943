use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use shared::{Coordinates, Message, CHUNK_SIZE};
use std::time::Duration;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;

#[derive(Parser, Debug)]
#[command(author, version, about = "Pokes a running board server and prints what comes back")]
struct Args {
    /// Upgrade URL of the server
    #[arg(short = 's', long, default_value = "ws://127.0.0.1:8080/websocket")]
    server: String,

    /// Cell to uncover
    #[arg(short, long, default_value = "0")]
    x: u16,

    #[arg(short, long, default_value = "0")]
    y: u16,

    /// Stats frames to print before exiting
    #[arg(short, long, default_value = "10")]
    frames: usize,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    println!("Connecting to {}", args.server);
    let (mut ws, _response) = connect_async(args.server.as_str()).await?;
    println!("Connected");

    let cell = Coordinates::new(args.x, args.y);
    let chunk = Coordinates::new(
        (usize::from(cell.x) / CHUNK_SIZE) as u16,
        (usize::from(cell.y) / CHUNK_SIZE) as u16,
    );

    // Chunk before and after the uncover, so the difference is visible.
    ws.send(WsMessage::Binary(Message::ChunkRequest(vec![chunk]).to_bytes()?))
        .await?;
    println!("Sending uncover for ({}, {})", cell.x, cell.y);
    ws.send(WsMessage::Binary(Message::BoxCheckRequest(cell).to_bytes()?))
        .await?;
    ws.send(WsMessage::Binary(Message::ChunkRequest(vec![chunk]).to_bytes()?))
        .await?;

    let mut stats_seen = 0;
    while stats_seen < args.frames {
        let next = match timeout(Duration::from_secs(5), ws.next()).await {
            Ok(Some(next)) => next?,
            Ok(None) => {
                println!("Server closed the connection");
                break;
            }
            Err(_) => {
                println!("No frame within 5s, giving up");
                break;
            }
        };

        let data = match next {
            WsMessage::Binary(data) => data,
            WsMessage::Close(frame) => {
                println!("Server sent close: {:?}", frame);
                break;
            }
            _ => continue,
        };

        match Message::from_bytes(&data) {
            Ok(Message::GameStats(stats)) => {
                stats_seen += 1;
                println!(
                    "Stats - uncovered: {}, online: {}, recent: {}",
                    stats.uncovered_count,
                    stats.online_count,
                    stats.recently_uncovered.len()
                );
                for uncover in stats.recently_uncovered.iter().take(5) {
                    println!(
                        "  ({}, {}) at +{}ms",
                        uncover.coordinates.x, uncover.coordinates.y, uncover.tick_timing
                    );
                }
            }
            Ok(Message::ChunksResponse(chunks)) => {
                for response in chunks {
                    println!(
                        "Chunk ({}, {}): {} of {} cells uncovered",
                        response.coordinates.x,
                        response.coordinates.y,
                        response.chunk.uncovered_cells(),
                        CHUNK_SIZE * CHUNK_SIZE
                    );
                }
            }
            Ok(other) => println!("Unexpected message: {:?}", other.message_type()),
            Err(e) => println!("Failed to decode frame: {}", e),
        }
    }

    ws.close(None).await?;
    println!("Test client finished");

    Ok(())
}
