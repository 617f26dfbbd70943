use crate::board::Board;
use log::debug;
use shared::{ChunkResponse, Coordinates, Uncover};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Uncovers collected since the current tick window opened.
#[derive(Debug)]
struct TickWindow {
    started: Instant,
    uncovers: Vec<Uncover>,
}

/// Board plus the running totals the hub reports each tick.
///
/// Shared by every connection. The board is lock-free; only the tick window
/// sits behind a mutex, held for a push or a swap and never across I/O.
pub struct Game {
    board: Board,
    uncovered_count: AtomicU32,
    window: Mutex<TickWindow>,
}

impl Game {
    pub fn new() -> Self {
        Self::with_board(Board::new())
    }

    pub fn with_board(board: Board) -> Self {
        Self {
            board,
            uncovered_count: AtomicU32::new(0),
            window: Mutex::new(TickWindow {
                started: Instant::now(),
                uncovers: Vec::new(),
            }),
        }
    }

    pub fn board(&self) -> &Board {
        &self.board
    }

    /// Total cells uncovered since start.
    pub fn uncovered_count(&self) -> u32 {
        self.uncovered_count.load(Ordering::Relaxed)
    }

    /// Uncovers one cell and records the transition for the next tick.
    ///
    /// Returns false when the cell was already uncovered or is off the board;
    /// nothing is recorded in that case.
    pub fn uncover_box(&self, coordinates: Coordinates) -> bool {
        if !self.board.uncover(coordinates.x, coordinates.y) {
            return false;
        }

        self.uncovered_count.fetch_add(1, Ordering::Relaxed);

        let mut window = self.lock_window();
        let tick_timing = tick_timing(window.started.elapsed());
        window.uncovers.push(Uncover {
            coordinates,
            tick_timing,
        });

        true
    }

    /// Closes the current tick window and returns what it collected.
    pub fn take_recent_uncovers(&self) -> Vec<Uncover> {
        let mut window = self.lock_window();
        window.started = Instant::now();
        std::mem::take(&mut window.uncovers)
    }

    /// Snapshots the requested chunks, in request order.
    pub fn chunks(&self, requested: &[Coordinates]) -> Vec<ChunkResponse> {
        debug!("Chunk request for {} chunks", requested.len());
        requested
            .iter()
            .map(|coordinates| ChunkResponse {
                coordinates: *coordinates,
                chunk: self.board.get_chunk(coordinates.x, coordinates.y),
            })
            .collect()
    }

    fn lock_window(&self) -> MutexGuard<'_, TickWindow> {
        // The window holds plain data; a panic mid-push leaves it usable.
        self.window.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for Game {
    fn default() -> Self {
        Self::new()
    }
}

/// Whole milliseconds into the tick window, saturated to one byte.
fn tick_timing(elapsed: Duration) -> u8 {
    u8::try_from(elapsed.as_millis()).unwrap_or(u8::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn small_game() -> Game {
        Game::with_board(Board::with_side(64))
    }

    #[test]
    fn test_uncover_box_records_once() {
        let game = small_game();
        let cell = Coordinates::new(3, 4);

        assert!(game.uncover_box(cell));
        assert!(!game.uncover_box(cell));
        assert_eq!(game.uncovered_count(), 1);

        let recent = game.take_recent_uncovers();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].coordinates, cell);
    }

    #[test]
    fn test_out_of_range_uncover_not_recorded() {
        let game = small_game();

        assert!(!game.uncover_box(Coordinates::new(64, 0)));
        assert_eq!(game.uncovered_count(), 0);
        assert!(game.take_recent_uncovers().is_empty());
    }

    #[test]
    fn test_take_recent_uncovers_resets_window() {
        let game = small_game();
        game.uncover_box(Coordinates::new(1, 1));
        game.uncover_box(Coordinates::new(2, 2));

        assert_eq!(game.take_recent_uncovers().len(), 2);
        assert!(game.take_recent_uncovers().is_empty());

        game.uncover_box(Coordinates::new(3, 3));
        let recent = game.take_recent_uncovers();
        assert_eq!(recent.len(), 1);
        assert_eq!(game.uncovered_count(), 3);
    }

    #[test]
    fn test_tick_timing_is_relative_to_window() {
        let game = small_game();
        thread::sleep(Duration::from_millis(20));
        game.take_recent_uncovers();

        game.uncover_box(Coordinates::new(5, 5));
        let recent = game.take_recent_uncovers();
        assert!(recent[0].tick_timing < 20);
    }

    #[test]
    fn test_tick_timing_saturates() {
        assert_eq!(tick_timing(Duration::from_millis(0)), 0);
        assert_eq!(tick_timing(Duration::from_micros(99_900)), 99);
        assert_eq!(tick_timing(Duration::from_millis(255)), 255);
        assert_eq!(tick_timing(Duration::from_millis(256)), 255);
        assert_eq!(tick_timing(Duration::from_secs(10)), 255);
    }

    #[test]
    fn test_concurrent_uncover_box_counts_each_cell_once() {
        let game = Arc::new(small_game());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let game = Arc::clone(&game);
                thread::spawn(move || {
                    for x in 0..64u16 {
                        game.uncover_box(Coordinates::new(x, 10));
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(game.uncovered_count(), 64);
        assert_eq!(game.take_recent_uncovers().len(), 64);
    }

    #[test]
    fn test_chunks_preserve_request_order() {
        let game = small_game();
        game.uncover_box(Coordinates::new(40, 0));

        let requested = [
            Coordinates::new(1, 0),
            Coordinates::new(0, 0),
            Coordinates::new(9, 9),
        ];
        let chunks = game.chunks(&requested);

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].coordinates, requested[0]);
        assert!(chunks[0].chunk.is_uncovered(8, 0));
        assert_eq!(chunks[1].chunk.uncovered_cells(), 0);
        assert_eq!(chunks[2].chunk.uncovered_cells(), 0);
    }
}
