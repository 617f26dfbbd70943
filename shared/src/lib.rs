//! Wire-level types shared by the server and any client of the board.
//!
//! The board is a square bitmap of `MAP_SIZE` x `MAP_SIZE` cells, stored as
//! 32-bit words and transferred in square chunks of `CHUNK_SIZE` cells. All
//! framing and byte layout lives in [`codec`].

pub mod codec;

pub use codec::{CodecError, Decode, Encode, Message, MessageType};

/// Side length of the board in cells.
pub const MAP_SIZE: usize = 32768;
/// Side length of a chunk in cells.
pub const CHUNK_SIZE: usize = 32;
/// Number of chunks along one side of the board.
pub const CHUNK_COUNT: usize = MAP_SIZE / CHUNK_SIZE;
/// Number of cells packed into one storage word.
pub const WORD_BITS: usize = 32;
/// Words making up one row of a chunk.
pub const CHUNK_ROW_WORDS: usize = CHUNK_SIZE / WORD_BITS;
/// Words making up a whole chunk, row-major.
pub const CHUNK_WORDS: usize = CHUNK_SIZE * CHUNK_ROW_WORDS;

/// A cell or chunk position. Which one depends on the message carrying it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Coordinates {
    pub x: u16,
    pub y: u16,
}

impl Coordinates {
    pub fn new(x: u16, y: u16) -> Self {
        Self { x, y }
    }
}

/// A single covered -> uncovered transition observed during a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Uncover {
    pub coordinates: Coordinates,
    /// Milliseconds since the tick window opened, saturated to 255.
    pub tick_timing: u8,
}

/// Returns the mask selecting column `x` inside its storage word.
///
/// Bits are MSB-first: the leftmost cell of a word is bit 31.
pub fn cell_mask(x: usize) -> u32 {
    1 << ((WORD_BITS - 1) - x % WORD_BITS)
}

/// Snapshot of one chunk: `CHUNK_SIZE` rows of `CHUNK_ROW_WORDS` words.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    words: [u32; CHUNK_WORDS],
}

impl Chunk {
    pub fn from_words(words: [u32; CHUNK_WORDS]) -> Self {
        Self { words }
    }

    pub fn words(&self) -> &[u32; CHUNK_WORDS] {
        &self.words
    }

    /// Mutable access to one row of the chunk.
    pub fn row_mut(&mut self, row: usize) -> &mut [u32] {
        let start = row * CHUNK_ROW_WORDS;
        &mut self.words[start..start + CHUNK_ROW_WORDS]
    }

    /// Reports whether the cell at chunk-local (`x`, `y`) is uncovered.
    pub fn is_uncovered(&self, x: usize, y: usize) -> bool {
        if x >= CHUNK_SIZE || y >= CHUNK_SIZE {
            return false;
        }
        let word = self.words[y * CHUNK_ROW_WORDS + x / WORD_BITS];
        word & cell_mask(x) != 0
    }

    /// Number of uncovered cells in the chunk.
    pub fn uncovered_cells(&self) -> u32 {
        self.words.iter().map(|w| w.count_ones()).sum()
    }
}

impl Default for Chunk {
    fn default() -> Self {
        Self {
            words: [0; CHUNK_WORDS],
        }
    }
}

/// One chunk of a chunks response, tagged with its chunk coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkResponse {
    pub coordinates: Coordinates,
    pub chunk: Chunk,
}

/// Per-tick statistics broadcast to every player.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GameStats {
    pub uncovered_count: u32,
    pub online_count: u32,
    pub gold_positions: Vec<Coordinates>,
    pub recently_uncovered: Vec<Uncover>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_board_geometry() {
        assert_eq!(CHUNK_COUNT, 1024);
        assert_eq!(CHUNK_ROW_WORDS, 1);
        assert_eq!(CHUNK_WORDS, CHUNK_SIZE * CHUNK_SIZE / WORD_BITS);
    }

    #[test]
    fn test_cell_mask_is_msb_first() {
        assert_eq!(cell_mask(0), 0x8000_0000);
        assert_eq!(cell_mask(31), 0x0000_0001);
        assert_eq!(cell_mask(32), 0x8000_0000);
        assert_eq!(cell_mask(33), 0x4000_0000);
    }

    #[test]
    fn test_chunk_cell_lookup() {
        let mut chunk = Chunk::default();
        chunk.row_mut(3)[0] = cell_mask(5) | cell_mask(31);

        assert!(chunk.is_uncovered(5, 3));
        assert!(chunk.is_uncovered(31, 3));
        assert!(!chunk.is_uncovered(5, 2));
        assert!(!chunk.is_uncovered(0, 3));
        assert!(!chunk.is_uncovered(CHUNK_SIZE, 3));
        assert_eq!(chunk.uncovered_cells(), 2);
    }

    #[test]
    fn test_default_chunk_is_covered() {
        let chunk = Chunk::default();
        assert_eq!(chunk.uncovered_cells(), 0);
        assert!(chunk.words().iter().all(|w| *w == 0));
    }
}
