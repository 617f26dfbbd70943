//! Bit-packed board storage
//!
//! Each cell is a single bit inside an `AtomicU32`. Uncovering a cell is one
//! `fetch_or` on its word, so any number of tasks can mutate the board without
//! a lock. Cells sharing a word only contend on the cache line; the OR makes
//! the outcome order-independent.
//!
//! Chunk snapshots read word by word without synchronising against writers.
//! A snapshot taken during concurrent uncovers may mix old and new words.

use shared::{cell_mask, Chunk, CHUNK_ROW_WORDS, CHUNK_SIZE, MAP_SIZE, WORD_BITS};
use std::sync::atomic::{AtomicU32, Ordering};

pub struct Board {
    side: usize,
    words_per_row: usize,
    words: Box<[AtomicU32]>,
}

impl Board {
    /// Creates a fully covered board of the standard size.
    pub fn new() -> Self {
        Self::with_side(MAP_SIZE)
    }

    /// Creates a fully covered board with `side` cells per edge.
    ///
    /// `side` is rounded up to a whole number of chunks and capped at the
    /// standard board size.
    pub fn with_side(side: usize) -> Self {
        let side = side.clamp(CHUNK_SIZE, MAP_SIZE).div_ceil(CHUNK_SIZE) * CHUNK_SIZE;
        let words_per_row = side / WORD_BITS;
        let words = (0..side * words_per_row)
            .map(|_| AtomicU32::new(0))
            .collect();

        Self {
            side,
            words_per_row,
            words,
        }
    }

    /// Cells per edge.
    pub fn side(&self) -> usize {
        self.side
    }

    /// Chunks per edge.
    pub fn chunk_count(&self) -> usize {
        self.side / CHUNK_SIZE
    }

    /// Marks the cell at (`x`, `y`) as uncovered.
    ///
    /// Returns true only for the call that actually flipped the bit.
    /// Coordinates off the board are ignored and return false.
    pub fn uncover(&self, x: u16, y: u16) -> bool {
        let (x, y) = (usize::from(x), usize::from(y));
        if x >= self.side || y >= self.side {
            return false;
        }

        let mask = cell_mask(x);
        let old = self.words[self.word_index(x, y)].fetch_or(mask, Ordering::AcqRel);
        old & mask == 0
    }

    /// Reports whether the cell at (`x`, `y`) has been uncovered.
    pub fn is_uncovered(&self, x: u16, y: u16) -> bool {
        let (x, y) = (usize::from(x), usize::from(y));
        if x >= self.side || y >= self.side {
            return false;
        }

        self.words[self.word_index(x, y)].load(Ordering::Acquire) & cell_mask(x) != 0
    }

    /// Copies out the chunk at chunk coordinates (`chunk_x`, `chunk_y`).
    ///
    /// Chunks off the board come back fully covered.
    pub fn get_chunk(&self, chunk_x: u16, chunk_y: u16) -> Chunk {
        let mut chunk = Chunk::default();
        let (chunk_x, chunk_y) = (usize::from(chunk_x), usize::from(chunk_y));
        if chunk_x >= self.chunk_count() || chunk_y >= self.chunk_count() {
            return chunk;
        }

        let first_word = chunk_x * CHUNK_ROW_WORDS;
        for inner_y in 0..CHUNK_SIZE {
            let row_start = (chunk_y * CHUNK_SIZE + inner_y) * self.words_per_row + first_word;
            let source = &self.words[row_start..row_start + CHUNK_ROW_WORDS];
            for (dst, src) in chunk.row_mut(inner_y).iter_mut().zip(source) {
                *dst = src.load(Ordering::Acquire);
            }
        }

        chunk
    }

    fn word_index(&self, x: usize, y: usize) -> usize {
        y * self.words_per_row + x / WORD_BITS
    }
}

impl Default for Board {
    fn default() -> Self {
        Self::new()
    }
}
