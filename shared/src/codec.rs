//! Binary codec for board messages.
//!
//! Every frame starts with a one-byte type tag followed by a fixed layout
//! payload. Integers are big-endian. Lists carry a `u16` count prefix, except
//! the boxes-uncovered list which runs to the end of the frame.

use crate::{Chunk, ChunkResponse, Coordinates, GameStats, Uncover, CHUNK_WORDS};
use std::io::{self, Read, Write};

/// Upper bound on entries reserved up front when decoding a list, so a
/// forged count prefix cannot force a large allocation.
const PREALLOC_LIMIT: usize = 256;

/// One-byte frame tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    BoxCheckRequest = 0,
    BoxesUncovered = 1,
    ChunkRequest = 2,
    ChunksResponse = 3,
    GameStats = 4,
    /// Reserved. Never produced or handled.
    Error = 255,
}

impl MessageType {
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(MessageType::BoxCheckRequest),
            1 => Some(MessageType::BoxesUncovered),
            2 => Some(MessageType::ChunkRequest),
            3 => Some(MessageType::ChunksResponse),
            4 => Some(MessageType::GameStats),
            255 => Some(MessageType::Error),
            _ => None,
        }
    }

    pub fn tag(self) -> u8 {
        self as u8
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("message truncated")]
    Truncated,

    #[error("unknown message type {0}")]
    UnknownType(u8),

    #[error("message type {0:?} is reserved")]
    Unsupported(MessageType),

    #[error("list of {len} entries does not fit a u16 count prefix")]
    ListTooLong { len: usize },

    #[error("I/O error: {0}")]
    Io(#[source] io::Error),
}

impl From<io::Error> for CodecError {
    fn from(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            CodecError::Truncated
        } else {
            CodecError::Io(err)
        }
    }
}

pub trait Encode {
    fn encode<W: Write>(&self, w: &mut W) -> Result<(), CodecError>;
}

pub trait Decode: Sized {
    fn decode<R: Read>(r: &mut R) -> Result<Self, CodecError>;
}

/// A complete frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    BoxCheckRequest(Coordinates),
    BoxesUncovered(Vec<Coordinates>),
    ChunkRequest(Vec<Coordinates>),
    ChunksResponse(Vec<ChunkResponse>),
    GameStats(GameStats),
}

impl Message {
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::BoxCheckRequest(_) => MessageType::BoxCheckRequest,
            Message::BoxesUncovered(_) => MessageType::BoxesUncovered,
            Message::ChunkRequest(_) => MessageType::ChunkRequest,
            Message::ChunksResponse(_) => MessageType::ChunksResponse,
            Message::GameStats(_) => MessageType::GameStats,
        }
    }

    /// Encodes the frame into a fresh buffer.
    pub fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        let mut buf = Vec::new();
        self.encode(&mut buf)?;
        Ok(buf)
    }

    /// Decodes one frame. Bytes past the end of the payload are ignored.
    pub fn from_bytes(mut bytes: &[u8]) -> Result<Self, CodecError> {
        Self::decode(&mut bytes)
    }

    /// Decodes the payload that follows an already consumed type tag.
    pub fn decode_body<R: Read>(kind: MessageType, r: &mut R) -> Result<Self, CodecError> {
        match kind {
            MessageType::BoxCheckRequest => Ok(Message::BoxCheckRequest(Coordinates::decode(r)?)),
            MessageType::BoxesUncovered => Ok(Message::BoxesUncovered(decode_unprefixed(r)?)),
            MessageType::ChunkRequest => Ok(Message::ChunkRequest(decode_list(r)?)),
            MessageType::ChunksResponse => Ok(Message::ChunksResponse(decode_list(r)?)),
            MessageType::GameStats => Ok(Message::GameStats(GameStats::decode(r)?)),
            MessageType::Error => Err(CodecError::Unsupported(kind)),
        }
    }
}

impl Encode for Message {
    fn encode<W: Write>(&self, w: &mut W) -> Result<(), CodecError> {
        write_u8(w, self.message_type().tag())?;
        match self {
            Message::BoxCheckRequest(coordinates) => coordinates.encode(w),
            Message::BoxesUncovered(boxes) => {
                for coordinates in boxes {
                    coordinates.encode(w)?;
                }
                Ok(())
            }
            Message::ChunkRequest(chunks) => encode_list(w, chunks),
            Message::ChunksResponse(chunks) => encode_list(w, chunks),
            Message::GameStats(stats) => stats.encode(w),
        }
    }
}

impl Decode for Message {
    fn decode<R: Read>(r: &mut R) -> Result<Self, CodecError> {
        let tag = read_u8(r)?;
        let kind = MessageType::from_tag(tag).ok_or(CodecError::UnknownType(tag))?;
        Self::decode_body(kind, r)
    }
}

impl Encode for Coordinates {
    fn encode<W: Write>(&self, w: &mut W) -> Result<(), CodecError> {
        write_u16(w, self.x)?;
        write_u16(w, self.y)
    }
}

impl Decode for Coordinates {
    fn decode<R: Read>(r: &mut R) -> Result<Self, CodecError> {
        let x = read_u16(r)?;
        let y = read_u16(r)?;
        Ok(Coordinates { x, y })
    }
}

impl Encode for Uncover {
    fn encode<W: Write>(&self, w: &mut W) -> Result<(), CodecError> {
        self.coordinates.encode(w)?;
        write_u8(w, self.tick_timing)
    }
}

impl Decode for Uncover {
    fn decode<R: Read>(r: &mut R) -> Result<Self, CodecError> {
        let coordinates = Coordinates::decode(r)?;
        let tick_timing = read_u8(r)?;
        Ok(Uncover {
            coordinates,
            tick_timing,
        })
    }
}

impl Encode for Chunk {
    fn encode<W: Write>(&self, w: &mut W) -> Result<(), CodecError> {
        for word in self.words() {
            write_u32(w, *word)?;
        }
        Ok(())
    }
}

impl Decode for Chunk {
    fn decode<R: Read>(r: &mut R) -> Result<Self, CodecError> {
        let mut words = [0u32; CHUNK_WORDS];
        for word in words.iter_mut() {
            *word = read_u32(r)?;
        }
        Ok(Chunk::from_words(words))
    }
}

impl Encode for ChunkResponse {
    fn encode<W: Write>(&self, w: &mut W) -> Result<(), CodecError> {
        self.coordinates.encode(w)?;
        self.chunk.encode(w)
    }
}

impl Decode for ChunkResponse {
    fn decode<R: Read>(r: &mut R) -> Result<Self, CodecError> {
        let coordinates = Coordinates::decode(r)?;
        let chunk = Chunk::decode(r)?;
        Ok(ChunkResponse { coordinates, chunk })
    }
}

impl Encode for GameStats {
    fn encode<W: Write>(&self, w: &mut W) -> Result<(), CodecError> {
        write_u32(w, self.uncovered_count)?;
        write_u32(w, self.online_count)?;
        encode_list(w, &self.gold_positions)?;
        encode_list(w, &self.recently_uncovered)
    }
}

impl Decode for GameStats {
    fn decode<R: Read>(r: &mut R) -> Result<Self, CodecError> {
        let uncovered_count = read_u32(r)?;
        let online_count = read_u32(r)?;
        let gold_positions = decode_list(r)?;
        let recently_uncovered = decode_list(r)?;
        Ok(GameStats {
            uncovered_count,
            online_count,
            gold_positions,
            recently_uncovered,
        })
    }
}

fn encode_list<W: Write, T: Encode>(w: &mut W, items: &[T]) -> Result<(), CodecError> {
    let len = u16::try_from(items.len()).map_err(|_| CodecError::ListTooLong { len: items.len() })?;
    write_u16(w, len)?;
    for item in items {
        item.encode(w)?;
    }
    Ok(())
}

fn decode_list<R: Read, T: Decode>(r: &mut R) -> Result<Vec<T>, CodecError> {
    let len = usize::from(read_u16(r)?);
    let mut items = Vec::with_capacity(len.min(PREALLOC_LIMIT));
    for _ in 0..len {
        items.push(T::decode(r)?);
    }
    Ok(items)
}

/// Reads coordinate pairs until the input ends on a pair boundary.
fn decode_unprefixed<R: Read>(r: &mut R) -> Result<Vec<Coordinates>, CodecError> {
    let mut boxes = Vec::new();
    loop {
        let mut pair = [0u8; 4];
        match fill(r, &mut pair)? {
            0 => return Ok(boxes),
            4 => boxes.push(Coordinates {
                x: u16::from_be_bytes([pair[0], pair[1]]),
                y: u16::from_be_bytes([pair[2], pair[3]]),
            }),
            _ => return Err(CodecError::Truncated),
        }
    }
}

/// Like `read_exact`, but reports how many bytes arrived before end of input.
fn fill<R: Read>(r: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match r.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

fn read_u8<R: Read>(r: &mut R) -> Result<u8, CodecError> {
    let mut buf = [0u8; 1];
    r.read_exact(&mut buf)?;
    Ok(buf[0])
}

fn read_u16<R: Read>(r: &mut R) -> Result<u16, CodecError> {
    let mut buf = [0u8; 2];
    r.read_exact(&mut buf)?;
    Ok(u16::from_be_bytes(buf))
}

fn read_u32<R: Read>(r: &mut R) -> Result<u32, CodecError> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_be_bytes(buf))
}

fn write_u8<W: Write>(w: &mut W, value: u8) -> Result<(), CodecError> {
    w.write_all(&[value])?;
    Ok(())
}

fn write_u16<W: Write>(w: &mut W, value: u16) -> Result<(), CodecError> {
    w.write_all(&value.to_be_bytes())?;
    Ok(())
}

fn write_u32<W: Write>(w: &mut W, value: u32) -> Result<(), CodecError> {
    w.write_all(&value.to_be_bytes())?;
    Ok(())
}
