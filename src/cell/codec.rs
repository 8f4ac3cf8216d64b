//! Byte-exact cell serialization, cursor decode, and synthetic scan bounds.
//!
//! Encoding writes the layout documented in [`super`] into caller-provided
//! buffers at explicit offsets, so a block writer can lay out many cells
//! back to back without intermediate allocation. [`CellCursor`] walks such a
//! buffer in the other direction, yielding zero-copy [`Cell`] views.
//!
//! The trailing write-sequence number, when present, is an unsigned LEB128
//! varint (at most ten bytes for a `u64`). The fixed core layout is the
//! interop contract; the varint form is this crate's convention and is kept
//! out of the key bytes entirely.

use bytes::{Buf, Bytes};
use thiserror::Error;

use super::{
    Cell, CellType, FAMILY_LEN_SIZE, LENGTH_PREFIX, MAX_ROW_LEN, ROW_LEN_SIZE, TIMESTAMP_SIZE,
    TYPE_SIZE,
};

/// Errors raised by cell construction, encode, and decode.
///
/// All variants except [`CodecError::UnsupportedBuffer`] are malformed-input
/// conditions: they indicate a programmer error or corrupt bytes and are
/// raised before any partial write happens.
#[derive(Debug, Error)]
pub enum CodecError {
    /// A field exceeds the width its length prefix can express.
    #[error("{field} is {len} bytes, limit is {limit}")]
    FieldTooLong {
        /// Which field overflowed.
        field: &'static str,
        /// Observed length.
        len: usize,
        /// Maximum encodable length.
        limit: usize,
    },
    /// An output buffer cannot hold the requested write.
    #[error("output buffer too small: need {needed} bytes, have {available}")]
    BufferTooSmall {
        /// Bytes the write requires from the offset.
        needed: usize,
        /// Bytes actually available.
        available: usize,
    },
    /// Length fields point outside the buffer or contradict each other.
    #[error("encoded cell truncated or corrupt: {context}")]
    Truncated {
        /// What the decoder was reading when it gave up.
        context: &'static str,
    },
    /// Zero-copy decode was asked to walk storage that is not one flat,
    /// directly addressable byte region.
    #[error("backing storage is not a single addressable byte region")]
    UnsupportedBuffer,
}

/// Key length for the given payload widths: `2 + row + 1 + family +
/// qualifier + 8 + 1`.
#[inline]
pub const fn key_len(row: usize, family: usize, qualifier: usize) -> usize {
    ROW_LEN_SIZE + row + FAMILY_LEN_SIZE + family + qualifier + TIMESTAMP_SIZE + TYPE_SIZE
}

/// Total encoded length of `cell`: `8 + keyLength + valueLength`.
///
/// Computed from the length fields alone, without touching the payload.
#[inline]
pub fn encoded_len(cell: &Cell) -> usize {
    LENGTH_PREFIX + cell.key_len() + cell.value_len()
}

/// Encoded length of the key-only projection: `4 + keyLength`.
#[inline]
pub fn encoded_key_len(cell: &Cell) -> usize {
    4 + cell.key_len()
}

/// Serialize `cell` into `out` at `offset`, returning the offset just past
/// the value bytes.
///
/// Fails with [`CodecError::BufferTooSmall`] before writing anything if the
/// buffer cannot hold [`encoded_len`] bytes from `offset`.
pub fn encode_into(cell: &Cell, out: &mut [u8], offset: usize) -> Result<usize, CodecError> {
    let needed = encoded_len(cell);
    let available = out.len().saturating_sub(offset);
    if available < needed {
        return Err(CodecError::BufferTooSmall { needed, available });
    }
    out[offset..offset + needed].copy_from_slice(cell.encoded());
    Ok(offset + needed)
}

/// Serialize only the key portion of `cell`: the 4-byte keyLength field
/// followed by the key bytes through the type byte. The valueLength field
/// and value bytes are omitted.
pub fn encode_key_into(cell: &Cell, out: &mut [u8], offset: usize) -> Result<usize, CodecError> {
    let key_len = cell.key_len();
    let needed = 4 + key_len;
    let available = out.len().saturating_sub(offset);
    if available < needed {
        return Err(CodecError::BufferTooSmall { needed, available });
    }
    out[offset..offset + 4].copy_from_slice(&(key_len as u32).to_be_bytes());
    out[offset + 4..offset + needed]
        .copy_from_slice(&cell.encoded()[LENGTH_PREFIX..LENGTH_PREFIX + key_len]);
    Ok(offset + needed)
}

/// Maximum bytes an encoded `u64` varint occupies.
pub const MAX_MVCC_LEN: usize = 10;

/// Encoded width of a write-sequence number.
pub fn mvcc_len(mut mvcc: u64) -> usize {
    let mut len = 1;
    while mvcc >= 0x80 {
        mvcc >>= 7;
        len += 1;
    }
    len
}

/// Append `mvcc` to `out` as an unsigned LEB128 varint.
pub fn write_mvcc(out: &mut Vec<u8>, mut mvcc: u64) {
    while mvcc >= 0x80 {
        out.push((mvcc as u8 & 0x7F) | 0x80);
        mvcc >>= 7;
    }
    out.push(mvcc as u8);
}

/// Read an unsigned LEB128 varint from the front of `buf`, returning the
/// value and the number of bytes consumed.
pub fn read_mvcc(buf: &[u8]) -> Result<(u64, usize), CodecError> {
    let mut value = 0u64;
    let mut shift = 0u32;
    for (idx, byte) in buf.iter().copied().enumerate() {
        if idx >= MAX_MVCC_LEN {
            break;
        }
        value |= u64::from(byte & 0x7F) << shift;
        if byte & 0x80 == 0 {
            return Ok((value, idx + 1));
        }
        shift += 7;
        if shift >= 64 {
            return Err(CodecError::Truncated {
                context: "mvcc varint overflows u64",
            });
        }
    }
    Err(CodecError::Truncated {
        context: "mvcc varint unterminated",
    })
}

/// Sequential zero-copy reader over a buffer of concatenated encoded cells.
///
/// Each step slices the backing [`Bytes`] rather than copying; every yielded
/// [`Cell`] shares the cursor's allocation. When constructed with
/// `includes_mvcc`, each cell is followed by its varint write-sequence
/// number, which the cursor attaches to the cell before advancing.
#[derive(Debug, Clone)]
pub struct CellCursor {
    buf: Bytes,
    pos: usize,
    includes_mvcc: bool,
}

impl CellCursor {
    /// Start a cursor at the beginning of `buf`.
    pub fn new(buf: Bytes, includes_mvcc: bool) -> Self {
        Self {
            buf,
            pos: 0,
            includes_mvcc,
        }
    }

    /// Start a cursor over any [`Buf`] source.
    ///
    /// The zero-copy contract requires one flat, indexable byte region;
    /// fragmented sources (chained or rope-style buffers) fail with
    /// [`CodecError::UnsupportedBuffer`]. For a [`Bytes`] source this is a
    /// refcount bump, not a copy.
    pub fn from_buf<B: Buf>(mut buf: B, includes_mvcc: bool) -> Result<Self, CodecError> {
        let remaining = buf.remaining();
        if buf.chunk().len() < remaining {
            return Err(CodecError::UnsupportedBuffer);
        }
        Ok(Self::new(buf.copy_to_bytes(remaining), includes_mvcc))
    }

    /// Byte offset of the next unread cell.
    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Whether the cursor has consumed the whole buffer.
    #[inline]
    pub fn is_exhausted(&self) -> bool {
        self.pos >= self.buf.len()
    }

    /// Decode the next cell, or `Ok(None)` at end of buffer.
    ///
    /// Advances past `8 + keyLength + valueLength` bytes, plus the varint
    /// mvcc bytes when present. A buffer that ends mid-record fails with
    /// [`CodecError::Truncated`] and leaves the cursor position unchanged.
    pub fn next_cell(&mut self) -> Result<Option<Cell>, CodecError> {
        if self.is_exhausted() {
            return Ok(None);
        }
        let remaining = self.buf.len() - self.pos;
        if remaining < LENGTH_PREFIX {
            return Err(CodecError::Truncated {
                context: "length prefix",
            });
        }
        let key_len = read_u32_at(&self.buf, self.pos) as usize;
        let value_len = read_u32_at(&self.buf, self.pos + 4) as usize;
        let total = LENGTH_PREFIX + key_len + value_len;
        if total > remaining {
            return Err(CodecError::Truncated {
                context: "record overruns buffer",
            });
        }
        let mut cell = Cell::from_encoded(self.buf.slice(self.pos..self.pos + total))?;
        let mut advance = total;
        if self.includes_mvcc {
            let (mvcc, read) = read_mvcc(&self.buf[self.pos + total..])?;
            cell.set_mvcc(mvcc);
            advance += read;
        }
        self.pos += advance;
        Ok(Some(cell))
    }
}

impl Iterator for CellCursor {
    type Item = Result<Cell, CodecError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_cell().transpose()
    }
}

/// First cell in sort order carrying `row`: empty family and qualifier,
/// maximum timestamp, minimum type, maximum mvcc.
fn first_on_row(row: &[u8]) -> Result<Cell, CodecError> {
    Ok(Cell::new(row, b"", b"", i64::MAX, CellType::Minimum, b"")?.with_mvcc(u64::MAX))
}

/// Exclusive upper bound over all versions of all keys within `cell`'s row:
/// the first possible cell on the row formed by appending one zero byte.
///
/// Fails only when the row is already at [`MAX_ROW_LEN`] and cannot grow.
pub fn row_successor(cell: &Cell) -> Result<Cell, CodecError> {
    let row = cell.row();
    if row.len() >= MAX_ROW_LEN {
        return Err(CodecError::FieldTooLong {
            field: "row",
            len: row.len() + 1,
            limit: MAX_ROW_LEN,
        });
    }
    let mut next = Vec::with_capacity(row.len() + 1);
    next.extend_from_slice(row);
    next.push(0);
    first_on_row(&next)
}

/// Exclusive upper bound across the whole prefix range of `cell`'s row: the
/// first possible cell on the lexicographic increment of the row bytes.
///
/// The increment bumps the rightmost byte below `0xFF` and drops everything
/// after it. Returns `None` when every row byte is `0xFF` (or the row is
/// empty), meaning the range extends to the end of the keyspace and no
/// exclusive bound exists.
pub fn row_increment_successor(cell: &Cell) -> Result<Option<Cell>, CodecError> {
    let row = cell.row();
    let mut next = row.to_vec();
    while let Some(last) = next.last_mut() {
        if *last < 0xFF {
            *last += 1;
            return first_on_row(&next).map(Some);
        }
        next.pop();
    }
    Ok(None)
}

/// Probe key for the version immediately preceding `cell`: same row, family,
/// and qualifier with the timestamp decremented, other fields reset to their
/// first-in-sort-order values.
///
/// The decrement saturates at `i64::MIN`; there is no version before the
/// earliest representable timestamp.
pub fn previous_version_probe(cell: &Cell) -> Result<Cell, CodecError> {
    Ok(Cell::new(
        cell.row(),
        cell.family(),
        cell.qualifier(),
        cell.timestamp().saturating_sub(1),
        CellType::Minimum,
        b"",
    )?
    .with_mvcc(u64::MAX))
}

#[inline]
fn read_u32_at(data: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}
