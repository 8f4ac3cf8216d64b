//! Versioned key-value records ("cells") and their canonical byte layout.
//!
//! A [`Cell`] is a view over one encoded record inside an immutably-owned,
//! reference-counted buffer; many cells routinely share a single backing
//! [`Bytes`] allocation (a block read from disk, a write batch). The encoded
//! layout is the binary contract with the on-disk file format and must be
//! reproduced bit-for-bit:
//!
//! ```text
//! [4B keyLength][4B valueLength]
//! [2B rowLength][row bytes]
//! [1B familyLength][family bytes]
//! [qualifier bytes]
//! [8B timestamp][1B type]
//! [value bytes]
//! ```
//!
//! `keyLength` covers everything from the rowLength field through the type
//! byte, inclusive. The write-sequence number (mvcc version) is not part of
//! the key bytes; when persisted with version info it trails the record as a
//! variable-length integer handled by [`codec`].

pub mod codec;
pub mod order;

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

use self::codec::CodecError;

/// Upper bound on the row length (stored in two bytes).
pub const MAX_ROW_LEN: usize = u16::MAX as usize;
/// Upper bound on the family length (stored in one byte).
pub const MAX_FAMILY_LEN: usize = u8::MAX as usize;

/// Size of the `[keyLength][valueLength]` prefix.
pub(crate) const LENGTH_PREFIX: usize = 8;
pub(crate) const ROW_LEN_SIZE: usize = 2;
pub(crate) const FAMILY_LEN_SIZE: usize = 1;
pub(crate) const TIMESTAMP_SIZE: usize = 8;
pub(crate) const TYPE_SIZE: usize = 1;
/// Bytes of a key that are not row/family/qualifier payload.
pub(crate) const KEY_FIXED_OVERHEAD: usize =
    ROW_LEN_SIZE + FAMILY_LEN_SIZE + TIMESTAMP_SIZE + TYPE_SIZE;

/// Operation tag carried by every cell, compared as its raw unsigned byte.
///
/// The numeric codes are part of the on-disk contract; `Minimum` and
/// `Maximum` never appear in real data and exist to build scan bounds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum CellType {
    /// Sorts before every real operation for a fixed key; bound marker only.
    Minimum = 0,
    /// Insert or overwrite of a single version.
    Put = 4,
    /// Delete of a single version.
    Delete = 8,
    /// Delete of all columns of a family at one exact timestamp.
    DeleteFamilyVersion = 10,
    /// Delete of all versions of a single column.
    DeleteColumn = 12,
    /// Delete of all columns of a family.
    DeleteFamily = 14,
    /// Sorts after every real operation for a fixed key; bound marker only.
    Maximum = 255,
}

impl CellType {
    /// Raw byte stored in the encoded layout.
    #[inline]
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Map a raw byte back to a known tag, `None` for unrecognised codes.
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Minimum),
            4 => Some(Self::Put),
            8 => Some(Self::Delete),
            10 => Some(Self::DeleteFamilyVersion),
            12 => Some(Self::DeleteColumn),
            14 => Some(Self::DeleteFamily),
            255 => Some(Self::Maximum),
            _ => None,
        }
    }
}

/// One versioned key-value record, viewed zero-copy over its encoded bytes.
///
/// `data` spans exactly `[4B keyLength][4B valueLength][key][value]`; field
/// accessors parse offsets on demand. The mvcc version is carried out of
/// band because it is not part of the key bytes on disk.
///
/// Cloning a `Cell` is cheap: it bumps the backing buffer's refcount.
#[derive(Clone)]
pub struct Cell {
    data: Bytes,
    mvcc: u64,
}

impl Cell {
    /// Build an owned cell from its parts.
    ///
    /// Fails with [`CodecError::FieldTooLong`] when `row` exceeds
    /// [`MAX_ROW_LEN`] or `family` exceeds [`MAX_FAMILY_LEN`]. The mvcc
    /// version starts at zero; see [`Cell::with_mvcc`].
    pub fn new(
        row: &[u8],
        family: &[u8],
        qualifier: &[u8],
        timestamp: i64,
        kind: CellType,
        value: &[u8],
    ) -> Result<Self, CodecError> {
        if row.len() > MAX_ROW_LEN {
            return Err(CodecError::FieldTooLong {
                field: "row",
                len: row.len(),
                limit: MAX_ROW_LEN,
            });
        }
        if family.len() > MAX_FAMILY_LEN {
            return Err(CodecError::FieldTooLong {
                field: "family",
                len: family.len(),
                limit: MAX_FAMILY_LEN,
            });
        }

        let key_len = codec::key_len(row.len(), family.len(), qualifier.len());
        let mut buf = BytesMut::with_capacity(LENGTH_PREFIX + key_len + value.len());
        buf.put_u32(key_len as u32);
        buf.put_u32(value.len() as u32);
        buf.put_u16(row.len() as u16);
        buf.put_slice(row);
        buf.put_u8(family.len() as u8);
        buf.put_slice(family);
        buf.put_slice(qualifier);
        buf.put_i64(timestamp);
        buf.put_u8(kind.code());
        buf.put_slice(value);

        Ok(Self {
            data: buf.freeze(),
            mvcc: 0,
        })
    }

    /// Attach a write-sequence number, consuming and returning the cell.
    #[must_use]
    pub fn with_mvcc(mut self, mvcc: u64) -> Self {
        self.mvcc = mvcc;
        self
    }

    /// Interpret `data` as one complete encoded cell, validating the framing.
    ///
    /// The buffer must contain exactly `8 + keyLength + valueLength` bytes
    /// and internally consistent length fields; anything else fails with a
    /// malformed-input error.
    pub fn from_encoded(data: Bytes) -> Result<Self, CodecError> {
        if data.len() < LENGTH_PREFIX {
            return Err(CodecError::Truncated {
                context: "length prefix",
            });
        }
        let key_len = read_u32(&data, 0) as usize;
        let value_len = read_u32(&data, 4) as usize;
        if key_len < KEY_FIXED_OVERHEAD {
            return Err(CodecError::Truncated {
                context: "key shorter than fixed fields",
            });
        }
        if data.len() != LENGTH_PREFIX + key_len + value_len {
            return Err(CodecError::Truncated {
                context: "length fields disagree with buffer",
            });
        }
        let row_len = read_u16(&data, LENGTH_PREFIX) as usize;
        let payload = key_len - KEY_FIXED_OVERHEAD;
        if row_len > payload {
            return Err(CodecError::Truncated {
                context: "row overruns key",
            });
        }
        let family_len = data[LENGTH_PREFIX + ROW_LEN_SIZE + row_len] as usize;
        if row_len + family_len > payload {
            return Err(CodecError::Truncated {
                context: "family overruns key",
            });
        }
        Ok(Self { data, mvcc: 0 })
    }

    /// Row bytes.
    #[inline]
    pub fn row(&self) -> &[u8] {
        let start = LENGTH_PREFIX + ROW_LEN_SIZE;
        &self.data[start..start + self.row_len()]
    }

    /// Column family bytes.
    #[inline]
    pub fn family(&self) -> &[u8] {
        let start = self.family_offset();
        &self.data[start..start + self.family_len()]
    }

    /// Column qualifier bytes.
    #[inline]
    pub fn qualifier(&self) -> &[u8] {
        let start = self.family_offset() + self.family_len();
        &self.data[start..self.timestamp_offset()]
    }

    /// Logical write time; sorts descending (newest first).
    #[inline]
    pub fn timestamp(&self) -> i64 {
        read_i64(&self.data, self.timestamp_offset())
    }

    /// Raw operation tag byte.
    #[inline]
    pub fn type_byte(&self) -> u8 {
        self.data[LENGTH_PREFIX + self.key_len() - TYPE_SIZE]
    }

    /// Operation tag, when the raw byte maps to a known [`CellType`].
    #[inline]
    pub fn cell_type(&self) -> Option<CellType> {
        CellType::from_code(self.type_byte())
    }

    /// Whether the tag marks any flavour of delete.
    pub fn is_delete(&self) -> bool {
        let code = self.type_byte();
        code >= CellType::Delete.code() && code <= CellType::DeleteFamily.code()
    }

    /// Value bytes.
    #[inline]
    pub fn value(&self) -> &[u8] {
        let start = LENGTH_PREFIX + self.key_len();
        &self.data[start..start + self.value_len()]
    }

    /// Write-sequence number used for multi-version visibility; sorts
    /// descending. Zero when the cell was decoded without version info.
    #[inline]
    pub fn mvcc(&self) -> u64 {
        self.mvcc
    }

    /// Attach a write-sequence number in place (e.g. after decode).
    #[inline]
    pub fn set_mvcc(&mut self, mvcc: u64) {
        self.mvcc = mvcc;
    }

    /// Length of the key region (rowLength field through type byte).
    #[inline]
    pub fn key_len(&self) -> usize {
        read_u32(&self.data, 0) as usize
    }

    /// Length of the value region.
    #[inline]
    pub fn value_len(&self) -> usize {
        read_u32(&self.data, 4) as usize
    }

    /// The full encoded region backing this cell.
    #[inline]
    pub fn encoded(&self) -> &Bytes {
        &self.data
    }

    /// Value-omitting projection, preserving the mvcc version.
    ///
    /// The result is a freshly-owned cell whose value length is zero; key
    /// bytes are copied verbatim. Used where only the key matters (block
    /// index entries, bloom probes).
    pub fn key_only(&self) -> Self {
        let key_len = self.key_len();
        let mut buf = BytesMut::with_capacity(LENGTH_PREFIX + key_len);
        buf.put_u32(key_len as u32);
        buf.put_u32(0);
        buf.put_slice(&self.data[LENGTH_PREFIX..LENGTH_PREFIX + key_len]);
        Self {
            data: buf.freeze(),
            mvcc: self.mvcc,
        }
    }

    #[inline]
    fn row_len(&self) -> usize {
        read_u16(&self.data, LENGTH_PREFIX) as usize
    }

    #[inline]
    fn family_offset(&self) -> usize {
        LENGTH_PREFIX + ROW_LEN_SIZE + self.row_len() + FAMILY_LEN_SIZE
    }

    #[inline]
    fn family_len(&self) -> usize {
        self.data[self.family_offset() - FAMILY_LEN_SIZE] as usize
    }

    #[inline]
    fn timestamp_offset(&self) -> usize {
        LENGTH_PREFIX + self.key_len() - TIMESTAMP_SIZE - TYPE_SIZE
    }
}

impl fmt::Debug for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cell")
            .field("row", &String::from_utf8_lossy(self.row()))
            .field("family", &String::from_utf8_lossy(self.family()))
            .field("qualifier", &String::from_utf8_lossy(self.qualifier()))
            .field("timestamp", &self.timestamp())
            .field("type", &self.type_byte())
            .field("value_len", &self.value_len())
            .field("mvcc", &self.mvcc)
            .finish()
    }
}

#[inline]
fn read_u16(data: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([data[offset], data[offset + 1]])
}

#[inline]
fn read_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

#[inline]
fn read_i64(data: &[u8], offset: usize) -> i64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&data[offset..offset + 8]);
    i64::from_be_bytes(raw)
}
