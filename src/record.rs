use std::io::Write;

use crate::reader::BoundedReader;
use crate::{ConstDbReader, Error, Result};

/// Size of the `(key_len, value_len)` prefix in front of every record.
pub const RECORD_PREFIX_SIZE: u64 = 8;

/// A key/value pair read back from the record region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstDbRecord {
    /// File offset of the record prefix.
    pub offset: u64,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl ConstDbRecord {
    /// Bytes this record occupies on disk.
    pub fn encoded_len(&self) -> u64 {
        RECORD_PREFIX_SIZE + self.key.len() as u64 + self.value.len() as u64
    }

    /// File offset of the first value byte.
    pub fn value_offset(&self) -> u64 {
        self.offset + RECORD_PREFIX_SIZE + self.key.len() as u64
    }
}

fn checked_len(what: &'static str, length: usize) -> Result<u32> {
    u32::try_from(length).map_err(|_| Error::LengthOverflow {
        what,
        length: length as u64,
    })
}

/// Encodes the record prefix for the given key and value lengths.
pub fn encode_prefix(key_len: usize, value_len: usize) -> Result<[u8; 8]> {
    let key_len = checked_len("key", key_len)?;
    let value_len = checked_len("value", value_len)?;
    let mut prefix = [0u8; 8];
    prefix[..4].copy_from_slice(&key_len.to_le_bytes());
    prefix[4..].copy_from_slice(&value_len.to_le_bytes());
    Ok(prefix)
}

/// Encodes a full record: prefix, key bytes, value bytes.
pub fn encode(key: &[u8], value: &[u8]) -> Result<Vec<u8>> {
    let mut data = Vec::with_capacity(RECORD_PREFIX_SIZE as usize + key.len() + value.len());
    write_record(&mut data, key, value)?;
    Ok(data)
}

/// Streams a record into `writer`, returning the number of bytes written.
pub(crate) fn write_record<W: Write>(writer: &mut W, key: &[u8], value: &[u8]) -> Result<u64> {
    let prefix = encode_prefix(key.len(), value.len())?;
    writer.write_all(&prefix)?;
    writer.write_all(key)?;
    writer.write_all(value)?;
    Ok(RECORD_PREFIX_SIZE + key.len() as u64 + value.len() as u64)
}

/// Reads a record prefix, checking each declared length against the
/// reader's end boundary before anything else is read.
pub(crate) fn decode_prefix<R: ConstDbReader>(
    reader: &BoundedReader<'_, R>,
    offset: u64,
) -> Result<(u32, u32)> {
    let (key_len, value_len) = reader.read_pair(offset, "record prefix")?;
    let key_offset = offset + RECORD_PREFIX_SIZE;
    reader.check(key_offset, key_len as u64, "record key")?;
    reader.check(key_offset + key_len as u64, value_len as u64, "record value")?;
    Ok((key_len, value_len))
}

/// Decodes the record at `offset`, never reading past the reader's boundary.
pub(crate) fn decode<R: ConstDbReader>(
    reader: &BoundedReader<'_, R>,
    offset: u64,
) -> Result<ConstDbRecord> {
    let (key_len, value_len) = decode_prefix(reader, offset)?;
    let body_len = key_len as u64 + value_len as u64;
    let (key, value) = reader.read(offset + RECORD_PREFIX_SIZE, body_len, "record body", |data| {
        let (key, value) = data.split_at(key_len as usize);
        Ok((key.to_vec(), value.to_vec()))
    })?;
    Ok(ConstDbRecord { offset, key, value })
}
