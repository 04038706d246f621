use serde::Serialize;
use tracing::{debug, warn};

use crate::reader::BoundedReader;
use crate::record::{decode, decode_prefix, RECORD_PREFIX_SIZE};
use crate::table::{bucket_index, start_slot};
use crate::{
    hash, ConstDbHeader, ConstDbInfo, ConstDbReader, ConstDbRecord, ConstDbSlot, Error, Result,
    HEADER_SIZE, SLOT_SIZE,
};

/// Immutable key-value database backed by a constdb file.
///
/// A `ConstDb` is created from a [`ConstDbReader`] (typically a file) and
/// answers lookups by reading one header entry, a handful of slots and the
/// matching record. Only the 2048-byte pointer table is kept in memory.
#[derive(Debug)]
pub struct ConstDb<R: ConstDbReader> {
    /// Pointer table read from the start of the file.
    pub header: ConstDbHeader,
    /// Size of the file when it was loaded.
    pub file_length: u64,
    reader: R,
}

/// Position of a match inside its bucket's probe sequence.
///
/// Returned by [`ConstDb::find`] and fed back into [`ConstDb::find_next`] to
/// continue with the next record stored under the same key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstDbCursor {
    key: Vec<u8>,
    hash: u32,
    table_offset: u64,
    table_len: u32,
    /// Number of probes already performed.
    probes: u32,
}

impl ConstDbCursor {
    pub fn key(&self) -> &[u8] {
        &self.key
    }

    pub fn bucket(&self) -> usize {
        bucket_index(self.hash)
    }

    /// Slot index of the last match.
    pub fn slot(&self) -> u32 {
        let start = start_slot(self.hash, self.table_len) as u64;
        ((start + self.probes as u64 - 1) % self.table_len as u64) as u32
    }
}

/// A record located by [`ConstDb::find`] or [`ConstDb::find_next`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstDbMatch {
    /// File offset of the record prefix.
    pub record_offset: u64,
    /// File offset of the first value byte.
    pub value_offset: u64,
    pub value: Vec<u8>,
    pub cursor: ConstDbCursor,
}

/// Outcome of [`ConstDb::check`].
#[derive(Debug, Serialize, Default, Clone, PartialEq, Eq)]
pub struct ConstDbCheckReport {
    /// Records whose key lookup reaches them with the right value length.
    pub found: u64,
    /// Records whose key is found, but never at their position.
    pub different_record: u64,
    /// Records reached by lookup with a different value length.
    pub bad_length: u64,
    /// Records whose key is not found at all.
    pub not_found: u64,
}

impl ConstDbCheckReport {
    pub fn is_clean(&self) -> bool {
        self.different_record == 0 && self.bad_length == 0 && self.not_found == 0
    }
}

impl<R: ConstDbReader> ConstDb<R> {
    /// Opens a constdb from a [`ConstDbReader`] implementation.
    ///
    /// Reads and validates the pointer table: the record region must start
    /// after the header and end inside the file, and every slot table must
    /// lie between the end of the records and the end of the file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CorruptFormat`] when the file is shorter than the
    /// header or the pointer table is inconsistent, and [`Error::Io`] when
    /// the reader fails.
    pub fn load(reader: R) -> Result<Self> {
        let file_length = reader.length()?;
        if file_length < HEADER_SIZE {
            return Err(Error::corrupt(
                0,
                format!("file of {} bytes is shorter than the header", file_length),
            ));
        }

        let header = reader
            .read_exact_at(0, HEADER_SIZE, |data| {
                ConstDbHeader::deserialize(data, file_length)
            })
            .inspect_err(|e| warn!(error = %e, "rejected constdb header"))?;
        debug!(
            file_length,
            end_of_data = header.end_of_data(),
            slots = header.slot_count(),
            "loaded constdb"
        );

        Ok(Self {
            header,
            file_length,
            reader,
        })
    }

    /// Summary of the loaded file.
    pub fn info(&self) -> Result<ConstDbInfo> {
        Ok(ConstDbInfo {
            file_length: self.file_length,
            entry_count: self.len()?,
            end_of_data: self.header.end_of_data(),
            slot_count: self.header.slot_count(),
            occupied_bucket_count: self.header.buckets.iter().filter(|b| b.length > 0).count(),
        })
    }

    /// Number of records, duplicates included.
    ///
    /// Counted from the occupied slots, so the record region is not read.
    pub fn len(&self) -> Result<u64> {
        Ok(self.stats()?.records)
    }

    pub fn is_empty(&self) -> bool {
        self.header.end_of_data() == HEADER_SIZE
    }

    /// Returns the first value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the reader fails or a slot or record on the probe
    /// path is corrupt.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.find(key)?.map(|found| found.value))
    }

    pub fn contains_key(&self, key: &[u8]) -> Result<bool> {
        Ok(self.find(key)?.is_some())
    }

    /// Returns every value stored under `key`, in insertion order.
    pub fn get_all<'a>(&'a self, key: &[u8]) -> ConstDbValues<'a, R> {
        ConstDbValues {
            db: self,
            state: ValuesState::Start(key.to_vec()),
        }
    }

    /// Locates the first record stored under `key`.
    ///
    /// The returned [`ConstDbMatch`] carries a cursor for
    /// [`find_next`](Self::find_next).
    pub fn find(&self, key: &[u8]) -> Result<Option<ConstDbMatch>> {
        let h = hash(key);
        let bucket = self.header.buckets[bucket_index(h)];
        if bucket.length == 0 {
            return Ok(None);
        }

        self.probe(ConstDbCursor {
            key: key.to_vec(),
            hash: h,
            table_offset: bucket.offset as u64,
            table_len: bucket.length,
            probes: 0,
        })
    }

    /// Continues probing after a previous match for the next record with the
    /// same key.
    pub fn find_next(&self, cursor: &ConstDbCursor) -> Result<Option<ConstDbMatch>> {
        self.probe(cursor.clone())
    }

    fn probe(&self, mut cursor: ConstDbCursor) -> Result<Option<ConstDbMatch>> {
        let tables = BoundedReader::new(&self.reader, self.header.end_of_data(), self.file_length);
        let records = BoundedReader::new(&self.reader, HEADER_SIZE, self.header.end_of_data());
        let start = start_slot(cursor.hash, cursor.table_len);

        while cursor.probes < cursor.table_len {
            let slot_index = (start as u64 + cursor.probes as u64) % cursor.table_len as u64;
            let slot_offset = cursor.table_offset + slot_index * SLOT_SIZE;
            cursor.probes += 1;

            let slot = tables.read(slot_offset, SLOT_SIZE, "slot", |data| {
                Ok(ConstDbSlot::deserialize(data))
            })?;
            if slot.is_empty() {
                return Ok(None);
            }
            if slot.hash != cursor.hash {
                continue;
            }

            let record_offset = slot.offset as u64;
            if record_offset < HEADER_SIZE || record_offset >= records.end() {
                return Err(Error::corrupt(
                    slot_offset,
                    format!(
                        "slot points at {} outside record region [{}, {})",
                        record_offset,
                        HEADER_SIZE,
                        records.end()
                    ),
                ));
            }

            let (key_len, value_len) = decode_prefix(&records, record_offset)?;
            if key_len as usize != cursor.key.len() {
                continue;
            }
            let key_offset = record_offset + RECORD_PREFIX_SIZE;
            let matched = records.read(key_offset, key_len as u64, "record key", |data| {
                Ok(data == cursor.key.as_slice())
            })?;
            if !matched {
                continue;
            }

            let value_offset = key_offset + key_len as u64;
            let value = records.read_bytes(value_offset, value_len as u64, "record value")?;
            return Ok(Some(ConstDbMatch {
                record_offset,
                value_offset,
                value,
                cursor,
            }));
        }

        Ok(None)
    }

    /// Creates an iterator over all records in file order.
    ///
    /// Each call starts a fresh pass at the beginning of the record region.
    ///
    /// # Examples
    ///
    /// ```
    /// use constdb::{ConstDb, ConstDbBuffer, ConstDbBuilder};
    ///
    /// # fn main() -> constdb::Result<()> {
    /// let entries = [("a", "1"), ("b", "2"), ("a", "3")];
    /// let buffer = ConstDbBuffer::default();
    /// ConstDbBuilder::default().build(&buffer, entries.iter())?;
    ///
    /// let db = ConstDb::load(buffer)?;
    /// let records = db.iter().collect::<constdb::Result<Vec<_>>>()?;
    /// assert_eq!(records.len(), 3);
    /// assert_eq!(records[2].value, b"3");
    /// # Ok(())
    /// # }
    /// ```
    pub fn iter(&self) -> ConstDbIter<'_, R> {
        ConstDbIter {
            records: BoundedReader::new(&self.reader, HEADER_SIZE, self.header.end_of_data()),
            offset: HEADER_SIZE,
            failed: false,
        }
    }

    /// Looks up every record's key again and checks that the lookup reaches
    /// that exact record.
    ///
    /// # Errors
    ///
    /// Structural corruption met while iterating or probing is returned as an
    /// error rather than counted.
    pub fn check(&self) -> Result<ConstDbCheckReport> {
        let mut report = ConstDbCheckReport::default();
        for record in self.iter() {
            let record = record?;
            let mut found = self.find(&record.key)?;
            let mut located = None;
            let mut seen = false;
            while let Some(current) = found {
                seen = true;
                if current.record_offset == record.offset {
                    located = Some(current);
                    break;
                }
                found = self.find_next(&current.cursor)?;
            }

            match located {
                Some(current) if current.value.len() == record.value.len() => report.found += 1,
                Some(_) => report.bad_length += 1,
                None if seen => report.different_record += 1,
                None => report.not_found += 1,
            }
        }

        if !report.is_clean() {
            warn!(?report, "constdb consistency check failed");
        }
        Ok(report)
    }

    pub(crate) fn reader(&self) -> &R {
        &self.reader
    }
}

/// Iterator over all records of a [`ConstDb`] in file order.
///
/// Stops after the first error.
pub struct ConstDbIter<'a, R: ConstDbReader> {
    records: BoundedReader<'a, R>,
    offset: u64,
    failed: bool,
}

impl<R: ConstDbReader> Iterator for ConstDbIter<'_, R> {
    type Item = Result<ConstDbRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.offset == self.records.end() {
            return None;
        }

        match decode(&self.records, self.offset) {
            Ok(record) => {
                self.offset += record.encoded_len();
                Some(Ok(record))
            }
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

/// Iterator over every value stored under one key.
///
/// Created by [`ConstDb::get_all`].
pub struct ConstDbValues<'a, R: ConstDbReader> {
    db: &'a ConstDb<R>,
    state: ValuesState,
}

enum ValuesState {
    Start(Vec<u8>),
    Next(ConstDbCursor),
    Done,
}

impl<R: ConstDbReader> Iterator for ConstDbValues<'_, R> {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        let result = match std::mem::replace(&mut self.state, ValuesState::Done) {
            ValuesState::Start(key) => self.db.find(&key),
            ValuesState::Next(cursor) => self.db.find_next(&cursor),
            ValuesState::Done => return None,
        };

        match result {
            Ok(Some(found)) => {
                self.state = ValuesState::Next(found.cursor);
                Some(Ok(found.value))
            }
            Ok(None) => None,
            Err(e) => Some(Err(e)),
        }
    }
}
