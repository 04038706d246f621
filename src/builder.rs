use std::borrow::Borrow;
use std::io::{BufWriter, Write};

use tracing::{debug, trace};

use crate::record::write_record;
use crate::table::{bucket_index, layout};
use crate::{
    hash, ConstDbBucketMeta, ConstDbHeader, ConstDbInfo, ConstDbSlot, ConstDbWriter, Error,
    Result, BUCKET_COUNT, HEADER_SIZE,
};

/// Builder type for emitting constdb files from key-value iterators.
///
/// The builder owns the table sizing policy and IO buffering. Use
/// [`build`](Self::build) to stream records and slot tables to a
/// [`ConstDbWriter`] sink (typically a file or a
/// [`ConstDbBuffer`](crate::ConstDbBuffer)). Each builder instance is consumed
/// by a single call to [`build`](Self::build).
#[derive(Debug)]
pub struct ConstDbBuilder {
    slot_factor: u32,
    writer_buffer_size: usize,
}

impl Default for ConstDbBuilder {
    fn default() -> Self {
        Self {
            slot_factor: 2,
            writer_buffer_size: 1 << 20, // 1 MiB
        }
    }
}

impl ConstDbBuilder {
    /// Sets how many slots each bucket table gets per record.
    ///
    /// Values below 2 are raised to 2 so every table stays at most half full
    /// and every probe chain ends at an empty slot. Larger factors shorten
    /// probe chains at the cost of 8 bytes per extra slot.
    pub fn with_slot_factor(mut self, factor: u32) -> Self {
        self.slot_factor = factor.max(2);
        self
    }

    /// Adjusts the capacity of the buffered writer used while streaming data.
    pub fn with_writer_buffer_size(mut self, size: usize) -> Self {
        self.writer_buffer_size = size;
        self
    }

    /// Consumes the builder and writes a constdb to `writer` from `entries`.
    ///
    /// Records are written in iteration order starting right after the
    /// header; that order is also the order in which duplicate keys are
    /// returned by lookups. The slot tables follow the records in ascending
    /// bucket order, and the header is written last.
    ///
    /// On error the writer holds a partial file that must be discarded.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LengthOverflow`] if a key, a value or the file itself
    /// outgrows the 32-bit fields, and [`Error::Io`] if the writer fails.
    ///
    /// # Examples
    ///
    /// ```
    /// use constdb::ConstDbBuilder;
    ///
    /// # fn main() -> constdb::Result<()> {
    /// let dir = tempfile::tempdir()?;
    /// let data = [("it", "1"), ("works", "2")];
    /// let file = std::fs::File::create(dir.path().join("example.cdb"))?;
    /// let info = ConstDbBuilder::default().build(&file, data.iter())?;
    /// assert_eq!(info.entry_count, 2);
    /// # Ok(())
    /// # }
    /// ```
    pub fn build<W, K, V>(
        self,
        writer: &W,
        entries: impl Iterator<Item = impl Borrow<(K, V)>>,
    ) -> Result<ConstDbInfo>
    where
        W: ConstDbWriter,
        K: AsRef<[u8]>,
        V: AsRef<[u8]>,
    {
        let mut buckets: Vec<Vec<(u32, u32)>> = vec![Vec::new(); BUCKET_COUNT];
        let mut buf_writer = BufWriter::with_capacity(
            self.writer_buffer_size,
            crate::writer::ConstDbWriterWrapper::new(writer, HEADER_SIZE),
        );

        let mut offset = HEADER_SIZE;
        let mut entry_count: u64 = 0;
        for entry in entries {
            let (key, value) = entry.borrow();
            let (key, value) = (key.as_ref(), value.as_ref());

            let record_offset = checked_offset(offset)?;
            let length = write_record(&mut buf_writer, key, value)?;
            offset += length;
            checked_offset(offset)?;

            let h = hash(key);
            buckets[bucket_index(h)].push((h, record_offset));
            entry_count += 1;
        }

        let end_of_data = offset;
        let mut header = ConstDbHeader::default();
        let mut occupied_bucket_count = 0;
        for (index, bucket) in buckets.into_iter().enumerate() {
            let table_offset = checked_offset(offset)?;
            if bucket.is_empty() {
                header.buckets[index] = ConstDbBucketMeta {
                    offset: table_offset,
                    length: 0,
                };
                continue;
            }

            let table_len = (bucket.len() as u64 * self.slot_factor as u64).max(1);
            let table_len = u32::try_from(table_len).map_err(|_| Error::LengthOverflow {
                what: "slot table",
                length: table_len,
            })?;
            let table_bytes = table_len as u64 * ConstDbSlot::SIZE as u64;
            checked_offset(offset + table_bytes)?;

            for slot in layout(&bucket, table_len) {
                buf_writer.write_all(&slot.serialize())?;
            }
            trace!(
                bucket = index,
                entries = bucket.len(),
                slots = table_len,
                offset = table_offset,
                "flushed slot table"
            );

            offset += table_bytes;
            occupied_bucket_count += 1;
            header.buckets[index] = ConstDbBucketMeta {
                offset: table_offset,
                length: table_len,
            };
        }
        buf_writer.flush()?;
        drop(buf_writer);

        writer.write_all_at(&header.serialize(), 0)?;

        let info = ConstDbInfo {
            file_length: offset,
            entry_count,
            end_of_data,
            slot_count: header.slot_count(),
            occupied_bucket_count,
        };
        debug!(
            entries = info.entry_count,
            file_length = info.file_length,
            end_of_data = info.end_of_data,
            slots = info.slot_count,
            "built constdb"
        );
        Ok(info)
    }
}

/// Every offset stored in the file must fit into a `u32`.
fn checked_offset(offset: u64) -> Result<u32> {
    u32::try_from(offset).map_err(|_| Error::LengthOverflow {
        what: "file offset",
        length: offset,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use crate::*;

    #[derive(Debug)]
    struct LimitedWriter {
        data: Mutex<Vec<u8>>,
        limit: u64,
    }

    impl LimitedWriter {
        fn new(limit: u64) -> Self {
            Self {
                data: Mutex::new(Vec::new()),
                limit,
            }
        }
    }

    impl ConstDbWriter for LimitedWriter {
        fn write_all_at(&self, buf: &[u8], offset: u64) -> std::io::Result<()> {
            if offset + buf.len() as u64 > self.limit {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::WriteZero,
                    "Write exceeds limit",
                ));
            }
            let mut data = self.data.lock().unwrap();
            let end = offset as usize + buf.len();
            if data.len() < end {
                data.resize(end, 0);
            }
            data[offset as usize..end].copy_from_slice(buf);
            Ok(())
        }
    }

    #[test]
    fn test_empty_database() {
        let buffer = ConstDbBuffer::default();
        let info = ConstDbBuilder::default()
            .build(&buffer, std::iter::empty::<(&str, &str)>())
            .unwrap();
        assert_eq!(info.file_length, 2048);
        assert_eq!(info.entry_count, 0);
        assert_eq!(info.slot_count, 0);
        assert_eq!(info.occupied_bucket_count, 0);

        let data = buffer.into_inner();
        assert_eq!(data.len(), 2048);
        for chunk in data.chunks(8) {
            assert_eq!(&chunk[..4], &2048u32.to_le_bytes());
            assert_eq!(&chunk[4..], &[0, 0, 0, 0]);
        }
    }

    #[test]
    fn test_file_layout() {
        let entries = [("alpha", "1"), ("beta", "2"), ("alpha", "3")];
        let buffer = ConstDbBuffer::default();
        let info = ConstDbBuilder::default()
            .build(&buffer, entries.iter())
            .unwrap();

        let records = 3 * 8 + 5 + 1 + 4 + 1 + 5 + 1;
        assert_eq!(info.end_of_data, 2048 + records);
        assert_eq!(info.slot_count, 6);
        assert_eq!(info.file_length, 2048 + records + 6 * 8);

        let data = buffer.into_inner();
        assert_eq!(data.len() as u64, info.file_length);
        assert_eq!(&data[..4], &(info.end_of_data as u32).to_le_bytes());
        assert_eq!(&data[2048..2056], &[5, 0, 0, 0, 1, 0, 0, 0]);
        assert_eq!(&data[2056..2062], b"alpha1");

        let header = ConstDbHeader::deserialize(&data[..2048], data.len() as u64).unwrap();
        let alpha = header.buckets[table::bucket_index(hash(b"alpha"))];
        let beta = header.buckets[table::bucket_index(hash(b"beta"))];
        assert_eq!(alpha.length, 4);
        assert_eq!(beta.length, 2);

        // Tables are written in ascending bucket order right after the records.
        let (first, second) = if alpha.offset < beta.offset {
            (alpha, beta)
        } else {
            (beta, alpha)
        };
        assert_eq!(first.offset as u64, info.end_of_data);
        assert_eq!(second.offset as u64, first.end());
        assert_eq!(second.end(), info.file_length);
    }

    #[test]
    fn test_slot_factor() {
        let entries: Vec<(String, String)> =
            (0..100).map(|i| (format!("key{i}"), format!("{i}"))).collect();

        let buffer = ConstDbBuffer::default();
        let info = ConstDbBuilder::default()
            .with_slot_factor(3)
            .with_writer_buffer_size(64)
            .build(&buffer, entries.iter())
            .unwrap();
        assert_eq!(info.slot_count, 300);

        let buffer = ConstDbBuffer::default();
        let info = ConstDbBuilder::default()
            .with_slot_factor(1)
            .build(&buffer, entries.iter())
            .unwrap();
        assert_eq!(info.slot_count, 200);
    }

    #[test]
    fn test_shorter_write() {
        let entries: Vec<(u64, u64)> = (0..100).map(|i| (i, i * 2)).collect();
        let entries: Vec<(Vec<u8>, Vec<u8>)> = entries
            .iter()
            .map(|(k, v)| (k.to_le_bytes().to_vec(), v.to_le_bytes().to_vec()))
            .collect();
        // 2048 header + 100 * 24 records + 200 * 8 slots.
        const SUFFICIENT_CAPACITY: u64 = 2048 + 2400 + 1600;

        let writer = LimitedWriter::new(SUFFICIENT_CAPACITY);
        let info = ConstDbBuilder::default()
            .with_writer_buffer_size(128)
            .build(&writer, entries.iter())
            .unwrap();
        assert_eq!(info.file_length, SUFFICIENT_CAPACITY);

        let writer = LimitedWriter::new(SUFFICIENT_CAPACITY - 1);
        let err = ConstDbBuilder::default()
            .build(&writer, entries.iter())
            .unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}
