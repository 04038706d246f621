use serde::Serialize;

use crate::{Error, Result, BUCKET_COUNT, HEADER_SIZE};

/// Location and size of one bucket's slot table.
#[derive(Serialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ConstDbBucketMeta {
    /// File offset of the slot table.
    pub offset: u32,
    /// Number of slots in the table; zero for an empty bucket.
    pub length: u32,
}

impl ConstDbBucketMeta {
    /// Byte offset just past the end of the slot table.
    pub fn end(&self) -> u64 {
        self.offset as u64 + self.length as u64 * crate::SLOT_SIZE
    }
}

/// The fixed pointer table stored in the first 2048 bytes of every file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstDbHeader {
    pub buckets: [ConstDbBucketMeta; BUCKET_COUNT],
}

impl Default for ConstDbHeader {
    fn default() -> Self {
        Self {
            buckets: [ConstDbBucketMeta::default(); BUCKET_COUNT],
        }
    }
}

impl ConstDbHeader {
    pub const SIZE: usize = HEADER_SIZE as usize;

    /// Offset at which the record region ends and the slot tables begin.
    ///
    /// Every bucket, empty or not, records the offset at which its table
    /// would start, so bucket 0 always points at the end of the records.
    pub fn end_of_data(&self) -> u64 {
        self.buckets[0].offset as u64
    }

    /// Total number of slots over all buckets.
    pub fn slot_count(&self) -> u64 {
        self.buckets.iter().map(|b| b.length as u64).sum()
    }

    pub fn serialize(&self) -> [u8; Self::SIZE] {
        let mut data = [0u8; Self::SIZE];
        for (chunk, bucket) in data.chunks_exact_mut(8).zip(self.buckets.iter()) {
            chunk[..4].copy_from_slice(&bucket.offset.to_le_bytes());
            chunk[4..].copy_from_slice(&bucket.length.to_le_bytes());
        }
        data
    }

    /// Parses a header and checks that every table lies inside the file.
    pub fn deserialize(data: &[u8], file_length: u64) -> Result<Self> {
        if data.len() != Self::SIZE {
            return Err(Error::corrupt(
                0,
                format!("header needs {} bytes, got {}", Self::SIZE, data.len()),
            ));
        }

        let mut header = Self::default();
        for (bucket, chunk) in header.buckets.iter_mut().zip(data.chunks_exact(8)) {
            bucket.offset = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            bucket.length = u32::from_le_bytes([chunk[4], chunk[5], chunk[6], chunk[7]]);
        }

        let end_of_data = header.end_of_data();
        if end_of_data < HEADER_SIZE || end_of_data > file_length {
            return Err(Error::corrupt(
                0,
                format!(
                    "end of data {} outside [{}, {}]",
                    end_of_data, HEADER_SIZE, file_length
                ),
            ));
        }

        for (index, bucket) in header.buckets.iter().enumerate() {
            if bucket.length == 0 {
                continue;
            }
            if (bucket.offset as u64) < end_of_data || bucket.end() > file_length {
                return Err(Error::corrupt(
                    index as u64 * 8,
                    format!(
                        "bucket {} table [{}, {}) outside [{}, {}]",
                        index,
                        bucket.offset,
                        bucket.end(),
                        end_of_data,
                        file_length
                    ),
                ));
            }
        }

        Ok(header)
    }
}

/// Summary returned by [`ConstDbBuilder::build`](crate::ConstDbBuilder::build)
/// and [`ConstDb::info`](crate::ConstDb::info).
#[derive(Debug, Serialize, Default, Clone, PartialEq, Eq)]
pub struct ConstDbInfo {
    /// Size of the file in bytes.
    pub file_length: u64,
    /// Number of records stored, duplicates included.
    pub entry_count: u64,
    /// Offset at which the record region ends.
    pub end_of_data: u64,
    /// Total number of slots over all bucket tables.
    pub slot_count: u64,
    /// Number of buckets with at least one record.
    pub occupied_bucket_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        let mut header = ConstDbHeader::default();
        for bucket in header.buckets.iter_mut() {
            bucket.offset = 2064;
        }
        header.buckets[1] = ConstDbBucketMeta {
            offset: 2064,
            length: 2,
        };

        let data = header.serialize();
        assert_eq!(&data[..4], &2064u32.to_le_bytes());
        assert_eq!(&data[8..12], &2064u32.to_le_bytes());
        assert_eq!(&data[12..16], &2u32.to_le_bytes());

        let parsed = ConstDbHeader::deserialize(&data, 2064 + 16).unwrap();
        assert_eq!(parsed, header);
        assert_eq!(parsed.end_of_data(), 2064);
        assert_eq!(parsed.slot_count(), 2);
    }

    #[test]
    fn test_header_rejects_out_of_range_tables() {
        let mut header = ConstDbHeader::default();
        for bucket in header.buckets.iter_mut() {
            bucket.offset = 2048;
        }
        let data = header.serialize();
        ConstDbHeader::deserialize(&data, 2048).unwrap();
        ConstDbHeader::deserialize(&data[..100], 2048).unwrap_err();

        // End of data past the end of the file.
        let err = ConstDbHeader::deserialize(&data, 2047).unwrap_err();
        assert!(err.is_corrupt());

        // Table that runs off the end of the file.
        header.buckets[7] = ConstDbBucketMeta {
            offset: 2048,
            length: 4,
        };
        let data = header.serialize();
        ConstDbHeader::deserialize(&data, 2048 + 32).unwrap();
        let err = ConstDbHeader::deserialize(&data, 2048 + 31).unwrap_err();
        assert!(err.is_corrupt());

        // Table that starts inside the header.
        header.buckets[7].offset = 16;
        let data = header.serialize();
        ConstDbHeader::deserialize(&data, 4096).unwrap_err();
    }
}
