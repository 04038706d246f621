use std::collections::BTreeMap;

use serde::Serialize;

use crate::reader::BoundedReader;
use crate::table::{bucket_index, displacement};
use crate::{ConstDb, ConstDbReader, ConstDbSlot, Error, Result, SLOT_SIZE};

/// Displacements at or beyond this distance share the last histogram bin.
pub const FAR_DISPLACEMENT: usize = 10;

/// Probe-distance statistics over every bucket table.
#[derive(Debug, Serialize, Default, Clone, PartialEq, Eq)]
pub struct ConstDbStats {
    /// Total number of slots.
    pub slots: u64,
    /// Number of occupied slots, which is the number of records.
    pub records: u64,
    /// `displacement[d]` counts records stored `d` slots past their ideal
    /// slot; the last bin counts every distance of 10 or more.
    pub displacement: [u64; FAR_DISPLACEMENT + 1],
}

impl ConstDbStats {
    /// Histogram keyed by distance, with `FAR_DISPLACEMENT` standing for
    /// "10 or more". Empty bins are left out.
    pub fn histogram(&self) -> BTreeMap<usize, u64> {
        self.displacement
            .iter()
            .enumerate()
            .filter(|(_, count)| **count > 0)
            .map(|(distance, count)| (distance, *count))
            .collect()
    }
}

impl<R: ConstDbReader> ConstDb<R> {
    /// Walks every slot table and measures how far each record sits from its
    /// ideal slot.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CorruptFormat`] if a stored hash does not belong to
    /// the bucket whose table holds it.
    pub fn stats(&self) -> Result<ConstDbStats> {
        let tables = BoundedReader::new(self.reader(), self.header.end_of_data(), self.file_length);
        let mut stats = ConstDbStats::default();

        for (index, bucket) in self.header.buckets.iter().enumerate() {
            if bucket.length == 0 {
                continue;
            }
            stats.slots += bucket.length as u64;

            let table_bytes = bucket.length as u64 * SLOT_SIZE;
            tables.read(bucket.offset as u64, table_bytes, "slot table", |data| {
                for (slot_index, chunk) in data.chunks_exact(ConstDbSlot::SIZE).enumerate() {
                    let slot = ConstDbSlot::deserialize(chunk);
                    if slot.is_empty() {
                        continue;
                    }
                    if bucket_index(slot.hash) != index {
                        return Err(Error::corrupt(
                            bucket.offset as u64 + slot_index as u64 * SLOT_SIZE,
                            format!("hash {:#010x} stored in bucket {}", slot.hash, index),
                        ));
                    }

                    stats.records += 1;
                    let distance = displacement(slot.hash, slot_index as u32, bucket.length);
                    stats.displacement[(distance as usize).min(FAR_DISPLACEMENT)] += 1;
                }
                Ok(())
            })?;
        }

        Ok(stats)
    }
}
