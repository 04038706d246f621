use crate::BUCKET_COUNT;

/// A cell of a bucket's open-addressing table.
///
/// `offset == 0` marks an empty slot; records never start before the header
/// ends, so zero cannot be a real record offset.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ConstDbSlot {
    pub hash: u32,
    pub offset: u32,
}

impl ConstDbSlot {
    pub const SIZE: usize = 8;

    pub fn is_empty(&self) -> bool {
        self.offset == 0
    }

    pub fn serialize(&self) -> [u8; Self::SIZE] {
        let mut data = [0u8; Self::SIZE];
        data[..4].copy_from_slice(&self.hash.to_le_bytes());
        data[4..].copy_from_slice(&self.offset.to_le_bytes());
        data
    }

    pub fn deserialize(data: &[u8]) -> Self {
        let (hash, offset) = crate::reader::unpack_pair(data);
        Self { hash, offset }
    }
}

/// Bucket selected by a key hash.
pub fn bucket_index(hash: u32) -> usize {
    (hash as usize) % BUCKET_COUNT
}

/// Ideal slot of a hash inside a table of `table_len` slots.
pub fn start_slot(hash: u32, table_len: u32) -> u32 {
    (hash >> 8) % table_len
}

/// Lays out one bucket's slot table with linear probing.
///
/// Entries are `(hash, record_offset)` pairs in insertion order; each is
/// placed in the first empty slot at or after its ideal slot, wrapping at the
/// end. Earlier entries therefore always sit earlier on a probe chain than
/// later entries with the same start, which is what lets lookups return
/// duplicate keys in insertion order.
pub fn layout(entries: &[(u32, u32)], table_len: u32) -> Vec<ConstDbSlot> {
    assert!(
        table_len as usize >= entries.len() && table_len > 0,
        "table of {} slots cannot hold {} entries",
        table_len,
        entries.len()
    );

    let mut slots = vec![ConstDbSlot::default(); table_len as usize];
    for &(hash, offset) in entries {
        let mut slot = start_slot(hash, table_len) as usize;
        while !slots[slot].is_empty() {
            slot += 1;
            if slot == slots.len() {
                slot = 0;
            }
        }
        slots[slot] = ConstDbSlot { hash, offset };
    }
    slots
}

/// Distance between a slot's position and its ideal position, wrapping.
pub fn displacement(hash: u32, slot: u32, table_len: u32) -> u32 {
    let start = start_slot(hash, table_len);
    if slot >= start {
        slot - start
    } else {
        table_len - start + slot
    }
}
