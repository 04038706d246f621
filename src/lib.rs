//! Constant key-value databases: built once, then queried with a couple of
//! positional reads per lookup.
//!
//! A constdb file holds an arbitrary list of byte-string key/value records.
//! [`ConstDbBuilder`] streams the records to disk followed by 256
//! open-addressing slot tables, one per hash bucket, and finally the fixed
//! 2048-byte pointer table at the start of the file. [`ConstDb`] keeps only
//! that pointer table in memory; a lookup hashes the key, reads a few 8-byte
//! slots from the bucket's table and then the record itself.
//!
//! ```text
//! [0, 2048)            256 x (table_offset: u32, table_len: u32)
//! [2048, end_of_data)  records: (key_len: u32, value_len: u32, key, value)
//! [end_of_data, EOF)   slot tables: (hash: u32, record_offset: u32)
//! ```
//!
//! All integers are little-endian. Files are never modified after they are
//! built; a change means building a new file.
//!
//! ```
//! use constdb::{ConstDb, ConstDbBuilder};
//!
//! # fn main() -> constdb::Result<()> {
//! let dir = tempfile::tempdir()?;
//! let path = dir.path().join("fruits.cdb");
//! let entries = [("apple", "red"), ("banana", "yellow"), ("apple", "green")];
//! let file = std::fs::File::create(&path)?;
//! ConstDbBuilder::default().build(&file, entries.iter())?;
//!
//! let db = ConstDb::load(std::fs::File::open(&path)?)?;
//! assert_eq!(db.get(b"banana")?, Some(b"yellow".to_vec()));
//! let apples = db.get_all(b"apple").collect::<constdb::Result<Vec<_>>>()?;
//! assert_eq!(apples, vec![b"red".to_vec(), b"green".to_vec()]);
//! # Ok(())
//! # }
//! ```

/// Number of hash buckets, selected by the low 8 bits of the key hash.
pub const BUCKET_COUNT: usize = 256;
/// Size of the pointer table at the start of every file.
pub const HEADER_SIZE: u64 = BUCKET_COUNT as u64 * 8;
/// Size of one slot in a bucket table.
pub const SLOT_SIZE: u64 = 8;

mod error;
pub use error::{Error, Result};

mod hasher;
pub use hasher::{hash, ConstDbHasher, HASH_START};

mod meta;
pub use meta::{ConstDbBucketMeta, ConstDbHeader, ConstDbInfo};

pub mod record;
pub use record::ConstDbRecord;

pub mod table;
pub use table::ConstDbSlot;

mod reader;
pub use reader::ConstDbReader;

mod writer;
pub use writer::ConstDbWriter;

mod buffer;
pub use buffer::ConstDbBuffer;

mod builder;
pub use builder::ConstDbBuilder;

mod constdb;
pub use constdb::{
    ConstDb, ConstDbCheckReport, ConstDbCursor, ConstDbIter, ConstDbMatch, ConstDbValues,
};

mod stats;
pub use stats::{ConstDbStats, FAR_DISPLACEMENT};
