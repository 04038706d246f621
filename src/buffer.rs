use std::io::{Error, ErrorKind};
use std::sync::{PoisonError, RwLock};

use crate::{ConstDbReader, ConstDbWriter, Result};

/// In-memory constdb image.
///
/// Implements both [`ConstDbWriter`] and [`ConstDbReader`], so a database can
/// be built into memory and queried without touching the filesystem.
///
/// ```
/// use constdb::{ConstDb, ConstDbBuffer, ConstDbBuilder};
///
/// # fn main() -> constdb::Result<()> {
/// let buffer = ConstDbBuffer::default();
/// ConstDbBuilder::default().build(&buffer, [("key", "value")].iter())?;
/// let db = ConstDb::load(buffer)?;
/// assert_eq!(db.get(b"key")?, Some(b"value".to_vec()));
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct ConstDbBuffer {
    data: RwLock<Vec<u8>>,
}

impl ConstDbBuffer {
    pub fn into_inner(self) -> Vec<u8> {
        self.data
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Copies the current contents.
    pub fn to_vec(&self) -> Vec<u8> {
        self.data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl From<Vec<u8>> for ConstDbBuffer {
    fn from(data: Vec<u8>) -> Self {
        Self {
            data: RwLock::new(data),
        }
    }
}

impl ConstDbWriter for ConstDbBuffer {
    fn write_all_at(&self, buf: &[u8], offset: u64) -> std::io::Result<()> {
        let mut data = self.data.write().unwrap_or_else(PoisonError::into_inner);
        let offset = offset as usize;
        if data.len() < offset + buf.len() {
            data.resize(offset + buf.len(), 0);
        }
        data[offset..offset + buf.len()].copy_from_slice(buf);
        Ok(())
    }
}

impl ConstDbReader for ConstDbBuffer {
    fn length(&self) -> std::io::Result<u64> {
        Ok(self.data.read().unwrap_or_else(PoisonError::into_inner).len() as u64)
    }

    fn read_exact_at<F, R>(&self, offset: u64, length: u64, f: F) -> Result<R>
    where
        F: FnOnce(&[u8]) -> Result<R>,
    {
        let data = self.data.read().unwrap_or_else(PoisonError::into_inner);
        let end = offset.checked_add(length).unwrap_or(u64::MAX);
        if end > data.len() as u64 {
            return Err(Error::new(ErrorKind::UnexpectedEof, "Failed to read enough bytes").into());
        }
        f(&data[offset as usize..end as usize])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_positional_writes() {
        let buffer = ConstDbBuffer::default();
        buffer.write_all_at(b"world", 6).unwrap();
        buffer.write_all_at(b"hello ", 0).unwrap();
        assert_eq!(buffer.length().unwrap(), 11);
        assert_eq!(buffer.to_vec(), b"hello world");

        let word = buffer.read_exact_at(0, 5, |data| Ok(data.to_vec())).unwrap();
        assert_eq!(word, b"hello");
        buffer
            .read_exact_at(8, 4, |data| Ok(data.to_vec()))
            .unwrap_err();
        assert_eq!(buffer.into_inner(), b"hello world");
    }
}
