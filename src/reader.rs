use std::io::Result as IoResult;

use crate::{Error, Result};

/// Trait abstracting read access to constdb files.
///
/// Implementations must support positional reads without mutating shared
/// state, so a single source can serve lookups from several threads.
pub trait ConstDbReader {
    /// Total number of readable bytes.
    fn length(&self) -> IoResult<u64>;

    /// Reads `length` bytes starting at `offset` and forwards them to `f`.
    ///
    /// Implementations should return an error whenever the requested range
    /// cannot be satisfied in full.
    fn read_exact_at<F, R>(&self, offset: u64, length: u64, f: F) -> Result<R>
    where
        F: FnOnce(&[u8]) -> Result<R>;
}

impl ConstDbReader for std::fs::File {
    fn length(&self) -> IoResult<u64> {
        Ok(self.metadata()?.len())
    }

    #[cfg(unix)]
    fn read_exact_at<F, R>(&self, offset: u64, length: u64, f: F) -> Result<R>
    where
        F: FnOnce(&[u8]) -> Result<R>,
    {
        use std::os::unix::fs::FileExt;

        let mut buffer = vec![0u8; length as usize];
        FileExt::read_exact_at(self, &mut buffer, offset)?;
        f(&buffer)
    }

    #[cfg(windows)]
    fn read_exact_at<F, R>(&self, offset: u64, length: u64, f: F) -> Result<R>
    where
        F: FnOnce(&[u8]) -> Result<R>,
    {
        use std::os::windows::fs::FileExt;

        let mut buffer = vec![0u8; length as usize];
        let mut filled = 0;
        while filled < buffer.len() {
            let n = self.seek_read(&mut buffer[filled..], offset + filled as u64)?;
            if n == 0 {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "Failed to read enough bytes",
                )
                .into());
            }
            filled += n;
        }
        f(&buffer)
    }
}

impl<T: ConstDbReader> ConstDbReader for &T {
    fn length(&self) -> IoResult<u64> {
        (**self).length()
    }

    fn read_exact_at<F, R>(&self, offset: u64, length: u64, f: F) -> Result<R>
    where
        F: FnOnce(&[u8]) -> Result<R>,
    {
        (**self).read_exact_at(offset, length, f)
    }
}

/// A reader restricted to `[start, end)`.
///
/// Every length read from disk goes through [`read`](Self::read) before it is
/// trusted, so an oversized or truncated field is reported as
/// [`Error::CorruptFormat`] instead of turning into an out-of-range read.
pub(crate) struct BoundedReader<'a, R: ConstDbReader> {
    inner: &'a R,
    start: u64,
    end: u64,
}

impl<'a, R: ConstDbReader> BoundedReader<'a, R> {
    pub(crate) fn new(inner: &'a R, start: u64, end: u64) -> Self {
        Self { inner, start, end }
    }

    pub(crate) fn end(&self) -> u64 {
        self.end
    }

    /// Bytes available between `offset` and the end boundary.
    pub(crate) fn remaining(&self, offset: u64) -> u64 {
        self.end.saturating_sub(offset)
    }

    /// Fails unless `[offset, offset + length)` lies inside the bounds.
    pub(crate) fn check(&self, offset: u64, length: u64, what: &str) -> Result<()> {
        if offset < self.start {
            return Err(Error::corrupt(
                offset,
                format!("{} starts before boundary {}", what, self.start),
            ));
        }
        if self.remaining(offset) < length {
            return Err(Error::corrupt(
                offset,
                format!(
                    "{} needs {} bytes, only {} left before {}",
                    what,
                    length,
                    self.remaining(offset),
                    self.end
                ),
            ));
        }
        Ok(())
    }

    pub(crate) fn read<F, T>(&self, offset: u64, length: u64, what: &str, f: F) -> Result<T>
    where
        F: FnOnce(&[u8]) -> Result<T>,
    {
        self.check(offset, length, what)?;
        if length == 0 {
            return f(&[]);
        }
        self.inner.read_exact_at(offset, length, f)
    }

    pub(crate) fn read_bytes(&self, offset: u64, length: u64, what: &str) -> Result<Vec<u8>> {
        self.read(offset, length, what, |data| Ok(data.to_vec()))
    }

    /// Reads two consecutive little-endian `u32`s.
    pub(crate) fn read_pair(&self, offset: u64, what: &str) -> Result<(u32, u32)> {
        self.read(offset, 8, what, |data| Ok(unpack_pair(data)))
    }
}

pub(crate) fn unpack_pair(data: &[u8]) -> (u32, u32) {
    (
        u32::from_le_bytes([data[0], data[1], data[2], data[3]]),
        u32::from_le_bytes([data[4], data[5], data[6], data[7]]),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ConstDbBuffer;

    #[test]
    fn test_bounded_reads() {
        let buffer = ConstDbBuffer::from((0u8..32).collect::<Vec<_>>());
        let bounded = BoundedReader::new(&buffer, 4, 20);

        assert_eq!(bounded.read_bytes(4, 4, "test").unwrap(), vec![4, 5, 6, 7]);
        assert_eq!(bounded.read_bytes(20, 0, "test").unwrap(), Vec::<u8>::new());
        assert_eq!(bounded.remaining(18), 2);
        assert_eq!(bounded.remaining(25), 0);

        assert!(bounded.read_bytes(0, 4, "test").unwrap_err().is_corrupt());
        assert!(bounded.read_bytes(16, 5, "test").unwrap_err().is_corrupt());
        assert!(bounded.read_pair(14, "test").unwrap_err().is_corrupt());
        assert_eq!(
            bounded.read_pair(12, "test").unwrap(),
            (
                u32::from_le_bytes([12, 13, 14, 15]),
                u32::from_le_bytes([16, 17, 18, 19])
            )
        );
    }

    #[test]
    fn test_file_reader() {
        use std::io::Write;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reader.bin");
        std::fs::File::create(&path)
            .unwrap()
            .write_all(b"hello world")
            .unwrap();

        let file = std::fs::File::open(&path).unwrap();
        assert_eq!(file.length().unwrap(), 11);
        let word = file
            .read_exact_at(6, 5, |data| Ok(data.to_vec()))
            .unwrap();
        assert_eq!(word, b"world");

        let err = file.read_exact_at(6, 6, |data| Ok(data.to_vec())).unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}
