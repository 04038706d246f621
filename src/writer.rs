use std::io::Result;

/// Trait representing positional writers suitable for constdb serialization.
///
/// Writers must support writing arbitrary byte slices at fixed offsets without
/// altering shared state; this is satisfied by `FileExt` handles on both Unix
/// and Windows.
pub trait ConstDbWriter {
    /// Writes all of `data` at the given absolute `offset`.
    fn write_all_at(&self, data: &[u8], offset: u64) -> Result<()>;
}

#[cfg(unix)]
impl ConstDbWriter for std::fs::File {
    fn write_all_at(&self, data: &[u8], offset: u64) -> Result<()> {
        std::os::unix::fs::FileExt::write_all_at(self, data, offset)
    }
}

#[cfg(windows)]
impl ConstDbWriter for std::fs::File {
    fn write_all_at(&self, mut data: &[u8], mut offset: u64) -> Result<()> {
        use std::os::windows::fs::FileExt;

        while !data.is_empty() {
            let n = self.seek_write(data, offset)?;
            if n == 0 {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::WriteZero,
                    "failed to write whole buffer",
                ));
            }
            data = &data[n..];
            offset += n as u64;
        }
        Ok(())
    }
}

impl<T: ConstDbWriter> ConstDbWriter for &T {
    fn write_all_at(&self, data: &[u8], offset: u64) -> Result<()> {
        (**self).write_all_at(data, offset)
    }
}

/// Thin wrapper implementing [`std::io::Write`] in terms of [`ConstDbWriter`].
///
/// Each write lands at the next consecutive offset, so the builder can stream
/// records and tables through a `BufWriter` and still know where each one
/// starts.
pub(crate) struct ConstDbWriterWrapper<'a, W: ConstDbWriter> {
    inner: &'a W,
    offset: u64,
}

impl<'a, W: ConstDbWriter> ConstDbWriterWrapper<'a, W> {
    pub(crate) fn new(inner: &'a W, offset: u64) -> Self {
        Self { inner, offset }
    }
}

impl<W: ConstDbWriter> std::io::Write for ConstDbWriterWrapper<'_, W> {
    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.inner.write_all_at(buf, self.offset)?;
        self.offset += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}
