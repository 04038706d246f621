use thiserror::Error;

/// Errors reported while building or reading a constdb file.
///
/// A missing key is not an error: lookups return `Ok(None)` for it.
#[derive(Debug, Error)]
pub enum Error {
    /// The underlying reader or writer failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// A structural invariant of the file does not hold.
    #[error("corrupt format at offset {offset}: {reason}")]
    CorruptFormat { offset: u64, reason: String },
    /// A key, value or file offset does not fit into a 32-bit field.
    #[error("{what} length {length} exceeds u32::MAX")]
    LengthOverflow { what: &'static str, length: u64 },
}

impl Error {
    pub(crate) fn corrupt(offset: u64, reason: impl Into<String>) -> Self {
        Error::CorruptFormat {
            offset,
            reason: reason.into(),
        }
    }

    /// Returns true for [`Error::CorruptFormat`].
    pub fn is_corrupt(&self) -> bool {
        matches!(self, Error::CorruptFormat { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
