use std::hash::Hasher;

/// Initial accumulator of the key hash.
pub const HASH_START: u32 = 5381;

/// Hashes a key the same way for building and for lookups.
///
/// Each byte updates the accumulator as `acc * 33 ^ byte`, wrapping modulo
/// 2^32. The low 8 bits select the bucket, the remaining 24 bits the start
/// slot inside that bucket's table.
pub fn hash(key: &[u8]) -> u32 {
    let mut hasher = ConstDbHasher::default();
    hasher.write(key);
    hasher.state
}

/// Streaming form of [`hash`].
///
/// Unlike most `Hasher`s it is meant to be fed raw bytes through
/// [`Hasher::write`]; feeding it through `Hash` impls would mix in length
/// prefixes and produce hashes that do not match the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConstDbHasher {
    state: u32,
}

impl Default for ConstDbHasher {
    fn default() -> Self {
        Self { state: HASH_START }
    }
}

impl ConstDbHasher {
    /// Current 32-bit hash value.
    pub fn value(&self) -> u32 {
        self.state
    }
}

impl Hasher for ConstDbHasher {
    fn finish(&self) -> u64 {
        self.state as u64
    }

    fn write(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.state = ((self.state << 5).wrapping_add(self.state)) ^ byte as u32;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_values() {
        assert_eq!(hash(b""), 5381);
        assert_eq!(hash(b"a"), 177604);
        assert_eq!(hash(b"alpha"), 169960529);
        assert_eq!(hash(b"beta"), 2087728727);
    }

    #[test]
    fn test_wraps_on_long_keys() {
        let key = vec![0xffu8; 4096];
        let expected = key.iter().fold(5381u32, |acc, &c| {
            acc.wrapping_mul(33) ^ c as u32
        });
        assert_eq!(hash(&key), expected);
    }

    #[test]
    fn test_streaming_matches_oneshot() {
        let mut hasher = ConstDbHasher::default();
        hasher.write(b"al");
        hasher.write(b"pha");
        assert_eq!(hasher.value(), hash(b"alpha"));
        assert_eq!(hasher.finish(), hash(b"alpha") as u64);
    }

    #[test]
    fn test_distinct_keys_may_collide() {
        assert_ne!(b" a", b"!@");
        assert_eq!(hash(b" a"), hash(b"!@"));
        assert_eq!(hash(b" a"), 5858884);
    }
}
