use std::fmt;

/// A 32-byte BLAKE3 digest used as the fingerprint of a plug's value.
///
/// In `plugwork`, this serves two purposes:
/// 1. It is the change-detection signal: two evaluations of a plug that
///    produce the same `Hash32` are assumed to produce the same value.
/// 2. It is the second half of every compute cache key, so identical inputs
///    never recompute.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct Hash32([u8; 32]);

impl<T> From<T> for Hash32
where
    T: Into<[u8; 32]>,
{
    fn from(value: T) -> Self {
        Hash32(value.into())
    }
}

impl Hash32 {
    /// Digest of a byte buffer.
    pub fn hash(buffer: impl AsRef<[u8]>) -> Self {
        blake3::Hasher::new()
            .update(buffer.as_ref())
            .finalize()
            .into()
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(self) -> String {
        const HEX: &[u8; 16] = b"0123456789abcdef";
        let mut acc = String::with_capacity(64);

        for &byte in self.0.iter() {
            acc.push(HEX[(byte >> 4) as usize] as char);
            acc.push(HEX[(byte & 0xF) as usize] as char);
        }

        acc
    }
}

impl fmt::Debug for Hash32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash32({})", self.to_hex())
    }
}

impl fmt::Display for Hash32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form, enough to tell hashes apart in logs.
        f.write_str(&self.to_hex()[..16])
    }
}

/// Incremental fingerprint builder.
///
/// Every `append_*` method writes a length or a fixed-width encoding so that
/// adjacent fields cannot run into each other ("ab" + "c" differs from
/// "a" + "bc"). The builder also implements [`std::hash::Hasher`], which lets
/// any `#[derive(Hash)]` type be folded into a fingerprint.
#[derive(Default, Clone)]
pub struct Blake3Hasher(blake3::Hasher);

impl Blake3Hasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.0.update(&(bytes.len() as u64).to_le_bytes());
        self.0.update(bytes);
        self
    }

    pub fn append_str(&mut self, value: &str) -> &mut Self {
        self.append_bytes(value.as_bytes())
    }

    pub fn append_u64(&mut self, value: u64) -> &mut Self {
        self.0.update(&value.to_le_bytes());
        self
    }

    pub fn append_i64(&mut self, value: i64) -> &mut Self {
        self.0.update(&value.to_le_bytes());
        self
    }

    pub fn append_f32(&mut self, value: f32) -> &mut Self {
        self.0.update(&value.to_bits().to_le_bytes());
        self
    }

    pub fn append_bool(&mut self, value: bool) -> &mut Self {
        self.0.update(&[value as u8]);
        self
    }

    pub fn append_hash(&mut self, value: Hash32) -> &mut Self {
        self.0.update(value.as_bytes());
        self
    }

    pub fn finish_hash(&self) -> Hash32 {
        let bytes: [u8; 32] = self.0.finalize().into();
        Hash32::from(bytes)
    }
}

impl From<Blake3Hasher> for Hash32 {
    fn from(value: Blake3Hasher) -> Self {
        value.finish_hash()
    }
}

impl std::hash::Hasher for Blake3Hasher {
    fn finish(&self) -> u64 {
        let mut output = [0u8; 8];
        self.0.finalize_xof().fill(&mut output);
        u64::from_le_bytes(output)
    }

    fn write(&mut self, bytes: &[u8]) {
        self.0.update(bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_deterministic() {
        let a = Hash32::hash(b"plug");
        let b = Hash32::hash(b"plug");
        assert_eq!(a, b);
        assert_ne!(a, Hash32::hash(b"plugs"));
    }

    #[test]
    fn test_hex() {
        let hex = Hash32::default().to_hex();
        assert_eq!(hex.len(), 64);
        assert!(hex.chars().all(|c| c == '0'));
    }

    #[test]
    fn test_append_is_length_prefixed() {
        let mut a = Blake3Hasher::new();
        a.append_str("ab").append_str("c");
        let mut b = Blake3Hasher::new();
        b.append_str("a").append_str("bc");
        assert_ne!(a.finish_hash(), b.finish_hash());
    }

    #[test]
    fn test_std_hash_adapter() {
        use std::hash::Hash;

        let mut a = Blake3Hasher::new();
        (1u32, "x").hash(&mut a);
        let mut b = Blake3Hasher::new();
        (1u32, "x").hash(&mut b);
        assert_eq!(Hash32::from(a), Hash32::from(b));
    }
}
