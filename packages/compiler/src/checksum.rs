//! Running content digest of a parsed source.
//!
//! The tokenizer feeds the digest block by block as it consumes the text;
//! the build layer uses the final value as a file identity that does not
//! depend on timestamps.

use xxhash_rust::xxh3::{xxh3_128, Xxh3};

pub const BLOCK_SIZE: usize = 8192;

pub struct SourceChecksum {
    hasher: Xxh3,
    fed: usize,
}

impl SourceChecksum {
    pub fn new() -> Self {
        SourceChecksum {
            hasher: Xxh3::new(),
            fed: 0,
        }
    }

    /// Feed every complete block of `source` that lies before `consumed`.
    pub fn advance(&mut self, source: &[u8], consumed: usize) {
        while self.fed + BLOCK_SIZE <= consumed.min(source.len()) {
            self.hasher.update(&source[self.fed..self.fed + BLOCK_SIZE]);
            self.fed += BLOCK_SIZE;
        }
    }

    /// Feed the remainder of `source` and return the digest as hex.
    pub fn finish(&mut self, source: &[u8]) -> String {
        self.advance(source, source.len());
        if self.fed < source.len() {
            self.hasher.update(&source[self.fed..]);
            self.fed = source.len();
        }
        format!("{:032x}", self.hasher.digest128())
    }
}

impl Default for SourceChecksum {
    fn default() -> Self {
        Self::new()
    }
}

/// One-shot digest of a whole text, identical to what a full parse reports.
pub fn content_hash(text: &str) -> String {
    format!("{:032x}", xxh3_128(text.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_streamed_digest_matches_one_shot() {
        let text = "abc".repeat(10_000);
        let mut checksum = SourceChecksum::new();
        checksum.advance(text.as_bytes(), 9000);
        checksum.advance(text.as_bytes(), 20_000);
        assert_eq!(checksum.finish(text.as_bytes()), content_hash(&text));
    }

    #[test]
    fn test_empty_source() {
        let mut checksum = SourceChecksum::new();
        assert_eq!(checksum.finish(b""), content_hash(""));
    }
}
