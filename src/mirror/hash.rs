//! URL hashing and mirror directory naming
//!
//! The hash only seeds the directory name. Uniqueness is enforced by the
//! allocator in [`MirrorMap`](super::map::MirrorMap), so any implementation,
//! including one that returns the same value for every input, is correct.

use sha2::{Digest, Sha256};

/// Prefix of every mirror directory name
pub const DIR_PREFIX: &str = "git-";

/// Suffix of every mirror directory name
pub const DIR_SUFFIX: &str = ".git";

/// Maps a URL to a number used for directory naming
pub trait HashCalculator: Send + Sync {
    /// Hash the given value
    fn hash(&self, value: &str) -> u64;
}

/// Default hash: first eight bytes of the SHA-256 digest
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256Hash;

impl HashCalculator for Sha256Hash {
    fn hash(&self, value: &str) -> u64 {
        let digest = Sha256::digest(value.as_bytes());
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        u64::from_be_bytes(bytes)
    }
}

/// Candidate directory name for a hash and a collision attempt
///
/// Attempt 0 yields `git-XXXXXXXX.git`; later attempts append `-N`.
pub fn candidate_dir_name(hash: u64, attempt: u32) -> String {
    let low = hash & 0xFFFF_FFFF;
    if attempt == 0 {
        format!("{DIR_PREFIX}{low:08X}{DIR_SUFFIX}")
    } else {
        format!("{DIR_PREFIX}{low:08X}-{attempt}{DIR_SUFFIX}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_hash_deterministic() {
        let a = Sha256Hash.hash("git://some.org/repository.git");
        let b = Sha256Hash.hash("git://some.org/repository.git");
        assert_eq!(a, b);
    }

    #[test]
    fn sha256_hash_differs_for_different_urls() {
        let a = Sha256Hash.hash("git://some.org/first.git");
        let b = Sha256Hash.hash("git://some.org/second.git");
        assert_ne!(a, b);
    }

    #[test]
    fn candidate_uses_low_32_bits() {
        assert_eq!(candidate_dir_name(42, 0), "git-0000002A.git");
        assert_eq!(candidate_dir_name(0x1_DEAD_BEEF, 0), "git-DEADBEEF.git");
    }

    #[test]
    fn candidate_appends_attempt() {
        assert_eq!(candidate_dir_name(42, 1), "git-0000002A-1.git");
        assert_eq!(candidate_dir_name(42, 12), "git-0000002A-12.git");
    }
}
