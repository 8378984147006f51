//! Feedback code token generation.
//!
//! Tokens are drawn from an alphabet without visually confusable
//! characters (no I, O, 0, 1): 32 symbols, so a 6-character token has
//! 32^6 ≈ 1.07e9 combinations. No uniqueness check is made against
//! codes already in the store.
//!
//! Production generators are seeded from OS entropy; tests seed
//! explicitly so generated tokens are reproducible.

use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64Mcg;

pub const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
pub const DEFAULT_CODE_LENGTH: usize = 6;

pub struct CodeGenerator {
    inner: Pcg64Mcg,
}

impl CodeGenerator {
    /// Seed from the thread RNG.
    pub fn from_entropy() -> Self {
        Self::with_seed(rand::random::<u64>())
    }

    /// Deterministic generator for tests.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            inner: Pcg64Mcg::seed_from_u64(seed),
        }
    }

    /// Draw a token of `len` characters from `CODE_ALPHABET`.
    pub fn next_token(&mut self, len: usize) -> String {
        (0..len)
            .map(|_| CODE_ALPHABET[self.inner.gen_range(0..CODE_ALPHABET.len())] as char)
            .collect()
    }
}

/// Whether `token` could have been produced by `CodeGenerator`.
pub fn is_well_formed(token: &str, len: usize) -> bool {
    token.len() == len && token.bytes().all(|b| CODE_ALPHABET.contains(&b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_deterministic_per_seed() {
        let mut a = CodeGenerator::with_seed(12345);
        let mut b = CodeGenerator::with_seed(12345);
        assert_eq!(a.next_token(6), b.next_token(6), "Same seed should produce same token");
    }

    #[test]
    fn tokens_use_only_unambiguous_symbols() {
        let mut generator = CodeGenerator::with_seed(7);
        for _ in 0..200 {
            let token = generator.next_token(DEFAULT_CODE_LENGTH);
            assert!(is_well_formed(&token, DEFAULT_CODE_LENGTH), "bad token {token}");
            assert!(!token.contains(['I', 'O', '0', '1']), "confusable symbol in {token}");
        }
    }

    #[test]
    fn alphabet_has_32_symbols() {
        assert_eq!(CODE_ALPHABET.len(), 32);
    }
}
