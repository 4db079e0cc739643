//! AES-derived keystream used for WZ names and bitmap blocks
//!
//! The keystream is produced by repeatedly encrypting the IV block with
//! AES-256 in ECB mode: block 0 is `AES(iv)`, block `n` is `AES(block n-1)`.
//! An all-zero IV marks an unencrypted client and yields an all-zero
//! keystream. Bytes are generated on demand and cached.

use aes::Aes256;
use cipher::generic_array::GenericArray;
use cipher::{BlockEncrypt, KeyInit};
use std::fmt;

use crate::error::{CryptoError, CryptoResult};
use crate::keys::{IV_SIZE, Iv};

/// AES-256 key shared by every client region
pub const USER_KEY: [u8; 32] = [
    0x13, 0x00, 0x00, 0x00, 0x08, 0x00, 0x00, 0x00, 0x06, 0x00, 0x00, 0x00, 0xB4, 0x00, 0x00, 0x00,
    0x1B, 0x00, 0x00, 0x00, 0x0F, 0x00, 0x00, 0x00, 0x33, 0x00, 0x00, 0x00, 0x52, 0x00, 0x00, 0x00,
];

/// Lazily expanded WZ keystream
#[derive(Clone)]
pub struct WzKeystream {
    cipher: Option<Aes256>,
    iv: Iv,
    block: [u8; IV_SIZE],
    bytes: Vec<u8>,
}

impl WzKeystream {
    /// Create a keystream for an IV block using the standard user key
    pub fn new(iv: &Iv) -> Self {
        Self::build(iv, &USER_KEY)
    }

    /// Create a keystream with a non-standard 32-byte AES key
    pub fn with_user_key(iv: &Iv, user_key: &[u8]) -> CryptoResult<Self> {
        let key: &[u8; 32] = user_key
            .try_into()
            .map_err(|_| CryptoError::InvalidKeySize {
                expected: 32,
                actual: user_key.len(),
            })?;
        Ok(Self::build(iv, key))
    }

    fn build(iv: &Iv, user_key: &[u8; 32]) -> Self {
        let cipher = if iv.iter().all(|b| *b == 0) {
            None
        } else {
            Some(Aes256::new(GenericArray::from_slice(user_key)))
        };
        Self {
            cipher,
            iv: *iv,
            block: *iv,
            bytes: Vec::new(),
        }
    }

    /// Whether this keystream is all zeros
    pub fn is_zero(&self) -> bool {
        self.cipher.is_none()
    }

    /// Number of keystream bytes generated so far
    pub fn generated(&self) -> usize {
        self.bytes.len()
    }

    /// Drop every generated byte and restart from the IV block
    ///
    /// Regenerated bytes are identical; only the cached length shrinks.
    pub fn reset(&mut self) {
        self.block = self.iv;
        self.bytes = Vec::new();
    }

    /// Generate at least `len` bytes of keystream
    pub fn ensure(&mut self, len: usize) {
        while self.bytes.len() < len {
            match &self.cipher {
                None => {
                    let target = len.next_multiple_of(IV_SIZE);
                    self.bytes.resize(target, 0);
                }
                Some(cipher) => {
                    let mut block = GenericArray::clone_from_slice(&self.block);
                    cipher.encrypt_block(&mut block);
                    self.block.copy_from_slice(&block);
                    self.bytes.extend_from_slice(&block);
                }
            }
        }
    }

    /// Keystream byte at `index`
    pub fn byte(&mut self, index: usize) -> u8 {
        self.ensure(index + 1);
        self.bytes[index]
    }

    /// Little-endian keystream word starting at byte `2 * index`
    pub fn word(&mut self, index: usize) -> u16 {
        self.ensure(index * 2 + 2);
        u16::from_le_bytes([self.bytes[index * 2], self.bytes[index * 2 + 1]])
    }

    /// XOR `data` with the keystream starting at byte 0
    pub fn apply(&mut self, data: &mut [u8]) {
        self.ensure(data.len());
        for (byte, key) in data.iter_mut().zip(&self.bytes) {
            *byte ^= key;
        }
    }
}

impl fmt::Debug for WzKeystream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WzKeystream")
            .field("zero", &self.is_zero())
            .field("generated", &self.bytes.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::keys::{GMS_IV, expand_iv};
    use proptest::prelude::*;

    #[test]
    fn test_zero_iv_yields_zero_keystream() {
        let mut ks = WzKeystream::new(&[0u8; 16]);
        assert!(ks.is_zero());
        let mut data = *b"plain";
        ks.apply(&mut data);
        assert_eq!(&data, b"plain");
        assert_eq!(ks.byte(100), 0);
    }

    #[test]
    fn test_blocks_chain_from_previous_output() {
        let iv = expand_iv(GMS_IV);
        let mut ks = WzKeystream::new(&iv);
        ks.ensure(32);

        let cipher = Aes256::new(GenericArray::from_slice(&USER_KEY));
        let mut first = GenericArray::clone_from_slice(&iv);
        cipher.encrypt_block(&mut first);
        let mut second = first;
        cipher.encrypt_block(&mut second);

        assert_eq!(&ks.bytes[..16], first.as_slice());
        assert_eq!(&ks.bytes[16..32], second.as_slice());
    }

    #[test]
    fn test_reset_releases_cache_and_regenerates_same_bytes() {
        let mut ks = WzKeystream::new(&expand_iv(GMS_IV));
        ks.ensure(4096);
        let head: Vec<u8> = (0..40).map(|i| ks.byte(i)).collect();

        ks.reset();
        assert_eq!(ks.generated(), 0);
        let again: Vec<u8> = (0..40).map(|i| ks.byte(i)).collect();
        assert_eq!(again, head);
        assert_eq!(ks.generated(), 48);
    }

    #[test]
    fn test_with_user_key_checks_size() {
        let result = WzKeystream::with_user_key(&[1u8; 16], &[0u8; 16]);
        assert!(matches!(
            result,
            Err(CryptoError::InvalidKeySize {
                expected: 32,
                actual: 16
            })
        ));
    }

    proptest! {
        #[test]
        fn prop_apply_is_involution(data in proptest::collection::vec(any::<u8>(), 0..200)) {
            let mut ks = WzKeystream::new(&expand_iv(GMS_IV));
            let mut buf = data.clone();
            ks.apply(&mut buf);
            ks.apply(&mut buf);
            prop_assert_eq!(buf, data);
        }

        #[test]
        fn prop_word_matches_bytes(index in 0usize..256) {
            let mut ks = WzKeystream::new(&expand_iv(GMS_IV));
            let word = ks.word(index);
            let lo = ks.byte(index * 2);
            let hi = ks.byte(index * 2 + 1);
            prop_assert_eq!(word, u16::from_le_bytes([lo, hi]));
        }
    }
}
