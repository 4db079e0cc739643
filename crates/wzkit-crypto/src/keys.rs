//! Encryption scheme selection and IV management
//!
//! Every client region ships its archives keyed by a 4-byte IV. The keystream
//! generator consumes that IV repeated to fill one 16-byte AES block, which is
//! the form handed out by [`KeyProvider`] implementations.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{CryptoError, CryptoResult};

/// Size of the IV block consumed by the keystream generator
pub const IV_SIZE: usize = 16;

/// 16-byte IV block
pub type Iv = [u8; IV_SIZE];

/// Region IV for global clients
pub const GMS_IV: [u8; 4] = [0x4D, 0x23, 0xC7, 0x2B];

/// Region IV for European and South-East Asian clients
pub const EMS_IV: [u8; 4] = [0xB9, 0x7D, 0x63, 0xE9];

/// Region IV for unencrypted clients
pub const BMS_IV: [u8; 4] = [0x00, 0x00, 0x00, 0x00];

/// Encryption scheme an archive was written with
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MapleVersion {
    /// Global client
    #[default]
    Gms,
    /// European / South-East Asian client
    Ems,
    /// Zero-IV client
    Bms,
    /// Pre-encryption client, same keystream as [`MapleVersion::Bms`]
    Classic,
    /// Raw 4-byte IV taken from an external key source
    Custom {
        /// Region IV
        iv: [u8; 4],
    },
    /// IV registered by name in an [`IvStore`]
    Named(String),
}

impl fmt::Display for MapleVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gms => f.write_str("gms"),
            Self::Ems => f.write_str("ems"),
            Self::Bms => f.write_str("bms"),
            Self::Classic => f.write_str("classic"),
            Self::Custom { iv } => write!(f, "custom:{}", hex::encode_upper(iv)),
            Self::Named(name) => write!(f, "named:{name}"),
        }
    }
}

/// Repeat a 4-byte region IV into a full IV block
pub fn expand_iv(iv: [u8; 4]) -> Iv {
    let mut block = [0u8; IV_SIZE];
    for chunk in block.chunks_exact_mut(4) {
        chunk.copy_from_slice(&iv);
    }
    block
}

/// Parse a 4-byte region IV from hex text (`4D23C72B`, optional `0x` prefix)
pub fn parse_iv_hex(text: &str) -> CryptoResult<[u8; 4]> {
    let text = text.trim();
    let text = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .unwrap_or(text);
    let bytes =
        hex::decode(text).map_err(|e| CryptoError::InvalidKeyFormat(format!("invalid hex: {e}")))?;

    let iv: [u8; 4] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| CryptoError::InvalidIvSize {
            expected: 4,
            actual: bytes.len(),
        })?;
    Ok(iv)
}

/// Source of IV blocks for an encryption scheme
///
/// The archive decoder never derives IVs itself; it asks a provider. The
/// default provider is [`IvStore`], which knows the built-in region IVs and
/// any named ones loaded at runtime.
pub trait KeyProvider {
    /// Return the IV block for `version`
    fn iv(&self, version: &MapleVersion) -> CryptoResult<Iv>;
}

impl<T: KeyProvider + ?Sized> KeyProvider for &T {
    fn iv(&self, version: &MapleVersion) -> CryptoResult<Iv> {
        (**self).iv(version)
    }
}

/// In-memory IV table
#[derive(Debug, Clone, Default)]
pub struct IvStore {
    named: HashMap<String, [u8; 4]>,
}

impl IvStore {
    /// Create a store that only knows the built-in region IVs
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a named IV, replacing any previous entry
    pub fn insert(&mut self, name: impl Into<String>, iv: [u8; 4]) {
        self.named.insert(name.into().to_ascii_lowercase(), iv);
    }

    /// Look up a named IV
    pub fn get(&self, name: &str) -> Option<[u8; 4]> {
        self.named.get(&name.to_ascii_lowercase()).copied()
    }

    /// Number of named IVs
    pub fn len(&self) -> usize {
        self.named.len()
    }

    /// Whether no named IVs are registered
    pub fn is_empty(&self) -> bool {
        self.named.is_empty()
    }

    /// Load named IVs from CSV content (format: `name,iv_hex`)
    ///
    /// Lines starting with `#` are comments. Malformed lines are skipped.
    /// Returns the number of IVs loaded.
    ///
    /// ```
    /// use wzkit_crypto::keys::IvStore;
    ///
    /// let mut store = IvStore::new();
    /// let count = store.load_from_csv("# region,iv\nkms,00000000\njms,0x4D23C72B\n");
    /// assert_eq!(count, 2);
    /// ```
    pub fn load_from_csv(&mut self, content: &str) -> usize {
        let mut count = 0;
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((name, iv)) = line.split_once(',') else {
                continue;
            };
            if let Ok(iv) = parse_iv_hex(iv) {
                self.insert(name.trim(), iv);
                count += 1;
            }
        }
        count
    }

    /// Resolve the 4-byte region IV for a scheme
    pub fn region_iv(&self, version: &MapleVersion) -> CryptoResult<[u8; 4]> {
        match version {
            MapleVersion::Gms => Ok(GMS_IV),
            MapleVersion::Ems => Ok(EMS_IV),
            MapleVersion::Bms | MapleVersion::Classic => Ok(BMS_IV),
            MapleVersion::Custom { iv } => Ok(*iv),
            MapleVersion::Named(name) => self
                .get(name)
                .ok_or_else(|| CryptoError::UnknownVersion(name.clone())),
        }
    }
}

impl KeyProvider for IvStore {
    fn iv(&self, version: &MapleVersion) -> CryptoResult<Iv> {
        self.region_iv(version).map(expand_iv)
    }
}
