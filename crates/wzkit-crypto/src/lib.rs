//! Keystream and IV management for WZ archives
//!
//! This crate provides the cryptographic pieces the archive decoder consumes:
//!
//! - **IV selection**: built-in region IVs and runtime-registered ones
//! - **Key provider contract**: [`KeyProvider`] maps an encryption scheme to
//!   the 16-byte IV block the keystream is derived from
//! - **Keystream**: [`WzKeystream`], the AES-derived XOR stream used for
//!   entry names, string values and encrypted bitmap blocks
//!
//! # Examples
//!
//! ```
//! use wzkit_crypto::{IvStore, KeyProvider, MapleVersion, WzKeystream};
//!
//! let store = IvStore::new();
//! let iv = store.iv(&MapleVersion::Gms).unwrap();
//! let mut keystream = WzKeystream::new(&iv);
//!
//! let mut name = *b"Data.wz";
//! keystream.apply(&mut name);
//! keystream.apply(&mut name);
//! assert_eq!(&name, b"Data.wz");
//! ```
//!
//! ## Custom provider
//!
//! ```
//! use wzkit_crypto::{CryptoResult, Iv, KeyProvider, MapleVersion, expand_iv};
//!
//! struct FixedProvider([u8; 4]);
//!
//! impl KeyProvider for FixedProvider {
//!     fn iv(&self, _version: &MapleVersion) -> CryptoResult<Iv> {
//!         Ok(expand_iv(self.0))
//!     }
//! }
//!
//! let provider = FixedProvider([1, 2, 3, 4]);
//! assert_eq!(provider.iv(&MapleVersion::Gms).unwrap()[4..8], [1, 2, 3, 4]);
//! ```

#![warn(missing_docs)]

pub mod error;
pub mod keys;
pub mod keystream;

pub use error::{CryptoError, CryptoResult};

// Re-export commonly used types
pub use keys::{Iv, IvStore, KeyProvider, MapleVersion, expand_iv, parse_iv_hex};
pub use keystream::WzKeystream;
