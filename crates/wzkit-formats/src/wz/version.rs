//! Game version recovery
//!
//! Archives store a one-byte-wide marker derived from the client's real
//! version, never the version itself. The real version matters because its
//! hash keys every directory offset. Recovery walks the candidate range,
//! keeps versions whose hash reproduces the marker, and confirms each by
//! decoding the root directory and checking the locator byte of the first
//! image it finds.

use std::io::{Read, Seek};
use tracing::{debug, info, trace, warn};
use wzkit_crypto::Iv;

use crate::wz::directory::DirectoryTree;
use crate::wz::error::{WzError, WzResult};
use crate::wz::image::{LOCATOR_COMPRESSED, LOCATOR_PLAIN};
use crate::wz::reader::WzReader;

/// Fold a real version's decimal digits into the 32-bit version hash
pub fn version_hash(version: i16) -> u32 {
    version
        .to_string()
        .bytes()
        .fold(0u32, |hash, digit| {
            hash.wrapping_mul(32)
                .wrapping_add(u32::from(digit))
                .wrapping_add(1)
        })
}

/// Marker a version hash is stored as
pub fn marker_for_hash(hash: u32) -> u16 {
    let [b0, b1, b2, b3] = hash.to_be_bytes();
    u16::from(0xFF ^ b0 ^ b1 ^ b2 ^ b3)
}

/// Marker stored by archives of `version`
pub fn marker_for_version(version: i16) -> u16 {
    marker_for_hash(version_hash(version))
}

/// Hash of `version` if it is a valid candidate for `marker`
///
/// Rejects versions whose hash does not reproduce the marker and the
/// degenerate zero hash.
pub fn candidate_hash(marker: u16, version: i16) -> Option<u32> {
    let hash = version_hash(version);
    (hash != 0 && marker_for_hash(hash) == marker).then_some(hash)
}

/// Version parameters fixed for the lifetime of an opened archive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionContext {
    /// Marker as stored in the archive
    pub marker: u16,
    /// Recovered or supplied real version
    pub game_version: i16,
    /// Hash keying offset decoding
    pub hash: u32,
    /// IV block the keystream is derived from
    pub iv: Iv,
}

impl VersionContext {
    /// Whether the hash reproduces the stored marker
    ///
    /// Always true for brute-forced versions; a supplied version may not match.
    pub fn is_consistent(&self) -> bool {
        self.hash != 0 && marker_for_hash(self.hash) == self.marker
    }
}

/// Read the marker at the current position and fix the version context
///
/// With `game_version` set the hash is derived directly and not validated.
/// Otherwise every version in `0..=max_version` is tried in order; the first
/// one passing the marker check, a trial root decode and the locator check
/// wins. The stream is left right after the marker in both cases.
pub fn resolve_version<R: Read + Seek>(
    reader: &mut WzReader<R>,
    archive_name: &str,
    iv: Iv,
    game_version: Option<i16>,
    max_version: i16,
) -> WzResult<VersionContext> {
    let marker_pos = reader.position()?;
    let marker = reader
        .read_u16()
        .map_err(|e| WzError::structural(marker_pos, e.to_string()))?;

    if let Some(game_version) = game_version {
        let hash = version_hash(game_version);
        let context = VersionContext {
            marker,
            game_version,
            hash,
            iv,
        };
        if !context.is_consistent() {
            warn!(
                marker,
                game_version, "supplied game version does not reproduce the stored marker"
            );
        }
        reader.set_hash(hash);
        return Ok(context);
    }

    for version in 0..=max_version.max(0) {
        let Some(hash) = candidate_hash(marker, version) else {
            continue;
        };
        trace!(version, hash, "trying candidate version");

        if trial_decode(reader, archive_name, hash)? {
            info!(marker, version, hash, "detected game version");
            reader.set_hash(hash);
            return Ok(VersionContext {
                marker,
                game_version: version,
                hash,
                iv,
            });
        }
    }

    reader.set_hash(0);
    Err(WzError::VersionDetection { marker })
}

/// Decode the root directory under `hash` and validate the first image's locator
///
/// Returns `Ok(false)` for a rejected candidate. Only I/O failures of the
/// underlying stream escape as errors. The stream position is restored in
/// every case.
fn trial_decode<R: Read + Seek>(
    reader: &mut WzReader<R>,
    archive_name: &str,
    hash: u32,
) -> WzResult<bool> {
    let previous_hash = reader.hash();
    reader.set_hash(hash);

    let outcome = reader.with_restore(|r| -> WzResult<bool> {
        let tree = match DirectoryTree::decode(r, archive_name) {
            Ok(tree) => tree,
            Err(WzError::Io(e)) => return Err(WzError::Io(e)),
            Err(e) => {
                debug!(hash, error = %e, "candidate rejected by trial decode");
                return Ok(false);
            }
        };

        let Some(image) = tree.first_image() else {
            debug!(hash, "candidate rejected: no image to validate against");
            return Ok(false);
        };

        let offset = u64::from(tree.image(image).offset);
        r.seek(offset)?;
        let Ok(locator) = r.read_u8() else {
            return Ok(false);
        };
        let accepted = matches!(locator, LOCATOR_PLAIN | LOCATOR_COMPRESSED);
        if !accepted {
            debug!(hash, locator, "candidate rejected by locator byte");
        }
        Ok(accepted)
    });

    reader.set_hash(previous_hash);
    outcome
}
