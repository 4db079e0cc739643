//! Deferred canvas bitmaps and sound payloads
//!
//! Property parsing only records where payload bytes live. Pixel data is
//! read back through the owning archive on [`Bitmap::decode`], so a
//! released archive makes every outstanding bitmap fail with
//! [`WzError::UseAfterDispose`].

use flate2::read::ZlibDecoder;
use image::RgbaImage;
use std::fmt;
use std::io::Read;
use std::sync::{Arc, Weak};
use tracing::trace;
use wzkit_crypto::WzKeystream;

use crate::wz::archive::ArchiveInner;
use crate::wz::error::{WzError, WzResult};

/// 16-bit BGRA, 4 bits per channel
pub const FORMAT_BGRA4444: u32 = 1;
/// 32-bit BGRA
pub const FORMAT_BGRA8888: u32 = 2;
/// 16-bit RGB565
pub const FORMAT_RGB565: u32 = 513;
/// One RGB565 color per 16x16 pixel block
pub const FORMAT_RGB565_BLOCK: u32 = 517;

/// Second byte of the zlib headers that mark unencrypted pixel data
const ZLIB_LEVELS: [u8; 4] = [0x01, 0x5E, 0x9C, 0xDA];

/// Where the bytes of a payload live
#[derive(Debug, Clone)]
pub(crate) enum BlobLocation {
    /// Absolute offset in the archive stream
    File,
    /// Offset into an inflated image body
    Inline(Arc<[u8]>),
}

/// Reference to payload bytes owned by an archive
#[derive(Clone)]
pub struct BlobRef {
    pub(crate) location: BlobLocation,
    pub(crate) offset: u64,
    pub(crate) length: usize,
    pub(crate) archive: Weak<ArchiveInner>,
}

impl BlobRef {
    /// Offset of the payload in its backing buffer
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Payload length in bytes
    pub fn len(&self) -> usize {
        self.length
    }

    /// Whether the payload is empty
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Whether the payload lives inside a compressed image body
    pub fn is_inline(&self) -> bool {
        matches!(self.location, BlobLocation::Inline(_))
    }

    fn archive(&self) -> WzResult<Arc<ArchiveInner>> {
        let archive = self.archive.upgrade().ok_or(WzError::UseAfterDispose)?;
        archive.ensure_live()?;
        Ok(archive)
    }

    /// Read the payload bytes
    pub fn read(&self) -> WzResult<Vec<u8>> {
        let archive = self.archive()?;
        match &self.location {
            BlobLocation::File => archive.read_range(self.offset, self.length),
            BlobLocation::Inline(buffer) => {
                let start = self.offset as usize;
                buffer
                    .get(start..start + self.length)
                    .map(<[u8]>::to_vec)
                    .ok_or_else(|| {
                        WzError::property(self.offset, "payload outside inflated image body")
                    })
            }
        }
    }

    fn with_keystream<T>(&self, f: impl FnOnce(&mut WzKeystream) -> T) -> WzResult<T> {
        Ok(self.archive()?.with_keystream(f))
    }
}

impl fmt::Debug for BlobRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlobRef")
            .field("inline", &self.is_inline())
            .field("offset", &self.offset)
            .field("length", &self.length)
            .finish_non_exhaustive()
    }
}

impl PartialEq for BlobRef {
    fn eq(&self, other: &Self) -> bool {
        self.offset == other.offset
            && self.length == other.length
            && self.is_inline() == other.is_inline()
            && Weak::ptr_eq(&self.archive, &other.archive)
    }
}

/// Bitmap embedded in a canvas property
#[derive(Debug, Clone, PartialEq)]
pub struct Bitmap {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Effective pixel format (format plus format2)
    pub format: u32,
    /// Stored, still compressed pixel data
    pub data: BlobRef,
}

impl Bitmap {
    /// Read, decrypt and inflate the pixel data, then convert it to RGBA8
    pub fn decode(&self) -> WzResult<RgbaImage> {
        let raw = self.data.read()?;
        let compressed = if is_zlib(&raw) {
            raw
        } else {
            self.data
                .with_keystream(|keystream| unwrap_blocks(&raw, keystream))?
                .ok_or_else(|| WzError::property(self.data.offset, "truncated encrypted block"))?
        };

        let mut pixels = Vec::new();
        ZlibDecoder::new(compressed.as_slice())
            .read_to_end(&mut pixels)
            .map_err(|e| {
                WzError::property(self.data.offset, format!("pixel data inflate failed: {e}"))
            })?;
        trace!(
            width = self.width,
            height = self.height,
            format = self.format,
            inflated = pixels.len(),
            "inflated bitmap"
        );

        to_rgba(self.width, self.height, self.format, &pixels)?.ok_or_else(|| {
            WzError::property(
                self.data.offset,
                format!(
                    "{} bytes of pixel data do not cover {}x{} format {}",
                    pixels.len(),
                    self.width,
                    self.height,
                    self.format
                ),
            )
        })
    }
}

/// Sound payload of a `Sound_DX8` property
#[derive(Debug, Clone, PartialEq)]
pub struct Sound {
    /// Play length in milliseconds
    pub duration_ms: i32,
    /// Media type header followed by the wave format block
    pub header: Vec<u8>,
    /// Encoded audio data
    pub data: BlobRef,
}

impl Sound {
    /// Read the encoded audio data
    pub fn read_data(&self) -> WzResult<Vec<u8>> {
        self.data.read()
    }
}

fn is_zlib(data: &[u8]) -> bool {
    matches!(data, [0x78, level, ..] if ZLIB_LEVELS.contains(level))
}

/// Join i32-length-prefixed blocks, each XOR'd with the keystream from byte 0
fn unwrap_blocks(data: &[u8], keystream: &mut WzKeystream) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(data.len());
    let mut rest = data;
    while !rest.is_empty() {
        let (len, tail) = rest.split_first_chunk::<4>()?;
        let len = usize::try_from(i32::from_le_bytes(*len)).ok()?;
        let block = tail.get(..len)?;
        let start = out.len();
        out.extend_from_slice(block);
        keystream.apply(&mut out[start..]);
        rest = &tail[len..];
    }
    Some(out)
}

fn expand4(v: u8) -> u8 {
    (v << 4) | v
}

fn rgb565(value: u16) -> [u8; 4] {
    let r = ((value >> 11) & 0x1F) as u8;
    let g = ((value >> 5) & 0x3F) as u8;
    let b = (value & 0x1F) as u8;
    [(r << 3) | (r >> 2), (g << 2) | (g >> 4), (b << 3) | (b >> 2), 0xFF]
}

/// Convert inflated pixel data; `Ok(None)` if it is too short
///
/// Every length derived from the descriptor is checked against `pixels`
/// before anything is allocated, so oversized dimensions fail cleanly.
fn to_rgba(width: u32, height: u32, format: u32, pixels: &[u8]) -> WzResult<Option<RgbaImage>> {
    let count = (width as usize).checked_mul(height as usize);
    let needed = match format {
        FORMAT_BGRA4444 | FORMAT_RGB565 => count.and_then(|c| c.checked_mul(2)),
        FORMAT_BGRA8888 => count.and_then(|c| c.checked_mul(4)),
        FORMAT_RGB565_BLOCK => (width.div_ceil(16) as usize)
            .checked_mul(height.div_ceil(16) as usize)
            .and_then(|blocks| blocks.checked_mul(2)),
        other => return Err(WzError::UnsupportedPixelFormat(other)),
    };
    let (Some(data), Some(out_len)) = (
        needed.and_then(|len| pixels.get(..len)),
        count.and_then(|c| c.checked_mul(4)),
    ) else {
        return Ok(None);
    };
    let mut out = Vec::with_capacity(out_len);

    match format {
        FORMAT_BGRA4444 => {
            for px in data.chunks_exact(2) {
                let (lo, hi) = (px[0], px[1]);
                out.extend_from_slice(&[
                    expand4(hi & 0x0F),
                    expand4(lo >> 4),
                    expand4(lo & 0x0F),
                    expand4(hi >> 4),
                ]);
            }
        }
        FORMAT_BGRA8888 => {
            for px in data.chunks_exact(4) {
                out.extend_from_slice(&[px[2], px[1], px[0], px[3]]);
            }
        }
        FORMAT_RGB565 => {
            for px in data.chunks_exact(2) {
                out.extend_from_slice(&rgb565(u16::from_le_bytes([px[0], px[1]])));
            }
        }
        _ => {
            let blocks_x = width.div_ceil(16) as usize;
            for y in 0..height as usize {
                for x in 0..width as usize {
                    let block = (y / 16) * blocks_x + x / 16;
                    let value = u16::from_le_bytes([data[block * 2], data[block * 2 + 1]]);
                    out.extend_from_slice(&rgb565(value));
                }
            }
        }
    }

    Ok(RgbaImage::from_raw(width, height, out))
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use wzkit_crypto::expand_iv;
    use wzkit_crypto::keys::GMS_IV;

    #[test]
    fn test_zlib_header_detection() {
        assert!(is_zlib(&[0x78, 0x9C, 0x00]));
        assert!(is_zlib(&[0x78, 0xDA]));
        assert!(!is_zlib(&[0x78, 0x00]));
        assert!(!is_zlib(&[0x78]));
    }

    #[test]
    fn test_unwrap_blocks_decrypts_each_block_from_start() {
        let iv = expand_iv(GMS_IV);
        let mut first = b"abc".to_vec();
        let mut second = b"defg".to_vec();
        WzKeystream::new(&iv).apply(&mut first);
        WzKeystream::new(&iv).apply(&mut second);

        let mut data = Vec::new();
        data.extend_from_slice(&3i32.to_le_bytes());
        data.extend_from_slice(&first);
        data.extend_from_slice(&4i32.to_le_bytes());
        data.extend_from_slice(&second);

        let joined = unwrap_blocks(&data, &mut WzKeystream::new(&iv)).unwrap();
        assert_eq!(joined, b"abcdefg");
    }

    #[test]
    fn test_unwrap_blocks_truncated() {
        let mut data = 10i32.to_le_bytes().to_vec();
        data.push(0);
        assert!(unwrap_blocks(&data, &mut WzKeystream::new(&[0u8; 16])).is_none());
    }

    #[test]
    fn test_bgra4444_expands_nibbles() {
        // b=0x1, g=0x2, r=0x3, a=0xF
        let image = to_rgba(1, 1, FORMAT_BGRA4444, &[0x21, 0xF3]).unwrap().unwrap();
        assert_eq!(image.get_pixel(0, 0).0, [0x33, 0x22, 0x11, 0xFF]);
    }

    #[test]
    fn test_bgra8888_swaps_channels() {
        let image = to_rgba(1, 1, FORMAT_BGRA8888, &[1, 2, 3, 4]).unwrap().unwrap();
        assert_eq!(image.get_pixel(0, 0).0, [3, 2, 1, 4]);
    }

    #[test]
    fn test_rgb565_extremes() {
        let image = to_rgba(2, 1, FORMAT_RGB565, &[0xFF, 0xFF, 0x00, 0xF8])
            .unwrap()
            .unwrap();
        assert_eq!(image.get_pixel(0, 0).0, [0xFF, 0xFF, 0xFF, 0xFF]);
        assert_eq!(image.get_pixel(1, 0).0, [0xFF, 0x00, 0x00, 0xFF]);
    }

    #[test]
    fn test_block_format_fills_16x16_tiles() {
        // 17x1 needs two blocks horizontally
        let image = to_rgba(17, 1, FORMAT_RGB565_BLOCK, &[0x1F, 0x00, 0xE0, 0x07])
            .unwrap()
            .unwrap();
        assert_eq!(image.get_pixel(15, 0).0, [0x00, 0x00, 0xFF, 0xFF]);
        assert_eq!(image.get_pixel(16, 0).0, [0x00, 0xFF, 0x00, 0xFF]);
    }

    #[test]
    fn test_short_pixel_data() {
        assert!(to_rgba(2, 2, FORMAT_BGRA8888, &[0; 4]).unwrap().is_none());
    }

    #[test]
    fn test_oversized_dimensions_rejected_before_allocation() {
        for format in [
            FORMAT_BGRA4444,
            FORMAT_BGRA8888,
            FORMAT_RGB565,
            FORMAT_RGB565_BLOCK,
        ] {
            let result = to_rgba(0x7FFF_FFFF, 0x7FFF_FFFF, format, &[0; 16]).unwrap();
            assert!(result.is_none(), "format {format}");
        }
        assert!(to_rgba(u32::MAX, u32::MAX, FORMAT_BGRA8888, &[]).unwrap().is_none());
    }

    #[test]
    fn test_unknown_format() {
        assert!(matches!(
            to_rgba(1, 1, 3, &[0; 16]),
            Err(WzError::UnsupportedPixelFormat(3))
        ));
    }
}
