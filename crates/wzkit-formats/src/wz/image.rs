//! Image body decoding
//!
//! The byte at an image's offset selects how its property list is stored:
//! [`LOCATOR_PLAIN`] starts the body directly, [`LOCATOR_COMPRESSED`]
//! prefixes a zlib stream that inflates to a plain body.

use flate2::read::ZlibDecoder;
use std::io::{Cursor, Read, Seek};
use std::sync::{Arc, Weak};
use tracing::debug;

use crate::wz::archive::ArchiveInner;
use crate::wz::canvas::BlobLocation;
use crate::wz::error::{DecodeContext, WzError, WzResult};
use crate::wz::property::{PropertyParser, WzProperty, type_names};
use crate::wz::reader::WzReader;

/// Locator of a plain property body
pub const LOCATOR_PLAIN: u8 = 0x73;
/// Locator of a zlib-wrapped property body
pub const LOCATOR_COMPRESSED: u8 = 0x1B;

/// Decode the top-level properties of the image stored at `offset`
pub(crate) fn parse_image<R: Read + Seek>(
    reader: &mut WzReader<R>,
    offset: u64,
    archive: &Weak<ArchiveInner>,
) -> WzResult<Vec<Arc<WzProperty>>> {
    reader.seek(offset)?;
    let locator = reader.read_u8().property(offset)?;

    match locator {
        LOCATOR_PLAIN => parse_body(reader, offset, BlobLocation::File, archive),
        LOCATOR_COMPRESSED => {
            let len = reader.read_i32().property(offset)?;
            let len = usize::try_from(len).map_err(|_| {
                WzError::property(offset, format!("negative compressed body length {len}"))
            })?;
            let compressed = reader.read_bytes(len).property(offset)?;

            let mut inflated = Vec::new();
            ZlibDecoder::new(compressed.as_slice())
                .read_to_end(&mut inflated)
                .map_err(|e| WzError::property(offset, format!("image body inflate failed: {e}")))?;
            debug!(offset, compressed = len, inflated = inflated.len(), "inflated image body");

            let buffer: Arc<[u8]> = inflated.into();
            let mut inner =
                WzReader::new(Cursor::new(Arc::clone(&buffer)), reader.keystream().clone())?;
            match inner.read_u8().property(0)? {
                LOCATOR_PLAIN => parse_body(&mut inner, 0, BlobLocation::Inline(buffer), archive),
                other => Err(WzError::property(
                    offset,
                    format!("inflated body starts with 0x{other:02X}"),
                )),
            }
        }
        other => Err(WzError::property(
            offset,
            format!("unknown image locator 0x{other:02X}"),
        )),
    }
}

/// Parse the plain body whose locator byte at `base` was just consumed
fn parse_body<R: Read + Seek>(
    reader: &mut WzReader<R>,
    base: u64,
    location: BlobLocation,
    archive: &Weak<ArchiveInner>,
) -> WzResult<Vec<Arc<WzProperty>>> {
    let pos = reader.position()?;
    let type_name = reader.read_wz_string().property(pos)?;
    if type_name != type_names::PROPERTY {
        return Err(WzError::property(
            pos,
            format!("image body declares type {type_name:?}"),
        ));
    }
    let reserved = reader.read_u16().property(pos)?;
    if reserved != 0 {
        return Err(WzError::property(
            pos,
            format!("image body reserved field is {reserved}"),
        ));
    }

    PropertyParser::new(reader, base, location, archive.clone()).parse_list()
}
