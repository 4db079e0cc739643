//! WZ archive preamble

use binrw::{BinRead, BinWrite, NullString};
use std::io::{Read, Seek};
use tracing::debug;

use crate::wz::error::{WzError, WzResult};
use crate::wz::reader::WzReader;

/// Identifier written by every known client
pub const WZ_IDENT: [u8; 4] = *b"PKG1";

/// Size of the fixed part of the preamble (ident, size, data start)
pub const FIXED_HEADER_SIZE: u32 = 16;

/// Archive preamble: identifier, declared size, data-start offset, copyright
#[derive(Debug, Clone, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little)]
pub struct WzHeader {
    /// Identifier tag, `PKG1` in every known archive
    pub ident: [u8; 4],

    /// Declared size of the data following the preamble
    pub file_size: u64,

    /// Absolute offset where encrypted data begins
    pub data_start: u32,

    /// Free-text copyright notice
    #[br(map = |s: NullString| s.to_string())]
    #[bw(map = |s: &String| NullString::from(s.as_str()))]
    pub copyright: String,
}

impl WzHeader {
    /// Create a header for a new archive; `data_start` directly follows the copyright
    pub fn new(copyright: impl Into<String>) -> Self {
        let copyright = copyright.into();
        let data_start = FIXED_HEADER_SIZE + copyright.len() as u32 + 1;
        Self {
            ident: WZ_IDENT,
            file_size: 0,
            data_start,
            copyright,
        }
    }

    /// Whether the identifier is the expected `PKG1`
    pub fn has_standard_ident(&self) -> bool {
        self.ident == WZ_IDENT
    }

    /// Identifier as text
    pub fn ident_str(&self) -> String {
        String::from_utf8_lossy(&self.ident).into_owned()
    }

    /// Read the preamble and leave the stream at the data-start offset
    ///
    /// The identifier is only checked when `strict_ident` is set.
    pub fn read_from<R: Read + Seek>(
        reader: &mut WzReader<R>,
        strict_ident: bool,
    ) -> WzResult<Self> {
        reader.seek(0)?;
        let header =
            Self::read(reader.get_mut()).map_err(|e| WzError::Format(e.to_string()))?;

        if strict_ident && !header.has_standard_ident() {
            return Err(WzError::Format(format!(
                "unexpected identifier {:?}",
                header.ident_str()
            )));
        }

        let pos = reader.position()?;
        let data_start = u64::from(header.data_start);
        if data_start < pos {
            return Err(WzError::Format(format!(
                "data start {data_start} lies inside the preamble (ends at {pos})"
            )));
        }
        if data_start > reader.len() {
            return Err(WzError::Format(format!(
                "data start {data_start} is beyond the end of the file ({})",
                reader.len()
            )));
        }
        reader.skip(data_start - pos).map_err(|e| WzError::Format(e.to_string()))?;

        debug!(
            ident = %header.ident_str(),
            file_size = header.file_size,
            data_start = header.data_start,
            "read archive preamble"
        );
        Ok(header)
    }
}
