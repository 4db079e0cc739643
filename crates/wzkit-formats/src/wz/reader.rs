//! Primitive readers for the WZ encoding
//!
//! Fixed-size fields are little-endian. On top of those the format layers
//! three encodings: compressed integers (a signed byte that escapes to a full
//! width value), keystream-encrypted strings and position-keyed offsets.

use binrw::{BinRead, BinResult};
use std::io::{self, Read, Seek, SeekFrom};
use wzkit_crypto::WzKeystream;

/// Constant folded into every offset mask
pub const OFFSET_CONSTANT: u32 = 0x581C_3F6D;

/// Mask applied to the stored u32 located at `pos`
fn offset_mask(pos: u32, data_start: u32, hash: u32) -> u32 {
    let mut mask = pos.wrapping_sub(data_start) ^ u32::MAX;
    mask = mask.wrapping_mul(hash);
    mask = mask.wrapping_sub(OFFSET_CONSTANT);
    mask.rotate_left(mask & 0x1F)
}

/// Decode an absolute offset from the u32 stored at stream position `pos`
pub fn decode_offset(pos: u32, stored: u32, data_start: u32, hash: u32) -> u32 {
    (offset_mask(pos, data_start, hash) ^ stored).wrapping_add(data_start.wrapping_mul(2))
}

/// Inverse of [`decode_offset`]: the u32 to store at `pos` so it decodes to `target`
pub fn encode_offset(pos: u32, target: u32, data_start: u32, hash: u32) -> u32 {
    offset_mask(pos, data_start, hash) ^ target.wrapping_sub(data_start.wrapping_mul(2))
}

/// Seekable reader that understands WZ primitive encodings
pub struct WzReader<R> {
    inner: R,
    keystream: WzKeystream,
    data_start: u32,
    hash: u32,
    len: u64,
}

impl<R: Read + Seek> WzReader<R> {
    /// Wrap a stream. The stream is rewound to its start.
    pub fn new(mut inner: R, keystream: WzKeystream) -> io::Result<Self> {
        let len = inner.seek(SeekFrom::End(0))?;
        inner.seek(SeekFrom::Start(0))?;
        Ok(Self {
            inner,
            keystream,
            data_start: 0,
            hash: 0,
            len,
        })
    }

    /// Set the data-start offset used by offset decoding and name references
    pub fn set_data_start(&mut self, data_start: u32) {
        self.data_start = data_start;
    }

    /// Set the version hash used by offset decoding
    pub fn set_hash(&mut self, hash: u32) {
        self.hash = hash;
    }

    /// Underlying stream
    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    /// Data-start offset
    pub fn data_start(&self) -> u32 {
        self.data_start
    }

    /// Version hash currently keyed into offset decoding
    pub fn hash(&self) -> u32 {
        self.hash
    }

    /// Keystream used for string and block decryption
    pub fn keystream(&self) -> &WzKeystream {
        &self.keystream
    }

    /// Mutable keystream, for callers decrypting raw blocks
    pub fn keystream_mut(&mut self) -> &mut WzKeystream {
        &mut self.keystream
    }

    /// Total stream length
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Whether the stream is empty
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Current stream position
    pub fn position(&mut self) -> io::Result<u64> {
        self.inner.stream_position()
    }

    /// Seek to an absolute position
    pub fn seek(&mut self, pos: u64) -> io::Result<()> {
        self.inner.seek(SeekFrom::Start(pos)).map(|_| ())
    }

    /// Bytes left between the current position and the end of the stream
    pub fn remaining(&mut self) -> io::Result<u64> {
        Ok(self.len.saturating_sub(self.position()?))
    }

    /// Run `f` and put the stream back where it was, whatever `f` returns
    pub fn with_restore<T, E>(&mut self, f: impl FnOnce(&mut Self) -> Result<T, E>) -> Result<T, E>
    where
        E: From<io::Error>,
    {
        let saved = self.inner.stream_position()?;
        let result = f(self);
        self.inner.seek(SeekFrom::Start(saved))?;
        result
    }

    fn require(&mut self, count: u64) -> BinResult<()> {
        let pos = self.position()?;
        if count > self.len.saturating_sub(pos) {
            return Err(binrw::Error::AssertFail {
                pos,
                message: format!(
                    "need {count} bytes but only {} remain",
                    self.len.saturating_sub(pos)
                ),
            });
        }
        Ok(())
    }

    /// Skip `count` bytes, failing if that would pass the end of the stream
    pub fn skip(&mut self, count: u64) -> BinResult<()> {
        self.require(count)?;
        self.inner.seek(SeekFrom::Current(count as i64))?;
        Ok(())
    }

    /// Read `count` raw bytes
    pub fn read_bytes(&mut self, count: usize) -> BinResult<Vec<u8>> {
        self.require(count as u64)?;
        let mut buf = vec![0u8; count];
        self.inner.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Read a `u8`
    pub fn read_u8(&mut self) -> BinResult<u8> {
        u8::read_le(&mut self.inner)
    }

    /// Read an `i8`
    pub fn read_i8(&mut self) -> BinResult<i8> {
        i8::read_le(&mut self.inner)
    }

    /// Read a little-endian `u16`
    pub fn read_u16(&mut self) -> BinResult<u16> {
        u16::read_le(&mut self.inner)
    }

    /// Read a little-endian `i16`
    pub fn read_i16(&mut self) -> BinResult<i16> {
        i16::read_le(&mut self.inner)
    }

    /// Read a little-endian `u32`
    pub fn read_u32(&mut self) -> BinResult<u32> {
        u32::read_le(&mut self.inner)
    }

    /// Read a little-endian `i32`
    pub fn read_i32(&mut self) -> BinResult<i32> {
        i32::read_le(&mut self.inner)
    }

    /// Read a little-endian `f32`
    pub fn read_f32(&mut self) -> BinResult<f32> {
        f32::read_le(&mut self.inner)
    }

    /// Read a little-endian `f64`
    pub fn read_f64(&mut self) -> BinResult<f64> {
        f64::read_le(&mut self.inner)
    }

    /// Read a compressed `i32`: one signed byte, `-128` escapes to a full `i32`
    pub fn read_compressed_int(&mut self) -> BinResult<i32> {
        let small = self.read_i8()?;
        if small == i8::MIN {
            self.read_i32()
        } else {
            Ok(i32::from(small))
        }
    }

    /// Read a compressed `i64`: one signed byte, `-128` escapes to a full `i64`
    pub fn read_compressed_long(&mut self) -> BinResult<i64> {
        let small = self.read_i8()?;
        if small == i8::MIN {
            i64::read_le(&mut self.inner)
        } else {
            Ok(i64::from(small))
        }
    }

    /// Read a keystream-encrypted string
    pub fn read_wz_string(&mut self) -> BinResult<String> {
        let pos = self.position()?;
        let small = self.read_i8()?;

        if small == 0 {
            return Ok(String::new());
        }

        if small > 0 {
            let len = if small == i8::MAX {
                self.read_i32()?
            } else {
                i32::from(small)
            };
            if len <= 0 {
                return Ok(String::new());
            }
            let len = len as usize;
            self.require(len as u64 * 2)?;
            self.keystream.ensure(len * 2);

            let mut units = Vec::with_capacity(len);
            let mut mask: u16 = 0xAAAA;
            for i in 0..len {
                let raw = self.read_u16()?;
                units.push(raw ^ mask ^ self.keystream.word(i));
                mask = mask.wrapping_add(1);
            }
            String::from_utf16(&units).map_err(|_| binrw::Error::AssertFail {
                pos,
                message: "string is not valid UTF-16".to_string(),
            })
        } else {
            let len = if small == i8::MIN {
                self.read_i32()?
            } else {
                -i32::from(small)
            };
            if len <= 0 {
                return Ok(String::new());
            }
            let raw = self.read_bytes(len as usize)?;
            self.keystream.ensure(raw.len());

            let mut mask: u8 = 0xAA;
            let mut out = String::with_capacity(raw.len());
            for (i, byte) in raw.iter().enumerate() {
                out.push(char::from(byte ^ mask ^ self.keystream.byte(i)));
                mask = mask.wrapping_add(1);
            }
            Ok(out)
        }
    }

    /// Read an encrypted string stored at `offset`, leaving the position untouched
    pub fn read_string_at(&mut self, offset: u64) -> BinResult<String> {
        self.with_restore(|r| {
            r.seek(offset)?;
            r.read_wz_string()
        })
    }

    /// Read a string block: inline, or a reference relative to `base`
    pub fn read_string_block(&mut self, base: u64) -> BinResult<String> {
        let pos = self.position()?;
        match self.read_u8()? {
            0x00 | 0x73 => self.read_wz_string(),
            0x01 | 0x1B => {
                let relative = self.read_i32()?;
                let target = base.checked_add_signed(i64::from(relative)).ok_or_else(|| {
                    binrw::Error::AssertFail {
                        pos,
                        message: format!("string reference {relative} points before the stream"),
                    }
                })?;
                self.read_string_at(target)
            }
            tag => Err(binrw::Error::AssertFail {
                pos,
                message: format!("unknown string block tag 0x{tag:02X}"),
            }),
        }
    }

    /// Read a position-keyed offset
    pub fn read_offset(&mut self) -> BinResult<u32> {
        let pos = self.position()? as u32;
        let stored = self.read_u32()?;
        Ok(decode_offset(pos, stored, self.data_start, self.hash))
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::wz::builder::WzWriter;
    use std::io::Cursor;
    use wzkit_crypto::keys::GMS_IV;
    use wzkit_crypto::{WzKeystream, expand_iv};

    fn reader_for(bytes: Vec<u8>) -> WzReader<Cursor<Vec<u8>>> {
        WzReader::new(Cursor::new(bytes), WzKeystream::new(&expand_iv(GMS_IV))).unwrap()
    }

    #[test]
    fn test_offset_encoding_inverts() {
        for pos in [0x3C_u32, 0x1000, 0xFFFF_0000] {
            let stored = encode_offset(pos, 0x1234, 0x3C, 0xDEAD_BEEF);
            assert_eq!(decode_offset(pos, stored, 0x3C, 0xDEAD_BEEF), 0x1234);
        }
    }

    #[test]
    fn test_compressed_int_escape() {
        let mut reader = reader_for(vec![0x05, 0x80, 0x00, 0x01, 0x00, 0x00, 0xFF]);
        assert_eq!(reader.read_compressed_int().unwrap(), 5);
        assert_eq!(reader.read_compressed_int().unwrap(), 256);
        assert_eq!(reader.read_compressed_int().unwrap(), -1);
    }

    #[test]
    fn test_strings_decrypt() {
        let mut writer = WzWriter::new(WzKeystream::new(&expand_iv(GMS_IV)), 0, 0);
        writer.write_wz_string("Property");
        writer.write_wz_string("");
        writer.write_wz_string("메이플");
        writer.write_wz_string(&"x".repeat(300));

        let mut reader = reader_for(writer.into_bytes());
        assert_eq!(reader.read_wz_string().unwrap(), "Property");
        assert_eq!(reader.read_wz_string().unwrap(), "");
        assert_eq!(reader.read_wz_string().unwrap(), "메이플");
        assert_eq!(reader.read_wz_string().unwrap(), "x".repeat(300));
    }

    #[test]
    fn test_string_length_past_end_fails() {
        // 20-byte single-byte string with only two bytes present
        let mut reader = reader_for(vec![0xEC, 0x00, 0x00]);
        assert!(reader.read_wz_string().is_err());
    }

    #[test]
    fn test_with_restore_rewinds_on_error() {
        let mut reader = reader_for(vec![0u8; 8]);
        reader.seek(3).unwrap();
        let result: BinResult<()> = reader.with_restore(|r| {
            r.seek(6)?;
            r.read_u32().map(|_| ())
        });
        assert!(result.is_err());
        assert_eq!(reader.position().unwrap(), 3);
    }

    #[test]
    fn test_unknown_string_block_tag() {
        let mut reader = reader_for(vec![0x42]);
        assert!(reader.read_string_block(0).is_err());
    }
}
