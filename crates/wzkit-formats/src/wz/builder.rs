//! WZ archive writer
//!
//! [`WzWriter`] is the inverse of the primitive reader: compressed integers,
//! keystream-encrypted strings and position-keyed offsets.
//! [`WzArchiveBuilder`] lays out a complete archive: preamble, version
//! marker, every directory's entry list, then the image bodies.

use binrw::BinWrite;
use flate2::Compression;
use flate2::write::ZlibEncoder;
use image::RgbaImage;
use std::collections::{HashMap, HashSet};
use std::io::{Cursor, Write};
use tracing::debug;
use wzkit_crypto::{IvStore, KeyProvider, MapleVersion, WzKeystream};

use crate::wz::canvas::FORMAT_BGRA8888;
use crate::wz::directory::{ENTRY_DIRECTORY, ENTRY_IMAGE};
use crate::wz::error::{WzError, WzResult};
use crate::wz::header::WzHeader;
use crate::wz::image::{LOCATOR_COMPRESSED, LOCATOR_PLAIN};
use crate::wz::property::{BITMAP_SEGMENT, tags, type_names};
use crate::wz::reader::encode_offset;
use crate::wz::version::{marker_for_version, version_hash};

/// Copyright text written by the original packager
pub const DEFAULT_COPYRIGHT: &str = "Package file v1.0 Copyright 2002 Wizet, ZMS";

/// String block tags: inline and back-reference, for names and type names
const STRING_INLINE: u8 = 0x00;
const STRING_REF: u8 = 0x01;
const TYPE_INLINE: u8 = 0x73;
const TYPE_REF: u8 = 0x1B;

/// Byte buffer writer for WZ primitives
pub struct WzWriter {
    buf: Vec<u8>,
    keystream: WzKeystream,
    data_start: u32,
    hash: u32,
}

impl WzWriter {
    /// Create a writer; `data_start` and `hash` key offset encoding
    pub fn new(keystream: WzKeystream, data_start: u32, hash: u32) -> Self {
        Self {
            buf: Vec::new(),
            keystream,
            data_start,
            hash,
        }
    }

    /// Current write position
    pub fn position(&self) -> u32 {
        self.buf.len() as u32
    }

    /// Bytes written so far
    pub fn bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Finish and return the buffer
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    /// Write raw bytes
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Write a `u8`
    pub fn write_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    /// Write an `i8`
    pub fn write_i8(&mut self, value: i8) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    /// Write a little-endian `u16`
    pub fn write_u16(&mut self, value: u16) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    /// Write a little-endian `i16`
    pub fn write_i16(&mut self, value: i16) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    /// Write a little-endian `u32`
    pub fn write_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    /// Write a little-endian `i32`
    pub fn write_i32(&mut self, value: i32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    /// Write a little-endian `i64`
    pub fn write_i64(&mut self, value: i64) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    /// Write a little-endian `f32`
    pub fn write_f32(&mut self, value: f32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    /// Write a little-endian `f64`
    pub fn write_f64(&mut self, value: f64) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    /// Write a compressed `i32`
    pub fn write_compressed_int(&mut self, value: i32) {
        match i8::try_from(value) {
            Ok(small) if small != i8::MIN => self.write_i8(small),
            _ => {
                self.write_i8(i8::MIN);
                self.write_i32(value);
            }
        }
    }

    /// Write a compressed `i64`
    pub fn write_compressed_long(&mut self, value: i64) {
        match i8::try_from(value) {
            Ok(small) if small != i8::MIN => self.write_i8(small),
            _ => {
                self.write_i8(i8::MIN);
                self.write_i64(value);
            }
        }
    }

    /// Write a keystream-encrypted string
    ///
    /// Strings made only of Latin-1 characters use the single-byte form,
    /// everything else is stored as UTF-16.
    pub fn write_wz_string(&mut self, value: &str) {
        if value.is_empty() {
            self.write_u8(0);
            return;
        }

        if value.chars().all(|c| u32::from(c) <= 0xFF) {
            let bytes: Vec<u8> = value.chars().map(|c| u32::from(c) as u8).collect();
            match i8::try_from(bytes.len()) {
                Ok(len) => self.write_i8(-len),
                Err(_) => {
                    self.write_i8(i8::MIN);
                    self.write_i32(bytes.len() as i32);
                }
            }
            self.keystream.ensure(bytes.len());
            let mut mask: u8 = 0xAA;
            for (i, byte) in bytes.iter().enumerate() {
                let encoded = byte ^ mask ^ self.keystream.byte(i);
                self.write_u8(encoded);
                mask = mask.wrapping_add(1);
            }
        } else {
            let units: Vec<u16> = value.encode_utf16().collect();
            if units.len() < i8::MAX as usize {
                self.write_i8(units.len() as i8);
            } else {
                self.write_i8(i8::MAX);
                self.write_i32(units.len() as i32);
            }
            self.keystream.ensure(units.len() * 2);
            let mut mask: u16 = 0xAAAA;
            for (i, unit) in units.iter().enumerate() {
                let encoded = unit ^ mask ^ self.keystream.word(i);
                self.write_u16(encoded);
                mask = mask.wrapping_add(1);
            }
        }
    }

    /// Write an offset keyed by the current position
    pub fn write_offset(&mut self, target: u32) {
        let pos = self.position();
        self.write_u32(encode_offset(pos, target, self.data_start, self.hash));
    }

    /// Rewrite the offset stored at `at`
    pub fn patch_offset(&mut self, at: u32, target: u32) {
        let stored = encode_offset(at, target, self.data_start, self.hash);
        self.patch_u32(at, stored);
    }

    /// Overwrite the `u32` at `at`
    pub fn patch_u32(&mut self, at: u32, value: u32) {
        let at = at as usize;
        self.buf[at..at + 4].copy_from_slice(&value.to_le_bytes());
    }

    /// Overwrite the `i32` at `at`
    pub fn patch_i32(&mut self, at: u32, value: i32) {
        let at = at as usize;
        self.buf[at..at + 4].copy_from_slice(&value.to_le_bytes());
    }
}

/// Bitmap to embed in a canvas
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitmapSpec {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Pixel format code
    pub format: u32,
    /// Uncompressed pixel data in `format`
    pub pixels: Vec<u8>,
    /// Wrap the zlib stream in keystream-encrypted blocks
    pub encrypted: bool,
}

impl BitmapSpec {
    /// Bitmap from raw pixel data
    pub fn new(width: u32, height: u32, format: u32, pixels: Vec<u8>) -> Self {
        Self {
            width,
            height,
            format,
            pixels,
            encrypted: false,
        }
    }

    /// BGRA8888 bitmap from an RGBA image
    pub fn from_rgba(image: &RgbaImage) -> Self {
        let pixels = image
            .pixels()
            .flat_map(|p| {
                let [r, g, b, a] = p.0;
                [b, g, r, a]
            })
            .collect();
        Self::new(image.width(), image.height(), FORMAT_BGRA8888, pixels)
    }

    /// Store the pixel data as encrypted blocks
    #[must_use]
    pub fn encrypted(mut self) -> Self {
        self.encrypted = true;
        self
    }
}

/// Sound payload to embed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoundSpec {
    /// Play length in milliseconds
    pub duration_ms: i32,
    /// Wave format block following the fixed media header
    pub format: Vec<u8>,
    /// Encoded audio data
    pub data: Vec<u8>,
}

/// Value of a property to write
#[derive(Debug, Clone, PartialEq)]
pub enum SpecValue {
    /// No value
    Null,
    /// 16-bit integer
    Short(i16),
    /// 32-bit integer
    Int(i32),
    /// 64-bit integer
    Long(i64),
    /// 32-bit float
    Float(f32),
    /// 64-bit float
    Double(f64),
    /// Text
    String(String),
    /// Link to another path
    Uol(String),
    /// Named children
    SubProperty(Vec<PropertySpec>),
    /// Positional extended objects
    Convex(Vec<SpecValue>),
    /// Integer pair
    Vector(i32, i32),
    /// Named children plus bitmap
    Canvas(Vec<PropertySpec>, BitmapSpec),
    /// Sound payload
    Sound(SoundSpec),
}

/// Named property to write
#[derive(Debug, Clone, PartialEq)]
pub struct PropertySpec {
    /// Property name
    pub name: String,
    /// Property value
    pub value: SpecValue,
}

impl PropertySpec {
    /// Property with an arbitrary value
    pub fn new(name: impl Into<String>, value: SpecValue) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }

    /// Integer property
    pub fn int(name: impl Into<String>, value: i32) -> Self {
        Self::new(name, SpecValue::Int(value))
    }

    /// String property
    pub fn string(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(name, SpecValue::String(value.into()))
    }

    /// Sub-property with named children
    pub fn sub(name: impl Into<String>, children: Vec<Self>) -> Self {
        Self::new(name, SpecValue::SubProperty(children))
    }

    /// Vector property
    pub fn vector(name: impl Into<String>, x: i32, y: i32) -> Self {
        Self::new(name, SpecValue::Vector(x, y))
    }

    /// Canvas property
    pub fn canvas(name: impl Into<String>, children: Vec<Self>, bitmap: BitmapSpec) -> Self {
        Self::new(name, SpecValue::Canvas(children, bitmap))
    }
}

/// Image to write
#[derive(Debug, Clone, PartialEq)]
pub struct ImageSpec {
    /// Image name, usually ending in `.img`
    pub name: String,
    /// Top-level properties
    pub properties: Vec<PropertySpec>,
    /// Store the body as a zlib stream
    pub compressed: bool,
}

impl ImageSpec {
    /// Plain image
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            properties: Vec::new(),
            compressed: false,
        }
    }

    /// Add a top-level property
    #[must_use]
    pub fn property(mut self, property: PropertySpec) -> Self {
        self.properties.push(property);
        self
    }

    /// Store the body compressed
    #[must_use]
    pub fn compressed(mut self) -> Self {
        self.compressed = true;
        self
    }
}

/// Directory to write
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DirectoryBuilder {
    /// Directory name
    pub name: String,
    /// Child directories
    pub directories: Vec<DirectoryBuilder>,
    /// Child images
    pub images: Vec<ImageSpec>,
}

impl DirectoryBuilder {
    /// Empty directory
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Add a child directory
    #[must_use]
    pub fn directory(mut self, directory: Self) -> Self {
        self.directories.push(directory);
        self
    }

    /// Add a child image
    #[must_use]
    pub fn image(mut self, image: ImageSpec) -> Self {
        self.images.push(image);
        self
    }

    fn validate(&self) -> WzResult<()> {
        let mut names = HashSet::new();
        let children = self
            .directories
            .iter()
            .map(|d| d.name.as_str())
            .chain(self.images.iter().map(|i| i.name.as_str()));
        for name in children {
            if name.is_empty() {
                return Err(WzError::InvalidBuild(format!(
                    "empty entry name in {:?}",
                    self.name
                )));
            }
            if !names.insert(name) {
                return Err(WzError::InvalidBuild(format!(
                    "duplicate entry name {name:?} in {:?}",
                    self.name
                )));
            }
        }
        self.directories.iter().try_for_each(Self::validate)
    }
}

/// Builder for complete WZ archives
#[derive(Debug, Clone)]
pub struct WzArchiveBuilder {
    version: MapleVersion,
    game_version: i16,
    copyright: String,
    root: DirectoryBuilder,
}

impl WzArchiveBuilder {
    /// Archive for real version `game_version`, GMS encryption
    pub fn new(game_version: i16) -> Self {
        Self {
            version: MapleVersion::Gms,
            game_version,
            copyright: DEFAULT_COPYRIGHT.to_string(),
            root: DirectoryBuilder::default(),
        }
    }

    /// Set the encryption scheme
    #[must_use]
    pub fn with_version(mut self, version: MapleVersion) -> Self {
        self.version = version;
        self
    }

    /// Set the copyright text
    #[must_use]
    pub fn with_copyright(mut self, copyright: impl Into<String>) -> Self {
        self.copyright = copyright.into();
        self
    }

    /// Add a directory under the root
    #[must_use]
    pub fn directory(mut self, directory: DirectoryBuilder) -> Self {
        self.root.directories.push(directory);
        self
    }

    /// Add an image under the root
    #[must_use]
    pub fn image(mut self, image: ImageSpec) -> Self {
        self.root.images.push(image);
        self
    }

    /// Write the archive using the built-in IV table
    pub fn build(&self) -> WzResult<Vec<u8>> {
        self.build_with_provider(&IvStore::new())
    }

    /// Write the archive, taking the IV from `provider`
    pub fn build_with_provider<P: KeyProvider>(&self, provider: &P) -> WzResult<Vec<u8>> {
        self.root.validate()?;
        if self.game_version < 0 {
            return Err(WzError::InvalidBuild(format!(
                "negative game version {}",
                self.game_version
            )));
        }

        let iv = provider.iv(&self.version)?;
        let keystream = WzKeystream::new(&iv);
        let hash = version_hash(self.game_version);

        // Image bodies do not depend on where they end up
        let mut bodies = Vec::new();
        collect_bodies(&self.root, &keystream, &mut bodies)?;

        let mut header = WzHeader::new(self.copyright.clone());
        let mut preamble = Cursor::new(Vec::new());
        header
            .write(&mut preamble)
            .map_err(|e| WzError::InvalidBuild(e.to_string()))?;

        let mut w = WzWriter::new(keystream, header.data_start, hash);
        w.write_bytes(preamble.get_ref());
        w.write_u16(marker_for_version(self.game_version));

        let mut image_slots = Vec::new();
        let mut next_body = 0;
        write_directory(&mut w, &self.root, &bodies, &mut next_body, &mut image_slots);

        for (slot, body) in image_slots.into_iter().zip(&bodies) {
            let start = w.position();
            w.patch_offset(slot, start);
            w.write_bytes(body);
        }

        header.file_size = u64::from(w.position() - header.data_start);
        let mut preamble = Cursor::new(Vec::new());
        header
            .write(&mut preamble)
            .map_err(|e| WzError::InvalidBuild(e.to_string()))?;
        let mut bytes = w.into_bytes();
        bytes[..preamble.get_ref().len()].copy_from_slice(preamble.get_ref());

        debug!(
            game_version = self.game_version,
            images = bodies.len(),
            len = bytes.len(),
            "built archive"
        );
        Ok(bytes)
    }

    /// Write the archive to `out`
    pub fn write_to<W: Write>(&self, out: &mut W) -> WzResult<()> {
        out.write_all(&self.build()?)?;
        Ok(())
    }
}

/// Encode every image body in directory-list order
fn collect_bodies(
    dir: &DirectoryBuilder,
    keystream: &WzKeystream,
    bodies: &mut Vec<Vec<u8>>,
) -> WzResult<()> {
    for image in &dir.images {
        bodies.push(encode_image(image, keystream)?);
    }
    for child in &dir.directories {
        collect_bodies(child, keystream, bodies)?;
    }
    Ok(())
}

/// Write one entry list, then each child directory's list
///
/// Image entries consume bodies in the order [`collect_bodies`] produced
/// them; their offset slots are returned for patching once the bodies are
/// placed.
fn write_directory(
    w: &mut WzWriter,
    dir: &DirectoryBuilder,
    bodies: &[Vec<u8>],
    next_body: &mut usize,
    image_slots: &mut Vec<u32>,
) {
    w.write_compressed_int((dir.directories.len() + dir.images.len()) as i32);

    let mut directory_slots = Vec::new();
    for child in &dir.directories {
        w.write_u8(ENTRY_DIRECTORY);
        w.write_wz_string(&child.name);
        w.write_compressed_int(0);
        w.write_compressed_int(0);
        directory_slots.push(w.position());
        w.write_u32(0);
    }

    let mut own_slots = Vec::new();
    for image in &dir.images {
        let body = &bodies[*next_body];
        *next_body += 1;
        w.write_u8(ENTRY_IMAGE);
        w.write_wz_string(&image.name);
        w.write_compressed_int(body.len() as i32);
        w.write_compressed_int(checksum(body));
        own_slots.push(w.position());
        w.write_u32(0);
    }
    image_slots.extend(own_slots);

    for (child, slot) in dir.directories.iter().zip(directory_slots) {
        let start = w.position();
        w.patch_offset(slot, start);
        write_directory(w, child, bodies, next_body, image_slots);
    }
}

fn checksum(body: &[u8]) -> i32 {
    body.iter()
        .fold(0i32, |sum, byte| sum.wrapping_add(i32::from(*byte)))
}

fn encode_image(image: &ImageSpec, keystream: &WzKeystream) -> WzResult<Vec<u8>> {
    let mut body = BodyWriter::new(keystream.clone());
    body.w.write_u8(LOCATOR_PLAIN);
    body.w.write_wz_string(type_names::PROPERTY);
    body.w.write_u16(0);
    body.write_list(&image.properties)?;
    let plain = body.w.into_bytes();

    if !image.compressed {
        return Ok(plain);
    }

    let compressed = zlib(&plain)?;
    let mut out = Vec::with_capacity(compressed.len() + 5);
    out.push(LOCATOR_COMPRESSED);
    out.extend_from_slice(&(compressed.len() as i32).to_le_bytes());
    out.extend_from_slice(&compressed);
    Ok(out)
}

fn zlib(data: &[u8]) -> WzResult<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

/// Writer for one image body; repeated strings become back-references
struct BodyWriter {
    w: WzWriter,
    strings: HashMap<String, u32>,
}

impl BodyWriter {
    fn new(keystream: WzKeystream) -> Self {
        Self {
            w: WzWriter::new(keystream, 0, 0),
            strings: HashMap::new(),
        }
    }

    fn write_string_block(&mut self, value: &str, inline_tag: u8, ref_tag: u8) {
        if let Some(at) = self.strings.get(value) {
            self.w.write_u8(ref_tag);
            self.w.write_i32(*at as i32);
            return;
        }
        self.w.write_u8(inline_tag);
        if !value.is_empty() {
            self.strings.insert(value.to_string(), self.w.position());
        }
        self.w.write_wz_string(value);
    }

    fn write_list(&mut self, properties: &[PropertySpec]) -> WzResult<()> {
        let mut names = HashSet::new();
        if let Some(duplicate) = properties.iter().find(|p| !names.insert(p.name.as_str())) {
            return Err(WzError::InvalidBuild(format!(
                "duplicate property name {:?}",
                duplicate.name
            )));
        }

        self.w.write_compressed_int(properties.len() as i32);
        for property in properties {
            self.write_string_block(&property.name, STRING_INLINE, STRING_REF);
            self.write_value(&property.value)?;
        }
        Ok(())
    }

    fn write_value(&mut self, value: &SpecValue) -> WzResult<()> {
        match value {
            SpecValue::Null => self.w.write_u8(tags::NULL),
            SpecValue::Short(v) => {
                self.w.write_u8(tags::SHORT);
                self.w.write_i16(*v);
            }
            SpecValue::Int(v) => {
                self.w.write_u8(tags::INT);
                self.w.write_compressed_int(*v);
            }
            SpecValue::Long(v) => {
                self.w.write_u8(tags::LONG);
                self.w.write_compressed_long(*v);
            }
            SpecValue::Float(v) => {
                self.w.write_u8(tags::FLOAT);
                if v.to_bits() == 0 {
                    self.w.write_u8(0);
                } else {
                    self.w.write_u8(0x80);
                    self.w.write_f32(*v);
                }
            }
            SpecValue::Double(v) => {
                self.w.write_u8(tags::DOUBLE);
                self.w.write_f64(*v);
            }
            SpecValue::String(s) => {
                self.w.write_u8(tags::STRING);
                self.write_string_block(s, STRING_INLINE, STRING_REF);
            }
            extended => {
                self.w.write_u8(tags::EXTENDED);
                let len_slot = self.w.position();
                self.w.write_u32(0);
                let start = self.w.position();
                self.write_extended(extended)?;
                let len = self.w.position() - start;
                self.w.patch_u32(len_slot, len);
            }
        }
        Ok(())
    }

    fn write_extended(&mut self, value: &SpecValue) -> WzResult<()> {
        match value {
            SpecValue::SubProperty(children) => {
                self.write_string_block(type_names::PROPERTY, TYPE_INLINE, TYPE_REF);
                self.w.write_u16(0);
                self.write_list(children)?;
            }
            SpecValue::Canvas(children, bitmap) => {
                if children.iter().any(|child| child.name == BITMAP_SEGMENT) {
                    return Err(WzError::InvalidBuild(format!(
                        "canvas child named {BITMAP_SEGMENT:?} would shadow the bitmap"
                    )));
                }
                self.write_string_block(type_names::CANVAS, TYPE_INLINE, TYPE_REF);
                self.w.write_u8(0);
                if children.is_empty() {
                    self.w.write_u8(0);
                } else {
                    self.w.write_u8(1);
                    self.w.write_u16(0);
                    self.write_list(children)?;
                }
                self.write_bitmap(bitmap)?;
            }
            SpecValue::Vector(x, y) => {
                self.write_string_block(type_names::VECTOR, TYPE_INLINE, TYPE_REF);
                self.w.write_compressed_int(*x);
                self.w.write_compressed_int(*y);
            }
            SpecValue::Convex(members) => {
                self.write_string_block(type_names::CONVEX, TYPE_INLINE, TYPE_REF);
                self.w.write_compressed_int(members.len() as i32);
                for member in members {
                    self.write_extended(member)?;
                }
            }
            SpecValue::Uol(target) => {
                self.write_string_block(type_names::UOL, TYPE_INLINE, TYPE_REF);
                self.w.write_u8(0);
                self.write_string_block(target, STRING_INLINE, STRING_REF);
            }
            SpecValue::Sound(sound) => {
                let format_len = u8::try_from(sound.format.len()).map_err(|_| {
                    WzError::InvalidBuild(format!(
                        "sound format block of {} bytes",
                        sound.format.len()
                    ))
                })?;
                self.write_string_block(type_names::SOUND, TYPE_INLINE, TYPE_REF);
                self.w.write_u8(0);
                self.w.write_compressed_int(sound.data.len() as i32);
                self.w.write_compressed_int(sound.duration_ms);
                self.w.write_bytes(&[0u8; 51]);
                self.w.write_u8(format_len);
                self.w.write_bytes(&sound.format);
                self.w.write_bytes(&sound.data);
            }
            scalar => {
                return Err(WzError::InvalidBuild(format!(
                    "{scalar:?} cannot be stored as an extended object"
                )));
            }
        }
        Ok(())
    }

    fn write_bitmap(&mut self, bitmap: &BitmapSpec) -> WzResult<()> {
        let compressed = zlib(&bitmap.pixels)?;
        let data = if bitmap.encrypted {
            let mut block = compressed;
            let mut keystream = self.w.keystream.clone();
            keystream.apply(&mut block);
            let mut data = Vec::with_capacity(block.len() + 4);
            data.extend_from_slice(&(block.len() as i32).to_le_bytes());
            data.extend_from_slice(&block);
            data
        } else {
            compressed
        };

        self.w.write_compressed_int(bitmap.width as i32);
        self.w.write_compressed_int(bitmap.height as i32);
        self.w.write_compressed_int(bitmap.format as i32);
        self.w.write_u8(0);
        self.w.write_u32(0);
        self.w.write_i32(data.len() as i32 + 1);
        self.w.write_u8(0);
        self.w.write_bytes(&data);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::wz::reader::WzReader;
    use proptest::prelude::*;
    use wzkit_crypto::expand_iv;
    use wzkit_crypto::keys::GMS_IV;

    fn keystream() -> WzKeystream {
        WzKeystream::new(&expand_iv(GMS_IV))
    }

    #[test]
    fn test_compressed_int_boundaries() {
        let mut w = WzWriter::new(keystream(), 0, 0);
        w.write_compressed_int(127);
        w.write_compressed_int(-127);
        w.write_compressed_int(-128);
        w.write_compressed_int(128);
        assert_eq!(
            w.into_bytes(),
            vec![0x7F, 0x81, 0x80, 0x80, 0xFF, 0xFF, 0xFF, 0x80, 0x80, 0x00, 0x00, 0x00]
        );
    }

    #[test]
    fn test_offset_slot_patching() {
        let mut w = WzWriter::new(keystream(), 0x3C, 0x1234_5678);
        w.write_bytes(&[0; 0x40]);
        let slot = w.position();
        w.write_u32(0);
        w.patch_offset(slot, 0x99);

        let mut reader = WzReader::new(Cursor::new(w.into_bytes()), keystream()).unwrap();
        reader.set_data_start(0x3C);
        reader.set_hash(0x1234_5678);
        reader.seek(u64::from(slot)).unwrap();
        assert_eq!(reader.read_offset().unwrap(), 0x99);
    }

    #[test]
    fn test_repeated_strings_become_references() {
        let mut body = BodyWriter::new(keystream());
        body.write_string_block("origin", STRING_INLINE, STRING_REF);
        let second = body.w.position();
        body.write_string_block("origin", STRING_INLINE, STRING_REF);
        let bytes = body.w.into_bytes();
        assert_eq!(bytes[second as usize], STRING_REF);

        let mut reader = WzReader::new(Cursor::new(bytes), keystream()).unwrap();
        assert_eq!(reader.read_string_block(0).unwrap(), "origin");
        assert_eq!(reader.read_string_block(0).unwrap(), "origin");
    }

    #[test]
    fn test_duplicate_directory_entries_rejected() {
        let builder = WzArchiveBuilder::new(83).directory(
            DirectoryBuilder::new("Obj")
                .image(ImageSpec::new("a.img"))
                .directory(DirectoryBuilder::new("a.img")),
        );
        assert!(matches!(builder.build(), Err(WzError::InvalidBuild(_))));
    }

    #[test]
    fn test_duplicate_property_names_rejected() {
        let builder = WzArchiveBuilder::new(83).image(
            ImageSpec::new("a.img")
                .property(PropertySpec::int("x", 1))
                .property(PropertySpec::int("x", 2)),
        );
        assert!(matches!(builder.build(), Err(WzError::InvalidBuild(_))));
    }

    #[test]
    fn test_canvas_child_shadowing_bitmap_rejected() {
        let builder = WzArchiveBuilder::new(83).image(ImageSpec::new("a.img").property(
            PropertySpec::canvas(
                "icon",
                vec![PropertySpec::int(BITMAP_SEGMENT, 1)],
                BitmapSpec::new(1, 1, FORMAT_BGRA8888, vec![0; 4]),
            ),
        ));
        assert!(matches!(builder.build(), Err(WzError::InvalidBuild(_))));
    }

    #[test]
    fn test_header_records_data_size() {
        let bytes = WzArchiveBuilder::new(83)
            .image(ImageSpec::new("a.img"))
            .build()
            .unwrap();
        let mut reader = WzReader::new(Cursor::new(bytes.clone()), keystream()).unwrap();
        let header = WzHeader::read_from(&mut reader, true).unwrap();
        assert_eq!(header.copyright, DEFAULT_COPYRIGHT);
        assert_eq!(
            header.file_size,
            bytes.len() as u64 - u64::from(header.data_start)
        );
        assert_eq!(reader.read_u16().unwrap(), marker_for_version(83));
    }

    proptest! {
        #[test]
        fn prop_strings_round_trip(value in "\\PC{0,40}") {
            let mut w = WzWriter::new(keystream(), 0, 0);
            w.write_wz_string(&value);
            let mut reader = WzReader::new(Cursor::new(w.into_bytes()), keystream()).unwrap();
            prop_assert_eq!(reader.read_wz_string().unwrap(), value);
        }

        #[test]
        fn prop_compressed_int_round_trips(value in any::<i32>()) {
            let mut w = WzWriter::new(keystream(), 0, 0);
            w.write_compressed_int(value);
            let mut reader = WzReader::new(Cursor::new(w.into_bytes()), keystream()).unwrap();
            prop_assert_eq!(reader.read_compressed_int().unwrap(), value);
        }
    }
}
