//! Image property model and the tagged property-list parser
//!
//! An image body is a property list: a compressed count followed by
//! `{name, type tag, payload}` entries. Scalar tags carry their value
//! inline; tag 9 wraps an extended object whose string type name selects
//! one of the composite kinds. Every node is decoded into a single tagged
//! [`PropertyValue`] and shared behind an `Arc` so enumeration and path
//! resolution hand out the same node.

use std::io::{Read, Seek};
use std::sync::{Arc, Weak};

use crate::wz::archive::ArchiveInner;
use crate::wz::canvas::{Bitmap, BlobLocation, BlobRef, Sound};
use crate::wz::error::{DecodeContext, WzError, WzResult};
use crate::wz::reader::WzReader;

/// Extended object type names
pub mod type_names {
    /// Named child list
    pub const PROPERTY: &str = "Property";
    /// Child list plus bitmap
    pub const CANVAS: &str = "Canvas";
    /// Two-component integer vector
    pub const VECTOR: &str = "Shape2D#Vector2D";
    /// Positional list of extended objects
    pub const CONVEX: &str = "Shape2D#Convex2D";
    /// Link to another property path
    pub const UOL: &str = "UOL";
    /// Sound payload
    pub const SOUND: &str = "Sound_DX8";
}

/// Property type tags
pub mod tags {
    /// No payload
    pub const NULL: u8 = 0;
    /// Plain i16
    pub const SHORT: u8 = 2;
    /// Compressed i32
    pub const INT: u8 = 3;
    /// Float with a presence byte
    pub const FLOAT: u8 = 4;
    /// Plain f64
    pub const DOUBLE: u8 = 5;
    /// String block
    pub const STRING: u8 = 8;
    /// Length-prefixed extended object
    pub const EXTENDED: u8 = 9;
    /// Alternate i16 tag
    pub const USHORT: u8 = 11;
    /// Alternate compressed i32 tag
    pub const UINT: u8 = 19;
    /// Compressed i64
    pub const LONG: u8 = 20;
}

/// Name of the synthetic child exposing a canvas bitmap
pub const BITMAP_SEGMENT: &str = "PNG";

/// Byte preceding a non-zero float
const FLOAT_PRESENT: u8 = 0x80;

/// Fixed media type header in front of a sound's wave format block
const SOUND_HEADER_LEN: u64 = 51;

/// Nesting limit for property lists
const MAX_DEPTH: usize = 128;

/// Discriminant of a [`PropertyValue`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropertyKind {
    /// No value
    Null,
    /// 16-bit integer
    Short,
    /// 32-bit integer
    Int,
    /// 64-bit integer
    Long,
    /// 32-bit float
    Float,
    /// 64-bit float
    Double,
    /// Text
    String,
    /// Link to another path
    Uol,
    /// Sound payload
    Sound,
    /// Named children
    SubProperty,
    /// Positional children
    Convex,
    /// Integer pair
    Vector,
    /// Named children plus bitmap
    Canvas,
}

/// Canvas payload: declared children plus the embedded bitmap
#[derive(Debug, Clone, PartialEq)]
pub struct Canvas {
    /// Declared child properties
    pub children: Vec<Arc<WzProperty>>,
    /// Embedded bitmap, reachable as the synthetic child `PNG`
    pub bitmap: Arc<Bitmap>,
}

/// Decoded property value
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
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
    /// Link to another property path
    Uol(String),
    /// Sound payload
    Sound(Sound),
    /// Named child list
    SubProperty(Vec<Arc<WzProperty>>),
    /// Positional child list; children are named by index
    Convex(Vec<Arc<WzProperty>>),
    /// Integer pair, exposed as the `Int` children `X` and `Y`
    Vector {
        /// `X` component
        x: Arc<WzProperty>,
        /// `Y` component
        y: Arc<WzProperty>,
    },
    /// Named child list plus bitmap
    Canvas(Canvas),
}

/// Named node of an image's property tree
#[derive(Debug, Clone, PartialEq)]
pub struct WzProperty {
    name: String,
    value: PropertyValue,
}

impl WzProperty {
    /// Create a property
    pub fn new(name: impl Into<String>, value: PropertyValue) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }

    /// Build a vector value from its components
    pub fn vector(x: i32, y: i32) -> PropertyValue {
        PropertyValue::Vector {
            x: Arc::new(Self::new("X", PropertyValue::Int(x))),
            y: Arc::new(Self::new("Y", PropertyValue::Int(y))),
        }
    }

    /// Property name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Decoded value
    pub fn value(&self) -> &PropertyValue {
        &self.value
    }

    /// Discriminant of the value
    pub fn kind(&self) -> PropertyKind {
        match &self.value {
            PropertyValue::Null => PropertyKind::Null,
            PropertyValue::Short(_) => PropertyKind::Short,
            PropertyValue::Int(_) => PropertyKind::Int,
            PropertyValue::Long(_) => PropertyKind::Long,
            PropertyValue::Float(_) => PropertyKind::Float,
            PropertyValue::Double(_) => PropertyKind::Double,
            PropertyValue::String(_) => PropertyKind::String,
            PropertyValue::Uol(_) => PropertyKind::Uol,
            PropertyValue::Sound(_) => PropertyKind::Sound,
            PropertyValue::SubProperty(_) => PropertyKind::SubProperty,
            PropertyValue::Convex(_) => PropertyKind::Convex,
            PropertyValue::Vector { .. } => PropertyKind::Vector,
            PropertyValue::Canvas(_) => PropertyKind::Canvas,
        }
    }

    /// Integer value of any integer kind
    pub fn as_int(&self) -> Option<i64> {
        match self.value {
            PropertyValue::Short(v) => Some(i64::from(v)),
            PropertyValue::Int(v) => Some(i64::from(v)),
            PropertyValue::Long(v) => Some(v),
            _ => None,
        }
    }

    /// Floating point value of any numeric kind
    pub fn as_float(&self) -> Option<f64> {
        match self.value {
            PropertyValue::Float(v) => Some(f64::from(v)),
            PropertyValue::Double(v) => Some(v),
            _ => self.as_int().map(|v| v as f64),
        }
    }

    /// Text of a string or link
    pub fn as_str(&self) -> Option<&str> {
        match &self.value {
            PropertyValue::String(s) | PropertyValue::Uol(s) => Some(s),
            _ => None,
        }
    }

    /// Embedded bitmap of a canvas
    pub fn bitmap(&self) -> Option<&Arc<Bitmap>> {
        match &self.value {
            PropertyValue::Canvas(canvas) => Some(&canvas.bitmap),
            _ => None,
        }
    }

    /// Child properties in enumeration order
    ///
    /// Vectors yield their `X` and `Y` components. The canvas bitmap is not a
    /// property and is not included.
    pub fn children(&self) -> Vec<Arc<Self>> {
        match &self.value {
            PropertyValue::SubProperty(children) | PropertyValue::Convex(children) => {
                children.clone()
            }
            PropertyValue::Canvas(canvas) => canvas.children.clone(),
            PropertyValue::Vector { x, y } => vec![Arc::clone(x), Arc::clone(y)],
            _ => Vec::new(),
        }
    }

    /// Child property addressable by `name`
    ///
    /// Convex children are positional and never addressable by name.
    pub fn child(&self, name: &str) -> Option<Arc<Self>> {
        match &self.value {
            PropertyValue::SubProperty(children) => find_named(children, name),
            PropertyValue::Canvas(canvas) => find_named(&canvas.children, name),
            PropertyValue::Vector { x, .. } if name == "X" => Some(Arc::clone(x)),
            PropertyValue::Vector { y, .. } if name == "Y" => Some(Arc::clone(y)),
            _ => None,
        }
    }
}

pub(crate) fn find_named(children: &[Arc<WzProperty>], name: &str) -> Option<Arc<WzProperty>> {
    children.iter().find(|p| p.name == name).cloned()
}

/// Decoder for property lists positioned inside one image body
pub(crate) struct PropertyParser<'a, R> {
    reader: &'a mut WzReader<R>,
    /// Origin for string-block references
    base: u64,
    location: BlobLocation,
    archive: Weak<ArchiveInner>,
    depth: usize,
}

impl<'a, R: Read + Seek> PropertyParser<'a, R> {
    pub(crate) fn new(
        reader: &'a mut WzReader<R>,
        base: u64,
        location: BlobLocation,
        archive: Weak<ArchiveInner>,
    ) -> Self {
        Self {
            reader,
            base,
            location,
            archive,
            depth: 0,
        }
    }

    fn descend(&mut self, pos: u64) -> WzResult<()> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(WzError::property(pos, "property nesting too deep"));
        }
        Ok(())
    }

    /// Parse a compressed count followed by that many named entries
    pub(crate) fn parse_list(&mut self) -> WzResult<Vec<Arc<WzProperty>>> {
        let start = self.reader.position()?;
        self.descend(start)?;

        let count = self.reader.read_compressed_int().property(start)?;
        let remaining = self.reader.remaining()?;
        if count < 0 || count as u64 > remaining {
            return Err(WzError::property(
                start,
                format!("property count {count} inconsistent with {remaining} remaining bytes"),
            ));
        }

        let mut properties = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let pos = self.reader.position()?;
            let name = self.reader.read_string_block(self.base).property(pos)?;
            let tag = self.reader.read_u8().property(pos)?;

            let value = match tag {
                tags::NULL => PropertyValue::Null,
                tags::SHORT | tags::USHORT => {
                    PropertyValue::Short(self.reader.read_i16().property(pos)?)
                }
                tags::INT | tags::UINT => {
                    PropertyValue::Int(self.reader.read_compressed_int().property(pos)?)
                }
                tags::LONG => PropertyValue::Long(self.reader.read_compressed_long().property(pos)?),
                tags::FLOAT => {
                    if self.reader.read_u8().property(pos)? == FLOAT_PRESENT {
                        PropertyValue::Float(self.reader.read_f32().property(pos)?)
                    } else {
                        PropertyValue::Float(0.0)
                    }
                }
                tags::DOUBLE => PropertyValue::Double(self.reader.read_f64().property(pos)?),
                tags::STRING => {
                    PropertyValue::String(self.reader.read_string_block(self.base).property(pos)?)
                }
                tags::EXTENDED => {
                    let len = self.reader.read_u32().property(pos)?;
                    let end = self.reader.position()? + u64::from(len);
                    if end > self.reader.len() {
                        return Err(WzError::property(
                            pos,
                            format!("extended block of {len} bytes runs past the end"),
                        ));
                    }
                    let value = self.parse_extended()?;
                    self.reader.seek(end)?;
                    value
                }
                other => {
                    return Err(WzError::property(
                        pos,
                        format!("unknown type tag {other} for {name:?}"),
                    ));
                }
            };
            properties.push(Arc::new(WzProperty::new(name, value)));
        }

        self.depth -= 1;
        Ok(properties)
    }

    /// Parse an extended object introduced by its type name
    fn parse_extended(&mut self) -> WzResult<PropertyValue> {
        let pos = self.reader.position()?;
        let type_name = self.reader.read_string_block(self.base).property(pos)?;

        match type_name.as_str() {
            type_names::PROPERTY => {
                self.reader.skip(2).property(pos)?;
                Ok(PropertyValue::SubProperty(self.parse_list()?))
            }
            type_names::CANVAS => self.parse_canvas(pos),
            type_names::VECTOR => {
                let x = self.reader.read_compressed_int().property(pos)?;
                let y = self.reader.read_compressed_int().property(pos)?;
                Ok(WzProperty::vector(x, y))
            }
            type_names::CONVEX => {
                self.descend(pos)?;
                let count = self.reader.read_compressed_int().property(pos)?;
                let remaining = self.reader.remaining()?;
                if count < 0 || count as u64 > remaining {
                    return Err(WzError::property(
                        pos,
                        format!("convex count {count} inconsistent with {remaining} remaining bytes"),
                    ));
                }
                let mut children = Vec::with_capacity(count as usize);
                for index in 0..count {
                    let value = self.parse_extended()?;
                    children.push(Arc::new(WzProperty::new(index.to_string(), value)));
                }
                self.depth -= 1;
                Ok(PropertyValue::Convex(children))
            }
            type_names::UOL => {
                self.reader.skip(1).property(pos)?;
                Ok(PropertyValue::Uol(
                    self.reader.read_string_block(self.base).property(pos)?,
                ))
            }
            type_names::SOUND => self.parse_sound(pos),
            other => Err(WzError::property(
                pos,
                format!("unknown extended object type {other:?}"),
            )),
        }
    }

    fn parse_canvas(&mut self, pos: u64) -> WzResult<PropertyValue> {
        self.reader.skip(1).property(pos)?;
        let children = if self.reader.read_u8().property(pos)? == 1 {
            self.reader.skip(2).property(pos)?;
            self.parse_list()?
        } else {
            Vec::new()
        };
        if children.iter().any(|child| child.name == BITMAP_SEGMENT) {
            return Err(WzError::property(
                pos,
                format!("canvas child named {BITMAP_SEGMENT:?} shadows the bitmap"),
            ));
        }

        let width = self.reader.read_compressed_int().property(pos)?;
        let height = self.reader.read_compressed_int().property(pos)?;
        let format = self.reader.read_compressed_int().property(pos)?;
        let format2 = self.reader.read_u8().property(pos)?;
        self.reader.skip(4).property(pos)?;
        let len = self.reader.read_i32().property(pos)?;

        let (Ok(width), Ok(height), Ok(len)) = (
            u32::try_from(width),
            u32::try_from(height),
            usize::try_from(len),
        ) else {
            return Err(WzError::property(
                pos,
                format!("invalid canvas descriptor {width}x{height}, {len} bytes"),
            ));
        };
        if len == 0 {
            return Err(WzError::property(pos, "canvas without pixel data"));
        }

        self.reader.skip(1).property(pos)?;
        let data = self.blob(len - 1, pos)?;

        Ok(PropertyValue::Canvas(Canvas {
            children,
            bitmap: Arc::new(Bitmap {
                width,
                height,
                format: (format as u32).wrapping_add(u32::from(format2)),
                data,
            }),
        }))
    }

    fn parse_sound(&mut self, pos: u64) -> WzResult<PropertyValue> {
        self.reader.skip(1).property(pos)?;
        let data_len = self.reader.read_compressed_int().property(pos)?;
        let duration_ms = self.reader.read_compressed_int().property(pos)?;

        let header_start = self.reader.position()?;
        self.reader.skip(SOUND_HEADER_LEN).property(pos)?;
        let format_len = self.reader.read_u8().property(pos)?;
        self.reader.seek(header_start)?;
        let header = self
            .reader
            .read_bytes(SOUND_HEADER_LEN as usize + 1 + usize::from(format_len))
            .property(pos)?;

        let data_len = usize::try_from(data_len)
            .map_err(|_| WzError::property(pos, format!("negative sound length {data_len}")))?;
        let data = self.blob(data_len, pos)?;

        Ok(PropertyValue::Sound(Sound {
            duration_ms,
            header,
            data,
        }))
    }

    /// Record `len` payload bytes at the current position and skip them
    fn blob(&mut self, len: usize, pos: u64) -> WzResult<BlobRef> {
        let offset = self.reader.position()?;
        self.reader.skip(len as u64).property(pos)?;
        Ok(BlobRef {
            location: self.location.clone(),
            offset,
            length: len,
            archive: self.archive.clone(),
        })
    }
}
