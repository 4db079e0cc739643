//! Uniform view over every addressable node

use std::sync::Arc;

use crate::wz::archive::{Directory, Image};
use crate::wz::canvas::Bitmap;
use crate::wz::error::WzResult;
use crate::wz::property::{BITMAP_SEGMENT, WzProperty};

/// Kind of a [`WzObject`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectType {
    /// Archive root
    File,
    /// Directory below the root
    Directory,
    /// Image
    Image,
    /// Property or canvas bitmap
    Property,
}

/// Node reached by path resolution or enumeration
///
/// Directories and images compare by identity within their archive,
/// properties and bitmaps by pointer: two objects are equal only if they
/// are the same decoded node.
#[derive(Debug, Clone)]
pub enum WzObject<'a> {
    /// Directory, including the root
    Directory(Directory<'a>),
    /// Image
    Image(Image<'a>),
    /// Decoded property
    Property(Arc<WzProperty>),
    /// Canvas bitmap, the synthetic `PNG` child
    Bitmap(Arc<Bitmap>),
}

impl<'a> WzObject<'a> {
    /// Node name
    ///
    /// Directory and image names come from the archive and fail once it is
    /// released.
    pub fn name(&self) -> WzResult<&str> {
        match self {
            Self::Directory(directory) => directory.name(),
            Self::Image(image) => image.name(),
            Self::Property(property) => Ok(property.name()),
            Self::Bitmap(_) => Ok(BITMAP_SEGMENT),
        }
    }

    /// Node kind
    pub fn object_type(&self) -> ObjectType {
        match self {
            Self::Directory(directory) if directory.is_root() => ObjectType::File,
            Self::Directory(_) => ObjectType::Directory,
            Self::Image(_) => ObjectType::Image,
            Self::Property(_) | Self::Bitmap(_) => ObjectType::Property,
        }
    }

    /// Owning directory of a directory or image
    ///
    /// Properties carry no back-reference; their parent is the previous
    /// path segment.
    pub fn parent(&self) -> WzResult<Option<Self>> {
        Ok(match self {
            Self::Directory(directory) => directory.parent()?.map(Self::Directory),
            Self::Image(image) => Some(Self::Directory(image.parent()?)),
            Self::Property(_) | Self::Bitmap(_) => None,
        })
    }

    /// Directory handle, if this is one
    pub fn as_directory(&self) -> Option<&Directory<'a>> {
        match self {
            Self::Directory(directory) => Some(directory),
            _ => None,
        }
    }

    /// Image handle, if this is one
    pub fn as_image(&self) -> Option<&Image<'a>> {
        match self {
            Self::Image(image) => Some(image),
            _ => None,
        }
    }

    /// Property, if this is one
    pub fn as_property(&self) -> Option<&Arc<WzProperty>> {
        match self {
            Self::Property(property) => Some(property),
            _ => None,
        }
    }

    /// Bitmap, if this is one
    pub fn as_bitmap(&self) -> Option<&Arc<Bitmap>> {
        match self {
            Self::Bitmap(bitmap) => Some(bitmap),
            _ => None,
        }
    }
}

impl PartialEq for WzObject<'_> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Directory(a), Self::Directory(b)) => a == b,
            (Self::Image(a), Self::Image(b)) => a == b,
            (Self::Property(a), Self::Property(b)) => Arc::ptr_eq(a, b),
            (Self::Bitmap(a), Self::Bitmap(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}
