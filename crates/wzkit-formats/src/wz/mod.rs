//! WZ archive format implementation
//!
//! A WZ archive packs a game client's resources into one encrypted file:
//!
//! ```text
//! preamble   "PKG1", u64 size, u32 data start, copyright\0
//! data start u16 version marker
//!            root directory entry list
//!            child directory entry lists
//!            image bodies
//! ```
//!
//! Names are encrypted with an AES-derived keystream and entry offsets are
//! obfuscated with a hash of the real client version, which the archive
//! only stores as an 8-bit marker. Opening an archive therefore recovers the
//! version first (see [`resolve_version`]), then decodes the directory
//! skeleton. Image property lists are decoded on first access.
//!
//! # Example
//!
//! ```
//! use std::io::Cursor;
//! use wzkit_formats::wz::{
//!     ArchiveConfig, DirectoryBuilder, ImageSpec, PropertySpec, WzArchive, WzArchiveBuilder,
//! };
//!
//! let bytes = WzArchiveBuilder::new(83)
//!     .directory(
//!         DirectoryBuilder::new("Obj").image(
//!             ImageSpec::new("a.img")
//!                 .property(PropertySpec::sub("info", vec![PropertySpec::vector("origin", 3, 7)])),
//!         ),
//!     )
//!     .build()?;
//!
//! let archive = WzArchive::from_reader("Data.wz", Cursor::new(bytes), &ArchiveConfig::default())?;
//! assert_eq!(archive.game_version(), 83);
//!
//! let x = archive.resolve("Data/Obj/a.img/info/origin/X")?.unwrap();
//! assert_eq!(x.as_property().and_then(|p| p.as_int()), Some(3));
//! # Ok::<(), wzkit_formats::wz::WzError>(())
//! ```

mod archive;
mod builder;
mod canvas;
mod config;
mod directory;
mod error;
mod header;
mod image;
mod object;
mod property;
mod query;
mod reader;
mod version;

pub use archive::{ArchiveSource, Directory, Image, PropertyList, WzArchive};
pub use builder::{
    BitmapSpec, DEFAULT_COPYRIGHT, DirectoryBuilder, ImageSpec, PropertySpec, SoundSpec,
    SpecValue, WzArchiveBuilder, WzWriter,
};
pub use canvas::{
    Bitmap, BlobRef, FORMAT_BGRA4444, FORMAT_BGRA8888, FORMAT_RGB565, FORMAT_RGB565_BLOCK, Sound,
};
pub use config::ArchiveConfig;
pub use directory::{DirectoryId, DirectoryRecord, DirectoryTree, ImageId, ImageRecord};
pub use error::{WzError, WzResult};
pub use header::{FIXED_HEADER_SIZE, WZ_IDENT, WzHeader};
pub use self::image::{LOCATOR_COMPRESSED, LOCATOR_PLAIN};
pub use object::{ObjectType, WzObject};
pub use property::{BITMAP_SEGMENT, Canvas, PropertyKind, PropertyValue, WzProperty, tags, type_names};
pub use query::{PathEntry, wildcard_match};
pub use reader::{WzReader, decode_offset, encode_offset};
pub use version::{
    VersionContext, candidate_hash, marker_for_hash, marker_for_version, resolve_version,
    version_hash,
};
