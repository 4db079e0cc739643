//! Directory/image skeleton decoding
//!
//! A directory is a compressed entry count followed by that many entries.
//! Each entry carries an encrypted name, a size, a checksum and a
//! position-keyed offset. Child directories are decoded right after their
//! parent's entry list by seeking to their offsets; images are only recorded.

use std::collections::HashSet;
use std::io::{Read, Seek};
use tracing::debug;

use crate::wz::error::{DecodeContext, WzError, WzResult};
use crate::wz::reader::WzReader;

/// Entry referencing data elsewhere; carries no name and is skipped
pub const ENTRY_REFERENCE: u8 = 1;
/// Entry whose tag and name live at `data_start + i32`
pub const ENTRY_NAME_AT_OFFSET: u8 = 2;
/// Directory entry
pub const ENTRY_DIRECTORY: u8 = 3;
/// Image entry
pub const ENTRY_IMAGE: u8 = 4;

/// Nesting limit for directory decoding
const MAX_DEPTH: usize = 64;

/// Index of a directory in a [`DirectoryTree`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DirectoryId(pub(crate) usize);

/// Index of an image in a [`DirectoryTree`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ImageId(pub(crate) usize);

/// Decoded directory entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryRecord {
    /// Entry name; the archive name for the root
    pub name: String,
    /// Parent directory, `None` for the root
    pub parent: Option<DirectoryId>,
    /// Declared block size
    pub size: i32,
    /// Declared checksum
    pub checksum: i32,
    /// Absolute offset of the entry list
    pub offset: u32,
    /// Child directories in stored order
    pub directories: Vec<DirectoryId>,
    /// Child images in stored order
    pub images: Vec<ImageId>,
}

/// Decoded image entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRecord {
    /// Entry name, usually ending in `.img`
    pub name: String,
    /// Owning directory
    pub parent: DirectoryId,
    /// Declared body size
    pub size: i32,
    /// Declared checksum
    pub checksum: i32,
    /// Absolute offset of the body
    pub offset: u32,
}

/// Arena holding every directory and image of an archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryTree {
    directories: Vec<DirectoryRecord>,
    images: Vec<ImageRecord>,
}

impl DirectoryTree {
    /// Id of the root directory
    pub const ROOT: DirectoryId = DirectoryId(0);

    /// Decode the tree whose root entry list starts at the current position
    ///
    /// The reader must already be keyed with the data-start offset and
    /// version hash.
    pub fn decode<R: Read + Seek>(reader: &mut WzReader<R>, root_name: &str) -> WzResult<Self> {
        let root_offset = reader.position()?;
        let mut tree = Self {
            directories: vec![DirectoryRecord {
                name: root_name.to_string(),
                parent: None,
                size: 0,
                checksum: 0,
                offset: root_offset as u32,
                directories: Vec::new(),
                images: Vec::new(),
            }],
            images: Vec::new(),
        };

        let mut visited = HashSet::from([root_offset]);
        tree.decode_entries(reader, Self::ROOT, 0, &mut visited)?;

        debug!(
            directories = tree.directories.len(),
            images = tree.images.len(),
            "decoded directory tree"
        );
        Ok(tree)
    }

    fn decode_entries<R: Read + Seek>(
        &mut self,
        reader: &mut WzReader<R>,
        dir: DirectoryId,
        depth: usize,
        visited: &mut HashSet<u64>,
    ) -> WzResult<()> {
        let start = reader.position()?;
        if depth > MAX_DEPTH {
            return Err(WzError::structural(start, "directory nesting too deep"));
        }

        let count = reader.read_compressed_int().structural(start)?;
        let remaining = reader.remaining()?;
        if count < 0 || count as u64 > remaining {
            return Err(WzError::structural(
                start,
                format!("entry count {count} inconsistent with {remaining} remaining bytes"),
            ));
        }

        let mut names = HashSet::new();
        let mut subdirectories = Vec::new();

        for _ in 0..count {
            let entry_pos = reader.position()?;
            let tag = reader.read_u8().structural(entry_pos)?;

            let (kind, name) = match tag {
                ENTRY_REFERENCE => {
                    reader.read_i32().structural(entry_pos)?;
                    reader.read_i16().structural(entry_pos)?;
                    reader.read_offset().structural(entry_pos)?;
                    continue;
                }
                ENTRY_NAME_AT_OFFSET => {
                    let relative = reader.read_i32().structural(entry_pos)?;
                    let target = u64::from(reader.data_start())
                        .checked_add_signed(i64::from(relative))
                        .filter(|target| *target < reader.len())
                        .ok_or_else(|| {
                            WzError::structural(
                                entry_pos,
                                format!("name reference {relative} outside file"),
                            )
                        })?;
                    reader
                        .with_restore(|r| -> binrw::BinResult<(u8, String)> {
                            r.seek(target)?;
                            let kind = r.read_u8()?;
                            let name = r.read_wz_string()?;
                            Ok((kind, name))
                        })
                        .structural(entry_pos)?
                }
                ENTRY_DIRECTORY | ENTRY_IMAGE => {
                    let name = reader.read_wz_string().structural(entry_pos)?;
                    (tag, name)
                }
                other => {
                    return Err(WzError::structural(
                        entry_pos,
                        format!("unknown entry tag {other}"),
                    ));
                }
            };

            let size = reader.read_compressed_int().structural(entry_pos)?;
            let checksum = reader.read_compressed_int().structural(entry_pos)?;
            let offset = reader.read_offset().structural(entry_pos)?;

            if u64::from(offset) >= reader.len() {
                return Err(WzError::structural(
                    entry_pos,
                    format!(
                        "offset {offset} of {name:?} outside file of {} bytes",
                        reader.len()
                    ),
                ));
            }
            if !names.insert(name.clone()) {
                return Err(WzError::structural(
                    entry_pos,
                    format!("duplicate entry name {name:?}"),
                ));
            }

            match kind {
                ENTRY_DIRECTORY => {
                    let id = DirectoryId(self.directories.len());
                    self.directories.push(DirectoryRecord {
                        name,
                        parent: Some(dir),
                        size,
                        checksum,
                        offset,
                        directories: Vec::new(),
                        images: Vec::new(),
                    });
                    self.directories[dir.0].directories.push(id);
                    subdirectories.push(id);
                }
                ENTRY_IMAGE => {
                    let id = ImageId(self.images.len());
                    self.images.push(ImageRecord {
                        name,
                        parent: dir,
                        size,
                        checksum,
                        offset,
                    });
                    self.directories[dir.0].images.push(id);
                }
                other => {
                    return Err(WzError::structural(
                        entry_pos,
                        format!("name reference resolves to entry tag {other}"),
                    ));
                }
            }
        }

        for id in subdirectories {
            let offset = u64::from(self.directories[id.0].offset);
            if !visited.insert(offset) {
                return Err(WzError::structural(
                    offset,
                    "directory offset already decoded (cycle)",
                ));
            }
            reader.seek(offset)?;
            self.decode_entries(reader, id, depth + 1, visited)?;
        }

        Ok(())
    }

    /// Directory record by id
    ///
    /// Ids are only handed out by this tree, so indexing cannot fail for them.
    pub fn directory(&self, id: DirectoryId) -> &DirectoryRecord {
        &self.directories[id.0]
    }

    /// Image record by id
    pub fn image(&self, id: ImageId) -> &ImageRecord {
        &self.images[id.0]
    }

    /// Number of directories, root included
    pub fn directory_count(&self) -> usize {
        self.directories.len()
    }

    /// Number of images
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Child directory of `dir` named exactly `name`
    pub fn find_directory(&self, dir: DirectoryId, name: &str) -> Option<DirectoryId> {
        self.directory(dir)
            .directories
            .iter()
            .copied()
            .find(|id| self.directory(*id).name == name)
    }

    /// Child image of `dir` named exactly `name`
    pub fn find_image(&self, dir: DirectoryId, name: &str) -> Option<ImageId> {
        self.directory(dir)
            .images
            .iter()
            .copied()
            .find(|id| self.image(*id).name == name)
    }

    /// First image in enumeration order: a directory's own images, then its subdirectories
    pub fn first_image(&self) -> Option<ImageId> {
        self.first_image_under(Self::ROOT)
    }

    fn first_image_under(&self, dir: DirectoryId) -> Option<ImageId> {
        let record = self.directory(dir);
        record.images.first().copied().or_else(|| {
            record
                .directories
                .iter()
                .find_map(|child| self.first_image_under(*child))
        })
    }

    /// Slash-joined path of a directory, starting with the root's name
    pub fn directory_path(&self, id: DirectoryId) -> String {
        let mut segments = Vec::new();
        let mut current = Some(id);
        while let Some(dir) = current {
            let record = self.directory(dir);
            segments.push(record.name.as_str());
            current = record.parent;
        }
        segments.reverse();
        segments.join("/")
    }

    /// Slash-joined path of an image
    pub fn image_path(&self, id: ImageId) -> String {
        let record = self.image(id);
        format!("{}/{}", self.directory_path(record.parent), record.name)
    }
}
