//! Opened archives and handles into their directory tree
//!
//! [`WzArchive`] owns the stream, the decoded skeleton and the per-image
//! property caches. [`Directory`] and [`Image`] are cheap borrowed handles;
//! every access that needs archive state checks that the archive has not
//! been released.

use parking_lot::Mutex;
use std::fmt;
use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};
use wzkit_crypto::{IvStore, KeyProvider, WzKeystream};

use crate::wz::config::ArchiveConfig;
use crate::wz::directory::{DirectoryId, DirectoryRecord, DirectoryTree, ImageId, ImageRecord};
use crate::wz::error::{DecodeContext, WzError, WzResult};
use crate::wz::header::WzHeader;
use crate::wz::image::parse_image;
use crate::wz::property::{WzProperty, find_named};
use crate::wz::reader::WzReader;
use crate::wz::version::{VersionContext, resolve_version};

/// Byte stream an archive can be decoded from
pub trait ArchiveSource: Read + Seek + Send {}

impl<T: Read + Seek + Send> ArchiveSource for T {}

type SourceReader = WzReader<Box<dyn ArchiveSource>>;

/// Top-level properties of one image
pub type PropertyList = Arc<[Arc<WzProperty>]>;

/// State shared by an archive and the payload references it hands out
pub(crate) struct ArchiveInner {
    pub(crate) name: String,
    pub(crate) header: WzHeader,
    pub(crate) version: VersionContext,
    pub(crate) tree: DirectoryTree,
    keystream: Mutex<WzKeystream>,
    source: Mutex<Option<SourceReader>>,
    images: Vec<Mutex<Option<PropertyList>>>,
    released: AtomicBool,
}

impl ArchiveInner {
    pub(crate) fn ensure_live(&self) -> WzResult<()> {
        if self.released.load(Ordering::Acquire) {
            return Err(WzError::UseAfterDispose);
        }
        Ok(())
    }

    /// Run `f` with the shared payload keystream
    pub(crate) fn with_keystream<T>(&self, f: impl FnOnce(&mut WzKeystream) -> T) -> T {
        f(&mut self.keystream.lock())
    }

    /// Read `len` bytes at an absolute stream offset
    pub(crate) fn read_range(&self, offset: u64, len: usize) -> WzResult<Vec<u8>> {
        let mut source = self.source.lock();
        let reader = source.as_mut().ok_or(WzError::UseAfterDispose)?;
        reader.seek(offset)?;
        reader.read_bytes(len).property(offset)
    }

    /// Top-level properties of an image, decoding them on first access
    pub(crate) fn image_properties(self: &Arc<Self>, id: ImageId) -> WzResult<PropertyList> {
        self.ensure_live()?;
        let mut slot = self.images[id.0].lock();
        if let Some(properties) = slot.as_ref() {
            return Ok(Arc::clone(properties));
        }

        let record = self.tree.image(id);
        let properties: PropertyList = {
            let mut source = self.source.lock();
            let reader = source.as_mut().ok_or(WzError::UseAfterDispose)?;
            parse_image(reader, u64::from(record.offset), &Arc::downgrade(self))?.into()
        };
        debug!(
            image = %record.name,
            properties = properties.len(),
            "parsed image properties"
        );

        *slot = Some(Arc::clone(&properties));
        Ok(properties)
    }

    fn is_parsed(&self, id: ImageId) -> bool {
        self.images[id.0].lock().is_some()
    }
}

/// An opened WZ archive
pub struct WzArchive {
    pub(crate) inner: Arc<ArchiveInner>,
}

impl WzArchive {
    /// Open an archive file with the built-in IV table
    pub fn open(path: impl AsRef<Path>, config: &ArchiveConfig) -> WzResult<Self> {
        Self::open_with_provider(path, config, &IvStore::new())
    }

    /// Open an archive file, taking the IV from `provider`
    pub fn open_with_provider<P: KeyProvider>(
        path: impl AsRef<Path>,
        config: &ArchiveConfig,
        provider: &P,
    ) -> WzResult<Self> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let file = File::open(path)?;
        Self::from_reader_with_provider(name, BufReader::new(file), config, provider)
    }

    /// Decode an archive from any seekable stream
    ///
    /// `name` becomes the root directory name and the first path segment.
    pub fn from_reader<R: Read + Seek + Send + 'static>(
        name: impl Into<String>,
        reader: R,
        config: &ArchiveConfig,
    ) -> WzResult<Self> {
        Self::from_reader_with_provider(name, reader, config, &IvStore::new())
    }

    /// Decode an archive from a stream, taking the IV from `provider`
    pub fn from_reader_with_provider<R, P>(
        name: impl Into<String>,
        reader: R,
        config: &ArchiveConfig,
        provider: &P,
    ) -> WzResult<Self>
    where
        R: Read + Seek + Send + 'static,
        P: KeyProvider,
    {
        let name = name.into();
        let iv = provider.iv(&config.version)?;
        let source: Box<dyn ArchiveSource> = Box::new(reader);
        let mut reader = WzReader::new(source, WzKeystream::new(&iv))?;

        let header = WzHeader::read_from(&mut reader, config.strict_ident)?;
        reader.set_data_start(header.data_start);

        let version = resolve_version(
            &mut reader,
            &name,
            iv,
            config.game_version,
            config.max_version,
        )?;
        // Rejected candidates can grow the keystream up to the file size
        reader.keystream_mut().reset();
        let tree = DirectoryTree::decode(&mut reader, &name)?;

        info!(
            archive = %name,
            game_version = version.game_version,
            directories = tree.directory_count(),
            images = tree.image_count(),
            "opened archive"
        );

        let images = (0..tree.image_count()).map(|_| Mutex::new(None)).collect();
        Ok(Self {
            inner: Arc::new(ArchiveInner {
                name,
                header,
                version,
                tree,
                keystream: Mutex::new(WzKeystream::new(&iv)),
                source: Mutex::new(Some(reader)),
                images,
                released: AtomicBool::new(false),
            }),
        })
    }

    /// Archive name, the root path segment
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Archive preamble
    pub fn header(&self) -> &WzHeader {
        &self.inner.header
    }

    /// Version parameters the archive was decoded with
    pub fn version_context(&self) -> &VersionContext {
        &self.inner.version
    }

    /// Real client version
    pub fn game_version(&self) -> i16 {
        self.inner.version.game_version
    }

    /// Hash keying offset decoding
    pub fn version_hash(&self) -> u32 {
        self.inner.version.hash
    }

    /// Marker as stored in the archive
    pub fn marker(&self) -> u16 {
        self.inner.version.marker
    }

    /// Decoded directory skeleton
    pub fn tree(&self) -> WzResult<&DirectoryTree> {
        self.inner.ensure_live()?;
        Ok(&self.inner.tree)
    }

    /// Root directory
    pub fn root(&self) -> WzResult<Directory<'_>> {
        self.inner.ensure_live()?;
        Ok(Directory {
            archive: &self.inner,
            id: DirectoryTree::ROOT,
        })
    }

    /// Whether [`release`](Self::release) has been called
    pub fn is_released(&self) -> bool {
        self.inner.released.load(Ordering::Acquire)
    }

    /// Close the stream and drop every cached property tree
    ///
    /// Calling this more than once is a no-op. Afterwards every access that
    /// needs archive data fails with [`WzError::UseAfterDispose`].
    pub fn release(&self) {
        if self.inner.released.swap(true, Ordering::AcqRel) {
            return;
        }
        drop(self.inner.source.lock().take());
        for slot in &self.inner.images {
            slot.lock().take();
        }
        info!(archive = %self.inner.name, "released archive");
    }
}

impl fmt::Debug for WzArchive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WzArchive")
            .field("name", &self.inner.name)
            .field("game_version", &self.inner.version.game_version)
            .field("released", &self.is_released())
            .finish_non_exhaustive()
    }
}

/// Handle to a directory of an open archive
#[derive(Clone, Copy)]
pub struct Directory<'a> {
    archive: &'a Arc<ArchiveInner>,
    id: DirectoryId,
}

impl<'a> Directory<'a> {
    fn record(&self) -> WzResult<&'a DirectoryRecord> {
        self.archive.ensure_live()?;
        Ok(self.archive.tree.directory(self.id))
    }

    /// Directory name; the archive name for the root
    pub fn name(&self) -> WzResult<&'a str> {
        Ok(&self.record()?.name)
    }

    /// Id in the archive's [`DirectoryTree`]
    pub fn id(&self) -> DirectoryId {
        self.id
    }

    /// Whether this is the archive root
    pub fn is_root(&self) -> bool {
        self.id == DirectoryTree::ROOT
    }

    /// Slash-joined path starting with the archive name
    pub fn path(&self) -> WzResult<String> {
        self.archive.ensure_live()?;
        Ok(self.archive.tree.directory_path(self.id))
    }

    /// Parent directory, `None` for the root
    pub fn parent(&self) -> WzResult<Option<Self>> {
        self.archive.ensure_live()?;
        Ok(self
            .archive
            .tree
            .directory(self.id)
            .parent
            .map(|id| self.directory_handle(id)))
    }

    /// Child directories in stored order
    pub fn directories(&self) -> WzResult<Vec<Self>> {
        self.archive.ensure_live()?;
        Ok(self
            .archive
            .tree
            .directory(self.id)
            .directories
            .iter()
            .map(|id| self.directory_handle(*id))
            .collect())
    }

    /// Child images in stored order
    pub fn images(&self) -> WzResult<Vec<Image<'a>>> {
        self.archive.ensure_live()?;
        Ok(self
            .archive
            .tree
            .directory(self.id)
            .images
            .iter()
            .map(|id| self.image_handle(*id))
            .collect())
    }

    /// Child directory named exactly `name`
    pub fn directory(&self, name: &str) -> WzResult<Option<Self>> {
        self.archive.ensure_live()?;
        Ok(self
            .archive
            .tree
            .find_directory(self.id, name)
            .map(|id| self.directory_handle(id)))
    }

    /// Child image named exactly `name`
    pub fn image(&self, name: &str) -> WzResult<Option<Image<'a>>> {
        self.archive.ensure_live()?;
        Ok(self
            .archive
            .tree
            .find_image(self.id, name)
            .map(|id| self.image_handle(id)))
    }

    fn directory_handle(&self, id: DirectoryId) -> Self {
        Self {
            archive: self.archive,
            id,
        }
    }

    fn image_handle(&self, id: ImageId) -> Image<'a> {
        Image {
            archive: self.archive,
            id,
        }
    }
}

impl fmt::Debug for Directory<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Directory")
            .field("name", &self.name().ok())
            .field("id", &self.id)
            .finish()
    }
}

impl PartialEq for Directory<'_> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(self.archive, other.archive) && self.id == other.id
    }
}

/// Handle to an image of an open archive
#[derive(Clone, Copy)]
pub struct Image<'a> {
    archive: &'a Arc<ArchiveInner>,
    id: ImageId,
}

impl<'a> Image<'a> {
    fn record(&self) -> WzResult<&'a ImageRecord> {
        self.archive.ensure_live()?;
        Ok(self.archive.tree.image(self.id))
    }

    /// Image name
    pub fn name(&self) -> WzResult<&'a str> {
        Ok(&self.record()?.name)
    }

    /// Id in the archive's [`DirectoryTree`]
    pub fn id(&self) -> ImageId {
        self.id
    }

    /// Absolute offset of the body
    pub fn offset(&self) -> WzResult<u32> {
        Ok(self.record()?.offset)
    }

    /// Declared body size
    pub fn size(&self) -> WzResult<i32> {
        Ok(self.record()?.size)
    }

    /// Declared body checksum
    pub fn checksum(&self) -> WzResult<i32> {
        Ok(self.record()?.checksum)
    }

    /// Slash-joined path starting with the archive name
    pub fn path(&self) -> WzResult<String> {
        self.archive.ensure_live()?;
        Ok(self.archive.tree.image_path(self.id))
    }

    /// Owning directory
    pub fn parent(&self) -> WzResult<Directory<'a>> {
        self.archive.ensure_live()?;
        Ok(Directory {
            archive: self.archive,
            id: self.archive.tree.image(self.id).parent,
        })
    }

    /// Top-level properties, decoded on first access and cached
    pub fn properties(&self) -> WzResult<PropertyList> {
        self.archive.image_properties(self.id)
    }

    /// Top-level property named exactly `name`
    pub fn property(&self, name: &str) -> WzResult<Option<Arc<WzProperty>>> {
        Ok(find_named(&self.properties()?, name))
    }

    /// Whether the property list has been decoded
    pub fn is_parsed(&self) -> bool {
        self.archive.is_parsed(self.id)
    }
}

impl fmt::Debug for Image<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Image")
            .field("name", &self.name().ok())
            .field("offset", &self.offset().ok())
            .field("parsed", &self.is_parsed())
            .finish()
    }
}

impl PartialEq for Image<'_> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(self.archive, other.archive) && self.id == other.id
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::wz::builder::{
        BitmapSpec, DirectoryBuilder, ImageSpec, PropertySpec, WzArchiveBuilder,
    };
    use std::io::Cursor;

    fn open(builder: &WzArchiveBuilder) -> WzArchive {
        let bytes = builder.build().unwrap();
        WzArchive::from_reader("Test.wz", Cursor::new(bytes), &ArchiveConfig::default()).unwrap()
    }

    fn sample() -> WzArchiveBuilder {
        WzArchiveBuilder::new(83).directory(
            DirectoryBuilder::new("Mob")
                .image(ImageSpec::new("100100.img").property(PropertySpec::int("level", 2)))
                .directory(DirectoryBuilder::new("Boss")),
        )
    }

    #[test]
    fn test_navigation_handles() {
        let archive = open(&sample());
        assert_eq!(archive.game_version(), 83);

        let root = archive.root().unwrap();
        assert!(root.is_root());
        assert_eq!(root.name().unwrap(), "Test.wz");

        let mob = root.directory("Mob").unwrap().unwrap();
        assert_eq!(mob.parent().unwrap(), Some(root));
        let boss = mob.directory("Boss").unwrap().unwrap();
        assert_eq!(boss.path().unwrap(), "Test.wz/Mob/Boss");

        let image = mob.image("100100.img").unwrap().unwrap();
        assert_eq!(image.parent().unwrap(), mob);
        assert!(image.size().unwrap() > 0);
        assert_eq!(image.path().unwrap(), "Test.wz/Mob/100100.img");
        assert!(root.image("100100.img").unwrap().is_none());
    }

    #[test]
    fn test_image_parsed_lazily_once() {
        let archive = open(&sample());
        let image = archive
            .root()
            .unwrap()
            .directory("Mob")
            .unwrap()
            .unwrap()
            .image("100100.img")
            .unwrap()
            .unwrap();

        assert!(!image.is_parsed());
        let first = image.properties().unwrap();
        assert!(image.is_parsed());
        let second = image.properties().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(image.property("level").unwrap().unwrap().as_int(), Some(2));
    }

    #[test]
    fn test_payload_keystream_shared_between_decodes() {
        let archive = open(&WzArchiveBuilder::new(83).image(ImageSpec::new("icon.img").property(
            PropertySpec::canvas(
                "icon",
                Vec::new(),
                BitmapSpec::new(2, 2, 2, vec![0x40; 16]).encrypted(),
            ),
        )));
        assert_eq!(archive.inner.with_keystream(|keystream| keystream.generated()), 0);

        let bitmap = archive
            .resolve("Test.wz/icon.img/icon/PNG")
            .unwrap()
            .unwrap()
            .as_bitmap()
            .cloned()
            .unwrap();
        let first = bitmap.decode().unwrap();
        let generated = archive.inner.with_keystream(|keystream| keystream.generated());
        assert!(generated > 0);

        assert_eq!(bitmap.decode().unwrap(), first);
        assert_eq!(
            archive.inner.with_keystream(|keystream| keystream.generated()),
            generated
        );
    }

    #[test]
    fn test_release_invalidates_handles() {
        let archive = open(&sample());
        let root = archive.root().unwrap();
        let mob = root.directory("Mob").unwrap().unwrap();
        let image = mob.image("100100.img").unwrap().unwrap();

        archive.release();
        archive.release();

        assert!(archive.is_released());
        assert!(matches!(mob.name(), Err(WzError::UseAfterDispose)));
        assert!(matches!(mob.path(), Err(WzError::UseAfterDispose)));
        assert!(matches!(image.name(), Err(WzError::UseAfterDispose)));
        assert!(matches!(image.path(), Err(WzError::UseAfterDispose)));
        assert!(matches!(image.offset(), Err(WzError::UseAfterDispose)));
        assert!(matches!(image.size(), Err(WzError::UseAfterDispose)));
        assert!(matches!(image.checksum(), Err(WzError::UseAfterDispose)));
        assert!(matches!(mob.images(), Err(WzError::UseAfterDispose)));
        assert!(matches!(archive.root(), Err(WzError::UseAfterDispose)));
    }
}
