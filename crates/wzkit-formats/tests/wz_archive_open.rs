#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]
//! Integration tests for opening WZ archives
//!
//! Archives are produced by the builder, then opened through the public
//! API: version recovery, explicit versions, IV selection, identifier
//! checks, lazy image decoding, payload access and release.

use image::{Rgba, RgbaImage};
use pretty_assertions::assert_eq;
use std::io::Cursor;
use wzkit_crypto::{IvStore, MapleVersion};
use wzkit_formats::wz::{
    ArchiveConfig, BitmapSpec, DirectoryBuilder, FORMAT_BGRA8888, ImageSpec, PropertyKind,
    PropertySpec, PropertyValue, SoundSpec, SpecValue, WzArchive, WzArchiveBuilder, WzError,
    WzObject, marker_for_version,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn sample_bitmap() -> RgbaImage {
    RgbaImage::from_fn(3, 2, |x, y| Rgba([x as u8 * 80, y as u8 * 120, 7, 255 - x as u8]))
}

fn sample_builder(game_version: i16) -> WzArchiveBuilder {
    WzArchiveBuilder::new(game_version).directory(
        DirectoryBuilder::new("Obj")
            .image(
                ImageSpec::new("a.img")
                    .property(PropertySpec::sub(
                        "info",
                        vec![
                            PropertySpec::vector("origin", 3, -7),
                            PropertySpec::string("name", "Snail"),
                        ],
                    ))
                    .property(PropertySpec::canvas(
                        "icon",
                        vec![PropertySpec::int("z", 2)],
                        BitmapSpec::from_rgba(&sample_bitmap()),
                    )),
            )
            .image(
                ImageSpec::new("b.img")
                    .property(PropertySpec::canvas(
                        "icon",
                        Vec::new(),
                        BitmapSpec::from_rgba(&sample_bitmap()).encrypted(),
                    ))
                    .property(PropertySpec::new("rate", SpecValue::Double(0.25)))
                    .property(PropertySpec::new("exp", SpecValue::Long(1 << 40)))
                    .property(PropertySpec::new("link", SpecValue::Uol("../a.img/info".into())))
                    .compressed(),
            ),
    )
}

fn open(bytes: Vec<u8>, config: &ArchiveConfig) -> Result<WzArchive, WzError> {
    WzArchive::from_reader("Data.wz", Cursor::new(bytes), config)
}

#[test]
fn recovers_game_version_from_marker() {
    init_tracing();
    let bytes = sample_builder(83).build().unwrap();
    let archive = open(bytes, &ArchiveConfig::default()).unwrap();

    assert_eq!(archive.game_version(), 83);
    assert_eq!(archive.marker(), marker_for_version(83));
    assert!(archive.version_context().is_consistent());
    assert_eq!(archive.name(), "Data.wz");
    assert!(archive.header().has_standard_ident());
}

#[test]
fn colliding_marker_resolved_by_locator_check() {
    // 16 shares 95's marker and is tried first
    assert_eq!(marker_for_version(16), marker_for_version(95));

    let bytes = sample_builder(95).build().unwrap();
    let archive = open(bytes, &ArchiveConfig::default()).unwrap();
    assert_eq!(archive.game_version(), 95);
}

#[test]
fn explicit_game_version_skips_recovery() {
    let bytes = sample_builder(176).build().unwrap();
    let config = ArchiveConfig::default().with_game_version(176);
    let archive = open(bytes, &config).unwrap();
    assert_eq!(archive.game_version(), 176);
    assert!(archive.version_context().is_consistent());
}

#[test]
fn wrong_explicit_version_fails_structurally() {
    let bytes = sample_builder(83).build().unwrap();
    let config = ArchiveConfig::default().with_game_version(84);
    assert!(matches!(
        open(bytes, &config),
        Err(WzError::StructuralDecode { .. })
    ));
}

#[test]
fn exhausted_range_reports_marker() {
    let bytes = sample_builder(83).build().unwrap();
    let config = ArchiveConfig::default().with_max_version(82);
    match open(bytes, &config) {
        Err(WzError::VersionDetection { marker }) => assert_eq!(marker, marker_for_version(83)),
        other => panic!("expected version detection failure, got {other:?}"),
    }
}

#[test]
fn archive_without_images_cannot_be_recovered() {
    let bytes = WzArchiveBuilder::new(83)
        .directory(DirectoryBuilder::new("Empty"))
        .build()
        .unwrap();
    assert!(matches!(
        open(bytes.clone(), &ArchiveConfig::default()),
        Err(WzError::VersionDetection { .. })
    ));

    let archive = open(bytes, &ArchiveConfig::default().with_game_version(83)).unwrap();
    assert_eq!(archive.tree().unwrap().directory_count(), 2);
}

#[test]
fn identifier_checked_only_in_strict_mode() {
    let mut bytes = sample_builder(83).build().unwrap();
    bytes[..4].copy_from_slice(b"PKG2");

    let archive = open(bytes.clone(), &ArchiveConfig::default()).unwrap();
    assert_eq!(archive.header().ident_str(), "PKG2");

    let strict = ArchiveConfig::default().with_strict_ident(true);
    assert!(matches!(open(bytes, &strict), Err(WzError::Format(_))));
}

#[test]
fn truncated_preamble_is_format_error() {
    let bytes = sample_builder(83).build().unwrap();
    assert!(matches!(
        open(bytes[..10].to_vec(), &ArchiveConfig::default()),
        Err(WzError::Format(_))
    ));
}

#[test]
fn region_and_named_ivs() {
    for version in [MapleVersion::Ems, MapleVersion::Bms, MapleVersion::Custom { iv: [9, 8, 7, 6] }] {
        let bytes = sample_builder(83)
            .with_version(version.clone())
            .build()
            .unwrap();
        let archive = open(bytes, &ArchiveConfig::new(version.clone())).unwrap();
        let image = archive.resolve("Data.wz/Obj/a.img").unwrap();
        assert!(image.is_some(), "{version}: image not found");
    }

    let mut store = IvStore::new();
    store.insert("kms", [0x11, 0x22, 0x33, 0x44]);
    let version = MapleVersion::Named("KMS".to_string());
    let bytes = sample_builder(83)
        .with_version(version.clone())
        .build_with_provider(&store)
        .unwrap();
    let archive = WzArchive::from_reader_with_provider(
        "Data.wz",
        Cursor::new(bytes),
        &ArchiveConfig::new(version),
        &store,
    )
    .unwrap();
    assert_eq!(archive.game_version(), 83);

    let unknown = ArchiveConfig::new(MapleVersion::Named("nope".to_string()));
    assert!(matches!(
        open(sample_builder(83).build().unwrap(), &unknown),
        Err(WzError::Crypto(_))
    ));
}

#[test]
fn images_decode_lazily() {
    let archive = open(sample_builder(83).build().unwrap(), &ArchiveConfig::default()).unwrap();
    let obj = archive.root().unwrap().directory("Obj").unwrap().unwrap();
    let a = obj.image("a.img").unwrap().unwrap();
    let b = obj.image("b.img").unwrap().unwrap();

    assert!(!a.is_parsed());
    assert!(!b.is_parsed());

    let info = a.property("info").unwrap().unwrap();
    assert_eq!(info.kind(), PropertyKind::SubProperty);
    assert_eq!(info.child("name").unwrap().as_str(), Some("Snail"));
    assert!(a.is_parsed());
    assert!(!b.is_parsed());
}

#[test]
fn compressed_image_scalars() {
    let archive = open(sample_builder(83).build().unwrap(), &ArchiveConfig::default()).unwrap();
    let b = archive
        .resolve("Data.wz/Obj/b.img")
        .unwrap()
        .unwrap()
        .as_image()
        .copied()
        .unwrap();

    assert_eq!(b.property("rate").unwrap().unwrap().as_float(), Some(0.25));
    assert_eq!(b.property("exp").unwrap().unwrap().as_int(), Some(1 << 40));
    let link = b.property("link").unwrap().unwrap();
    assert_eq!(link.kind(), PropertyKind::Uol);
    assert_eq!(link.as_str(), Some("../a.img/info"));
}

#[test]
fn canvas_bitmaps_decode() {
    let archive = open(sample_builder(83).build().unwrap(), &ArchiveConfig::default()).unwrap();
    let expected = sample_bitmap();

    // Plain body with zlib pixel data, then compressed body with encrypted blocks
    for path in ["Data.wz/Obj/a.img/icon/PNG", "Data.wz/Obj/b.img/icon/PNG"] {
        let object = archive.resolve(path).unwrap().unwrap();
        let bitmap = object.as_bitmap().unwrap();
        assert_eq!((bitmap.width, bitmap.height), (3, 2));
        assert_eq!(bitmap.decode().unwrap(), expected, "{path}");
    }

    let icon = archive.resolve("Data.wz/Obj/a.img/icon").unwrap().unwrap();
    let icon = icon.as_property().unwrap();
    assert_eq!(icon.child("z").unwrap().as_int(), Some(2));
    assert!(icon.child("PNG").is_none());
    assert!(icon.bitmap().is_some());
}

#[test]
fn oversized_canvas_fails_to_decode() {
    let bytes = WzArchiveBuilder::new(83)
        .image(ImageSpec::new("huge.img").property(PropertySpec::canvas(
            "icon",
            Vec::new(),
            BitmapSpec::new(0x7FFF_FFFF, 0x7FFF_FFFF, FORMAT_BGRA8888, vec![0; 16]),
        )))
        .build()
        .unwrap();
    let archive = open(bytes, &ArchiveConfig::default()).unwrap();

    let object = archive.resolve("Data.wz/huge.img/icon/PNG").unwrap().unwrap();
    let bitmap = object.as_bitmap().unwrap();
    assert_eq!((bitmap.width, bitmap.height), (0x7FFF_FFFF, 0x7FFF_FFFF));
    assert!(matches!(
        bitmap.decode(),
        Err(WzError::PropertyDecode { .. })
    ));
}

#[test]
fn sound_payload() {
    let bytes = WzArchiveBuilder::new(83)
        .image(ImageSpec::new("Bgm00.img").property(PropertySpec::new(
            "FloralLife",
            SpecValue::Sound(SoundSpec {
                duration_ms: 1500,
                format: vec![1, 2, 3, 4],
                data: b"ID3 audio".to_vec(),
            }),
        )))
        .build()
        .unwrap();
    let archive = open(bytes, &ArchiveConfig::default()).unwrap();

    let sound = archive
        .resolve("Data/Bgm00.img/FloralLife")
        .unwrap()
        .unwrap();
    let PropertyValue::Sound(sound) = sound.as_property().unwrap().value() else {
        panic!("expected a sound property");
    };
    assert_eq!(sound.duration_ms, 1500);
    assert_eq!(sound.header.len(), 51 + 1 + 4);
    assert_eq!(sound.read_data().unwrap(), b"ID3 audio");
}

#[test]
fn release_is_idempotent_and_final() {
    let archive = open(sample_builder(83).build().unwrap(), &ArchiveConfig::default()).unwrap();
    let obj = archive.root().unwrap().directory("Obj").unwrap().unwrap();
    let a = obj.image("a.img").unwrap().unwrap();
    let b = obj.image("b.img").unwrap().unwrap();
    let bitmap = a.property("icon").unwrap().unwrap().bitmap().cloned().unwrap();
    let inline_bitmap = b.property("icon").unwrap().unwrap().bitmap().cloned().unwrap();

    archive.release();
    archive.release();
    assert!(archive.is_released());

    assert!(matches!(archive.list_all(), Err(WzError::UseAfterDispose)));
    assert!(matches!(
        archive.resolve("Data.wz/Obj"),
        Err(WzError::UseAfterDispose)
    ));
    assert!(matches!(a.properties(), Err(WzError::UseAfterDispose)));
    assert!(matches!(a.name(), Err(WzError::UseAfterDispose)));
    assert!(matches!(a.path(), Err(WzError::UseAfterDispose)));
    assert!(matches!(a.offset(), Err(WzError::UseAfterDispose)));
    assert!(matches!(a.size(), Err(WzError::UseAfterDispose)));
    assert!(matches!(a.checksum(), Err(WzError::UseAfterDispose)));
    assert!(matches!(obj.name(), Err(WzError::UseAfterDispose)));
    assert!(matches!(obj.path(), Err(WzError::UseAfterDispose)));
    assert!(matches!(
        WzObject::Image(b).name(),
        Err(WzError::UseAfterDispose)
    ));
    assert!(matches!(obj.directories(), Err(WzError::UseAfterDispose)));
    assert!(matches!(bitmap.decode(), Err(WzError::UseAfterDispose)));
    assert!(matches!(inline_bitmap.decode(), Err(WzError::UseAfterDispose)));
}

#[test]
fn bitmap_outliving_archive_reports_dispose() {
    let bitmap = {
        let archive =
            open(sample_builder(83).build().unwrap(), &ArchiveConfig::default()).unwrap();
        let object = archive.resolve("Data.wz/Obj/a.img/icon/PNG").unwrap().unwrap();
        object.as_bitmap().cloned().unwrap()
    };
    assert!(matches!(bitmap.decode(), Err(WzError::UseAfterDispose)));
}

#[test]
fn open_from_path_uses_file_name() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("Character.wz");
    std::fs::write(&path, sample_builder(83).build().unwrap()).unwrap();

    let archive = WzArchive::open(&path, &ArchiveConfig::default()).unwrap();
    assert_eq!(archive.name(), "Character.wz");
    assert!(archive.resolve("character/Obj/a.img/info").unwrap().is_some());
    assert!(matches!(
        WzArchive::open(dir.path().join("missing.wz"), &ArchiveConfig::default()),
        Err(WzError::Io(_))
    ));
}
