//! WZ archive decoder and builder
//!
#![allow(clippy::cast_possible_truncation)] // Intentional for binary format parsing
#![allow(clippy::cast_possible_wrap)] // Intentional for binary operations
#![allow(clippy::cast_lossless)] // Sometimes clearer than From
#![allow(clippy::cast_precision_loss)] // Integer to float accessors
#![allow(clippy::doc_markdown)] // Format terms don't need backticks
#![allow(clippy::module_name_repetitions)] // Clear naming is preferred
#![allow(clippy::similar_names)] // Domain-specific naming patterns
#![allow(clippy::derive_partial_eq_without_eq)] // Float-carrying property values
#![allow(clippy::return_self_not_must_use)] // Builder patterns
//! This crate decodes the encrypted resource archives (`.wz` files) shipped
//! with MapleStory clients and writes archives in the same format.
//!
//! # Components
//!
//! - **Header**: fixed preamble and data-start offset
//! - **Version recovery**: brute-force search for the real client version
//!   behind the stored marker, confirmed by a trial directory decode
//! - **Directory tree**: eager decode of encrypted entry names and
//!   position-keyed offsets
//! - **Property model**: lazily decoded, cached property tree per image,
//!   including canvases whose pixel data is inflated on demand
//! - **Queries**: path resolution, depth-first enumeration, wildcard and
//!   regular-expression filters over materialized paths
//! - **Builder**: synthetic archives for fixtures and tooling
//!
//! Keystream and IV handling live in the `wzkit-crypto` crate.

#![warn(missing_docs)]

pub mod wz;

pub use wz::{ArchiveConfig, WzArchive, WzError, WzObject, WzProperty, WzResult};
