//! Archive open options

use serde::{Deserialize, Serialize};
use wzkit_crypto::MapleVersion;

/// Options controlling how an archive is opened
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    /// Encryption scheme used to pick the IV
    pub version: MapleVersion,

    /// Real client version; `None` recovers it from the stored marker
    pub game_version: Option<i16>,

    /// Reject archives whose identifier is not `PKG1`
    pub strict_ident: bool,

    /// Highest version tried during recovery (inclusive)
    pub max_version: i16,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            version: MapleVersion::default(),
            game_version: None,
            strict_ident: false,
            max_version: i16::MAX,
        }
    }
}

impl ArchiveConfig {
    /// Default options for an encryption scheme
    pub fn new(version: MapleVersion) -> Self {
        Self {
            version,
            ..Self::default()
        }
    }

    /// Set the encryption scheme
    #[must_use]
    pub fn with_version(mut self, version: MapleVersion) -> Self {
        self.version = version;
        self
    }

    /// Use a known real version instead of recovering it
    #[must_use]
    pub fn with_game_version(mut self, game_version: i16) -> Self {
        self.game_version = Some(game_version);
        self
    }

    /// Require the `PKG1` identifier
    #[must_use]
    pub fn with_strict_ident(mut self, strict: bool) -> Self {
        self.strict_ident = strict;
        self
    }

    /// Bound the version recovery range
    #[must_use]
    pub fn with_max_version(mut self, max_version: i16) -> Self {
        self.max_version = max_version;
        self
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ArchiveConfig::default();
        assert_eq!(config.version, MapleVersion::Gms);
        assert_eq!(config.game_version, None);
        assert!(!config.strict_ident);
        assert_eq!(config.max_version, i16::MAX);
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: ArchiveConfig =
            serde_json::from_str(r#"{"version": "ems", "game_version": 83}"#).unwrap();
        assert_eq!(
            config,
            ArchiveConfig::new(MapleVersion::Ems).with_game_version(83)
        );
    }

    #[test]
    fn test_custom_iv_round_trips() {
        let config = ArchiveConfig::new(MapleVersion::Custom { iv: [1, 2, 3, 4] })
            .with_strict_ident(true)
            .with_max_version(200);
        let json = serde_json::to_string(&config).unwrap();
        assert_eq!(serde_json::from_str::<ArchiveConfig>(&json).unwrap(), config);
    }
}
