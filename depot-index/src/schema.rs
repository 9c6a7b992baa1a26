//! YAML schema of the metadata tree.
//!
//! `global.yaml` holds fields shared by all versions of an item plus the
//! `blacklisted` flag; each file under `versions/` describes one
//! uploaded version and may omit any field the global file provides.

use chrono::{DateTime, Utc};
use serde::Deserialize;

/// One version entry, after global fields have been merged in.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct VersionSchema {
    pub name: String,
    pub version: String,
    pub filesize: u64,
    /// Hex md5sum of the blob, also the storage key of this version.
    pub md5sum: String,
    pub upload_date: DateTime<Utc>,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub availability: Availability,
    #[serde(default)]
    pub dependencies: Vec<DependencySchema>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub min_client_version: Option<[u8; 3]>,
    #[serde(default)]
    pub max_client_version: Option<[u8; 3]>,
}

/// Whether a version is offered to new games or kept only for savegames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum Availability {
    #[default]
    #[serde(rename = "new-games")]
    NewGames,
    #[serde(rename = "savegames-only")]
    SavegamesOnly,
}

/// Reference to a required item, pinned to an exact version.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DependencySchema {
    /// Folder name of the dependency's content type.
    pub content_type: String,
    /// Hex unique id.
    pub unique_id: String,
    /// Hex md5sum.
    pub md5sum: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_schema_parses() {
        let yaml = r#"
name: Total Town Set
version: "2.0"
filesize: 5000
md5sum: 000102030405060708090a0b0c0d0e0f
upload-date: 2023-04-01T12:00:00Z
availability: new-games
tags: [town, buildings]
dependencies:
  - content-type: base-graphics
    unique-id: 4f474658
    md5sum: 101112131415161718191a1b1c1d1e1f
min-client-version: [12, 0, 0]
"#;
        let schema: VersionSchema = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(schema.name, "Total Town Set");
        assert_eq!(schema.filesize, 5000);
        assert_eq!(schema.availability, Availability::NewGames);
        assert_eq!(schema.dependencies.len(), 1);
        assert_eq!(schema.min_client_version, Some([12, 0, 0]));
        assert_eq!(schema.max_client_version, None);
    }

    #[test]
    fn test_availability_default() {
        let yaml = r#"
name: n
version: v
filesize: 1
md5sum: 000102030405060708090a0b0c0d0e0f
upload-date: 2023-04-01T12:00:00Z
"#;
        let schema: VersionSchema = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(schema.availability, Availability::NewGames);
        assert!(schema.tags.is_empty());
    }
}
