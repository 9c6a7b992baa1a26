//! Content descriptors.

use chrono::{DateTime, Utc};
use depot_protocol::{ClientVersion, ContentType, Md5sum, ServerInfo, UniqueId};

/// Immutable descriptor of one version of a content item.
///
/// Produced and owned by the index backend; the server shares entries
/// read-only via `Arc` for the duration of a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentEntry {
    pub content_type: ContentType,
    /// Server-assigned id, stable across reloads (derived from the
    /// md5sum, see the index backend).
    pub content_id: u32,
    pub unique_id: UniqueId,
    pub md5sum: Md5sum,
    pub name: String,
    pub version: String,
    pub url: String,
    pub description: String,
    pub filesize: u64,
    /// Content ids of required items, in dependency order.
    pub dependencies: Vec<u32>,
    pub tags: Vec<String>,
    pub upload_date: DateTime<Utc>,
    /// Inclusive lower bound on the client version, if any.
    pub min_client_version: Option<[u8; 3]>,
    /// Exclusive upper bound on the client version, if any.
    pub max_client_version: Option<[u8; 3]>,
}

impl ContentEntry {
    /// Whether this entry may be listed to a client of the given version.
    pub fn supports_client(&self, client: ClientVersion) -> bool {
        let triple = client.as_triple();
        if let Some(min) = self.min_client_version {
            if triple < min {
                return false;
            }
        }
        if let Some(max) = self.max_client_version {
            if triple >= max {
                return false;
            }
        }
        true
    }

    /// Builds the wire descriptor for this entry.
    pub fn to_server_info(&self) -> ServerInfo {
        ServerInfo {
            content_type: self.content_type,
            content_id: self.content_id,
            filesize: u32::try_from(self.filesize).unwrap_or(u32::MAX),
            name: self.name.clone(),
            version: self.version.clone(),
            url: self.url.clone(),
            description: self.description.clone(),
            unique_id: self.unique_id,
            md5sum: self.md5sum,
            dependencies: self.dependencies.clone(),
            tags: self.tags.clone(),
            upload_date: u32::try_from(self.upload_date.timestamp()).unwrap_or(0),
        }
    }
}

/// Directory name used by the filesystem backends for a content type.
pub fn folder_name(content_type: ContentType) -> &'static str {
    match content_type {
        ContentType::BaseGraphics => "base-graphics",
        ContentType::NewGrf => "newgrf",
        ContentType::Ai => "ai",
        ContentType::AiLibrary => "ai-library",
        ContentType::Scenario => "scenario",
        ContentType::Heightmap => "heightmap",
        ContentType::BaseSounds => "base-sounds",
        ContentType::BaseMusic => "base-music",
        ContentType::Game => "game-script",
        ContentType::GameLibrary => "game-script-library",
    }
}

/// Reverse of [`folder_name`].
pub fn content_type_from_folder(name: &str) -> Option<ContentType> {
    ContentType::ALL
        .into_iter()
        .find(|&content_type| folder_name(content_type) == name)
}
