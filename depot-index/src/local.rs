//! Local filesystem index.

use crate::schema::{Availability, VersionSchema};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use depot_core::{
    content_type_from_folder, folder_name, ContentEntry, ContentIndex, IndexError, ListFilter,
};
use depot_protocol::{ContentType, Md5sum, UniqueId};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Index backed by a YAML metadata tree on the local filesystem.
///
/// Lookups are served from in-memory maps; [`reload`](LocalIndex::reload)
/// rebuilds the maps off the async runtime and swaps them in atomically,
/// so serving continues during a rebuild.
pub struct LocalIndex {
    folder: PathBuf,
    data: RwLock<Arc<IndexData>>,
}

#[derive(Default)]
struct IndexData {
    by_content_id: HashMap<u32, Arc<ContentEntry>>,
    by_content_type: HashMap<ContentType, Vec<Arc<ContentEntry>>>,
    by_unique_id: HashMap<(ContentType, UniqueId), Arc<ContentEntry>>,
    by_unique_id_md5: HashMap<(ContentType, UniqueId, Md5sum), Arc<ContentEntry>>,
}

/// Counters from one reload pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReloadStats {
    /// Entries offered in listings.
    pub listed: usize,
    /// Entries resolvable by id or exact md5sum only.
    pub archived: usize,
}

/// One version as read from disk, before id assignment.
struct RawEntry {
    content_type: ContentType,
    unique_id: UniqueId,
    md5sum: Md5sum,
    name: String,
    version: String,
    url: String,
    description: String,
    filesize: u64,
    tags: Vec<String>,
    upload_date: DateTime<Utc>,
    min_client_version: Option<[u8; 3]>,
    max_client_version: Option<[u8; 3]>,
    listed: bool,
    raw_dependencies: Vec<(ContentType, UniqueId, Md5sum)>,
    content_id: u32,
}

impl LocalIndex {
    /// Creates an empty index over `folder`. Call
    /// [`reload`](LocalIndex::reload) to populate it.
    pub fn new(folder: impl Into<PathBuf>) -> Self {
        Self {
            folder: folder.into(),
            data: RwLock::new(Arc::new(IndexData::default())),
        }
    }

    /// Rebuilds the index from disk and swaps it in.
    pub async fn reload(&self) -> Result<ReloadStats, IndexError> {
        let folder = self.folder.clone();
        let (data, stats) = tokio::task::spawn_blocking(move || scan(&folder))
            .await
            .map_err(|e| IndexError::Unavailable(format!("reload task failed: {e}")))??;
        *self.data.write() = Arc::new(data);
        Ok(stats)
    }

    /// Number of resolvable entries.
    pub fn len(&self) -> usize {
        self.data.read().by_content_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn snapshot(&self) -> Arc<IndexData> {
        self.data.read().clone()
    }
}

#[async_trait]
impl ContentIndex for LocalIndex {
    async fn lookup(&self, filter: ListFilter) -> Result<Vec<Arc<ContentEntry>>, IndexError> {
        let data = self.snapshot();
        let entries = match data.by_content_type.get(&filter.content_type) {
            Some(entries) => entries
                .iter()
                .filter(|entry| match filter.client_version {
                    Some(version) => entry.supports_client(version),
                    None => true,
                })
                .cloned()
                .collect(),
            None => Vec::new(),
        };
        Ok(entries)
    }

    async fn by_content_id(&self, content_id: u32) -> Result<Option<Arc<ContentEntry>>, IndexError> {
        Ok(self.snapshot().by_content_id.get(&content_id).cloned())
    }

    async fn by_unique_id(
        &self,
        content_type: ContentType,
        unique_id: UniqueId,
    ) -> Result<Option<Arc<ContentEntry>>, IndexError> {
        Ok(self
            .snapshot()
            .by_unique_id
            .get(&(content_type, unique_id))
            .cloned())
    }

    async fn by_unique_id_md5(
        &self,
        content_type: ContentType,
        unique_id: UniqueId,
        md5sum: Md5sum,
    ) -> Result<Option<Arc<ContentEntry>>, IndexError> {
        Ok(self
            .snapshot()
            .by_unique_id_md5
            .get(&(content_type, unique_id, md5sum))
            .cloned())
    }
}

fn scan(root: &Path) -> Result<(IndexData, ReloadStats), IndexError> {
    let mut raw_entries = Vec::new();

    for content_type in ContentType::ALL {
        let type_folder = root.join(folder_name(content_type));
        if !type_folder.is_dir() {
            continue;
        }

        let mut listed = 0usize;
        let mut archived = 0usize;

        for dir in fs::read_dir(&type_folder)? {
            let dir = dir?;
            let dir_name = dir.file_name();
            let Some(unique_id) = dir_name.to_str().and_then(UniqueId::from_hex) else {
                tracing::warn!(
                    "Skipping {} entry with non-hex folder name {:?}",
                    folder_name(content_type),
                    dir_name
                );
                continue;
            };

            match scan_item(content_type, unique_id, &dir.path()) {
                Ok(entries) => {
                    for entry in entries {
                        if entry.listed {
                            listed += 1;
                        } else {
                            archived += 1;
                        }
                        raw_entries.push(entry);
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        "Failed to load {}/{}: {}. Skipping.",
                        folder_name(content_type),
                        unique_id,
                        e
                    );
                }
            }
        }

        tracing::info!(
            "Loaded {} entries and {} archived for {}",
            listed,
            archived,
            folder_name(content_type)
        );
    }

    assign_content_ids(&mut raw_entries)?;
    Ok(build_maps(raw_entries))
}

fn scan_item(
    content_type: ContentType,
    unique_id: UniqueId,
    item_folder: &Path,
) -> Result<Vec<RawEntry>, IndexError> {
    let global: serde_yaml::Value =
        serde_yaml::from_str(&fs::read_to_string(item_folder.join("global.yaml"))?)
            .map_err(|e| IndexError::InvalidData(format!("global.yaml: {e}")))?;

    if global.get("blacklisted").and_then(serde_yaml::Value::as_bool) == Some(true) {
        return Ok(Vec::new());
    }

    let mut entries = Vec::new();
    for file in fs::read_dir(item_folder.join("versions"))? {
        let file = file?;
        match read_version(content_type, unique_id, &global, &file.path()) {
            Ok(entry) => entries.push(entry),
            Err(e) => {
                tracing::warn!(
                    "Failed to load entry {}: {}. Skipping.",
                    file.path().display(),
                    e
                );
            }
        }
    }
    Ok(entries)
}

fn read_version(
    content_type: ContentType,
    unique_id: UniqueId,
    global: &serde_yaml::Value,
    path: &Path,
) -> Result<RawEntry, IndexError> {
    let mut value: serde_yaml::Value = serde_yaml::from_str(&fs::read_to_string(path)?)
        .map_err(|e| IndexError::InvalidData(e.to_string()))?;

    // Fields the version file leaves out fall back to the global file.
    if let (serde_yaml::Value::Mapping(version), serde_yaml::Value::Mapping(global)) =
        (&mut value, global)
    {
        for (key, default) in global {
            if !version.contains_key(key) {
                version.insert(key.clone(), default.clone());
            }
        }
    }

    let schema: VersionSchema =
        serde_yaml::from_value(value).map_err(|e| IndexError::InvalidData(e.to_string()))?;

    let md5sum = Md5sum::from_hex(&schema.md5sum)
        .ok_or_else(|| IndexError::InvalidData(format!("bad md5sum {:?}", schema.md5sum)))?;

    let mut raw_dependencies = Vec::with_capacity(schema.dependencies.len());
    for dep in &schema.dependencies {
        let dep_type = content_type_from_folder(&dep.content_type).ok_or_else(|| {
            IndexError::InvalidData(format!("unknown dependency type {:?}", dep.content_type))
        })?;
        let dep_unique_id = UniqueId::from_hex(&dep.unique_id).ok_or_else(|| {
            IndexError::InvalidData(format!("bad dependency unique-id {:?}", dep.unique_id))
        })?;
        let dep_md5sum = Md5sum::from_hex(&dep.md5sum).ok_or_else(|| {
            IndexError::InvalidData(format!("bad dependency md5sum {:?}", dep.md5sum))
        })?;
        raw_dependencies.push((dep_type, dep_unique_id, dep_md5sum));
    }

    Ok(RawEntry {
        content_type,
        unique_id,
        md5sum,
        name: schema.name,
        version: schema.version,
        url: schema.url,
        description: schema.description,
        filesize: schema.filesize,
        tags: schema.tags,
        upload_date: schema.upload_date,
        min_client_version: schema.min_client_version,
        max_client_version: schema.max_client_version,
        listed: schema.availability == Availability::NewGames,
        raw_dependencies,
        content_id: 0,
    })
}

/// Derives stable content ids from md5sums.
///
/// The low 24 bits come from the trailing bytes of the md5sum (the
/// leading bytes are published as the partial sum, so they carry no
/// secret); the top byte is a collision counter ordered by upload date.
/// Ids therefore survive reloads and agree across horizontally scaled
/// instances reading the same tree.
fn assign_content_ids(entries: &mut [RawEntry]) -> Result<(), IndexError> {
    let mut groups: HashMap<u32, Vec<usize>> = HashMap::new();
    for (i, entry) in entries.iter().enumerate() {
        let digest = entry.md5sum.0;
        let pre_id = u32::from_le_bytes([digest[13], digest[14], digest[15], 0]);
        groups.entry(pre_id).or_default().push(i);
    }

    for (pre_id, mut members) in groups {
        if members.len() > 255 {
            return Err(IndexError::InvalidData(format!(
                "more than 255 md5sum collisions on id {pre_id:#08x}"
            )));
        }
        members.sort_by_key(|&i| entries[i].upload_date);
        for (n, &i) in members.iter().enumerate() {
            entries[i].content_id = ((n as u32) << 24) | pre_id;
        }
    }
    Ok(())
}

fn build_maps(raw_entries: Vec<RawEntry>) -> (IndexData, ReloadStats) {
    let dependency_ids: HashMap<(ContentType, UniqueId, Md5sum), u32> = raw_entries
        .iter()
        .map(|e| ((e.content_type, e.unique_id, e.md5sum), e.content_id))
        .collect();

    let mut data = IndexData::default();
    let mut stats = ReloadStats::default();

    for raw in raw_entries {
        let mut dependencies = Vec::with_capacity(raw.raw_dependencies.len());
        for dep in &raw.raw_dependencies {
            match dependency_ids.get(dep) {
                Some(&id) => dependencies.push(id),
                None => {
                    tracing::error!(
                        "Invalid dependency {}/{}/{} of {}/{}",
                        folder_name(dep.0),
                        dep.1,
                        dep.2,
                        folder_name(raw.content_type),
                        raw.unique_id
                    );
                }
            }
        }

        let entry = ContentEntry {
            content_type: raw.content_type,
            content_id: raw.content_id,
            unique_id: raw.unique_id,
            md5sum: raw.md5sum,
            name: raw.name,
            version: raw.version,
            url: raw.url,
            description: raw.description,
            filesize: raw.filesize,
            dependencies,
            tags: raw.tags,
            upload_date: raw.upload_date,
            min_client_version: raw.min_client_version,
            max_client_version: raw.max_client_version,
        };

        // An entry whose descriptor cannot fit one outbound frame could
        // never be announced; drop it here rather than at serve time.
        if let Err(e) = entry.to_server_info().encode() {
            tracing::warn!(
                "Entry {}/{} ({}) exceeds the wire descriptor size: {}. Skipping.",
                folder_name(entry.content_type),
                entry.unique_id,
                entry.version,
                e
            );
            continue;
        }

        let listed = raw.listed;
        let entry = Arc::new(entry);
        data.by_content_id.insert(entry.content_id, entry.clone());
        data.by_unique_id_md5.insert(
            (entry.content_type, entry.unique_id, entry.md5sum),
            entry.clone(),
        );
        if listed {
            stats.listed += 1;
            data.by_unique_id
                .insert((entry.content_type, entry.unique_id), entry.clone());
            data.by_content_type
                .entry(entry.content_type)
                .or_default()
                .push(entry);
        } else {
            stats.archived += 1;
        }
    }

    (data, stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use depot_protocol::ClientVersion;
    use std::fs;
    use tempfile::TempDir;

    fn write_item(
        root: &Path,
        type_folder: &str,
        unique_id: &str,
        global: &str,
        versions: &[(&str, &str)],
    ) {
        let item = root.join(type_folder).join(unique_id);
        fs::create_dir_all(item.join("versions")).unwrap();
        fs::write(item.join("global.yaml"), global).unwrap();
        for (file, body) in versions {
            fs::write(item.join("versions").join(file), body).unwrap();
        }
    }

    fn version_yaml(version: &str, md5_tail: &str, extra: &str) -> String {
        format!(
            "version: \"{version}\"\nfilesize: 100\nmd5sum: 00000000000000000000000000{md5_tail}\nupload-date: 2023-01-0{}T00:00:00Z\n{extra}",
            version.chars().next().unwrap(),
        )
    }

    async fn loaded_index(root: &Path) -> LocalIndex {
        let index = LocalIndex::new(root);
        index.reload().await.unwrap();
        index
    }

    #[tokio::test]
    async fn test_reload_and_lookup() {
        let dir = TempDir::new().unwrap();
        write_item(
            dir.path(),
            "base-graphics",
            "4f474658",
            "name: OpenGFX\n",
            &[("1.yaml", &version_yaml("1", "0d0e0f", ""))],
        );

        let index = loaded_index(dir.path()).await;
        assert_eq!(index.len(), 1);

        // Low 24 bits of the id come straight from the md5sum tail.
        let entry = index.by_content_id(0x000f0e0d).await.unwrap().unwrap();
        assert_eq!(entry.name, "OpenGFX");
        assert_eq!(entry.content_type, ContentType::BaseGraphics);

        let found = index
            .by_unique_id(
                ContentType::BaseGraphics,
                UniqueId::from_hex("4f474658").unwrap(),
            )
            .await
            .unwrap();
        assert!(found.is_some());

        let listed = index
            .lookup(ListFilter {
                content_type: ContentType::BaseGraphics,
                client_version: None,
            })
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);
    }

    #[tokio::test]
    async fn test_blacklisted_item_skipped() {
        let dir = TempDir::new().unwrap();
        write_item(
            dir.path(),
            "ai",
            "00000001",
            "name: BadBot\nblacklisted: true\n",
            &[("1.yaml", &version_yaml("1", "0000aa", ""))],
        );

        let index = loaded_index(dir.path()).await;
        assert!(index.is_empty());
    }

    #[tokio::test]
    async fn test_archived_version_not_listed_but_resolvable() {
        let dir = TempDir::new().unwrap();
        write_item(
            dir.path(),
            "newgrf",
            "0a0b0c0d",
            "name: Trains\n",
            &[
                ("1.yaml", &version_yaml("1", "000001", "availability: savegames-only\n")),
                ("2.yaml", &version_yaml("2", "000002", "")),
            ],
        );

        let index = loaded_index(dir.path()).await;
        let listed = index
            .lookup(ListFilter {
                content_type: ContentType::NewGrf,
                client_version: None,
            })
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].version, "2");

        // The archived version still resolves by exact md5sum.
        let archived = index
            .by_unique_id_md5(
                ContentType::NewGrf,
                UniqueId::from_hex("0a0b0c0d").unwrap(),
                Md5sum::from_hex("00000000000000000000000000000001").unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(archived.unwrap().version, "1");
    }

    #[tokio::test]
    async fn test_collision_counter_ordered_by_upload_date() {
        let dir = TempDir::new().unwrap();
        // Same md5 tail in two items: ids must differ in the top byte,
        // with the older upload taking counter zero.
        write_item(
            dir.path(),
            "scenario",
            "00000001",
            "name: Older\n",
            &[("1.yaml", &version_yaml("1", "aabbcc", ""))],
        );
        write_item(
            dir.path(),
            "scenario",
            "00000002",
            "name: Newer\n",
            &[("2.yaml", &version_yaml("2", "aabbcc", ""))],
        );

        let index = loaded_index(dir.path()).await;
        let older = index.by_content_id(0x00ccbbaa).await.unwrap().unwrap();
        assert_eq!(older.name, "Older");
        let newer = index.by_content_id(0x01ccbbaa).await.unwrap().unwrap();
        assert_eq!(newer.name, "Newer");
    }

    #[tokio::test]
    async fn test_dependency_resolution() {
        let dir = TempDir::new().unwrap();
        write_item(
            dir.path(),
            "base-graphics",
            "4f474658",
            "name: Base\n",
            &[("1.yaml", &version_yaml("1", "000010", ""))],
        );
        let dep = "dependencies:\n  - content-type: base-graphics\n    unique-id: 4f474658\n    md5sum: 00000000000000000000000000000010\n";
        write_item(
            dir.path(),
            "newgrf",
            "00000009",
            "name: Addon\n",
            &[("2.yaml", &version_yaml("2", "000020", dep))],
        );

        let index = loaded_index(dir.path()).await;
        let addon = index.by_content_id(0x00200000).await.unwrap().unwrap();
        assert_eq!(addon.dependencies, vec![0x00100000]);
    }

    #[tokio::test]
    async fn test_version_gating_in_lookup() {
        let dir = TempDir::new().unwrap();
        write_item(
            dir.path(),
            "ai",
            "00000003",
            "name: ModernBot\n",
            &[("1.yaml", &version_yaml("1", "000030", "min-client-version: [13, 0, 0]\n"))],
        );

        let index = loaded_index(dir.path()).await;
        let old_client = index
            .lookup(ListFilter {
                content_type: ContentType::Ai,
                client_version: Some(ClientVersion::new(12, 0, 0)),
            })
            .await
            .unwrap();
        assert!(old_client.is_empty());

        let new_client = index
            .lookup(ListFilter {
                content_type: ContentType::Ai,
                client_version: Some(ClientVersion::new(13, 1, 0)),
            })
            .await
            .unwrap();
        assert_eq!(new_client.len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_version_file_skipped() {
        let dir = TempDir::new().unwrap();
        write_item(
            dir.path(),
            "heightmap",
            "00000004",
            "name: Alps\n",
            &[
                ("good.yaml", &version_yaml("1", "000040", "")),
                ("bad.yaml", "version: \"2\"\n# missing everything else\n"),
            ],
        );

        let index = loaded_index(dir.path()).await;
        assert_eq!(index.len(), 1);
    }

    #[tokio::test]
    async fn test_global_fields_fill_version_gaps() {
        let dir = TempDir::new().unwrap();
        write_item(
            dir.path(),
            "base-music",
            "00000005",
            "name: Tunes\ndescription: background music\nurl: https://example.net/tunes\n",
            &[("1.yaml", &version_yaml("1", "000050", ""))],
        );

        let index = loaded_index(dir.path()).await;
        let entry = index.by_content_id(0x00500000).await.unwrap().unwrap();
        assert_eq!(entry.name, "Tunes");
        assert_eq!(entry.description, "background music");
        assert_eq!(entry.url, "https://example.net/tunes");
    }
}
