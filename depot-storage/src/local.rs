//! Local filesystem blob storage.

use async_trait::async_trait;
use bytes::Bytes;
use depot_core::{folder_name, ContentEntry, ContentReader, ContentStore, StorageError};
use std::path::PathBuf;
use tokio::fs;
use tokio::io::AsyncReadExt;

/// Blob storage rooted at a local folder.
pub struct LocalStorage {
    folder: PathBuf,
}

impl LocalStorage {
    pub fn new(folder: impl Into<PathBuf>) -> Self {
        Self {
            folder: folder.into(),
        }
    }

    fn blob_path(&self, entry: &ContentEntry) -> PathBuf {
        self.folder
            .join(folder_name(entry.content_type))
            .join(entry.unique_id.to_string())
            .join(format!("{}.tar.gz", entry.md5sum))
    }
}

#[async_trait]
impl ContentStore for LocalStorage {
    async fn open(&self, entry: &ContentEntry) -> Result<Box<dyn ContentReader>, StorageError> {
        let path = self.blob_path(entry);
        let file = fs::File::open(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::NotFound(path.display().to_string())
            } else {
                StorageError::Io(e)
            }
        })?;

        Ok(Box::new(LocalBlobReader {
            file,
            total: entry.filesize,
            remaining: entry.filesize,
        }))
    }
}

/// One open blob. Reads are capped at the declared filesize so a blob
/// that grew on disk cannot overrun the announced transfer length.
struct LocalBlobReader {
    file: fs::File,
    total: u64,
    remaining: u64,
}

#[async_trait]
impl ContentReader for LocalBlobReader {
    fn total_bytes(&self) -> u64 {
        self.total
    }

    async fn read_chunk(&mut self, max_len: usize) -> Result<Bytes, StorageError> {
        if self.remaining == 0 {
            return Ok(Bytes::new());
        }

        let want = max_len.min(self.remaining.min(usize::MAX as u64) as usize);
        let mut buf = vec![0u8; want];
        let n = self.file.read(&mut buf).await?;
        if n == 0 {
            return Err(StorageError::Truncated {
                expected: self.total,
                actual: self.total - self.remaining,
            });
        }

        buf.truncate(n);
        self.remaining -= n as u64;
        Ok(Bytes::from(buf))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use depot_protocol::{ContentType, Md5sum, UniqueId};
    use std::fs as std_fs;
    use tempfile::TempDir;

    fn entry(filesize: u64) -> ContentEntry {
        ContentEntry {
            content_type: ContentType::NewGrf,
            content_id: 1,
            unique_id: UniqueId([0xaa, 0xbb, 0xcc, 0xdd]),
            md5sum: Md5sum([0x11; 16]),
            name: "n".to_string(),
            version: "v".to_string(),
            url: String::new(),
            description: String::new(),
            filesize,
            dependencies: vec![],
            tags: vec![],
            upload_date: Utc::now(),
            min_client_version: None,
            max_client_version: None,
        }
    }

    fn write_blob(root: &std::path::Path, entry: &ContentEntry, data: &[u8]) {
        let dir = root.join("newgrf").join(entry.unique_id.to_string());
        std_fs::create_dir_all(&dir).unwrap();
        std_fs::write(dir.join(format!("{}.tar.gz", entry.md5sum)), data).unwrap();
    }

    #[test]
    fn test_blob_path_layout() {
        let storage = LocalStorage::new("/data");
        let path = storage.blob_path(&entry(10));
        assert_eq!(
            path,
            Path::new("/data/newgrf/aabbccdd/11111111111111111111111111111111.tar.gz")
        );
    }

    #[tokio::test]
    async fn test_open_and_read_in_chunks() {
        let dir = TempDir::new().unwrap();
        let entry = entry(10);
        write_blob(dir.path(), &entry, b"0123456789");

        let storage = LocalStorage::new(dir.path());
        let mut reader = storage.open(&entry).await.unwrap();
        assert_eq!(reader.total_bytes(), 10);

        assert_eq!(reader.read_chunk(4).await.unwrap().as_ref(), b"0123");
        assert_eq!(reader.read_chunk(4).await.unwrap().as_ref(), b"4567");
        assert_eq!(reader.read_chunk(4).await.unwrap().as_ref(), b"89");
        assert!(reader.read_chunk(4).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_read_capped_at_declared_filesize() {
        let dir = TempDir::new().unwrap();
        let entry = entry(4);
        write_blob(dir.path(), &entry, b"0123456789");

        let storage = LocalStorage::new(dir.path());
        let mut reader = storage.open(&entry).await.unwrap();
        assert_eq!(reader.read_chunk(100).await.unwrap().as_ref(), b"0123");
        assert!(reader.read_chunk(100).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_blob_is_not_found() {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(dir.path());
        let result = storage.open(&entry(10)).await;
        assert!(matches!(result, Err(StorageError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_short_blob_is_truncated_error() {
        let dir = TempDir::new().unwrap();
        let entry = entry(10);
        write_blob(dir.path(), &entry, b"0123");

        let storage = LocalStorage::new(dir.path());
        let mut reader = storage.open(&entry).await.unwrap();
        assert_eq!(reader.read_chunk(100).await.unwrap().as_ref(), b"0123");
        let result = reader.read_chunk(100).await;
        assert!(matches!(
            result,
            Err(StorageError::Truncated {
                expected: 10,
                actual: 4
            })
        ));
    }
}
