//! In-memory backends and helpers shared by the server tests.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{TimeZone, Utc};
use depot_core::{
    ContentEntry, ContentIndex, ContentReader, ContentStore, IndexError, ListFilter, StorageError,
};
use depot_protocol::{ContentType, Decoder, Md5sum, Packet, UniqueId};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Builds a content entry with deterministic identifiers.
pub(crate) fn entry(content_id: u32, content_type: ContentType, filesize: u64) -> ContentEntry {
    let b = content_id.to_le_bytes();
    ContentEntry {
        content_type,
        content_id,
        unique_id: UniqueId(b),
        md5sum: Md5sum([b[0], b[1], b[2], b[3], 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]),
        name: "X".to_string(),
        version: "1.0".to_string(),
        url: String::new(),
        description: String::new(),
        filesize,
        dependencies: vec![],
        tags: vec![],
        upload_date: Utc.with_ymd_and_hms(2023, 6, 1, 0, 0, 0).unwrap(),
        min_client_version: None,
        max_client_version: None,
    }
}

/// Index serving a fixed set of entries.
pub(crate) struct MemIndex {
    entries: Vec<Arc<ContentEntry>>,
}

impl MemIndex {
    pub(crate) fn new(entries: Vec<ContentEntry>) -> Self {
        Self {
            entries: entries.into_iter().map(Arc::new).collect(),
        }
    }
}

#[async_trait]
impl ContentIndex for MemIndex {
    async fn lookup(&self, filter: ListFilter) -> Result<Vec<Arc<ContentEntry>>, IndexError> {
        Ok(self
            .entries
            .iter()
            .filter(|e| e.content_type == filter.content_type)
            .filter(|e| match filter.client_version {
                Some(version) => e.supports_client(version),
                None => true,
            })
            .cloned()
            .collect())
    }

    async fn by_content_id(&self, content_id: u32) -> Result<Option<Arc<ContentEntry>>, IndexError> {
        Ok(self
            .entries
            .iter()
            .find(|e| e.content_id == content_id)
            .cloned())
    }

    async fn by_unique_id(
        &self,
        content_type: ContentType,
        unique_id: UniqueId,
    ) -> Result<Option<Arc<ContentEntry>>, IndexError> {
        Ok(self
            .entries
            .iter()
            .find(|e| e.content_type == content_type && e.unique_id == unique_id)
            .cloned())
    }

    async fn by_unique_id_md5(
        &self,
        content_type: ContentType,
        unique_id: UniqueId,
        md5sum: Md5sum,
    ) -> Result<Option<Arc<ContentEntry>>, IndexError> {
        Ok(self
            .entries
            .iter()
            .find(|e| {
                e.content_type == content_type && e.unique_id == unique_id && e.md5sum == md5sum
            })
            .cloned())
    }
}

/// Blob store keyed by content id. An absent id reads as a missing
/// blob; a blob shorter than the entry's declared filesize simulates a
/// mid-stream read failure.
#[derive(Default)]
pub(crate) struct MemStore {
    blobs: HashMap<u32, Bytes>,
}

impl MemStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_blob(mut self, content_id: u32, data: Vec<u8>) -> Self {
        self.blobs.insert(content_id, Bytes::from(data));
        self
    }
}

#[async_trait]
impl ContentStore for MemStore {
    async fn open(&self, entry: &ContentEntry) -> Result<Box<dyn ContentReader>, StorageError> {
        let data = self
            .blobs
            .get(&entry.content_id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("content {}", entry.content_id)))?;
        Ok(Box::new(MemReader {
            data,
            pos: 0,
            declared: entry.filesize,
        }))
    }
}

struct MemReader {
    data: Bytes,
    pos: usize,
    declared: u64,
}

#[async_trait]
impl ContentReader for MemReader {
    fn total_bytes(&self) -> u64 {
        self.declared
    }

    async fn read_chunk(&mut self, max_len: usize) -> Result<Bytes, StorageError> {
        if self.pos as u64 >= self.declared {
            return Ok(Bytes::new());
        }
        if self.pos >= self.data.len() {
            return Err(StorageError::Truncated {
                expected: self.declared,
                actual: self.pos as u64,
            });
        }
        let remaining_declared = (self.declared - self.pos as u64).min(usize::MAX as u64) as usize;
        let end = self
            .data
            .len()
            .min(self.pos + max_len.min(remaining_declared));
        let chunk = self.data.slice(self.pos..end);
        self.pos = end;
        Ok(chunk)
    }
}

/// Reads `count` packets from the stream, failing the test on EOF.
pub(crate) async fn read_packets<S>(stream: &mut S, count: usize) -> Vec<Packet>
where
    S: AsyncRead + Unpin,
{
    let mut decoder = Decoder::new();
    let mut packets = Vec::new();
    let mut buf = [0u8; 4096];
    while packets.len() < count {
        let n = stream.read(&mut buf).await.unwrap();
        assert!(n > 0, "stream closed after {} packets", packets.len());
        decoder.extend(&buf[..n]);
        while let Some(packet) = decoder.decode_packet().unwrap() {
            packets.push(packet);
        }
    }
    assert_eq!(packets.len(), count, "more packets than expected");
    packets
}
