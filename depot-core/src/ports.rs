//! Backend capability traits consumed by the server.
//!
//! The server issues at most one outstanding call per connection and
//! treats both ports as opaque asynchronous capabilities; backends are
//! responsible for their own internal concurrency safety.

use crate::content::ContentEntry;
use crate::error::{IndexError, StorageError};
use async_trait::async_trait;
use bytes::Bytes;
use depot_protocol::{ClientVersion, ContentType, Md5sum, UniqueId};
use std::sync::Arc;

/// Listing filter for [`ContentIndex::lookup`].
#[derive(Debug, Clone, Copy)]
pub struct ListFilter {
    pub content_type: ContentType,
    /// When set, entries outside their declared client-version bounds
    /// are filtered out.
    pub client_version: Option<ClientVersion>,
}

/// Resolves content identifiers and filters to descriptors.
#[async_trait]
pub trait ContentIndex: Send + Sync {
    /// Returns all listable entries matching the filter, in listing order.
    async fn lookup(&self, filter: ListFilter) -> Result<Vec<Arc<ContentEntry>>, IndexError>;

    /// Resolves one server-assigned content id.
    async fn by_content_id(&self, content_id: u32) -> Result<Option<Arc<ContentEntry>>, IndexError>;

    /// Resolves the listable version of an external id.
    async fn by_unique_id(
        &self,
        content_type: ContentType,
        unique_id: UniqueId,
    ) -> Result<Option<Arc<ContentEntry>>, IndexError>;

    /// Resolves an exact version by external id and md5sum.
    async fn by_unique_id_md5(
        &self,
        content_type: ContentType,
        unique_id: UniqueId,
        md5sum: Md5sum,
    ) -> Result<Option<Arc<ContentEntry>>, IndexError>;
}

/// Provides the raw bytes of content blobs.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Opens the blob for an entry, yielding its length up front.
    async fn open(&self, entry: &ContentEntry) -> Result<Box<dyn ContentReader>, StorageError>;
}

/// One open blob, read in bounded chunks.
#[async_trait]
pub trait ContentReader: Send {
    /// Declared length of the blob in bytes.
    fn total_bytes(&self) -> u64;

    /// Reads up to `max_len` bytes; an empty chunk signals end of data.
    async fn read_chunk(&mut self, max_len: usize) -> Result<Bytes, StorageError>;
}
