//! # depot-core
//!
//! Content data model and backend capability traits.
//!
//! This crate provides:
//! - [`ContentEntry`], the immutable descriptor of one content version
//! - The [`ContentIndex`] and [`ContentStore`] traits the server
//!   consumes; backends implement them, the server never branches on
//!   backend identity
//! - Folder-name and download-filename helpers shared by the backends

pub mod content;
pub mod error;
pub mod filename;
pub mod ports;

pub use content::{content_type_from_folder, folder_name, ContentEntry};
pub use error::{IndexError, StorageError};
pub use filename::safe_filename;
pub use ports::{ContentIndex, ContentReader, ContentStore, ListFilter};

pub use depot_protocol::{ClientVersion, ContentType, Md5sum, UniqueId};
