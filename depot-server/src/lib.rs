//! # depot-server
//!
//! TCP server for the depot content service.
//!
//! This crate provides:
//! - Connection handling with async I/O and per-connection tasks
//! - Protocol framing and request dispatch
//! - The per-connection transfer queue with admission control
//! - Process-wide byte-budget and connection limits
//! - Layered configuration (defaults, YAML file, environment)

pub mod budget;
pub mod config;
pub mod connection;
pub mod error;
pub mod server;
pub mod transfer;

#[cfg(test)]
pub(crate) mod testing;

pub use budget::{ByteBudget, ByteReservation};
pub use config::{Config, ConfigError, IndexConfig, NetworkConfig, StorageConfig, TransferConfig};
pub use connection::Connection;
pub use error::ServerError;
pub use server::{Server, ServerStats};
pub use transfer::{AdmitError, TransferQueue};
