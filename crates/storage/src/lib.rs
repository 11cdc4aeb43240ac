// Path: crates/storage/src/lib.rs
#![cfg_attr(
    not(test),
    deny(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        clippy::todo,
        clippy::unimplemented,
        clippy::indexing_slicing
    )
)]
//! Durable log storage for the HyperRAFT++ node.
//!
//! Three logically separate stores back the log-store port: block entries in
//! a CRC-framed write-ahead log, consensus metadata in an atomically
//! replaced file, and snapshots likewise. Entries and metadata are fsynced
//! before any call returns, so no message ever depends on volatile state.

/// WAL-backed [`hyperraft_api::LogStore`] implementation.
pub mod file;
/// In-memory [`hyperraft_api::LogStore`] for tests and ephemeral nodes.
pub mod memory;
/// The CRC-framed write-ahead log.
pub mod wal;

pub use file::FileLogStore;
pub use memory::MemoryLogStore;
