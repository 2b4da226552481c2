//! # zid-storage
//!
//! Storage abstraction layer for the zero-id identity correlation engine.
//!
//! The correlation engine keeps its entity and alias tables in memory and
//! treats this crate's [`Storage`] trait as the durable, transactional
//! key-value backend underneath. Two implementations are provided:
//! [`RocksDbStorage`] for real deployments and [`MemoryStorage`] for tests and
//! embedding.

#![warn(clippy::all)]

pub mod column_families;
pub mod errors;
pub mod memory;
pub mod rocksdb_impl;
pub mod traits;

pub use column_families::*;
pub use errors::{Result, StorageError};
pub use memory::MemoryStorage;
pub use rocksdb_impl::RocksDbStorage;
pub use traits::{Batch, BatchExt, Storage};
