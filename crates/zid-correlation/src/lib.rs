//! # zid-correlation
//!
//! Identity correlation engine mapping authentication-mount aliases to
//! canonical entities.
//!
//! This subsystem is responsible for:
//! - Resolving a login `(mount_accessor, name)` to exactly one alias and entity
//! - Entity and alias lifecycle (create, update, rename, delete)
//! - Explicit, all-or-nothing entity merges
//! - Consistent listings of entities and aliases
//!
//! Correlation is never implicit: no operation other than
//! [`CorrelationApi::merge_entities`] changes which entity owns an alias.

#![warn(clippy::all)]

pub mod errors;
pub mod index;
pub mod locks;
pub mod mounts;
mod service;
pub mod traits;
pub mod types;

pub use errors::{CorrelationError, Result};
pub use index::Index;
pub use locks::{LockKey, LockManager};
pub use mounts::StaticMountRegistry;
pub use service::CorrelationService;
pub use traits::{CorrelationApi, MountRegistry};
pub use types::*;
