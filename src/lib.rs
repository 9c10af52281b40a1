//! # Stream Meta Cache
//!
//! This crate tracks, per resource touched by a streaming export session,
//! whether descriptive metadata has already been sent downstream, so the
//! exporter can skip re-sending unchanged metadata on every record. Resource
//! catalogs change underneath running sessions, so the cache also bridges the
//! host's change-notification mechanism to its entries.
//!
//! ## Key Components
//!
//! - `MetaCache` / `MetaCacheEntry`: session-scoped store of sent/stale state
//! - `ExportSession`: lifecycle wrapper owning one `MetaCache`
//! - `NotificationHost` / `register_once`: once-per-process bridge to the
//!   host's notification system
//! - `MetadataStatus`: the three outcomes a lookup reports to the export loop
//!
//! Notifications can fire reentrantly inside export work that still holds an
//! entry handle, so the callback only flags entries stale; physical removal
//! happens in `sweep`, which the caller runs at quiescent points.

mod cache;
mod error;
mod listener;
mod session;

pub use cache::{
    CacheStats, CacheStatsSnapshot, MetaCache, MetaCacheEntry, ResourceId, DEFAULT_CAPACITY_HINT,
};
pub use error::{CacheError, CacheResult};
pub use listener::{on_resource_invalidation, register_once, InvalidationCallback, NotificationHost};
pub use session::{ExportSession, MetadataStatus, SessionConfig};
