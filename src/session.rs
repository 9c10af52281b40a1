use std::sync::Arc;

use tracing::{debug, warn};

use crate::cache::{MetaCache, MetaCacheEntry, ResourceId, DEFAULT_CAPACITY_HINT};
use crate::error::CacheError;
use crate::listener::{self, NotificationHost};

/// Construction-time settings for an export session's metadata cache.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Expected number of distinct resources the session will touch.
    pub capacity_hint: usize,
}

impl SessionConfig {
    /// Create a new session configuration with default sizing
    pub fn new() -> Self {
        Self {
            capacity_hint: DEFAULT_CAPACITY_HINT,
        }
    }

    /// Set the expected number of distinct resources
    pub fn with_capacity_hint(mut self, capacity_hint: usize) -> Self {
        self.capacity_hint = capacity_hint;
        self
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// What the export loop must do about a resource's metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataStatus {
    /// No usable cached state. Send metadata, then confirm with `mark_sent`.
    Fresh,
    /// The resource changed since metadata was last sent. The entry has been
    /// reset; resend exactly as for [`Fresh`](MetadataStatus::Fresh).
    Stale,
    /// The consumer already holds current metadata for this resource; skip
    /// the send.
    Hit,
}

/// One export session's view of the metadata cache.
///
/// Owns the session-scoped [`MetaCache`] and manages the process-wide pieces
/// around it: at construction it binds the store for the invalidation
/// callback to find and registers that callback with the host (first session
/// in the process only); at teardown it unbinds before the store is dropped.
/// At most one session can exist per process at a time.
#[derive(Debug)]
pub struct ExportSession {
    cache: Arc<MetaCache>,
}

impl ExportSession {
    /// Creates the session cache, binds it for the invalidation callback,
    /// and registers the callback with the host if no earlier session
    /// already did.
    pub fn start(host: &dyn NotificationHost, config: SessionConfig) -> Result<Self, CacheError> {
        let cache = Arc::new(MetaCache::with_capacity(config.capacity_hint));
        listener::bind_active_cache(&cache)?;
        listener::register_once(host);
        debug!(
            "export session metadata cache started (capacity hint {})",
            config.capacity_hint
        );
        Ok(Self { cache })
    }

    /// Looks up the entry for `resource_id`, creating it on first sight, and
    /// reports what the export loop owes the consumer.
    ///
    /// A stale entry is re-validated in place here: its flags are reset so
    /// the caller resends as if the resource were new, and the next sweep no
    /// longer reclaims it. A notification that arrives while the returned
    /// handle is still in use does not disturb that use; it is observed as
    /// [`MetadataStatus::Stale`] on the next lookup of the same id.
    pub fn get_or_init(&self, resource_id: ResourceId) -> (MetadataStatus, Arc<MetaCacheEntry>) {
        let (entry, preexisting) = self.cache.lookup_or_create(resource_id);
        if !preexisting {
            return (MetadataStatus::Fresh, entry);
        }
        if !entry.is_valid() {
            entry.revalidate();
            return (MetadataStatus::Stale, entry);
        }
        if entry.metadata_sent() {
            (MetadataStatus::Hit, entry)
        } else {
            // Known id whose send was never confirmed; still owed a send.
            (MetadataStatus::Fresh, entry)
        }
    }

    /// Records that complete metadata for `resource_id` was transmitted.
    /// Returns false if the id is not tracked, which means the caller never
    /// looked it up in this session.
    pub fn mark_sent(&self, resource_id: ResourceId) -> bool {
        match self.cache.find(resource_id) {
            Some(entry) => {
                entry.mark_sent();
                true
            }
            None => {
                warn!("mark_sent for untracked resource {}", resource_id);
                false
            }
        }
    }

    /// Reclaims entries flagged stale by the invalidation callback.
    ///
    /// Call only at quiescent points: between records, never from inside the
    /// notification callback, and with no entry handles from
    /// [`get_or_init`](Self::get_or_init) still in use.
    pub fn sweep(&self) -> Result<usize, CacheError> {
        self.cache.prune()
    }

    /// Read access to the session's store, for inspection and statistics.
    pub fn cache(&self) -> &MetaCache {
        &self.cache
    }

    /// Ends the session. Equivalent to dropping it; provided so call sites
    /// can make teardown explicit.
    pub fn end(self) {}
}

impl Drop for ExportSession {
    fn drop(&mut self) {
        // Unbind before the store goes away so a notification arriving
        // mid-teardown observes "no session" instead of a dying cache.
        listener::unbind_active_cache();
        debug!("export session metadata cache shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults_and_builder() {
        assert_eq!(SessionConfig::default().capacity_hint, DEFAULT_CAPACITY_HINT);
        assert_eq!(
            SessionConfig::new().with_capacity_hint(16).capacity_hint,
            16
        );
    }
}
