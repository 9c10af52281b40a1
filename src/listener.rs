use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tracing::{debug, trace};

use crate::cache::{MetaCache, ResourceId};
use crate::error::CacheError;

/// Callback signature the host invokes when a resource may have changed.
pub type InvalidationCallback = fn(ResourceId);

/// Seam to the host's change-notification system.
///
/// Registration is permanent: the host offers no way to unregister or rebind
/// a callback, so implementations must expect the callback to keep firing
/// after the session that registered it has ended.
pub trait NotificationHost {
    /// Arranges for `callback` to be invoked on every resource-change
    /// notification the host emits.
    fn register_invalidation_callback(&self, callback: InvalidationCallback);
}

// The registered callback outlives every export session, so it cannot be
// handed a pointer to session-owned state. It instead consults this weak
// process-wide binding to the current session's cache; once a session ends
// the binding is cleared and the callback sees nothing to do.
static ACTIVE_CACHE: RwLock<Option<Weak<MetaCache>>> = RwLock::new(None);

// Registration happens at most once per process, however many sessions come
// and go.
static CALLBACK_REGISTERED: AtomicBool = AtomicBool::new(false);

/// Registers [`on_resource_invalidation`] with the host exactly once per
/// process. Subsequent calls are no-ops. Returns whether this call performed
/// the registration.
pub fn register_once(host: &dyn NotificationHost) -> bool {
    if CALLBACK_REGISTERED.swap(true, Ordering::Relaxed) {
        return false;
    }
    host.register_invalidation_callback(on_resource_invalidation);
    debug!("registered resource invalidation callback with host");
    true
}

/// The invalidation callback. The host may invoke it at any time, including
/// reentrantly inside export work that is still holding an entry handle.
///
/// Because of that, this function never structurally mutates the store: the
/// only write it performs is flagging the affected entry stale, an idempotent
/// field store. Physical removal is deferred to the sweep. Notifications for
/// untracked ids and notifications arriving with no session bound are normal
/// and ignored, since there is no per-id unsubscribe and no way to unregister
/// at session end.
pub fn on_resource_invalidation(resource_id: ResourceId) {
    let Some(cache) = ACTIVE_CACHE.read().as_ref().and_then(Weak::upgrade) else {
        trace!(
            "ignoring invalidation for resource {}: no session bound",
            resource_id
        );
        return;
    };

    if let Some(entry) = cache.find(resource_id) {
        entry.invalidate();
        cache.stats().record_invalidation();
        trace!("flagged cached metadata for resource {} stale", resource_id);
    }
}

/// Points the process-wide binding at a new session's cache. Fails if a live
/// session is already bound; a stale binding left by a session that went away
/// without unbinding counts as free.
pub(crate) fn bind_active_cache(cache: &Arc<MetaCache>) -> Result<(), CacheError> {
    let mut binding = ACTIVE_CACHE.write();
    if binding.as_ref().and_then(Weak::upgrade).is_some() {
        return Err(CacheError::SessionAlreadyActive);
    }
    *binding = Some(Arc::downgrade(cache));
    Ok(())
}

/// Clears the process-wide binding. Must happen before the session's cache is
/// dropped so a notification arriving mid-teardown observes "no session"
/// rather than a store being torn down.
pub(crate) fn unbind_active_cache() {
    *ACTIVE_CACHE.write() = None;
}
