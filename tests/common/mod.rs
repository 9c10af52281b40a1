#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::OnceLock;

use parking_lot::Mutex;
use stream_meta_cache::{InvalidationCallback, NotificationHost, ResourceId};

/// Test double for the host's notification system: counts registrations and
/// replays notifications through whatever callback was registered.
#[derive(Default)]
pub struct RecordingHost {
    registrations: AtomicUsize,
    callback: Mutex<Option<InvalidationCallback>>,
}

impl RecordingHost {
    pub fn registrations(&self) -> usize {
        self.registrations.load(Ordering::Relaxed)
    }

    /// Delivers a notification the way the host would: a synchronous call
    /// into the registered callback.
    pub fn notify(&self, resource_id: ResourceId) {
        let callback =
            (*self.callback.lock()).expect("no invalidation callback registered with host");
        callback(resource_id);
    }
}

impl NotificationHost for RecordingHost {
    fn register_invalidation_callback(&self, callback: InvalidationCallback) {
        self.registrations.fetch_add(1, Ordering::Relaxed);
        *self.callback.lock() = Some(callback);
    }
}

/// Registration happens once per process, so every test in a binary shares
/// one host; the first session to start wires the callback up for the rest.
pub fn shared_host() -> &'static RecordingHost {
    static HOST: OnceLock<RecordingHost> = OnceLock::new();
    HOST.get_or_init(RecordingHost::default)
}
