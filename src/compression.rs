use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Outbound side of a per-peer compression table.
///
/// The encoder asks for an id before writing a literal; advertisements
/// received from the peer populate the table. Table internals (heavy-hitter
/// selection, versioning) live outside the core.
pub trait OutboundCompression: Send + Sync {
    fn compress_actor_ref(&self, path: &str) -> Option<i32>;
    fn compress_class_manifest(&self, manifest: &str) -> Option<i32>;
    fn advertise_actor_ref(&self, path: String, id: i32);
    fn advertise_class_manifest(&self, manifest: String, id: i32);
}

/// Inbound side: id to literal, per originating incarnation.
pub trait InboundCompressions: Send + Sync {
    fn decompress_actor_ref(&self, originating_uid: u64, id: i32) -> Option<String>;
    fn decompress_class_manifest(&self, originating_uid: u64, id: i32) -> Option<String>;
    fn add_actor_ref(&self, originating_uid: u64, id: i32, path: String);
    fn add_class_manifest(&self, originating_uid: u64, id: i32, manifest: String);
}

/// In-memory outbound table.
#[derive(Default)]
pub struct OutboundCompressionTable {
    actor_refs: Mutex<HashMap<String, i32>>,
    manifests: Mutex<HashMap<String, i32>>,
}

impl OutboundCompressionTable {
    pub fn new() -> Arc<Self> {
        Arc::new(OutboundCompressionTable::default())
    }
}

impl OutboundCompression for OutboundCompressionTable {
    fn compress_actor_ref(&self, path: &str) -> Option<i32> {
        self.actor_refs.lock().unwrap().get(path).copied()
    }

    fn compress_class_manifest(&self, manifest: &str) -> Option<i32> {
        self.manifests.lock().unwrap().get(manifest).copied()
    }

    fn advertise_actor_ref(&self, path: String, id: i32) {
        self.actor_refs.lock().unwrap().insert(path, id);
    }

    fn advertise_class_manifest(&self, manifest: String, id: i32) {
        self.manifests.lock().unwrap().insert(manifest, id);
    }
}

/// Sentinel installed on quarantined associations: compresses nothing and
/// swallows advertisements.
pub struct NoOutboundCompression;

impl OutboundCompression for NoOutboundCompression {
    fn compress_actor_ref(&self, _path: &str) -> Option<i32> {
        None
    }

    fn compress_class_manifest(&self, _manifest: &str) -> Option<i32> {
        None
    }

    fn advertise_actor_ref(&self, _path: String, _id: i32) {}

    fn advertise_class_manifest(&self, _manifest: String, _id: i32) {}
}

/// In-memory inbound tables, keyed by originating UID. Replaced wholesale
/// when an inbound pipeline restarts.
#[derive(Default)]
pub struct InboundCompressionTables {
    actor_refs: Mutex<HashMap<(u64, i32), String>>,
    manifests: Mutex<HashMap<(u64, i32), String>>,
}

impl InboundCompressionTables {
    pub fn new() -> Arc<Self> {
        Arc::new(InboundCompressionTables::default())
    }
}

impl InboundCompressions for InboundCompressionTables {
    fn decompress_actor_ref(&self, originating_uid: u64, id: i32) -> Option<String> {
        self.actor_refs
            .lock()
            .unwrap()
            .get(&(originating_uid, id))
            .cloned()
    }

    fn decompress_class_manifest(&self, originating_uid: u64, id: i32) -> Option<String> {
        self.manifests
            .lock()
            .unwrap()
            .get(&(originating_uid, id))
            .cloned()
    }

    fn add_actor_ref(&self, originating_uid: u64, id: i32, path: String) {
        self.actor_refs
            .lock()
            .unwrap()
            .insert((originating_uid, id), path);
    }

    fn add_class_manifest(&self, originating_uid: u64, id: i32, manifest: String) {
        self.manifests
            .lock()
            .unwrap()
            .insert((originating_uid, id), manifest);
    }
}
