//! Mock kind-dynamic store

use crate::error::StoreError;
use crate::store_trait::{DynamicStore, KindDescriptor};
use kube::ResourceExt;
use kube::core::DynamicObject;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

type DynamicKey = (String, String, String);

/// A write accepted by the mock, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DynamicWrite {
    Status { kind: String, name: String },
    Update { kind: String, name: String },
}

/// In-memory infrastructure machines keyed by (kind, namespace, name)
#[derive(Debug, Clone, Default)]
pub struct MockDynamicStore {
    objects: Arc<Mutex<HashMap<DynamicKey, DynamicObject>>>,
    writes: Arc<Mutex<Vec<DynamicWrite>>>,
    fail_next_update: Arc<AtomicBool>,
    fail_next_status: Arc<AtomicBool>,
    next_version: Arc<AtomicUsize>,
}

fn key(kind: &KindDescriptor, namespace: &str, name: &str) -> DynamicKey {
    (kind.kind.clone(), namespace.to_string(), name.to_string())
}

impl MockDynamicStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_resource_version(&self) -> String {
        (self.next_version.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    /// Insert or replace an object, assigning a fresh resource version
    pub fn add(&self, kind: &KindDescriptor, mut object: DynamicObject) {
        object.metadata.resource_version = Some(self.next_resource_version());
        let namespace = object.namespace().unwrap_or_default();
        let k = key(kind, &namespace, &object.name_any());
        self.objects.lock().unwrap().insert(k, object);
    }

    pub fn object(&self, kind: &KindDescriptor, namespace: &str, name: &str) -> Option<DynamicObject> {
        self.objects.lock().unwrap().get(&key(kind, namespace, name)).cloned()
    }

    /// Accepted writes in the order they happened
    pub fn writes(&self) -> Vec<DynamicWrite> {
        self.writes.lock().unwrap().clone()
    }

    /// Reject the next `update` call
    pub fn fail_next_update(&self) {
        self.fail_next_update.store(true, Ordering::SeqCst);
    }

    /// Reject the next `update_status` call
    pub fn fail_next_status(&self) {
        self.fail_next_status.store(true, Ordering::SeqCst);
    }

    fn stored(
        objects: &HashMap<DynamicKey, DynamicObject>,
        kind: &KindDescriptor,
        object: &DynamicObject,
    ) -> Result<(DynamicKey, DynamicObject), StoreError> {
        let namespace = object.namespace().unwrap_or_default();
        let name = object.name_any();
        let k = key(kind, &namespace, &name);
        let stored = objects
            .get(&k)
            .cloned()
            .ok_or_else(|| StoreError::not_found(&kind.kind, &namespace, &name))?;
        if object.metadata.resource_version.is_some()
            && stored.metadata.resource_version != object.metadata.resource_version
        {
            return Err(StoreError::Conflict(format!(
                "{} {}/{}: resource version is stale",
                kind.kind, namespace, name
            )));
        }
        Ok((k, stored))
    }
}

#[async_trait::async_trait]
impl DynamicStore for MockDynamicStore {
    async fn get(&self, kind: &KindDescriptor, namespace: &str, name: &str) -> Result<DynamicObject, StoreError> {
        self.object(kind, namespace, name)
            .ok_or_else(|| StoreError::not_found(&kind.kind, namespace, name))
    }

    async fn update_status(&self, kind: &KindDescriptor, object: &DynamicObject) -> Result<DynamicObject, StoreError> {
        if self.fail_next_status.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Conflict(format!("{} {}: injected failure", kind.kind, object.name_any())));
        }
        let mut objects = self.objects.lock().unwrap();
        let (k, mut stored) = Self::stored(&objects, kind, object)?;

        match object.data.get("status") {
            Some(status) => stored.data["status"] = status.clone(),
            None => {
                if let Some(data) = stored.data.as_object_mut() {
                    data.remove("status");
                }
            }
        }
        stored.metadata.resource_version = Some(self.next_resource_version());
        objects.insert(k, stored.clone());
        self.writes.lock().unwrap().push(DynamicWrite::Status {
            kind: kind.kind.clone(),
            name: object.name_any(),
        });
        Ok(stored)
    }

    async fn update(&self, kind: &KindDescriptor, object: &DynamicObject) -> Result<DynamicObject, StoreError> {
        if self.fail_next_update.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Conflict(format!("{} {}: injected failure", kind.kind, object.name_any())));
        }
        let mut objects = self.objects.lock().unwrap();
        let (k, stored) = Self::stored(&objects, kind, object)?;

        let mut updated = object.clone();
        match stored.data.get("status") {
            Some(status) => updated.data["status"] = status.clone(),
            None => {
                if let Some(data) = updated.data.as_object_mut() {
                    data.remove("status");
                }
            }
        }
        updated.metadata.resource_version = Some(self.next_resource_version());
        objects.insert(k, updated.clone());
        self.writes.lock().unwrap().push(DynamicWrite::Update {
            kind: kind.kind.clone(),
            name: object.name_any(),
        });
        Ok(updated)
    }
}
