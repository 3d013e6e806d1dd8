//! Watch-fed object caches.
//!
//! Each cache is kept current by a `kube_runtime` watcher and reports itself
//! synced once the watcher's initial list has been applied. An optional
//! indexer maps objects to a secondary key (the token index for secrets).

use std::collections::{HashMap, HashSet};
use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use futures::StreamExt;
use kube::{Api, Resource, ResourceExt};
use kube_runtime::{WatchStreamExt, watcher};
use serde::de::DeserializeOwned;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::selector::LabelSelector;

type ObjectKey = (String, String);
type Indexer<K> = Box<dyn Fn(&K) -> Option<String> + Send + Sync>;

/// In-memory view of one resource type.
pub struct ObjectCache<K> {
    name: &'static str,
    objects: RwLock<HashMap<ObjectKey, K>>,
    indexer: Option<Indexer<K>>,
    index: RwLock<HashMap<String, HashSet<ObjectKey>>>,
    synced: AtomicBool,
    relist: Notify,
}

impl<K> Debug for ObjectCache<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectCache")
            .field("name", &self.name)
            .field("synced", &self.is_synced())
            .finish_non_exhaustive()
    }
}

fn key_of<K: Resource>(obj: &K) -> ObjectKey {
    (obj.namespace().unwrap_or_default(), obj.name_any())
}

impl<K> ObjectCache<K> {
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            objects: RwLock::new(HashMap::new()),
            indexer: None,
            index: RwLock::new(HashMap::new()),
            synced: AtomicBool::new(false),
            relist: Notify::new(),
        }
    }

    /// Cache maintaining a secondary index computed by `indexer`
    #[must_use]
    pub fn with_indexer<F>(name: &'static str, indexer: F) -> Self
    where
        F: Fn(&K) -> Option<String> + Send + Sync + 'static,
    {
        Self {
            indexer: Some(Box::new(indexer)),
            ..Self::new(name)
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_synced(&self) -> bool {
        self.synced.load(Ordering::Acquire)
    }

    /// Restart the watcher with a fresh list
    pub fn request_resync(&self) {
        info!("Resync requested for {} cache", self.name);
        self.relist.notify_one();
    }
}

impl<K> ObjectCache<K>
where
    K: Resource + Clone,
{
    pub fn get(&self, namespace: &str, name: &str) -> Option<K> {
        self.objects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// Objects in `namespace` matching `selector`
    pub fn list(&self, namespace: &str, selector: &LabelSelector) -> Vec<K> {
        self.objects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|((ns, _), obj)| ns == namespace && selector.matches(obj.meta().labels.as_ref()))
            .map(|(_, obj)| obj.clone())
            .collect()
    }

    /// Objects whose index key equals `key`
    pub fn by_index(&self, key: &str) -> Vec<K> {
        let index = self.index.read().unwrap_or_else(PoisonError::into_inner);
        let Some(keys) = index.get(key) else {
            return Vec::new();
        };
        let objects = self.objects.read().unwrap_or_else(PoisonError::into_inner);
        keys.iter().filter_map(|k| objects.get(k).cloned()).collect()
    }

    pub fn apply(&self, obj: K) {
        let key = key_of(&obj);
        let index_key = self.indexer.as_ref().and_then(|f| f(&obj));

        let mut objects = self.objects.write().unwrap_or_else(PoisonError::into_inner);
        let mut index = self.index.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = objects.insert(key.clone(), obj) {
            Self::unindex(&mut index, self.indexer.as_ref(), &previous, &key);
        }
        if let Some(index_key) = index_key {
            index.entry(index_key).or_default().insert(key);
        }
    }

    pub fn delete(&self, obj: &K) {
        let key = key_of(obj);
        let mut objects = self.objects.write().unwrap_or_else(PoisonError::into_inner);
        let mut index = self.index.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = objects.remove(&key) {
            Self::unindex(&mut index, self.indexer.as_ref(), &previous, &key);
        }
    }

    /// Replace the whole content, e.g. after a relist
    pub fn replace(&self, objs: Vec<K>) {
        {
            let mut objects = self.objects.write().unwrap_or_else(PoisonError::into_inner);
            let mut index = self.index.write().unwrap_or_else(PoisonError::into_inner);
            objects.clear();
            index.clear();
        }
        for obj in objs {
            self.apply(obj);
        }
    }

    pub fn len(&self) -> usize {
        self.objects.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn unindex(
        index: &mut HashMap<String, HashSet<ObjectKey>>,
        indexer: Option<&Indexer<K>>,
        obj: &K,
        key: &ObjectKey,
    ) {
        let Some(old) = indexer.and_then(|f| f(obj)) else {
            return;
        };
        if let Some(keys) = index.get_mut(&old) {
            keys.remove(key);
            if keys.is_empty() {
                index.remove(&old);
            }
        }
    }

    /// Mark the cache synced. Used when the content is populated without a watcher.
    pub fn mark_synced(&self) {
        self.synced.store(true, Ordering::Release);
    }

    fn handle(&self, event: watcher::Event<K>, pending: &mut Vec<K>) {
        match event {
            watcher::Event::Init => {
                debug!("{} cache relisting", self.name);
                pending.clear();
            }
            watcher::Event::InitApply(obj) => pending.push(obj),
            watcher::Event::InitDone => {
                let count = pending.len();
                self.replace(std::mem::take(pending));
                self.mark_synced();
                info!("{} cache synced with {} objects", self.name, count);
            }
            watcher::Event::Apply(obj) => self.apply(obj),
            watcher::Event::Delete(obj) => self.delete(&obj),
        }
    }
}

impl<K> ObjectCache<K>
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
    K::DynamicType: Default,
{
    /// Feed the cache from `api` until the process exits.
    ///
    /// Stream errors mark the cache unsynced; the watcher backs off and
    /// relists on its own. [`Self::request_resync`] restarts it immediately.
    pub async fn run(self: Arc<Self>, api: Api<K>, config: watcher::Config) {
        info!("Starting {} cache", self.name);
        loop {
            let mut stream = watcher(api.clone(), config.clone()).default_backoff().boxed();
            let mut pending = Vec::new();
            loop {
                tokio::select! {
                    () = self.relist.notified() => break,
                    next = stream.next() => match next {
                        Some(Ok(event)) => self.handle(event, &mut pending),
                        Some(Err(e)) => {
                            warn!("{} cache watch error: {}", self.name, e);
                            self.synced.store(false, Ordering::Release);
                        }
                        None => {
                            warn!("{} cache watch ended, restarting", self.name);
                            tokio::time::sleep(Duration::from_secs(1)).await;
                            break;
                        }
                    },
                }
            }
        }
    }
}
