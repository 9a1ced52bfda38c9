use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::db::store::{ObjectStore, Revision, StoreError};
use crate::model::WorldObject;
use crate::values::{Failure, ObjId, Value};

#[derive(Clone, Debug)]
pub struct CacheConfig {
    pub writeback_interval: Duration,
    pub dirty_threshold: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            writeback_interval: Duration::from_secs(60),
            dirty_threshold: 200,
        }
    }
}

struct Entry {
    obj: Arc<WorldObject>,
    revision: Option<Revision>,
    // Session-scoped objects live only in the cache and are never written
    // back.
    transient: bool,
}

/// Write-through cache over the object store. The cached copy is the
/// authoritative value for in-process reads; writes update the cache
/// synchronously and are flushed to the store periodically and when the
/// dirty count crosses the threshold.
pub struct WorldCache {
    store: Arc<dyn ObjectStore>,
    entries: DashMap<ObjId, Entry>,
    dirty: StdMutex<HashSet<ObjId>>,
    flush_signal: Notify,
    config: CacheConfig,
}

impl From<StoreError> for Failure {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(what) => Failure::NotFound { what },
            StoreError::Conflict { .. } => Failure::StoreConflict {
                id: String::new(),
            },
            StoreError::Backend(reason) => Failure::Transport(reason),
        }
    }
}

impl WorldCache {
    pub fn new(store: Arc<dyn ObjectStore>, config: CacheConfig) -> Self {
        Self {
            store,
            entries: DashMap::new(),
            dirty: StdMutex::new(HashSet::new()),
            flush_signal: Notify::new(),
            config,
        }
    }

    pub fn with_defaults(store: Arc<dyn ObjectStore>) -> Self {
        Self::new(store, CacheConfig::default())
    }

    /// Cached copy if present, otherwise read-through from the store.
    pub async fn get(&self, id: &ObjId) -> Result<Option<Arc<WorldObject>>, Failure> {
        if let Some(entry) = self.entries.get(id) {
            return Ok(Some(entry.obj.clone()));
        }
        match self.store.fetch(id).await? {
            None => Ok(None),
            Some((obj, revision)) => {
                let arc = Arc::new(obj);
                self.entries.insert(
                    id.clone(),
                    Entry {
                        obj: arc.clone(),
                        revision: Some(revision),
                        transient: false,
                    },
                );
                Ok(Some(arc))
            }
        }
    }

    pub async fn get_required(&self, id: &ObjId) -> Result<Arc<WorldObject>, Failure> {
        self.get(id).await?.ok_or_else(|| Failure::NotFound {
            what: id.to_string(),
        })
    }

    /// Unconditional install, marking the object dirty for write-back.
    /// Rejects parent cycles.
    pub async fn put(&self, obj: WorldObject) -> Result<(), Failure> {
        self.check_acyclic(&obj).await?;
        let id = obj.id.clone();
        let revision = self
            .entries
            .get(&id)
            .and_then(|e| e.revision.clone());
        self.entries.insert(
            id.clone(),
            Entry {
                obj: Arc::new(obj),
                revision,
                transient: false,
            },
        );
        self.mark_dirty(&id);
        Ok(())
    }

    /// Creation path: minting an ID that already exists fails.
    pub async fn create(&self, obj: WorldObject) -> Result<(), Failure> {
        if self.get(&obj.id).await?.is_some() {
            return Err(Failure::Permission {
                reason: format!("object {} already exists", obj.id),
            });
        }
        self.put(obj).await
    }

    /// Installs a cache-only object (a session's transient user). Never
    /// written back, gone on evict.
    pub fn put_transient(&self, obj: WorldObject) {
        self.entries.insert(
            obj.id.clone(),
            Entry {
                obj: Arc::new(obj),
                revision: None,
                transient: true,
            },
        );
    }

    /// Drops a cache entry without touching the store.
    pub fn evict(&self, id: &ObjId) {
        self.entries.remove(id);
        self.dirty.lock().unwrap().remove(id);
    }

    pub async fn delete(&self, id: &ObjId) -> Result<(), Failure> {
        let revision = self.entries.get(id).and_then(|e| e.revision.clone());
        let transient = self
            .entries
            .get(id)
            .map(|e| e.transient)
            .unwrap_or(false);
        self.evict(id);
        if transient {
            return Ok(());
        }
        match self.store.delete_by_id(id, revision.as_ref()).await {
            Ok(()) | Err(StoreError::NotFound(_)) => Ok(()),
            Err(StoreError::Conflict { .. }) => {
                // Refetch the winning revision and retry once.
                let current = self.store.fetch(id).await?.map(|(_, rev)| rev);
                match self.store.delete_by_id(id, current.as_ref()).await {
                    Ok(()) | Err(StoreError::NotFound(_)) => Ok(()),
                    Err(_) => Err(Failure::StoreConflict { id: id.to_string() }),
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Read-modify-write on one object, serialized by the per-entry lock.
    /// The object must already be resident or fetchable.
    pub async fn update<F>(&self, id: &ObjId, mutate: F) -> Result<(), Failure>
    where
        F: FnOnce(&mut WorldObject),
    {
        self.get_required(id).await?;
        let transient;
        {
            let Some(mut entry) = self.entries.get_mut(id) else {
                return Err(Failure::NotFound {
                    what: id.to_string(),
                });
            };
            let mut obj = (*entry.obj).clone();
            mutate(&mut obj);
            obj.updated = Utc::now();
            entry.obj = Arc::new(obj);
            transient = entry.transient;
        }
        if !transient {
            self.mark_dirty(id);
        }
        Ok(())
    }

    /// Inheritance-aware attribute read: left-to-right breadth-first over
    /// the parent graph, first own definition wins, diamonds visited once.
    /// Absence is `None`, distinct from a stored null.
    pub async fn get_attribute(&self, id: &ObjId, name: &str) -> Result<Option<Value>, Failure> {
        let mut queue = VecDeque::new();
        let mut visited: HashSet<ObjId> = HashSet::new();
        queue.push_back(id.clone());
        while let Some(current) = queue.pop_front() {
            if !visited.insert(current.clone()) {
                continue;
            }
            let Some(obj) = self.get(&current).await? else {
                continue;
            };
            if let Some(value) = obj.own_attribute(name) {
                return Ok(Some(value.clone()));
            }
            for parent in &obj.parent_ids {
                if !visited.contains(parent) {
                    queue.push_back(parent.clone());
                }
            }
        }
        Ok(None)
    }

    /// Relocates an object, maintaining the location/contents links on both
    /// ends.
    pub async fn move_object(&self, id: &ObjId, dest: Option<ObjId>) -> Result<(), Failure> {
        let prior = self.get_required(id).await?.location_id.clone();
        if let Some(old) = prior {
            self.update(&old, |o| {
                o.content_ids.remove(id);
            })
            .await?;
        }
        if let Some(new) = &dest {
            let moved = id.clone();
            self.update(new, move |o| {
                o.content_ids.insert(moved);
            })
            .await?;
        }
        self.update(id, |o| o.location_id = dest).await
    }

    /// Resident objects whose own attribute map contains `name`. Inherited
    /// definitions deliberately do not count; used by the tick sweep.
    pub fn resident_with_own_attr(&self, name: &str) -> Vec<ObjId> {
        self.entries
            .iter()
            .filter(|e| e.obj.own_attribute(name).is_some())
            .map(|e| e.key().clone())
            .collect()
    }

    pub fn dirty_count(&self) -> usize {
        self.dirty.lock().unwrap().len()
    }

    fn mark_dirty(&self, id: &ObjId) {
        let over_threshold = {
            let mut dirty = self.dirty.lock().unwrap();
            dirty.insert(id.clone());
            dirty.len() >= self.config.dirty_threshold
        };
        if over_threshold {
            self.flush_signal.notify_one();
        }
    }

    async fn check_acyclic(&self, obj: &WorldObject) -> Result<(), Failure> {
        // The object may not be installed yet, so walk the closure of its
        // would-be parents and refuse if it shows up there.
        let mut queue: VecDeque<ObjId> = obj.parent_ids.iter().cloned().collect();
        let mut visited: HashSet<ObjId> = HashSet::new();
        while let Some(current) = queue.pop_front() {
            if current == obj.id {
                return Err(Failure::Permission {
                    reason: format!("parent cycle through {}", obj.id),
                });
            }
            if !visited.insert(current.clone()) {
                continue;
            }
            if let Some(ancestor) = self.get(&current).await? {
                for parent in &ancestor.parent_ids {
                    queue.push_back(parent.clone());
                }
            }
        }
        Ok(())
    }

    /// Flushes every dirty entry to the store. Conflicts refetch, merge (the
    /// cached copy is authoritative), and retry once before surfacing.
    pub async fn flush_now(&self) -> Result<(), Failure> {
        let ids: Vec<ObjId> = {
            let mut dirty = self.dirty.lock().unwrap();
            dirty.drain().collect()
        };
        let mut failed = None;
        for id in ids {
            if let Err(e) = self.flush_one(&id).await {
                error!(object = %id, error = %e, "write-back failed");
                failed = Some(e);
            }
        }
        match failed {
            None => Ok(()),
            Some(e) => Err(e),
        }
    }

    async fn flush_one(&self, id: &ObjId) -> Result<(), Failure> {
        let Some((obj, revision)) = self
            .entries
            .get(id)
            .filter(|e| !e.transient)
            .map(|e| (e.obj.clone(), e.revision.clone()))
        else {
            return Ok(());
        };
        match self.store.store(&obj, revision.as_ref()).await {
            Ok(new_revision) => {
                self.set_revision(id, new_revision);
                Ok(())
            }
            Err(StoreError::Conflict { .. }) => {
                debug!(object = %id, "write-back conflict, refetching");
                let current = self.store.fetch(id).await?.map(|(_, rev)| rev);
                match self.store.store(&obj, current.as_ref()).await {
                    Ok(new_revision) => {
                        self.set_revision(id, new_revision);
                        Ok(())
                    }
                    Err(StoreError::Conflict { .. }) => {
                        Err(Failure::StoreConflict { id: id.to_string() })
                    }
                    Err(e) => Err(e.into()),
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    fn set_revision(&self, id: &ObjId, revision: Revision) {
        if let Some(mut entry) = self.entries.get_mut(id) {
            entry.revision = Some(revision);
        }
    }

    /// Background write-back driver. Runs until the returned handle is
    /// aborted; also woken early when the dirty set crosses the threshold.
    pub fn spawn_writeback(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let cache = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(cache.config.writeback_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately; skip it.
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = interval.tick() => {}
                    _ = cache.flush_signal.notified() => {
                        info!(dirty = cache.dirty_count(), "dirty threshold reached, flushing");
                    }
                }
                if let Err(e) = cache.flush_now().await {
                    warn!(error = %e, "periodic write-back incomplete");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memstore::MemObjectStore;
    use crate::values::{v_null, v_str};

    fn fresh() -> (Arc<MemObjectStore>, WorldCache) {
        let store = Arc::new(MemObjectStore::new());
        let cache = WorldCache::with_defaults(store.clone() as Arc<dyn ObjectStore>);
        (store, cache)
    }

    fn obj(id: &str, parents: &[&str]) -> WorldObject {
        let mut o = WorldObject::new(ObjId::new(id));
        o.parent_ids = parents.iter().map(|p| ObjId::new(*p)).collect();
        o
    }

    #[tokio::test]
    async fn test_get_after_put_without_writeback() {
        let (_, cache) = fresh();
        let mut o = obj("#x", &[]);
        o.set_attribute("k", v_str("v1"));
        cache.put(o.clone()).await.unwrap();

        let got = cache.get(&ObjId::new("#x")).await.unwrap().unwrap();
        assert_eq!(got.own_attribute("k"), Some(&v_str("v1")));

        o.set_attribute("k", v_str("v2"));
        cache.put(o).await.unwrap();
        let got = cache.get(&ObjId::new("#x")).await.unwrap().unwrap();
        assert_eq!(got.own_attribute("k"), Some(&v_str("v2")));
    }

    #[tokio::test]
    async fn test_read_through_installs() {
        let (store, cache) = fresh();
        store.store(&obj("#x", &[]), None).await.unwrap();
        assert!(cache.get(&ObjId::new("#x")).await.unwrap().is_some());
        // Second read must not consult the store; mutate the store behind
        // the cache's back and verify the cached copy is authoritative.
        store
            .store(
                &obj("#x", &["#object"]),
                store
                    .fetch(&ObjId::new("#x"))
                    .await
                    .unwrap()
                    .map(|(_, r)| r)
                    .as_ref(),
            )
            .await
            .unwrap();
        let cached = cache.get(&ObjId::new("#x")).await.unwrap().unwrap();
        assert!(cached.parent_ids.is_empty());
    }

    #[tokio::test]
    async fn test_bfs_attribute_resolution_diamond() {
        let (_, cache) = fresh();
        cache.put(obj("#d", &[])).await.unwrap();
        cache.put(obj("#b", &["#d"])).await.unwrap();
        cache.put(obj("#c", &["#d"])).await.unwrap();
        cache.put(obj("#a", &["#b", "#c"])).await.unwrap();

        cache
            .update(&ObjId::new("#d"), |o| o.set_attribute("color", v_str("red")))
            .await
            .unwrap();
        assert_eq!(
            cache
                .get_attribute(&ObjId::new("#a"), "color")
                .await
                .unwrap(),
            Some(v_str("red"))
        );

        // A definition at the #b/#c level shadows #d; #b has none, #c does.
        cache
            .update(&ObjId::new("#c"), |o| {
                o.set_attribute("color", v_str("blue"))
            })
            .await
            .unwrap();
        assert_eq!(
            cache
                .get_attribute(&ObjId::new("#a"), "color")
                .await
                .unwrap(),
            Some(v_str("blue"))
        );
    }

    #[tokio::test]
    async fn test_left_to_right_precedence() {
        let (_, cache) = fresh();
        let mut b = obj("#b", &[]);
        b.set_attribute("color", v_str("green"));
        let mut c = obj("#c", &[]);
        c.set_attribute("color", v_str("blue"));
        cache.put(b).await.unwrap();
        cache.put(c).await.unwrap();
        cache.put(obj("#a", &["#b", "#c"])).await.unwrap();

        assert_eq!(
            cache
                .get_attribute(&ObjId::new("#a"), "color")
                .await
                .unwrap(),
            Some(v_str("green"))
        );
    }

    #[tokio::test]
    async fn test_absent_distinct_from_null() {
        let (_, cache) = fresh();
        let mut o = obj("#x", &[]);
        o.set_attribute("stored", v_null());
        cache.put(o).await.unwrap();

        assert_eq!(
            cache
                .get_attribute(&ObjId::new("#x"), "stored")
                .await
                .unwrap(),
            Some(v_null())
        );
        assert_eq!(
            cache
                .get_attribute(&ObjId::new("#x"), "missing")
                .await
                .unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_parent_cycle_rejected() {
        let (_, cache) = fresh();
        cache.put(obj("#a", &[])).await.unwrap();
        cache.put(obj("#b", &["#a"])).await.unwrap();

        let err = cache.put(obj("#a", &["#b"])).await.unwrap_err();
        assert!(matches!(err, Failure::Permission { .. }));

        let err = cache.put(obj("#self", &["#self"])).await.unwrap_err();
        assert!(matches!(err, Failure::Permission { .. }));
    }

    #[tokio::test]
    async fn test_create_collision_fails() {
        let (_, cache) = fresh();
        cache.create(obj("#x", &[])).await.unwrap();
        assert!(cache.create(obj("#x", &[])).await.is_err());
    }

    #[tokio::test]
    async fn test_writeback_durability_bound() {
        // Mutations not yet flushed are lost on crash: a fresh cache over
        // the same store sees the pre-mutation value. That is the stated
        // contract; durability is bounded by the write-back interval.
        let store = Arc::new(MemObjectStore::new());
        {
            let cache = WorldCache::with_defaults(store.clone() as Arc<dyn ObjectStore>);
            let mut o = obj("#x", &[]);
            o.set_attribute("k", v_str("before"));
            cache.put(o).await.unwrap();
            cache.flush_now().await.unwrap();

            cache
                .update(&ObjId::new("#x"), |o| o.set_attribute("k", v_str("after")))
                .await
                .unwrap();
            // No flush: the process "crashes" here.
        }
        let restarted = WorldCache::with_defaults(store as Arc<dyn ObjectStore>);
        assert_eq!(
            restarted
                .get_attribute(&ObjId::new("#x"), "k")
                .await
                .unwrap(),
            Some(v_str("before"))
        );
    }

    #[tokio::test]
    async fn test_flush_conflict_retries_once_and_merges() {
        let (store, cache) = fresh();
        let mut o = obj("#x", &[]);
        o.set_attribute("k", v_str("ours"));
        cache.put(o).await.unwrap();
        cache.flush_now().await.unwrap();

        // A rival writer bumps the revision behind our back.
        let (mut rival, rev) = store.fetch(&ObjId::new("#x")).await.unwrap().unwrap();
        rival.set_attribute("k", v_str("theirs"));
        store.store(&rival, Some(&rev)).await.unwrap();

        cache
            .update(&ObjId::new("#x"), |o| o.set_attribute("k", v_str("ours2")))
            .await
            .unwrap();
        cache.flush_now().await.unwrap();

        let (persisted, _) = store.fetch(&ObjId::new("#x")).await.unwrap().unwrap();
        assert_eq!(persisted.own_attribute("k"), Some(&v_str("ours2")));
    }

    #[tokio::test]
    async fn test_transient_objects_never_written_back() {
        let (store, cache) = fresh();
        let t = obj("user-123", &["#user"]);
        cache.put_transient(t);
        cache
            .update(&ObjId::new("user-123"), |o| {
                o.set_attribute("k", v_str("v"))
            })
            .await
            .unwrap();
        cache.flush_now().await.unwrap();
        assert!(store.fetch(&ObjId::new("user-123")).await.unwrap().is_none());

        cache.evict(&ObjId::new("user-123"));
        assert!(cache.get(&ObjId::new("user-123")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_move_object_maintains_both_ends() {
        let (_, cache) = fresh();
        cache.put(obj("#room1", &[])).await.unwrap();
        cache.put(obj("#room2", &[])).await.unwrap();
        cache.put(obj("#thing", &[])).await.unwrap();

        cache
            .move_object(&ObjId::new("#thing"), Some(ObjId::new("#room1")))
            .await
            .unwrap();
        assert!(cache
            .get_required(&ObjId::new("#room1"))
            .await
            .unwrap()
            .content_ids
            .contains(&ObjId::new("#thing")));

        cache
            .move_object(&ObjId::new("#thing"), Some(ObjId::new("#room2")))
            .await
            .unwrap();
        let room1 = cache.get_required(&ObjId::new("#room1")).await.unwrap();
        let room2 = cache.get_required(&ObjId::new("#room2")).await.unwrap();
        assert!(!room1.content_ids.contains(&ObjId::new("#thing")));
        assert!(room2.content_ids.contains(&ObjId::new("#thing")));
        assert_eq!(
            cache
                .get_required(&ObjId::new("#thing"))
                .await
                .unwrap()
                .location_id,
            Some(ObjId::new("#room2"))
        );
    }
}
