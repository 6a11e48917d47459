//! `ShardStore`: the persisted, sharded form of a [`ShardsCollection`]
//! (§4.3 Operations table).

use std::collections::{BTreeMap, HashSet};

use crate::domain::{PolicyMeta, ShardKey, ShardPart, ShardsCollection};
use crate::error::ShardStoreError;
use crate::objectstore::ObjectStore;

use super::sharding::{SHARD_COUNT, meta_key, shard_index, shard_key};

/// Binds an in-memory [`ShardsCollection`] to an object-store location.
/// Not `Sync`: one owner per job/tenant collection (§5 shared resource
/// policy) — callers never share a `ShardStore` across tasks.
pub struct ShardStore<'a> {
    object_store: &'a dyn ObjectStore,
    base_key: String,
    collection: ShardsCollection,
}

impl<'a> ShardStore<'a> {
    pub fn new(object_store: &'a dyn ObjectStore, base_key: impl Into<String>) -> Self {
        Self {
            object_store,
            base_key: base_key.into(),
            collection: ShardsCollection::new(),
        }
    }

    pub fn collection(&self) -> &ShardsCollection {
        &self.collection
    }

    pub fn collection_mut(&mut self) -> &mut ShardsCollection {
        &mut self.collection
    }

    /// `put_parts`: in-memory insert; last write by `(policy, location)` wins.
    pub fn put_parts<I: IntoIterator<Item = ShardPart>>(&mut self, parts: I) {
        self.collection.put_parts(parts);
    }

    pub fn set_meta(&mut self, policy: impl Into<String>, meta: PolicyMeta) {
        self.collection.set_meta(policy, meta);
    }

    pub fn put_part(&mut self, part: ShardPart) {
        self.collection.put_part(part);
    }

    pub fn drop_part(&mut self, key: &ShardKey) -> Option<ShardPart> {
        self.collection.drop_part(key)
    }

    pub fn update(&mut self, other: &ShardsCollection) {
        self.collection.update(other);
    }

    pub fn diff(&self, other: &ShardsCollection) -> ShardsCollection {
        self.collection.diff(other)
    }

    /// `fetch(region)`: loads only the shard containing `location`; other
    /// shards remain unloaded. Merges into the in-memory collection.
    pub async fn fetch(&mut self, location: &str) -> Result<(), ShardStoreError> {
        let idx = shard_index(location);
        self.load_shard(idx).await
    }

    /// `fetch_by_indexes`: load a specific set of shard indexes, for
    /// projection against an existing collection.
    pub async fn fetch_by_indexes(&mut self, indexes: &HashSet<u32>) -> Result<(), ShardStoreError> {
        for &idx in indexes {
            self.load_shard(idx).await?;
        }
        Ok(())
    }

    /// `fetch_all`: loads every shard into memory.
    pub async fn fetch_all(&mut self) -> Result<(), ShardStoreError> {
        for idx in 0..SHARD_COUNT {
            self.load_shard(idx).await?;
        }
        Ok(())
    }

    /// `fetch_meta`: loads the meta sidecar into memory.
    pub async fn fetch_meta(&mut self) -> Result<(), ShardStoreError> {
        let key = meta_key(&self.base_key);
        let raw = self
            .object_store
            .get(&key)
            .await
            .map_err(|source| ShardStoreError::ObjectStore { key: key.clone(), source })?;
        let Some(bytes) = raw else { return Ok(()) };
        let meta: BTreeMap<String, PolicyMeta> =
            serde_json::from_slice(&bytes).map_err(|e| ShardStoreError::ObjectStore {
                key,
                source: anyhow::anyhow!(e),
            })?;
        for (policy, m) in meta {
            self.collection.set_meta(policy, m);
        }
        Ok(())
    }

    async fn load_shard(&mut self, idx: u32) -> Result<(), ShardStoreError> {
        let key = shard_key(&self.base_key, idx);
        let raw = self
            .object_store
            .get(&key)
            .await
            .map_err(|source| ShardStoreError::ObjectStore { key: key.clone(), source })?;
        let Some(bytes) = raw else { return Ok(()) };
        let parts: Vec<ShardPart> = serde_json::from_slice(&bytes).map_err(|e| ShardStoreError::ObjectStore {
            key,
            source: anyhow::anyhow!(e),
        })?;
        self.collection.put_parts(parts);
        Ok(())
    }

    /// `write_all`: each shard blob replaced atomically (write-tmp +
    /// swap); a mid-loop failure leaves the already-written shards
    /// updated and the rest at their previous version, surfaced as
    /// `ShardStoreError::PartialWrite`.
    pub async fn write_all(&self) -> Result<(), ShardStoreError> {
        let mut by_shard: BTreeMap<u32, Vec<&ShardPart>> = BTreeMap::new();
        for part in self.collection.iter() {
            by_shard.entry(shard_index(&part.key.location)).or_default().push(part);
        }

        let mut written = Vec::new();
        for (idx, parts) in &by_shard {
            let key = shard_key(&self.base_key, *idx);
            let bytes = serde_json::to_vec(parts).expect("ShardPart always serializes");
            if let Err(source) = self.object_store.put_atomic(&key, bytes).await {
                tracing::warn!(shard_index = idx, %key, error = %source, "shard write failed mid-loop");
                return Err(ShardStoreError::PartialWrite { written_indexes: written });
            }
            written.push(*idx);
        }
        Ok(())
    }

    /// `write_meta`: meta sidecar replaced atomically.
    pub async fn write_meta(&self) -> Result<(), ShardStoreError> {
        let key = meta_key(&self.base_key);
        let bytes = serde_json::to_vec(self.collection.meta()).expect("PolicyMeta always serializes");
        self.object_store
            .put_atomic(&key, bytes)
            .await
            .map_err(|source| ShardStoreError::ObjectStore { key, source })
    }
}
