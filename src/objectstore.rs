//! Object-store abstraction (§6 Outputs: shard blobs, meta sidecars,
//! statistics artifacts, ruleset content). S3-like: flat key space,
//! whole-object get/put, best-effort atomic replace via a rename.

use async_trait::async_trait;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>>;
    async fn put(&self, key: &str, value: Vec<u8>) -> anyhow::Result<()>;
    async fn rename(&self, from: &str, to: &str) -> anyhow::Result<()>;
    async fn delete(&self, key: &str) -> anyhow::Result<()>;

    /// Atomic replace: write to a `.tmp` key then rename over the final
    /// key, matching §4.3's "write-tmp + swap" guarantee for `write_all`
    /// and `write_meta`.
    async fn put_atomic(&self, key: &str, value: Vec<u8>) -> anyhow::Result<()> {
        let tmp_key = format!("{key}.tmp");
        self.put(&tmp_key, value).await?;
        self.rename(&tmp_key, key).await
    }
}

/// In-memory `ObjectStore` used by tests and as a reference implementation.
#[derive(Default)]
pub struct InMemoryObjectStore {
    inner: tokio::sync::Mutex<std::collections::HashMap<String, Vec<u8>>>,
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(self.inner.lock().await.get(key).cloned())
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> anyhow::Result<()> {
        self.inner.lock().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn rename(&self, from: &str, to: &str) -> anyhow::Result<()> {
        let mut guard = self.inner.lock().await;
        let value = guard
            .remove(from)
            .ok_or_else(|| anyhow::anyhow!("rename source key not found: {from}"))?;
        guard.insert(to.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> anyhow::Result<()> {
        self.inner.lock().await.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_atomic_leaves_no_tmp_key_visible() {
        let store = InMemoryObjectStore::default();
        store.put_atomic("shards/0.json", b"hello".to_vec()).await.unwrap();

        assert_eq!(store.get("shards/0.json").await.unwrap().unwrap(), b"hello");
        assert!(store.get("shards/0.json.tmp").await.unwrap().is_none());
    }
}
