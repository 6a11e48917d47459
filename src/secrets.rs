//! Secret store abstraction (§6 Inputs: "Secret store: get/put/delete of
//! opaque blobs by key"). Backs the job-scoped ephemeral credentials step
//! of the Credentials Resolver chain (§4.5) and the scheduler bookkeeping.

use async_trait::async_trait;

#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>>;
    async fn put(&self, key: &str, value: &str) -> anyhow::Result<()>;
    async fn delete(&self, key: &str) -> anyhow::Result<()>;

    /// Read-then-delete: the single-use semantics required by §4.5 step 1
    /// for job-scoped ephemeral credentials.
    async fn take(&self, key: &str) -> anyhow::Result<Option<String>> {
        let value = self.get(key).await?;
        if value.is_some() {
            self.delete(key).await?;
        }
        Ok(value)
    }
}

/// In-memory `SecretStore` used by tests and as a reference implementation.
#[derive(Default)]
pub struct InMemorySecretStore {
    inner: tokio::sync::Mutex<std::collections::HashMap<String, String>>,
}

#[async_trait]
impl SecretStore for InMemorySecretStore {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        Ok(self.inner.lock().await.get(key).cloned())
    }

    async fn put(&self, key: &str, value: &str) -> anyhow::Result<()> {
        self.inner.lock().await.insert(key.to_string(), value.to_string());
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
    async fn take_deletes_after_read() {
        let store = InMemorySecretStore::default();
        store.put("job/123/creds", "secret").await.unwrap();

        let first = store.take("job/123/creds").await.unwrap();
        assert_eq!(first.as_deref(), Some("secret"));

        let second = store.take("job/123/creds").await.unwrap();
        assert_eq!(second, None);
    }
}
