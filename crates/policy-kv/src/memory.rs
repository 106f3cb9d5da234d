// In-memory versioned KV store with compare-and-swap.
use crate::{KvClient, KvPair, KvResult};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct State {
    entries: HashMap<String, Entry>,
    // Shared across keys, like a raft index: every write bumps it.
    last_index: u64,
}

#[derive(Debug, Clone)]
struct Entry {
    value: Vec<u8>,
    modify_index: u64,
}

/// In-memory KV store with Consul-style modification indices.
///
/// Not durable and not shared across processes. Adapters that should contend
/// on the same record must share one instance (wrap it in an `Arc`).
///
/// ```
/// use policy_kv::{InMemoryKv, KvClient, KvPair};
///
/// let store = InMemoryKv::new();
/// let rt = tokio::runtime::Runtime::new().expect("rt");
/// rt.block_on(async {
///     store.put("cluster/region", b"us-east".to_vec()).await.expect("put");
///     let stale = KvPair::new("cluster/region", b"eu-west".to_vec(), 0);
///     assert!(!store.cas(&stale).await.expect("cas"));
/// });
/// ```
#[derive(Debug, Default)]
pub struct InMemoryKv {
    // A single lock keeps the index comparison and the write atomic.
    inner: RwLock<State>,
}

impl InMemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn delete(&self, key: &str) -> Option<Vec<u8>> {
        let mut state = self.inner.write().await;
        let removed = state.entries.remove(key).map(|entry| entry.value);
        if removed.is_some() {
            state.last_index += 1;
        }
        removed
    }

    /// Highest index assigned so far (`0` for a fresh store).
    pub async fn last_index(&self) -> u64 {
        self.inner.read().await.last_index
    }
}

#[async_trait]
impl KvClient for InMemoryKv {
    async fn get(&self, key: &str) -> KvResult<Option<KvPair>> {
        Ok(self
            .inner
            .read()
            .await
            .entries
            .get(key)
            .map(|entry| KvPair::new(key, entry.value.clone(), entry.modify_index)))
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> KvResult<()> {
        let mut state = self.inner.write().await;
        state.last_index += 1;
        let modify_index = state.last_index;
        state.entries.insert(
            key.to_string(),
            Entry {
                value,
                modify_index,
            },
        );
        Ok(())
    }

    async fn cas(&self, pair: &KvPair) -> KvResult<bool> {
        let mut state = self.inner.write().await;
        let current = state.entries.get(&pair.key).map(|entry| entry.modify_index);
        let matches = match current {
            None => pair.modify_index == 0,
            Some(index) => index == pair.modify_index,
        };
        if !matches {
            return Ok(false);
        }
        state.last_index += 1;
        let modify_index = state.last_index;
        state.entries.insert(
            pair.key.clone(),
            Entry {
                value: pair.value.clone(),
                modify_index,
            },
        );
        Ok(true)
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
