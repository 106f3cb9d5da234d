//! Versioned key-value client seam used by the policy adapter.
//!
//! # Purpose
//! Defines the minimal surface the adapter needs from a distributed KV store:
//! a single-key read that exposes the record's modification index, and a
//! compare-and-swap write keyed on that index.
//!
//! # Backends
//! - [`ConsulKv`]: HTTP client for the Consul KV API.
//! - [`InMemoryKv`]: process-local store for tests and local development.
//!
//! # Key invariants
//! - `get` on a missing key is `Ok(None)`, never an error.
//! - `cas` with `modify_index == 0` creates the key only if it is absent.
//! - `cas` returns `Ok(false)` on index mismatch; `Err` is reserved for
//!   transport and protocol failures.
//!
//! # Examples
//! ```
//! use policy_kv::{InMemoryKv, KvClient, KvPair};
//!
//! let rt = tokio::runtime::Runtime::new().expect("rt");
//! rt.block_on(async {
//!     let kv = InMemoryKv::new();
//!     let created = kv.cas(&KvPair::new("rp", b"[]".to_vec(), 0)).await.expect("cas");
//!     assert!(created);
//!     let pair = kv.get("rp").await.expect("get").expect("present");
//!     assert_eq!(pair.modify_index, 1);
//! });
//! ```
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

mod address;
mod consul;
mod memory;

pub use address::{DEFAULT_CONSUL_PORT, resolve_address};
pub use consul::ConsulKv;
pub use memory::InMemoryKv;

/// One stored record plus the store-assigned modification index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvPair {
    pub key: String,
    pub value: Vec<u8>,
    /// Optimistic-concurrency token. `0` for a record that does not exist yet.
    pub modify_index: u64,
}

impl KvPair {
    pub fn new(key: impl Into<String>, value: Vec<u8>, modify_index: u64) -> Self {
        Self {
            key: key.into(),
            value,
            modify_index,
        }
    }
}

#[derive(Debug, Error)]
pub enum KvError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("invalid address: {0}")]
    InvalidAddress(String),
}

pub type KvResult<T> = Result<T, KvError>;

#[async_trait]
pub trait KvClient: Send + Sync {
    async fn get(&self, key: &str) -> KvResult<Option<KvPair>>;
    async fn put(&self, key: &str, value: Vec<u8>) -> KvResult<()>;
    async fn cas(&self, pair: &KvPair) -> KvResult<bool>;
    fn backend_name(&self) -> &'static str;
}

#[async_trait]
impl<T: KvClient + ?Sized> KvClient for Arc<T> {
    async fn get(&self, key: &str) -> KvResult<Option<KvPair>> {
        (**self).get(key).await
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> KvResult<()> {
        (**self).put(key, value).await
    }

    async fn cas(&self, pair: &KvPair) -> KvResult<bool> {
        (**self).cas(pair).await
    }

    fn backend_name(&self) -> &'static str {
        (**self).backend_name()
    }
}
