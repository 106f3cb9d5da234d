//! Casbin policy adapter backed by a single versioned KV record.
//!
//! # Purpose
//! Persists a casbin policy (authorization `p` rules and grouping `g` rules)
//! as one serialized record in a distributed KV store, and rebuilds the model
//! from it on load.
//!
//! # How it fits
//! The policy engine owns the in-memory model and rule matching; the store
//! client owns networking. This crate sits between them and owns only the
//! record encoding and the optimistic-concurrency write.
//!
//! # Key invariants
//! - All policy state lives under [`POLICY_KEY`] (`"rp"`).
//! - A save replaces the whole table or fails; it never merges.
//! - A lost compare-and-swap is reported as
//!   [`PolicyStoreError::ConcurrentModification`]; retrying is the caller's
//!   decision.
//!
//! # Examples
//! ```rust
//! use casbin::{Adapter, Model};
//! use policy_adapter::{AdapterOptions, KvAdapter, rbac_model};
//! use policy_kv::InMemoryKv;
//! use std::sync::Arc;
//!
//! # async fn run() -> casbin::Result<()> {
//! let mut adapter = KvAdapter::new(Arc::new(InMemoryKv::new()), AdapterOptions::default());
//! let mut model = rbac_model().await?;
//! model.add_policy("p", "p", vec!["alice".into(), "data1".into(), "read".into()]);
//! adapter.save_policy(&mut model).await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Common pitfalls
//! - Enforcers auto-save single-rule changes through the adapter; with this
//!   adapter those calls fail. Call `enable_auto_save(false)` and persist
//!   with `save_policy`.
//! - In the untagged format a two-field `p` rule reloads as a `g` rule. Use
//!   [`RecordFormat::Tagged`] for such models.

mod adapter;
pub mod codec;
mod config;
mod errors;
mod model;

pub use adapter::{AdapterOptions, KvAdapter, POLICY_KEY, StoredRecord};
pub use codec::{RecordFormat, Rule, RuleCategory};
pub use config::{AdapterConfig, DEFAULT_ADDRESS, DEFAULT_PREFIX, DEFAULT_REQUEST_TIMEOUT_MS};
pub use errors::{PolicyStoreError, PolicyStoreResult};
pub use model::{rbac_model, rbac_model_string};
