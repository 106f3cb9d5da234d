//! Casbin adapter persisting the whole policy in one versioned KV record.
//!
//! # Purpose
//! Implements [`casbin::Adapter`] on top of any [`KvClient`]. The complete
//! rule table lives under [`POLICY_KEY`] and is replaced as a unit on every
//! save.
//!
//! # Write protocol
//! `save_policy` reads the record's modification index, encodes the model's
//! table, and issues a single compare-and-swap at that index. A mismatch
//! means another writer committed in between; it surfaces as
//! [`PolicyStoreError::ConcurrentModification`] and is never retried here.
//! No lock is held between the read and the write.
//!
//! # Read path
//! A missing record loads as the empty policy. A stored value that does not
//! decode is logged and ignored unless `strict_decode` is set.
//!
//! # Unsupported operations
//! Per-rule mutations (`add_*`, `remove_*`) always fail with
//! [`PolicyStoreError::NotImplemented`] and never touch the store. Disable
//! auto-save on the enforcer and call `save_policy` instead.
use crate::codec::{self, RecordFormat, Rule};
use crate::config::AdapterConfig;
use crate::errors::{PolicyStoreError, PolicyStoreResult};
use async_trait::async_trait;
use casbin::{Adapter, Filter, Model};
use policy_kv::{ConsulKv, KvClient, KvPair};
use std::sync::Arc;

/// Fixed key of the policy record. Not prefixed.
pub const POLICY_KEY: &str = "rp";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AdapterOptions {
    pub format: RecordFormat,
    pub strict_decode: bool,
}

impl From<&AdapterConfig> for AdapterOptions {
    fn from(config: &AdapterConfig) -> Self {
        Self {
            format: config.format,
            strict_decode: config.strict_decode,
        }
    }
}

/// Decoded policy record as currently stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecord {
    pub rules: Vec<Rule>,
    pub modify_index: u64,
}

#[derive(Clone)]
pub struct KvAdapter {
    client: Arc<dyn KvClient>,
    options: AdapterOptions,
    is_filtered: bool,
}

impl std::fmt::Debug for KvAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KvAdapter")
            .field("backend", &self.client.backend_name())
            .field("options", &self.options)
            .field("is_filtered", &self.is_filtered)
            .finish()
    }
}

impl KvAdapter {
    pub fn new(client: Arc<dyn KvClient>, options: AdapterOptions) -> Self {
        Self {
            client,
            options,
            is_filtered: false,
        }
    }

    /// Build an adapter backed by Consul at `config.address`.
    pub fn connect(config: &AdapterConfig) -> PolicyStoreResult<Self> {
        let client = ConsulKv::new(
            &config.address,
            config.token.clone(),
            config.request_timeout,
        )
        .map_err(PolicyStoreError::StoreUnavailable)?;
        tracing::debug!(base_url = client.base_url(), "policy adapter connected");
        Ok(Self::new(Arc::new(client), AdapterOptions::from(config)))
    }

    pub fn options(&self) -> AdapterOptions {
        self.options
    }

    pub fn backend_name(&self) -> &'static str {
        self.client.backend_name()
    }

    async fn fetch(&self) -> PolicyStoreResult<Option<KvPair>> {
        self.client
            .get(POLICY_KEY)
            .await
            .map_err(PolicyStoreError::StoreUnavailable)
    }

    /// Read and decode the stored record. Decode failures are always errors
    /// here, whatever `strict_decode` says.
    pub async fn read_record(&self) -> PolicyStoreResult<Option<StoredRecord>> {
        let Some(pair) = self.fetch().await? else {
            return Ok(None);
        };
        let rules = codec::decode(&pair.value).map_err(PolicyStoreError::Decode)?;
        Ok(Some(StoredRecord {
            rules,
            modify_index: pair.modify_index,
        }))
    }

    async fn load_rows(&self) -> PolicyStoreResult<Vec<Rule>> {
        let Some(pair) = self.fetch().await? else {
            tracing::debug!(key = POLICY_KEY, "policy record absent, loading empty policy");
            return Ok(Vec::new());
        };
        match codec::decode(&pair.value) {
            Ok(rows) => {
                tracing::debug!(
                    key = POLICY_KEY,
                    modify_index = pair.modify_index,
                    rows = rows.len(),
                    "policy record fetched"
                );
                Ok(rows)
            }
            Err(err) if self.options.strict_decode => Err(PolicyStoreError::Decode(err)),
            Err(err) => {
                tracing::warn!(
                    key = POLICY_KEY,
                    modify_index = pair.modify_index,
                    error = %err,
                    "ignoring undecodable policy record"
                );
                Ok(Vec::new())
            }
        }
    }

    async fn load_into(
        &self,
        model: &mut dyn Model,
        filter: Option<&Filter<'_>>,
    ) -> PolicyStoreResult<usize> {
        let rows = match self.load_rows().await {
            Ok(rows) => rows,
            Err(err) => {
                metrics::counter!("policy_adapter_loads_total", "result" => "error").increment(1);
                return Err(err);
            }
        };
        let mut loaded = 0;
        for row in rows {
            let Some((ptype, fields)) = codec::route(row, self.options.format) else {
                continue;
            };
            if let Some(filter) = filter
                && !filter_allows(filter, &ptype, &fields)
            {
                continue;
            }
            if codec::apply_to_model(&ptype, fields, model) {
                loaded += 1;
            }
        }
        metrics::counter!("policy_adapter_loads_total", "result" => "ok").increment(1);
        metrics::gauge!("policy_adapter_rules_loaded").set(loaded as f64);
        Ok(loaded)
    }

    /// Replace the stored table with `rules`: read the current index, then
    /// compare-and-swap at that index.
    pub async fn write_table(&self, rules: &[Rule]) -> PolicyStoreResult<()> {
        let observed = match self.fetch().await {
            Ok(pair) => pair.map(|pair| pair.modify_index).unwrap_or(0),
            Err(err) => {
                metrics::counter!("policy_adapter_saves_total", "result" => "error").increment(1);
                return Err(err);
            }
        };
        self.write_at(rules, observed).await
    }

    async fn write_at(&self, rules: &[Rule], observed: u64) -> PolicyStoreResult<()> {
        let result = self.swap_at(rules, observed).await;
        metrics::counter!("policy_adapter_saves_total", "result" => save_result_label(&result))
            .increment(1);
        result
    }

    async fn swap_at(&self, rules: &[Rule], observed: u64) -> PolicyStoreResult<()> {
        let value = codec::encode(rules).map_err(PolicyStoreError::Encode)?;
        let pair = KvPair::new(POLICY_KEY, value, observed);
        let swapped = self
            .client
            .cas(&pair)
            .await
            .map_err(PolicyStoreError::StoreUnavailable)?;
        if !swapped {
            tracing::warn!(
                key = POLICY_KEY,
                expected_index = observed,
                "policy record changed concurrently, save rejected"
            );
            return Err(PolicyStoreError::ConcurrentModification {
                key: POLICY_KEY.to_string(),
                expected_index: observed,
            });
        }
        tracing::debug!(
            key = POLICY_KEY,
            expected_index = observed,
            rules = rules.len(),
            "policy record saved"
        );
        Ok(())
    }

    /// Rewrite the stored record from this adapter's format into `to`, with
    /// the same compare-and-swap guarantee as a save. Returns the number of
    /// rows written; an absent record is left absent.
    pub async fn rewrite_format(&self, to: RecordFormat) -> PolicyStoreResult<usize> {
        let Some(record) = self.read_record().await? else {
            return Ok(0);
        };
        let rows = codec::retag(record.rules, self.options.format, to);
        self.write_at(&rows, record.modify_index).await?;
        tracing::info!(
            from = %self.options.format,
            %to,
            rows = rows.len(),
            "policy record rewritten"
        );
        Ok(rows.len())
    }
}

/// `result` label of `policy_adapter_saves_total`.
fn save_result_label(result: &PolicyStoreResult<()>) -> &'static str {
    match result {
        Ok(()) => "ok",
        Err(PolicyStoreError::ConcurrentModification { .. }) => "conflict",
        Err(_) => "error",
    }
}

fn filter_allows(filter: &Filter<'_>, ptype: &str, fields: &[String]) -> bool {
    match ptype.chars().next() {
        Some('p') => codec::matches_filter(fields, &filter.p),
        Some('g') => codec::matches_filter(fields, &filter.g),
        _ => false,
    }
}

#[async_trait]
impl Adapter for KvAdapter {
    async fn load_policy(&mut self, m: &mut dyn Model) -> casbin::Result<()> {
        self.load_into(m, None).await?;
        self.is_filtered = false;
        Ok(())
    }

    async fn load_filtered_policy<'a>(
        &mut self,
        m: &mut dyn Model,
        f: Filter<'a>,
    ) -> casbin::Result<()> {
        self.load_into(m, Some(&f)).await?;
        self.is_filtered = true;
        Ok(())
    }

    async fn save_policy(&mut self, m: &mut dyn Model) -> casbin::Result<()> {
        let rules = codec::table_from_model(&*m, self.options.format);
        self.write_table(&rules).await?;
        Ok(())
    }

    async fn clear_policy(&mut self) -> casbin::Result<()> {
        self.write_table(&[]).await?;
        Ok(())
    }

    fn is_filtered(&self) -> bool {
        self.is_filtered
    }

    async fn add_policy(
        &mut self,
        _sec: &str,
        _ptype: &str,
        _rule: Vec<String>,
    ) -> casbin::Result<bool> {
        Err(PolicyStoreError::NotImplemented("add_policy").into())
    }

    async fn add_policies(
        &mut self,
        _sec: &str,
        _ptype: &str,
        _rules: Vec<Vec<String>>,
    ) -> casbin::Result<bool> {
        Err(PolicyStoreError::NotImplemented("add_policies").into())
    }

    async fn remove_policy(
        &mut self,
        _sec: &str,
        _ptype: &str,
        _rule: Vec<String>,
    ) -> casbin::Result<bool> {
        Err(PolicyStoreError::NotImplemented("remove_policy").into())
    }

    async fn remove_policies(
        &mut self,
        _sec: &str,
        _ptype: &str,
        _rules: Vec<Vec<String>>,
    ) -> casbin::Result<bool> {
        Err(PolicyStoreError::NotImplemented("remove_policies").into())
    }

    async fn remove_filtered_policy(
        &mut self,
        _sec: &str,
        _ptype: &str,
        _field_index: usize,
        _field_values: Vec<String>,
    ) -> casbin::Result<bool> {
        Err(PolicyStoreError::NotImplemented("remove_filtered_policy").into())
    }
}
