//! Consul KV backend.
//!
//! # Purpose
//! Talks to the Consul HTTP KV API (`/v1/kv/<key>`). Only the primitives the
//! policy adapter relies on are implemented: default-consistency reads,
//! unconditional puts, and check-and-set writes.
//!
//! # Protocol notes
//! - A missing key answers `404`, which maps to `Ok(None)`.
//! - Values travel base64-encoded inside the JSON read response and raw in
//!   the PUT body.
//! - `PUT ?cas=<index>` answers the literal body `true` or `false`. Index `0`
//!   means "create only if absent".
//!
//! # Security
//! - The ACL token is sent as `X-Consul-Token`; it is never logged.
use crate::{KvClient, KvError, KvPair, KvResult, resolve_address};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use std::time::Duration;

const TOKEN_HEADER: &str = "X-Consul-Token";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct KvEntry {
    key: String,
    value: Option<String>,
    modify_index: u64,
}

#[derive(Clone)]
pub struct ConsulKv {
    base_url: String,
    client: reqwest::Client,
    token: Option<String>,
}

impl std::fmt::Debug for ConsulKv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsulKv")
            .field("base_url", &self.base_url)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl ConsulKv {
    /// Build a client for `address` (`host`, `host:port`, optionally with an
    /// `http://` or `https://` scheme). The timeout applies per request.
    pub fn new(address: &str, token: Option<String>, timeout: Duration) -> KvResult<Self> {
        let (scheme, rest) = address.split_once("://").unwrap_or(("http", address));
        if scheme != "http" && scheme != "https" {
            return Err(KvError::InvalidAddress(format!(
                "unsupported scheme {scheme:?}"
            )));
        }
        let host_port = resolve_address(rest.trim_end_matches('/'))?;
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: format!("{scheme}://{host_port}"),
            client,
            token,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, key: &str) -> RequestBuilder {
        let url = format!("{}/v1/kv/{}", self.base_url, key.trim_start_matches('/'));
        let builder = self.client.request(method, url);
        match &self.token {
            Some(token) => builder.header(TOKEN_HEADER, token),
            None => builder,
        }
    }
}

async fn unexpected_status(response: Response) -> KvError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    KvError::UnexpectedStatus { status, body }
}

fn parse_entries(key: &str, body: &[u8]) -> KvResult<Option<KvPair>> {
    let entries: Vec<KvEntry> = serde_json::from_slice(body)
        .map_err(|err| KvError::InvalidResponse(format!("decode kv entries: {err}")))?;
    let Some(entry) = entries.into_iter().find(|entry| entry.key == key) else {
        return Ok(None);
    };
    let value = match entry.value {
        Some(encoded) => STANDARD
            .decode(encoded.as_bytes())
            .map_err(|err| KvError::InvalidResponse(format!("decode kv value: {err}")))?,
        None => Vec::new(),
    };
    Ok(Some(KvPair::new(entry.key, value, entry.modify_index)))
}

fn parse_bool_body(body: &str) -> KvResult<bool> {
    match body.trim() {
        "true" => Ok(true),
        "false" => Ok(false),
        other => Err(KvError::InvalidResponse(format!(
            "expected true/false, got {other:?}"
        ))),
    }
}

#[async_trait]
impl KvClient for ConsulKv {
    async fn get(&self, key: &str) -> KvResult<Option<KvPair>> {
        let key = key.trim_start_matches('/');
        let response = self.request(Method::GET, key).send().await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            tracing::debug!(key, "consul kv key absent");
            return Ok(None);
        }
        if !status.is_success() {
            tracing::warn!(key, status = status.as_u16(), "consul kv read failed");
            return Err(unexpected_status(response).await);
        }
        let body = response.bytes().await?;
        let pair = parse_entries(key, &body)?;
        tracing::debug!(
            key,
            modify_index = pair.as_ref().map(|pair| pair.modify_index),
            "consul kv read"
        );
        Ok(pair)
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> KvResult<()> {
        let response = self.request(Method::PUT, key).body(value).send().await?;
        if !response.status().is_success() {
            return Err(unexpected_status(response).await);
        }
        let body = response.text().await?;
        if parse_bool_body(&body)? {
            Ok(())
        } else {
            Err(KvError::InvalidResponse("unconditional put rejected".to_string()))
        }
    }

    async fn cas(&self, pair: &KvPair) -> KvResult<bool> {
        let response = self
            .request(Method::PUT, &pair.key)
            .query(&[("cas", pair.modify_index)])
            .body(pair.value.clone())
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            tracing::warn!(
                key = %pair.key,
                cas_index = pair.modify_index,
                status = status.as_u16(),
                "consul kv cas failed"
            );
            return Err(unexpected_status(response).await);
        }
        let body = response.text().await?;
        let applied = parse_bool_body(&body)?;
        tracing::debug!(
            key = %pair.key,
            cas_index = pair.modify_index,
            applied,
            "consul kv cas"
        );
        Ok(applied)
    }

    fn backend_name(&self) -> &'static str {
        "consul"
    }
}
