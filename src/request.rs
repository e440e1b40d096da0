use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use url::Url;

/// Hard floor for `Request::timeout_ms`.
pub const MIN_TIMEOUT_MS: u64 = 2000;

pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// A unit of crawl work.
///
/// `fingerprint` identifies the request for deduplication and in-flight
/// tracking. Everything under `properties` is carried along for the
/// downloader and never interpreted by the coordination core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub fingerprint: String,
    pub owner: String,
    pub url: String,
    pub method: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: Option<Vec<u8>>,
    pub timeout_ms: u64,
    #[serde(default)]
    pub retried_times: u32,
    #[serde(default)]
    pub depth: u32,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub properties: serde_json::Map<String, Value>,
}

impl Request {
    pub fn builder(owner: impl Into<String>, url: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new(owner, url)
    }

    /// Shortcut for a plain GET with default settings.
    pub fn get(owner: impl Into<String>, url: impl Into<String>) -> Result<Self> {
        RequestBuilder::new(owner, url).build()
    }

    /// Builds a request discovered from this one: same owner and timeout,
    /// one level deeper.
    pub fn follow(&self, url: impl Into<String>) -> Result<Self> {
        RequestBuilder::new(self.owner.clone(), url)
            .timeout_ms(self.timeout_ms)
            .depth(self.depth + 1)
            .build()
    }
}

pub struct RequestBuilder {
    owner: String,
    url: String,
    method: String,
    headers: BTreeMap<String, String>,
    fingerprint_headers: Vec<String>,
    body: Option<Vec<u8>>,
    timeout_ms: u64,
    depth: u32,
    priority: i32,
    properties: serde_json::Map<String, Value>,
    fingerprint: Option<String>,
}

impl RequestBuilder {
    pub fn new(owner: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            url: url.into(),
            method: "GET".to_string(),
            headers: BTreeMap::new(),
            fingerprint_headers: Vec::new(),
            body: None,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            depth: 0,
            priority: 0,
            properties: serde_json::Map::new(),
            fingerprint: None,
        }
    }

    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into().to_uppercase();
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Marks a header as part of the request identity.
    pub fn fingerprint_header(mut self, name: impl Into<String>) -> Self {
        self.fingerprint_headers.push(name.into().to_lowercase());
        self
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn depth(mut self, depth: u32) -> Self {
        self.depth = depth;
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn property(mut self, key: impl Into<String>, value: Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    /// Overrides the computed fingerprint.
    pub fn fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.fingerprint = Some(fingerprint.into());
        self
    }

    pub fn build(self) -> Result<Request> {
        let url = normalize_url(&self.url)?;
        let fingerprint = match self.fingerprint {
            Some(fp) => fp,
            None => compute_fingerprint(
                &url,
                &self.method,
                &self.headers,
                &self.fingerprint_headers,
                self.body.as_deref(),
            ),
        };

        Ok(Request {
            fingerprint,
            owner: self.owner,
            url,
            method: self.method,
            headers: self.headers,
            body: self.body,
            timeout_ms: self.timeout_ms,
            retried_times: 0,
            depth: self.depth,
            priority: self.priority,
            properties: self.properties,
        })
    }
}

/// Drops the fragment and sorts query pairs so equivalent URLs hash alike.
pub fn normalize_url(raw: &str) -> Result<String> {
    let mut url = Url::parse(raw).map_err(|e| Error::Config(format!("Invalid URL {}: {}", raw, e)))?;
    url.set_fragment(None);

    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if pairs.is_empty() {
        url.set_query(None);
    } else {
        pairs.sort();
        url.query_pairs_mut().clear().extend_pairs(pairs);
    }

    Ok(url.to_string())
}

fn compute_fingerprint(
    url: &str,
    method: &str,
    headers: &BTreeMap<String, String>,
    fingerprint_headers: &[String],
    body: Option<&[u8]>,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(method.as_bytes());
    hasher.update(b"\n");
    hasher.update(url.as_bytes());
    hasher.update(b"\n");

    let mut selected: Vec<(String, &str)> = headers
        .iter()
        .map(|(k, v)| (k.to_lowercase(), v.as_str()))
        .filter(|(k, _)| fingerprint_headers.contains(k))
        .collect();
    selected.sort();
    for (name, value) in selected {
        hasher.update(name.as_bytes());
        hasher.update(b":");
        hasher.update(value.as_bytes());
        hasher.update(b"\n");
    }

    if let Some(body) = body {
        hasher.update(body);
    }

    hex::encode(hasher.finalize())
}
