//! Resource store: named generations of request → response snapshots.
//!
//! ```text
//! ResourceStore (caches)
//!     └── generation "farm-management-v2"
//!             └── URL (fragment stripped) → CacheEntry
//! ```
//!
//! One entry per URL; storing the same URL again replaces the entry. Entries
//! remember the request header values named by the response's `Vary` header so
//! exact-identity lookups can tell header shapes apart.

use hashbrown::HashMap;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use offkit_net::{Request, Response, ResponseSource};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::RwLock;
use tracing::{debug, trace};
use url::Url;

use crate::config::OfflineConfig;
use crate::ServiceWorkerError;

/// Options that widen a lookup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MatchOptions {
    /// Compare URLs without their query string.
    pub ignore_search: bool,
    /// Match regardless of the request method.
    pub ignore_method: bool,
    /// Skip the `Vary` header comparison.
    pub ignore_vary: bool,
}

/// A stored request/response pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Request URL without fragment.
    pub url: String,
    /// Request method.
    pub method: String,
    /// Request header values for the names listed in the response's `Vary`.
    pub request_headers: Vec<(String, String)>,
    /// Response status.
    pub status: u16,
    /// Response status text.
    pub status_text: String,
    /// Response headers.
    pub headers: Vec<(String, String)>,
    /// Response body.
    pub body: Vec<u8>,
    /// Cached at timestamp (ms since epoch).
    pub cached_at: u64,
}

impl CacheEntry {
    fn new(url: &Url, request_headers: &HeaderMap, response: &Response) -> Self {
        let headers = header_pairs(&response.headers);
        let request_headers = vary_names(&headers)
            .into_iter()
            .filter_map(|name| {
                request_headers
                    .get(name.as_str())
                    .and_then(|v| v.to_str().ok())
                    .map(|v| (name, v.to_string()))
            })
            .collect();

        Self {
            url: cache_key(url),
            method: Method::GET.to_string(),
            request_headers,
            status: response.status.as_u16(),
            status_text: response.status_text.clone(),
            headers,
            body: response.body.to_vec(),
            cached_at: now_millis(),
        }
    }

    /// Rebuild a response from this entry.
    pub fn to_response(&self) -> Response {
        let mut headers = HeaderMap::new();
        for (name, value) in &self.headers {
            if let (Ok(n), Ok(v)) = (
                HeaderName::try_from(name.as_str()),
                HeaderValue::try_from(value.as_str()),
            ) {
                headers.append(n, v);
            }
        }

        Response {
            url: Url::parse(&self.url).ok(),
            status: StatusCode::from_u16(self.status).unwrap_or(StatusCode::OK),
            status_text: self.status_text.clone(),
            headers,
            body: self.body.clone().into(),
            source: ResponseSource::Cache,
        }
    }

    fn url_without_query(&self) -> &str {
        strip_query(&self.url)
    }

    fn vary_matches(&self, request_headers: &HeaderMap) -> bool {
        for name in vary_names(&self.headers) {
            if name == "*" {
                return false;
            }
            let stored = self
                .request_headers
                .iter()
                .find(|(n, _)| *n == name)
                .map(|(_, v)| v.as_str());
            let incoming = request_headers
                .get(name.as_str())
                .and_then(|v| v.to_str().ok());
            if stored != incoming {
                return false;
            }
        }
        true
    }
}

/// Entries of one generation.
#[derive(Debug, Default)]
struct Cache {
    entries: HashMap<String, CacheEntry>,
}

impl Cache {
    fn lookup(
        &self,
        url: &Url,
        method: &Method,
        headers: &HeaderMap,
        options: MatchOptions,
    ) -> Option<&CacheEntry> {
        if !options.ignore_method && method != Method::GET && method != Method::HEAD {
            return None;
        }

        let key = cache_key(url);
        let vary_ok = |entry: &&CacheEntry| options.ignore_vary || entry.vary_matches(headers);

        if options.ignore_search {
            let wanted = strip_query(&key);
            self.entries
                .values()
                .filter(|entry| entry.url_without_query() == wanted)
                .find(vary_ok)
        } else {
            self.entries.get(&key).filter(vary_ok)
        }
    }
}

#[derive(Debug, Default)]
struct Generations {
    /// Names in creation order.
    order: Vec<String>,
    caches: HashMap<String, Cache>,
}

/// Store access counters.
#[derive(Debug, Default)]
struct StoreStats {
    reads: AtomicU64,
    hits: AtomicU64,
    writes: AtomicU64,
    write_failures: AtomicU64,
}

/// Point-in-time copy of the store counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStatsSnapshot {
    pub reads: u64,
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
    pub write_failures: u64,
}

/// Serializable copy of every generation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub generations: Vec<GenerationSnapshot>,
}

/// Serializable copy of one generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationSnapshot {
    pub name: String,
    pub entries: Vec<CacheEntry>,
}

struct StoreInner {
    origin: Url,
    max_entry_bytes: Option<usize>,
    generations: RwLock<Generations>,
    stats: StoreStats,
}

/// Shared resource store. Cloning yields another handle to the same store.
#[derive(Clone)]
pub struct ResourceStore {
    inner: Arc<StoreInner>,
}

impl std::fmt::Debug for ResourceStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceStore")
            .field("origin", &self.inner.origin.as_str())
            .field("max_entry_bytes", &self.inner.max_entry_bytes)
            .finish_non_exhaustive()
    }
}

impl ResourceStore {
    /// Create an empty, unbounded store for the given origin.
    pub fn new(origin: Url) -> Self {
        Self::with_limit(origin, None)
    }

    /// Create an empty store that rejects bodies larger than `max_entry_bytes`.
    pub fn with_limit(origin: Url, max_entry_bytes: Option<usize>) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                origin,
                max_entry_bytes,
                generations: RwLock::new(Generations::default()),
                stats: StoreStats::default(),
            }),
        }
    }

    /// Create an empty store scoped and bounded as `config` describes.
    pub fn from_config(config: &OfflineConfig) -> Result<Self, ServiceWorkerError> {
        Ok(Self::with_limit(config.origin_url()?, config.max_entry_bytes))
    }

    /// Origin string keys are resolved against.
    pub fn origin(&self) -> &Url {
        &self.inner.origin
    }

    /// Open a generation, creating it if it doesn't exist.
    pub async fn open(&self, name: &str) -> Result<GenerationHandle, ServiceWorkerError> {
        if name.trim().is_empty() {
            return Err(ServiceWorkerError::CacheError(
                "generation name is empty".to_string(),
            ));
        }

        let mut generations = self.inner.generations.write().await;
        if !generations.caches.contains_key(name) {
            debug!(generation = %name, "Creating generation");
            generations.order.push(name.to_string());
            generations.caches.insert(name.to_string(), Cache::default());
        }

        Ok(self.handle(name))
    }

    /// Handle to a generation without creating it.
    ///
    /// Reads through a handle to a missing generation miss; writes fail.
    pub fn handle(&self, name: &str) -> GenerationHandle {
        GenerationHandle {
            store: self.clone(),
            name: name.to_string(),
        }
    }

    /// Check if a generation exists.
    pub async fn has(&self, name: &str) -> bool {
        self.inner.generations.read().await.caches.contains_key(name)
    }

    /// Delete a generation and everything in it.
    pub async fn delete(&self, name: &str) -> bool {
        let mut generations = self.inner.generations.write().await;
        let removed = generations.caches.remove(name).is_some();
        if removed {
            generations.order.retain(|n| n != name);
        }
        removed
    }

    /// Generation names in creation order.
    pub async fn keys(&self) -> Vec<String> {
        self.inner.generations.read().await.order.clone()
    }

    /// Look a string key up in every generation, oldest first.
    ///
    /// Meant for carrying entries between generations, not for serving.
    pub async fn match_across_all(&self, key: &str) -> Option<Response> {
        let url = self.resolve_key(key).ok()?;
        let generations = self.inner.generations.read().await;

        let found = generations.order.iter().find_map(|name| {
            generations.caches.get(name).and_then(|cache| {
                cache.lookup(&url, &Method::GET, &HeaderMap::new(), string_key_options())
            })
        });

        self.record_read(found.is_some());
        found.map(CacheEntry::to_response)
    }

    /// Resolve a string key (absolute URL, path, or href) against the origin.
    pub fn resolve_key(&self, key: &str) -> Result<Url, ServiceWorkerError> {
        self.inner
            .origin
            .join(key)
            .map_err(|e| ServiceWorkerError::CacheError(format!("invalid key '{key}': {e}")))
    }

    /// Access counters.
    pub fn stats(&self) -> StoreStatsSnapshot {
        let stats = &self.inner.stats;
        let reads = stats.reads.load(Ordering::Relaxed);
        let hits = stats.hits.load(Ordering::Relaxed);
        StoreStatsSnapshot {
            reads,
            hits,
            misses: reads.saturating_sub(hits),
            writes: stats.writes.load(Ordering::Relaxed),
            write_failures: stats.write_failures.load(Ordering::Relaxed),
        }
    }

    /// Copy every generation into a serializable snapshot.
    pub async fn export_snapshot(&self) -> StoreSnapshot {
        let guard = self.inner.generations.read().await;
        let generations = guard
            .order
            .iter()
            .filter_map(|name| {
                guard.caches.get(name).map(|cache| {
                    let mut entries: Vec<CacheEntry> = cache.entries.values().cloned().collect();
                    entries.sort_by(|a, b| a.url.cmp(&b.url));
                    GenerationSnapshot {
                        name: name.clone(),
                        entries,
                    }
                })
            })
            .collect();
        StoreSnapshot { generations }
    }

    /// Replace the store contents with a snapshot.
    pub async fn import_snapshot(&self, snapshot: StoreSnapshot) {
        let mut restored = Generations::default();
        for generation in snapshot.generations {
            let mut cache = Cache::default();
            for mut entry in generation.entries {
                if let Ok(url) = Url::parse(&entry.url) {
                    entry.url = cache_key(&url);
                }
                cache.entries.insert(entry.url.clone(), entry);
            }
            if restored.caches.insert(generation.name.clone(), cache).is_none() {
                restored.order.push(generation.name);
            }
        }

        debug!(generations = restored.order.len(), "Imported store snapshot");
        *self.inner.generations.write().await = restored;
    }

    /// Write a JSON snapshot to `path`.
    pub async fn save_to_path(&self, path: impl AsRef<Path>) -> Result<(), ServiceWorkerError> {
        let snapshot = self.export_snapshot().await;
        let json = serde_json::to_vec(&snapshot)?;
        tokio::fs::write(path.as_ref(), json).await?;
        Ok(())
    }

    /// Replace the store contents with a JSON snapshot read from `path`.
    pub async fn load_from_path(&self, path: impl AsRef<Path>) -> Result<(), ServiceWorkerError> {
        let json = tokio::fs::read(path.as_ref()).await?;
        let snapshot: StoreSnapshot = serde_json::from_slice(&json)?;
        self.import_snapshot(snapshot).await;
        Ok(())
    }

    async fn lookup(
        &self,
        generation: &str,
        url: &Url,
        method: &Method,
        headers: &HeaderMap,
        options: MatchOptions,
    ) -> Option<Response> {
        let generations = self.inner.generations.read().await;
        let found = generations
            .caches
            .get(generation)
            .and_then(|cache| cache.lookup(url, method, headers, options))
            .map(CacheEntry::to_response);

        self.record_read(found.is_some());
        trace!(generation, url = %url, hit = found.is_some(), "Store lookup");
        found
    }

    async fn insert(
        &self,
        generation: &str,
        url: &Url,
        method: &Method,
        request_headers: &HeaderMap,
        response: &Response,
    ) -> Result<(), ServiceWorkerError> {
        if method != Method::GET {
            return Err(ServiceWorkerError::CacheError(format!(
                "refusing to store {method} request for {url}"
            )));
        }
        if vary_names(&header_pairs(&response.headers))
            .iter()
            .any(|n| n == "*")
        {
            return Err(ServiceWorkerError::CacheError(format!(
                "response for {url} varies on '*'"
            )));
        }
        if let Some(limit) = self.inner.max_entry_bytes {
            if response.body.len() > limit {
                return Err(ServiceWorkerError::QuotaExceeded {
                    url: url.to_string(),
                    size: response.body.len(),
                    limit,
                });
            }
        }

        let entry = CacheEntry::new(url, request_headers, response);
        let key = cache_key(url);

        let mut generations = self.inner.generations.write().await;
        let cache = generations
            .caches
            .get_mut(generation)
            .ok_or_else(|| ServiceWorkerError::NotFound(format!("generation {generation}")))?;
        cache.entries.insert(key, entry);
        Ok(())
    }

    fn record_read(&self, hit: bool) {
        self.inner.stats.reads.fetch_add(1, Ordering::Relaxed);
        if hit {
            self.inner.stats.hits.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn record_write(&self, ok: bool) {
        let counter = if ok {
            &self.inner.stats.writes
        } else {
            &self.inner.stats.write_failures
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Handle to one generation of the store.
#[derive(Debug, Clone)]
pub struct GenerationHandle {
    store: ResourceStore,
    name: String,
}

impl GenerationHandle {
    /// Generation name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Store a response under the request's URL, replacing any previous entry.
    pub async fn put(
        &self,
        request: &Request,
        response: &Response,
    ) -> Result<(), ServiceWorkerError> {
        let result = self
            .store
            .insert(&self.name, &request.url, &request.method, &request.headers, response)
            .await;
        self.store.record_write(result.is_ok());
        result
    }

    /// Store a response under a string key.
    pub async fn put_key(&self, key: &str, response: &Response) -> Result<(), ServiceWorkerError> {
        let result = match self.store.resolve_key(key) {
            Ok(url) => {
                self.store
                    .insert(&self.name, &url, &Method::GET, &HeaderMap::new(), response)
                    .await
            }
            Err(e) => Err(e),
        };
        self.store.record_write(result.is_ok());
        result
    }

    /// Look up a request by its exact identity, widened by `options`.
    pub async fn match_request(
        &self,
        request: &Request,
        options: MatchOptions,
    ) -> Option<Response> {
        self.store
            .lookup(&self.name, &request.url, &request.method, &request.headers, options)
            .await
    }

    /// Look up a string key: same-origin resolution, method-agnostic, no request headers.
    pub async fn match_key(&self, key: &str) -> Option<Response> {
        let url = match self.store.resolve_key(key) {
            Ok(url) => url,
            Err(e) => {
                debug!(key, error = %e, "Unusable store key");
                return None;
            }
        };
        self.store
            .lookup(&self.name, &url, &Method::GET, &HeaderMap::new(), string_key_options())
            .await
    }

    /// Stored URLs, sorted.
    pub async fn keys(&self) -> Vec<String> {
        let generations = self.store.inner.generations.read().await;
        let mut keys: Vec<String> = generations
            .caches
            .get(&self.name)
            .map(|cache| cache.entries.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }

    /// Number of stored entries.
    pub async fn len(&self) -> usize {
        let generations = self.store.inner.generations.read().await;
        generations
            .caches
            .get(&self.name)
            .map(|cache| cache.entries.len())
            .unwrap_or(0)
    }

    /// Whether the generation is empty or missing.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

fn string_key_options() -> MatchOptions {
    MatchOptions {
        ignore_method: true,
        ..Default::default()
    }
}

/// Store key for a URL: the URL without its fragment.
pub fn cache_key(url: &Url) -> String {
    let mut url = url.clone();
    url.set_fragment(None);
    url.to_string()
}

fn strip_query(key: &str) -> &str {
    key.split_once('?').map(|(base, _)| base).unwrap_or(key)
}

fn header_pairs(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect()
}

/// Lower-cased header names listed in `Vary`.
fn vary_names(headers: &[(String, String)]) -> Vec<String> {
    headers
        .iter()
        .filter(|(name, _)| name.eq_ignore_ascii_case("vary"))
        .flat_map(|(_, value)| value.split(','))
        .map(|name| name.trim().to_ascii_lowercase())
        .filter(|name| !name.is_empty())
        .collect()
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
