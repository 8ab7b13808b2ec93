//! Navigation resolution.
//!
//! A page can be requested under several identities (with or without trailing
//! slash, with a query string, with extra headers) that all mean the same
//! document. The resolver tries each shape against the store before touching
//! the network, and stores live results under every shape it can predict.

use std::sync::Arc;

use http::header::ACCEPT;
use http::{HeaderValue, StatusCode};
use offkit_net::{Network, Request, Response};
use tracing::{debug, info, warn};

use crate::offline;
use crate::store::{cache_key, GenerationHandle, MatchOptions};

/// Store lookup shapes, in the order they are tried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchStrategy {
    /// The request itself, headers included.
    ExactRequest,
    /// Path only, query dropped.
    Pathname,
    /// Path with a trailing slash added.
    PathnameWithSlash,
    /// Path with its trailing slash removed.
    PathnameWithoutSlash,
    /// The full absolute URL as a string key.
    AbsoluteUrl,
    /// A bare GET carrying only an HTML Accept header.
    HtmlAccept,
}

/// How a navigation was answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Served from the store.
    Cached(MatchStrategy),
    /// Fetched live.
    Network,
    /// A cached always-safe page stood in.
    Fallback(String),
    /// Nothing available; synthesized offline page.
    OfflinePage,
}

/// A resolved navigation.
#[derive(Debug, Clone)]
pub struct NavigationResult {
    pub response: Response,
    pub resolution: Resolution,
}

/// Resolves navigations against one store generation.
pub struct NavigationResolver {
    generation: GenerationHandle,
    network: Arc<dyn Network>,
    fallback_pages: Vec<String>,
}

impl NavigationResolver {
    pub fn new(
        generation: GenerationHandle,
        network: Arc<dyn Network>,
        fallback_pages: Vec<String>,
    ) -> Self {
        Self {
            generation,
            network,
            fallback_pages,
        }
    }

    /// Answer a navigation. Always produces a response.
    pub async fn resolve(&self, request: &Request) -> NavigationResult {
        if let Some((strategy, response)) = self.lookup(request).await {
            debug!(url = %request.url, ?strategy, "Navigation served from store");
            return NavigationResult {
                response,
                resolution: Resolution::Cached(strategy),
            };
        }

        if self.network.is_online() {
            match self.network.fetch(request).await {
                Ok(response) => {
                    if response.status == StatusCode::OK {
                        self.store_all_shapes(request, &response).await;
                    } else {
                        debug!(
                            url = %request.url,
                            status = %response.status,
                            "Navigation response not stored"
                        );
                    }
                    return NavigationResult {
                        response,
                        resolution: Resolution::Network,
                    };
                }
                Err(e) => {
                    warn!(url = %request.url, error = %e, "Navigation fetch failed");
                }
            }
        } else {
            debug!(url = %request.url, "Offline, skipping navigation fetch");
        }

        for page in &self.fallback_pages {
            if let Some(response) = self.generation.match_key(page).await {
                info!(url = %request.url, fallback = %page, "Serving fallback page");
                return NavigationResult {
                    response: offline::as_fallback(response),
                    resolution: Resolution::Fallback(page.clone()),
                };
            }
        }

        info!(url = %request.url, "Serving offline page");
        NavigationResult {
            response: offline::offline_page(),
            resolution: Resolution::OfflinePage,
        }
    }

    /// Try every lookup shape, stopping at the first hit.
    pub async fn lookup(&self, request: &Request) -> Option<(MatchStrategy, Response)> {
        if let Some(hit) = self
            .generation
            .match_request(request, MatchOptions::default())
            .await
        {
            return Some((MatchStrategy::ExactRequest, hit));
        }

        let path = request.url.path();
        let mut keys = vec![(MatchStrategy::Pathname, path.to_string())];
        if !path.ends_with('/') {
            keys.push((MatchStrategy::PathnameWithSlash, format!("{path}/")));
        } else if let Some(stripped) = strip_trailing_slash(path) {
            keys.push((MatchStrategy::PathnameWithoutSlash, stripped.to_string()));
        }
        keys.push((MatchStrategy::AbsoluteUrl, request.url.to_string()));

        for (strategy, key) in keys {
            if let Some(hit) = self.generation.match_key(&key).await {
                return Some((strategy, hit));
            }
        }

        let bare = Request::get(request.url.clone())
            .header(ACCEPT, HeaderValue::from_static("text/html"));
        self.generation
            .match_request(&bare, MatchOptions::default())
            .await
            .map(|hit| (MatchStrategy::HtmlAccept, hit))
    }

    /// Store a live page under the request, its path and its slash twin.
    async fn store_all_shapes(&self, request: &Request, response: &Response) {
        if let Err(e) = self.generation.put(request, response).await {
            warn!(url = %request.url, error = %e, "Failed to store navigation");
        }

        let path = request.url.path();
        let twin = if path.ends_with('/') {
            strip_trailing_slash(path).map(str::to_string)
        } else {
            Some(format!("{path}/"))
        };

        let request_key = cache_key(&request.url);
        for key in std::iter::once(path.to_string()).chain(twin) {
            let same_as_request = request
                .url
                .join(&key)
                .map(|u| cache_key(&u) == request_key)
                .unwrap_or(false);
            if same_as_request {
                continue;
            }
            if let Err(e) = self.generation.put_key(&key, response).await {
                warn!(
                    url = %request.url,
                    key = %key,
                    error = %e,
                    "Failed to store navigation alias"
                );
            }
        }
    }
}

/// `/scan/` → `/scan`; the root keeps its slash.
fn strip_trailing_slash(path: &str) -> Option<&str> {
    match path.strip_suffix('/') {
        Some(stripped) if !stripped.is_empty() => Some(stripped),
        _ => None,
    }
}
