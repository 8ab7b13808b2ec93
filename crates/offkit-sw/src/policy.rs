//! Retrieval policy engine.
//!
//! Picks a strategy per request class and runs it:
//!
//! | class                                   | strategy                                |
//! |-----------------------------------------|-----------------------------------------|
//! | navigation                              | navigation fallback chain               |
//! | static-asset, third-party-allowed       | cache-first, failure propagates         |
//! | api-data                                | cache-first, failure becomes 503 JSON   |
//! | non-cacheable, third-party-blocked      | passthrough                             |
//!
//! Cached entries never expire by age; only a generation change retires them.

use std::sync::Arc;

use http::StatusCode;
use offkit_net::{NetError, Network, Request, Response};
use tracing::{debug, trace, warn};

use crate::classify::{RequestClass, RequestClassifier};
use crate::navigation::NavigationResolver;
use crate::offline;
use crate::store::{GenerationHandle, MatchOptions};

/// How a request class is served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Let the platform fetch it; the store is never touched.
    Passthrough,
    /// Store, then network; network failures propagate.
    CacheFirst,
    /// Store, then network; network failures become a 503 JSON response.
    CacheFirstOfflineError,
    /// Multi-shape store lookup, network, fallback pages, offline page.
    NavigationChain,
}

impl Strategy {
    pub fn for_class(class: RequestClass) -> Self {
        match class {
            RequestClass::NonCacheable | RequestClass::ThirdPartyBlocked => Strategy::Passthrough,
            RequestClass::Navigation => Strategy::NavigationChain,
            RequestClass::ApiData => Strategy::CacheFirstOfflineError,
            RequestClass::StaticAsset | RequestClass::ThirdPartyAllowed => Strategy::CacheFirst,
        }
    }
}

/// Result of handling an intercepted request.
#[derive(Debug)]
pub enum FetchOutcome {
    /// Not intercepted; the platform's default handling applies.
    Passthrough,
    /// Answer the page with this response.
    Respond(Response),
    /// Reject the page's fetch with this error.
    Failed(NetError),
}

impl FetchOutcome {
    /// The response, if one was produced.
    pub fn response(&self) -> Option<&Response> {
        match self {
            FetchOutcome::Respond(response) => Some(response),
            _ => None,
        }
    }

    pub fn is_passthrough(&self) -> bool {
        matches!(self, FetchOutcome::Passthrough)
    }
}

/// Runs the per-class retrieval strategies against one store generation.
pub struct PolicyEngine {
    classifier: RequestClassifier,
    generation: GenerationHandle,
    network: Arc<dyn Network>,
    navigation: NavigationResolver,
}

impl PolicyEngine {
    pub fn new(
        classifier: RequestClassifier,
        generation: GenerationHandle,
        network: Arc<dyn Network>,
        fallback_pages: Vec<String>,
    ) -> Self {
        let navigation =
            NavigationResolver::new(generation.clone(), Arc::clone(&network), fallback_pages);
        Self {
            classifier,
            generation,
            network,
            navigation,
        }
    }

    pub fn classifier(&self) -> &RequestClassifier {
        &self.classifier
    }

    /// Classify and handle a request.
    pub async fn handle(&self, request: &Request) -> FetchOutcome {
        let class = self.classifier.classify(&request.descriptor());
        self.execute(class, request).await
    }

    /// Handle a request whose class is already known.
    pub async fn execute(&self, class: RequestClass, request: &Request) -> FetchOutcome {
        let strategy = Strategy::for_class(class);
        trace!(url = %request.url, %class, ?strategy, "Executing strategy");

        match strategy {
            Strategy::Passthrough => FetchOutcome::Passthrough,
            Strategy::NavigationChain => {
                FetchOutcome::Respond(self.navigation.resolve(request).await.response)
            }
            Strategy::CacheFirst | Strategy::CacheFirstOfflineError => {
                self.cache_first(strategy, request).await
            }
        }
    }

    async fn cache_first(&self, strategy: Strategy, request: &Request) -> FetchOutcome {
        if let Some(hit) = self
            .generation
            .match_request(request, MatchOptions::default())
            .await
        {
            debug!(url = %request.url, "Served from store");
            return FetchOutcome::Respond(hit);
        }

        match self.network.fetch(request).await {
            Ok(response) => {
                if self.should_store(request, &response) {
                    self.store(request, &response).await;
                }
                FetchOutcome::Respond(response)
            }
            Err(error) => {
                warn!(url = %request.url, error = %error, "Network fetch failed");

                // A concurrent handler may have stored this since the first lookup.
                if let Some(hit) = self
                    .generation
                    .match_request(request, MatchOptions::default())
                    .await
                {
                    debug!(url = %request.url, "Served from store after network failure");
                    return FetchOutcome::Respond(hit);
                }

                match strategy {
                    Strategy::CacheFirstOfflineError => {
                        FetchOutcome::Respond(offline::api_unavailable())
                    }
                    _ => FetchOutcome::Failed(error),
                }
            }
        }
    }

    fn should_store(&self, request: &Request, response: &Response) -> bool {
        response.status == StatusCode::OK
            && self.classifier.is_cacheable_response(&request.descriptor())
    }

    /// Store a copy; failures are logged and never reach the page.
    async fn store(&self, request: &Request, response: &Response) {
        match self.generation.put(request, response).await {
            Ok(()) => trace!(
                url = %request.url,
                generation = %self.generation.name(),
                "Stored response"
            ),
            Err(e) => warn!(url = %request.url, error = %e, "Failed to store response"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OfflineConfig;
    use crate::store::ResourceStore;
    use crate::testing::MockNetwork;
    use bytes::Bytes;
    use futures::future::BoxFuture;
    use offkit_net::{Destination, ResponseSource};
    use url::Url;

    const ORIGIN: &str = "https://farm.example/";

    struct Fixture {
        engine: PolicyEngine,
        network: Arc<MockNetwork>,
        store: ResourceStore,
        generation: GenerationHandle,
    }

    async fn fixture(network: MockNetwork, max_entry_bytes: Option<usize>) -> Fixture {
        let origin = Url::parse(ORIGIN).unwrap();
        let config = OfflineConfig::for_origin(ORIGIN);
        let store = ResourceStore::with_limit(origin.clone(), max_entry_bytes);
        let generation = store.open("farm-management-v1").await.unwrap();
        let network = Arc::new(network);
        let engine = PolicyEngine::new(
            RequestClassifier::new(&origin, &config),
            generation.clone(),
            network.clone(),
            config.fallback_pages.clone(),
        );
        Fixture {
            engine,
            network,
            store,
            generation,
        }
    }

    fn get(path: &str) -> Request {
        Request::get(Url::parse(ORIGIN).unwrap().join(path).unwrap())
    }

    fn ok(body: &str) -> Response {
        Response::new(StatusCode::OK, body.to_string())
    }

    #[test]
    fn test_strategy_table() {
        assert_eq!(Strategy::for_class(RequestClass::NonCacheable), Strategy::Passthrough);
        assert_eq!(Strategy::for_class(RequestClass::ThirdPartyBlocked), Strategy::Passthrough);
        assert_eq!(Strategy::for_class(RequestClass::Navigation), Strategy::NavigationChain);
        assert_eq!(
            Strategy::for_class(RequestClass::ApiData),
            Strategy::CacheFirstOfflineError
        );
        assert_eq!(Strategy::for_class(RequestClass::StaticAsset), Strategy::CacheFirst);
        assert_eq!(Strategy::for_class(RequestClass::ThirdPartyAllowed), Strategy::CacheFirst);
    }

    #[tokio::test]
    async fn test_cache_hit_skips_network() {
        let f = fixture(MockNetwork::new(), None).await;
        let request = get("/static/farm_app/app.js").destination(Destination::Script);
        f.generation.put(&request, &ok("cached js")).await.unwrap();

        let outcome = f.engine.handle(&request).await;
        let response = outcome.response().unwrap();
        assert_eq!(response.text().unwrap(), "cached js");
        assert_eq!(response.source, ResponseSource::Cache);
        assert_eq!(f.network.calls(), 0);
    }

    #[tokio::test]
    async fn test_miss_fetches_and_stores_copy() {
        let f = fixture(MockNetwork::new(), None).await;
        f.network
            .respond("https://farm.example/api/tree/T-1/", ok(r#"{"tree_id":"T-1"}"#));
        let request = get("/api/tree/T-1/");

        let outcome = f.engine.handle(&request).await;
        assert_eq!(outcome.response().unwrap().source, ResponseSource::Network);

        let second = f.engine.handle(&request).await;
        assert_eq!(second.response().unwrap().source, ResponseSource::Cache);
        assert_eq!(f.network.calls(), 1);
    }

    #[tokio::test]
    async fn test_non_200_not_stored() {
        let f = fixture(MockNetwork::new(), None).await;
        f.network.respond(
            "https://farm.example/api/tree/NOPE/",
            Response::new(StatusCode::NOT_FOUND, r#"{"error":"Tree not found"}"#),
        );
        let request = get("/api/tree/NOPE/");

        let outcome = f.engine.handle(&request).await;
        assert_eq!(outcome.response().unwrap().status, StatusCode::NOT_FOUND);
        assert!(f.generation.is_empty().await);
    }

    #[tokio::test]
    async fn test_uncacheable_subclass_not_stored() {
        let f = fixture(MockNetwork::new(), None).await;
        f.network.respond("https://farm.example/favicon.ico", ok("icon"));

        let outcome = f.engine.handle(&get("/favicon.ico")).await;
        assert!(outcome.response().is_some());
        assert!(f.generation.is_empty().await);
    }

    #[tokio::test]
    async fn test_api_offline_miss_is_503() {
        let f = fixture(MockNetwork::offline(), None).await;

        let outcome = f.engine.handle(&get("/api/synced-activities/")).await;
        let response = outcome.response().unwrap();
        assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            response.text().unwrap(),
            r#"{"error":"Offline - no cached data"}"#
        );
    }

    #[tokio::test]
    async fn test_static_offline_miss_propagates() {
        let f = fixture(MockNetwork::offline(), None).await;
        let request = get("/static/farm_app/app.css").destination(Destination::Style);

        let outcome = f.engine.handle(&request).await;
        assert!(matches!(outcome, FetchOutcome::Failed(NetError::Offline)));
    }

    #[tokio::test]
    async fn test_non_get_never_touches_store() {
        let f = fixture(MockNetwork::new(), None).await;
        let request = Request::post(
            Url::parse("https://farm.example/api/sync/").unwrap(),
            Bytes::from_static(br#"{"activities":[]}"#),
        );

        let outcome = f.engine.handle(&request).await;
        assert!(outcome.is_passthrough());
        assert_eq!(f.store.stats().reads, 0);
        assert_eq!(f.store.stats().writes, 0);
        assert_eq!(f.network.calls(), 0);
    }

    #[tokio::test]
    async fn test_blocked_third_party_passthrough() {
        let f = fixture(MockNetwork::new(), None).await;
        let request = Request::get(Url::parse("https://tracker.example/pixel.gif").unwrap());

        assert!(f.engine.handle(&request).await.is_passthrough());
        assert_eq!(f.store.stats().reads, 0);
    }

    #[tokio::test]
    async fn test_allowlisted_third_party_cached() {
        let f = fixture(MockNetwork::new(), None).await;
        let lib = "https://unpkg.com/html5-qrcode@2.3.8/html5-qrcode.min.js";
        f.network.respond(lib, ok("qr lib"));
        let request = Request::get(Url::parse(lib).unwrap()).destination(Destination::Script);

        f.engine.handle(&request).await;
        f.network.set_online(false);
        let outcome = f.engine.handle(&request).await;

        assert_eq!(outcome.response().unwrap().text().unwrap(), "qr lib");
        assert_eq!(f.network.calls(), 1);
    }

    /// Another handler stores the response while this fetch is failing.
    struct StoredWhileFailing {
        generation: GenerationHandle,
    }

    impl Network for StoredWhileFailing {
        fn fetch<'a>(&'a self, request: &'a Request) -> BoxFuture<'a, Result<Response, NetError>> {
            Box::pin(async move {
                self.generation
                    .put(request, &ok("stored meanwhile"))
                    .await
                    .unwrap();
                Err(NetError::Offline)
            })
        }
    }

    #[tokio::test]
    async fn test_failed_fetch_rechecks_store() {
        let origin = Url::parse(ORIGIN).unwrap();
        let config = OfflineConfig::for_origin(ORIGIN);
        let store = ResourceStore::new(origin.clone());
        let generation = store.open("farm-management-v1").await.unwrap();
        let engine = PolicyEngine::new(
            RequestClassifier::new(&origin, &config),
            generation.clone(),
            Arc::new(StoredWhileFailing {
                generation: generation.clone(),
            }),
            config.fallback_pages.clone(),
        );

        let requests = [
            get("/api/synced-activities/"),
            get("/static/farm_app/app.js").destination(Destination::Script),
        ];
        for request in requests {
            let outcome = engine.handle(&request).await;
            let response = outcome.response().unwrap();
            assert_eq!(response.status, StatusCode::OK);
            assert_eq!(response.source, ResponseSource::Cache);
            assert_eq!(response.text().unwrap(), "stored meanwhile");
        }
    }

    #[tokio::test]
    async fn test_store_failure_does_not_fail_response() {
        let f = fixture(MockNetwork::new(), Some(2)).await;
        f.network
            .respond("https://farm.example/api/synced-activities/", ok(r#"{"activities":[]}"#));

        let outcome = f.engine.handle(&get("/api/synced-activities/")).await;
        assert_eq!(outcome.response().unwrap().status, StatusCode::OK);
        assert_eq!(f.store.stats().write_failures, 1);
        assert!(f.generation.is_empty().await);
    }

    #[tokio::test]
    async fn test_navigation_never_plain_network_only() {
        let f = fixture(MockNetwork::offline(), None).await;
        let outcome = f
            .engine
            .handle(&Request::navigate(Url::parse("https://farm.example/scan").unwrap()))
            .await;

        let response = outcome.response().unwrap();
        assert_eq!(response.status, StatusCode::OK);
        assert!(response.text().unwrap().contains("Offline"));
    }
}
