use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use http::StatusCode;
use offkit_net::{NetError, Network, Request, Response, Url};
use offkit_sw::{OfflineConfig, ResourceStore, ServiceWorker};
use tracing_subscriber::EnvFilter;

pub const ORIGIN: &str = "https://farm.example/";
pub const QR_LIB: &str = "https://unpkg.com/html5-qrcode@2.3.8/html5-qrcode.min.js";

/// Origin stand-in with switchable connectivity and per-URL failures.
#[derive(Default)]
pub struct FakeOrigin {
    routes: Mutex<HashMap<String, Response>>,
    offline: AtomicBool,
    calls: AtomicUsize,
}

impl FakeOrigin {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Origin serving the farm app shell.
    pub fn with_app_shell() -> Arc<Self> {
        let origin = Self::new();
        origin.serve("/", "<h1>Farm home</h1>");
        origin.serve("/scan/", "<h1>Scan a tree</h1>");
        origin.serve("/static/farm_app/service-worker.js", "self.addEventListener()");
        origin
    }

    pub fn serve(&self, path: &str, body: &str) {
        let url = url(path);
        self.routes
            .lock()
            .unwrap()
            .insert(url.to_string(), Response::new(StatusCode::OK, body.to_string()));
    }

    pub fn serve_absolute(&self, url: &str, response: Response) {
        self.routes.lock().unwrap().insert(url.to_string(), response);
    }

    pub fn set_online(&self, online: bool) {
        self.offline.store(!online, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Network for FakeOrigin {
    fn fetch<'a>(&'a self, request: &'a Request) -> BoxFuture<'a, Result<Response, NetError>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.offline.load(Ordering::SeqCst) {
                return Err(NetError::Offline);
            }
            let found = self
                .routes
                .lock()
                .unwrap()
                .get(request.url.as_str())
                .cloned();
            found
                .map(|response| response.with_url(request.url.clone()))
                .ok_or_else(|| NetError::RequestFailed(format!("no route for {}", request.url)))
        })
    }

    fn is_online(&self) -> bool {
        !self.offline.load(Ordering::SeqCst)
    }
}

pub fn url(path: &str) -> Url {
    Url::parse(ORIGIN).unwrap().join(path).unwrap()
}

pub fn config(version: u32) -> OfflineConfig {
    OfflineConfig {
        version,
        ..OfflineConfig::for_origin(ORIGIN)
    }
}

pub fn store() -> ResourceStore {
    ResourceStore::from_config(&config(1)).unwrap()
}

/// Route worker logs to the test harness; `RUST_LOG=offkit_sw=debug` shows them.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Install and activate a worker of the given version.
pub async fn active_worker(
    version: u32,
    store: &ResourceStore,
    origin: Arc<FakeOrigin>,
) -> ServiceWorker {
    init_tracing();
    let (worker, _events) = ServiceWorker::new(config(version), store.clone(), origin).unwrap();
    worker.install().await.unwrap();
    worker.activate().await.unwrap();
    worker
}
