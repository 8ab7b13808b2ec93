//! Scripted network for unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use futures::future::BoxFuture;
use offkit_net::{NetError, Network, Request, Response};

/// Serves canned responses by URL; unknown URLs fail like a refused connection.
pub(crate) struct MockNetwork {
    routes: Mutex<HashMap<String, Response>>,
    online: AtomicBool,
    calls: AtomicUsize,
}

impl MockNetwork {
    pub(crate) fn new() -> Self {
        Self {
            routes: Mutex::new(HashMap::new()),
            online: AtomicBool::new(true),
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn offline() -> Self {
        let network = Self::new();
        network.set_online(false);
        network
    }

    pub(crate) fn respond(&self, url: &str, response: Response) {
        self.routes.lock().unwrap().insert(url.to_string(), response);
    }

    pub(crate) fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Network for MockNetwork {
    fn fetch<'a>(&'a self, request: &'a Request) -> BoxFuture<'a, Result<Response, NetError>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);

            if !self.online.load(Ordering::SeqCst) {
                return Err(NetError::Offline);
            }

            self.routes
                .lock()
                .unwrap()
                .get(request.url.as_str())
                .cloned()
                .map(|response| response.with_url(request.url.clone()))
                .ok_or_else(|| {
                    NetError::RequestFailed(format!("connection refused: {}", request.url))
                })
        })
    }

    fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}
