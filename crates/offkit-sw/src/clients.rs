//! Pages the offline layer can control.
//!
//! A client is uncontrolled until a worker claims it. Claiming happens at the
//! end of activation, so already-open pages switch to the new generation
//! without a reload.

use hashbrown::HashMap;
use offkit_net::UrlPattern;
use std::sync::atomic::{AtomicU64, Ordering};
use url::Url;

use crate::worker::WorkerId;

/// A page or worker context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Client {
    /// Client ID.
    pub id: String,

    /// Client URL.
    pub url: Url,

    /// Client type.
    pub client_type: ClientType,

    /// Worker currently controlling this client.
    pub controller: Option<WorkerId>,
}

/// Client type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientType {
    #[default]
    Window,
    Worker,
    SharedWorker,
    All,
}

/// Options for [`Clients::match_all`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ClientMatchOptions {
    /// Include clients not controlled by the given worker.
    pub include_uncontrolled: bool,
    pub client_type: ClientType,
}

/// Known clients, keyed by ID.
#[derive(Debug, Default)]
pub struct Clients {
    clients: HashMap<String, Client>,
}

impl Clients {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new, uncontrolled client.
    pub fn open(&mut self, url: Url, client_type: ClientType) -> Client {
        let client = Client {
            id: next_client_id(),
            url,
            client_type,
            controller: None,
        };
        self.clients.insert(client.id.clone(), client.clone());
        client
    }

    pub fn add(&mut self, client: Client) {
        self.clients.insert(client.id.clone(), client);
    }

    pub fn remove(&mut self, id: &str) -> Option<Client> {
        self.clients.remove(id)
    }

    pub fn get(&self, id: &str) -> Option<&Client> {
        self.clients.get(id)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Clients of the requested type, sorted by ID.
    ///
    /// Without `include_uncontrolled`, only clients controlled by `worker` are
    /// returned.
    pub fn match_all(&self, worker: WorkerId, options: ClientMatchOptions) -> Vec<&Client> {
        let mut matched: Vec<&Client> = self
            .clients
            .values()
            .filter(|c| options.include_uncontrolled || c.controller == Some(worker))
            .filter(|c| match options.client_type {
                ClientType::All => true,
                t => c.client_type == t,
            })
            .collect();
        matched.sort_by(|a, b| a.id.cmp(&b.id));
        matched
    }

    /// Take control of every client inside `scope`.
    ///
    /// Returns the IDs whose controller changed, sorted.
    pub fn claim(&mut self, scope: &UrlPattern, worker: WorkerId) -> Vec<String> {
        let mut changed: Vec<String> = self
            .clients
            .values_mut()
            .filter(|c| scope.matches(&c.url) && c.controller != Some(worker))
            .map(|c| {
                c.controller = Some(worker);
                c.id.clone()
            })
            .collect();
        changed.sort();
        changed
    }
}

fn next_client_id() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    format!("client-{:06}", COUNTER.fetch_add(1, Ordering::Relaxed))
}
