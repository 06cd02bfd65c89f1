//! Registry of page sessions controlled by the worker.

use std::sync::atomic::{AtomicU64, Ordering};

use hashbrown::HashMap;

/// A page session (window) reachable from the controller.
#[derive(Debug, Clone)]
pub struct PageClient {
    /// Client id.
    pub id: String,

    /// Current URL.
    pub url: String,

    /// Whether this session is controlled by the live generation. Sessions
    /// opened before the first activation start uncontrolled.
    pub controlled: bool,

    /// Whether the window is focused.
    pub focused: bool,
}

/// In-memory registry of page sessions.
#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: HashMap<String, PageClient>,
}

impl ClientRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an uncontrolled page session. Returns its id.
    pub fn add(&mut self, url: impl Into<String>) -> String {
        let id = next_client_id();
        self.clients.insert(
            id.clone(),
            PageClient {
                id: id.clone(),
                url: url.into(),
                controlled: false,
                focused: false,
            },
        );
        id
    }

    /// Get a session by id.
    pub fn get(&self, id: &str) -> Option<&PageClient> {
        self.clients.get(id)
    }

    /// Remove a closed session.
    pub fn remove(&mut self, id: &str) -> Option<PageClient> {
        self.clients.remove(id)
    }

    /// Take control of every registered session, so subsequent requests are
    /// intercepted without a reload. Returns the number of sessions claimed.
    pub fn claim(&mut self) -> usize {
        let mut claimed = 0;
        for client in self.clients.values_mut() {
            if !client.controlled {
                client.controlled = true;
                claimed += 1;
            }
        }
        claimed
    }

    /// Open a new controlled, focused window at `url`.
    pub fn open_window(&mut self, url: impl Into<String>) -> PageClient {
        let id = next_client_id();
        let client = PageClient {
            id: id.clone(),
            url: url.into(),
            controlled: true,
            focused: true,
        };
        self.clients.insert(id, client.clone());
        client
    }

    /// Number of registered sessions.
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Whether no sessions are registered.
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Number of controlled sessions.
    pub fn controlled_count(&self) -> usize {
        self.clients.values().filter(|c| c.controlled).count()
    }
}

fn next_client_id() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    format!("client-{}", COUNTER.fetch_add(1, Ordering::Relaxed))
}
