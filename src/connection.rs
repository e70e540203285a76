use crate::namespace::DEFAULT_NAMESPACE;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

static NEXT_CLIENT_ID: AtomicU64 = AtomicU64::new(1);

/// Per-client connection state.
#[derive(Debug)]
pub struct ClientState {
    pub id: u64,
    pub addr: String,
    /// Namespace every key of this session lives in.
    pub namespace: String,
    pub is_admin: bool,
    pub authenticated: bool,
    pub should_close: bool,
    pub name: Option<String>,
    /// Resume point of the next RANDOMKEY.
    pub last_random_key: Vec<u8>,
    /// Cancelled by CLIENT KILL.
    pub cancel: CancellationToken,
    created: Instant,
}

impl ClientState {
    /// A fresh session. Without a server password it starts out as an
    /// authenticated admin in the default namespace.
    pub fn new(addr: String, requires_auth: bool) -> Self {
        ClientState {
            id: NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed),
            addr,
            namespace: DEFAULT_NAMESPACE.to_string(),
            is_admin: !requires_auth,
            authenticated: !requires_auth,
            should_close: false,
            name: None,
            last_random_key: Vec::new(),
            cancel: CancellationToken::new(),
            created: Instant::now(),
        }
    }

    /// Attach the session to `namespace` after a successful authentication.
    pub fn bind(&mut self, namespace: &str, admin: bool) {
        if self.namespace != namespace {
            self.last_random_key.clear();
        }
        self.namespace = namespace.to_string();
        self.is_admin = admin;
        self.authenticated = true;
    }

    pub fn info(&self) -> ClientInfo {
        ClientInfo {
            id: self.id,
            addr: self.addr.clone(),
            name: self.name.clone().unwrap_or_default(),
            namespace: self.namespace.clone(),
            created: self.created,
            cancel: self.cancel.clone(),
        }
    }
}

/// What the registry knows about a live session.
#[derive(Debug, Clone)]
pub struct ClientInfo {
    pub id: u64,
    pub addr: String,
    pub name: String,
    pub namespace: String,
    created: Instant,
    cancel: CancellationToken,
}

impl ClientInfo {
    /// One CLIENT LIST line, without the trailing newline.
    pub fn describe(&self) -> String {
        format!(
            "id={} addr={} name={} age={} namespace={}",
            self.id,
            self.addr,
            self.name,
            self.created.elapsed().as_secs(),
            self.namespace
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientType {
    Normal,
    PubSub,
    Slave,
    Master,
}

impl ClientType {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "normal" => Some(ClientType::Normal),
            "pubsub" => Some(ClientType::PubSub),
            "slave" | "replica" => Some(ClientType::Slave),
            "master" => Some(ClientType::Master),
            _ => None,
        }
    }
}

/// Filter of `CLIENT KILL`. Unset fields match every client.
#[derive(Debug, Clone, PartialEq)]
pub struct KillFilter {
    pub addr: Option<String>,
    pub id: Option<u64>,
    pub kind: Option<ClientType>,
    pub skip_me: bool,
}

impl Default for KillFilter {
    fn default() -> Self {
        KillFilter {
            addr: None,
            id: None,
            kind: None,
            skip_me: true,
        }
    }
}

impl KillFilter {
    fn matches(&self, client: &ClientInfo, self_id: u64) -> bool {
        if self.skip_me && client.id == self_id {
            return false;
        }
        if self.addr.as_ref().is_some_and(|addr| *addr != client.addr) {
            return false;
        }
        if self.id.is_some_and(|id| id != client.id) {
            return false;
        }
        // Every session served here is a normal client.
        self.kind.is_none_or(|kind| kind == ClientType::Normal)
    }
}

/// Live sessions, for CLIENT LIST and CLIENT KILL.
#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: HashMap<u64, ClientInfo>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        ClientRegistry::default()
    }

    /// Add or refresh the entry of `client`.
    pub fn register(&mut self, client: &ClientState) {
        self.clients.insert(client.id, client.info());
    }

    pub fn unregister(&mut self, id: u64) {
        self.clients.remove(&id);
    }

    /// Every session, ordered by id.
    pub fn list(&self) -> Vec<&ClientInfo> {
        let mut clients: Vec<&ClientInfo> = self.clients.values().collect();
        clients.sort_by_key(|c| c.id);
        clients
    }

    /// Cancel every session matching `filter`. Returns how many were hit.
    /// Cancelled sessions close once their current command has finished.
    pub fn kill(&mut self, filter: &KillFilter, self_id: u64) -> usize {
        let victims: Vec<u64> = self
            .clients
            .values()
            .filter(|c| filter.matches(c, self_id))
            .map(|c| c.id)
            .collect();
        for id in &victims {
            if let Some(client) = self.clients.remove(id) {
                client.cancel.cancel();
            }
        }
        victims.len()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

pub type SharedClients = Arc<RwLock<ClientRegistry>>;
