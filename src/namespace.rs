//! Tenant namespaces and the token-based authentication that selects them.
//!
//! Every namespace except the default one is reached through a token. The
//! default namespace has no token entry: it is what a session gets with the
//! server-wide `requirepass`, or with no password at all when none is set.

use crate::connection::ClientState;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Name of the implicit namespace used by admin sessions.
pub const DEFAULT_NAMESPACE: &str = "__namespace";

/// Longest namespace name; the name is length-prefixed with one byte in
/// every physical key.
pub const MAX_NAMESPACE_LEN: usize = u8::MAX as usize;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum NamespaceError {
    #[error("the namespace was not found")]
    NotFound,

    #[error("the namespace already exists")]
    AlreadyExists,

    #[error("the token already exists")]
    TokenExists,

    #[error("{0}")]
    Invalid(&'static str),
}

pub type NamespaceResult<T> = Result<T, NamespaceError>;

/// Token → namespace mapping shared by every session.
#[derive(Debug, Default, Clone)]
pub struct NamespaceRegistry {
    /// token -> namespace name
    tokens: HashMap<String, String>,
}

impl NamespaceRegistry {
    pub fn new() -> Self {
        NamespaceRegistry::default()
    }

    /// Build a registry from persisted `(name, token)` pairs.
    pub fn from_entries<I>(entries: I, requirepass: Option<&str>) -> NamespaceResult<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut registry = NamespaceRegistry::new();
        for (name, token) in entries {
            registry.add(&name, &token, requirepass)?;
        }
        Ok(registry)
    }

    /// Exact token lookup. A miss never falls back to the default namespace.
    pub fn resolve(&self, token: &str) -> NamespaceResult<&str> {
        self.tokens
            .get(token)
            .map(String::as_str)
            .ok_or(NamespaceError::NotFound)
    }

    /// Token currently assigned to `name`.
    pub fn token_of(&self, name: &str) -> Option<&str> {
        self.tokens
            .iter()
            .find(|(_, ns)| ns.as_str() == name)
            .map(|(token, _)| token.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.token_of(name).is_some()
    }

    /// Register a new namespace. Fails if `name` is already registered.
    pub fn add(&mut self, name: &str, token: &str, requirepass: Option<&str>) -> NamespaceResult<()> {
        validate(name, token, requirepass)?;
        if self.contains(name) {
            return Err(NamespaceError::AlreadyExists);
        }
        if self.tokens.contains_key(token) {
            return Err(NamespaceError::TokenExists);
        }
        self.tokens.insert(token.to_string(), name.to_string());
        Ok(())
    }

    /// Replace the token of an existing namespace.
    pub fn set(&mut self, name: &str, token: &str, requirepass: Option<&str>) -> NamespaceResult<()> {
        validate(name, token, requirepass)?;
        let old_token = self
            .token_of(name)
            .map(str::to_string)
            .ok_or(NamespaceError::NotFound)?;
        match self.tokens.get(token) {
            Some(owner) if owner != name => return Err(NamespaceError::TokenExists),
            _ => {}
        }
        self.tokens.remove(&old_token);
        self.tokens.insert(token.to_string(), name.to_string());
        Ok(())
    }

    pub fn del(&mut self, name: &str) -> NamespaceResult<()> {
        if name == DEFAULT_NAMESPACE {
            return Err(NamespaceError::Invalid("can't delete the default namespace"));
        }
        let token = self
            .token_of(name)
            .map(str::to_string)
            .ok_or(NamespaceError::NotFound)?;
        self.tokens.remove(&token);
        Ok(())
    }

    /// Every `(token, name)` pair, ordered by name.
    pub fn list(&self) -> Vec<(String, String)> {
        let mut pairs: Vec<(String, String)> = self
            .tokens
            .iter()
            .map(|(token, name)| (token.clone(), name.clone()))
            .collect();
        pairs.sort_by(|a, b| a.1.cmp(&b.1));
        pairs
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

fn validate(name: &str, token: &str, requirepass: Option<&str>) -> NamespaceResult<()> {
    if name.is_empty() {
        return Err(NamespaceError::Invalid("namespace name can't be empty"));
    }
    if name.len() > MAX_NAMESPACE_LEN {
        return Err(NamespaceError::Invalid("namespace name is too long"));
    }
    if name.contains(char::is_whitespace) {
        return Err(NamespaceError::Invalid("namespace name can't contain whitespace"));
    }
    if name == DEFAULT_NAMESPACE {
        return Err(NamespaceError::Invalid("can't modify the default namespace"));
    }
    if token.is_empty() {
        return Err(NamespaceError::Invalid("token can't be empty"));
    }
    if requirepass == Some(token) {
        return Err(NamespaceError::Invalid("token can't be the same as requirepass"));
    }
    Ok(())
}

/// Outcome of presenting a secret, before it is mapped to a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthResult {
    Ok,
    InvalidPassword,
    /// Bound to the default namespace as admin, but no password is
    /// configured so authentication was not actually required.
    NoRequirePass,
}

/// Bind `client` to the namespace selected by `secret`.
///
/// Token sessions are never admin, whatever `requirepass` says.
pub fn authenticate(
    registry: &NamespaceRegistry,
    requirepass: Option<&str>,
    client: &mut ClientState,
    secret: &str,
) -> AuthResult {
    if let Ok(name) = registry.resolve(secret) {
        client.bind(name, false);
        return AuthResult::Ok;
    }

    if let Some(pass) = requirepass {
        if pass != secret {
            return AuthResult::InvalidPassword;
        }
    }

    client.bind(DEFAULT_NAMESPACE, true);
    if requirepass.is_none() {
        return AuthResult::NoRequirePass;
    }
    AuthResult::Ok
}

pub type SharedNamespaces = Arc<RwLock<NamespaceRegistry>>;
