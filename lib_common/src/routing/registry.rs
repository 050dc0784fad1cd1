//! # Registry (Hub)
//!
//! The only shared mutable structure in the hub: per-namespace maps from
//! client name to live `Client` handle.
//!
//! ## Locking
//! - The outer map (namespace -> `Namespace`) is write-locked when a
//!   namespace is seen for the first time and on removal, which drops a
//!   namespace once its last client is gone.
//! - Each namespace has its own `RwLock`. Registration and removal take it
//!   exclusively; resolution takes a snapshot under the shared lock, so a
//!   resolution pass sees one consistent client set.
//! - Locks are always taken outer first. Registration holds the outer lock
//!   while it inserts, so it never lands in a namespace that was just pruned.
//! - Clients are kept in a `BTreeMap`, which makes snapshots name-ordered.
//!
//! A resolution that races a teardown holds an `Arc<Client>` whose queue is
//! already closed; enqueueing to it is a no-op.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock};

use super::client::Client;

#[derive(Debug, Default)]
struct Namespace {
    clients: RwLock<BTreeMap<String, Arc<Client>>>,
}

impl Namespace {
    fn insert(&self, client: &Arc<Client>) -> Option<Arc<Client>> {
        self.clients
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(client.name().to_string(), Arc::clone(client))
    }
}

#[derive(Debug, Default)]
pub struct Hub {
    namespaces: RwLock<HashMap<String, Arc<Namespace>>>,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    fn namespace(&self, namespace: &str) -> Option<Arc<Namespace>> {
        self.namespaces
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(namespace)
            .cloned()
    }

    /// # Register
    ///
    /// Makes `client` the live handle for its (namespace, name).
    ///
    /// ## Workflow
    /// 1.  Insert under the namespace's exclusive lock.
    /// 2.  If another handle was registered under the same name, close it and
    ///     carry its description over to the new handle when the new one has
    ///     none.
    /// 3.  Return the displaced handle, if any.
    pub fn register(&self, client: Arc<Client>) -> Option<Arc<Client>> {
        let existing = {
            let namespaces = self.namespaces.read().unwrap_or_else(PoisonError::into_inner);
            namespaces.get(client.namespace()).map(|ns| ns.insert(&client))
        };
        let displaced = match existing {
            Some(displaced) => displaced,
            None => self
                .namespaces
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .entry(client.namespace().to_string())
                .or_default()
                .insert(&client),
        };

        if let Some(old) = &displaced {
            old.close();
            if client.description().is_empty() {
                client.set_description(old.description());
            }
            tracing::info!(
                namespace = %client.namespace(),
                client = %client.name(),
                "Displaced older registration"
            );
        }
        displaced
    }

    pub fn lookup(&self, namespace: &str, name: &str) -> Option<Arc<Client>> {
        let ns = self.namespace(namespace)?;
        let clients = ns.clients.read().unwrap_or_else(PoisonError::into_inner);
        clients.get(name).cloned()
    }

    /// Consistent, name-ordered view of every live client in `namespace`.
    pub fn snapshot(&self, namespace: &str) -> Vec<Arc<Client>> {
        match self.namespace(namespace) {
            Some(ns) => ns
                .clients
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .values()
                .cloned()
                .collect(),
            None => Vec::new(),
        }
    }

    /// Calls `f` for every live client in `namespace`, in name order.
    pub fn for_each(&self, namespace: &str, mut f: impl FnMut(&Arc<Client>)) {
        for client in self.snapshot(namespace) {
            f(&client);
        }
    }

    /// Removes `client` if it is still the live handle for its name. A stale
    /// teardown never removes a newer registration. The handle is closed
    /// either way, and a namespace left without clients is dropped.
    pub fn unregister(&self, client: &Arc<Client>) -> bool {
        client.close();
        let mut namespaces = self.namespaces.write().unwrap_or_else(PoisonError::into_inner);
        let Some(ns) = namespaces.get(client.namespace()) else {
            return false;
        };
        let mut clients = ns.clients.write().unwrap_or_else(PoisonError::into_inner);
        let removed = match clients.get(client.name()) {
            Some(live) if Arc::ptr_eq(live, client) => {
                clients.remove(client.name());
                true
            }
            _ => false,
        };
        let emptied = clients.is_empty();
        drop(clients);
        if emptied {
            namespaces.remove(client.namespace());
        }
        removed
    }

    /// Overwrites the description of `name` if it is registered.
    pub fn set_description(&self, namespace: &str, name: &str, description: &str) -> bool {
        match self.lookup(namespace, name) {
            Some(client) => {
                client.set_description(description);
                true
            }
            None => false,
        }
    }

    /// Every namespace with at least one live client, sorted.
    pub fn namespaces(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .namespaces
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub fn len(&self, namespace: &str) -> usize {
        self.namespace(namespace)
            .map(|ns| ns.clients.read().unwrap_or_else(PoisonError::into_inner).len())
            .unwrap_or(0)
    }

    /// Closes every live client. Used at shutdown so writer tasks exit.
    pub fn close_all(&self) {
        for namespace in self.namespaces() {
            self.for_each(&namespace, |client| client.close());
        }
    }
}
