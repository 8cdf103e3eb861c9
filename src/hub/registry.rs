use std::collections::HashMap;
use std::sync::Arc;

use crate::client::{Client, ClientId};

/// The set of live clients, grouped by primary identity.
///
/// A client is present from registration until it is unregistered or the
/// hub shuts down. A primary identity whose last client leaves is removed
/// at once, so every entry holds at least one client.
#[derive(Debug, Default)]
pub(crate) struct Registry {
    by_primary: HashMap<String, HashMap<ClientId, Arc<Client>>>,
    shut_down: bool,
}

impl Registry {
    pub(crate) fn insert(&mut self, client: Arc<Client>) {
        self.by_primary
            .entry(client.identity().primary_id().to_string())
            .or_default()
            .insert(client.id(), client);
    }

    /// Removes `client`, pruning its identity's entry when it empties.
    /// Returns `false` when the client was not registered.
    pub(crate) fn remove(&mut self, client: &Client) -> bool {
        let primary_id = client.identity().primary_id();
        let Some(set) = self.by_primary.get_mut(primary_id) else {
            return false;
        };
        let removed = set.remove(&client.id()).is_some();
        if set.is_empty() {
            self.by_primary.remove(primary_id);
        }
        removed
    }

    pub(crate) fn contains(&self, client: &Client) -> bool {
        self.by_primary
            .get(client.identity().primary_id())
            .is_some_and(|set| set.contains_key(&client.id()))
    }

    /// Copies out the clients registered under `primary_id` so they can be
    /// written to after the registry lock is released.
    pub(crate) fn clients_for(&self, primary_id: &str) -> Vec<Arc<Client>> {
        self.by_primary
            .get(primary_id)
            .map(|set| set.values().cloned().collect())
            .unwrap_or_default()
    }

    pub(crate) fn connection_count(&self, primary_id: &str) -> usize {
        self.by_primary.get(primary_id).map_or(0, HashMap::len)
    }

    pub(crate) fn len(&self) -> usize {
        self.by_primary.values().map(HashMap::len).sum()
    }

    pub(crate) fn primary_count(&self) -> usize {
        self.by_primary.len()
    }

    pub(crate) fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    /// Empties the registry for good; later inserts are refused by the hub.
    pub(crate) fn shut_down(&mut self) -> Vec<Arc<Client>> {
        self.shut_down = true;
        self.by_primary
            .drain()
            .flat_map(|(_, set)| set.into_values())
            .collect()
    }
}
