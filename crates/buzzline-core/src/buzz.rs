//! Ordered, duplicate-free record of who buzzed since the last clear.

use crate::ids::ConnectionId;
use crate::registry::IdentityRegistry;

#[derive(Debug, Default)]
pub struct BuzzQueue {
    order: Vec<ConnectionId>,
}

impl BuzzQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `id` unless it already buzzed. Returns whether it was appended.
    pub fn buzz(&mut self, id: &ConnectionId) -> bool {
        if self.contains(id) {
            return false;
        }
        self.order.push(id.clone());
        true
    }

    pub fn clear(&mut self) {
        self.order.clear();
    }

    /// Drop `id` from the queue, keeping everyone else's relative order.
    pub fn remove(&mut self, id: &ConnectionId) -> bool {
        let before = self.order.len();
        self.order.retain(|queued| queued != id);
        self.order.len() != before
    }

    pub fn rekey(&mut self, old: &ConnectionId, new: &ConnectionId) {
        for queued in &mut self.order {
            if queued == old {
                queued.clone_from(new);
            }
        }
    }

    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.order.contains(id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Display names in arrival order. Identities without a record are skipped.
    pub fn snapshot(&self, registry: &IdentityRegistry) -> Vec<String> {
        self.order
            .iter()
            .filter_map(|id| registry.name_of(id).map(str::to_owned))
            .collect()
    }
}
