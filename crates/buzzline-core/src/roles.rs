//! Role arbitration: at most one host, players join freely.

use tracing::{debug, info};

use crate::ids::ConnectionId;
use crate::participant::Role;
use crate::registry::{IdentityRegistry, Rename};

/// Result of a host claim.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HostClaim {
    /// The slot was free or stale. `displaced` names a stale previous holder.
    Granted { displaced: Option<ConnectionId> },
    /// The caller already holds the slot.
    AlreadyHost,
    /// A connected participant holds the slot.
    Denied { holder: ConnectionId },
}

impl HostClaim {
    pub fn accepted(&self) -> bool {
        !matches!(self, Self::Denied { .. })
    }
}

/// Owns the host slot and keeps participant roles consistent with it.
#[derive(Debug, Default)]
pub struct RoleArbiter {
    host: Option<ConnectionId>,
}

impl RoleArbiter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn host(&self) -> Option<&ConnectionId> {
        self.host.as_ref()
    }

    pub fn is_host(&self, id: &ConnectionId) -> bool {
        self.host.as_ref() == Some(id)
    }

    /// Try to make `id` the host.
    ///
    /// The slot is held against the claim only while its holder still has a
    /// registry record and `is_connected` reports it live. A stale holder is
    /// demoted to `Unassigned`.
    pub fn claim_host(
        &mut self,
        id: &ConnectionId,
        registry: &mut IdentityRegistry,
        is_connected: impl Fn(&ConnectionId) -> bool,
    ) -> HostClaim {
        let mut displaced = None;
        if let Some(holder) = self.host.take() {
            if &holder == id {
                self.host = Some(holder);
                return HostClaim::AlreadyHost;
            }
            if registry.contains(&holder) && is_connected(&holder) {
                self.host = Some(holder.clone());
                return HostClaim::Denied { holder };
            }
            if let Some(stale) = registry.get_mut(&holder) {
                stale.role = Role::Unassigned;
            }
            debug!(previous = %holder, "replacing stale host");
            displaced = Some(holder);
        }

        if let Some(participant) = registry.get_mut(id) {
            participant.role = Role::Host;
        }
        self.host = Some(id.clone());
        info!(connection_id = %id, "host slot claimed");
        HostClaim::Granted { displaced }
    }

    /// Make `id` a player under the normalized `name`.
    ///
    /// A host joining as a player gives up the host slot. Returns `None` when
    /// `id` has no registry record.
    pub fn claim_player(
        &mut self,
        id: &ConnectionId,
        name: &str,
        registry: &mut IdentityRegistry,
    ) -> Option<Rename> {
        let rename = registry.rename(id, name)?;
        if self.is_host(id) {
            self.host = None;
        }
        if let Some(participant) = registry.get_mut(id) {
            participant.role = Role::Player;
        }
        Some(rename)
    }

    /// Vacate the slot if `id` holds it.
    pub fn release(&mut self, id: &ConnectionId) -> bool {
        if self.is_host(id) {
            self.host = None;
            true
        } else {
            false
        }
    }

    pub fn rekey(&mut self, old: &ConnectionId, new: &ConnectionId) {
        if self.is_host(old) {
            self.host = Some(new.clone());
        }
    }
}
