//! Identity registry: one participant record per connection identity, with
//! unique display names.

use std::collections::{BTreeMap, HashMap};

use tracing::debug;

use crate::ids::ConnectionId;
use crate::participant::{Participant, Role};

/// Outcome of a rename request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Rename {
    /// The resolved name equals the current one; nothing changed.
    Unchanged(String),
    Changed { from: String, to: String },
}

impl Rename {
    pub fn name(&self) -> &str {
        match self {
            Self::Unchanged(name) => name,
            Self::Changed { to, .. } => to,
        }
    }

    pub fn is_changed(&self) -> bool {
        matches!(self, Self::Changed { .. })
    }
}

/// Maps connection identities to participant records.
#[derive(Debug)]
pub struct IdentityRegistry {
    participants: HashMap<ConnectionId, Participant>,
    default_name: String,
}

impl IdentityRegistry {
    pub fn new(default_name: impl Into<String>) -> Self {
        Self {
            participants: HashMap::new(),
            default_name: default_name.into(),
        }
    }

    /// Canonical form of a client-chosen name.
    pub fn normalize(requested: &str) -> String {
        requested.trim().to_lowercase()
    }

    pub fn default_name(&self) -> &str {
        &self.default_name
    }

    /// Create a record for `id` under a collision-free default name.
    ///
    /// An existing record is returned untouched.
    pub fn admit(&mut self, id: &ConnectionId) -> &Participant {
        if !self.participants.contains_key(id) {
            let name = self.resolve(&self.default_name, Some(id));
            debug!(connection_id = %id, name = %name, "admitted participant");
            let _ = self
                .participants
                .insert(id.clone(), Participant::new(id.clone(), name));
        }
        &self.participants[id]
    }

    /// Give `id` the first free variant of `requested`, creating the record
    /// if needed. The name is used verbatim (no normalization).
    pub fn assign_name(&mut self, id: &ConnectionId, requested: &str) -> String {
        let name = self.resolve(requested, Some(id));
        match self.participants.get_mut(id) {
            Some(participant) => participant.name.clone_from(&name),
            None => {
                let _ = self
                    .participants
                    .insert(id.clone(), Participant::new(id.clone(), name.clone()));
            }
        }
        name
    }

    /// Rename an existing participant to the normalized form of `requested`.
    ///
    /// Returns `None` when `id` has no record.
    pub fn rename(&mut self, id: &ConnectionId, requested: &str) -> Option<Rename> {
        let mut wanted = Self::normalize(requested);
        if wanted.is_empty() {
            wanted.clone_from(&self.default_name);
        }
        let current = self.participants.get(id)?.name.clone();
        if current == wanted {
            return Some(Rename::Unchanged(current));
        }
        let resolved = self.resolve(&wanted, Some(id));
        if resolved == current {
            return Some(Rename::Unchanged(current));
        }
        if let Some(participant) = self.participants.get_mut(id) {
            participant.name.clone_from(&resolved);
        }
        Some(Rename::Changed {
            from: current,
            to: resolved,
        })
    }

    /// Find the identity currently holding `name`.
    pub fn id_by_name(&self, name: &str) -> Option<&ConnectionId> {
        self.participants
            .values()
            .find(|p| p.name == name)
            .map(|p| &p.id)
    }

    pub fn get(&self, id: &ConnectionId) -> Option<&Participant> {
        self.participants.get(id)
    }

    pub fn get_mut(&mut self, id: &ConnectionId) -> Option<&mut Participant> {
        self.participants.get_mut(id)
    }

    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.participants.contains_key(id)
    }

    pub fn name_of(&self, id: &ConnectionId) -> Option<&str> {
        self.participants.get(id).map(|p| p.name.as_str())
    }

    pub fn remove(&mut self, id: &ConnectionId) -> Option<Participant> {
        self.participants.remove(id)
    }

    /// Move the record held by `old` over to `new`.
    ///
    /// Returns `None` if `old` has no record; any record already held by
    /// `new` is replaced.
    pub fn rekey(&mut self, old: &ConnectionId, new: &ConnectionId) -> Option<&Participant> {
        let mut participant = self.participants.remove(old)?;
        participant.id = new.clone();
        let _ = self.participants.insert(new.clone(), participant);
        self.participants.get(new)
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Participant> {
        self.participants.values()
    }

    pub fn players(&self) -> impl Iterator<Item = &Participant> {
        self.participants.values().filter(|p| p.role == Role::Player)
    }

    /// Name → score for every player.
    pub fn roster(&self) -> BTreeMap<String, i64> {
        self.players().map(|p| (p.name.clone(), p.score)).collect()
    }

    /// Names collide when their normalized forms match.
    fn is_taken(&self, name: &str, owner: Option<&ConnectionId>) -> bool {
        let wanted = Self::normalize(name);
        self.participants
            .values()
            .any(|p| Some(&p.id) != owner && Self::normalize(&p.name) == wanted)
    }

    /// First of `base`, `base 2`, `base 3`, … not held by anyone but `owner`.
    fn resolve(&self, base: &str, owner: Option<&ConnectionId>) -> String {
        if !self.is_taken(base, owner) {
            return base.to_owned();
        }
        let mut suffix = 2u32;
        loop {
            let candidate = format!("{base} {suffix}");
            if !self.is_taken(&candidate, owner) {
                debug!(requested = base, resolved = %candidate, "name taken, using suffix");
                return candidate;
            }
            suffix += 1;
        }
    }
}
