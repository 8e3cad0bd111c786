//! Session tokens: durable client-held credentials mapped to the most recent
//! connection identity that presented them.

use std::collections::HashMap;

use crate::ids::{ConnectionId, SessionToken};

#[derive(Debug, Default)]
pub struct SessionTokenStore {
    tokens: HashMap<SessionToken, ConnectionId>,
}

impl SessionTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, token: &SessionToken) -> Option<&ConnectionId> {
        self.tokens.get(token)
    }

    /// Mint a fresh token bound to `id`.
    pub fn issue(&mut self, id: &ConnectionId) -> SessionToken {
        let token = SessionToken::mint(id);
        let _ = self.tokens.insert(token.clone(), id.clone());
        token
    }

    /// Point an existing token at a new identity. Unknown tokens are ignored.
    pub fn repoint(&mut self, token: &SessionToken, id: &ConnectionId) -> bool {
        match self.tokens.get_mut(token) {
            Some(slot) => {
                slot.clone_from(id);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issue_then_lookup() {
        let mut store = SessionTokenStore::new();
        let id = ConnectionId::new();
        let token = store.issue(&id);
        assert_eq!(store.lookup(&token), Some(&id));
    }

    #[test]
    fn unknown_token_is_none() {
        let store = SessionTokenStore::new();
        let token = SessionToken::parse("never-issued").unwrap();
        assert!(store.lookup(&token).is_none());
    }

    #[test]
    fn repoint_updates_in_place() {
        let mut store = SessionTokenStore::new();
        let first = ConnectionId::new();
        let second = ConnectionId::new();
        let token = store.issue(&first);
        assert!(store.repoint(&token, &second));
        assert_eq!(store.lookup(&token), Some(&second));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn repoint_unknown_token_is_rejected() {
        let mut store = SessionTokenStore::new();
        let token = SessionToken::parse("stray").unwrap();
        assert!(!store.repoint(&token, &ConnectionId::new()));
        assert!(store.is_empty());
    }
}
