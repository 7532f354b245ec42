use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use thiserror::Error;

use crate::lobby::{JoinRequest, Lobby, LobbyId, User, UserId};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("user not found")]
    UserNotFound,
    #[error("lobby not found")]
    LobbyNotFound,
    #[error("join request not found")]
    RequestNotFound,
    #[error("join request already exists for this user and lobby")]
    DuplicateRequest,
}

#[derive(Debug, Default, Clone)]
struct Tables {
    users: HashMap<UserId, User>,
    lobbies: HashMap<LobbyId, Lobby>,
    // Keyed by (user, lobby); insertion enforces pair uniqueness.
    requests: HashMap<(UserId, LobbyId), JoinRequest>,
}

/// In-memory membership storage. `transact` is the only entry point: it
/// serializes callers on a single mutex and commits all-or-nothing, so
/// read-then-write checks inside one transaction are race-free and a failed
/// transaction leaves no partial writes behind.
#[derive(Debug, Default, Clone)]
pub struct MembershipStore {
    inner: Arc<Mutex<Tables>>,
}

impl MembershipStore {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn transact<T, E>(&self, f: impl FnOnce(&mut Txn) -> Result<T, E>) -> Result<T, E> {
        let mut guard = self.inner.lock().unwrap();
        let mut staged = guard.clone();
        let result = f(&mut Txn {
            tables: &mut staged,
        });
        if result.is_ok() {
            *guard = staged;
        }
        result
    }
}

/// A live transaction over the staged tables. Dropped without commit if the
/// closure returns an error.
pub struct Txn<'a> {
    tables: &'a mut Tables,
}

impl Txn<'_> {
    pub fn user(&self, id: &UserId) -> Result<&User, StoreError> {
        self.tables.users.get(id).ok_or(StoreError::UserNotFound)
    }

    pub fn user_mut(&mut self, id: &UserId) -> Result<&mut User, StoreError> {
        self.tables.users.get_mut(id).ok_or(StoreError::UserNotFound)
    }

    pub fn find_user_by_username(&self, username: &str) -> Option<&User> {
        self.tables.users.values().find(|u| u.username == username)
    }

    pub fn insert_user(&mut self, user: User) {
        self.tables.users.insert(user.id, user);
    }

    pub fn lobby(&self, id: &LobbyId) -> Result<&Lobby, StoreError> {
        self.tables.lobbies.get(id).ok_or(StoreError::LobbyNotFound)
    }

    pub fn lobby_mut(&mut self, id: &LobbyId) -> Result<&mut Lobby, StoreError> {
        self.tables
            .lobbies
            .get_mut(id)
            .ok_or(StoreError::LobbyNotFound)
    }

    pub fn insert_lobby(&mut self, lobby: Lobby) {
        self.tables.lobbies.insert(lobby.id, lobby);
    }

    pub fn insert_join_request(&mut self, request: JoinRequest) -> Result<(), StoreError> {
        let key = (request.user_id, request.lobby_id);
        if self.tables.requests.contains_key(&key) {
            return Err(StoreError::DuplicateRequest);
        }
        self.tables.requests.insert(key, request);
        Ok(())
    }

    pub fn remove_join_request(
        &mut self,
        user_id: &UserId,
        lobby_id: &LobbyId,
    ) -> Option<JoinRequest> {
        self.tables.requests.remove(&(*user_id, *lobby_id))
    }

    pub fn pending_for_user(&self, user_id: &UserId) -> Option<&JoinRequest> {
        self.tables
            .requests
            .values()
            .find(|r| r.user_id == *user_id)
    }

    pub fn pending_for_lobby(&self, lobby_id: &LobbyId) -> Vec<&JoinRequest> {
        let mut pending: Vec<_> = self
            .tables
            .requests
            .values()
            .filter(|r| r.lobby_id == *lobby_id)
            .collect();
        pending.sort_by_key(|r| r.created_at);
        pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn request(user_id: UserId, lobby_id: LobbyId) -> JoinRequest {
        JoinRequest {
            user_id,
            lobby_id,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn duplicate_pair_is_rejected() {
        let store = MembershipStore::new();
        let (user, lobby) = (UserId::new_v4(), LobbyId::new_v4());
        store
            .transact(|txn| txn.insert_join_request(request(user, lobby)))
            .unwrap();
        let err = store
            .transact(|txn| txn.insert_join_request(request(user, lobby)))
            .unwrap_err();
        assert_eq!(err, StoreError::DuplicateRequest);
    }

    #[test]
    fn failed_transaction_leaves_no_partial_writes() {
        let store = MembershipStore::new();
        let user = User::new("ghost".into());
        let user_id = user.id;
        let result: Result<(), StoreError> = store.transact(|txn| {
            txn.insert_user(user.clone());
            Err(StoreError::LobbyNotFound)
        });
        assert!(result.is_err());
        let found = store.transact(|txn| -> Result<bool, StoreError> {
            Ok(txn.user(&user_id).is_ok())
        });
        assert!(!found.unwrap());
    }
}
