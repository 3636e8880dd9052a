//! Credentials and session bookkeeping.
//!
//! The credential store is a bare username → password map that registers
//! unknown names on their first login. Sessions are indexed twice, by
//! username and by token; the two maps are only ever mutated together,
//! so a username holds at most one live session at any moment.

use crate::constants::TOKEN_LENGTH;
use crate::error::{Error, Result};
use parking_lot::RwLock;
use rand::rngs::OsRng;
use rand::RngCore;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Instant;

/// Outcome of presenting credentials.
pub(crate) enum LoginCheck {
    /// The password matched, or the name was unknown and has been registered.
    Accepted { new_user: bool },
    WrongPassword,
}

/// Username → password map; auto-registers on first login, never persisted.
#[derive(Default)]
pub(crate) struct CredentialStore {
    inner: RwLock<HashMap<String, String>>,
}

impl CredentialStore {
    pub fn check_or_register(&self, username: &str, password: &str) -> LoginCheck {
        let mut credentials = self.inner.write();
        match credentials.get(username) {
            None => {
                credentials.insert(username.to_owned(), password.to_owned());
                LoginCheck::Accepted { new_user: true }
            },
            Some(stored) if stored == password => LoginCheck::Accepted { new_user: false },
            Some(_) => LoginCheck::WrongPassword,
        }
    }
}

/// One authenticated session.
#[derive(Clone, Debug)]
pub(crate) struct Session {
    pub token: String,
    pub addr: SocketAddr,
    #[allow(dead_code)]
    pub login_time: Instant,
}

#[derive(Default)]
struct SessionMaps {
    by_user: HashMap<String, Session>,
    by_token: HashMap<String, String>,
}

/// Active sessions, indexed by username and by token.
#[derive(Default)]
pub(crate) struct SessionRegistry {
    inner: RwLock<SessionMaps>,
}

impl SessionRegistry {
    /// Removes and returns any existing session for `username`, clearing
    /// both indices. The caller notifies the displaced address.
    pub fn take(&self, username: &str) -> Option<Session> {
        let mut maps = self.inner.write();
        let old = maps.by_user.remove(username)?;
        maps.by_token.remove(&old.token);
        Some(old)
    }

    pub fn insert(&self, username: &str, session: Session) {
        let mut maps = self.inner.write();
        maps.by_token.insert(session.token.clone(), username.to_owned());
        maps.by_user.insert(username.to_owned(), session);
    }

    pub fn remove(&self, username: &str, token: &str) {
        let mut maps = self.inner.write();
        maps.by_user.remove(username);
        maps.by_token.remove(token);
    }

    #[cfg(test)]
    fn tokens(&self) -> Vec<String> {
        self.inner.read().by_token.keys().cloned().collect()
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.inner.read().by_user.len()
    }
}

/// Generates a session token: 16 bytes from the OS entropy source, hex
/// encoded. Tokens are opaque on the wire.
pub(crate) fn generate_token() -> Result<String> {
    let mut bytes = [0u8; TOKEN_LENGTH];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|_| Error::TokenEntropy)?;
    Ok(hex::encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(token: &str, port: u16) -> Session {
        Session {
            token: token.to_owned(),
            addr: ([127, 0, 0, 1], port).into(),
            login_time: Instant::now(),
        }
    }

    #[test]
    fn first_login_registers() {
        let store = CredentialStore::default();
        assert!(matches!(
            store.check_or_register("alice", "pw1"),
            LoginCheck::Accepted { new_user: true }
        ));
        assert!(matches!(
            store.check_or_register("alice", "pw1"),
            LoginCheck::Accepted { new_user: false }
        ));
        assert!(matches!(
            store.check_or_register("alice", "wrong"),
            LoginCheck::WrongPassword
        ));
    }

    #[test]
    fn relogin_leaves_no_stale_session() {
        let sessions = SessionRegistry::default();
        sessions.insert("alice", session("aaaa", 1000));

        let old = sessions.take("alice").expect("existing session");
        assert_eq!(old.token, "aaaa");
        sessions.insert("alice", session("bbbb", 2000));

        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions.tokens(), vec!["bbbb".to_owned()]);
    }

    #[test]
    fn remove_clears_both_indices() {
        let sessions = SessionRegistry::default();
        sessions.insert("bob", session("cccc", 3000));
        sessions.remove("bob", "cccc");
        assert_eq!(sessions.len(), 0);
        assert!(sessions.tokens().is_empty());
    }

    #[test]
    fn tokens_are_distinct_hex() {
        let a = generate_token().unwrap();
        let b = generate_token().unwrap();
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }
}
