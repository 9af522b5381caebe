//! Session store
//!
//! Holds the daemon's single authenticated principal: either a user (self
//! envelope + passphrase) or a machine (machine + token envelope + token
//! secret), plus the registry auth token and the lazily unwrapped master key.
//! The store is data and a lock only; login/logout protocol lives in
//! [`crate::logic`], and cryptography in [`crate::crypto`].

use std::sync::{Arc, Mutex};

use common::envelope::Envelope;
use common::identity::Id;
use common::primitive::{Machine, MachineToken, MasterKey, User};

use crate::secure::SecretHandle;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("a session is already active")]
    AlreadyAuthenticated,
    #[error("no session is active")]
    NotAuthenticated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionType {
    User,
    Machine,
}

impl SessionType {
    pub fn name(self) -> &'static str {
        match self {
            SessionType::User => "user",
            SessionType::Machine => "machine",
        }
    }
}

struct UserSession {
    identity: Envelope<User>,
    passphrase: SecretHandle,
    auth_token: String,
    master_key: Option<Arc<SecretHandle>>,
}

struct MachineSession {
    machine: Envelope<Machine>,
    token: Envelope<MachineToken>,
    secret: SecretHandle,
    auth_token: String,
    master_key: Option<Arc<SecretHandle>>,
}

enum State {
    Empty,
    User(UserSession),
    Machine(MachineSession),
}

/// The daemon-wide session singleton. Clones share one store.
#[derive(Clone)]
pub struct SessionStore {
    state: Arc<Mutex<State>>,
}

impl SessionStore {
    pub fn new() -> Self {
        SessionStore {
            state: Arc::new(Mutex::new(State::Empty)),
        }
    }

    pub fn populate_user(
        &self,
        identity: Envelope<User>,
        passphrase: SecretHandle,
        auth_token: String,
    ) -> Result<(), SessionError> {
        let mut state = self.state.lock().expect("session lock poisoned");
        if !matches!(*state, State::Empty) {
            return Err(SessionError::AlreadyAuthenticated);
        }

        *state = State::User(UserSession {
            identity,
            passphrase,
            auth_token,
            master_key: None,
        });
        Ok(())
    }

    pub fn populate_machine(
        &self,
        machine: Envelope<Machine>,
        token: Envelope<MachineToken>,
        secret: SecretHandle,
        auth_token: String,
    ) -> Result<(), SessionError> {
        let mut state = self.state.lock().expect("session lock poisoned");
        if !matches!(*state, State::Empty) {
            return Err(SessionError::AlreadyAuthenticated);
        }

        *state = State::Machine(MachineSession {
            machine,
            token,
            secret,
            auth_token,
            master_key: None,
        });
        Ok(())
    }

    /// Drop all session state. Secret buffers wipe on release.
    pub fn logout(&self) {
        let mut state = self.state.lock().expect("session lock poisoned");
        *state = State::Empty;
    }

    pub fn session_type(&self) -> Option<SessionType> {
        match *self.state.lock().expect("session lock poisoned") {
            State::Empty => None,
            State::User(_) => Some(SessionType::User),
            State::Machine(_) => Some(SessionType::Machine),
        }
    }

    /// The id this session authenticates as: the user id, or the machine
    /// token id.
    pub fn auth_id(&self) -> Option<Id> {
        match &*self.state.lock().expect("session lock poisoned") {
            State::Empty => None,
            State::User(user) => Some(user.identity.id),
            State::Machine(machine) => Some(machine.token.id),
        }
    }

    /// The id of the principal itself: the user id, or the machine id.
    pub fn identity_id(&self) -> Option<Id> {
        match &*self.state.lock().expect("session lock poisoned") {
            State::Empty => None,
            State::User(user) => Some(user.identity.id),
            State::Machine(machine) => Some(machine.machine.id),
        }
    }

    pub fn auth_token(&self) -> Option<String> {
        match &*self.state.lock().expect("session lock poisoned") {
            State::Empty => None,
            State::User(user) => Some(user.auth_token.clone()),
            State::Machine(machine) => Some(machine.auth_token.clone()),
        }
    }

    pub fn has_token(&self) -> bool {
        self.auth_token().is_some()
    }

    pub fn has_secret(&self) -> bool {
        !matches!(*self.state.lock().expect("session lock poisoned"), State::Empty)
    }

    /// The wrapped master key object from the self or token envelope.
    pub fn master_envelope(&self) -> Option<MasterKey> {
        match &*self.state.lock().expect("session lock poisoned") {
            State::Empty => None,
            State::User(user) => Some(user.identity.body.master.clone()),
            State::Machine(machine) => Some(machine.token.body.master.clone()),
        }
    }

    /// Run `f` over the login secret (passphrase or token secret) without
    /// letting it escape the store's lock.
    pub fn with_secret<R>(&self, f: impl FnOnce(&[u8]) -> R) -> Result<R, SessionError> {
        match &*self.state.lock().expect("session lock poisoned") {
            State::Empty => Err(SessionError::NotAuthenticated),
            State::User(user) => Ok(f(user.passphrase.borrow())),
            State::Machine(machine) => Ok(f(machine.secret.borrow())),
        }
    }

    /// The unwrapped master key, if a crypto operation has cached it.
    pub fn master_key(&self) -> Option<Arc<SecretHandle>> {
        match &*self.state.lock().expect("session lock poisoned") {
            State::Empty => None,
            State::User(user) => user.master_key.clone(),
            State::Machine(machine) => machine.master_key.clone(),
        }
    }

    /// Cache the unwrapped master key. The first unwrap wins; a concurrent
    /// unwrap gets the already-cached key back.
    pub fn cache_master_key(
        &self,
        key: Arc<SecretHandle>,
    ) -> Result<Arc<SecretHandle>, SessionError> {
        let mut state = self.state.lock().expect("session lock poisoned");
        let slot = match &mut *state {
            State::Empty => return Err(SessionError::NotAuthenticated),
            State::User(user) => &mut user.master_key,
            State::Machine(machine) => &mut machine.master_key,
        };
        Ok(slot.get_or_insert(key).clone())
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        SessionStore::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::secure::Guard;
    use common::encoding::Base64Url;
    use common::identity::ObjectType;
    use common::primitive::{alg, LoginPublicKey, UserState};
    use time::OffsetDateTime;

    fn user_envelope() -> Envelope<User> {
        Envelope {
            id: Id::new_mutable(ObjectType::User),
            version: 1,
            body: User {
                username: "ada".to_string(),
                name: "Ada".to_string(),
                email: "a@b".to_string(),
                state: UserState::Active,
                password: LoginPublicKey {
                    alg: alg::EDDSA.to_string(),
                    salt: Base64Url::new(vec![1; 16]),
                    value: Base64Url::new(vec![2; 32]),
                },
                master: MasterKey {
                    alg: alg::TRIPLESEC.to_string(),
                    value: Base64Url::new(vec![3; 72]),
                },
            },
        }
    }

    fn populate(store: &SessionStore, guard: &Guard) -> Result<(), SessionError> {
        let mut pass = b"passphrase".to_vec();
        store.populate_user(
            user_envelope(),
            guard.import(&mut pass).unwrap(),
            "tok".to_string(),
        )
    }

    #[test]
    fn test_empty_store_has_nothing() {
        let store = SessionStore::new();
        assert!(store.session_type().is_none());
        assert!(store.auth_id().is_none());
        assert!(!store.has_token());
        assert!(!store.has_secret());
        assert!(store.with_secret(|_| ()).is_err());
    }

    #[test]
    fn test_populate_then_read() {
        let guard = Guard::new();
        let store = SessionStore::new();
        populate(&store, &guard).unwrap();

        assert_eq!(store.session_type(), Some(SessionType::User));
        assert_eq!(store.auth_token().as_deref(), Some("tok"));
        assert!(store.has_secret());
        let len = store.with_secret(|s| s.len()).unwrap();
        assert_eq!(len, b"passphrase".len());
    }

    #[test]
    fn test_double_populate_fails() {
        let guard = Guard::new();
        let store = SessionStore::new();
        populate(&store, &guard).unwrap();

        assert!(matches!(
            populate(&store, &guard),
            Err(SessionError::AlreadyAuthenticated)
        ));
    }

    #[test]
    fn test_logout_releases_secrets_and_allows_login() {
        let guard = Guard::new();
        let store = SessionStore::new();
        populate(&store, &guard).unwrap();
        assert_eq!(guard.live(), 1);

        store.logout();
        assert_eq!(guard.live(), 0);
        assert!(!store.has_token());

        populate(&store, &guard).unwrap();
    }

    #[test]
    fn test_master_key_first_unwrap_wins() {
        let guard = Guard::new();
        let store = SessionStore::new();
        populate(&store, &guard).unwrap();

        assert!(store.master_key().is_none());

        let mut a = vec![7u8; 32];
        let first = store
            .cache_master_key(Arc::new(guard.import(&mut a).unwrap()))
            .unwrap();

        let mut b = vec![9u8; 32];
        let second = store
            .cache_master_key(Arc::new(guard.import(&mut b).unwrap()))
            .unwrap();

        assert_eq!(first.borrow(), second.borrow());
        assert_eq!(store.master_key().unwrap().borrow(), &[7u8; 32][..]);
    }

    #[test]
    fn test_concurrent_populate_exactly_one_wins() {
        let store = SessionStore::new();
        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(std::thread::spawn(move || {
                let guard = Guard::new();
                let mut pass = b"passphrase".to_vec();
                store.populate_user(
                    user_envelope(),
                    guard.import(&mut pass).unwrap(),
                    "tok".to_string(),
                )
            }));
        }

        let wins = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(Result::is_ok)
            .count();
        assert_eq!(wins, 1);
    }
}
