use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, trace};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::auth::Identity;
use crate::location::Favorites;
use crate::time::Timestamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl FromStr for SessionId {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::try_parse(s).map(Self).map_err(|_| ())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "{}", self.0)
    }
}

static NO_FAVORITES: Favorites = Favorites::new();

/// Server-side state for one browser.
///
/// Favourites saved before signing in live in the anonymous list; once
/// signed in, the list keyed by the user's id is the active one.
#[derive(Debug, Clone, Default)]
pub struct Session {
    identity: Option<Identity>,
    anonymous: Favorites,
    by_user: HashMap<String, Favorites>,
    oauth_state: Option<String>,
}

impl Session {
    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    pub fn sign_in(&mut self, identity: Identity) {
        self.by_user.entry(identity.id.clone()).or_default();
        self.identity = Some(identity);
    }

    pub fn favorites(&self) -> &Favorites {
        match &self.identity {
            Some(who) => self.by_user.get(&who.id).unwrap_or(&NO_FAVORITES),
            None => &self.anonymous,
        }
    }

    pub fn favorites_mut(&mut self) -> &mut Favorites {
        match &self.identity {
            Some(who) => self.by_user.entry(who.id.clone()).or_default(),
            None => &mut self.anonymous,
        }
    }

    pub fn begin_oauth(&mut self) -> String {
        let state = Uuid::new_v4().to_string();
        self.oauth_state = Some(state.clone());
        state
    }

    /// The stored state is single use: it is cleared whether or not it matches.
    pub fn finish_oauth(&mut self, state: &str) -> bool {
        self.oauth_state.take().as_deref() == Some(state)
    }
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// `None` for unknown or expired sessions.
    async fn load(&self, id: &SessionId) -> Option<Session>;

    /// Stores the session and restarts its idle timer.
    async fn save(&self, id: SessionId, session: Session);

    async fn remove(&self, id: &SessionId);
}

struct Stored {
    session: Session,
    expires: Timestamp,
}

/// Process-local sessions with an idle expiry.
pub struct MemoryStore {
    sessions: Mutex<HashMap<SessionId, Stored>>,
    ttl: Duration,
}

impl MemoryStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }
}

fn now() -> Timestamp {
    Timestamp::now().unwrap_or_default()
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn load(&self, id: &SessionId) -> Option<Session> {
        let mut sessions = self.sessions.lock().await;
        let now = now();

        match sessions.get(id) {
            Some(stored) if stored.expires.has_passed(now) => {
                debug!("session {id} expired at {}", stored.expires);
                sessions.remove(id);
                None
            }
            Some(stored) => Some(stored.session.clone()),
            None => None,
        }
    }

    async fn save(&self, id: SessionId, session: Session) {
        let mut sessions = self.sessions.lock().await;
        let now = now();

        let before = sessions.len();
        sessions.retain(|_, stored| !stored.expires.has_passed(now));
        let swept = before - sessions.len();
        if swept > 0 {
            debug!("swept {swept} expired sessions");
        }

        trace!("saving session {id}");
        sessions.insert(
            id,
            Stored {
                session,
                expires: now.after(self.ttl),
            },
        );
    }

    async fn remove(&self, id: &SessionId) {
        if self.sessions.lock().await.remove(id).is_some() {
            debug!("session {id} removed");
        }
    }
}
