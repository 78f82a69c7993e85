//! Session registry and message relay for one shared document.
//!
//! The document and the roster live behind a single mutex. Every mutation
//! is applied and its broadcast queued while that lock is held, so all
//! sessions observe mutations in the same total order, and a joiner either
//! sees a mutation in its `start` snapshot or receives it afterwards,
//! never both and never neither.

use std::collections::HashMap;

use tokio::sync::{broadcast, Mutex};

use crate::broadcast::{BroadcastGroup, BroadcastStats, Frame};
use crate::document::{DocumentError, DocumentStore, Snapshot};
use crate::protocol::{ClientMessage, ProtocolError, Roster, ServerMessage, SessionId};

/// Handle shown for sessions that chat before joining.
pub const ANONYMOUS: &str = "Anonymous";

/// Connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Active,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: SessionId,
    /// Set by the first `join`.
    pub handle: Option<String>,
    pub state: SessionState,
}

impl Session {
    fn new(id: SessionId) -> Self {
        Self {
            id,
            handle: None,
            state: SessionState::Connecting,
        }
    }

    pub fn display_handle(&self) -> &str {
        self.handle.as_deref().unwrap_or(ANONYMOUS)
    }
}

/// What a new session is sent before any broadcast.
pub struct Welcome {
    /// Encoded `start` text frame.
    pub start: String,
    /// Raw cell buffer for the binary frame following `start`.
    pub cells: Vec<u8>,
    /// Every broadcast queued after the snapshot was taken.
    pub updates: broadcast::Receiver<Frame>,
}

/// Session errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("session {0} is not active")]
    NotActive(SessionId),
    #[error(transparent)]
    Document(#[from] DocumentError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

struct Shared {
    store: DocumentStore,
    sessions: HashMap<SessionId, Session>,
}

impl Shared {
    fn roster(&self) -> Roster {
        self.sessions
            .values()
            .filter_map(|s| s.handle.clone().map(|h| (s.id, h)))
            .collect()
    }
}

pub struct SessionBroadcaster {
    shared: Mutex<Shared>,
    group: BroadcastGroup,
}

impl SessionBroadcaster {
    pub fn new(store: DocumentStore, capacity: usize) -> Self {
        Self {
            shared: Mutex::new(Shared {
                store,
                sessions: HashMap::new(),
            }),
            group: BroadcastGroup::new(capacity),
        }
    }

    /// Register a session and build its welcome.
    ///
    /// The session is `Active` once this returns.
    pub async fn connect(&self, id: SessionId) -> Result<Welcome, SessionError> {
        let mut shared = self.shared.lock().await;
        let mut session = Session::new(id);
        let start = ServerMessage::Start {
            document: shared.store.document().metadata(),
            session_id: id,
            roster: shared.roster(),
        }
        .encode()?;
        let cells = shared.store.document().cells().to_le_bytes();
        let updates = self.group.subscribe();
        session.state = SessionState::Active;
        shared.sessions.insert(id, session);
        log::debug!("Session {id} active ({} connected)", shared.sessions.len());
        Ok(Welcome {
            start,
            cells,
            updates,
        })
    }

    /// Apply one inbound message and broadcast its effect.
    ///
    /// On error nothing is applied or broadcast and the session stays
    /// active.
    pub async fn handle(&self, id: SessionId, msg: ClientMessage) -> Result<(), SessionError> {
        let mut guard = self.shared.lock().await;
        let shared = &mut *guard;
        let session = shared
            .sessions
            .get_mut(&id)
            .filter(|s| s.state == SessionState::Active)
            .ok_or(SessionError::NotActive(id))?;

        let out = match msg {
            ClientMessage::Join { handle } => {
                log::info!("Session {id} joined as {handle:?}");
                session.handle = Some(handle.clone());
                ServerMessage::Join {
                    handle,
                    session_id: id,
                }
            }
            ClientMessage::Nick { handle } => {
                log::info!(
                    "Session {id} renamed {:?} -> {handle:?}",
                    session.display_handle()
                );
                session.handle = Some(handle.clone());
                ServerMessage::Nick {
                    handle,
                    session_id: id,
                }
            }
            ClientMessage::Chat { text } => {
                let handle = session.display_handle().to_string();
                shared.store.append_chat(&handle, &text);
                ServerMessage::Chat { handle, text }
            }
            ClientMessage::Draw(deltas) => {
                shared.store.apply_deltas(&deltas)?;
                ServerMessage::Draw(deltas)
            }
            ClientMessage::Setting(change) => {
                shared.store.apply_setting(&change)?;
                log::debug!("Session {id} changed {}", change.kind());
                ServerMessage::Setting(change)
            }
        };
        self.group.broadcast(&out)?;
        Ok(())
    }

    /// Remove a session and tell the remaining ones it left.
    ///
    /// Returns the closed session, or `None` if it was not registered.
    pub async fn disconnect(&self, id: SessionId) -> Option<Session> {
        let mut shared = self.shared.lock().await;
        let mut session = shared.sessions.remove(&id)?;
        session.state = SessionState::Closed;
        if let Err(e) = self.group.broadcast(&ServerMessage::Part { session_id: id }) {
            log::error!("Failed to broadcast part for {id}: {e}");
        }
        log::info!(
            "Session {id} ({}) parted ({} remaining)",
            session.display_handle(),
            shared.sessions.len()
        );
        Some(session)
    }

    pub async fn roster(&self) -> Roster {
        self.shared.lock().await.roster()
    }

    pub async fn session_count(&self) -> usize {
        self.shared.lock().await.sessions.len()
    }

    pub async fn session(&self, id: SessionId) -> Option<Session> {
        self.shared.lock().await.sessions.get(&id).cloned()
    }

    /// Snapshot the document if its revision differs from `since`.
    pub async fn snapshot_if_changed(&self, since: u64) -> Option<(u64, Snapshot)> {
        let shared = self.shared.lock().await;
        let revision = shared.store.revision();
        (revision != since).then(|| (revision, shared.store.snapshot()))
    }

    /// Run `f` against the document store under the lock.
    pub async fn with_store<R>(&self, f: impl FnOnce(&DocumentStore) -> R) -> R {
        let shared = self.shared.lock().await;
        f(&shared.store)
    }

    pub fn broadcast_stats(&self) -> BroadcastStats {
        self.group.stats()
    }
}
