//! WebSocket editor client.
//!
//! Provides:
//! - Connection lifecycle and an event stream for the UI
//! - A local mirror of the shared document (`start` + cell frame + remote
//!   mutations)
//! - Buffered local drawing, flushed as one packed `draw`
//! - Offline editing: buffered edits survive a lost connection and go out
//!   on the next flush after reconnecting

use std::collections::HashSet;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_tungstenite::tungstenite::{self, Message};

use tessera_codec::Cell;

use crate::document::{DocumentError, DocumentMetadata, DocumentStore, Snapshot};
use crate::packer::EditBuffer;
use crate::protocol::{
    ClientMessage, Delta, ProtocolError, Roster, ServerMessage, SessionId, SettingChange,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Events emitted by the editor client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditorEvent {
    Connected,
    /// The mirror holds the server's document.
    Started {
        session_id: SessionId,
        roster: Roster,
    },
    /// Remote cell writes, already applied to the mirror.
    Draw(Vec<Delta>),
    Joined {
        handle: String,
        session_id: SessionId,
    },
    Nick {
        handle: String,
        session_id: SessionId,
    },
    Chat {
        handle: String,
        text: String,
    },
    Parted(SessionId),
    /// A document setting changed.
    Changed(SettingChange),
    Disconnected,
}

/// Client errors.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("transport error: {0}")]
    Transport(#[from] tungstenite::Error),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Document(#[from] DocumentError),
    #[error("not connected")]
    NotConnected,
    #[error("connection closed")]
    ConnectionClosed,
}

#[derive(Default)]
struct Mirror {
    store: Option<DocumentStore>,
    /// `start` metadata waiting for its cell frame.
    awaiting_cells: Option<DocumentMetadata>,
    session_id: Option<SessionId>,
    roster: Roster,
}

impl Mirror {
    /// Fold one server message into the mirror.
    fn apply(&mut self, msg: ServerMessage, pending: &HashSet<u32>) -> Option<EditorEvent> {
        match msg {
            ServerMessage::Start {
                document,
                session_id,
                roster,
            } => {
                self.awaiting_cells = Some(document);
                self.session_id = Some(session_id);
                self.roster = roster;
                None
            }
            ServerMessage::Draw(deltas) => {
                if let Some(store) = self.store.as_mut() {
                    // Cells with unsent local edits keep the local value.
                    for delta in deltas.iter().filter(|d| !pending.contains(&d.index)) {
                        if let Err(e) = store.apply_delta(delta.index, delta.value) {
                            log::debug!("Remote draw outside mirror: {e}");
                        }
                    }
                }
                Some(EditorEvent::Draw(deltas))
            }
            ServerMessage::Join { handle, session_id } => {
                self.roster.insert(session_id, handle.clone());
                Some(EditorEvent::Joined { handle, session_id })
            }
            ServerMessage::Nick { handle, session_id } => {
                self.roster.insert(session_id, handle.clone());
                Some(EditorEvent::Nick { handle, session_id })
            }
            ServerMessage::Chat { handle, text } => {
                if let Some(store) = self.store.as_mut() {
                    store.append_chat(&handle, &text);
                }
                Some(EditorEvent::Chat { handle, text })
            }
            ServerMessage::Part { session_id } => {
                self.roster.remove(&session_id);
                Some(EditorEvent::Parted(session_id))
            }
            ServerMessage::Setting(change) => {
                if let Some(store) = self.store.as_mut() {
                    if let Err(e) = store.apply_setting(&change) {
                        log::warn!("Could not mirror {} change: {e}", change.kind());
                    }
                }
                Some(EditorEvent::Changed(change))
            }
        }
    }

    /// Complete a `start` with its cell frame.
    fn load_cells(&mut self, cells: Vec<u8>, pending: &[Delta]) -> Option<EditorEvent> {
        let metadata = self.awaiting_cells.take()?;
        let snapshot = Snapshot { metadata, cells };
        match DocumentStore::from_snapshot(&snapshot) {
            Ok(mut store) => {
                for delta in pending {
                    let _ = store.apply_delta(delta.index, delta.value);
                }
                self.store = Some(store);
                Some(EditorEvent::Started {
                    session_id: self.session_id?,
                    roster: self.roster.clone(),
                })
            }
            Err(e) => {
                log::error!("Server snapshot rejected: {e}");
                None
            }
        }
    }
}

pub struct EditorClient {
    handle: String,
    server_url: String,
    state: Arc<RwLock<ConnectionState>>,
    edits: Arc<Mutex<EditBuffer>>,
    mirror: Arc<RwLock<Mirror>>,
    /// Text frames for the writer task.
    outgoing_tx: Option<mpsc::Sender<String>>,
    event_rx: Option<mpsc::Receiver<EditorEvent>>,
    event_tx: mpsc::Sender<EditorEvent>,
}

impl EditorClient {
    pub fn new(handle: impl Into<String>, server_url: impl Into<String>) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);
        Self {
            handle: handle.into(),
            server_url: server_url.into(),
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            edits: Arc::new(Mutex::new(EditBuffer::new())),
            mirror: Arc::new(RwLock::new(Mirror::default())),
            outgoing_tx: None,
            event_rx: Some(event_rx),
            event_tx,
        }
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<EditorEvent>> {
        self.event_rx.take()
    }

    /// Connect, join with our handle and flush anything drawn offline.
    pub async fn connect(&mut self) -> Result<(), ClientError> {
        *self.state.write().await = ConnectionState::Connecting;

        let ws_stream = match tokio_tungstenite::connect_async(self.server_url.as_str()).await {
            Ok((ws_stream, _)) => ws_stream,
            Err(e) => {
                *self.state.write().await = ConnectionState::Disconnected;
                return Err(e.into());
            }
        };
        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        let (out_tx, mut out_rx) = mpsc::channel::<String>(256);
        tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if ws_writer.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            let _ = ws_writer.close().await;
        });
        self.outgoing_tx = Some(out_tx);
        *self.state.write().await = ConnectionState::Connected;
        let _ = self.event_tx.send(EditorEvent::Connected).await;

        let event_tx = self.event_tx.clone();
        let state = self.state.clone();
        let mirror = self.mirror.clone();
        let edits = self.edits.clone();
        tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                let event = match msg {
                    Ok(Message::Text(text)) => match ServerMessage::decode(text.as_str()) {
                        Ok(server_msg) => {
                            let pending = edits.lock().await.pending_indices();
                            mirror.write().await.apply(server_msg, &pending)
                        }
                        Err(e) => {
                            log::warn!("Ignoring server frame: {e}");
                            None
                        }
                    },
                    Ok(Message::Binary(data)) => {
                        let pending = edits.lock().await.as_slice().to_vec();
                        mirror.write().await.load_cells(data.to_vec(), &pending)
                    }
                    Ok(Message::Close(_)) | Err(_) => break,
                    Ok(_) => None,
                };
                if let Some(event) = event {
                    let _ = event_tx.send(event).await;
                }
            }

            *state.write().await = ConnectionState::Disconnected;
            let _ = event_tx.send(EditorEvent::Disconnected).await;
        });

        self.send(ClientMessage::Join {
            handle: self.handle.clone(),
        })
        .await?;

        let replayed = self.flush().await?;
        if replayed > 0 {
            log::info!("Replayed {replayed} offline cell edits");
        }
        Ok(())
    }

    /// Stop the writer task; the server sees the socket close.
    pub async fn disconnect(&mut self) {
        self.outgoing_tx = None;
        *self.state.write().await = ConnectionState::Disconnected;
    }

    /// Buffer a cell write and show it in the mirror straight away.
    pub async fn draw(&self, index: u32, value: u16) -> Result<(), ClientError> {
        let mut edits = self.edits.lock().await;
        if let Some(store) = self.mirror.write().await.store.as_mut() {
            store.apply_delta(index, value)?;
        }
        edits.push(Delta::new(index, value));
        Ok(())
    }

    /// [`EditorClient::draw`] by coordinates. Off-canvas cells are an error
    /// once the document is known.
    pub async fn draw_cell(&self, x: u16, y: u16, cell: Cell) -> Result<(), ClientError> {
        let index = {
            let mirror = self.mirror.read().await;
            let store = mirror.store.as_ref().ok_or(ClientError::NotConnected)?;
            let cells = store.document().cells();
            cells
                .index_of(x, y)
                .ok_or(DocumentError::IndexOutOfRange {
                    index: u32::from(y) * u32::from(cells.columns()) + u32::from(x),
                    len: cells.len(),
                })?
        };
        self.draw(index as u32, cell.pack()).await
    }

    /// Buffer the writes that paste an exported stamp at `(x, y)`.
    pub async fn paste_stamp(&self, x: u16, y: u16, stamp: &[u8]) -> Result<usize, ClientError> {
        let deltas = {
            let mirror = self.mirror.read().await;
            let store = mirror.store.as_ref().ok_or(ClientError::NotConnected)?;
            store.stamp_deltas(x, y, stamp)?
        };
        for delta in &deltas {
            self.draw(delta.index, delta.value).await?;
        }
        Ok(deltas.len())
    }

    /// Send buffered edits as one packed `draw`.
    ///
    /// Returns how many cells were sent. While offline nothing is sent and
    /// the edits stay buffered.
    pub async fn flush(&self) -> Result<usize, ClientError> {
        if *self.state.read().await != ConnectionState::Connected {
            return Ok(0);
        }
        let mut edits = self.edits.lock().await;
        let packed = edits.take_packed();
        if packed.is_empty() {
            return Ok(0);
        }
        let count = packed.len();
        let text = ClientMessage::Draw(packed.clone()).encode()?;
        if let Err(e) = self.send_raw(text).await {
            edits.restore(packed);
            return Err(e);
        }
        Ok(count)
    }

    pub async fn chat(&self, text: impl Into<String>) -> Result<(), ClientError> {
        self.send(ClientMessage::Chat { text: text.into() }).await
    }

    pub async fn nick(&mut self, handle: impl Into<String>) -> Result<(), ClientError> {
        let handle = handle.into();
        self.send(ClientMessage::Nick {
            handle: handle.clone(),
        })
        .await?;
        self.handle = handle;
        Ok(())
    }

    /// Request a document-wide setting change. The mirror follows when the
    /// server echoes it back.
    pub async fn change_setting(&self, change: SettingChange) -> Result<(), ClientError> {
        self.send(ClientMessage::Setting(change)).await
    }

    async fn send(&self, msg: ClientMessage) -> Result<(), ClientError> {
        if *self.state.read().await != ConnectionState::Connected {
            return Err(ClientError::NotConnected);
        }
        self.send_raw(msg.encode()?).await
    }

    async fn send_raw(&self, text: String) -> Result<(), ClientError> {
        let tx = self.outgoing_tx.as_ref().ok_or(ClientError::NotConnected)?;
        tx.send(text)
            .await
            .map_err(|_| ClientError::ConnectionClosed)
    }

    pub async fn connection_state(&self) -> ConnectionState {
        *self.state.read().await
    }

    pub async fn session_id(&self) -> Option<SessionId> {
        self.mirror.read().await.session_id
    }

    pub async fn roster(&self) -> Roster {
        self.mirror.read().await.roster.clone()
    }

    pub async fn cell(&self, index: usize) -> Option<u16> {
        let mirror = self.mirror.read().await;
        mirror.store.as_ref()?.document().cell(index)
    }

    /// Run `f` against the mirrored document, if the start snapshot arrived.
    pub async fn with_document<R>(&self, f: impl FnOnce(&DocumentStore) -> R) -> Option<R> {
        let mirror = self.mirror.read().await;
        mirror.store.as_ref().map(f)
    }

    pub async fn pending_edits(&self) -> usize {
        self.edits.lock().await.len()
    }

    pub fn handle(&self) -> &str {
        &self.handle
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_client_creation() {
        let mut client = EditorClient::new("alice", "ws://127.0.0.1:8000");
        assert_eq!(client.handle(), "alice");
        assert_eq!(client.server_url(), "ws://127.0.0.1:8000");
        assert_eq!(client.connection_state().await, ConnectionState::Disconnected);
        assert!(client.take_event_rx().is_some());
        assert!(client.take_event_rx().is_none());
        assert!(client.session_id().await.is_none());
    }

    #[tokio::test]
    async fn test_offline_draw_is_buffered() {
        let client = EditorClient::new("alice", "ws://127.0.0.1:1");
        client.draw(4, 0x0741).await.unwrap();
        client.draw(4, 0x0742).await.unwrap();
        assert_eq!(client.pending_edits().await, 2);
        assert_eq!(client.flush().await.unwrap(), 0);
        assert_eq!(client.pending_edits().await, 2);
        assert!(client.cell(4).await.is_none());
    }

    #[tokio::test]
    async fn test_chat_offline_fails() {
        let client = EditorClient::new("alice", "ws://127.0.0.1:1");
        assert!(matches!(
            client.chat("hello").await,
            Err(ClientError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let mut client = EditorClient::new("alice", "ws://127.0.0.1:1");
        assert!(client.connect().await.is_err());
        assert_eq!(client.connection_state().await, ConnectionState::Disconnected);
    }

    #[test]
    fn test_mirror_start_then_cells() {
        let store = DocumentStore::new(4, 1, "IBM VGA").unwrap();
        let id = SessionId::new();
        let mut mirror = Mirror::default();
        let start = ServerMessage::Start {
            document: store.document().metadata(),
            session_id: id,
            roster: Roster::new(),
        };
        assert!(mirror.apply(start, &HashSet::new()).is_none());

        let pending = [Delta::new(2, 9)];
        let event = mirror.load_cells(store.snapshot().cells, &pending);
        assert_eq!(
            event,
            Some(EditorEvent::Started {
                session_id: id,
                roster: Roster::new()
            })
        );
        let mirrored = mirror.store.as_ref().unwrap();
        assert_eq!(mirrored.document().cell(2), Some(9));

        // A stray cell frame without a start is ignored.
        assert!(mirror.load_cells(vec![0; 8], &[]).is_none());
    }

    #[test]
    fn test_mirror_keeps_pending_cells() {
        let mut mirror = Mirror {
            store: Some(DocumentStore::new(4, 1, "IBM VGA").unwrap()),
            ..Mirror::default()
        };
        let remote = ServerMessage::Draw(vec![Delta::new(0, 5), Delta::new(1, 6)]);
        let event = mirror.apply(remote, &HashSet::from([1]));
        assert!(matches!(event, Some(EditorEvent::Draw(d)) if d.len() == 2));
        let doc = mirror.store.as_ref().unwrap().document();
        assert_eq!(doc.cell(0), Some(5));
        assert_eq!(doc.cell(1), Some(Cell::DEFAULT.pack()));
    }

    #[test]
    fn test_mirror_roster_tracking() {
        let mut mirror = Mirror::default();
        let id = SessionId::new();
        let none = HashSet::new();
        mirror.apply(
            ServerMessage::Join {
                handle: "bob".into(),
                session_id: id,
            },
            &none,
        );
        assert_eq!(mirror.roster.get(&id).map(String::as_str), Some("bob"));
        mirror.apply(
            ServerMessage::Nick {
                handle: "rob".into(),
                session_id: id,
            },
            &none,
        );
        assert_eq!(mirror.roster.get(&id).map(String::as_str), Some("rob"));
        assert_eq!(
            mirror.apply(ServerMessage::Part { session_id: id }, &none),
            Some(EditorEvent::Parted(id))
        );
        assert!(mirror.roster.is_empty());
    }
}
