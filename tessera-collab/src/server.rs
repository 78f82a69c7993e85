//! WebSocket server for one shared document.
//!
//! ```text
//! Editor A ──┐                    ┌── FileStore (document.json + cells.bin)
//!            ├── SyncServer ──────┤        ▲
//! Editor B ──┘       │            │        │ timer, only when dirty
//!                    ▼            │        │
//!          SessionBroadcaster ────┴── DocumentStore
//!           (one mutex: store + roster)
//!                    │
//!             BroadcastGroup ──► every connected editor
//! ```

use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, Message};

use crate::document::{DocumentError, DocumentStore};
use crate::protocol::{ClientMessage, ProtocolError, SessionId};
use crate::session::{SessionBroadcaster, SessionError};
use crate::storage::{FileStore, StoreError};

/// Server configuration. Missing fields in a config file take the defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,
    /// Frames buffered per session before it counts as lagging.
    pub broadcast_capacity: usize,
    pub persist_interval_secs: u64,
    /// None keeps the document in memory only.
    pub storage_dir: Option<PathBuf>,
    /// Dimensions of a fresh document.
    pub columns: u16,
    pub rows: u16,
    pub font_name: String,
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8000".to_string(),
            broadcast_capacity: 1024,
            persist_interval_secs: 60,
            storage_dir: None,
            columns: 80,
            rows: 25,
            font_name: crate::document::DEFAULT_FONT.to_string(),
            log_level: "info".to_string(),
        }
    }
}

impl ServerConfig {
    /// Read a JSON config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ServerError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)?;
        serde_json::from_slice(&bytes)
            .map_err(|e| ServerError::Config(format!("{}: {e}", path.display())))
    }
}

/// Server statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_messages: u64,
    /// Inbound messages that were malformed, unknown or rejected by the
    /// document.
    pub rejected_messages: u64,
    pub persisted_snapshots: u64,
    pub failed_persists: u64,
}

/// Server errors.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("transport error: {0}")]
    Transport(#[from] tungstenite::Error),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("storage error: {0}")]
    Store(#[from] StoreError),
    #[error("document error: {0}")]
    Document(#[from] DocumentError),
    #[error("session error: {0}")]
    Session(#[from] SessionError),
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Writes the document when it changed since the last successful save.
struct Persister {
    files: FileStore,
    /// Revision of the last successful save. Held across the write so saves
    /// never interleave.
    saved_revision: Mutex<u64>,
}

impl Persister {
    async fn save_if_changed(&self, broadcaster: &SessionBroadcaster) -> Result<bool, ServerError> {
        let mut saved = self.saved_revision.lock().await;
        let Some((revision, snapshot)) = broadcaster.snapshot_if_changed(*saved).await else {
            return Ok(false);
        };
        // Snapshot taken under the document lock; the write happens outside it.
        let files = self.files.clone();
        tokio::task::spawn_blocking(move || files.save(&snapshot))
            .await
            .map_err(io::Error::other)??;
        *saved = revision;
        Ok(true)
    }
}

struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

pub struct SyncServer {
    config: ServerConfig,
    broadcaster: Arc<SessionBroadcaster>,
    stats: Arc<RwLock<ServerStats>>,
    persister: Option<Arc<Persister>>,
}

impl SyncServer {
    /// Server over a fresh document sized from the config.
    pub fn new(config: ServerConfig) -> Result<Self, ServerError> {
        let store = DocumentStore::new(config.columns, config.rows, &config.font_name)?;
        Ok(Self::with_document(config, store))
    }

    pub fn with_document(config: ServerConfig, store: DocumentStore) -> Self {
        let broadcaster = Arc::new(SessionBroadcaster::new(store, config.broadcast_capacity));
        let persister = config.storage_dir.as_ref().map(|dir| {
            Arc::new(Persister {
                files: FileStore::new(dir),
                saved_revision: Mutex::new(0),
            })
        });
        Self {
            config,
            broadcaster,
            stats: Arc::new(RwLock::new(ServerStats::default())),
            persister,
        }
    }

    /// Restore the stored document if there is one, else start fresh.
    ///
    /// A stored pair that cannot be loaded is logged and replaced by a
    /// fresh document on the next save.
    pub fn recover(config: ServerConfig) -> Result<Self, ServerError> {
        let Some(dir) = config.storage_dir.clone() else {
            return Self::new(config);
        };
        match DocumentStore::restore(&FileStore::new(&dir)) {
            Ok(store) => {
                let doc = store.document();
                log::info!(
                    "Recovered {}x{} document from {}",
                    doc.columns(),
                    doc.rows(),
                    dir.display()
                );
                Ok(Self::with_document(config, store))
            }
            Err(StoreError::NotFound(path)) => {
                log::info!("No stored document ({} missing), starting fresh", path.display());
                Self::new(config)
            }
            Err(e) => {
                log::warn!("Discarding stored document in {}: {e}", dir.display());
                Self::new(config)
            }
        }
    }

    /// Bind the configured address and serve forever.
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        log::info!("Tessera server listening on {}", self.config.bind_addr);
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener.
    ///
    /// The persistence timer runs for as long as this future is alive.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        let _timer = self.spawn_persist_timer().map(AbortOnDrop);
        self.accept_loop(listener).await
    }

    async fn accept_loop(&self, listener: TcpListener) -> Result<(), ServerError> {
        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let broadcaster = self.broadcaster.clone();
            let stats = self.stats.clone();
            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(stream, addr, broadcaster, stats).await {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    fn spawn_persist_timer(&self) -> Option<JoinHandle<()>> {
        let persister = self.persister.clone()?;
        let broadcaster = self.broadcaster.clone();
        let stats = self.stats.clone();
        let period = Duration::from_secs(self.config.persist_interval_secs.max(1));
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let saved = persister.save_if_changed(&broadcaster).await;
                let _ = Self::record_save(&stats, saved).await;
            }
        }))
    }

    async fn record_save(
        stats: &RwLock<ServerStats>,
        result: Result<bool, ServerError>,
    ) -> Result<bool, ServerError> {
        match &result {
            Ok(true) => {
                stats.write().await.persisted_snapshots += 1;
                log::debug!("Document persisted");
            }
            Ok(false) => log::trace!("Document unchanged, skipping save"),
            Err(e) => {
                stats.write().await.failed_persists += 1;
                log::error!("Failed to persist document, retrying next tick: {e}");
            }
        }
        result
    }

    /// Save now if the document changed. `Ok(false)` when there was nothing
    /// to write or no storage is configured.
    pub async fn persist_now(&self) -> Result<bool, ServerError> {
        let Some(persister) = &self.persister else {
            return Ok(false);
        };
        Self::record_save(&self.stats, persister.save_if_changed(&self.broadcaster).await).await
    }

    /// Final save before the process exits.
    pub async fn shutdown_save(&self) -> Result<bool, ServerError> {
        let saved = self.persist_now().await?;
        if saved {
            log::info!("Saved document on shutdown");
        }
        Ok(saved)
    }

    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        broadcaster: Arc<SessionBroadcaster>,
        stats: Arc<RwLock<ServerStats>>,
    ) -> Result<(), ServerError> {
        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        let session_id = SessionId::new();
        let welcome = broadcaster.connect(session_id).await?;
        log::info!("WebSocket connection established from {addr} as {session_id}");
        {
            let mut s = stats.write().await;
            s.total_connections += 1;
            s.active_connections += 1;
        }

        let result: Result<(), ServerError> = async {
            ws_sender.send(Message::Text(welcome.start.into())).await?;
            ws_sender.send(Message::Binary(welcome.cells.into())).await?;
            let mut updates = welcome.updates;

            loop {
                tokio::select! {
                    msg = ws_receiver.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                stats.write().await.total_messages += 1;
                                let accepted = match ClientMessage::decode(text.as_str()) {
                                    Ok(client_msg) => {
                                        let kind = client_msg.kind();
                                        match broadcaster.handle(session_id, client_msg).await {
                                            Ok(()) => true,
                                            Err(e) => {
                                                log::warn!("Rejected {kind} from {session_id}: {e}");
                                                false
                                            }
                                        }
                                    }
                                    Err(ProtocolError::UnknownKind(kind)) => {
                                        log::warn!("Ignoring unknown message kind {kind:?} from {session_id}");
                                        false
                                    }
                                    Err(e) => {
                                        log::warn!("Malformed message from {session_id}: {e}");
                                        false
                                    }
                                };
                                if !accepted {
                                    stats.write().await.rejected_messages += 1;
                                }
                            }
                            Some(Ok(Message::Binary(data))) => {
                                log::warn!(
                                    "Ignoring {}-byte binary frame from {session_id}",
                                    data.len()
                                );
                            }
                            Some(Ok(Message::Ping(data))) => {
                                ws_sender.send(Message::Pong(data)).await?;
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                log::info!("Connection closed from {addr}");
                                break;
                            }
                            Some(Ok(_)) => {}
                            Some(Err(e)) => return Err(e.into()),
                        }
                    }

                    update = updates.recv() => {
                        match update {
                            Ok(frame) => {
                                ws_sender.send(Message::Text(frame.to_string().into())).await?;
                            }
                            Err(RecvError::Lagged(n)) => {
                                // It would silently diverge; reconnecting gets a fresh snapshot.
                                log::warn!("Session {session_id} lagged by {n} messages, closing");
                                let _ = ws_sender.send(Message::Close(None)).await;
                                break;
                            }
                            Err(RecvError::Closed) => break,
                        }
                    }
                }
            }
            Ok(())
        }
        .await;

        broadcaster.disconnect(session_id).await;
        stats.write().await.active_connections -= 1;
        result
    }

    pub async fn stats(&self) -> ServerStats {
        self.stats.read().await.clone()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    pub fn broadcaster(&self) -> &Arc<SessionBroadcaster> {
        &self.broadcaster
    }

    pub fn storage(&self) -> Option<&FileStore> {
        self.persister.as_ref().map(|p| &p.files)
    }
}
