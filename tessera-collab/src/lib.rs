//! # tessera-collab: shared ANSI-art document server and editor client
//!
//! ```text
//! ┌──────────────┐   JSON text frames   ┌──────────────┐
//! │ EditorClient │ ◄──────────────────► │ SyncServer   │
//! │ (per artist) │  + one cell frame    │ (one per doc)│
//! └──────┬───────┘                      └──────┬───────┘
//!        │                                     │
//!        ▼                                     ▼
//! ┌──────────────┐                   ┌───────────────────┐
//! │ mirror       │                   │ SessionBroadcaster│
//! │ DocumentStore│                   │  DocumentStore    │
//! └──────────────┘                   │  + roster         │
//!                                    └─────────┬─────────┘
//!                                              │
//!                                     ┌────────┴───────┐
//!                                     │ BroadcastGroup │
//!                                     └────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`]: `[kind, ...args]` JSON messages
//! - [`packer`]: last-write-wins delta packing and the edit buffer
//! - [`document`]: the canonical document and its store
//! - [`storage`]: JSON metadata + flat cell file persistence
//! - [`broadcast`]: fan-out of encoded frames
//! - [`session`]: session registry and message relay
//! - [`server`]: WebSocket server, persistence timer, recovery
//! - [`client`]: WebSocket editor client with offline edits

pub mod broadcast;
pub mod client;
pub mod document;
pub mod packer;
pub mod protocol;
pub mod server;
pub mod session;
pub mod storage;

pub use broadcast::{BroadcastGroup, BroadcastStats};
pub use client::{ClientError, ConnectionState, EditorClient, EditorEvent};
pub use document::{
    ChatEntry, Document, DocumentError, DocumentMetadata, DocumentStore, Snapshot, MAX_CHAT_LOG,
};
pub use packer::{pack, pack_deltas, EditBuffer};
pub use protocol::{
    ClientMessage, Delta, ProtocolError, Roster, ServerMessage, SessionId, SettingChange,
};
pub use server::{ServerConfig, ServerError, ServerStats, SyncServer};
pub use session::{Session, SessionBroadcaster, SessionError, SessionState};
pub use storage::{FileStore, StoreError};
