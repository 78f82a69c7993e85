//! JSON text-frame protocol between editors and the server.
//!
//! Every frame is a JSON array whose first element names the message kind:
//! ```text
//! server → client                         client → server
//! ["start", doc, sessionId, roster]       ["join", handle]
//! ["join",  handle, sessionId]            ["nick", handle]
//! ["nick",  handle, sessionId]            ["chat", text]
//! ["chat",  handle, text]                 ["draw", [[index, value], ...]]
//! ["draw",  [[index, value], ...]]
//! ["part",  sessionId]
//!
//! both directions
//! ["resize", columns, rows]   ["ice_colours", bool]   ["letter_spacing", bool]
//! ["font", name]              ["sauce", title, author, group]
//! ```
//!
//! A `start` frame is always followed by one binary frame holding the raw
//! cell buffer.

use std::collections::BTreeMap;
use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::document::DocumentMetadata;

/// Opaque per-connection identity, assigned by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Joined sessions and their display handles.
pub type Roster = BTreeMap<SessionId, String>;

/// One cell write: `cells[index] = value`. Serialized as `[index, value]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "(u32, u16)", into = "(u32, u16)")]
pub struct Delta {
    pub index: u32,
    pub value: u16,
}

impl Delta {
    pub fn new(index: u32, value: u16) -> Self {
        Self { index, value }
    }
}

impl From<(u32, u16)> for Delta {
    fn from((index, value): (u32, u16)) -> Self {
        Self { index, value }
    }
}

impl From<Delta> for (u32, u16) {
    fn from(delta: Delta) -> Self {
        (delta.index, delta.value)
    }
}

/// Message kind tags.
pub mod kind {
    pub const START: &str = "start";
    pub const JOIN: &str = "join";
    pub const NICK: &str = "nick";
    pub const CHAT: &str = "chat";
    pub const DRAW: &str = "draw";
    pub const PART: &str = "part";
    pub const RESIZE: &str = "resize";
    pub const ICE_COLOURS: &str = "ice_colours";
    pub const LETTER_SPACING: &str = "letter_spacing";
    pub const FONT: &str = "font";
    pub const SAUCE: &str = "sauce";
}

/// Document-wide setting changes, identical in both directions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettingChange {
    Resize { columns: u16, rows: u16 },
    IceColours(bool),
    LetterSpacing(bool),
    Font(String),
    Sauce {
        title: String,
        author: String,
        group: String,
    },
}

impl SettingChange {
    fn to_value(&self) -> Value {
        match self {
            SettingChange::Resize { columns, rows } => json!([kind::RESIZE, columns, rows]),
            SettingChange::IceColours(on) => json!([kind::ICE_COLOURS, on]),
            SettingChange::LetterSpacing(on) => json!([kind::LETTER_SPACING, on]),
            SettingChange::Font(name) => json!([kind::FONT, name]),
            SettingChange::Sauce {
                title,
                author,
                group,
            } => json!([kind::SAUCE, title, author, group]),
        }
    }

    fn parse(kind: &str, args: &Args<'_>) -> Result<Option<Self>, ProtocolError> {
        let change = match kind {
            kind::RESIZE => SettingChange::Resize {
                columns: args.get(0)?,
                rows: args.get(1)?,
            },
            kind::ICE_COLOURS => SettingChange::IceColours(args.get(0)?),
            kind::LETTER_SPACING => SettingChange::LetterSpacing(args.get(0)?),
            kind::FONT => SettingChange::Font(args.get(0)?),
            kind::SAUCE => SettingChange::Sauce {
                title: args.get(0)?,
                author: args.get(1)?,
                group: args.get(2)?,
            },
            _ => return Ok(None),
        };
        Ok(Some(change))
    }
}

/// Messages an editor sends to the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    Join { handle: String },
    Nick { handle: String },
    Chat { text: String },
    Draw(Vec<Delta>),
    Setting(SettingChange),
}

impl ClientMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::Join { .. } => kind::JOIN,
            ClientMessage::Nick { .. } => kind::NICK,
            ClientMessage::Chat { .. } => kind::CHAT,
            ClientMessage::Draw(_) => kind::DRAW,
            ClientMessage::Setting(change) => change.kind(),
        }
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        let value = match self {
            ClientMessage::Join { handle } => json!([kind::JOIN, handle]),
            ClientMessage::Nick { handle } => json!([kind::NICK, handle]),
            ClientMessage::Chat { text } => json!([kind::CHAT, text]),
            ClientMessage::Draw(deltas) => json!([kind::DRAW, deltas]),
            ClientMessage::Setting(change) => change.to_value(),
        };
        serde_json::to_string(&value).map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let frame = Frame::parse(text)?;
        let args = frame.args();
        let msg = match frame.kind.as_str() {
            kind::JOIN => ClientMessage::Join {
                handle: args.get(0)?,
            },
            kind::NICK => ClientMessage::Nick {
                handle: args.get(0)?,
            },
            kind::CHAT => ClientMessage::Chat { text: args.get(0)? },
            kind::DRAW => ClientMessage::Draw(args.get(0)?),
            other => match SettingChange::parse(other, &args)? {
                Some(change) => ClientMessage::Setting(change),
                None => return Err(ProtocolError::UnknownKind(other.to_string())),
            },
        };
        args.expect_len(msg.arity())?;
        Ok(msg)
    }

    fn arity(&self) -> usize {
        match self {
            ClientMessage::Setting(change) => change.arity(),
            _ => 1,
        }
    }
}

impl SettingChange {
    fn arity(&self) -> usize {
        match self {
            SettingChange::Resize { .. } => 2,
            SettingChange::Sauce { .. } => 3,
            _ => 1,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SettingChange::Resize { .. } => kind::RESIZE,
            SettingChange::IceColours(_) => kind::ICE_COLOURS,
            SettingChange::LetterSpacing(_) => kind::LETTER_SPACING,
            SettingChange::Font(_) => kind::FONT,
            SettingChange::Sauce { .. } => kind::SAUCE,
        }
    }
}

/// Messages the server sends to editors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    Start {
        document: DocumentMetadata,
        session_id: SessionId,
        roster: Roster,
    },
    Join {
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
    Draw(Vec<Delta>),
    Part {
        session_id: SessionId,
    },
    Setting(SettingChange),
}

impl ServerMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::Start { .. } => kind::START,
            ServerMessage::Join { .. } => kind::JOIN,
            ServerMessage::Nick { .. } => kind::NICK,
            ServerMessage::Chat { .. } => kind::CHAT,
            ServerMessage::Draw(_) => kind::DRAW,
            ServerMessage::Part { .. } => kind::PART,
            ServerMessage::Setting(change) => change.kind(),
        }
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        let value = match self {
            ServerMessage::Start {
                document,
                session_id,
                roster,
            } => json!([kind::START, document, session_id, roster]),
            ServerMessage::Join { handle, session_id } => json!([kind::JOIN, handle, session_id]),
            ServerMessage::Nick { handle, session_id } => json!([kind::NICK, handle, session_id]),
            ServerMessage::Chat { handle, text } => json!([kind::CHAT, handle, text]),
            ServerMessage::Draw(deltas) => json!([kind::DRAW, deltas]),
            ServerMessage::Part { session_id } => json!([kind::PART, session_id]),
            ServerMessage::Setting(change) => change.to_value(),
        };
        serde_json::to_string(&value).map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let frame = Frame::parse(text)?;
        let args = frame.args();
        let msg = match frame.kind.as_str() {
            kind::START => ServerMessage::Start {
                document: args.get(0)?,
                session_id: args.get(1)?,
                roster: args.get(2)?,
            },
            kind::JOIN => ServerMessage::Join {
                handle: args.get(0)?,
                session_id: args.get(1)?,
            },
            kind::NICK => ServerMessage::Nick {
                handle: args.get(0)?,
                session_id: args.get(1)?,
            },
            kind::CHAT => ServerMessage::Chat {
                handle: args.get(0)?,
                text: args.get(1)?,
            },
            kind::DRAW => ServerMessage::Draw(args.get(0)?),
            kind::PART => ServerMessage::Part {
                session_id: args.get(0)?,
            },
            other => match SettingChange::parse(other, &args)? {
                Some(change) => ServerMessage::Setting(change),
                None => return Err(ProtocolError::UnknownKind(other.to_string())),
            },
        };
        args.expect_len(msg.arity())?;
        Ok(msg)
    }

    fn arity(&self) -> usize {
        match self {
            ServerMessage::Start { .. } => 3,
            ServerMessage::Join { .. }
            | ServerMessage::Nick { .. }
            | ServerMessage::Chat { .. } => 2,
            ServerMessage::Draw(_) | ServerMessage::Part { .. } => 1,
            ServerMessage::Setting(change) => change.arity(),
        }
    }
}

/// A parsed `[kind, ...args]` array.
struct Frame {
    kind: String,
    rest: Vec<Value>,
}

impl Frame {
    fn parse(text: &str) -> Result<Self, ProtocolError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
        let Value::Array(mut items) = value else {
            return Err(ProtocolError::Malformed("frame is not a JSON array".into()));
        };
        if items.is_empty() {
            return Err(ProtocolError::Malformed("empty frame".into()));
        }
        let Value::String(kind) = items.remove(0) else {
            return Err(ProtocolError::Malformed("message kind is not a string".into()));
        };
        Ok(Self { kind, rest: items })
    }

    fn args(&self) -> Args<'_> {
        Args {
            kind: &self.kind,
            values: &self.rest,
        }
    }
}

struct Args<'a> {
    kind: &'a str,
    values: &'a [Value],
}

impl Args<'_> {
    /// Reject trailing arguments.
    fn expect_len(&self, arity: usize) -> Result<(), ProtocolError> {
        if self.values.len() == arity {
            Ok(())
        } else {
            Err(ProtocolError::Malformed(format!(
                "{} takes {arity} argument(s), got {}",
                self.kind,
                self.values.len()
            )))
        }
    }

    fn get<T: DeserializeOwned>(&self, index: usize) -> Result<T, ProtocolError> {
        let value = self.values.get(index).ok_or_else(|| {
            ProtocolError::Malformed(format!("{} is missing argument {index}", self.kind))
        })?;
        T::deserialize(value).map_err(|e| {
            ProtocolError::Malformed(format!("{} argument {index}: {e}", self.kind))
        })
    }
}

/// Protocol errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed message: {0}")]
    Malformed(String),
    #[error("unknown message kind: {0}")]
    UnknownKind(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}
