//! Message types carried by the lockstep wire protocol.

use std::collections::BTreeSet;
use std::fmt;

use lockstep_core::{ClientId, ClientSettings, SyncMode};

/// Command tokens, the first field of every line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// `S`: connect as a synchronous client.
    ConnectSync,
    /// `A`: connect as an asynchronous client.
    ConnectAsync,
    /// `D`: a client finished rendering a frame.
    DoneRendering,
    /// `T`: an application data message.
    Data,
    /// `G`: the coordinator announces the next frame.
    NextFrame,
    /// `R`: reset every client to frame 1.
    Reset,
    /// `P`: toggle the paused state.
    TogglePause,
}

impl Command {
    /// All commands, in wire-table order.
    pub const ALL: [Command; 7] = [
        Self::ConnectSync,
        Self::ConnectAsync,
        Self::DoneRendering,
        Self::Data,
        Self::NextFrame,
        Self::Reset,
        Self::TogglePause,
    ];

    /// The single-character wire token.
    pub const fn token(self) -> char {
        match self {
            Self::ConnectSync => 'S',
            Self::ConnectAsync => 'A',
            Self::DoneRendering => 'D',
            Self::Data => 'T',
            Self::NextFrame => 'G',
            Self::Reset => 'R',
            Self::TogglePause => 'P',
        }
    }

    /// Looks up a command by its token field.
    pub fn from_token(token: &str) -> Option<Self> {
        let mut chars = token.chars();
        let first = chars.next()?;
        if chars.next().is_some() {
            return None;
        }
        Self::ALL.into_iter().find(|c| c.token() == first)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.token())
    }
}

/// Which clients a data message is addressed to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Targets {
    /// Every client.
    #[default]
    All,
    /// Only the listed client ids.
    Only(BTreeSet<ClientId>),
}

impl Targets {
    /// Builds an explicit target set.
    pub fn only<I>(ids: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<ClientId>,
    {
        Self::Only(ids.into_iter().map(Into::into).collect())
    }

    /// Returns true if a message with these targets goes to `id`.
    pub fn includes(&self, id: ClientId) -> bool {
        match self {
            Self::All => true,
            Self::Only(ids) => ids.contains(&id),
        }
    }
}

/// A data message riding along on a next-frame broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddedData {
    /// The client that sent the data message.
    pub from: ClientId,
    /// Application payload.
    pub payload: String,
}

impl EmbeddedData {
    pub fn new(from: impl Into<ClientId>, payload: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            payload: payload.into(),
        }
    }
}

/// One protocol message; each encodes to exactly one wire line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Handshake from a synchronous client.
    ConnectSync { client_id: ClientId, name: String },

    /// Handshake from an asynchronous client.
    ConnectAsync {
        client_id: ClientId,
        name: String,
        wants_data: bool,
    },

    /// A client finished rendering `frame`.
    DoneRendering { client_id: ClientId, frame: u64 },

    /// Application data for all clients or a subset.
    Data { payload: String, targets: Targets },

    /// The coordinator advanced to `frame`; carries the data gathered since
    /// the previous advance.
    NextFrame {
        frame: u64,
        embedded: Vec<EmbeddedData>,
    },

    /// Reset every client and the coordinator to frame 1.
    Reset,

    /// Toggle the coordinator's paused state.
    TogglePause,
}

impl Message {
    /// Builds the handshake line for the given settings.
    pub fn handshake(settings: &ClientSettings) -> Self {
        match settings.mode {
            SyncMode::Sync => Self::ConnectSync {
                client_id: settings.client_id,
                name: settings.display_name(),
            },
            SyncMode::Async => Self::ConnectAsync {
                client_id: settings.client_id,
                name: settings.display_name(),
                wants_data: settings.wants_data,
            },
        }
    }

    /// A next-frame notice without embedded data.
    pub fn next_frame(frame: u64) -> Self {
        Self::NextFrame {
            frame,
            embedded: Vec::new(),
        }
    }

    /// A data message for every client.
    pub fn broadcast(payload: impl Into<String>) -> Self {
        Self::Data {
            payload: payload.into(),
            targets: Targets::All,
        }
    }

    /// The command token this message is sent with.
    pub fn command(&self) -> Command {
        match self {
            Self::ConnectSync { .. } => Command::ConnectSync,
            Self::ConnectAsync { .. } => Command::ConnectAsync,
            Self::DoneRendering { .. } => Command::DoneRendering,
            Self::Data { .. } => Command::Data,
            Self::NextFrame { .. } => Command::NextFrame,
            Self::Reset => Command::Reset,
            Self::TogglePause => Command::TogglePause,
        }
    }

    /// Returns true for the two connect messages.
    pub fn is_handshake(&self) -> bool {
        matches!(self, Self::ConnectSync { .. } | Self::ConnectAsync { .. })
    }
}
