//! Session bookkeeping and barrier decisions, independent of any transport.
//!
//! The [`Coordinator`] is driven by three kinds of input: a session joined,
//! a session sent a line, a session went away. Every line it wants to send is
//! queued on the receiving session and collected with
//! [`Coordinator::take_outbound`] or [`Coordinator::drain_outbound`].

use std::collections::BTreeSet;

use lockstep_core::ClientId;
use lockstep_protocol::{EmbeddedData, Message, decode, encode, sanitize};
use tracing::{debug, info, trace, warn};

use crate::barrier::{Ack, Advance, FrameBarrier};
use crate::error::{ServerError, ServerResult};
use crate::registry::{ClientSession, SessionHandle, SessionRegistry};

/// The frame barrier coordinator.
#[derive(Debug, Default)]
pub struct Coordinator {
    registry: SessionRegistry,
    barrier: FrameBarrier,
    advances: u64,
}

impl Coordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// The frame the coordinator is waiting on.
    pub fn frame(&self) -> u64 {
        self.barrier.frame()
    }

    pub fn is_paused(&self) -> bool {
        self.barrier.is_paused()
    }

    /// Number of advances performed so far, across resets.
    pub fn advances(&self) -> u64 {
        self.advances
    }

    pub fn session_count(&self) -> usize {
        self.registry.len()
    }

    pub fn session(&self, handle: SessionHandle) -> Option<&ClientSession> {
        self.registry.get(handle)
    }

    /// Ids of the sessions the barrier waits on.
    pub fn sync_ids(&self) -> BTreeSet<ClientId> {
        self.registry.sync_ids()
    }

    /// Registers a session from its connect message.
    ///
    /// The new session is immediately sent the current frame so that a
    /// client joining mid-run can take part in the barrier.
    ///
    /// # Errors
    ///
    /// Fails if `hello` is not a connect message or the client id is
    /// already registered.
    pub fn register(&mut self, hello: &Message) -> ServerResult<SessionHandle> {
        let session = ClientSession::from_handshake(hello)
            .ok_or_else(|| ServerError::handshake(format!("expected S or A, got {}", hello.command())))?;

        let (id, mode) = (session.id, session.mode);
        let name = session.name.clone();
        let handle = self.registry.insert(session)?;

        let frame = self.barrier.frame();
        if let Some(session) = self.registry.get_mut(handle) {
            session.push_line(encode(&Message::next_frame(frame)));
        }

        info!(client_id = %id, name = %name, mode = %mode, frame, "client connected");
        Ok(handle)
    }

    /// Decodes and applies one line from a session.
    ///
    /// Lines that do not decode are logged and dropped.
    pub fn handle_line(&mut self, handle: SessionHandle, line: &str) {
        match decode(line) {
            Ok(message) => self.handle_message(handle, message),
            Err(e) => {
                let client_id = self.registry.get(handle).map(|s| s.id);
                warn!(client_id = ?client_id, error = %e, line, "dropping undecodable line");
            }
        }
    }

    /// Applies one message from a session.
    pub fn handle_message(&mut self, handle: SessionHandle, message: Message) {
        let Some(sender) = self.registry.get(handle).map(|s| s.id) else {
            debug!(?handle, "message from a session that is gone");
            return;
        };

        match message {
            Message::DoneRendering { client_id, frame } => {
                if client_id != sender {
                    warn!(sender = %sender, client_id = %client_id, frame, "dropping acknowledgement sent for another client");
                    return;
                }
                self.acknowledge(sender, frame);
            }
            Message::Data { payload, targets } => {
                trace!(from = %sender, len = payload.len(), "queued data message");
                let payload = sanitize(&payload).into_owned();
                self.barrier.push_data(sender, payload, targets);
            }
            Message::Reset => self.reset(),
            Message::TogglePause => self.toggle_pause(),
            Message::ConnectSync { .. } | Message::ConnectAsync { .. } => {
                warn!(client_id = %sender, "ignoring repeated handshake");
            }
            Message::NextFrame { .. } => {
                warn!(client_id = %sender, "ignoring next-frame sent by a client");
            }
        }
    }

    /// Removes a session that went away.
    ///
    /// Its pending acknowledgement is forgotten, and if the remaining
    /// synchronous sessions have all acknowledged the current frame the
    /// barrier advances, exactly once.
    pub fn disconnect(&mut self, handle: SessionHandle) -> Option<ClientSession> {
        let session = self.registry.remove(handle)?;
        self.barrier.forget(session.id);
        info!(client_id = %session.id, name = %session.name, "client disconnected");

        if session.is_sync() && !self.registry.is_empty() {
            self.try_advance();
        }
        Some(session)
    }

    /// Periodic re-evaluation of the barrier.
    ///
    /// With no synchronous sessions the barrier is trivially satisfied, so
    /// asynchronous sessions keep receiving frames on every tick.
    pub fn tick(&mut self) {
        if !self.registry.is_empty() {
            self.try_advance();
        }
    }

    /// Resets the barrier and tells every session.
    pub fn reset(&mut self) {
        self.barrier.reset();
        info!(frame = self.barrier.frame(), "reset");
        self.broadcast(&Message::Reset);
    }

    /// Toggles pause and tells every session; resuming re-checks the barrier.
    pub fn toggle_pause(&mut self) {
        let paused = self.barrier.toggle_pause();
        info!(paused, frame = self.barrier.frame(), "pause toggled");
        self.broadcast(&Message::TogglePause);
        if !paused {
            self.try_advance();
        }
    }

    /// Drains the lines queued for one session.
    pub fn take_outbound(&mut self, handle: SessionHandle) -> Vec<String> {
        self.registry
            .get_mut(handle)
            .map(ClientSession::take_outbound)
            .unwrap_or_default()
    }

    /// Drains the lines queued for every session that has any.
    pub fn drain_outbound(&mut self) -> Vec<(SessionHandle, Vec<String>)> {
        self.registry
            .iter_mut()
            .filter(|(_, session)| session.outbound_len() > 0)
            .map(|(handle, session)| (handle, session.take_outbound()))
            .collect()
    }

    fn acknowledge(&mut self, id: ClientId, frame: u64) {
        let sync_ids = self.registry.sync_ids();
        match self.barrier.acknowledge(id, frame, &sync_ids) {
            Ack::Advanced(advance) => {
                self.record_ack(id, frame);
                self.fan_out(advance);
            }
            Ack::Waiting { remaining } => {
                self.record_ack(id, frame);
                trace!(client_id = %id, frame, remaining, "acknowledged");
            }
            Ack::Held => {
                self.record_ack(id, frame);
                debug!(frame, "barrier satisfied while paused");
            }
            Ack::Stale { expected } => {
                debug!(client_id = %id, frame, expected, "ignoring stale acknowledgement");
            }
            Ack::NotSync => {
                debug!(client_id = %id, "ignoring acknowledgement from a non-sync client");
            }
            Ack::Duplicate => {}
        }
    }

    fn record_ack(&mut self, id: ClientId, frame: u64) {
        if let Some(session) = self
            .registry
            .handle_of(id)
            .and_then(|handle| self.registry.get_mut(handle))
        {
            session.last_acked_frame = Some(frame);
        }
    }

    fn try_advance(&mut self) {
        let sync_ids = self.registry.sync_ids();
        if let Some(advance) = self.barrier.try_advance(&sync_ids) {
            self.fan_out(advance);
        }
    }

    /// Queues the next-frame line for every session, each with the data
    /// addressed to it.
    fn fan_out(&mut self, advance: Advance) {
        self.advances += 1;
        for (_, session) in self.registry.iter_mut() {
            let embedded = if session.receives_data() {
                advance
                    .data
                    .iter()
                    .filter(|d| d.targets.includes(session.id))
                    .map(|d| EmbeddedData::new(d.from, d.payload.clone()))
                    .collect()
            } else {
                Vec::new()
            };
            session.push_line(encode(&Message::NextFrame {
                frame: advance.frame,
                embedded,
            }));
        }
    }

    fn broadcast(&mut self, message: &Message) {
        let line = encode(message);
        for (_, session) in self.registry.iter_mut() {
            session.push_line(line.clone());
        }
    }
}
