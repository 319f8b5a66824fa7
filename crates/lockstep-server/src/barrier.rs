//! The frame barrier.
//!
//! The barrier holds the current frame number, the set of synchronous
//! clients that acknowledged it, and the data messages gathered since the
//! last advance. It advances once every synchronous client has acknowledged
//! the current frame, releasing the gathered data with the new frame number.

use std::collections::BTreeSet;

use lockstep_core::ClientId;
use lockstep_protocol::{MAX_LINE_LENGTH, Targets};
use tracing::{debug, trace, warn};

/// First frame of a run, and the frame a reset returns to.
pub const FIRST_FRAME: u64 = 1;

/// A data message waiting for the next advance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingData {
    pub from: ClientId,
    pub payload: String,
    pub targets: Targets,
}

impl PendingData {
    /// Bytes this entry adds to a next-frame line: `|<from>,<payload>`.
    pub fn encoded_len(&self) -> usize {
        2 + self.from.to_string().len() + self.payload.len()
    }
}

/// The result of an advance: the new frame and the data released with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advance {
    pub frame: u64,
    pub data: Vec<PendingData>,
}

/// What an acknowledgement did to the barrier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ack {
    /// The acknowledgement was for another frame and was dropped.
    Stale { expected: u64 },
    /// The client is not a registered synchronous session.
    NotSync,
    /// The client had already acknowledged this frame.
    Duplicate,
    /// Recorded; `remaining` clients still have to acknowledge.
    Waiting { remaining: usize },
    /// Every client has acknowledged but the barrier is paused.
    Held,
    /// The last acknowledgement arrived and the barrier advanced.
    Advanced(Advance),
}

/// Frame counter with pending acknowledgements and data.
#[derive(Debug)]
pub struct FrameBarrier {
    frame: u64,
    pending_done: BTreeSet<ClientId>,
    pending_data: Vec<PendingData>,
    paused: bool,
    max_line_len: usize,
}

impl Default for FrameBarrier {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameBarrier {
    pub fn new() -> Self {
        Self {
            frame: FIRST_FRAME,
            pending_done: BTreeSet::new(),
            pending_data: Vec::new(),
            paused: false,
            max_line_len: MAX_LINE_LENGTH,
        }
    }

    /// Bounds each next-frame line to `max_line_len` bytes, excluding the
    /// terminus. Data that does not fit waits for a later advance.
    #[must_use]
    pub fn with_max_line_len(mut self, max_line_len: usize) -> Self {
        self.max_line_len = max_line_len;
        self
    }

    /// The frame the barrier is waiting on.
    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Clients that acknowledged the current frame.
    pub fn acknowledged(&self) -> &BTreeSet<ClientId> {
        &self.pending_done
    }

    /// Number of data messages waiting for the next advance.
    pub fn pending_data_len(&self) -> usize {
        self.pending_data.len()
    }

    /// Records that `id` finished rendering `frame`.
    ///
    /// `sync_ids` is the current set of synchronous sessions.
    pub fn acknowledge(&mut self, id: ClientId, frame: u64, sync_ids: &BTreeSet<ClientId>) -> Ack {
        if frame != self.frame {
            trace!(client_id = %id, frame, expected = self.frame, "stale acknowledgement");
            return Ack::Stale {
                expected: self.frame,
            };
        }
        if !sync_ids.contains(&id) {
            return Ack::NotSync;
        }
        if !self.pending_done.insert(id) {
            return Ack::Duplicate;
        }

        match self.try_advance(sync_ids) {
            Some(advance) => Ack::Advanced(advance),
            None if self.is_satisfied(sync_ids) => Ack::Held,
            None => Ack::Waiting {
                remaining: sync_ids.len() - self.pending_done.len(),
            },
        }
    }

    /// Queues a data message for the next advance.
    pub fn push_data(&mut self, from: ClientId, payload: String, targets: Targets) {
        self.pending_data.push(PendingData {
            from,
            payload,
            targets,
        });
    }

    /// Forgets a client's acknowledgement, for a session that went away.
    pub fn forget(&mut self, id: ClientId) {
        self.pending_done.remove(&id);
    }

    /// Returns true if every synchronous client acknowledged the current frame.
    pub fn is_satisfied(&self, sync_ids: &BTreeSet<ClientId>) -> bool {
        sync_ids.is_subset(&self.pending_done)
    }

    /// Advances if the barrier is satisfied and not paused.
    pub fn try_advance(&mut self, sync_ids: &BTreeSet<ClientId>) -> Option<Advance> {
        if self.paused || !self.is_satisfied(sync_ids) {
            return None;
        }

        self.frame += 1;
        self.pending_done.clear();
        let data = self.release_data();
        debug!(
            frame = self.frame,
            data = data.len(),
            carried = self.pending_data.len(),
            "barrier advanced"
        );

        Some(Advance {
            frame: self.frame,
            data,
        })
    }

    /// Takes as much pending data, in arrival order, as fits on one
    /// next-frame line for the current frame. The rest stays queued; an
    /// entry that could never fit is dropped.
    fn release_data(&mut self) -> Vec<PendingData> {
        let capacity = self
            .max_line_len
            .saturating_sub(2 + self.frame.to_string().len());
        let mut budget = capacity;
        let mut released = Vec::new();
        let mut carried = Vec::new();

        for data in std::mem::take(&mut self.pending_data) {
            let len = data.encoded_len();
            if len > capacity {
                warn!(from = %data.from, len, capacity, "dropping data message too large for a frame line");
            } else if !carried.is_empty() || len > budget {
                carried.push(data);
            } else {
                budget -= len;
                released.push(data);
            }
        }

        self.pending_data = carried;
        released
    }

    /// Returns to [`FIRST_FRAME`], dropping pending acknowledgements and data.
    pub fn reset(&mut self) {
        self.frame = FIRST_FRAME;
        self.pending_done.clear();
        self.pending_data.clear();
    }

    /// Flips the paused flag and returns the new value.
    pub fn toggle_pause(&mut self) -> bool {
        self.paused = !self.paused;
        self.paused
    }
}
