//! Connected client sessions.
//!
//! Sessions live in a generational arena. A [`SessionHandle`] names a slot
//! together with the generation it was issued for, so an event from a
//! connection that has already been torn down cannot reach a session that
//! later reused the same slot.

use std::collections::{BTreeSet, HashMap, VecDeque};

use lockstep_core::{ClientId, SyncMode};
use lockstep_protocol::Message;

use crate::error::{ServerError, ServerResult};

/// Stable reference to a registered session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionHandle {
    index: u32,
    generation: u32,
}

/// Coordinator-side view of one connected client.
#[derive(Debug)]
pub struct ClientSession {
    /// Id announced in the handshake.
    pub id: ClientId,
    /// Display name announced in the handshake.
    pub name: String,
    /// Whether the barrier waits on this client.
    pub mode: SyncMode,
    /// Async clients only receive data messages when this is set.
    pub wants_data: bool,
    /// Highest frame this client acknowledged, if any.
    pub last_acked_frame: Option<u64>,
    outbound: VecDeque<String>,
}

impl ClientSession {
    /// Builds a session from a connect message.
    ///
    /// Returns `None` for any other message.
    pub fn from_handshake(message: &Message) -> Option<Self> {
        let (id, name, mode, wants_data) = match message {
            Message::ConnectSync { client_id, name } => (*client_id, name, SyncMode::Sync, true),
            Message::ConnectAsync {
                client_id,
                name,
                wants_data,
            } => (*client_id, name, SyncMode::Async, *wants_data),
            _ => return None,
        };
        Some(Self {
            id,
            name: name.clone(),
            mode,
            wants_data,
            last_acked_frame: None,
            outbound: VecDeque::new(),
        })
    }

    /// Returns true if the barrier waits on this session.
    pub fn is_sync(&self) -> bool {
        self.mode.is_sync()
    }

    /// Returns true if data messages are delivered to this session.
    pub fn receives_data(&self) -> bool {
        self.is_sync() || self.wants_data
    }

    /// Queues an encoded line for delivery.
    pub fn push_line(&mut self, line: String) {
        self.outbound.push_back(line);
    }

    /// Number of lines waiting for delivery.
    pub fn outbound_len(&self) -> usize {
        self.outbound.len()
    }

    /// Drains the lines waiting for delivery, oldest first.
    pub fn take_outbound(&mut self) -> Vec<String> {
        self.outbound.drain(..).collect()
    }
}

#[derive(Debug)]
enum Slot {
    Occupied {
        generation: u32,
        session: ClientSession,
    },
    Free {
        generation: u32,
    },
}

impl Slot {
    fn generation(&self) -> u32 {
        match self {
            Slot::Occupied { generation, .. } | Slot::Free { generation } => *generation,
        }
    }
}

/// Arena of sessions with an index by client id.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    slots: Vec<Slot>,
    free: Vec<u32>,
    by_id: HashMap<ClientId, SessionHandle>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of registered sessions.
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Registers a session.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::DuplicateClient`] if a session with the same
    /// client id is already registered; the registry is left unchanged.
    pub fn insert(&mut self, session: ClientSession) -> ServerResult<SessionHandle> {
        if self.by_id.contains_key(&session.id) {
            return Err(ServerError::DuplicateClient { id: session.id });
        }

        let id = session.id;
        let handle = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                let generation = slot.generation().wrapping_add(1);
                *slot = Slot::Occupied {
                    generation,
                    session,
                };
                SessionHandle { index, generation }
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot::Occupied {
                    generation: 0,
                    session,
                });
                SessionHandle {
                    index,
                    generation: 0,
                }
            }
        };

        self.by_id.insert(id, handle);
        Ok(handle)
    }

    /// Removes a session, returning it if the handle was still live.
    pub fn remove(&mut self, handle: SessionHandle) -> Option<ClientSession> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        match slot {
            Slot::Occupied { generation, .. } if *generation == handle.generation => {}
            _ => return None,
        }

        let old = std::mem::replace(
            slot,
            Slot::Free {
                generation: handle.generation,
            },
        );
        self.free.push(handle.index);

        match old {
            Slot::Occupied { session, .. } => {
                self.by_id.remove(&session.id);
                Some(session)
            }
            Slot::Free { .. } => None,
        }
    }

    pub fn get(&self, handle: SessionHandle) -> Option<&ClientSession> {
        match self.slots.get(handle.index as usize)? {
            Slot::Occupied {
                generation,
                session,
            } if *generation == handle.generation => Some(session),
            _ => None,
        }
    }

    pub fn get_mut(&mut self, handle: SessionHandle) -> Option<&mut ClientSession> {
        match self.slots.get_mut(handle.index as usize)? {
            Slot::Occupied {
                generation,
                session,
            } if *generation == handle.generation => Some(session),
            _ => None,
        }
    }

    /// Looks up the handle of a registered client id.
    pub fn handle_of(&self, id: ClientId) -> Option<SessionHandle> {
        self.by_id.get(&id).copied()
    }

    /// Iterates over live sessions.
    fn iter(&self) -> impl Iterator<Item = (SessionHandle, &ClientSession)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| match slot {
            Slot::Occupied {
                generation,
                session,
            } => Some((
                SessionHandle {
                    index: index as u32,
                    generation: *generation,
                },
                session,
            )),
            Slot::Free { .. } => None,
        })
    }

    /// Iterates mutably over live sessions.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (SessionHandle, &mut ClientSession)> {
        self.slots
            .iter_mut()
            .enumerate()
            .filter_map(|(index, slot)| match slot {
                Slot::Occupied {
                    generation,
                    session,
                } => Some((
                    SessionHandle {
                        index: index as u32,
                        generation: *generation,
                    },
                    session,
                )),
                Slot::Free { .. } => None,
            })
    }

    /// Ids of every registered synchronous session.
    pub fn sync_ids(&self) -> BTreeSet<ClientId> {
        self.iter()
            .filter(|(_, session)| session.is_sync())
            .map(|(_, session)| session.id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sync(id: u32) -> ClientSession {
        ClientSession::from_handshake(&Message::ConnectSync {
            client_id: ClientId(id),
            name: format!("wall {id}"),
        })
        .unwrap()
    }

    fn watcher(id: u32, wants_data: bool) -> ClientSession {
        ClientSession::from_handshake(&Message::ConnectAsync {
            client_id: ClientId(id),
            name: "console".into(),
            wants_data,
        })
        .unwrap()
    }

    #[test]
    fn only_connect_messages_build_sessions() {
        assert!(ClientSession::from_handshake(&Message::Reset).is_none());
        assert!(ClientSession::from_handshake(&Message::next_frame(1)).is_none());
    }

    #[test]
    fn data_delivery_follows_mode() {
        assert!(sync(1).receives_data());
        assert!(watcher(2, true).receives_data());
        assert!(!watcher(3, false).receives_data());
    }

    #[test]
    fn insert_and_lookup() {
        let mut registry = SessionRegistry::new();
        let handle = registry.insert(sync(4)).unwrap();

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.handle_of(ClientId(4)), Some(handle));
        assert_eq!(registry.get(handle).unwrap().name, "wall 4");
    }

    #[test]
    fn duplicate_id_is_rejected() {
        let mut registry = SessionRegistry::new();
        registry.insert(sync(1)).unwrap();

        let err = registry.insert(watcher(1, true)).unwrap_err();
        assert!(matches!(err, ServerError::DuplicateClient { id } if id == ClientId(1)));
        assert_eq!(registry.len(), 1);
        let kept = registry.handle_of(ClientId(1)).unwrap();
        assert!(registry.get(kept).unwrap().is_sync());
    }

    #[test]
    fn stale_handle_does_not_reach_reused_slot() {
        let mut registry = SessionRegistry::new();
        let first = registry.insert(sync(1)).unwrap();
        assert!(registry.remove(first).is_some());

        let second = registry.insert(sync(2)).unwrap();
        assert_ne!(first, second);
        assert!(registry.get(first).is_none());
        assert!(registry.remove(first).is_none());
        assert_eq!(registry.get(second).unwrap().id, ClientId(2));
    }

    #[test]
    fn removed_id_can_register_again() {
        let mut registry = SessionRegistry::new();
        let handle = registry.insert(sync(1)).unwrap();
        registry.remove(handle);

        assert!(registry.is_empty());
        assert!(registry.insert(sync(1)).is_ok());
    }

    #[test]
    fn sync_ids_skip_async_sessions() {
        let mut registry = SessionRegistry::new();
        registry.insert(sync(1)).unwrap();
        registry.insert(watcher(2, true)).unwrap();
        registry.insert(sync(3)).unwrap();

        let ids: Vec<u32> = registry.sync_ids().into_iter().map(ClientId::get).collect();
        assert_eq!(ids, vec![1, 3]);
    }

    #[test]
    fn outbound_queue_drains_in_order() {
        let mut session = sync(1);
        session.push_line("G|1\n".into());
        session.push_line("R\n".into());
        assert_eq!(session.outbound_len(), 2);
        assert_eq!(session.take_outbound(), vec!["G|1\n", "R\n"]);
        assert_eq!(session.outbound_len(), 0);
    }
}
