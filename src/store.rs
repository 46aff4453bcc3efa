use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
};

use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::{
    broadcast::{Broadcaster, Snapshot},
    db::{Message, Room, RoomSummary},
};

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum StoreError {
    #[error("room not found")]
    NotFound,

    #[error("room name is taken")]
    NameTaken,
}

#[derive(Default)]
struct Rooms {
    rooms: HashMap<String, RoomEntry>,
    last_message_id: u64,
}

#[derive(Default)]
struct RoomEntry {
    messages: Vec<Message>,
    outbox: Arc<Outbox>,
}

// Lists waiting to be handed to the broadcaster, in id order. They are queued
// under the store lock and delivered after it is released.
#[derive(Default)]
struct Outbox {
    pending: Mutex<VecDeque<Snapshot>>,
    dispatching: Mutex<()>,
}

impl Outbox {
    fn push(&self, snapshot: Snapshot) {
        self.pending.lock().push_back(snapshot);
    }

    fn pop(&self) -> Option<Snapshot> {
        self.pending.lock().pop_front()
    }

    // One dispatcher per room at a time. Anyone who finds `dispatching` taken
    // (including a callback appending to its own room) leaves its list queued
    // for the current holder, who checks again after letting go.
    fn drain(&self, room_name: &str, broadcaster: &Broadcaster) {
        loop {
            let Some(dispatching) = self.dispatching.try_lock() else {
                return;
            };
            while let Some(snapshot) = self.pop() {
                broadcaster.notify(room_name, snapshot);
            }
            drop(dispatching);

            if self.pending.lock().is_empty() {
                return;
            }
        }
    }
}

#[derive(Clone, Default)]
pub struct Store {
    inner: Arc<RwLock<Rooms>>,
    broadcaster: Broadcaster,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    /// Repeated names are skipped.
    pub fn with_rooms<I>(names: I) -> Self
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let store = Self::new();
        for name in names {
            let name = name.as_ref();
            if store.create_room(name).is_err() {
                warn!(room = name, "skipping duplicate seed room");
            }
        }
        store
    }

    pub fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    pub fn list_rooms(&self) -> Vec<RoomSummary> {
        let inner = self.inner.read();
        let mut names: Vec<&String> = inner.rooms.keys().collect();
        names.sort();
        names
            .into_iter()
            .map(|name| RoomSummary { name: name.clone() })
            .collect()
    }

    pub fn get_room(&self, name: &str) -> Result<Room, StoreError> {
        let inner = self.inner.read();
        let room = inner.rooms.get(name).ok_or(StoreError::NotFound)?;
        Ok(Room {
            name: name.to_owned(),
            messages: room.messages.clone(),
        })
    }

    pub fn create_room(&self, name: &str) -> Result<Room, StoreError> {
        let mut inner = self.inner.write();
        if inner.rooms.contains_key(name) {
            return Err(StoreError::NameTaken);
        }
        inner.rooms.insert(name.to_owned(), RoomEntry::default());
        drop(inner);

        info!(room = name, "created room");
        Ok(Room {
            name: name.to_owned(),
            messages: Vec::new(),
        })
    }

    pub fn append_message(
        &self,
        room_name: &str,
        sender_name: impl Into<String>,
        body: impl Into<String>,
    ) -> Result<Message, StoreError> {
        // id, timestamp, push and queueing the list are one critical section
        let (message, outbox) = {
            let mut guard = self.inner.write();
            let inner = &mut *guard;
            let room = inner.rooms.get_mut(room_name).ok_or(StoreError::NotFound)?;

            inner.last_message_id += 1;
            let message = Message {
                id: inner.last_message_id,
                sender_name: sender_name.into(),
                sent_at: OffsetDateTime::now_utc(),
                body: body.into(),
            };
            room.messages.push(message.clone());
            room.outbox.push(Arc::from(room.messages.as_slice()));

            (message, Arc::clone(&room.outbox))
        };

        outbox.drain(room_name, &self.broadcaster);

        debug!(room = room_name, id = message.id, "appended message");
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashSet,
        sync::{Arc, Mutex},
        thread,
    };

    use super::*;

    #[test]
    fn general_room_walkthrough() {
        let store = Store::new();

        assert!(store.create_room("General").is_ok());
        assert_eq!(store.create_room("General"), Err(StoreError::NameTaken));

        let first = store.append_message("General", "alice", "hi").unwrap();
        assert_eq!(first.id, 1);
        assert_eq!(first.sender_name, "alice");
        assert_eq!(first.body, "hi");

        let second = store.append_message("General", "bob", "yo").unwrap();
        assert_eq!(second.id, 2);
        assert!(second.sent_at >= first.sent_at);

        let room = store.get_room("General").unwrap();
        assert_eq!(room.messages, vec![first, second]);

        assert_eq!(
            store.append_message("Nonexistent", "alice", "hi"),
            Err(StoreError::NotFound)
        );
    }

    #[test]
    fn get_room_missing_is_not_found() {
        let store = Store::new();
        assert_eq!(store.get_room("General"), Err(StoreError::NotFound));
    }

    #[test]
    fn failed_append_allocates_no_id() {
        let store = Store::new();
        store.create_room("General").unwrap();

        assert!(store.append_message("Nowhere", "alice", "lost").is_err());
        assert!(store.append_message("Nowhere", "alice", "lost").is_err());

        let message = store.append_message("General", "alice", "hi").unwrap();
        assert_eq!(message.id, 1);
    }

    #[test]
    fn ids_are_global_across_rooms() {
        let store = Store::with_rooms(["General", "Random"]);

        let a = store.append_message("General", "alice", "one").unwrap();
        let b = store.append_message("Random", "bob", "two").unwrap();
        let c = store.append_message("General", "alice", "three").unwrap();

        assert_eq!((a.id, b.id, c.id), (1, 2, 3));
    }

    #[test]
    fn list_rooms_is_sorted_and_names_only() {
        let store = Store::with_rooms(["Random", "General", "Random"]);
        store.append_message("General", "alice", "hi").unwrap();

        let names: Vec<String> = store.list_rooms().into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["General", "Random"]);
    }

    #[test]
    fn concurrent_creates_admit_one_winner() {
        let store = Store::new();
        let wins = thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| s.spawn(|| store.create_room("X").is_ok()))
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .filter(|won| *won)
                .count()
        });

        assert_eq!(wins, 1);
        assert_eq!(store.list_rooms().len(), 1);
    }

    #[test]
    fn concurrent_appends_never_share_an_id() {
        let rooms = ["General", "Random", "Rust"];
        let store = Store::with_rooms(rooms);

        let ids = thread::scope(|s| {
            let handles: Vec<_> = (0..12)
                .map(|worker| {
                    let store = &store;
                    let room = rooms[worker % rooms.len()];
                    s.spawn(move || {
                        (0..100)
                            .map(|n| store.append_message(room, "w", format!("{n}")).unwrap().id)
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            handles
                .into_iter()
                .flat_map(|h| h.join().unwrap())
                .collect::<Vec<_>>()
        });

        let unique: HashSet<u64> = ids.iter().copied().collect();
        assert_eq!(unique.len(), 1200);
        assert_eq!(unique.iter().max(), Some(&1200));

        for room in rooms {
            let stored: Vec<u64> = store.get_room(room).unwrap().messages.iter().map(|m| m.id).collect();
            assert_eq!(stored.len(), 400);
            assert!(stored.windows(2).all(|w| w[0] < w[1]), "{room} out of order");
        }
    }

    #[test]
    fn append_notifies_subscribers_with_full_list() {
        let store = Store::with_rooms(["General", "Random"]);
        let calls: Arc<Mutex<Vec<Vec<u64>>>> = Arc::default();
        let seen = Arc::clone(&calls);
        let id = store.broadcaster().subscribe("General", move |messages| {
            seen.lock().unwrap().push(messages.iter().map(|m| m.id).collect());
        });

        let first = store.append_message("General", "alice", "hi").unwrap();
        store.append_message("Random", "bob", "elsewhere").unwrap();
        assert_eq!(*calls.lock().unwrap(), vec![vec![first.id]]);

        store.broadcaster().unsubscribe("General", id);
        store.append_message("General", "alice", "anyone?").unwrap();
        assert_eq!(calls.lock().unwrap().len(), 1);
    }

    #[test]
    fn panicking_subscriber_does_not_fail_the_append() {
        let store = Store::with_rooms(["General"]);
        store.broadcaster().subscribe("General", |_| panic!("sink exploded"));

        let message = store.append_message("General", "alice", "hi").unwrap();
        assert_eq!(message.id, 1);
        assert_eq!(store.get_room("General").unwrap().messages.len(), 1);
    }

    #[test]
    fn channel_subscribers_see_lists_in_id_order() {
        let store = Store::with_rooms(["General"]);
        let (_, mut rx) = store.broadcaster().subscribe_channel("General");

        thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    for _ in 0..25 {
                        store.append_message("General", "alice", "hi").unwrap();
                    }
                });
            }
        });

        let mut last_len = 0;
        while let Ok(snapshot) = rx.try_recv() {
            assert_eq!(snapshot.len(), last_len + 1);
            last_len = snapshot.len();
        }
        assert_eq!(last_len, 100);
    }

    #[test]
    fn subscribers_may_read_the_store() {
        let store = Store::with_rooms(["General"]);
        let reader = store.clone();
        let seen: Arc<Mutex<Vec<usize>>> = Arc::default();
        let sink = Arc::clone(&seen);
        store.broadcaster().subscribe("General", move |_| {
            let room = reader.get_room("General").unwrap();
            reader.list_rooms();
            sink.lock().unwrap().push(room.messages.len());
        });

        let (tx, rx) = std::sync::mpsc::channel();
        let writer = store.clone();
        thread::spawn(move || {
            let _ = tx.send(writer.append_message("General", "alice", "hi"));
        });

        let appended = rx
            .recv_timeout(std::time::Duration::from_secs(3))
            .expect("append did not finish");
        assert_eq!(appended.unwrap().id, 1);
        assert_eq!(*seen.lock().unwrap(), vec![1]);
    }

    #[test]
    fn subscriber_appending_to_its_own_room_keeps_order() {
        let store = Store::with_rooms(["General"]);
        let writer = store.clone();
        let lists: Arc<Mutex<Vec<Vec<u64>>>> = Arc::default();
        let sink = Arc::clone(&lists);
        store.broadcaster().subscribe("General", move |messages| {
            sink.lock().unwrap().push(messages.iter().map(|m| m.id).collect());
            if messages.len() == 1 {
                writer.append_message("General", "bot", "echo").unwrap();
            }
        });

        store.append_message("General", "alice", "hi").unwrap();

        assert_eq!(*lists.lock().unwrap(), vec![vec![1], vec![1, 2]]);
        assert_eq!(store.get_room("General").unwrap().messages.len(), 2);
    }
}
