use std::{
    collections::HashMap,
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::db::Message;

pub type Snapshot = Arc<[Message]>;

type Callback = Box<dyn Fn(Snapshot) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Default)]
pub struct Broadcaster {
    rooms: Arc<RwLock<HashMap<String, HashMap<SubscriptionId, Callback>>>>,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Callbacks must not subscribe or unsubscribe while they run.
    pub fn subscribe<F>(&self, room_name: &str, callback: F) -> SubscriptionId
    where
        F: Fn(Snapshot) + Send + Sync + 'static,
    {
        let id = SubscriptionId::new();
        self.rooms
            .write()
            .entry(room_name.to_owned())
            .or_default()
            .insert(id, Box::new(callback));

        debug!(room = room_name, %id, "subscribed");
        id
    }

    pub fn subscribe_channel(
        &self,
        room_name: &str,
    ) -> (SubscriptionId, mpsc::UnboundedReceiver<Snapshot>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.subscribe(room_name, move |snapshot| {
            // receiver gone means the connection is closing; unsubscribe follows
            let _ = tx.send(snapshot);
        });
        (id, rx)
    }

    pub fn unsubscribe(&self, room_name: &str, id: SubscriptionId) {
        let mut rooms = self.rooms.write();
        let Some(subscribers) = rooms.get_mut(room_name) else {
            return;
        };

        if subscribers.remove(&id).is_some() {
            debug!(room = room_name, %id, "unsubscribed");
        }
        if subscribers.is_empty() {
            rooms.remove(room_name);
        }
    }

    pub fn notify(&self, room_name: &str, messages: Snapshot) {
        // held across the whole pass so unsubscribe lands before or after it
        let rooms = self.rooms.read();
        let Some(subscribers) = rooms.get(room_name) else {
            return;
        };

        for (id, callback) in subscribers {
            let snapshot = Arc::clone(&messages);
            if panic::catch_unwind(AssertUnwindSafe(|| callback(snapshot))).is_err() {
                warn!(room = room_name, %id, "subscriber panicked during notify");
            }
        }
    }

    pub fn subscriber_count(&self, room_name: &str) -> usize {
        self.rooms.read().get(room_name).map_or(0, HashMap::len)
    }
}
