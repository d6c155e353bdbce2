//! Per-session set of viewer channels that output is fanned out to.

use std::collections::HashMap;

use bytes::Bytes;
use tokio::sync::mpsc;

/// What a session delivers to each attached viewer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Output(Bytes),
    /// Terminal event; nothing follows it.
    Exit { exit_code: Option<u32> },
}

pub type Subscriber = mpsc::UnboundedSender<SessionEvent>;
pub type SubscriberStream = mpsc::UnboundedReceiver<SessionEvent>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl std::fmt::Display for ListenerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Sending halves of every attached viewer's channel.
///
/// The receiving half belongs to the viewer; dropping it is how a viewer
/// goes away, and broadcast prunes such entries instead of failing.
#[derive(Debug, Default)]
pub struct ListenerRegistry {
    subscribers: HashMap<ListenerId, Subscriber>,
    next_id: u64,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&mut self, subscriber: Subscriber) -> ListenerId {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        self.subscribers.insert(id, subscriber);
        id
    }

    /// Returns whether the listener was attached.
    pub fn detach(&mut self, id: ListenerId) -> bool {
        self.subscribers.remove(&id).is_some()
    }

    /// Deliver to every subscriber. Returns how many received the event.
    pub fn broadcast(&mut self, event: &SessionEvent) -> usize {
        let mut dead = Vec::new();
        for (id, subscriber) in &self.subscribers {
            if subscriber.send(event.clone()).is_err() {
                dead.push(*id);
            }
        }
        for id in &dead {
            self.subscribers.remove(id);
        }
        self.subscribers.len()
    }

    /// Send a final event to everyone and drop all senders, which ends each
    /// viewer's channel.
    pub fn close(&mut self, last: &SessionEvent) {
        for subscriber in self.subscribers.values() {
            let _ = subscriber.send(last.clone());
        }
        self.subscribers.clear();
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }
}
