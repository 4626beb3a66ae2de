//! # Channel Broker
//!
//! Fans published payloads out to every connection subscribed to a channel.
//! Each connection owns one unbounded queue of encoded push frames; the
//! broker only keeps the sending halves.

use hashbrown::HashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc::UnboundedSender;

use crate::protocol::Reply;

/// Identifies one subscribed connection.
pub type SubscriberId = u64;

#[derive(Default)]
pub struct Broker {
    channels: Mutex<HashMap<Vec<u8>, HashMap<SubscriberId, UnboundedSender<Vec<u8>>>>>,
}

impl Broker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, channel: &[u8], id: SubscriberId, sender: UnboundedSender<Vec<u8>>) {
        self.channels
            .lock()
            .entry(channel.to_vec())
            .or_default()
            .insert(id, sender);
    }

    pub fn unsubscribe(&self, channel: &[u8], id: SubscriberId) {
        let mut channels = self.channels.lock();
        if let Some(subscribers) = channels.get_mut(channel) {
            subscribers.remove(&id);
            if subscribers.is_empty() {
                channels.remove(channel);
            }
        }
    }

    /// Delivers `payload` to every live subscriber; returns how many got it.
    pub fn publish(&self, channel: &[u8], payload: &[u8]) -> usize {
        let frame = Reply::bulks([b"message".to_vec(), channel.to_vec(), payload.to_vec()]).to_bytes();
        let mut channels = self.channels.lock();
        let Some(subscribers) = channels.get_mut(channel) else {
            return 0;
        };
        // Closed receivers belong to connections that went away.
        subscribers.retain(|_, sender| sender.send(frame.clone()).is_ok());
        let delivered = subscribers.len();
        if subscribers.is_empty() {
            channels.remove(channel);
        }
        delivered
    }
}
