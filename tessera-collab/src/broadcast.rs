//! Fan-out of encoded server frames to every subscribed session.
//!
//! One tokio broadcast channel per document. Each session holds its own
//! receiver buffering up to `capacity` frames; a session that falls further
//! behind sees `RecvError::Lagged` and is closed by its connection task.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;

use crate::protocol::{ProtocolError, ServerMessage};

/// Encoded JSON text frame shared by all receivers.
pub type Frame = Arc<String>;

/// Statistics for monitoring broadcast health.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastStats {
    pub messages_sent: u64,
    /// Frames sent while nobody was subscribed.
    pub messages_unheard: u64,
    pub receivers: usize,
}

#[derive(Default)]
struct AtomicBroadcastStats {
    messages_sent: AtomicU64,
    messages_unheard: AtomicU64,
}

pub struct BroadcastGroup {
    sender: broadcast::Sender<Frame>,
    capacity: usize,
    stats: AtomicBroadcastStats,
}

impl BroadcastGroup {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            capacity,
            stats: AtomicBroadcastStats::default(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Frame> {
        self.sender.subscribe()
    }

    /// Encode once and send to every receiver, including the originator.
    ///
    /// Returns the number of receivers the frame was queued for.
    pub fn broadcast(&self, msg: &ServerMessage) -> Result<usize, ProtocolError> {
        let frame = Arc::new(msg.encode()?);
        Ok(self.broadcast_raw(frame))
    }

    /// Send a pre-encoded frame.
    pub fn broadcast_raw(&self, frame: Frame) -> usize {
        self.stats.messages_sent.fetch_add(1, Ordering::Relaxed);
        match self.sender.send(frame) {
            Ok(count) => count,
            Err(_) => {
                self.stats.messages_unheard.fetch_add(1, Ordering::Relaxed);
                0
            }
        }
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            messages_sent: self.stats.messages_sent.load(Ordering::Relaxed),
            messages_unheard: self.stats.messages_unheard.load(Ordering::Relaxed),
            receivers: self.receiver_count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Delta, SessionId};
    use tokio::sync::broadcast::error::RecvError;

    #[tokio::test]
    async fn test_fan_out_includes_every_receiver() {
        let group = BroadcastGroup::new(16);
        let mut rx1 = group.subscribe();
        let mut rx2 = group.subscribe();
        let mut rx3 = group.subscribe();

        let msg = ServerMessage::Draw(vec![Delta::new(1, 2)]);
        assert_eq!(group.broadcast(&msg).unwrap(), 3);

        let expected = msg.encode().unwrap();
        for rx in [&mut rx1, &mut rx2, &mut rx3] {
            assert_eq!(*rx.recv().await.unwrap(), expected);
        }
    }

    #[tokio::test]
    async fn test_raw_frames_shared() {
        let group = BroadcastGroup::new(4);
        let mut rx = group.subscribe();
        let frame: Frame = Arc::new(r#"["part","x"]"#.to_string());
        group.broadcast_raw(frame.clone());
        assert!(Arc::ptr_eq(&rx.recv().await.unwrap(), &frame));
    }

    #[tokio::test]
    async fn test_stats() {
        let group = BroadcastGroup::new(16);
        let msg = ServerMessage::Part {
            session_id: SessionId::new(),
        };
        group.broadcast(&msg).unwrap();
        let _rx = group.subscribe();
        group.broadcast(&msg).unwrap();

        let stats = group.stats();
        assert_eq!(stats.messages_sent, 2);
        assert_eq!(stats.messages_unheard, 1);
        assert_eq!(stats.receivers, 1);
    }

    #[tokio::test]
    async fn test_slow_receiver_lags() {
        let group = BroadcastGroup::new(2);
        assert_eq!(group.capacity(), 2);
        let mut rx = group.subscribe();
        for i in 0..5u32 {
            group
                .broadcast(&ServerMessage::Draw(vec![Delta::new(i, 0)]))
                .unwrap();
        }
        assert!(matches!(rx.recv().await, Err(RecvError::Lagged(3))));
    }
}
