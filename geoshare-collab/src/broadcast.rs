//! Fan-out of relay frames to N-1 channels.
//!
//! Uses a single tokio broadcast channel: a frame is encoded once and every
//! open channel gets an independent receiver. Each frame records its sender
//! so the sender's own connection can skip it on delivery.
//!
//! One channel for everybody also keeps per-sender ordering: frames from one
//! connection are sent in order and every receiver reads them in send order.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

use crate::protocol::{ParticipantId, ProtocolError, RelayMessage};

/// A pre-encoded frame travelling through the fan-out channel.
#[derive(Debug)]
pub struct RelayFrame {
    /// Channel that caused the frame.
    pub sender: ParticipantId,
    /// Encoded JSON text.
    pub text: String,
}

impl RelayFrame {
    /// Whether `identity` should receive this frame.
    pub fn is_for(&self, identity: &ParticipantId) -> bool {
        &self.sender != identity
    }
}

/// Statistics for monitoring fan-out health.
#[derive(Debug, Clone, Default)]
pub struct FanoutStats {
    pub frames_published: u64,
    pub frames_lagged: u64,
    pub open_channels: usize,
}

/// Lock-free counters for the publish path.
struct AtomicFanoutStats {
    frames_published: AtomicU64,
    frames_lagged: AtomicU64,
}

impl AtomicFanoutStats {
    fn new() -> Self {
        Self {
            frames_published: AtomicU64::new(0),
            frames_lagged: AtomicU64::new(0),
        }
    }
}

/// The set of currently open channels plus the broadcast channel feeding them.
pub struct FanoutGroup {
    sender: broadcast::Sender<Arc<RelayFrame>>,

    /// Identities of open channels
    channels: Arc<RwLock<HashSet<ParticipantId>>>,

    /// Frames buffered per receiver before it starts skipping
    capacity: usize,

    atomic_stats: Arc<AtomicFanoutStats>,
}

impl FanoutGroup {
    /// Create a fan-out group buffering up to `capacity` frames per channel.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            channels: Arc::new(RwLock::new(HashSet::new())),
            capacity: capacity.max(1),
            atomic_stats: Arc::new(AtomicFanoutStats::new()),
        }
    }

    /// Register an open channel.
    ///
    /// Returns `None` when `max_channels` are already open.
    pub async fn join(
        &self,
        identity: ParticipantId,
        max_channels: usize,
    ) -> Option<broadcast::Receiver<Arc<RelayFrame>>> {
        let mut channels = self.channels.write().await;
        if channels.len() >= max_channels {
            return None;
        }
        channels.insert(identity);
        Some(self.sender.subscribe())
    }

    /// Remove a channel. Returns whether it was open.
    pub async fn leave(&self, identity: &ParticipantId) -> bool {
        self.channels.write().await.remove(identity)
    }

    /// Encode `msg` once and hand it to every subscribed receiver.
    ///
    /// Returns the number of receivers the frame was queued for, which
    /// includes the sender's own receiver; filtering happens on delivery.
    pub fn publish(
        &self,
        sender: &ParticipantId,
        msg: &RelayMessage,
    ) -> Result<usize, ProtocolError> {
        let frame = Arc::new(RelayFrame {
            sender: sender.clone(),
            text: msg.encode()?,
        });
        // Err only means nobody is subscribed.
        let count = self.sender.send(frame).unwrap_or(0);
        self.atomic_stats.frames_published.fetch_add(1, Ordering::Relaxed);
        Ok(count)
    }

    /// Record frames a slow receiver skipped.
    pub fn record_lag(&self, skipped: u64) {
        self.atomic_stats.frames_lagged.fetch_add(skipped, Ordering::Relaxed);
    }

    pub async fn channel_count(&self) -> usize {
        self.channels.read().await.len()
    }

    pub async fn contains(&self, identity: &ParticipantId) -> bool {
        self.channels.read().await.contains(identity)
    }

    pub async fn stats(&self) -> FanoutStats {
        FanoutStats {
            frames_published: self.atomic_stats.frames_published.load(Ordering::Relaxed),
            frames_lagged: self.atomic_stats.frames_lagged.load(Ordering::Relaxed),
            open_channels: self.channels.read().await.len(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
