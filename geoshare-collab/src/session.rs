//! Client session: the single event loop that owns the presence registry.
//!
//! ```text
//! ChannelEvent (relay) ──┐
//! FixOutcome (publisher) ─┼──► Session (tokio::select!) ──► SessionUpdate
//! reaper tick ───────────┘          │
//!                                   └── PresenceRegistry (only mutator)
//! ```
//!
//! Every input is handled to completion before the next one is looked at, so
//! read-then-write registry operations never interleave. The synchronous
//! `handle_*` methods are the whole state machine; `run` only feeds them.

use std::time::Instant;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use crate::client::{ChannelEvent, TransportHandle};
use crate::config::ClientConfig;
use crate::presence::{Participant, PresenceChange, PresenceRegistry};
use crate::protocol::Position;
use crate::publisher::{FixOutcome, PositioningError};
use crate::reaper::StalenessReaper;

/// Indicators shown to the user.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionStatus {
    /// The relay channel is open and has assigned an identity.
    pub connected: bool,
    /// The last fix succeeded and the channel has not dropped since.
    pub tracking_active: bool,
    /// Most recent positioning failure, cleared by the next good fix.
    pub tracking_error: Option<PositioningError>,
}

/// Output of the session for the presentation layer.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionUpdate {
    Presence(PresenceChange),
    Status(SessionStatus),
}

/// Per-client context: registry, reaper policy, transport and status.
pub struct Session {
    registry: PresenceRegistry,
    reaper: StalenessReaper,
    transport: TransportHandle,
    status: SessionStatus,
    /// Fix that arrived before the relay assigned an identity.
    pending_fix: Option<(Position, Instant)>,
}

impl Session {
    pub fn new(config: &ClientConfig, transport: TransportHandle) -> Self {
        Self {
            registry: PresenceRegistry::new(),
            reaper: StalenessReaper::with_threshold(
                config.reap_interval(),
                config.liveness_threshold(),
            ),
            transport,
            status: SessionStatus::default(),
            pending_fix: None,
        }
    }

    pub fn registry(&self) -> &PresenceRegistry {
        &self.registry
    }

    pub fn status(&self) -> &SessionStatus {
        &self.status
    }

    pub fn snapshot(&self) -> Vec<Participant> {
        self.registry.snapshot()
    }

    pub fn reaper(&self) -> &StalenessReaper {
        &self.reaper
    }

    /// Apply one transport event.
    pub fn handle_channel_event(&mut self, event: ChannelEvent, now: Instant) -> Vec<SessionUpdate> {
        let mut updates = Vec::new();
        match event {
            ChannelEvent::Connected { identity } => {
                log::info!("Joined relay as {identity}");
                let rekeyed = self.registry.set_local(identity.clone());
                updates.extend(rekeyed.into_iter().map(SessionUpdate::Presence));

                if let Some((position, at)) = self.pending_fix.take() {
                    self.transport.send_location(position);
                    let change = self.registry.upsert(identity, position, at);
                    updates.push(SessionUpdate::Presence(change));
                } else if let Some(local) = self.registry.local() {
                    // Let the others see us again without waiting for the next fix.
                    self.transport.send_location(local.position);
                }

                let mut status = self.status.clone();
                status.connected = true;
                self.set_status(status, &mut updates);
            }

            ChannelEvent::Location { identity, position } => {
                log::trace!("{identity} at ({}, {})", position.latitude(), position.longitude());
                let change = self.registry.upsert(identity, position, now);
                updates.push(SessionUpdate::Presence(change));
            }

            ChannelEvent::ParticipantLeft { identity } => {
                if let Some(change) = self.registry.remove(&identity) {
                    log::info!("{identity} left");
                    updates.push(SessionUpdate::Presence(change));
                }
            }

            ChannelEvent::Disconnected => {
                log::warn!("Relay connection lost");
                let status = SessionStatus {
                    connected: false,
                    tracking_active: false,
                    tracking_error: self.status.tracking_error.clone(),
                };
                self.set_status(status, &mut updates);
            }
        }
        updates
    }

    /// Apply one positioning outcome.
    ///
    /// A good fix is published on the channel and upserted as the local
    /// participant. A failure only changes the status; the last known local
    /// position stays in the registry.
    pub fn handle_fix(&mut self, outcome: FixOutcome, now: Instant) -> Vec<SessionUpdate> {
        let mut updates = Vec::new();
        match outcome {
            Ok(position) => {
                self.transport.send_location(position);
                match self.registry.local_id().cloned() {
                    Some(identity) => {
                        let change = self.registry.upsert(identity, position, now);
                        updates.push(SessionUpdate::Presence(change));
                    }
                    None => self.pending_fix = Some((position, now)),
                }
                let status = SessionStatus {
                    connected: self.status.connected,
                    tracking_active: true,
                    tracking_error: None,
                };
                self.set_status(status, &mut updates);
            }
            Err(error) => {
                let status = SessionStatus {
                    connected: self.status.connected,
                    tracking_active: false,
                    tracking_error: Some(error),
                };
                self.set_status(status, &mut updates);
            }
        }
        updates
    }

    /// Run one staleness sweep.
    pub fn reap(&mut self, now: Instant) -> Vec<SessionUpdate> {
        self.reaper
            .sweep(&mut self.registry, now)
            .into_iter()
            .map(SessionUpdate::Presence)
            .collect()
    }

    fn set_status(&mut self, status: SessionStatus, updates: &mut Vec<SessionUpdate>) {
        if status != self.status {
            self.status = status.clone();
            updates.push(SessionUpdate::Status(status));
        }
    }

    /// Drive the session until the channel closes or `updates` is dropped.
    /// Returns the session for inspection.
    pub async fn run(
        mut self,
        mut channel: mpsc::Receiver<ChannelEvent>,
        mut fixes: mpsc::Receiver<FixOutcome>,
        updates: mpsc::Sender<SessionUpdate>,
    ) -> Self {
        let period = self.reaper.interval();
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut fixes_open = true;

        loop {
            let batch = tokio::select! {
                event = channel.recv() => match event {
                    Some(event) => self.handle_channel_event(event, now()),
                    None => break,
                },
                fix = fixes.recv(), if fixes_open => match fix {
                    Some(fix) => self.handle_fix(fix, now()),
                    None => {
                        fixes_open = false;
                        Vec::new()
                    }
                },
                _ = ticker.tick() => self.reap(now()),
                _ = updates.closed() => {
                    log::debug!("Session observer gone; stopping");
                    return self;
                }
            };

            for update in batch {
                if updates.send(update).await.is_err() {
                    log::debug!("Session observer gone; stopping");
                    return self;
                }
            }
        }

        log::info!("Session ended with {} participant(s)", self.registry.len());
        self
    }
}

/// Current time on the tokio clock, so paused-time tests see the same clock
/// as the ticker.
fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}
