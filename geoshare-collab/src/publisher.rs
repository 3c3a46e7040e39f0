//! Self-location publisher: turns a positioning source into position fixes
//! for the local session.
//!
//! ```text
//! PositionSource::watch() ──► SelfLocationPublisher (per-fix timeout)
//!                                   │  FixOutcome
//!                                   ▼
//!                             Session::handle_fix()
//!                               ├── TransportHandle::send_location()
//!                               └── PresenceRegistry::upsert(local)
//! ```
//!
//! The session applies the fix; the publisher only acquires fixes and
//! reports failures. A failure never ends the watch.

use futures_util::stream::{self, BoxStream};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::protocol::Position;

/// Options handed to the positioning source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PositioningOptions {
    pub high_accuracy: bool,
    /// Oldest cached fix the source may return; zero means always fresh.
    pub maximum_age_ms: u64,
    /// A fix attempt taking longer than this is reported as a timeout.
    pub timeout_ms: u64,
}

impl Default for PositioningOptions {
    fn default() -> Self {
        Self {
            high_accuracy: true,
            maximum_age_ms: 0,
            timeout_ms: 10_000,
        }
    }
}

impl PositioningOptions {
    /// Per-fix timeout; never zero.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.max(1))
    }

    pub fn maximum_age(&self) -> Duration {
        Duration::from_millis(self.maximum_age_ms)
    }
}

/// Why a fix could not be obtained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PositioningError {
    PermissionDenied,
    PositionUnavailable(String),
    Timeout,
}

impl fmt::Display for PositioningError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PermissionDenied => write!(f, "Location permission denied"),
            Self::PositionUnavailable(reason) => write!(f, "Position unavailable: {reason}"),
            Self::Timeout => write!(f, "Position fix timed out"),
        }
    }
}

impl std::error::Error for PositioningError {}

pub type FixOutcome = Result<Position, PositioningError>;

pub type FixStream = BoxStream<'static, FixOutcome>;

/// A continuous positioning capability.
pub trait PositionSource: Send {
    /// Start watching; the stream yields one outcome per fix attempt.
    ///
    /// Sources backed by real positioning hardware must honour
    /// `high_accuracy` and `maximum_age`. The timeout is applied by the
    /// publisher. `ChannelSource` and `RouteSource` have no accuracy mode or
    /// fix cache, so they ignore both.
    fn watch(&mut self, options: &PositioningOptions) -> FixStream;
}

// ───────────────────────────────────────────────────────────────────
// Sources
// ───────────────────────────────────────────────────────────────────

/// Source fed from an mpsc channel, for embedders that own the positioning
/// hardware (and for tests).
pub struct ChannelSource {
    rx: Option<mpsc::Receiver<FixOutcome>>,
}

impl ChannelSource {
    pub fn new(buffer: usize) -> (mpsc::Sender<FixOutcome>, Self) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (tx, Self { rx: Some(rx) })
    }
}

impl PositionSource for ChannelSource {
    fn watch(&mut self, _options: &PositioningOptions) -> FixStream {
        match self.rx.take() {
            Some(rx) => stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|fix| (fix, rx))
            })
            .boxed(),
            None => {
                log::warn!("ChannelSource watched twice; second watch yields nothing");
                stream::empty().boxed()
            }
        }
    }
}

/// Source that loops over a fixed list of waypoints at a steady cadence.
pub struct RouteSource {
    waypoints: Vec<Position>,
    cadence: Duration,
}

impl RouteSource {
    pub fn new(waypoints: Vec<Position>, cadence: Duration) -> Self {
        Self { waypoints, cadence }
    }

    /// A closed square of side `span_deg` degrees starting at `origin`.
    pub fn square(origin: Position, span_deg: f64, cadence: Duration) -> Self {
        let (lat, lon) = (origin.latitude(), origin.longitude());
        let corners = [
            (lat, lon),
            (lat + span_deg, lon),
            (lat + span_deg, lon + span_deg),
            (lat, lon + span_deg),
        ];
        let waypoints = corners
            .iter()
            .filter_map(|&(la, lo)| Position::new(la, lo).ok())
            .collect();
        Self::new(waypoints, cadence)
    }
}

impl PositionSource for RouteSource {
    fn watch(&mut self, _options: &PositioningOptions) -> FixStream {
        if self.waypoints.is_empty() {
            return stream::once(async {
                Err(PositioningError::PositionUnavailable(
                    "route has no waypoints".to_string(),
                ))
            })
            .boxed();
        }

        let waypoints = self.waypoints.clone();
        let cadence = self.cadence;
        stream::unfold(0usize, move |index| {
            let waypoints = waypoints.clone();
            async move {
                if index > 0 {
                    tokio::time::sleep(cadence).await;
                }
                let fix = waypoints[index % waypoints.len()];
                Some((Ok(fix), index + 1))
            }
        })
        .boxed()
    }
}

// ───────────────────────────────────────────────────────────────────
// Publisher
// ───────────────────────────────────────────────────────────────────

/// Pumps fixes from a source into the session, enforcing the fix timeout.
pub struct SelfLocationPublisher {
    options: PositioningOptions,
}

impl SelfLocationPublisher {
    pub fn new(options: PositioningOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &PositioningOptions {
        &self.options
    }

    /// Watch `source` until it ends or the session stops listening.
    pub async fn run<S: PositionSource>(self, mut source: S, fixes: mpsc::Sender<FixOutcome>) {
        let mut stream = source.watch(&self.options);
        log::info!(
            "Position tracking started (high_accuracy={}, timeout={:?})",
            self.options.high_accuracy,
            self.options.timeout()
        );

        loop {
            let outcome = match tokio::time::timeout(self.options.timeout(), stream.next()).await {
                Ok(Some(outcome)) => outcome,
                Ok(None) => {
                    log::info!("Position source ended");
                    break;
                }
                Err(_) => Err(PositioningError::Timeout),
            };

            if let Err(e) = &outcome {
                log::warn!("Position fix failed: {e}");
            }
            if fixes.send(outcome).await.is_err() {
                log::debug!("Session closed; stopping position tracking");
                break;
            }
        }
    }

    pub fn spawn<S: PositionSource + 'static>(
        self,
        source: S,
        fixes: mpsc::Sender<FixOutcome>,
    ) -> JoinHandle<()> {
        tokio::spawn(self.run(source, fixes))
    }
}
