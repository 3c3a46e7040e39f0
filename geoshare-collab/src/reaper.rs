//! Staleness reaper: evicts remote participants that went silent.
//!
//! A pure liveness policy. A participant whose updates are merely slow is
//! evicted like a disconnected one and reappears with its next update.
//! The local participant is never evicted here.

use std::time::{Duration, Instant};

use crate::presence::{PresenceChange, PresenceRegistry};
use crate::protocol::ParticipantId;

/// Periodic sweep policy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StalenessReaper {
    interval: Duration,
    threshold: Duration,
}

impl StalenessReaper {
    /// Sweep every `interval`, evicting after `interval` of silence.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            threshold: interval,
        }
    }

    pub fn with_threshold(interval: Duration, threshold: Duration) -> Self {
        Self {
            interval,
            threshold,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    /// Whether an entry last updated at `last_update` has expired at `now`.
    ///
    /// A `last_update` later than `now` counts as age zero.
    pub fn is_stale(&self, last_update: Instant, now: Instant) -> bool {
        now.saturating_duration_since(last_update) > self.threshold
    }

    /// Remove every expired non-local participant.
    pub fn sweep(&self, registry: &mut PresenceRegistry, now: Instant) -> Vec<PresenceChange> {
        let stale: Vec<ParticipantId> = registry
            .participants()
            .filter(|p| !p.is_local && self.is_stale(p.last_update, now))
            .map(|p| p.identity)
            .collect();

        let removed: Vec<PresenceChange> = stale
            .iter()
            .filter_map(|id| registry.remove(id))
            .collect();

        if !removed.is_empty() {
            log::debug!(
                "Reaped {} stale participant(s), {} remaining",
                removed.len(),
                registry.len()
            );
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Position;

    fn pos() -> Position {
        Position::new(0.0, 0.0).unwrap()
    }

    #[test]
    fn test_threshold_defaults_to_interval() {
        let reaper = StalenessReaper::new(Duration::from_secs(30));
        assert_eq!(reaper.threshold(), Duration::from_secs(30));
        assert_eq!(reaper.interval(), Duration::from_secs(30));
    }

    #[test]
    fn test_is_stale_boundary() {
        let reaper = StalenessReaper::new(Duration::from_secs(30));
        let t0 = Instant::now();
        assert!(!reaper.is_stale(t0, t0 + Duration::from_secs(30)));
        assert!(reaper.is_stale(t0, t0 + Duration::from_secs(30) + Duration::from_millis(1)));
    }

    #[test]
    fn test_future_timestamp_not_stale() {
        let reaper = StalenessReaper::with_threshold(Duration::from_secs(1), Duration::ZERO);
        let now = Instant::now();
        assert!(!reaper.is_stale(now + Duration::from_secs(60), now));
    }

    #[test]
    fn test_sweep_invariant() {
        let reaper = StalenessReaper::new(Duration::from_secs(30));
        let mut registry = PresenceRegistry::new();
        let t0 = Instant::now();
        let now = t0 + Duration::from_secs(100);

        for (i, age) in [5u64, 29, 30, 31, 90].iter().enumerate() {
            registry.upsert(
                format!("p{i}").as_str().into(),
                pos(),
                now - Duration::from_secs(*age),
            );
        }

        let removed = reaper.sweep(&mut registry, now);
        let mut removed_ids: Vec<String> =
            removed.iter().map(|c| c.identity().to_string()).collect();
        removed_ids.sort();
        assert_eq!(removed_ids, vec!["p3", "p4"]);

        for p in registry.participants() {
            assert!(now.saturating_duration_since(p.last_update) <= reaper.threshold());
        }
        assert!(removed.iter().all(|c| matches!(c, PresenceChange::Left(_))));
    }

    #[test]
    fn test_local_never_reaped() {
        let reaper = StalenessReaper::with_threshold(Duration::from_secs(1), Duration::ZERO);
        let mut registry = PresenceRegistry::new();
        let t0 = Instant::now();

        registry.set_local("me".into());
        registry.upsert("me".into(), pos(), t0);
        registry.upsert("them".into(), pos(), t0);

        let removed = reaper.sweep(&mut registry, t0 + Duration::from_secs(3600));
        assert_eq!(removed, vec![PresenceChange::Left("them".into())]);
        assert!(registry.local().is_some());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_sweep_empty_registry() {
        let reaper = StalenessReaper::new(Duration::from_secs(30));
        let mut registry = PresenceRegistry::new();
        assert!(reaper.sweep(&mut registry, Instant::now()).is_empty());
    }
}
