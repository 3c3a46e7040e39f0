//! Client-side presence registry: who is online and where.
//!
//! ## Data flow
//!
//! ```text
//! relay receive-location ──┐
//!                          ├──► PresenceRegistry::upsert() ──► Joined / Moved
//! local position fix ──────┘
//! participant-left / reaper ──► PresenceRegistry::remove() ──► Left
//! ```
//!
//! The registry holds at most one entry per identity. Updates are applied in
//! arrival order and the last one wins; timestamps are recorded, never
//! compared against each other.

use std::collections::HashMap;
use std::time::Instant;

use crate::protocol::{ParticipantId, Position};

/// One participant as seen by this client.
#[derive(Debug, Clone, PartialEq)]
pub struct Participant {
    pub identity: ParticipantId,
    pub position: Position,
    /// When the most recent position for this participant was applied.
    pub last_update: Instant,
    /// True iff this is the participant owned by this client.
    pub is_local: bool,
}

/// Change signalled to the presentation layer.
#[derive(Debug, Clone, PartialEq)]
pub enum PresenceChange {
    /// First position for an unseen identity.
    Joined(Participant),
    /// New position for a known identity.
    Moved(Participant),
    Left(ParticipantId),
}

impl PresenceChange {
    pub fn identity(&self) -> &ParticipantId {
        match self {
            PresenceChange::Joined(p) | PresenceChange::Moved(p) => &p.identity,
            PresenceChange::Left(id) => id,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    position: Position,
    last_update: Instant,
}

/// Map from identity to last known position.
#[derive(Debug, Default)]
pub struct PresenceRegistry {
    entries: HashMap<ParticipantId, Entry>,
    /// Identity of this client's own channel, once the relay assigned one.
    local: Option<ParticipantId>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite the entry for `identity`.
    ///
    /// Applies to the local identity as well: a re-delivered local echo just
    /// moves the local entry.
    pub fn upsert(
        &mut self,
        identity: ParticipantId,
        position: Position,
        at: Instant,
    ) -> PresenceChange {
        let entry = Entry {
            position,
            last_update: at,
        };
        let existed = self.entries.insert(identity.clone(), entry).is_some();
        let participant = self.participant(identity, entry);
        if existed {
            PresenceChange::Moved(participant)
        } else {
            PresenceChange::Joined(participant)
        }
    }

    /// Delete the entry for `identity`. `None` if it was absent.
    pub fn remove(&mut self, identity: &ParticipantId) -> Option<PresenceChange> {
        self.entries
            .remove(identity)
            .map(|_| PresenceChange::Left(identity.clone()))
    }

    /// Bind the local identity.
    ///
    /// When the identity changes (reconnect), the local entry is re-keyed
    /// with its position and timestamp intact, signalled as `Left` for the
    /// old identity followed by `Joined` for the new one.
    pub fn set_local(&mut self, identity: ParticipantId) -> Vec<PresenceChange> {
        let previous = self.local.replace(identity.clone());
        let old = match previous {
            Some(old) if old != identity => old,
            _ => return Vec::new(),
        };

        let Some(entry) = self.entries.remove(&old) else {
            return Vec::new();
        };
        let existed = self.entries.insert(identity.clone(), entry).is_some();
        let participant = self.participant(identity, entry);
        vec![
            PresenceChange::Left(old),
            if existed {
                PresenceChange::Moved(participant)
            } else {
                PresenceChange::Joined(participant)
            },
        ]
    }

    pub fn local_id(&self) -> Option<&ParticipantId> {
        self.local.as_ref()
    }

    /// The local participant, if both identity and a position are known.
    pub fn local(&self) -> Option<Participant> {
        self.local.as_ref().and_then(|id| self.get(id))
    }

    pub fn is_local(&self, identity: &ParticipantId) -> bool {
        self.local.as_ref() == Some(identity)
    }

    pub fn get(&self, identity: &ParticipantId) -> Option<Participant> {
        self.entries
            .get(identity)
            .map(|entry| self.participant(identity.clone(), *entry))
    }

    pub fn contains(&self, identity: &ParticipantId) -> bool {
        self.entries.contains_key(identity)
    }

    /// All participants in arbitrary order.
    pub fn participants(&self) -> impl Iterator<Item = Participant> + '_ {
        self.entries
            .iter()
            .map(|(id, entry)| self.participant(id.clone(), *entry))
    }

    /// All participants sorted by identity, for rendering.
    pub fn snapshot(&self) -> Vec<Participant> {
        let mut all: Vec<Participant> = self.participants().collect();
        all.sort_by(|a, b| a.identity.cmp(&b.identity));
        all
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn participant(&self, identity: ParticipantId, entry: Entry) -> Participant {
        Participant {
            is_local: self.is_local(&identity),
            identity,
            position: entry.position,
            last_update: entry.last_update,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn pos(lat: f64, lon: f64) -> Position {
        Position::new(lat, lon).unwrap()
    }

    #[test]
    fn test_upsert_joins_then_moves() {
        let mut registry = PresenceRegistry::new();
        let t0 = Instant::now();

        let first = registry.upsert("a1".into(), pos(1.0, 1.0), t0);
        assert!(matches!(first, PresenceChange::Joined(ref p) if p.identity.as_str() == "a1"));

        let second = registry.upsert("a1".into(), pos(2.0, 2.0), t0 + Duration::from_secs(1));
        match second {
            PresenceChange::Moved(p) => {
                assert_eq!(p.position, pos(2.0, 2.0));
                assert_eq!(p.last_update, t0 + Duration::from_secs(1));
            }
            other => panic!("Expected Moved, got {other:?}"),
        }
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_last_write_wins_by_arrival_not_timestamp() {
        let mut registry = PresenceRegistry::new();
        let t0 = Instant::now();
        let id = ParticipantId::new("a1");

        registry.upsert(id.clone(), pos(10.0, 10.0), t0 + Duration::from_secs(5));
        // Older timestamp, later arrival: still applied.
        registry.upsert(id.clone(), pos(20.0, 20.0), t0);

        let p = registry.get(&id).unwrap();
        assert_eq!(p.position, pos(20.0, 20.0));
        assert_eq!(p.last_update, t0);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_many_upserts_single_entry() {
        let mut registry = PresenceRegistry::new();
        let t0 = Instant::now();
        for i in 0..100 {
            registry.upsert(
                "a1".into(),
                pos(i as f64 * 0.5, -(i as f64)),
                t0 + Duration::from_millis(i),
            );
        }
        assert_eq!(registry.len(), 1);
        let p = registry.get(&"a1".into()).unwrap();
        assert_eq!(p.position, pos(49.5, -99.0));
        assert_eq!(p.last_update, t0 + Duration::from_millis(99));
    }

    #[test]
    fn test_remove_absent_is_noop() {
        let mut registry = PresenceRegistry::new();
        registry.upsert("a1".into(), pos(0.0, 0.0), Instant::now());
        let before = registry.snapshot();

        assert!(registry.remove(&"zz".into()).is_none());
        assert_eq!(registry.snapshot(), before);
    }

    #[test]
    fn test_remove_signals_left() {
        let mut registry = PresenceRegistry::new();
        registry.upsert("a1".into(), pos(0.0, 0.0), Instant::now());
        assert_eq!(
            registry.remove(&"a1".into()),
            Some(PresenceChange::Left("a1".into()))
        );
        assert!(registry.is_empty());
    }

    #[test]
    fn test_local_flag_and_self() {
        let mut registry = PresenceRegistry::new();
        assert!(registry.local().is_none());

        assert!(registry.set_local("b1".into()).is_empty());
        assert!(registry.local().is_none()); // identity known, no fix yet

        let now = Instant::now();
        registry.upsert("b1".into(), pos(1.0, 2.0), now);
        registry.upsert("a1".into(), pos(3.0, 4.0), now);

        let local = registry.local().unwrap();
        assert_eq!(local.identity.as_str(), "b1");
        assert!(local.is_local);
        assert!(!registry.get(&"a1".into()).unwrap().is_local);
    }

    #[test]
    fn test_local_echo_applied() {
        let mut registry = PresenceRegistry::new();
        let now = Instant::now();
        registry.set_local("b1".into());
        registry.upsert("b1".into(), pos(1.0, 1.0), now);

        let change = registry.upsert("b1".into(), pos(5.0, 5.0), now);
        assert!(matches!(change, PresenceChange::Moved(ref p) if p.is_local));
        assert_eq!(registry.local().unwrap().position, pos(5.0, 5.0));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_set_local_rekeys_on_reconnect() {
        let mut registry = PresenceRegistry::new();
        let now = Instant::now();
        registry.set_local("b1".into());
        registry.upsert("b1".into(), pos(1.0, 1.0), now);

        let changes = registry.set_local("b2".into());
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0], PresenceChange::Left("b1".into()));
        match &changes[1] {
            PresenceChange::Joined(p) => {
                assert_eq!(p.identity.as_str(), "b2");
                assert!(p.is_local);
                assert_eq!(p.position, pos(1.0, 1.0));
                assert_eq!(p.last_update, now);
            }
            other => panic!("Expected Joined, got {other:?}"),
        }
        assert!(!registry.contains(&"b1".into()));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_set_local_same_identity_is_noop() {
        let mut registry = PresenceRegistry::new();
        registry.set_local("b1".into());
        registry.upsert("b1".into(), pos(1.0, 1.0), Instant::now());
        assert!(registry.set_local("b1".into()).is_empty());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_snapshot_sorted() {
        let mut registry = PresenceRegistry::new();
        let now = Instant::now();
        for id in ["c", "a", "b"] {
            registry.upsert(id.into(), pos(0.0, 0.0), now);
        }
        let ids: Vec<String> = registry
            .snapshot()
            .into_iter()
            .map(|p| p.identity.to_string())
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }
}
