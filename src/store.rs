//! Participant record store
//!
//! `ParticipantStore` owns the shared participant table. Every record sits
//! behind its own async mutex so writers are serialized per record, and a
//! concurrent index of Seeking ids replaces full-table scans when looking
//! for a counterpart. The index is only ever updated while the record's
//! lock is held, together with the state change that causes it.

use crate::error::{PairError, Result};
use crate::persist::{MemoryRecordStore, RecordStore};
use crate::types::{Participant, ParticipantId, ParticipantState, StateCounts};
use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Exclusive handle on one participant record
pub(crate) type RecordGuard = OwnedMutexGuard<Participant>;

/// Shared participant table with per-record locking and write-through
/// persistence
pub struct ParticipantStore {
    /// Records indexed by participant id (DashMap for per-key locking)
    records: DashMap<ParticipantId, Arc<Mutex<Participant>>>,

    /// Ids currently in the Seeking state
    seeking: DashSet<ParticipantId>,

    backend: Box<dyn RecordStore>,
}

impl ParticipantStore {
    /// Open a store over a durable backend, loading every persisted record
    ///
    /// Records that break the partner invariant (Paired without a partner,
    /// or a partner that does not point back) are reset to Idle and saved.
    pub async fn open(backend: impl RecordStore + 'static) -> Result<Self> {
        let mut loaded = backend.load().await?;

        let broken: Vec<ParticipantId> = loaded
            .values()
            .filter(|p| {
                if !p.is_well_formed() {
                    return true;
                }
                match &p.partner_id {
                    Some(partner) => !loaded
                        .get(partner)
                        .is_some_and(|other| other.is_paired_with(&p.id)),
                    None => false,
                }
            })
            .map(|p| p.id.clone())
            .collect();

        for id in &broken {
            if let Some(record) = loaded.get_mut(id) {
                tracing::warn!(
                    participant = %id,
                    state = %record.state,
                    partner = ?record.partner_id,
                    "Repairing inconsistent record on load"
                );
                record.reset();
                backend.save(record).await?;
            }
        }

        let store = Self {
            records: DashMap::with_capacity(loaded.len()),
            seeking: DashSet::new(),
            backend: Box::new(backend),
        };
        for (id, participant) in loaded {
            if participant.state == ParticipantState::Seeking {
                store.seeking.insert(id.clone());
            }
            store.records.insert(id, Arc::new(Mutex::new(participant)));
        }

        tracing::info!(
            participants = store.records.len(),
            seeking = store.seeking.len(),
            repaired = broken.len(),
            "Participant store opened"
        );
        Ok(store)
    }

    /// Create an empty store backed by memory only
    pub fn in_memory() -> Self {
        Self {
            records: DashMap::new(),
            seeking: DashSet::new(),
            backend: Box::new(MemoryRecordStore::default()),
        }
    }

    /// Read a participant, creating a default Idle record if absent
    pub async fn get(&self, id: &ParticipantId) -> Result<Participant> {
        let guard = self.lock(id).await?;
        Ok(guard.clone())
    }

    /// Read a participant without creating it
    pub async fn probe(&self, id: &ParticipantId) -> Result<Participant> {
        let guard = self.lock_existing(id).await?;
        Ok(guard.clone())
    }

    /// Overwrite a participant's state
    ///
    /// Raw primitive: pair consistency is the engine's responsibility.
    pub async fn set_state(&self, id: &ParticipantId, state: ParticipantState) -> Result<()> {
        let mut guard = self.lock(id).await?;
        guard.state = state;
        self.commit(&mut guard).await
    }

    /// Overwrite a participant's partner reference
    ///
    /// Raw primitive: pair consistency is the engine's responsibility.
    pub async fn set_partner(
        &self,
        id: &ParticipantId,
        partner: Option<ParticipantId>,
    ) -> Result<()> {
        let mut guard = self.lock(id).await?;
        guard.partner_id = partner;
        self.commit(&mut guard).await
    }

    /// Return some participant currently Seeking whose id differs from `id`
    ///
    /// No ordering guarantee. The returned snapshot may go stale as soon as
    /// it is returned; callers re-validate under lock before acting on it.
    pub async fn find_seeking_other_than(&self, id: &ParticipantId) -> Option<Participant> {
        let candidates: Vec<ParticipantId> = self
            .seeking
            .iter()
            .map(|entry| entry.key().clone())
            .filter(|candidate| candidate != id)
            .collect();

        for candidate in candidates {
            let Ok(guard) = self.lock_existing(&candidate).await else {
                continue;
            };
            if guard.state == ParticipantState::Seeking {
                return Some(guard.clone());
            }
        }
        None
    }

    /// Participant counts grouped by state
    pub async fn counts(&self) -> StateCounts {
        let handles: Vec<Arc<Mutex<Participant>>> =
            self.records.iter().map(|r| r.value().clone()).collect();

        let mut counts = StateCounts::default();
        for handle in handles {
            counts.record(handle.lock().await.state);
        }
        counts
    }

    /// Number of known participants
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether no participant has been seen yet
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Lock a record, creating and persisting a default Idle one if absent
    pub(crate) async fn lock(&self, id: &ParticipantId) -> Result<RecordGuard> {
        // The entry ref holds a shard lock and must be dropped before awaiting
        let (handle, created) = match self.records.entry(id.clone()) {
            Entry::Occupied(entry) => (entry.get().clone(), false),
            Entry::Vacant(entry) => {
                let handle = Arc::new(Mutex::new(Participant::new(id.clone())));
                entry.insert(handle.clone());
                (handle, true)
            }
        };

        let mut guard = handle.lock_owned().await;
        if created {
            tracing::debug!(participant = %id, "Participant record created");
            self.commit(&mut guard).await?;
        }
        Ok(guard)
    }

    /// Lock an existing record
    pub(crate) async fn lock_existing(&self, id: &ParticipantId) -> Result<RecordGuard> {
        let handle = self
            .records
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| PairError::NotFound(id.clone()))?;
        Ok(handle.lock_owned().await)
    }

    /// Lock two distinct records in id order
    ///
    /// `first` is created if absent; `second` must already exist.
    /// Guards are returned in argument order.
    pub(crate) async fn lock_pair(
        &self,
        first: &ParticipantId,
        second: &ParticipantId,
    ) -> Result<(RecordGuard, RecordGuard)> {
        if first == second {
            return Err(PairError::InconsistentPairState {
                participant: first.clone(),
                partner: second.clone(),
            });
        }

        if first < second {
            let a = self.lock(first).await?;
            let b = self.lock_existing(second).await?;
            Ok((a, b))
        } else {
            let b = self.lock_existing(second).await?;
            let a = self.lock(first).await?;
            Ok((a, b))
        }
    }

    /// Whether some task currently holds the record's lock
    #[cfg(test)]
    pub(crate) fn is_locked(&self, id: &ParticipantId) -> bool {
        self.records
            .get(id)
            .is_some_and(|handle| handle.value().try_lock().is_err())
    }

    /// Stamp, index, and persist a locked record
    pub(crate) async fn commit(&self, guard: &mut RecordGuard) -> Result<()> {
        guard.last_seen = Some(chrono::Utc::now().timestamp_millis());

        if guard.state == ParticipantState::Seeking {
            self.seeking.insert(guard.id.clone());
        } else {
            self.seeking.remove(&guard.id);
        }

        self.backend.save(guard).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use tokio::sync::Notify;

    fn paired(id: &str, partner: &str) -> Participant {
        let mut p = Participant::new(id.into());
        p.state = ParticipantState::Paired;
        p.partner_id = Some(partner.into());
        p
    }

    #[tokio::test]
    async fn test_get_creates_idle_record() {
        let store = ParticipantStore::in_memory();
        assert!(store.is_empty());

        let p = store.get(&"alice".into()).await.unwrap();
        assert_eq!(p.state, ParticipantState::Idle);
        assert!(p.partner_id.is_none());
        assert!(p.last_seen.is_some());
        assert_eq!(store.len(), 1);

        // Idempotent
        store.get(&"alice".into()).await.unwrap();
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_probe_missing_is_not_found() {
        let store = ParticipantStore::in_memory();
        let err = store.probe(&"ghost".into()).await.unwrap_err();
        assert!(matches!(err, PairError::NotFound(id) if id.as_str() == "ghost"));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_set_state_maintains_seeking_index() {
        let store = ParticipantStore::in_memory();
        let alice: ParticipantId = "alice".into();

        store.set_state(&alice, ParticipantState::Seeking).await.unwrap();
        assert!(store.find_seeking_other_than(&"bob".into()).await.is_some());
        // Never returns the caller itself
        assert!(store.find_seeking_other_than(&alice).await.is_none());

        store.set_state(&alice, ParticipantState::Idle).await.unwrap();
        assert!(store.find_seeking_other_than(&"bob".into()).await.is_none());
    }

    #[tokio::test]
    async fn test_set_partner() {
        let store = ParticipantStore::in_memory();
        store.set_partner(&"a".into(), Some("b".into())).await.unwrap();
        assert_eq!(store.get(&"a".into()).await.unwrap().partner_id, Some("b".into()));

        store.set_partner(&"a".into(), None).await.unwrap();
        assert!(store.get(&"a".into()).await.unwrap().partner_id.is_none());
    }

    #[tokio::test]
    async fn test_find_seeking_returns_seeker() {
        let store = ParticipantStore::in_memory();
        store.set_state(&"a".into(), ParticipantState::Seeking).await.unwrap();
        store.get(&"b".into()).await.unwrap();

        let found = store.find_seeking_other_than(&"b".into()).await.unwrap();
        assert_eq!(found.id.as_str(), "a");
        assert_eq!(found.state, ParticipantState::Seeking);
    }

    #[tokio::test]
    async fn test_lock_pair_requires_existing_second() {
        let store = ParticipantStore::in_memory();
        let err = store.lock_pair(&"a".into(), &"zz".into()).await.unwrap_err();
        assert!(matches!(err, PairError::NotFound(_)));

        let err = store.lock_pair(&"a".into(), &"a".into()).await.unwrap_err();
        assert!(matches!(err, PairError::InconsistentPairState { .. }));
    }

    #[tokio::test]
    async fn test_lock_pair_returns_argument_order() {
        let store = ParticipantStore::in_memory();
        store.get(&"a".into()).await.unwrap();
        store.get(&"z".into()).await.unwrap();

        let (first, second) = store.lock_pair(&"z".into(), &"a".into()).await.unwrap();
        assert_eq!(first.id.as_str(), "z");
        assert_eq!(second.id.as_str(), "a");
    }

    #[tokio::test]
    async fn test_open_restores_and_indexes() {
        let mut seeker = Participant::new("s".into());
        seeker.state = ParticipantState::Seeking;
        let backend = MemoryRecordStore::with_records([
            paired("a", "b"),
            paired("b", "a"),
            seeker,
        ]);

        let store = ParticipantStore::open(backend).await.unwrap();
        assert_eq!(store.len(), 3);

        let counts = store.counts().await;
        assert_eq!(counts.paired, 2);
        assert_eq!(counts.seeking, 1);

        let found = store.find_seeking_other_than(&"a".into()).await.unwrap();
        assert_eq!(found.id.as_str(), "s");
    }

    #[tokio::test]
    async fn test_open_repairs_broken_records() {
        let mut dangling = Participant::new("d".into());
        dangling.state = ParticipantState::Paired;
        let backend = MemoryRecordStore::with_records([
            // x points at y, y points elsewhere
            paired("x", "y"),
            paired("y", "w"),
            paired("w", "y"),
            dangling,
        ]);

        let store = ParticipantStore::open(backend).await.unwrap();

        let x = store.probe(&"x".into()).await.unwrap();
        assert_eq!(x.state, ParticipantState::Idle);
        assert!(x.partner_id.is_none());

        let d = store.probe(&"d".into()).await.unwrap();
        assert_eq!(d.state, ParticipantState::Idle);

        // The valid pair is untouched
        assert!(store.probe(&"y".into()).await.unwrap().is_paired_with(&"w".into()));
        assert!(store.probe(&"w".into()).await.unwrap().is_paired_with(&"y".into()));
    }

    /// Backend whose saves for one id wait until released
    struct GatedRecordStore {
        gated: ParticipantId,
        release: Arc<Notify>,
        inner: MemoryRecordStore,
    }

    #[async_trait]
    impl RecordStore for GatedRecordStore {
        async fn save(&self, participant: &Participant) -> Result<()> {
            if participant.id == self.gated {
                self.release.notified().await;
            }
            self.inner.save(participant).await
        }

        async fn load(&self) -> Result<HashMap<ParticipantId, Participant>> {
            self.inner.load().await
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_pending_save_does_not_stall_other_records() {
        let release = Arc::new(Notify::new());
        let backend = GatedRecordStore {
            gated: "slow".into(),
            release: release.clone(),
            inner: MemoryRecordStore::default(),
        };
        let store = Arc::new(ParticipantStore::open(backend).await.unwrap());

        let slow = {
            let store = store.clone();
            tokio::spawn(async move { store.get(&"slow".into()).await })
        };
        tokio::task::yield_now().await;
        assert!(!slow.is_finished());

        // Same thread, other record: proceeds while "slow" is mid-write
        let fast = store.get(&"fast".into()).await.unwrap();
        assert_eq!(fast.state, ParticipantState::Idle);
        assert!(!slow.is_finished());

        release.notify_one();
        let slow = slow.await.unwrap().unwrap();
        assert_eq!(slow.id.as_str(), "slow");
    }
}
