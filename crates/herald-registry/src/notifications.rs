//! Notification storage and the expiry index.
//!
//! [`NotificationRegistry`] owns every [`NotificationRecord`] and the
//! identifier pool they are numbered from. It never looks at sessions:
//! ownership bookkeeping is the caller's job (see
//! [`SessionRegistry`](crate::SessionRegistry)), which also fixes the order
//! of teardown steps. Owned-set update first, then [`delete`](NotificationRegistry::delete),
//! which removes the record before it frees the identifier.
//!
//! The expiry index is a `BTreeSet` keyed by `(deadline, id)`, so the
//! earliest deadline is always `first()` and ties break on identifier. It
//! lives under the same lock as the record map and always holds exactly
//! the live records that carry a deadline.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use herald_core::{
    HeraldError, IdentifierPool, NotificationDraft, NotificationId, NotificationPatch,
    NotificationRecord, Result, SessionId,
};
use parking_lot::RwLock;
use tokio::sync::Notify;
use tracing::{debug, error};

use crate::metrics::{NOTIFICATIONS_ACTIVE, NOTIFICATIONS_CREATED_TOTAL, NOTIFICATIONS_DELETED_TOTAL};

type ExpiryKey = (DateTime<Utc>, NotificationId);

#[derive(Default)]
struct State {
    records: HashMap<NotificationId, NotificationRecord>,
    expiry: BTreeSet<ExpiryKey>,
}

impl State {
    /// Index `id` under `at`. Returns whether it became the earliest entry.
    fn index(&mut self, at: DateTime<Utc>, id: NotificationId) -> bool {
        let _ = self.expiry.insert((at, id));
        self.expiry.first() == Some(&(at, id))
    }

    fn unindex(&mut self, record: &NotificationRecord) {
        if let Some(at) = record.expires_at {
            let _ = self.expiry.remove(&(at, record.id()));
        }
    }
}

/// Live notifications keyed by identifier.
pub struct NotificationRegistry {
    state: RwLock<State>,
    pool: IdentifierPool<NotificationId>,
    expiry_enabled: bool,
    wake: Notify,
}

impl NotificationRegistry {
    /// Create an empty registry with `capacity` notification identifiers.
    pub fn new(capacity: usize, expiry_enabled: bool) -> Self {
        Self {
            state: RwLock::new(State::default()),
            pool: IdentifierPool::new(capacity),
            expiry_enabled,
            wake: Notify::new(),
        }
    }

    /// Whether the expiry index is maintained.
    pub fn expiry_enabled(&self) -> bool {
        self.expiry_enabled
    }

    /// Identifier pool capacity.
    pub fn capacity(&self) -> usize {
        self.pool.capacity()
    }

    /// Insert a new `Active` record owned by `session_id`.
    ///
    /// Allocation happens first; on exhaustion nothing is mutated. The caller
    /// must already have confirmed the session exists and must record the
    /// returned identifier in the session's owned set.
    pub fn create(
        &self,
        session_id: SessionId,
        draft: NotificationDraft,
        now: DateTime<Utc>,
    ) -> Result<NotificationRecord> {
        let id = self.pool.allocate()?;
        let record = NotificationRecord::new(id, session_id, draft, now);

        let (earliest, live) = {
            let mut state = self.state.write();
            let earliest = match record.expires_at {
                Some(at) if self.expiry_enabled => state.index(at, id),
                _ => false,
            };
            let _ = state.records.insert(id, record.clone());
            (earliest, state.records.len())
        };

        if earliest {
            self.wake.notify_one();
        }
        metrics::counter!(NOTIFICATIONS_CREATED_TOTAL).increment(1);
        record_live(live);
        debug!(notification_id = %id, session_id = %session_id, "notification created");
        Ok(record)
    }

    /// Apply a field-selective update. A moved deadline is re-indexed and
    /// wakes the reaper if it is now the earliest.
    pub fn update(&self, id: NotificationId, patch: NotificationPatch) -> Result<NotificationRecord> {
        let (record, earliest) = {
            let mut state = self.state.write();
            let record = state.records.get_mut(&id).ok_or(HeraldError::NotFound(id))?;
            let moved = record.apply(patch);
            let record = record.clone();

            let earliest = match (moved, record.expires_at) {
                (Some(previous), Some(at)) if self.expiry_enabled => {
                    if let Some(previous) = previous {
                        let _ = state.expiry.remove(&(previous, id));
                    }
                    state.index(at, id)
                }
                _ => false,
            };
            (record, earliest)
        };

        if earliest {
            self.wake.notify_one();
        }
        debug!(notification_id = %id, "notification updated");
        Ok(record)
    }

    /// Remove a record, drop it from the expiry index, then free its
    /// identifier.
    pub fn delete(&self, id: NotificationId) -> Result<NotificationRecord> {
        let (record, live) = {
            let mut state = self.state.write();
            let record = state.records.remove(&id).ok_or(HeraldError::NotFound(id))?;
            state.unindex(&record);
            (record, state.records.len())
        };
        self.release(id);

        metrics::counter!(NOTIFICATIONS_DELETED_TOTAL).increment(1);
        record_live(live);
        debug!(notification_id = %id, "notification deleted");
        Ok(record)
    }

    /// Mark a due record `Expired` and remove it, freeing its identifier.
    ///
    /// Returns `None` if the record is gone or its deadline has moved past
    /// `now` since it was observed.
    pub fn expire(&self, id: NotificationId, now: DateTime<Utc>) -> Option<NotificationRecord> {
        let (record, live) = {
            let mut state = self.state.write();
            match state.records.get(&id).map(|r| r.is_due(now)) {
                Some(true) => {}
                Some(false) => return None,
                None => {
                    // An index entry without a record would pin the reaper.
                    let before = state.expiry.len();
                    state.expiry.retain(|(_, indexed)| *indexed != id);
                    if state.expiry.len() != before {
                        error!(notification_id = %id, "expiry index referenced a missing notification");
                    }
                    return None;
                }
            }
            let mut record = state.records.remove(&id)?;
            state.unindex(&record);
            record.mark_expired();
            (record, state.records.len())
        };
        self.release(id);

        record_live(live);
        Some(record)
    }

    /// Snapshot of one record.
    pub fn get(&self, id: NotificationId) -> Result<NotificationRecord> {
        self.state
            .read()
            .records
            .get(&id)
            .cloned()
            .ok_or(HeraldError::NotFound(id))
    }

    /// Whether `id` is live.
    pub fn contains(&self, id: NotificationId) -> bool {
        self.state.read().records.contains_key(&id)
    }

    /// Snapshot of every record owned by `session_id`, ordered by identifier.
    pub fn list_by_session(&self, session_id: SessionId) -> Vec<NotificationRecord> {
        let mut records: Vec<_> = self
            .state
            .read()
            .records
            .values()
            .filter(|r| r.session_id() == session_id)
            .cloned()
            .collect();
        records.sort_by_key(NotificationRecord::id);
        records
    }

    /// Earliest `(deadline, id)` in the expiry index.
    pub fn earliest_deadline(&self) -> Option<(DateTime<Utc>, NotificationId)> {
        self.state.read().expiry.first().copied()
    }

    /// Number of indexed deadlines.
    pub fn indexed(&self) -> usize {
        self.state.read().expiry.len()
    }

    /// Number of live records.
    pub fn len(&self) -> usize {
        self.state.read().records.len()
    }

    /// Whether no records are live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resolves when a new earliest deadline is indexed. A wake issued while
    /// nobody is waiting is kept for the next caller.
    pub async fn deadline_changed(&self) {
        self.wake.notified().await;
    }

    fn release(&self, id: NotificationId) {
        if let Err(e) = self.pool.free(id) {
            error!(notification_id = %id, error = %e, "failed to free notification identifier");
        }
    }
}

#[allow(clippy::cast_precision_loss)]
fn record_live(live: usize) {
    metrics::gauge!(NOTIFICATIONS_ACTIVE).set(live as f64);
}

impl std::fmt::Debug for NotificationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationRegistry")
            .field("live", &self.len())
            .field("capacity", &self.capacity())
            .field("expiry_enabled", &self.expiry_enabled)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::Duration;
    use herald_core::NotificationStatus;
    use proptest::prelude::*;

    fn registry() -> NotificationRegistry {
        NotificationRegistry::new(4, true)
    }

    fn s0() -> SessionId {
        SessionId::from(0)
    }

    #[test]
    fn create_assigns_lowest_identifier() {
        let reg = registry();
        let now = Utc::now();
        let a = reg.create(s0(), NotificationDraft::new("a", "1"), now).unwrap();
        let b = reg.create(s0(), NotificationDraft::new("b", "2"), now).unwrap();
        assert_eq!(a.id(), NotificationId::from(0));
        assert_eq!(b.id(), NotificationId::from(1));
        assert_eq!(a.status, NotificationStatus::Active);
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn exhaustion_leaves_registry_untouched() {
        let reg = registry();
        let now = Utc::now();
        for i in 0..4 {
            let _ = reg
                .create(s0(), NotificationDraft::new(format!("t{i}"), "m"), now)
                .unwrap();
        }
        assert_matches!(
            reg.create(s0(), NotificationDraft::new("x", "y"), now),
            Err(HeraldError::ResourceExhausted { kind: "notification", capacity: 4 })
        );
        assert_eq!(reg.len(), 4);
    }

    #[test]
    fn update_is_field_selective() {
        let reg = registry();
        let r = reg.create(s0(), NotificationDraft::new("T", "M"), Utc::now()).unwrap();
        let updated = reg
            .update(
                r.id(),
                NotificationPatch {
                    message: Some("M2".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(updated.title, "T");
        assert_eq!(updated.message, "M2");
        assert_eq!(reg.get(r.id()).unwrap().message, "M2");
    }

    #[test]
    fn update_missing_is_not_found() {
        let reg = registry();
        assert_matches!(
            reg.update(NotificationId::from(2), NotificationPatch::default()),
            Err(HeraldError::NotFound(id)) if id == NotificationId::from(2)
        );
    }

    #[test]
    fn delete_frees_identifier_for_reuse() {
        let reg = registry();
        let now = Utc::now();
        let a = reg.create(s0(), NotificationDraft::new("a", "1"), now).unwrap();
        let _ = reg.create(s0(), NotificationDraft::new("b", "2"), now).unwrap();
        let _ = reg.delete(a.id()).unwrap();
        assert_matches!(reg.get(a.id()), Err(HeraldError::NotFound(_)));
        let c = reg.create(s0(), NotificationDraft::new("c", "3"), now).unwrap();
        assert_eq!(c.id(), a.id());
    }

    #[test]
    fn delete_twice_is_not_found() {
        let reg = registry();
        let r = reg.create(s0(), NotificationDraft::new("a", "1"), Utc::now()).unwrap();
        let _ = reg.delete(r.id()).unwrap();
        assert_matches!(reg.delete(r.id()), Err(HeraldError::NotFound(_)));
    }

    #[test]
    fn list_by_session_filters_and_orders() {
        let reg = NotificationRegistry::new(8, false);
        let now = Utc::now();
        let s1 = SessionId::from(1);
        for (session, title) in [(s1, "a"), (s0(), "b"), (s1, "c")] {
            let _ = reg.create(session, NotificationDraft::new(title, "m"), now).unwrap();
        }
        let listed: Vec<_> = reg.list_by_session(s1).into_iter().map(|r| r.title).collect();
        assert_eq!(listed, ["a", "c"]);
        assert!(reg.list_by_session(SessionId::from(7)).is_empty());
    }

    #[test]
    fn index_tracks_records_with_deadlines() {
        let reg = registry();
        let now = Utc::now();
        let late = now + Duration::seconds(60);
        let soon = now + Duration::seconds(5);

        let a = reg
            .create(s0(), NotificationDraft::new("a", "1").with_expiry(late), now)
            .unwrap();
        let _ = reg.create(s0(), NotificationDraft::new("b", "2"), now).unwrap();
        let c = reg
            .create(s0(), NotificationDraft::new("c", "3").with_expiry(soon), now)
            .unwrap();

        assert_eq!(reg.indexed(), 2);
        assert_eq!(reg.earliest_deadline(), Some((soon, c.id())));

        let _ = reg.delete(c.id()).unwrap();
        assert_eq!(reg.earliest_deadline(), Some((late, a.id())));
        let _ = reg.delete(a.id()).unwrap();
        assert_eq!(reg.indexed(), 0);
    }

    #[test]
    fn equal_deadlines_break_ties_on_identifier() {
        let reg = registry();
        let now = Utc::now();
        let at = now + Duration::seconds(10);
        let a = reg
            .create(s0(), NotificationDraft::new("a", "1").with_expiry(at), now)
            .unwrap();
        let _ = reg
            .create(s0(), NotificationDraft::new("b", "2").with_expiry(at), now)
            .unwrap();
        assert_eq!(reg.earliest_deadline(), Some((at, a.id())));
    }

    #[test]
    fn update_rekeys_deadline() {
        let reg = registry();
        let now = Utc::now();
        let first = now + Duration::seconds(30);
        let moved = now + Duration::seconds(90);
        let r = reg
            .create(s0(), NotificationDraft::new("a", "1").with_expiry(first), now)
            .unwrap();
        let _ = reg
            .update(
                r.id(),
                NotificationPatch {
                    expires_at: Some(moved),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(reg.indexed(), 1);
        assert_eq!(reg.earliest_deadline(), Some((moved, r.id())));
    }

    #[test]
    fn disabled_expiry_keeps_index_empty() {
        let reg = NotificationRegistry::new(4, false);
        let now = Utc::now();
        let r = reg
            .create(s0(), NotificationDraft::new("a", "1").with_expiry(now), now)
            .unwrap();
        assert_eq!(reg.indexed(), 0);
        assert_eq!(reg.get(r.id()).unwrap().expires_at, Some(now));
    }

    #[test]
    fn expire_only_when_due() {
        let reg = registry();
        let now = Utc::now();
        let r = reg
            .create(
                s0(),
                NotificationDraft::new("a", "1").with_expiry(now + Duration::seconds(5)),
                now,
            )
            .unwrap();
        assert!(reg.expire(r.id(), now).is_none());
        assert!(reg.contains(r.id()));

        let expired = reg.expire(r.id(), now + Duration::seconds(5)).unwrap();
        assert_eq!(expired.status, NotificationStatus::Expired);
        assert!(!reg.contains(r.id()));
        assert_eq!(reg.indexed(), 0);
    }

    #[tokio::test]
    async fn earlier_deadline_wakes_waiter() {
        let reg = registry();
        let now = Utc::now();
        let _ = reg
            .create(
                s0(),
                NotificationDraft::new("a", "1").with_expiry(now + Duration::seconds(60)),
                now,
            )
            .unwrap();
        // The first insert left a stored wake.
        reg.deadline_changed().await;

        let _ = reg
            .create(
                s0(),
                NotificationDraft::new("b", "2").with_expiry(now + Duration::seconds(120)),
                now,
            )
            .unwrap();
        let later_woke = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            reg.deadline_changed(),
        )
        .await;
        assert!(later_woke.is_err(), "a later deadline must not wake the reaper");

        let _ = reg
            .create(
                s0(),
                NotificationDraft::new("c", "3").with_expiry(now + Duration::seconds(1)),
                now,
            )
            .unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(1), reg.deadline_changed())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn update_to_earlier_deadline_wakes_waiter() {
        let reg = registry();
        let now = Utc::now();
        let a = reg
            .create(
                s0(),
                NotificationDraft::new("a", "1").with_expiry(now + Duration::seconds(60)),
                now,
            )
            .unwrap();
        let _ = reg
            .create(
                s0(),
                NotificationDraft::new("b", "2").with_expiry(now + Duration::seconds(30)),
                now,
            )
            .unwrap();
        reg.deadline_changed().await;

        let moved = now + Duration::seconds(5);
        let _ = reg
            .update(
                a.id(),
                NotificationPatch {
                    expires_at: Some(moved),
                    ..Default::default()
                },
            )
            .unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(1), reg.deadline_changed())
            .await
            .unwrap();
        assert_eq!(reg.earliest_deadline(), Some((moved, a.id())));
    }

    #[derive(Debug, Clone)]
    enum Op {
        Create(Option<i64>),
        Update(usize, Option<i64>),
        Delete(usize),
    }

    fn op() -> impl Strategy<Value = Op> {
        let offset = proptest::option::of(-5i64..60);
        prop_oneof![
            offset.clone().prop_map(Op::Create),
            (0usize..8, offset).prop_map(|(i, at)| Op::Update(i, at)),
            (0usize..8).prop_map(Op::Delete),
        ]
    }

    proptest! {
        #[test]
        fn index_tracks_live_deadlines(ops in proptest::collection::vec(op(), 0..120)) {
            let reg = NotificationRegistry::new(8, true);
            let now = Utc::now();
            let at = |secs: i64| now + Duration::seconds(secs);
            let mut live: Vec<NotificationId> = Vec::new();
            for op in ops {
                match op {
                    Op::Create(offset) => {
                        let mut draft = NotificationDraft::new("t", "m");
                        if let Some(secs) = offset {
                            draft = draft.with_expiry(at(secs));
                        }
                        if let Ok(record) = reg.create(s0(), draft, now) {
                            live.push(record.id());
                        }
                    }
                    Op::Update(i, offset) if !live.is_empty() => {
                        let patch = NotificationPatch {
                            expires_at: offset.map(at),
                            ..Default::default()
                        };
                        prop_assert!(reg.update(live[i % live.len()], patch).is_ok());
                    }
                    Op::Delete(i) if !live.is_empty() => {
                        let id = live.swap_remove(i % live.len());
                        prop_assert!(reg.delete(id).is_ok());
                    }
                    _ => {}
                }

                let records = reg.list_by_session(s0());
                prop_assert_eq!(records.len(), live.len());
                let mut deadlines: Vec<_> = records
                    .iter()
                    .filter_map(|r| r.expires_at.map(|d| (d, r.id())))
                    .collect();
                deadlines.sort_unstable();
                prop_assert_eq!(reg.indexed(), deadlines.len());
                prop_assert_eq!(reg.earliest_deadline(), deadlines.first().copied());
            }
        }
    }
}
