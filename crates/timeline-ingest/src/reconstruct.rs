//! Temporal history reconstruction.
//!
//! Folds an ordered stream of change events into interval history:
//!
//! - **State / owner**: each new value closes the open interval of the entity
//!   (persisted at once, immutable afterwards) and opens a new one in memory.
//! - **Group membership**: the leaving and entering bucket sets of an event
//!   are diffed, removals and additions update the entity's membership record
//!   with latest-wins / earliest-wins rules, and membership spans are opened
//!   and closed like intervals.
//!
//! Open intervals and spans stay in the working set until [`flush`]. Flushing
//! also reconciles every membership record against its persisted version and
//! writes only the records that changed, so replaying the same events against
//! a store that already holds their output writes nothing.
//!
//! [`flush`]: HistoryReconstructor::flush

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use metrics::counter;
use timeline_core::{
    Bucket, BucketKey, ChangeEvent, ChangeField, Dimension, DomainIdGenerator, EntityKey,
    Interval, MembershipKey, MembershipRecord, MembershipSpan, classify_stage, membership_delta,
};

use crate::Result;
use crate::source::{ChangelogSource, SourceStats};
use crate::store::HistoryStore;

/// Counters for one reconstruction pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconstructStats {
    /// Events fed in, including ignored and skipped ones.
    pub events: usize,
    /// Events for fields the reconstructor does not track.
    pub ignored: usize,
    /// Membership events skipped because a bucket list was malformed.
    pub skipped: usize,
    /// Events older than an earlier event of the same entity.
    pub out_of_order: usize,
    /// Intervals closed and persisted while feeding. A value replaced at the
    /// instant its interval opened is not counted.
    pub intervals_closed: usize,
    /// Membership spans closed and persisted.
    pub spans_closed: usize,
    /// Membership records written at flush.
    pub memberships_written: usize,
}

/// Canonical id generators for the entities reconstruction writes.
#[derive(Debug, Clone)]
struct CanonicalIds {
    issues: DomainIdGenerator,
    sprints: DomainIdGenerator,
}

impl CanonicalIds {
    fn new() -> Self {
        Self {
            issues: DomainIdGenerator::new("jira", "JiraIssue"),
            sprints: DomainIdGenerator::new("jira", "JiraSprint"),
        }
    }

    fn entity(&self, key: EntityKey) -> String {
        self.issues.generate(&[key.source_id, key.entity_id])
    }

    fn bucket(&self, key: BucketKey) -> String {
        self.sprints.generate(&[key.source_id, key.bucket_id])
    }
}

/// In-progress state of one reconstruction pass. Owned by exactly one
/// reconstructor.
#[derive(Debug, Default)]
struct WorkingSet {
    open_intervals: HashMap<(EntityKey, Dimension), Interval>,
    memberships: BTreeMap<MembershipKey, MembershipRecord>,
    open_spans: BTreeMap<MembershipKey, MembershipSpan>,
    /// Spans closed at the instant they opened. Reopened by an addition at
    /// that same instant, otherwise persisted at flush.
    instant_spans: BTreeMap<MembershipKey, MembershipSpan>,
    /// Bucket reference data; `None` caches a bucket the store does not know.
    buckets: HashMap<BucketKey, Option<Bucket>>,
    last_seen: HashMap<EntityKey, DateTime<Utc>>,
}

/// Rebuilds interval history for one source instance.
///
/// Events of the same entity must be fed in chronological order. Different
/// entities never share working-set keys, so independent reconstructors may
/// run over disjoint entity sets.
pub struct HistoryReconstructor<'s, S: HistoryStore> {
    store: &'s S,
    source_id: u64,
    ids: CanonicalIds,
    working: WorkingSet,
    stats: ReconstructStats,
}

impl<'s, S: HistoryStore> HistoryReconstructor<'s, S> {
    pub fn new(store: &'s S, source_id: u64) -> Self {
        Self {
            store,
            source_id,
            ids: CanonicalIds::new(),
            working: WorkingSet::default(),
            stats: ReconstructStats::default(),
        }
    }

    pub fn stats(&self) -> &ReconstructStats {
        &self.stats
    }

    /// The open in-memory interval of an entity, if any.
    pub fn open_interval(&self, entity_id: u64, dimension: Dimension) -> Option<&Interval> {
        let key = EntityKey {
            source_id: self.source_id,
            entity_id,
        };
        self.working.open_intervals.get(&(key, dimension))
    }

    /// The in-memory membership record of an entity in a bucket, if any.
    pub fn membership(&self, entity_id: u64, bucket_id: u64) -> Option<&MembershipRecord> {
        self.working.memberships.get(&MembershipKey {
            source_id: self.source_id,
            bucket_id,
            entity_id,
        })
    }

    /// Apply one event.
    ///
    /// A malformed bucket list skips the event and returns `Ok`. Store errors
    /// are returned and leave the pass unusable.
    pub fn feed(&mut self, event: &ChangeEvent) -> Result<()> {
        self.stats.events += 1;
        counter!("history_events_total").increment(1);

        let dimension = match &event.field {
            ChangeField::State => Some(Dimension::State),
            ChangeField::Owner => Some(Dimension::Owner),
            ChangeField::GroupMembership => None,
            ChangeField::Other(_) => {
                self.stats.ignored += 1;
                return Ok(());
            }
        };

        let entity = EntityKey {
            source_id: self.source_id,
            entity_id: event.entity_id,
        };
        self.check_order(entity, event.timestamp);

        match dimension {
            Some(dimension) => self.apply_value(entity, dimension, event),
            None => self.apply_membership(entity, event),
        }
    }

    /// Persist everything still held in memory and return the pass counters.
    ///
    /// Open intervals and spans are written open. Membership records are
    /// reconciled against the store and only changed ones are upserted.
    pub fn flush(mut self) -> Result<ReconstructStats> {
        let mut open: Vec<_> = self.working.open_intervals.into_values().collect();
        open.sort_by(|a, b| {
            (a.dimension.as_str(), &a.entity_id).cmp(&(b.dimension.as_str(), &b.entity_id))
        });
        for interval in &open {
            self.store.append_interval(interval)?;
        }

        for span in self.working.open_spans.values() {
            self.store.append_span(span)?;
        }
        for span in self.working.instant_spans.values() {
            self.store.append_span(span)?;
            self.stats.spans_closed += 1;
        }

        let mut writes = Vec::new();
        for record in self.working.memberships.values() {
            let persisted = self.store.membership(&record.bucket_id, &record.entity_id)?;
            if let Some(merged) = record.reconcile(persisted.as_ref()) {
                writes.push(merged);
            }
        }
        if !writes.is_empty() {
            self.store.upsert_memberships(&writes)?;
        }
        self.stats.memberships_written = writes.len();
        counter!("history_memberships_written_total").increment(writes.len() as u64);

        tracing::info!(
            source_id = self.source_id,
            events = self.stats.events,
            open_intervals = open.len(),
            memberships = self.working.memberships.len(),
            memberships_written = writes.len(),
            "Flushed history"
        );
        Ok(self.stats)
    }

    fn check_order(&mut self, entity: EntityKey, t: DateTime<Utc>) {
        match self.working.last_seen.get_mut(&entity) {
            Some(last) if t < *last => {
                self.stats.out_of_order += 1;
                counter!("history_events_out_of_order_total").increment(1);
                tracing::warn!(
                    entity_id = entity.entity_id,
                    timestamp = %t,
                    latest = %last,
                    "Event older than a previous event of the same entity; applying in arrival order"
                );
            }
            Some(last) => *last = t,
            None => {
                self.working.last_seen.insert(entity, t);
            }
        }
    }

    fn apply_value(
        &mut self,
        entity: EntityKey,
        dimension: Dimension,
        event: &ChangeEvent,
    ) -> Result<()> {
        let key = (entity, dimension);

        // A second value at the instant the open interval started replaces it.
        if let Some(open) = self.working.open_intervals.get_mut(&key)
            && open.start_date == event.timestamp
        {
            open.value = event.to_value.clone();
            return Ok(());
        }

        if let Some(open) = self.working.open_intervals.remove(&key) {
            self.store.append_interval(&open.closed_at(event.timestamp))?;
            self.stats.intervals_closed += 1;
            counter!("history_intervals_closed_total", "dimension" => dimension.as_str())
                .increment(1);
        }

        let interval = Interval::open(
            dimension,
            self.ids.entity(entity),
            event.to_value.clone(),
            event.timestamp,
        );
        self.working.open_intervals.insert(key, interval);
        Ok(())
    }

    fn apply_membership(&mut self, entity: EntityKey, event: &ChangeEvent) -> Result<()> {
        let (leaving, entering) = match membership_delta(&event.from_value, &event.to_value) {
            Ok(delta) => delta,
            Err(e) => {
                self.stats.skipped += 1;
                counter!("history_events_skipped_total").increment(1);
                tracing::warn!(
                    entity_id = entity.entity_id,
                    timestamp = %event.timestamp,
                    "Skipping membership event: {}",
                    e
                );
                return Ok(());
            }
        };

        let t = event.timestamp;

        for bucket_id in leaving {
            let key = MembershipKey {
                source_id: entity.source_id,
                bucket_id,
                entity_id: entity.entity_id,
            };
            self.record(key).record_removed(t);

            if let Some(span) = self.working.open_spans.remove(&key) {
                let closed = MembershipSpan {
                    end_date: Some(t),
                    ..span
                };
                if closed.start_date == t {
                    self.working.instant_spans.insert(key, closed);
                } else {
                    self.close_span(&closed)?;
                }
            }
        }

        for bucket_id in entering {
            let key = MembershipKey {
                source_id: entity.source_id,
                bucket_id,
                entity_id: entity.entity_id,
            };
            let stage = self
                .bucket(key.bucket())?
                .and_then(|bucket| classify_stage(&bucket, t));
            self.record(key).record_added(t, stage);

            if let Some(instant) = self.working.instant_spans.remove(&key) {
                if instant.start_date == t {
                    self.working.open_spans.insert(
                        key,
                        MembershipSpan {
                            end_date: None,
                            ..instant
                        },
                    );
                    continue;
                }
                self.close_span(&instant)?;
            }

            let ids = &self.ids;
            self.working
                .open_spans
                .entry(key)
                .or_insert_with(|| MembershipSpan {
                    entity_id: ids.entity(key.entity()),
                    bucket_id: ids.bucket(key.bucket()),
                    start_date: t,
                    end_date: None,
                });
        }

        Ok(())
    }

    fn close_span(&mut self, span: &MembershipSpan) -> Result<()> {
        self.store.append_span(span)?;
        self.stats.spans_closed += 1;
        Ok(())
    }

    fn record(&mut self, key: MembershipKey) -> &mut MembershipRecord {
        let ids = &self.ids;
        self.working
            .memberships
            .entry(key)
            .or_insert_with(|| MembershipRecord::new(ids.bucket(key.bucket()), ids.entity(key.entity())))
    }

    fn bucket(&mut self, key: BucketKey) -> Result<Option<Bucket>> {
        if let Some(cached) = self.working.buckets.get(&key) {
            return Ok(cached.clone());
        }
        let bucket = self.store.bucket(key)?;
        if bucket.is_none() {
            tracing::debug!(bucket_id = key.bucket_id, "Unknown bucket; stage left unspecified");
        }
        self.working.buckets.insert(key, bucket.clone());
        Ok(bucket)
    }
}

/// Run one full reconstruction pass over `source` and flush it.
pub fn reconstruct<C, S>(source: &mut C, store: &S, source_id: u64) -> Result<(SourceStats, ReconstructStats)>
where
    C: ChangelogSource,
    S: HistoryStore,
{
    let mut reconstructor = HistoryReconstructor::new(store, source_id);
    let source_stats = source.process(|event| {
        reconstructor.feed(&event)?;
        Ok(true)
    })?;
    let stats = reconstructor.flush()?;
    tracing::debug!(source = source.name(), ?source_stats, "Reconstruction pass complete");
    Ok((source_stats, stats))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use crate::store::{RawChangelogItem, RawSprint, SqliteStore};
    use crate::source::StoreChangelogSource;
    use timeline_core::AddedStage;

    fn ts(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    fn state(entity_id: u64, to: &str, secs: i64) -> ChangeEvent {
        ChangeEvent::new(entity_id, ChangeField::State, "", to, ts(secs))
    }

    fn sprint(entity_id: u64, from: &str, to: &str, secs: i64) -> ChangeEvent {
        ChangeEvent::new(entity_id, ChangeField::GroupMembership, from, to, ts(secs))
    }

    fn run(store: &SqliteStore, events: &[ChangeEvent]) -> ReconstructStats {
        let mut r = HistoryReconstructor::new(store, 1);
        for event in events {
            r.feed(event).unwrap();
        }
        r.flush().unwrap()
    }

    /// Store wrapper that fails every write.
    struct FailingStore(SqliteStore);

    impl HistoryStore for FailingStore {
        fn bucket(&self, key: BucketKey) -> Result<Option<Bucket>> {
            self.0.bucket(key)
        }
        fn membership(&self, bucket_id: &str, entity_id: &str) -> Result<Option<MembershipRecord>> {
            self.0.membership(bucket_id, entity_id)
        }
        fn upsert_memberships(&self, _: &[MembershipRecord]) -> Result<usize> {
            Err(Error::Database("read-only".to_string()))
        }
        fn append_interval(&self, _: &Interval) -> Result<()> {
            Err(Error::Database("read-only".to_string()))
        }
        fn append_span(&self, _: &MembershipSpan) -> Result<()> {
            Err(Error::Database("read-only".to_string()))
        }
    }

    // =========================================================================
    // State and owner intervals
    // =========================================================================

    #[test]
    fn test_state_change_closes_and_persists() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut r = HistoryReconstructor::new(&store, 1);
        r.feed(&state(1, "open", 0)).unwrap();
        r.feed(&state(1, "closed", 10)).unwrap();

        let persisted = store.intervals(Dimension::State, "jira:JiraIssue:1:1").unwrap();
        assert_eq!(persisted.len(), 1);
        assert_eq!(persisted[0].value, "open");
        assert_eq!(persisted[0].start_date, ts(0));
        assert_eq!(persisted[0].end_date, Some(ts(10)));

        let open = r.open_interval(1, Dimension::State).unwrap();
        assert_eq!(open.value, "closed");
        assert_eq!(open.start_date, ts(10));
        assert!(open.is_open());

        r.flush().unwrap();
        let persisted = store.intervals(Dimension::State, "jira:JiraIssue:1:1").unwrap();
        assert_eq!(persisted.len(), 2);
        assert!(persisted[1].is_open());
    }

    #[test]
    fn test_dimensions_are_independent() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut r = HistoryReconstructor::new(&store, 1);
        r.feed(&state(1, "open", 0)).unwrap();
        r.feed(&ChangeEvent::new(1, ChangeField::Owner, "", "alice", ts(5)))
            .unwrap();
        r.feed(&ChangeEvent::new(1, ChangeField::Owner, "alice", "bob", ts(7)))
            .unwrap();

        assert_eq!(r.open_interval(1, Dimension::State).unwrap().value, "open");
        assert_eq!(r.open_interval(1, Dimension::Owner).unwrap().value, "bob");
        assert_eq!(r.stats().intervals_closed, 1);
        assert!(store.intervals(Dimension::State, "jira:JiraIssue:1:1").unwrap().is_empty());
    }

    #[test]
    fn test_untracked_fields_ignored() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut r = HistoryReconstructor::new(&store, 1);
        r.feed(&ChangeEvent::new(1, ChangeField::from_name("priority"), "", "high", ts(0)))
            .unwrap();
        assert_eq!(r.stats().ignored, 1);
        assert!(r.open_interval(1, Dimension::State).is_none());
    }

    #[test]
    fn test_same_instant_value_replaces_open_interval() {
        let store = SqliteStore::open_in_memory().unwrap();
        let stats = run(
            &store,
            &[state(1, "open", 0), state(1, "review", 10), state(1, "done", 10)],
        );
        assert_eq!(stats.intervals_closed, 1);

        let rows = store.intervals(Dimension::State, "jira:JiraIssue:1:1").unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].value, "open");
        assert_eq!(rows[0].end_date, Some(ts(10)));
        assert_eq!(rows[1].value, "done");
        assert_eq!(rows[1].start_date, ts(10));
        assert!(rows[1].is_open());
    }

    #[test]
    fn test_same_instant_value_updates_persisted_open_interval() {
        let store = SqliteStore::open_in_memory().unwrap();
        run(&store, &[state(1, "open", 0), state(1, "review", 10)]);
        run(
            &store,
            &[state(1, "open", 0), state(1, "review", 10), state(1, "done", 10)],
        );

        let rows = store.intervals(Dimension::State, "jira:JiraIssue:1:1").unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].value, "done");
        assert!(rows[1].is_open());
    }

    // =========================================================================
    // Group membership
    // =========================================================================

    #[test]
    fn test_add_then_partial_remove() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut r = HistoryReconstructor::new(&store, 1);
        r.feed(&sprint(1, "", "5,6", 0)).unwrap();
        r.feed(&sprint(1, "5", "", 20)).unwrap();

        let five = r.membership(1, 5).unwrap();
        assert_eq!(five.added_date, Some(ts(0)));
        assert_eq!(five.removed_date, Some(ts(20)));
        assert!(five.is_removed);

        let six = r.membership(1, 6).unwrap();
        assert_eq!(six.added_date, Some(ts(0)));
        assert_eq!(six.removed_date, None);
        assert!(!six.is_removed);

        r.flush().unwrap();
        let stored = store
            .membership("jira:JiraSprint:1:5", "jira:JiraIssue:1:1")
            .unwrap()
            .unwrap();
        assert!(stored.is_removed);

        let spans = store.spans("jira:JiraIssue:1:1", "jira:JiraSprint:1:5").unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].end_date, Some(ts(20)));
        let spans = store.spans("jira:JiraIssue:1:1", "jira:JiraSprint:1:6").unwrap();
        assert!(spans[0].end_date.is_none());
    }

    #[test]
    fn test_shared_bucket_is_not_touched() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut r = HistoryReconstructor::new(&store, 1);
        r.feed(&sprint(1, "5,6", "5,7", 10)).unwrap();

        assert!(r.membership(1, 5).is_none());
        assert_eq!(r.membership(1, 6).unwrap().removed_date, Some(ts(10)));
        assert_eq!(r.membership(1, 6).unwrap().added_date, None);
        assert_eq!(r.membership(1, 7).unwrap().added_date, Some(ts(10)));
    }

    #[test]
    fn test_stage_from_bucket_boundaries() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .upsert_raw_sprints(
                1,
                &[RawSprint {
                    sprint_id: 5,
                    name: "Sprint 5".to_string(),
                    start_date: Some(ts(100)),
                    complete_date: Some(ts(200)),
                }],
            )
            .unwrap();

        let cases = [
            (1, 99, AddedStage::Before),
            (2, 100, AddedStage::During),
            (3, 200, AddedStage::During),
            (4, 201, AddedStage::After),
        ];
        let mut r = HistoryReconstructor::new(&store, 1);
        for (entity, secs, _) in cases {
            r.feed(&sprint(entity, "", "5", secs)).unwrap();
        }
        for (entity, _, stage) in cases {
            assert_eq!(r.membership(entity, 5).unwrap().added_stage, Some(stage));
        }
    }

    #[test]
    fn test_unknown_bucket_leaves_stage_unspecified() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut r = HistoryReconstructor::new(&store, 1);
        r.feed(&sprint(1, "", "9", 0)).unwrap();
        assert_eq!(r.membership(1, 9).unwrap().added_stage, None);
    }

    #[test]
    fn test_malformed_list_skips_only_that_event() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut r = HistoryReconstructor::new(&store, 1);
        r.feed(&sprint(1, "", "5,x", 0)).unwrap();
        r.feed(&sprint(1, "", "6", 5)).unwrap();

        assert_eq!(r.stats().skipped, 1);
        assert!(r.membership(1, 5).is_none());
        assert!(r.membership(1, 6).is_some());
    }

    #[test]
    fn test_readd_after_removal() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut r = HistoryReconstructor::new(&store, 1);
        r.feed(&sprint(1, "", "5", 0)).unwrap();
        r.feed(&sprint(1, "5", "", 10)).unwrap();
        r.feed(&sprint(1, "", "5", 20)).unwrap();

        let record = r.membership(1, 5).unwrap();
        assert_eq!(record.added_date, Some(ts(0)));
        assert_eq!(record.removed_date, Some(ts(10)));
        assert!(record.is_removed);

        r.flush().unwrap();
        let spans = store.spans("jira:JiraIssue:1:1", "jira:JiraSprint:1:5").unwrap();
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[0].end_date, Some(ts(10)));
        assert_eq!(spans[1].start_date, ts(20));
        assert!(spans[1].end_date.is_none());
    }

    #[test]
    fn test_readd_at_same_instant_keeps_span_open() {
        let store = SqliteStore::open_in_memory().unwrap();
        run(
            &store,
            &[sprint(1, "", "5", 10), sprint(1, "5", "", 10), sprint(1, "", "5", 10)],
        );

        let spans = store.spans("jira:JiraIssue:1:1", "jira:JiraSprint:1:5").unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].start_date, ts(10));
        assert!(spans[0].end_date.is_none());
    }

    #[test]
    fn test_remove_at_same_instant_persists_closed_span() {
        let store = SqliteStore::open_in_memory().unwrap();
        let stats = run(&store, &[sprint(1, "", "5", 10), sprint(1, "5", "", 10)]);
        assert_eq!(stats.spans_closed, 1);

        let spans = store.spans("jira:JiraIssue:1:1", "jira:JiraSprint:1:5").unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].end_date, Some(ts(10)));
    }

    #[test]
    fn test_out_of_order_detected_and_applied() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut r = HistoryReconstructor::new(&store, 1);
        r.feed(&state(1, "open", 10)).unwrap();
        r.feed(&state(1, "closed", 5)).unwrap();
        r.feed(&state(2, "open", 1)).unwrap();

        assert_eq!(r.stats().out_of_order, 1);
        assert_eq!(r.open_interval(1, Dimension::State).unwrap().value, "closed");
    }

    // =========================================================================
    // Reconciliation and idempotence
    // =========================================================================

    #[test]
    fn test_replay_writes_nothing() {
        let store = SqliteStore::open_in_memory().unwrap();
        let events = [
            state(1, "open", 0),
            state(1, "closed", 10),
            sprint(1, "", "5,6", 0),
            sprint(1, "5", "", 20),
        ];

        let first = run(&store, &events);
        assert_eq!(first.memberships_written, 2);
        let memberships = store.memberships().unwrap();
        let intervals = store.intervals(Dimension::State, "jira:JiraIssue:1:1").unwrap();

        let second = run(&store, &events);
        assert_eq!(second.memberships_written, 0);
        assert_eq!(store.memberships().unwrap(), memberships);
        assert_eq!(
            store.intervals(Dimension::State, "jira:JiraIssue:1:1").unwrap(),
            intervals
        );
    }

    #[test]
    fn test_partial_replay_never_regresses() {
        let store = SqliteStore::open_in_memory().unwrap();
        run(&store, &[sprint(1, "", "5", 0), sprint(1, "5", "", 30)]);

        // A later pass that only sees a subset of the history.
        run(&store, &[sprint(1, "", "5", 10), sprint(1, "5", "", 20)]);

        let stored = store
            .membership("jira:JiraSprint:1:5", "jira:JiraIssue:1:1")
            .unwrap()
            .unwrap();
        assert_eq!(stored.added_date, Some(ts(0)));
        assert_eq!(stored.removed_date, Some(ts(30)));
    }

    #[test]
    fn test_later_pass_extends_history() {
        let store = SqliteStore::open_in_memory().unwrap();
        run(&store, &[state(1, "open", 0)]);
        run(&store, &[state(1, "open", 0), state(1, "done", 40)]);

        let rows = store.intervals(Dimension::State, "jira:JiraIssue:1:1").unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].end_date, Some(ts(40)));
        assert!(rows[1].is_open());
    }

    #[test]
    fn test_store_error_propagates() {
        let store = FailingStore(SqliteStore::open_in_memory().unwrap());
        let mut r = HistoryReconstructor::new(&store, 1);
        r.feed(&state(1, "open", 0)).unwrap();
        let err = r.feed(&state(1, "closed", 10)).unwrap_err();
        assert!(matches!(err, Error::Database(_)));
    }

    #[test]
    fn test_reconstruct_from_store_source() {
        let store = SqliteStore::open_in_memory().unwrap();
        let items: Vec<_> = [state(1, "open", 0), state(1, "closed", 10), sprint(2, "", "5", 3)]
            .into_iter()
            .enumerate()
            .map(|(i, event)| RawChangelogItem {
                item_id: i as u64,
                event,
            })
            .collect();
        store.insert_raw_changelog(1, &items).unwrap();

        let mut source = StoreChangelogSource::new(&store, 1);
        let (source_stats, stats) = reconstruct(&mut source, &store, 1).unwrap();
        assert_eq!(source_stats.delivered_events, 3);
        assert_eq!(stats.intervals_closed, 1);
        assert_eq!(stats.memberships_written, 1);
    }
}
