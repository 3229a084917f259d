//! Replays collected changelog items from the store.

use super::{ChangelogSource, SourceStats};
use crate::Result;
use crate::store::SqliteStore;
use timeline_core::ChangeEvent;

/// Changelog source backed by the raw changelog table.
///
/// Entities are replayed one at a time in ascending id order, each in
/// (timestamp, sequence) order. Only one entity's events are held in memory
/// and the store lock is released before the handler runs, so the handler
/// may write to the same store.
pub struct StoreChangelogSource<'s> {
    store: &'s SqliteStore,
    source_id: u64,
}

impl<'s> StoreChangelogSource<'s> {
    pub fn new(store: &'s SqliteStore, source_id: u64) -> Self {
        Self { store, source_id }
    }
}

impl ChangelogSource for StoreChangelogSource<'_> {
    fn name(&self) -> &'static str {
        "store"
    }

    fn process<F>(&mut self, mut handler: F) -> Result<SourceStats>
    where
        F: FnMut(ChangeEvent) -> Result<bool>,
    {
        let mut stats = SourceStats::default();
        let entities = self.store.changelog_entities(self.source_id)?;
        tracing::debug!(
            source_id = self.source_id,
            entities = entities.len(),
            "Replaying raw changelog"
        );

        for entity_id in entities {
            for event in self.store.changelog_for_entity(self.source_id, entity_id)? {
                stats.total_events += 1;
                stats.delivered_events += 1;
                if !handler(event)? {
                    stats.stopped_early = true;
                    return Ok(stats);
                }
            }
        }

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::RawChangelogItem;
    use chrono::DateTime;
    use timeline_core::ChangeField;

    fn item(item_id: u64, entity_id: u64, secs: i64, to: &str) -> RawChangelogItem {
        RawChangelogItem {
            item_id,
            event: ChangeEvent::new(
                entity_id,
                ChangeField::Owner,
                "",
                to,
                DateTime::from_timestamp(secs, 0).unwrap(),
            ),
        }
    }

    #[test]
    fn test_replays_per_entity_in_time_order() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .insert_raw_changelog(
                3,
                &[item(1, 9, 50, "c"), item(2, 4, 20, "b"), item(3, 4, 10, "a")],
            )
            .unwrap();

        let mut seen = Vec::new();
        let stats = StoreChangelogSource::new(&store, 3)
            .process(|event| {
                seen.push((event.entity_id, event.to_value));
                Ok(true)
            })
            .unwrap();

        assert_eq!(stats.delivered_events, 3);
        assert_eq!(
            seen,
            vec![(4, "a".to_string()), (4, "b".to_string()), (9, "c".to_string())]
        );
    }

    #[test]
    fn test_same_timestamp_ordered_by_sequence() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .insert_raw_changelog(1, &[item(7, 1, 10, "second"), item(6, 1, 10, "first")])
            .unwrap();

        let mut seen = Vec::new();
        StoreChangelogSource::new(&store, 1)
            .process(|event| {
                seen.push(event.to_value);
                Ok(true)
            })
            .unwrap();
        assert_eq!(seen, vec!["first", "second"]);
    }

    #[test]
    fn test_handler_may_write_to_store() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.insert_raw_changelog(1, &[item(1, 1, 10, "a")]).unwrap();

        StoreChangelogSource::new(&store, 1)
            .process(|event| {
                store.insert_raw_changelog(2, &[RawChangelogItem { item_id: 1, event }])?;
                Ok(true)
            })
            .unwrap();
        assert_eq!(store.changelog_entities(2).unwrap(), vec![1]);
    }
}
