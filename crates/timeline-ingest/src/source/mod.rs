//! Changelog source adapters.
//!
//! Sources deliver change events to history reconstruction. Every source
//! promises per-entity chronological order; nothing here re-sorts events.
//!
//! # Available Sources
//!
//! - [`JsonlChangelogSource`] - Reads JSONL files (one `ChangeEvent` per line)
//! - [`StoreChangelogSource`] - Replays the raw changelog table of a store

mod jsonl;
mod store;

pub use jsonl::{JsonlChangelogSource, JsonlConfig};
pub use store::StoreChangelogSource;

use crate::Result;
use timeline_core::ChangeEvent;

/// A source of change events.
pub trait ChangelogSource {
    /// Human-readable name for this source (used in logs).
    fn name(&self) -> &'static str;

    /// Deliver events to `handler` in order.
    ///
    /// The handler returns `Ok(true)` to continue, `Ok(false)` to stop
    /// gracefully, or `Err` to abort. Handler errors are always returned to
    /// the caller.
    fn process<F>(&mut self, handler: F) -> Result<SourceStats>
    where
        F: FnMut(ChangeEvent) -> Result<bool>;
}

/// Statistics from processing a changelog source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceStats {
    /// Events read from the source, including unparseable ones.
    pub total_events: usize,

    /// Events handed to the handler.
    pub delivered_events: usize,

    /// Events that could not be parsed and were skipped.
    pub parse_errors: usize,

    /// Whether the handler asked to stop before the source was exhausted.
    pub stopped_early: bool,
}
