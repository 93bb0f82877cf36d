use anyhow::Result;

use crate::models::{CycleRecord, CycleStats};

/// Persistence the cycle controller needs. `Database` is the production
/// implementation; every call is synchronous and local.
pub trait CycleStore {
    /// Insert a new cycle and return the generated id. `record.id` must be `None`.
    fn insert_cycle(&self, record: &CycleRecord) -> Result<i64>;
    /// Overwrite the row with `record.id`.
    fn update_cycle(&self, record: &CycleRecord) -> Result<()>;
    fn delete_cycle(&self, id: i64) -> Result<bool>;

    /// The single row with `fasting_finish IS NULL`, if any. More than one is an error.
    fn current_cycle(&self) -> Result<Option<CycleRecord>>;
    /// The row with the largest id below `before_id`; with `None`, the row with the largest id.
    fn previous_cycle(&self, before_id: Option<i64>) -> Result<Option<CycleRecord>>;
    /// All rows, newest first.
    fn list_cycles(&self) -> Result<Vec<CycleRecord>>;

    fn count_cycles(&self) -> Result<i64>;
    /// Rows whose eating window closed (`fasting_start IS NOT NULL`).
    fn count_completed_cycles(&self) -> Result<i64>;

    /// Delete every row with an id below `id`, or every row when `None`.
    fn delete_cycles_before(&self, id: Option<i64>) -> Result<usize>;
    /// Keep the `keep` most recent rows.
    fn prune_cycles(&self, keep: i64) -> Result<usize>;

    /// Averages over the `limit` most recent completed cycles.
    fn cycle_stats(&self, limit: i64) -> Result<CycleStats>;

    /// Run `f` so that either all of its writes land or none do.
    fn in_transaction<T>(&self, f: impl FnOnce(&Self) -> Result<T>) -> Result<T>
    where
        Self: Sized;
}

/// Key-value store for user settings and small pieces of resume state.
pub trait SettingsStore {
    fn get_setting(&self, key: &str) -> Result<Option<String>>;
    fn set_setting(&self, key: &str, value: &str) -> Result<()>;
    fn delete_setting(&self, key: &str) -> Result<bool>;
}
