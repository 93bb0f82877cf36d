use std::path::Path;

use anyhow::{Context, Result, bail};
use chrono::{Local, NaiveDateTime};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, params};

use crate::models::{CycleRecord, CycleStats, format_timestamp, parse_timestamp};
use crate::store::{CycleStore, SettingsStore};

const CYCLE_COLUMNS: &str =
    "id, meal1_start, between_meals_start, meal2_start, fasting_start, fasting_finish";

pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;
        let db = Database { conn };
        db.migrate()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Database { conn };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> Result<()> {
        let version: i64 = self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))?;

        if version < 1 {
            self.conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS cycles (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    meal1_start TEXT,
                    between_meals_start TEXT,
                    meal2_start TEXT,
                    fasting_start TEXT,
                    fasting_finish TEXT
                );

                CREATE INDEX IF NOT EXISTS idx_cycles_fasting_finish ON cycles(fasting_finish);

                CREATE TABLE IF NOT EXISTS user_settings (
                    key TEXT PRIMARY KEY NOT NULL,
                    value TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                PRAGMA user_version = 1;",
            )?;
        }

        Ok(())
    }

    // --- Row mapping helpers ---

    fn timestamp_column(
        row: &rusqlite::Row,
        idx: usize,
    ) -> rusqlite::Result<Option<NaiveDateTime>> {
        let raw: Option<String> = row.get(idx)?;
        raw.map(|s| {
            parse_timestamp(&s).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into())
            })
        })
        .transpose()
    }

    // Expects CYCLE_COLUMNS in order.
    fn cycle_from_row(row: &rusqlite::Row) -> rusqlite::Result<CycleRecord> {
        Ok(CycleRecord {
            id: Some(row.get(0)?),
            meal1_start: Self::timestamp_column(row, 1)?,
            between_meals_start: Self::timestamp_column(row, 2)?,
            meal2_start: Self::timestamp_column(row, 3)?,
            fasting_start: Self::timestamp_column(row, 4)?,
            fasting_finish: Self::timestamp_column(row, 5)?,
        })
    }

    /// Run a query expected to match at most one cycle row.
    fn query_one_cycle<P: rusqlite::Params>(
        &self,
        where_clause: &str,
        params: P,
    ) -> Result<Option<CycleRecord>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {CYCLE_COLUMNS} FROM cycles WHERE {where_clause}"))?;
        let rows = stmt
            .query_map(params, Self::cycle_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        if rows.len() > 1 {
            bail!(
                "Expected at most one cycle for '{where_clause}', found {}",
                rows.len()
            );
        }
        Ok(rows.into_iter().next())
    }

    pub fn get_cycle(&self, id: i64) -> Result<Option<CycleRecord>> {
        self.query_one_cycle("id = ?1", params![id])
    }
}

impl CycleStore for Database {
    fn insert_cycle(&self, record: &CycleRecord) -> Result<i64> {
        if let Some(id) = record.id {
            bail!("Cannot insert cycle that already has id {id}");
        }
        self.conn.execute(
            "INSERT INTO cycles
                 (meal1_start, between_meals_start, meal2_start, fasting_start, fasting_finish)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                record.meal1_start.map(format_timestamp),
                record.between_meals_start.map(format_timestamp),
                record.meal2_start.map(format_timestamp),
                record.fasting_start.map(format_timestamp),
                record.fasting_finish.map(format_timestamp),
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        if id <= 0 {
            bail!("Database did not generate an id for the new cycle");
        }
        Ok(id)
    }

    fn update_cycle(&self, record: &CycleRecord) -> Result<()> {
        let Some(id) = record.id else {
            bail!("Cannot update a cycle without an id");
        };
        let rows = self.conn.execute(
            "UPDATE cycles
             SET meal1_start = ?1, between_meals_start = ?2, meal2_start = ?3,
                 fasting_start = ?4, fasting_finish = ?5
             WHERE id = ?6",
            params![
                record.meal1_start.map(format_timestamp),
                record.between_meals_start.map(format_timestamp),
                record.meal2_start.map(format_timestamp),
                record.fasting_start.map(format_timestamp),
                record.fasting_finish.map(format_timestamp),
                id,
            ],
        )?;
        if rows != 1 {
            bail!("Cycle {id} not found");
        }
        Ok(())
    }

    fn delete_cycle(&self, id: i64) -> Result<bool> {
        let rows = self
            .conn
            .execute("DELETE FROM cycles WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    fn current_cycle(&self) -> Result<Option<CycleRecord>> {
        self.query_one_cycle("fasting_finish IS NULL", [])
    }

    fn previous_cycle(&self, before_id: Option<i64>) -> Result<Option<CycleRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {CYCLE_COLUMNS} FROM cycles
             WHERE ?1 IS NULL OR id < ?1
             ORDER BY id DESC LIMIT 1"
        ))?;
        let row = stmt
            .query_row(params![before_id], Self::cycle_from_row)
            .optional()?;
        Ok(row)
    }

    fn list_cycles(&self) -> Result<Vec<CycleRecord>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {CYCLE_COLUMNS} FROM cycles ORDER BY id DESC"))?;
        let cycles = stmt
            .query_map([], Self::cycle_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(cycles)
    }

    fn count_cycles(&self) -> Result<i64> {
        let count = self
            .conn
            .query_row("SELECT COUNT(*) FROM cycles", [], |row| row.get(0))?;
        Ok(count)
    }

    fn count_completed_cycles(&self) -> Result<i64> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM cycles WHERE fasting_start IS NOT NULL",
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    fn delete_cycles_before(&self, id: Option<i64>) -> Result<usize> {
        let rows = match id {
            Some(id) => self
                .conn
                .execute("DELETE FROM cycles WHERE id < ?1", params![id])?,
            None => self.conn.execute("DELETE FROM cycles", [])?,
        };
        Ok(rows)
    }

    fn prune_cycles(&self, keep: i64) -> Result<usize> {
        let rows = self.conn.execute(
            "DELETE FROM cycles
             WHERE id NOT IN (SELECT id FROM cycles ORDER BY id DESC LIMIT ?1)",
            params![keep],
        )?;
        Ok(rows)
    }

    fn cycle_stats(&self, limit: i64) -> Result<CycleStats> {
        let stats = self.conn.query_row(
            "SELECT AVG((STRFTIME('%s', between_meals_start) - STRFTIME('%s', meal1_start)) / 60),
                    AVG((STRFTIME('%s', meal2_start) - STRFTIME('%s', between_meals_start)) / 60),
                    AVG((STRFTIME('%s', fasting_start) - STRFTIME('%s', meal2_start)) / 60),
                    AVG((STRFTIME('%s', fasting_start) - STRFTIME('%s', meal1_start)) / 60),
                    COUNT(*),
                    COUNT(meal2_start)
             FROM cycles
             WHERE id IN (
                 SELECT id FROM cycles
                 WHERE fasting_start IS NOT NULL
                 ORDER BY id DESC
                 LIMIT ?1
             )",
            params![limit],
            |row| {
                Ok(CycleStats::from_db(
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                ))
            },
        )?;
        Ok(stats)
    }

    fn in_transaction<T>(&self, f: impl FnOnce(&Self) -> Result<T>) -> Result<T> {
        // Dropping the transaction without commit rolls it back.
        let tx = self.conn.unchecked_transaction()?;
        let value = f(self)?;
        tx.commit()?;
        Ok(value)
    }
}

impl SettingsStore for Database {
    fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT value FROM user_settings WHERE key = ?1")?;
        let mut rows = stmt.query(params![key])?;
        if let Some(row) = rows.next()? {
            Ok(Some(row.get(0)?))
        } else {
            Ok(None)
        }
    }

    fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let now = Local::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO user_settings (key, value, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE
                 SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, now],
        )?;
        Ok(())
    }

    fn delete_setting(&self, key: &str) -> Result<bool> {
        let rows = self
            .conn
            .execute("DELETE FROM user_settings WHERE key = ?1", params![key])?;
        Ok(rows > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};

    fn t0() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 6, 15)
            .unwrap()
            .and_hms_opt(8, 0, 0)
            .unwrap()
    }

    fn new_cycle(start: NaiveDateTime) -> CycleRecord {
        CycleRecord {
            meal1_start: Some(start),
            ..CycleRecord::default()
        }
    }

    /// A finished cycle: 30 min meal 1, gap, 20 min meal 2, archived next morning.
    fn completed_cycle(start: NaiveDateTime, omad: bool) -> CycleRecord {
        let between = start + Duration::minutes(30);
        let (meal2, fasting) = if omad {
            (None, between)
        } else {
            let meal2 = start + Duration::hours(4);
            (Some(meal2), meal2 + Duration::minutes(20))
        };
        CycleRecord {
            id: None,
            meal1_start: Some(start),
            between_meals_start: Some(between),
            meal2_start: meal2,
            fasting_start: Some(fasting),
            fasting_finish: Some(start + Duration::hours(24)),
        }
    }

    #[test]
    fn test_insert_and_get_cycle() {
        let db = Database::open_in_memory().unwrap();
        let id = db.insert_cycle(&new_cycle(t0())).unwrap();

        let fetched = db.get_cycle(id).unwrap().unwrap();
        assert_eq!(fetched.id, Some(id));
        assert_eq!(fetched.meal1_start, Some(t0()));
        assert!(fetched.between_meals_start.is_none());
        assert!(fetched.is_current());
    }

    #[test]
    fn test_insert_rejects_existing_id() {
        let db = Database::open_in_memory().unwrap();
        let mut record = new_cycle(t0());
        record.id = Some(7);
        assert!(db.insert_cycle(&record).is_err());
    }

    #[test]
    fn test_ids_start_at_one_and_increase() {
        let db = Database::open_in_memory().unwrap();
        let first = db.insert_cycle(&completed_cycle(t0(), false)).unwrap();
        let second = db.insert_cycle(&new_cycle(t0() + Duration::days(1))).unwrap();
        assert_eq!(first, 1);
        assert!(second > first);
    }

    #[test]
    fn test_update_cycle() {
        let db = Database::open_in_memory().unwrap();
        let id = db.insert_cycle(&new_cycle(t0())).unwrap();

        let mut record = db.get_cycle(id).unwrap().unwrap();
        record.between_meals_start = Some(t0() + Duration::minutes(25));
        db.update_cycle(&record).unwrap();

        let fetched = db.get_cycle(id).unwrap().unwrap();
        assert_eq!(fetched, record);
    }

    #[test]
    fn test_update_missing_cycle_fails() {
        let db = Database::open_in_memory().unwrap();
        let mut record = new_cycle(t0());
        record.id = Some(42);
        assert!(db.update_cycle(&record).is_err());
        record.id = None;
        assert!(db.update_cycle(&record).is_err());
    }

    #[test]
    fn test_delete_cycle() {
        let db = Database::open_in_memory().unwrap();
        let id = db.insert_cycle(&new_cycle(t0())).unwrap();
        assert!(db.delete_cycle(id).unwrap());
        assert!(!db.delete_cycle(id).unwrap());
        assert!(db.get_cycle(id).unwrap().is_none());
    }

    #[test]
    fn test_current_cycle() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.current_cycle().unwrap().is_none());

        db.insert_cycle(&completed_cycle(t0(), false)).unwrap();
        assert!(db.current_cycle().unwrap().is_none());

        let id = db.insert_cycle(&new_cycle(t0() + Duration::days(1))).unwrap();
        assert_eq!(db.current_cycle().unwrap().unwrap().id, Some(id));
    }

    #[test]
    fn test_two_open_cycles_is_an_error() {
        let db = Database::open_in_memory().unwrap();
        db.insert_cycle(&new_cycle(t0())).unwrap();
        db.insert_cycle(&new_cycle(t0() + Duration::days(1))).unwrap();
        let err = db.current_cycle().unwrap_err();
        assert!(err.to_string().contains("at most one cycle"));
    }

    #[test]
    fn test_previous_cycle() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.previous_cycle(None).unwrap().is_none());

        let first = db.insert_cycle(&completed_cycle(t0(), false)).unwrap();
        let second = db
            .insert_cycle(&completed_cycle(t0() + Duration::days(1), false))
            .unwrap();
        let third = db.insert_cycle(&new_cycle(t0() + Duration::days(2))).unwrap();

        assert_eq!(db.previous_cycle(Some(third)).unwrap().unwrap().id, Some(second));
        assert_eq!(db.previous_cycle(Some(second)).unwrap().unwrap().id, Some(first));
        assert!(db.previous_cycle(Some(first)).unwrap().is_none());
        assert_eq!(db.previous_cycle(None).unwrap().unwrap().id, Some(third));
    }

    #[test]
    fn test_list_and_count_cycles() {
        let db = Database::open_in_memory().unwrap();
        db.insert_cycle(&completed_cycle(t0(), false)).unwrap();
        db.insert_cycle(&new_cycle(t0() + Duration::days(1))).unwrap();

        let all = db.list_cycles().unwrap();
        assert_eq!(all.len(), 2);
        assert!(all[0].id > all[1].id);
        assert_eq!(db.count_cycles().unwrap(), 2);
        assert_eq!(db.count_completed_cycles().unwrap(), 1);
    }

    #[test]
    fn test_delete_cycles_before() {
        let db = Database::open_in_memory().unwrap();
        db.insert_cycle(&completed_cycle(t0(), false)).unwrap();
        db.insert_cycle(&completed_cycle(t0() + Duration::days(1), false))
            .unwrap();
        let current = db.insert_cycle(&new_cycle(t0() + Duration::days(2))).unwrap();

        assert_eq!(db.delete_cycles_before(Some(current)).unwrap(), 2);
        assert_eq!(db.count_cycles().unwrap(), 1);
        assert_eq!(db.delete_cycles_before(None).unwrap(), 1);
        assert_eq!(db.count_cycles().unwrap(), 0);
    }

    #[test]
    fn test_prune_cycles_keeps_most_recent() {
        let db = Database::open_in_memory().unwrap();
        let mut ids = Vec::new();
        for day in 0..5 {
            ids.push(
                db.insert_cycle(&completed_cycle(t0() + Duration::days(day), false))
                    .unwrap(),
            );
        }
        assert_eq!(db.prune_cycles(3).unwrap(), 2);
        let remaining: Vec<i64> = db.list_cycles().unwrap().iter().filter_map(|c| c.id).collect();
        assert_eq!(remaining, vec![ids[4], ids[3], ids[2]]);
    }

    #[test]
    fn test_cycle_stats() {
        let db = Database::open_in_memory().unwrap();
        db.insert_cycle(&completed_cycle(t0(), false)).unwrap();
        db.insert_cycle(&completed_cycle(t0() + Duration::days(1), true))
            .unwrap();
        db.insert_cycle(&new_cycle(t0() + Duration::days(2))).unwrap();

        let stats = db.cycle_stats(7).unwrap();
        assert_eq!(stats.meal1_count, 2);
        assert_eq!(stats.meal2_count, 1);
        assert_eq!(stats.avg_meal1_minutes, Some(30));
        assert_eq!(stats.avg_meal2_minutes, Some(20));
        assert_eq!(stats.avg_between_meals_minutes, Some(210));
        // (260 + 30) / 2
        assert_eq!(stats.avg_eating_window_minutes, Some(145));
        // (30 * 2 + 20 * 1) / 3 = 26.7
        assert_eq!(stats.avg_meal_minutes, Some(27));
        assert_eq!(stats.omad_count, 1);
        assert_eq!(stats.omad_pct, 50);

        let last = db.cycle_stats(1).unwrap();
        assert_eq!(last.meal1_count, 1);
        assert_eq!(last.omad_count, 1);
        assert_eq!(last.avg_eating_window_minutes, Some(30));
    }

    #[test]
    fn test_cycle_stats_empty() {
        let db = Database::open_in_memory().unwrap();
        let stats = db.cycle_stats(30).unwrap();
        assert_eq!(stats.meal1_count, 0);
        assert!(stats.avg_eating_window_minutes.is_none());
    }

    #[test]
    fn test_settings_crud() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.get_setting("max_meal_minutes").unwrap().is_none());

        db.set_setting("max_meal_minutes", "25").unwrap();
        assert_eq!(db.get_setting("max_meal_minutes").unwrap().as_deref(), Some("25"));

        db.set_setting("max_meal_minutes", "35").unwrap();
        assert_eq!(db.get_setting("max_meal_minutes").unwrap().as_deref(), Some("35"));

        assert!(db.delete_setting("max_meal_minutes").unwrap());
        assert!(!db.delete_setting("max_meal_minutes").unwrap());
    }

    #[test]
    fn test_transaction_commits_all_writes() {
        let db = Database::open_in_memory().unwrap();
        let first = db.insert_cycle(&new_cycle(t0())).unwrap();

        let second = db
            .in_transaction(|db| {
                let mut archived = db.get_cycle(first)?.unwrap();
                archived.fasting_finish = Some(t0() + Duration::hours(24));
                db.update_cycle(&archived)?;
                db.insert_cycle(&new_cycle(t0() + Duration::hours(24)))
            })
            .unwrap();

        assert_eq!(db.count_cycles().unwrap(), 2);
        assert_eq!(db.current_cycle().unwrap().unwrap().id, Some(second));
    }

    #[test]
    fn test_transaction_rolls_back_on_error() {
        let db = Database::open_in_memory().unwrap();
        let id = db.insert_cycle(&new_cycle(t0())).unwrap();

        let result: Result<()> = db.in_transaction(|db| {
            let mut archived = db.get_cycle(id)?.unwrap();
            archived.fasting_finish = Some(t0() + Duration::hours(24));
            db.update_cycle(&archived)?;
            bail!("insert failed")
        });

        assert!(result.is_err());
        let fetched = db.get_cycle(id).unwrap().unwrap();
        assert!(fetched.fasting_finish.is_none());
        assert_eq!(db.current_cycle().unwrap().unwrap().id, Some(id));
    }

    #[test]
    fn test_open_on_disk_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("iftimer.db");
        {
            let db = Database::open(&path).unwrap();
            db.insert_cycle(&new_cycle(t0())).unwrap();
        }
        let db = Database::open(&path).unwrap();
        assert_eq!(db.count_cycles().unwrap(), 1);
    }
}
