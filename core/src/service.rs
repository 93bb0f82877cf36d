use std::path::Path;

use anyhow::Result;
use chrono::NaiveDateTime;
use serde::Serialize;

use crate::advance::AdvanceCheck;
use crate::controller::CycleController;
use crate::db::Database;
use crate::guidance::{Guidance, guidance};
use crate::models::{AppState, Cycle, CycleRecord, CycleStats, Notice};
use crate::settings::{STATS_RETENTION_CYCLES, Settings};
use crate::store::CycleStore;

/// Snapshot of the timers for display.
#[derive(Debug, Clone, Serialize)]
pub struct Status {
    pub state: AppState,
    pub cycle: Option<Cycle>,
    /// Time in the active stage; `None` before the first cycle.
    pub stage_minutes: Option<i64>,
    /// Running eating window, or the closed one while fasting.
    pub eating_window_minutes: Option<i64>,
    pub guidance: Guidance,
    pub can_cancel: bool,
    pub can_start_meal2_after_omad: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum AdvanceOutcome {
    /// The check stopped the transition; nothing was changed.
    Held { check: AdvanceCheck },
    Advanced { state: AppState, notice: Option<Notice> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum CancelOutcome {
    TooLate,
    Cancelled { state: AppState, notice: Option<Notice> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatsReport {
    pub previous: CycleStats,
    pub last_7: CycleStats,
    pub last_30: CycleStats,
    pub last_365: CycleStats,
}

/// Single entry point for front ends: owns the database, the controller and
/// the loaded settings. Every method takes the current time explicitly.
pub struct FastingService {
    ctl: CycleController<Database>,
    settings: Settings,
}

impl FastingService {
    pub fn new(db_path: &str) -> Result<Self> {
        let db = Database::open(Path::new(db_path))?;
        Self::with_database(db)
    }

    pub fn new_in_memory() -> Result<Self> {
        let db = Database::open_in_memory()?;
        Self::with_database(db)
    }

    fn with_database(db: Database) -> Result<Self> {
        let settings = Settings::load(&db)?;
        let ctl = CycleController::new(db)?;
        Ok(Self { ctl, settings })
    }

    #[must_use]
    pub fn state(&self) -> AppState {
        self.ctl.state()
    }

    #[must_use]
    pub fn current_cycle(&self) -> Option<&Cycle> {
        self.ctl.current_cycle()
    }

    pub fn controller(&self) -> &CycleController<Database> {
        &self.ctl
    }

    // --- Resume / tick ---

    /// Reload from storage, catch up on anything that expired while the app
    /// was closed, then run one tick.
    pub fn resume(&mut self, now: NaiveDateTime) -> Result<Vec<Notice>> {
        self.ctl.load_current_cycle()?;
        let mut notices = Vec::new();
        if let Some(notice) = self.ctl.check_inactivity(now)? {
            notices.push(notice);
        }
        if let Some(notice) = self.ctl.on_tick(now)? {
            notices.push(notice);
        }
        Ok(notices)
    }

    /// Re-read the open cycle, which another process may have moved on, and
    /// apply any automatic transition due at `now`.
    pub fn tick(&mut self, now: NaiveDateTime) -> Result<Option<Notice>> {
        self.ctl.load_current_cycle()?;
        self.ctl.on_tick(now)
    }

    pub fn status(&self, now: NaiveDateTime) -> Result<Status> {
        let dur = self.ctl.durations(&self.settings, now)?;
        let cycle = self.ctl.current_cycle().copied();

        let has_reference =
            cycle.is_some() || (dur.any_cycle_exists() && dur.last_meal_finish().is_some());
        let stage_minutes = has_reference.then(|| dur.elapsed_in_current_stage().num_minutes());
        let eating_window_minutes = cycle.map(|c| match c.fasting_start() {
            Some(finish) => (finish - c.meal1_start).num_minutes(),
            None => dur.eating_window_minutes(),
        });

        Ok(Status {
            state: self.ctl.state(),
            cycle,
            stage_minutes,
            eating_window_minutes,
            guidance: guidance(&dur),
            can_cancel: self.ctl.can_cancel_current_stage(now)?,
            can_start_meal2_after_omad: self.ctl.can_start_meal2_after_omad(now),
        })
    }

    // --- Main button ---

    pub fn check_advance(&self, now: NaiveDateTime) -> Result<AdvanceCheck> {
        self.ctl.check_advance(&self.settings, now)
    }

    /// Press the main button. Declined presses never go through; presses that
    /// need confirmation go through only with `confirmed`.
    pub fn advance(&mut self, now: NaiveDateTime, confirmed: bool) -> Result<AdvanceOutcome> {
        let check = self.check_advance(now)?;
        let hold = match check {
            AdvanceCheck::Proceed => false,
            AdvanceCheck::Declined { .. } => true,
            AdvanceCheck::WillExceedEatingWindow { .. }
            | AdvanceCheck::NeedsConfirmation { .. } => !confirmed,
        };
        if hold {
            log::debug!("Advance held: {check:?}");
            return Ok(AdvanceOutcome::Held { check });
        }

        let notice = self.ctl.advance(now)?;
        Ok(AdvanceOutcome::Advanced {
            state: self.ctl.state(),
            notice,
        })
    }

    // --- Menu actions ---

    pub fn cancel(&mut self, now: NaiveDateTime) -> Result<CancelOutcome> {
        if !self.ctl.can_cancel_current_stage(now)? {
            return Ok(CancelOutcome::TooLate);
        }
        let notice = self.ctl.cancel_current_stage(now)?;
        Ok(CancelOutcome::Cancelled {
            state: self.ctl.state(),
            notice,
        })
    }

    /// Returns false when Meal 2 can no longer be started on this OMAD day.
    pub fn start_meal2_after_omad(&mut self, now: NaiveDateTime) -> Result<bool> {
        if !self.ctl.can_start_meal2_after_omad(now) {
            return Ok(false);
        }
        self.ctl.start_meal2_after_omad(now)?;
        Ok(true)
    }

    // --- Stats & history ---

    /// `None` until at least one eating window has closed. History beyond
    /// the retention limit is pruned first.
    pub fn stats(&mut self) -> Result<Option<StatsReport>> {
        self.ctl.prune_old_cycles(STATS_RETENTION_CYCLES)?;
        if !self.ctl.at_least_one_cycle_exists_for_stats()? {
            return Ok(None);
        }
        let store = self.ctl.store();
        Ok(Some(StatsReport {
            previous: store.cycle_stats(1)?,
            last_7: store.cycle_stats(7)?,
            last_30: store.cycle_stats(30)?,
            last_365: store.cycle_stats(365)?,
        }))
    }

    pub fn history(&self) -> Result<Vec<CycleRecord>> {
        self.ctl.store().list_cycles()
    }

    pub fn clear_stats(&mut self) -> Result<usize> {
        self.ctl.delete_stats()
    }

    pub fn prune(&mut self) -> Result<usize> {
        self.ctl.prune_old_cycles(STATS_RETENTION_CYCLES)
    }

    // --- Settings ---

    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Change one setting. The whole set is validated before anything is written.
    pub fn update_setting(&mut self, key: &str, value: &str) -> Result<Settings> {
        let mut updated = self.settings;
        updated.apply(key, value)?;
        updated.save(self.ctl.store())?;
        self.settings = updated;
        Ok(updated)
    }

    pub fn reset_settings(&mut self) -> Result<Settings> {
        Settings::reset(self.ctl.store())?;
        self.settings = Settings::default();
        Ok(self.settings)
    }
}
