use anyhow::{Result, bail};
use chrono::{Duration, NaiveDateTime};

use crate::models::{AppState, Cycle, CycleRecord, Notice, Progress};
use crate::settings::{
    EW_HARD_LIMIT_MINUTES, FASTING_TARGET_HOURS, MEAL_HARD_LIMIT_MINUTES,
    MEAL2_AFTER_OMAD_LIMIT_MINUTES,
};
use crate::store::CycleStore;

/// Owns the current cycle and the app state derived from it, and performs
/// every stage transition through the store.
///
/// Calling an operation in a stage it does not apply to is a caller bug and
/// panics. Storage failures are returned as errors and leave the in-memory
/// state untouched; transitions that touch two rows do so in one transaction.
pub struct CycleController<S> {
    store: S,
    current: Option<Cycle>,
    state: AppState,
}

impl<S: CycleStore> CycleController<S> {
    /// Wrap `store` and load whatever cycle is open in it.
    pub fn new(store: S) -> Result<Self> {
        let mut controller = Self {
            store,
            current: None,
            state: AppState::Fasting,
        };
        controller.load_current_cycle()?;
        Ok(controller)
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    #[must_use]
    pub fn state(&self) -> AppState {
        self.state
    }

    #[must_use]
    pub fn current_cycle(&self) -> Option<&Cycle> {
        self.current.as_ref()
    }

    /// Re-read the open cycle and derive the app state from its timestamps.
    /// Run on every resume; nothing held in memory is trusted.
    pub fn load_current_cycle(&mut self) -> Result<()> {
        match self.store.current_cycle()? {
            Some(record) => {
                let cycle = Cycle::try_from(record)?;
                self.state = cycle.app_state();
                log::debug!("Loaded cycle {} in {}", cycle.id, self.state);
                self.current = Some(cycle);
            }
            None => {
                log::debug!("No current cycle");
                self.current = None;
                self.state = AppState::Fasting;
            }
        }
        Ok(())
    }

    // --- Internal helpers ---

    fn cycle(&self, op: &str) -> Cycle {
        match self.current {
            Some(cycle) => cycle,
            None => panic!("{op} requires a current cycle"),
        }
    }

    fn expect_state(&self, allowed: &[AppState], op: &str) {
        if !allowed.contains(&self.state) {
            panic!("{op} called during {}, allowed only during {allowed:?}", self.state);
        }
    }

    /// Persist `progress` on the current cycle, then adopt it in memory.
    fn transition(&mut self, progress: Progress, op: &str) -> Result<()> {
        let cycle = Cycle {
            progress,
            ..self.cycle(op)
        };
        self.store.update_cycle(&CycleRecord::from(&cycle))?;
        log::info!("Cycle {}: {} -> {}", cycle.id, self.state, cycle.app_state());
        self.state = cycle.app_state();
        self.current = Some(cycle);
        Ok(())
    }

    // --- User-driven transitions ---

    /// Archive the current cycle (if any) and open a new one at `now`.
    /// Returns the new cycle's id.
    pub fn start_meal1(&mut self, now: NaiveDateTime) -> Result<i64> {
        self.expect_state(&[AppState::Fasting], "start_meal1");

        let previous = self.current;
        let id = self.store.in_transaction(|store| {
            if let Some(previous) = previous {
                let archived = Cycle {
                    fasting_finish: Some(now),
                    ..previous
                };
                store.update_cycle(&CycleRecord::from(&archived))?;
            }

            let record = CycleRecord {
                meal1_start: Some(now),
                ..CycleRecord::default()
            };
            let id = store.insert_cycle(&record)?;
            if id <= 0 {
                bail!("Storage returned no id for the new cycle");
            }
            Ok(id)
        })?;
        if let Some(previous) = previous {
            log::info!("Cycle {} archived", previous.id);
        }

        self.current = Some(Cycle {
            id,
            meal1_start: now,
            progress: Progress::Meal1,
            fasting_finish: None,
        });
        self.state = AppState::Meal1;
        log::info!("Cycle {id}: meal 1 started");
        Ok(id)
    }

    /// Finish Meal 1 at `since`, or at `now` when not given.
    pub fn start_between_meals(
        &mut self,
        now: NaiveDateTime,
        since: Option<NaiveDateTime>,
    ) -> Result<()> {
        self.expect_state(&[AppState::Meal1], "start_between_meals");
        let meal1_finish = since.unwrap_or(now);
        self.transition(Progress::BetweenMeals { meal1_finish }, "start_between_meals")
    }

    pub fn start_meal2(&mut self, now: NaiveDateTime) -> Result<()> {
        self.expect_state(&[AppState::BetweenMeals], "start_meal2");
        let Some(meal1_finish) = self.cycle("start_meal2").meal1_finish() else {
            unreachable!("between-meals cycle without meal 1 finish");
        };
        self.transition(
            Progress::Meal2 {
                meal1_finish,
                meal2_start: now,
            },
            "start_meal2",
        )
    }

    /// Finish Meal 2 at `since`, or at `now` when not given.
    pub fn start_fasting(
        &mut self,
        now: NaiveDateTime,
        since: Option<NaiveDateTime>,
    ) -> Result<()> {
        self.expect_state(&[AppState::Meal2], "start_fasting");
        let cycle = self.cycle("start_fasting");
        let Progress::Meal2 {
            meal1_finish,
            meal2_start,
        } = cycle.progress
        else {
            unreachable!("meal 2 state without meal 2 progress");
        };
        self.transition(
            Progress::Fasting {
                meal1_finish,
                meal2_start,
                fasting_start: since.unwrap_or(now),
            },
            "start_fasting",
        )
    }

    /// Turn the current day into a one-meal day: drop Meal 2 and open the
    /// fasting window at Meal 1's finish. Returns false when the cycle was
    /// already OMAD, so callers can skip repeating their notice.
    pub fn make_current_cycle_omad(&mut self) -> Result<bool> {
        let cycle = self.cycle("make_current_cycle_omad");
        if cycle.is_omad() {
            return Ok(false);
        }
        self.expect_state(
            &[AppState::BetweenMeals, AppState::Meal2],
            "make_current_cycle_omad",
        );
        let Some(meal1_finish) = cycle.meal1_finish() else {
            unreachable!("cycle past meal 1 without meal 1 finish");
        };
        self.transition(
            Progress::Omad {
                meal1_finish,
                fasting_start: meal1_finish,
            },
            "make_current_cycle_omad",
        )?;
        log::warn!("Cycle {}: marked OMAD", cycle.id);
        Ok(true)
    }

    /// Whether Meal 2 may still be started on a day already marked OMAD.
    #[must_use]
    pub fn can_start_meal2_after_omad(&self, now: NaiveDateTime) -> bool {
        match self.current {
            Some(cycle) if self.state.is_fasting() && cycle.is_omad() => {
                (now - cycle.meal1_start).num_minutes() < MEAL2_AFTER_OMAD_LIMIT_MINUTES
            }
            _ => false,
        }
    }

    /// Reopen the eating window of an OMAD day and start Meal 2 at `now`.
    pub fn start_meal2_after_omad(&mut self, now: NaiveDateTime) -> Result<()> {
        let cycle = self.cycle("start_meal2_after_omad");
        let Progress::Omad { meal1_finish, .. } = cycle.progress else {
            panic!("start_meal2_after_omad called on cycle {} which is not OMAD", cycle.id);
        };
        self.transition(
            Progress::Meal2 {
                meal1_finish,
                meal2_start: now,
            },
            "start_meal2_after_omad",
        )
    }

    // --- Cancel ---

    /// Meals can always be cancelled. A finished meal can be reopened only
    /// while it is younger than the meal hard limit.
    pub fn can_cancel_current_stage(&self, now: NaiveDateTime) -> Result<bool> {
        let can = match self.state {
            AppState::Meal1 | AppState::Meal2 => true,
            AppState::BetweenMeals => {
                self.minutes_since_last_meal_start(now) < MEAL_HARD_LIMIT_MINUTES
            }
            AppState::Fasting => {
                self.at_least_one_cycle_exists()?
                    && self.current.is_some()
                    && self.minutes_since_last_meal_start(now) < MEAL_HARD_LIMIT_MINUTES
            }
        };
        Ok(can)
    }

    fn minutes_since_last_meal_start(&self, now: NaiveDateTime) -> i64 {
        (now - self.last_meal_start()).num_minutes()
    }

    /// Undo the most recent transition. Cancelling Meal 1 deletes the cycle
    /// and reopens the previous one. Cancelling a Meal 2 that has run past the
    /// eating-window limit marks the day OMAD instead, and says so.
    pub fn cancel_current_stage(&mut self, now: NaiveDateTime) -> Result<Option<Notice>> {
        let cycle = self.cycle("cancel_current_stage");
        match cycle.progress {
            Progress::Meal1 => {
                let reopened = self.store.in_transaction(|store| {
                    let previous = store.previous_cycle(Some(cycle.id))?;
                    store.delete_cycle(cycle.id)?;
                    previous
                        .map(|mut record| {
                            record.fasting_finish = None;
                            store.update_cycle(&record)?;
                            Cycle::try_from(record)
                        })
                        .transpose()
                })?;
                log::info!("Cycle {}: meal 1 cancelled, cycle deleted", cycle.id);

                match reopened {
                    Some(reopened) => {
                        log::info!("Cycle {} reopened", reopened.id);
                        self.state = reopened.app_state();
                        self.current = Some(reopened);
                    }
                    None => {
                        self.current = None;
                        self.state = AppState::Fasting;
                    }
                }
                Ok(None)
            }
            Progress::BetweenMeals { .. } => {
                self.transition(Progress::Meal1, "cancel_current_stage")?;
                Ok(None)
            }
            Progress::Meal2 { meal1_finish, .. } => {
                if (now - cycle.meal1_start).num_minutes() < EW_HARD_LIMIT_MINUTES {
                    self.transition(
                        Progress::BetweenMeals { meal1_finish },
                        "cancel_current_stage",
                    )?;
                    Ok(None)
                } else {
                    self.make_current_cycle_omad()?;
                    Ok(Some(Notice::DayMarkedOmad { automatic: false }))
                }
            }
            Progress::Fasting {
                meal1_finish,
                meal2_start,
                ..
            } => {
                self.transition(
                    Progress::Meal2 {
                        meal1_finish,
                        meal2_start,
                    },
                    "cancel_current_stage",
                )?;
                Ok(None)
            }
            Progress::Omad { meal1_finish, .. } => {
                self.transition(
                    Progress::BetweenMeals { meal1_finish },
                    "cancel_current_stage",
                )?;
                Ok(None)
            }
        }
    }

    // --- History queries ---

    /// False only before the very first Meal 1 (or after it was cancelled).
    pub fn at_least_one_cycle_exists(&self) -> Result<bool> {
        Ok(self.store.count_cycles()? > 0)
    }

    /// True once at least one eating window has closed.
    pub fn at_least_one_cycle_exists_for_stats(&self) -> Result<bool> {
        Ok(self.store.count_completed_cycles()? > 0)
    }

    // --- Derived timestamps ---

    /// Meal 2 start if it happened, else Meal 1 start.
    #[must_use]
    pub fn last_meal_start(&self) -> NaiveDateTime {
        let cycle = self.cycle("last_meal_start");
        cycle.meal2_start().unwrap_or(cycle.meal1_start)
    }

    /// When the most recent meal ended. With no current cycle this falls back
    /// to the latest stored cycle, and before any cycle exists to a moment a
    /// full fasting target ago so a first Meal 1 never counts as too early.
    /// `None` during the first Meal 1 that has no earlier cycle.
    pub fn last_meal_finish(&self, now: NaiveDateTime) -> Result<Option<NaiveDateTime>> {
        match self.current {
            Some(cycle) => {
                if let Some(finish) = cycle.fasting_start().or(cycle.meal1_finish()) {
                    return Ok(Some(finish));
                }
                Ok(self
                    .store
                    .previous_cycle(Some(cycle.id))?
                    .and_then(|prev| prev.fasting_start))
            }
            None => match self.store.previous_cycle(None)? {
                Some(prev) => Ok(prev.fasting_start),
                None => Ok(Some(now - Duration::hours(FASTING_TARGET_HOURS))),
            },
        }
    }

    #[must_use]
    pub fn eating_window_start(&self) -> NaiveDateTime {
        self.cycle("eating_window_start").meal1_start
    }

    #[must_use]
    pub fn eating_window_finish(&self) -> NaiveDateTime {
        self.expect_state(&[AppState::Fasting], "eating_window_finish");
        match self.cycle("eating_window_finish").fasting_start() {
            Some(finish) => finish,
            None => unreachable!("fasting cycle without fasting start"),
        }
    }

    #[must_use]
    pub fn between_meals_start(&self) -> NaiveDateTime {
        self.expect_state(&[AppState::BetweenMeals], "between_meals_start");
        match self.cycle("between_meals_start").meal1_finish() {
            Some(start) => start,
            None => unreachable!("between-meals cycle without meal 1 finish"),
        }
    }

    // --- Maintenance ---

    /// Clear history. While fasting everything goes, current cycle included;
    /// otherwise every cycle older than the current one.
    pub fn delete_stats(&mut self) -> Result<usize> {
        let before = if self.state.is_fasting() {
            None
        } else {
            Some(self.cycle("delete_stats").id)
        };
        let deleted = self.store.delete_cycles_before(before)?;
        log::info!("Deleted {deleted} cycles from history");
        self.load_current_cycle()?;
        Ok(deleted)
    }

    /// Keep only the `keep` most recent cycles.
    pub fn prune_old_cycles(&mut self, keep: i64) -> Result<usize> {
        let deleted = self.store.prune_cycles(keep)?;
        if deleted > 0 {
            log::info!("Pruned {deleted} old cycles");
            self.load_current_cycle()?;
        }
        Ok(deleted)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db::Database;
    use chrono::NaiveDate;

    pub(crate) fn t0() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 6, 15)
            .unwrap()
            .and_hms_opt(8, 0, 0)
            .unwrap()
    }

    pub(crate) fn mins(m: i64) -> NaiveDateTime {
        t0() + Duration::minutes(m)
    }

    pub(crate) fn new_controller() -> CycleController<Database> {
        CycleController::new(Database::open_in_memory().unwrap()).unwrap()
    }

    /// Meal 1 at T0, between meals at +30m, Meal 2 at +4h, fasting at +4h20m.
    pub(crate) fn full_cycle(ctl: &mut CycleController<Database>, start: NaiveDateTime) -> i64 {
        let id = ctl.start_meal1(start).unwrap();
        ctl.start_between_meals(start + Duration::minutes(30), None).unwrap();
        ctl.start_meal2(start + Duration::hours(4)).unwrap();
        ctl.start_fasting(start + Duration::minutes(260), None).unwrap();
        id
    }

    fn stored(ctl: &CycleController<Database>, id: i64) -> CycleRecord {
        ctl.store().get_cycle(id).unwrap().unwrap()
    }

    #[test]
    fn test_fresh_install() {
        let mut ctl = new_controller();
        assert!(!ctl.at_least_one_cycle_exists().unwrap());
        assert_eq!(ctl.state(), AppState::Fasting);
        assert!(ctl.current_cycle().is_none());

        let id = ctl.start_meal1(t0()).unwrap();
        assert_eq!(id, 1);
        assert_eq!(ctl.state(), AppState::Meal1);
        assert_eq!(stored(&ctl, id).meal1_start, Some(t0()));
        assert!(ctl.at_least_one_cycle_exists().unwrap());
        assert!(!ctl.at_least_one_cycle_exists_for_stats().unwrap());
    }

    #[test]
    fn test_full_cycle_and_next_day_archive() {
        let mut ctl = new_controller();
        let id = full_cycle(&mut ctl, t0());

        let row = stored(&ctl, id);
        assert_eq!(row.between_meals_start, Some(mins(30)));
        assert_eq!(row.meal2_start, Some(mins(240)));
        assert_eq!(row.fasting_start, Some(mins(260)));
        assert!(row.fasting_finish.is_none());
        assert_eq!(ctl.state(), AppState::Fasting);
        assert!(ctl.at_least_one_cycle_exists_for_stats().unwrap());

        let next = ctl.start_meal1(mins(20 * 60)).unwrap();
        assert_eq!(stored(&ctl, id).fasting_finish, Some(mins(20 * 60)));
        assert!(stored(&ctl, next).is_current());
        assert_eq!(ctl.store().count_cycles().unwrap(), 2);
        assert_eq!(ctl.store().current_cycle().unwrap().unwrap().id, Some(next));
    }

    #[test]
    fn test_load_current_cycle_rederives_state() {
        let db = Database::open_in_memory().unwrap();
        db.insert_cycle(&CycleRecord {
            meal1_start: Some(t0()),
            between_meals_start: Some(mins(30)),
            ..CycleRecord::default()
        })
        .unwrap();

        let ctl = CycleController::new(db).unwrap();
        assert_eq!(ctl.state(), AppState::BetweenMeals);
        assert_eq!(ctl.between_meals_start(), mins(30));
    }

    #[test]
    fn test_load_rejects_corrupt_row() {
        let db = Database::open_in_memory().unwrap();
        db.insert_cycle(&CycleRecord::default()).unwrap();
        assert!(CycleController::new(db).is_err());
    }

    #[test]
    fn test_start_between_meals_since() {
        let mut ctl = new_controller();
        ctl.start_meal1(t0()).unwrap();
        ctl.start_between_meals(mins(90), Some(mins(60))).unwrap();
        assert_eq!(ctl.between_meals_start(), mins(60));
    }

    #[test]
    #[should_panic(expected = "start_meal2 called during MEAL_1")]
    fn test_start_meal2_from_meal1_panics() {
        let mut ctl = new_controller();
        ctl.start_meal1(t0()).unwrap();
        ctl.start_meal2(mins(10)).unwrap();
    }

    #[test]
    #[should_panic(expected = "start_meal1 called during BETWEEN_MEALS")]
    fn test_start_meal1_mid_cycle_panics() {
        let mut ctl = new_controller();
        ctl.start_meal1(t0()).unwrap();
        ctl.start_between_meals(mins(30), None).unwrap();
        ctl.start_meal1(mins(60)).unwrap();
    }

    #[test]
    fn test_make_omad_is_idempotent() {
        let mut ctl = new_controller();
        let id = ctl.start_meal1(t0()).unwrap();
        ctl.start_between_meals(mins(30), None).unwrap();

        assert!(ctl.make_current_cycle_omad().unwrap());
        let row = stored(&ctl, id);
        assert!(row.is_omad());
        assert_eq!(row.fasting_start, Some(mins(30)));
        assert_eq!(ctl.state(), AppState::Fasting);

        assert!(!ctl.make_current_cycle_omad().unwrap());
        assert_eq!(stored(&ctl, id), row);
    }

    #[test]
    fn test_make_omad_from_meal2_drops_meal2() {
        let mut ctl = new_controller();
        let id = ctl.start_meal1(t0()).unwrap();
        ctl.start_between_meals(mins(30), None).unwrap();
        ctl.start_meal2(mins(300)).unwrap();

        assert!(ctl.make_current_cycle_omad().unwrap());
        let row = stored(&ctl, id);
        assert!(row.meal2_start.is_none());
        assert_eq!(row.fasting_start, Some(mins(30)));
    }

    #[test]
    fn test_cancel_meal1_reopens_previous_cycle() {
        let mut ctl = new_controller();
        let first = full_cycle(&mut ctl, t0());
        let second = ctl.start_meal1(mins(20 * 60)).unwrap();

        ctl.cancel_current_stage(mins(20 * 60 + 5)).unwrap();
        assert!(ctl.store().get_cycle(second).unwrap().is_none());
        assert_eq!(ctl.current_cycle().unwrap().id, first);
        assert!(stored(&ctl, first).is_current());
        assert_eq!(ctl.state(), AppState::Fasting);
    }

    #[test]
    fn test_cancel_meal1_failure_keeps_both_rows() {
        let db = Database::open_in_memory().unwrap();
        // Archived row that cannot be reopened.
        let broken = db
            .insert_cycle(&CycleRecord {
                fasting_finish: Some(t0()),
                ..CycleRecord::default()
            })
            .unwrap();
        let mut ctl = CycleController::new(db).unwrap();
        let id = ctl.start_meal1(mins(60)).unwrap();

        assert!(ctl.cancel_current_stage(mins(61)).is_err());
        assert!(stored(&ctl, id).is_current());
        assert_eq!(stored(&ctl, broken).fasting_finish, Some(t0()));
        assert_eq!(ctl.current_cycle().unwrap().id, id);
        assert_eq!(ctl.state(), AppState::Meal1);
    }

    #[test]
    fn test_cancel_first_meal1_leaves_nothing() {
        let mut ctl = new_controller();
        ctl.start_meal1(t0()).unwrap();
        ctl.cancel_current_stage(mins(1)).unwrap();
        assert!(ctl.current_cycle().is_none());
        assert_eq!(ctl.state(), AppState::Fasting);
        assert!(!ctl.at_least_one_cycle_exists().unwrap());
    }

    #[test]
    fn test_cancel_between_meals_round_trip() {
        let mut ctl = new_controller();
        let id = ctl.start_meal1(t0()).unwrap();
        let before = stored(&ctl, id);
        ctl.start_between_meals(mins(30), None).unwrap();

        ctl.cancel_current_stage(mins(35)).unwrap();
        assert_eq!(ctl.state(), AppState::Meal1);
        assert_eq!(stored(&ctl, id), before);

        ctl.start_between_meals(mins(30), None).unwrap();
        assert_eq!(stored(&ctl, id).between_meals_start, Some(mins(30)));
    }

    #[test]
    fn test_cancel_fasting_round_trip() {
        let mut ctl = new_controller();
        let id = full_cycle(&mut ctl, t0());
        let finished = stored(&ctl, id);

        ctl.cancel_current_stage(mins(270)).unwrap();
        assert_eq!(ctl.state(), AppState::Meal2);
        assert!(stored(&ctl, id).fasting_start.is_none());

        ctl.start_fasting(mins(260), None).unwrap();
        assert_eq!(stored(&ctl, id), finished);
    }

    #[test]
    fn test_cancel_meal2_before_eight_hours_keeps_between_meals_start() {
        let mut ctl = new_controller();
        let id = ctl.start_meal1(t0()).unwrap();
        ctl.start_between_meals(mins(30), None).unwrap();
        ctl.start_meal2(mins(470)).unwrap();

        let notice = ctl.cancel_current_stage(mins(479)).unwrap();
        assert!(notice.is_none());
        assert_eq!(ctl.state(), AppState::BetweenMeals);
        let row = stored(&ctl, id);
        assert_eq!(row.between_meals_start, Some(mins(30)));
        assert!(row.meal2_start.is_none());
    }

    #[test]
    fn test_cancel_meal2_after_eight_hours_marks_omad() {
        let mut ctl = new_controller();
        let id = ctl.start_meal1(t0()).unwrap();
        ctl.start_between_meals(mins(30), None).unwrap();
        ctl.start_meal2(mins(470)).unwrap();

        let notice = ctl.cancel_current_stage(mins(481)).unwrap();
        assert_eq!(notice, Some(Notice::DayMarkedOmad { automatic: false }));
        assert_eq!(ctl.state(), AppState::Fasting);
        assert!(stored(&ctl, id).is_omad());
    }

    #[test]
    fn test_can_cancel_current_stage() {
        let mut ctl = new_controller();
        assert!(!ctl.can_cancel_current_stage(t0()).unwrap());

        ctl.start_meal1(t0()).unwrap();
        assert!(ctl.can_cancel_current_stage(mins(500)).unwrap());

        ctl.start_between_meals(mins(30), None).unwrap();
        assert!(ctl.can_cancel_current_stage(mins(59)).unwrap());
        assert!(!ctl.can_cancel_current_stage(mins(60)).unwrap());

        ctl.start_meal2(mins(240)).unwrap();
        assert!(ctl.can_cancel_current_stage(mins(900)).unwrap());

        ctl.start_fasting(mins(260), None).unwrap();
        assert!(ctl.can_cancel_current_stage(mins(299)).unwrap());
        assert!(!ctl.can_cancel_current_stage(mins(300)).unwrap());
    }

    #[test]
    fn test_meal2_after_omad() {
        let mut ctl = new_controller();
        let id = ctl.start_meal1(t0()).unwrap();
        ctl.start_between_meals(mins(30), None).unwrap();
        assert!(!ctl.can_start_meal2_after_omad(mins(60)));

        ctl.make_current_cycle_omad().unwrap();
        assert!(ctl.can_start_meal2_after_omad(mins(719)));
        assert!(!ctl.can_start_meal2_after_omad(mins(720)));

        ctl.start_meal2_after_omad(mins(600)).unwrap();
        assert_eq!(ctl.state(), AppState::Meal2);
        let row = stored(&ctl, id);
        assert_eq!(row.meal2_start, Some(mins(600)));
        assert!(row.fasting_start.is_none());
    }

    #[test]
    fn test_last_meal_start_and_finish() {
        let mut ctl = new_controller();
        // First launch: a full fasting target ago.
        assert_eq!(
            ctl.last_meal_finish(t0()).unwrap(),
            Some(t0() - Duration::hours(16))
        );

        ctl.start_meal1(t0()).unwrap();
        assert_eq!(ctl.last_meal_start(), t0());
        assert_eq!(ctl.last_meal_finish(mins(5)).unwrap(), None);

        ctl.start_between_meals(mins(30), None).unwrap();
        assert_eq!(ctl.last_meal_finish(mins(35)).unwrap(), Some(mins(30)));

        ctl.start_meal2(mins(240)).unwrap();
        assert_eq!(ctl.last_meal_start(), mins(240));

        ctl.start_fasting(mins(260), None).unwrap();
        assert_eq!(ctl.last_meal_finish(mins(300)).unwrap(), Some(mins(260)));
        assert_eq!(ctl.eating_window_start(), t0());
        assert_eq!(ctl.eating_window_finish(), mins(260));

        // Next day's Meal 1 looks back at the archived cycle.
        ctl.start_meal1(mins(20 * 60)).unwrap();
        assert_eq!(ctl.last_meal_finish(mins(20 * 60 + 1)).unwrap(), Some(mins(260)));
    }

    #[test]
    #[should_panic(expected = "eating_window_finish called during MEAL_1")]
    fn test_eating_window_finish_outside_fasting_panics() {
        let mut ctl = new_controller();
        ctl.start_meal1(t0()).unwrap();
        let _ = ctl.eating_window_finish();
    }

    #[test]
    fn test_delete_stats_while_fasting_clears_everything() {
        let mut ctl = new_controller();
        full_cycle(&mut ctl, t0());
        ctl.start_meal1(mins(24 * 60)).unwrap();
        ctl.start_between_meals(mins(24 * 60 + 30), None).unwrap();
        ctl.make_current_cycle_omad().unwrap();

        assert_eq!(ctl.delete_stats().unwrap(), 2);
        assert!(ctl.current_cycle().is_none());
        assert!(!ctl.at_least_one_cycle_exists().unwrap());
    }

    #[test]
    fn test_delete_stats_mid_cycle_keeps_current() {
        let mut ctl = new_controller();
        full_cycle(&mut ctl, t0());
        let current = ctl.start_meal1(mins(24 * 60)).unwrap();

        assert_eq!(ctl.delete_stats().unwrap(), 1);
        assert_eq!(ctl.current_cycle().unwrap().id, current);
        assert_eq!(ctl.state(), AppState::Meal1);
    }

    #[test]
    fn test_prune_old_cycles() {
        let mut ctl = new_controller();
        for day in 0..4 {
            full_cycle(&mut ctl, t0() + Duration::days(day));
        }
        assert_eq!(ctl.prune_old_cycles(2).unwrap(), 2);
        assert_eq!(ctl.store().count_cycles().unwrap(), 2);
        assert!(ctl.current_cycle().is_some());
    }

    #[test]
    fn test_at_most_one_open_cycle_after_many_days() {
        let mut ctl = new_controller();
        for day in 0..5 {
            full_cycle(&mut ctl, t0() + Duration::days(day));
        }
        let open = ctl
            .store()
            .list_cycles()
            .unwrap()
            .iter()
            .filter(|c| c.is_current())
            .count();
        assert_eq!(open, 1);
        assert_eq!(ctl.store().count_cycles().unwrap(), 5);
    }
}
