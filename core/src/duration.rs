use anyhow::Result;
use chrono::{Duration, NaiveDateTime};

use crate::controller::CycleController;
use crate::models::{AppState, Cycle};
use crate::settings::{EW_HARD_LIMIT_MINUTES, Settings};
use crate::store::CycleStore;

/// Elapsed times and threshold checks for one moment in the current cycle.
///
/// Built by [`CycleController::durations`], which looks up the history
/// these checks depend on; everything after that is pure arithmetic.
#[derive(Debug, Clone, Copy)]
pub struct Durations<'a> {
    state: AppState,
    cycle: Option<Cycle>,
    any_cycle_exists: bool,
    last_meal_finish: Option<NaiveDateTime>,
    settings: &'a Settings,
    now: NaiveDateTime,
}

impl<S: CycleStore> CycleController<S> {
    pub fn durations<'a>(
        &self,
        settings: &'a Settings,
        now: NaiveDateTime,
    ) -> Result<Durations<'a>> {
        Ok(Durations {
            state: self.state(),
            cycle: self.current_cycle().copied(),
            any_cycle_exists: self.at_least_one_cycle_exists()?,
            last_meal_finish: self.last_meal_finish(now)?,
            settings,
            now,
        })
    }
}

impl<'a> Durations<'a> {
    #[must_use]
    pub fn now(&self) -> NaiveDateTime {
        self.now
    }

    #[must_use]
    pub fn state(&self) -> AppState {
        self.state
    }

    #[must_use]
    pub fn settings(&self) -> &'a Settings {
        self.settings
    }

    #[must_use]
    pub fn any_cycle_exists(&self) -> bool {
        self.any_cycle_exists
    }

    fn cycle(&self, op: &str) -> Cycle {
        match self.cycle {
            Some(cycle) => cycle,
            None => panic!("{op} requires a current cycle"),
        }
    }

    fn expect_meal(&self, op: &str) {
        if !self.state.is_meal() {
            panic!("{op} should be called only during a meal, not during {}", self.state);
        }
    }

    fn expect_state(&self, state: AppState, op: &str) {
        if self.state != state {
            panic!("{op} should be called only during {state}, not during {}", self.state);
        }
    }

    // --- Reference timestamps ---

    #[must_use]
    pub fn last_meal_start(&self) -> NaiveDateTime {
        let cycle = self.cycle("last_meal_start");
        cycle.meal2_start().unwrap_or(cycle.meal1_start)
    }

    #[must_use]
    pub fn last_meal_finish(&self) -> Option<NaiveDateTime> {
        self.last_meal_finish
    }

    #[must_use]
    pub fn eating_window_start(&self) -> NaiveDateTime {
        self.cycle("eating_window_start").meal1_start
    }

    #[must_use]
    pub fn between_meals_start(&self) -> NaiveDateTime {
        self.expect_state(AppState::BetweenMeals, "between_meals_start");
        match self.cycle("between_meals_start").meal1_finish() {
            Some(start) => start,
            None => unreachable!("between-meals cycle without meal 1 finish"),
        }
    }

    // --- Elapsed ---

    #[must_use]
    pub fn meal_duration(&self) -> Duration {
        self.now - self.last_meal_start()
    }

    #[must_use]
    pub fn meal_minutes(&self) -> i64 {
        self.meal_duration().num_minutes()
    }

    #[must_use]
    pub fn between_meals_duration(&self) -> Duration {
        self.now - self.between_meals_start()
    }

    #[must_use]
    pub fn between_meals_minutes(&self) -> i64 {
        self.between_meals_duration().num_minutes()
    }

    #[must_use]
    pub fn eating_window_duration(&self) -> Duration {
        self.now - self.eating_window_start()
    }

    #[must_use]
    pub fn eating_window_minutes(&self) -> i64 {
        self.eating_window_duration().num_minutes()
    }

    #[must_use]
    pub fn fasting_duration(&self) -> Duration {
        match self.last_meal_finish {
            Some(finish) => self.now - finish,
            None => panic!("fasting_duration: no meal has been finished yet"),
        }
    }

    #[must_use]
    pub fn fasting_minutes(&self) -> i64 {
        self.fasting_duration().num_minutes()
    }

    /// Time spent in the active stage, measured from the timestamp that opened it.
    #[must_use]
    pub fn elapsed_in_current_stage(&self) -> Duration {
        match self.state {
            AppState::Meal1 | AppState::Meal2 => self.meal_duration(),
            AppState::BetweenMeals => self.between_meals_duration(),
            AppState::Fasting => self.fasting_duration(),
        }
    }

    /// Length of the eating window that closed this cycle.
    #[must_use]
    pub fn todays_eating_window(&self) -> Duration {
        self.expect_state(AppState::Fasting, "todays_eating_window");
        let cycle = self.cycle("todays_eating_window");
        match cycle.fasting_start() {
            Some(finish) => finish - cycle.meal1_start,
            None => unreachable!("fasting cycle without fasting start"),
        }
    }

    fn hours_after_last_meal_finish(&self) -> i64 {
        self.fasting_duration().num_hours()
    }

    // --- Policies ---

    #[must_use]
    pub fn meal_too_short(&self, min_minutes: i64) -> bool {
        self.expect_meal("meal_too_short");
        self.meal_minutes() < min_minutes
    }

    #[must_use]
    pub fn meal_too_long(&self) -> bool {
        self.expect_meal("meal_too_long");
        self.meal_minutes() >= self.settings.max_meal_minutes
    }

    /// Always false before the first cycle: there is no meal to measure from.
    #[must_use]
    pub fn fasting_too_short(&self, min_hours: i64) -> bool {
        self.expect_state(AppState::Fasting, "fasting_too_short");
        if !self.any_cycle_exists {
            return false;
        }
        self.hours_after_last_meal_finish() < min_hours
    }

    #[must_use]
    pub fn between_meals_too_short(&self, min_hours: i64) -> bool {
        self.expect_state(AppState::BetweenMeals, "between_meals_too_short");
        self.hours_after_last_meal_finish() < min_hours
    }

    /// Whether a full-length Meal 2 started now would still end inside the
    /// 8-hour eating-window limit.
    #[must_use]
    pub fn enough_time_to_finish_meal2_inside_8h_ew(&self) -> bool {
        self.expect_state(AppState::BetweenMeals, "enough_time_to_finish_meal2_inside_8h_ew");
        let ew_end = self.eating_window_start() + Duration::minutes(EW_HARD_LIMIT_MINUTES);
        self.now + Duration::minutes(self.settings.max_meal_minutes) <= ew_end
    }
}

// --- Formatting ---

fn plural(n: i64, unit: &str) -> String {
    if n == 1 {
        format!("{n} {unit}")
    } else {
        format!("{n} {unit}s")
    }
}

/// "2 days 3 hours 1 minute"; zero components are left out, so a duration
/// under a minute renders as an empty string.
#[must_use]
pub fn format_duration(d: Duration) -> String {
    let days = d.num_days();
    let hours = d.num_hours() % 24;
    let minutes = d.num_minutes() % 60;

    assert!(hours <= 23, "format_duration: {d} yielded {hours} hours");
    assert!(minutes <= 59, "format_duration: {d} yielded {minutes} minutes");

    let mut parts = Vec::new();
    if days > 0 {
        parts.push(plural(days, "day"));
    }
    if hours > 0 {
        parts.push(plural(hours, "hour"));
    }
    if minutes > 0 {
        parts.push(plural(minutes, "minute"));
    }
    parts.join(" ")
}

/// Like [`format_duration`] but with hours uncapped: "26 hours 15 minutes".
#[must_use]
pub fn format_duration_no_days(d: Duration) -> String {
    let hours = d.num_hours();
    let minutes = d.num_minutes() % 60;

    let mut parts = Vec::new();
    if hours > 0 {
        parts.push(plural(hours, "hour"));
    }
    if minutes > 0 {
        parts.push(plural(minutes, "minute"));
    }
    parts.join(" ")
}

#[must_use]
pub fn format_minutes(minutes: i64) -> String {
    format_duration(Duration::minutes(minutes))
}
