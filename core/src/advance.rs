use std::fmt;

use anyhow::Result;
use chrono::{Duration, NaiveDateTime};
use serde::Serialize;

use crate::controller::CycleController;
use crate::duration::{Durations, format_minutes};
use crate::models::{AppState, Notice};
use crate::settings::{
    CONFIRM_MEAL_MINUTES, DECLINE_BETWEEN_MEALS_HOURS, DECLINE_FASTING_HOURS,
    DECLINE_MEAL_MINUTES, EW_HARD_LIMIT_MINUTES, FASTING_TARGET_HOURS, Settings,
};
use crate::store::CycleStore;

/// A minimum the current stage has not reached yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Minimum {
    Minutes(i64),
    Hours(i64),
}

impl fmt::Display for Minimum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Minimum::Minutes(m) => f.write_str(&format_minutes(*m)),
            Minimum::Hours(h) => f.write_str(&format_minutes(h * 60)),
        }
    }
}

/// Verdict on pressing the main button right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum AdvanceCheck {
    /// Too early to even ask; the press is ignored.
    Declined { state: AppState, minimum: Minimum },
    /// Meal 2 started now cannot finish inside the 8-hour eating window.
    WillExceedEatingWindow { eating_window_end: NaiveDateTime },
    /// Earlier than recommended; go ahead only if the user confirms.
    NeedsConfirmation { state: AppState, minimum: Minimum },
    Proceed,
}

impl AdvanceCheck {
    #[must_use]
    pub fn is_declined(&self) -> bool {
        matches!(self, AdvanceCheck::Declined { .. })
    }

    #[must_use]
    pub fn needs_confirmation(&self) -> bool {
        matches!(
            self,
            AdvanceCheck::WillExceedEatingWindow { .. } | AdvanceCheck::NeedsConfirmation { .. }
        )
    }
}

/// The stage the main button moves to from `state`.
#[must_use]
pub fn next_state(state: AppState) -> AppState {
    match state {
        AppState::Fasting => AppState::Meal1,
        AppState::Meal1 => AppState::BetweenMeals,
        AppState::BetweenMeals => AppState::Meal2,
        AppState::Meal2 => AppState::Fasting,
    }
}

fn declined(dur: &Durations) -> Option<Minimum> {
    match dur.state() {
        AppState::Meal1 | AppState::Meal2 => dur
            .meal_too_short(DECLINE_MEAL_MINUTES)
            .then_some(Minimum::Minutes(DECLINE_MEAL_MINUTES)),
        AppState::BetweenMeals => dur
            .between_meals_too_short(DECLINE_BETWEEN_MEALS_HOURS)
            .then_some(Minimum::Hours(DECLINE_BETWEEN_MEALS_HOURS)),
        AppState::Fasting => dur
            .fasting_too_short(DECLINE_FASTING_HOURS)
            .then_some(Minimum::Hours(DECLINE_FASTING_HOURS)),
    }
}

fn too_early(dur: &Durations) -> Option<Minimum> {
    match dur.state() {
        AppState::Meal1 | AppState::Meal2 => dur
            .meal_too_short(CONFIRM_MEAL_MINUTES)
            .then_some(Minimum::Minutes(CONFIRM_MEAL_MINUTES)),
        AppState::BetweenMeals => {
            let hours = dur.settings().min_between_meals_hours;
            dur.between_meals_too_short(hours)
                .then_some(Minimum::Hours(hours))
        }
        AppState::Fasting => dur
            .fasting_too_short(FASTING_TARGET_HOURS)
            .then_some(Minimum::Hours(FASTING_TARGET_HOURS)),
    }
}

/// Evaluate the main button: hard refusals first, then the eating-window
/// warning, then the soft minimums.
#[must_use]
pub fn check_advance(dur: &Durations) -> AdvanceCheck {
    let state = dur.state();
    if let Some(minimum) = declined(dur) {
        return AdvanceCheck::Declined { state, minimum };
    }
    if state.is_between_meals() && !dur.enough_time_to_finish_meal2_inside_8h_ew() {
        return AdvanceCheck::WillExceedEatingWindow {
            eating_window_end: dur.eating_window_start() + Duration::minutes(EW_HARD_LIMIT_MINUTES),
        };
    }
    if let Some(minimum) = too_early(dur) {
        return AdvanceCheck::NeedsConfirmation { state, minimum };
    }
    AdvanceCheck::Proceed
}

impl<S: CycleStore> CycleController<S> {
    pub fn check_advance(&self, settings: &Settings, now: NaiveDateTime) -> Result<AdvanceCheck> {
        let dur = self.durations(settings, now)?;
        Ok(check_advance(&dur))
    }

    /// Move to the next stage unconditionally. Closing the eating window
    /// reports how long it was.
    pub fn advance(&mut self, now: NaiveDateTime) -> Result<Option<Notice>> {
        match self.state() {
            AppState::Fasting => {
                self.start_meal1(now)?;
                Ok(None)
            }
            AppState::Meal1 => {
                self.start_between_meals(now, None)?;
                Ok(None)
            }
            AppState::BetweenMeals => {
                self.start_meal2(now)?;
                Ok(None)
            }
            AppState::Meal2 => {
                self.start_fasting(now, None)?;
                let minutes =
                    (self.eating_window_finish() - self.eating_window_start()).num_minutes();
                Ok(Some(Notice::EatingWindowClosed {
                    minutes,
                    within_limit: minutes <= EW_HARD_LIMIT_MINUTES,
                }))
            }
        }
    }
}
