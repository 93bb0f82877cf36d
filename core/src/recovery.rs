//! Automatic transitions: the per-tick checks that run while the timer is in
//! the foreground, and the resume-time check that catches up on whatever a
//! tick would have done while nothing was running.

use anyhow::Result;
use chrono::{Duration, NaiveDateTime};

use crate::controller::CycleController;
use crate::models::{AppState, Notice};
use crate::settings::{EW_HARD_LIMIT_MINUTES, MEAL_HARD_LIMIT_MINUTES};
use crate::store::{CycleStore, SettingsStore};

/// `"{cycle_id}:{stage}"` of the last meal finished on resume.
pub const FORCED_FINISH_KEY: &str = "inactivity_forced_finish";

impl<S: CycleStore> CycleController<S> {
    /// One foreground tick. Finishes a meal that just reached the hard limit
    /// and marks the day OMAD once between-meals passes the eating-window limit.
    pub fn on_tick(&mut self, now: NaiveDateTime) -> Result<Option<Notice>> {
        let Some(cycle) = self.current_cycle().copied() else {
            return Ok(None);
        };

        match self.state() {
            AppState::Meal1 | AppState::Meal2 => {
                if (now - self.last_meal_start()).num_minutes() < MEAL_HARD_LIMIT_MINUTES {
                    return Ok(None);
                }
                if self.state().is_meal1() {
                    self.start_between_meals(now, None)?;
                } else {
                    self.start_fasting(now, None)?;
                }
                log::warn!(
                    "Cycle {}: meal reached {MEAL_HARD_LIMIT_MINUTES} minutes, finished by force",
                    cycle.id
                );
                Ok(Some(Notice::MealFinishedByForce {
                    abandoned: false,
                    next: self.state(),
                    at: now,
                }))
            }
            AppState::BetweenMeals => {
                if (now - self.between_meals_start()).num_minutes() < EW_HARD_LIMIT_MINUTES {
                    return Ok(None);
                }
                if self.make_current_cycle_omad()? {
                    Ok(Some(Notice::DayMarkedOmad { automatic: true }))
                } else {
                    Ok(None)
                }
            }
            AppState::Fasting => Ok(None),
        }
    }
}

impl<S: CycleStore + SettingsStore> CycleController<S> {
    /// Resume-time recovery. The stage stored in the current cycle is the
    /// last one the user set (automatic transitions could not run while the
    /// app was closed), so abandonment is judged against it.
    ///
    /// An abandoned meal is closed one hour after it started. Meal 1 moves on
    /// to between-meals, unless the eating-window limit is also gone, in which
    /// case the day closes as OMAD at that same moment. Meal 2 always closes
    /// into fasting. An abandoned between-meals stage marks the day OMAD.
    pub fn check_inactivity(&mut self, now: NaiveDateTime) -> Result<Option<Notice>> {
        let Some(cycle) = self.current_cycle().copied() else {
            return Ok(None);
        };
        let abandoned_state = self.state();

        match abandoned_state {
            AppState::Fasting => return Ok(None),
            AppState::BetweenMeals => {
                if (now - cycle.meal1_start).num_minutes() < EW_HARD_LIMIT_MINUTES {
                    return Ok(None);
                }
                log::warn!("Cycle {}: between meals abandoned past the eating window", cycle.id);
                return Ok(self
                    .make_current_cycle_omad()?
                    .then_some(Notice::DayMarkedOmad { automatic: true }));
            }
            AppState::Meal1 | AppState::Meal2 => {}
        }

        let meal_start = self.last_meal_start();
        let meal_minutes = (now - meal_start).num_minutes();
        if meal_minutes < MEAL_HARD_LIMIT_MINUTES {
            return Ok(None);
        }

        let latch = format!("{}:{abandoned_state}", cycle.id);
        if self.store().get_setting(FORCED_FINISH_KEY)?.as_deref() == Some(latch.as_str()) {
            return Ok(None);
        }

        let finished_at = meal_start + Duration::minutes(MEAL_HARD_LIMIT_MINUTES);
        if abandoned_state.is_meal1() {
            self.start_between_meals(now, Some(finished_at))?;
            if meal_minutes >= EW_HARD_LIMIT_MINUTES {
                self.make_current_cycle_omad()?;
            }
        } else {
            self.start_fasting(now, Some(finished_at))?;
        }
        self.store().set_setting(FORCED_FINISH_KEY, &latch)?;

        log::warn!(
            "Cycle {}: {} abandoned for {meal_minutes} minutes, closed at {finished_at}",
            cycle.id,
            abandoned_state.label()
        );
        Ok(Some(Notice::MealFinishedByForce {
            abandoned: true,
            next: self.state(),
            at: finished_at,
        }))
    }
}
