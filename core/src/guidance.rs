use chrono::{Duration, NaiveDateTime};
use serde::Serialize;

use crate::duration::Durations;
use crate::models::AppState;
use crate::settings::{EW_HARD_LIMIT_MINUTES, FASTING_TARGET_HOURS, MEAL_HARD_LIMIT_MINUTES};

/// What the user should do next, as shown under the timers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum Guidance {
    /// No cycle has ever been started.
    NotStarted,
    Meal {
        /// Past the configured maximum meal length.
        stop_eating: bool,
        finish_by: NaiveDateTime,
        /// When the meal will be closed automatically.
        forced_finish_at: NaiveDateTime,
    },
    BetweenMeals {
        /// `None` when no minimum gap is configured.
        earliest_next_meal: Option<NaiveDateTime>,
        latest_next_meal: NaiveDateTime,
        eating_window_end: NaiveDateTime,
        /// Configured window, or 8 once the configured one has run out.
        eating_window_hours: i64,
        wait_minutes: i64,
        will_exceed_eating_window: bool,
    },
    Fasting {
        earliest_next_meal: NaiveDateTime,
        wait_minutes: i64,
        fasted_minutes: i64,
    },
}

fn minutes_until(now: NaiveDateTime, at: NaiveDateTime) -> i64 {
    (at - now).num_minutes().max(0)
}

#[must_use]
pub fn guidance(dur: &Durations) -> Guidance {
    let now = dur.now();
    let settings = dur.settings();

    match dur.state() {
        AppState::Meal1 | AppState::Meal2 => {
            let start = dur.last_meal_start();
            Guidance::Meal {
                stop_eating: dur.meal_too_long(),
                finish_by: start + Duration::minutes(settings.max_meal_minutes),
                forced_finish_at: start + Duration::minutes(MEAL_HARD_LIMIT_MINUTES),
            }
        }
        AppState::BetweenMeals => {
            let mut ew_hours = settings.max_ew_hours;
            if dur.eating_window_minutes() > ew_hours * 60 {
                ew_hours = EW_HARD_LIMIT_MINUTES / 60;
            }
            let eating_window_end = dur.eating_window_start() + Duration::hours(ew_hours);
            let latest_next_meal = eating_window_end - Duration::minutes(settings.max_meal_minutes);
            let earliest_next_meal = (settings.min_between_meals_hours > 0).then(|| {
                dur.between_meals_start() + Duration::hours(settings.min_between_meals_hours)
            });
            Guidance::BetweenMeals {
                earliest_next_meal,
                latest_next_meal,
                eating_window_end,
                eating_window_hours: ew_hours,
                wait_minutes: earliest_next_meal.map_or(0, |at| minutes_until(now, at)),
                will_exceed_eating_window: !dur.enough_time_to_finish_meal2_inside_8h_ew(),
            }
        }
        AppState::Fasting => {
            let Some(last_meal_finish) = dur.last_meal_finish().filter(|_| dur.any_cycle_exists())
            else {
                return Guidance::NotStarted;
            };
            let earliest_next_meal = last_meal_finish + Duration::hours(FASTING_TARGET_HOURS);
            Guidance::Fasting {
                earliest_next_meal,
                wait_minutes: minutes_until(now, earliest_next_meal),
                fasted_minutes: dur.fasting_minutes(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::tests::{full_cycle, mins, new_controller, t0};
    use crate::settings::Settings;

    #[test]
    fn test_not_started() {
        let ctl = new_controller();
        let settings = Settings::default();
        let dur = ctl.durations(&settings, t0()).unwrap();
        assert_eq!(guidance(&dur), Guidance::NotStarted);
    }

    #[test]
    fn test_meal_guidance() {
        let mut ctl = new_controller();
        let settings = Settings::default();
        ctl.start_meal1(t0()).unwrap();

        let dur = ctl.durations(&settings, mins(31)).unwrap();
        assert_eq!(
            guidance(&dur),
            Guidance::Meal {
                stop_eating: true,
                finish_by: mins(30),
                forced_finish_at: mins(60),
            }
        );
    }

    #[test]
    fn test_between_meals_guidance() {
        let mut ctl = new_controller();
        let settings = Settings {
            max_ew_hours: 6,
            ..Settings::default()
        };
        ctl.start_meal1(t0()).unwrap();
        ctl.start_between_meals(mins(30), None).unwrap();

        let dur = ctl.durations(&settings, mins(60)).unwrap();
        assert_eq!(
            guidance(&dur),
            Guidance::BetweenMeals {
                earliest_next_meal: Some(mins(210)),
                latest_next_meal: mins(330),
                eating_window_end: mins(360),
                eating_window_hours: 6,
                wait_minutes: 150,
                will_exceed_eating_window: false,
            }
        );

        // Configured window used up: extended to the 8-hour limit.
        let dur = ctl.durations(&settings, mins(361)).unwrap();
        let Guidance::BetweenMeals {
            eating_window_end,
            eating_window_hours,
            wait_minutes,
            ..
        } = guidance(&dur)
        else {
            panic!("expected between-meals guidance");
        };
        assert_eq!(eating_window_hours, 8);
        assert_eq!(eating_window_end, mins(480));
        assert_eq!(wait_minutes, 0);
    }

    #[test]
    fn test_fasting_guidance() {
        let mut ctl = new_controller();
        let settings = Settings::default();
        full_cycle(&mut ctl, t0());

        let dur = ctl.durations(&settings, mins(260 + 600)).unwrap();
        assert_eq!(
            guidance(&dur),
            Guidance::Fasting {
                earliest_next_meal: mins(260 + 16 * 60),
                wait_minutes: 360,
                fasted_minutes: 600,
            }
        );
    }
}
