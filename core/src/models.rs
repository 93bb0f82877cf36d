use std::fmt;
use std::str::FromStr;

use anyhow::{Context, Result, bail};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Storage format for every timestamp column (ISO-8601 local date-time).
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

#[must_use]
pub fn format_timestamp(ts: NaiveDateTime) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

pub fn parse_timestamp(s: &str) -> Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT)
        .with_context(|| format!("Invalid timestamp '{s}'"))
}

// --- App state ---

/// The stage of the daily cycle the user is in. Exactly one is active at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AppState {
    #[serde(rename = "MEAL_1")]
    Meal1,
    #[serde(rename = "BETWEEN_MEALS")]
    BetweenMeals,
    #[serde(rename = "MEAL_2")]
    Meal2,
    /// Between Meal 2 (or an OMAD mark) and the next Meal 1. Also the state
    /// before the first Meal 1 is ever started.
    #[default]
    #[serde(rename = "FASTING")]
    Fasting,
}

impl AppState {
    pub const ALL: [AppState; 4] = [
        AppState::Meal1,
        AppState::BetweenMeals,
        AppState::Meal2,
        AppState::Fasting,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            AppState::Meal1 => "MEAL_1",
            AppState::BetweenMeals => "BETWEEN_MEALS",
            AppState::Meal2 => "MEAL_2",
            AppState::Fasting => "FASTING",
        }
    }

    #[must_use]
    pub fn is_meal1(self) -> bool {
        self == AppState::Meal1
    }

    #[must_use]
    pub fn is_between_meals(self) -> bool {
        self == AppState::BetweenMeals
    }

    #[must_use]
    pub fn is_meal2(self) -> bool {
        self == AppState::Meal2
    }

    #[must_use]
    pub fn is_fasting(self) -> bool {
        self == AppState::Fasting
    }

    /// True during either meal.
    #[must_use]
    pub fn is_meal(self) -> bool {
        matches!(self, AppState::Meal1 | AppState::Meal2)
    }

    /// Human label, as shown next to the timers.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            AppState::Meal1 => "meal 1",
            AppState::BetweenMeals => "after meal 1",
            AppState::Meal2 => "meal 2",
            AppState::Fasting => "fasting window",
        }
    }
}

impl fmt::Display for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AppState {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match AppState::ALL.iter().find(|state| state.as_str() == s) {
            Some(state) => Ok(*state),
            None => bail!("'{s}' is not a valid app state"),
        }
    }
}

// --- Storage row ---

/// One row of the `cycles` table, exactly as stored: five nullable timestamps.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleRecord {
    pub id: Option<i64>,
    pub meal1_start: Option<NaiveDateTime>,
    pub between_meals_start: Option<NaiveDateTime>,
    pub meal2_start: Option<NaiveDateTime>,
    pub fasting_start: Option<NaiveDateTime>,
    /// Set when the next cycle's Meal 1 starts; null marks the current cycle.
    pub fasting_finish: Option<NaiveDateTime>,
}

impl CycleRecord {
    #[must_use]
    pub fn is_current(&self) -> bool {
        self.fasting_finish.is_none()
    }

    #[must_use]
    pub fn is_omad(&self) -> bool {
        self.meal2_start.is_none() && self.fasting_start.is_some()
    }
}

// --- In-memory cycle ---

/// How far a cycle has progressed, with the timestamps each stage carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum Progress {
    Meal1,
    BetweenMeals {
        meal1_finish: NaiveDateTime,
    },
    Meal2 {
        meal1_finish: NaiveDateTime,
        meal2_start: NaiveDateTime,
    },
    Fasting {
        meal1_finish: NaiveDateTime,
        meal2_start: NaiveDateTime,
        fasting_start: NaiveDateTime,
    },
    /// Meal 2 never happened; the fasting window opened straight from Between-Meals.
    Omad {
        meal1_finish: NaiveDateTime,
        fasting_start: NaiveDateTime,
    },
}

impl Progress {
    #[must_use]
    pub fn app_state(&self) -> AppState {
        match self {
            Progress::Meal1 => AppState::Meal1,
            Progress::BetweenMeals { .. } => AppState::BetweenMeals,
            Progress::Meal2 { .. } => AppState::Meal2,
            Progress::Fasting { .. } | Progress::Omad { .. } => AppState::Fasting,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cycle {
    pub id: i64,
    pub meal1_start: NaiveDateTime,
    pub progress: Progress,
    pub fasting_finish: Option<NaiveDateTime>,
}

impl Cycle {
    #[must_use]
    pub fn app_state(&self) -> AppState {
        self.progress.app_state()
    }

    #[must_use]
    pub fn is_omad(&self) -> bool {
        matches!(self.progress, Progress::Omad { .. })
    }

    #[must_use]
    pub fn is_archived(&self) -> bool {
        self.fasting_finish.is_some()
    }

    /// `betweenMealsStart` in storage terms.
    #[must_use]
    pub fn meal1_finish(&self) -> Option<NaiveDateTime> {
        match self.progress {
            Progress::Meal1 => None,
            Progress::BetweenMeals { meal1_finish }
            | Progress::Meal2 { meal1_finish, .. }
            | Progress::Fasting { meal1_finish, .. }
            | Progress::Omad { meal1_finish, .. } => Some(meal1_finish),
        }
    }

    #[must_use]
    pub fn meal2_start(&self) -> Option<NaiveDateTime> {
        match self.progress {
            Progress::Meal2 { meal2_start, .. } | Progress::Fasting { meal2_start, .. } => {
                Some(meal2_start)
            }
            _ => None,
        }
    }

    #[must_use]
    pub fn fasting_start(&self) -> Option<NaiveDateTime> {
        match self.progress {
            Progress::Fasting { fasting_start, .. } | Progress::Omad { fasting_start, .. } => {
                Some(fasting_start)
            }
            _ => None,
        }
    }
}

impl TryFrom<CycleRecord> for Cycle {
    type Error = anyhow::Error;

    fn try_from(row: CycleRecord) -> Result<Self> {
        let Some(id) = row.id else {
            bail!("Cycle row has no id");
        };
        let Some(meal1_start) = row.meal1_start else {
            bail!("Cycle {id} is corrupt: meal1_start is null");
        };

        let progress = match (row.between_meals_start, row.meal2_start, row.fasting_start) {
            (None, None, None) => Progress::Meal1,
            (Some(meal1_finish), None, None) => Progress::BetweenMeals { meal1_finish },
            (Some(meal1_finish), Some(meal2_start), None) => Progress::Meal2 {
                meal1_finish,
                meal2_start,
            },
            (Some(meal1_finish), Some(meal2_start), Some(fasting_start)) => Progress::Fasting {
                meal1_finish,
                meal2_start,
                fasting_start,
            },
            (Some(meal1_finish), None, Some(fasting_start)) => Progress::Omad {
                meal1_finish,
                fasting_start,
            },
            _ => bail!("Cycle {id} is corrupt: stage timestamps are not set in order: {row:?}"),
        };

        Ok(Cycle {
            id,
            meal1_start,
            progress,
            fasting_finish: row.fasting_finish,
        })
    }
}

impl From<&Cycle> for CycleRecord {
    fn from(cycle: &Cycle) -> Self {
        CycleRecord {
            id: Some(cycle.id),
            meal1_start: Some(cycle.meal1_start),
            between_meals_start: cycle.meal1_finish(),
            meal2_start: cycle.meal2_start(),
            fasting_start: cycle.fasting_start(),
            fasting_finish: cycle.fasting_finish,
        }
    }
}

// --- Notices ---

/// Informational outcome of an automatic or corrective transition, to be shown
/// to the user. Not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notice {
    /// A meal reached its one-hour limit and was closed for the user.
    MealFinishedByForce {
        /// True when the limit passed while the app was not running.
        abandoned: bool,
        next: AppState,
        at: NaiveDateTime,
    },
    DayMarkedOmad {
        /// False when the user asked for it (menu or cancelling a late Meal 2).
        automatic: bool,
    },
    EatingWindowClosed {
        minutes: i64,
        within_limit: bool,
    },
}

// --- Stats ---

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleStats {
    pub cycles: i64,
    pub avg_meal1_minutes: Option<i64>,
    pub avg_between_meals_minutes: Option<i64>,
    pub avg_meal2_minutes: Option<i64>,
    pub avg_eating_window_minutes: Option<i64>,
    pub meal1_count: i64,
    pub meal2_count: i64,
    pub avg_meal_minutes: Option<i64>,
    pub omad_count: i64,
    pub omad_pct: i64,
}

impl CycleStats {
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn from_db(
        avg_meal1: Option<f64>,
        avg_between_meals: Option<f64>,
        avg_meal2: Option<f64>,
        avg_ew: Option<f64>,
        meal1_count: i64,
        meal2_count: i64,
    ) -> Self {
        let round = |v: Option<f64>| v.map(|m| m.round() as i64);

        let meals = meal1_count + meal2_count;
        let avg_meal_minutes = if meals > 0 {
            let total = avg_meal1.unwrap_or(0.0) * meal1_count as f64
                + avg_meal2.unwrap_or(0.0) * meal2_count as f64;
            Some((total / meals as f64).round() as i64)
        } else {
            None
        };

        let omad_count = meal1_count - meal2_count;
        let omad_pct = if meal1_count > 0 {
            (omad_count as f64 / meal1_count as f64 * 100.0).round() as i64
        } else {
            0
        };

        Self {
            cycles: meal1_count,
            avg_meal1_minutes: round(avg_meal1),
            avg_between_meals_minutes: round(avg_between_meals),
            avg_meal2_minutes: round(avg_meal2),
            avg_eating_window_minutes: round(avg_ew),
            meal1_count,
            meal2_count,
            avg_meal_minutes,
            omad_count,
            omad_pct,
        }
    }
}
