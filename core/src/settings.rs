use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::store::SettingsStore;

// --- Hard limits (not user-configurable) ---

/// A meal that reaches this length is finished for the user. Also the limit
/// after which a finished meal can no longer be cancelled.
pub const MEAL_HARD_LIMIT_MINUTES: i64 = 60;
/// Longest eating window the app tolerates before marking the day OMAD.
pub const EW_HARD_LIMIT_MINUTES: i64 = 8 * 60;
pub const FASTING_TARGET_HOURS: i64 = 16;
/// Meal 2 can still be started after an OMAD mark until this long after Meal 1 start.
pub const MEAL2_AFTER_OMAD_LIMIT_MINUTES: i64 = 12 * 60;

/// Below these the main button is refused outright.
pub const DECLINE_MEAL_MINUTES: i64 = 2;
pub const DECLINE_BETWEEN_MEALS_HOURS: i64 = 1;
pub const DECLINE_FASTING_HOURS: i64 = 3;

/// Below this the user is asked to confirm finishing a meal.
pub const CONFIRM_MEAL_MINUTES: i64 = 10;

pub const STATS_RETENTION_CYCLES: i64 = 365;

// --- Setting keys ---

pub const KEY_MAX_MEAL_MINUTES: &str = "max_meal_minutes";
pub const KEY_MAX_EW_HOURS: &str = "max_ew_hours";
pub const KEY_MIN_BETWEEN_MEALS_HOURS: &str = "min_between_meals_hours";
pub const KEY_BEEP_ON_ALARM: &str = "beep_on_alarm";
pub const KEY_VIBRATE_ON_ALARM: &str = "vibrate_on_alarm";
pub const KEY_VIBRATE_ON_BUTTON_CLICK: &str = "vibrate_on_button_click";
pub const KEY_USE_LONG_CLICK: &str = "use_long_click";

pub const ALL_KEYS: [&str; 7] = [
    KEY_MAX_MEAL_MINUTES,
    KEY_MAX_EW_HOURS,
    KEY_MIN_BETWEEN_MEALS_HOURS,
    KEY_BEEP_ON_ALARM,
    KEY_VIBRATE_ON_ALARM,
    KEY_VIBRATE_ON_BUTTON_CLICK,
    KEY_USE_LONG_CLICK,
];

const MIN_BETWEEN_MEALS_CHOICES: [i64; 4] = [0, 3, 4, 5];

/// User-configurable thresholds and feedback toggles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    pub max_meal_minutes: i64,
    pub max_ew_hours: i64,
    /// 0 turns off the between-meals minimum.
    pub min_between_meals_hours: i64,
    pub beep_on_alarm: bool,
    pub vibrate_on_alarm: bool,
    pub vibrate_on_button_click: bool,
    pub use_long_click: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_meal_minutes: 30,
            max_ew_hours: 8,
            min_between_meals_hours: 3,
            beep_on_alarm: true,
            vibrate_on_alarm: true,
            vibrate_on_button_click: true,
            use_long_click: false,
        }
    }
}

impl Settings {
    /// Read every key, falling back to defaults for keys never written.
    /// A stored combination that breaks the eating-window rule is an error.
    pub fn load(store: &impl SettingsStore) -> Result<Self> {
        let mut settings = Settings::default();
        for key in ALL_KEYS {
            if let Some(value) = store.get_setting(key)? {
                settings
                    .apply(key, &value)
                    .with_context(|| format!("Stored setting '{key}' is invalid"))?;
            }
        }
        settings
            .validate()
            .context("Stored settings are inconsistent; run `iftimer settings reset`")?;
        Ok(settings)
    }

    pub fn save(&self, store: &impl SettingsStore) -> Result<()> {
        self.validate()?;
        for key in ALL_KEYS {
            store.set_setting(key, &self.value_of(key)?)?;
        }
        log::info!("Settings saved: {self:?}");
        Ok(())
    }

    /// Forget every stored value so defaults apply again.
    pub fn reset(store: &impl SettingsStore) -> Result<()> {
        for key in ALL_KEYS {
            store.delete_setting(key)?;
        }
        Ok(())
    }

    /// Parse `value` into the field named by `key`. Ranges are checked here,
    /// the cross-field rule in [`Settings::validate`].
    pub fn apply(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            KEY_MAX_MEAL_MINUTES => {
                let v = parse_int(key, value)?;
                if !(15..=40).contains(&v) {
                    bail!("Maximum meal length must be between 15 and 40 minutes (got {v})");
                }
                self.max_meal_minutes = v;
            }
            KEY_MAX_EW_HOURS => {
                let v = parse_int(key, value)?;
                if !(4..=8).contains(&v) {
                    bail!("Maximum eating window must be between 4 and 8 hours (got {v})");
                }
                self.max_ew_hours = v;
            }
            KEY_MIN_BETWEEN_MEALS_HOURS => {
                let v = parse_int(key, value)?;
                if !MIN_BETWEEN_MEALS_CHOICES.contains(&v) {
                    bail!("Minimum time between meals must be 0, 3, 4 or 5 hours (got {v})");
                }
                self.min_between_meals_hours = v;
            }
            KEY_BEEP_ON_ALARM => self.beep_on_alarm = parse_bool(key, value)?,
            KEY_VIBRATE_ON_ALARM => self.vibrate_on_alarm = parse_bool(key, value)?,
            KEY_VIBRATE_ON_BUTTON_CLICK => self.vibrate_on_button_click = parse_bool(key, value)?,
            KEY_USE_LONG_CLICK => self.use_long_click = parse_bool(key, value)?,
            _ => bail!("Unknown setting '{key}'. Valid settings: {}", ALL_KEYS.join(", ")),
        }
        Ok(())
    }

    pub fn value_of(&self, key: &str) -> Result<String> {
        let value = match key {
            KEY_MAX_MEAL_MINUTES => self.max_meal_minutes.to_string(),
            KEY_MAX_EW_HOURS => self.max_ew_hours.to_string(),
            KEY_MIN_BETWEEN_MEALS_HOURS => self.min_between_meals_hours.to_string(),
            KEY_BEEP_ON_ALARM => self.beep_on_alarm.to_string(),
            KEY_VIBRATE_ON_ALARM => self.vibrate_on_alarm.to_string(),
            KEY_VIBRATE_ON_BUTTON_CLICK => self.vibrate_on_button_click.to_string(),
            KEY_USE_LONG_CLICK => self.use_long_click.to_string(),
            _ => bail!("Unknown setting '{key}'"),
        };
        Ok(value)
    }

    /// Two longest meals plus the minimum gap must fit inside the eating window.
    pub fn validate(&self) -> Result<()> {
        let needed = 2 * self.max_meal_minutes + self.min_between_meals_hours * 60;
        let available = self.max_ew_hours * 60;
        if needed > available {
            bail!(
                "Two {}-minute meals with {} hours between them take {needed} minutes, \
                 more than the {}-hour eating window ({available} minutes)",
                self.max_meal_minutes,
                self.min_between_meals_hours,
                self.max_ew_hours
            );
        }
        Ok(())
    }

    /// Whether an alarm (forced meal finish, OMAD mark) should beep or vibrate.
    #[must_use]
    pub fn alarm_enabled(&self) -> bool {
        self.beep_on_alarm || self.vibrate_on_alarm
    }
}

fn parse_int(key: &str, value: &str) -> Result<i64> {
    value
        .trim()
        .parse()
        .with_context(|| format!("Setting '{key}' expects a whole number, got '{value}'"))
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        _ => bail!("Setting '{key}' expects true or false, got '{value}'"),
    }
}
