use anyhow::{Context, Result};
use chrono::{Local, NaiveDateTime};
use serde::Serialize;
use std::io::{self, BufRead, IsTerminal, Write};

use iftimer_core::advance::AdvanceCheck;
use iftimer_core::duration::format_minutes;
use iftimer_core::models::Notice;
use iftimer_core::settings::Settings;

/// Wall-clock time as the core sees it: local, without offset.
pub(crate) fn now() -> NaiveDateTime {
    Local::now().naive_local()
}

pub(crate) fn json_error(message: &str) -> String {
    #[derive(Serialize)]
    struct CliError<'a> {
        error: &'a str,
    }
    serde_json::to_string(&CliError { error: message })
        .unwrap_or_else(|_| format!("{{\"error\":\"{message}\"}}"))
}

pub(crate) fn format_time(ts: NaiveDateTime) -> String {
    ts.format("%H:%M").to_string()
}

/// Clock time, with the date added when `ts` is not on the same day as `now`.
pub(crate) fn format_time_from(ts: NaiveDateTime, now: NaiveDateTime) -> String {
    if ts.date() == now.date() {
        format_time(ts)
    } else {
        ts.format("%a %d %b %H:%M").to_string()
    }
}

/// "2 hours 5 minutes", "-" for missing values and "0 minutes" for zero.
pub(crate) fn format_opt_minutes(minutes: Option<i64>) -> String {
    match minutes {
        None => "-".to_string(),
        Some(m) if m < 1 => "0 minutes".to_string(),
        Some(m) => format_minutes(m),
    }
}

pub(crate) fn describe_notice(notice: &Notice) -> String {
    match notice {
        Notice::MealFinishedByForce {
            abandoned: true,
            next,
            at,
        } => format!(
            "The meal was left running and has been closed at {}; now in {}.",
            format_time(*at),
            next.label()
        ),
        Notice::MealFinishedByForce {
            abandoned: false,
            next,
            ..
        } => format!(
            "The meal reached the one-hour limit and was finished; now in {}.",
            next.label()
        ),
        Notice::DayMarkedOmad { automatic: true } => {
            "Too long since meal 1: today is marked as one meal a day.".to_string()
        }
        Notice::DayMarkedOmad { automatic: false } => {
            "Today is marked as one meal a day.".to_string()
        }
        Notice::EatingWindowClosed {
            minutes,
            within_limit,
        } => {
            let span = format_opt_minutes(Some(*minutes));
            if *within_limit {
                format!("Eating window closed after {span}. Well done.")
            } else {
                format!("Eating window closed after {span}, longer than 8 hours.")
            }
        }
    }
}

/// Text for a main-button press that did not go straight through.
pub(crate) fn describe_check(check: &AdvanceCheck) -> Option<String> {
    match check {
        AdvanceCheck::Proceed => None,
        AdvanceCheck::Declined { state, minimum } => Some(format!(
            "Too early: {} has to last at least {minimum}.",
            state.label()
        )),
        AdvanceCheck::WillExceedEatingWindow { eating_window_end } => Some(format!(
            "Meal 2 started now will not finish before the eating window ends at {}.",
            format_time(*eating_window_end)
        )),
        AdvanceCheck::NeedsConfirmation { state, minimum } => Some(format!(
            "It is recommended that {} lasts at least {minimum}.",
            state.label()
        )),
    }
}

/// Print notices to stderr, ringing the bell when alarms are enabled.
pub(crate) fn print_notices(notices: &[Notice], settings: &Settings) {
    if notices.is_empty() {
        return;
    }
    alert(settings);
    for notice in notices {
        eprintln!("{}", describe_notice(notice));
    }
}

pub(crate) fn alert(settings: &Settings) {
    if settings.beep_on_alarm {
        eprint!("\x07");
    }
}

/// Ask a yes/no question on stderr. Anything but y/yes, or a closed or
/// non-interactive stdin, counts as no.
pub(crate) fn confirm(question: &str) -> Result<bool> {
    if !io::stdin().is_terminal() {
        return Ok(false);
    }
    eprint!("{question} [y/N] ");
    io::stderr().flush()?;
    let stdin = io::stdin();
    let Some(line) = stdin.lock().lines().next() else {
        return Ok(false);
    };
    let line = line.context("Failed to read answer")?;
    Ok(matches!(line.trim().to_lowercase().as_str(), "y" | "yes"))
}
