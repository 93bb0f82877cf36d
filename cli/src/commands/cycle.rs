use anyhow::Result;
use chrono::NaiveDateTime;
use std::io::{self, Write};
use std::process;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

use iftimer_core::advance::next_state;
use iftimer_core::guidance::Guidance;
use iftimer_core::service::{AdvanceOutcome, CancelOutcome, FastingService, Status};

use super::helpers::{
    alert, confirm, describe_check, describe_notice, format_opt_minutes, format_time,
    format_time_from, json_error, now, print_notices,
};

pub(crate) fn cmd_status(svc: &FastingService, json: bool) -> Result<()> {
    let now = now();
    let status = svc.status(now)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    print_status(&status, now);
    Ok(())
}

fn print_status(status: &Status, now: NaiveDateTime) {
    let label = status.state.label();
    match status.stage_minutes {
        Some(m) => println!("{} for {}", capitalize(label), format_opt_minutes(Some(m))),
        None => println!("No cycle yet. Run `iftimer next` to start meal 1."),
    }

    if let Some(cycle) = &status.cycle {
        println!();
        println!("  Meal 1        {}", format_time_from(cycle.meal1_start, now));
        if let Some(t) = cycle.meal1_finish() {
            println!("  After meal 1  {}", format_time_from(t, now));
        }
        if let Some(t) = cycle.meal2_start() {
            println!("  Meal 2        {}", format_time_from(t, now));
        }
        if let Some(t) = cycle.fasting_start() {
            let omad = if cycle.is_omad() { " (one meal a day)" } else { "" };
            println!("  Fasting       {}{omad}", format_time_from(t, now));
        }
        println!(
            "  Eating window {}",
            format_opt_minutes(status.eating_window_minutes)
        );
    }

    if let Some(text) = describe_guidance(&status.guidance, now) {
        println!();
        println!("{text}");
    }
    if status.can_start_meal2_after_omad {
        println!("Changed your mind? `iftimer meal2` starts meal 2 after all.");
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn describe_guidance(guidance: &Guidance, now: NaiveDateTime) -> Option<String> {
    match guidance {
        Guidance::NotStarted => None,
        Guidance::Meal {
            stop_eating: true,
            forced_finish_at,
            ..
        } => Some(format!(
            "Time to stop eating. The meal will be finished automatically at {}.",
            format_time(*forced_finish_at)
        )),
        Guidance::Meal { finish_by, .. } => {
            Some(format!("Finish the meal by {}.", format_time(*finish_by)))
        }
        Guidance::BetweenMeals {
            will_exceed_eating_window: true,
            eating_window_end,
            ..
        } => Some(format!(
            "Too late for meal 2: the eating window ends at {}. Consider fasting until tomorrow.",
            format_time(*eating_window_end)
        )),
        Guidance::BetweenMeals {
            earliest_next_meal,
            latest_next_meal,
            eating_window_hours,
            wait_minutes,
            ..
        } => {
            let latest = format_time_from(*latest_next_meal, now);
            Some(match earliest_next_meal {
                Some(earliest) if *wait_minutes > 0 => format!(
                    "Next meal between {} and {latest} ({}-hour eating window).",
                    format_time_from(*earliest, now),
                    eating_window_hours
                ),
                _ => format!(
                    "Have meal 2 before {latest} ({eating_window_hours}-hour eating window)."
                ),
            })
        }
        Guidance::Fasting {
            earliest_next_meal,
            wait_minutes,
            ..
        } => Some(if *wait_minutes > 0 {
            format!(
                "Next meal at {} or later ({} to go).",
                format_time_from(*earliest_next_meal, now),
                format_opt_minutes(Some(*wait_minutes))
            )
        } else {
            "Fasting target reached. You can eat whenever you are ready.".to_string()
        }),
    }
}

pub(crate) fn cmd_next(svc: &mut FastingService, yes: bool, json: bool) -> Result<()> {
    let now = now();
    let check = svc.check_advance(now)?;

    let mut confirmed = yes;
    if !json && !yes && check.needs_confirmation() {
        if let Some(text) = describe_check(&check) {
            eprintln!("{text}");
        }
        confirmed = confirm(&format!("Start {} anyway?", next_label(svc)))?;
    }

    let outcome = svc.advance(now, confirmed)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    }

    match outcome {
        AdvanceOutcome::Held { check } => {
            if !json {
                if check.is_declined() {
                    eprintln!("{}", describe_check(&check).unwrap_or_default());
                } else {
                    eprintln!("Not advanced. Pass --yes to go ahead anyway.");
                }
            }
            process::exit(2);
        }
        AdvanceOutcome::Advanced { state, notice } => {
            if !json {
                println!("Started {} at {}", state.label(), format_time(now));
                if let Some(notice) = notice {
                    println!("{}", describe_notice(&notice));
                }
            }
        }
    }

    Ok(())
}

fn next_label(svc: &FastingService) -> &'static str {
    next_state(svc.state()).label()
}

pub(crate) fn cmd_cancel(svc: &mut FastingService, json: bool) -> Result<()> {
    let outcome = svc.cancel(now())?;

    match outcome {
        CancelOutcome::TooLate => {
            let message = "Too late to cancel: the last change was over an hour ago";
            if json {
                println!("{}", json_error(message));
            } else {
                eprintln!("{message}");
            }
            process::exit(2);
        }
        CancelOutcome::Cancelled { state, notice } => {
            if json {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            } else {
                println!("Cancelled. Back to {}.", state.label());
                if let Some(notice) = notice {
                    println!("{}", describe_notice(&notice));
                }
            }
        }
    }

    Ok(())
}

pub(crate) fn cmd_meal2(svc: &mut FastingService, json: bool) -> Result<()> {
    let now = now();
    if !svc.start_meal2_after_omad(now)? {
        let message = "Meal 2 can only be started on a one-meal day within 12 hours of meal 1";
        if json {
            println!("{}", json_error(message));
        } else {
            eprintln!("{message}");
        }
        process::exit(2);
    }

    if json {
        println!(
            "{}",
            serde_json::json!({ "state": svc.state(), "started": now })
        );
    } else {
        println!("Started meal 2 at {}", format_time(now));
    }
    Ok(())
}

/// Run in the foreground, ticking every `interval` seconds until Ctrl-C.
pub(crate) async fn cmd_watch(svc: &mut FastingService, interval: u64) -> Result<()> {
    let mut ticker = tokio::time::interval(Duration::from_secs(interval.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut stdout = io::stdout();
    // Alert once per meal when it passes the configured length.
    let mut stop_alerted = false;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let now = now();
                if let Some(notice) = svc.tick(now)? {
                    println!();
                    print_notices(std::slice::from_ref(&notice), svc.settings());
                }

                let status = svc.status(now)?;
                let stop_eating =
                    matches!(status.guidance, Guidance::Meal { stop_eating: true, .. });
                if stop_eating && !stop_alerted {
                    alert(svc.settings());
                }
                stop_alerted = stop_eating;

                write!(stdout, "\r\x1b[2K{}", status_line(&status))?;
                stdout.flush()?;
            }
            _ = &mut ctrl_c => {
                println!();
                log::debug!("Watch interrupted");
                return Ok(());
            }
        }
    }
}

fn status_line(status: &Status) -> String {
    let stage = format_opt_minutes(status.stage_minutes);
    match status.eating_window_minutes {
        Some(ew) if !status.state.is_fasting() => format!(
            "{}: {stage} | eating window: {}",
            status.state.label(),
            format_opt_minutes(Some(ew))
        ),
        _ => format!("{}: {stage}", status.state.label()),
    }
}
