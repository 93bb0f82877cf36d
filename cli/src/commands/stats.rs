use anyhow::{Result, bail};
use std::process;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use iftimer_core::models::{CycleRecord, CycleStats};
use iftimer_core::service::{FastingService, StatsReport};
use iftimer_core::settings::STATS_RETENTION_CYCLES;

use super::helpers::{format_opt_minutes, json_error};

#[derive(Tabled)]
struct StatsRow {
    #[tabled(rename = "")]
    label: &'static str,
    #[tabled(rename = "Previous")]
    previous: String,
    #[tabled(rename = "Last 7")]
    last_7: String,
    #[tabled(rename = "Last 30")]
    last_30: String,
    #[tabled(rename = "Last 365")]
    last_365: String,
}

fn stats_rows(report: &StatsReport) -> Vec<StatsRow> {
    let columns = [
        &report.previous,
        &report.last_7,
        &report.last_30,
        &report.last_365,
    ];
    let row = |label: &'static str, cell: &dyn Fn(&CycleStats) -> String| {
        let [previous, last_7, last_30, last_365] = columns.map(cell);
        StatsRow {
            label,
            previous,
            last_7,
            last_30,
            last_365,
        }
    };

    vec![
        row("Cycles", &|s: &CycleStats| s.cycles.to_string()),
        row("Meal 1", &|s: &CycleStats| format_opt_minutes(s.avg_meal1_minutes)),
        row("After meal 1", &|s: &CycleStats| {
            format_opt_minutes(s.avg_between_meals_minutes)
        }),
        row("Meal 2", &|s: &CycleStats| format_opt_minutes(s.avg_meal2_minutes)),
        row("Any meal", &|s: &CycleStats| format_opt_minutes(s.avg_meal_minutes)),
        row("Eating window", &|s: &CycleStats| {
            format_opt_minutes(s.avg_eating_window_minutes)
        }),
        row("One meal a day", &|s: &CycleStats| format!("{} ({}%)", s.omad_count, s.omad_pct)),
    ]
}

pub(crate) fn cmd_stats(svc: &mut FastingService, json: bool) -> Result<()> {
    let Some(report) = svc.stats()? else {
        let message = "No completed cycles yet";
        if json {
            println!("{}", json_error(message));
        } else {
            eprintln!("{message}");
        }
        process::exit(2);
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Average durations\n");
    let table = Table::new(stats_rows(&report))
        .with(Style::rounded())
        .with(Modify::new(Columns::new(1..)).with(Alignment::right()))
        .to_string();
    println!("{table}");

    Ok(())
}

#[derive(Tabled)]
struct HistoryRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Meal 1")]
    meal1_start: String,
    #[tabled(rename = "After meal 1")]
    between_meals_start: String,
    #[tabled(rename = "Meal 2")]
    meal2_start: String,
    #[tabled(rename = "Fasting")]
    fasting_start: String,
    #[tabled(rename = "Fasted")]
    fasted: String,
}

fn history_row(record: &CycleRecord) -> HistoryRow {
    let time = |ts: Option<chrono::NaiveDateTime>| {
        ts.map_or("-".to_string(), |t| t.format("%H:%M").to_string())
    };
    let fasted = match (record.fasting_start, record.fasting_finish) {
        (Some(start), Some(finish)) => format_opt_minutes(Some((finish - start).num_minutes())),
        (Some(_), None) => "ongoing".to_string(),
        _ => "-".to_string(),
    };
    let meal2_start = if record.is_omad() {
        "skipped".to_string()
    } else {
        time(record.meal2_start)
    };

    HistoryRow {
        id: record.id.map_or("-".to_string(), |id| id.to_string()),
        meal1_start: record
            .meal1_start
            .map_or("-".to_string(), |t| t.format("%Y-%m-%d %H:%M").to_string()),
        between_meals_start: time(record.between_meals_start),
        meal2_start,
        fasting_start: time(record.fasting_start),
        fasted,
    }
}

pub(crate) fn cmd_history(svc: &FastingService, limit: Option<usize>, json: bool) -> Result<()> {
    let mut records = svc.history()?;
    if let Some(limit) = limit {
        records.truncate(limit);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    if records.is_empty() {
        eprintln!("No cycles recorded");
        process::exit(2);
    }

    let rows: Vec<HistoryRow> = records.iter().map(history_row).collect();
    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(2..)).with(Alignment::right()))
        .to_string();
    println!("{table}");

    Ok(())
}

pub(crate) fn cmd_clear_stats(svc: &mut FastingService, yes: bool, json: bool) -> Result<()> {
    if !yes {
        bail!("This deletes cycle history. Pass --yes to confirm");
    }

    let deleted = svc.clear_stats()?;
    if json {
        println!("{}", serde_json::json!({ "deleted": deleted }));
    } else {
        println!("Deleted {deleted} cycle(s)");
    }
    Ok(())
}

pub(crate) fn cmd_prune(svc: &mut FastingService, json: bool) -> Result<()> {
    let deleted = svc.prune()?;
    if json {
        println!(
            "{}",
            serde_json::json!({ "deleted": deleted, "kept": STATS_RETENTION_CYCLES })
        );
    } else {
        println!("Deleted {deleted} cycle(s) older than the last {STATS_RETENTION_CYCLES}");
    }
    Ok(())
}
