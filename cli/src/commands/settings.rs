use anyhow::Result;
use tabled::{Table, Tabled, settings::Style};

use iftimer_core::db::Database;
use iftimer_core::service::FastingService;
use iftimer_core::settings::{ALL_KEYS, Settings};

use crate::config::Config;

#[derive(Tabled)]
struct SettingRow {
    #[tabled(rename = "Setting")]
    key: &'static str,
    #[tabled(rename = "Value")]
    value: String,
}

fn setting_rows(settings: &Settings) -> Result<Vec<SettingRow>> {
    ALL_KEYS
        .iter()
        .map(|&key| {
            Ok(SettingRow {
                key,
                value: settings.value_of(key)?,
            })
        })
        .collect()
}

fn print_settings(settings: &Settings, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(settings)?);
        return Ok(());
    }

    let table = Table::new(setting_rows(settings)?)
        .with(Style::rounded())
        .to_string();
    println!("{table}");
    Ok(())
}

pub(crate) fn cmd_settings_show(svc: &FastingService, json: bool) -> Result<()> {
    print_settings(svc.settings(), json)
}

pub(crate) fn cmd_settings_set(
    svc: &mut FastingService,
    key: &str,
    value: &str,
    json: bool,
) -> Result<()> {
    let updated = svc.update_setting(key, value)?;
    if json {
        return print_settings(&updated, true);
    }
    println!("{key} = {}", updated.value_of(key)?);
    Ok(())
}

/// Works directly on the database: stored settings that no longer validate
/// would stop the service from opening.
pub(crate) fn cmd_settings_reset(config: &Config, json: bool) -> Result<()> {
    let db = Database::open(&config.db_path)?;
    Settings::reset(&db)?;
    log::info!("Settings reset to defaults");

    if json {
        return print_settings(&Settings::default(), true);
    }
    println!("Settings reset to defaults");
    Ok(())
}
