mod cycle;
mod helpers;
mod settings;
mod stats;

pub(crate) use cycle::{cmd_cancel, cmd_meal2, cmd_next, cmd_status, cmd_watch};
pub(crate) use helpers::{now, print_notices};
pub(crate) use settings::{cmd_settings_reset, cmd_settings_set, cmd_settings_show};
pub(crate) use stats::{cmd_clear_stats, cmd_history, cmd_prune, cmd_stats};
