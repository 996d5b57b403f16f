use anyhow::Context as _;
use tracing::info;

use crate::apis::google_sheets::{self, ReadTabError};
use crate::config::Config;
use crate::table::AccumulatedTable;

pub mod analytics;
pub mod export;
pub mod social;

#[derive(clap::Subcommand, Debug)]
pub enum Subcommand {
    /// Sync weekly social-ads campaign metrics into the spreadsheet.
    Social(social::Args),
    /// Sync weekly web-analytics campaign metrics into the spreadsheet.
    Analytics(analytics::Args),
    /// Export one stored tab as CSV.
    Export(export::Args),
}

/// Reads a tab's stored table, treating a missing tab as "no prior data"
/// rather than an error.
fn load_tab(config: &Config, tab: &str) -> anyhow::Result<Option<AccumulatedTable>> {
    match google_sheets::read_tab(&config.google, &config.spreadsheet_id, tab) {
        Ok(table) => Ok(Some(table)),
        Err(ReadTabError::TabNotFound(_)) => {
            info!("tab {:?} holds no prior data; starting from the default date", tab);
            Ok(None)
        }
        Err(ReadTabError::Other(e)) => {
            Err(e).with_context(|| format!("error reading tab {tab:?}"))
        }
    }
}
