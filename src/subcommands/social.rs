use std::path::PathBuf;

use chrono::{NaiveDate, Utc};
use reqwest::blocking::Client;
use tracing::info;

use crate::apis::{google_sheets, meta_ads};
use crate::config::{Config, MetaConfig};
use crate::normalize;
use crate::pipeline;
use crate::week::WeekLabel;

#[derive(clap::Args, Debug)]
pub struct Args {
    /// Path of the JSON configuration file.
    #[arg(long, default_value = "config.json", env = "ADSHEET_CONFIG")]
    config: PathBuf,

    /// Only sync weeks ending strictly before this date (%Y-%m-%d).
    /// Defaults to the cutoff in the config file, or to today.
    #[arg(long)]
    cutoff: Option<NaiveDate>,
}

pub fn main(args: Args) -> anyhow::Result<()> {
    let Args { config, cutoff } = args;
    let config = Config::load(config)?;
    let meta = config.meta()?;
    let cutoff = cutoff.or(meta.cutoff).unwrap_or_else(|| Utc::now().date_naive());

    let http = Client::new();

    // fail early on a dead token instead of partway through a long run
    meta_ads::verify_access_token(&http, meta)?;

    sync_totals(&config, meta, &http, cutoff)?;
    sync_details(&config, meta, &http, cutoff)?;
    Ok(())
}

fn sync_totals(
    config: &Config,
    meta: &MetaConfig,
    http: &Client,
    cutoff: NaiveDate,
) -> anyhow::Result<()> {
    let existing = super::load_tab(config, &meta.totals_tab)?;
    let resume = pipeline::resume_point(existing, meta.default_start)?;
    info!("syncing tab {:?} from {} up to {}", meta.totals_tab, resume.start_date, cutoff);

    let table = pipeline::accumulate_totals(resume.table, resume.start_date, cutoff, |start| {
        let records = meta_ads::fetch_week_stats(http, meta, start)?;
        normalize::totals(&records, &meta.insight_fields, WeekLabel::from_date(start))
    })?;

    match table {
        Some(table) => google_sheets::write_table(
            &config.google,
            &config.spreadsheet_id,
            &meta.totals_tab,
            &table,
        ),
        None => Ok(()),
    }
}

fn sync_details(
    config: &Config,
    meta: &MetaConfig,
    http: &Client,
    cutoff: NaiveDate,
) -> anyhow::Result<()> {
    let existing = super::load_tab(config, &meta.details_tab)?;
    let resume = pipeline::resume_point(existing, meta.default_start)?;
    info!("syncing tab {:?} from {} up to {}", meta.details_tab, resume.start_date, cutoff);

    let table = pipeline::accumulate_details(resume.table, resume.start_date, cutoff, |start| {
        let records = meta_ads::fetch_week_stats(http, meta, start)?;
        normalize::details(&records, &meta.insight_fields, WeekLabel::from_date(start))
    })?;

    match table {
        Some(table) => google_sheets::write_table(
            &config.google,
            &config.spreadsheet_id,
            &meta.details_tab,
            &table,
        ),
        None => Ok(()),
    }
}
