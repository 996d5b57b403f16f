use std::path::PathBuf;

use chrono::{NaiveDate, Utc};
use reqwest::blocking::Client;
use tracing::info;

use crate::apis::{google_analytics, google_oauth, google_sheets};
use crate::config::{AnalyticsConfig, Config};
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
    let analytics = config.analytics()?;
    let cutoff = cutoff.or(analytics.cutoff).unwrap_or_else(|| Utc::now().date_naive());

    let http = Client::new();
    sync_totals(&config, analytics, &http, cutoff)?;
    sync_details(&config, analytics, &http, cutoff)?;
    Ok(())
}

/// The totals tab stacks two queries per week: the plain per-campaign
/// metrics summed across campaigns, then the paid-segment metrics summed
/// the same way.
fn sync_totals(
    config: &Config,
    analytics: &AnalyticsConfig,
    http: &Client,
    cutoff: NaiveDate,
) -> anyhow::Result<()> {
    let existing = super::load_tab(config, &analytics.totals_tab)?;
    let resume = pipeline::resume_point(existing, analytics.default_start)?;
    info!("syncing tab {:?} from {} up to {}", analytics.totals_tab, resume.start_date, cutoff);

    let table = pipeline::accumulate_totals(resume.table, resume.start_date, cutoff, |start| {
        let (records, segmented) = google_oauth::with_google_token(&config.google, |token| {
            let records = google_analytics::fetch_week_report(http, token, analytics, start)?;
            let segmented =
                google_analytics::fetch_week_segmented_report(http, token, analytics, start)?;
            Ok((records, segmented))
        })?;
        let label = WeekLabel::from_date(start);
        let mut column = normalize::totals(&records, &analytics.metrics, label)?;
        let mut paid = normalize::totals(&segmented, &analytics.segmented_metrics, label)?;
        // the paid rows keep their own labels, so relabel collisions away
        for (row_label, _) in &mut paid.rows {
            *row_label = format!("paid_{row_label}");
        }
        column.rows.extend(paid.rows);
        Ok(column)
    })?;

    match table {
        Some(table) => google_sheets::write_table(
            &config.google,
            &config.spreadsheet_id,
            &analytics.totals_tab,
            &table,
        ),
        None => Ok(()),
    }
}

fn sync_details(
    config: &Config,
    analytics: &AnalyticsConfig,
    http: &Client,
    cutoff: NaiveDate,
) -> anyhow::Result<()> {
    let existing = super::load_tab(config, &analytics.details_tab)?;
    let resume = pipeline::resume_point(existing, analytics.default_start)?;
    info!("syncing tab {:?} from {} up to {}", analytics.details_tab, resume.start_date, cutoff);

    let table = pipeline::accumulate_details(resume.table, resume.start_date, cutoff, |start| {
        let records = google_oauth::with_google_token(&config.google, |token| {
            google_analytics::fetch_week_report(http, token, analytics, start)
        })?;
        normalize::details(&records, &analytics.metrics, WeekLabel::from_date(start))
    })?;

    match table {
        Some(table) => google_sheets::write_table(
            &config.google,
            &config.spreadsheet_id,
            &analytics.details_tab,
            &table,
        ),
        None => Ok(()),
    }
}
