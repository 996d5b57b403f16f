use std::fs::File;
use std::io::Write;
use std::path::PathBuf;

use anyhow::Context as _;

use crate::apis::google_sheets;
use crate::config::Config;
use crate::table::AccumulatedTable;

#[derive(clap::Args, Debug)]
pub struct Args {
    /// Path of the JSON configuration file.
    #[arg(long, default_value = "config.json", env = "ADSHEET_CONFIG")]
    config: PathBuf,

    /// Name of the stored tab to export.
    #[arg(long)]
    tab: String,

    /// The file to write the CSV to. "-" or unspecified writes to stdout.
    #[arg(short, long, default_value = None)]
    output: Option<String>,
}

pub fn main(args: Args) -> anyhow::Result<()> {
    let Args { config, tab, output } = args;
    let config = Config::load(config)?;

    let table = google_sheets::read_tab(&config.google, &config.spreadsheet_id, &tab)
        .with_context(|| format!("error reading tab {tab:?}"))?;

    match output.as_deref() {
        Some("-") | None => write_csv(&table, std::io::stdout()),
        Some(path) => {
            let file =
                File::create(path).with_context(|| format!("error creating output file {path}"))?;
            write_csv(&table, file)
        }
    }
}

fn write_csv(table: &AccumulatedTable, writer: impl Write) -> anyhow::Result<()> {
    let mut writer = csv::Writer::from_writer(writer);
    let mut header = vec![String::new()];
    header.extend(table.columns.iter().map(|label| label.to_string()));
    writer.write_record(&header)?;
    for row in &table.rows {
        let mut record = vec![row.label.clone()];
        record.extend(row.cells.iter().map(|cell| match cell {
            Some(value) => value.to_string(),
            None => String::new(),
        }));
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}
