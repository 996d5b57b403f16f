use anyhow::{anyhow, bail, Context};
use oauth2::TokenResponse as _;
use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, info, trace};

use crate::apis::google_oauth::{self, CredentialsError, Token};
use crate::config::GoogleAuthConfig;
use crate::table::{AccumulatedTable, TableRow};

const ENDPOINT_SPREADSHEETS: &str = "https://sheets.googleapis.com/v4/spreadsheets";

#[derive(Error, Debug)]
pub enum ReadTabError {
    /// The tab does not exist or holds no data yet. Callers recover from
    /// this by starting the sync from their configured default date.
    #[error("tab {0:?} does not exist or holds no data")]
    TabNotFound(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Reads the stored table out of one tab of the spreadsheet.
pub fn read_tab(
    auth: &GoogleAuthConfig,
    spreadsheet_id: &str,
    tab: &str,
) -> Result<AccumulatedTable, ReadTabError> {
    let http = Client::new();
    let table =
        google_oauth::with_google_token(auth, |token| {
            fetch_tab_values(&http, token, spreadsheet_id, tab)
        })
        .map_err(ReadTabError::Other)?;
    table.ok_or_else(|| ReadTabError::TabNotFound(tab.to_owned()))
}

/// Overwrites one tab of the spreadsheet with the full table, creating
/// the tab first when it does not exist.
pub fn write_table(
    auth: &GoogleAuthConfig,
    spreadsheet_id: &str,
    tab: &str,
    table: &AccumulatedTable,
) -> anyhow::Result<()> {
    let http = Client::new();
    google_oauth::with_google_token(auth, |token| {
        ensure_tab_exists(&http, token, spreadsheet_id, tab)?;
        clear_tab(&http, token, spreadsheet_id, tab)?;
        upload_values(&http, token, spreadsheet_id, tab, table)
    })?;
    info!(
        "wrote {} week column(s) to tab {:?} of https://docs.google.com/spreadsheets/d/{}/edit",
        table.width(),
        tab,
        spreadsheet_id
    );
    Ok(())
}

fn fetch_tab_values(
    http: &Client,
    token: &Token,
    spreadsheet_id: &str,
    tab: &str,
) -> Result<Option<AccumulatedTable>, CredentialsError> {
    let url = format!("{ENDPOINT_SPREADSHEETS}/{spreadsheet_id}/values/{tab}");
    trace!("reading tab {:?} from {}", tab, url);
    let response = http
        .get(&url)
        .query(&[("valueRenderOption", "UNFORMATTED_VALUE"), ("majorDimension", "ROWS")])
        .bearer_auth(token.access_token().secret())
        .send()
        .map_err(|e| anyhow!("request to read tab {tab:?} failed: {e}"))?;
    let response = match response.status() {
        StatusCode::UNAUTHORIZED => {
            return Err(CredentialsError::Unauthorized(anyhow!(
                "request to read tab {tab:?} was unauthorized"
            )));
        }
        // asking for a range in a tab that does not exist is a bad-request
        // complaint about the range, not a 404; other 400s are real errors
        StatusCode::BAD_REQUEST => {
            let detail = response.text().unwrap_or_default();
            if !is_missing_tab_error(&detail) {
                return Err(
                    anyhow!("request to read tab {tab:?} failed with 400: {detail}").into()
                );
            }
            debug!("tab {:?} does not exist yet: {}", tab, detail);
            return Ok(None);
        }
        StatusCode::NOT_FOUND => {
            return Err(anyhow!("no spreadsheet with ID {spreadsheet_id:?}").into());
        }
        status if !status.is_success() => {
            let detail = response.text().unwrap_or_default();
            return Err(
                anyhow!("request to read tab {tab:?} failed with {status}: {detail}").into()
            );
        }
        _ => response,
    };

    #[derive(Deserialize)]
    struct ValueRange {
        #[serde(default)]
        values: Vec<Vec<Value>>,
    }
    let ValueRange { values } =
        response.json().map_err(|e| anyhow!("error deserializing tab {tab:?}: {e}"))?;
    if values.is_empty() {
        debug!("tab {:?} exists but is empty", tab);
        return Ok(None);
    }
    let table = grid_to_table(&values).map_err(CredentialsError::Other)?;
    info!("loaded {} stored week column(s) from tab {:?}", table.width(), tab);
    Ok(Some(table))
}

// The values endpoint reports a missing tab as a failure to parse the
// requested range.
fn is_missing_tab_error(body: &str) -> bool {
    body.contains("Unable to parse range")
}

/// One mutation of a `batchUpdate` request. see
/// https://developers.google.com/sheets/api/reference/rest/v4/spreadsheets/batchUpdate
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
enum Request {
    AddSheet { properties: SheetProperties },
}

#[derive(Debug, Serialize)]
struct SheetProperties {
    title: String,
}

fn ensure_tab_exists(
    http: &Client,
    token: &Token,
    spreadsheet_id: &str,
    tab: &str,
) -> Result<(), CredentialsError> {
    let url = format!("{ENDPOINT_SPREADSHEETS}/{spreadsheet_id}");
    let response = http
        .get(&url)
        .query(&[("fields", "sheets.properties.title")])
        .bearer_auth(token.access_token().secret())
        .send()
        .map_err(|e| anyhow!("request to list tabs failed: {e}"))?;
    let response = expect_success(response, "request to list tabs")?;

    #[derive(Deserialize)]
    struct SpreadsheetMeta {
        #[serde(default)]
        sheets: Vec<SheetMeta>,
    }
    #[derive(Deserialize)]
    struct SheetMeta {
        properties: SheetMetaProperties,
    }
    #[derive(Deserialize)]
    struct SheetMetaProperties {
        #[serde(default)]
        title: String,
    }
    let meta: SpreadsheetMeta =
        response.json().map_err(|e| anyhow!("error deserializing the tab list: {e}"))?;
    if meta.sheets.iter().any(|sheet| sheet.properties.title == tab) {
        return Ok(());
    }

    info!("creating missing tab {:?}", tab);
    let url = format!("{ENDPOINT_SPREADSHEETS}/{spreadsheet_id}:batchUpdate");
    let body = json!({
        "requests": [Request::AddSheet { properties: SheetProperties { title: tab.to_owned() } }],
    });
    let response = http
        .post(&url)
        .bearer_auth(token.access_token().secret())
        .json(&body)
        .send()
        .map_err(|e| anyhow!("request to create tab {tab:?} failed: {e}"))?;
    expect_success(response, "request to create tab")?;
    Ok(())
}

fn clear_tab(
    http: &Client,
    token: &Token,
    spreadsheet_id: &str,
    tab: &str,
) -> Result<(), CredentialsError> {
    let url = format!("{ENDPOINT_SPREADSHEETS}/{spreadsheet_id}/values/{tab}:clear");
    let response = http
        .post(&url)
        .bearer_auth(token.access_token().secret())
        .json(&json!({}))
        .send()
        .map_err(|e| anyhow!("request to clear tab {tab:?} failed: {e}"))?;
    expect_success(response, "request to clear tab")?;
    Ok(())
}

fn upload_values(
    http: &Client,
    token: &Token,
    spreadsheet_id: &str,
    tab: &str,
    table: &AccumulatedTable,
) -> Result<(), CredentialsError> {
    let url = format!("{ENDPOINT_SPREADSHEETS}/{spreadsheet_id}/values/{tab}");
    let body = json!({
        "range": tab,
        "majorDimension": "ROWS",
        "values": table_to_grid(table),
    });
    trace!("uploading {} row(s) to tab {:?}", table.rows.len() + 1, tab);
    let response = http
        .put(&url)
        .query(&[("valueInputOption", "RAW")])
        .bearer_auth(token.access_token().secret())
        .json(&body)
        .send()
        .map_err(|e| anyhow!("request to write tab {tab:?} failed: {e}"))?;
    expect_success(response, "request to write tab")?;
    Ok(())
}

fn expect_success(
    response: reqwest::blocking::Response,
    what: &str,
) -> Result<reqwest::blocking::Response, CredentialsError> {
    match response.status() {
        StatusCode::UNAUTHORIZED => {
            Err(CredentialsError::Unauthorized(anyhow!("{what} was unauthorized")))
        }
        status if !status.is_success() => {
            let detail = response.text().unwrap_or_default();
            Err(anyhow!("{what} failed with {status}: {detail}").into())
        }
        _ => Ok(response),
    }
}

/// Lays a table out the way the datastore stores it: week labels across
/// the first row, row labels down the first column, blanks for missing
/// values.
fn table_to_grid(table: &AccumulatedTable) -> Vec<Vec<Value>> {
    let mut grid = Vec::with_capacity(table.rows.len() + 1);
    let mut header = Vec::with_capacity(table.columns.len() + 1);
    header.push(Value::String(String::new()));
    header.extend(table.columns.iter().map(|label| Value::String(label.to_string())));
    grid.push(header);
    for row in &table.rows {
        let mut cells = Vec::with_capacity(table.columns.len() + 1);
        cells.push(Value::String(row.label.clone()));
        cells.extend(row.cells.iter().map(|cell| match cell {
            Some(value) => json!(value),
            None => Value::String(String::new()),
        }));
        grid.push(cells);
    }
    grid
}

/// Inverse of [`table_to_grid`], tolerating the ways a spreadsheet mangles
/// a grid: rows come back truncated after their last non-empty cell, and
/// unformatted numbers may arrive as numbers or as strings.
fn grid_to_table(grid: &[Vec<Value>]) -> anyhow::Result<AccumulatedTable> {
    let (header, data_rows) = grid.split_first().context("the stored grid has no header row")?;
    let mut columns = Vec::with_capacity(header.len().saturating_sub(1));
    for label in header.iter().skip(1) {
        let label = cell_to_string(label);
        let label = label.trim();
        columns.push(
            label.parse().with_context(|| format!("bad week label {label:?} in the header"))?,
        );
    }
    let mut rows = Vec::with_capacity(data_rows.len());
    for row in data_rows {
        let label = row.first().map(cell_to_string).unwrap_or_default();
        if label.is_empty() {
            bail!("the stored grid has a row with no label");
        }
        let mut cells = Vec::with_capacity(columns.len());
        for i in 0..columns.len() {
            cells.push(
                parse_cell(row.get(i + 1))
                    .with_context(|| format!("in row {label:?}, column {}", columns[i]))?,
            );
        }
        rows.push(TableRow { label, cells });
    }
    Ok(AccumulatedTable { columns, rows })
}

fn cell_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn parse_cell(value: Option<&Value>) -> anyhow::Result<Option<f64>> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => {
            let parsed =
                s.trim().parse().with_context(|| format!("cannot parse cell {s:?} as a number"))?;
            Ok(Some(parsed))
        }
        Some(Value::Number(n)) => {
            Ok(Some(n.as_f64().with_context(|| format!("number {n} does not fit an f64"))?))
        }
        Some(other) => bail!("unexpected cell {other}"),
    }
}
