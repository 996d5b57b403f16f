use anyhow::{anyhow, bail};
use chrono::{Duration, NaiveDate};
use oauth2::TokenResponse as _;
use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, trace};

use crate::apis::google_oauth::{CredentialsError, Token};
use crate::config::AnalyticsConfig;
use crate::normalize::CampaignStats;

const ENDPOINT_REPORTS: &str = "https://analyticsreporting.googleapis.com/v4/reports:batchGet";

/// One week of per-campaign metrics for the view.
pub fn fetch_week_report(
    http: &Client,
    token: &Token,
    config: &AnalyticsConfig,
    start: NaiveDate,
) -> Result<Vec<CampaignStats>, CredentialsError> {
    run_report(http, token, report_request(config, start, &config.metrics, false))
}

/// One week of per-campaign metrics restricted to paid traffic, using a
/// dynamic segment on ga:medium.
pub fn fetch_week_segmented_report(
    http: &Client,
    token: &Token,
    config: &AnalyticsConfig,
    start: NaiveDate,
) -> Result<Vec<CampaignStats>, CredentialsError> {
    run_report(http, token, report_request(config, start, &config.segmented_metrics, true))
}

fn report_request(
    config: &AnalyticsConfig,
    start: NaiveDate,
    metrics: &[String],
    segmented: bool,
) -> Value {
    let metrics: Vec<Value> =
        metrics.iter().map(|expression| json!({ "expression": expression })).collect();
    let mut request = json!({
        "viewId": config.view_id,
        "dateRanges": [{
            "startDate": start.format("%Y-%m-%d").to_string(),
            "endDate": (start + Duration::days(6)).format("%Y-%m-%d").to_string(),
        }],
        "metrics": metrics,
        "dimensions": [{ "name": "ga:campaign" }],
    });
    if segmented {
        // a query with a segment must also request the segment dimension
        request["dimensions"] = json!([{ "name": "ga:campaign" }, { "name": "ga:segment" }]);
        request["segments"] = json!([{
            "dynamicSegment": {
                "name": "Paid Sessions",
                "sessionSegment": {
                    "segmentFilters": [{
                        "simpleSegment": {
                            "orFiltersForSegment": [{
                                "segmentFilterClauses": [{
                                    "dimensionFilter": {
                                        "dimensionName": "ga:medium",
                                        "operator": "REGEXP",
                                        "expressions": [config.paid_medium_regex],
                                    },
                                }],
                            }],
                        },
                    }],
                },
            },
        }]);
    }
    json!({ "reportRequests": [request] })
}

#[derive(Debug, Deserialize)]
struct BatchGetResponse {
    reports: Vec<Report>,
}

#[derive(Debug, Deserialize)]
struct Report {
    #[serde(rename = "columnHeader")]
    column_header: ColumnHeader,
    #[serde(default)]
    data: ReportData,
}

#[derive(Debug, Deserialize)]
struct ColumnHeader {
    #[serde(rename = "metricHeader")]
    metric_header: MetricHeader,
}

#[derive(Debug, Deserialize)]
struct MetricHeader {
    #[serde(rename = "metricHeaderEntries")]
    entries: Vec<MetricHeaderEntry>,
}

#[derive(Debug, Deserialize)]
struct MetricHeaderEntry {
    name: String,
}

#[derive(Debug, Default, Deserialize)]
struct ReportData {
    #[serde(default)]
    rows: Vec<ReportRow>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReportRow {
    #[serde(default)]
    dimensions: Vec<String>,
    metrics: Vec<MetricValues>,
}

#[derive(Debug, Deserialize)]
struct MetricValues {
    values: Vec<Value>,
}

fn run_report(
    http: &Client,
    token: &Token,
    body: Value,
) -> Result<Vec<CampaignStats>, CredentialsError> {
    trace!("requesting a report from {}", ENDPOINT_REPORTS);
    let response = http
        .post(ENDPOINT_REPORTS)
        .bearer_auth(token.access_token().secret())
        .json(&body)
        .send()
        .map_err(|e| anyhow!("report request failed: {e}"))?;
    let response = match response.status() {
        StatusCode::UNAUTHORIZED => {
            return Err(CredentialsError::Unauthorized(anyhow!(
                "report request was unauthorized"
            )));
        }
        status if !status.is_success() => {
            let detail = response.text().unwrap_or_default();
            return Err(anyhow!("report request failed with {status}: {detail}").into());
        }
        _ => response,
    };
    let mut parsed: BatchGetResponse = response
        .json()
        .map_err(|e| anyhow!("error deserializing the report response: {e}"))?;
    if parsed.reports.is_empty() {
        return Err(anyhow!("the report response contains no reports").into());
    }
    let report = parsed.reports.remove(0);
    flatten_report(report).map_err(CredentialsError::Other)
}

/// Reshapes a report into one record per row, with metric values keyed by
/// the metric names from the column header.
fn flatten_report(report: Report) -> anyhow::Result<Vec<CampaignStats>> {
    // the API pages at 1000 rows; taking only the first page would store
    // a truncated week
    if report.data.next_page_token.is_some() {
        bail!("the report did not fit in one page ({} rows returned)", report.data.rows.len());
    }
    let metric_names: Vec<String> =
        report.column_header.metric_header.entries.into_iter().map(|entry| entry.name).collect();
    let mut records = Vec::with_capacity(report.data.rows.len());
    for row in report.data.rows {
        // rows of a segmented query also carry the segment name
        let campaign = row.dimensions.join(" / ");
        let values = match row.metrics.into_iter().next() {
            Some(first_range) => first_range.values,
            None => bail!("report row {campaign:?} has no metric values"),
        };
        if values.len() != metric_names.len() {
            bail!(
                "report row {:?} has {} values for {} metrics",
                campaign,
                values.len(),
                metric_names.len()
            );
        }
        let mut fields = Map::new();
        for (name, value) in metric_names.iter().zip(values) {
            fields.insert(name.clone(), value);
        }
        records.push(CampaignStats { campaign, fields });
    }
    debug!("report returned {} row(s)", records.len());
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AnalyticsConfig;

    fn config() -> AnalyticsConfig {
        serde_json::from_str(r#"{ "view_id": "98765432" }"#).unwrap()
    }

    #[test]
    fn requests_cover_one_inclusive_week() {
        let start = NaiveDate::from_ymd_opt(2017, 7, 3).unwrap();
        let body = report_request(&config(), start, &["ga:sessions".to_owned()], false);
        let request = &body["reportRequests"][0];
        assert_eq!(request["viewId"], "98765432");
        assert_eq!(request["dateRanges"][0]["startDate"], "2017-07-03");
        assert_eq!(request["dateRanges"][0]["endDate"], "2017-07-09");
        assert_eq!(request["metrics"][0]["expression"], "ga:sessions");
        assert_eq!(request["dimensions"], serde_json::json!([{ "name": "ga:campaign" }]));
        assert!(request.get("segments").is_none());
    }

    #[test]
    fn segmented_requests_filter_on_the_medium_regex() {
        let start = NaiveDate::from_ymd_opt(2017, 7, 3).unwrap();
        let body = report_request(&config(), start, &["ga:sessions".to_owned()], true);
        let request = &body["reportRequests"][0];
        assert_eq!(request["dimensions"][1]["name"], "ga:segment");
        let filter = &request["segments"][0]["dynamicSegment"]["sessionSegment"]
            ["segmentFilters"][0]["simpleSegment"]["orFiltersForSegment"][0]
            ["segmentFilterClauses"][0]["dimensionFilter"];
        assert_eq!(filter["dimensionName"], "ga:medium");
        assert_eq!(filter["operator"], "REGEXP");
        assert_eq!(filter["expressions"][0], "^(cpc|ppc|cpa|cpm|cpv|cpp)$");
    }

    #[test]
    fn reports_flatten_into_one_record_per_row() {
        let report: Report = serde_json::from_value(serde_json::json!({
            "columnHeader": {
                "dimensions": ["ga:campaign"],
                "metricHeader": {
                    "metricHeaderEntries": [
                        { "name": "ga:sessions", "type": "INTEGER" },
                        { "name": "ga:transactionRevenue", "type": "CURRENCY" },
                    ],
                },
            },
            "data": {
                "rows": [
                    {
                        "dimensions": ["spring_sale"],
                        "metrics": [{ "values": ["12", "99.5"] }],
                    },
                    {
                        "dimensions": ["(not set)"],
                        "metrics": [{ "values": ["3", "0.0"] }],
                    },
                ],
                "totals": [{ "values": ["15", "99.5"] }],
            },
        }))
        .unwrap();
        let records = flatten_report(report).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].campaign, "spring_sale");
        assert_eq!(records[0].fields["ga:sessions"], serde_json::json!("12"));
        assert_eq!(records[1].fields["ga:transactionRevenue"], serde_json::json!("0.0"));
    }

    #[test]
    fn an_empty_report_flattens_to_no_records() {
        let report: Report = serde_json::from_value(serde_json::json!({
            "columnHeader": {
                "metricHeader": { "metricHeaderEntries": [{ "name": "ga:sessions" }] },
            },
        }))
        .unwrap();
        assert!(flatten_report(report).unwrap().is_empty());
    }

    #[test]
    fn a_value_count_mismatch_is_an_error() {
        let report: Report = serde_json::from_value(serde_json::json!({
            "columnHeader": {
                "metricHeader": { "metricHeaderEntries": [{ "name": "ga:sessions" }] },
            },
            "data": {
                "rows": [{ "dimensions": ["x"], "metrics": [{ "values": ["1", "2"] }] }],
            },
        }))
        .unwrap();
        assert!(flatten_report(report).is_err());
    }

    #[test]
    fn a_paginated_report_is_an_error() {
        let report: Report = serde_json::from_value(serde_json::json!({
            "columnHeader": {
                "metricHeader": { "metricHeaderEntries": [{ "name": "ga:sessions" }] },
            },
            "data": {
                "rows": [{ "dimensions": ["x"], "metrics": [{ "values": ["1"] }] }],
                "nextPageToken": "1000",
            },
        }))
        .unwrap();
        let error = flatten_report(report).unwrap_err();
        assert!(format!("{error}").contains("did not fit in one page"));
    }
}
