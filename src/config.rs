use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::NaiveDate;
use serde::Deserialize;

/// Everything a run needs, loaded once from a JSON file and passed by
/// reference into the pipeline. There is no other process-wide state.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// ID of the spreadsheet acting as the datastore.
    pub spreadsheet_id: String,
    #[serde(default)]
    pub google: GoogleAuthConfig,
    pub meta: Option<MetaConfig>,
    pub analytics: Option<AnalyticsConfig>,
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("error opening config file {}", path.display()))?;
        serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("error parsing config file {}", path.display()))
    }

    pub fn meta(&self) -> anyhow::Result<&MetaConfig> {
        self.meta.as_ref().context("the config file has no \"meta\" section")
    }

    pub fn analytics(&self) -> anyhow::Result<&AnalyticsConfig> {
        self.analytics.as_ref().context("the config file has no \"analytics\" section")
    }
}

// The defaults identify this tool's own OAuth client. They are not
// considered secret, since this is an installed application. See
// https://developers.google.com/identity/protocols/oauth2#installed
const DEFAULT_CLIENT_ID: &str =
    "276148507542-do7mkb3lq9h2v4tmun58fjep0cg81qv5.apps.googleusercontent.com";
const DEFAULT_CLIENT_SECRET: &str = "GOCSPX-q3PZkVb0TqxA7cFh2RBeL1sD";
const DEFAULT_TOKEN_CACHE: &str = "google_oauth_token.json";

/// OAuth client used for both the Sheets and the Analytics APIs.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GoogleAuthConfig {
    pub client_id: String,
    pub client_secret: String,
    /// Where the obtained token is cached between runs.
    pub token_cache: PathBuf,
}

impl Default for GoogleAuthConfig {
    fn default() -> Self {
        GoogleAuthConfig {
            client_id: DEFAULT_CLIENT_ID.to_owned(),
            client_secret: DEFAULT_CLIENT_SECRET.to_owned(),
            token_cache: PathBuf::from(DEFAULT_TOKEN_CACHE),
        }
    }
}

/// Credentials and query shape for the social-ads source.
#[derive(Debug, Clone, Deserialize)]
pub struct MetaConfig {
    pub app_id: String,
    pub app_secret: String,
    pub access_token: String,
    /// Numeric ad account ID, without the `act_` prefix.
    pub ad_account_id: String,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    /// Per-campaign metric fields requested from the insights edge.
    #[serde(default = "default_insight_fields")]
    pub insight_fields: Vec<String>,
    #[serde(default = "default_meta_totals_tab")]
    pub totals_tab: String,
    #[serde(default = "default_meta_details_tab")]
    pub details_tab: String,
    /// First week to fetch when a tab holds no prior data.
    #[serde(default = "default_meta_start")]
    pub default_start: NaiveDate,
    /// Only weeks ending strictly before this date are synced. Unset
    /// means "today, at the time of the run".
    #[serde(default)]
    pub cutoff: Option<NaiveDate>,
    /// Pause between per-campaign insight requests, in seconds.
    #[serde(default = "default_request_delay")]
    pub request_delay_secs: u64,
}

/// Credentials and query shape for the web-analytics source.
#[derive(Debug, Clone, Deserialize)]
pub struct AnalyticsConfig {
    /// Numeric reporting view ID.
    pub view_id: String,
    /// Metric expressions for the per-campaign queries.
    #[serde(default = "default_analytics_metrics")]
    pub metrics: Vec<String>,
    /// Metric expressions for the paid-traffic-segmented totals query.
    #[serde(default = "default_segmented_metrics")]
    pub segmented_metrics: Vec<String>,
    /// Regex matched against ga:medium to isolate paid traffic.
    #[serde(default = "default_paid_medium_regex")]
    pub paid_medium_regex: String,
    #[serde(default = "default_analytics_totals_tab")]
    pub totals_tab: String,
    #[serde(default = "default_analytics_details_tab")]
    pub details_tab: String,
    #[serde(default = "default_analytics_start")]
    pub default_start: NaiveDate,
    #[serde(default)]
    pub cutoff: Option<NaiveDate>,
}

fn default_api_version() -> String {
    "v19.0".to_owned()
}

fn default_insight_fields() -> Vec<String> {
    vec!["impressions".to_owned(), "clicks".to_owned(), "spend".to_owned()]
}

fn default_meta_totals_tab() -> String {
    "facebook_totals".to_owned()
}

fn default_meta_details_tab() -> String {
    "facebook_details".to_owned()
}

fn default_meta_start() -> NaiveDate {
    NaiveDate::from_ymd_opt(2016, 8, 29).expect("hardcoded date should be valid")
}

fn default_request_delay() -> u64 {
    5
}

fn default_analytics_metrics() -> Vec<String> {
    vec![
        "ga:impressions".to_owned(),
        "ga:adClicks".to_owned(),
        "ga:adCost".to_owned(),
    ]
}

fn default_segmented_metrics() -> Vec<String> {
    vec![
        "ga:sessions".to_owned(),
        "ga:goal6Completions".to_owned(),
        "ga:transactions".to_owned(),
        "ga:transactionRevenue".to_owned(),
    ]
}

fn default_paid_medium_regex() -> String {
    "^(cpc|ppc|cpa|cpm|cpv|cpp)$".to_owned()
}

fn default_analytics_totals_tab() -> String {
    "ga_totals".to_owned()
}

fn default_analytics_details_tab() -> String {
    "ga_details".to_owned()
}

fn default_analytics_start() -> NaiveDate {
    NaiveDate::from_ymd_opt(2017, 7, 2).expect("hardcoded date should be valid")
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use super::*;

    #[test]
    fn minimal_config_fills_in_defaults() {
        let config: Config = serde_json::from_str(
            r#"{
                "spreadsheet_id": "1aBcD",
                "meta": {
                    "app_id": "123",
                    "app_secret": "shh",
                    "access_token": "EAAtoken",
                    "ad_account_id": "4567"
                },
                "analytics": { "view_id": "98765432" }
            }"#,
        )
        .unwrap();
        assert_eq!(config.spreadsheet_id, "1aBcD");
        assert_eq!(config.google.client_id, DEFAULT_CLIENT_ID);
        assert_eq!(config.google.token_cache, PathBuf::from(DEFAULT_TOKEN_CACHE));

        let meta = config.meta().unwrap();
        assert_eq!(meta.api_version, "v19.0");
        assert_eq!(meta.insight_fields, ["impressions", "clicks", "spend"]);
        assert_eq!(meta.totals_tab, "facebook_totals");
        assert_eq!(meta.details_tab, "facebook_details");
        assert_eq!(meta.default_start, NaiveDate::from_ymd_opt(2016, 8, 29).unwrap());
        assert_eq!(meta.cutoff, None);
        assert_eq!(meta.request_delay_secs, 5);

        let analytics = config.analytics().unwrap();
        assert_eq!(analytics.metrics, ["ga:impressions", "ga:adClicks", "ga:adCost"]);
        assert_eq!(
            analytics.segmented_metrics,
            ["ga:sessions", "ga:goal6Completions", "ga:transactions", "ga:transactionRevenue"]
        );
        assert_eq!(analytics.paid_medium_regex, "^(cpc|ppc|cpa|cpm|cpv|cpp)$");
        assert_eq!(analytics.totals_tab, "ga_totals");
        assert_eq!(analytics.details_tab, "ga_details");
        assert_eq!(analytics.default_start, NaiveDate::from_ymd_opt(2017, 7, 2).unwrap());
        assert_eq!(analytics.cutoff, None);
    }

    #[test]
    fn a_missing_source_section_is_an_error() {
        let config: Config = serde_json::from_str(r#"{ "spreadsheet_id": "1aBcD" }"#).unwrap();
        assert!(config.meta().is_err());
        assert!(config.analytics().is_err());
    }

    #[test]
    fn explicit_values_override_the_defaults() {
        let config: Config = serde_json::from_str(
            r#"{
                "spreadsheet_id": "1aBcD",
                "google": { "token_cache": "/tmp/token.json" },
                "analytics": {
                    "view_id": "98765432",
                    "metrics": ["ga:sessions"],
                    "totals_tab": "weekly",
                    "default_start": "2018-01-01",
                    "cutoff": "2018-06-04"
                }
            }"#,
        )
        .unwrap();
        assert_eq!(config.google.token_cache, PathBuf::from("/tmp/token.json"));
        assert_eq!(config.google.client_id, DEFAULT_CLIENT_ID);

        let analytics = config.analytics().unwrap();
        assert_eq!(analytics.metrics, ["ga:sessions"]);
        assert_eq!(
            analytics.segmented_metrics,
            ["ga:sessions", "ga:goal6Completions", "ga:transactions", "ga:transactionRevenue"]
        );
        assert_eq!(analytics.totals_tab, "weekly");
        assert_eq!(analytics.details_tab, "ga_details");
        assert_eq!(analytics.default_start, NaiveDate::from_ymd_opt(2018, 1, 1).unwrap());
        assert_eq!(analytics.cutoff, Some(NaiveDate::from_ymd_opt(2018, 6, 4).unwrap()));
    }

    #[test]
    fn missing_required_fields_are_an_error() {
        let result: Result<Config, _> = serde_json::from_str(r#"{ "meta": {} }"#);
        assert!(result.is_err());
    }

    #[test]
    fn loads_from_a_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "spreadsheet_id": "1aBcD" }}"#).unwrap();
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.spreadsheet_id, "1aBcD");
        assert!(config.meta.is_none());
    }

    #[test]
    fn a_missing_file_reports_its_path() {
        let error = Config::load("/no/such/config.json").unwrap_err();
        assert!(format!("{error}").contains("/no/such/config.json"));
    }
}
