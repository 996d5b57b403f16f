use std::thread;
use std::time::Duration;

use anyhow::{bail, Context};
use chrono::NaiveDate;
use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use crate::config::MetaConfig;
use crate::normalize::CampaignStats;

const ENDPOINT_GRAPH: &str = "https://graph.facebook.com";

#[derive(Debug, Deserialize)]
struct Campaign {
    id: String,
    name: String,
}

/// Checks the configured access token against the app credentials before
/// committing to a long run of insight requests.
pub fn verify_access_token(http: &Client, config: &MetaConfig) -> anyhow::Result<()> {
    #[derive(Deserialize)]
    struct DebugResponse {
        data: DebugData,
    }
    #[derive(Deserialize)]
    struct DebugData {
        is_valid: bool,
        #[serde(default)]
        expires_at: Option<i64>,
    }

    let url = format!("{ENDPOINT_GRAPH}/{}/debug_token", config.api_version);
    // inspecting a token requires an app token, which for a server-side
    // call is just "app_id|app_secret"
    let app_token = format!("{}|{}", config.app_id, config.app_secret);
    let response = http
        .get(&url)
        .query(&[
            ("input_token", config.access_token.as_str()),
            ("access_token", app_token.as_str()),
        ])
        .send()
        .context("token inspection request failed")?
        .error_for_status()
        .context("token inspection request was rejected")?;
    let DebugResponse { data } =
        response.json().context("error deserializing the token inspection response")?;
    if !data.is_valid {
        bail!("the configured access token is not valid for app {}", config.app_id);
    }
    if let Some(expires_at) = data.expires_at.filter(|&at| at > 0) {
        debug!("the access token expires at unix time {}", expires_at);
    }
    info!("access token verified against app {}", config.app_id);
    Ok(())
}

/// Pulls one week of insights, `[start, start + 6]` inclusive, for every
/// campaign in the account, in the order the API lists them. Campaigns
/// with no delivery in the window return no insight row and are skipped,
/// which keeps the position indices dense.
pub fn fetch_week_stats(
    http: &Client,
    config: &MetaConfig,
    start: NaiveDate,
) -> anyhow::Result<Vec<CampaignStats>> {
    let campaigns = list_campaigns(http, config)?;
    let since = start.format("%Y-%m-%d").to_string();
    let until = (start + chrono::Duration::days(6)).format("%Y-%m-%d").to_string();
    let time_range = json!({ "since": since, "until": until }).to_string();
    let fields = config.insight_fields.join(",");

    let mut stats = Vec::new();
    for campaign in campaigns {
        // pace the requests; accounts with many campaigns trip the
        // insights rate limit otherwise
        thread::sleep(Duration::from_secs(config.request_delay_secs));
        let rows = fetch_campaign_insights(http, config, &campaign, &fields, &time_range)?;
        if rows.is_empty() {
            debug!("campaign {:?} had no delivery between {} and {}", campaign.name, since, until);
            continue;
        }
        let mut merged = Map::new();
        for row in rows {
            merged.extend(row);
        }
        stats.push(CampaignStats { campaign: campaign.name, fields: merged });
    }
    info!("{} campaign(s) reported insights between {} and {}", stats.len(), since, until);
    Ok(stats)
}

fn list_campaigns(http: &Client, config: &MetaConfig) -> anyhow::Result<Vec<Campaign>> {
    #[derive(Deserialize)]
    struct CampaignsResponse {
        data: Vec<Campaign>,
        #[serde(default)]
        paging: Option<Paging>,
    }
    #[derive(Deserialize)]
    struct Paging {
        #[serde(default)]
        next: Option<String>,
    }

    let mut campaigns = Vec::new();
    let url =
        format!("{ENDPOINT_GRAPH}/{}/act_{}/campaigns", config.api_version, config.ad_account_id);
    let mut request = http.get(&url).query(&[
        ("fields", "name"),
        ("limit", "100"),
        ("access_token", config.access_token.as_str()),
    ]);
    loop {
        let response = request
            .send()
            .context("campaign list request failed")?
            .error_for_status()
            .context("campaign list request was rejected")?;
        let CampaignsResponse { data, paging } =
            response.json().context("error deserializing the campaign list")?;
        campaigns.extend(data);
        match paging.and_then(|paging| paging.next) {
            // the next URL carries all the query parameters already
            Some(next) => request = http.get(next),
            None => break,
        }
    }
    debug!("account act_{} has {} campaign(s)", config.ad_account_id, campaigns.len());
    Ok(campaigns)
}

fn fetch_campaign_insights(
    http: &Client,
    config: &MetaConfig,
    campaign: &Campaign,
    fields: &str,
    time_range: &str,
) -> anyhow::Result<Vec<Map<String, Value>>> {
    #[derive(Deserialize)]
    struct InsightsResponse {
        data: Vec<Map<String, Value>>,
    }

    let url = format!("{ENDPOINT_GRAPH}/{}/{}/insights", config.api_version, campaign.id);
    let response = http
        .get(&url)
        .query(&[
            ("fields", fields),
            ("time_range", time_range),
            ("access_token", config.access_token.as_str()),
        ])
        .send()
        .with_context(|| format!("insights request for campaign {:?} failed", campaign.name))?
        .error_for_status()
        .with_context(|| {
            format!("insights request for campaign {:?} was rejected", campaign.name)
        })?;
    let InsightsResponse { data } = response
        .json()
        .with_context(|| format!("error deserializing insights for campaign {:?}", campaign.name))?;
    Ok(data)
}
