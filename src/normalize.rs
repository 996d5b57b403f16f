use anyhow::{bail, Context};
use serde_json::{Map, Value};
use tracing::debug;

use crate::table::WeekColumn;
use crate::week::WeekLabel;

/// One campaign's raw metric fields for one week, as returned by a
/// reporting API. `fields` keeps whatever the API sent; only configured
/// metric keys are ever read out of it, so extra fields like date stamps
/// are harmless.
#[derive(Debug, Clone)]
pub struct CampaignStats {
    pub campaign: String,
    pub fields: Map<String, Value>,
}

/// Sums each metric across all campaigns into a single weekly column.
///
/// The row set is exactly `metrics`, in declaration order, no matter how
/// many campaigns reported. A record missing a metric contributes nothing
/// to that metric's sum; a week with no campaigns at all sums to zero.
pub fn totals(
    records: &[CampaignStats],
    metrics: &[String],
    label: WeekLabel,
) -> anyhow::Result<WeekColumn> {
    let mut rows = Vec::with_capacity(metrics.len());
    for metric in metrics {
        let mut sum = 0.0;
        for record in records {
            if let Some(value) = record.fields.get(metric) {
                sum += coerce_metric(value).with_context(|| {
                    format!("metric {:?} of campaign {:?}", metric, record.campaign)
                })?;
            }
        }
        rows.push((metric.clone(), Some(sum)));
    }
    Ok(WeekColumn { label, rows })
}

/// Pivots per-campaign metrics into `metric_position` rows, where the
/// position is the campaign's index in this week's API return order.
///
/// Campaign identity is not part of the row label, so the names are logged
/// to let a misaligned week be traced afterwards. Also returns the metric
/// set, which the final sort pass needs.
pub fn details(
    records: &[CampaignStats],
    metrics: &[String],
    label: WeekLabel,
) -> anyhow::Result<(WeekColumn, Vec<String>)> {
    let mut rows = Vec::with_capacity(records.len() * metrics.len());
    for (position, record) in records.iter().enumerate() {
        debug!("week {}: campaign slot {} is {:?}", label, position, record.campaign);
        for metric in metrics {
            let value = match record.fields.get(metric) {
                Some(value) => Some(coerce_metric(value).with_context(|| {
                    format!("metric {:?} of campaign {:?}", metric, record.campaign)
                })?),
                None => None,
            };
            rows.push((format!("{metric}_{position}"), value));
        }
    }
    Ok((WeekColumn { label, rows }, metrics.to_vec()))
}

/// Reporting APIs deliver numbers both as JSON numbers and as decimal
/// strings; anything else in a metric field is a hard error.
fn coerce_metric(value: &Value) -> anyhow::Result<f64> {
    match value {
        Value::Number(n) => {
            n.as_f64().ok_or_else(|| anyhow::anyhow!("number {n} does not fit an f64"))
        }
        Value::String(s) => {
            s.trim().parse().with_context(|| format!("cannot parse {s:?} as a number"))
        }
        other => bail!("expected a numeric value, got {other}"),
    }
}
