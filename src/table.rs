use std::collections::HashMap;

use anyhow::{bail, Context};
use tracing::warn;

use crate::week::WeekLabel;

/// One week's worth of values, keyed by row label, in emission order.
#[derive(Debug, Clone, PartialEq)]
pub struct WeekColumn {
    pub label: WeekLabel,
    pub rows: Vec<(String, Option<f64>)>,
}

/// A row of the accumulated table: a label plus one cell per week column.
#[derive(Debug, Clone, PartialEq)]
pub struct TableRow {
    pub label: String,
    pub cells: Vec<Option<f64>>,
}

/// The week-indexed table stored in one spreadsheet tab. Rows are metric
/// (or metric-slot) labels, columns are weeks in ascending chronological
/// order, and a `None` cell means the value was never reported, which is
/// not the same as zero.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AccumulatedTable {
    pub columns: Vec<WeekLabel>,
    pub rows: Vec<TableRow>,
}

impl AccumulatedTable {
    /// A one-column table seeded from a single week.
    pub fn from_column(column: WeekColumn) -> Self {
        AccumulatedTable {
            columns: vec![column.label],
            rows: column
                .rows
                .into_iter()
                .map(|(label, value)| TableRow { label, cells: vec![value] })
                .collect(),
        }
    }

    /// Number of week columns.
    pub fn width(&self) -> usize {
        self.columns.len()
    }

    /// Appends `column`, keeping only rows present on both sides. Totals
    /// tables have the same row set every week by construction, so
    /// anything dropped here is logged.
    pub fn inner_join(mut self, column: WeekColumn) -> Self {
        let mut incoming: HashMap<String, Option<f64>> = column.rows.into_iter().collect();
        self.rows.retain_mut(|row| match incoming.remove(row.label.as_str()) {
            Some(value) => {
                row.cells.push(value);
                true
            }
            None => {
                warn!("row {:?} is absent from week {}; dropping it", row.label, column.label);
                false
            }
        });
        for label in incoming.keys() {
            warn!("week {} brought unknown row {:?}; dropping it", column.label, label);
        }
        self.columns.push(column.label);
        self
    }

    /// Appends `column`, keeping the union of rows. Existing rows keep
    /// their order and take `None` when the week has no value for them;
    /// rows the table has never seen are appended in the column's order,
    /// padded with `None` for all earlier weeks.
    pub fn outer_join(mut self, column: WeekColumn) -> Self {
        let width = self.columns.len();
        let mut positions: HashMap<String, usize> =
            self.rows.iter().enumerate().map(|(i, row)| (row.label.clone(), i)).collect();
        for (label, value) in column.rows {
            match positions.get(&label) {
                Some(&i) => {
                    let row = &mut self.rows[i];
                    if row.cells.len() == width {
                        row.cells.push(value);
                    } else {
                        warn!(
                            "week {} reported row {:?} twice; keeping the first value",
                            column.label, label
                        );
                    }
                }
                None => {
                    let mut cells = vec![None; width];
                    cells.push(value);
                    positions.insert(label.clone(), self.rows.len());
                    self.rows.push(TableRow { label, cells });
                }
            }
        }
        for row in &mut self.rows {
            if row.cells.len() == width {
                row.cells.push(None);
            }
        }
        self.columns.push(column.label);
        self
    }
}

/// Restores the canonical slot order of a details table after outer joins
/// have mixed weeks with different campaign counts.
///
/// Row labels must be of the form `metric_position`. Rows are ordered by
/// position first and metric name second, then relabeled so that slot 0
/// carries every metric (sorted by name), then slot 1, and so on. Rows are
/// purely positional; no campaign is ever matched by name across weeks.
pub fn sort_details(
    mut table: AccumulatedTable,
    metrics: &[String],
) -> anyhow::Result<AccumulatedTable> {
    if table.rows.is_empty() || metrics.is_empty() {
        return Ok(table);
    }
    if table.rows.len() % metrics.len() != 0 {
        bail!(
            "details table has {} rows, which is not a multiple of the {} configured metrics",
            table.rows.len(),
            metrics.len()
        );
    }

    let mut keyed = Vec::with_capacity(table.rows.len());
    for row in table.rows {
        let (metric, position) = row.label.rsplit_once('_').with_context(|| {
            format!("row label {:?} is not of the form metric_position", row.label)
        })?;
        let position: usize = position
            .parse()
            .with_context(|| format!("row label {:?} has a non-numeric position", row.label))?;
        keyed.push(((position, metric.to_owned()), row));
    }
    keyed.sort_by(|a, b| a.0.cmp(&b.0));

    let mut sorted_metrics: Vec<&String> = metrics.iter().collect();
    sorted_metrics.sort();

    table.rows = keyed.into_iter().map(|(_, row)| row).collect();
    for (i, row) in table.rows.iter_mut().enumerate() {
        let metric = sorted_metrics[i % sorted_metrics.len()];
        let slot = i / sorted_metrics.len();
        row.label = format!("{metric}_{slot}");
    }
    Ok(table)
}
