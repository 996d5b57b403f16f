use anyhow::bail;
use chrono::{Duration, NaiveDate};
use tracing::{info, warn};

use crate::table::{sort_details, AccumulatedTable, WeekColumn};

/// Where a sync run picks up: the previously stored table, if the tab held
/// one, and the Monday of the first week to fetch.
#[derive(Debug, Clone)]
pub struct ResumePoint {
    pub table: Option<AccumulatedTable>,
    pub start_date: NaiveDate,
}

/// Derives the resume point from stored state: one week past the last
/// stored column, or `default_start` when there is no prior table at all.
pub fn resume_point(
    existing: Option<AccumulatedTable>,
    default_start: NaiveDate,
) -> anyhow::Result<ResumePoint> {
    match existing {
        Some(table) => match table.columns.last() {
            Some(last) => {
                let start_date = last.monday() + Duration::days(7);
                Ok(ResumePoint { table: Some(table), start_date })
            }
            None => bail!("the stored table has no week columns; refusing to guess a resume date"),
        },
        None => Ok(ResumePoint { table: None, start_date: default_start }),
    }
}

/// Fetches and joins one totals column per complete week, starting at
/// `start_date` and stopping before any week that would reach `cutoff`.
/// Fetched columns are joined on row label; a totals row must show up
/// every week to survive.
///
/// Returns `None` when there was no prior table and no week to fetch.
pub fn accumulate_totals<F>(
    existing: Option<AccumulatedTable>,
    start_date: NaiveDate,
    cutoff: NaiveDate,
    mut fetch_week: F,
) -> anyhow::Result<Option<AccumulatedTable>>
where
    F: FnMut(NaiveDate) -> anyhow::Result<WeekColumn>,
{
    let mut table = existing;
    let mut start = start_date;
    while start + Duration::days(6) < cutoff {
        let column = fetch_week(start)?;
        info!("accumulated totals for week {}", column.label);
        table = Some(match table {
            Some(table) => table.inner_join(column),
            None => AccumulatedTable::from_column(column),
        });
        start += Duration::days(7);
    }
    if table.is_none() {
        info!("no complete week between {} and {}; nothing to accumulate", start_date, cutoff);
    }
    Ok(table)
}

/// Details variant of [`accumulate_totals`]: columns are joined as a union
/// so campaign slots can come and go, and the finished table is sorted
/// back into slot order using the metric set reported by the last fetched
/// week.
pub fn accumulate_details<F>(
    existing: Option<AccumulatedTable>,
    start_date: NaiveDate,
    cutoff: NaiveDate,
    mut fetch_week: F,
) -> anyhow::Result<Option<AccumulatedTable>>
where
    F: FnMut(NaiveDate) -> anyhow::Result<(WeekColumn, Vec<String>)>,
{
    let mut table = existing;
    let mut last_metrics = None;
    let mut start = start_date;
    while start + Duration::days(6) < cutoff {
        let (column, metrics) = fetch_week(start)?;
        info!("accumulated details for week {}", column.label);
        table = Some(match table {
            Some(table) => table.outer_join(column),
            None => AccumulatedTable::from_column(column),
        });
        last_metrics = Some(metrics);
        start += Duration::days(7);
    }
    match (table, last_metrics) {
        (Some(table), Some(metrics)) => Ok(Some(sort_details(table, &metrics)?)),
        (Some(table), None) => {
            warn!("no new week to fetch; leaving the stored details table as it is");
            Ok(Some(table))
        }
        (None, _) => {
            info!("no complete week between {} and {}; nothing to accumulate", start_date, cutoff);
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use anyhow::anyhow;

    use super::*;
    use crate::normalize::{self, CampaignStats};
    use crate::table::TableRow;
    use crate::week::{week_start, WeekLabel};

    fn date(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).unwrap()
    }

    fn totals_column(start: NaiveDate, value: f64) -> WeekColumn {
        WeekColumn {
            label: WeekLabel::from_date(start),
            rows: vec![("clicks".to_string(), Some(value))],
        }
    }

    fn clicks_row(cells: &[Option<f64>]) -> TableRow {
        TableRow { label: "clicks".to_string(), cells: cells.to_vec() }
    }

    #[test]
    fn resumes_one_week_after_the_last_stored_column() {
        let table = AccumulatedTable {
            columns: vec![
                WeekLabel { iso_year: 2016, iso_week: 35 },
                WeekLabel { iso_year: 2016, iso_week: 36 },
            ],
            rows: vec![],
        };
        let resume = resume_point(Some(table), date(2016, 8, 29)).unwrap();
        assert_eq!(resume.start_date, date(2016, 9, 12));
        assert!(resume.table.is_some());
    }

    #[test]
    fn resumes_from_the_default_without_prior_state() {
        let resume = resume_point(None, date(2016, 8, 29)).unwrap();
        assert_eq!(resume.start_date, date(2016, 8, 29));
        assert!(resume.table.is_none());
    }

    #[test]
    fn refuses_to_resume_from_a_table_without_columns() {
        let table = AccumulatedTable::default();
        assert!(resume_point(Some(table), date(2016, 8, 29)).is_err());
    }

    #[test]
    fn fetches_only_weeks_that_end_before_the_cutoff() {
        let mut fetched = Vec::new();
        let table = accumulate_totals(None, date(2016, 8, 1), date(2016, 9, 5), |start| {
            fetched.push(start);
            Ok(totals_column(start, 1.0))
        })
        .unwrap()
        .unwrap();
        assert_eq!(
            fetched,
            vec![
                date(2016, 8, 1),
                date(2016, 8, 8),
                date(2016, 8, 15),
                date(2016, 8, 22),
                date(2016, 8, 29),
            ]
        );
        assert_eq!(table.width(), 5);
    }

    #[test]
    fn a_partial_week_is_not_fetched() {
        // the week of 2016-08-29 ends 2016-09-04, the day of the cutoff
        let mut fetched = 0;
        let result = accumulate_totals(None, date(2016, 8, 29), date(2016, 9, 4), |start| {
            fetched += 1;
            Ok(totals_column(start, 1.0))
        })
        .unwrap();
        assert_eq!(fetched, 0);
        assert!(result.is_none());

        // one day later the week is complete
        let result = accumulate_totals(None, date(2016, 8, 29), date(2016, 9, 5), |start| {
            Ok(totals_column(start, 1.0))
        })
        .unwrap();
        assert_eq!(result.unwrap().width(), 1);
    }

    #[test]
    fn column_count_is_existing_plus_fetched() {
        let existing = AccumulatedTable {
            columns: vec![
                WeekLabel { iso_year: 2016, iso_week: 35 },
                WeekLabel { iso_year: 2016, iso_week: 36 },
            ],
            rows: vec![clicks_row(&[Some(1.0), Some(2.0)])],
        };
        let resume = resume_point(Some(existing), date(2016, 8, 29)).unwrap();
        assert_eq!(resume.start_date, date(2016, 9, 12));
        let table = accumulate_totals(resume.table, resume.start_date, date(2016, 9, 26), |start| {
            Ok(totals_column(start, 3.0))
        })
        .unwrap()
        .unwrap();
        assert_eq!(table.width(), 4);
        assert_eq!(table.rows[0].cells, vec![Some(1.0), Some(2.0), Some(3.0), Some(3.0)]);
    }

    #[test]
    fn an_existing_table_survives_a_run_with_nothing_to_fetch() {
        let existing = AccumulatedTable {
            columns: vec![WeekLabel { iso_year: 2016, iso_week: 35 }],
            rows: vec![clicks_row(&[Some(1.0)])],
        };
        let table = accumulate_totals(
            Some(existing.clone()),
            date(2016, 9, 5),
            date(2016, 9, 5),
            |_| panic!("nothing should be fetched"),
        )
        .unwrap();
        assert_eq!(table, Some(existing));
    }

    #[test]
    fn fetch_errors_abort_the_accumulation() {
        let mut fetched = 0;
        let result = accumulate_totals(None, date(2016, 8, 1), date(2016, 9, 5), |start| {
            fetched += 1;
            if fetched == 2 {
                Err(anyhow!("boom"))
            } else {
                Ok(totals_column(start, 1.0))
            }
        });
        assert!(result.is_err());
        assert_eq!(fetched, 2);
    }

    #[test]
    fn one_week_of_one_campaign_end_to_end() {
        let records = [CampaignStats {
            campaign: "brand".to_string(),
            fields: serde_json::from_value(serde_json::json!({
                "impressions": "100",
                "clicks": "10",
                "spend": "5.0",
            }))
            .unwrap(),
        }];
        let metrics = vec!["impressions".to_string(), "clicks".to_string(), "spend".to_string()];
        let table = accumulate_totals(None, date(2016, 8, 29), date(2016, 9, 5), |start| {
            normalize::totals(&records, &metrics, WeekLabel::from_date(start))
        })
        .unwrap()
        .unwrap();
        assert_eq!(table.columns, vec![WeekLabel { iso_year: 2016, iso_week: 35 }]);
        assert_eq!(table.columns[0].to_string(), "2016-35");
        let rows: Vec<_> =
            table.rows.iter().map(|row| (row.label.as_str(), row.cells.clone())).collect();
        assert_eq!(
            rows,
            vec![
                ("impressions", vec![Some(100.0)]),
                ("clicks", vec![Some(10.0)]),
                ("spend", vec![Some(5.0)]),
            ]
        );
    }

    #[test]
    fn details_accumulation_pads_and_sorts() {
        let metrics = vec!["impressions".to_string(), "clicks".to_string()];
        let weeks = [
            vec![
                ("impressions_0", 100.0),
                ("clicks_0", 10.0),
                ("impressions_1", 40.0),
                ("clicks_1", 4.0),
            ],
            vec![("impressions_0", 80.0), ("clicks_0", 8.0)],
        ];
        let mut index = 0;
        let table = accumulate_details(None, date(2016, 8, 29), date(2016, 9, 12), |start| {
            let rows = weeks[index]
                .iter()
                .map(|(label, value)| (label.to_string(), Some(*value)))
                .collect();
            index += 1;
            Ok((WeekColumn { label: WeekLabel::from_date(start), rows }, metrics.clone()))
        })
        .unwrap()
        .unwrap();

        assert_eq!(table.width(), 2);
        let rows: Vec<_> =
            table.rows.iter().map(|row| (row.label.as_str(), row.cells.clone())).collect();
        assert_eq!(
            rows,
            vec![
                ("clicks_0", vec![Some(10.0), Some(8.0)]),
                ("impressions_0", vec![Some(100.0), Some(80.0)]),
                ("clicks_1", vec![Some(4.0), None]),
                ("impressions_1", vec![Some(40.0), None]),
            ]
        );
    }

    #[test]
    fn details_with_nothing_to_fetch_are_returned_unsorted() {
        let existing = AccumulatedTable {
            columns: vec![WeekLabel { iso_year: 2016, iso_week: 35 }],
            rows: vec![
                TableRow { label: "impressions_0".to_string(), cells: vec![Some(1.0)] },
                TableRow { label: "clicks_0".to_string(), cells: vec![Some(2.0)] },
            ],
        };
        let table = accumulate_details(
            Some(existing.clone()),
            date(2016, 9, 5),
            date(2016, 9, 5),
            |_| panic!("nothing should be fetched"),
        )
        .unwrap();
        assert_eq!(table, Some(existing));
    }

    #[test]
    fn start_dates_walk_monday_to_monday() {
        let mut starts = Vec::new();
        accumulate_totals(None, week_start(2016, 50), date(2017, 1, 16), |start| {
            starts.push(WeekLabel::from_date(start));
            Ok(totals_column(start, 1.0))
        })
        .unwrap();
        let labels: Vec<String> = starts.iter().map(WeekLabel::to_string).collect();
        assert_eq!(labels, ["2016-50", "2016-51", "2016-52", "2017-1", "2017-2"]);
    }
}
