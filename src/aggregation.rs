//! Period summaries over observation rows.
//!
//! Everything here is pure: callers fetch rows for a period and hand them in
//! together with the full category list, so charts keep a stable category
//! axis even for empty periods.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Datelike, Days, Months, NaiveDate, NaiveTime, Utc};
use serde::Serialize;

use crate::models::observation::{AggregateRow, Consequence, Status};

pub const WEEKLY_LOOKBACK: usize = 4;

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct SeverityCounts {
    pub minor: u64,
    pub moderate: u64,
    pub major: u64,
    pub severe: u64,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SubmitterCount {
    pub submitter_name: String,
    pub count: u64,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PeriodSummary {
    pub total: u64,
    pub category_severity: BTreeMap<String, SeverityCounts>,
    pub severity: SeverityCounts,
    pub status: BTreeMap<&'static str, u64>,
    pub submitters: Vec<SubmitterCount>,
}

/// A Monday-start week; `end` is the following Monday (exclusive).
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct WeekWindow {
    pub index: usize,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

#[derive(Debug, Clone, Serialize)]
pub struct WeeklySummary {
    pub window: WeekWindow,
    pub available: bool,
    pub summary: PeriodSummary,
}

impl SeverityCounts {
    pub fn add(&mut self, consequence: Consequence) {
        match consequence {
            Consequence::Minor => self.minor += 1,
            Consequence::Moderate => self.moderate += 1,
            Consequence::Major => self.major += 1,
            Consequence::Severe => self.severe += 1,
        }
    }
    pub fn get(&self, consequence: Consequence) -> u64 {
        match consequence {
            Consequence::Minor => self.minor,
            Consequence::Moderate => self.moderate,
            Consequence::Major => self.major,
            Consequence::Severe => self.severe,
        }
    }
    pub fn total(&self) -> u64 {
        self.minor + self.moderate + self.major + self.severe
    }
}

fn consequence_of(row: &AggregateRow) -> Option<Consequence> {
    row.consequences.as_deref()?.parse().ok()
}

/// Counts each observation once per linked category. Rows with a missing or
/// unrecognised consequence are skipped.
pub fn category_severity_matrix(
    categories: &[String],
    rows: &[AggregateRow],
) -> BTreeMap<String, SeverityCounts> {
    let mut matrix: BTreeMap<String, SeverityCounts> = categories
        .iter()
        .map(|name| (name.clone(), SeverityCounts::default()))
        .collect();

    for row in rows {
        let Some(consequence) = consequence_of(row) else {
            continue;
        };
        for category in row.categories.iter() {
            matrix.entry(category.clone()).or_default().add(consequence);
        }
    }
    matrix
}

/// Groups by trimmed, lower-cased name; the first spelling seen is the label.
/// Ordered by count, then label.
pub fn submitter_counts(rows: &[AggregateRow]) -> Vec<SubmitterCount> {
    let mut order: Vec<SubmitterCount> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();

    for row in rows {
        let Some(name) = row.submitter_name.as_deref().map(str::trim) else {
            continue;
        };
        if name.is_empty() {
            continue;
        }
        let key = name.to_lowercase();
        match positions.get(&key) {
            Some(&position) => order[position].count += 1,
            None => {
                positions.insert(key, order.len());
                order.push(SubmitterCount {
                    submitter_name: name.to_string(),
                    count: 1,
                });
            }
        }
    }

    order.sort_by(|a, b| {
        b.count
            .cmp(&a.count)
            .then_with(|| a.submitter_name.cmp(&b.submitter_name))
    });
    order
}

pub fn status_counts(rows: &[AggregateRow]) -> BTreeMap<&'static str, u64> {
    let mut counts: BTreeMap<&'static str, u64> =
        Status::ALL.iter().map(|status| (status.as_str(), 0)).collect();
    for row in rows {
        let status = row
            .status
            .as_deref()
            .and_then(|status| status.parse::<Status>().ok());
        if let Some(status) = status {
            *counts.entry(status.as_str()).or_default() += 1;
        }
    }
    counts
}

pub fn severity_totals(rows: &[AggregateRow]) -> SeverityCounts {
    let mut totals = SeverityCounts::default();
    for consequence in rows.iter().filter_map(consequence_of) {
        totals.add(consequence);
    }
    totals
}

impl PeriodSummary {
    pub fn from_rows(categories: &[String], rows: &[AggregateRow]) -> Self {
        Self {
            total: rows.len() as u64,
            category_severity: category_severity_matrix(categories, rows),
            severity: severity_totals(rows),
            status: status_counts(rows),
            submitters: submitter_counts(rows),
        }
    }
    pub fn empty(categories: &[String]) -> Self {
        Self::from_rows(categories, &[])
    }
}

fn week_start(day: NaiveDate) -> NaiveDate {
    day - Days::new(day.weekday().num_days_from_monday() as u64)
}

/// `count` consecutive weeks ending with the week containing `today`;
/// index 0 is the current week.
pub fn week_windows(today: NaiveDate, count: usize) -> Vec<WeekWindow> {
    let current = week_start(today);
    (0..count)
        .map(|index| {
            let start = current - Days::new(7 * index as u64);
            WeekWindow {
                index,
                start,
                end: start + Days::new(7),
            }
        })
        .collect()
}

impl WeekWindow {
    pub fn bounds(&self) -> (DateTime<Utc>, DateTime<Utc>) {
        (day_start(self.start), day_start(self.end))
    }
    pub fn label(&self) -> String {
        let last = self.end - Days::new(1);
        format!("{} - {}", self.start.format("%b %-d"), last.format("%b %-d, %Y"))
    }
}

pub fn day_start(day: NaiveDate) -> DateTime<Utc> {
    day.and_time(NaiveTime::MIN).and_utc()
}

/// Parses `YYYY-MM` into the first day of that month and of the next.
pub fn month_bounds(month: &str) -> Option<(NaiveDate, NaiveDate)> {
    let start = NaiveDate::parse_from_str(&format!("{}-01", month.trim()), "%Y-%m-%d").ok()?;
    let end = start.checked_add_months(Months::new(1))?;
    Some((start, end))
}

pub fn first_of_month(day: NaiveDate) -> NaiveDate {
    day.with_day(1).unwrap_or(day)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(name: &str, consequence: &str, status: &str, categories: &[&str]) -> AggregateRow {
        AggregateRow {
            submitter_name: Some(name.to_string()),
            consequences: Some(consequence.to_string()),
            status: Some(status.to_string()),
            categories: categories.iter().map(|c| c.to_string()).collect(),
        }
    }

    fn names(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    #[test]
    fn every_category_is_listed_even_without_rows() {
        let matrix = category_severity_matrix(
            &names(&["A", "B", "C"]),
            &[row("x", "minor", "open", &["A"])],
        );

        assert_eq!(matrix.len(), 3);
        assert_eq!(matrix["A"].minor, 1);
        assert_eq!(matrix["B"], SeverityCounts::default());
        assert_eq!(matrix["C"].total(), 0);
    }

    #[test]
    fn major_electrical_counts_once() {
        let matrix = category_severity_matrix(
            &names(&["Electrical", "Fire"]),
            &[row("Sam", "major", "open", &["Electrical"])],
        );

        let electrical = matrix["Electrical"];
        assert_eq!(electrical.get(Consequence::Major), 1);
        assert_eq!(electrical.minor, 0);
        assert_eq!(electrical.moderate, 0);
        assert_eq!(electrical.severe, 0);
    }

    #[test]
    fn unknown_consequences_are_skipped() {
        let rows = vec![
            row("a", "catastrophic", "open", &["A"]),
            AggregateRow {
                categories: names(&["A"]),
                ..Default::default()
            },
        ];
        assert_eq!(category_severity_matrix(&names(&["A"]), &rows)["A"].total(), 0);
        assert_eq!(severity_totals(&rows).total(), 0);
    }

    #[test]
    fn submitters_group_ignoring_case_and_spaces() {
        let rows = vec![
            row("John Doe", "minor", "open", &[]),
            row("john doe", "minor", "open", &[]),
            row(" John Doe ", "minor", "open", &[]),
            row("Ann", "minor", "open", &[]),
        ];

        let counts = submitter_counts(&rows);
        assert_eq!(counts.len(), 2);
        assert_eq!(counts[0].submitter_name, "John Doe");
        assert_eq!(counts[0].count, 3);
        assert_eq!(counts[1].count, 1);
    }

    #[test]
    fn status_counts_accept_legacy_casing() {
        let rows = vec![
            row("a", "minor", "Closed", &[]),
            row("a", "minor", "open", &[]),
            row("a", "minor", "pending", &[]),
        ];
        let counts = status_counts(&rows);
        assert_eq!(counts["open"], 1);
        assert_eq!(counts["closed"], 1);
        assert_eq!(counts.len(), 2);
    }

    #[test]
    fn weeks_start_on_monday_and_step_back() {
        // 2024-05-16 is a Thursday.
        let today = NaiveDate::from_ymd_opt(2024, 5, 16).unwrap();
        let windows = week_windows(today, WEEKLY_LOOKBACK);

        assert_eq!(windows.len(), 4);
        assert_eq!(windows[0].start, NaiveDate::from_ymd_opt(2024, 5, 13).unwrap());
        assert_eq!(windows[0].end, NaiveDate::from_ymd_opt(2024, 5, 20).unwrap());
        assert_eq!(windows[3].start, NaiveDate::from_ymd_opt(2024, 4, 22).unwrap());
        assert_eq!(windows[0].label(), "May 13 - May 19, 2024");
    }

    #[test]
    fn monday_is_its_own_week_start() {
        let monday = NaiveDate::from_ymd_opt(2024, 5, 13).unwrap();
        assert_eq!(week_windows(monday, 1)[0].start, monday);
    }

    #[test]
    fn month_bounds_roll_over_years() {
        let (start, end) = month_bounds("2023-12").unwrap();
        assert_eq!(start, NaiveDate::from_ymd_opt(2023, 12, 1).unwrap());
        assert_eq!(end, NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        assert!(month_bounds("2023-13").is_none());
        assert!(month_bounds("december").is_none());
    }

    #[test]
    fn empty_summary_keeps_axis() {
        let summary = PeriodSummary::empty(&names(&["A", "B"]));
        assert_eq!(summary.total, 0);
        assert_eq!(summary.category_severity.len(), 2);
        assert_eq!(summary.status["open"], 0);
        assert!(summary.submitters.is_empty());
    }
}
