use std::collections::BTreeMap;

use crate::{database::get_db, error::AppError};
use chrono::NaiveDate;
use futures::stream::TryStreamExt;
use mongodb::{
    bson::{doc, oid::ObjectId},
    options::FindOptions,
    Collection,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct TrendingData {
    #[serde(default)]
    pub categories: BTreeMap<String, i64>,
    #[serde(default)]
    pub avg_response_time: f64,
}

/// Precomputed per-month counters. Rows are maintained outside this service
/// and only read here.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct MonthlyObservationStats {
    #[serde(skip_serializing)]
    pub _id: Option<ObjectId>,
    pub month: NaiveDate,
    pub total_observations: i64,
    #[serde(default)]
    pub observation_types: BTreeMap<String, i64>,
    #[serde(default)]
    pub action_status: BTreeMap<String, i64>,
    #[serde(default)]
    pub risk_levels: BTreeMap<String, i64>,
    #[serde(default)]
    pub trending_data: TrendingData,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct MonthlyFilter {
    pub department: Option<String>,
    pub category: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct YearOverYear {
    pub total: f64,
    pub by_type: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MonthlyTotals {
    pub total_observations: i64,
    pub high_risk: i64,
    pub resolved: i64,
    /// Mean of the monthly averages, in whole hours.
    pub avg_response_hours: i64,
    pub year_over_year: Option<YearOverYear>,
}

impl MonthlyFilter {
    fn keeps(&self, row: &MonthlyObservationStats) -> bool {
        let department = self.department.as_deref().filter(|d| !d.is_empty());
        let category = self.category.as_deref().filter(|c| !c.is_empty());

        department.map_or(true, |d| row.observation_types.get(d).copied().unwrap_or(0) > 0)
            && category.map_or(true, |c| {
                row.trending_data.categories.get(c).copied().unwrap_or(0) > 0
            })
    }
    pub fn apply(&self, rows: Vec<MonthlyObservationStats>) -> Vec<MonthlyObservationStats> {
        rows.into_iter().filter(|row| self.keeps(row)).collect()
    }
}

fn growth(current: i64, previous: i64) -> f64 {
    (current - previous) as f64 / previous.max(1) as f64 * 100.0
}

impl MonthlyTotals {
    /// `rows` must be ordered by month.
    pub fn from_rows(rows: &[MonthlyObservationStats]) -> Self {
        let count = |map: &BTreeMap<String, i64>, key: &str| map.get(key).copied().unwrap_or(0);

        let total_observations = rows.iter().map(|row| row.total_observations).sum();
        let high_risk = rows
            .iter()
            .map(|row| count(&row.risk_levels, "severe") + count(&row.risk_levels, "major"))
            .sum();
        let resolved = rows.iter().map(|row| count(&row.action_status, "closed")).sum();
        let avg_response_hours = if rows.is_empty() {
            0
        } else {
            let sum: f64 = rows.iter().map(|row| row.trending_data.avg_response_time).sum();
            (sum / rows.len() as f64).round() as i64
        };

        let year_over_year = (rows.len() >= 13).then(|| {
            let current = &rows[rows.len() - 1];
            let last_year = &rows[rows.len() - 13];
            YearOverYear {
                total: growth(current.total_observations, last_year.total_observations),
                by_type: current
                    .observation_types
                    .iter()
                    .map(|(kind, value)| {
                        (kind.clone(), growth(*value, count(&last_year.observation_types, kind)))
                    })
                    .collect(),
            }
        });

        Self {
            total_observations,
            high_risk,
            resolved,
            avg_response_hours,
            year_over_year,
        }
    }
}

impl MonthlyObservationStats {
    fn collection() -> Result<Collection<MonthlyObservationStats>, AppError> {
        Ok(get_db()?.collection::<MonthlyObservationStats>("monthly_observation_stats"))
    }
    /// Rows whose month lies in `[start, end]`, oldest first. Months are
    /// stored as ISO dates so string comparison orders them.
    pub async fn find_range(start: NaiveDate, end: NaiveDate) -> Result<Vec<Self>, AppError> {
        let filter = doc! {
            "month": { "$gte": start.to_string(), "$lte": end.to_string() }
        };
        let options = FindOptions::builder().sort(doc! { "month": 1 }).build();
        let cursor = Self::collection()?.find(filter, options).await?;
        Ok(cursor.try_collect().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(month: u32, year: i32, total: i64) -> MonthlyObservationStats {
        MonthlyObservationStats {
            _id: None,
            month: NaiveDate::from_ymd_opt(year, month, 1).unwrap(),
            total_observations: total,
            observation_types: BTreeMap::from([("SOR".to_string(), total)]),
            action_status: BTreeMap::from([("closed".to_string(), 1)]),
            risk_levels: BTreeMap::from([
                ("major".to_string(), 2),
                ("severe".to_string(), 1),
                ("minor".to_string(), 5),
            ]),
            trending_data: TrendingData {
                categories: BTreeMap::from([("Electrical".to_string(), 3)]),
                avg_response_time: 10.0,
            },
        }
    }

    #[test]
    fn totals_sum_high_risk_and_resolved() {
        let mut second = row(2, 2024, 20);
        second.trending_data.avg_response_time = 15.0;
        let totals = MonthlyTotals::from_rows(&[row(1, 2024, 10), second]);

        assert_eq!(totals.total_observations, 30);
        assert_eq!(totals.high_risk, 6);
        assert_eq!(totals.resolved, 2);
        assert_eq!(totals.avg_response_hours, 13);
        assert!(totals.year_over_year.is_none());
    }

    #[test]
    fn empty_rows_have_zero_average() {
        let totals = MonthlyTotals::from_rows(&[]);
        assert_eq!(totals.avg_response_hours, 0);
        assert_eq!(totals.total_observations, 0);
    }

    #[test]
    fn growth_needs_thirteen_months() {
        let mut rows: Vec<_> = (1..=12).map(|m| row(m, 2023, 10)).collect();
        rows.push(row(1, 2024, 15));

        let growth = MonthlyTotals::from_rows(&rows).year_over_year.unwrap();
        assert_eq!(growth.total, 50.0);
        assert_eq!(growth.by_type["SOR"], 50.0);
    }

    #[test]
    fn filters_drop_months_without_matches() {
        let mut quiet = row(2, 2024, 4);
        quiet.trending_data.categories.clear();
        let rows = vec![row(1, 2024, 10), quiet];

        let filter = MonthlyFilter {
            department: None,
            category: Some("Electrical".to_string()),
        };
        assert_eq!(filter.apply(rows.clone()).len(), 1);

        let filter = MonthlyFilter {
            department: Some("RES".to_string()),
            category: None,
        };
        assert!(filter.apply(rows.clone()).is_empty());

        assert_eq!(MonthlyFilter::default().apply(rows).len(), 2);
    }
}
