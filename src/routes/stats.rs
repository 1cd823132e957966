use actix_web::{get, post, web, HttpRequest, HttpResponse};
use chrono::{Months, NaiveDate, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};

use crate::{
    aggregation::{
        first_of_month, month_bounds, day_start, week_windows, PeriodSummary, WeekWindow,
        WeeklySummary, WEEKLY_LOOKBACK,
    },
    error::AppError,
    export::{
        requested_format,
        summary::{MonthlyExport, SummaryNote, WeeklyExport},
        ExportFormat,
    },
    models::{
        monthly_stats::{MonthlyFilter, MonthlyObservationStats, MonthlyTotals},
        observation::Observation,
        profile::authenticated,
        safety_category::SafetyCategory,
    },
};

#[derive(Deserialize)]
pub struct WeeklyQuery {
    pub week: Option<usize>,
    pub format: Option<String>,
}
#[derive(Deserialize, Default)]
pub struct MonthlyQuery {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
    #[serde(flatten)]
    pub filter: MonthlyFilter,
}
#[derive(Deserialize)]
pub struct BreakdownQuery {
    pub month: String,
}
#[derive(Deserialize, Default)]
pub struct MonthlyExportRequest {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
    #[serde(flatten)]
    pub filter: MonthlyFilter,
    #[serde(default)]
    pub format: ExportFormat,
    #[serde(default)]
    pub notes: Vec<SummaryNote>,
}

#[derive(Serialize)]
pub struct WeeklyResponse {
    pub weeks: Vec<WeeklyHeader>,
    pub selected: WeeklySummary,
}
#[derive(Serialize)]
pub struct WeeklyHeader {
    pub index: usize,
    pub label: String,
    pub total: u64,
    pub available: bool,
}
#[derive(Serialize)]
pub struct MonthlyResponse {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub rows: Vec<MonthlyObservationStats>,
    pub totals: MonthlyTotals,
}
#[derive(Serialize)]
pub struct BreakdownResponse {
    pub month: NaiveDate,
    pub summary: PeriodSummary,
}

/// Defaults to the current month and the twelve before it, so a year-over-year
/// comparison is always available.
pub fn monthly_range(start: Option<NaiveDate>, end: Option<NaiveDate>, today: NaiveDate) -> (NaiveDate, NaiveDate) {
    let end = first_of_month(end.unwrap_or(today));
    let start = match start {
        Some(start) => first_of_month(start),
        None => end.checked_sub_months(Months::new(12)).unwrap_or(end),
    };
    if start > end {
        (end, start)
    } else {
        (start, end)
    }
}

fn selected_week(week: Option<usize>) -> Result<usize, AppError> {
    match week.unwrap_or(0) {
        week if week < WEEKLY_LOOKBACK => Ok(week),
        _ => Err(AppError::BadRequest("INVALID_WEEK")),
    }
}

async fn category_names() -> Result<Vec<String>, AppError> {
    Ok(SafetyCategory::find_many()
        .await?
        .into_iter()
        .map(|category| category.name)
        .collect())
}

async fn summarize_week(window: WeekWindow, categories: &[String]) -> WeeklySummary {
    let (start, end) = window.bounds();
    match Observation::find_for_aggregation(start, end).await {
        Ok(rows) => WeeklySummary {
            window,
            available: true,
            summary: PeriodSummary::from_rows(categories, &rows),
        },
        Err(error) => {
            tracing::warn!(week = window.index, error = %error, "weekly summary unavailable");
            WeeklySummary {
                window,
                available: false,
                summary: PeriodSummary::empty(categories),
            }
        }
    }
}

async fn weekly_summaries() -> Result<Vec<WeeklySummary>, AppError> {
    let categories = category_names().await?;
    let windows = week_windows(Utc::now().date_naive(), WEEKLY_LOOKBACK);
    Ok(join_all(windows.into_iter().map(|window| summarize_week(window, &categories))).await)
}

async fn monthly_rows(
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
    filter: &MonthlyFilter,
) -> Result<(NaiveDate, NaiveDate, Vec<MonthlyObservationStats>), AppError> {
    let (start, end) = monthly_range(start, end, Utc::now().date_naive());
    let rows = filter.apply(MonthlyObservationStats::find_range(start, end).await?);
    Ok((start, end, rows))
}

#[get("/stats/weekly")]
pub async fn get_weekly_stats(query: web::Query<WeeklyQuery>, req: HttpRequest) -> Result<HttpResponse, AppError> {
    authenticated(&req)?;
    let week = selected_week(query.week)?;

    let mut summaries = weekly_summaries().await?;
    let weeks = summaries
        .iter()
        .map(|summary| WeeklyHeader {
            index: summary.window.index,
            label: summary.window.label(),
            total: summary.summary.total,
            available: summary.available,
        })
        .collect();

    Ok(HttpResponse::Ok().json(WeeklyResponse {
        weeks,
        selected: summaries.swap_remove(week),
    }))
}

#[get("/stats/weekly/export")]
pub async fn export_weekly_stats(query: web::Query<WeeklyQuery>, req: HttpRequest) -> Result<HttpResponse, AppError> {
    authenticated(&req)?;
    let week = selected_week(query.week)?;
    let format = requested_format(query.format.as_deref())?;

    let categories = category_names().await?;
    let window = week_windows(Utc::now().date_naive(), WEEKLY_LOOKBACK)[week];
    let selected = summarize_week(window, &categories).await;
    if !selected.available {
        return Err(AppError::Export("weekly summary unavailable".to_string()));
    }

    let artifact = WeeklyExport {
        window: &selected.window,
        summary: &selected.summary,
    }
    .export(Utc::now(), format)?;
    Ok(artifact.into_response())
}

#[get("/stats/monthly")]
pub async fn get_monthly_stats(query: web::Query<MonthlyQuery>, req: HttpRequest) -> Result<HttpResponse, AppError> {
    authenticated(&req)?;
    let (start, end, rows) = monthly_rows(query.start, query.end, &query.filter).await?;
    let totals = MonthlyTotals::from_rows(&rows);

    Ok(HttpResponse::Ok().json(MonthlyResponse {
        start,
        end,
        rows,
        totals,
    }))
}

#[get("/stats/monthly/breakdown")]
pub async fn get_monthly_breakdown(
    query: web::Query<BreakdownQuery>,
    req: HttpRequest,
) -> Result<HttpResponse, AppError> {
    authenticated(&req)?;
    let (month, next) = month_bounds(&query.month).ok_or(AppError::BadRequest("INVALID_MONTH"))?;

    let categories = category_names().await?;
    let rows = Observation::find_for_aggregation(day_start(month), day_start(next)).await?;

    Ok(HttpResponse::Ok().json(BreakdownResponse {
        month,
        summary: PeriodSummary::from_rows(&categories, &rows),
    }))
}

#[post("/stats/monthly/export")]
pub async fn export_monthly_stats(
    payload: web::Json<MonthlyExportRequest>,
    req: HttpRequest,
) -> Result<HttpResponse, AppError> {
    authenticated(&req)?;
    let payload = payload.into_inner();
    let (start, end, rows) = monthly_rows(payload.start, payload.end, &payload.filter).await?;
    let totals = MonthlyTotals::from_rows(&rows);

    let artifact = MonthlyExport {
        start,
        end,
        rows: &rows,
        totals: &totals,
        notes: &payload.notes,
    }
    .export(Utc::now(), payload.format)?;
    tracing::info!(file = %artifact.file_name, months = rows.len(), "monthly summary exported");
    Ok(artifact.into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn monthly_range_defaults_to_thirteen_months() {
        let (start, end) = monthly_range(None, None, day(2024, 6, 17));
        assert_eq!(start, day(2023, 6, 1));
        assert_eq!(end, day(2024, 6, 1));

        let rows: Vec<MonthlyObservationStats> = start
            .iter_days()
            .take_while(|d| *d <= end)
            .filter(|d| d.day() == 1)
            .map(|month| MonthlyObservationStats {
                _id: None,
                month,
                total_observations: 4,
                observation_types: Default::default(),
                action_status: Default::default(),
                risk_levels: Default::default(),
                trending_data: Default::default(),
            })
            .collect();
        assert_eq!(rows.len(), 13);
        assert!(MonthlyTotals::from_rows(&rows).year_over_year.is_some());
    }

    #[test]
    fn monthly_range_snaps_and_orders() {
        let (start, end) = monthly_range(Some(day(2024, 5, 20)), Some(day(2024, 2, 3)), day(2024, 6, 1));
        assert_eq!(start, day(2024, 2, 1));
        assert_eq!(end, day(2024, 5, 1));
    }

    #[test]
    fn weeks_beyond_lookback_are_rejected() {
        assert_eq!(selected_week(None).unwrap(), 0);
        assert_eq!(selected_week(Some(3)).unwrap(), 3);
        assert!(matches!(selected_week(Some(4)), Err(AppError::BadRequest("INVALID_WEEK"))));
    }

    #[test]
    fn export_request_accepts_excel_alias_and_notes() {
        let request: MonthlyExportRequest = serde_json::from_str(
            r#"{"format":"excel","department":"SOR","notes":[{"date":"2024-06-01","note":"n"}]}"#,
        )
        .unwrap();
        assert_eq!(request.format, ExportFormat::Xlsx);
        assert_eq!(request.filter.department.as_deref(), Some("SOR"));
        assert_eq!(request.notes.len(), 1);
    }
}
