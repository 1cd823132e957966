//! Read-only exports of reports and summaries as PDF, CSV or XLSX files.
//!
//! Builders never touch the store; callers pass the loaded data and the
//! generation time so repeated exports differ only in that timestamp.

use std::str::FromStr;

use actix_web::{http::header, HttpResponse};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;

use crate::error::AppError;

pub mod images;
pub mod pdf;
pub mod report;
pub mod summary;
pub mod table;

#[derive(Clone, Copy, Deserialize, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Pdf,
    Csv,
    #[serde(alias = "excel")]
    Xlsx,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Csv => "csv",
            Self::Xlsx => "xlsx",
        }
    }
    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Pdf => "application/pdf",
            Self::Csv => "text/csv; charset=utf-8",
            Self::Xlsx => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        }
    }
}

impl FromStr for ExportFormat {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pdf" => Ok(Self::Pdf),
            "csv" => Ok(Self::Csv),
            "xlsx" | "excel" => Ok(Self::Xlsx),
            _ => Err(AppError::BadRequest("UNSUPPORTED_EXPORT_FORMAT")),
        }
    }
}

/// Resolves a `format` query value; absent means PDF.
pub fn requested_format(raw: Option<&str>) -> Result<ExportFormat, AppError> {
    raw.map_or(Ok(ExportFormat::default()), str::parse)
}

/// A finished file ready to be sent as a download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub file_name: String,
    pub content_type: &'static str,
    pub bytes: Vec<u8>,
}

impl Artifact {
    pub fn new(file_name: String, format: ExportFormat, bytes: Vec<u8>) -> Self {
        Self {
            file_name,
            content_type: format.content_type(),
            bytes,
        }
    }
    pub fn into_response(self) -> HttpResponse {
        HttpResponse::Ok()
            .content_type(self.content_type)
            .insert_header((
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", self.file_name),
            ))
            .body(self.bytes)
    }
}

fn day(generated_at: DateTime<Utc>) -> NaiveDate {
    generated_at.date_naive()
}

pub fn report_file_name(id: &str, generated_at: DateTime<Utc>, format: ExportFormat) -> String {
    format!("safety-report-{id}-{}.{}", day(generated_at), format.extension())
}

pub fn monthly_file_name(generated_at: DateTime<Utc>, format: ExportFormat) -> String {
    format!("monthly_summary_{}.{}", day(generated_at), format.extension())
}

pub fn weekly_file_name(generated_at: DateTime<Utc>, format: ExportFormat) -> String {
    format!("weekly_summary_{}.{}", day(generated_at), format.extension())
}

pub fn listing_file_name(generated_at: DateTime<Utc>) -> String {
    format!("safety-reports-{}.csv", day(generated_at))
}

pub fn generated_line(generated_at: DateTime<Utc>) -> String {
    format!("Generated on {}", generated_at.format("%B %-d, %Y at %H:%M UTC"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 3, 14, 5, 0).unwrap()
    }

    #[test]
    fn file_names_carry_the_export_day() {
        assert_eq!(
            report_file_name("abc", at(), ExportFormat::Pdf),
            "safety-report-abc-2024-06-03.pdf"
        );
        assert_eq!(monthly_file_name(at(), ExportFormat::Xlsx), "monthly_summary_2024-06-03.xlsx");
        assert_eq!(weekly_file_name(at(), ExportFormat::Csv), "weekly_summary_2024-06-03.csv");
        assert_eq!(listing_file_name(at()), "safety-reports-2024-06-03.csv");
    }

    #[test]
    fn formats_parse_with_aliases() {
        assert_eq!("PDF".parse::<ExportFormat>().unwrap(), ExportFormat::Pdf);
        assert_eq!("excel".parse::<ExportFormat>().unwrap(), ExportFormat::Xlsx);
        assert!("docx".parse::<ExportFormat>().is_err());
        assert_eq!(requested_format(None).unwrap(), ExportFormat::Pdf);
        assert_eq!(requested_format(Some("CSV")).unwrap(), ExportFormat::Csv);
        assert!(matches!(
            requested_format(Some("docx")),
            Err(AppError::BadRequest("UNSUPPORTED_EXPORT_FORMAT"))
        ));
    }

    #[test]
    fn artifacts_download_as_attachments() {
        let response = Artifact::new("a.csv".to_string(), ExportFormat::Csv, b"x".to_vec()).into_response();
        let disposition = response
            .headers()
            .get(header::CONTENT_DISPOSITION)
            .unwrap()
            .to_str()
            .unwrap();
        assert_eq!(disposition, "attachment; filename=\"a.csv\"");
    }

    #[test]
    fn generated_line_is_readable() {
        assert_eq!(generated_line(at()), "Generated on June 3, 2024 at 14:05 UTC");
    }
}
