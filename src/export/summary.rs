use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::{
    generated_line, monthly_file_name,
    pdf::{self, Block},
    table::{self, Cell, Sheet},
    weekly_file_name, Artifact, ExportFormat,
};
use crate::{
    aggregation::{PeriodSummary, SeverityCounts, WeekWindow},
    error::AppError,
    models::{
        monthly_stats::{MonthlyObservationStats, MonthlyTotals},
        observation::Consequence,
    },
};

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct SummaryNote {
    pub date: String,
    pub note: String,
}

pub struct MonthlyExport<'a> {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub rows: &'a [MonthlyObservationStats],
    pub totals: &'a MonthlyTotals,
    pub notes: &'a [SummaryNote],
}

pub struct WeeklyExport<'a> {
    pub window: &'a WeekWindow,
    pub summary: &'a PeriodSummary,
}

fn severity_line(counts: &SeverityCounts) -> String {
    Consequence::ALL
        .iter()
        .map(|consequence| format!("{} {}", consequence.as_str(), counts.get(*consequence)))
        .collect::<Vec<_>>()
        .join(", ")
}

impl MonthlyExport<'_> {
    fn blocks(&self, generated_at: DateTime<Utc>) -> Vec<Block> {
        let mut blocks = vec![
            Block::Title("Monthly Safety Report Summary".to_string()),
            Block::Subtitle(format!(
                "Period: {} - {}",
                self.start.format("%b %Y"),
                self.end.format("%b %Y")
            )),
            Block::Subtitle(generated_line(generated_at)),
            Block::Heading("Totals".to_string()),
            Block::field("Total Observations", self.totals.total_observations.to_string()),
            Block::field("High Risk", self.totals.high_risk.to_string()),
            Block::field("Resolved Cases", self.totals.resolved.to_string()),
            Block::field(
                "Avg Response Time",
                format!("{} hrs", self.totals.avg_response_hours),
            ),
        ];
        if let Some(growth) = &self.totals.year_over_year {
            blocks.push(Block::field("Year over Year", format!("{:.1}%", growth.total)));
        }

        blocks.push(Block::Heading("Months".to_string()));
        for row in self.rows {
            blocks.push(Block::field(
                &row.month.format("%B %Y").to_string(),
                format!("Total Observations: {}", row.total_observations),
            ));
        }

        if !self.notes.is_empty() {
            blocks.push(Block::Heading("Notes".to_string()));
            for note in self.notes {
                blocks.push(Block::field(&note.date, note.note.as_str()));
            }
        }
        blocks
    }

    fn sheet(&self) -> Sheet {
        let kinds: BTreeSet<&str> = self
            .rows
            .iter()
            .flat_map(|row| row.observation_types.keys().map(String::as_str))
            .collect();
        let mut headers = vec!["Month", "Total Observations"];
        headers.extend(kinds.iter().copied());

        let mut sheet = Sheet::new("Monthly Summary", &headers);
        for row in self.rows {
            let mut cells: Vec<Cell> = vec![
                row.month.format("%B %Y").to_string().into(),
                row.total_observations.into(),
            ];
            cells.extend(
                kinds
                    .iter()
                    .map(|kind| Cell::from(row.observation_types.get(*kind).copied().unwrap_or(0))),
            );
            sheet.push(cells);
        }
        sheet
    }

    fn notes_sheet(&self) -> Sheet {
        let mut sheet = Sheet::new("Notes", &["date", "note"]);
        for note in self.notes {
            sheet.push(vec![note.date.as_str().into(), note.note.as_str().into()]);
        }
        sheet
    }

    pub fn export(&self, generated_at: DateTime<Utc>, format: ExportFormat) -> Result<Artifact, AppError> {
        let bytes = match format {
            ExportFormat::Pdf => pdf::render(
                "Monthly Safety Report Summary",
                &self.blocks(generated_at),
                pdf::A4_PORTRAIT,
            )?,
            ExportFormat::Csv => table::to_csv(&self.sheet())?,
            ExportFormat::Xlsx => {
                let mut sheets = vec![self.sheet()];
                if !self.notes.is_empty() {
                    sheets.push(self.notes_sheet());
                }
                table::to_xlsx(&sheets)?
            }
        };
        Ok(Artifact::new(monthly_file_name(generated_at, format), format, bytes))
    }
}

impl WeeklyExport<'_> {
    fn blocks(&self, generated_at: DateTime<Utc>) -> Vec<Block> {
        let mut blocks = vec![
            Block::Title("Weekly Safety Summary".to_string()),
            Block::Subtitle(format!("Week of {}", self.window.label())),
            Block::Subtitle(generated_line(generated_at)),
            Block::Heading("Overview".to_string()),
            Block::field("Total Observations", self.summary.total.to_string()),
            Block::field("Severity", severity_line(&self.summary.severity)),
        ];
        for (status, count) in self.summary.status.iter() {
            blocks.push(Block::field(status, count.to_string()));
        }

        blocks.push(Block::Heading("Categories by Severity".to_string()));
        for (category, counts) in self.summary.category_severity.iter() {
            blocks.push(Block::field(category, severity_line(counts)));
        }

        blocks.push(Block::Heading("Observations by Submitter".to_string()));
        if self.summary.submitters.is_empty() {
            blocks.push(Block::Paragraph("No observations this week".to_string()));
        }
        for submitter in self.summary.submitters.iter() {
            blocks.push(Block::field(&submitter.submitter_name, submitter.count.to_string()));
        }
        blocks
    }

    fn category_sheet(&self) -> Sheet {
        let mut sheet = Sheet::new(
            "Categories",
            &["Category", "Minor", "Moderate", "Major", "Severe", "Total"],
        );
        for (category, counts) in self.summary.category_severity.iter() {
            sheet.push(vec![
                category.as_str().into(),
                counts.minor.into(),
                counts.moderate.into(),
                counts.major.into(),
                counts.severe.into(),
                counts.total().into(),
            ]);
        }
        sheet
    }

    fn submitter_sheet(&self) -> Sheet {
        let mut sheet = Sheet::new("Submitters", &["Submitter", "Observations"]);
        for submitter in self.summary.submitters.iter() {
            sheet.push(vec![submitter.submitter_name.as_str().into(), submitter.count.into()]);
        }
        sheet
    }

    fn status_sheet(&self) -> Sheet {
        let mut sheet = Sheet::new("Status", &["Status", "Observations"]);
        for (status, count) in self.summary.status.iter() {
            sheet.push(vec![(*status).into(), (*count).into()]);
        }
        sheet
    }

    pub fn export(&self, generated_at: DateTime<Utc>, format: ExportFormat) -> Result<Artifact, AppError> {
        let bytes = match format {
            ExportFormat::Pdf => pdf::render(
                "Weekly Safety Summary",
                &self.blocks(generated_at),
                pdf::A4_LANDSCAPE,
            )?,
            ExportFormat::Csv => table::to_csv(&self.category_sheet())?,
            ExportFormat::Xlsx => table::to_xlsx(&[
                self.category_sheet(),
                self.submitter_sheet(),
                self.status_sheet(),
            ])?,
        };
        Ok(Artifact::new(weekly_file_name(generated_at, format), format, bytes))
    }
}
