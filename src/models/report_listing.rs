use crate::error::AppError;
use chrono::NaiveDate;
use mongodb::bson::{doc, oid::ObjectId, Document};
use serde::{Deserialize, Serialize};

use super::{
    observation::{Consequence, Observation, ObservationDetail, Status, Subject},
    profile::UserAuthenticationData,
};

pub const REPORTS_PER_PAGE: u64 = 10;
const DESCRIPTION_PREVIEW: usize = 50;

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    #[default]
    CreatedAt,
    Date,
    Consequences,
    Status,
}
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ListingQuery {
    pub page: Option<u64>,
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
    pub status: Option<Status>,
    pub severity: Option<Consequence>,
    #[serde(default)]
    pub sort: SortKey,
    #[serde(default)]
    pub direction: SortDirection,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Badge {
    pub label: &'static str,
    pub background: &'static str,
    pub text: &'static str,
}
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct ReportActions {
    pub edit: bool,
    pub view: bool,
    pub pdf: bool,
    pub delete: bool,
}
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ListingRow {
    pub sequence: u64,
    pub _id: String,
    pub date: String,
    pub subject: Subject,
    pub description: String,
    pub submitter_name: String,
    pub project: String,
    pub company: String,
    pub severity: Badge,
    pub status: Badge,
    pub actions: ReportActions,
}
#[derive(Debug, Clone, Serialize)]
pub struct ListingPage {
    pub page: u64,
    pub total_pages: u64,
    pub total: u64,
    pub rows: Vec<ListingRow>,
}

impl SortKey {
    fn field(&self) -> &'static str {
        match self {
            Self::CreatedAt => "created_at",
            Self::Date => "date",
            Self::Consequences => "consequences",
            Self::Status => "status",
        }
    }
}

impl ReportActions {
    pub fn for_viewer(viewer: &UserAuthenticationData, created_by: &ObjectId, status: Status) -> Self {
        Self {
            edit: viewer.can_modify(created_by) && status != Status::Closed,
            view: true,
            pdf: true,
            delete: viewer.is_admin(),
        }
    }
}

impl From<Consequence> for Badge {
    fn from(consequence: Consequence) -> Self {
        let (background, text) = consequence.colors();
        Self {
            label: consequence.as_str(),
            background,
            text,
        }
    }
}
impl From<Status> for Badge {
    fn from(status: Status) -> Self {
        let (background, text) = status.colors();
        Self {
            label: status.as_str(),
            background,
            text,
        }
    }
}

/// Cuts at a character boundary and appends `...` when the text is longer
/// than the preview.
pub fn truncate_description(description: &str) -> String {
    if description.chars().count() > DESCRIPTION_PREVIEW {
        let preview: String = description.chars().take(DESCRIPTION_PREVIEW).collect();
        format!("{preview}...")
    } else {
        description.to_string()
    }
}

pub fn long_date(date: NaiveDate) -> String {
    date.format("%B %-d, %Y").to_string()
}

pub fn total_pages(total: u64) -> u64 {
    total.div_ceil(REPORTS_PER_PAGE)
}

impl ListingQuery {
    pub fn page(&self) -> u64 {
        self.page.unwrap_or(1).max(1)
    }
    /// Rows before the requested page; pages too far out to address are rejected.
    pub fn skip(&self) -> Result<i64, AppError> {
        (self.page() - 1)
            .checked_mul(REPORTS_PER_PAGE)
            .and_then(|skip| i64::try_from(skip).ok())
            .ok_or(AppError::BadRequest("INVALID_PAGE"))
    }
    pub fn filter(&self) -> Document {
        let mut filter = Document::new();
        let mut date = Document::new();
        if let Some(start) = self.start {
            date.insert("$gte", start.to_string());
        }
        if let Some(end) = self.end {
            date.insert("$lte", end.to_string());
        }
        if !date.is_empty() {
            filter.insert("date", date);
        }
        if let Some(status) = self.status {
            filter.insert("status", status.as_str());
        }
        if let Some(severity) = self.severity {
            filter.insert("consequences", severity.as_str());
        }
        filter
    }
    pub fn sort(&self) -> Document {
        let order = match self.direction {
            SortDirection::Asc => 1,
            SortDirection::Desc => -1,
        };
        let field = self.sort.field();
        doc! { field: order, "_id": order }
    }

    /// One page of joined reports plus the total matching the filters.
    pub async fn fetch_details(&self) -> Result<(u64, Vec<ObservationDetail>), AppError> {
        let skip = self.skip()?;
        let filter = self.filter();
        let total = Observation::collection()?
            .count_documents(filter.clone(), None)
            .await?;
        let page = self.page();

        let mut pipeline = vec![
            doc! { "$match": filter },
            doc! { "$sort": self.sort() },
            doc! { "$skip": skip },
            doc! { "$limit": REPORTS_PER_PAGE as i64 },
        ];
        pipeline.extend(super::observation::detail_stages());
        let details = Observation::aggregate_details(pipeline).await?;

        tracing::debug!(page, total, rows = details.len(), "listing fetched");
        Ok((total, details))
    }
    pub async fn fetch(&self, viewer: &UserAuthenticationData) -> Result<ListingPage, AppError> {
        let (total, details) = self.fetch_details().await?;
        Ok(ListingPage {
            page: self.page(),
            total_pages: total_pages(total),
            total,
            rows: shape_rows(&details, viewer),
        })
    }
}

pub fn shape_rows(details: &[ObservationDetail], viewer: &UserAuthenticationData) -> Vec<ListingRow> {
    details
        .iter()
        .enumerate()
        .map(|(index, detail)| {
            let created_by = ObjectId::parse_str(&detail.created_by).ok();
            let actions = match created_by {
                Some(created_by) => ReportActions::for_viewer(viewer, &created_by, detail.status),
                None => ReportActions {
                    edit: viewer.is_admin() && detail.status != Status::Closed,
                    view: true,
                    pdf: true,
                    delete: viewer.is_admin(),
                },
            };
            ListingRow {
                sequence: index as u64 + 1,
                _id: detail._id.clone(),
                date: long_date(detail.date),
                subject: detail.subject,
                description: truncate_description(&detail.description),
                submitter_name: detail.submitter_name.clone(),
                project: detail.project_name().to_string(),
                company: detail.company_name().to_string(),
                severity: Badge::from(detail.consequences),
                status: Badge::from(detail.status),
                actions,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        observation::{Likelihood, ReportGroup},
        profile::Role,
    };

    fn viewer(role: Role) -> UserAuthenticationData {
        UserAuthenticationData {
            user_id: ObjectId::new(),
            username: "viewer".to_string(),
            role,
        }
    }

    fn detail(created_by: &ObjectId, status: Status) -> ObservationDetail {
        ObservationDetail {
            _id: ObjectId::new().to_hex(),
            project_id: ObjectId::new().to_hex(),
            company_id: ObjectId::new().to_hex(),
            project: None,
            company: None,
            submitter_name: "Jane Roe".to_string(),
            date: NaiveDate::from_ymd_opt(2024, 3, 5).unwrap(),
            time: "08:15".to_string(),
            location: "Workshop".to_string(),
            department: None,
            description: "x".repeat(80),
            subject: Subject::Sop,
            report_group: ReportGroup::Maintenance,
            consequences: Consequence::Moderate,
            likelihood: Likelihood::Possible,
            status,
            supporting_image: None,
            created_by: created_by.to_hex(),
            created_at: String::new(),
            updated_at: String::new(),
            categories: Vec::new(),
            action_plans: Vec::new(),
        }
    }

    #[test]
    fn non_owner_never_edits_or_deletes() {
        let owner = ObjectId::new();
        let stranger = viewer(Role::Normal);

        for status in Status::ALL {
            let actions = ReportActions::for_viewer(&stranger, &owner, status);
            assert!(!actions.edit);
            assert!(!actions.delete);
            assert!(actions.view && actions.pdf);
        }
    }

    #[test]
    fn owner_edits_only_open_reports() {
        let owner = viewer(Role::Normal);
        assert!(ReportActions::for_viewer(&owner, &owner.user_id, Status::Open).edit);
        assert!(!ReportActions::for_viewer(&owner, &owner.user_id, Status::Closed).edit);
        assert!(!ReportActions::for_viewer(&owner, &owner.user_id, Status::Open).delete);
    }

    #[test]
    fn admin_deletes_everything() {
        let admin = viewer(Role::Admin);
        let actions = ReportActions::for_viewer(&admin, &ObjectId::new(), Status::Closed);
        assert!(actions.delete);
        assert!(!actions.edit);
    }

    #[test]
    fn descriptions_are_previewed() {
        assert_eq!(truncate_description("short"), "short");
        let long = "a".repeat(60);
        assert_eq!(truncate_description(&long), format!("{}...", "a".repeat(50)));
        assert_eq!(truncate_description(&"é".repeat(51)).chars().count(), 53);
    }

    #[test]
    fn dates_use_long_format() {
        assert_eq!(long_date(NaiveDate::from_ymd_opt(2024, 3, 5).unwrap()), "March 5, 2024");
    }

    #[test]
    fn unreachable_pages_are_rejected() {
        let page = |page| ListingQuery {
            page: Some(page),
            ..ListingQuery::default()
        };
        assert_eq!(page(1).skip().unwrap(), 0);
        assert_eq!(page(3).skip().unwrap(), 20);
        assert!(matches!(page(u64::MAX).skip(), Err(AppError::BadRequest("INVALID_PAGE"))));
        assert!(matches!(page(u64::MAX / 10).skip(), Err(AppError::BadRequest("INVALID_PAGE"))));
    }

    #[test]
    fn pages_round_up() {
        assert_eq!(total_pages(0), 0);
        assert_eq!(total_pages(10), 1);
        assert_eq!(total_pages(11), 2);
    }

    #[test]
    fn filters_and_sort_follow_query() {
        let query = ListingQuery {
            page: Some(0),
            start: NaiveDate::from_ymd_opt(2024, 1, 1),
            end: None,
            status: Some(Status::Open),
            severity: Some(Consequence::Severe),
            sort: SortKey::Consequences,
            direction: SortDirection::Asc,
        };

        assert_eq!(query.page(), 1);
        let filter = query.filter();
        assert_eq!(filter.get_document("date").unwrap().get_str("$gte").unwrap(), "2024-01-01");
        assert_eq!(filter.get_str("status").unwrap(), "open");
        assert_eq!(filter.get_str("consequences").unwrap(), "severe");
        assert_eq!(query.sort().get_i32("consequences").unwrap(), 1);
        assert!(ListingQuery::default().filter().is_empty());
    }

    #[test]
    fn rows_are_numbered_and_badged() {
        let admin = viewer(Role::Admin);
        let owner = ObjectId::new();
        let rows = shape_rows(
            &[detail(&owner, Status::Open), detail(&owner, Status::Closed)],
            &admin,
        );

        assert_eq!(rows[0].sequence, 1);
        assert_eq!(rows[1].sequence, 2);
        assert_eq!(rows[0].date, "March 5, 2024");
        assert!(rows[0].description.ends_with("..."));
        assert_eq!(rows[0].severity.background, "#FEF9C3");
        assert_eq!(rows[1].status.label, "closed");
        assert!(rows[0].actions.edit && !rows[1].actions.edit);
    }
}
