use std::str::FromStr;

use crate::{
    database::{begin_transaction, finish_transaction, get_db},
    error::{AppError, ValidationErrors},
};
use actix_multipart::form::{json::Json as MultipartJson, tempfile::TempFile, MultipartForm};
use chrono::{DateTime as ChronoDateTime, NaiveDate, NaiveTime, Utc};
use futures::stream::TryStreamExt;
use mongodb::{
    bson::{doc, from_document, oid::ObjectId, to_bson, Bson, DateTime, Document},
    ClientSession, Collection,
};
use serde::{Deserialize, Serialize};

use super::action_plan::{ActionPlan, ActionPlanRequest, ActionPlanResponse, ValidActionPlan};

pub const MAX_ACTION_PLANS: usize = 10;

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum Subject {
    Sor,
    Sop,
    Res,
}
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ReportGroup {
    Operations,
    Maintenance,
    Safety,
    Contractors,
}
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Consequence {
    Minor,
    Moderate,
    Major,
    Severe,
}
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum Likelihood {
    Unlikely,
    Possible,
    Likely,
    VeryLikely,
}
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    #[default]
    #[serde(alias = "Open", alias = "OPEN")]
    Open,
    #[serde(alias = "Closed", alias = "CLOSED")]
    Closed,
}

/// Badge colours as `(background, text)` hex pairs.
pub type BadgeColors = (&'static str, &'static str);

impl Subject {
    pub const ALL: [Subject; 3] = [Self::Sor, Self::Sop, Self::Res];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sor => "SOR",
            Self::Sop => "SOP",
            Self::Res => "RES",
        }
    }
}
impl ReportGroup {
    pub const ALL: [ReportGroup; 4] = [
        Self::Operations,
        Self::Maintenance,
        Self::Safety,
        Self::Contractors,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Operations => "operations",
            Self::Maintenance => "maintenance",
            Self::Safety => "safety",
            Self::Contractors => "contractors",
        }
    }
    pub fn label(&self) -> &'static str {
        match self {
            Self::Operations => "Operations",
            Self::Maintenance => "Maintenance",
            Self::Safety => "Safety",
            Self::Contractors => "Contractors",
        }
    }
}
impl Consequence {
    pub const ALL: [Consequence; 4] = [Self::Minor, Self::Moderate, Self::Major, Self::Severe];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Minor => "minor",
            Self::Moderate => "moderate",
            Self::Major => "major",
            Self::Severe => "severe",
        }
    }
    pub fn colors(&self) -> BadgeColors {
        match self {
            Self::Severe => ("#FEE2E2", "#991B1B"),
            Self::Major => ("#FFEDD5", "#9A3412"),
            Self::Moderate => ("#FEF9C3", "#854D0E"),
            Self::Minor => ("#DCFCE7", "#166534"),
        }
    }
}
impl Likelihood {
    pub const ALL: [Likelihood; 4] = [
        Self::Unlikely,
        Self::Possible,
        Self::Likely,
        Self::VeryLikely,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unlikely => "unlikely",
            Self::Possible => "possible",
            Self::Likely => "likely",
            Self::VeryLikely => "very-likely",
        }
    }
}
impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Closed => "closed",
        }
    }
    pub fn colors(&self) -> BadgeColors {
        match self {
            Self::Open => ("#DCFCE7", "#166534"),
            Self::Closed => ("#FEE2E2", "#991B1B"),
        }
    }
}

macro_rules! wire_from_str {
    ($($kind:ty),*) => {
        $(
            impl FromStr for $kind {
                type Err = ();

                fn from_str(value: &str) -> Result<Self, Self::Err> {
                    let value = value.trim();
                    Self::ALL
                        .into_iter()
                        .find(|kind| kind.as_str().eq_ignore_ascii_case(value))
                        .ok_or(())
                }
            }
        )*
    };
}

impl Status {
    pub const ALL: [Status; 2] = [Self::Open, Self::Closed];
}

wire_from_str!(Subject, ReportGroup, Consequence, Likelihood, Status);

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Observation {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,
    pub project_id: ObjectId,
    pub company_id: ObjectId,
    pub submitter_name: String,
    pub date: NaiveDate,
    pub time: String,
    pub location: String,
    pub department: Option<String>,
    pub description: String,
    pub subject: Subject,
    pub report_group: ReportGroup,
    pub consequences: Consequence,
    pub likelihood: Likelihood,
    pub status: Status,
    pub supporting_image: Option<String>,
    pub created_by: ObjectId,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservationCategory {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,
    pub observation_id: ObjectId,
    pub category_id: ObjectId,
}
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct ObservationRequest {
    pub project_id: Option<String>,
    pub company_id: Option<String>,
    pub submitter_name: Option<String>,
    pub date: Option<String>,
    pub time: Option<String>,
    pub department: Option<String>,
    pub location: Option<String>,
    pub description: Option<String>,
    pub subject: Option<String>,
    pub report_group: Option<String>,
    pub consequences: Option<String>,
    pub likelihood: Option<String>,
    pub status: Option<String>,
    pub supporting_image: Option<String>,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub action_plan_required: bool,
    #[serde(default)]
    pub action_plans: Vec<ActionPlanRequest>,
    /// Plans removed while editing; applied only when the whole form saves.
    #[serde(default)]
    pub deleted_action_plans: Vec<String>,
}
#[derive(Debug, Clone, PartialEq)]
pub struct ValidObservation {
    pub project_id: ObjectId,
    pub company_id: ObjectId,
    pub submitter_name: String,
    pub date: NaiveDate,
    pub time: String,
    pub department: Option<String>,
    pub location: String,
    pub description: String,
    pub subject: Subject,
    pub report_group: ReportGroup,
    pub consequences: Consequence,
    pub likelihood: Likelihood,
    pub status: Status,
    pub supporting_image: Option<String>,
    pub categories: Vec<ObjectId>,
    pub action_plans: Vec<ValidActionPlan>,
    pub deleted_action_plans: Vec<ObjectId>,
}
/// Fields editable from the single report view.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct ObservationPatch {
    pub description: Option<String>,
    pub location: Option<String>,
    pub department: Option<String>,
    pub consequences: Option<String>,
    pub likelihood: Option<String>,
    pub status: Option<String>,
}
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct NamedRef {
    pub _id: String,
    pub name: String,
}
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct CategoryRef {
    pub _id: String,
    pub name: String,
    pub icon: String,
}
/// An observation joined with its project, company, categories and plans.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ObservationDetail {
    pub _id: String,
    pub project_id: String,
    pub company_id: String,
    pub project: Option<NamedRef>,
    pub company: Option<NamedRef>,
    pub submitter_name: String,
    pub date: NaiveDate,
    pub time: String,
    pub location: String,
    pub department: Option<String>,
    pub description: String,
    pub subject: Subject,
    pub report_group: ReportGroup,
    pub consequences: Consequence,
    pub likelihood: Likelihood,
    pub status: Status,
    pub supporting_image: Option<String>,
    pub created_by: String,
    pub created_at: String,
    pub updated_at: String,
    #[serde(default)]
    pub categories: Vec<CategoryRef>,
    #[serde(default)]
    pub action_plans: Vec<ActionPlanResponse>,
}
/// Minimal projection used by the weekly and monthly breakdowns. Fields stay
/// loosely typed so unrecognised values can be skipped instead of failing.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AggregateRow {
    #[serde(default)]
    pub submitter_name: Option<String>,
    #[serde(default)]
    pub consequences: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub categories: Vec<String>,
}

/// Form submission: the report as JSON plus an optional image file.
#[derive(Debug, MultipartForm)]
pub struct ObservationMultipartRequest {
    #[multipart(rename = "report")]
    pub report: MultipartJson<ObservationRequest>,
    #[multipart(rename = "image")]
    pub image: Option<TempFile>,
}

fn parse_id(errors: &mut ValidationErrors, field: &str, label: &str, value: Option<&str>) -> Option<ObjectId> {
    match value.map(str::trim) {
        Some(value) if !value.is_empty() => match ObjectId::parse_str(value) {
            Ok(id) => Some(id),
            Err(_) => {
                errors.add(field, format!("{label} is invalid"));
                None
            }
        },
        _ => {
            errors.add(field, format!("{label} is required"));
            None
        }
    }
}

pub(crate) fn parse_text(errors: &mut ValidationErrors, field: &str, label: &str, value: Option<&str>) -> Option<String> {
    match value.map(str::trim) {
        Some(value) if !value.is_empty() => Some(value.to_string()),
        _ => {
            errors.add(field, format!("{label} is required"));
            None
        }
    }
}

pub(crate) fn parse_kind<T: FromStr>(errors: &mut ValidationErrors, field: &str, label: &str, value: Option<&str>) -> Option<T> {
    match value.map(str::trim) {
        Some(value) if !value.is_empty() => match value.parse() {
            Ok(kind) => Some(kind),
            Err(_) => {
                errors.add(field, format!("{label} is invalid"));
                None
            }
        },
        _ => {
            errors.add(field, format!("{label} is required"));
            None
        }
    }
}

pub(crate) fn parse_date(errors: &mut ValidationErrors, field: &str, label: &str, value: Option<&str>) -> Option<NaiveDate> {
    match value.map(str::trim) {
        Some(value) if !value.is_empty() => match NaiveDate::parse_from_str(value, "%Y-%m-%d") {
            Ok(date) => Some(date),
            Err(_) => {
                errors.add(field, format!("{label} is invalid"));
                None
            }
        },
        _ => {
            errors.add(field, format!("{label} is required"));
            None
        }
    }
}

fn parse_time(errors: &mut ValidationErrors, value: Option<&str>) -> Option<String> {
    match value.map(str::trim) {
        Some(value) if !value.is_empty() => {
            if NaiveTime::parse_from_str(value, "%H:%M").is_ok()
                || NaiveTime::parse_from_str(value, "%H:%M:%S").is_ok()
            {
                Some(value.to_string())
            } else {
                errors.add("time", "Time is invalid");
                None
            }
        }
        _ => {
            errors.add("time", "Time is required");
            None
        }
    }
}

fn optional_text(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

impl ObservationRequest {
    /// Checks every required field and reports all failures at once.
    pub fn validate(self) -> Result<ValidObservation, AppError> {
        let mut errors = ValidationErrors::new();

        let project_id = parse_id(&mut errors, "project", "Project", self.project_id.as_deref());
        let company_id = parse_id(&mut errors, "company", "Company", self.company_id.as_deref());
        let submitter_name = parse_text(&mut errors, "submitter_name", "Submitter name", self.submitter_name.as_deref());
        let date = parse_date(&mut errors, "date", "Date", self.date.as_deref());
        let time = parse_time(&mut errors, self.time.as_deref());
        let location = parse_text(&mut errors, "location", "Location", self.location.as_deref());
        let description = parse_text(&mut errors, "description", "Description", self.description.as_deref());
        let report_group = parse_kind(&mut errors, "report_group", "Report group", self.report_group.as_deref());
        let consequences = parse_kind(&mut errors, "consequences", "Consequences", self.consequences.as_deref());
        let likelihood = parse_kind(&mut errors, "likelihood", "Likelihood", self.likelihood.as_deref());
        let subject = parse_kind(&mut errors, "subject", "Subject", self.subject.as_deref());
        let status = match self.status.as_deref() {
            None => Some(Status::Open),
            status => parse_kind(&mut errors, "status", "Status", status),
        };

        let mut categories = Vec::new();
        for category in self.categories.iter() {
            match ObjectId::parse_str(category.trim()) {
                Ok(id) if !categories.contains(&id) => categories.push(id),
                Ok(_) => (),
                Err(_) => errors.add("categories", "Safety category is invalid"),
            }
        }
        if self.categories.is_empty() {
            errors.add("categories", "At least one safety category is required");
        }

        if self.action_plan_required && self.action_plans.is_empty() {
            errors.add("action_plans", "At least one action plan is required");
        }
        if self.action_plans.len() > MAX_ACTION_PLANS {
            errors.add(
                "action_plans",
                format!("At most {MAX_ACTION_PLANS} action plans are allowed"),
            );
        }
        let action_plans: Vec<ValidActionPlan> = self
            .action_plans
            .into_iter()
            .enumerate()
            .filter_map(|(index, plan)| plan.validate(index, &mut errors))
            .collect();

        let mut deleted_action_plans = Vec::new();
        for id in self.deleted_action_plans.iter() {
            match ObjectId::parse_str(id.trim()) {
                Ok(id) => deleted_action_plans.push(id),
                Err(_) => errors.add("deleted_action_plans", "Action plan id is invalid"),
            }
        }

        match (
            project_id,
            company_id,
            submitter_name,
            date,
            time,
            location,
            description,
            report_group,
            consequences,
            likelihood,
            subject,
            status,
        ) {
            (
                Some(project_id),
                Some(company_id),
                Some(submitter_name),
                Some(date),
                Some(time),
                Some(location),
                Some(description),
                Some(report_group),
                Some(consequences),
                Some(likelihood),
                Some(subject),
                Some(status),
            ) if errors.is_empty() => Ok(ValidObservation {
                project_id,
                company_id,
                submitter_name,
                date,
                time,
                department: optional_text(self.department),
                location,
                description,
                subject,
                report_group,
                consequences,
                likelihood,
                status,
                supporting_image: optional_text(self.supporting_image),
                categories,
                action_plans,
                deleted_action_plans,
            }),
            _ => Err(AppError::Validation(errors)),
        }
    }
}

impl ObservationPatch {
    /// Builds the `$set` document; an empty patch is rejected.
    pub fn into_update(self) -> Result<Document, AppError> {
        let mut errors = ValidationErrors::new();
        let mut update = Document::new();

        if let Some(description) = self.description {
            if let Some(description) = parse_text(&mut errors, "description", "Description", Some(&description)) {
                update.insert("description", description);
            }
        }
        if let Some(location) = self.location {
            if let Some(location) = parse_text(&mut errors, "location", "Location", Some(&location)) {
                update.insert("location", location);
            }
        }
        if let Some(department) = self.department {
            update.insert("department", to_bson(&optional_text(Some(department)))?);
        }
        if let Some(consequences) = self.consequences {
            if let Some(kind) = parse_kind::<Consequence>(&mut errors, "consequences", "Consequences", Some(&consequences)) {
                update.insert("consequences", kind.as_str());
            }
        }
        if let Some(likelihood) = self.likelihood {
            if let Some(kind) = parse_kind::<Likelihood>(&mut errors, "likelihood", "Likelihood", Some(&likelihood)) {
                update.insert("likelihood", kind.as_str());
            }
        }
        if let Some(status) = self.status {
            if let Some(kind) = parse_kind::<Status>(&mut errors, "status", "Status", Some(&status)) {
                update.insert("status", kind.as_str());
            }
        }

        errors.into_result()?;
        if update.is_empty() {
            return Err(AppError::BadRequest("NOTHING_TO_UPDATE"));
        }
        update.insert("updated_at", DateTime::now());
        Ok(update)
    }
}

impl ValidObservation {
    pub fn into_observation(self, created_by: ObjectId) -> (Observation, Vec<ObjectId>, Vec<ValidActionPlan>) {
        let now = DateTime::now();
        let observation = Observation {
            _id: None,
            project_id: self.project_id,
            company_id: self.company_id,
            submitter_name: self.submitter_name,
            date: self.date,
            time: self.time,
            location: self.location,
            department: self.department,
            description: self.description,
            subject: self.subject,
            report_group: self.report_group,
            consequences: self.consequences,
            likelihood: self.likelihood,
            status: self.status,
            supporting_image: self.supporting_image,
            created_by,
            created_at: now,
            updated_at: now,
        };
        (observation, self.categories, self.action_plans)
    }
}

impl Observation {
    pub fn collection() -> Result<Collection<Observation>, AppError> {
        Ok(get_db()?.collection::<Observation>("observation_details"))
    }
    fn links() -> Result<Collection<ObservationCategory>, AppError> {
        Ok(get_db()?.collection::<ObservationCategory>("observation_categories"))
    }

    /// Inserts the observation, its category links and its action plans in
    /// one transaction.
    pub async fn create(
        &mut self,
        categories: &[ObjectId],
        plans: Vec<ValidActionPlan>,
    ) -> Result<ObjectId, AppError> {
        let _id = ObjectId::new();
        self._id = Some(_id);

        let mut session = begin_transaction().await?;
        let outcome = self.insert_all(&mut session, categories, plans).await;
        finish_transaction(session, outcome).await
    }
    async fn insert_all(
        &self,
        session: &mut ClientSession,
        categories: &[ObjectId],
        plans: Vec<ValidActionPlan>,
    ) -> Result<ObjectId, AppError> {
        let _id = self._id.ok_or(AppError::BadRequest("INVALID_ID"))?;

        Self::collection()?
            .insert_one_with_session(self, None, session)
            .await?;
        Self::link_categories(session, &_id, categories).await?;

        let plans: Vec<ActionPlan> = plans
            .into_iter()
            .map(|plan| plan.into_action_plan(_id, self.created_by))
            .collect();
        ActionPlan::insert_many_with_session(session, &plans).await?;

        tracing::info!(observation = %_id, plans = plans.len(), "observation created");
        Ok(_id)
    }
    async fn link_categories(
        session: &mut ClientSession,
        observation_id: &ObjectId,
        categories: &[ObjectId],
    ) -> Result<(), AppError> {
        if categories.is_empty() {
            return Ok(());
        }
        let links: Vec<ObservationCategory> = categories
            .iter()
            .map(|category_id| ObservationCategory {
                _id: Some(ObjectId::new()),
                observation_id: *observation_id,
                category_id: *category_id,
            })
            .collect();
        Self::links()?
            .insert_many_with_session(links, None, session)
            .await?;
        Ok(())
    }

    /// Applies a full form save: fields, category links, plan upserts and
    /// queued plan deletions commit together.
    pub async fn update(_id: &ObjectId, valid: ValidObservation, editor: ObjectId) -> Result<ObjectId, AppError> {
        let mut session = begin_transaction().await?;
        let outcome = Self::update_all(&mut session, _id, valid, editor).await;
        finish_transaction(session, outcome).await
    }
    async fn update_all(
        session: &mut ClientSession,
        _id: &ObjectId,
        valid: ValidObservation,
        editor: ObjectId,
    ) -> Result<ObjectId, AppError> {
        let update = doc! {
            "project_id": valid.project_id,
            "company_id": valid.company_id,
            "submitter_name": &valid.submitter_name,
            "date": valid.date.to_string(),
            "time": &valid.time,
            "location": &valid.location,
            "department": to_bson(&valid.department)?,
            "description": &valid.description,
            "subject": valid.subject.as_str(),
            "report_group": valid.report_group.as_str(),
            "consequences": valid.consequences.as_str(),
            "likelihood": valid.likelihood.as_str(),
            "status": valid.status.as_str(),
            "supporting_image": to_bson(&valid.supporting_image)?,
            "updated_at": DateTime::now(),
        };
        let result = Self::collection()?
            .update_one_with_session(doc! { "_id": _id }, doc! { "$set": update }, None, session)
            .await?;
        if result.matched_count == 0 {
            return Err(AppError::NotFound("REPORT_NOT_FOUND"));
        }

        Self::links()?
            .delete_many_with_session(doc! { "observation_id": _id }, None, session)
            .await?;
        Self::link_categories(session, _id, &valid.categories).await?;

        ActionPlan::delete_queued_with_session(session, _id, &valid.deleted_action_plans).await?;
        for plan in valid.action_plans {
            ActionPlan::upsert_with_session(session, _id, editor, plan).await?;
        }

        tracing::info!(observation = %_id, "observation updated");
        Ok(*_id)
    }

    pub async fn patch(_id: &ObjectId, patch: ObservationPatch) -> Result<ObjectId, AppError> {
        let update = patch.into_update()?;
        let result = Self::collection()?
            .update_one(doc! { "_id": _id }, doc! { "$set": update }, None)
            .await?;
        if result.matched_count == 0 {
            return Err(AppError::NotFound("REPORT_NOT_FOUND"));
        }
        Ok(*_id)
    }

    /// Removes action plans first, then category links, then the
    /// observation, all inside one transaction.
    pub async fn delete_by_id(_id: &ObjectId) -> Result<u64, AppError> {
        let mut session = begin_transaction().await?;
        let outcome = Self::delete_all(&mut session, _id).await;
        finish_transaction(session, outcome).await
    }
    async fn delete_all(session: &mut ClientSession, _id: &ObjectId) -> Result<u64, AppError> {
        let plans = ActionPlan::delete_by_observation_with_session(session, _id).await?;
        Self::links()?
            .delete_many_with_session(doc! { "observation_id": _id }, None, session)
            .await?;
        let result = Self::collection()?
            .delete_one_with_session(doc! { "_id": _id }, None, session)
            .await?;
        if result.deleted_count == 0 {
            return Err(AppError::NotFound("REPORT_NOT_FOUND"));
        }
        tracing::info!(observation = %_id, plans, "observation deleted");
        Ok(result.deleted_count)
    }

    pub async fn find_by_id(_id: &ObjectId) -> Result<Option<Observation>, AppError> {
        Ok(Self::collection()?.find_one(doc! { "_id": _id }, None).await?)
    }
    pub async fn find_detail_by_id(_id: &ObjectId) -> Result<Option<ObservationDetail>, AppError> {
        let mut pipeline = vec![doc! { "$match": { "_id": _id } }];
        pipeline.extend(detail_stages());

        let mut details = Self::aggregate_details(pipeline).await?;
        Ok(details.pop())
    }
    pub async fn find_by_creator(created_by: &ObjectId) -> Result<Vec<ObservationDetail>, AppError> {
        let mut pipeline = vec![
            doc! { "$match": { "created_by": created_by } },
            doc! { "$sort": { "created_at": -1, "_id": -1 } },
        ];
        pipeline.extend(detail_stages());
        Self::aggregate_details(pipeline).await
    }
    pub async fn search(query: &str) -> Result<Vec<ObservationDetail>, AppError> {
        let pattern = regex::escape(query.trim());
        let mut pipeline = vec![
            doc! {
                "$match": {
                    "$or": [
                        { "description": { "$regex": &pattern, "$options": "i" } },
                        { "location": { "$regex": &pattern, "$options": "i" } },
                        { "department": { "$regex": &pattern, "$options": "i" } },
                    ]
                }
            },
            doc! { "$sort": { "created_at": -1, "_id": -1 } },
        ];
        pipeline.extend(detail_stages());
        Self::aggregate_details(pipeline).await
    }
    pub(crate) async fn aggregate_details(pipeline: Vec<Document>) -> Result<Vec<ObservationDetail>, AppError> {
        let mut cursor = Self::collection()?.aggregate(pipeline, None).await?;
        let mut details = Vec::new();
        while let Some(doc) = cursor.try_next().await? {
            let mut detail = from_document::<ObservationDetail>(doc)?;
            detail.apply_effective_status();
            details.push(detail);
        }
        Ok(details)
    }
    /// Rows created in `[start, end)` with their category names.
    pub async fn find_for_aggregation(
        start: ChronoDateTime<Utc>,
        end: ChronoDateTime<Utc>,
    ) -> Result<Vec<AggregateRow>, AppError> {
        let pipeline = vec![
            doc! {
                "$match": {
                    "created_at": {
                        "$gte": DateTime::from_millis(start.timestamp_millis()),
                        "$lt": DateTime::from_millis(end.timestamp_millis()),
                    }
                }
            },
            doc! {
                "$lookup": {
                    "from": "observation_categories",
                    "localField": "_id",
                    "foreignField": "observation_id",
                    "as": "links",
                }
            },
            doc! {
                "$lookup": {
                    "from": "safety_categories",
                    "localField": "links.category_id",
                    "foreignField": "_id",
                    "as": "linked_categories",
                }
            },
            doc! {
                "$project": {
                    "_id": 0,
                    "submitter_name": 1,
                    "consequences": 1,
                    "status": 1,
                    "categories": "$linked_categories.name",
                }
            },
        ];

        let mut cursor = Self::collection()?.aggregate(pipeline, None).await?;
        let mut rows = Vec::new();
        while let Some(doc) = cursor.try_next().await? {
            rows.push(from_document::<AggregateRow>(doc)?);
        }
        Ok(rows)
    }
    pub async fn count_by_project(project_id: &ObjectId) -> Result<u64, AppError> {
        Ok(Self::collection()?
            .count_documents(doc! { "project_id": project_id }, None)
            .await?)
    }
    pub async fn count_by_company(company_id: &ObjectId) -> Result<u64, AppError> {
        Ok(Self::collection()?
            .count_documents(doc! { "company_id": company_id }, None)
            .await?)
    }
}

impl ObservationDetail {
    /// Plans under a closed observation always display as closed.
    pub fn apply_effective_status(&mut self) {
        let parent = self.status;
        for plan in self.action_plans.iter_mut() {
            plan.status = super::action_plan::effective_status(parent, plan.status);
        }
    }
    pub fn project_name(&self) -> &str {
        self.project.as_ref().map_or("", |project| project.name.as_str())
    }
    pub fn company_name(&self) -> &str {
        self.company.as_ref().map_or("", |company| company.name.as_str())
    }
}

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S.%LZ";

fn timestamp_string(field: &str) -> Document {
    doc! {
        "$cond": [
            { "$ifNull": [field, false] },
            { "$dateToString": { "date": field, "format": TIMESTAMP_FORMAT } },
            "",
        ]
    }
}

fn named_ref(field: &str) -> Document {
    doc! {
        "$cond": [
            { "$ifNull": [format!("${field}"), false] },
            {
                "_id": { "$toString": format!("${field}._id") },
                "name": format!("${field}.name"),
            },
            Bson::Null,
        ]
    }
}

/// Join stages shared by every detail query. Project and company joins are
/// unwound so each resolves to a single object or null.
pub(crate) fn detail_stages() -> Vec<Document> {
    vec![
        doc! {
            "$lookup": {
                "from": "projects",
                "localField": "project_id",
                "foreignField": "_id",
                "as": "project",
            }
        },
        doc! { "$unwind": { "path": "$project", "preserveNullAndEmptyArrays": true } },
        doc! {
            "$lookup": {
                "from": "companies",
                "localField": "company_id",
                "foreignField": "_id",
                "as": "company",
            }
        },
        doc! { "$unwind": { "path": "$company", "preserveNullAndEmptyArrays": true } },
        doc! {
            "$lookup": {
                "from": "observation_categories",
                "localField": "_id",
                "foreignField": "observation_id",
                "as": "links",
            }
        },
        doc! {
            "$lookup": {
                "from": "safety_categories",
                "localField": "links.category_id",
                "foreignField": "_id",
                "as": "linked_categories",
            }
        },
        doc! {
            "$lookup": {
                "from": "action_plans",
                "localField": "_id",
                "foreignField": "observation_id",
                "as": "linked_plans",
            }
        },
        doc! {
            "$project": {
                "_id": { "$toString": "$_id" },
                "project_id": { "$toString": "$project_id" },
                "company_id": { "$toString": "$company_id" },
                "project": named_ref("project"),
                "company": named_ref("company"),
                "submitter_name": 1,
                "date": 1,
                "time": 1,
                "location": 1,
                "department": 1,
                "description": 1,
                "subject": 1,
                "report_group": 1,
                "consequences": 1,
                "likelihood": 1,
                "status": 1,
                "supporting_image": 1,
                "created_by": { "$toString": "$created_by" },
                "created_at": timestamp_string("$created_at"),
                "updated_at": timestamp_string("$updated_at"),
                "categories": {
                    "$map": {
                        "input": "$linked_categories",
                        "as": "category",
                        "in": {
                            "_id": { "$toString": "$$category._id" },
                            "name": "$$category.name",
                            "icon": "$$category.icon",
                        }
                    }
                },
                "action_plans": {
                    "$map": {
                        "input": "$linked_plans",
                        "as": "plan",
                        "in": {
                            "_id": { "$toString": "$$plan._id" },
                            "observation_id": { "$toString": "$$plan.observation_id" },
                            "action": "$$plan.action",
                            "due_date": "$$plan.due_date",
                            "responsible_person": "$$plan.responsible_person",
                            "follow_up_contact": "$$plan.follow_up_contact",
                            "status": "$$plan.status",
                            "supporting_image": "$$plan.supporting_image",
                            "created_at": timestamp_string("$$plan.created_at"),
                        }
                    }
                },
            }
        },
    ]
}
