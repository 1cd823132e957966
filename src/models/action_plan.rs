use crate::{
    database::get_db,
    error::{AppError, ValidationErrors},
};
use chrono::NaiveDate;
use mongodb::{
    bson::{doc, oid::ObjectId, to_bson, DateTime},
    ClientSession, Collection,
};
use serde::{Deserialize, Serialize};

use super::observation::{parse_date, parse_kind, parse_text, Status};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ActionPlan {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,
    pub observation_id: ObjectId,
    pub action: String,
    pub due_date: NaiveDate,
    pub responsible_person: String,
    pub follow_up_contact: String,
    pub status: Status,
    pub supporting_image: Option<String>,
    pub created_by: ObjectId,
    pub created_at: DateTime,
}
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ActionPlanRequest {
    pub _id: Option<String>,
    pub action: Option<String>,
    pub due_date: Option<String>,
    pub responsible_person: Option<String>,
    pub follow_up_contact: Option<String>,
    pub status: Option<String>,
    pub supporting_image: Option<String>,
}
#[derive(Debug, Clone, PartialEq)]
pub struct ValidActionPlan {
    pub _id: Option<ObjectId>,
    pub action: String,
    pub due_date: NaiveDate,
    pub responsible_person: String,
    pub follow_up_contact: String,
    pub status: Status,
    pub supporting_image: Option<String>,
}
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ActionPlanResponse {
    pub _id: String,
    pub observation_id: String,
    pub action: String,
    pub due_date: NaiveDate,
    pub responsible_person: String,
    pub follow_up_contact: String,
    pub status: Status,
    #[serde(default)]
    pub supporting_image: Option<String>,
    #[serde(default)]
    pub created_at: String,
}

/// A plan's displayed status is closed whenever its observation is closed.
pub fn effective_status(parent: Status, own: Status) -> Status {
    match parent {
        Status::Closed => Status::Closed,
        Status::Open => own,
    }
}

impl ActionPlanRequest {
    /// Validates one plan; field errors are keyed `action_plans[<index>].<field>`.
    pub fn validate(self, index: usize, errors: &mut ValidationErrors) -> Option<ValidActionPlan> {
        let key = |field: &str| format!("action_plans[{index}].{field}");

        let _id = match self._id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => match ObjectId::parse_str(id) {
                Ok(id) => Some(id),
                Err(_) => {
                    errors.add(key("_id"), "Action plan id is invalid");
                    return None;
                }
            },
            _ => None,
        };
        let action = parse_text(errors, &key("action"), "Action", self.action.as_deref());
        let due_date = parse_date(errors, &key("due_date"), "Due date", self.due_date.as_deref());
        let responsible_person = parse_text(
            errors,
            &key("responsible_person"),
            "Responsible person",
            self.responsible_person.as_deref(),
        );
        let follow_up_contact = parse_text(
            errors,
            &key("follow_up_contact"),
            "Follow-up contact",
            self.follow_up_contact.as_deref(),
        );
        let status = match self.status.as_deref() {
            None => Some(Status::Open),
            status => parse_kind(errors, &key("status"), "Status", status),
        };

        Some(ValidActionPlan {
            _id,
            action: action?,
            due_date: due_date?,
            responsible_person: responsible_person?,
            follow_up_contact: follow_up_contact?,
            status: status?,
            supporting_image: self
                .supporting_image
                .map(|image| image.trim().to_string())
                .filter(|image| !image.is_empty()),
        })
    }

    pub fn validate_single(self) -> Result<ValidActionPlan, AppError> {
        let mut errors = ValidationErrors::new();
        match self.validate(0, &mut errors) {
            Some(plan) if errors.is_empty() => Ok(plan),
            _ => Err(AppError::Validation(errors)),
        }
    }
}

impl ValidActionPlan {
    pub fn into_action_plan(self, observation_id: ObjectId, created_by: ObjectId) -> ActionPlan {
        ActionPlan {
            _id: Some(self._id.unwrap_or_else(ObjectId::new)),
            observation_id,
            action: self.action,
            due_date: self.due_date,
            responsible_person: self.responsible_person,
            follow_up_contact: self.follow_up_contact,
            status: self.status,
            supporting_image: self.supporting_image,
            created_by,
            created_at: DateTime::now(),
        }
    }
    fn fields_document(&self) -> Result<mongodb::bson::Document, AppError> {
        Ok(doc! {
            "action": &self.action,
            "due_date": self.due_date.to_string(),
            "responsible_person": &self.responsible_person,
            "follow_up_contact": &self.follow_up_contact,
            "status": self.status.as_str(),
            "supporting_image": to_bson(&self.supporting_image)?,
        })
    }
}

impl ActionPlan {
    fn collection() -> Result<Collection<ActionPlan>, AppError> {
        Ok(get_db()?.collection::<ActionPlan>("action_plans"))
    }
    pub async fn save(&self) -> Result<ObjectId, AppError> {
        let _id = self._id.ok_or(AppError::BadRequest("INVALID_ID"))?;
        Self::collection()?.insert_one(self, None).await?;
        Ok(_id)
    }
    pub async fn update(_id: &ObjectId, plan: &ValidActionPlan) -> Result<ObjectId, AppError> {
        let result = Self::collection()?
            .update_one(doc! { "_id": _id }, doc! { "$set": plan.fields_document()? }, None)
            .await?;
        if result.matched_count == 0 {
            return Err(AppError::NotFound("ACTION_PLAN_NOT_FOUND"));
        }
        Ok(*_id)
    }
    pub async fn find_by_id(_id: &ObjectId) -> Result<Option<ActionPlan>, AppError> {
        Ok(Self::collection()?.find_one(doc! { "_id": _id }, None).await?)
    }
    pub async fn count_by_observation(observation_id: &ObjectId) -> Result<u64, AppError> {
        Ok(Self::collection()?
            .count_documents(doc! { "observation_id": observation_id }, None)
            .await?)
    }
    pub async fn delete_by_id(_id: &ObjectId) -> Result<u64, AppError> {
        let result = Self::collection()?
            .delete_one(doc! { "_id": _id }, None)
            .await?;
        if result.deleted_count == 0 {
            return Err(AppError::NotFound("ACTION_PLAN_NOT_FOUND"));
        }
        Ok(result.deleted_count)
    }
    pub async fn insert_many_with_session(
        session: &mut ClientSession,
        plans: &[ActionPlan],
    ) -> Result<(), AppError> {
        if plans.is_empty() {
            return Ok(());
        }
        Self::collection()?
            .insert_many_with_session(plans, None, session)
            .await?;
        Ok(())
    }
    /// Updates a plan that belongs to `observation_id`, or inserts it when it
    /// has no id yet.
    pub async fn upsert_with_session(
        session: &mut ClientSession,
        observation_id: &ObjectId,
        created_by: ObjectId,
        plan: ValidActionPlan,
    ) -> Result<(), AppError> {
        match plan._id {
            Some(_id) => {
                let result = Self::collection()?
                    .update_one_with_session(
                        doc! { "_id": _id, "observation_id": observation_id },
                        doc! { "$set": plan.fields_document()? },
                        None,
                        session,
                    )
                    .await?;
                if result.matched_count == 0 {
                    return Err(AppError::NotFound("ACTION_PLAN_NOT_FOUND"));
                }
            }
            None => {
                let plan = plan.into_action_plan(*observation_id, created_by);
                Self::collection()?
                    .insert_one_with_session(&plan, None, session)
                    .await?;
            }
        }
        Ok(())
    }
    pub async fn delete_queued_with_session(
        session: &mut ClientSession,
        observation_id: &ObjectId,
        ids: &[ObjectId],
    ) -> Result<u64, AppError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let result = Self::collection()?
            .delete_many_with_session(
                doc! { "_id": { "$in": ids }, "observation_id": observation_id },
                None,
                session,
            )
            .await?;
        Ok(result.deleted_count)
    }
    pub async fn delete_by_observation_with_session(
        session: &mut ClientSession,
        observation_id: &ObjectId,
    ) -> Result<u64, AppError> {
        let result = Self::collection()?
            .delete_many_with_session(doc! { "observation_id": observation_id }, None, session)
            .await?;
        Ok(result.deleted_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> ActionPlanRequest {
        ActionPlanRequest {
            action: Some("Install guard rail".to_string()),
            due_date: Some("2024-07-01".to_string()),
            responsible_person: Some("Site supervisor".to_string()),
            follow_up_contact: Some("hse@example.com".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn closed_parent_forces_closed_plan() {
        assert_eq!(effective_status(Status::Closed, Status::Open), Status::Closed);
        assert_eq!(effective_status(Status::Open, Status::Open), Status::Open);
        assert_eq!(effective_status(Status::Open, Status::Closed), Status::Closed);
    }

    #[test]
    fn plan_defaults_to_open() {
        let plan = request().validate_single().unwrap();
        assert_eq!(plan.status, Status::Open);
        assert!(plan._id.is_none());
        assert!(plan.supporting_image.is_none());
    }

    #[test]
    fn plan_errors_are_keyed_by_index() {
        let mut errors = ValidationErrors::new();
        let plan = ActionPlanRequest {
            action: Some("Replace hose".to_string()),
            ..Default::default()
        }
        .validate(3, &mut errors);

        assert!(plan.is_none());
        assert!(errors.contains("action_plans[3].due_date"));
        assert!(errors.contains("action_plans[3].responsible_person"));
        assert!(errors.contains("action_plans[3].follow_up_contact"));
        assert!(!errors.contains("action_plans[3].action"));
    }

    #[test]
    fn plan_status_accepts_capitalised_values() {
        let mut request = request();
        request.status = Some("Closed".to_string());
        assert_eq!(request.validate_single().unwrap().status, Status::Closed);
    }

    #[test]
    fn new_plan_gets_fresh_id_and_owner() {
        let observation = ObjectId::new();
        let owner = ObjectId::new();
        let plan = request().validate_single().unwrap().into_action_plan(observation, owner);

        assert!(plan._id.is_some());
        assert_eq!(plan.observation_id, observation);
        assert_eq!(plan.created_by, owner);
    }
}
