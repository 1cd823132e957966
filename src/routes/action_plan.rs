use actix_web::{delete, post, put, web, HttpRequest, HttpResponse};
use mongodb::bson::oid::ObjectId;

use super::parse_id;
use crate::{
    error::AppError,
    models::{
        action_plan::{ActionPlan, ActionPlanRequest},
        observation::{Observation, MAX_ACTION_PLANS},
        profile::{authenticated, UserAuthentication},
    },
};

/// Resolves the parent observation and checks the caller may still edit it.
async fn parent_owner(req: &HttpRequest, observation_id: &ObjectId) -> Result<UserAuthentication, AppError> {
    let issuer = authenticated(req)?;
    let observation = Observation::find_by_id(observation_id)
        .await?
        .ok_or(AppError::NotFound("REPORT_NOT_FOUND"))?;
    issuer.ensure_can_edit(&observation.created_by, observation.status)?;
    Ok(issuer)
}

async fn plan_owner(req: &HttpRequest, plan_id: &ObjectId) -> Result<ActionPlan, AppError> {
    let plan = ActionPlan::find_by_id(plan_id)
        .await?
        .ok_or(AppError::NotFound("ACTION_PLAN_NOT_FOUND"))?;
    parent_owner(req, &plan.observation_id).await?;
    Ok(plan)
}

#[post("/reports/{report_id}/action-plans")]
pub async fn create_action_plan(
    report_id: web::Path<String>,
    payload: web::Json<ActionPlanRequest>,
    req: HttpRequest,
) -> Result<HttpResponse, AppError> {
    let report_id = parse_id(&report_id)?;
    let issuer = parent_owner(&req, &report_id).await?;

    if ActionPlan::count_by_observation(&report_id).await? >= MAX_ACTION_PLANS as u64 {
        return Err(AppError::Conflict("ACTION_PLAN_LIMIT_REACHED"));
    }

    let mut valid = payload.into_inner().validate_single()?;
    valid._id = None;
    let plan = valid.into_action_plan(report_id, issuer.user_id);
    let _id = plan.save().await?;

    tracing::info!(observation = %report_id, plan = %_id, "action plan added");
    Ok(HttpResponse::Created().body(_id.to_string()))
}

#[put("/action-plans/{plan_id}")]
pub async fn update_action_plan(
    plan_id: web::Path<String>,
    payload: web::Json<ActionPlanRequest>,
    req: HttpRequest,
) -> Result<HttpResponse, AppError> {
    let plan_id = parse_id(&plan_id)?;
    plan_owner(&req, &plan_id).await?;

    let valid = payload.into_inner().validate_single()?;
    let _id = ActionPlan::update(&plan_id, &valid).await?;
    Ok(HttpResponse::Ok().body(_id.to_string()))
}

#[delete("/action-plans/{plan_id}")]
pub async fn delete_action_plan(plan_id: web::Path<String>, req: HttpRequest) -> Result<HttpResponse, AppError> {
    let plan_id = parse_id(&plan_id)?;
    plan_owner(&req, &plan_id).await?;

    ActionPlan::delete_by_id(&plan_id).await?;
    Ok(HttpResponse::NoContent().finish())
}
