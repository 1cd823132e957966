use actix_web::{delete, get, post, put, web, HttpRequest, HttpResponse};

use super::parse_id;
use crate::{
    error::AppError,
    models::{
        project::{Project, ProjectRequest},
        profile::{authenticated, require_admin},
    },
};

#[get("/projects")]
pub async fn get_projects(req: HttpRequest) -> Result<HttpResponse, AppError> {
    authenticated(&req)?;
    Ok(HttpResponse::Ok().json(Project::find_many().await?))
}
#[get("/admin/projects")]
pub async fn get_admin_projects(req: HttpRequest) -> Result<HttpResponse, AppError> {
    require_admin(&req)?;
    Ok(HttpResponse::Ok().json(Project::find_many().await?))
}
#[post("/admin/projects")]
pub async fn create_project(payload: web::Json<ProjectRequest>, req: HttpRequest) -> Result<HttpResponse, AppError> {
    require_admin(&req)?;

    let mut project = Project {
        _id: None,
        name: payload.name()?,
    };
    let _id = project.save().await?;
    Ok(HttpResponse::Created().body(_id.to_string()))
}
#[put("/admin/projects/{project_id}")]
pub async fn update_project(
    project_id: web::Path<String>,
    payload: web::Json<ProjectRequest>,
    req: HttpRequest,
) -> Result<HttpResponse, AppError> {
    require_admin(&req)?;
    let project_id = parse_id(&project_id)?;

    let _id = Project::rename(&project_id, &payload.name()?).await?;
    Ok(HttpResponse::Ok().body(_id.to_string()))
}
#[delete("/admin/projects/{project_id}")]
pub async fn delete_project(project_id: web::Path<String>, req: HttpRequest) -> Result<HttpResponse, AppError> {
    require_admin(&req)?;
    let project_id = parse_id(&project_id)?;

    Project::delete_by_id(&project_id).await?;
    tracing::info!(project = %project_id, "project deleted");
    Ok(HttpResponse::NoContent().finish())
}
