use actix_web::{delete, get, post, put, web, HttpRequest, HttpResponse};

use super::parse_id;
use crate::{
    error::AppError,
    models::{
        company::{Company, CompanyRequest},
        profile::{authenticated, require_admin},
    },
};

#[get("/companies")]
pub async fn get_companies(req: HttpRequest) -> Result<HttpResponse, AppError> {
    authenticated(&req)?;
    Ok(HttpResponse::Ok().json(Company::find_many().await?))
}
#[get("/admin/companies")]
pub async fn get_admin_companies(req: HttpRequest) -> Result<HttpResponse, AppError> {
    require_admin(&req)?;
    Ok(HttpResponse::Ok().json(Company::find_many().await?))
}
#[post("/admin/companies")]
pub async fn create_company(payload: web::Json<CompanyRequest>, req: HttpRequest) -> Result<HttpResponse, AppError> {
    require_admin(&req)?;

    let mut company = Company {
        _id: None,
        name: payload.name()?,
    };
    let _id = company.save().await?;
    Ok(HttpResponse::Created().body(_id.to_string()))
}
#[put("/admin/companies/{company_id}")]
pub async fn update_company(
    company_id: web::Path<String>,
    payload: web::Json<CompanyRequest>,
    req: HttpRequest,
) -> Result<HttpResponse, AppError> {
    require_admin(&req)?;
    let company_id = parse_id(&company_id)?;

    let _id = Company::rename(&company_id, &payload.name()?).await?;
    Ok(HttpResponse::Ok().body(_id.to_string()))
}
#[delete("/admin/companies/{company_id}")]
pub async fn delete_company(company_id: web::Path<String>, req: HttpRequest) -> Result<HttpResponse, AppError> {
    require_admin(&req)?;
    let company_id = parse_id(&company_id)?;

    Company::delete_by_id(&company_id).await?;
    tracing::info!(company = %company_id, "company deleted");
    Ok(HttpResponse::NoContent().finish())
}
