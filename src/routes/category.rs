use actix_web::{get, HttpRequest, HttpResponse};

use crate::{
    error::AppError,
    models::{
        profile::authenticated,
        safety_category::{SafetyCategory, SafetyCategoryResponse},
    },
};

#[get("/categories")]
pub async fn get_categories(req: HttpRequest) -> Result<HttpResponse, AppError> {
    authenticated(&req)?;
    let categories: Vec<SafetyCategoryResponse> = SafetyCategory::find_many()
        .await?
        .into_iter()
        .map(SafetyCategoryResponse::from)
        .collect();
    Ok(HttpResponse::Ok().json(categories))
}
