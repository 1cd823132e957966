use actix_web::{get, HttpResponse};
use mongodb::bson::oid::ObjectId;

use crate::error::AppError;

pub mod action_plan;
pub mod category;
pub mod company;
pub mod project;
pub mod report;
pub mod stats;
pub mod storage;
pub mod user;

pub fn parse_id(value: &str) -> Result<ObjectId, AppError> {
    value.parse().map_err(|_| AppError::BadRequest("INVALID_ID"))
}

#[get("/health")]
pub async fn health() -> HttpResponse {
    HttpResponse::Ok().body("OK")
}
