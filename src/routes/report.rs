use std::collections::HashMap;

use actix_multipart::form::MultipartForm;
use actix_web::{delete, get, patch, post, put, web, HttpRequest, HttpResponse};
use chrono::Utc;
use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};

use super::parse_id;
use crate::{
    error::{AppError, ValidationErrors},
    export::{self, images, ExportFormat},
    models::{
        company::Company,
        observation::{
            Observation, ObservationMultipartRequest, ObservationPatch, ObservationRequest,
            ValidObservation,
        },
        profile::{authenticated, require_admin, UserAuthentication},
        project::Project,
        report_listing::ListingQuery,
        safety_category::SafetyCategory,
    },
    storage::{Bucket, BucketStore, SIGNED_URL_TTL_SECS},
};

#[derive(Deserialize)]
pub struct SearchQuery {
    pub q: Option<String>,
}
#[derive(Deserialize)]
pub struct ExportQuery {
    pub format: Option<String>,
}
#[derive(Serialize)]
pub struct SignedImage {
    pub key: String,
    pub url: String,
}

/// Rejects references to projects, companies or categories that do not exist.
async fn ensure_references(valid: &ValidObservation) -> Result<(), AppError> {
    let mut errors = ValidationErrors::new();
    if Project::find_by_id(&valid.project_id).await?.is_none() {
        errors.add("project", "Project is invalid");
    }
    if Company::find_by_id(&valid.company_id).await?.is_none() {
        errors.add("company", "Company is invalid");
    }
    if SafetyCategory::count_existing(&valid.categories).await? != valid.categories.len() as u64 {
        errors.add("categories", "Safety category is invalid");
    }
    errors.into_result()
}

/// Only the submitter or an admin may change a stored report, and only an
/// admin once it is closed.
async fn editable(req: &HttpRequest, _id: &ObjectId) -> Result<UserAuthentication, AppError> {
    let issuer = authenticated(req)?;
    let observation = Observation::find_by_id(_id)
        .await?
        .ok_or(AppError::NotFound("REPORT_NOT_FOUND"))?;
    issuer.ensure_can_edit(&observation.created_by, observation.status)?;
    Ok(issuer)
}

#[post("/reports")]
pub async fn create_report(
    MultipartForm(form): MultipartForm<ObservationMultipartRequest>,
    store: web::Data<BucketStore>,
    req: HttpRequest,
) -> Result<HttpResponse, AppError> {
    let issuer = authenticated(&req)?;
    let valid = form.report.into_inner().validate()?;
    ensure_references(&valid).await?;

    let (mut observation, categories, plans) = valid.into_observation(issuer.user_id);

    let mut uploaded = None;
    if let Some(image) = form.image {
        let file_name = image.file_name.clone().unwrap_or_else(|| "image".to_string());
        let stored = store.upload_file(
            Bucket::SafetyImages,
            &file_name,
            None,
            image.file.path(),
            Utc::now().timestamp_millis(),
        )?;
        observation.supporting_image = Some(stored.path.clone());
        uploaded = Some(stored.path);
    }

    match observation.create(&categories, plans).await {
        Ok(_id) => Ok(HttpResponse::Created().body(_id.to_string())),
        Err(error) => {
            if let Some(path) = uploaded {
                if let Err(cleanup) = store.remove(Bucket::SafetyImages, &path) {
                    tracing::warn!(path = %path, error = %cleanup, "orphaned upload left behind");
                }
            }
            Err(error)
        }
    }
}

#[get("/reports")]
pub async fn get_reports(query: web::Query<ListingQuery>, req: HttpRequest) -> Result<HttpResponse, AppError> {
    let issuer = authenticated(&req)?;
    let page = query.fetch(&issuer).await?;
    Ok(HttpResponse::Ok().json(page))
}

#[get("/reports/mine")]
pub async fn get_my_reports(req: HttpRequest) -> Result<HttpResponse, AppError> {
    let issuer = authenticated(&req)?;
    let reports = Observation::find_by_creator(&issuer.user_id).await?;
    Ok(HttpResponse::Ok().json(reports))
}

#[get("/reports/export.csv")]
pub async fn export_reports(query: web::Query<ListingQuery>, req: HttpRequest) -> Result<HttpResponse, AppError> {
    authenticated(&req)?;
    let (_, details) = query.fetch_details().await?;
    let artifact = export::report::listing_export(&details, Utc::now())?;
    Ok(artifact.into_response())
}

#[get("/reports/search")]
pub async fn search_reports(query: web::Query<SearchQuery>, req: HttpRequest) -> Result<HttpResponse, AppError> {
    authenticated(&req)?;
    let q = query
        .q
        .as_deref()
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .ok_or(AppError::BadRequest("QUERY_REQUIRED"))?;
    let reports = Observation::search(q).await?;
    Ok(HttpResponse::Ok().json(reports))
}

#[get("/reports/{report_id}")]
pub async fn get_report(report_id: web::Path<String>, req: HttpRequest) -> Result<HttpResponse, AppError> {
    authenticated(&req)?;
    let report_id = parse_id(&report_id)?;

    match Observation::find_detail_by_id(&report_id).await? {
        Some(report) => Ok(HttpResponse::Ok().json(report)),
        None => Err(AppError::NotFound("REPORT_NOT_FOUND")),
    }
}

#[put("/reports/{report_id}")]
pub async fn update_report(
    report_id: web::Path<String>,
    payload: web::Json<ObservationRequest>,
    req: HttpRequest,
) -> Result<HttpResponse, AppError> {
    let report_id = parse_id(&report_id)?;
    let issuer = editable(&req, &report_id).await?;

    let valid = payload.into_inner().validate()?;
    ensure_references(&valid).await?;

    let _id = Observation::update(&report_id, valid, issuer.user_id).await?;
    Ok(HttpResponse::Ok().body(_id.to_string()))
}

#[patch("/reports/{report_id}")]
pub async fn patch_report(
    report_id: web::Path<String>,
    payload: web::Json<ObservationPatch>,
    req: HttpRequest,
) -> Result<HttpResponse, AppError> {
    let report_id = parse_id(&report_id)?;
    editable(&req, &report_id).await?;

    let _id = Observation::patch(&report_id, payload.into_inner()).await?;
    Ok(HttpResponse::Ok().body(_id.to_string()))
}

#[delete("/reports/{report_id}")]
pub async fn delete_report(report_id: web::Path<String>, req: HttpRequest) -> Result<HttpResponse, AppError> {
    require_admin(&req)?;
    let report_id = parse_id(&report_id)?;

    Observation::delete_by_id(&report_id).await?;
    Ok(HttpResponse::NoContent().finish())
}

#[get("/reports/{report_id}/images")]
pub async fn get_report_images(
    report_id: web::Path<String>,
    store: web::Data<BucketStore>,
    req: HttpRequest,
) -> Result<HttpResponse, AppError> {
    authenticated(&req)?;
    let report_id = parse_id(&report_id)?;
    let report = Observation::find_detail_by_id(&report_id)
        .await?
        .ok_or(AppError::NotFound("REPORT_NOT_FOUND"))?;

    let now = Utc::now().timestamp();
    let mut signed = Vec::new();
    for (key, source) in export::report::image_sources(&report) {
        let url = match source {
            images::ImageSource::Stored { bucket, path } => {
                store.signed_url(bucket, &path, now, SIGNED_URL_TTL_SECS)?
            }
            images::ImageSource::DataUri(url) | images::ImageSource::Remote(url) => url,
        };
        signed.push(SignedImage { key, url });
    }
    Ok(HttpResponse::Ok().json(signed))
}

#[get("/reports/{report_id}/export")]
pub async fn export_report(
    report_id: web::Path<String>,
    query: web::Query<ExportQuery>,
    store: web::Data<BucketStore>,
    client: web::Data<reqwest::Client>,
    req: HttpRequest,
) -> Result<HttpResponse, AppError> {
    authenticated(&req)?;
    let format = export::requested_format(query.format.as_deref())?;
    let report_id = parse_id(&report_id)?;
    let report = Observation::find_detail_by_id(&report_id)
        .await?
        .ok_or(AppError::NotFound("REPORT_NOT_FOUND"))?;

    let loaded = match format {
        ExportFormat::Pdf => {
            images::load_all(export::report::image_sources(&report), &client, &store).await
        }
        _ => HashMap::new(),
    };
    let artifact = export::report::export(&report, &loaded, Utc::now(), format)?;
    tracing::info!(report = %report_id, file = %artifact.file_name, "report exported");
    Ok(artifact.into_response())
}
