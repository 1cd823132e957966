use actix_web::{delete, get, post, put, web, HttpRequest, HttpResponse};

use super::parse_id;
use crate::{
    config::Config,
    error::AppError,
    models::profile::{
        authenticated, require_admin, Profile, ProfileCredential, ProfileRequest, ProfileResponse, Role,
    },
};

pub const SERVICE_KEY_HEADER: &str = "X-Service-Key";

/// The bootstrap endpoint is closed unless a service key is configured and
/// the caller presents exactly that key.
pub fn service_key_matches(configured: Option<&str>, presented: Option<&str>) -> bool {
    match (configured, presented) {
        (Some(configured), Some(presented)) => !configured.is_empty() && configured == presented,
        _ => false,
    }
}

#[post("/login")]
pub async fn login(payload: web::Json<ProfileCredential>) -> Result<HttpResponse, AppError> {
    let session = payload.authenticate().await?;
    tracing::info!(user = %session.user.user_id, "session issued");
    Ok(HttpResponse::Ok().json(session))
}

#[get("/me")]
pub async fn get_me(req: HttpRequest) -> Result<HttpResponse, AppError> {
    let issuer = authenticated(&req)?;
    match Profile::find_by_id(&issuer.user_id).await? {
        Some(profile) => Ok(HttpResponse::Ok().json(ProfileResponse::from(profile))),
        None => Err(AppError::NotFound("USER_NOT_FOUND")),
    }
}

#[get("/admin/users")]
pub async fn get_users(req: HttpRequest) -> Result<HttpResponse, AppError> {
    require_admin(&req)?;
    Ok(HttpResponse::Ok().json(Profile::find_many().await?))
}

#[post("/admin/users")]
pub async fn create_user(payload: web::Json<ProfileRequest>, req: HttpRequest) -> Result<HttpResponse, AppError> {
    require_admin(&req)?;
    let payload = payload.into_inner();
    payload.validate()?;

    let mut profile = Profile::from_request(payload);
    let _id = profile.save().await?;
    Ok(HttpResponse::Created().body(_id.to_string()))
}

#[post("/admin/users/bootstrap")]
pub async fn bootstrap_user(
    payload: web::Json<ProfileRequest>,
    config: web::Data<Config>,
    req: HttpRequest,
) -> Result<HttpResponse, AppError> {
    let presented = req
        .headers()
        .get(SERVICE_KEY_HEADER)
        .and_then(|value| value.to_str().ok());
    if !service_key_matches(config.service_key.as_deref(), presented) {
        return Err(AppError::Unauthorized);
    }
    if Profile::count().await? > 0 {
        return Err(AppError::Conflict("ALREADY_BOOTSTRAPPED"));
    }

    let mut payload = payload.into_inner();
    payload.validate()?;
    payload.role = Role::Admin;

    let mut profile = Profile::from_request(payload);
    let _id = profile.save().await?;
    tracing::warn!(user = %_id, "first admin created through bootstrap");
    Ok(HttpResponse::Created().body(_id.to_string()))
}

#[put("/admin/users/{user_id}/role")]
pub async fn toggle_user_role(user_id: web::Path<String>, req: HttpRequest) -> Result<HttpResponse, AppError> {
    let issuer = require_admin(&req)?;
    let user_id = parse_id(&user_id)?;
    issuer.ensure_not_self(&user_id)?;

    let profile = Profile::find_by_id(&user_id)
        .await?
        .ok_or(AppError::NotFound("USER_NOT_FOUND"))?;
    let role = profile.role.toggled();
    Profile::set_role(&user_id, role).await?;

    tracing::info!(user = %user_id, role = ?role, "role changed");
    Ok(HttpResponse::Ok().json(role))
}

#[delete("/admin/users/{user_id}")]
pub async fn delete_user(user_id: web::Path<String>, req: HttpRequest) -> Result<HttpResponse, AppError> {
    let issuer = require_admin(&req)?;
    let user_id = parse_id(&user_id)?;
    issuer.ensure_not_self(&user_id)?;

    Profile::delete_by_id(&user_id).await?;
    Ok(HttpResponse::NoContent().finish())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bootstrap_needs_configured_key() {
        assert!(service_key_matches(Some("s3cret"), Some("s3cret")));
        assert!(!service_key_matches(Some("s3cret"), Some("guess")));
        assert!(!service_key_matches(Some("s3cret"), None));
        assert!(!service_key_matches(None, Some("")));
        assert!(!service_key_matches(Some(""), Some("")));
    }
}
