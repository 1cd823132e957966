use crate::{database::get_db, error::AppError, models::observation::Status};
use actix_service::{self, Transform};
use actix_web::{
    dev::{Service, ServiceRequest, ServiceResponse},
    Error, HttpMessage, HttpRequest,
};
use chrono::Utc;
use futures::{
    future::{ready, LocalBoxFuture, Ready},
    stream::TryStreamExt,
    FutureExt,
};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use mongodb::{
    bson::{doc, oid::ObjectId, DateTime},
    options::FindOptions,
    Collection,
};
use pwhash::bcrypt;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::{rc::Rc, sync::OnceLock};

const ISSUER: &str = "safety-observation-server";
const MIN_PASSWORD_LEN: usize = 8;

static KEYS: OnceLock<SessionKeys> = OnceLock::new();

struct SessionKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl_secs: i64,
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    #[default]
    Normal,
}

#[derive(Debug, Serialize, Deserialize)]
struct SessionClaims {
    sub: String,
    role: Role,
    iss: String,
    exp: i64,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Profile {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,
    pub username: String,
    pub password: String,
    pub role: Role,
    pub created_at: DateTime,
}
#[derive(Debug, Deserialize, Serialize)]
pub struct ProfileCredential {
    pub username: String,
    pub password: String,
}
#[derive(Debug, Deserialize, Serialize)]
pub struct ProfileRequest {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub role: Role,
}
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ProfileResponse {
    pub user_id: String,
    pub username: String,
    pub role: Role,
    pub created_at: String,
}
#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub token: String,
    pub user: ProfileResponse,
}
#[derive(Debug, Clone)]
pub struct UserAuthenticationData {
    pub user_id: ObjectId,
    pub username: String,
    pub role: Role,
}
pub struct UserAuthenticationMiddleware<S> {
    service: Rc<S>,
}
pub struct UserAuthenticationMiddlewareFactory;

pub type UserAuthentication = Rc<UserAuthenticationData>;

impl Role {
    pub fn toggled(&self) -> Self {
        match self {
            Self::Admin => Self::Normal,
            Self::Normal => Self::Admin,
        }
    }
}

impl UserAuthenticationData {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
    pub fn owns(&self, created_by: &ObjectId) -> bool {
        &self.user_id == created_by
    }
    /// Owners and admins may change a report and its action plans.
    pub fn can_modify(&self, created_by: &ObjectId) -> bool {
        self.is_admin() || self.owns(created_by)
    }
    /// Closed reports are frozen for their owners; admins can still correct
    /// or reopen them.
    pub fn ensure_can_edit(&self, created_by: &ObjectId, status: Status) -> Result<(), AppError> {
        if !self.can_modify(created_by) {
            Err(AppError::Forbidden("NOT_REPORT_OWNER"))
        } else if status == Status::Closed && !self.is_admin() {
            Err(AppError::Conflict("REPORT_CLOSED"))
        } else {
            Ok(())
        }
    }
    /// Admin user management never applies to the caller's own account.
    pub fn ensure_not_self(&self, target: &ObjectId) -> Result<(), AppError> {
        if &self.user_id == target {
            Err(AppError::Forbidden("CANNOT_MODIFY_SELF"))
        } else {
            Ok(())
        }
    }
}

impl From<Profile> for ProfileResponse {
    fn from(profile: Profile) -> Self {
        Self {
            user_id: profile._id.map(|id| id.to_hex()).unwrap_or_default(),
            username: profile.username,
            role: profile.role,
            created_at: profile
                .created_at
                .try_to_rfc3339_string()
                .unwrap_or_default(),
        }
    }
}

impl ProfileRequest {
    pub fn validate(&self) -> Result<(), AppError> {
        let username = Regex::new(r"^[A-Za-z0-9_.@\-]{3,64}$")
            .map_err(|error| AppError::Config(error.to_string()))?;
        if !username.is_match(self.username.trim()) {
            return Err(AppError::BadRequest("USER_MUST_HAVE_VALID_USERNAME"));
        }
        if self.password.len() < MIN_PASSWORD_LEN {
            return Err(AppError::BadRequest("USER_MUST_HAVE_VALID_PASSWORD"));
        }
        Ok(())
    }
}

impl Profile {
    fn collection() -> Result<Collection<Profile>, AppError> {
        Ok(get_db()?.collection::<Profile>("profiles"))
    }
    pub fn from_request(request: ProfileRequest) -> Self {
        Self {
            _id: None,
            username: request.username.trim().to_string(),
            password: request.password,
            role: request.role,
            created_at: DateTime::now(),
        }
    }
    pub async fn save(&mut self) -> Result<ObjectId, AppError> {
        if Self::find_by_username(&self.username).await?.is_some() {
            return Err(AppError::Conflict("USER_ALREADY_EXIST"));
        }
        self.password = bcrypt::hash(&self.password)
            .map_err(|_| AppError::Config("HASHING_FAILED".to_string()))?;
        let _id = ObjectId::new();
        self._id = Some(_id);

        Self::collection()?.insert_one(&*self, None).await?;
        tracing::info!(user = %_id, role = ?self.role, "profile created");
        Ok(_id)
    }
    pub async fn set_role(_id: &ObjectId, role: Role) -> Result<ObjectId, AppError> {
        let result = Self::collection()?
            .update_one(
                doc! { "_id": _id },
                doc! { "$set": { "role": mongodb::bson::to_bson(&role)? } },
                None,
            )
            .await?;
        if result.matched_count == 0 {
            return Err(AppError::NotFound("USER_NOT_FOUND"));
        }
        Ok(*_id)
    }
    pub async fn find_many() -> Result<Vec<ProfileResponse>, AppError> {
        let options = FindOptions::builder()
            .sort(doc! { "created_at": 1, "_id": 1 })
            .build();
        let cursor = Self::collection()?.find(None, options).await?;
        let profiles: Vec<Profile> = cursor.try_collect().await?;
        Ok(profiles.into_iter().map(ProfileResponse::from).collect())
    }
    pub async fn find_by_id(_id: &ObjectId) -> Result<Option<Profile>, AppError> {
        Ok(Self::collection()?.find_one(doc! { "_id": _id }, None).await?)
    }
    pub async fn find_by_username(username: &str) -> Result<Option<Profile>, AppError> {
        Ok(Self::collection()?
            .find_one(doc! { "username": username }, None)
            .await?)
    }
    pub async fn count() -> Result<u64, AppError> {
        Ok(Self::collection()?.count_documents(None, None).await?)
    }
    pub async fn delete_by_id(_id: &ObjectId) -> Result<u64, AppError> {
        let result = Self::collection()?
            .delete_one(doc! { "_id": _id }, None)
            .await?;
        if result.deleted_count == 0 {
            return Err(AppError::NotFound("USER_NOT_FOUND"));
        }
        Ok(result.deleted_count)
    }
}

impl ProfileCredential {
    pub async fn authenticate(&self) -> Result<SessionResponse, AppError> {
        let profile = Profile::find_by_username(self.username.trim())
            .await?
            .ok_or(AppError::Unauthorized)?;
        if !bcrypt::verify(&self.password, &profile.password) {
            return Err(AppError::Unauthorized);
        }
        let user_id = profile._id.ok_or(AppError::Unauthorized)?;
        let token = issue_token(&user_id, profile.role)?;
        Ok(SessionResponse {
            token,
            user: ProfileResponse::from(profile),
        })
    }
}

pub fn load_keys(secret: &str, ttl_secs: i64) -> Result<(), AppError> {
    KEYS.set(SessionKeys {
        encoding: EncodingKey::from_secret(secret.as_bytes()),
        decoding: DecodingKey::from_secret(secret.as_bytes()),
        ttl_secs,
    })
    .map_err(|_| AppError::Config("session keys loaded twice".to_string()))
}

fn keys() -> Result<&'static SessionKeys, AppError> {
    KEYS.get()
        .ok_or_else(|| AppError::Config("session keys are not loaded".to_string()))
}

pub fn issue_token(user_id: &ObjectId, role: Role) -> Result<String, AppError> {
    let keys = keys()?;
    let claims = SessionClaims {
        sub: user_id.to_hex(),
        role,
        iss: ISSUER.to_string(),
        exp: Utc::now().timestamp() + keys.ttl_secs,
    };
    Ok(encode(&Header::new(Algorithm::HS256), &claims, &keys.encoding)?)
}

pub fn verify_token(token: &str) -> Result<ObjectId, AppError> {
    let keys = keys()?;
    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_issuer(&[ISSUER]);
    let data = decode::<SessionClaims>(token, &keys.decoding, &validation)?;
    ObjectId::parse_str(&data.claims.sub).map_err(|_| AppError::Unauthorized)
}

pub fn authenticated(req: &HttpRequest) -> Result<UserAuthentication, AppError> {
    req.extensions()
        .get::<UserAuthentication>()
        .cloned()
        .ok_or(AppError::Unauthorized)
}

pub fn require_admin(req: &HttpRequest) -> Result<UserAuthentication, AppError> {
    let issuer = authenticated(req)?;
    if !issuer.is_admin() {
        return Err(AppError::Forbidden("ADMIN_ONLY"));
    }
    Ok(issuer)
}

impl<S, B> Service<ServiceRequest> for UserAuthenticationMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    actix_service::forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let srv: Rc<S> = self.service.clone();

        async move {
            let token = req
                .headers()
                .get("Authorization")
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.strip_prefix("Bearer "))
                .map(str::to_string);

            if let Some(token) = token {
                match verify_token(&token) {
                    Ok(user_id) => match Profile::find_by_id(&user_id).await {
                        Ok(Some(profile)) => {
                            let auth_data = UserAuthenticationData {
                                user_id,
                                username: profile.username,
                                role: profile.role,
                            };
                            req.extensions_mut()
                                .insert::<UserAuthentication>(Rc::new(auth_data));
                        }
                        Ok(None) => tracing::debug!(user = %user_id, "token for removed profile"),
                        Err(error) => tracing::warn!(error = %error, "profile lookup failed"),
                    },
                    Err(error) => tracing::debug!(error = %error, "rejected session token"),
                }
            }
            let res: ServiceResponse<B> = srv.call(req).await?;
            Ok(res)
        }
        .boxed_local()
    }
}
impl<S, B> Transform<S, ServiceRequest> for UserAuthenticationMiddlewareFactory
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Transform = UserAuthenticationMiddleware<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(UserAuthenticationMiddleware {
            service: Rc::new(service),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn viewer(role: Role) -> UserAuthenticationData {
        UserAuthenticationData {
            user_id: ObjectId::new(),
            username: "inspector".to_string(),
            role,
        }
    }

    #[test]
    fn owner_and_admin_may_modify() {
        let owner = viewer(Role::Normal);
        let admin = viewer(Role::Admin);
        let stranger = viewer(Role::Normal);

        assert!(owner.can_modify(&owner.user_id));
        assert!(admin.can_modify(&owner.user_id));
        assert!(!stranger.can_modify(&owner.user_id));
    }

    #[test]
    fn closed_reports_are_frozen_for_owners() {
        let owner = viewer(Role::Normal);
        let admin = viewer(Role::Admin);
        let stranger = viewer(Role::Normal);

        assert!(owner.ensure_can_edit(&owner.user_id, Status::Open).is_ok());
        assert!(matches!(
            owner.ensure_can_edit(&owner.user_id, Status::Closed),
            Err(AppError::Conflict("REPORT_CLOSED"))
        ));
        assert!(admin.ensure_can_edit(&owner.user_id, Status::Closed).is_ok());
        assert!(matches!(
            stranger.ensure_can_edit(&owner.user_id, Status::Closed),
            Err(AppError::Forbidden("NOT_REPORT_OWNER"))
        ));
    }

    #[test]
    fn self_modification_is_rejected() {
        let admin = viewer(Role::Admin);
        assert!(matches!(
            admin.ensure_not_self(&admin.user_id),
            Err(AppError::Forbidden("CANNOT_MODIFY_SELF"))
        ));
        assert!(admin.ensure_not_self(&ObjectId::new()).is_ok());
    }

    #[test]
    fn role_toggles_between_admin_and_normal() {
        assert_eq!(Role::Admin.toggled(), Role::Normal);
        assert_eq!(Role::Normal.toggled(), Role::Admin);
        assert_eq!(Role::default(), Role::Normal);
    }

    #[test]
    fn profile_request_rules() {
        let short = ProfileRequest {
            username: "operator".to_string(),
            password: "short".to_string(),
            role: Role::Normal,
        };
        assert!(matches!(
            short.validate(),
            Err(AppError::BadRequest("USER_MUST_HAVE_VALID_PASSWORD"))
        ));

        let spaced = ProfileRequest {
            username: "bad name".to_string(),
            password: "long-enough".to_string(),
            role: Role::Normal,
        };
        assert!(matches!(
            spaced.validate(),
            Err(AppError::BadRequest("USER_MUST_HAVE_VALID_USERNAME"))
        ));

        let fine = ProfileRequest {
            username: "j.doe@site".to_string(),
            password: "long-enough".to_string(),
            role: Role::Admin,
        };
        assert!(fine.validate().is_ok());
    }

    #[test]
    fn issued_token_verifies_to_same_user() {
        // Other tests in this binary may load the keys first; either way they exist.
        let _ = load_keys("unit-test-secret", 3600);
        let user_id = ObjectId::new();

        let token = issue_token(&user_id, Role::Admin).unwrap();
        assert_eq!(verify_token(&token).unwrap(), user_id);
        assert!(verify_token("not-a-token").is_err());
    }
}
