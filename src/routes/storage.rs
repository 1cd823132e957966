use actix_multipart::form::MultipartForm;
use actix_web::{get, post, web, HttpRequest, HttpResponse};
use chrono::Utc;
use mime_guess::from_path;
use serde::Deserialize;

use crate::{
    error::AppError,
    models::profile::authenticated,
    storage::{Bucket, BucketStore, UploadMultipartRequest},
};

#[derive(Deserialize)]
pub struct SignedQuery {
    pub expires: Option<i64>,
    pub signature: Option<String>,
}

impl SignedQuery {
    /// Public buckets need no signature; private ones need a valid, unexpired one.
    pub fn permits(&self, store: &BucketStore, bucket: Bucket, path: &str, now: i64) -> bool {
        match (self.expires, self.signature.as_deref()) {
            (Some(expires), Some(signature)) => {
                store.verify_signature(bucket, path, expires, signature, now)
            }
            (None, None) => bucket.is_public(),
            _ => false,
        }
    }
}

#[post("/uploads/{bucket}")]
pub async fn upload_file(
    bucket: web::Path<String>,
    MultipartForm(form): MultipartForm<UploadMultipartRequest>,
    store: web::Data<BucketStore>,
    req: HttpRequest,
) -> Result<HttpResponse, AppError> {
    let issuer = authenticated(&req)?;
    let bucket: Bucket = bucket.parse()?;

    let owner = match bucket {
        Bucket::ActionPlanImages => Some(&issuer.user_id),
        Bucket::SafetyImages => None,
    };
    let file_name = form.file.file_name.clone().unwrap_or_default();
    let stored = store.upload_file(
        bucket,
        &file_name,
        owner,
        form.file.file.path(),
        Utc::now().timestamp_millis(),
    )?;
    Ok(HttpResponse::Created().json(stored))
}

#[get("/storage/{bucket}/{path:.*}")]
pub async fn get_file(
    params: web::Path<(String, String)>,
    query: web::Query<SignedQuery>,
    store: web::Data<BucketStore>,
) -> Result<HttpResponse, AppError> {
    let (bucket, path) = params.into_inner();
    let bucket: Bucket = bucket.parse()?;

    if !query.permits(&store, bucket, &path, Utc::now().timestamp()) {
        return Err(AppError::Forbidden("INVALID_SIGNATURE"));
    }

    let file = store.download(bucket, &path)?;
    let mime = from_path(&path).first_or_octet_stream();
    Ok(HttpResponse::Ok().content_type(mime).body(file))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::testing::{put, temp_store};
    use actix_web::{http::StatusCode, test::{call_service, init_service, TestRequest}, App};

    /// Path and query of an absolute URL handed out by the store.
    fn local(url: &str) -> &str {
        url.trim_start_matches("http://localhost:8000")
    }

    #[actix_web::test]
    async fn report_images_load_from_their_public_url() {
        let (_root, store) = temp_store();
        let stored = put(&store, Bucket::SafetyImages, "hazard.png", b"png", 7);
        let app = init_service(App::new().app_data(web::Data::new(store.clone())).service(get_file)).await;

        let res = call_service(&app, TestRequest::get().uri(local(&stored.url)).to_request()).await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.headers().get("content-type").unwrap(), "image/png");
    }

    #[actix_web::test]
    async fn action_plan_images_need_a_valid_signature() {
        let (_root, store) = temp_store();
        let now = Utc::now().timestamp();
        let stored = put(&store, Bucket::ActionPlanImages, "fix.jpg", b"jpg", now * 1000);
        let app = init_service(App::new().app_data(web::Data::new(store.clone())).service(get_file)).await;

        let signed = call_service(&app, TestRequest::get().uri(local(&stored.url)).to_request()).await;
        assert_eq!(signed.status(), StatusCode::OK);

        let unsigned = TestRequest::get()
            .uri(local(&store.public_url(Bucket::ActionPlanImages, &stored.path)))
            .to_request();
        assert_eq!(call_service(&app, unsigned).await.status(), StatusCode::FORBIDDEN);

        let forged = TestRequest::get()
            .uri(&format!(
                "/storage/action-plan-images/{}?expires={}&signature=00",
                stored.path,
                now + 60
            ))
            .to_request();
        assert_eq!(call_service(&app, forged).await.status(), StatusCode::FORBIDDEN);
    }
}
