//! Bucket-addressed file store on the local filesystem.
//!
//! Objects live under `<root>/<bucket>/<path>`. Clients receive either a
//! public URL or a signed one carrying `expires` and an HMAC-SHA256
//! `signature` over `bucket/path/expires`.

use std::{
    fs::{copy, create_dir_all, read, remove_file, rename},
    path::{Component, Path, PathBuf},
    str::FromStr,
};

use actix_multipart::form::{tempfile::TempFile, MultipartForm};
use hmac::{Hmac, Mac};
use mongodb::bson::oid::ObjectId;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::AppError;

pub const SIGNED_URL_TTL_SECS: i64 = 3600;

type HmacSha256 = Hmac<Sha256>;

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Bucket {
    SafetyImages,
    ActionPlanImages,
}

impl Bucket {
    /// Report images are linked from stored records and readable without a
    /// signature; action plan images are only served through signed URLs.
    pub fn is_public(&self) -> bool {
        matches!(self, Self::SafetyImages)
    }
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SafetyImages => "safety-images",
            Self::ActionPlanImages => "action-plan-images",
        }
    }
}

impl FromStr for Bucket {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "safety-images" => Ok(Self::SafetyImages),
            "action-plan-images" => Ok(Self::ActionPlanImages),
            _ => Err(AppError::NotFound("BUCKET_NOT_FOUND")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BucketStore {
    root: PathBuf,
    public_url: String,
    secret: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct StoredObject {
    pub bucket: Bucket,
    pub path: String,
    pub url: String,
}

#[derive(Debug, MultipartForm)]
pub struct UploadMultipartRequest {
    #[multipart(rename = "file")]
    pub file: TempFile,
}

/// Replaces anything outside `[A-Za-z0-9._-]` so uploaded names cannot
/// escape their bucket or break URLs.
pub fn sanitize_file_name(name: &str) -> String {
    let cleaned = match Regex::new(r"[^A-Za-z0-9._\-]") {
        Ok(pattern) => pattern.replace_all(name.trim(), "_").into_owned(),
        Err(_) => String::new(),
    };
    let cleaned = cleaned.trim_start_matches('.').to_string();
    if cleaned.is_empty() {
        "file".to_string()
    } else {
        cleaned
    }
}

/// `<millis>-<name>`, optionally nested under the owner's id.
pub fn object_key(millis: i64, file_name: &str, owner: Option<&ObjectId>) -> String {
    let name = format!("{millis}-{}", sanitize_file_name(file_name));
    match owner {
        Some(owner) => format!("{}/{name}", owner.to_hex()),
        None => name,
    }
}

/// Strips leading slashes and rejects any path that is empty or leaves the
/// bucket.
pub fn normalize_path(path: &str) -> Result<String, AppError> {
    let trimmed = path.trim().trim_start_matches('/');
    if trimmed.is_empty() {
        return Err(AppError::BadRequest("INVALID_STORAGE_PATH"));
    }
    let escapes = Path::new(trimmed)
        .components()
        .any(|component| !matches!(component, Component::Normal(_)));
    if escapes {
        return Err(AppError::BadRequest("INVALID_STORAGE_PATH"));
    }
    Ok(trimmed.to_string())
}

impl BucketStore {
    pub fn new(root: impl Into<PathBuf>, public_url: &str, secret: &str) -> Self {
        Self {
            root: root.into(),
            public_url: public_url.trim_end_matches('/').to_string(),
            secret: secret.as_bytes().to_vec(),
        }
    }

    fn location(&self, bucket: Bucket, path: &str) -> Result<(String, PathBuf), AppError> {
        let path = normalize_path(path)?;
        let location = self.root.join(bucket.as_str()).join(&path);
        Ok((path, location))
    }

    fn prepare(&self, bucket: Bucket, key: &str) -> Result<(String, PathBuf), AppError> {
        let (path, location) = self.location(bucket, key)?;
        if let Some(parent) = location.parent() {
            create_dir_all(parent)?;
        }
        Ok((path, location))
    }

    /// Moves an already written temporary file into the bucket.
    pub fn upload_file(
        &self,
        bucket: Bucket,
        file_name: &str,
        owner: Option<&ObjectId>,
        source: &Path,
        millis: i64,
    ) -> Result<StoredObject, AppError> {
        let (path, location) = self.prepare(bucket, &object_key(millis, file_name, owner))?;
        if rename(source, &location).is_err() {
            copy(source, &location)?;
        }
        tracing::info!(bucket = bucket.as_str(), path = %path, "object stored");
        Ok(StoredObject {
            bucket,
            url: self.url_for(bucket, &path, millis / 1000)?,
            path,
        })
    }

    /// Public URL for public buckets, a signed one otherwise.
    pub fn url_for(&self, bucket: Bucket, path: &str, now: i64) -> Result<String, AppError> {
        if bucket.is_public() {
            Ok(self.public_url(bucket, path))
        } else {
            self.signed_url(bucket, path, now, SIGNED_URL_TTL_SECS)
        }
    }

    pub fn download(&self, bucket: Bucket, path: &str) -> Result<Vec<u8>, AppError> {
        let (_, location) = self.location(bucket, path)?;
        match read(&location) {
            Ok(bytes) => Ok(bytes),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                Err(AppError::NotFound("CONTENT_NOT_FOUND"))
            }
            Err(error) => Err(error.into()),
        }
    }

    pub fn remove(&self, bucket: Bucket, path: &str) -> Result<(), AppError> {
        let (_, location) = self.location(bucket, path)?;
        remove_file(location)?;
        Ok(())
    }

    pub fn public_url(&self, bucket: Bucket, path: &str) -> String {
        format!(
            "{}/storage/{}/{}",
            self.public_url,
            bucket.as_str(),
            path.trim_start_matches('/')
        )
    }

    fn mac(&self, bucket: Bucket, path: &str, expires: i64) -> Result<HmacSha256, AppError> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|error| AppError::Config(error.to_string()))?;
        mac.update(format!("{}/{}/{expires}", bucket.as_str(), path).as_bytes());
        Ok(mac)
    }

    pub fn sign(&self, bucket: Bucket, path: &str, expires: i64) -> Result<String, AppError> {
        let path = normalize_path(path)?;
        Ok(hex::encode(self.mac(bucket, &path, expires)?.finalize().into_bytes()))
    }

    pub fn signed_url(
        &self,
        bucket: Bucket,
        path: &str,
        now: i64,
        ttl_secs: i64,
    ) -> Result<String, AppError> {
        let path = normalize_path(path)?;
        let expires = now + ttl_secs;
        let signature = self.sign(bucket, &path, expires)?;
        Ok(format!(
            "{}?expires={expires}&signature={signature}",
            self.public_url(bucket, &path)
        ))
    }

    /// Valid when the signature matches and `now` has not passed `expires`.
    pub fn verify_signature(&self, bucket: Bucket, path: &str, expires: i64, signature: &str, now: i64) -> bool {
        if now > expires {
            return false;
        }
        let Ok(path) = normalize_path(path) else {
            return false;
        };
        let Ok(expected) = hex::decode(signature) else {
            return false;
        };
        match self.mac(bucket, &path, expires) {
            Ok(mac) => mac.verify_slice(&expected).is_ok(),
            Err(_) => false,
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    /// A store rooted in a directory removed when the guard drops.
    pub fn temp_store() -> (TempDir, BucketStore) {
        let root = TempDir::new().unwrap();
        let store = BucketStore::new(root.path(), "http://localhost:8000/", "secret");
        (root, store)
    }

    pub fn put(store: &BucketStore, bucket: Bucket, name: &str, bytes: &[u8], millis: i64) -> StoredObject {
        let mut source = NamedTempFile::new().unwrap();
        source.write_all(bytes).unwrap();
        store
            .upload_file(bucket, name, None, source.path(), millis)
            .unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{put, temp_store};
    use super::*;

    #[test]
    fn names_are_sanitised() {
        assert_eq!(sanitize_file_name("site photo (1).JPG"), "site_photo__1_.JPG");
        assert_eq!(sanitize_file_name("../../etc/passwd"), "_.._etc_passwd");
        assert_eq!(sanitize_file_name(""), "file");
    }

    #[test]
    fn keys_carry_timestamp_and_owner() {
        let owner = ObjectId::new();
        assert_eq!(object_key(1700, "a.png", None), "1700-a.png");
        assert_eq!(
            object_key(1700, "a.png", Some(&owner)),
            format!("{}/1700-a.png", owner.to_hex())
        );
    }

    #[test]
    fn paths_cannot_escape_bucket() {
        assert_eq!(normalize_path("//1700-a.png").unwrap(), "1700-a.png");
        assert!(normalize_path("../secret").is_err());
        assert!(normalize_path("a/../../b").is_err());
        assert!(normalize_path("   ").is_err());
    }

    #[test]
    fn upload_then_download() {
        let (_root, store) = temp_store();
        let stored = put(&store, Bucket::SafetyImages, "hazard.png", b"png-bytes", 42);

        assert_eq!(stored.path, "42-hazard.png");
        assert_eq!(stored.url, "http://localhost:8000/storage/safety-images/42-hazard.png");
        assert_eq!(store.download(Bucket::SafetyImages, "/42-hazard.png").unwrap(), b"png-bytes");
        assert!(matches!(
            store.download(Bucket::ActionPlanImages, "42-hazard.png"),
            Err(AppError::NotFound(_))
        ));

        store.remove(Bucket::SafetyImages, "42-hazard.png").unwrap();
        assert!(store.download(Bucket::SafetyImages, "42-hazard.png").is_err());
    }

    #[test]
    fn private_uploads_get_signed_urls() {
        let (_root, store) = temp_store();
        let stored = put(&store, Bucket::ActionPlanImages, "fix.jpg", b"jpg", 5_000);

        assert!(stored.url.starts_with("http://localhost:8000/storage/action-plan-images/5000-fix.jpg?expires=3605&signature="));
        let signature = stored.url.rsplit("signature=").next().unwrap();
        assert!(store.verify_signature(Bucket::ActionPlanImages, &stored.path, 3_605, signature, 10));
    }

    #[test]
    fn signed_urls_expire_and_bind_path() {
        let (_root, store) = temp_store();
        let url = store
            .signed_url(Bucket::SafetyImages, "a.png", 1_000, SIGNED_URL_TTL_SECS)
            .unwrap();
        assert!(url.contains("expires=4600"));

        let signature = store.sign(Bucket::SafetyImages, "a.png", 4_600).unwrap();
        assert!(store.verify_signature(Bucket::SafetyImages, "a.png", 4_600, &signature, 2_000));
        assert!(!store.verify_signature(Bucket::SafetyImages, "a.png", 4_600, &signature, 5_000));
        assert!(!store.verify_signature(Bucket::SafetyImages, "b.png", 4_600, &signature, 2_000));
        assert!(!store.verify_signature(Bucket::ActionPlanImages, "a.png", 4_600, &signature, 2_000));
        assert!(!store.verify_signature(Bucket::SafetyImages, "a.png", 4_600, "zz", 2_000));
    }

    #[test]
    fn bucket_names_parse() {
        assert_eq!("action-plan-images".parse::<Bucket>().unwrap(), Bucket::ActionPlanImages);
        assert!("avatars".parse::<Bucket>().is_err());
        assert!(Bucket::SafetyImages.is_public());
        assert!(!Bucket::ActionPlanImages.is_public());
    }
}
