use std::collections::HashMap;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use futures::future::join_all;

use crate::{
    error::AppError,
    storage::{normalize_path, Bucket, BucketStore},
};

/// Where an image referenced by a report lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    /// `data:image/<type>;base64,<payload>`
    DataUri(String),
    Remote(String),
    Stored { bucket: Bucket, path: String },
}

impl ImageSource {
    /// Classifies a stored reference. Plain paths resolve against `bucket`.
    pub fn parse(raw: &str, bucket: Bucket) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        if raw.starts_with("data:image") {
            return Some(Self::DataUri(raw.to_string()));
        }
        if raw.starts_with("http://") || raw.starts_with("https://") {
            return Some(Self::Remote(raw.to_string()));
        }
        Some(Self::Stored {
            bucket,
            path: raw.trim_start_matches('/').to_string(),
        })
    }

    pub async fn load(&self, client: &reqwest::Client, store: &BucketStore) -> Result<Vec<u8>, AppError> {
        match self {
            Self::DataUri(uri) => decode_data_uri(uri),
            Self::Remote(url) => {
                let response = client.get(url).send().await?.error_for_status()?;
                Ok(response.bytes().await?.to_vec())
            }
            Self::Stored { bucket, path } => store.download(*bucket, &normalize_path(path)?),
        }
    }
}

fn decode_data_uri(uri: &str) -> Result<Vec<u8>, AppError> {
    let (header, payload) = uri
        .split_once(',')
        .ok_or_else(|| AppError::Export("data uri has no payload".to_string()))?;
    if !header.ends_with(";base64") {
        return Err(AppError::Export("data uri is not base64".to_string()));
    }
    STANDARD
        .decode(payload.trim())
        .map_err(|error| AppError::Export(error.to_string()))
}

/// Loads every source concurrently. Failed loads are logged and left out of
/// the result so the caller can draw a placeholder.
pub async fn load_all(
    sources: Vec<(String, ImageSource)>,
    client: &reqwest::Client,
    store: &BucketStore,
) -> HashMap<String, Vec<u8>> {
    let loads = sources.iter().map(|(_, source)| source.load(client, store));
    let results = join_all(loads).await;

    sources
        .into_iter()
        .zip(results)
        .filter_map(|((key, _), result)| match result {
            Ok(bytes) => Some((key, bytes)),
            Err(error) => {
                tracing::warn!(image = %key, error = %error, "image could not be loaded");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::testing::{put, temp_store};

    #[test]
    fn sources_are_classified() {
        assert_eq!(
            ImageSource::parse("data:image/png;base64,AAAA", Bucket::SafetyImages),
            Some(ImageSource::DataUri("data:image/png;base64,AAAA".to_string()))
        );
        assert_eq!(
            ImageSource::parse("https://cdn.example.com/a.jpg", Bucket::SafetyImages),
            Some(ImageSource::Remote("https://cdn.example.com/a.jpg".to_string()))
        );
        assert_eq!(
            ImageSource::parse("//user/1-a.png", Bucket::ActionPlanImages),
            Some(ImageSource::Stored {
                bucket: Bucket::ActionPlanImages,
                path: "user/1-a.png".to_string(),
            })
        );
        assert_eq!(ImageSource::parse("  ", Bucket::SafetyImages), None);
    }

    #[test]
    fn data_uris_decode() {
        assert_eq!(decode_data_uri("data:image/png;base64,aGVsbG8=").unwrap(), b"hello");
        assert!(decode_data_uri("data:image/png,raw").is_err());
        assert!(decode_data_uri("data:image/png;base64").is_err());
    }

    #[actix_web::test]
    async fn failed_loads_are_left_out() {
        let (_root, store) = temp_store();
        put(&store, Bucket::SafetyImages, "a.png", b"stored", 7);
        let client = reqwest::Client::new();

        let images = load_all(
            vec![
                ("main".to_string(), ImageSource::parse("7-a.png", Bucket::SafetyImages).unwrap()),
                ("inline".to_string(), ImageSource::parse("data:image/png;base64,aGk=", Bucket::SafetyImages).unwrap()),
                ("missing".to_string(), ImageSource::parse("nope.png", Bucket::SafetyImages).unwrap()),
                ("broken".to_string(), ImageSource::parse("data:image/png;base64,%%%", Bucket::SafetyImages).unwrap()),
            ],
            &client,
            &store,
        )
        .await;

        assert_eq!(images.len(), 2);
        assert_eq!(images["main"], b"stored");
        assert_eq!(images["inline"], b"hi");
    }
}
