use crate::{database::get_db, error::AppError};
use futures::stream::TryStreamExt;
use mongodb::{
    bson::{doc, oid::ObjectId},
    options::FindOptions,
    Collection,
};
use serde::{Deserialize, Serialize};

/// Icon names the client knows how to draw. Unknown identifiers fall back
/// to `AlertCircle`.
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub enum CategoryIcon {
    HardHat,
    Flame,
    Footprints,
    Wrench,
    Truck,
    Construction,
    Zap,
    AlertCircle,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SafetyCategory {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,
    pub name: String,
    pub icon: String,
}
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct SafetyCategoryResponse {
    pub _id: String,
    pub name: String,
    pub icon: CategoryIcon,
}

impl CategoryIcon {
    pub fn from_identifier(identifier: &str) -> Self {
        match identifier {
            "hard-hat" => Self::HardHat,
            "flame" => Self::Flame,
            "footprints" => Self::Footprints,
            "tool" => Self::Wrench,
            "truck" => Self::Truck,
            "construction" => Self::Construction,
            "zap" => Self::Zap,
            _ => Self::AlertCircle,
        }
    }
}

impl From<SafetyCategory> for SafetyCategoryResponse {
    fn from(category: SafetyCategory) -> Self {
        Self {
            _id: category._id.map(|id| id.to_hex()).unwrap_or_default(),
            icon: CategoryIcon::from_identifier(&category.icon),
            name: category.name,
        }
    }
}

impl SafetyCategory {
    fn collection() -> Result<Collection<SafetyCategory>, AppError> {
        Ok(get_db()?.collection::<SafetyCategory>("safety_categories"))
    }
    pub async fn find_many() -> Result<Vec<SafetyCategory>, AppError> {
        let options = FindOptions::builder().sort(doc! { "name": 1 }).build();
        let cursor = Self::collection()?.find(None, options).await?;
        Ok(cursor.try_collect().await?)
    }
    pub async fn count_existing(ids: &[ObjectId]) -> Result<u64, AppError> {
        Ok(Self::collection()?
            .count_documents(doc! { "_id": { "$in": ids } }, None)
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_icons_map_to_icon_names() {
        assert_eq!(CategoryIcon::from_identifier("hard-hat"), CategoryIcon::HardHat);
        assert_eq!(CategoryIcon::from_identifier("tool"), CategoryIcon::Wrench);
        assert_eq!(CategoryIcon::from_identifier("zap"), CategoryIcon::Zap);
    }

    #[test]
    fn unknown_icon_falls_back() {
        assert_eq!(CategoryIcon::from_identifier("ladder"), CategoryIcon::AlertCircle);
        assert_eq!(CategoryIcon::from_identifier(""), CategoryIcon::AlertCircle);
    }

    #[test]
    fn response_carries_hex_id_and_icon() {
        let id = ObjectId::new();
        let response = SafetyCategoryResponse::from(SafetyCategory {
            _id: Some(id),
            name: "Electrical".to_string(),
            icon: "zap".to_string(),
        });
        assert_eq!(response._id, id.to_hex());
        assert_eq!(response.icon, CategoryIcon::Zap);
    }
}
