use crate::{database::get_db, error::AppError};
use futures::stream::TryStreamExt;
use mongodb::{
    bson::{doc, from_document, oid::ObjectId},
    Collection,
};
use serde::{Deserialize, Serialize};

use super::observation::Observation;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Company {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,
    pub name: String,
}
#[derive(Debug, Deserialize, Serialize)]
pub struct CompanyRequest {
    pub name: Option<String>,
}
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct CompanyResponse {
    pub _id: String,
    pub name: String,
}

impl CompanyRequest {
    pub fn name(&self) -> Result<String, AppError> {
        match self.name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => Ok(name.to_string()),
            _ => Err(AppError::BadRequest("NAME_REQUIRED")),
        }
    }
}

impl Company {
    fn collection() -> Result<Collection<Company>, AppError> {
        Ok(get_db()?.collection::<Company>("companies"))
    }
    pub async fn save(&mut self) -> Result<ObjectId, AppError> {
        let _id = ObjectId::new();
        self._id = Some(_id);

        Self::collection()?.insert_one(&*self, None).await?;
        Ok(_id)
    }
    pub async fn rename(_id: &ObjectId, name: &str) -> Result<ObjectId, AppError> {
        let result = Self::collection()?
            .update_one(doc! { "_id": _id }, doc! { "$set": { "name": name } }, None)
            .await?;
        if result.matched_count == 0 {
            return Err(AppError::NotFound("COMPANY_NOT_FOUND"));
        }
        Ok(*_id)
    }
    pub async fn find_by_id(_id: &ObjectId) -> Result<Option<Company>, AppError> {
        Ok(Self::collection()?.find_one(doc! { "_id": _id }, None).await?)
    }
    pub async fn find_many() -> Result<Vec<CompanyResponse>, AppError> {
        let pipeline = vec![
            doc! { "$sort": { "name": 1 } },
            doc! {
                "$project": {
                    "_id": { "$toString": "$_id" },
                    "name": "$name",
                }
            },
        ];

        let mut cursor = Self::collection()?.aggregate(pipeline, None).await?;
        let mut companies = Vec::new();
        while let Some(doc) = cursor.try_next().await? {
            companies.push(from_document::<CompanyResponse>(doc)?);
        }
        Ok(companies)
    }
    pub async fn delete_by_id(_id: &ObjectId) -> Result<u64, AppError> {
        if Observation::count_by_company(_id).await? > 0 {
            return Err(AppError::Conflict("COMPANY_IN_USE"));
        }
        let result = Self::collection()?
            .delete_one(doc! { "_id": _id }, None)
            .await?;
        if result.deleted_count == 0 {
            return Err(AppError::NotFound("COMPANY_NOT_FOUND"));
        }
        Ok(result.deleted_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_company_name_is_rejected() {
        let request = CompanyRequest { name: None };
        assert!(matches!(
            request.name(),
            Err(AppError::BadRequest("NAME_REQUIRED"))
        ));
    }
}
