use axum::extract::State;
use bson::{oid::ObjectId, Document};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::{
    error::Error,
    mongo_ext::{start_transaction, Collection, WriteResult},
    util::{Json, ObjectIdString, Query},
};

use super::{
    auth::{AdminUser, VerifiedUser},
    user::{UserCollection, UserRole},
};

#[derive(Clone)]
pub struct RiderCollection(pub Collection<RiderModel>);

impl std::ops::Deref for RiderCollection {
    type Target = Collection<RiderModel>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Application state. Rejected applications have no status at all.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RiderStatus {
    Pending,
    Approved,
}

impl RiderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RiderModel {
    #[serde(rename = "_id")]
    pub id: ObjectId,

    pub email: String,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<RiderStatus>,

    /// Personal and vehicle details as submitted.
    #[serde(flatten)]
    pub details: Document,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Rider {
    pub id: ObjectIdString,
    pub email: String,
    pub name: Option<String>,
    pub status: Option<RiderStatus>,

    #[serde(flatten)]
    pub details: Document,
}

impl From<RiderModel> for Rider {
    fn from(value: RiderModel) -> Self {
        Self {
            id: value.id.into(),
            email: value.email,
            name: value.name,
            status: value.status,
            details: value.details,
        }
    }
}

#[derive(Validate, Serialize, Deserialize, Debug, Clone)]
pub struct RiderApplication {
    #[validate(email)]
    pub email: String,

    #[validate(length(min = 1, max = 124))]
    pub name: String,

    #[serde(flatten)]
    pub details: serde_json::Map<String, serde_json::Value>,
}

impl RiderApplication {
    pub fn into_model(mut self) -> Result<RiderModel, Error> {
        self.validate()?;

        for reserved in ["_id", "status"] {
            self.details.remove(reserved);
        }

        Ok(RiderModel {
            id: ObjectId::new(),
            email: self.email,
            name: Some(self.name),
            status: Some(RiderStatus::Pending),
            details: bson::to_document(&self.details)?,
        })
    }
}

/// Stores a new pending application. Re-applying with the same email
/// creates another application.
#[tracing::instrument(skip_all, fields(email = %request.email))]
pub async fn apply(
    State(riders): State<RiderCollection>,
    Json(request): Json<RiderApplication>,
) -> Result<Json<WriteResult>, Error> {
    let model = request.into_model()?;

    riders
        .insert_one(&model, None)
        .await
        .map(|it| Json(it.into()))
        .map_err(Into::into)
}

#[derive(Deserialize, Debug, Default)]
pub struct StatusQuery {
    pub status: Option<RiderStatus>,
}

pub async fn index(
    _admin: AdminUser,
    State(riders): State<RiderCollection>,
    Query(query): Query<StatusQuery>,
) -> Result<Json<Vec<Rider>>, Error> {
    let filter = match query.status {
        Some(status) => bson::doc! { "status": status.as_str() },
        None => Document::new(),
    };

    let riders = riders.find_all(filter, None).await?;

    Ok(Json(riders.into_iter().map(Into::into).collect()))
}

pub async fn approved(
    _admin: AdminUser,
    State(riders): State<RiderCollection>,
) -> Result<Json<Vec<Rider>>, Error> {
    let riders = riders
        .find_all(
            bson::doc! { "status": RiderStatus::Approved.as_str() },
            None,
        )
        .await?;

    Ok(Json(riders.into_iter().map(Into::into).collect()))
}

#[derive(Deserialize, Debug)]
pub struct EmailQuery {
    pub email: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AcceptResponse {
    pub rider_update: WriteResult,
    pub user_update: WriteResult,
}

/// Approves the first application found for `email` and makes the user a
/// rider. Both writes commit together or not at all.
pub async fn accept_rider(
    mongo: &mongodb::Client,
    riders: &RiderCollection,
    users: &UserCollection,
    email: &str,
) -> Result<AcceptResponse, Error> {
    let mut session = start_transaction(mongo).await?;

    let rider_update = riders
        .update_one_with_session(
            bson::doc! { "email": email },
            bson::doc! { "$set": { "status": RiderStatus::Approved.as_str() } },
            None,
            &mut session,
        )
        .await?;

    let user_update = users
        .update_one_with_session(
            bson::doc! { "email": email },
            bson::doc! { "$set": { "role": UserRole::Rider.as_str() } },
            None,
            &mut session,
        )
        .await?;

    session.commit_transaction().await?;

    Ok(AcceptResponse {
        rider_update: rider_update.into(),
        user_update: user_update.into(),
    })
}

#[tracing::instrument(skip_all, fields(by = %user.email, email = %query.email))]
pub async fn accept(
    user: VerifiedUser,
    State(mongo): State<mongodb::Client>,
    State(riders): State<RiderCollection>,
    State(users): State<UserCollection>,
    Query(query): Query<EmailQuery>,
) -> Result<Json<AcceptResponse>, Error> {
    accept_rider(&mongo, &riders, &users, &query.email)
        .await
        .map(Json)
}

pub fn reject_filter(email: &str) -> Document {
    bson::doc! {
        "email": email,
        "status": RiderStatus::Pending.as_str(),
    }
}

/// Clears the status of a pending application. Anything not pending is left
/// untouched and reported as zero matched.
#[tracing::instrument(skip_all, fields(by = %user.email, email = %query.email))]
pub async fn reject(
    user: VerifiedUser,
    State(riders): State<RiderCollection>,
    Query(query): Query<EmailQuery>,
) -> Result<Json<WriteResult>, Error> {
    riders
        .update_one(
            reject_filter(&query.email),
            bson::doc! { "$unset": { "status": "" } },
            None,
        )
        .await
        .map(|it| Json(it.into()))
        .map_err(Into::into)
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RemoveRiderRequest {
    pub email: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RemoveResponse {
    pub role_update_result: WriteResult,
    pub delete_rider_result: WriteResult,
}

/// Demotes the user back to `user` and deletes one application for `email`,
/// in a single transaction. Parcels keep pointing at the removed rider.
pub async fn remove_rider(
    mongo: &mongodb::Client,
    riders: &RiderCollection,
    users: &UserCollection,
    email: &str,
) -> Result<RemoveResponse, Error> {
    let mut session = start_transaction(mongo).await?;

    let role_update = users
        .update_one_with_session(
            bson::doc! { "email": email },
            bson::doc! { "$set": { "role": UserRole::User.as_str() } },
            None,
            &mut session,
        )
        .await?;

    let delete_rider = riders
        .delete_one_with_session(bson::doc! { "email": email }, None, &mut session)
        .await?;

    session.commit_transaction().await?;

    Ok(RemoveResponse {
        role_update_result: role_update.into(),
        delete_rider_result: delete_rider.into(),
    })
}

#[tracing::instrument(skip_all, fields(by = %user.email, email = %request.email))]
pub async fn remove(
    user: VerifiedUser,
    State(mongo): State<mongodb::Client>,
    State(riders): State<RiderCollection>,
    State(users): State<UserCollection>,
    Json(request): Json<RemoveRiderRequest>,
) -> Result<Json<RemoveResponse>, Error> {
    remove_rider(&mongo, &riders, &users, &request.email)
        .await
        .map(Json)
}
