use axum::extract::State;
use bson::{oid::ObjectId, Document};
use mongodb::options::FindOptions;
use serde::{Deserialize, Serialize};
use tap::TapFallible;
use validator::Validate;

use crate::{
    error::Error,
    mongo_ext::{Collection, WriteResult},
    util::{flexible_date, now, FormattedDateTime, Json, ObjectIdString, PathObjectId, Query},
};

use super::{
    auth::VerifiedUser,
    rider::{RiderCollection, RiderStatus},
};

#[derive(Clone)]
pub struct ParcelCollection(pub Collection<ParcelModel>);

impl std::ops::Deref for ParcelCollection {
    type Target = Collection<ParcelModel>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    #[default]
    Unpaid,
    Paid,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DeliveryStatus {
    #[default]
    #[serde(rename = "not_collected")]
    NotCollected,
    #[serde(rename = "waiting for pickup")]
    WaitingForPickup,
    #[serde(rename = "in_transit")]
    InTransit,
    #[serde(rename = "delivered")]
    Delivered,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ParcelModel {
    #[serde(rename = "_id")]
    pub id: ObjectId,

    /// Owner email. Older parcels may not carry one.
    #[serde(default)]
    pub created_by: Option<String>,

    #[serde(default)]
    pub payment_status: PaymentStatus,

    #[serde(default)]
    pub delivery_status: DeliveryStatus,

    #[serde(default)]
    pub assigned_rider: Option<String>,

    #[serde(default, deserialize_with = "flexible_date::deserialize_option")]
    pub created_at: Option<bson::DateTime>,

    /// Shipment fields as submitted (sender, receiver, weight, cost, ...).
    #[serde(flatten)]
    pub details: Document,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Parcel {
    pub id: ObjectIdString,
    pub created_by: Option<String>,
    pub payment_status: PaymentStatus,
    pub delivery_status: DeliveryStatus,
    pub assigned_rider: Option<String>,
    pub created_at: Option<FormattedDateTime>,

    #[serde(flatten)]
    pub details: Document,
}

impl From<ParcelModel> for Parcel {
    fn from(value: ParcelModel) -> Self {
        Self {
            id: value.id.into(),
            created_by: value.created_by,
            payment_status: value.payment_status,
            delivery_status: value.delivery_status,
            assigned_rider: value.assigned_rider,
            created_at: value.created_at.map(Into::into),
            details: value.details,
        }
    }
}

const RESERVED_FIELDS: [&str; 5] = [
    "_id",
    "payment_status",
    "delivery_status",
    "assigned_rider",
    "created_at",
];

#[derive(Validate, Serialize, Deserialize, Debug, Clone, Default)]
pub struct CreateParcelRequest {
    #[validate(email)]
    pub created_by: Option<String>,

    #[serde(flatten)]
    pub details: serde_json::Map<String, serde_json::Value>,
}

impl CreateParcelRequest {
    pub fn into_model(mut self, owner: &VerifiedUser) -> Result<ParcelModel, Error> {
        self.validate()?;

        for reserved in RESERVED_FIELDS {
            self.details.remove(reserved);
        }

        Ok(ParcelModel {
            id: ObjectId::new(),
            created_by: Some(self.created_by.unwrap_or_else(|| owner.email.clone())),
            payment_status: PaymentStatus::Unpaid,
            delivery_status: DeliveryStatus::NotCollected,
            assigned_rider: None,
            created_at: Some(now()),
            details: bson::to_document(&self.details)?,
        })
    }
}

#[tracing::instrument(skip_all, fields(user = %user.email))]
pub async fn create(
    user: VerifiedUser,
    State(parcels): State<ParcelCollection>,
    Json(request): Json<CreateParcelRequest>,
) -> Result<Json<WriteResult>, Error> {
    let model = request.into_model(&user)?;

    tracing::debug!("creating parcel {}", model.id);
    parcels
        .insert_one(&model, None)
        .await
        .map(|it| Json(it.into()))
        .map_err(Into::into)
}

#[derive(Deserialize, Debug, Default)]
pub struct OwnerQuery {
    pub email: Option<String>,
}

pub async fn index(
    _user: VerifiedUser,
    State(parcels): State<ParcelCollection>,
    Query(query): Query<OwnerQuery>,
) -> Result<Json<Vec<Parcel>>, Error> {
    let filter = match query.email {
        Some(email) => bson::doc! { "created_by": email },
        None => Document::new(),
    };

    let options = FindOptions::builder()
        .sort(bson::doc! { "created_at": -1 })
        .build();

    let parcels = parcels.find_all(filter, options).await?;

    Ok(Json(parcels.into_iter().map(Into::into).collect()))
}

#[derive(Deserialize, Debug, Default)]
pub struct StatusFilter {
    pub payment_status: Option<PaymentStatus>,
    pub delivery_status: Option<DeliveryStatus>,
}

impl StatusFilter {
    pub fn to_document(&self) -> Result<Document, Error> {
        let mut filter = Document::new();

        if let Some(status) = &self.payment_status {
            filter.insert("payment_status", bson::to_bson(status)?);
        }
        if let Some(status) = &self.delivery_status {
            filter.insert("delivery_status", bson::to_bson(status)?);
        }

        Ok(filter)
    }
}

pub async fn index_by_status(
    State(parcels): State<ParcelCollection>,
    Query(query): Query<StatusFilter>,
) -> Result<Json<Vec<Parcel>>, Error> {
    let parcels = parcels.find_all(query.to_document()?, None).await?;

    Ok(Json(parcels.into_iter().map(Into::into).collect()))
}

pub async fn show(
    State(parcels): State<ParcelCollection>,
    PathObjectId(id): PathObjectId,
) -> Result<Json<Parcel>, Error> {
    let parcel = parcels
        .find_one_by_id(id)
        .await?
        .ok_or(Error::NoResource)
        .tap_err(|_| tracing::debug!("tried accessing non existing parcel {}", id))?;

    Ok(Json(parcel.into()))
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PaymentStatusRequest {
    pub payment_status: PaymentStatus,
}

#[tracing::instrument(skip_all, fields(id = %id))]
pub async fn update_payment_status(
    State(parcels): State<ParcelCollection>,
    PathObjectId(id): PathObjectId,
    Json(request): Json<PaymentStatusRequest>,
) -> Result<Json<WriteResult>, Error> {
    parcels
        .update_one_by_id(
            id,
            bson::doc! {
                "$set": { "payment_status": bson::to_bson(&request.payment_status)? }
            },
        )
        .await
        .map(|it| Json(it.into()))
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AssignRiderRequest {
    #[serde(rename = "riderEmail")]
    pub rider_email: String,
}

/// Points the parcel at an approved rider and marks it as waiting for pickup.
/// A rider that does not exist and a rider that is not approved are rejected
/// the same way.
pub async fn assign_rider_to_parcel(
    parcels: &ParcelCollection,
    riders: &RiderCollection,
    id: ObjectId,
    rider_email: &str,
) -> Result<WriteResult, Error> {
    let rider = riders
        .find_one(
            bson::doc! {
                "email": rider_email,
                "status": RiderStatus::Approved.as_str(),
            },
            None,
        )
        .await?;

    if rider.is_none() {
        let known = riders
            .count_documents(bson::doc! { "email": rider_email }, None)
            .await?;
        tracing::debug!(
            "cannot assign {}: {}",
            rider_email,
            if known > 0 { "not approved" } else { "no such rider" }
        );

        return Err(Error::NoResource);
    }

    let result = parcels
        .update_one_by_id(
            id,
            bson::doc! {
                "$set": {
                    "assigned_rider": rider_email,
                    "delivery_status": bson::to_bson(&DeliveryStatus::WaitingForPickup)?,
                }
            },
        )
        .await?;

    if result.matched_count == 0 {
        return Err(Error::NoResource)
            .tap_err(|_| tracing::debug!("tried assigning rider to non existing parcel {}", id));
    }

    Ok(result.into())
}

#[tracing::instrument(skip_all, fields(id = %id, rider = %request.rider_email))]
pub async fn assign_rider(
    State(parcels): State<ParcelCollection>,
    State(riders): State<RiderCollection>,
    PathObjectId(id): PathObjectId,
    Json(request): Json<AssignRiderRequest>,
) -> Result<Json<WriteResult>, Error> {
    assign_rider_to_parcel(&parcels, &riders, id, &request.rider_email)
        .await
        .map(Json)
}
