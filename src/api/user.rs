use axum::{
    extract::{Path, State},
    http::StatusCode,
};
use bson::{oid::ObjectId, Document};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::{
    error::Error,
    mongo_ext::{is_duplicate_key, Collection, WriteResult},
    util::{flexible_date, now, FormattedDateTime, Json, ObjectIdString, PathObjectId, Query},
};

use super::auth::{AdminUser, VerifiedUser};

#[derive(Clone)]
pub struct UserCollection(pub Collection<UserModel>);

impl std::ops::Deref for UserCollection {
    type Target = Collection<UserModel>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl UserCollection {
    pub async fn find_by_email(&self, email: &str) -> Result<Option<UserModel>, Error> {
        self.find_one(bson::doc! { "email": email }, None)
            .await
            .map_err(Into::into)
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    #[default]
    User,
    Admin,
    Rider,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Admin => "admin",
            Self::Rider => "rider",
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct UserModel {
    #[serde(rename = "_id")]
    pub id: ObjectId,

    pub email: String,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub role: UserRole,

    #[serde(rename = "createdAt", deserialize_with = "flexible_date::deserialize")]
    pub created_at: bson::DateTime,

    #[serde(rename = "lastLogIn", deserialize_with = "flexible_date::deserialize")]
    pub last_log_in: bson::DateTime,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: ObjectIdString,
    pub email: String,
    pub name: Option<String>,
    pub role: UserRole,
    pub created_at: FormattedDateTime,
    pub last_log_in: FormattedDateTime,
}

impl From<UserModel> for User {
    fn from(value: UserModel) -> Self {
        Self {
            id: value.id.into(),
            email: value.email,
            name: value.name,
            role: value.role,
            created_at: value.created_at.into(),
            last_log_in: value.last_log_in.into(),
        }
    }
}

#[derive(Validate, Serialize, Deserialize, Debug, Clone)]
pub struct SignInRequest {
    #[validate(email)]
    pub email: String,

    #[validate(length(max = 124))]
    pub name: Option<String>,
}

/// Creates the user on first sign-in, otherwise only moves `lastLogIn`.
pub async fn upsert_on_sign_in(
    users: &UserCollection,
    request: SignInRequest,
) -> Result<WriteResult, Error> {
    request.validate()?;

    if users.find_by_email(&request.email).await?.is_some() {
        return touch_last_log_in(users, &request.email).await;
    }

    let timestamp = now();
    let model = UserModel {
        id: ObjectId::new(),
        email: request.email,
        name: request.name,
        role: UserRole::User,
        created_at: timestamp,
        last_log_in: timestamp,
    };

    match users.insert_one(&model, None).await {
        Ok(result) => Ok(result.into()),
        // a concurrent sign-in inserted the same email first
        Err(err) if is_duplicate_key(&err) => touch_last_log_in(users, &model.email).await,
        Err(err) => Err(err.into()),
    }
}

async fn touch_last_log_in(users: &UserCollection, email: &str) -> Result<WriteResult, Error> {
    users
        .update_one(
            bson::doc! { "email": email },
            bson::doc! { "$set": { "lastLogIn": now() } },
            None,
        )
        .await
        .map(Into::into)
        .map_err(Into::into)
}

#[tracing::instrument(skip_all, fields(email = %request.email))]
pub async fn sign_in(
    State(users): State<UserCollection>,
    Json(request): Json<SignInRequest>,
) -> Result<Json<WriteResult>, Error> {
    upsert_on_sign_in(&users, request).await.map(Json)
}

#[derive(Deserialize, Debug, Default)]
pub struct RoleQuery {
    pub role: Option<UserRole>,
}

pub async fn index(
    _user: VerifiedUser,
    State(users): State<UserCollection>,
    Query(query): Query<RoleQuery>,
) -> Result<Json<Vec<User>>, Error> {
    let role = query.role.unwrap_or_default();

    let users = users
        .find_all(bson::doc! { "role": role.as_str() }, None)
        .await?;

    Ok(Json(users.into_iter().map(Into::into).collect()))
}

#[derive(Deserialize, Debug, Default)]
pub struct SearchQuery {
    pub email: Option<String>,
}

/// Case-insensitive substring match on email. The fragment is matched
/// literally, not as a pattern.
pub fn email_search_filter(fragment: Option<&str>) -> Document {
    match fragment {
        Some(fragment) if !fragment.is_empty() => bson::doc! {
            "email": {
                "$regex": regex::escape(fragment),
                "$options": "i",
            }
        },
        _ => Document::new(),
    }
}

pub async fn search(
    _admin: AdminUser,
    State(users): State<UserCollection>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<User>>, Error> {
    let users = users
        .find_all(email_search_filter(query.email.as_deref()), None)
        .await?;

    Ok(Json(users.into_iter().map(Into::into).collect()))
}

pub async fn set_role(
    users: &UserCollection,
    id: ObjectId,
    role: UserRole,
) -> Result<WriteResult, Error> {
    tracing::debug!("setting role of {} to {}", id, role.as_str());

    users
        .update_one_by_id(id, bson::doc! { "$set": { "role": role.as_str() } })
        .await
        .map(Into::into)
}

#[tracing::instrument(skip_all, fields(admin = %admin.0.email, id = %id))]
pub async fn grant_admin(
    admin: AdminUser,
    State(users): State<UserCollection>,
    PathObjectId(id): PathObjectId,
) -> Result<Json<WriteResult>, Error> {
    set_role(&users, id, UserRole::Admin).await.map(Json)
}

#[tracing::instrument(skip_all, fields(admin = %admin.0.email, id = %id))]
pub async fn revoke_admin(
    admin: AdminUser,
    State(users): State<UserCollection>,
    PathObjectId(id): PathObjectId,
) -> Result<Json<WriteResult>, Error> {
    set_role(&users, id, UserRole::User).await.map(Json)
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RoleResponse {
    pub role: String,
}

pub async fn get_role(
    State(users): State<UserCollection>,
    Path(email): Path<String>,
) -> Result<(StatusCode, Json<RoleResponse>), Error> {
    let response = match users.find_by_email(&email).await? {
        Some(user) => (
            StatusCode::OK,
            Json(RoleResponse {
                role: user.role.as_str().to_string(),
            }),
        ),
        None => (
            StatusCode::NOT_FOUND,
            Json(RoleResponse {
                role: "unknown".to_string(),
            }),
        ),
    };

    Ok(response)
}
