use axum::{
    extract::{FromRef, FromRequestParts},
    headers::{authorization::Bearer, Authorization},
    http::request::Parts,
    RequestPartsExt, TypedHeader,
};
use tap::TapFallible;

use crate::error::{Error, UnauthorizedType};

use super::{
    firebase::FirebaseAuth,
    user::{UserCollection, UserModel, UserRole},
};

/// Identity proven by a Firebase ID token in the `Authorization` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedUser {
    pub uid: String,
    pub email: String,
}

impl VerifiedUser {
    pub async fn from_token(firebase: &FirebaseAuth, token: &str) -> Result<Self, Error> {
        let claims = firebase
            .verify_id_token(token)
            .await
            .tap_err(|err| tracing::debug!("id token rejected: {}", err))
            .map_err(|_| Error::Unauthorized(UnauthorizedType::InvalidIdToken))?;

        let email = claims
            .email
            .ok_or(Error::Unauthorized(UnauthorizedType::MissingEmail))?;

        Ok(Self {
            uid: claims.sub,
            email,
        })
    }
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for VerifiedUser
where
    FirebaseAuth: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(token)) = parts
            .extract::<TypedHeader<Authorization<Bearer>>>()
            .await
            .map_err(|_| Error::Unauthorized(UnauthorizedType::MissingToken))
            .tap_err(|_| tracing::debug!("bearer token not found"))?;

        let firebase = FirebaseAuth::from_ref(state);

        Self::from_token(&firebase, token.token()).await
    }
}

/// A verified identity whose account currently holds the admin role.
/// The role is read from the database on every request.
#[derive(Debug, Clone)]
pub struct AdminUser(pub VerifiedUser);

impl AdminUser {
    /// Admits `user` only if `account`, their stored user record, is an admin.
    pub fn authorize(user: VerifiedUser, account: Option<&UserModel>) -> Result<Self, Error> {
        match account {
            Some(UserModel {
                role: UserRole::Admin,
                ..
            }) => Ok(Self(user)),
            _ => Err(Error::Forbidden)
                .tap_err(|_| tracing::debug!("{} tried accessing an admin route", user.email)),
        }
    }

    pub async fn check(user: VerifiedUser, users: &UserCollection) -> Result<Self, Error> {
        let account = users.find_by_email(&user.email).await?;

        Self::authorize(user, account.as_ref())
    }
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for AdminUser
where
    FirebaseAuth: FromRef<S>,
    UserCollection: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let user = parts.extract_with_state::<VerifiedUser, _>(state).await?;
        let users = UserCollection::from_ref(state);

        Self::check(user, &users).await
    }
}
