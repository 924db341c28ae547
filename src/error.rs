use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};

use crate::api::payment::PaymentError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("validation error: {0}")]
    ValidationError(#[from] validator::ValidationErrors),

    #[error("No resource found")]
    NoResource,

    #[error("{0}")]
    DatabaseError(#[from] mongodb::error::Error),

    #[error("{0}")]
    BSONSerError(#[from] bson::ser::Error),

    #[error("{0}")]
    Unauthorized(UnauthorizedType),

    #[error("Forbidden access")]
    Forbidden,

    #[error("{0}")]
    BadRequest(&'static str),

    #[error("{0}")]
    InvalidRequest(String),

    #[error("{0}")]
    PaymentError(#[from] PaymentError),
}

#[derive(Debug, thiserror::Error)]
pub enum UnauthorizedType {
    #[error("Missing bearer token")]
    MissingToken,

    #[error("Invalid id token")]
    InvalidIdToken,

    #[error("Id token carries no email")]
    MissingEmail,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorJson {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<serde_json::Value>,
    pub r#type: String,
    pub message: String,
}

impl Error {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized(..) => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::NoResource => StatusCode::NOT_FOUND,
            Self::BadRequest(..) | Self::InvalidRequest(..) => StatusCode::BAD_REQUEST,
            Self::ValidationError(..) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::DatabaseError(..) | Self::BSONSerError(..) | Self::PaymentError(..) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Text sent to the client. Server-side failures keep their details in the log.
    pub fn public_message(&self) -> String {
        match self {
            Self::Unauthorized(..) => "Unauthorized access".to_string(),
            Self::DatabaseError(..) | Self::BSONSerError(..) | Self::PaymentError(..) => {
                "Internal server error.".to_string()
            }
            Self::ValidationError(..)
            | Self::NoResource
            | Self::Forbidden
            | Self::BadRequest(..)
            | Self::InvalidRequest(..) => self.to_string(),
        }
    }

    pub fn to_string_variant(&self) -> String {
        macro_rules! match_var {
            ($id:ident !) => {
                Self::$id
            };
            ($id:ident (..)) => {
                Self::$id(..)
            };
        }

        macro_rules! variant {
            ($($name:ident $tt:tt),+) => {
                match self {
                    $(
                        match_var!($name $tt) => {
                            stringify!($name)
                        }
                    )+
                }
            };
        }

        variant! {
            ValidationError(..),
            NoResource!,
            DatabaseError(..),
            BSONSerError(..),
            Unauthorized(..),
            Forbidden!,
            BadRequest(..),
            InvalidRequest(..),
            PaymentError(..)
        }
        .to_string()
    }
}

impl From<Error> for ErrorJson {
    fn from(err: Error) -> Self {
        let message = err.public_message();
        let r#type = err.to_string_variant();

        let errors = match err {
            Error::ValidationError(err) => serde_json::to_value(err).ok(),
            Error::NoResource
            | Error::DatabaseError(..)
            | Error::BSONSerError(..)
            | Error::Unauthorized(..)
            | Error::Forbidden
            | Error::BadRequest(..)
            | Error::InvalidRequest(..)
            | Error::PaymentError(..) => None,
        };

        Self {
            errors,
            r#type,
            message,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> axum::response::Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("error: {:?}", self);
        } else {
            tracing::debug!("rejected request: {}", self);
        }

        (status, Json(ErrorJson::from(self))).into_response()
    }
}

impl From<axum::extract::rejection::PathRejection> for Error {
    fn from(_value: axum::extract::rejection::PathRejection) -> Self {
        Self::NoResource
    }
}

impl From<axum::extract::rejection::JsonRejection> for Error {
    fn from(value: axum::extract::rejection::JsonRejection) -> Self {
        Self::InvalidRequest(value.body_text())
    }
}

impl From<axum::extract::rejection::QueryRejection> for Error {
    fn from(value: axum::extract::rejection::QueryRejection) -> Self {
        Self::InvalidRequest(value.body_text())
    }
}
