use std::str::FromStr;

use axum::{
    extract::{FromRequest, FromRequestParts, Path},
    http::request::Parts,
    response::{IntoResponse, Response},
};
use bson::oid::ObjectId;
use serde::{Deserialize, Serialize};
use tap::TapFallible;
use time::OffsetDateTime;

use crate::error::Error;

#[derive(Serialize, Deserialize, Debug, Clone, Copy)]
pub struct ObjectIdString(#[serde(with = "object_id_string")] pub ObjectId);

impl From<ObjectId> for ObjectIdString {
    fn from(value: ObjectId) -> Self {
        Self(value)
    }
}

impl std::ops::Deref for ObjectIdString {
    type Target = ObjectId;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl std::cmp::PartialEq for ObjectIdString {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}
impl std::cmp::Eq for ObjectIdString {}

impl std::cmp::PartialEq<ObjectId> for ObjectIdString {
    fn eq(&self, other: &ObjectId) -> bool {
        self.0 == *other
    }
}

mod object_id_string {
    use bson::oid::ObjectId;
    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(id: &ObjectId, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&id.to_hex())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<ObjectId, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct FormattedDateTime(#[serde(with = "time::serde::rfc3339")] pub OffsetDateTime);

impl From<bson::DateTime> for FormattedDateTime {
    fn from(value: bson::DateTime) -> Self {
        Self(value.into())
    }
}

impl From<OffsetDateTime> for FormattedDateTime {
    fn from(value: OffsetDateTime) -> Self {
        Self(value)
    }
}

/// Reads a timestamp stored either as a BSON date or as an RFC 3339 string.
/// Older documents carry the string form.
pub mod flexible_date {
    use bson::Bson;
    use serde::{de::Error as _, Deserialize, Deserializer};
    use time::{format_description::well_known::Rfc3339, OffsetDateTime};

    fn from_bson<E: serde::de::Error>(value: Bson) -> Result<bson::DateTime, E> {
        match value {
            Bson::DateTime(date) => Ok(date),
            Bson::String(text) => OffsetDateTime::parse(&text, &Rfc3339)
                .map(Into::into)
                .map_err(E::custom),
            other => Err(E::custom(format!(
                "expected date or date string, found {:?}",
                other.element_type()
            ))),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<bson::DateTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        from_bson(Bson::deserialize(deserializer)?)
    }

    pub fn deserialize_option<'de, D>(deserializer: D) -> Result<Option<bson::DateTime>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<Bson>::deserialize(deserializer)? {
            None | Some(Bson::Null) => Ok(None),
            Some(value) => from_bson(value).map(Some),
        }
    }
}

pub fn now() -> bson::DateTime {
    OffsetDateTime::now_utc().into()
}

/// JSON body extractor and response. Malformed bodies are reported through
/// [`Error`] like every other failure.
#[derive(Debug, Clone, Copy, Default, FromRequest)]
#[from_request(via(axum::Json), rejection(Error))]
pub struct Json<T>(pub T);

impl<T> IntoResponse for Json<T>
where
    T: Serialize,
{
    fn into_response(self) -> Response {
        axum::Json(self.0).into_response()
    }
}

/// Query string extractor reporting bad parameters through [`Error`].
#[derive(Debug, Clone, Copy, Default, FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(Error))]
pub struct Query<T>(pub T);

/// Single `:id` path segment parsed as an [`ObjectId`]. Ids that do not parse
/// cannot name any document, so they are reported as missing.
#[derive(Debug, Clone, Copy)]
pub struct PathObjectId(pub ObjectId);

#[axum::async_trait]
impl<S> FromRequestParts<S> for PathObjectId
where
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(id) = Path::<String>::from_request_parts(parts, state).await?;

        ObjectId::from_str(&id)
            .map(Self)
            .map_err(|_| Error::NoResource)
            .tap_err(|_| tracing::debug!("malformed object id {:?}", id))
    }
}

#[cfg(test)]
mod tests {
    use bson::oid::ObjectId;

    use super::{FormattedDateTime, ObjectIdString};

    #[test]
    fn test_object_id_string_serializes_as_hex() {
        let id = ObjectId::new();
        let json = serde_json::to_value(ObjectIdString(id)).unwrap();
        assert_eq!(json, serde_json::Value::String(id.to_hex()));

        let back: ObjectIdString = serde_json::from_value(json).unwrap();
        assert_eq!(back, id);
    }

    #[derive(serde::Deserialize)]
    struct Stamped {
        #[serde(with = "super::flexible_date")]
        at: bson::DateTime,

        #[serde(default, deserialize_with = "super::flexible_date::deserialize_option")]
        seen: Option<bson::DateTime>,
    }

    #[test]
    fn test_flexible_date_accepts_string_and_date() {
        let date = bson::DateTime::from_millis(1_748_772_000_000);

        let stamped: Stamped = bson::from_document(bson::doc! {
            "at": "2025-06-01T10:00:00.000Z",
            "seen": date,
        })
        .unwrap();
        assert_eq!(stamped.at, date);
        assert_eq!(stamped.seen, Some(date));

        let stamped: Stamped = bson::from_document(bson::doc! { "at": date }).unwrap();
        assert_eq!(stamped.at, date);
        assert_eq!(stamped.seen, None);

        let stamped: Stamped =
            bson::from_document(bson::doc! { "at": date, "seen": bson::Bson::Null }).unwrap();
        assert_eq!(stamped.seen, None);

        assert!(bson::from_document::<Stamped>(bson::doc! { "at": 5 }).is_err());
        assert!(bson::from_document::<Stamped>(bson::doc! { "at": "yesterday" }).is_err());
    }

    #[test]
    fn test_formatted_date_time_is_rfc3339() {
        let date = bson::DateTime::from_millis(0);
        let json = serde_json::to_value(FormattedDateTime::from(date)).unwrap();
        assert_eq!(json, serde_json::json!("1970-01-01T00:00:00Z"));
    }
}
