use std::ops::{Deref, DerefMut};

use bson::{oid::ObjectId, Bson, Document};
use mongodb::{
    error::{ErrorKind, WriteFailure},
    options::{FindOptions, UpdateModifications},
    results::{DeleteResult, InsertOneResult, UpdateResult},
    ClientSession,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::error::Error;

const DUPLICATE_KEY: i32 = 11000;

pub struct Collection<T>(pub mongodb::Collection<T>);

impl<T> Clone for Collection<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T> Deref for Collection<T> {
    type Target = mongodb::Collection<T>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<T> DerefMut for Collection<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl<T> From<mongodb::Collection<T>> for Collection<T> {
    fn from(value: mongodb::Collection<T>) -> Self {
        Self(value)
    }
}

impl<T> Collection<T>
where
    T: DeserializeOwned + Send + Sync + Unpin,
{
    pub async fn find_all(
        &self,
        filter: impl Into<Option<Document>>,
        options: impl Into<Option<FindOptions>>,
    ) -> Result<Vec<T>, Error> {
        let mut cursor = self.find(filter, options).await?;

        let mut vec = vec![];

        while cursor.advance().await? {
            vec.push(cursor.deserialize_current()?);
        }

        Ok(vec)
    }

    pub async fn find_one_by_id(&self, id: ObjectId) -> Result<Option<T>, Error> {
        self.find_one(bson::doc! { "_id": id }, None)
            .await
            .map_err(Into::into)
    }

    pub async fn update_one_by_id(
        &self,
        id: ObjectId,
        update: impl Into<UpdateModifications>,
    ) -> Result<UpdateResult, Error> {
        self.update_one(bson::doc! { "_id": id }, update, None)
            .await
            .map_err(Into::into)
    }
}

/// Starts a session with an open transaction. Dropping the session before
/// `commit_transaction` aborts every write made through it.
pub async fn start_transaction(client: &mongodb::Client) -> Result<ClientSession, Error> {
    let mut session = client.start_session(None).await?;

    let transaction_options = mongodb::options::TransactionOptions::builder()
        .read_concern(mongodb::options::ReadConcern::snapshot())
        .write_concern(
            mongodb::options::WriteConcern::builder()
                .w(mongodb::options::Acknowledgment::Majority)
                .build(),
        )
        .selection_criteria(mongodb::options::SelectionCriteria::ReadPreference(
            mongodb::options::ReadPreference::Primary,
        ))
        .build();

    session.start_transaction(transaction_options).await?;

    Ok(session)
}

pub fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    matches!(
        err.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(write)) if write.code == DUPLICATE_KEY
    )
}

/// Driver-independent summary of a write, returned by every mutating endpoint.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WriteResult {
    pub acknowledged: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub inserted_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_count: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified_count: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub upserted_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_count: Option<u64>,
}

fn id_string(id: &Bson) -> String {
    match id {
        Bson::ObjectId(id) => id.to_hex(),
        Bson::String(id) => id.clone(),
        other => other.to_string(),
    }
}

impl From<InsertOneResult> for WriteResult {
    fn from(value: InsertOneResult) -> Self {
        Self {
            acknowledged: true,
            inserted_id: Some(id_string(&value.inserted_id)),
            ..Default::default()
        }
    }
}

impl From<UpdateResult> for WriteResult {
    fn from(value: UpdateResult) -> Self {
        Self {
            acknowledged: true,
            matched_count: Some(value.matched_count),
            modified_count: Some(value.modified_count),
            upserted_id: value.upserted_id.as_ref().map(id_string),
            ..Default::default()
        }
    }
}

impl From<DeleteResult> for WriteResult {
    fn from(value: DeleteResult) -> Self {
        Self {
            acknowledged: true,
            deleted_count: Some(value.deleted_count),
            ..Default::default()
        }
    }
}
