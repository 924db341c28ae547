use std::collections::HashSet;

use bson::oid::ObjectId;
use mongodb::{options::IndexOptions, IndexModel};
use serde::{Deserialize, Serialize};

use crate::{app::AppState, mongo_ext::Collection};

#[derive(Serialize, Deserialize, Debug)]
pub struct MigrateModel {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub version: i64,
    pub applied_at: bson::DateTime,
}

#[derive(Clone)]
pub struct MigrationCollection(pub Collection<MigrateModel>);

impl std::ops::Deref for MigrationCollection {
    type Target = Collection<MigrateModel>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl MigrationCollection {
    pub async fn applied_versions(&self) -> Result<HashSet<i64>, crate::error::Error> {
        Ok(self
            .find_all(None, None)
            .await?
            .into_iter()
            .map(|it| it.version)
            .collect())
    }

    pub async fn insert_version(&self, version: i64) -> Result<(), mongodb::error::Error> {
        self.insert_one(
            MigrateModel {
                id: ObjectId::new(),
                version,
                applied_at: crate::util::now(),
            },
            None,
        )
        .await
        .map(|_| ())
    }
}

fn unique_index(keys: bson::Document) -> IndexModel {
    IndexModel::builder()
        .keys(keys)
        .options(IndexOptions::builder().unique(true).build())
        .build()
}

fn index(keys: bson::Document) -> IndexModel {
    IndexModel::builder().keys(keys).build()
}

impl AppState {
    async fn v1_migrate(&self) -> Result<(), mongodb::error::Error> {
        self.migrate_collection
            .create_index(unique_index(bson::doc! { "version": 1 }), None)
            .await?;

        self.user_collection
            .create_index(unique_index(bson::doc! { "email": 1 }), None)
            .await?;

        self.rider_collection
            .create_indexes(
                [
                    index(bson::doc! { "email": 1 }),
                    index(bson::doc! { "status": 1 }),
                ],
                None,
            )
            .await?;

        self.parcel_collection
            .create_indexes(
                [
                    index(bson::doc! { "created_by": 1, "created_at": -1 }),
                    index(bson::doc! { "payment_status": 1, "delivery_status": 1 }),
                ],
                None,
            )
            .await?;

        Ok(())
    }

    /// Applies every migration not yet recorded in the `migrations`
    /// collection. Index builds are idempotent, so a run interrupted before
    /// its version is recorded is simply repeated next start.
    pub async fn run_migration(&self) -> Result<(), crate::error::Error> {
        let applied = self.migrate_collection.applied_versions().await?;

        macro_rules! migrate {
            ($version:expr, $fun:ident) => {
                if !applied.contains(&$version) {
                    tracing::info!("running migration version {}", $version);
                    self.$fun().await?;
                    self.migrate_collection.insert_version($version).await?;
                }
            };
        }

        migrate!(1, v1_migrate);

        Ok(())
    }
}
