use axum::{extract::FromRef, routing, Router};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    api::{
        firebase::FirebaseAuth,
        parcel::{self, ParcelCollection},
        payment::{self, PaymentGateway},
        rider::{self, RiderCollection},
        user::{self, UserCollection},
    },
    config::Config,
    migrate::MigrationCollection,
};

#[derive(FromRef, Clone)]
pub struct AppState {
    pub firebase: FirebaseAuth,
    pub payments: PaymentGateway,

    pub mongo_client: mongodb::Client,
    pub migrate_collection: MigrationCollection,
    pub user_collection: UserCollection,
    pub rider_collection: RiderCollection,
    pub parcel_collection: ParcelCollection,
}

impl AppState {
    pub async fn new(
        mongo_url: &str,
        database_name: &str,
        firebase: FirebaseAuth,
        payments: PaymentGateway,
    ) -> Result<Self, mongodb::error::Error> {
        let mongo_client_opt = mongodb::options::ClientOptions::parse(mongo_url).await?;
        let mongo_client = mongodb::Client::with_options(mongo_client_opt)?;

        let db = mongo_client.database(database_name);
        Ok(Self {
            firebase,
            payments,

            mongo_client,
            migrate_collection: MigrationCollection(db.collection("migrations").into()),
            user_collection: UserCollection(db.collection("users").into()),
            rider_collection: RiderCollection(db.collection("riders").into()),
            parcel_collection: ParcelCollection(db.collection("parcels").into()),
        })
    }

    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        let firebase = FirebaseAuth::from_credentials(
            &config.firebase_credentials,
            config.firebase_project_id.clone(),
        )?;
        tracing::info!("verifying id tokens for project {}", firebase.project_id());

        let payments = PaymentGateway::new(&config.stripe_api_base, &config.stripe_secret_key);

        Ok(Self::new(&config.mongodb_uri, &config.database_name, firebase, payments).await?)
    }
}

async fn index() -> &'static str {
    "Profast community"
}

pub fn router(app_state: AppState) -> Router {
    Router::new()
        .route("/", routing::get(index))
        .route("/users", routing::post(user::sign_in).get(user::index))
        .route("/users/search", routing::get(user::search))
        .route("/users/admin/:id", routing::patch(user::grant_admin))
        .route("/users/admin/:id/remove", routing::patch(user::revoke_admin))
        .route("/users/role/:email", routing::get(user::get_role))
        .route("/parcels", routing::post(parcel::create).get(parcel::index))
        .route("/parcels-pending", routing::get(parcel::index_by_status))
        .route(
            "/parcel/:id",
            routing::get(parcel::show).patch(parcel::update_payment_status),
        )
        .route("/parcels/assign-rider/:id", routing::patch(parcel::assign_rider))
        .route("/riders", routing::post(rider::apply).get(rider::approved))
        .route("/riders/delete", routing::post(rider::remove))
        .route("/api/riders", routing::get(rider::index))
        .route("/api/riders/accept", routing::post(rider::accept))
        .route("/api/riders/reject", routing::post(rider::reject))
        .route(
            "/create-payment-intent",
            routing::post(payment::create_payment_intent),
        )
        .with_state(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
