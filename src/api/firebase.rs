use std::{collections::HashMap, path::Path, sync::Arc};

use jsonwebtoken::{
    decode, decode_header,
    jwk::{Jwk, JwkSet},
    Algorithm, DecodingKey, Validation,
};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// Public keys used to sign Firebase ID tokens.
pub const SECURE_TOKEN_JWKS_URI: &str =
    "https://www.googleapis.com/service_accounts/v1/jwk/securetoken@system.gserviceaccount.com";

const SECURE_TOKEN_ISSUER: &str = "https://securetoken.google.com/";

#[derive(Debug, thiserror::Error)]
pub enum FirebaseError {
    #[error("cannot read service account file {path}: {source}")]
    CredentialsIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid service account file: {0}")]
    CredentialsFormat(#[from] serde_json::Error),

    #[error("JWKS fetch failed: {0}")]
    JwksFetch(#[from] reqwest::Error),

    #[error("token is missing the 'kid' header")]
    MissingKid,

    #[error("no signing key found for kid '{0}'")]
    KeyNotFound(String),

    #[error("token validation failed: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),
}

/// The parts of a Google service-account file this server needs.
#[derive(Deserialize, Debug, Clone)]
pub struct ServiceAccount {
    pub project_id: String,
    #[serde(default)]
    pub client_email: Option<String>,
}

impl ServiceAccount {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, FirebaseError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| FirebaseError::CredentialsIo {
            path: path.display().to_string(),
            source,
        })?;

        Ok(serde_json::from_str(&raw)?)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct IdTokenClaims {
    pub sub: String,
    pub aud: String,
    pub iss: String,
    pub exp: i64,
    pub iat: i64,

    #[serde(default)]
    pub email: Option<String>,

    #[serde(default)]
    pub email_verified: bool,

    #[serde(default)]
    pub name: Option<String>,
}

/// Verifies Firebase ID tokens against Google's published signing keys.
///
/// Keys are cached by `kid`. A token signed with an unknown `kid` triggers one
/// refresh of the key set before it is rejected.
#[derive(Clone)]
pub struct FirebaseAuth {
    project_id: String,
    jwks_uri: String,
    http: reqwest::Client,
    keys: Arc<RwLock<HashMap<String, Jwk>>>,
}

impl FirebaseAuth {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self::with_jwks_uri(project_id, SECURE_TOKEN_JWKS_URI)
    }

    pub fn with_jwks_uri(project_id: impl Into<String>, jwks_uri: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            jwks_uri: jwks_uri.into(),
            http: reqwest::Client::new(),
            keys: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Builds a verifier for the project named in the service-account file,
    /// unless `project_id` overrides it.
    pub fn from_credentials(
        path: impl AsRef<Path>,
        project_id: Option<String>,
    ) -> Result<Self, FirebaseError> {
        let project_id = match project_id {
            Some(project_id) => project_id,
            None => ServiceAccount::from_file(path)?.project_id,
        };

        Ok(Self::new(project_id))
    }

    /// Replaces the cached key set.
    pub fn with_keys(mut self, keys: JwkSet) -> Self {
        self.keys = Arc::new(RwLock::new(index_keys(keys)));
        self
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    fn validation(&self) -> Validation {
        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_issuer(&[format!("{SECURE_TOKEN_ISSUER}{}", self.project_id)]);
        validation.set_audience(&[&self.project_id]);
        validation
    }

    pub async fn verify_id_token(&self, token: &str) -> Result<IdTokenClaims, FirebaseError> {
        let header = decode_header(token)?;
        let kid = header.kid.ok_or(FirebaseError::MissingKid)?;

        let jwk = self.signing_key(&kid).await?;
        let key = DecodingKey::from_jwk(&jwk)?;

        let token = decode::<IdTokenClaims>(token, &key, &self.validation())?;

        Ok(token.claims)
    }

    async fn signing_key(&self, kid: &str) -> Result<Jwk, FirebaseError> {
        {
            let keys = self.keys.read().await;
            if let Some(jwk) = keys.get(kid) {
                return Ok(jwk.clone());
            }
        }

        self.refresh_keys().await?;

        self.keys
            .read()
            .await
            .get(kid)
            .cloned()
            .ok_or_else(|| FirebaseError::KeyNotFound(kid.to_string()))
    }

    pub async fn refresh_keys(&self) -> Result<(), FirebaseError> {
        tracing::debug!("fetching signing keys from {}", self.jwks_uri);

        let keys: JwkSet = self
            .http
            .get(&self.jwks_uri)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let keys = index_keys(keys);
        tracing::info!("cached {} signing keys", keys.len());
        *self.keys.write().await = keys;

        Ok(())
    }
}

fn index_keys(keys: JwkSet) -> HashMap<String, Jwk> {
    keys.keys
        .into_iter()
        .filter_map(|jwk| jwk.common.key_id.clone().map(|kid| (kid, jwk)))
        .collect()
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use jsonwebtoken::{Algorithm, EncodingKey, Header};

    use crate::api::tests::{id_token, sign_claims, test_firebase, TEST_PROJECT};

    use super::{FirebaseError, IdTokenClaims, ServiceAccount};

    fn claims(email: Option<&str>, audience: &str, exp_offset: i64) -> IdTokenClaims {
        let now = time::OffsetDateTime::now_utc().unix_timestamp();
        IdTokenClaims {
            sub: "uid-1".to_string(),
            aud: audience.to_string(),
            iss: format!("https://securetoken.google.com/{audience}"),
            exp: now + exp_offset,
            iat: now,
            email: email.map(ToString::to_string),
            email_verified: true,
            name: None,
        }
    }

    #[tokio::test]
    async fn test_verify_valid_token() {
        let firebase = test_firebase();

        let claims = firebase
            .verify_id_token(&id_token("rider@example.com"))
            .await
            .unwrap();

        assert_eq!(claims.email.as_deref(), Some("rider@example.com"));
        assert_eq!(claims.aud, TEST_PROJECT);
    }

    #[tokio::test]
    async fn test_reject_other_project() {
        let firebase = test_firebase();
        let token = sign_claims(&claims(Some("a@x.com"), "other-project", 3600));

        let err = firebase.verify_id_token(&token).await.unwrap_err();
        assert_matches!(err, FirebaseError::Jwt(_));
    }

    #[tokio::test]
    async fn test_reject_expired_token() {
        let firebase = test_firebase();
        let token = sign_claims(&claims(Some("a@x.com"), TEST_PROJECT, -3600));

        let err = firebase.verify_id_token(&token).await.unwrap_err();
        assert_matches!(err, FirebaseError::Jwt(_));
    }

    #[tokio::test]
    async fn test_reject_garbage() {
        let firebase = test_firebase();

        let err = firebase.verify_id_token("not-a-jwt").await.unwrap_err();
        assert_matches!(err, FirebaseError::Jwt(_));
    }

    #[tokio::test]
    async fn test_reject_missing_kid() {
        let firebase = test_firebase();
        let token = jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            &claims(Some("a@x.com"), TEST_PROJECT, 3600),
            &EncodingKey::from_secret(b"secret"),
        )
        .unwrap();

        let err = firebase.verify_id_token(&token).await.unwrap_err();
        assert_matches!(err, FirebaseError::MissingKid);
    }

    #[tokio::test]
    async fn test_unknown_kid_refreshes_keys() {
        let firebase = test_firebase();
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some("rotated-key".to_string());
        let token = jsonwebtoken::encode(
            &header,
            &claims(Some("a@x.com"), TEST_PROJECT, 3600),
            &EncodingKey::from_rsa_pem(include_bytes!("../../testdata/identity_test_key.pem"))
                .unwrap(),
        )
        .unwrap();

        // the test key endpoint is unreachable, so the refresh itself fails
        let err = firebase.verify_id_token(&token).await.unwrap_err();
        assert_matches!(err, FirebaseError::JwksFetch(_));
    }

    #[test]
    fn test_service_account_missing_file() {
        let err = ServiceAccount::from_file("./does-not-exist.json").unwrap_err();
        assert_matches!(err, FirebaseError::CredentialsIo { .. });
    }

    #[test]
    fn test_service_account_parse() {
        let account: ServiceAccount = serde_json::from_str(
            r#"{
                "type": "service_account",
                "project_id": "profast-test",
                "client_email": "firebase-adminsdk@profast-test.iam.gserviceaccount.com"
            }"#,
        )
        .unwrap();

        assert_eq!(account.project_id, "profast-test");
    }
}
