use axum::extract::State;
use serde::{Deserialize, Serialize};
use tap::TapFallible;

use crate::{error::Error, util::Json};

pub const CURRENCY: &str = "usd";

#[derive(Debug, thiserror::Error)]
pub enum PaymentError {
    #[error("payment processor unreachable: {0}")]
    Request(#[from] reqwest::Error),

    #[error("payment processor rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },
}

/// Client for the processor's payment intent endpoint.
#[derive(Clone)]
pub struct PaymentGateway {
    http: reqwest::Client,
    api_base: String,
    secret_key: String,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PaymentIntent {
    pub id: String,
    pub client_secret: String,
    pub amount: i64,
    pub currency: String,
}

#[derive(Deserialize, Debug)]
struct ProcessorErrorEnvelope {
    error: ProcessorError,
}

#[derive(Deserialize, Debug)]
struct ProcessorError {
    #[serde(default)]
    message: Option<String>,
}

impl PaymentGateway {
    pub fn new(api_base: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            secret_key: secret_key.into(),
        }
    }

    /// Creates a card payment intent for `amount` in cents.
    pub async fn create_intent(&self, amount: i64) -> Result<PaymentIntent, PaymentError> {
        let amount = amount.to_string();
        let form = [
            ("amount", amount.as_str()),
            ("currency", CURRENCY),
            ("payment_method_types[]", "card"),
        ];

        let response = self
            .http
            .post(format!("{}/v1/payment_intents", self.api_base))
            .bearer_auth(&self.secret_key)
            .form(&form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .json::<ProcessorErrorEnvelope>()
                .await
                .ok()
                .and_then(|it| it.error.message)
                .unwrap_or_else(|| "unknown error".to_string());

            return Err(PaymentError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response.json().await?)
    }
}

/// Converts a whole-unit amount from the request body into cents.
pub fn to_minor_units(amount: Option<&serde_json::Value>) -> Result<i64, Error> {
    let amount = match amount {
        Some(serde_json::Value::Number(number)) => number.as_f64(),
        Some(serde_json::Value::String(text)) => text.trim().parse::<f64>().ok(),
        _ => None,
    };

    let amount = match amount {
        Some(amount) if amount != 0.0 => amount,
        _ => return Err(Error::BadRequest("Amount is required.")),
    };

    let minor = (amount * 100.0).round();
    if !minor.is_finite() || minor < 1.0 {
        return Err(Error::BadRequest("Amount must be a positive number."));
    }

    Ok(minor as i64)
}

#[derive(Deserialize, Debug, Default)]
pub struct CreateIntentRequest {
    #[serde(default)]
    pub amount: Option<serde_json::Value>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CreateIntentResponse {
    pub client_secret: String,
}

#[tracing::instrument(skip_all)]
pub async fn create_payment_intent(
    State(payments): State<PaymentGateway>,
    Json(request): Json<CreateIntentRequest>,
) -> Result<Json<CreateIntentResponse>, Error> {
    let amount = to_minor_units(request.amount.as_ref())
        .tap_err(|_| tracing::debug!("rejected amount {:?}", request.amount))?;

    let intent = payments.create_intent(amount).await?;
    tracing::info!("created payment intent {} for {} cents", intent.id, amount);

    Ok(Json(CreateIntentResponse {
        client_secret: intent.client_secret,
    }))
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, net::SocketAddr};

    use assert_matches::assert_matches;
    use axum::{
        extract::State,
        headers::{authorization::Bearer, Authorization},
        http::StatusCode,
        response::IntoResponse,
        routing, Form, Router, TypedHeader,
    };

    use crate::{error::Error, util::Json};

    use super::{to_minor_units, CreateIntentRequest, PaymentError, PaymentGateway};

    const SECRET: &str = "sk_test_profast";

    async fn payment_intents(
        TypedHeader(Authorization(token)): TypedHeader<Authorization<Bearer>>,
        Form(form): Form<HashMap<String, String>>,
    ) -> axum::response::Response {
        if token.token() != SECRET {
            return (
                StatusCode::UNAUTHORIZED,
                Json(serde_json::json!({
                    "error": { "type": "invalid_request_error", "message": "Invalid API Key provided" }
                })),
            )
                .into_response();
        }

        assert_eq!(form.get("currency").map(String::as_str), Some("usd"));
        assert_eq!(
            form.get("payment_method_types[]").map(String::as_str),
            Some("card")
        );

        let amount: i64 = form["amount"].parse().unwrap();
        Json(serde_json::json!({
            "id": "pi_123",
            "object": "payment_intent",
            "amount": amount,
            "currency": "usd",
            "client_secret": format!("pi_123_secret_{amount}"),
        }))
        .into_response()
    }

    /// Serves a stand-in for the processor API on a random local port.
    fn processor() -> SocketAddr {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let app = Router::new().route("/v1/payment_intents", routing::post(payment_intents));
        let server = axum::Server::from_tcp(listener)
            .unwrap()
            .serve(app.into_make_service());
        tokio::spawn(server);

        addr
    }

    #[test]
    fn test_minor_units() {
        let amount = |value: serde_json::Value| to_minor_units(Some(&value));

        assert_eq!(amount(serde_json::json!(5)).unwrap(), 500);
        assert_eq!(amount(serde_json::json!(19.99)).unwrap(), 1999);
        assert_eq!(amount(serde_json::json!("12.5")).unwrap(), 1250);
    }

    #[test]
    fn test_amount_required() {
        for value in [
            serde_json::json!(0),
            serde_json::json!(null),
            serde_json::json!("abc"),
            serde_json::json!(false),
        ] {
            let err = to_minor_units(Some(&value)).unwrap_err();
            assert_matches!(err, Error::BadRequest("Amount is required."));
        }

        let err = to_minor_units(None).unwrap_err();
        assert_matches!(err, Error::BadRequest("Amount is required."));
    }

    #[test]
    fn test_amount_must_be_positive() {
        for value in [serde_json::json!(-5), serde_json::json!(0.001)] {
            let err = to_minor_units(Some(&value)).unwrap_err();
            assert_matches!(err, Error::BadRequest("Amount must be a positive number."));
        }
    }

    #[tokio::test]
    async fn test_create_payment_intent() {
        let gateway = PaymentGateway::new(format!("http://{}/", processor()), SECRET);

        let Json(response) = super::create_payment_intent(
            State(gateway),
            Json(CreateIntentRequest {
                amount: Some(serde_json::json!(25)),
            }),
        )
        .await
        .unwrap();

        assert_eq!(response.client_secret, "pi_123_secret_2500");
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            serde_json::json!({ "clientSecret": "pi_123_secret_2500" })
        );
    }

    #[tokio::test]
    async fn test_rejected_by_processor() {
        let gateway = PaymentGateway::new(format!("http://{}", processor()), "sk_wrong");

        let err = gateway.create_intent(100).await.unwrap_err();
        assert_matches!(
            err,
            PaymentError::Rejected { status: 401, ref message } if message == "Invalid API Key provided"
        );

        let err = super::create_payment_intent(
            State(gateway),
            Json(CreateIntentRequest {
                amount: Some(serde_json::json!(1)),
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.public_message(), "Internal server error.");
    }

    #[tokio::test]
    async fn test_missing_amount_skips_processor() {
        let gateway = PaymentGateway::new("http://127.0.0.1:9", SECRET);

        let err = super::create_payment_intent(State(gateway), Json(CreateIntentRequest::default()))
            .await
            .unwrap_err();
        assert_matches!(err, Error::BadRequest("Amount is required."));
    }
}
