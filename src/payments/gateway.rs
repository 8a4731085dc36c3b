use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::config::GatewayConfig;

/// Charge state as reported by the gateway. Anything the gateway invents
/// later maps to `Unknown` and is treated like `pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChargeStatus {
    #[default]
    Pending,
    Successful,
    Failed,
    #[serde(other)]
    Unknown,
}

impl ChargeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChargeStatus::Pending => "pending",
            ChargeStatus::Successful => "successful",
            ChargeStatus::Failed => "failed",
            ChargeStatus::Unknown => "unknown",
        }
    }
}

/// Charge object as it appears on the wire, for both the create response and
/// webhook event payloads. Everything is optional; the reconciler decides
/// what is required.
#[derive(Debug, Clone, Deserialize)]
pub struct ChargePayload {
    pub id: Option<String>,
    #[serde(default)]
    pub status: ChargeStatus,
    pub currency: Option<String>,
    pub amount: Option<i64>,
    pub failure_message: Option<String>,
    pub source: Option<ChargeSource>,
    #[serde(default)]
    pub metadata: ChargeMetadata,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChargeSource {
    #[serde(rename = "type")]
    pub source_type: String,
}

/// Metadata we stamp on every charge so webhook events can be traced back to
/// an invoice. Gateways are not consistent about numeric types, so ids are
/// accepted as JSON numbers or strings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChargeMetadata {
    #[serde(default, deserialize_with = "flexible_id")]
    pub invoice_id: Option<i64>,
    #[serde(default, deserialize_with = "flexible_id")]
    pub course_id: Option<i64>,
    #[serde(default, deserialize_with = "flexible_id")]
    pub student_id: Option<i64>,
    #[serde(default)]
    pub year_month: Option<String>,
}

fn flexible_id<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| match v {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }))
}

/// A charge-creation response normalized at the adapter boundary: one shape
/// regardless of how the gateway serialized it, with the raw body kept for
/// the payment ledger.
#[derive(Debug, Clone)]
pub struct GatewayCharge {
    pub id: String,
    pub status: ChargeStatus,
    pub payment_method: String,
    pub failure_message: Option<String>,
    pub raw: Value,
}

#[derive(Debug, Clone)]
pub struct CreateChargeRequest {
    /// Amount in the currency's minor units.
    pub amount: i64,
    /// Lowercase 3-letter code.
    pub currency: String,
    /// Opaque single-use card token from the payment form.
    pub token: String,
    pub description: String,
    pub invoice_id: i64,
    pub course_id: i64,
    pub student_id: i64,
    pub year_month: String,
}

#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    #[error("{message}")]
    Api { code: String, message: String },
    #[error("gateway request failed: {0}")]
    Transport(String),
}

impl GatewayError {
    pub fn code(&self) -> &str {
        match self {
            GatewayError::Api { code, .. } => code,
            GatewayError::Transport(_) => "gateway_unavailable",
        }
    }
}

#[async_trait]
pub trait ChargeGateway: Send + Sync {
    async fn create_charge(
        &self,
        request: &CreateChargeRequest,
    ) -> std::result::Result<GatewayCharge, GatewayError>;
}

/// The real gateway: one outbound HTTPS call per charge attempt,
/// basic-authed with the secret key.
pub struct HttpChargeGateway {
    http: reqwest::Client,
    config: GatewayConfig,
}

impl HttpChargeGateway {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    fn classify_api_error(body: &Value) -> GatewayError {
        let code = body
            .get("code")
            .and_then(Value::as_str)
            .unwrap_or("gateway_error")
            .to_string();
        let message = body
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("The payment gateway rejected the request")
            .to_string();

        // Accounts without multi-currency enabled fail with a few different
        // codes and messages; collapse them into one stable code.
        let lowered = format!("{} {}", code, message).to_lowercase();
        if lowered.contains("multi_currency")
            || lowered.contains("multi-currency")
            || lowered.contains("currency conversion")
            || (lowered.contains("currency")
                && (lowered.contains("not supported")
                    || lowered.contains("unsupported")
                    || lowered.contains("invalid")))
        {
            return GatewayError::Api {
                code: "currency_not_supported".to_string(),
                message,
            };
        }

        GatewayError::Api { code, message }
    }
}

#[async_trait]
impl ChargeGateway for HttpChargeGateway {
    async fn create_charge(
        &self,
        request: &CreateChargeRequest,
    ) -> std::result::Result<GatewayCharge, GatewayError> {
        let form = [
            ("amount", request.amount.to_string()),
            ("currency", request.currency.clone()),
            ("card", request.token.clone()),
            ("description", request.description.clone()),
            ("metadata[invoice_id]", request.invoice_id.to_string()),
            ("metadata[course_id]", request.course_id.to_string()),
            ("metadata[student_id]", request.student_id.to_string()),
            ("metadata[year_month]", request.year_month.clone()),
        ];

        let response = self
            .http
            .post(format!("{}/charges", self.config.api_base))
            .basic_auth(&self.config.secret_key, Some(""))
            .form(&form)
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        let body: Value = response
            .json()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        if body.get("object").and_then(Value::as_str) == Some("error") {
            return Err(Self::classify_api_error(&body));
        }

        let payload: ChargePayload = serde_json::from_value(body.clone())
            .map_err(|e| GatewayError::Transport(format!("unparseable charge response: {e}")))?;

        let id = payload.id.filter(|id| !id.is_empty()).ok_or_else(|| GatewayError::Api {
            code: "invalid_response".to_string(),
            message: "charge response carried no id".to_string(),
        })?;

        Ok(GatewayCharge {
            id,
            status: payload.status,
            payment_method: payload
                .source
                .map(|s| s.source_type)
                .unwrap_or_else(|| "card".to_string()),
            failure_message: payload.failure_message,
            raw: body,
        })
    }
}

/// Scriptable in-process gateway for tests: enqueue the responses the next
/// charge attempts should see and inspect the requests afterwards.
#[derive(Default)]
pub struct FakeChargeGateway {
    responses: Mutex<VecDeque<std::result::Result<GatewayCharge, GatewayError>>>,
    requests: Mutex<Vec<CreateChargeRequest>>,
}

impl FakeChargeGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue_charge(&self, id: &str, status: ChargeStatus) {
        self.enqueue(Ok(GatewayCharge {
            id: id.to_string(),
            status,
            payment_method: "card".to_string(),
            failure_message: None,
            raw: serde_json::json!({ "id": id, "status": status.as_str() }),
        }));
    }

    pub fn enqueue_failed_charge(&self, id: &str, failure_message: &str) {
        self.enqueue(Ok(GatewayCharge {
            id: id.to_string(),
            status: ChargeStatus::Failed,
            payment_method: "card".to_string(),
            failure_message: Some(failure_message.to_string()),
            raw: serde_json::json!({
                "id": id,
                "status": "failed",
                "failure_message": failure_message,
            }),
        }));
    }

    pub fn enqueue_error(&self, error: GatewayError) {
        self.enqueue(Err(error));
    }

    fn enqueue(&self, response: std::result::Result<GatewayCharge, GatewayError>) {
        self.responses
            .lock()
            .expect("fake gateway lock poisoned")
            .push_back(response);
    }

    pub fn requests(&self) -> Vec<CreateChargeRequest> {
        self.requests
            .lock()
            .expect("fake gateway lock poisoned")
            .clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests
            .lock()
            .expect("fake gateway lock poisoned")
            .len()
    }
}

#[async_trait]
impl ChargeGateway for FakeChargeGateway {
    async fn create_charge(
        &self,
        request: &CreateChargeRequest,
    ) -> std::result::Result<GatewayCharge, GatewayError> {
        self.requests
            .lock()
            .expect("fake gateway lock poisoned")
            .push(request.clone());

        self.responses
            .lock()
            .expect("fake gateway lock poisoned")
            .pop_front()
            .unwrap_or_else(|| {
                Err(GatewayError::Transport(
                    "no scripted response in fake gateway".to_string(),
                ))
            })
    }
}
