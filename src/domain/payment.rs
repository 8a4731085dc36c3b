use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One attempted charge against an invoice, successful or not. Attempts
/// reported by the gateway are addressed by `gateway_charge_id`; attempts
/// that failed before the gateway assigned an id carry `None`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub id: i64,
    pub invoice_id: i64,
    pub gateway_charge_id: Option<String>,
    pub amount: f64,
    pub currency: String,
    pub status: PaymentStatus,
    pub payment_method: Option<String>,
    pub raw_response: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Successful,
    Failed,
}

#[derive(Debug, Clone)]
pub struct NewPayment {
    pub invoice_id: i64,
    pub gateway_charge_id: Option<String>,
    pub amount: f64,
    pub currency: String,
    pub status: PaymentStatus,
    pub payment_method: Option<String>,
    pub raw_response: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
}
