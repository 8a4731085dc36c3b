use std::sync::Arc;

use chrono::Utc;
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;
use sqlx::SqlitePool;
use subtle::ConstantTimeEq;
use thiserror::Error;

use crate::{
    config::GatewayConfig,
    domain::{Invoice, InvoiceStatus, NewPayment, PaymentStatus},
    error::{AppError, Result},
    payments::{
        gateway::{ChargeGateway, ChargePayload, ChargeStatus, CreateChargeRequest, GatewayCharge},
        minimum_charge_display, to_minor_units, MIN_CHARGE_MINOR_UNITS, SUPPORTED_CURRENCIES,
    },
    repository::{CourseRepository, InvoiceRepository, PaymentRepository},
};

type HmacSha256 = Hmac<Sha256>;

/// Domain-level classification of a charge attempt that did not settle.
/// Carried inside a successful HTTP envelope: a declined card is not a
/// transport failure and the invoice stays payable.
#[derive(Debug, Clone, Error)]
pub enum ChargeError {
    #[error("Invoice amount is below the gateway minimum of {minimum}")]
    AmountTooSmall { minimum: String },
    #[error("{message}")]
    Gateway { code: String, message: String },
}

impl ChargeError {
    pub fn code(&self) -> &str {
        match self {
            ChargeError::AmountTooSmall { .. } => "amount_too_small",
            ChargeError::Gateway { code, .. } => code,
        }
    }
}

/// Result of one synchronous pay attempt. `warnings` surfaces secondary
/// failures (like a payment row that could not be written after a gateway
/// error) instead of swallowing them into the log.
#[derive(Debug)]
pub struct PayOutcome {
    pub paid: bool,
    pub charge_id: Option<String>,
    pub charge_status: Option<ChargeStatus>,
    pub payment_id: Option<i64>,
    pub error: Option<ChargeError>,
    pub warnings: Vec<String>,
}

impl PayOutcome {
    fn failed(error: ChargeError) -> Self {
        Self {
            paid: false,
            charge_id: None,
            charge_status: None,
            payment_id: None,
            error: Some(error),
            warnings: Vec::new(),
        }
    }
}

/// Business outcome of one webhook delivery. `Ignored` is benign: the
/// gateway gets a 200 and will not redeliver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookOutcome {
    Processed,
    Ignored(&'static str),
}

/// Charge orchestration and webhook reconciliation. Both entry points
/// serialize on the invoice row inside a transaction, so an invoice reaches
/// `paid` at most once no matter how the synchronous result and the webhook
/// deliveries interleave.
pub struct PaymentService {
    pool: SqlitePool,
    invoice_repo: Arc<dyn InvoiceRepository>,
    payment_repo: Arc<dyn PaymentRepository>,
    course_repo: Arc<dyn CourseRepository>,
    gateway: Arc<dyn ChargeGateway>,
    config: GatewayConfig,
}

impl PaymentService {
    pub fn new(
        pool: SqlitePool,
        invoice_repo: Arc<dyn InvoiceRepository>,
        payment_repo: Arc<dyn PaymentRepository>,
        course_repo: Arc<dyn CourseRepository>,
        gateway: Arc<dyn ChargeGateway>,
        config: GatewayConfig,
    ) -> Self {
        Self {
            pool,
            invoice_repo,
            payment_repo,
            course_repo,
            gateway,
            config,
        }
    }

    /// Synchronous pay path: validate, lock the invoice row, create the
    /// gateway charge, record the payment, and apply the outcome.
    pub async fn pay(
        &self,
        invoice_id: i64,
        student_id: i64,
        token: &str,
        currency: Option<&str>,
    ) -> Result<PayOutcome> {
        if token.trim().is_empty() {
            return Err(AppError::Validation(
                "Payment token must not be empty.".to_string(),
            ));
        }
        let currency = self.resolve_currency(currency)?;

        // Optimistic checks outside the transaction; re-validated under the
        // row lock below.
        let invoice = self
            .invoice_repo
            .find_by_id(invoice_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Invoice not found".to_string()))?;
        if invoice.student_id != student_id {
            return Err(AppError::Forbidden);
        }
        Self::ensure_payable(&invoice)?;

        let course = self
            .course_repo
            .find_by_id(invoice.course_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Course not found".to_string()))?;

        let amount_minor = to_minor_units(invoice.amount, &currency);

        let mut tx = self.pool.begin().await?;
        let invoice = self
            .invoice_repo
            .lock_for_update(&mut tx, invoice_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Invoice not found".to_string()))?;
        Self::ensure_payable(&invoice)?;

        if amount_minor < MIN_CHARGE_MINOR_UNITS {
            let minimum = minimum_charge_display(&currency);
            tracing::warn!(
                invoice_id,
                amount = invoice.amount,
                %currency,
                converted_amount = amount_minor,
                "charge amount below gateway minimum"
            );
            tx.rollback().await?;
            return Ok(PayOutcome::failed(ChargeError::AmountTooSmall { minimum }));
        }

        let request = CreateChargeRequest {
            amount: amount_minor,
            currency: currency.clone(),
            token: token.to_string(),
            description: format!("Course fee - {} (invoice #{})", course.name, invoice.id),
            invoice_id: invoice.id,
            course_id: invoice.course_id,
            student_id: invoice.student_id,
            year_month: invoice.year_month.clone(),
        };

        match self.gateway.create_charge(&request).await {
            Ok(charge) => {
                let payment_id = self
                    .payment_repo
                    .insert(
                        &mut tx,
                        NewPayment {
                            invoice_id: invoice.id,
                            gateway_charge_id: Some(charge.id.clone()),
                            amount: invoice.amount,
                            currency: currency.clone(),
                            status: Self::payment_status_for(charge.status),
                            payment_method: Some(charge.payment_method.clone()),
                            raw_response: Some(charge.raw.clone()),
                            error_message: None,
                            paid_at: (charge.status == ChargeStatus::Successful)
                                .then(Utc::now),
                        },
                    )
                    .await?;

                tracing::info!(
                    invoice_id,
                    payment_id,
                    charge_id = %charge.id,
                    status = charge.status.as_str(),
                    amount = amount_minor,
                    %currency,
                    "gateway charge created"
                );

                let paid = self
                    .apply_charge_outcome(&mut tx, &invoice, &charge, payment_id)
                    .await?;
                tx.commit().await?;

                Ok(PayOutcome {
                    paid,
                    charge_id: Some(charge.id),
                    charge_status: Some(charge.status),
                    payment_id: Some(payment_id),
                    error: None,
                    warnings: Vec::new(),
                })
            }
            Err(err) => {
                tracing::error!(
                    invoice_id,
                    code = err.code(),
                    error = %err,
                    %currency,
                    "gateway charge creation failed"
                );

                // Best-effort ledger entry; a failure to write it must not
                // mask the original gateway error.
                let mut warnings = Vec::new();
                let mut payment_id = None;
                let record = self
                    .payment_repo
                    .insert(
                        &mut tx,
                        NewPayment {
                            invoice_id: invoice.id,
                            gateway_charge_id: None,
                            amount: invoice.amount,
                            currency: currency.clone(),
                            status: PaymentStatus::Failed,
                            payment_method: None,
                            raw_response: None,
                            error_message: Some(err.to_string()),
                            paid_at: None,
                        },
                    )
                    .await;
                match record {
                    Ok(id) => payment_id = Some(id),
                    Err(e) => {
                        tracing::error!(invoice_id, error = %e, "failed to record payment attempt");
                        warnings.push(format!("failed to record payment attempt: {e}"));
                    }
                }
                tx.commit().await?;

                Ok(PayOutcome {
                    paid: false,
                    charge_id: None,
                    charge_status: None,
                    payment_id,
                    error: Some(ChargeError::Gateway {
                        code: err.code().to_string(),
                        message: err.to_string(),
                    }),
                    warnings,
                })
            }
        }
    }

    /// Apply a freshly created charge to the invoice and its payment row.
    /// Only `successful` settles the invoice; `failed` marks the payment and
    /// leaves the invoice payable; `pending` waits for the webhook.
    async fn apply_charge_outcome(
        &self,
        conn: &mut sqlx::SqliteConnection,
        invoice: &Invoice,
        charge: &GatewayCharge,
        payment_id: i64,
    ) -> Result<bool> {
        match charge.status {
            ChargeStatus::Successful => {
                self.invoice_repo
                    .mark_paid(conn, invoice.id, &charge.id)
                    .await?;
                self.payment_repo.mark_successful(conn, payment_id).await?;
                Ok(true)
            }
            ChargeStatus::Failed => {
                let message = charge
                    .failure_message
                    .as_deref()
                    .unwrap_or("Payment failed");
                self.payment_repo
                    .mark_failed(conn, payment_id, message)
                    .await?;
                Ok(false)
            }
            ChargeStatus::Pending | ChargeStatus::Unknown => Ok(false),
        }
    }

    /// Recompute the HMAC-SHA256 of the raw request body and compare it to
    /// the supplied hex signature in constant time. Must run on the exact
    /// bytes the gateway signed, never a re-serialization.
    pub fn verify_webhook_signature(&self, payload: &[u8], signature: &str) -> bool {
        let mut mac = match HmacSha256::new_from_slice(self.config.secret_key.as_bytes()) {
            Ok(mac) => mac,
            Err(_) => return false,
        };
        mac.update(payload);
        let expected = mac.finalize().into_bytes();

        let provided = match hex::decode(signature.trim()) {
            Ok(bytes) => bytes,
            Err(_) => return false,
        };

        expected.as_slice().ct_eq(provided.as_slice()).into()
    }

    /// Webhook reconciliation: idempotent payment upsert keyed by the
    /// gateway charge id, plus an at-most-once promotion of the invoice to
    /// `paid`, all inside one transaction holding the invoice row lock.
    pub async fn handle_webhook_event(&self, event: &Value) -> Result<WebhookOutcome> {
        let key = event.get("key").and_then(Value::as_str).unwrap_or_default();
        if key != "charge.create" && key != "charge.complete" {
            return Ok(WebhookOutcome::Ignored("event type not handled"));
        }

        let Some(data) = event.get("data") else {
            return Ok(WebhookOutcome::Ignored("event carried no charge data"));
        };
        let payload: ChargePayload = match serde_json::from_value(data.clone()) {
            Ok(payload) => payload,
            Err(_) => return Ok(WebhookOutcome::Ignored("malformed charge payload")),
        };

        let Some(charge_id) = payload.id.clone().filter(|id| !id.is_empty()) else {
            return Ok(WebhookOutcome::Ignored("charge id missing"));
        };
        let Some(invoice_id) = payload.metadata.invoice_id else {
            return Ok(WebhookOutcome::Ignored("invoice id missing from metadata"));
        };

        let mut tx = self.pool.begin().await?;
        let Some(invoice) = self.invoice_repo.lock_for_update(&mut tx, invoice_id).await? else {
            tracing::warn!(invoice_id, charge_id = %charge_id, "webhook references unknown invoice");
            tx.rollback().await?;
            return Ok(WebhookOutcome::Ignored("invoice not found"));
        };

        let derived_status = Self::payment_status_for(payload.status);
        let paid_at = (payload.status == ChargeStatus::Successful).then(Utc::now);

        match self.payment_repo.find_by_charge_id(&mut tx, &charge_id).await? {
            None => {
                self.payment_repo
                    .insert(
                        &mut tx,
                        NewPayment {
                            invoice_id,
                            gateway_charge_id: Some(charge_id.clone()),
                            amount: invoice.amount,
                            currency: payload
                                .currency
                                .clone()
                                .map(|c| c.to_lowercase())
                                .unwrap_or_else(|| self.config.default_currency.to_lowercase()),
                            status: derived_status,
                            payment_method: Some(
                                payload
                                    .source
                                    .as_ref()
                                    .map(|s| s.source_type.clone())
                                    .unwrap_or_else(|| "unknown".to_string()),
                            ),
                            raw_response: Some(data.clone()),
                            error_message: payload.failure_message.clone(),
                            paid_at,
                        },
                    )
                    .await?;
            }
            // Redelivery with the same derived status is a no-op; only a
            // state change is worth a write.
            Some(existing) if existing.status != derived_status => {
                self.payment_repo
                    .record_event(
                        &mut tx,
                        existing.id,
                        derived_status,
                        data,
                        payload.failure_message.as_deref(),
                        paid_at,
                    )
                    .await?;
            }
            Some(_) => {}
        }

        if payload.status == ChargeStatus::Successful {
            if invoice.is_paid() {
                tracing::info!(
                    invoice_id,
                    charge_id = %charge_id,
                    "invoice already paid, skipping update"
                );
            } else {
                self.invoice_repo
                    .mark_paid(&mut tx, invoice_id, &charge_id)
                    .await?;
            }
        }

        tx.commit().await?;

        tracing::info!(
            invoice_id,
            charge_id = %charge_id,
            status = payload.status.as_str(),
            event = key,
            "webhook event processed"
        );

        Ok(WebhookOutcome::Processed)
    }

    fn payment_status_for(status: ChargeStatus) -> PaymentStatus {
        match status {
            ChargeStatus::Successful => PaymentStatus::Successful,
            ChargeStatus::Failed => PaymentStatus::Failed,
            ChargeStatus::Pending | ChargeStatus::Unknown => PaymentStatus::Pending,
        }
    }

    fn resolve_currency(&self, currency: Option<&str>) -> Result<String> {
        match currency {
            Some(c) => {
                let lowered = c.to_lowercase();
                if !SUPPORTED_CURRENCIES.contains(&lowered.as_str()) {
                    return Err(AppError::Validation(format!(
                        "Unsupported currency '{}'. Supported currencies: THB, JPY, SGD, USD.",
                        c
                    )));
                }
                Ok(lowered)
            }
            None => Ok(self.config.default_currency.to_lowercase()),
        }
    }

    fn ensure_payable(invoice: &Invoice) -> Result<()> {
        match invoice.status {
            InvoiceStatus::Sent => Ok(()),
            InvoiceStatus::Paid => Err(AppError::Conflict(
                "Invoice is already paid.".to_string(),
            )),
            InvoiceStatus::Rejected => Err(AppError::Conflict(
                "Invoice was rejected and can no longer be paid.".to_string(),
            )),
            InvoiceStatus::Pending => Err(AppError::Validation(
                "Only sent invoices can be paid.".to_string(),
            )),
        }
    }
}
