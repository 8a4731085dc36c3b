use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::{
    api::state::AppState,
    domain::{Invoice, InvoiceStatus, Payment, PaymentStatus},
    error::{AppError, Result},
    payments::{ChargeStatus, PayOutcome},
    service::GenerationSummary,
};

#[derive(Debug, Serialize)]
pub struct InvoiceDto {
    id: i64,
    course_id: i64,
    student_id: i64,
    year_month: String,
    amount: f64,
    status: InvoiceStatus,
    sent_at: Option<String>,
    paid_at: Option<String>,
    rejected_at: Option<String>,
    gateway_charge_id: Option<String>,
}

impl From<Invoice> for InvoiceDto {
    fn from(invoice: Invoice) -> Self {
        Self {
            id: invoice.id,
            course_id: invoice.course_id,
            student_id: invoice.student_id,
            year_month: invoice.year_month,
            amount: invoice.amount,
            status: invoice.status,
            sent_at: invoice.sent_at.map(|dt| dt.to_rfc3339()),
            paid_at: invoice.paid_at.map(|dt| dt.to_rfc3339()),
            rejected_at: invoice.rejected_at.map(|dt| dt.to_rfc3339()),
            gateway_charge_id: invoice.gateway_charge_id,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PaymentDto {
    id: i64,
    gateway_charge_id: Option<String>,
    amount: f64,
    currency: String,
    status: PaymentStatus,
    payment_method: Option<String>,
    error_message: Option<String>,
    paid_at: Option<String>,
}

impl From<Payment> for PaymentDto {
    fn from(payment: Payment) -> Self {
        Self {
            id: payment.id,
            gateway_charge_id: payment.gateway_charge_id,
            amount: payment.amount,
            currency: payment.currency,
            status: payment.status,
            payment_method: payment.payment_method,
            error_message: payment.error_message,
            paid_at: payment.paid_at.map(|dt| dt.to_rfc3339()),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ListResponse {
    invoices: Vec<InvoiceDto>,
    total: usize,
}

pub async fn list_for_teacher(
    State(state): State<AppState>,
    Path(teacher_id): Path<i64>,
) -> Result<Json<ListResponse>> {
    let invoices = state
        .service_context
        .invoice_repo
        .list_for_teacher(teacher_id)
        .await?;

    let total = invoices.len();
    let invoices: Vec<InvoiceDto> = invoices.into_iter().map(Into::into).collect();

    Ok(Json(ListResponse { invoices, total }))
}

pub async fn generate(
    State(state): State<AppState>,
    Path((teacher_id, course_id)): Path<(i64, i64)>,
) -> Result<Json<GenerationSummary>> {
    let summary = state
        .service_context
        .invoice_service
        .create_invoices_for_course(course_id, teacher_id)
        .await?;

    Ok(Json(summary))
}

#[derive(Debug, Serialize)]
pub struct SendResponse {
    sent: bool,
    resent: bool,
}

pub async fn send(
    State(state): State<AppState>,
    Path((teacher_id, id)): Path<(i64, i64)>,
) -> Result<Json<SendResponse>> {
    let resent = state
        .service_context
        .invoice_service
        .send_invoice(id, teacher_id)
        .await?;

    Ok(Json(SendResponse { sent: true, resent }))
}

#[derive(Debug, Deserialize)]
pub struct BatchSendRequest {
    invoice_ids: Vec<i64>,
}

#[derive(Debug, Serialize)]
pub struct BatchSendResponse {
    sent: usize,
}

pub async fn batch_send(
    State(state): State<AppState>,
    Path(teacher_id): Path<i64>,
    Json(request): Json<BatchSendRequest>,
) -> Result<Json<BatchSendResponse>> {
    let sent = state
        .service_context
        .invoice_service
        .batch_send_invoices(&request.invoice_ids, teacher_id)
        .await?;

    Ok(Json(BatchSendResponse { sent }))
}

pub async fn list_for_student(
    State(state): State<AppState>,
    Path(student_id): Path<i64>,
) -> Result<Json<ListResponse>> {
    let invoices = state
        .service_context
        .invoice_repo
        .list_for_student(student_id)
        .await?;

    let total = invoices.len();
    let invoices: Vec<InvoiceDto> = invoices.into_iter().map(Into::into).collect();

    Ok(Json(ListResponse { invoices, total }))
}

#[derive(Debug, Serialize)]
pub struct InvoiceDetailResponse {
    #[serde(flatten)]
    invoice: InvoiceDto,
    payments: Vec<PaymentDto>,
}

pub async fn get_for_student(
    State(state): State<AppState>,
    Path((student_id, id)): Path<(i64, i64)>,
) -> Result<Json<InvoiceDetailResponse>> {
    let invoice = state
        .service_context
        .invoice_repo
        .find_by_id(id)
        .await?
        .ok_or_else(|| AppError::NotFound("Invoice not found".to_string()))?;

    if invoice.student_id != student_id {
        return Err(AppError::Forbidden);
    }
    // Pending invoices have not been sent yet and are invisible to students.
    if invoice.status == InvoiceStatus::Pending {
        return Err(AppError::NotFound("Invoice not found".to_string()));
    }

    let payments = state
        .service_context
        .payment_repo
        .list_for_invoice(invoice.id)
        .await?;

    Ok(Json(InvoiceDetailResponse {
        invoice: invoice.into(),
        payments: payments.into_iter().map(Into::into).collect(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct PayRequest {
    token: String,
    currency: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ChargeErrorDto {
    code: String,
    message: String,
}

#[derive(Debug, Serialize)]
pub struct PayResponse {
    paid: bool,
    charge_id: Option<String>,
    charge_status: Option<ChargeStatus>,
    payment_id: Option<i64>,
    error: Option<ChargeErrorDto>,
    warnings: Vec<String>,
}

impl From<PayOutcome> for PayResponse {
    fn from(outcome: PayOutcome) -> Self {
        Self {
            paid: outcome.paid,
            charge_id: outcome.charge_id,
            charge_status: outcome.charge_status,
            payment_id: outcome.payment_id,
            error: outcome.error.map(|e| ChargeErrorDto {
                code: e.code().to_string(),
                message: e.to_string(),
            }),
            warnings: outcome.warnings,
        }
    }
}

pub async fn pay(
    State(state): State<AppState>,
    Path((student_id, id)): Path<(i64, i64)>,
    Json(request): Json<PayRequest>,
) -> Result<Json<PayResponse>> {
    let outcome = state
        .service_context
        .payment_service
        .pay(id, student_id, &request.token, request.currency.as_deref())
        .await?;

    Ok(Json(outcome.into()))
}

#[derive(Debug, Serialize)]
pub struct RejectResponse {
    status: &'static str,
}

pub async fn reject(
    State(state): State<AppState>,
    Path((student_id, id)): Path<(i64, i64)>,
) -> Result<Json<RejectResponse>> {
    state
        .service_context
        .invoice_service
        .reject_invoice(id, student_id)
        .await?;

    Ok(Json(RejectResponse { status: "rejected" }))
}
