use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::{FromRow, SqliteConnection, SqlitePool};

use crate::{
    domain::{NewPayment, Payment, PaymentStatus},
    error::{AppError, Result},
    repository::PaymentRepository,
};

const PAYMENT_COLUMNS: &str = "id, invoice_id, gateway_charge_id, amount, currency, status, \
     payment_method, raw_response, error_message, paid_at, created_at, updated_at";

#[derive(FromRow)]
struct PaymentRow {
    id: i64,
    invoice_id: i64,
    gateway_charge_id: Option<String>,
    amount: f64,
    currency: String,
    status: String,
    payment_method: Option<String>,
    raw_response: Option<String>,
    error_message: Option<String>,
    paid_at: Option<NaiveDateTime>,
    created_at: NaiveDateTime,
    updated_at: NaiveDateTime,
}

pub struct SqlitePaymentRepository {
    pool: SqlitePool,
}

impl SqlitePaymentRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_payment(row: PaymentRow) -> Result<Payment> {
        Ok(Payment {
            id: row.id,
            invoice_id: row.invoice_id,
            gateway_charge_id: row.gateway_charge_id,
            amount: row.amount,
            currency: row.currency,
            status: Self::parse_status(&row.status)?,
            payment_method: row.payment_method,
            raw_response: row
                .raw_response
                .as_deref()
                .and_then(|s| serde_json::from_str(s).ok()),
            error_message: row.error_message,
            paid_at: row.paid_at.map(|dt| DateTime::from_naive_utc_and_offset(dt, Utc)),
            created_at: DateTime::from_naive_utc_and_offset(row.created_at, Utc),
            updated_at: DateTime::from_naive_utc_and_offset(row.updated_at, Utc),
        })
    }

    fn parse_status(s: &str) -> Result<PaymentStatus> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "successful" => Ok(PaymentStatus::Successful),
            "failed" => Ok(PaymentStatus::Failed),
            _ => Err(AppError::Database(format!("Invalid payment status: {}", s))),
        }
    }

    fn status_to_str(status: PaymentStatus) -> &'static str {
        match status {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Successful => "successful",
            PaymentStatus::Failed => "failed",
        }
    }

    fn raw_to_text(raw: Option<&serde_json::Value>) -> Option<String> {
        raw.map(|v| v.to_string())
    }
}

#[async_trait]
impl PaymentRepository for SqlitePaymentRepository {
    async fn find_by_id(&self, id: i64) -> Result<Option<Payment>> {
        let row = sqlx::query_as::<_, PaymentRow>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        match row {
            Some(r) => Ok(Some(Self::row_to_payment(r)?)),
            None => Ok(None),
        }
    }

    async fn list_for_invoice(&self, invoice_id: i64) -> Result<Vec<Payment>> {
        let rows = sqlx::query_as::<_, PaymentRow>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments \
             WHERE invoice_id = ? \
             ORDER BY created_at DESC, id DESC"
        ))
        .bind(invoice_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        rows.into_iter().map(Self::row_to_payment).collect()
    }

    async fn insert(&self, conn: &mut SqliteConnection, new: NewPayment) -> Result<i64> {
        let now = Utc::now().naive_utc();
        let result = sqlx::query(
            r#"
            INSERT INTO payments (
                invoice_id, gateway_charge_id, amount, currency, status,
                payment_method, raw_response, error_message, paid_at,
                created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(new.invoice_id)
        .bind(&new.gateway_charge_id)
        .bind(new.amount)
        .bind(&new.currency)
        .bind(Self::status_to_str(new.status))
        .bind(&new.payment_method)
        .bind(Self::raw_to_text(new.raw_response.as_ref()))
        .bind(&new.error_message)
        .bind(new.paid_at.map(|dt| dt.naive_utc()))
        .bind(now)
        .bind(now)
        .execute(&mut *conn)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(result.last_insert_rowid())
    }

    async fn find_by_charge_id(
        &self,
        conn: &mut SqliteConnection,
        charge_id: &str,
    ) -> Result<Option<Payment>> {
        let row = sqlx::query_as::<_, PaymentRow>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE gateway_charge_id = ?"
        ))
        .bind(charge_id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        match row {
            Some(r) => Ok(Some(Self::row_to_payment(r)?)),
            None => Ok(None),
        }
    }

    async fn mark_successful(&self, conn: &mut SqliteConnection, id: i64) -> Result<()> {
        let now = Utc::now().naive_utc();
        sqlx::query(
            r#"
            UPDATE payments
            SET status = 'successful',
                paid_at = ?,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(&mut *conn)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(())
    }

    async fn mark_failed(
        &self,
        conn: &mut SqliteConnection,
        id: i64,
        error_message: &str,
    ) -> Result<()> {
        let now = Utc::now().naive_utc();
        sqlx::query(
            r#"
            UPDATE payments
            SET status = 'failed',
                error_message = ?,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(error_message)
        .bind(now)
        .bind(id)
        .execute(&mut *conn)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(())
    }

    async fn record_event(
        &self,
        conn: &mut SqliteConnection,
        id: i64,
        status: PaymentStatus,
        raw_response: &serde_json::Value,
        error_message: Option<&str>,
        paid_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let now = Utc::now().naive_utc();
        sqlx::query(
            r#"
            UPDATE payments
            SET status = ?,
                raw_response = ?,
                error_message = ?,
                paid_at = ?,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(Self::status_to_str(status))
        .bind(raw_response.to_string())
        .bind(error_message)
        .bind(paid_at.map(|dt| dt.naive_utc()))
        .bind(now)
        .bind(id)
        .execute(&mut *conn)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(())
    }
}
