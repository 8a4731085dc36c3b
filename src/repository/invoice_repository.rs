use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::{FromRow, SqliteConnection, SqlitePool};

use crate::{
    domain::{Invoice, InvoiceStatus, NewInvoice},
    error::{AppError, Result},
    repository::InvoiceRepository,
};

const INVOICE_COLUMNS: &str = "id, course_id, student_id, year_month, amount, status, \
     sent_at, paid_at, rejected_at, gateway_charge_id, created_at, updated_at";

#[derive(FromRow)]
struct InvoiceRow {
    id: i64,
    course_id: i64,
    student_id: i64,
    year_month: String,
    amount: f64,
    status: String,
    sent_at: Option<NaiveDateTime>,
    paid_at: Option<NaiveDateTime>,
    rejected_at: Option<NaiveDateTime>,
    gateway_charge_id: Option<String>,
    created_at: NaiveDateTime,
    updated_at: NaiveDateTime,
}

pub struct SqliteInvoiceRepository {
    pool: SqlitePool,
}

impl SqliteInvoiceRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_invoice(row: InvoiceRow) -> Result<Invoice> {
        Ok(Invoice {
            id: row.id,
            course_id: row.course_id,
            student_id: row.student_id,
            year_month: row.year_month,
            amount: row.amount,
            status: Self::parse_status(&row.status)?,
            sent_at: row.sent_at.map(|dt| DateTime::from_naive_utc_and_offset(dt, Utc)),
            paid_at: row.paid_at.map(|dt| DateTime::from_naive_utc_and_offset(dt, Utc)),
            rejected_at: row
                .rejected_at
                .map(|dt| DateTime::from_naive_utc_and_offset(dt, Utc)),
            gateway_charge_id: row.gateway_charge_id,
            created_at: DateTime::from_naive_utc_and_offset(row.created_at, Utc),
            updated_at: DateTime::from_naive_utc_and_offset(row.updated_at, Utc),
        })
    }

    fn parse_status(s: &str) -> Result<InvoiceStatus> {
        match s {
            "pending" => Ok(InvoiceStatus::Pending),
            "sent" => Ok(InvoiceStatus::Sent),
            "paid" => Ok(InvoiceStatus::Paid),
            "rejected" => Ok(InvoiceStatus::Rejected),
            _ => Err(AppError::Database(format!("Invalid invoice status: {}", s))),
        }
    }
}

#[async_trait]
impl InvoiceRepository for SqliteInvoiceRepository {
    async fn find_by_id(&self, id: i64) -> Result<Option<Invoice>> {
        let row = sqlx::query_as::<_, InvoiceRow>(&format!(
            "SELECT {INVOICE_COLUMNS} FROM invoices WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        match row {
            Some(r) => Ok(Some(Self::row_to_invoice(r)?)),
            None => Ok(None),
        }
    }

    async fn list_for_teacher(&self, teacher_id: i64) -> Result<Vec<Invoice>> {
        let rows = sqlx::query_as::<_, InvoiceRow>(&format!(
            "SELECT i.{} FROM invoices i \
             JOIN courses c ON c.id = i.course_id \
             WHERE c.teacher_id = ? \
             ORDER BY i.created_at DESC",
            INVOICE_COLUMNS.replace(", ", ", i.")
        ))
        .bind(teacher_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        rows.into_iter().map(Self::row_to_invoice).collect()
    }

    async fn list_for_student(&self, student_id: i64) -> Result<Vec<Invoice>> {
        let rows = sqlx::query_as::<_, InvoiceRow>(&format!(
            "SELECT {INVOICE_COLUMNS} FROM invoices \
             WHERE student_id = ? AND status != 'pending' \
             ORDER BY created_at DESC"
        ))
        .bind(student_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        rows.into_iter().map(Self::row_to_invoice).collect()
    }

    async fn list_sendable(&self, ids: &[i64], teacher_id: i64) -> Result<Vec<Invoice>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!(
            "SELECT i.{} FROM invoices i \
             JOIN courses c ON c.id = i.course_id \
             WHERE i.id IN ({placeholders}) \
               AND c.teacher_id = ? \
               AND i.status IN ('pending', 'rejected')",
            INVOICE_COLUMNS.replace(", ", ", i.")
        );

        let mut query = sqlx::query_as::<_, InvoiceRow>(&sql);
        for id in ids {
            query = query.bind(id);
        }
        let rows = query
            .bind(teacher_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        rows.into_iter().map(Self::row_to_invoice).collect()
    }

    async fn create(&self, conn: &mut SqliteConnection, new: NewInvoice) -> Result<Invoice> {
        let now = Utc::now().naive_utc();
        let result = sqlx::query(
            r#"
            INSERT INTO invoices (
                course_id, student_id, year_month, amount, status,
                created_at, updated_at
            ) VALUES (?, ?, ?, ?, 'pending', ?, ?)
            "#,
        )
        .bind(new.course_id)
        .bind(new.student_id)
        .bind(&new.year_month)
        .bind(new.amount)
        .bind(now)
        .bind(now)
        .execute(&mut *conn)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        let id = result.last_insert_rowid();
        let row = sqlx::query_as::<_, InvoiceRow>(&format!(
            "SELECT {INVOICE_COLUMNS} FROM invoices WHERE id = ?"
        ))
        .bind(id)
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        Self::row_to_invoice(row)
    }

    async fn exists_for_course_and_student(
        &self,
        conn: &mut SqliteConnection,
        course_id: i64,
        student_id: i64,
    ) -> Result<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM invoices WHERE course_id = ? AND student_id = ?",
        )
        .bind(course_id)
        .bind(student_id)
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(count > 0)
    }

    async fn lock_for_update(
        &self,
        conn: &mut SqliteConnection,
        id: i64,
    ) -> Result<Option<Invoice>> {
        // SQLite has no SELECT ... FOR UPDATE. A write statement inside the
        // transaction takes the database write lock, so concurrent payers and
        // reconcilers serialize here before the status read below.
        let result = sqlx::query("UPDATE invoices SET updated_at = updated_at WHERE id = ?")
            .bind(id)
            .execute(&mut *conn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }

        let row = sqlx::query_as::<_, InvoiceRow>(&format!(
            "SELECT {INVOICE_COLUMNS} FROM invoices WHERE id = ?"
        ))
        .bind(id)
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(Some(Self::row_to_invoice(row)?))
    }

    async fn mark_sent(&self, conn: &mut SqliteConnection, id: i64) -> Result<bool> {
        let now = Utc::now().naive_utc();
        let result = sqlx::query(
            r#"
            UPDATE invoices
            SET status = 'sent',
                sent_at = ?,
                rejected_at = NULL,
                updated_at = ?
            WHERE id = ? AND status IN ('pending', 'rejected')
            "#,
        )
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(&mut *conn)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_rejected(&self, conn: &mut SqliteConnection, id: i64) -> Result<bool> {
        let now = Utc::now().naive_utc();
        let result = sqlx::query(
            r#"
            UPDATE invoices
            SET status = 'rejected',
                rejected_at = ?,
                updated_at = ?
            WHERE id = ? AND status = 'sent'
            "#,
        )
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(&mut *conn)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_paid(
        &self,
        conn: &mut SqliteConnection,
        id: i64,
        gateway_charge_id: &str,
    ) -> Result<()> {
        let now = Utc::now().naive_utc();
        sqlx::query(
            r#"
            UPDATE invoices
            SET status = 'paid',
                paid_at = ?,
                gateway_charge_id = ?,
                rejected_at = NULL,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(now)
        .bind(gateway_charge_id)
        .bind(now)
        .bind(id)
        .execute(&mut *conn)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(())
    }
}
