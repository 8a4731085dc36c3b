use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;

use crate::domain::*;
use crate::error::Result;

pub mod course_repository;
pub mod invoice_repository;
pub mod payment_repository;

pub use course_repository::SqliteCourseRepository;
pub use invoice_repository::SqliteInvoiceRepository;
pub use payment_repository::SqlitePaymentRepository;

/// Invoice persistence. Methods taking a `SqliteConnection` participate in a
/// caller-owned transaction; the check-then-act sections of the pay and
/// webhook paths rely on `lock_for_update` holding the write lock for the
/// rest of that transaction.
#[async_trait]
pub trait InvoiceRepository: Send + Sync {
    async fn find_by_id(&self, id: i64) -> Result<Option<Invoice>>;
    async fn list_for_teacher(&self, teacher_id: i64) -> Result<Vec<Invoice>>;
    /// Student-facing listing: pending invoices are not visible.
    async fn list_for_student(&self, student_id: i64) -> Result<Vec<Invoice>>;
    /// The subset of `ids` that the teacher owns and that is in a sendable
    /// state (pending or rejected).
    async fn list_sendable(&self, ids: &[i64], teacher_id: i64) -> Result<Vec<Invoice>>;

    async fn create(&self, conn: &mut SqliteConnection, new: NewInvoice) -> Result<Invoice>;
    async fn exists_for_course_and_student(
        &self,
        conn: &mut SqliteConnection,
        course_id: i64,
        student_id: i64,
    ) -> Result<bool>;

    /// Takes the write lock on the invoice row and returns its current state,
    /// or `None` if the invoice does not exist.
    async fn lock_for_update(
        &self,
        conn: &mut SqliteConnection,
        id: i64,
    ) -> Result<Option<Invoice>>;

    /// Guarded transition to `sent`; returns false when the invoice was not
    /// in a sendable state.
    async fn mark_sent(&self, conn: &mut SqliteConnection, id: i64) -> Result<bool>;
    /// Guarded transition to `rejected`; returns false when the invoice was
    /// not in `sent`.
    async fn mark_rejected(&self, conn: &mut SqliteConnection, id: i64) -> Result<bool>;
    /// Settle the invoice. Callers gate on the current state; a settlement
    /// also clears a stale rejection.
    async fn mark_paid(
        &self,
        conn: &mut SqliteConnection,
        id: i64,
        gateway_charge_id: &str,
    ) -> Result<()>;
}

#[async_trait]
pub trait PaymentRepository: Send + Sync {
    async fn find_by_id(&self, id: i64) -> Result<Option<Payment>>;
    async fn list_for_invoice(&self, invoice_id: i64) -> Result<Vec<Payment>>;

    async fn insert(&self, conn: &mut SqliteConnection, new: NewPayment) -> Result<i64>;
    async fn find_by_charge_id(
        &self,
        conn: &mut SqliteConnection,
        charge_id: &str,
    ) -> Result<Option<Payment>>;
    async fn mark_successful(&self, conn: &mut SqliteConnection, id: i64) -> Result<()>;
    async fn mark_failed(
        &self,
        conn: &mut SqliteConnection,
        id: i64,
        error_message: &str,
    ) -> Result<()>;
    /// Overwrite a payment with a later gateway report for the same charge.
    async fn record_event(
        &self,
        conn: &mut SqliteConnection,
        id: i64,
        status: PaymentStatus,
        raw_response: &serde_json::Value,
        error_message: Option<&str>,
        paid_at: Option<DateTime<Utc>>,
    ) -> Result<()>;
}

#[async_trait]
pub trait CourseRepository: Send + Sync {
    async fn find_by_id(&self, id: i64) -> Result<Option<Course>>;
    async fn list_student_ids(&self, course_id: i64) -> Result<Vec<i64>>;
}
