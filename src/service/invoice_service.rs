use std::sync::Arc;

use serde::Serialize;
use sqlx::SqlitePool;

use crate::{
    domain::{Invoice, InvoiceStatus, NewInvoice},
    error::{AppError, Result},
    repository::{CourseRepository, InvoiceRepository},
};

#[derive(Debug, Clone, Copy, Serialize)]
pub struct GenerationSummary {
    pub created: u32,
    pub skipped: u32,
}

/// Invoice generation and the send/reject workflow. Payment itself lives in
/// `payments::PaymentService`.
pub struct InvoiceService {
    pool: SqlitePool,
    invoice_repo: Arc<dyn InvoiceRepository>,
    course_repo: Arc<dyn CourseRepository>,
}

impl InvoiceService {
    pub fn new(
        pool: SqlitePool,
        invoice_repo: Arc<dyn InvoiceRepository>,
        course_repo: Arc<dyn CourseRepository>,
    ) -> Self {
        Self {
            pool,
            invoice_repo,
            course_repo,
        }
    }

    /// One `pending` invoice per enrolled student; students that already
    /// have an invoice for this course are skipped.
    pub async fn create_invoices_for_course(
        &self,
        course_id: i64,
        teacher_id: i64,
    ) -> Result<GenerationSummary> {
        let course = self
            .course_repo
            .find_by_id(course_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Course not found".to_string()))?;
        if course.teacher_id != teacher_id {
            return Err(AppError::Forbidden);
        }

        let student_ids = self.course_repo.list_student_ids(course_id).await?;
        if student_ids.is_empty() {
            return Ok(GenerationSummary {
                created: 0,
                skipped: 0,
            });
        }

        let mut created = 0u32;
        let mut skipped = 0u32;

        let mut tx = self.pool.begin().await?;
        for student_id in student_ids {
            let exists = self
                .invoice_repo
                .exists_for_course_and_student(&mut tx, course_id, student_id)
                .await?;
            if exists {
                skipped += 1;
                continue;
            }
            self.invoice_repo
                .create(
                    &mut tx,
                    NewInvoice {
                        course_id,
                        student_id,
                        year_month: course.year_month.clone(),
                        amount: course.fee,
                    },
                )
                .await?;
            created += 1;
        }
        tx.commit().await?;

        tracing::info!(course_id, teacher_id, created, skipped, "invoices generated");

        Ok(GenerationSummary { created, skipped })
    }

    /// Send a single invoice to its student. Returns whether this was a
    /// resend of a previously rejected invoice (which clears `rejected_at`).
    pub async fn send_invoice(&self, invoice_id: i64, teacher_id: i64) -> Result<bool> {
        let invoice = self
            .invoice_repo
            .find_by_id(invoice_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Invoice not found".to_string()))?;
        self.ensure_owned_by_teacher(&invoice, teacher_id).await?;
        if !invoice.can_send() {
            return Err(AppError::Validation(
                "Only pending or rejected invoices can be sent.".to_string(),
            ));
        }

        let mut tx = self.pool.begin().await?;
        let locked = self
            .invoice_repo
            .lock_for_update(&mut tx, invoice_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Invoice not found".to_string()))?;
        let is_resend = locked.status == InvoiceStatus::Rejected;

        if !self.invoice_repo.mark_sent(&mut tx, invoice_id).await? {
            return Err(AppError::Validation(
                "Only pending or rejected invoices can be sent.".to_string(),
            ));
        }
        tx.commit().await?;

        tracing::info!(invoice_id, teacher_id, is_resend, "invoice sent");

        Ok(is_resend)
    }

    /// Batch send is strict: every supplied id must resolve to an invoice
    /// the teacher owns in a sendable state, or nothing is sent.
    pub async fn batch_send_invoices(&self, invoice_ids: &[i64], teacher_id: i64) -> Result<usize> {
        let mut ids: Vec<i64> = invoice_ids.to_vec();
        ids.sort_unstable();
        ids.dedup();

        if ids.len() < 2 {
            return Err(AppError::Validation(
                "Batch send requires at least two invoices.".to_string(),
            ));
        }

        let sendable = self.invoice_repo.list_sendable(&ids, teacher_id).await?;
        if sendable.len() != ids.len() {
            return Err(AppError::Validation(
                "Some invoices cannot be sent; check their status and ownership.".to_string(),
            ));
        }

        // One transaction: the filtered rows all transition or none do.
        let mut tx = self.pool.begin().await?;
        for invoice in &sendable {
            if !self.invoice_repo.mark_sent(&mut tx, invoice.id).await? {
                return Err(AppError::Conflict(
                    "Invoice state changed while sending; batch aborted.".to_string(),
                ));
            }
        }
        tx.commit().await?;

        tracing::info!(teacher_id, count = sendable.len(), "invoices batch sent");

        Ok(sendable.len())
    }

    /// Student declines a sent invoice. The row lock closes the race with a
    /// concurrent payment completing first; state is re-checked under it.
    pub async fn reject_invoice(&self, invoice_id: i64, student_id: i64) -> Result<()> {
        let invoice = self
            .invoice_repo
            .find_by_id(invoice_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Invoice not found".to_string()))?;
        if invoice.student_id != student_id {
            return Err(AppError::Forbidden);
        }
        Self::ensure_rejectable(&invoice)?;

        let mut tx = self.pool.begin().await?;
        let locked = self
            .invoice_repo
            .lock_for_update(&mut tx, invoice_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Invoice not found".to_string()))?;
        Self::ensure_rejectable(&locked)?;

        if !self.invoice_repo.mark_rejected(&mut tx, invoice_id).await? {
            return Err(AppError::Conflict(
                "Invoice state changed; it can no longer be rejected.".to_string(),
            ));
        }
        tx.commit().await?;

        tracing::info!(invoice_id, student_id, "invoice rejected");

        Ok(())
    }

    pub async fn ensure_owned_by_teacher(&self, invoice: &Invoice, teacher_id: i64) -> Result<()> {
        let course = self
            .course_repo
            .find_by_id(invoice.course_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Course not found".to_string()))?;
        if course.teacher_id != teacher_id {
            return Err(AppError::Forbidden);
        }
        Ok(())
    }

    fn ensure_rejectable(invoice: &Invoice) -> Result<()> {
        match invoice.status {
            InvoiceStatus::Sent => Ok(()),
            InvoiceStatus::Paid => Err(AppError::Conflict(
                "Invoice is already paid and cannot be rejected.".to_string(),
            )),
            InvoiceStatus::Rejected => Err(AppError::Conflict(
                "Invoice is already rejected.".to_string(),
            )),
            InvoiceStatus::Pending => Err(AppError::Validation(
                "Only sent invoices can be rejected.".to_string(),
            )),
        }
    }
}
