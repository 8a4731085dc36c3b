use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A billing obligation for one student for one course-period. Created
/// `Pending` by invoice generation, made payable by `Send`, and settled by
/// the charge orchestrator or the webhook reconciler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invoice {
    pub id: i64,
    pub course_id: i64,
    pub student_id: i64,
    pub year_month: String,
    pub amount: f64,
    pub status: InvoiceStatus,
    pub sent_at: Option<DateTime<Utc>>,
    pub paid_at: Option<DateTime<Utc>>,
    pub rejected_at: Option<DateTime<Utc>>,
    pub gateway_charge_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Invoice lifecycle states. A failed charge attempt is not a state here:
/// the invoice stays `Sent` and remains payable.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceStatus {
    Pending,
    Sent,
    Paid,
    Rejected,
}

impl Invoice {
    /// Send is allowed for first sends (`Pending`) and resends (`Rejected`).
    pub fn can_send(&self) -> bool {
        matches!(self.status, InvoiceStatus::Pending | InvoiceStatus::Rejected)
    }

    pub fn can_reject(&self) -> bool {
        self.status == InvoiceStatus::Sent
    }

    pub fn can_pay(&self) -> bool {
        self.status == InvoiceStatus::Sent
    }

    pub fn is_paid(&self) -> bool {
        self.status == InvoiceStatus::Paid
    }
}

#[derive(Debug, Clone)]
pub struct NewInvoice {
    pub course_id: i64,
    pub student_id: i64,
    pub year_month: String,
    pub amount: f64,
}
