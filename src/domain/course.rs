use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Course boundary record: invoices are generated from its fee and billing
/// period, and teacher ownership checks go through `teacher_id`. Course CRUD
/// itself lives outside this crate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Course {
    pub id: i64,
    pub teacher_id: i64,
    pub name: String,
    pub year_month: String,
    pub fee: f64,
    pub created_at: DateTime<Utc>,
}
