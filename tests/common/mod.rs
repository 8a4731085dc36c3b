#![allow(dead_code)]

use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};
use sqlx::SqlitePool;

use coursebill::{
    config::Settings,
    domain::Invoice,
    payments::FakeChargeGateway,
    repository::{SqliteCourseRepository, SqliteInvoiceRepository, SqlitePaymentRepository},
    service::ServiceContext,
};

pub const WEBHOOK_SECRET: &str = "skey_test_webhook";

pub struct TestApp {
    pub pool: SqlitePool,
    pub ctx: Arc<ServiceContext>,
    pub gateway: Arc<FakeChargeGateway>,
    pub settings: Arc<Settings>,
}

pub async fn setup() -> anyhow::Result<TestApp> {
    // In-memory SQLite with the real migrations, same as production startup.
    let pool = SqlitePool::connect(":memory:").await?;
    sqlx::migrate!("./migrations").run(&pool).await?;

    let mut settings = Settings::default();
    settings.gateway.secret_key = WEBHOOK_SECRET.to_string();

    let gateway = Arc::new(FakeChargeGateway::new());
    let ctx = Arc::new(ServiceContext::new(
        Arc::new(SqliteInvoiceRepository::new(pool.clone())),
        Arc::new(SqlitePaymentRepository::new(pool.clone())),
        Arc::new(SqliteCourseRepository::new(pool.clone())),
        gateway.clone(),
        settings.gateway.clone(),
        pool.clone(),
    ));

    Ok(TestApp {
        pool,
        ctx,
        gateway,
        settings: Arc::new(settings),
    })
}

pub struct School {
    pub teacher_id: i64,
    pub course_id: i64,
    pub student_ids: Vec<i64>,
}

pub async fn seed_school(
    pool: &SqlitePool,
    student_count: usize,
    fee: f64,
) -> anyhow::Result<School> {
    let teacher_id = sqlx::query("INSERT INTO teachers (name) VALUES (?)")
        .bind("Ms. Tanaka")
        .execute(pool)
        .await?
        .last_insert_rowid();

    let course_id =
        sqlx::query("INSERT INTO courses (teacher_id, name, year_month, fee) VALUES (?, ?, ?, ?)")
            .bind(teacher_id)
            .bind("Algebra")
            .bind("202601")
            .bind(fee)
            .execute(pool)
            .await?
            .last_insert_rowid();

    let mut student_ids = Vec::new();
    for n in 0..student_count {
        let student_id = sqlx::query("INSERT INTO students (name) VALUES (?)")
            .bind(format!("Student {}", n + 1))
            .execute(pool)
            .await?
            .last_insert_rowid();
        sqlx::query("INSERT INTO course_students (course_id, student_id) VALUES (?, ?)")
            .bind(course_id)
            .bind(student_id)
            .execute(pool)
            .await?;
        student_ids.push(student_id);
    }

    Ok(School {
        teacher_id,
        course_id,
        student_ids,
    })
}

pub async fn insert_invoice(
    pool: &SqlitePool,
    course_id: i64,
    student_id: i64,
    amount: f64,
    status: &str,
) -> anyhow::Result<i64> {
    let now = Utc::now().naive_utc();
    let sent_at = matches!(status, "sent" | "paid" | "rejected").then_some(now);
    let paid_at = (status == "paid").then_some(now);
    let rejected_at = (status == "rejected").then_some(now);

    let id = sqlx::query(
        "INSERT INTO invoices (course_id, student_id, year_month, amount, status, \
         sent_at, paid_at, rejected_at, created_at, updated_at) \
         VALUES (?, ?, '202601', ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(course_id)
    .bind(student_id)
    .bind(amount)
    .bind(status)
    .bind(sent_at)
    .bind(paid_at)
    .bind(rejected_at)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?
    .last_insert_rowid();

    Ok(id)
}

pub async fn get_invoice(app: &TestApp, id: i64) -> anyhow::Result<Invoice> {
    app.ctx
        .invoice_repo
        .find_by_id(id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("invoice {} not found", id))
}

pub async fn payment_count_for_charge(pool: &SqlitePool, charge_id: &str) -> anyhow::Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM payments WHERE gateway_charge_id = ?")
        .bind(charge_id)
        .fetch_one(pool)
        .await?;
    Ok(count)
}

/// Build a charge webhook event the way the gateway delivers it.
pub fn charge_event(key: &str, charge_id: &str, status: &str, invoice_id: Value) -> Value {
    json!({
        "key": key,
        "data": {
            "id": charge_id,
            "status": status,
            "currency": "jpy",
            "amount": 1000,
            "metadata": { "invoice_id": invoice_id },
            "source": { "type": "card" }
        }
    })
}

/// Hex HMAC-SHA256 signature over a webhook body, as the gateway computes it.
pub fn sign(body: &[u8], secret: &str) -> String {
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    let mut mac =
        Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}
