pub mod invoice_service;

use std::sync::Arc;

use sqlx::SqlitePool;

use crate::config::GatewayConfig;
use crate::payments::{ChargeGateway, PaymentService};
use crate::repository::*;

pub use invoice_service::{GenerationSummary, InvoiceService};

pub struct ServiceContext {
    pub invoice_repo: Arc<dyn InvoiceRepository>,
    pub payment_repo: Arc<dyn PaymentRepository>,
    pub course_repo: Arc<dyn CourseRepository>,
    pub invoice_service: Arc<InvoiceService>,
    pub payment_service: Arc<PaymentService>,
    pub db_pool: SqlitePool,
}

impl ServiceContext {
    pub fn new(
        invoice_repo: Arc<dyn InvoiceRepository>,
        payment_repo: Arc<dyn PaymentRepository>,
        course_repo: Arc<dyn CourseRepository>,
        gateway: Arc<dyn ChargeGateway>,
        gateway_config: GatewayConfig,
        db_pool: SqlitePool,
    ) -> Self {
        let invoice_service = Arc::new(InvoiceService::new(
            db_pool.clone(),
            invoice_repo.clone(),
            course_repo.clone(),
        ));
        let payment_service = Arc::new(PaymentService::new(
            db_pool.clone(),
            invoice_repo.clone(),
            payment_repo.clone(),
            course_repo.clone(),
            gateway,
            gateway_config,
        ));

        Self {
            invoice_repo,
            payment_repo,
            course_repo,
            invoice_service,
            payment_service,
            db_pool,
        }
    }
}
