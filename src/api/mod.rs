pub mod handlers;
pub mod state;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};

use crate::{config::Settings, service::ServiceContext};
use state::AppState;

pub fn create_app(service_context: Arc<ServiceContext>, settings: Arc<Settings>) -> Router {
    let app_state = AppState::new(service_context, settings);

    Router::new()
        // Root and health endpoints
        .route("/", get(handlers::root::root))
        .route("/health", get(handlers::root::health_check))
        // API routes
        .nest("/api", api_routes())
        // Add state to the router
        .with_state(app_state)
        // Middleware
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive()) // Configure properly for production
        .layer(TraceLayer::new_for_http())
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .nest("/teachers/:teacher_id", teacher_routes())
        .nest("/students/:student_id", student_routes())
        .nest("/payments", payment_routes())
}

fn teacher_routes() -> Router<AppState> {
    Router::new()
        .route("/invoices", get(handlers::invoices::list_for_teacher))
        .route(
            "/courses/:course_id/invoices",
            post(handlers::invoices::generate),
        )
        .route("/invoices/batch-send", post(handlers::invoices::batch_send))
        .route("/invoices/:id/send", post(handlers::invoices::send))
}

fn student_routes() -> Router<AppState> {
    Router::new()
        .route("/invoices", get(handlers::invoices::list_for_student))
        .route("/invoices/:id", get(handlers::invoices::get_for_student))
        .route("/invoices/:id/pay", post(handlers::invoices::pay))
        .route("/invoices/:id/reject", post(handlers::invoices::reject))
}

fn payment_routes() -> Router<AppState> {
    Router::new()
        // Signed webhook endpoint; the only authentication is the HMAC
        // signature over the raw body.
        .route("/webhook/gateway", post(handlers::webhooks::gateway_webhook))
}
