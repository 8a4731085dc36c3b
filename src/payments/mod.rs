pub mod gateway;
pub mod service;

pub use gateway::{
    ChargeGateway, ChargeStatus, CreateChargeRequest, FakeChargeGateway, GatewayCharge,
    GatewayError, HttpChargeGateway,
};
pub use service::{ChargeError, PayOutcome, PaymentService, WebhookOutcome};

/// Currencies the student-facing pay endpoint accepts.
pub const SUPPORTED_CURRENCIES: &[&str] = &["thb", "jpy", "sgd", "usd"];

/// Currencies with no minor unit: the invoice amount is already in the
/// gateway's smallest denomination.
pub const ZERO_DECIMAL_CURRENCIES: &[&str] = &["jpy"];

/// The gateway refuses charges below 100 minor units (100 JPY, 1.00 USD, ...).
pub const MIN_CHARGE_MINOR_UNITS: i64 = 100;

pub fn is_zero_decimal(currency: &str) -> bool {
    ZERO_DECIMAL_CURRENCIES.contains(&currency)
}

/// Convert a stored invoice amount to gateway minor units. Zero-decimal
/// amounts truncate (999.9 JPY charges as 999); decimal currencies round to
/// the nearest minor unit.
pub fn to_minor_units(amount: f64, currency: &str) -> i64 {
    if is_zero_decimal(currency) {
        amount as i64
    } else {
        (amount * 100.0).round() as i64
    }
}

/// Human-readable minimum for the configured floor, e.g. "100 JPY" or "1.00 USD".
pub fn minimum_charge_display(currency: &str) -> String {
    if is_zero_decimal(currency) {
        format!("{} {}", MIN_CHARGE_MINOR_UNITS, currency.to_uppercase())
    } else {
        format!("1.00 {}", currency.to_uppercase())
    }
}
