pub mod invoices;
pub mod root;
pub mod webhooks;
