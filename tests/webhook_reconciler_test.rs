mod common;

use common::*;
use coursebill::{
    domain::{InvoiceStatus, PaymentStatus},
    payments::WebhookOutcome,
};
use serde_json::json;

#[tokio::test]
async fn test_successful_charge_event_settles_invoice() -> anyhow::Result<()> {
    let app = setup().await?;
    let school = seed_school(&app.pool, 1, 1000.0).await?;
    let invoice_id =
        insert_invoice(&app.pool, school.course_id, school.student_ids[0], 1000.0, "sent").await?;

    let event = charge_event("charge.complete", "chrg_2", "successful", json!(invoice_id));
    let outcome = app.ctx.payment_service.handle_webhook_event(&event).await?;
    assert_eq!(outcome, WebhookOutcome::Processed);

    let invoice = get_invoice(&app, invoice_id).await?;
    assert_eq!(invoice.status, InvoiceStatus::Paid);
    assert!(invoice.paid_at.is_some());
    assert_eq!(invoice.gateway_charge_id.as_deref(), Some("chrg_2"));

    let payments = app.ctx.payment_repo.list_for_invoice(invoice_id).await?;
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0].status, PaymentStatus::Successful);
    assert_eq!(payments[0].payment_method.as_deref(), Some("card"));
    assert!(payments[0].paid_at.is_some());

    Ok(())
}

#[tokio::test]
async fn test_duplicate_delivery_is_idempotent() -> anyhow::Result<()> {
    let app = setup().await?;
    let school = seed_school(&app.pool, 1, 1000.0).await?;
    let invoice_id =
        insert_invoice(&app.pool, school.course_id, school.student_ids[0], 1000.0, "sent").await?;

    let event = charge_event("charge.complete", "chrg_2", "successful", json!(invoice_id));
    app.ctx.payment_service.handle_webhook_event(&event).await?;
    let outcome = app.ctx.payment_service.handle_webhook_event(&event).await?;
    assert_eq!(outcome, WebhookOutcome::Processed);

    let invoice = get_invoice(&app, invoice_id).await?;
    assert_eq!(invoice.status, InvoiceStatus::Paid);
    assert_eq!(payment_count_for_charge(&app.pool, "chrg_2").await?, 1);

    Ok(())
}

#[tokio::test]
async fn test_second_successful_charge_does_not_overwrite_settlement() -> anyhow::Result<()> {
    let app = setup().await?;
    let school = seed_school(&app.pool, 1, 1000.0).await?;
    let invoice_id =
        insert_invoice(&app.pool, school.course_id, school.student_ids[0], 1000.0, "sent").await?;

    let first = charge_event("charge.complete", "chrg_first", "successful", json!(invoice_id));
    app.ctx.payment_service.handle_webhook_event(&first).await?;

    // A different successful charge for an already-paid invoice still gets a
    // ledger row, but the invoice keeps its original settling charge.
    let second = charge_event("charge.complete", "chrg_second", "successful", json!(invoice_id));
    let outcome = app.ctx.payment_service.handle_webhook_event(&second).await?;
    assert_eq!(outcome, WebhookOutcome::Processed);

    let invoice = get_invoice(&app, invoice_id).await?;
    assert_eq!(invoice.status, InvoiceStatus::Paid);
    assert_eq!(invoice.gateway_charge_id.as_deref(), Some("chrg_first"));
    assert_eq!(app.ctx.payment_repo.list_for_invoice(invoice_id).await?.len(), 2);

    Ok(())
}

#[tokio::test]
async fn test_successful_event_settles_rejected_invoice() -> anyhow::Result<()> {
    let app = setup().await?;
    let school = seed_school(&app.pool, 1, 1000.0).await?;
    let invoice_id =
        insert_invoice(&app.pool, school.course_id, school.student_ids[0], 1000.0, "rejected")
            .await?;

    // The gateway's report wins over the local rejection: the student paid,
    // so the invoice settles and the stale rejection is cleared.
    let event = charge_event("charge.complete", "chrg_rej", "successful", json!(invoice_id));
    let outcome = app.ctx.payment_service.handle_webhook_event(&event).await?;
    assert_eq!(outcome, WebhookOutcome::Processed);

    let invoice = get_invoice(&app, invoice_id).await?;
    assert_eq!(invoice.status, InvoiceStatus::Paid);
    assert!(invoice.paid_at.is_some());
    assert!(invoice.rejected_at.is_none());
    assert_eq!(invoice.gateway_charge_id.as_deref(), Some("chrg_rej"));

    let payments = app.ctx.payment_repo.list_for_invoice(invoice_id).await?;
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0].status, PaymentStatus::Successful);

    Ok(())
}

#[tokio::test]
async fn test_successful_event_settles_unsent_invoice() -> anyhow::Result<()> {
    let app = setup().await?;
    let school = seed_school(&app.pool, 1, 1000.0).await?;
    let invoice_id =
        insert_invoice(&app.pool, school.course_id, school.student_ids[0], 1000.0, "pending")
            .await?;

    let event = charge_event("charge.complete", "chrg_pend", "successful", json!(invoice_id));
    let outcome = app.ctx.payment_service.handle_webhook_event(&event).await?;
    assert_eq!(outcome, WebhookOutcome::Processed);

    let invoice = get_invoice(&app, invoice_id).await?;
    assert_eq!(invoice.status, InvoiceStatus::Paid);
    assert_eq!(invoice.gateway_charge_id.as_deref(), Some("chrg_pend"));

    Ok(())
}

#[tokio::test]
async fn test_failed_charge_event_keeps_invoice_payable() -> anyhow::Result<()> {
    let app = setup().await?;
    let school = seed_school(&app.pool, 1, 1000.0).await?;
    let invoice_id =
        insert_invoice(&app.pool, school.course_id, school.student_ids[0], 1000.0, "sent").await?;

    let mut event = charge_event("charge.complete", "chrg_bad", "failed", json!(invoice_id));
    event["data"]["failure_message"] = json!("Insufficient funds");

    let outcome = app.ctx.payment_service.handle_webhook_event(&event).await?;
    assert_eq!(outcome, WebhookOutcome::Processed);

    let invoice = get_invoice(&app, invoice_id).await?;
    assert_eq!(invoice.status, InvoiceStatus::Sent);
    assert!(invoice.paid_at.is_none());

    let payments = app.ctx.payment_repo.list_for_invoice(invoice_id).await?;
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0].status, PaymentStatus::Failed);
    assert_eq!(payments[0].error_message.as_deref(), Some("Insufficient funds"));

    Ok(())
}

#[tokio::test]
async fn test_charge_create_pending_records_attempt_without_settling() -> anyhow::Result<()> {
    let app = setup().await?;
    let school = seed_school(&app.pool, 1, 1000.0).await?;
    let invoice_id =
        insert_invoice(&app.pool, school.course_id, school.student_ids[0], 1000.0, "sent").await?;

    let event = charge_event("charge.create", "chrg_new", "pending", json!(invoice_id));
    let outcome = app.ctx.payment_service.handle_webhook_event(&event).await?;
    assert_eq!(outcome, WebhookOutcome::Processed);

    assert_eq!(get_invoice(&app, invoice_id).await?.status, InvoiceStatus::Sent);
    let payments = app.ctx.payment_repo.list_for_invoice(invoice_id).await?;
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0].status, PaymentStatus::Pending);

    Ok(())
}

#[tokio::test]
async fn test_unrelated_event_types_are_ignored() -> anyhow::Result<()> {
    let app = setup().await?;
    let school = seed_school(&app.pool, 1, 1000.0).await?;
    let invoice_id =
        insert_invoice(&app.pool, school.course_id, school.student_ids[0], 1000.0, "sent").await?;

    let event = charge_event("customer.create", "chrg_x", "successful", json!(invoice_id));
    let outcome = app.ctx.payment_service.handle_webhook_event(&event).await?;
    assert!(matches!(outcome, WebhookOutcome::Ignored(_)));

    assert_eq!(get_invoice(&app, invoice_id).await?.status, InvoiceStatus::Sent);
    assert!(app.ctx.payment_repo.list_for_invoice(invoice_id).await?.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_events_missing_required_fields_are_ignored() -> anyhow::Result<()> {
    let app = setup().await?;
    let school = seed_school(&app.pool, 1, 1000.0).await?;
    let invoice_id =
        insert_invoice(&app.pool, school.course_id, school.student_ids[0], 1000.0, "sent").await?;

    // No invoice id in the metadata.
    let mut event = charge_event("charge.complete", "chrg_x", "successful", json!(invoice_id));
    event["data"]["metadata"] = json!({});
    let outcome = app.ctx.payment_service.handle_webhook_event(&event).await?;
    assert!(matches!(outcome, WebhookOutcome::Ignored(_)));

    // No charge id.
    let mut event = charge_event("charge.complete", "", "successful", json!(invoice_id));
    event["data"]["id"] = json!(null);
    let outcome = app.ctx.payment_service.handle_webhook_event(&event).await?;
    assert!(matches!(outcome, WebhookOutcome::Ignored(_)));

    // No data object at all.
    let outcome = app
        .ctx
        .payment_service
        .handle_webhook_event(&json!({ "key": "charge.complete" }))
        .await?;
    assert!(matches!(outcome, WebhookOutcome::Ignored(_)));

    assert_eq!(get_invoice(&app, invoice_id).await?.status, InvoiceStatus::Sent);

    Ok(())
}

#[tokio::test]
async fn test_unknown_invoice_reference_is_ignored() -> anyhow::Result<()> {
    let app = setup().await?;

    let event = charge_event("charge.complete", "chrg_x", "successful", json!(9999));
    let outcome = app.ctx.payment_service.handle_webhook_event(&event).await?;
    assert_eq!(outcome, WebhookOutcome::Ignored("invoice not found"));
    assert_eq!(payment_count_for_charge(&app.pool, "chrg_x").await?, 0);

    Ok(())
}

#[tokio::test]
async fn test_metadata_invoice_id_accepted_as_string() -> anyhow::Result<()> {
    let app = setup().await?;
    let school = seed_school(&app.pool, 1, 1000.0).await?;
    let invoice_id =
        insert_invoice(&app.pool, school.course_id, school.student_ids[0], 1000.0, "sent").await?;

    let event = charge_event(
        "charge.complete",
        "chrg_str",
        "successful",
        json!(invoice_id.to_string()),
    );
    let outcome = app.ctx.payment_service.handle_webhook_event(&event).await?;
    assert_eq!(outcome, WebhookOutcome::Processed);
    assert_eq!(get_invoice(&app, invoice_id).await?.status, InvoiceStatus::Paid);

    Ok(())
}

#[tokio::test]
async fn test_signature_verification() -> anyhow::Result<()> {
    let app = setup().await?;
    let body = br#"{"key":"charge.complete"}"#;

    let good = sign(body, WEBHOOK_SECRET);
    assert!(app.ctx.payment_service.verify_webhook_signature(body, &good));

    let wrong_secret = sign(body, "skey_other");
    assert!(!app.ctx.payment_service.verify_webhook_signature(body, &wrong_secret));

    // Signature of different bytes.
    let tampered = sign(br#"{"key":"charge.create"}"#, WEBHOOK_SECRET);
    assert!(!app.ctx.payment_service.verify_webhook_signature(body, &tampered));

    // Not hex at all.
    assert!(!app.ctx.payment_service.verify_webhook_signature(body, "not-hex"));

    Ok(())
}
