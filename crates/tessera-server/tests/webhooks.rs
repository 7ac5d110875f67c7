//! Billing webhook delivery through the real router.

#![allow(clippy::unwrap_used)]

mod common;

use axum::http::StatusCode;
use chrono::Utc;
use common::{
    Harness, PERIOD_END, assert_status, body_json, capture_logs, checkout_event, event,
    provider_subscription, provider_subscription_json,
};
use tessera_core::webhook::sign;
use tessera_storage::{Permission, SubscriptionStatus, TenantStore};

#[tokio::test]
async fn scenario_b_checkout_creates_one_row_and_links_customer() {
    let h = Harness::new();
    let m = h.member("acme", &[Permission::SUBSCRIPTION_READ]).await;
    h.provider
        .put(provider_subscription("sub_b", "cus_b", "active"))
        .await;

    let payload = checkout_event("evt_b", m.tenant.id, "sub_b", "cus_b");
    let resp = h.webhook(&payload).await;
    assert_status(&resp, StatusCode::OK);
    assert_eq!(body_json(resp).await, serde_json::json!({ "received": true }));

    let row = h.store.subscription_by_external_id("sub_b").await.unwrap();
    assert_eq!(row.tenant_id, m.tenant.id);
    assert_eq!(row.status, SubscriptionStatus::Active);
    assert_eq!(row.external_price_id.as_deref(), Some("price_pro"));
    let tenant = h.store.tenant_by_id(m.tenant.id).await.unwrap().unwrap();
    assert_eq!(tenant.external_customer_id.as_deref(), Some("cus_b"));

    // Redelivery of the identical event.
    assert_status(&h.webhook(&payload).await, StatusCode::OK);
    assert_eq!(h.store.subscription_count().await, 1);
    assert_eq!(
        h.store.subscription_by_external_id("sub_b").await.unwrap().id,
        row.id
    );

    // The tenant can now see it.
    let resp = h.get("/acme/subscriptions", Some(&m.token)).await;
    let body = body_json(resp).await;
    assert_eq!(body["subscriptions"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn concurrent_duplicate_deliveries_leave_one_row() {
    let h = Harness::new();
    let m = h.member("acme", &[]).await;
    h.provider
        .put(provider_subscription("sub_r", "cus_r", "active"))
        .await;

    let payload = checkout_event("evt_r", m.tenant.id, "sub_r", "cus_r");
    let (first, second) = tokio::join!(h.webhook(&payload), h.webhook(&payload));
    assert_status(&first, StatusCode::OK);
    assert_status(&second, StatusCode::OK);

    assert_eq!(h.store.subscription_count().await, 1);
    let row = h.store.subscription_by_external_id("sub_r").await.unwrap();
    assert_eq!(row.tenant_id, m.tenant.id);
}

#[tokio::test]
async fn checkout_uses_the_providers_status_not_the_event() {
    let h = Harness::new();
    let m = h.member("acme", &[]).await;
    h.provider
        .put(provider_subscription("sub_t", "cus_t", "trialing"))
        .await;

    let resp = h
        .webhook(&checkout_event("evt_t", m.tenant.id, "sub_t", "cus_t"))
        .await;
    assert_status(&resp, StatusCode::OK);
    let row = h.store.subscription_by_external_id("sub_t").await.unwrap();
    assert_eq!(row.status, SubscriptionStatus::Trialing);
}

#[tokio::test]
async fn bad_or_missing_signature_is_rejected_without_writes() {
    let h = Harness::new();
    let m = h.member("acme", &[]).await;
    h.provider
        .put(provider_subscription("sub_s", "cus_s", "active"))
        .await;
    let body = serde_json::to_vec(&checkout_event("evt_s", m.tenant.id, "sub_s", "cus_s")).unwrap();

    let forged = sign(&body, b"whsec_wrong", Utc::now().timestamp()).unwrap();
    let resp = h.webhook_raw(body.clone(), Some(&forged)).await;
    assert_status(&resp, StatusCode::BAD_REQUEST);

    let resp = h.webhook_raw(body.clone(), None).await;
    assert_status(&resp, StatusCode::BAD_REQUEST);

    let stale = sign(
        &body,
        common::WEBHOOK_SECRET.as_bytes(),
        Utc::now().timestamp() - 3600,
    )
    .unwrap();
    let resp = h.webhook_raw(body, Some(&stale)).await;
    assert_status(&resp, StatusCode::BAD_REQUEST);

    assert_eq!(h.store.subscription_count().await, 0);
    assert_eq!(h.provider.calls(), 0);
}

#[tokio::test]
async fn malformed_event_is_a_client_error() {
    let h = Harness::new();
    let body = b"{ not json".to_vec();
    let signature = sign(&body, common::WEBHOOK_SECRET.as_bytes(), Utc::now().timestamp()).unwrap();
    assert_status(
        &h.webhook_raw(body, Some(&signature)).await,
        StatusCode::BAD_REQUEST,
    );

    let m = h.member("acme", &[]).await;
    let mut payload = checkout_event("evt_m", m.tenant.id, "sub_m", "cus_m");
    payload["data"]["object"]["metadata"] = serde_json::json!({});
    assert_status(&h.webhook(&payload).await, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn provider_failure_is_retryable() {
    let h = Harness::new();
    let m = h.member("acme", &[]).await;

    // The provider does not know this subscription.
    let resp = h
        .webhook(&checkout_event("evt_x", m.tenant.id, "sub_unknown", "cus_x"))
        .await;
    assert_status(&resp, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body_json(resp).await["message"], "internal error");
    assert_eq!(h.store.subscription_count().await, 0);
}

#[tokio::test]
async fn scenario_d_unknown_customer_is_acknowledged_without_writes() {
    let h = Harness::new();
    let m = h.member("acme", &[]).await;
    h.link_customer(&m.tenant, "cus_router").await;
    let existing = h.subscription(m.tenant.id, "sub_d", "active", false).await;

    let payload = event(
        "evt_d",
        "customer.subscription.updated",
        provider_subscription_json("sub_d", "cus_nobody", "canceled", PERIOD_END),
    );
    let (resp, logs) = capture_logs(h.webhook(&payload)).await;
    assert_status(&resp, StatusCode::OK);
    assert_eq!(body_json(resp).await["received"], true);

    let logs = logs.contents();
    let warning = logs
        .lines()
        .find(|line| line.contains("unknown customer"))
        .unwrap_or_else(|| panic!("no unknown-customer line in:\n{logs}"));
    assert!(warning.contains("WARN"), "{warning}");
    assert!(warning.contains("cus_nobody"), "{warning}");

    assert_eq!(h.store.subscription_count().await, 1);
    assert_eq!(
        h.store.subscription_by_external_id("sub_d").await.unwrap(),
        existing
    );
}

#[tokio::test]
async fn update_and_delete_follow_the_provider() {
    let h = Harness::new();
    let m = h.member("acme", &[Permission::SUBSCRIPTION_READ]).await;
    h.link_customer(&m.tenant, "cus_router").await;
    let sub = h.subscription(m.tenant.id, "sub_u", "active", false).await;

    let payload = event(
        "evt_u1",
        "customer.subscription.updated",
        provider_subscription_json("sub_u", "cus_router", "past_due", PERIOD_END),
    );
    assert_status(&h.webhook(&payload).await, StatusCode::OK);
    let resp = h
        .get(&format!("/acme/subscriptions/{}", sub.id), Some(&m.token))
        .await;
    let body = body_json(resp).await;
    assert_eq!(body["status"], "past_due");
    assert_eq!(body["lifecycle"], "past_due");

    let payload = event(
        "evt_u2",
        "customer.subscription.deleted",
        provider_subscription_json("sub_u", "cus_router", "active", PERIOD_END),
    );
    assert_status(&h.webhook(&payload).await, StatusCode::OK);
    let row = h.store.subscription_by_external_id("sub_u").await.unwrap();
    assert_eq!(row.status, SubscriptionStatus::Canceled);
}

#[tokio::test]
async fn earlier_period_end_does_not_overwrite() {
    let h = Harness::new();
    let m = h.member("acme", &[]).await;
    h.link_customer(&m.tenant, "cus_router").await;
    let before = h.subscription(m.tenant.id, "sub_o", "active", false).await;

    let payload = event(
        "evt_o",
        "customer.subscription.updated",
        provider_subscription_json("sub_o", "cus_router", "unpaid", PERIOD_END - 86_400),
    );
    assert_status(&h.webhook(&payload).await, StatusCode::OK);

    let after = h.store.subscription_by_external_id("sub_o").await.unwrap();
    assert_eq!(after.status, before.status);
    assert_eq!(after.current_period_end, before.current_period_end);
}

#[tokio::test]
async fn event_from_before_a_local_cancel_keeps_it_pending() {
    let h = Harness::new();
    let m = h
        .member(
            "acme",
            &[Permission::SUBSCRIPTION_READ, Permission::SUBSCRIPTION_MANAGE],
        )
        .await;
    h.link_customer(&m.tenant, "cus_router").await;
    let sub = h.subscription(m.tenant.id, "sub_l", "active", false).await;
    let path = format!("/acme/subscriptions/{}", sub.id);

    assert_status(&h.delete(&path, Some(&m.token)).await, StatusCode::OK);

    // Created by the provider a minute before the cancel reached it.
    let mut payload = event(
        "evt_l",
        "customer.subscription.updated",
        provider_subscription_json("sub_l", "cus_router", "active", PERIOD_END),
    );
    payload["created"] = serde_json::json!(Utc::now().timestamp() - 60);
    assert_status(&h.webhook(&payload).await, StatusCode::OK);

    let row = h.store.subscription_by_external_id("sub_l").await.unwrap();
    assert!(row.cancel_at_period_end);
    assert_status(&h.delete(&path, Some(&m.token)).await, StatusCode::BAD_REQUEST);
    assert_eq!(h.provider.calls(), 1);
}

#[tokio::test]
async fn update_cannot_move_a_subscription_between_tenants() {
    let h = Harness::new();
    let acme = h.member("acme", &[]).await;
    let globex = h.member("globex", &[]).await;
    h.link_customer(&acme.tenant, "cus_router").await;
    h.link_customer(&globex.tenant, "cus_globex").await;
    let before = h.subscription(acme.tenant.id, "sub_x", "active", false).await;

    let payload = event(
        "evt_x",
        "customer.subscription.updated",
        provider_subscription_json("sub_x", "cus_globex", "canceled", PERIOD_END),
    );
    assert_status(&h.webhook(&payload).await, StatusCode::OK);

    let after = h.store.subscription_by_external_id("sub_x").await.unwrap();
    assert_eq!(after, before);
}

#[tokio::test]
async fn unrecognized_status_asks_for_redelivery() {
    let h = Harness::new();
    let m = h.member("acme", &[]).await;
    h.link_customer(&m.tenant, "cus_router").await;
    let before = h.subscription(m.tenant.id, "sub_n", "active", false).await;

    let payload = event(
        "evt_n",
        "customer.subscription.updated",
        provider_subscription_json("sub_n", "cus_router", "suspended", PERIOD_END),
    );
    assert_status(&h.webhook(&payload).await, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(h.store.subscription_by_external_id("sub_n").await.unwrap(), before);
}

#[tokio::test]
async fn unhandled_event_types_are_acknowledged() {
    let h = Harness::new();
    for (id, kind) in [("evt_c", "customer.created"), ("evt_i", "invoice.paid")] {
        let payload = event(id, kind, serde_json::json!({ "id": "cus_new" }));
        assert_status(&h.webhook(&payload).await, StatusCode::OK);
    }
    assert_eq!(h.store.subscription_count().await, 0);
}

#[tokio::test]
async fn oversized_body_is_refused() {
    let h = Harness::new();
    let body = vec![b' '; 2 * 1024 * 1024];
    let signature = sign(&body, common::WEBHOOK_SECRET.as_bytes(), Utc::now().timestamp()).unwrap();
    let resp = h.webhook_raw(body, Some(&signature)).await;
    assert_status(&resp, StatusCode::PAYLOAD_TOO_LARGE);
}
