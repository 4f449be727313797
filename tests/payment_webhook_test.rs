mod common;

use assert_matches::assert_matches;
use chrono::{Duration as ChronoDuration, Utc};
use common::{completed_event, signed, TestApp};
use rust_decimal_macros::dec;
use sea_orm::{ActiveModelTrait, EntityTrait, Set};
use serde_json::json;
use std::time::Duration;
use storefront_core::{
    entities::commerce::{payment, Payment, PaymentKind, PaymentStatus},
    errors::ServiceError,
    events::Event,
    services::commerce::ReconcileOutcome,
};
use uuid::Uuid;

fn cleared_events(events: &[Event]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, Event::CartCleared { .. }))
        .count()
}

async fn cart_checkout(app: &TestApp, user: Uuid) -> (Uuid, String) {
    let a = app.seed_product("Product A", dec!(10.00), 5).await;
    let b = app.seed_product("Product B", dec!(5.00), 1).await;
    app.state.services.cart.add_item(user, a.id, 2).await.unwrap();
    app.state.services.cart.add_item(user, b.id, 1).await.unwrap();

    let session = app
        .state
        .services
        .checkout
        .create_cart_session(user)
        .await
        .unwrap();
    (session.payment_id, session.session_id)
}

#[tokio::test]
async fn completion_clears_cart_exactly_once() {
    let app = TestApp::new().await;
    let user = Uuid::new_v4();
    let (payment_id, session_id) = cart_checkout(&app, user).await;
    app.drain_events().await;

    let reconciler = app.state.services.reconciler.clone();
    let (payload, signature) = completed_event(&session_id);

    let first = reconciler
        .handle_event(&payload, Some(&signature))
        .await
        .unwrap();
    assert_eq!(
        first,
        ReconcileOutcome::Completed {
            payment_id,
            cart_items_cleared: Some(2),
        }
    );

    // Provider redelivers the same event
    let second = reconciler
        .handle_event(&payload, Some(&signature))
        .await
        .unwrap();
    assert_eq!(second, ReconcileOutcome::AlreadyCompleted { payment_id });

    let events = app.drain_events().await;
    assert_eq!(cleared_events(&events), 1);
    assert_eq!(
        events
            .iter()
            .filter(|e| matches!(e, Event::PaymentCompleted { .. }))
            .count(),
        1
    );

    let payment = Payment::find_by_id(payment_id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(payment.status, PaymentStatus::Completed);
    assert!(payment.completed_at.is_some());

    let view = app.state.services.cart.get_cart(user).await.unwrap();
    assert!(view.is_empty());
}

#[tokio::test]
async fn concurrent_deliveries_fire_side_effects_once() {
    let app = TestApp::new().await;
    let user = Uuid::new_v4();
    let (_, session_id) = cart_checkout(&app, user).await;
    app.drain_events().await;

    let reconciler = app.state.services.reconciler.clone();
    let mut handles = Vec::new();
    for _ in 0..4 {
        let reconciler = reconciler.clone();
        let (payload, signature) = completed_event(&session_id);
        handles.push(tokio::spawn(async move {
            reconciler.handle_event(&payload, Some(&signature)).await
        }));
    }

    let mut completed = 0;
    for handle in handles {
        match handle.await.unwrap().unwrap() {
            ReconcileOutcome::Completed { .. } => completed += 1,
            ReconcileOutcome::AlreadyCompleted { .. } => {}
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    assert_eq!(completed, 1);
    assert_eq!(cleared_events(&app.drain_events().await), 1);
}

#[tokio::test]
async fn single_item_completion_leaves_cart_alone() {
    let app = TestApp::new().await;
    let user = Uuid::new_v4();
    let product = app.seed_product("Widget", dec!(3.00), 5).await;
    app.state.services.cart.add_item(user, product.id, 1).await.unwrap();

    let session = app
        .state
        .services
        .checkout
        .create_single_item_session(user, "Donation", dec!(5.00))
        .await
        .unwrap();

    let (payload, signature) = completed_event(&session.session_id);
    let outcome = app
        .state
        .services
        .reconciler
        .handle_event(&payload, Some(&signature))
        .await
        .unwrap();

    assert_eq!(
        outcome,
        ReconcileOutcome::Completed {
            payment_id: session.payment_id,
            cart_items_cleared: None,
        }
    );
    let view = app.state.services.cart.get_cart(user).await.unwrap();
    assert_eq!(view.total_items, 1);
}

#[tokio::test]
async fn unknown_session_is_acknowledged() {
    let app = TestApp::new().await;
    let user = Uuid::new_v4();
    let (payment_id, _) = cart_checkout(&app, user).await;

    let (payload, signature) = completed_event("cs_somebody_else");
    let outcome = app
        .state
        .services
        .reconciler
        .handle_event(&payload, Some(&signature))
        .await
        .unwrap();

    assert_eq!(
        outcome,
        ReconcileOutcome::UnknownSession {
            session_id: "cs_somebody_else".to_string()
        }
    );
    let payment = Payment::find_by_id(payment_id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(payment.status, PaymentStatus::Pending);
}

#[tokio::test]
async fn other_event_types_are_ignored() {
    let app = TestApp::new().await;
    let (payload, signature) = signed(json!({
        "id": "evt_refund",
        "type": "charge.refunded",
        "data": { "object": { "id": "ch_1" } }
    }));

    let outcome = app
        .state
        .services
        .reconciler
        .handle_event(&payload, Some(&signature))
        .await
        .unwrap();

    assert_eq!(
        outcome,
        ReconcileOutcome::Ignored {
            event_type: "charge.refunded".to_string()
        }
    );
}

#[tokio::test]
async fn unauthenticated_deliveries_mutate_nothing() {
    let app = TestApp::new().await;
    let user = Uuid::new_v4();
    let (payment_id, session_id) = cart_checkout(&app, user).await;
    let reconciler = app.state.services.reconciler.clone();
    let (payload, signature) = completed_event(&session_id);

    assert_matches!(
        reconciler.handle_event(&payload, None).await,
        Err(ServiceError::Unauthenticated(_))
    );
    assert_matches!(
        reconciler.handle_event(&payload, Some("t=1,v1=deadbeef")).await,
        Err(ServiceError::Unauthenticated(_))
    );

    let mut tampered = payload.clone();
    tampered.extend_from_slice(b" ");
    assert_matches!(
        reconciler.handle_event(&tampered, Some(&signature)).await,
        Err(ServiceError::Unauthenticated(_))
    );

    let (garbage, garbage_sig) = {
        let payload = b"not json".to_vec();
        let header = storefront_core::gateway::stripe::sign_payload(
            common::WEBHOOK_SECRET,
            Utc::now().timestamp(),
            &payload,
        )
        .unwrap();
        (payload, header)
    };
    assert_matches!(
        reconciler.handle_event(&garbage, Some(&garbage_sig)).await,
        Err(ServiceError::Unauthenticated(_))
    );

    let payment = Payment::find_by_id(payment_id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(payment.status, PaymentStatus::Pending);
    let view = app.state.services.cart.get_cart(user).await.unwrap();
    assert_eq!(view.total_items, 3);
}

#[tokio::test]
async fn stale_pending_payments_expire_and_can_still_complete() {
    let app = TestApp::new().await;
    let user = Uuid::new_v4();
    let now = Utc::now();

    let stale = payment::ActiveModel {
        id: Set(Uuid::new_v4()),
        user_id: Set(user),
        session_id: Set("cs_stale".to_string()),
        kind: Set(PaymentKind::SingleItem),
        amount: Set(dec!(7.00)),
        currency: Set("usd".to_string()),
        label: Set("Old".to_string()),
        status: Set(PaymentStatus::Pending),
        created_at: Set(now - ChronoDuration::days(2)),
        updated_at: Set(now - ChronoDuration::days(2)),
        completed_at: Set(None),
    }
    .insert(&*app.state.db)
    .await
    .unwrap();

    let fresh = app
        .state
        .services
        .checkout
        .create_single_item_session(user, "New", dec!(1.00))
        .await
        .unwrap();

    let expired = app
        .state
        .services
        .payments
        .expire_stale(Duration::from_secs(86_400))
        .await
        .unwrap();
    assert_eq!(expired, 1);

    let history = app.state.services.payments.history(user).await.unwrap();
    let status_of = |id: Uuid| history.iter().find(|p| p.id == id).unwrap().status;
    assert_eq!(status_of(stale.id), PaymentStatus::Expired);
    assert_eq!(status_of(fresh.payment_id), PaymentStatus::Pending);

    // Money arriving late still wins
    let (payload, signature) = completed_event("cs_stale");
    let outcome = app
        .state
        .services
        .reconciler
        .handle_event(&payload, Some(&signature))
        .await
        .unwrap();
    assert_matches!(outcome, ReconcileOutcome::Completed { .. });

    // Completed payments are never expired
    app.state
        .services
        .payments
        .expire_stale(Duration::from_secs(0))
        .await
        .unwrap();
    let payment = Payment::find_by_id(stale.id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(payment.status, PaymentStatus::Completed);
}

#[tokio::test]
async fn expiry_rejects_out_of_range_ttl() {
    let app = TestApp::new().await;
    let user = Uuid::new_v4();
    let session = app
        .state
        .services
        .checkout
        .create_single_item_session(user, "Gift card", dec!(4.00))
        .await
        .unwrap();

    // Converts to a chrono duration but reaches past the earliest representable date
    let million_years = Duration::from_secs(1_000_000 * 365 * 86_400);
    assert_matches!(
        app.state.services.payments.expire_stale(million_years).await,
        Err(ServiceError::ValidationError(_))
    );

    let payment = Payment::find_by_id(session.payment_id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(payment.status, PaymentStatus::Pending);
}
