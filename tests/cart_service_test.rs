mod common;

use assert_matches::assert_matches;
use common::TestApp;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter};
use storefront_core::{
    entities::commerce::{cart, cart_item, Cart, CartItem},
    errors::ServiceError,
    events::Event,
};
use uuid::Uuid;

async fn item_rows(app: &TestApp) -> u64 {
    CartItem::find()
        .count(&*app.state.db)
        .await
        .expect("count cart items")
}

#[tokio::test]
async fn get_or_create_cart_is_idempotent() {
    let app = TestApp::new().await;
    let carts = app.state.services.cart.clone();
    let user = Uuid::new_v4();

    let first = carts.get_or_create_cart(user).await.unwrap();
    let second = carts.get_or_create_cart(user).await.unwrap();

    assert_eq!(first.id, second.id);
    let count = Cart::find()
        .filter(cart::Column::UserId.eq(user))
        .count(&*app.state.db)
        .await
        .unwrap();
    assert_eq!(count, 1);

    let created = app
        .drain_events()
        .await
        .into_iter()
        .filter(|e| matches!(e, Event::CartCreated { .. }))
        .count();
    assert_eq!(created, 1);
}

#[tokio::test]
async fn add_item_prices_the_line() {
    let app = TestApp::new().await;
    let carts = app.state.services.cart.clone();
    let user = Uuid::new_v4();
    let product = app.seed_product("Widget", dec!(12.50), 10).await;

    let view = carts.add_item(user, product.id, 3).await.unwrap();

    assert_eq!(view.items.len(), 1);
    let line = &view.items[0];
    assert_eq!(line.product_id, product.id);
    assert_eq!(line.quantity, 3);
    assert_eq!(line.unit_price, dec!(12.50));
    assert_eq!(line.subtotal, dec!(37.50));
    assert_eq!(view.total_items, 3);
    assert_eq!(view.total_price, dec!(37.50));
}

#[tokio::test]
async fn adding_same_product_twice_merges_into_one_line() {
    let app = TestApp::new().await;
    let carts = app.state.services.cart.clone();
    let user = Uuid::new_v4();
    let product = app.seed_product("Widget", dec!(4.00), 4).await;

    carts.add_item(user, product.id, 2).await.unwrap();
    let view = carts.add_item(user, product.id, 2).await.unwrap();

    assert_eq!(view.items.len(), 1);
    assert_eq!(view.items[0].quantity, 4);
    assert_eq!(item_rows(&app).await, 1);
}

#[tokio::test]
async fn add_item_over_stock_leaves_no_row() {
    let app = TestApp::new().await;
    let carts = app.state.services.cart.clone();
    let user = Uuid::new_v4();
    let product = app.seed_product("Scarce", dec!(9.99), 2).await;

    let err = carts.add_item(user, product.id, 3).await.unwrap_err();

    assert_matches!(err, ServiceError::InsufficientStock { available: 2, .. });
    assert_eq!(item_rows(&app).await, 0);
}

#[tokio::test]
async fn failed_merge_keeps_existing_quantity() {
    let app = TestApp::new().await;
    let carts = app.state.services.cart.clone();
    let user = Uuid::new_v4();
    let product = app.seed_product("Scarce", dec!(1.00), 5).await;

    carts.add_item(user, product.id, 4).await.unwrap();
    let err = carts.add_item(user, product.id, 2).await.unwrap_err();

    match err {
        ServiceError::InsufficientStock { message, available } => {
            assert_eq!(available, 1);
            assert!(message.contains("Only 1 more available"), "{message}");
        }
        other => panic!("unexpected error: {other:?}"),
    }

    let view = carts.get_cart(user).await.unwrap();
    assert_eq!(view.items[0].quantity, 4);
}

#[tokio::test]
async fn add_item_rejects_bad_input() {
    let app = TestApp::new().await;
    let carts = app.state.services.cart.clone();
    let user = Uuid::new_v4();
    let product = app.seed_product("Widget", dec!(1.00), 5).await;
    let retired = app.seed_inactive_product("Retired", dec!(1.00)).await;

    assert_matches!(
        carts.add_item(user, product.id, 0).await,
        Err(ServiceError::ValidationError(_))
    );
    assert_matches!(
        carts.add_item(user, product.id, -1).await,
        Err(ServiceError::ValidationError(_))
    );
    assert_matches!(
        carts.add_item(user, retired.id, 1).await,
        Err(ServiceError::ValidationError(_))
    );
    assert_matches!(
        carts.add_item(user, Uuid::new_v4(), 1).await,
        Err(ServiceError::NotFound(_))
    );
    assert_eq!(item_rows(&app).await, 0);
}

#[tokio::test]
async fn update_quantity_checks_stock_and_ownership() {
    let app = TestApp::new().await;
    let carts = app.state.services.cart.clone();
    let owner = Uuid::new_v4();
    let stranger = Uuid::new_v4();
    let product = app.seed_product("Widget", dec!(2.00), 5).await;

    let view = carts.add_item(owner, product.id, 1).await.unwrap();
    let item_id = view.items[0].id;

    let updated = carts.update_item_quantity(owner, item_id, 5).await.unwrap();
    assert_eq!(updated.items[0].quantity, 5);
    assert_eq!(updated.total_price, dec!(10.00));

    assert_matches!(
        carts.update_item_quantity(owner, item_id, 6).await,
        Err(ServiceError::InsufficientStock { available: 5, .. })
    );
    assert_matches!(
        carts.update_item_quantity(owner, item_id, 0).await,
        Err(ServiceError::ValidationError(_))
    );

    // Someone else's line looks exactly like a missing one
    let foreign = carts
        .update_item_quantity(stranger, item_id, 1)
        .await
        .unwrap_err();
    let missing = carts
        .update_item_quantity(owner, Uuid::new_v4(), 1)
        .await
        .unwrap_err();
    assert_eq!(foreign.to_string(), missing.to_string());
    assert_matches!(foreign, ServiceError::NotFound(_));

    let view = carts.get_cart(owner).await.unwrap();
    assert_eq!(view.items[0].quantity, 5);
}

#[tokio::test]
async fn remove_item_requires_ownership() {
    let app = TestApp::new().await;
    let carts = app.state.services.cart.clone();
    let owner = Uuid::new_v4();
    let product = app.seed_product("Widget", dec!(2.00), 5).await;
    let item_id = carts.add_item(owner, product.id, 2).await.unwrap().items[0].id;

    assert_matches!(
        carts.remove_item(Uuid::new_v4(), item_id).await,
        Err(ServiceError::NotFound(_))
    );
    assert_eq!(item_rows(&app).await, 1);

    let view = carts.remove_item(owner, item_id).await.unwrap();
    assert!(view.is_empty());
    assert_eq!(view.total_price, Decimal::ZERO);

    assert_matches!(
        carts.remove_item(owner, item_id).await,
        Err(ServiceError::NotFound(_))
    );
}

#[tokio::test]
async fn clear_is_idempotent() {
    let app = TestApp::new().await;
    let carts = app.state.services.cart.clone();
    let user = Uuid::new_v4();

    // No cart at all
    let outcome = carts.clear(user).await.unwrap();
    assert_eq!(outcome.items_removed, 0);
    assert_eq!(outcome.message, "Cart is already empty");

    let a = app.seed_product("A", dec!(1.00), 5).await;
    let b = app.seed_product("B", dec!(2.00), 5).await;
    carts.add_item(user, a.id, 2).await.unwrap();
    carts.add_item(user, b.id, 1).await.unwrap();

    let outcome = carts.clear(user).await.unwrap();
    assert_eq!(outcome.items_removed, 2);
    assert_eq!(carts.get_cart(user).await.unwrap().total_items, 0);

    let outcome = carts.clear(user).await.unwrap();
    assert_eq!(outcome.items_removed, 0);
}

#[tokio::test]
async fn scenario_totals() {
    let app = TestApp::new().await;
    let carts = app.state.services.cart.clone();
    let user = Uuid::new_v4();
    let a = app.seed_product("Product A", dec!(10.00), 5).await;
    let b = app.seed_product("Product B", dec!(5.00), 1).await;

    carts.add_item(user, a.id, 2).await.unwrap();
    let view = carts.add_item(user, b.id, 1).await.unwrap();

    assert_eq!(view.total_items, 3);
    assert_eq!(view.total_price, dec!(25.00));

    let lines = CartItem::find()
        .filter(cart_item::Column::CartId.eq(view.id))
        .all(&*app.state.db)
        .await
        .unwrap();
    assert_eq!(lines.len(), 2);
}

#[tokio::test]
async fn stock_ledger_reports_available_units() {
    let app = TestApp::new().await;
    let product = app.seed_product("Widget", dec!(1.00), 7).await;
    let stock = app.state.services.cart.stock().clone();

    assert_eq!(stock.get_available(product.id).await.unwrap(), 7);
    assert_matches!(
        stock.get_available(Uuid::new_v4()).await,
        Err(ServiceError::NotFound(_))
    );
}

#[tokio::test]
async fn lost_quantity_race_is_a_conflict() {
    let app = TestApp::new().await;
    let carts = app.state.services.cart.clone();
    let user = Uuid::new_v4();
    let product = app.seed_product("Contested", dec!(3.00), 5).await;
    carts.add_item(user, product.id, 2).await.unwrap();

    // Another writer changes the line between our read and our write,
    // so the compare-and-set matches no row
    app.state
        .db
        .execute_unprepared(
            "CREATE TRIGGER lose_quantity_race BEFORE UPDATE ON cart_items \
             BEGIN SELECT RAISE(IGNORE); END;",
        )
        .await
        .unwrap();

    assert_matches!(
        carts.add_item(user, product.id, 1).await,
        Err(ServiceError::Conflict(_))
    );

    app.state
        .db
        .execute_unprepared("DROP TRIGGER lose_quantity_race;")
        .await
        .unwrap();

    let lines = CartItem::find().all(&*app.state.db).await.unwrap();
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0].quantity, 2);

    // A retry re-reads the line and succeeds
    let view = carts.add_item(user, product.id, 1).await.unwrap();
    assert_eq!(view.items[0].quantity, 3);
}

#[tokio::test]
async fn lost_first_insert_race_is_a_conflict() {
    let app = TestApp::new().await;
    let carts = app.state.services.cart.clone();
    let user = Uuid::new_v4();
    let product = app.seed_product("Contested", dec!(3.00), 5).await;
    carts.get_or_create_cart(user).await.unwrap();

    // A competing request inserts the same (cart, product) line first
    app.state
        .db
        .execute_unprepared(
            "CREATE TRIGGER lose_insert_race BEFORE INSERT ON cart_items \
             BEGIN \
               INSERT INTO cart_items (id, cart_id, product_id, quantity, created_at, updated_at) \
               VALUES ('competing-line', NEW.cart_id, NEW.product_id, 4, NEW.created_at, NEW.updated_at); \
             END;",
        )
        .await
        .unwrap();

    assert_matches!(
        carts.add_item(user, product.id, 3).await,
        Err(ServiceError::Conflict(_))
    );

    app.state
        .db
        .execute_unprepared("DROP TRIGGER lose_insert_race;")
        .await
        .unwrap();

    // The failed add rolled back with everything it wrote
    assert_eq!(item_rows(&app).await, 0);

    let view = carts.add_item(user, product.id, 3).await.unwrap();
    assert_eq!(item_rows(&app).await, 1);
    assert_eq!(view.items[0].quantity, 3);
    assert!(view.items[0].quantity <= 5);
}
