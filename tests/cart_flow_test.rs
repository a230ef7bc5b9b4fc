mod common;

use common::{insert_coupon, insert_product, spawn_app};
use chrono::Utc;
use rust_decimal_macros::dec;
use uuid::Uuid;

const SESSION: &str = "test-session";

#[tokio::test]
async fn add_update_remove_round_trip() {
    let app = spawn_app().await;
    let pasty = insert_product(&app, "Cornish Pasty", dec!(4.50)).await;
    let scone = insert_product(&app, "Cherry Scone", dec!(2.25)).await;
    let carts = &app.state.services.carts;

    carts.add_item(SESSION, pasty.id, 2, false).await.unwrap();
    carts.add_item(SESSION, scone.id, 1, false).await.unwrap();

    // Accumulate, then override.
    let state = carts.add_item(SESSION, pasty.id, 3, false).await.unwrap();
    assert_eq!(state.unit_count(), 6);
    let state = carts.add_item(SESSION, pasty.id, 3, true).await.unwrap();
    assert_eq!(state.unit_count(), 4);
    assert_eq!(state.total(), dec!(15.75));

    let state = carts.update_item(SESSION, scone.id, 4).await.unwrap();
    assert_eq!(state.total(), dec!(22.50));

    let state = carts.remove_item(SESSION, pasty.id).await.unwrap();
    assert_eq!(state.total(), dec!(9.00));

    carts.clear(SESSION).await.unwrap();
    assert!(carts.load(SESSION).await.unwrap().is_empty());
}

#[tokio::test]
async fn cart_survives_a_fresh_service_read() {
    let app = spawn_app().await;
    let pasty = insert_product(&app, "Cornish Pasty", dec!(4.50)).await;
    let carts = &app.state.services.carts;

    carts.add_item(SESSION, pasty.id, 2, false).await.unwrap();

    // A second load resolves the same state from the session store.
    let reloaded = carts.load(SESSION).await.unwrap();
    assert_eq!(reloaded.total(), dec!(9.00));
    let view = carts.detail(SESSION, None).await.unwrap();
    assert_eq!(view.items.len(), 1);
    assert_eq!(view.items[0].name, "Cornish Pasty");
    assert_eq!(view.items[0].line_total, dec!(9.00));
}

#[tokio::test]
async fn adding_unknown_product_is_not_found() {
    let app = spawn_app().await;
    let err = app
        .state
        .services
        .carts
        .add_item(SESSION, Uuid::new_v4(), 1, false)
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), axum::http::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn cart_price_snapshot_ignores_later_price_changes() {
    let app = spawn_app().await;
    let pasty = insert_product(&app, "Cornish Pasty", dec!(4.50)).await;
    let carts = &app.state.services.carts;

    carts.add_item(SESSION, pasty.id, 2, false).await.unwrap();

    // Raise the catalog price after the snapshot.
    use sea_orm::{ActiveModelTrait, Set};
    let mut active: pastyshop_api::entities::product::ActiveModel = pasty.into();
    active.price = Set(dec!(9.99));
    active.update(&*app.state.db).await.unwrap();

    let view = carts.detail(SESSION, None).await.unwrap();
    assert_eq!(view.items[0].unit_price, dec!(4.50));
    assert_eq!(view.total, dec!(9.00));
}

#[tokio::test]
async fn valid_coupon_discounts_the_cart_view() {
    let app = spawn_app().await;
    let pasty = insert_product(&app, "Cornish Pasty", dec!(50.00)).await;
    insert_coupon(&app, "SUMMER", 10, true).await;

    let carts = &app.state.services.carts;
    let coupons = &app.state.services.coupons;
    carts.add_item(SESSION, pasty.id, 2, false).await.unwrap();

    // Case-insensitive lookup.
    let applied = coupons.apply(SESSION, "summer", Utc::now()).await.unwrap();
    assert!(applied.is_some());

    let coupon = coupons.current(SESSION, Utc::now()).await.unwrap();
    let view = carts.detail(SESSION, coupon).await.unwrap();
    assert_eq!(view.total, dec!(100.00));
    assert_eq!(view.discount, dec!(10.00));
    assert_eq!(view.total_after_discount, dec!(90.00));
    assert_eq!(view.coupon.as_ref().unwrap().code, "SUMMER");
}

#[tokio::test]
async fn rejected_coupon_clears_the_session_and_discounts_nothing() {
    let app = spawn_app().await;
    let pasty = insert_product(&app, "Cornish Pasty", dec!(50.00)).await;
    insert_coupon(&app, "SUMMER", 10, true).await;
    insert_coupon(&app, "DEAD", 50, false).await;

    let carts = &app.state.services.carts;
    let coupons = &app.state.services.coupons;
    carts.add_item(SESSION, pasty.id, 2, false).await.unwrap();

    coupons.apply(SESSION, "SUMMER", Utc::now()).await.unwrap();

    // An inactive code is swallowed and detaches the previous coupon.
    let applied = coupons.apply(SESSION, "DEAD", Utc::now()).await.unwrap();
    assert!(applied.is_none());

    let coupon = coupons.current(SESSION, Utc::now()).await.unwrap();
    assert!(coupon.is_none());
    let view = carts.detail(SESSION, coupon).await.unwrap();
    assert_eq!(view.discount, dec!(0.00));
    assert_eq!(view.total_after_discount, dec!(100.00));
}

#[tokio::test]
async fn unknown_code_is_swallowed_too() {
    let app = spawn_app().await;
    let applied = app
        .state
        .services
        .coupons
        .apply(SESSION, "NOPE", Utc::now())
        .await
        .unwrap();
    assert!(applied.is_none());
}
