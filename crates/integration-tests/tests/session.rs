//! Server-mode cart mutations: optimistic updates, rollback and the
//! offline guard.

use std::time::Duration;

use serde_json::{Value, json};
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, ResponseTemplate};

use harvest_cart::CartError;
use harvest_core::{AddressId, ProductSnapshot, UserId};
use harvest_integration_tests::{TestContext, cart_json, line, member_tokens};

/// Sign in with an empty guest cart and load the server cart.
///
/// The first `GET /cart` answers with milk ×1; later fetches use whatever
/// the test mounts afterwards.
async fn signed_in_with_milk() -> TestContext {
    signed_in_with(cart_json(vec![line("l-1", "m1", 1.0, 350)])).await
}

/// Sign in with an empty guest cart; the first `GET /cart` answers `cart`.
async fn signed_in_with(cart: Value) -> TestContext {
    let ctx = TestContext::new().await;

    Mock::given(method("GET"))
        .and(path("/cart"))
        .respond_with(ResponseTemplate::new(200).set_body_json(cart))
        .up_to_n_times(1)
        .mount(&ctx.server)
        .await;

    let merged = ctx
        .session
        .sign_in(UserId::new("u-42"), Some(member_tokens()))
        .await
        .unwrap();
    assert!(merged.is_none());

    let view = ctx.session.cart().await.unwrap();
    assert_eq!(view.lines.len(), 1);
    ctx
}

fn cached_qty(cart: Option<&harvest_cart::ServerCart>, id: &str) -> Option<f64> {
    cart.and_then(|c| c.item(id)).map(|i| i.quantity)
}

// ============================================================================
// Offline guard
// ============================================================================

#[tokio::test]
async fn test_offline_mutation_fails_fast_and_keeps_cache() {
    let ctx = signed_in_with_milk().await;

    Mock::given(method("PATCH"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&ctx.server)
        .await;

    ctx.session.connectivity().set_online(false);

    let err = ctx.session.update_quantity("l-1", 5.0).await.unwrap_err();
    assert!(err.is_offline());
    assert!(err.user_message().contains("offline"));

    let cached = ctx.session.cached_cart().await;
    assert_eq!(cached_qty(cached.as_ref(), "l-1"), Some(1.0));
    assert!(!ctx.session.is_item_mutating("l-1"));
}

#[tokio::test]
async fn test_offline_reads_use_cache_only() {
    let ctx = signed_in_with_milk().await;
    ctx.session.connectivity().set_online(false);

    // Cached context still renders
    assert_eq!(ctx.session.cart().await.unwrap().lines.len(), 1);

    // A new address is a different cache entry and cannot be fetched
    ctx.session.set_address(Some(AddressId::new("addr-2"))).await;
    let err = ctx.session.cart().await.unwrap_err();
    assert!(matches!(err, CartError::Offline));
}

// ============================================================================
// Optimistic updates
// ============================================================================

#[tokio::test]
async fn test_update_success_settles_on_server_cart() {
    let ctx = signed_in_with_milk().await;

    Mock::given(method("PATCH"))
        .and(path("/cart/items/l-1"))
        .and(body_json(json!({ "qty": 3.0 })))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(cart_json(vec![line("l-1", "m1", 3.0, 350)])),
        )
        .expect(1)
        .mount(&ctx.server)
        .await;

    Mock::given(method("GET"))
        .and(path("/cart"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(cart_json(vec![line("l-1", "m1", 3.0, 350)])),
        )
        .mount(&ctx.server)
        .await;

    let view = ctx.session.update_quantity("l-1", 3.0).await.unwrap();

    assert!((view.lines[0].quantity - 3.0).abs() < f64::EPSILON);
    assert_eq!(view.total(), "$10.50");
    assert!(!view.lines[0].is_mutating);
}

#[tokio::test]
async fn test_failed_update_rolls_back_then_refetches() {
    let ctx = signed_in_with_milk().await;

    Mock::given(method("PATCH"))
        .and(path("/cart/items/l-1"))
        .respond_with(
            ResponseTemplate::new(500)
                .set_body_json(json!({ "message": "boom" }))
                .set_delay(Duration::from_millis(400)),
        )
        .expect(1)
        .mount(&ctx.server)
        .await;

    // Server truth after the failure: someone else set the line to 2
    Mock::given(method("GET"))
        .and(path("/cart"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(cart_json(vec![line("l-1", "m1", 2.0, 350)])),
        )
        .mount(&ctx.server)
        .await;

    let observe = async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        let cached = ctx.session.cached_cart().await;
        (
            cached_qty(cached.as_ref(), "l-1"),
            ctx.session.is_item_mutating("l-1"),
        )
    };

    let (result, (during_qty, during_busy)) =
        tokio::join!(ctx.session.update_quantity("l-1", 4.0), observe);

    // Optimistic value while the request is in flight
    assert_eq!(during_qty, Some(4.0));
    assert!(during_busy);

    let err = result.unwrap_err();
    assert!(matches!(err, CartError::Api(_)), "expected Api error, got: {err:?}");

    let cached = ctx.session.cached_cart().await;
    assert_eq!(cached_qty(cached.as_ref(), "l-1"), Some(2.0));
    assert!(!ctx.session.is_item_mutating("l-1"));
}

#[tokio::test]
async fn test_optimistic_add_shows_pending_line() {
    let ctx = signed_in_with_milk().await;

    Mock::given(method("POST"))
        .and(path("/cart/items"))
        .and(body_json(json!({ "productId": "b1", "qty": 1.0 })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(cart_json(vec![
                    line("l-1", "m1", 1.0, 350),
                    line("l-2", "b1", 1.0, 250),
                ]))
                .set_delay(Duration::from_millis(300)),
        )
        .expect(1)
        .mount(&ctx.server)
        .await;

    Mock::given(method("GET"))
        .and(path("/cart"))
        .respond_with(ResponseTemplate::new(200).set_body_json(cart_json(vec![
            line("l-1", "m1", 1.0, 350),
            line("l-2", "b1", 1.0, 250),
        ])))
        .mount(&ctx.server)
        .await;

    let bread = ProductSnapshot::new("b1", "Bread", 250);
    let observe = async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        ctx.session.cart().await.unwrap()
    };

    let (result, during) = tokio::join!(ctx.session.add_product(&bread, 1.0, &[]), observe);

    assert_eq!(during.lines.len(), 2);
    let pending = during.lines.iter().find(|l| l.product_id == "b1").unwrap();
    assert!(pending.is_pending);
    assert!(pending.is_mutating);
    assert_eq!(during.subtotal(), "$6.00");

    // Placeholder IDs cannot be edited
    let err = ctx.session.update_quantity(&pending.id, 2.0).await.unwrap_err();
    assert!(matches!(err, CartError::Validation(_)));

    let view = result.unwrap();
    assert!(view.lines.iter().all(|l| !l.is_pending));
    assert_eq!(view.line("l-2").unwrap().name, "B1");
}

#[tokio::test]
async fn test_zero_quantity_removes_line() {
    let ctx = signed_in_with_milk().await;

    Mock::given(method("DELETE"))
        .and(path("/cart/items/l-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(cart_json(vec![])))
        .expect(1)
        .mount(&ctx.server)
        .await;

    Mock::given(method("GET"))
        .and(path("/cart"))
        .respond_with(ResponseTemplate::new(200).set_body_json(cart_json(vec![])))
        .mount(&ctx.server)
        .await;

    let view = ctx.session.update_quantity("l-1", 0.0).await.unwrap();
    assert!(view.is_empty());
}

#[tokio::test]
async fn test_update_below_rounding_step_removes_line() {
    let ctx = signed_in_with_milk().await;

    Mock::given(method("PATCH"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&ctx.server)
        .await;

    Mock::given(method("DELETE"))
        .and(path("/cart/items/l-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(cart_json(vec![])))
        .expect(1)
        .mount(&ctx.server)
        .await;

    Mock::given(method("GET"))
        .and(path("/cart"))
        .respond_with(ResponseTemplate::new(200).set_body_json(cart_json(vec![])))
        .mount(&ctx.server)
        .await;

    let view = ctx.session.update_quantity("l-1", 0.0004).await.unwrap();
    assert!(view.is_empty());
}

// ============================================================================
// Clear
// ============================================================================

#[tokio::test]
async fn test_clear_empties_optimistically_then_settles() {
    let ctx = signed_in_with_milk().await;

    Mock::given(method("POST"))
        .and(path("/cart/clear"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(cart_json(vec![]))
                .set_delay(Duration::from_millis(300)),
        )
        .expect(1)
        .mount(&ctx.server)
        .await;

    Mock::given(method("GET"))
        .and(path("/cart"))
        .respond_with(ResponseTemplate::new(200).set_body_json(cart_json(vec![])))
        .mount(&ctx.server)
        .await;

    let observe = async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        let cached = ctx.session.cached_cart().await;
        (
            cached.map(|c| c.items.len()),
            ctx.session.is_item_mutating("cart"),
        )
    };

    let (result, (during_lines, during_busy)) =
        tokio::join!(ctx.session.clear(), observe);

    assert_eq!(during_lines, Some(0));
    assert!(during_busy);

    let view = result.unwrap();
    assert!(view.is_empty());
    assert_eq!(view.total(), "$0.00");
    assert!(!ctx.session.is_item_mutating("cart"));
}

#[tokio::test]
async fn test_failed_clear_restores_lines() {
    let ctx = signed_in_with_milk().await;

    Mock::given(method("POST"))
        .and(path("/cart/clear"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({ "message": "boom" })))
        .expect(1)
        .mount(&ctx.server)
        .await;

    Mock::given(method("GET"))
        .and(path("/cart"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(cart_json(vec![line("l-1", "m1", 1.0, 350)])),
        )
        .mount(&ctx.server)
        .await;

    let err = ctx.session.clear().await.unwrap_err();
    assert!(matches!(err, CartError::Api(_)), "expected Api error, got: {err:?}");

    let cached = ctx.session.cached_cart().await;
    assert_eq!(cached_qty(cached.as_ref(), "l-1"), Some(1.0));
    assert!(!ctx.session.is_item_mutating("cart"));
}

// ============================================================================
// Coupons
// ============================================================================

#[tokio::test]
async fn test_guest_coupon_is_rejected_without_request() {
    let ctx = TestContext::new().await;

    Mock::given(method("POST"))
        .and(path("/cart/apply-coupon"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&ctx.server)
        .await;

    let err = ctx.session.apply_coupon("SAVE10").await.unwrap_err();
    assert!(matches!(err, CartError::AuthRequired(_)));
}

#[tokio::test]
async fn test_rejected_coupon_rolls_back() {
    let ctx = signed_in_with_milk().await;

    Mock::given(method("POST"))
        .and(path("/cart/apply-coupon"))
        .and(body_json(json!({ "couponCode": "OLD" })))
        .respond_with(
            ResponseTemplate::new(422).set_body_json(json!({ "message": "Coupon expired" })),
        )
        .expect(1)
        .mount(&ctx.server)
        .await;

    Mock::given(method("GET"))
        .and(path("/cart"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(cart_json(vec![line("l-1", "m1", 1.0, 350)])),
        )
        .mount(&ctx.server)
        .await;

    let err = ctx.session.apply_coupon(" OLD ").await.unwrap_err();
    assert_eq!(err.user_message(), "Coupon expired");

    let cached = ctx.session.cached_cart().await.unwrap();
    assert!(cached.coupon_code.is_none());
    assert!(!ctx.session.is_item_mutating("coupon"));
}

#[tokio::test]
async fn test_apply_coupon_shows_discount() {
    let ctx = signed_in_with_milk().await;

    let discounted = json!({
        "data": {
            "cartId": "cart-1",
            "items": [line("l-1", "m1", 1.0, 350)],
            "subtotalCents": 350,
            "discountCents": 50,
            "coupon": { "code": "SAVE50" }
        }
    });

    Mock::given(method("POST"))
        .and(path("/cart/apply-coupon"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&discounted))
        .expect(1)
        .mount(&ctx.server)
        .await;

    Mock::given(method("GET"))
        .and(path("/cart"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&discounted))
        .mount(&ctx.server)
        .await;

    let view = ctx.session.apply_coupon("SAVE50").await.unwrap();
    assert_eq!(view.coupon_code.as_deref(), Some("SAVE50"));
    assert_eq!(view.discount(), "$0.50");
    assert_eq!(view.total(), "$3.00");
}

fn milk_with_coupon() -> Value {
    json!({
        "data": {
            "cartId": "cart-1",
            "items": [line("l-1", "m1", 1.0, 350)],
            "subtotalCents": 350,
            "discountCents": 50,
            "coupon": { "code": "SAVE50" }
        }
    })
}

#[tokio::test]
async fn test_remove_coupon_drops_discount() {
    let ctx = signed_in_with(milk_with_coupon()).await;

    Mock::given(method("DELETE"))
        .and(path("/cart/coupon"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(cart_json(vec![line("l-1", "m1", 1.0, 350)]))
                .set_delay(Duration::from_millis(300)),
        )
        .expect(1)
        .mount(&ctx.server)
        .await;

    Mock::given(method("GET"))
        .and(path("/cart"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(cart_json(vec![line("l-1", "m1", 1.0, 350)])),
        )
        .mount(&ctx.server)
        .await;

    let observe = async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        let cached = ctx.session.cached_cart().await.unwrap();
        (cached.coupon_code, ctx.session.is_item_mutating("coupon"))
    };

    let (result, (during_code, during_busy)) =
        tokio::join!(ctx.session.remove_coupon(), observe);

    assert!(during_code.is_none());
    assert!(during_busy);

    let view = result.unwrap();
    assert!(view.coupon_code.is_none());
    assert_eq!(view.discount(), "$0.00");
    assert_eq!(view.total(), "$3.50");
}

#[tokio::test]
async fn test_failed_coupon_removal_keeps_coupon() {
    let ctx = signed_in_with(milk_with_coupon()).await;

    Mock::given(method("DELETE"))
        .and(path("/cart/coupon"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({ "message": "boom" })))
        .expect(1)
        .mount(&ctx.server)
        .await;

    Mock::given(method("GET"))
        .and(path("/cart"))
        .respond_with(ResponseTemplate::new(200).set_body_json(milk_with_coupon()))
        .mount(&ctx.server)
        .await;

    assert!(ctx.session.remove_coupon().await.is_err());

    let cached = ctx.session.cached_cart().await.unwrap();
    assert_eq!(cached.coupon_code.as_deref(), Some("SAVE50"));
    assert_eq!(cached.discount_cents.as_i64(), 50);
    assert!(!ctx.session.is_item_mutating("coupon"));
}
