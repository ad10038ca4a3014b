//! Integration tests for `merge_guest_cart`.
//!
//! Uses `wiremock` for the server cart and an in-memory guest cart.

use serde_json::json;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use harvest_cart::config::ApiConfig;
use harvest_cart::local::{LocalCartStore, SharedLocalCart};
use harvest_cart::merge::merge_guest_cart;
use harvest_cart::{CartClient, RequestContext};
use harvest_core::{ProductId, ProductSnapshot};

fn test_client(server: &MockServer) -> CartClient {
    CartClient::new(&ApiConfig {
        base_url: server.uri(),
        timeout_secs: 5,
        ..ApiConfig::default()
    })
    .expect("failed to build test CartClient")
}

fn guest_cart(lines: &[(ProductSnapshot, f64)]) -> SharedLocalCart {
    let local = SharedLocalCart::new(LocalCartStore::in_memory());
    for (product, qty) in lines {
        local
            .update(|store| store.add(product, *qty, &[]))
            .expect("guest add failed");
    }
    local
}

fn milk() -> ProductSnapshot {
    ProductSnapshot::new("m1", "Milk", 350)
}

fn cart_json(lines: &[(&str, &str, f64)]) -> serde_json::Value {
    let items: Vec<serde_json::Value> = lines
        .iter()
        .map(|(id, product, qty)| {
            json!({
                "id": id,
                "productId": product,
                "qty": qty,
                "unitPriceCents": 350
            })
        })
        .collect();
    json!({ "data": { "cartId": "c-1", "items": items } })
}

// ---------------------------------------------------------------------------
// Test 1 – new guest line is added to the server cart
// ---------------------------------------------------------------------------

#[tokio::test]
async fn guest_line_missing_on_server_is_added() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/cart"))
        .respond_with(ResponseTemplate::new(200).set_body_json(cart_json(&[])))
        .up_to_n_times(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/cart/items"))
        .and(body_json(json!({ "productId": "m1", "qty": 2.0 })))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(cart_json(&[("line-1", "m1", 2.0)])),
        )
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/cart"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(cart_json(&[("line-1", "m1", 2.0)])),
        )
        .mount(&server)
        .await;

    let client = test_client(&server);
    let local = guest_cart(&[(milk(), 2.0)]);

    let outcome = merge_guest_cart(&client, &RequestContext::default(), &local)
        .await
        .unwrap();

    assert!(outcome.is_complete());
    assert_eq!(outcome.merged, 1);
    let cart = outcome.cart.expect("expected preview cart");
    assert_eq!(cart.items.len(), 1);
    assert!((cart.items[0].quantity - 2.0).abs() < f64::EPSILON);
    assert!(local.read(LocalCartStore::is_empty).unwrap());
}

// ---------------------------------------------------------------------------
// Test 2 – matching server line is raised, not duplicated
// ---------------------------------------------------------------------------

#[tokio::test]
async fn matching_server_line_is_raised() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/cart"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(cart_json(&[("line-7", "m1", 1.0)])),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/cart/items/line-7"))
        .and(body_json(json!({ "qty": 3.0 })))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(cart_json(&[("line-7", "m1", 3.0)])),
        )
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/cart/items"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/cart"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(cart_json(&[("line-7", "m1", 3.0)])),
        )
        .mount(&server)
        .await;

    let client = test_client(&server);
    let local = guest_cart(&[(milk(), 2.0)]);

    let outcome = merge_guest_cart(&client, &RequestContext::default(), &local)
        .await
        .unwrap();

    assert!(outcome.is_complete());
    let cart = outcome.cart.unwrap();
    assert_eq!(cart.items.len(), 1);
    assert!((cart.items[0].quantity - 3.0).abs() < f64::EPSILON);
}

// ---------------------------------------------------------------------------
// Test 3 – empty guest cart makes no mutation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn empty_guest_cart_makes_no_mutation() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/cart"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(cart_json(&[("line-1", "b1", 1.0)])),
        )
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    Mock::given(method("PATCH"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let client = test_client(&server);
    let local = guest_cart(&[]);

    let outcome = merge_guest_cart(&client, &RequestContext::default(), &local)
        .await
        .unwrap();

    assert_eq!(outcome.merged, 0);
    assert_eq!(outcome.cart.unwrap().items[0].product_id, ProductId::new("b1"));
}

// ---------------------------------------------------------------------------
// Test 4 – partial failure is reported and the guest cart is still cleared
// ---------------------------------------------------------------------------

#[tokio::test]
async fn partial_failure_reports_and_clears_guest_cart() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/cart"))
        .respond_with(ResponseTemplate::new(200).set_body_json(cart_json(&[])))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/cart/items"))
        .and(body_json(json!({ "productId": "m1", "qty": 1.0 })))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(cart_json(&[("line-1", "m1", 1.0)])),
        )
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/cart/items"))
        .and(body_json(json!({ "productId": "gone", "qty": 1.0 })))
        .respond_with(
            ResponseTemplate::new(409).set_body_json(json!({ "message": "Out of stock" })),
        )
        .mount(&server)
        .await;

    let client = test_client(&server);
    let local = guest_cart(&[
        (milk(), 1.0),
        (ProductSnapshot::new("gone", "Discontinued", 100), 1.0),
    ]);

    let outcome = merge_guest_cart(&client, &RequestContext::default(), &local)
        .await
        .unwrap();

    assert_eq!(outcome.merged, 1);
    let error = outcome.error.expect("expected merge error");
    assert_eq!(error.attempted, 2);
    assert_eq!(error.failures.len(), 1);
    assert_eq!(error.failures[0].product_id, ProductId::new("gone"));
    assert!(error.failures[0].message.contains("Out of stock"));
    assert!(local.read(LocalCartStore::is_empty).unwrap());
}

// ---------------------------------------------------------------------------
// Test 5 – unreachable server cart is treated as empty
// ---------------------------------------------------------------------------

#[tokio::test]
async fn failed_server_fetch_adds_every_line() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/cart"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/cart/items"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(cart_json(&[("line-1", "m1", 2.0)])),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = test_client(&server);
    let local = guest_cart(&[(milk(), 2.0)]);

    let outcome = merge_guest_cart(&client, &RequestContext::default(), &local)
        .await
        .unwrap();

    assert!(outcome.is_complete());
    // Preview falls back to the last mutation response
    assert_eq!(outcome.cart.unwrap().items.len(), 1);
}
