//! Response envelope normalization.
//!
//! Backend versions wrap the cart differently: bare, under `data`, under
//! `data.cart`, or under `cart`. The first candidate that looks like a cart
//! (an object with `cartId` or `items`) wins.

use serde_json::Value;
use tracing::debug;

use super::ApiError;
use super::types::ServerCart;

/// Extract a [`ServerCart`] from any supported response envelope.
///
/// A body with no recognizable cart (e.g. `{}` or `null`, as returned by some
/// `DELETE` endpoints) yields an empty cart.
///
/// # Errors
///
/// Returns `ApiError::Parse` if the selected object is not a valid cart.
pub fn normalize_cart(body: Value) -> Result<ServerCart, ApiError> {
    let Some(raw) = select_cart(body) else {
        debug!("Response carried no cart object, treating as empty");
        return Ok(ServerCart::default());
    };

    let mut cart: ServerCart = serde_json::from_value(raw).map_err(|source| ApiError::Parse {
        context: "cart",
        source,
    })?;

    fold_nested(&mut cart);
    Ok(cart)
}

fn select_cart(mut body: Value) -> Option<Value> {
    if looks_like_cart(&body) {
        return Some(body);
    }

    let data = body.get_mut("data").map(Value::take);
    let cart = body.get_mut("cart").map(Value::take);

    if let Some(mut data) = data {
        if looks_like_cart(&data) {
            return Some(data);
        }
        if let Some(inner) = data.get_mut("cart").map(Value::take)
            && looks_like_cart(&inner)
        {
            return Some(inner);
        }
    }

    cart.filter(looks_like_cart)
}

fn looks_like_cart(value: &Value) -> bool {
    value
        .as_object()
        .is_some_and(|obj| obj.contains_key("cartId") || obj.contains_key("items"))
}

/// Fill absent top-level fields from the nested `delivery` and `coupon` blocks.
fn fold_nested(cart: &mut ServerCart) {
    if let Some(delivery) = cart.delivery.take() {
        if cart.eta_minutes.is_none() {
            cart.eta_minutes = delivery.eta_minutes;
        }
        if cart.address_id.is_none() {
            cart.address_id = delivery.address_id;
        }
        if cart.zone_id.is_none() {
            cart.zone_id = delivery.zone_id;
        }
    }

    if let Some(coupon) = cart.coupon.take()
        && cart.coupon_code.is_none()
    {
        cart.coupon_code = coupon.code;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    fn cart_body() -> Value {
        json!({
            "cartId": "c1",
            "items": [{"id": "i1", "productId": "m1", "qty": 2, "unitPriceCents": 350}],
            "subtotalCents": 700,
            "discountCents": 0
        })
    }

    #[test]
    fn test_bare_cart() {
        let cart = normalize_cart(cart_body()).unwrap();
        assert_eq!(cart.cart_id.unwrap().as_str(), "c1");
        assert_eq!(cart.items.len(), 1);
    }

    #[test]
    fn test_data_envelope() {
        let cart = normalize_cart(json!({"data": cart_body()})).unwrap();
        assert_eq!(cart.items.len(), 1);
    }

    #[test]
    fn test_data_cart_envelope() {
        let cart = normalize_cart(json!({"data": {"cart": cart_body()}})).unwrap();
        assert_eq!(cart.subtotal().as_i64(), 700);
    }

    #[test]
    fn test_cart_envelope() {
        let cart = normalize_cart(json!({"success": true, "cart": cart_body()})).unwrap();
        assert_eq!(cart.cart_id.unwrap().as_str(), "c1");
    }

    #[test]
    fn test_items_only_is_a_cart() {
        let cart = normalize_cart(json!({"data": {"items": []}})).unwrap();
        assert!(cart.is_empty());
        assert!(cart.cart_id.is_none());
    }

    #[test]
    fn test_unrecognized_body_is_empty_cart() {
        assert!(normalize_cart(json!({"ok": true})).unwrap().is_empty());
        assert!(normalize_cart(Value::Null).unwrap().is_empty());
    }

    #[test]
    fn test_delivery_fills_missing_fields() {
        let cart = normalize_cart(json!({
            "cartId": "c1",
            "items": [],
            "zoneId": "z-top",
            "delivery": {"etaMinutes": 35, "addressId": "a1", "zoneId": "z-nested"},
            "coupon": {"code": "SAVE10"}
        }))
        .unwrap();

        assert_eq!(cart.eta_minutes, Some(35));
        assert_eq!(cart.address_id.unwrap().as_str(), "a1");
        assert_eq!(cart.zone_id.unwrap().as_str(), "z-top");
        assert_eq!(cart.coupon_code.as_deref(), Some("SAVE10"));
        assert!(cart.delivery.is_none());
    }

    #[test]
    fn test_top_level_coupon_wins() {
        let cart = normalize_cart(json!({
            "items": [],
            "couponCode": "TOP",
            "coupon": {"code": "NESTED"}
        }))
        .unwrap();
        assert_eq!(cart.coupon_code.as_deref(), Some("TOP"));
    }

    #[test]
    fn test_malformed_cart_is_parse_error() {
        let err = normalize_cart(json!({"items": [{"id": "i1"}]})).unwrap_err();
        assert!(matches!(err, ApiError::Parse { context: "cart", .. }));
    }
}
