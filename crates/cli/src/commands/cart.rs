//! Cart commands.
//!
//! Every command prints the cart it leaves behind, as a table or as JSON
//! with `--json`.

use harvest_cart::{CartSession, CartView};
use harvest_core::{OptionSelection, ProductSnapshot};

use super::{CliError, Output};

/// Build a product snapshot from command-line arguments.
pub fn product(
    product_id: String,
    name: String,
    price_cents: i64,
    weight: bool,
    branch: Option<String>,
) -> ProductSnapshot {
    let mut product = ProductSnapshot::new(product_id, name, price_cents);
    if weight {
        product = product.by_weight();
    }
    if let Some(branch) = branch {
        product = product.with_branch(branch);
    }
    product
}

/// Print the cart.
pub async fn show(session: &CartSession, output: Output) -> Result<(), CliError> {
    let view = session.cart().await?;
    print_cart(&view, output)
}

/// Add a product.
pub async fn add(
    session: &CartSession,
    output: Output,
    product: &ProductSnapshot,
    qty: f64,
    options: &[String],
) -> Result<(), CliError> {
    let options = options
        .iter()
        .map(|raw| parse_option(raw))
        .collect::<Result<Vec<_>, _>>()?;

    let view = session.add_product(product, qty, &options).await?;
    print_cart(&view, output)
}

/// Set a line quantity.
pub async fn set_qty(
    session: &CartSession,
    output: Output,
    item_id: &str,
    qty: f64,
) -> Result<(), CliError> {
    let view = session.update_quantity(item_id, qty).await?;
    print_cart(&view, output)
}

/// Remove a line.
pub async fn remove(session: &CartSession, output: Output, item_id: &str) -> Result<(), CliError> {
    let view = session.remove_item(item_id).await?;
    print_cart(&view, output)
}

/// Apply a coupon.
pub async fn apply_coupon(
    session: &CartSession,
    output: Output,
    code: &str,
) -> Result<(), CliError> {
    let view = session.apply_coupon(code).await?;
    print_cart(&view, output)
}

/// Remove the coupon.
pub async fn remove_coupon(session: &CartSession, output: Output) -> Result<(), CliError> {
    let view = session.remove_coupon().await?;
    print_cart(&view, output)
}

/// Empty the cart.
pub async fn clear(session: &CartSession, output: Output) -> Result<(), CliError> {
    let view = session.clear().await?;
    print_cart(&view, output)
}

/// Parse `id:qty:cents` or `id:qty:cents:set`.
fn parse_option(raw: &str) -> Result<OptionSelection, CliError> {
    let invalid = || CliError::InvalidOption(raw.to_string());
    let parts: Vec<&str> = raw.split(':').map(str::trim).collect();

    let (id, qty, cents, set) = match parts.as_slice() {
        [id, qty, cents] => (*id, *qty, *cents, false),
        [id, qty, cents, "set"] => (*id, *qty, *cents, true),
        _ => return Err(invalid()),
    };

    if id.is_empty() {
        return Err(invalid());
    }
    let qty: f64 = qty.parse().map_err(|_| invalid())?;
    let cents: i64 = cents.parse().map_err(|_| invalid())?;

    Ok(if set {
        OptionSelection::set_price(id, qty, cents)
    } else {
        OptionSelection::add_on(id, qty, cents)
    })
}

#[allow(clippy::print_stdout)]
fn print_cart(view: &CartView, output: Output) -> Result<(), CliError> {
    if output.json {
        println!("{}", serde_json::to_string_pretty(view)?);
        return Ok(());
    }

    if view.is_empty() {
        println!("Your cart is empty ({:?} cart)", view.mode);
        return Ok(());
    }

    for line in &view.lines {
        let mut flags = String::new();
        if line.is_pending {
            flags.push_str(" [pending]");
        }
        if line.is_mutating {
            flags.push_str(" [updating]");
        }
        println!(
            "{:<28} {:<24} {:>10} {:>10}{flags}",
            line.id, line.name, line.quantity_label, line.line_total
        );
        for option in &line.options {
            println!("{:<28}   + {option}", "");
        }
    }

    println!();
    println!("Items:    {}", view.item_count);
    println!("Subtotal: {}", view.subtotal());
    if let Some(code) = &view.coupon_code {
        println!("Coupon:   {code} (-{})", view.discount());
    }
    if let Some(fee) = view.shipping_fee() {
        println!("Delivery: {fee}");
    }
    if let Some(eta) = view.eta_minutes {
        println!("ETA:      {eta} min");
    }
    println!("Total:    {}", view.total());
    Ok(())
}
