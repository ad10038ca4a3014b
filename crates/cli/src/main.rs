//! Harvest CLI - drive the cart session from a terminal.
//!
//! # Usage
//!
//! ```bash
//! # Add two bottles of milk to the guest cart
//! harvest add m1 --name Milk --price-cents 350 --qty 2
//!
//! # Half a kilo of apples, sold by weight
//! harvest add a1 --name Apples --price-cents 600 --qty 0.5 --weight
//!
//! # Sign in (merges the guest cart once) and show the server cart
//! harvest --user u-42 login
//! harvest --user u-42 show
//!
//! # Apply a coupon (signed-in only)
//! harvest --user u-42 coupon apply SAVE10
//! ```
//!
//! # Commands
//!
//! - `show` - Print the cart
//! - `add` - Add a product
//! - `set-qty` - Set a line quantity (0 removes)
//! - `remove` - Remove a line
//! - `coupon apply|remove` - Manage the coupon
//! - `clear` - Empty the cart
//! - `login` - Sign in and merge the guest cart
//! - `logout` - Sign out and drop the guest cart

#![cfg_attr(not(test), forbid(unsafe_code))]

use clap::{Parser, Subcommand};
use sentry::integrations::tracing as sentry_tracing;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use harvest_cart::HarvestConfig;

mod commands;

#[derive(Parser)]
#[command(name = "harvest")]
#[command(author, version, about = "Harvest cart tools")]
struct Cli {
    /// Act as this signed-in user (server cart); omit for the guest cart
    #[arg(short, long, global = true)]
    user: Option<String>,

    /// Treat the network as unavailable
    #[arg(long, global = true)]
    offline: bool,

    /// Print the cart as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the cart
    Show,
    /// Add a product to the cart
    Add {
        /// Product ID
        product_id: String,

        /// Product name
        #[arg(short, long)]
        name: String,

        /// Unit (or per-kg) price in cents
        #[arg(short, long)]
        price_cents: i64,

        /// Discounted price in cents
        #[arg(short, long)]
        sale_price_cents: Option<i64>,

        /// Quantity to add
        #[arg(short, long, default_value_t = 1.0)]
        qty: f64,

        /// Product is sold by weight
        #[arg(long)]
        weight: bool,

        /// Branch the product is sold from
        #[arg(short, long)]
        branch: Option<String>,

        /// Option as `id:qty:cents`, or `id:qty:cents:set` for a base price override
        #[arg(short, long = "option")]
        options: Vec<String>,
    },
    /// Set a line quantity; 0 removes the line
    SetQty {
        /// Line ID as shown by `show`
        item_id: String,
        /// New quantity
        qty: f64,
    },
    /// Remove a line
    Remove {
        /// Line ID as shown by `show`
        item_id: String,
    },
    /// Manage the coupon
    Coupon {
        #[command(subcommand)]
        action: CouponAction,
    },
    /// Empty the cart
    Clear,
    /// Sign in as `--user` and merge the guest cart
    Login,
    /// Sign out and drop the guest cart
    Logout,
}

#[derive(Subcommand)]
enum CouponAction {
    /// Apply a coupon code
    Apply {
        /// Coupon code
        code: String,
    },
    /// Remove the applied coupon
    Remove,
}

/// Initialize Sentry error tracking and return guard that must be kept alive.
fn init_sentry(config: &HarvestConfig) -> Option<sentry::ClientInitGuard> {
    let dsn = config.sentry_dsn.as_ref()?;

    let guard = sentry::init((
        dsn.as_str(),
        sentry::ClientOptions {
            release: sentry::release_name!(),
            attach_stacktrace: true,
            ..Default::default()
        },
    ));

    tracing::info!("Sentry initialized");
    Some(guard)
}

/// Filter tracing events to Sentry event types.
fn sentry_event_filter(metadata: &tracing::Metadata<'_>) -> sentry_tracing::EventFilter {
    match *metadata.level() {
        tracing::Level::ERROR | tracing::Level::WARN => sentry_tracing::EventFilter::Event,
        tracing::Level::INFO | tracing::Level::DEBUG => sentry_tracing::EventFilter::Breadcrumb,
        _ => sentry_tracing::EventFilter::Ignore,
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match HarvestConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing_subscriber::fmt::init();
            tracing::error!("Invalid configuration: {e}");
            std::process::exit(2);
        }
    };

    // Initialize Sentry (must be done before tracing subscriber)
    let _sentry_guard = init_sentry(&config);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "harvest_cart=info,harvest_cli=info".into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(sentry_tracing::layer().event_filter(sentry_event_filter))
        .init();

    if let Err(e) = run(cli, &config).await {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli, config: &HarvestConfig) -> Result<(), commands::CliError> {
    let session = commands::open_session(config, cli.user.as_deref(), cli.offline).await?;
    let output = commands::Output { json: cli.json };

    match cli.command {
        Commands::Show => commands::cart::show(&session, output).await?,
        Commands::Add {
            product_id,
            name,
            price_cents,
            sale_price_cents,
            qty,
            weight,
            branch,
            options,
        } => {
            let mut product = commands::cart::product(product_id, name, price_cents, weight, branch);
            if let Some(sale) = sale_price_cents {
                product = product.with_sale_price(sale);
            }
            commands::cart::add(&session, output, &product, qty, &options).await?;
        }
        Commands::SetQty { item_id, qty } => {
            commands::cart::set_qty(&session, output, &item_id, qty).await?;
        }
        Commands::Remove { item_id } => {
            commands::cart::remove(&session, output, &item_id).await?;
        }
        Commands::Coupon { action } => match action {
            CouponAction::Apply { code } => {
                commands::cart::apply_coupon(&session, output, &code).await?;
            }
            CouponAction::Remove => commands::cart::remove_coupon(&session, output).await?,
        },
        Commands::Clear => commands::cart::clear(&session, output).await?,
        Commands::Login => commands::auth::login(&session, output).await?,
        Commands::Logout => commands::auth::logout(&session).await?,
    }
    Ok(())
}
