//! Quote Auction Example
//!
//! A buyer asks every supplier for a price and takes the cheapest answer.
//!
//! ```text
//!                            ┌─▶ queue "acme"     ─▶ polling consumer ─┐
//! request ─▶ scatter-gather ─┼─▶ queue "globex"   ─▶ polling consumer ─┼─▶ gather ─▶ best quote
//!            (router)        ├─▶ queue "initech"  ─▶ polling consumer ─┤   (aggregator)
//!                            └─▶ queue "umbrella" ─▶ polling consumer ─┘
//! ```
//!
//! Initech only bids on small orders (a recipient selector). Umbrella is
//! slow on large orders, so those auctions hit the gather timeout and yield
//! no result; the stale partial group is left to the reaper.
//!
//! # Usage
//!
//! ```bash
//! cargo run --package quote-auction -- --config demos/quote-auction/junction.toml
//! cargo run --package quote-auction -- --quantity 5 --quantity 5000 --gather-timeout-ms 500
//! ```

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use junction::core::{BoxError, PollingConsumer};
use junction::framework::{FnGroupProcessor, Recipient};
use junction::prelude::*;
use serde_json::{Value, json};
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(about = "Run quote auctions over a set of simulated suppliers")]
struct Args {
    /// Configuration file (defaults to junction.toml in the current directory).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Configuration profile.
    #[arg(long)]
    profile: Option<String>,

    /// Item to request quotes for.
    #[arg(long, default_value = "widget")]
    item: String,

    /// Order quantities; one auction per value.
    #[arg(long, default_values_t = [10_u64, 250, 1000])]
    quantity: Vec<u64>,

    /// Overrides the configured gather timeout.
    #[arg(long)]
    gather_timeout_ms: Option<u64>,
}

// ============================================================================
// Suppliers
// ============================================================================

struct Supplier {
    name: &'static str,
    unit_price: f64,
    latency: fn(u64) -> Duration,
    max_quantity: Option<u64>,
}

fn quick(_quantity: u64) -> Duration {
    Duration::from_millis(20)
}

fn sluggish(_quantity: u64) -> Duration {
    Duration::from_millis(120)
}

fn slow_on_bulk(quantity: u64) -> Duration {
    if quantity > 500 {
        Duration::from_secs(3)
    } else {
        Duration::from_millis(30)
    }
}

const SUPPLIERS: [Supplier; 4] = [
    Supplier {
        name: "acme",
        unit_price: 9.50,
        latency: quick,
        max_quantity: None,
    },
    Supplier {
        name: "globex",
        unit_price: 9.20,
        latency: sluggish,
        max_quantity: None,
    },
    Supplier {
        name: "initech",
        unit_price: 10.10,
        latency: quick,
        max_quantity: Some(100),
    },
    Supplier {
        name: "umbrella",
        unit_price: 8.90,
        latency: slow_on_bulk,
        max_quantity: None,
    },
];

fn quantity_of(message: &Message) -> u64 {
    message
        .payload()
        .as_value()
        .and_then(|v| v["quantity"].as_u64())
        .unwrap_or(1)
}

impl Supplier {
    fn handler(&self) -> Arc<ServiceActivatingHandler> {
        let Supplier {
            name,
            unit_price,
            latency,
            ..
        } = *self;
        Arc::new(ServiceActivatingHandler::new(name, move |request: Message| async move {
            let quantity = quantity_of(&request);
            tokio::time::sleep(latency(quantity)).await;
            let price = (unit_price * quantity as f64 * 100.0).round() / 100.0;
            Ok(Some(Payload::from(json!({ "supplier": name, "price": price }))))
        }))
    }
}

// ============================================================================
// Gathering
// ============================================================================

/// Picks the cheapest bid of a complete auction.
fn best_quote(group: &MessageGroup) -> Result<Payload, BoxError> {
    let best = group
        .messages()
        .iter()
        .filter_map(|m| m.payload().as_value())
        .filter(|bid| bid["price"].is_number())
        .min_by(|a, b| {
            let (a, b) = (a["price"].as_f64(), b["price"].as_f64());
            a.partial_cmp(&b).unwrap_or(std::cmp::Ordering::Equal)
        })
        .ok_or("auction received no priced bids")?;

    Ok(Payload::from(json!({
        "supplier": best["supplier"],
        "price": best["price"],
        "bids": group.size(),
    })))
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut builder = IntegrationRuntime::builder();
    if let Some(path) = &args.config {
        builder = builder.config_file(path);
    }
    if let Some(profile) = &args.profile {
        builder = builder.profile(profile);
    }
    let runtime = builder.build().await?;

    let router = Arc::new(RecipientListRouter::new("suppliers").with_apply_sequence(true));
    for supplier in &SUPPLIERS {
        let queue = Arc::new(QueueChannel::new(supplier.name));
        let consumer = PollingConsumer::new(queue.clone(), supplier.handler());
        runtime.register(supplier.name, Arc::new(consumer))?;

        let recipient = match supplier.max_quantity {
            Some(max) => Recipient::with_selector(queue, move |m| quantity_of(m) <= max),
            None => Recipient::new(queue),
        };
        router.add_recipient(recipient);
    }

    let gatherer = runtime
        .aggregator()
        .with_name("best-quote")
        .with_processor(FnGroupProcessor::new(best_quote))
        .build();
    let mut auction = runtime.scatter_gather(Scatter::Router(router), gatherer);
    if let Some(ms) = args.gather_timeout_ms {
        auction = auction.with_gather_timeout(Duration::from_millis(ms));
    }
    let auction = auction.build()?;
    runtime.register("auction", auction.clone())?;
    runtime.start();

    for &quantity in &args.quantity {
        let request = Message::new(json!({ "item": args.item, "quantity": quantity }));
        match auction.handle_request_message(&request).await? {
            Some(reply) => {
                let best = reply.payload().as_value().cloned().unwrap_or(Value::Null);
                info!(
                    quantity,
                    supplier = %best["supplier"],
                    price = %best["price"],
                    bids = %best["bids"],
                    "Auction closed"
                );
            }
            None => warn!(
                quantity,
                timeout = ?auction.gather_timeout(),
                "Auction timed out before every supplier answered"
            ),
        }
    }

    runtime.stop();
    Ok(())
}
