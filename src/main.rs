//! slidecache showcase
//!
//! Walks through the bucket API with debug logging turned on.

use std::thread;
use std::time::Duration;

use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use slidecache::{configure_timer_runtime, open_with_config, Config, Entry};

#[derive(Debug, Clone)]
struct Product {
    id: u64,
    name: String,
    variants: String,
    inventory: Vec<u32>,
}

/// Entry point for the showcase.
///
/// # Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load configuration from environment variables
/// 3. Cache a product with a short TTL and watch it expire
/// 4. Cache a value that never expires, then delete it with a hook installed
/// 5. Fill misses through a data loader
/// 6. Flush the bucket
fn main() {
    // Defaults to "debug" for this crate, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "slidecache=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    info!(
        "Configuration loaded: access_ceiling={:?}, timer_threads={}",
        config.access_ceiling, config.timer_threads
    );
    configure_timer_runtime(&config);

    let products = open_with_config::<Product>("product", &config);
    let product = Product {
        id: 522013,
        name: "Nike Flyknit".to_string(),
        variants: "black and blue".to_string(),
        inventory: vec![1, 2, 3],
    };
    products.set(product.id.to_string(), product, Duration::from_millis(5));

    match products.get("522013") {
        Ok(entry) => {
            let p = entry.value();
            info!(
                "Found {} ({}, {}) with {} sizes in stock",
                p.name,
                p.id,
                p.variants,
                p.inventory.len()
            );
        }
        Err(err) => warn!("Error retrieving value from cache: {}", err),
    }

    // Wait for the entry to expire
    thread::sleep(Duration::from_millis(50));
    if let Err(err) = products.get("522013") {
        info!("Product is not cached anymore: {}", err);
    }

    let labels = open_with_config::<String>("labels", &config);
    labels.set("471983", "string".to_string(), Duration::ZERO);
    labels.set_on_delete(|entry: &Entry<String>| {
        info!("Deleting {} -> {}", entry.key(), entry.value());
    });
    if let Err(err) = labels.delete("471983") {
        warn!("Delete failed: {}", err);
    }

    labels.set_data_loader(|key: &str| {
        key.parse::<u64>()
            .ok()
            .map(|n| Entry::new(key, format!("label-{n}"), Duration::from_secs(1)))
    });
    for key in ["42", "not-a-number", "42"] {
        match labels.get(key) {
            Ok(entry) => info!("{} -> {} (read {} times)", key, entry.value(), entry.access_count()),
            Err(err) => info!("{}", err),
        }
    }
    info!("Label stats: {:?}", labels.stats());

    labels.flush();
    products.flush();
    info!("Showcase complete");
}
