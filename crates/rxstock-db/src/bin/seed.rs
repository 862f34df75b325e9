//! # Seed Data Generator
//!
//! Populates the database with demo products, pricing rules and opening
//! stock for development.
//!
//! ## Usage
//! ```bash
//! # Seed 40 products (default)
//! cargo run -p rxstock-db --bin seed
//!
//! # Seed a custom amount
//! cargo run -p rxstock-db --bin seed -- --count 200
//!
//! # Specify database path (overrides rxstock.toml / RXSTOCK_DB_PATH)
//! cargo run -p rxstock-db --bin seed -- --db ./data/rxstock.db
//! ```
//!
//! ## Generated Data
//! - Products across pharmacy categories, each with a pack size and GST rate
//! - One category rule per category (margin or MRP discount)
//! - Two batches per product with staggered expiry dates, each with its
//!   RECEIVED movement so the ledger reconciles from day one

use chrono::{Duration, Utc};
use std::env;
use std::path::PathBuf;
use tracing::{info, warn};

use rxstock_core::pricing::{CalculationMethod, RuleScope, RuleStatus};
use rxstock_core::ReferenceType;
use rxstock_db::{
    init_tracing, BatchLedger, Database, DbConfig, MovementSource, NewBatch, NewPricingRule, NewProduct,
    RxConfig,
};

/// Category code, tax rate (bps), product names.
const CATEGORIES: &[(&str, u32, &[&str])] = &[
    (
        "OTC",
        1200,
        &[
            "Paracetamol 500mg",
            "Ibuprofen 400mg",
            "Cetirizine 10mg",
            "Antacid Gel",
            "Cough Syrup",
            "Vitamin C 500mg",
            "ORS Sachet",
            "Calamine Lotion",
        ],
    ),
    (
        "SCHEDULE_H",
        1200,
        &[
            "Amoxicillin 500mg",
            "Azithromycin 500mg",
            "Metformin 500mg",
            "Amlodipine 5mg",
            "Atorvastatin 10mg",
            "Pantoprazole 40mg",
            "Losartan 50mg",
            "Montelukast 10mg",
        ],
    ),
    (
        "SURGICAL",
        500,
        &[
            "Cotton Roll",
            "Crepe Bandage",
            "Disposable Syringe 5ml",
            "Surgical Gloves",
            "Face Mask",
            "Adhesive Tape",
        ],
    ),
    (
        "NUTRITION",
        1800,
        &["Protein Powder", "Infant Formula", "Multivitamin Syrup", "Calcium Tablets"],
    ),
];

/// Units per pack, cycled through by product index.
const PACK_SIZES: &[i64] = &[10, 15, 1, 30, 6];

const SEED_ACTOR: &str = "seed";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    // Parse command line arguments
    let args: Vec<String> = env::args().collect();

    let mut count: usize = 40;
    let mut db_path: Option<PathBuf> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--count" | "-c" => {
                if i + 1 < args.len() {
                    count = args[i + 1].parse().unwrap_or(40);
                    i += 1;
                }
            }
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("rxstock Seed Data Generator");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -c, --count <N>    Number of products to generate (default: 40)");
                println!("  -d, --db <PATH>    Database file path (default: from rxstock.toml)");
                println!("  -h, --help         Show this help message");
                return Ok(());
            }
            other => warn!(arg = %other, "Ignoring unknown argument"),
        }
        i += 1;
    }

    let mut config = RxConfig::load(None)?;
    if let Some(path) = db_path {
        config.database.path = path;
    }

    info!(path = %config.database.path.display(), count, "Seeding database");

    let db = Database::new(DbConfig::from(&config)).await?;

    if !db.products().list_active(1).await?.is_empty() {
        warn!("Database already has products, skipping seed. Delete the file to regenerate.");
        return Ok(());
    }

    let today = Utc::now().date_naive();
    let start = std::time::Instant::now();

    // Category rules
    for (index, (category, _, _)) in CATEGORIES.iter().enumerate() {
        let (method, margin_bps, discount_bps) = if index % 2 == 0 {
            (CalculationMethod::MarginOnPtr, Some(1500), None)
        } else {
            (CalculationMethod::DiscountFromMrp, None, Some(1000))
        };

        db.pricing_rules()
            .insert(NewPricingRule {
                code: format!("CAT-{category}"),
                name: format!("{category} standard pricing"),
                applies_to: RuleScope::Category,
                product_id: None,
                category: Some(category.to_string()),
                method,
                margin_bps,
                discount_bps,
                fixed_price_cents: None,
                min_quantity: None,
                max_quantity: None,
                valid_from: today,
                valid_to: None,
                priority: 10,
                status: RuleStatus::Active,
            })
            .await?;
    }

    // Products with opening stock
    let mut generated = 0usize;
    let mut batches = 0usize;

    'outer: for (category, tax_rate_bps, names) in CATEGORIES {
        for name in names.iter() {
            if generated >= count {
                break 'outer;
            }

            let pack_size = PACK_SIZES[generated % PACK_SIZES.len()];
            let product = db
                .products()
                .insert(NewProduct {
                    name: name.to_string(),
                    category: Some(category.to_string()),
                    pack_size,
                    tax_rate_bps: *tax_rate_bps,
                })
                .await?;

            // Unit cost between 2.00 and 9.99, MRP at roughly 1.6x cost
            let unit_cost_cents = 200 + ((generated * 37) % 800) as i64;
            let mrp_cents = unit_cost_cents * 16 / 10;

            let mut tx = db.begin_serializable().await?;
            for lot in 0..2i64 {
                let source = MovementSource::new(ReferenceType::Adjustment, &product.id, SEED_ACTOR)
                    .with_notes("Opening stock");
                BatchLedger::receive(
                    &mut tx,
                    NewBatch {
                        product_id: product.id.clone(),
                        batch_number: format!("SD{:04}-{}", generated, lot + 1),
                        expiry_date: today + Duration::days(60 + lot * 300 + (generated as i64 % 90)),
                        mfr_date: Some(today - Duration::days(120)),
                        quantity: 50 * (lot + 1),
                        unit_cost_cents,
                        mrp_cents,
                        vendor_id: Some(format!("VENDOR-{}", generated % 3 + 1)),
                        purchase_item_id: None,
                        received_date: today - Duration::days(30 - lot * 10),
                    },
                    &source,
                )
                .await?;
                batches += 1;
            }
            tx.commit().await?;

            generated += 1;
        }
    }

    let near_expiry = {
        let mut conn = db.acquire().await?;
        BatchLedger::near_expiry(&mut conn, today, config.stock.near_expiry_days)
            .await?
            .len()
    };

    info!(
        products = generated,
        batches,
        near_expiry,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Seed complete"
    );

    Ok(())
}
