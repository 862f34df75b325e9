//! Shared fixtures for workflow tests.
//!
//! Fixture stock is priced so the default formula yields a known price:
//! unit cost 8.00, MRP 11.20 at 12% tax → min(10.00, 8.00 × 1.2) = 9.60.

use std::path::PathBuf;

use chrono::{Duration, NaiveDate, Utc};
use uuid::Uuid;

use rxstock_core::{Batch, Product, ReferenceType, SaleLine};
use rxstock_db::{BatchLedger, Database, DbConfig, MovementSource, NewBatch, NewProduct};

use crate::purchase::PurchaseVerifier;
use crate::{Commerce, CommerceSettings};

pub const UNIT_COST_CENTS: i64 = 800;
pub const MRP_CENTS: i64 = 1120;
pub const TAX_RATE_BPS: u32 = 1200;
/// Default-formula price of fixture stock.
pub const PRICE_CENTS: i64 = 960;

pub fn today() -> NaiveDate {
    Utc::now().date_naive()
}

pub fn days_from_today(days: i64) -> NaiveDate {
    today() + Duration::days(days)
}

pub async fn memory_db() -> Database {
    Database::new(DbConfig::in_memory()).await.unwrap()
}

pub async fn commerce() -> Commerce {
    Commerce::new(memory_db().await, CommerceSettings::default())
}

/// File-backed database with several connections, for concurrency tests.
pub async fn file_db(max_connections: u32) -> (Database, PathBuf) {
    let path = std::env::temp_dir().join(format!("rxstock-test-{}.db", Uuid::new_v4()));
    let db = Database::new(
        DbConfig::new(&path)
            .max_connections(max_connections)
            .busy_timeout(std::time::Duration::from_secs(10)),
    )
    .await
    .unwrap();
    (db, path)
}

pub fn remove_db_files(path: &PathBuf) {
    for suffix in ["", "-wal", "-shm"] {
        let _ = std::fs::remove_file(format!("{}{}", path.display(), suffix));
    }
}

pub async fn product(db: &Database, name: &str) -> Product {
    db.products()
        .insert(NewProduct {
            name: name.to_string(),
            category: Some("OTC".to_string()),
            pack_size: 10,
            tax_rate_bps: TAX_RATE_BPS,
        })
        .await
        .unwrap()
}

/// Receives a batch of fixture-priced stock in its own transaction.
pub async fn stock(db: &Database, product_id: &str, batch_number: &str, expiry: NaiveDate, quantity: i64) -> Batch {
    let mut tx = db.begin_serializable().await.unwrap();
    let source = MovementSource::new(ReferenceType::Adjustment, product_id, "fixture");
    let (batch, _) = BatchLedger::receive(
        &mut tx,
        NewBatch {
            product_id: product_id.to_string(),
            batch_number: batch_number.to_string(),
            expiry_date: expiry,
            mfr_date: None,
            quantity,
            unit_cost_cents: UNIT_COST_CENTS,
            mrp_cents: MRP_CENTS,
            vendor_id: Some("vendor-1".to_string()),
            purchase_item_id: None,
            received_date: today(),
        },
        &source,
    )
    .await
    .unwrap();
    tx.commit().await.unwrap();
    batch
}

pub async fn batch(db: &Database, batch_id: &str) -> Batch {
    let mut conn = db.acquire().await.unwrap();
    BatchLedger::get(&mut conn, batch_id).await.unwrap()
}

pub async fn batch_with(conn: &mut sqlx::SqliteConnection, batch_id: &str) -> Batch {
    BatchLedger::get(conn, batch_id).await.unwrap()
}

pub async fn sequence_value(db: &Database, name: &str) -> i64 {
    let mut conn = db.acquire().await.unwrap();
    rxstock_db::SequenceGenerator::current(&mut conn, name).await.unwrap()
}

pub fn line(product_id: &str, quantity: i64) -> SaleLine {
    SaleLine {
        product_id: product_id.to_string(),
        quantity,
        unit_price_cents: PRICE_CENTS,
    }
}

pub fn verifier(db: &Database) -> PurchaseVerifier {
    PurchaseVerifier::new(db.clone())
}
