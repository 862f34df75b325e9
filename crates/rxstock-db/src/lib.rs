//! # rxstock-db: Database Layer for rxstock
//!
//! SQLite persistence for the pharmacy stock core, built on sqlx.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        rxstock Data Flow                                │
//! │                                                                         │
//! │  rxstock-engine workflow (sell, verify, pay ...)                       │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     rxstock-db (THIS CRATE)                     │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌───────────────┐    ┌──────────────┐  │   │
//! │  │   │   Database    │    │  Repositories │    │  Migrations  │  │   │
//! │  │   │   (pool.rs)   │    │               │    │  (embedded)  │  │   │
//! │  │   │               │    │ BatchLedger   │    │              │  │   │
//! │  │   │ SqlitePool    │◄───│ Sequences     │    │ 001_initial  │  │   │
//! │  │   │ BEGIN         │    │ Sales         │    │ 002_sales    │  │   │
//! │  │   │ IMMEDIATE     │    │ Purchases     │    │ 003_purchase │  │   │
//! │  │   └───────────────┘    └───────────────┘    └──────────────┘  │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐                                            │   │
//! │  │   │   RxConfig    │  rxstock.toml + RXSTOCK_* env overrides    │   │
//! │  │   │  (config.rs)  │                                            │   │
//! │  │   └───────────────┘                                            │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite database file (WAL mode)                                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`config`] - File and environment configuration, tracing setup
//! - [`pool`] - Connection pool creation and transactions
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Database error types
//! - [`repository`] - Ledger, sequences and entity stores
//!
//! ## Usage
//!
//! ```rust,ignore
//! use rxstock_db::{BatchLedger, Database, DbConfig, SequenceGenerator};
//!
//! let db = Database::new(DbConfig::new("rxstock.db")).await?;
//!
//! let mut tx = db.begin_serializable().await?;
//! let bill_no = SequenceGenerator::next(&mut tx, rxstock_db::sequence::BILL_NO).await?;
//! let batches = BatchLedger::lock_and_fetch_available(&mut tx, &product_id, today).await?;
//! tx.commit().await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use config::{init_tracing, ConfigError, RxConfig};
pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};

pub use repository::batch::{BatchLedger, LedgerReconciliation, MovementSource, NearExpiryBatch, NewBatch};
pub use repository::payment::PaymentStore;
pub use repository::pricing_rule::{NewPricingRule, PricingRuleRepository};
pub use repository::product::{NewProduct, ProductRepository};
pub use repository::purchase::{ItemCounts, PurchaseStore};
pub use repository::sale::{BatchSale, SaleStore};
pub use repository::sequence::{self, SequenceGenerator};
