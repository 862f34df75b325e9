//! # Repository Module
//!
//! Persistence for every rxstock entity.
//!
//! ## Two Calling Conventions
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Reference data (pool-bound)          Workflow stores (connection-bound)│
//! │  ───────────────────────────          ──────────────────────────────────│
//! │  db.products().insert(..)             let mut tx = db.begin_serializable()│
//! │  db.pricing_rules().rule_book(..)     BatchLedger::deduct(&mut tx, ..)  │
//! │                                       SequenceGenerator::next(&mut tx,..)│
//! │  Each call runs on its own            SaleStore::insert_sale(&mut tx,..)│
//! │  pooled connection.                   tx.commit()                       │
//! │                                                                         │
//! │                                       Everything between begin and      │
//! │                                       commit is one atomic unit.        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`ProductRepository`](product::ProductRepository) - Product catalogue
//! - [`PricingRuleRepository`](pricing_rule::PricingRuleRepository) - Pricing rules
//! - [`BatchLedger`](batch::BatchLedger) - Batch quantities and the movement log
//! - [`SequenceGenerator`](sequence::SequenceGenerator) - Bill/order/GRN counters
//! - [`SaleStore`](sale::SaleStore) - Sales and sale lines
//! - [`PurchaseStore`](purchase::PurchaseStore) - Purchase invoices and lines
//! - [`PaymentStore`](payment::PaymentStore) - Vendor payments

pub mod batch;
pub mod payment;
pub mod pricing_rule;
pub mod product;
pub mod purchase;
pub mod sale;
pub mod sequence;
