//! # rxstock-core: Pure Business Logic for rxstock
//!
//! Stock allocation, pricing and invoice rules as pure functions with zero
//! I/O dependencies.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        rxstock Architecture                             │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                 rxstock-engine (workflows)                      │   │
//! │  │   create_sale, create_return, verify_item, record_payment ...   │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ rxstock-core (THIS CRATE) ★                     │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │   types   │  │allocation │  │  pricing  │  │  invoice  │  │   │
//! │  │   │  Batch    │  │ plan_fefo │  │ Calculator│  │  payment  │  │   │
//! │  │   │  SaleItem │  │ apportion │  │ RuleBook  │  │  closure  │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO CLOCK • PURE FUNCTIONS             │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                    rxstock-db (Database Layer)                  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Domain types (Batch, BatchMovement, Sale, PurchaseInvoice...)
//! - [`money`] - Money type with integer arithmetic (no floating point!)
//! - [`allocation`] - FEFO planning and return apportionment
//! - [`pricing`] - Expected price computation and validation
//! - [`invoice`] - Purchase invoice status rules
//! - [`error`] - Domain error types
//! - [`validation`] - Input validation
//!
//! ## Example Usage
//!
//! ```rust
//! use std::collections::HashMap;
//! use rxstock_core::allocation::plan_fefo;
//! use chrono::NaiveDate;
//!
//! let today = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
//! // No batches → NoActiveBatches
//! assert!(plan_fefo("p-1", &[], 3, today, &HashMap::new()).is_err());
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod allocation;
pub mod error;
pub mod invoice;
pub mod money;
pub mod pricing;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult, ErrorCategory, ValidationError};
pub use money::Money;
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Maximum lines allowed in a single sale.
pub const MAX_SALE_LINES: usize = 200;

/// Maximum quantity of a single sale line.
///
/// Catches typing 10000 instead of 10 at the counter.
pub const MAX_LINE_QUANTITY: i64 = 9_999;
