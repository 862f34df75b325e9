//! # Error Types
//!
//! Domain-specific error types for rxstock-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  rxstock-core errors (this file)                                       │
//! │  ├── CoreError        - Stock, pricing and workflow rule violations    │
//! │  └── ValidationError  - Input validation failures                      │
//! │                                                                         │
//! │  rxstock-db errors (separate crate)                                    │
//! │  └── DbError          - Database operation failures                    │
//! │                                                                         │
//! │  rxstock-engine errors                                                 │
//! │  └── CommerceError    - What workflow callers see                      │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → CommerceError ← DbError           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every [`CoreError`] belongs to exactly one [`ErrorCategory`]. Callers use
//! the category to decide whether to show the error, retry, or treat it as a
//! harmless resubmission.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::money::Money;

// =============================================================================
// Error Category
// =============================================================================

/// Coarse classification of a failure.
///
/// ```text
/// Validation     → caller input is wrong, never retried
/// StockState     → not enough / wrong stock, carries requested vs available
/// Pricing        → requested price disagrees with the computed price
/// Idempotency    → same action submitted twice, safe to ignore
/// Concurrency    → lock timeout / conflict, retry the WHOLE transaction
/// Infrastructure → database or serialization fault
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Validation,
    StockState,
    Pricing,
    Idempotency,
    Concurrency,
    Infrastructure,
}

// =============================================================================
// Core Error
// =============================================================================

/// Core business logic errors.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A sale was submitted without any lines.
    #[error("Sale must contain at least one item")]
    EmptySale,

    /// Quantity is zero or negative.
    #[error("Invalid quantity {quantity}: must be greater than zero")]
    InvalidQuantity { quantity: i64 },

    /// Quantity exceeds the per-line ceiling.
    #[error("Quantity {requested} exceeds maximum allowed ({max})")]
    QuantityTooLarge { requested: i64, max: i64 },

    /// No ACTIVE batch with stock exists for the product.
    #[error("No available batches for product {product_id}")]
    NoActiveBatches { product_id: String },

    /// Stocked ACTIVE batches exist, but every one of them is past expiry.
    #[error("All available batches for product {product_id} are expired")]
    AllBatchesExpired { product_id: String },

    /// Sum of sellable stock is below the requested quantity.
    ///
    /// ## User Workflow
    /// ```text
    /// Sale line: 12 × Paracetamol 500mg
    ///      │
    ///      ▼
    /// FEFO walk: batch A (5) + batch B (4) = 9
    ///      │
    ///      ▼
    /// InsufficientStock { requested: 12, available: 9 }
    ///      │
    ///      ▼
    /// UI shows: "Only 9 units available"
    /// ```
    #[error("Insufficient stock for product {product_id}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: String,
        requested: i64,
        available: i64,
    },

    /// A batch chosen for this sale expired before the sale was persisted.
    #[error("Batch {batch_number} expired on {expiry_date} and cannot be sold")]
    ExpiredBatchInAllocation {
        batch_number: String,
        expiry_date: NaiveDate,
    },

    /// A purchase item cannot be turned into stock because it has already expired.
    #[error("Purchase item {item_id} expired on {expiry_date}")]
    ExpiredAtVerification {
        item_id: String,
        expiry_date: NaiveDate,
    },

    /// A deduction asked for more than the batch holds.
    #[error("Batch {batch_id} has {remaining} remaining, cannot deduct {requested}")]
    InsufficientBatchQuantity {
        batch_id: String,
        requested: i64,
        remaining: i64,
    },

    /// A credit would push remaining above the quantity originally received.
    #[error("Batch {batch_id} cannot hold {attempted} units (received {received})")]
    LedgerOverflow {
        batch_id: String,
        received: i64,
        attempted: i64,
    },

    /// Batch is in a status that does not allow the operation.
    #[error("Batch {batch_id} is {status}, cannot {operation}")]
    InvalidBatchStatus {
        batch_id: String,
        status: String,
        operation: String,
    },

    #[error("Batch {batch_id} is already recalled")]
    AlreadyRecalled { batch_id: String },

    #[error("Purchase item {item_id} is already verified")]
    AlreadyVerified { item_id: String },

    /// Purchase item is neither NEW nor VERIFIED (e.g. REJECTED).
    #[error("Purchase item {item_id} is {status}, cannot verify")]
    InvalidItemStatus { item_id: String, status: String },

    /// Stock was already received for this purchase item.
    #[error("Stock already recorded for purchase item {item_id}")]
    DuplicateStockRecord { item_id: String },

    /// Requested unit price differs from the computed price beyond tolerance.
    #[error("Price mismatch for product {product_id}: expected {expected}, got {actual} (rule: {rule_applied})")]
    PriceMismatch {
        product_id: String,
        expected: Money,
        actual: Money,
        rule_applied: String,
    },

    /// Return quantity is larger than what is still returnable on the line.
    #[error("Cannot return {requested} of sale item {sale_item_id}: only {returnable} returnable")]
    ReturnExceedsSold {
        sale_item_id: String,
        requested: i64,
        returnable: i64,
    },

    /// The referenced line cannot be returned against (e.g. it is itself a return).
    #[error("Sale item {sale_item_id} is not returnable: {reason}")]
    NotReturnable { sale_item_id: String, reason: String },

    /// Invoice is in a state that does not allow the operation.
    #[error("Invoice {invoice_id} is {state}, cannot {operation}")]
    InvalidInvoiceState {
        invoice_id: String,
        state: String,
        operation: String,
    },

    /// Invoice still has items that are not verified.
    #[error("Invoice {invoice_id} has {unverified} unverified item(s)")]
    InvoiceNotReady { invoice_id: String, unverified: i64 },

    /// Invoice fails one or more closure conditions.
    #[error("Invoice {invoice_id} cannot be closed: {}", reasons.join("; "))]
    CannotClose {
        invoice_id: String,
        reasons: Vec<String>,
    },

    /// Payment would take the paid amount past the invoice total.
    #[error("Payment of {attempted} exceeds balance on invoice {invoice_id} (total {total}, paid {paid})")]
    Overpayment {
        invoice_id: String,
        total: Money,
        paid: Money,
        attempted: Money,
    },

    /// Payments already recorded exceed what the invoice would now total.
    #[error("Invoice {invoice_id} has {paid} paid, more than its new total {total}")]
    PaymentsExceedTotal {
        invoice_id: String,
        total: Money,
        paid: Money,
    },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl CoreError {
    /// Returns the category this error belongs to.
    pub fn category(&self) -> ErrorCategory {
        match self {
            CoreError::NoActiveBatches { .. }
            | CoreError::AllBatchesExpired { .. }
            | CoreError::InsufficientStock { .. }
            | CoreError::ExpiredBatchInAllocation { .. }
            | CoreError::ExpiredAtVerification { .. }
            | CoreError::InsufficientBatchQuantity { .. }
            | CoreError::LedgerOverflow { .. } => ErrorCategory::StockState,

            CoreError::PriceMismatch { .. } => ErrorCategory::Pricing,

            CoreError::DuplicateStockRecord { .. } => ErrorCategory::Idempotency,

            _ => ErrorCategory::Validation,
        }
    }
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// These errors occur when input doesn't meet requirements.
/// Used for early validation before any ledger work runs.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Value must not be negative.
    #[error("{field} must not be negative")]
    MustNotBeNegative { field: String },

    /// Invalid format (e.g., malformed snapshot, inverted date range).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================
