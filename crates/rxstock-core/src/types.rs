//! # Domain Types
//!
//! Core domain types used throughout rxstock.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  PurchaseInvoice ──1:N──► PurchaseInvoiceItem                           │
//! │                                  │ verify                               │
//! │                                  ▼                                      │
//! │  Product ──1:N──► Batch ──1:N──► BatchMovement (append-only)            │
//! │                     │                                                   │
//! │                     │ FEFO allocation                                   │
//! │                     ▼                                                   │
//! │  Sale ──1:N──► SaleItem { batch_allocations: [BatchAllocation] }        │
//! │                     ▲                                                   │
//! │                     └── return line (negative qty, return_of_item_id)   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Dual-Key Identity Pattern
//! Every entity has:
//! - `id`: UUID v4 - immutable, used for database relations
//! - Business ID: (bill_no, grn, batch_number...) - human-readable

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::money::Money;

// =============================================================================
// Tax Rate
// =============================================================================

/// Tax rate represented in basis points (bps).
///
/// 1 basis point = 0.01%, so 1200 bps = 12% GST.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxRate(u32);

impl TaxRate {
    /// Creates a tax rate from basis points.
    #[inline]
    pub const fn from_bps(bps: u32) -> Self {
        TaxRate(bps)
    }

    /// Returns the rate in basis points.
    #[inline]
    pub const fn bps(&self) -> u32 {
        self.0
    }

    /// Zero tax rate.
    #[inline]
    pub const fn zero() -> Self {
        TaxRate(0)
    }

    /// Checks if tax rate is zero.
    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl Default for TaxRate {
    fn default() -> Self {
        TaxRate::zero()
    }
}

// =============================================================================
// Product
// =============================================================================

/// A sellable product. Reference data for pricing and verification.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Product {
    pub id: String,
    pub name: String,
    /// Pricing category (e.g. "OTC", "SCHEDULE_H").
    pub category: Option<String>,
    /// Units per pack, the default for new purchase items.
    pub pack_size: i64,
    /// Tax rate in basis points (1200 = 12%).
    pub tax_rate_bps: u32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    #[inline]
    pub fn tax_rate(&self) -> TaxRate {
        TaxRate::from_bps(self.tax_rate_bps)
    }
}

// =============================================================================
// Batch
// =============================================================================

/// Lifecycle status of a batch.
///
/// ```text
///            deduct to 0                credit > 0
///   ACTIVE ──────────────► DEPLETED ──────────────► ACTIVE
///     │
///     │ recall (any remaining)
///     ▼
///   RECALLED (terminal)
///
///   EXPIRED: inferred from expiry_date <= today
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchStatus {
    Active,
    Depleted,
    Expired,
    Recalled,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Active => "ACTIVE",
            BatchStatus::Depleted => "DEPLETED",
            BatchStatus::Expired => "EXPIRED",
            BatchStatus::Recalled => "RECALLED",
        }
    }
}

impl std::fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One received lot of a product.
///
/// Invariant: `0 <= quantity_remaining <= quantity_received`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Batch {
    pub id: String,
    pub product_id: String,
    /// Printed batch/lot number. Not unique across products.
    pub batch_number: String,
    pub expiry_date: NaiveDate,
    pub mfr_date: Option<NaiveDate>,
    pub quantity_received: i64,
    pub quantity_remaining: i64,
    /// Purchase cost (PTR) per unit.
    pub unit_cost_cents: i64,
    /// Maximum retail price per unit, tax inclusive.
    pub mrp_cents: i64,
    pub status: BatchStatus,
    pub vendor_id: Option<String>,
    pub purchase_item_id: Option<String>,
    pub received_date: NaiveDate,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Batch {
    /// A batch is expired on its expiry date.
    #[inline]
    pub fn is_expired(&self, today: NaiveDate) -> bool {
        self.expiry_date <= today
    }

    /// ACTIVE, unexpired and holding stock.
    pub fn is_sellable(&self, today: NaiveDate) -> bool {
        self.status == BatchStatus::Active && !self.is_expired(today) && self.quantity_remaining > 0
    }

    /// Stored status with expiry folded in.
    pub fn effective_status(&self, today: NaiveDate) -> BatchStatus {
        match self.status {
            BatchStatus::Active if self.is_expired(today) => BatchStatus::Expired,
            other => other,
        }
    }

    /// Days until expiry (negative once expired).
    pub fn days_to_expiry(&self, today: NaiveDate) -> i64 {
        (self.expiry_date - today).num_days()
    }

    #[inline]
    pub fn unit_cost(&self) -> Money {
        Money::from_cents(self.unit_cost_cents)
    }

    #[inline]
    pub fn mrp(&self) -> Money {
        Money::from_cents(self.mrp_cents)
    }

    /// Cost value of the stock still on hand.
    pub fn value_on_hand(&self) -> Money {
        self.unit_cost().multiply_quantity(self.quantity_remaining)
    }
}

// =============================================================================
// Batch Movement
// =============================================================================

/// Kind of ledger event. Quantity is always positive; the type carries direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MovementType {
    Received,
    Sold,
    Returned,
    Adjusted,
    Expired,
    Recalled,
}

impl MovementType {
    /// Movements that take units out of `quantity_remaining`.
    pub fn is_outbound(&self) -> bool {
        matches!(self, MovementType::Sold | MovementType::Adjusted | MovementType::Expired)
    }

    /// Movements that put units back into `quantity_remaining`.
    pub fn is_inbound(&self) -> bool {
        matches!(self, MovementType::Received | MovementType::Returned)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MovementType::Received => "RECEIVED",
            MovementType::Sold => "SOLD",
            MovementType::Returned => "RETURNED",
            MovementType::Adjusted => "ADJUSTED",
            MovementType::Expired => "EXPIRED",
            MovementType::Recalled => "RECALLED",
        }
    }
}

/// What business event caused a movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReferenceType {
    PurchaseItem,
    Sale,
    SaleReturn,
    Recall,
    Adjustment,
}

/// Immutable audit record of a quantity change against a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct BatchMovement {
    pub id: String,
    pub batch_id: String,
    pub movement_type: MovementType,
    pub quantity: i64,
    pub reference_type: ReferenceType,
    pub reference_id: String,
    pub performed_by: String,
    pub performed_at: DateTime<Utc>,
    pub notes: Option<String>,
}

// =============================================================================
// Allocation Snapshot
// =============================================================================

/// A planned (not yet deducted) share of one batch.
///
/// Stored as a JSON array on the sale line so returns can credit the
/// exact batches that were sold, whatever happens to the ledger later.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchAllocation {
    pub batch_id: String,
    pub batch_number: String,
    pub expiry_date: NaiveDate,
    pub quantity: i64,
}

// =============================================================================
// Sale
// =============================================================================

/// Status of a sale header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SaleStatus {
    Completed,
    PartiallyReturned,
    Returned,
}

impl Default for SaleStatus {
    fn default() -> Self {
        SaleStatus::Completed
    }
}

/// One requested line of a new sale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaleLine {
    pub product_id: String,
    pub quantity: i64,
    /// Client-supplied unit price, tax exclusive.
    pub unit_price_cents: i64,
}

/// Sale header. Created once per successful checkout.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Sale {
    pub id: String,
    pub bill_no: i64,
    pub order_no: i64,
    pub bill_date: NaiveDate,
    pub customer_id: Option<String>,
    pub subtotal_cents: i64,
    pub tax_cents: i64,
    pub total_cents: i64,
    pub status: SaleStatus,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Sale {
    #[inline]
    pub fn total(&self) -> Money {
        Money::from_cents(self.total_cents)
    }
}

/// A line item of a sale, or a return against one.
///
/// Quantity is signed: positive for the sale, negative for a return line.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct SaleItem {
    pub id: String,
    pub sale_id: String,
    pub product_id: String,
    pub quantity: i64,
    /// Unit price, tax exclusive.
    pub unit_price_cents: i64,
    pub tax_cents: i64,
    pub line_total_cents: i64,
    /// JSON array of [`BatchAllocation`]. `None` on legacy rows.
    pub batch_allocations: Option<String>,
    pub batch_number: Option<String>,
    pub expiry_date: Option<NaiveDate>,
    pub return_of_item_id: Option<String>,
    pub return_reason: Option<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

impl SaleItem {
    #[inline]
    pub fn is_return(&self) -> bool {
        self.quantity < 0
    }

    #[inline]
    pub fn unit_price(&self) -> Money {
        Money::from_cents(self.unit_price_cents)
    }

    #[inline]
    pub fn line_total(&self) -> Money {
        Money::from_cents(self.line_total_cents)
    }

    /// Decodes the stored allocation snapshot.
    ///
    /// Returns `Ok(None)` for legacy lines that were written without one.
    pub fn allocations(&self) -> Result<Option<Vec<BatchAllocation>>, serde_json::Error> {
        match self.batch_allocations.as_deref() {
            None | Some("") => Ok(None),
            Some(json) => serde_json::from_str(json).map(Some),
        }
    }
}

// =============================================================================
// Purchase Invoice
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvoiceStatus {
    Open,
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Unpaid,
    Partial,
    Paid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaxStatus {
    Pending,
    Reconciled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleStatus {
    Open,
    Closed,
}

/// A vendor invoice for received goods.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct PurchaseInvoice {
    pub id: String,
    /// Goods Receipt Number.
    pub grn: i64,
    /// The vendor's own invoice number.
    pub invoice_no: String,
    pub vendor_id: String,
    pub invoice_date: NaiveDate,
    pub status: InvoiceStatus,
    pub payment_status: PaymentStatus,
    pub tax_status: TaxStatus,
    pub lifecycle_status: LifecycleStatus,
    pub total_cents: i64,
    pub paid_cents: i64,
    pub tax_credit_cents: i64,
    pub closed_at: Option<DateTime<Utc>>,
    pub closed_by: Option<String>,
    pub closure_notes: Option<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PurchaseInvoice {
    #[inline]
    pub fn total(&self) -> Money {
        Money::from_cents(self.total_cents)
    }

    #[inline]
    pub fn paid(&self) -> Money {
        Money::from_cents(self.paid_cents)
    }

    #[inline]
    pub fn balance(&self) -> Money {
        self.total() - self.paid()
    }

    /// Items may only be added while the invoice is open on both axes.
    pub fn is_editable(&self) -> bool {
        self.status == InvoiceStatus::Open && self.lifecycle_status == LifecycleStatus::Open
    }
}

/// Verification status of a purchase line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ItemStatus {
    New,
    Verified,
    Rejected,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::New => "NEW",
            ItemStatus::Verified => "VERIFIED",
            ItemStatus::Rejected => "REJECTED",
        }
    }
}

/// One received line of a purchase invoice.
///
/// `pack_size` is frozen at receipt time; verification never re-reads it
/// from the product.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct PurchaseInvoiceItem {
    pub id: String,
    pub invoice_id: String,
    pub product_id: String,
    pub batch_number: String,
    pub expiry_date: Option<NaiveDate>,
    pub mfr_date: Option<NaiveDate>,
    pub pack_size: i64,
    /// Billed packs.
    pub qty: i64,
    /// Free packs (scheme quantity), not billed.
    pub free_qty: i64,
    /// Purchase price per pack.
    pub ptr_cents: i64,
    /// MRP per pack, tax inclusive.
    pub mrp_cents: i64,
    pub tax_rate_bps: u32,
    pub taxable_cents: i64,
    pub tax_cents: i64,
    pub total_cents: i64,
    pub status: ItemStatus,
    pub verified_by: Option<String>,
    pub verified_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl PurchaseInvoiceItem {
    /// Units that land in stock: `(qty + free_qty) × pack_size`.
    pub fn total_units(&self) -> i64 {
        (self.qty + self.free_qty) * self.pack_size
    }

    /// PTR per unit.
    pub fn unit_cost(&self) -> Money {
        Money::from_cents(self.ptr_cents).divide_rounded(self.pack_size)
    }

    /// MRP per unit.
    pub fn unit_mrp(&self) -> Money {
        Money::from_cents(self.mrp_cents).divide_rounded(self.pack_size)
    }
}

/// A payment made to a vendor against an invoice.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct VendorPayment {
    pub id: String,
    pub invoice_id: String,
    pub amount_cents: i64,
    /// CASH, BANK, UPI, CHEQUE...
    pub method: String,
    pub reference: Option<String>,
    pub paid_on: NaiveDate,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn batch(expiry: NaiveDate, remaining: i64, status: BatchStatus) -> Batch {
        let now = Utc::now();
        Batch {
            id: "b-1".into(),
            product_id: "p-1".into(),
            batch_number: "B1".into(),
            expiry_date: expiry,
            mfr_date: None,
            quantity_received: 10,
            quantity_remaining: remaining,
            unit_cost_cents: 250,
            mrp_cents: 400,
            status,
            vendor_id: None,
            purchase_item_id: None,
            received_date: expiry,
            created_at: now,
            updated_at: now,
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_batch_expires_on_expiry_date() {
        let b = batch(date(2025, 1, 1), 5, BatchStatus::Active);
        assert!(!b.is_expired(date(2024, 12, 31)));
        assert!(b.is_expired(date(2025, 1, 1)));
        assert_eq!(b.effective_status(date(2025, 1, 1)), BatchStatus::Expired);
        assert_eq!(b.days_to_expiry(date(2024, 12, 22)), 10);
    }

    #[test]
    fn test_sellable() {
        let today = date(2024, 6, 1);
        assert!(batch(date(2025, 1, 1), 5, BatchStatus::Active).is_sellable(today));
        assert!(!batch(date(2025, 1, 1), 0, BatchStatus::Active).is_sellable(today));
        assert!(!batch(date(2025, 1, 1), 5, BatchStatus::Recalled).is_sellable(today));
        assert!(!batch(date(2024, 6, 1), 5, BatchStatus::Active).is_sellable(today));
    }

    #[test]
    fn test_value_on_hand() {
        let b = batch(date(2025, 1, 1), 4, BatchStatus::Active);
        assert_eq!(b.value_on_hand().cents(), 1000);
    }

    #[test]
    fn test_purchase_item_units_and_unit_cost() {
        let item = PurchaseInvoiceItem {
            id: "i".into(),
            invoice_id: "inv".into(),
            product_id: "p".into(),
            batch_number: "B".into(),
            expiry_date: None,
            mfr_date: None,
            pack_size: 10,
            qty: 10,
            free_qty: 2,
            ptr_cents: 1000,
            mrp_cents: 1500,
            tax_rate_bps: 1200,
            taxable_cents: 0,
            tax_cents: 0,
            total_cents: 0,
            status: ItemStatus::New,
            verified_by: None,
            verified_at: None,
            created_at: Utc::now(),
        };
        assert_eq!(item.total_units(), 120);
        assert_eq!(item.unit_cost().cents(), 100);
        assert_eq!(item.unit_mrp().cents(), 150);
    }

    #[test]
    fn test_sale_item_allocations() {
        let mut item = SaleItem {
            id: "si".into(),
            sale_id: "s".into(),
            product_id: "p".into(),
            quantity: 3,
            unit_price_cents: 100,
            tax_cents: 0,
            line_total_cents: 300,
            batch_allocations: None,
            batch_number: None,
            expiry_date: None,
            return_of_item_id: None,
            return_reason: None,
            created_by: "u".into(),
            created_at: Utc::now(),
        };
        assert!(item.allocations().unwrap().is_none());

        item.batch_allocations = Some(
            r#"[{"batch_id":"b","batch_number":"B1","expiry_date":"2025-01-01","quantity":3}]"#
                .to_string(),
        );
        let allocs = item.allocations().unwrap().unwrap();
        assert_eq!(allocs.len(), 1);
        assert_eq!(allocs[0].quantity, 3);
        assert_eq!(allocs[0].expiry_date, date(2025, 1, 1));
    }

    #[test]
    fn test_status_serde_names() {
        assert_eq!(
            serde_json::to_string(&BatchStatus::Depleted).unwrap(),
            "\"DEPLETED\""
        );
        assert_eq!(
            serde_json::to_string(&SaleStatus::PartiallyReturned).unwrap(),
            "\"PARTIALLY_RETURNED\""
        );
    }

    #[test]
    fn test_movement_direction() {
        assert!(MovementType::Sold.is_outbound());
        assert!(MovementType::Expired.is_outbound());
        assert!(MovementType::Returned.is_inbound());
        assert!(!MovementType::Recalled.is_inbound());
        assert!(!MovementType::Recalled.is_outbound());
    }
}
