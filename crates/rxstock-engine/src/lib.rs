//! # rxstock-engine: Transactional Workflows
//!
//! Composes the batch ledger, sequences and pricing into the business
//! workflows of a pharmacy counter and back office.
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Commerce (facade)                              │
//! │                                                                         │
//! │  create_sale ────────► SaleOrchestrator   all or nothing               │
//! │  create_return ──────► ReturnDesk         apportion + credit           │
//! │  verify_purchase_* ──► PurchaseVerifier   per item / best effort bulk  │
//! │  invoice lifecycle ──► InvoiceDesk        GRN, payments, close/reopen  │
//! │  recall / trace ─────► StockDesk          reports and adjustments      │
//! │                                                                         │
//! │  Every mutation: Database::begin_serializable() → ... → commit()       │
//! │  Any error drops the transaction and SQLite rolls it back.             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Failures come back as [`CommerceError`]. [`CommerceError::is_retryable`]
//! marks lock contention; [`retry::with_retry`] re-runs a whole workflow
//! for those.
//!
//! ## Example
//! ```rust,no_run
//! use rxstock_db::{Database, DbConfig};
//! use rxstock_engine::{Commerce, CommerceSettings, SaleRequest};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let db = Database::new(DbConfig::new("rxstock.db")).await?;
//! let commerce = Commerce::new(db, CommerceSettings::default());
//!
//! let request = SaleRequest { customer_id: None, items: vec![] };
//! let receipt = commerce.create_sale(request, "counter-1").await;
//! assert!(receipt.is_err()); // empty sale
//! # Ok(())
//! # }
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod allocation;
pub mod error;
pub mod invoice;
pub mod purchase;
pub mod retry;
pub mod returns;
pub mod sale;
pub mod stock;

#[cfg(test)]
mod testing;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{CommerceError, CommerceResult};
pub use invoice::{InvoiceDesk, InvoiceDetail, LifecycleSummary, NewInvoice, NewInvoiceItem, NewPayment, RecordedPayment};
pub use purchase::{PurchaseVerifier, VerifiedStock, VerifySummary};
pub use retry::{with_retry, RetryPolicy};
pub use returns::{ReturnDesk, ReturnOutcome};
pub use sale::{ReceiptLine, SaleOrchestrator, SaleReceipt, SaleRequest, SaleStage};
pub use stock::{BatchTraceability, StockDesk};

use rxstock_core::invoice::ClosureCheck;
use rxstock_core::pricing::PricingCalculator;
use rxstock_core::{Batch, BatchMovement, Money, PurchaseInvoice, PurchaseInvoiceItem, Sale, SaleItem, VendorPayment};
use rxstock_db::{Database, DbConfig, NearExpiryBatch, RxConfig};

// =============================================================================
// Settings
// =============================================================================

/// Tunables of the workflows.
#[derive(Debug, Clone)]
pub struct CommerceSettings {
    pub pricing: PricingCalculator,
    /// Window of [`Commerce::near_expiry_report`].
    pub near_expiry_days: i64,
    /// Used by [`Commerce::create_sale_with_retry`].
    pub retry: RetryPolicy,
}

impl Default for CommerceSettings {
    fn default() -> Self {
        CommerceSettings::from(&RxConfig::default())
    }
}

impl From<&RxConfig> for CommerceSettings {
    fn from(config: &RxConfig) -> Self {
        CommerceSettings {
            pricing: PricingCalculator::new(
                config.pricing.default_margin_bps,
                Money::from_cents(config.pricing.price_tolerance_cents),
            ),
            near_expiry_days: config.stock.near_expiry_days,
            retry: RetryPolicy::from(&config.retry),
        }
    }
}

// =============================================================================
// Commerce
// =============================================================================

/// Entry point for every workflow.
///
/// Cheap to clone; clones share the connection pool.
#[derive(Clone)]
pub struct Commerce {
    db: Database,
    settings: CommerceSettings,
}

impl Commerce {
    pub fn new(db: Database, settings: CommerceSettings) -> Self {
        Commerce { db, settings }
    }

    /// Opens the configured database and builds the facade from the same config.
    pub async fn open(config: &RxConfig) -> CommerceResult<Self> {
        let db = Database::new(DbConfig::from(config)).await?;
        Ok(Commerce::new(db, CommerceSettings::from(config)))
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn settings(&self) -> &CommerceSettings {
        &self.settings
    }

    pub fn sales(&self) -> SaleOrchestrator {
        SaleOrchestrator::new(self.db.clone(), self.settings.pricing)
    }

    pub fn returns(&self) -> ReturnDesk {
        ReturnDesk::new(self.db.clone())
    }

    pub fn purchases(&self) -> PurchaseVerifier {
        PurchaseVerifier::new(self.db.clone())
    }

    pub fn invoices(&self) -> InvoiceDesk {
        InvoiceDesk::new(self.db.clone())
    }

    pub fn stock(&self) -> StockDesk {
        StockDesk::new(self.db.clone(), self.settings.near_expiry_days)
    }

    // -------------------------------------------------------------------------
    // Sales and returns
    // -------------------------------------------------------------------------

    pub async fn create_sale(&self, request: SaleRequest, actor: &str) -> CommerceResult<SaleReceipt> {
        self.sales().create_sale(request, actor).await
    }

    /// [`create_sale`](Self::create_sale) re-run on lock contention per the
    /// configured retry policy.
    pub async fn create_sale_with_retry(&self, request: SaleRequest, actor: &str) -> CommerceResult<SaleReceipt> {
        let sales = self.sales();
        with_retry(&self.settings.retry, || sales.create_sale(request.clone(), actor)).await
    }

    pub async fn get_sale(&self, sale_id: &str) -> CommerceResult<(Sale, Vec<SaleItem>)> {
        self.sales().get_sale(sale_id).await
    }

    pub async fn create_return(
        &self,
        sale_item_id: &str,
        quantity: i64,
        reason: &str,
        actor: &str,
    ) -> CommerceResult<ReturnOutcome> {
        self.returns().create_return(sale_item_id, quantity, reason, actor).await
    }

    // -------------------------------------------------------------------------
    // Purchasing
    // -------------------------------------------------------------------------

    pub async fn verify_purchase_item(&self, item_id: &str, actor: &str) -> CommerceResult<VerifiedStock> {
        self.purchases().verify_item(item_id, actor).await
    }

    pub async fn verify_all_purchase_items(&self, invoice_id: &str, actor: &str) -> CommerceResult<VerifySummary> {
        self.purchases().verify_all_items(invoice_id, actor).await
    }

    pub async fn create_invoice(
        &self,
        invoice: NewInvoice,
        items: Vec<NewInvoiceItem>,
        actor: &str,
    ) -> CommerceResult<InvoiceDetail> {
        self.invoices().create_invoice(invoice, items, actor).await
    }

    pub async fn add_invoice_item(&self, invoice_id: &str, item: NewInvoiceItem) -> CommerceResult<PurchaseInvoiceItem> {
        self.invoices().add_item(invoice_id, item).await
    }

    pub async fn reject_invoice_item(&self, item_id: &str, actor: &str) -> CommerceResult<PurchaseInvoiceItem> {
        self.invoices().reject_item(item_id, actor).await
    }

    pub async fn complete_invoice(&self, invoice_id: &str, actor: &str) -> CommerceResult<PurchaseInvoice> {
        self.invoices().complete_invoice(invoice_id, actor).await
    }

    pub async fn record_payment(
        &self,
        invoice_id: &str,
        payment: NewPayment,
        actor: &str,
    ) -> CommerceResult<RecordedPayment> {
        self.invoices().record_payment(invoice_id, payment, actor).await
    }

    pub async fn reconcile_tax(&self, invoice_id: &str, actor: &str) -> CommerceResult<PurchaseInvoice> {
        self.invoices().reconcile_tax(invoice_id, actor).await
    }

    pub async fn can_close(&self, invoice_id: &str) -> CommerceResult<ClosureCheck> {
        self.invoices().can_close(invoice_id).await
    }

    pub async fn close_invoice(
        &self,
        invoice_id: &str,
        notes: Option<&str>,
        actor: &str,
    ) -> CommerceResult<PurchaseInvoice> {
        self.invoices().close_invoice(invoice_id, notes, actor).await
    }

    pub async fn reopen_invoice(&self, invoice_id: &str, actor: &str) -> CommerceResult<PurchaseInvoice> {
        self.invoices().reopen_invoice(invoice_id, actor).await
    }

    pub async fn lifecycle_summary(&self, invoice_id: &str) -> CommerceResult<LifecycleSummary> {
        self.invoices().lifecycle_summary(invoice_id).await
    }

    pub async fn get_invoice(&self, invoice_id: &str) -> CommerceResult<InvoiceDetail> {
        self.invoices().get_invoice(invoice_id).await
    }

    pub async fn invoice_payments(&self, invoice_id: &str) -> CommerceResult<Vec<VendorPayment>> {
        self.invoices().payments(invoice_id).await
    }

    // -------------------------------------------------------------------------
    // Stock
    // -------------------------------------------------------------------------

    pub async fn recall_batch(&self, batch_id: &str, reason: &str, actor: &str) -> CommerceResult<BatchMovement> {
        self.stock().recall_batch(batch_id, reason, actor).await
    }

    pub async fn adjust_stock(&self, batch_id: &str, delta: i64, reason: &str, actor: &str) -> CommerceResult<Batch> {
        self.stock().adjust_stock(batch_id, delta, reason, actor).await
    }

    pub async fn write_off_expired(&self, batch_id: &str, actor: &str) -> CommerceResult<Option<BatchMovement>> {
        self.stock().write_off_expired(batch_id, actor).await
    }

    pub async fn batch_traceability(&self, batch_id: &str) -> CommerceResult<BatchTraceability> {
        self.stock().batch_traceability(batch_id).await
    }

    pub async fn near_expiry_batches(&self, days: i64) -> CommerceResult<Vec<NearExpiryBatch>> {
        self.stock().near_expiry_batches(days).await
    }

    /// Near-expiry report over the configured window.
    pub async fn near_expiry_report(&self) -> CommerceResult<Vec<NearExpiryBatch>> {
        self.stock().near_expiry_default().await
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
