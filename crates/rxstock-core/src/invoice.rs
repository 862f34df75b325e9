//! # Invoice Rules
//!
//! Pure status rules for purchase invoices: line amounts, payment status,
//! overpayment guard and closure conditions.
//!
//! ```text
//!   status:          OPEN ──complete (all items VERIFIED)──► COMPLETE
//!   payment_status:  UNPAID ──► PARTIAL ──► PAID        (derived from Σ payments)
//!   tax_status:      PENDING ──reconcile──► RECONCILED
//!   lifecycle:       OPEN ◄──reopen── CLOSED ◄──close── OPEN
//!                           (close needs COMPLETE + PAID + RECONCILED)
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::money::Money;
use crate::types::{InvoiceStatus, LifecycleStatus, PaymentStatus, PurchaseInvoice, TaxRate, TaxStatus};

/// Computed amounts of one purchase line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineAmounts {
    pub taxable: Money,
    pub tax: Money,
    pub total: Money,
}

/// Billed amounts of a purchase line. Free packs are not charged.
pub fn line_amounts(qty: i64, ptr_per_pack: Money, tax_rate: TaxRate) -> LineAmounts {
    let taxable = ptr_per_pack.multiply_quantity(qty);
    let tax = taxable.calculate_tax(tax_rate);
    LineAmounts {
        taxable,
        tax,
        total: taxable + tax,
    }
}

/// Derives payment status from the invoice total and the sum of payments.
pub fn derive_payment_status(total: Money, paid: Money) -> PaymentStatus {
    if !paid.is_positive() {
        PaymentStatus::Unpaid
    } else if paid >= total {
        PaymentStatus::Paid
    } else {
        PaymentStatus::Partial
    }
}

/// Rejects a payment that would take the paid amount past the total.
pub fn check_payment(invoice: &PurchaseInvoice, amount: Money) -> CoreResult<()> {
    if invoice.paid() + amount > invoice.total() {
        return Err(CoreError::Overpayment {
            invoice_id: invoice.id.clone(),
            total: invoice.total(),
            paid: invoice.paid(),
            attempted: amount,
        });
    }
    Ok(())
}

/// Rejects a change that would leave the invoice total below what was paid.
pub fn check_total_covers_payments(invoice: &PurchaseInvoice, new_total: Money) -> CoreResult<()> {
    if invoice.paid() > new_total {
        return Err(CoreError::PaymentsExceedTotal {
            invoice_id: invoice.id.clone(),
            total: new_total,
            paid: invoice.paid(),
        });
    }
    Ok(())
}

/// Outcome of checking closure conditions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClosureCheck {
    pub can_close: bool,
    pub reasons: Vec<String>,
}

/// Evaluates whether an invoice may be closed.
///
/// Every failed condition is reported, not just the first.
pub fn closure_check(invoice: &PurchaseInvoice) -> ClosureCheck {
    let mut reasons = Vec::new();

    if invoice.lifecycle_status == LifecycleStatus::Closed {
        reasons.push("Invoice is already closed".to_string());
    }
    if invoice.status != InvoiceStatus::Complete {
        reasons.push("Invoice is not complete (items pending verification)".to_string());
    }
    if invoice.payment_status != PaymentStatus::Paid {
        reasons.push(format!(
            "Payment outstanding: {} of {} paid",
            invoice.paid(),
            invoice.total()
        ));
    }
    if invoice.tax_status != TaxStatus::Reconciled {
        reasons.push("Tax credit not reconciled".to_string());
    }

    ClosureCheck {
        can_close: reasons.is_empty(),
        reasons,
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Utc};

    fn invoice(total: i64, paid: i64) -> PurchaseInvoice {
        let now = Utc::now();
        PurchaseInvoice {
            id: "inv-1".into(),
            grn: 1,
            invoice_no: "V-100".into(),
            vendor_id: "v".into(),
            invoice_date: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            status: InvoiceStatus::Complete,
            payment_status: derive_payment_status(Money::from_cents(total), Money::from_cents(paid)),
            tax_status: TaxStatus::Reconciled,
            lifecycle_status: LifecycleStatus::Open,
            total_cents: total,
            paid_cents: paid,
            tax_credit_cents: 0,
            closed_at: None,
            closed_by: None,
            closure_notes: None,
            created_by: "u".into(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_line_amounts_exclude_free_goods() {
        let amounts = line_amounts(10, Money::from_cents(1000), TaxRate::from_bps(1200));
        assert_eq!(amounts.taxable.cents(), 10000);
        assert_eq!(amounts.tax.cents(), 1200);
        assert_eq!(amounts.total.cents(), 11200);
    }

    #[test]
    fn test_total_cannot_drop_below_payments() {
        let paid_in_full = invoice(17920, 17920);
        assert!(check_total_covers_payments(&paid_in_full, Money::from_cents(17920)).is_ok());
        let err = check_total_covers_payments(&paid_in_full, Money::from_cents(8960)).unwrap_err();
        assert!(matches!(err, CoreError::PaymentsExceedTotal { .. }));
        assert_eq!(err.category(), crate::error::ErrorCategory::Validation);

        let partly_paid = invoice(17920, 5000);
        assert!(check_total_covers_payments(&partly_paid, Money::from_cents(8960)).is_ok());
    }

    #[test]
    fn test_payment_status() {
        let total = Money::from_cents(1000);
        assert_eq!(derive_payment_status(total, Money::zero()), PaymentStatus::Unpaid);
        assert_eq!(derive_payment_status(total, Money::from_cents(1)), PaymentStatus::Partial);
        assert_eq!(derive_payment_status(total, total), PaymentStatus::Paid);
    }

    #[test]
    fn test_overpayment_guard() {
        let inv = invoice(1000, 600);
        assert!(check_payment(&inv, Money::from_cents(400)).is_ok());
        assert!(matches!(
            check_payment(&inv, Money::from_cents(401)),
            Err(CoreError::Overpayment { .. })
        ));
    }

    #[test]
    fn test_closure_check() {
        let inv = invoice(1000, 1000);
        assert!(closure_check(&inv).can_close);

        let mut inv = invoice(1000, 200);
        inv.status = InvoiceStatus::Open;
        inv.tax_status = TaxStatus::Pending;
        let check = closure_check(&inv);
        assert!(!check.can_close);
        assert_eq!(check.reasons.len(), 3);
        assert!(check.reasons[1].contains("2.00 of 10.00"));
    }
}
