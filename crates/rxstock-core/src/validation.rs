//! # Validation Module
//!
//! Input checks that run before any workflow touches the ledger.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: THIS MODULE (pure)                                           │
//! │  ├── empty sale, non-positive quantities, negative prices              │
//! │  └── free-text lengths, pack sizes, payment amounts                    │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: Workflow (rxstock-engine)                                    │
//! │  ├── stock availability, expiry, price agreement                       │
//! │  └── verification / return state checks                                │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Database (SQLite)                                            │
//! │  ├── CHECK (quantity_remaining BETWEEN 0 AND quantity_received)        │
//! │  ├── UNIQUE (bill_no), UNIQUE (grn)                                    │
//! │  └── Foreign key constraints                                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::types::SaleLine;
use crate::{MAX_LINE_QUANTITY, MAX_SALE_LINES};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

// =============================================================================
// Quantity Validators
// =============================================================================

/// Validates a line quantity.
///
/// ## Rules
/// - Must be greater than zero (`InvalidQuantity`)
/// - Must not exceed [`MAX_LINE_QUANTITY`] (`QuantityTooLarge`)
///
/// ## Example
/// ```rust
/// use rxstock_core::validation::validate_quantity;
///
/// assert!(validate_quantity(5).is_ok());
/// assert!(validate_quantity(0).is_err());
/// assert!(validate_quantity(-1).is_err());
/// ```
pub fn validate_quantity(quantity: i64) -> CoreResult<()> {
    if quantity <= 0 {
        return Err(CoreError::InvalidQuantity { quantity });
    }

    if quantity > MAX_LINE_QUANTITY {
        return Err(CoreError::QuantityTooLarge {
            requested: quantity,
            max: MAX_LINE_QUANTITY,
        });
    }

    Ok(())
}

/// Validates all lines of a sale request.
///
/// Runs before allocation so a bad request never locks a batch.
pub fn validate_sale_lines(lines: &[SaleLine]) -> CoreResult<()> {
    if lines.is_empty() {
        return Err(CoreError::EmptySale);
    }

    if lines.len() > MAX_SALE_LINES {
        return Err(ValidationError::OutOfRange {
            field: "items".to_string(),
            min: 1,
            max: MAX_SALE_LINES as i64,
        }
        .into());
    }

    for line in lines {
        if line.product_id.trim().is_empty() {
            return Err(ValidationError::Required {
                field: "product_id".to_string(),
            }
            .into());
        }
        validate_quantity(line.quantity)?;
        if line.unit_price_cents < 0 {
            return Err(ValidationError::MustNotBeNegative {
                field: "unit_price".to_string(),
            }
            .into());
        }
    }

    Ok(())
}

// =============================================================================
// Purchase Validators
// =============================================================================

/// Validates the quantities on a purchase line.
///
/// Billed quantity may be zero only when the whole line is free goods.
pub fn validate_purchase_quantities(qty: i64, free_qty: i64, pack_size: i64) -> ValidationResult<()> {
    if qty < 0 {
        return Err(ValidationError::MustNotBeNegative {
            field: "qty".to_string(),
        });
    }
    if free_qty < 0 {
        return Err(ValidationError::MustNotBeNegative {
            field: "free_qty".to_string(),
        });
    }
    if qty + free_qty == 0 {
        return Err(ValidationError::MustBePositive {
            field: "qty + free_qty".to_string(),
        });
    }
    if pack_size <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "pack_size".to_string(),
        });
    }
    Ok(())
}

/// Validates a batch number.
pub fn validate_batch_number(batch_number: &str) -> ValidationResult<()> {
    let batch_number = batch_number.trim();

    if batch_number.is_empty() {
        return Err(ValidationError::Required {
            field: "batch_number".to_string(),
        });
    }

    if batch_number.len() > 50 {
        return Err(ValidationError::TooLong {
            field: "batch_number".to_string(),
            max: 50,
        });
    }

    Ok(())
}

// =============================================================================
// Free Text / Money Validators
// =============================================================================

/// Validates a reason string (recalls, returns, adjustments).
///
/// ## Example
/// ```rust
/// use rxstock_core::validation::validate_reason;
///
/// assert!(validate_reason("reason", "Manufacturer recall notice 42").is_ok());
/// assert!(validate_reason("reason", "   ").is_err());
/// ```
pub fn validate_reason(field: &str, reason: &str) -> ValidationResult<()> {
    let reason = reason.trim();

    if reason.is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }

    if reason.len() > 500 {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max: 500,
        });
    }

    Ok(())
}

/// Validates a payment amount (must be positive).
pub fn validate_payment_amount(amount_cents: i64) -> ValidationResult<()> {
    if amount_cents <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "amount".to_string(),
        });
    }
    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn line(product_id: &str, quantity: i64, price: i64) -> SaleLine {
        SaleLine {
            product_id: product_id.to_string(),
            quantity,
            unit_price_cents: price,
        }
    }

    #[test]
    fn test_validate_quantity() {
        assert!(validate_quantity(1).is_ok());
        assert!(validate_quantity(MAX_LINE_QUANTITY).is_ok());
        assert!(matches!(
            validate_quantity(0),
            Err(CoreError::InvalidQuantity { quantity: 0 })
        ));
        assert!(matches!(
            validate_quantity(MAX_LINE_QUANTITY + 1),
            Err(CoreError::QuantityTooLarge { .. })
        ));
    }

    #[test]
    fn test_empty_sale_rejected() {
        assert!(matches!(validate_sale_lines(&[]), Err(CoreError::EmptySale)));
    }

    #[test]
    fn test_sale_lines() {
        assert!(validate_sale_lines(&[line("p", 2, 100)]).is_ok());
        assert!(matches!(
            validate_sale_lines(&[line("p", 2, 100), line("q", -3, 100)]),
            Err(CoreError::InvalidQuantity { quantity: -3 })
        ));
        assert!(matches!(
            validate_sale_lines(&[line(" ", 2, 100)]),
            Err(CoreError::Validation(ValidationError::Required { .. }))
        ));
        assert!(matches!(
            validate_sale_lines(&[line("p", 2, -1)]),
            Err(CoreError::Validation(ValidationError::MustNotBeNegative { .. }))
        ));
    }

    #[test]
    fn test_purchase_quantities() {
        assert!(validate_purchase_quantities(10, 2, 1).is_ok());
        assert!(validate_purchase_quantities(0, 2, 1).is_ok());
        assert!(validate_purchase_quantities(0, 0, 1).is_err());
        assert!(validate_purchase_quantities(10, -1, 1).is_err());
        assert!(validate_purchase_quantities(10, 0, 0).is_err());
    }

    #[test]
    fn test_batch_number() {
        assert!(validate_batch_number("BX-2291").is_ok());
        assert!(validate_batch_number("").is_err());
        assert!(validate_batch_number(&"A".repeat(51)).is_err());
    }

    #[test]
    fn test_payment_amount() {
        assert!(validate_payment_amount(1).is_ok());
        assert!(validate_payment_amount(0).is_err());
    }
}
