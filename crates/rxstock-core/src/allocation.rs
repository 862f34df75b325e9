//! # FEFO Allocation
//!
//! Pure First-Expiry-First-Out planning and return apportionment.
//!
//! ## Allocation Walk
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  requested = 8                                                          │
//! │                                                                         │
//! │  candidates (expiry ASC, received ASC)                                  │
//! │  ┌──────────────────┐   ┌──────────────────┐                            │
//! │  │ A  exp 2025-01-01│   │ B  exp 2025-06-01│                            │
//! │  │ remaining 5      │   │ remaining 10     │                            │
//! │  └────────┬─────────┘   └────────┬─────────┘                            │
//! │           │ take min(5, 8) = 5   │ take min(10, 3) = 3                   │
//! │           ▼                      ▼                                      │
//! │  [{A, 5}, {B, 3}]  ← satisfied, stop                                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Planning never mutates anything. The engine plans every line of a sale
//! first and only deducts once pricing and expiry checks have passed.

use std::collections::HashMap;

use chrono::NaiveDate;

use crate::error::{CoreError, CoreResult};
use crate::types::{Batch, BatchAllocation};

// =============================================================================
// FEFO Planning
// =============================================================================

/// Plans a FEFO allocation of `requested` units over `candidates`.
///
/// ## Arguments
/// * `product_id` - Product being allocated (for error context)
/// * `candidates` - Batches of that product, in any order
/// * `requested` - Units needed (> 0)
/// * `today` - Batches with `expiry_date <= today` are never selected
/// * `reserved` - Units already planned from a batch by earlier lines of
///   the same sale, keyed by batch id
///
/// ## Returns
/// Allocations in consumption order, summing exactly to `requested`.
///
/// ## Errors
/// * `NoActiveBatches` - no sellable candidate at all
/// * `InsufficientStock` - sellable total is below `requested`; carries
///   the amount that was available
pub fn plan_fefo(
    product_id: &str,
    candidates: &[Batch],
    requested: i64,
    today: NaiveDate,
    reserved: &HashMap<String, i64>,
) -> CoreResult<Vec<BatchAllocation>> {
    if requested <= 0 {
        return Err(CoreError::InvalidQuantity {
            quantity: requested,
        });
    }

    let mut sellable: Vec<&Batch> = candidates
        .iter()
        .filter(|b| b.product_id == product_id && b.is_sellable(today))
        .collect();

    if sellable.is_empty() {
        return Err(CoreError::NoActiveBatches {
            product_id: product_id.to_string(),
        });
    }

    // Older stock first when expiry ties
    sellable.sort_by(|a, b| {
        a.expiry_date
            .cmp(&b.expiry_date)
            .then(a.received_date.cmp(&b.received_date))
            .then(a.created_at.cmp(&b.created_at))
    });

    let mut allocations = Vec::new();
    let mut still_needed = requested;
    let mut available = 0i64;

    for batch in sellable {
        let free = batch.quantity_remaining - reserved.get(&batch.id).copied().unwrap_or(0);
        if free <= 0 {
            continue;
        }
        available += free;

        if still_needed == 0 {
            continue;
        }

        let take = free.min(still_needed);
        allocations.push(BatchAllocation {
            batch_id: batch.id.clone(),
            batch_number: batch.batch_number.clone(),
            expiry_date: batch.expiry_date,
            quantity: take,
        });
        still_needed -= take;
    }

    if still_needed > 0 {
        return Err(CoreError::InsufficientStock {
            product_id: product_id.to_string(),
            requested,
            available,
        });
    }

    Ok(allocations)
}

/// Chooses the error for a product with no sellable candidate.
///
/// `stocked_active` is the number of ACTIVE batches that still hold stock
/// regardless of expiry. If any exist they were filtered out by expiry.
pub fn no_candidates_error(product_id: &str, stocked_active: i64) -> CoreError {
    if stocked_active > 0 {
        CoreError::AllBatchesExpired {
            product_id: product_id.to_string(),
        }
    } else {
        CoreError::NoActiveBatches {
            product_id: product_id.to_string(),
        }
    }
}

/// Adds an allocation list into the per-sale reservation map.
pub fn reserve(reserved: &mut HashMap<String, i64>, allocations: &[BatchAllocation]) {
    for a in allocations {
        *reserved.entry(a.batch_id.clone()).or_insert(0) += a.quantity;
    }
}

// =============================================================================
// Snapshot Encoding
// =============================================================================

/// Serializes an allocation list for storage on a sale line.
pub fn encode_snapshot(allocations: &[BatchAllocation]) -> Result<String, serde_json::Error> {
    serde_json::to_string(allocations)
}

// =============================================================================
// Return Apportionment
// =============================================================================

/// Splits a returned quantity back over the batches of the original sale.
///
/// ## Rounding Policy
/// ```text
/// share(batch) = ceil(returned × allocated(batch) / total_allocated)
///
/// walk batches in snapshot order (earliest expiry first):
///   credit = min(share, still_unassigned)
///
/// anything left unassigned goes to the FIRST batch
/// ```
///
/// The credited total always equals `returned`. Ceiling shares favour the
/// earliest batches, and the leftover rule can credit the first batch above
/// its original share when the snapshot total disagrees with the line.
///
/// Entries with a zero share are dropped.
pub fn apportion_return(allocations: &[BatchAllocation], returned: i64) -> Vec<BatchAllocation> {
    let total: i64 = allocations.iter().map(|a| a.quantity).sum();
    if total <= 0 || returned <= 0 {
        return Vec::new();
    }

    let mut credits: Vec<BatchAllocation> = Vec::with_capacity(allocations.len());
    let mut unassigned = returned;

    for a in allocations {
        let numerator = returned as i128 * a.quantity as i128;
        let share = ((numerator + total as i128 - 1) / total as i128) as i64;
        let credit = share.min(unassigned);
        unassigned -= credit;
        credits.push(BatchAllocation {
            quantity: credit,
            ..a.clone()
        });
    }

    if unassigned > 0 {
        credits[0].quantity += unassigned;
    }

    credits.retain(|c| c.quantity > 0);
    credits
}

/// Apportions a return on a line that may already have earlier returns.
///
/// `credited` holds the units each batch got back from those earlier
/// returns. The ceiling policy is applied to the running total, and this
/// return credits only the difference:
///
/// ```text
/// target  = apportion_return(snapshot, already_returned + returned)
/// credit  = clamp(target − credited, 0, allocated − credited)
/// shortfall → batches with room left, snapshot order
/// ```
///
/// Returning a line in several pieces therefore ends with every batch back
/// at its original allocation, exactly like one full return. A batch is
/// never credited beyond what the sale took from it unless `returned`
/// exceeds the snapshot total, in which case the excess goes to the first
/// batch as in [`apportion_return`].
pub fn apportion_further_return(
    allocations: &[BatchAllocation],
    credited: &HashMap<String, i64>,
    returned: i64,
) -> Vec<BatchAllocation> {
    if allocations.is_empty() || returned <= 0 {
        return Vec::new();
    }

    let credited_of = |a: &BatchAllocation| credited.get(&a.batch_id).copied().unwrap_or(0).max(0);
    let already: i64 = allocations.iter().map(credited_of).sum();

    let cumulative = apportion_return(allocations, already + returned);
    let mut targets: HashMap<&str, i64> = HashMap::new();
    for t in &cumulative {
        *targets.entry(t.batch_id.as_str()).or_insert(0) += t.quantity;
    }
    let target = |a: &BatchAllocation| targets.get(a.batch_id.as_str()).copied().unwrap_or(0);

    let mut credits: Vec<BatchAllocation> = allocations
        .iter()
        .map(|a| BatchAllocation {
            quantity: 0,
            ..a.clone()
        })
        .collect();
    let mut unassigned = returned;

    for (credit, a) in credits.iter_mut().zip(allocations) {
        let room = (a.quantity - credited_of(a)).max(0);
        let share = (target(a) - credited_of(a)).clamp(0, room).min(unassigned);
        credit.quantity = share;
        unassigned -= share;
    }

    for (credit, a) in credits.iter_mut().zip(allocations) {
        if unassigned == 0 {
            break;
        }
        let room = (a.quantity - credited_of(a) - credit.quantity).max(0);
        let extra = room.min(unassigned);
        credit.quantity += extra;
        unassigned -= extra;
    }

    if unassigned > 0 {
        credits[0].quantity += unassigned;
    }

    credits.retain(|c| c.quantity > 0);
    credits
}

// =============================================================================
// Unit Tests
// =============================================================================
