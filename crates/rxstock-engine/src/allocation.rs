//! # Batch Allocation
//!
//! FEFO allocation against the live ledger, inside the caller's transaction.
//!
//! ```text
//! lock_and_fetch_available()      candidates: ACTIVE, unexpired, stocked
//!        │
//!        ├── none?  count_active_with_stock() > 0 → AllBatchesExpired
//!        │                                   = 0 → NoActiveBatches
//!        ▼
//! plan_fefo(candidates, requested, reserved)   (pure, rxstock-core)
//! ```
//!
//! Allocation only reads. The units are taken later by `BatchLedger::deduct`
//! in the same transaction.

use std::collections::HashMap;

use chrono::NaiveDate;
use sqlx::SqliteConnection;
use tracing::debug;

use rxstock_core::allocation::{no_candidates_error, plan_fefo};
use rxstock_core::{Batch, BatchAllocation, CoreError};
use rxstock_db::BatchLedger;

use crate::error::CommerceResult;

/// Allocations for one line together with the batches they were planned from.
#[derive(Debug, Clone)]
pub struct LineAllocation {
    pub allocations: Vec<BatchAllocation>,
    pub candidates: Vec<Batch>,
}

impl LineAllocation {
    /// The batch the first allocation draws from. Its PTR and MRP price the line.
    pub fn first_batch(&self) -> Option<&Batch> {
        let first = self.allocations.first()?;
        self.candidates.iter().find(|b| b.id == first.batch_id)
    }

    pub fn quantity(&self) -> i64 {
        self.allocations.iter().map(|a| a.quantity).sum()
    }
}

/// Plans `requested` units of a product in FEFO order.
///
/// `reserved` holds units already planned by earlier lines of the same sale.
pub async fn allocate(
    conn: &mut SqliteConnection,
    product_id: &str,
    requested: i64,
    today: NaiveDate,
    reserved: &HashMap<String, i64>,
) -> CommerceResult<Vec<BatchAllocation>> {
    Ok(allocate_line(conn, product_id, requested, today, reserved)
        .await?
        .allocations)
}

/// Like [`allocate`], also returning the candidate batches.
pub async fn allocate_line(
    conn: &mut SqliteConnection,
    product_id: &str,
    requested: i64,
    today: NaiveDate,
    reserved: &HashMap<String, i64>,
) -> CommerceResult<LineAllocation> {
    let candidates = BatchLedger::lock_and_fetch_available(conn, product_id, today).await?;

    if candidates.is_empty() {
        let stocked = BatchLedger::count_active_with_stock(conn, product_id).await?;
        return Err(no_candidates_error(product_id, stocked).into());
    }

    let allocations = plan_fefo(product_id, &candidates, requested, today, reserved)?;

    debug!(
        product_id = %product_id,
        requested,
        batches = allocations.len(),
        "Allocated FEFO"
    );

    Ok(LineAllocation {
        allocations,
        candidates,
    })
}

/// Rejects any allocation whose batch has expired by `today`.
///
/// Run with a freshly read date right before persisting, so a sale that
/// straddles midnight never sells a batch expiring that day.
pub fn ensure_unexpired<'a>(
    allocations: impl IntoIterator<Item = &'a BatchAllocation>,
    today: NaiveDate,
) -> Result<(), CoreError> {
    for a in allocations {
        if a.expiry_date <= today {
            return Err(CoreError::ExpiredBatchInAllocation {
                batch_number: a.batch_number.clone(),
                expiry_date: a.expiry_date,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CommerceError;
    use crate::testing::{self, days_from_today, today};
    use rxstock_core::allocation::reserve;
    use rxstock_core::BatchStatus;

    #[tokio::test]
    async fn test_fefo_takes_earliest_expiry_first() {
        let db = testing::memory_db().await;
        let product = testing::product(&db, "Paracetamol 500mg").await;
        let late = testing::stock(&db, &product.id, "LATE", days_from_today(300), 10).await;
        let early = testing::stock(&db, &product.id, "EARLY", days_from_today(30), 5).await;

        let mut tx = db.begin_serializable().await.unwrap();
        let allocations = allocate(&mut tx, &product.id, 8, today(), &HashMap::new())
            .await
            .unwrap();

        assert_eq!(allocations.len(), 2);
        assert_eq!(allocations[0].batch_id, early.id);
        assert_eq!(allocations[0].quantity, 5);
        assert_eq!(allocations[1].batch_id, late.id);
        assert_eq!(allocations[1].quantity, 3);
        assert!(allocations
            .windows(2)
            .all(|w| w[0].expiry_date <= w[1].expiry_date));
        assert!(allocations.iter().all(|a| a.expiry_date > today()));

        // Allocation never writes
        let untouched = BatchLedger::get(&mut tx, &early.id).await.unwrap();
        assert_eq!(untouched.quantity_remaining, 5);
    }

    #[tokio::test]
    async fn test_expired_stock_is_reported_as_expired() {
        let db = testing::memory_db().await;
        let product = testing::product(&db, "Cough Syrup").await;
        testing::stock(&db, &product.id, "OLD", days_from_today(10), 4).await;

        let mut tx = db.begin_serializable().await.unwrap();
        // Ten days later the only stocked batch has expired
        let later = days_from_today(10);
        let err = allocate(&mut tx, &product.id, 1, later, &HashMap::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CommerceError::Core(CoreError::AllBatchesExpired { .. })
        ));
    }

    #[tokio::test]
    async fn test_no_stock_and_insufficient_stock() {
        let db = testing::memory_db().await;
        let product = testing::product(&db, "ORS Sachet").await;

        let mut tx = db.begin_serializable().await.unwrap();
        let err = allocate(&mut tx, &product.id, 1, today(), &HashMap::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CommerceError::Core(CoreError::NoActiveBatches { .. })
        ));
        drop(tx);

        testing::stock(&db, &product.id, "A", days_from_today(60), 3).await;
        let mut tx = db.begin_serializable().await.unwrap();
        let err = allocate(&mut tx, &product.id, 5, today(), &HashMap::new())
            .await
            .unwrap_err();
        match err {
            CommerceError::Core(CoreError::InsufficientStock {
                requested,
                available,
                ..
            }) => {
                assert_eq!(requested, 5);
                assert_eq!(available, 3);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_reserved_units_are_not_planned_twice() {
        let db = testing::memory_db().await;
        let product = testing::product(&db, "Cetirizine 10mg").await;
        let a = testing::stock(&db, &product.id, "A", days_from_today(40), 5).await;
        let b = testing::stock(&db, &product.id, "B", days_from_today(80), 10).await;

        let mut tx = db.begin_serializable().await.unwrap();
        let mut reserved = HashMap::new();

        let first = allocate_line(&mut tx, &product.id, 4, today(), &reserved)
            .await
            .unwrap();
        assert_eq!(first.first_batch().map(|b| b.id.as_str()), Some(a.id.as_str()));
        reserve(&mut reserved, &first.allocations);

        let second = allocate(&mut tx, &product.id, 4, today(), &reserved)
            .await
            .unwrap();
        assert_eq!(second[0].batch_id, a.id);
        assert_eq!(second[0].quantity, 1);
        assert_eq!(second[1].batch_id, b.id);
        assert_eq!(second[1].quantity, 3);
    }

    #[tokio::test]
    async fn test_recalled_batches_are_skipped() {
        let db = testing::memory_db().await;
        let product = testing::product(&db, "Amoxicillin 500mg").await;
        let recalled = testing::stock(&db, &product.id, "BAD", days_from_today(20), 6).await;
        let good = testing::stock(&db, &product.id, "GOOD", days_from_today(200), 6).await;

        let mut tx = db.begin_serializable().await.unwrap();
        BatchLedger::recall(&mut tx, &recalled.id, "Contamination notice", "qa")
            .await
            .unwrap();

        let allocations = allocate(&mut tx, &product.id, 2, today(), &HashMap::new())
            .await
            .unwrap();
        assert_eq!(allocations.len(), 1);
        assert_eq!(allocations[0].batch_id, good.id);

        let batch = BatchLedger::get(&mut tx, &recalled.id).await.unwrap();
        assert_eq!(batch.status, BatchStatus::Recalled);
    }

    #[test]
    fn test_ensure_unexpired() {
        let allocation = BatchAllocation {
            batch_id: "b-1".into(),
            batch_number: "LOT-9".into(),
            expiry_date: today(),
            quantity: 1,
        };
        let err = ensure_unexpired([&allocation], today()).unwrap_err();
        assert!(matches!(err, CoreError::ExpiredBatchInAllocation { .. }));

        let tomorrow = BatchAllocation {
            expiry_date: days_from_today(1),
            ..allocation
        };
        assert!(ensure_unexpired([&tomorrow], today()).is_ok());
    }
}
