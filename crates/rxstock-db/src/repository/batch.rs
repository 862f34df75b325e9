//! # Batch Ledger
//!
//! The only writer of `batches.quantity_remaining` and `batches.status`.
//! Every quantity change is paired with an append-only movement row in the
//! same transaction.
//!
//! ## Ledger Operations
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Batch Ledger                                    │
//! │                                                                         │
//! │  create + RECEIVED ──► batch { received = remaining = N, ACTIVE }      │
//! │                                                                         │
//! │  deduct(q)   remaining -= q     SOLD / ADJUSTED / EXPIRED movement     │
//! │              remaining == 0  →  DEPLETED                               │
//! │                                                                         │
//! │  credit(q)   remaining += q     RETURNED / RECEIVED movement           │
//! │              DEPLETED and > 0 → ACTIVE                                 │
//! │              never above quantity_received                             │
//! │                                                                         │
//! │  recall      status = RECALLED  RECALLED movement (remaining units)    │
//! │  expire      status = EXPIRED   EXPIRED movement, remaining = 0        │
//! │                                                                         │
//! │  Balance: received − remaining ==                                      │
//! │           Σ out − Σ RETURNED − Σ RECEIVED after the initial one        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! All functions run on the caller's connection. Workflows pass `&mut tx`
//! from [`Database::begin_serializable`](crate::Database::begin_serializable),
//! so the rows they read stay locked until commit.

use chrono::{Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqliteConnection};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use rxstock_core::validation::{validate_batch_number, validate_reason};
use rxstock_core::{
    Batch, BatchMovement, BatchStatus, CoreError, MovementType, ReferenceType, ValidationError,
};

const BATCH_COLUMNS: &str = "id, product_id, batch_number, expiry_date, mfr_date, \
     quantity_received, quantity_remaining, unit_cost_cents, mrp_cents, status, \
     vendor_id, purchase_item_id, received_date, created_at, updated_at";

const MOVEMENT_COLUMNS: &str = "id, batch_id, movement_type, quantity, reference_type, \
     reference_id, performed_by, performed_at, notes";

// =============================================================================
// Inputs and Reports
// =============================================================================

/// Fields needed to open a new batch.
#[derive(Debug, Clone)]
pub struct NewBatch {
    pub product_id: String,
    pub batch_number: String,
    pub expiry_date: NaiveDate,
    pub mfr_date: Option<NaiveDate>,
    pub quantity: i64,
    pub unit_cost_cents: i64,
    pub mrp_cents: i64,
    pub vendor_id: Option<String>,
    pub purchase_item_id: Option<String>,
    pub received_date: NaiveDate,
}

/// Who and what caused a movement.
#[derive(Debug, Clone)]
pub struct MovementSource {
    pub reference_type: ReferenceType,
    pub reference_id: String,
    pub performed_by: String,
    pub notes: Option<String>,
}

impl MovementSource {
    pub fn new(
        reference_type: ReferenceType,
        reference_id: impl Into<String>,
        performed_by: impl Into<String>,
    ) -> Self {
        MovementSource {
            reference_type,
            reference_id: reference_id.into(),
            performed_by: performed_by.into(),
            notes: None,
        }
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}

/// Result of replaying a batch's movements against its stored quantities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerReconciliation {
    pub batch_id: String,
    pub quantity_received: i64,
    pub quantity_remaining: i64,
    /// Quantity of the first RECEIVED movement.
    pub initial_received: i64,
    /// SOLD + ADJUSTED + EXPIRED.
    pub outbound: i64,
    pub returned: i64,
    /// RECEIVED movements after the initial one.
    pub received_after: i64,
    pub expected_remaining: i64,
    pub balanced: bool,
}

/// One row of the near-expiry report.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct NearExpiryBatch {
    pub batch_id: String,
    pub product_id: String,
    pub product_name: String,
    pub category: Option<String>,
    pub batch_number: String,
    pub expiry_date: NaiveDate,
    pub quantity_remaining: i64,
    pub unit_cost_cents: i64,
    pub vendor_id: Option<String>,
    /// Filled in by the query caller.
    #[sqlx(default)]
    pub value_at_risk_cents: i64,
    #[sqlx(default)]
    pub days_to_expiry: i64,
}

// =============================================================================
// Batch Ledger
// =============================================================================

/// Ledger operations on batches and their movement log.
pub struct BatchLedger;

impl BatchLedger {
    /// Reads and locks the sellable batches of a product in FEFO order.
    ///
    /// Sellable: ACTIVE, `expiry_date > today`, `quantity_remaining > 0`.
    /// Ordered by expiry, then received date, then creation time.
    pub async fn lock_and_fetch_available(
        conn: &mut SqliteConnection,
        product_id: &str,
        today: NaiveDate,
    ) -> DbResult<Vec<Batch>> {
        let sql = format!(
            "SELECT {BATCH_COLUMNS} FROM batches \
             WHERE product_id = ?1 AND status = 'ACTIVE' \
               AND expiry_date > ?2 AND quantity_remaining > 0 \
             ORDER BY expiry_date ASC, received_date ASC, created_at ASC"
        );
        let batches = sqlx::query_as::<_, Batch>(&sql)
            .bind(product_id)
            .bind(today)
            .fetch_all(&mut *conn)
            .await?;

        debug!(product_id = %product_id, count = batches.len(), "Fetched sellable batches");
        Ok(batches)
    }

    /// Counts ACTIVE batches holding stock, ignoring expiry.
    ///
    /// Tells "everything expired" apart from "nothing in stock".
    pub async fn count_active_with_stock(conn: &mut SqliteConnection, product_id: &str) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM batches WHERE product_id = ?1 AND status = 'ACTIVE' AND quantity_remaining > 0",
        )
        .bind(product_id)
        .fetch_one(&mut *conn)
        .await?;
        Ok(count)
    }

    pub async fn find(conn: &mut SqliteConnection, batch_id: &str) -> DbResult<Option<Batch>> {
        let sql = format!("SELECT {BATCH_COLUMNS} FROM batches WHERE id = ?1");
        let batch = sqlx::query_as::<_, Batch>(&sql)
            .bind(batch_id)
            .fetch_optional(&mut *conn)
            .await?;
        Ok(batch)
    }

    pub async fn get(conn: &mut SqliteConnection, batch_id: &str) -> DbResult<Batch> {
        Self::find(conn, batch_id)
            .await?
            .ok_or_else(|| DbError::not_found("Batch", batch_id))
    }

    /// Batches opened for a purchase item.
    pub async fn for_purchase_item(conn: &mut SqliteConnection, purchase_item_id: &str) -> DbResult<Vec<Batch>> {
        let sql = format!("SELECT {BATCH_COLUMNS} FROM batches WHERE purchase_item_id = ?1");
        let batches = sqlx::query_as::<_, Batch>(&sql)
            .bind(purchase_item_id)
            .fetch_all(&mut *conn)
            .await?;
        Ok(batches)
    }

    /// Inserts a new ACTIVE batch with `remaining = received`.
    ///
    /// Writes no movement; pair it with [`record_movement`](Self::record_movement)
    /// or use [`receive`](Self::receive).
    pub async fn create(conn: &mut SqliteConnection, new: NewBatch) -> DbResult<Batch> {
        validate_batch_number(&new.batch_number).map_err(CoreError::from)?;
        validate_quantity_nonzero(new.quantity)?;
        for (field, cents) in [("unit_cost", new.unit_cost_cents), ("mrp", new.mrp_cents)] {
            if cents < 0 {
                return Err(CoreError::from(ValidationError::MustNotBeNegative {
                    field: field.to_string(),
                })
                .into());
            }
        }

        let now = Utc::now();
        let batch = Batch {
            id: Uuid::new_v4().to_string(),
            product_id: new.product_id,
            batch_number: new.batch_number.trim().to_string(),
            expiry_date: new.expiry_date,
            mfr_date: new.mfr_date,
            quantity_received: new.quantity,
            quantity_remaining: new.quantity,
            unit_cost_cents: new.unit_cost_cents,
            mrp_cents: new.mrp_cents,
            status: BatchStatus::Active,
            vendor_id: new.vendor_id,
            purchase_item_id: new.purchase_item_id,
            received_date: new.received_date,
            created_at: now,
            updated_at: now,
        };

        sqlx::query(
            r#"
            INSERT INTO batches (
                id, product_id, batch_number, expiry_date, mfr_date,
                quantity_received, quantity_remaining, unit_cost_cents, mrp_cents, status,
                vendor_id, purchase_item_id, received_date, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
            "#,
        )
        .bind(&batch.id)
        .bind(&batch.product_id)
        .bind(&batch.batch_number)
        .bind(batch.expiry_date)
        .bind(batch.mfr_date)
        .bind(batch.quantity_received)
        .bind(batch.quantity_remaining)
        .bind(batch.unit_cost_cents)
        .bind(batch.mrp_cents)
        .bind(batch.status)
        .bind(&batch.vendor_id)
        .bind(&batch.purchase_item_id)
        .bind(batch.received_date)
        .bind(batch.created_at)
        .bind(batch.updated_at)
        .execute(&mut *conn)
        .await?;

        debug!(
            batch_id = %batch.id,
            batch_number = %batch.batch_number,
            quantity = batch.quantity_received,
            "Batch created"
        );
        Ok(batch)
    }

    /// Creates a batch together with its initial RECEIVED movement.
    pub async fn receive(
        conn: &mut SqliteConnection,
        new: NewBatch,
        source: &MovementSource,
    ) -> DbResult<(Batch, BatchMovement)> {
        let batch = Self::create(conn, new).await?;
        let movement = Self::record_movement(
            conn,
            &batch.id,
            MovementType::Received,
            batch.quantity_received,
            source,
        )
        .await?;
        Ok((batch, movement))
    }

    /// Appends a movement. The log is never updated or deleted.
    pub async fn record_movement(
        conn: &mut SqliteConnection,
        batch_id: &str,
        movement_type: MovementType,
        quantity: i64,
        source: &MovementSource,
    ) -> DbResult<BatchMovement> {
        validate_quantity_nonzero(quantity)?;

        let movement = BatchMovement {
            id: Uuid::new_v4().to_string(),
            batch_id: batch_id.to_string(),
            movement_type,
            quantity,
            reference_type: source.reference_type,
            reference_id: source.reference_id.clone(),
            performed_by: source.performed_by.clone(),
            performed_at: Utc::now(),
            notes: source.notes.clone(),
        };

        sqlx::query(
            r#"
            INSERT INTO batch_movements (
                id, batch_id, movement_type, quantity, reference_type,
                reference_id, performed_by, performed_at, notes
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(&movement.id)
        .bind(&movement.batch_id)
        .bind(movement.movement_type)
        .bind(movement.quantity)
        .bind(movement.reference_type)
        .bind(&movement.reference_id)
        .bind(&movement.performed_by)
        .bind(movement.performed_at)
        .bind(&movement.notes)
        .execute(&mut *conn)
        .await?;

        debug!(
            batch_id = %batch_id,
            movement = movement_type.as_str(),
            quantity,
            reference_id = %movement.reference_id,
            "Movement recorded"
        );
        Ok(movement)
    }

    /// Takes units out of a batch.
    ///
    /// ## Errors
    /// * `InvalidQuantity` - `quantity <= 0`
    /// * `InvalidBatchStatus` - selling from a batch that is not ACTIVE
    /// * `InsufficientBatchQuantity` - `quantity > remaining`
    pub async fn deduct(
        conn: &mut SqliteConnection,
        batch_id: &str,
        quantity: i64,
        movement_type: MovementType,
        source: &MovementSource,
    ) -> DbResult<Batch> {
        if quantity <= 0 {
            return Err(CoreError::InvalidQuantity { quantity }.into());
        }
        if !movement_type.is_outbound() {
            return Err(DbError::Internal(format!(
                "{} is not an outbound movement",
                movement_type.as_str()
            )));
        }

        let mut batch = Self::get(conn, batch_id).await?;

        if movement_type == MovementType::Sold && batch.status != BatchStatus::Active {
            return Err(CoreError::InvalidBatchStatus {
                batch_id: batch_id.to_string(),
                status: batch.status.to_string(),
                operation: "sell".to_string(),
            }
            .into());
        }

        if quantity > batch.quantity_remaining {
            return Err(CoreError::InsufficientBatchQuantity {
                batch_id: batch_id.to_string(),
                requested: quantity,
                remaining: batch.quantity_remaining,
            }
            .into());
        }

        let remaining = batch.quantity_remaining - quantity;
        let status = if remaining == 0 && batch.status == BatchStatus::Active {
            BatchStatus::Depleted
        } else {
            batch.status
        };

        Self::write_quantity(conn, &batch, remaining, status).await?;
        Self::record_movement(conn, batch_id, movement_type, quantity, source).await?;

        if status == BatchStatus::Depleted && batch.status != BatchStatus::Depleted {
            info!(batch_id = %batch_id, batch_number = %batch.batch_number, "Batch depleted");
        }

        batch.quantity_remaining = remaining;
        batch.status = status;
        Ok(batch)
    }

    /// Puts units back into a batch.
    ///
    /// ## Errors
    /// * `InvalidQuantity` - `quantity <= 0`
    /// * `LedgerOverflow` - remaining would exceed quantity received
    pub async fn credit(
        conn: &mut SqliteConnection,
        batch_id: &str,
        quantity: i64,
        movement_type: MovementType,
        source: &MovementSource,
    ) -> DbResult<Batch> {
        if quantity <= 0 {
            return Err(CoreError::InvalidQuantity { quantity }.into());
        }
        if !movement_type.is_inbound() {
            return Err(DbError::Internal(format!(
                "{} is not an inbound movement",
                movement_type.as_str()
            )));
        }

        let mut batch = Self::get(conn, batch_id).await?;

        let remaining = batch.quantity_remaining + quantity;
        if remaining > batch.quantity_received {
            return Err(CoreError::LedgerOverflow {
                batch_id: batch_id.to_string(),
                received: batch.quantity_received,
                attempted: remaining,
            }
            .into());
        }

        let status = match batch.status {
            BatchStatus::Depleted => BatchStatus::Active,
            other => other,
        };

        Self::write_quantity(conn, &batch, remaining, status).await?;
        Self::record_movement(conn, batch_id, movement_type, quantity, source).await?;

        batch.quantity_remaining = remaining;
        batch.status = status;
        Ok(batch)
    }

    /// Marks a batch RECALLED and logs the units on hand at that moment.
    ///
    /// Remaining stock is left in place for return to the vendor; a
    /// RECALLED batch is never allocated again.
    pub async fn recall(
        conn: &mut SqliteConnection,
        batch_id: &str,
        reason: &str,
        performed_by: &str,
    ) -> DbResult<BatchMovement> {
        validate_reason("reason", reason).map_err(CoreError::from)?;

        let batch = Self::get(conn, batch_id).await?;

        match batch.status {
            BatchStatus::Recalled => {
                return Err(CoreError::AlreadyRecalled {
                    batch_id: batch_id.to_string(),
                }
                .into())
            }
            BatchStatus::Depleted | BatchStatus::Expired => {
                return Err(CoreError::InvalidBatchStatus {
                    batch_id: batch_id.to_string(),
                    status: batch.status.to_string(),
                    operation: "recall".to_string(),
                }
                .into())
            }
            BatchStatus::Active => {}
        }

        if batch.quantity_remaining <= 0 {
            return Err(CoreError::InvalidBatchStatus {
                batch_id: batch_id.to_string(),
                status: "EMPTY".to_string(),
                operation: "recall".to_string(),
            }
            .into());
        }

        Self::write_quantity(conn, &batch, batch.quantity_remaining, BatchStatus::Recalled).await?;

        let source = MovementSource::new(ReferenceType::Recall, batch_id, performed_by)
            .with_notes(format!("Batch recalled: {}", reason.trim()));
        let movement = Self::record_movement(
            conn,
            batch_id,
            MovementType::Recalled,
            batch.quantity_remaining,
            &source,
        )
        .await?;

        warn!(
            batch_id = %batch_id,
            batch_number = %batch.batch_number,
            quantity = batch.quantity_remaining,
            reason = %reason.trim(),
            "Batch recalled"
        );
        Ok(movement)
    }

    /// Writes off an expired batch: status EXPIRED and an EXPIRED movement
    /// for whatever was still on hand.
    ///
    /// Returns `None` when the batch held no stock.
    pub async fn expire(
        conn: &mut SqliteConnection,
        batch_id: &str,
        today: NaiveDate,
        source: &MovementSource,
    ) -> DbResult<Option<BatchMovement>> {
        let batch = Self::get(conn, batch_id).await?;

        if !batch.is_expired(today) || matches!(batch.status, BatchStatus::Expired | BatchStatus::Recalled) {
            return Err(CoreError::InvalidBatchStatus {
                batch_id: batch_id.to_string(),
                status: batch.effective_status(today).to_string(),
                operation: "write off".to_string(),
            }
            .into());
        }

        Self::write_quantity(conn, &batch, 0, BatchStatus::Expired).await?;

        if batch.quantity_remaining == 0 {
            debug!(batch_id = %batch_id, "Empty batch marked expired");
            return Ok(None);
        }

        let movement = Self::record_movement(
            conn,
            batch_id,
            MovementType::Expired,
            batch.quantity_remaining,
            source,
        )
        .await?;

        info!(
            batch_id = %batch_id,
            batch_number = %batch.batch_number,
            quantity = batch.quantity_remaining,
            "Expired stock written off"
        );
        Ok(Some(movement))
    }

    /// Whether stock was already received for a purchase item.
    pub async fn has_received_movement(conn: &mut SqliteConnection, purchase_item_id: &str) -> DbResult<bool> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM batch_movements
                WHERE reference_type = 'PURCHASE_ITEM'
                  AND reference_id = ?1
                  AND movement_type = 'RECEIVED'
            )
            "#,
        )
        .bind(purchase_item_id)
        .fetch_one(&mut *conn)
        .await?;
        Ok(exists)
    }

    /// Movement history of a batch, oldest first.
    pub async fn movements(conn: &mut SqliteConnection, batch_id: &str) -> DbResult<Vec<BatchMovement>> {
        let sql = format!(
            "SELECT {MOVEMENT_COLUMNS} FROM batch_movements WHERE batch_id = ?1 \
             ORDER BY performed_at ASC, rowid ASC"
        );
        let movements = sqlx::query_as::<_, BatchMovement>(&sql)
            .bind(batch_id)
            .fetch_all(&mut *conn)
            .await?;
        Ok(movements)
    }

    /// Movements caused by one business reference (a sale, a return line...).
    pub async fn movements_for_reference(
        conn: &mut SqliteConnection,
        reference_type: ReferenceType,
        reference_id: &str,
    ) -> DbResult<Vec<BatchMovement>> {
        let sql = format!(
            "SELECT {MOVEMENT_COLUMNS} FROM batch_movements \
             WHERE reference_type = ?1 AND reference_id = ?2 ORDER BY rowid ASC"
        );
        let movements = sqlx::query_as::<_, BatchMovement>(&sql)
            .bind(reference_type)
            .bind(reference_id)
            .fetch_all(&mut *conn)
            .await?;
        Ok(movements)
    }

    /// Replays the movement log of a batch against its stored quantities.
    pub async fn reconcile(conn: &mut SqliteConnection, batch_id: &str) -> DbResult<LedgerReconciliation> {
        let batch = Self::get(conn, batch_id).await?;
        let movements = Self::movements(conn, batch_id).await?;
        Ok(replay(&batch, &movements))
    }

    /// ACTIVE batches with stock expiring after `today` and within `days`.
    ///
    /// The window is `(today, today + days]`, not `[today, today + days]`: a
    /// batch on its expiry date already counts as expired, so it belongs to
    /// write-off rather than this report.
    ///
    /// Soonest expiry first, larger quantities first on ties.
    pub async fn near_expiry(
        conn: &mut SqliteConnection,
        today: NaiveDate,
        days: i64,
    ) -> DbResult<Vec<NearExpiryBatch>> {
        let horizon = today + Duration::days(days);
        let mut rows = sqlx::query_as::<_, NearExpiryBatch>(
            r#"
            SELECT
                b.id AS batch_id,
                b.product_id,
                p.name AS product_name,
                p.category,
                b.batch_number,
                b.expiry_date,
                b.quantity_remaining,
                b.unit_cost_cents,
                b.vendor_id
            FROM batches b
            INNER JOIN products p ON p.id = b.product_id
            WHERE b.status = 'ACTIVE'
              AND b.quantity_remaining > 0
              AND b.expiry_date > ?1
              AND b.expiry_date <= ?2
            ORDER BY b.expiry_date ASC, b.quantity_remaining DESC
            "#,
        )
        .bind(today)
        .bind(horizon)
        .fetch_all(&mut *conn)
        .await?;

        for row in &mut rows {
            row.value_at_risk_cents = row.quantity_remaining * row.unit_cost_cents;
            row.days_to_expiry = (row.expiry_date - today).num_days();
        }

        debug!(count = rows.len(), days, "Near-expiry batches listed");
        Ok(rows)
    }

    /// Writes quantity and status, guarded by the remaining value read earlier.
    async fn write_quantity(
        conn: &mut SqliteConnection,
        batch: &Batch,
        remaining: i64,
        status: BatchStatus,
    ) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE batches
            SET quantity_remaining = ?1, status = ?2, updated_at = ?3
            WHERE id = ?4 AND quantity_remaining = ?5
            "#,
        )
        .bind(remaining)
        .bind(status)
        .bind(Utc::now())
        .bind(&batch.id)
        .bind(batch.quantity_remaining)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() != 1 {
            return Err(DbError::Conflict(format!(
                "batch {} changed while being updated",
                batch.id
            )));
        }
        Ok(())
    }
}

fn validate_quantity_nonzero(quantity: i64) -> DbResult<()> {
    if quantity <= 0 {
        return Err(CoreError::InvalidQuantity { quantity }.into());
    }
    Ok(())
}

/// Folds a movement history into a balance check.
fn replay(batch: &Batch, movements: &[BatchMovement]) -> LedgerReconciliation {
    let mut initial_received = None;
    let mut outbound = 0;
    let mut returned = 0;
    let mut received_after = 0;

    for m in movements {
        match m.movement_type {
            MovementType::Received if initial_received.is_none() => initial_received = Some(m.quantity),
            MovementType::Received => received_after += m.quantity,
            MovementType::Returned => returned += m.quantity,
            t if t.is_outbound() => outbound += m.quantity,
            _ => {}
        }
    }

    let initial_received = initial_received.unwrap_or(0);
    let expected_remaining = initial_received - outbound + returned + received_after;

    LedgerReconciliation {
        batch_id: batch.id.clone(),
        quantity_received: batch.quantity_received,
        quantity_remaining: batch.quantity_remaining,
        initial_received,
        outbound,
        returned,
        received_after,
        expected_remaining,
        balanced: initial_received == batch.quantity_received
            && expected_remaining == batch.quantity_remaining,
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
