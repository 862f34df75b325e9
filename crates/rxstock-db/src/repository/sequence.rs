//! # Sequence Generator
//!
//! Gap-free business numbers (bill numbers, order numbers, GRNs) drawn from
//! one counter row per name.
//!
//! ```text
//! UPDATE sequences SET value = value + 1 WHERE name = ? RETURNING value
//!        │
//!        ├── runs inside the caller's BEGIN IMMEDIATE transaction
//!        │   → no two callers can read the same value
//!        │
//!        └── rollback reverts the increment → no number is burnt
//! ```

use sqlx::SqliteConnection;
use tracing::debug;

use crate::error::{DbError, DbResult};

/// Counter for sale bill numbers.
pub const BILL_NO: &str = "bill_no";
/// Counter for sale order numbers.
pub const ORDER_NO: &str = "order_no";
/// Counter for goods receipt numbers.
pub const GRN: &str = "grn";

pub struct SequenceGenerator;

impl SequenceGenerator {
    /// Increments and returns the named counter.
    ///
    /// ## Errors
    /// `NotFound` when no counter row exists for `name`.
    pub async fn next(conn: &mut SqliteConnection, name: &str) -> DbResult<i64> {
        let value: Option<i64> =
            sqlx::query_scalar("UPDATE sequences SET value = value + 1 WHERE name = ?1 RETURNING value")
                .bind(name)
                .fetch_optional(&mut *conn)
                .await?;

        let value = value.ok_or_else(|| DbError::not_found("Sequence", name))?;
        debug!(sequence = %name, value, "Sequence advanced");
        Ok(value)
    }

    /// Reads the last issued value without advancing it.
    pub async fn current(conn: &mut SqliteConnection, name: &str) -> DbResult<i64> {
        let value: Option<i64> = sqlx::query_scalar("SELECT value FROM sequences WHERE name = ?1")
            .bind(name)
            .fetch_optional(&mut *conn)
            .await?;
        value.ok_or_else(|| DbError::not_found("Sequence", name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};

    #[tokio::test]
    async fn test_next_is_monotonic_per_name() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let mut tx = db.begin_serializable().await.unwrap();

        assert_eq!(SequenceGenerator::next(&mut tx, BILL_NO).await.unwrap(), 1);
        assert_eq!(SequenceGenerator::next(&mut tx, BILL_NO).await.unwrap(), 2);
        assert_eq!(SequenceGenerator::next(&mut tx, GRN).await.unwrap(), 1);
        assert_eq!(SequenceGenerator::current(&mut tx, ORDER_NO).await.unwrap(), 0);
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_rollback_reverts_increment() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();

        let mut tx = db.begin_serializable().await.unwrap();
        assert_eq!(SequenceGenerator::next(&mut tx, BILL_NO).await.unwrap(), 1);
        tx.rollback().await.unwrap();

        let mut tx = db.begin_serializable().await.unwrap();
        assert_eq!(SequenceGenerator::next(&mut tx, BILL_NO).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_unknown_sequence_is_not_found() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let mut tx = db.begin_serializable().await.unwrap();
        let err = SequenceGenerator::next(&mut tx, "invoice_no").await.unwrap_err();
        assert!(matches!(err, DbError::NotFound { .. }));
    }
}
