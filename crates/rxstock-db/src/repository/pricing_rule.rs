//! # Pricing Rule Repository
//!
//! Stores pricing rules and loads the [`RuleBook`] the sale workflow
//! prices against.

use chrono::{NaiveDate, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use rxstock_core::pricing::{CalculationMethod, PricingRule, RuleBook, RuleScope, RuleStatus};
use rxstock_core::validation::validate_reason;
use rxstock_core::{CoreError, ValidationError};

const RULE_COLUMNS: &str = "id, code, name, applies_to, product_id, category, method, \
     margin_bps, discount_bps, fixed_price_cents, min_quantity, max_quantity, \
     valid_from, valid_to, priority, status, created_at";

/// Fields needed to define a pricing rule.
#[derive(Debug, Clone)]
pub struct NewPricingRule {
    pub code: String,
    pub name: String,
    pub applies_to: RuleScope,
    pub product_id: Option<String>,
    pub category: Option<String>,
    pub method: CalculationMethod,
    pub margin_bps: Option<u32>,
    pub discount_bps: Option<u32>,
    pub fixed_price_cents: Option<i64>,
    pub min_quantity: Option<i64>,
    pub max_quantity: Option<i64>,
    pub valid_from: NaiveDate,
    pub valid_to: Option<NaiveDate>,
    pub priority: i64,
    pub status: RuleStatus,
}

impl NewPricingRule {
    fn validate(&self) -> Result<(), ValidationError> {
        validate_reason("code", &self.code)?;
        validate_reason("name", &self.name)?;

        match self.applies_to {
            RuleScope::Product if self.product_id.is_none() => {
                return Err(ValidationError::Required {
                    field: "product_id".into(),
                })
            }
            RuleScope::Category if self.category.is_none() => {
                return Err(ValidationError::Required {
                    field: "category".into(),
                })
            }
            _ => {}
        }

        let needs = match self.method {
            CalculationMethod::MarginOnPtr => ("margin_bps", self.margin_bps.is_some()),
            CalculationMethod::DiscountFromMrp | CalculationMethod::Clearance => {
                ("discount_bps", self.discount_bps.is_some())
            }
            CalculationMethod::FixedPrice | CalculationMethod::Promotional => {
                ("fixed_price_cents", self.fixed_price_cents.is_some())
            }
        };
        if !needs.1 {
            return Err(ValidationError::Required {
                field: needs.0.into(),
            });
        }

        if self.discount_bps.is_some_and(|d| d > 10_000) {
            return Err(ValidationError::OutOfRange {
                field: "discount_bps".into(),
                min: 0,
                max: 10_000,
            });
        }

        if self.valid_to.is_some_and(|to| to < self.valid_from) {
            return Err(ValidationError::InvalidFormat {
                field: "valid_to".into(),
                reason: "ends before valid_from".into(),
            });
        }

        if let (Some(min), Some(max)) = (self.min_quantity, self.max_quantity) {
            if min > max {
                return Err(ValidationError::InvalidFormat {
                    field: "max_quantity".into(),
                    reason: "below min_quantity".into(),
                });
            }
        }

        Ok(())
    }
}

/// Repository for pricing rules.
#[derive(Debug, Clone)]
pub struct PricingRuleRepository {
    pool: SqlitePool,
}

impl PricingRuleRepository {
    pub fn new(pool: SqlitePool) -> Self {
        PricingRuleRepository { pool }
    }

    /// Validates and stores a rule.
    pub async fn insert(&self, new: NewPricingRule) -> DbResult<PricingRule> {
        new.validate().map_err(CoreError::from)?;

        let rule = PricingRule {
            id: Uuid::new_v4().to_string(),
            code: new.code,
            name: new.name,
            applies_to: new.applies_to,
            product_id: new.product_id,
            category: new.category,
            method: new.method,
            margin_bps: new.margin_bps,
            discount_bps: new.discount_bps,
            fixed_price_cents: new.fixed_price_cents,
            min_quantity: new.min_quantity,
            max_quantity: new.max_quantity,
            valid_from: new.valid_from,
            valid_to: new.valid_to,
            priority: new.priority,
            status: new.status,
            created_at: Utc::now(),
        };

        sqlx::query(
            r#"
            INSERT INTO pricing_rules (
                id, code, name, applies_to, product_id, category, method,
                margin_bps, discount_bps, fixed_price_cents, min_quantity, max_quantity,
                valid_from, valid_to, priority, status, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)
            "#,
        )
        .bind(&rule.id)
        .bind(&rule.code)
        .bind(&rule.name)
        .bind(rule.applies_to)
        .bind(&rule.product_id)
        .bind(&rule.category)
        .bind(rule.method)
        .bind(rule.margin_bps)
        .bind(rule.discount_bps)
        .bind(rule.fixed_price_cents)
        .bind(rule.min_quantity)
        .bind(rule.max_quantity)
        .bind(rule.valid_from)
        .bind(rule.valid_to)
        .bind(rule.priority)
        .bind(rule.status)
        .bind(rule.created_at)
        .execute(&self.pool)
        .await?;

        debug!(code = %rule.code, method = ?rule.method, "Pricing rule inserted");
        Ok(rule)
    }

    /// Moves a rule to a new status (ACTIVE, PAUSED, ARCHIVED).
    pub async fn set_status(&self, id: &str, status: RuleStatus) -> DbResult<()> {
        let result = sqlx::query("UPDATE pricing_rules SET status = ?1 WHERE id = ?2")
            .bind(status)
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("PricingRule", id));
        }
        Ok(())
    }

    /// Loads the rules active on `on` into a [`RuleBook`].
    pub async fn rule_book(&self, on: NaiveDate) -> DbResult<RuleBook> {
        let mut conn = self.pool.acquire().await?;
        load_rule_book(&mut conn, on).await
    }
}

/// Loads the rules active on `on`, on an existing connection or transaction.
///
/// Quantity bounds are left to [`RuleBook`]; they depend on the line.
pub async fn load_rule_book(conn: &mut SqliteConnection, on: NaiveDate) -> DbResult<RuleBook> {
    let sql = format!(
        "SELECT {RULE_COLUMNS} FROM pricing_rules \
         WHERE status = 'ACTIVE' AND valid_from <= ?1 AND (valid_to IS NULL OR valid_to >= ?1)"
    );
    let rules = sqlx::query_as::<_, PricingRule>(&sql)
        .bind(on)
        .fetch_all(&mut *conn)
        .await?;

    debug!(count = rules.len(), %on, "Rule book loaded");
    Ok(RuleBook::new(rules))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use crate::repository::product::NewProduct;
    use rxstock_core::pricing::PricingRuleProvider;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn category_discount(code: &str) -> NewPricingRule {
        NewPricingRule {
            code: code.into(),
            name: "OTC discount".into(),
            applies_to: RuleScope::Category,
            product_id: None,
            category: Some("OTC".into()),
            method: CalculationMethod::DiscountFromMrp,
            margin_bps: None,
            discount_bps: Some(1000),
            fixed_price_cents: None,
            min_quantity: None,
            max_quantity: None,
            valid_from: date(2025, 1, 1),
            valid_to: Some(date(2025, 12, 31)),
            priority: 10,
            status: RuleStatus::Active,
        }
    }

    #[tokio::test]
    async fn test_rule_book_only_loads_active_rules_in_window() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.pricing_rules();

        repo.insert(category_discount("OTC10")).await.unwrap();
        repo.insert(NewPricingRule {
            status: RuleStatus::Draft,
            ..category_discount("DRAFT")
        })
        .await
        .unwrap();
        repo.insert(NewPricingRule {
            valid_from: date(2026, 1, 1),
            valid_to: None,
            ..category_discount("NEXTYEAR")
        })
        .await
        .unwrap();

        let book = repo.rule_book(date(2025, 6, 1)).await.unwrap();
        assert_eq!(book.len(), 1);
        let rule = book
            .best_rule("any", Some("otc"), 1, date(2025, 6, 1))
            .unwrap();
        assert_eq!(rule.code, "OTC10");
        assert_eq!(rule.method, CalculationMethod::DiscountFromMrp);
        assert_eq!(rule.discount_bps, Some(1000));
    }

    #[tokio::test]
    async fn test_product_rule_requires_product() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let err = db
            .pricing_rules()
            .insert(NewPricingRule {
                applies_to: RuleScope::Product,
                ..category_discount("BAD")
            })
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Domain(CoreError::Validation(_))));
    }

    #[tokio::test]
    async fn test_paused_rule_drops_out() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let product = db
            .products()
            .insert(NewProduct {
                name: "Cetirizine".into(),
                category: None,
                pack_size: 10,
                tax_rate_bps: 1200,
            })
            .await
            .unwrap();

        let rule = db
            .pricing_rules()
            .insert(NewPricingRule {
                applies_to: RuleScope::Product,
                product_id: Some(product.id.clone()),
                category: None,
                method: CalculationMethod::FixedPrice,
                discount_bps: None,
                fixed_price_cents: Some(250),
                ..category_discount("FIX250")
            })
            .await
            .unwrap();

        db.pricing_rules()
            .set_status(&rule.id, RuleStatus::Paused)
            .await
            .unwrap();
        let book = db.pricing_rules().rule_book(date(2025, 6, 1)).await.unwrap();
        assert!(book.is_empty());
    }
}
