//! # Pricing Validator
//!
//! Computes the expected unit sale price of a line and checks a
//! client-supplied price against it.
//!
//! ## Price Resolution
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Price Resolution                                  │
//! │                                                                         │
//! │  PricingInput { product, category, ptr, mrp, tax, qty, date }          │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  PricingRuleProvider::best_rule()                                      │
//! │       │                                                                 │
//! │       ├── rule found ──► MARGIN_ON_PTR      ptr × (1 + margin)         │
//! │       │                  DISCOUNT_FROM_MRP  net(mrp) × (1 − discount)  │
//! │       │                  FIXED_PRICE        fixed                      │
//! │       │                  PROMOTIONAL        fixed                      │
//! │       │                  CLEARANCE          net(mrp) × (1 − discount)  │
//! │       │                                                                 │
//! │       └── no rule ─────► min(net(mrp), ptr × (1 + default margin))     │
//! │                                                                         │
//! │  net(mrp) = mrp × 10000 / (10000 + tax_bps)                            │
//! │  so that net(mrp) + tax(net(mrp)) == mrp                               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Everything here is pure. Rule storage lives behind [`PricingRuleProvider`].

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::money::Money;
use crate::types::TaxRate;

/// Name reported when no rule matched.
pub const DEFAULT_RULE_NAME: &str = "DEFAULT_MARGIN";

/// Default margin on PTR when no rule applies (20%).
pub const DEFAULT_MARGIN_BPS: u32 = 2000;

/// Default tolerance between requested and expected price (one minor unit).
pub const DEFAULT_TOLERANCE_CENTS: i64 = 1;

// =============================================================================
// Pricing Rules
// =============================================================================

/// How a rule computes its price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CalculationMethod {
    MarginOnPtr,
    DiscountFromMrp,
    FixedPrice,
    Promotional,
    Clearance,
}

/// Whether a rule targets one product or a whole category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleScope {
    Product,
    Category,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleStatus {
    Draft,
    Active,
    Paused,
    Archived,
}

/// A configured pricing rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct PricingRule {
    pub id: String,
    /// Short business code, reported as `rule_applied`.
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
    /// Higher wins among rules of the same scope.
    pub priority: i64,
    pub status: RuleStatus,
    pub created_at: DateTime<Utc>,
}

impl PricingRule {
    /// Whether this rule may price the given line.
    pub fn matches(&self, product_id: &str, category: Option<&str>, quantity: i64, on: NaiveDate) -> bool {
        if self.status != RuleStatus::Active {
            return false;
        }
        if on < self.valid_from || self.valid_to.is_some_and(|to| on > to) {
            return false;
        }
        if self.min_quantity.is_some_and(|min| quantity < min)
            || self.max_quantity.is_some_and(|max| quantity > max)
        {
            return false;
        }

        match self.applies_to {
            RuleScope::Product => self.product_id.as_deref() == Some(product_id),
            RuleScope::Category => match (self.category.as_deref(), category) {
                (Some(rule_cat), Some(cat)) => rule_cat.eq_ignore_ascii_case(cat),
                _ => false,
            },
        }
    }

    fn specificity(&self) -> u8 {
        match self.applies_to {
            RuleScope::Product => 1,
            RuleScope::Category => 0,
        }
    }
}

// =============================================================================
// Rule Provider
// =============================================================================

/// Rule lookup keyed by product and category.
///
/// Returning `None` means the default formula applies.
pub trait PricingRuleProvider {
    fn best_rule(
        &self,
        product_id: &str,
        category: Option<&str>,
        quantity: i64,
        on: NaiveDate,
    ) -> Option<PricingRule>;
}

/// Provider with no rules; everything uses the default formula.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRules;

impl PricingRuleProvider for NoRules {
    fn best_rule(&self, _: &str, _: Option<&str>, _: i64, _: NaiveDate) -> Option<PricingRule> {
        None
    }
}

/// In-memory rule set.
///
/// Selection: product rules beat category rules, then higher priority,
/// then the most recently created.
#[derive(Debug, Clone, Default)]
pub struct RuleBook {
    rules: Vec<PricingRule>,
}

impl RuleBook {
    pub fn new(rules: Vec<PricingRule>) -> Self {
        RuleBook { rules }
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl PricingRuleProvider for RuleBook {
    fn best_rule(
        &self,
        product_id: &str,
        category: Option<&str>,
        quantity: i64,
        on: NaiveDate,
    ) -> Option<PricingRule> {
        self.rules
            .iter()
            .filter(|r| r.matches(product_id, category, quantity, on))
            .max_by(|a, b| {
                a.specificity()
                    .cmp(&b.specificity())
                    .then(a.priority.cmp(&b.priority))
                    .then(a.created_at.cmp(&b.created_at))
            })
            .cloned()
    }
}

// =============================================================================
// Calculator
// =============================================================================

/// Everything needed to price one line.
#[derive(Debug, Clone)]
pub struct PricingInput {
    pub product_id: String,
    pub category: Option<String>,
    /// Purchase price per unit.
    pub ptr: Money,
    /// MRP per unit, tax inclusive.
    pub mrp: Money,
    pub tax_rate: TaxRate,
    pub quantity: i64,
    /// Date the rule validity window is checked against.
    pub on: NaiveDate,
}

/// Non-blocking observations about a computed price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PriceWarning {
    /// Price plus tax is above the printed MRP.
    AboveMrp { price_with_tax: Money, mrp: Money },
    /// Price is below purchase cost.
    BelowCost { price: Money, ptr: Money },
}

/// Result of pricing one line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceQuote {
    /// Expected unit price, tax exclusive.
    pub expected: Money,
    /// Rule code, or [`DEFAULT_RULE_NAME`].
    pub rule_applied: String,
    pub method: Option<CalculationMethod>,
    pub warnings: Vec<PriceWarning>,
}

impl PriceQuote {
    /// Tax on the expected unit price.
    pub fn unit_tax(&self, rate: TaxRate) -> Money {
        self.expected.calculate_tax(rate)
    }
}

/// Pure price calculator.
///
/// ## Example
/// ```rust
/// use chrono::NaiveDate;
/// use rxstock_core::money::Money;
/// use rxstock_core::pricing::{NoRules, PricingCalculator, PricingInput};
/// use rxstock_core::types::TaxRate;
///
/// let calc = PricingCalculator::default();
/// let input = PricingInput {
///     product_id: "p".into(),
///     category: None,
///     ptr: Money::from_cents(800),
///     mrp: Money::from_cents(1120),
///     tax_rate: TaxRate::from_bps(1200),
///     quantity: 1,
///     on: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
/// };
///
/// // net(1120) = 1000, ptr + 20% = 960 → min = 960
/// let quote = calc.quote(&input, &NoRules);
/// assert_eq!(quote.expected.cents(), 960);
/// assert!(calc.validate(&input, Money::from_cents(961), &NoRules).is_ok());
/// assert!(calc.validate(&input, Money::from_cents(950), &NoRules).is_err());
/// ```
#[derive(Debug, Clone, Copy)]
pub struct PricingCalculator {
    default_margin_bps: u32,
    tolerance: Money,
}

impl Default for PricingCalculator {
    fn default() -> Self {
        PricingCalculator {
            default_margin_bps: DEFAULT_MARGIN_BPS,
            tolerance: Money::from_cents(DEFAULT_TOLERANCE_CENTS),
        }
    }
}

impl PricingCalculator {
    pub fn new(default_margin_bps: u32, tolerance: Money) -> Self {
        PricingCalculator {
            default_margin_bps,
            tolerance,
        }
    }

    pub fn default_margin_bps(&self) -> u32 {
        self.default_margin_bps
    }

    pub fn tolerance(&self) -> Money {
        self.tolerance
    }

    /// Default formula: MRP net of tax, bounded by PTR plus the default margin.
    ///
    /// A missing MRP or PTR (zero) falls back to the other bound.
    pub fn default_price(&self, ptr: Money, mrp: Money, tax_rate: TaxRate) -> Money {
        let from_mrp = mrp.net_of_tax(tax_rate);
        let from_ptr = ptr.apply_markup(self.default_margin_bps);

        match (mrp.is_positive(), ptr.is_positive()) {
            (true, true) => from_mrp.min(from_ptr),
            (true, false) => from_mrp,
            (false, true) => from_ptr,
            (false, false) => Money::zero(),
        }
    }

    /// Price given by a specific rule.
    pub fn rule_price(&self, rule: &PricingRule, input: &PricingInput) -> Money {
        let mrp_net = input.mrp.net_of_tax(input.tax_rate);
        match rule.method {
            CalculationMethod::MarginOnPtr => input
                .ptr
                .apply_markup(rule.margin_bps.unwrap_or(self.default_margin_bps)),
            CalculationMethod::DiscountFromMrp | CalculationMethod::Clearance => {
                mrp_net.apply_percentage_discount(rule.discount_bps.unwrap_or(0))
            }
            CalculationMethod::FixedPrice | CalculationMethod::Promotional => rule
                .fixed_price_cents
                .map(Money::from_cents)
                .unwrap_or_else(|| self.default_price(input.ptr, input.mrp, input.tax_rate)),
        }
    }

    /// Computes the expected price for a line.
    pub fn quote(&self, input: &PricingInput, provider: &dyn PricingRuleProvider) -> PriceQuote {
        let rule = provider.best_rule(
            &input.product_id,
            input.category.as_deref(),
            input.quantity,
            input.on,
        );

        let (expected, rule_applied, method) = match rule {
            Some(rule) => (self.rule_price(&rule, input), rule.code.clone(), Some(rule.method)),
            None => (
                self.default_price(input.ptr, input.mrp, input.tax_rate),
                DEFAULT_RULE_NAME.to_string(),
                None,
            ),
        };

        let mut warnings = Vec::new();
        let price_with_tax = expected + expected.calculate_tax(input.tax_rate);
        if input.mrp.is_positive() && price_with_tax.cents() > input.mrp.cents() + self.tolerance.cents() {
            warnings.push(PriceWarning::AboveMrp {
                price_with_tax,
                mrp: input.mrp,
            });
        }
        if input.ptr.is_positive() && expected < input.ptr {
            warnings.push(PriceWarning::BelowCost {
                price: expected,
                ptr: input.ptr,
            });
        }

        PriceQuote {
            expected,
            rule_applied,
            method,
            warnings,
        }
    }

    /// Computes the expected price and rejects a requested price outside tolerance.
    ///
    /// ## Errors
    /// `PriceMismatch { expected, actual, rule_applied }` when
    /// `|expected − requested| > tolerance`.
    pub fn validate(
        &self,
        input: &PricingInput,
        requested: Money,
        provider: &dyn PricingRuleProvider,
    ) -> CoreResult<PriceQuote> {
        let quote = self.quote(input, provider);

        if quote.expected.abs_diff(requested) > self.tolerance {
            return Err(CoreError::PriceMismatch {
                product_id: input.product_id.clone(),
                expected: quote.expected,
                actual: requested,
                rule_applied: quote.rule_applied,
            });
        }

        Ok(quote)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
