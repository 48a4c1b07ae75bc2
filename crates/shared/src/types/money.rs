//! Money type with integer minor units and currency.
//!
//! CRITICAL: Never use floating-point for money calculations.
//! Amounts are stored as `i64` minor units (cents for USD, yen for JPY). The
//! currency exponent says how many decimal places separate minor from major
//! units; `rust_decimal::Decimal` is only used to render major-unit amounts
//! exactly.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Largest supported currency exponent (`10^18` still fits in an `i64`).
pub const MAX_CURRENCY_EXPONENT: u8 = 18;

/// Errors produced by currency parsing and money arithmetic.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MoneyError {
    /// Currency code is not three ASCII uppercase letters.
    #[error("Invalid currency code: {0}")]
    InvalidCurrencyCode(String),

    /// Currency exponent is out of range.
    #[error("Invalid currency exponent {0}, must be between 0 and 18")]
    InvalidExponent(u8),

    /// Two amounts in different currencies were combined.
    #[error("Currency mismatch: expected {expected}, found {found}")]
    CurrencyMismatch {
        /// Currency of the left operand.
        expected: Currency,
        /// Currency of the right operand.
        found: Currency,
    },

    /// The result does not fit in 64-bit minor units.
    #[error("Amount overflow")]
    Overflow,

}

/// A currency: ISO 4217 style code plus its minor-unit exponent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Currency {
    code: String,
    exponent: u8,
}

impl Currency {
    /// Creates a currency after validating code and exponent.
    pub fn new(code: &str, exponent: u8) -> Result<Self, MoneyError> {
        if code.len() != 3 || !code.bytes().all(|b| b.is_ascii_uppercase()) {
            return Err(MoneyError::InvalidCurrencyCode(code.to_string()));
        }
        if exponent > MAX_CURRENCY_EXPONENT {
            return Err(MoneyError::InvalidExponent(exponent));
        }
        Ok(Self {
            code: code.to_string(),
            exponent,
        })
    }

    /// The three-letter currency code.
    #[must_use]
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Number of decimal places between minor and major units.
    #[must_use]
    pub const fn exponent(&self) -> u8 {
        self.exponent
    }
}

impl std::fmt::Display for Currency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.code)
    }
}

/// Represents a monetary amount in minor units with its currency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money {
    minor_units: i64,
    currency: Currency,
}

impl Money {
    /// Creates a new Money instance from minor units.
    #[must_use]
    pub const fn new(minor_units: i64, currency: Currency) -> Self {
        Self {
            minor_units,
            currency,
        }
    }

    /// Creates a zero amount in the specified currency.
    #[must_use]
    pub const fn zero(currency: Currency) -> Self {
        Self::new(0, currency)
    }

    /// The amount in minor units.
    #[must_use]
    pub const fn minor_units(&self) -> i64 {
        self.minor_units
    }

    /// The currency of this amount.
    #[must_use]
    pub const fn currency(&self) -> &Currency {
        &self.currency
    }

    /// Renders the amount in major units without floating point.
    #[must_use]
    pub fn to_decimal(&self) -> Decimal {
        Decimal::new(self.minor_units, u32::from(self.currency.exponent))
    }

    /// Adds two amounts of the same currency.
    pub fn checked_add(&self, other: &Self) -> Result<Self, MoneyError> {
        self.ensure_same_currency(other)?;
        let minor_units = self
            .minor_units
            .checked_add(other.minor_units)
            .ok_or(MoneyError::Overflow)?;
        Ok(Self::new(minor_units, self.currency.clone()))
    }

    fn ensure_same_currency(&self, other: &Self) -> Result<(), MoneyError> {
        if self.currency == other.currency {
            Ok(())
        } else {
            Err(MoneyError::CurrencyMismatch {
                expected: self.currency.clone(),
                found: other.currency.clone(),
            })
        }
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.to_decimal(), self.currency)
    }
}
