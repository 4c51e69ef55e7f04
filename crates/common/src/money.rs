//! Fixed-point money.
//!
//! Amounts are integer minor units (cents for USD) tagged with an ISO-4217
//! currency code. Floating point is never involved; arithmetic between two
//! amounts requires the same currency.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced by money arithmetic.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MoneyError {
    #[error("currency mismatch: {left} vs {right}")]
    CurrencyMismatch { left: Currency, right: Currency },

    #[error("invalid currency code: {0:?} (expected three uppercase letters)")]
    InvalidCurrency(String),

    #[error("arithmetic overflow")]
    Overflow,

    #[error("division by zero")]
    DivisionByZero,
}

/// Three-letter ISO-4217 currency code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Currency([u8; 3]);

impl Currency {
    pub const USD: Currency = Currency(*b"USD");
    pub const EUR: Currency = Currency(*b"EUR");
    pub const GBP: Currency = Currency(*b"GBP");

    /// Parses a currency code such as `"USD"`.
    pub fn new(code: &str) -> Result<Self, MoneyError> {
        let bytes = code.as_bytes();
        if bytes.len() != 3 || !bytes.iter().all(u8::is_ascii_uppercase) {
            return Err(MoneyError::InvalidCurrency(code.to_string()));
        }
        Ok(Self([bytes[0], bytes[1], bytes[2]]))
    }

    pub fn code(&self) -> &str {
        // Construction only admits ASCII uppercase bytes.
        std::str::from_utf8(&self.0).unwrap_or("???")
    }
}

impl std::fmt::Display for Currency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

impl std::str::FromStr for Currency {
    type Err = MoneyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for Currency {
    type Error = MoneyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<Currency> for String {
    fn from(currency: Currency) -> Self {
        currency.code().to_string()
    }
}

/// An amount of money in minor units of a single currency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Money {
    amount_minor_units: i64,
    currency: Currency,
}

impl Money {
    pub fn new(amount_minor_units: i64, currency: Currency) -> Self {
        Self {
            amount_minor_units,
            currency,
        }
    }

    pub fn zero(currency: Currency) -> Self {
        Self::new(0, currency)
    }

    /// Shorthand for a USD amount in cents.
    pub fn usd(cents: i64) -> Self {
        Self::new(cents, Currency::USD)
    }

    pub fn amount_minor_units(&self) -> i64 {
        self.amount_minor_units
    }

    pub fn currency(&self) -> Currency {
        self.currency
    }

    pub fn is_zero(&self) -> bool {
        self.amount_minor_units == 0
    }

    pub fn is_positive(&self) -> bool {
        self.amount_minor_units > 0
    }

    pub fn is_negative(&self) -> bool {
        self.amount_minor_units < 0
    }

    fn ensure_same_currency(&self, other: &Money) -> Result<(), MoneyError> {
        if self.currency != other.currency {
            return Err(MoneyError::CurrencyMismatch {
                left: self.currency,
                right: other.currency,
            });
        }
        Ok(())
    }

    pub fn try_add(&self, other: Money) -> Result<Money, MoneyError> {
        self.ensure_same_currency(&other)?;
        let amount = self
            .amount_minor_units
            .checked_add(other.amount_minor_units)
            .ok_or(MoneyError::Overflow)?;
        Ok(Money::new(amount, self.currency))
    }

    pub fn try_sub(&self, other: Money) -> Result<Money, MoneyError> {
        self.ensure_same_currency(&other)?;
        let amount = self
            .amount_minor_units
            .checked_sub(other.amount_minor_units)
            .ok_or(MoneyError::Overflow)?;
        Ok(Money::new(amount, self.currency))
    }

    /// Multiplies by a quantity of units.
    pub fn times(&self, quantity: u64) -> Result<Money, MoneyError> {
        let quantity = i64::try_from(quantity).map_err(|_| MoneyError::Overflow)?;
        let amount = self
            .amount_minor_units
            .checked_mul(quantity)
            .ok_or(MoneyError::Overflow)?;
        Ok(Money::new(amount, self.currency))
    }

    /// Integer division, truncating toward zero.
    pub fn divide_by(&self, divisor: u64) -> Result<Money, MoneyError> {
        if divisor == 0 {
            return Err(MoneyError::DivisionByZero);
        }
        let divisor = i64::try_from(divisor).map_err(|_| MoneyError::Overflow)?;
        Ok(Money::new(self.amount_minor_units / divisor, self.currency))
    }

    /// Returns `self * part / whole` computed without intermediate overflow.
    ///
    /// Used to value a slice of a pooled balance.
    pub fn prorate(&self, part: u64, whole: u64) -> Result<Money, MoneyError> {
        if whole == 0 {
            return Err(MoneyError::DivisionByZero);
        }
        let scaled = i128::from(self.amount_minor_units) * i128::from(part) / i128::from(whole);
        let amount = i64::try_from(scaled).map_err(|_| MoneyError::Overflow)?;
        Ok(Money::new(amount, self.currency))
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sign = if self.amount_minor_units < 0 { "-" } else { "" };
        let abs = self.amount_minor_units.unsigned_abs();
        write!(f, "{sign}{}.{:02} {}", abs / 100, abs % 100, self.currency)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn currency_accepts_three_uppercase_letters() {
        assert_eq!(Currency::new("USD").unwrap(), Currency::USD);
        assert_eq!("EUR".parse::<Currency>().unwrap(), Currency::EUR);
        assert!(Currency::new("usd").is_err());
        assert!(Currency::new("US").is_err());
        assert!(Currency::new("USDT").is_err());
    }

    #[test]
    fn add_and_subtract_same_currency() {
        let a = Money::usd(1500);
        let b = Money::usd(825);
        assert_eq!(a.try_add(b).unwrap(), Money::usd(2325));
        assert_eq!(a.try_sub(b).unwrap(), Money::usd(675));
    }

    #[test]
    fn mixing_currencies_fails() {
        let usd = Money::usd(100);
        let eur = Money::new(100, Currency::EUR);
        assert_eq!(
            usd.try_add(eur),
            Err(MoneyError::CurrencyMismatch {
                left: Currency::USD,
                right: Currency::EUR
            })
        );
        assert!(usd.try_sub(eur).is_err());
    }

    #[test]
    fn times_multiplies_and_detects_overflow() {
        assert_eq!(Money::usd(1500).times(100).unwrap(), Money::usd(150_000));
        assert_eq!(Money::usd(1500).times(0).unwrap(), Money::usd(0));
        assert_eq!(Money::usd(i64::MAX).times(2), Err(MoneyError::Overflow));
    }

    #[test]
    fn divide_and_prorate() {
        assert_eq!(Money::usd(2325).divide_by(175).unwrap(), Money::usd(13));
        assert_eq!(Money::usd(100).divide_by(0), Err(MoneyError::DivisionByZero));
        assert_eq!(Money::usd(2325).prorate(120, 175).unwrap(), Money::usd(1594));
        assert_eq!(Money::usd(2325).prorate(175, 175).unwrap(), Money::usd(2325));
    }

    #[test]
    fn display_formats_minor_units() {
        assert_eq!(Money::usd(150_000).to_string(), "1500.00 USD");
        assert_eq!(Money::usd(5).to_string(), "0.05 USD");
        assert_eq!(Money::usd(-1205).to_string(), "-12.05 USD");
    }

    #[test]
    fn serialization_uses_currency_code() {
        let json = serde_json::to_value(Money::usd(1100)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"amount_minor_units": 1100, "currency": "USD"})
        );
        let back: Money = serde_json::from_value(json).unwrap();
        assert_eq!(back, Money::usd(1100));

        let bad = serde_json::json!({"amount_minor_units": 1, "currency": "dollars"});
        assert!(serde_json::from_value::<Money>(bad).is_err());
    }
}
