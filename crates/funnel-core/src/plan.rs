//! Subscription Plan

use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Field, ValidationError};

/// Billing currency accepted by the payment provider
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    #[default]
    Uyu,
    Usd,
}

impl Currency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Currency::Uyu => "UYU",
            Currency::Usd => "USD",
        }
    }
}

impl FromStr for Currency {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "UYU" => Ok(Currency::Uyu),
            "USD" => Ok(Currency::Usd),
            other => Err(ValidationError::new(
                Field::Amount,
                format!("Moneda no soportada: {other}"),
            )),
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Recurring premium plan billed through the payment provider
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    /// Monthly charge
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,

    pub currency: Currency,
}

impl Plan {
    pub fn new(amount: Decimal, currency: Currency) -> Result<Self, ValidationError> {
        if amount <= Decimal::ZERO {
            return Err(ValidationError::new(
                Field::Amount,
                "El monto debe ser mayor a cero.",
            ));
        }
        Ok(Self { amount, currency })
    }

    /// Standard monthly premium: 390 UYU
    pub fn premium_monthly() -> Self {
        Self {
            amount: dec!(390),
            currency: Currency::Uyu,
        }
    }

    /// Amount as a JSON number; whole amounts stay integers (`390`)
    pub fn amount_value(&self) -> Value {
        if self.amount.fract().is_zero() {
            if let Some(whole) = self.amount.to_i64() {
                return Value::from(whole);
            }
        }
        self.amount.to_f64().map_or(Value::Null, Value::from)
    }

    /// Description shown on the payment provider's page
    pub fn reason_for(&self, subscriber_name: &str) -> String {
        format!("Premium mensual THC - {subscriber_name}")
    }
}

/// Read an amount sent as a JSON number or a numeric string
pub fn parse_amount(value: &Value) -> Option<Decimal> {
    let text = match value {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.trim().to_string(),
        _ => return None,
    };
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .ok()
}

impl Default for Plan {
    fn default() -> Self {
        Self::premium_monthly()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_premium_plan_pricing() {
        let plan = Plan::premium_monthly();
        assert_eq!(plan.amount, dec!(390));
        assert_eq!(plan.currency, Currency::Uyu);
    }

    #[test]
    fn test_amount_serializes_as_number() {
        let json = serde_json::to_value(Plan::premium_monthly()).unwrap();
        assert_eq!(json["amount"], serde_json::json!(390.0));
        assert_eq!(json["currency"], "UYU");
    }

    #[test]
    fn test_rejects_non_positive_amount() {
        assert!(Plan::new(Decimal::ZERO, Currency::Uyu).is_err());
        assert!(Plan::new(dec!(-1), Currency::Uyu).is_err());
        assert!(Plan::new(dec!(99.5), Currency::Usd).is_ok());
    }

    #[test]
    fn test_amount_value_keeps_integers() {
        assert_eq!(Plan::premium_monthly().amount_value(), serde_json::json!(390));
        let plan = Plan::new(dec!(99.5), Currency::Usd).unwrap();
        assert_eq!(plan.amount_value(), serde_json::json!(99.5));
    }

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount(&serde_json::json!(390)), Some(dec!(390)));
        assert_eq!(parse_amount(&serde_json::json!("390.50")), Some(dec!(390.50)));
        assert_eq!(parse_amount(&serde_json::json!(true)), None);
        assert_eq!(parse_amount(&serde_json::json!("abc")), None);
    }

    #[test]
    fn test_currency_parse() {
        assert_eq!("uyu".parse::<Currency>().unwrap(), Currency::Uyu);
        assert!("EUR".parse::<Currency>().is_err());
    }
}
