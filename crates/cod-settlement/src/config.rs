//! Settlement configuration

use serde::{Deserialize, Serialize};

use cod_types::{CodError, Money, Result, SettlementCurrency};

/// Tunables of the settlement engines
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementConfig {
    pub currency: SettlementCurrency,
    /// Largest |variance| between expected and received cash that is not flagged
    pub variance_tolerance: Money,
    /// Age in days after which collected cash is swept into an overdue batch
    pub overdue_days: u32,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            currency: SettlementCurrency::default(),
            variance_tolerance: Money::from_minor(1, 2),
            overdue_days: 7,
        }
    }
}

impl SettlementConfig {
    /// Create config from environment variables, falling back to defaults
    /// for unset ones. A set but unparsable variable is an error.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let code = lookup("COD_CURRENCY").unwrap_or(defaults.currency.code);
        let minor_units = parse(&lookup, "COD_MINOR_UNITS")?.unwrap_or(defaults.currency.minor_units);
        if minor_units > 6 {
            return Err(CodError::Config {
                message: format!("COD_MINOR_UNITS must be at most 6, got {}", minor_units),
            });
        }

        let variance_tolerance = match lookup("COD_VARIANCE_TOLERANCE") {
            Some(raw) => raw.parse::<Money>().map_err(|e| CodError::Config {
                message: format!("COD_VARIANCE_TOLERANCE: {}", e),
            })?,
            None => defaults.variance_tolerance,
        };
        if variance_tolerance.is_negative() {
            return Err(CodError::Config {
                message: "COD_VARIANCE_TOLERANCE must not be negative".to_string(),
            });
        }

        Ok(Self {
            currency: SettlementCurrency::new(code, minor_units),
            variance_tolerance,
            overdue_days: parse(&lookup, "COD_OVERDUE_DAYS")?.unwrap_or(defaults.overdue_days),
        })
    }
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().map(Some).map_err(|e: T::Err| CodError::Config {
            message: format!("{}: {}", key, e),
        }),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = SettlementConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, SettlementConfig::default());
        assert_eq!(config.currency.code, "EGP");
        assert_eq!(config.variance_tolerance.to_string(), "0.01");
        assert_eq!(config.overdue_days, 7);
    }

    #[test]
    fn test_overrides() {
        let config = SettlementConfig::from_lookup(lookup(&[
            ("COD_CURRENCY", "KWD"),
            ("COD_MINOR_UNITS", "3"),
            ("COD_VARIANCE_TOLERANCE", "0.5"),
            ("COD_OVERDUE_DAYS", "14"),
        ]))
        .unwrap();
        assert_eq!(config.currency, SettlementCurrency::new("KWD", 3));
        assert_eq!(config.variance_tolerance, "0.5".parse().unwrap());
        assert_eq!(config.overdue_days, 14);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let result = SettlementConfig::from_lookup(lookup(&[("COD_OVERDUE_DAYS", "soon")]));
        assert!(matches!(result, Err(CodError::Config { .. })));

        let result = SettlementConfig::from_lookup(lookup(&[("COD_VARIANCE_TOLERANCE", "-1")]));
        assert!(matches!(result, Err(CodError::Config { .. })));
    }
}
