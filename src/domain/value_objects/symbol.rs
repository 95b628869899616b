use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::errors::ValidationError;

/// Asset classification carried alongside a symbol. Crypto symbols unlock
/// the spot-price tier of the resolution chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AssetClass {
    #[default]
    Stock,
    Crypto,
}

/// A validated ticker symbol: trimmed, upper-cased, ASCII alphanumeric.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(String);

impl Symbol {
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let normalized = raw.trim().to_uppercase();

        if normalized.is_empty() {
            return Err(ValidationError::InvalidSymbol(
                "symbol must not be empty".to_string(),
            ));
        }

        if !normalized.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(ValidationError::InvalidSymbol(format!(
                "symbol '{}' must be alphanumeric",
                normalized
            )));
        }

        Ok(Symbol(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_normalizes_case_and_whitespace() {
        let symbol = Symbol::parse("  aapl ").unwrap();
        assert_eq!(symbol.as_str(), "AAPL");
    }

    #[test]
    fn test_parse_rejects_empty() {
        assert!(Symbol::parse("").is_err());
        assert!(Symbol::parse("   ").is_err());
    }

    #[test]
    fn test_parse_rejects_non_alphanumeric() {
        assert!(Symbol::parse("BRK-B").is_err());
        assert!(Symbol::parse("AAPL;DROP").is_err());
    }

    #[test]
    fn test_parse_accepts_digits() {
        let symbol = Symbol::parse("BTC2").unwrap();
        assert_eq!(symbol.as_str(), "BTC2");
    }

    #[test]
    fn test_asset_class_defaults_to_stock() {
        assert_eq!(AssetClass::default(), AssetClass::Stock);
    }
}
