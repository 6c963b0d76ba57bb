//! Base/quote currency pair.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PairError {
    #[error("invalid currency code '{0}': expected three ASCII letters")]
    InvalidCode(String),

    #[error("base and quote are the same currency: {0}")]
    SameCurrency(String),

    #[error("invalid pair '{0}': expected BASE/QUOTE")]
    Malformed(String),
}

/// A currency pair such as `USD/TRY`. Codes are stored upper-case.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CurrencyPair {
    base: String,
    quote: String,
}

impl CurrencyPair {
    pub fn new(base: &str, quote: &str) -> Result<Self, PairError> {
        let base = normalize_code(base)?;
        let quote = normalize_code(quote)?;
        if base == quote {
            return Err(PairError::SameCurrency(base));
        }
        Ok(Self { base, quote })
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn quote(&self) -> &str {
        &self.quote
    }
}

fn normalize_code(code: &str) -> Result<String, PairError> {
    let code = code.trim();
    if code.len() == 3 && code.chars().all(|c| c.is_ascii_alphabetic()) {
        Ok(code.to_ascii_uppercase())
    } else {
        Err(PairError::InvalidCode(code.to_string()))
    }
}

impl FromStr for CurrencyPair {
    type Err = PairError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (base, quote) = s
            .split_once('/')
            .ok_or_else(|| PairError::Malformed(s.to_string()))?;
        Self::new(base, quote)
    }
}

impl std::fmt::Display for CurrencyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.base, self.quote)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_uppercases() {
        let pair: CurrencyPair = "usd/try".parse().unwrap();
        assert_eq!(pair.base(), "USD");
        assert_eq!(pair.quote(), "TRY");
        assert_eq!(pair.to_string(), "USD/TRY");
    }

    #[test]
    fn rejects_bad_codes() {
        assert_eq!(
            CurrencyPair::new("US", "TRY"),
            Err(PairError::InvalidCode("US".into()))
        );
        assert!(matches!(
            CurrencyPair::new("USD", "usd"),
            Err(PairError::SameCurrency(_))
        ));
        assert!(matches!(
            "USDTRY".parse::<CurrencyPair>(),
            Err(PairError::Malformed(_))
        ));
    }
}
