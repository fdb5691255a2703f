use std::fmt;

use serde::{Deserialize, Serialize};

/// One tradable share as listed by the market-data provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstrumentRecord {
    pub ticker: String,
    /// Provider-side identifier (FIGI).
    pub instrument_id: String,
    pub sector: String,
    pub currency: String,
}

/// Which form an instrument reference was given in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstrumentForm {
    Ticker,
    InstrumentId,
}

impl fmt::Display for InstrumentForm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstrumentForm::Ticker => f.write_str("ticker"),
            InstrumentForm::InstrumentId => f.write_str("instrument id"),
        }
    }
}

/// A reference to an instrument by either of its unique keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstrumentRef<'a> {
    Ticker(&'a str),
    InstrumentId(&'a str),
}

impl<'a> InstrumentRef<'a> {
    pub fn form(&self) -> InstrumentForm {
        match self {
            InstrumentRef::Ticker(_) => InstrumentForm::Ticker,
            InstrumentRef::InstrumentId(_) => InstrumentForm::InstrumentId,
        }
    }

    pub fn value(&self) -> &'a str {
        match self {
            InstrumentRef::Ticker(v) | InstrumentRef::InstrumentId(v) => v,
        }
    }
}
