//! Static instrument metadata.
//!
//! JSON file keyed by exchange/symbol/date:
//!
//! ```json
//! {"version": 0, "instruments": [
//!   {"exchange": "binance", "symbol": "BTCUSDT", "date": "2024-01-01",
//!    "price_increment": "0.01", "amount_increment": "0.001"}
//! ]}
//! ```

use crate::common::errors::PipelineError;
use crate::common::instrument::{parse_decimal, Instrument};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

pub const INSTRUMENT_META_VERSION: u32 = 0;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InstrumentMeta {
    pub exchange: String,
    pub symbol: String,
    pub date: String,
    pub price_increment: String,
    pub amount_increment: String,
    #[serde(default)]
    pub min_trade_amount: Option<String>,
}

impl InstrumentMeta {
    pub fn instrument(&self) -> Result<Instrument, PipelineError> {
        Instrument::from_strings(&self.price_increment, &self.amount_increment)
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct MetaFile {
    version: u32,
    instruments: Vec<InstrumentMeta>,
}

/// Validate a `YYYY-MM-DD` date string.
pub fn validate_date(date: &str) -> Result<(), PipelineError> {
    if date.len() != 10 || NaiveDate::parse_from_str(date, "%Y-%m-%d").is_err() {
        return Err(PipelineError::invalid_config(format!("invalid date {:?}", date)));
    }
    Ok(())
}

#[derive(Debug, Clone, Default)]
pub struct StaticInstrumentMeta {
    by_key: BTreeMap<(String, String, String), InstrumentMeta>,
}

impl StaticInstrumentMeta {
    pub fn load(path: &Path) -> Result<Self, PipelineError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::io(format!("read instrument metadata {}", path.display()), e)
        })?;
        Self::from_json_str(&text)
    }

    pub fn from_json_str(text: &str) -> Result<Self, PipelineError> {
        let file: MetaFile = serde_json::from_str(text)
            .map_err(|e| PipelineError::invalid_config(format!("instrument metadata: {}", e)))?;
        if file.version != INSTRUMENT_META_VERSION {
            return Err(PipelineError::invalid_config(format!(
                "unsupported instrument metadata version {}",
                file.version
            )));
        }

        let mut by_key = BTreeMap::new();
        for entry in file.instruments {
            for (name, value) in [
                ("exchange", &entry.exchange),
                ("symbol", &entry.symbol),
                ("date", &entry.date),
            ] {
                if value.is_empty() {
                    return Err(PipelineError::invalid_config(format!(
                        "instrument metadata {} must be non-empty",
                        name
                    )));
                }
            }
            validate_date(&entry.date)?;
            entry.instrument()?;
            if let Some(min) = &entry.min_trade_amount {
                if parse_decimal(min).is_none() {
                    return Err(PipelineError::invalid_config(format!(
                        "invalid min_trade_amount {:?}",
                        min
                    )));
                }
            }

            let key = (entry.exchange.clone(), entry.symbol.clone(), entry.date.clone());
            if by_key.contains_key(&key) {
                return Err(PipelineError::invalid_config(format!(
                    "duplicate instrument entry {}/{}/{}",
                    key.0, key.1, key.2
                )));
            }
            by_key.insert(key, entry);
        }
        Ok(Self { by_key })
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    pub fn get(&self, exchange: &str, symbol: &str, date: &str) -> Result<&InstrumentMeta, PipelineError> {
        self.by_key
            .get(&(exchange.to_string(), symbol.to_string(), date.to_string()))
            .ok_or_else(|| {
                PipelineError::invalid_config(format!(
                    "instrument metadata not found for {}/{}/{}",
                    exchange, symbol, date
                ))
            })
    }
}
