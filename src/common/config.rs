//! Run configuration.
//!
//! Every struct deserializes from TOML; the operator binaries load a file
//! with `load_from_path` and then apply command-line overrides.

use crate::common::errors::PipelineError;
use crate::common::instrument::Instrument;
use crate::common::types::{Lots, Nanos, QuoteAtoms};
use anyhow::Context;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Upper bound for `fee_bps` (100%).
pub const MAX_FEE_BPS: i64 = 10_000;

pub const DEFAULT_MAX_ERRORS: u64 = 100;

fn default_true() -> bool {
    true
}

fn default_max_errors() -> u64 {
    DEFAULT_MAX_ERRORS
}

/// Load any config struct from a TOML file.
pub fn load_from_path<T: DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    toml::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
}

// =============================================================================
// FAILURE POLICY
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureMode {
    /// First error aborts the run.
    #[default]
    HardFail,
    /// Errors are recorded and skipped per `QuarantineGranularity`.
    Quarantine,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuarantineGranularity {
    #[default]
    SkipRow,
    SkipBatch,
    /// Skip at the error's natural scope until `max_errors` records, then abort.
    HaltAfterErrors,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailurePolicyConfig {
    #[serde(default)]
    pub mode: FailureMode,
    #[serde(default)]
    pub granularity: QuarantineGranularity,
    #[serde(default = "default_max_errors")]
    pub max_errors: u64,
}

impl Default for FailurePolicyConfig {
    fn default() -> Self {
        Self::hard_fail()
    }
}

impl FailurePolicyConfig {
    pub fn hard_fail() -> Self {
        Self {
            mode: FailureMode::HardFail,
            granularity: QuarantineGranularity::SkipRow,
            max_errors: DEFAULT_MAX_ERRORS,
        }
    }

    pub fn quarantine(granularity: QuarantineGranularity) -> Self {
        Self {
            mode: FailureMode::Quarantine,
            granularity,
            max_errors: DEFAULT_MAX_ERRORS,
        }
    }

    pub fn halt_after(max_errors: u64) -> Self {
        Self {
            mode: FailureMode::Quarantine,
            granularity: QuarantineGranularity::HaltAfterErrors,
            max_errors,
        }
    }

    pub fn is_quarantine(&self) -> bool {
        self.mode == FailureMode::Quarantine
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.is_quarantine()
            && self.granularity == QuarantineGranularity::HaltAfterErrors
            && self.max_errors == 0
        {
            return Err(PipelineError::invalid_config(
                "max_errors must be at least 1 for halt_after_errors",
            ));
        }
        Ok(())
    }
}

// =============================================================================
// COMPILE
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstrumentSpec {
    pub price_increment: String,
    pub amount_increment: String,
}

impl InstrumentSpec {
    pub fn new(price_increment: impl Into<String>, amount_increment: impl Into<String>) -> Self {
        Self {
            price_increment: price_increment.into(),
            amount_increment: amount_increment.into(),
        }
    }

    pub fn to_instrument(&self) -> Result<Instrument, PipelineError> {
        Instrument::from_strings(&self.price_increment, &self.amount_increment)
    }
}

/// Where the compiler gets its increments from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum InstrumentSource {
    Explicit(InstrumentSpec),
    /// Static JSON metadata file looked up by exchange/symbol/date.
    StaticMetadata { path: PathBuf },
    /// GCD of the first rows of the input.
    Inferred,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompileConfig {
    pub instrument: InstrumentSource,
    #[serde(default)]
    pub failure_policy: FailurePolicyConfig,
    /// Artifact file stem; defaults to `{exchange}_{symbol}_{date}`.
    #[serde(default)]
    pub output_prefix: Option<String>,
    #[serde(default)]
    pub exchange: Option<String>,
    #[serde(default)]
    pub symbol: Option<String>,
    /// `YYYY-MM-DD`; defaults to the UTC date of the first batch.
    #[serde(default)]
    pub date: Option<String>,
}

impl CompileConfig {
    pub fn new(instrument: InstrumentSource) -> Self {
        Self {
            instrument,
            failure_policy: FailurePolicyConfig::default(),
            output_prefix: None,
            exchange: None,
            symbol: None,
            date: None,
        }
    }

    pub fn explicit(price_increment: &str, amount_increment: &str) -> Self {
        Self::new(InstrumentSource::Explicit(InstrumentSpec::new(
            price_increment,
            amount_increment,
        )))
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicyConfig) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn with_output_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.output_prefix = Some(prefix.into());
        self
    }
}

// =============================================================================
// REPLAY
// =============================================================================

/// How an open position is valued at each equity point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkPolicy {
    /// Book mid, floored.
    #[default]
    Mid,
    /// Best bid for longs, best ask for shorts.
    Liquidation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyConfig {
    pub name: String,
    #[serde(default)]
    pub params: BTreeMap<String, i64>,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            name: "dummy".to_string(),
            params: BTreeMap::new(),
        }
    }
}

impl StrategyConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: BTreeMap::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: i64) -> Self {
        self.params.insert(key.into(), value);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayConfig {
    #[serde(default)]
    pub strategy: StrategyConfig,
    #[serde(default)]
    pub fee_bps: i64,
    #[serde(default)]
    pub initial_cash: QuoteAtoms,
    #[serde(default)]
    pub initial_position: Lots,
    #[serde(default = "default_true")]
    pub allow_short: bool,
    #[serde(default = "default_true")]
    pub allow_margin: bool,
    #[serde(default)]
    pub mark_policy: MarkPolicy,
    #[serde(default)]
    pub failure_policy: FailurePolicyConfig,
    /// Label stamped on fills; defaults to the manifest symbol.
    #[serde(default)]
    pub instrument_label: Option<String>,
    /// Seek to the first batch at or after this receive time.
    #[serde(default)]
    pub start_ts_ns: Option<Nanos>,
    /// Where skipped batches are written in quarantine mode; defaults to
    /// `{prefix}.replay.quarantine.jsonl` next to the event log.
    #[serde(default)]
    pub quarantine_path: Option<PathBuf>,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            strategy: StrategyConfig::default(),
            fee_bps: 0,
            initial_cash: 0,
            initial_position: 0,
            allow_short: true,
            allow_margin: true,
            mark_policy: MarkPolicy::Mid,
            failure_policy: FailurePolicyConfig::default(),
            instrument_label: None,
            start_ts_ns: None,
            quarantine_path: None,
        }
    }
}

impl ReplayConfig {
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.initial_cash <= 0 {
            return Err(PipelineError::invalid_config(format!(
                "initial_cash must be positive, got {}",
                self.initial_cash
            )));
        }
        if !(0..=MAX_FEE_BPS).contains(&self.fee_bps) {
            return Err(PipelineError::invalid_config(format!(
                "fee_bps must be within 0..={}, got {}",
                MAX_FEE_BPS, self.fee_bps
            )));
        }
        self.failure_policy.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_config_from_toml() {
        let cfg: CompileConfig = toml::from_str(
            r#"
            output_prefix = "btc"

            [instrument]
            source = "explicit"
            price_increment = "0.01"
            amount_increment = "0.001"

            [failure_policy]
            mode = "quarantine"
            granularity = "skip_batch"
            "#,
        )
        .unwrap();
        assert_eq!(
            cfg.instrument,
            InstrumentSource::Explicit(InstrumentSpec::new("0.01", "0.001"))
        );
        assert_eq!(cfg.failure_policy.mode, FailureMode::Quarantine);
        assert_eq!(cfg.failure_policy.granularity, QuarantineGranularity::SkipBatch);
        assert_eq!(cfg.failure_policy.max_errors, DEFAULT_MAX_ERRORS);
        assert_eq!(cfg.output_prefix.as_deref(), Some("btc"));
    }

    #[test]
    fn test_replay_config_defaults() {
        let cfg: ReplayConfig = toml::from_str("fee_bps = 5\ninitial_cash = 1000").unwrap();
        assert_eq!(cfg.fee_bps, 5);
        assert_eq!(cfg.quarantine_path, None);
        assert!(cfg.allow_short);
        assert!(cfg.allow_margin);
        assert_eq!(cfg.strategy.name, "dummy");
        assert_eq!(cfg.mark_policy, MarkPolicy::Mid);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_replay_config_rejects_fee_over_100_percent() {
        let cfg = ReplayConfig {
            fee_bps: 10_001,
            initial_cash: 1_000,
            ..ReplayConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_replay_config_requires_positive_cash() {
        for cash in [0, -5] {
            let cfg = ReplayConfig {
                initial_cash: cash,
                ..ReplayConfig::default()
            };
            assert!(matches!(cfg.validate(), Err(PipelineError::InvalidConfig { .. })));
        }
        let funded = ReplayConfig {
            initial_cash: 1,
            ..ReplayConfig::default()
        };
        assert!(funded.validate().is_ok());
    }

    #[test]
    fn test_halt_after_zero_is_invalid() {
        assert!(FailurePolicyConfig::halt_after(0).validate().is_err());
        assert!(FailurePolicyConfig::halt_after(1).validate().is_ok());
    }
}
