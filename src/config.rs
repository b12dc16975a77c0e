use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::ledger::Amount;
use crate::referral::ReferralSchedule;

pub const FIRST_REFERRAL_PERCENTAGE: u8 = 5;
pub const SECOND_REFERRAL_PERCENTAGE: u8 = 3;
pub const MIN_PURCHASE_AMOUNT: Amount = 10_000_000_000_000;
pub const ROUND_DURATION: u64 = 3 * 24 * 60 * 60;
pub const INITIAL_TOKEN_PRICE: Amount = 10_000_000_000_000;
pub const INITIAL_SUPPLY: Amount = 100_000;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {reason}")]
    Read { path: String, reason: String },
    #[error("cannot parse config: {0}")]
    Parse(String),
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error("referral percentages add up to {0}%, more than the whole payment")]
    ReferralTooHigh(u32),
}

/// Immutable platform parameters, fixed at deployment.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PlatformConfig {
    pub first_referral_percentage: u8,
    pub second_referral_percentage: u8,
    pub min_purchase_amount: Amount,
    /// Seconds.
    pub round_duration: u64,
    pub token_price: Amount,
    pub supply: Amount,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            first_referral_percentage: FIRST_REFERRAL_PERCENTAGE,
            second_referral_percentage: SECOND_REFERRAL_PERCENTAGE,
            min_purchase_amount: MIN_PURCHASE_AMOUNT,
            round_duration: ROUND_DURATION,
            token_price: INITIAL_TOKEN_PRICE,
            supply: INITIAL_SUPPLY,
        }
    }
}

impl PlatformConfig {
    pub fn with_supply(supply: Amount) -> Self {
        Self {
            supply,
            ..Self::default()
        }
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let bytes = fs::read(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let config: Self =
            serde_json::from_slice(&bytes).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.token_price == 0 {
            return Err(ConfigError::Zero("token_price"));
        }
        if self.round_duration == 0 {
            return Err(ConfigError::Zero("round_duration"));
        }
        if self.supply == 0 {
            return Err(ConfigError::Zero("supply"));
        }
        let referral_total =
            u32::from(self.first_referral_percentage) + u32::from(self.second_referral_percentage);
        if referral_total > 100 {
            return Err(ConfigError::ReferralTooHigh(referral_total));
        }
        Ok(())
    }

    pub fn referral_schedule(&self) -> ReferralSchedule {
        ReferralSchedule::new(vec![
            self.first_referral_percentage,
            self.second_referral_percentage,
        ])
    }
}
