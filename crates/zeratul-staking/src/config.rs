//! Global parameters gating the ledger
//!
//! Loaded from TOML, all fields optional:
//!
//! ```toml
//! min_stake = "1000000000000000000"
//! cooldown_interval = 604800
//! max_allowed_commission = "500000000000000000"
//! max_validator_percentage_bps = 0
//! commission_claim_timelock = 604800
//! max_slash_vote_duration = 86400
//! ```
//!
//! Large amounts are written as strings because TOML integers stop at i64.

use crate::error::{Result, StakingError};
use crate::types::{Amount, Timestamp, BPS_DENOMINATOR, REWARD_PRECISION};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::path::Path;

/// One day in seconds
pub const DAY: Timestamp = 86_400;

/// Ledger parameters
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StakingConfig {
    /// Smallest amount accepted by stake, stake-on-behalf and reward restake
    #[serde(with = "amount_str")]
    pub min_stake: Amount,
    /// Seconds unstaked principal spends cooling
    pub cooldown_interval: Timestamp,
    /// Upper bound for validator commission (scaled by REWARD_PRECISION)
    #[serde(with = "amount_str")]
    pub max_allowed_commission: u128,
    /// Largest share of total stake one validator may hold (bps, 0 = off)
    pub max_validator_percentage_bps: u64,
    /// Seconds between requesting and finalizing a commission claim
    pub commission_claim_timelock: Timestamp,
    /// Longest lifetime of a slash vote
    pub max_slash_vote_duration: Timestamp,
}

impl Default for StakingConfig {
    fn default() -> Self {
        Self {
            min_stake: REWARD_PRECISION,
            cooldown_interval: 7 * DAY,
            max_allowed_commission: REWARD_PRECISION / 2,
            max_validator_percentage_bps: 0,
            commission_claim_timelock: 7 * DAY,
            max_slash_vote_duration: DAY,
        }
    }
}

impl StakingConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s).map_err(|e| StakingError::InvalidParameter {
            name: "config",
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| StakingError::InvalidParameter {
            name: "config",
            reason: format!("{}: {e}", path.display()),
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| StakingError::InvalidParameter {
            name: "config",
            reason: e.to_string(),
        })
    }

    pub fn validate(&self) -> Result<()> {
        check_min_stake(self.min_stake)?;
        check_cooldown_interval(self.cooldown_interval)?;
        check_max_commission(self.max_allowed_commission)?;
        check_max_validator_percentage(self.max_validator_percentage_bps)?;
        check_slash_vote_duration(self.max_slash_vote_duration)?;
        Ok(())
    }
}

pub(crate) fn check_min_stake(value: Amount) -> Result<()> {
    if value == 0 {
        return Err(invalid("min_stake", "must be greater than zero"));
    }
    Ok(())
}

pub(crate) fn check_cooldown_interval(value: Timestamp) -> Result<()> {
    if value == 0 {
        return Err(invalid("cooldown_interval", "must be greater than zero"));
    }
    Ok(())
}

pub(crate) fn check_max_commission(value: u128) -> Result<()> {
    if value > REWARD_PRECISION {
        return Err(invalid("max_allowed_commission", "cannot exceed 100%"));
    }
    Ok(())
}

pub(crate) fn check_max_validator_percentage(value: u64) -> Result<()> {
    if value as u128 > BPS_DENOMINATOR {
        return Err(invalid("max_validator_percentage_bps", "cannot exceed 10000"));
    }
    Ok(())
}

pub(crate) fn check_slash_vote_duration(value: Timestamp) -> Result<()> {
    if value == 0 {
        return Err(invalid("max_slash_vote_duration", "must be greater than zero"));
    }
    Ok(())
}

fn invalid(name: &'static str, reason: &str) -> StakingError {
    StakingError::InvalidParameter { name, reason: reason.to_string() }
}

/// u128 as decimal string, also accepting plain integers; binary formats
/// carry the raw integer
mod amount_str {
    use super::*;

    pub fn serialize<S: Serializer>(value: &u128, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&value.to_string())
        } else {
            serializer.serialize_u128(*value)
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<u128, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Str(String),
            Int(u64),
        }

        if !deserializer.is_human_readable() {
            return u128::deserialize(deserializer);
        }
        match Repr::deserialize(deserializer)? {
            Repr::Str(s) => s.parse().map_err(serde::de::Error::custom),
            Repr::Int(n) => Ok(n as u128),
        }
    }
}
