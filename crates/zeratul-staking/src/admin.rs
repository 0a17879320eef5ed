//! Global parameter updates

use crate::config;
use crate::error::{Result, StakingError};
use crate::events::LedgerEvent;
use crate::session::Session;
use crate::types::{Amount, Timestamp};
use serde::{Deserialize, Serialize};

/// One parameter change
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "param", content = "value", rename_all = "snake_case")]
pub enum ParamUpdate {
    MinStake(Amount),
    CooldownInterval(Timestamp),
    MaxAllowedCommission(u128),
    MaxValidatorPercentageBps(u64),
    CommissionClaimTimelock(Timestamp),
    MaxSlashVoteDuration(Timestamp),
}

impl ParamUpdate {
    pub fn name(&self) -> &'static str {
        match self {
            Self::MinStake(_) => "min_stake",
            Self::CooldownInterval(_) => "cooldown_interval",
            Self::MaxAllowedCommission(_) => "max_allowed_commission",
            Self::MaxValidatorPercentageBps(_) => "max_validator_percentage_bps",
            Self::CommissionClaimTimelock(_) => "commission_claim_timelock",
            Self::MaxSlashVoteDuration(_) => "max_slash_vote_duration",
        }
    }
}

impl Session<'_> {
    pub(crate) fn update_parameter(&mut self, update: ParamUpdate) -> Result<()> {
        let highest_commission = self
            .state
            .validators
            .values()
            .filter(|v| !v.slashed)
            .map(|v| v.commission)
            .max()
            .unwrap_or(0);

        let cfg = &mut self.state.config;
        let (old, new) = match update {
            ParamUpdate::MinStake(value) => {
                config::check_min_stake(value)?;
                (std::mem::replace(&mut cfg.min_stake, value).to_string(), value.to_string())
            }
            ParamUpdate::CooldownInterval(value) => {
                config::check_cooldown_interval(value)?;
                (std::mem::replace(&mut cfg.cooldown_interval, value).to_string(), value.to_string())
            }
            ParamUpdate::MaxAllowedCommission(value) => {
                config::check_max_commission(value)?;
                if value < highest_commission {
                    return Err(StakingError::CommissionExceedsMax { rate: highest_commission, max: value });
                }
                (std::mem::replace(&mut cfg.max_allowed_commission, value).to_string(), value.to_string())
            }
            ParamUpdate::MaxValidatorPercentageBps(value) => {
                config::check_max_validator_percentage(value)?;
                (std::mem::replace(&mut cfg.max_validator_percentage_bps, value).to_string(), value.to_string())
            }
            ParamUpdate::CommissionClaimTimelock(value) => {
                (std::mem::replace(&mut cfg.commission_claim_timelock, value).to_string(), value.to_string())
            }
            ParamUpdate::MaxSlashVoteDuration(value) => {
                config::check_slash_vote_duration(value)?;
                (std::mem::replace(&mut cfg.max_slash_vote_duration, value).to_string(), value.to_string())
            }
        };

        tracing::info!(param = update.name(), %old, %new, "parameter updated");
        self.emit(LedgerEvent::ParameterUpdated { name: update.name().to_string(), old, new });
        Ok(())
    }
}
