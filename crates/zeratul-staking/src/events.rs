//! Append-only observability records
//!
//! Events never feed back into ledger logic. They are collected per call and
//! only published once the call commits.

use crate::types::{Address, Amount, StakeTotals, Timestamp, TokenId, ValidatorId};
use serde::{Deserialize, Serialize};

/// Ledger event
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LedgerEvent {
    // ---- lifecycle ----
    Staked {
        staker: Address,
        validator: ValidatorId,
        amount: Amount,
        before: StakeTotals,
        after: StakeTotals,
    },
    StakedOnBehalf {
        sender: Address,
        beneficiary: Address,
        validator: ValidatorId,
        amount: Amount,
        before: StakeTotals,
        after: StakeTotals,
    },
    Restaked {
        staker: Address,
        validator: ValidatorId,
        amount: Amount,
        before: StakeTotals,
        after: StakeTotals,
    },
    CooldownStarted {
        staker: Address,
        validator: ValidatorId,
        amount: Amount,
        cooldown_end: Timestamp,
        before: StakeTotals,
        after: StakeTotals,
    },
    Withdrawn {
        staker: Address,
        amount: Amount,
        before: StakeTotals,
        after: StakeTotals,
    },
    RewardsRestaked {
        staker: Address,
        validator: ValidatorId,
        amount: Amount,
        before: StakeTotals,
        after: StakeTotals,
    },

    // ---- rewards ----
    RewardClaimedFromValidator {
        user: Address,
        token: TokenId,
        validator: ValidatorId,
        amount: Amount,
    },
    RewardClaimed {
        user: Address,
        token: TokenId,
        amount: Amount,
    },
    RewardTokenAdded {
        token: TokenId,
        rate: u128,
        max_rate: u128,
    },
    RewardTokenRemoved {
        token: TokenId,
    },
    RewardRateSet {
        token: TokenId,
        old_rate: u128,
        new_rate: u128,
    },
    MaxRewardRateSet {
        token: TokenId,
        old_max: u128,
        new_max: u128,
    },

    // ---- commission ----
    CommissionSet {
        validator: ValidatorId,
        old_commission: u128,
        new_commission: u128,
    },
    CommissionClaimRequested {
        validator: ValidatorId,
        token: TokenId,
        amount: Amount,
        recipient: Address,
        requested_at: Timestamp,
    },
    CommissionClaimFinalized {
        validator: ValidatorId,
        token: TokenId,
        amount: Amount,
        recipient: Address,
    },

    // ---- registry ----
    ValidatorAdded {
        validator: ValidatorId,
        admin: Address,
        withdrawal: Address,
        commission: u128,
        max_capacity: Amount,
    },
    ValidatorStatusUpdated {
        validator: ValidatorId,
        active: bool,
    },
    ValidatorCapacityUpdated {
        validator: ValidatorId,
        old_capacity: Amount,
        new_capacity: Amount,
    },
    ValidatorAddressesSet {
        validator: ValidatorId,
        admin: Address,
        withdrawal: Address,
    },

    // ---- slashing ----
    SlashVoteCast {
        target: ValidatorId,
        voter: ValidatorId,
        expires_at: Timestamp,
    },
    ExpiredVotesCleared {
        target: ValidatorId,
        removed: usize,
    },
    ValidatorSlashed {
        validator: ValidatorId,
        slashed_at: Timestamp,
        forfeited_stake: Amount,
        forfeited_cooling: Amount,
    },

    // ---- administration ----
    ParameterUpdated {
        name: String,
        old: String,
        new: String,
    },
    TreasurySet,
}

impl LedgerEvent {
    /// Short name used as the log message
    pub fn name(&self) -> &'static str {
        match self {
            Self::Staked { .. } => "staked",
            Self::StakedOnBehalf { .. } => "staked_on_behalf",
            Self::Restaked { .. } => "restaked",
            Self::CooldownStarted { .. } => "cooldown_started",
            Self::Withdrawn { .. } => "withdrawn",
            Self::RewardsRestaked { .. } => "rewards_restaked",
            Self::RewardClaimedFromValidator { .. } => "reward_claimed_from_validator",
            Self::RewardClaimed { .. } => "reward_claimed",
            Self::RewardTokenAdded { .. } => "reward_token_added",
            Self::RewardTokenRemoved { .. } => "reward_token_removed",
            Self::RewardRateSet { .. } => "reward_rate_set",
            Self::MaxRewardRateSet { .. } => "max_reward_rate_set",
            Self::CommissionSet { .. } => "commission_set",
            Self::CommissionClaimRequested { .. } => "commission_claim_requested",
            Self::CommissionClaimFinalized { .. } => "commission_claim_finalized",
            Self::ValidatorAdded { .. } => "validator_added",
            Self::ValidatorStatusUpdated { .. } => "validator_status_updated",
            Self::ValidatorCapacityUpdated { .. } => "validator_capacity_updated",
            Self::ValidatorAddressesSet { .. } => "validator_addresses_set",
            Self::SlashVoteCast { .. } => "slash_vote_cast",
            Self::ExpiredVotesCleared { .. } => "expired_votes_cleared",
            Self::ValidatorSlashed { .. } => "validator_slashed",
            Self::ParameterUpdated { .. } => "parameter_updated",
            Self::TreasurySet => "treasury_set",
        }
    }
}
