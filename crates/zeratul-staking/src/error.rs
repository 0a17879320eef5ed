//! Staking ledger error types

use crate::types::{Address, Amount, Role, Timestamp, TokenId, ValidatorId};

/// Failure class of a rejected call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Caller-correctable input problem
    Validation,
    /// Wrong caller for a gated operation
    Authorization,
    /// Ledger state does not allow the operation
    StateConflict,
    /// Transfer failure or broken accounting, not retriable
    Fatal,
}

/// Errors returned by ledger operations. A call that returns an error has
/// left the ledger exactly as it found it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StakingError {
    // validation
    #[error("amount must be greater than zero")]
    ZeroAmount,

    #[error("stake amount {amount} below minimum {minimum}")]
    BelowMinimumStake { amount: Amount, minimum: Amount },

    #[error("validator {0} not found")]
    ValidatorNotFound(ValidatorId),

    #[error("validator {0} already exists")]
    ValidatorAlreadyExists(ValidatorId),

    #[error("reward token {0} not found")]
    TokenNotFound(TokenId),

    #[error("reward token {0} is already listed")]
    TokenAlreadyExists(TokenId),

    #[error("reward token {0} is not active")]
    TokenInactive(TokenId),

    #[error("null address not allowed for {0}")]
    ZeroAddress(&'static str),

    #[error("array length mismatch: {left} vs {right}")]
    ArrayLengthMismatch { left: usize, right: usize },

    #[error("empty input array")]
    EmptyArray,

    #[error("commission {rate} exceeds maximum {max}")]
    CommissionExceedsMax { rate: u128, max: u128 },

    #[error("reward rate {rate} exceeds maximum {max}")]
    RateExceedsMax { rate: u128, max: u128 },

    #[error("invalid parameter {name}: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error("vote expiration {expires_at} outside ({now}, {latest}]")]
    InvalidVoteExpiration { expires_at: Timestamp, now: Timestamp, latest: Timestamp },

    #[error("validator cannot vote against itself")]
    SelfVote,

    // authorization
    #[error("{caller} lacks role {role:?}")]
    Unauthorized { role: Role, caller: Address },

    #[error("{caller} is not the admin of validator {validator}")]
    NotValidatorAdmin { validator: ValidatorId, caller: Address },

    #[error("{0} is not the admin of any validator")]
    NotAValidatorAdmin(Address),

    // state conflicts
    #[error("validator {0} is inactive")]
    ValidatorInactive(ValidatorId),

    #[error("validator {0} is slashed")]
    ValidatorSlashed(ValidatorId),

    #[error("slashed validator {0} cannot be reactivated")]
    CannotReactivateSlashed(ValidatorId),

    #[error("admin {0} is already bound to a validator")]
    AdminAlreadyAssigned(Address),

    #[error("insufficient stake: requested {requested}, available {available}")]
    InsufficientStake { requested: Amount, available: Amount },

    #[error("insufficient cooling balance: requested {requested}, available {available}")]
    InsufficientCooling { requested: Amount, available: Amount },

    #[error("no active stake with validator {0}")]
    NoActiveStake(ValidatorId),

    #[error("nothing withdrawable")]
    NothingWithdrawable,

    #[error("no rewards to claim")]
    NoRewardsToClaim,

    #[error("no rewards to restake")]
    NoRewardsToRestake,

    #[error("delegation {delegated} would exceed capacity {capacity} of validator {validator}")]
    ExceedsValidatorCapacity { validator: ValidatorId, delegated: Amount, capacity: Amount },

    #[error("validator {validator} would hold {share_bps} bps of total stake, limit {max_bps}")]
    ExceedsValidatorPercentage { validator: ValidatorId, share_bps: u128, max_bps: u128 },

    #[error("no commission accrued for validator {validator} in {token}")]
    NoCommissionToClaim { validator: ValidatorId, token: TokenId },

    #[error("commission claim already pending for validator {validator} in {token}")]
    PendingClaimExists { validator: ValidatorId, token: TokenId },

    #[error("no pending commission claim for validator {validator} in {token}")]
    NoPendingClaim { validator: ValidatorId, token: TokenId },

    #[error("commission claim not ready until {ready_at}")]
    ClaimTimelockActive { ready_at: Timestamp },

    #[error("validator {voter} already has an unexpired vote against {target}")]
    AlreadyVoted { voter: ValidatorId, target: ValidatorId },

    #[error("voter validator {0} is not active")]
    VoterNotEligible(ValidatorId),

    #[error("slashing validator {0} requires at least one active peer")]
    NoEligibleVoters(ValidatorId),

    #[error("unanimity not reached: {votes} of {required} votes")]
    UnanimityNotReached { votes: usize, required: usize },

    #[error("treasury not configured")]
    TreasuryNotConfigured,

    #[error("re-entrant call rejected")]
    Reentrancy,

    // fatal
    #[error("treasury payout failed: {0}")]
    TreasuryFailure(String),

    #[error("base asset transfer failed: {0}")]
    TransferFailed(String),

    #[error("arithmetic overflow in {0}")]
    ArithmeticOverflow(&'static str),

    #[error("accounting inconsistency: {0}")]
    AccountingInconsistency(String),
}

impl StakingError {
    /// Classify for callers that only care whether to fix input, retry as
    /// someone else, wait, or give up
    pub fn kind(&self) -> ErrorKind {
        use StakingError::*;
        match self {
            ZeroAmount
            | BelowMinimumStake { .. }
            | ValidatorNotFound(_)
            | ValidatorAlreadyExists(_)
            | TokenNotFound(_)
            | TokenAlreadyExists(_)
            | TokenInactive(_)
            | ZeroAddress(_)
            | ArrayLengthMismatch { .. }
            | EmptyArray
            | CommissionExceedsMax { .. }
            | RateExceedsMax { .. }
            | InvalidParameter { .. }
            | InvalidVoteExpiration { .. }
            | SelfVote => ErrorKind::Validation,

            Unauthorized { .. } | NotValidatorAdmin { .. } | NotAValidatorAdmin(_) => {
                ErrorKind::Authorization
            }

            TreasuryFailure(_)
            | TransferFailed(_)
            | ArithmeticOverflow(_)
            | AccountingInconsistency(_) => ErrorKind::Fatal,

            _ => ErrorKind::StateConflict,
        }
    }
}

pub type Result<T> = std::result::Result<T, StakingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(StakingError::ZeroAmount.kind(), ErrorKind::Validation);
        assert_eq!(
            StakingError::Unauthorized { role: Role::Admin, caller: Address::ZERO }.kind(),
            ErrorKind::Authorization
        );
        assert_eq!(StakingError::NothingWithdrawable.kind(), ErrorKind::StateConflict);
        assert_eq!(StakingError::Reentrancy.kind(), ErrorKind::StateConflict);
        assert_eq!(StakingError::TransferFailed("x".into()).kind(), ErrorKind::Fatal);
    }

    #[test]
    fn test_error_messages() {
        let err = StakingError::UnanimityNotReached { votes: 1, required: 2 };
        assert_eq!(err.to_string(), "unanimity not reached: 1 of 2 votes");
        assert_eq!(StakingError::NothingWithdrawable.to_string(), "nothing withdrawable");
    }
}
