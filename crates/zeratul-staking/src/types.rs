//! Core ledger types
//!
//! Identities, units and the records kept by the ledger state store.
//! Amounts are plain integers; rates and commissions are fixed point
//! scaled by [`REWARD_PRECISION`].

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Token amount (base asset or reward token units)
pub type Amount = u128;

/// Unix timestamp in seconds
pub type Timestamp = u64;

/// Validator identifier
pub type ValidatorId = u16;

/// Fixed-point scale for rates, commissions and reward indices (1e18 = 1.0)
pub const REWARD_PRECISION: u128 = 1_000_000_000_000_000_000;

/// Denominator for percentage-of-total-stake limits
pub const BPS_DENOMINATOR: u128 = 10_000;

// ============================================================================
// Identities
// ============================================================================

/// 32-byte principal identity (user, validator admin, withdrawal target)
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Address(pub [u8; 32]);

impl Address {
    /// Null identity, never a valid admin or recipient
    pub const ZERO: Address = Address([0u8; 32]);

    /// Custody account the treasury pays restaked native rewards into
    pub const STAKING_POOL: Address = Address([0xff; 32]);

    /// Build an address whose every byte is `byte` (handy for fixtures)
    pub const fn repeat(byte: u8) -> Self {
        Address([byte; 32])
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // first 4 bytes are enough to tell fixtures apart in logs
        write!(f, "Address({}..)", hex::encode(&self.0[..4]))
    }
}

impl FromStr for Address {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s.trim_start_matches("0x"), &mut bytes)?;
        Ok(Address(bytes))
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&hex::encode(self.0))
        } else {
            self.0.serialize(serializer)
        }
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            s.parse().map_err(de::Error::custom)
        } else {
            <[u8; 32]>::deserialize(deserializer).map(Address)
        }
    }
}

/// Reward token identifier
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TokenId(pub u32);

impl TokenId {
    /// The base asset, distributed as a reward like any other token
    pub const NATIVE: TokenId = TokenId(0);

    pub fn is_native(&self) -> bool {
        *self == Self::NATIVE
    }
}

impl fmt::Display for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_native() {
            write!(f, "native")
        } else {
            write!(f, "token#{}", self.0)
        }
    }
}

/// Privileged roles checked through the [`crate::Authorizer`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Role {
    /// Global parameters and treasury configuration
    Admin,
    /// Validator registration, capacity and status
    ValidatorManager,
    /// Reward token listing and rates
    RewardManager,
    /// Executes slashing once unanimity is reached
    Slasher,
}

// ============================================================================
// Validators
// ============================================================================

/// Registered delegate
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validator {
    pub id: ValidatorId,
    /// Identity allowed to manage commission and claims
    pub admin: Address,
    /// Recipient of commission payouts
    pub withdrawal: Address,
    /// Fraction retained from delegated rewards (scaled by REWARD_PRECISION)
    pub commission: u128,
    /// Active stake delegated to this validator
    pub delegated: Amount,
    /// Principal currently cooling down from this validator
    pub cooling: Amount,
    /// Maximum delegated amount (0 = unlimited)
    pub max_capacity: Amount,
    pub active: bool,
    pub slashed: bool,
    /// Slash instant, 0 while unslashed
    pub slashed_at: Timestamp,
    pub added_at: Timestamp,
}

impl Validator {
    /// Accepts new stake
    pub fn is_live(&self) -> bool {
        self.active && !self.slashed
    }
}

// ============================================================================
// Stakes
// ============================================================================

/// Per-user totals across all validators
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakeTotals {
    pub staked: Amount,
    pub cooling: Amount,
    pub parked: Amount,
}

impl StakeTotals {
    pub fn is_empty(&self) -> bool {
        self.staked == 0 && self.cooling == 0 && self.parked == 0
    }
}

/// The single live cooling tranche of a (user, validator) pair
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CooldownEntry {
    pub amount: Amount,
    pub cooldown_end: Timestamp,
}

impl CooldownEntry {
    pub fn is_matured(&self, now: Timestamp) -> bool {
        now >= self.cooldown_end
    }
}

/// Cooling tranche view returned to callers
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CooldownView {
    pub validator: ValidatorId,
    pub amount: Amount,
    pub cooldown_end: Timestamp,
}

// ============================================================================
// Rewards
// ============================================================================

/// Reward token listing
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardTokenConfig {
    pub token: TokenId,
    /// Reward per staked unit per second (scaled by REWARD_PRECISION)
    pub rate: u128,
    pub max_rate: u128,
    pub active: bool,
}

/// Rate change marker; `cumulative_index` is only meaningful on
/// per-validator checkpoints
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateCheckpoint {
    pub timestamp: Timestamp,
    pub rate: u128,
    pub cumulative_index: u128,
}

/// Commission change marker
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommissionCheckpoint {
    pub timestamp: Timestamp,
    pub rate: u128,
}

/// Lazily advanced reward state of one (validator, token)
///
/// The validator's own rate history lives beside it in the ledger, so
/// touching this record stays constant-size however long that history grows.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorRewardState {
    /// Net reward per staked unit since registration (scaled)
    pub cumulative_index: u128,
    pub last_update: Timestamp,
    /// Next unprocessed entry of the token's global checkpoint list
    pub cursor: usize,
}

/// Settlement snapshot of one (user, validator, token)
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRewardState {
    pub paid_index: u128,
    pub paid_at: Timestamp,
    /// Settled but unclaimed reward
    pub accrued: Amount,
}

// ============================================================================
// Commission claims and slashing votes
// ============================================================================

/// Outstanding two-phase commission claim
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingCommissionClaim {
    pub amount: Amount,
    pub requested_at: Timestamp,
    pub recipient: Address,
}

/// Vote of one validator against another
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlashVote {
    pub voter: ValidatorId,
    pub expires_at: Timestamp,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_hex_roundtrip_through_json() {
        let addr = Address::repeat(0xab);
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, format!("\"{}\"", "ab".repeat(32)));
        let back: Address = serde_json::from_str(&json).unwrap();
        assert_eq!(back, addr);
    }

    #[test]
    fn test_address_parse_accepts_0x_prefix() {
        let s = format!("0x{}", "01".repeat(32));
        assert_eq!(s.parse::<Address>().unwrap(), Address::repeat(1));
        assert!("zz".parse::<Address>().is_err());
    }

    #[test]
    fn test_cooldown_maturity_is_inclusive() {
        let entry = CooldownEntry { amount: 5, cooldown_end: 100 };
        assert!(!entry.is_matured(99));
        assert!(entry.is_matured(100));
    }
}
