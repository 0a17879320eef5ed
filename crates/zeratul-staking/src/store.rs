//! Ledger state store
//!
//! Canonical record of validators, stakes, cooldown tranches, reward token
//! listings, checkpoints and claims. Pure data plus bookkeeping helpers;
//! the rules live in the operation modules.
//!
//! Aggregates are maintained incrementally:
//!
//! ```text
//! total_staked  == Σ validator.delegated == Σ user.staked == Σ pair stake
//! total_cooling == Σ validator.cooling   == Σ user.cooling == Σ tranche
//! total_parked  == Σ user.parked
//! ```
//!
//! Collections are journaled tables. A [`Transaction`] rolls back whatever
//! the call touched unless it commits, so a failed call leaves the ledger
//! as it found it without copying it up front.

use crate::config::StakingConfig;
use crate::error::{Result, StakingError};
use crate::journal::{History, Table};
use crate::math::{checked_add, checked_sub};
use crate::types::*;
use serde::{Deserialize, Serialize};
use std::ops::{Deref, DerefMut};

const ADDRESS_MIN: Address = Address::ZERO;
const ADDRESS_MAX: Address = Address::repeat(0xff);

/// Complete ledger state
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerState {
    pub(crate) config: StakingConfig,

    pub(crate) validators: Table<ValidatorId, Validator>,
    /// Admin identity -> validator it manages (one validator per identity)
    pub(crate) admin_bindings: Table<Address, ValidatorId>,

    pub(crate) total_staked: Amount,
    pub(crate) total_cooling: Amount,
    pub(crate) total_parked: Amount,
    /// Principal lost to slashing
    pub(crate) total_forfeited: Amount,

    pub(crate) user_totals: Table<Address, StakeTotals>,
    pub(crate) pair_stakes: Table<(Address, ValidatorId), Amount>,
    pub(crate) cooldowns: Table<(Address, ValidatorId), CooldownEntry>,
    /// Pairs where the user holds stake or a cooling tranche
    pub(crate) user_validators: Table<(Address, ValidatorId), ()>,
    /// Reverse index used by slashing
    pub(crate) validator_stakers: Table<(ValidatorId, Address), ()>,

    pub(crate) reward_tokens: Table<TokenId, RewardTokenConfig>,
    /// Global rate history per token, strictly increasing timestamps
    pub(crate) rate_checkpoints: History<TokenId, RateCheckpoint>,
    pub(crate) validator_rewards: Table<(ValidatorId, TokenId), ValidatorRewardState>,
    /// Per-validator index at every global rate change it has settled past
    pub(crate) validator_checkpoints: History<(ValidatorId, TokenId), RateCheckpoint>,
    pub(crate) commission_checkpoints: History<ValidatorId, CommissionCheckpoint>,
    pub(crate) accrued_commission: Table<(ValidatorId, TokenId), Amount>,
    pub(crate) user_rewards: Table<(Address, ValidatorId, TokenId), UserRewardState>,

    pub(crate) pending_claims: Table<(ValidatorId, TokenId), PendingCommissionClaim>,
    /// (target, voter) -> expiration
    pub(crate) slash_votes: Table<(ValidatorId, ValidatorId), Timestamp>,
}

/// Scalar fields as they were when a transaction began
#[derive(Debug)]
pub(crate) struct Savepoint {
    config: StakingConfig,
    totals: [Amount; 4],
}

/// Open transaction over the ledger; rolls back on drop unless committed
pub(crate) struct Transaction<'a> {
    state: &'a mut LedgerState,
    savepoint: Option<Savepoint>,
}

impl<'a> Transaction<'a> {
    pub fn begin(state: &'a mut LedgerState) -> Self {
        let savepoint = state.savepoint();
        Self { state, savepoint: Some(savepoint) }
    }

    pub fn commit(mut self) {
        self.savepoint = None;
        self.state.commit();
        debug_assert_eq!(self.state.pending_changes(), 0);
    }
}

impl Deref for Transaction<'_> {
    type Target = LedgerState;

    fn deref(&self) -> &LedgerState {
        self.state
    }
}

impl DerefMut for Transaction<'_> {
    fn deref_mut(&mut self) -> &mut LedgerState {
        self.state
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if let Some(savepoint) = self.savepoint.take() {
            self.state.rollback(savepoint);
        }
    }
}

impl LedgerState {
    /// Empty ledger with the given parameters
    pub fn new(config: StakingConfig) -> Self {
        Self { config, ..Default::default() }
    }

    /// Serialize for persistence
    pub fn encode(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|e| {
            StakingError::AccountingInconsistency(format!("state encoding failed: {e}"))
        })
    }

    /// Restore persisted state, refusing anything that fails the audit
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let state: Self = bincode::deserialize(bytes).map_err(|e| {
            StakingError::AccountingInconsistency(format!("state decoding failed: {e}"))
        })?;
        state.config.validate()?;
        state.check_invariants()?;
        Ok(state)
    }

    // ========================================================================
    // Journal
    // ========================================================================

    fn savepoint(&self) -> Savepoint {
        Savepoint {
            config: self.config.clone(),
            totals: [self.total_staked, self.total_cooling, self.total_parked, self.total_forfeited],
        }
    }

    fn commit(&mut self) {
        self.validators.commit();
        self.admin_bindings.commit();
        self.user_totals.commit();
        self.pair_stakes.commit();
        self.cooldowns.commit();
        self.user_validators.commit();
        self.validator_stakers.commit();
        self.reward_tokens.commit();
        self.rate_checkpoints.commit();
        self.validator_rewards.commit();
        self.validator_checkpoints.commit();
        self.commission_checkpoints.commit();
        self.accrued_commission.commit();
        self.user_rewards.commit();
        self.pending_claims.commit();
        self.slash_votes.commit();
    }

    fn rollback(&mut self, savepoint: Savepoint) {
        self.config = savepoint.config;
        [self.total_staked, self.total_cooling, self.total_parked, self.total_forfeited] = savepoint.totals;
        self.validators.rollback();
        self.admin_bindings.rollback();
        self.user_totals.rollback();
        self.pair_stakes.rollback();
        self.cooldowns.rollback();
        self.user_validators.rollback();
        self.validator_stakers.rollback();
        self.reward_tokens.rollback();
        self.rate_checkpoints.rollback();
        self.validator_rewards.rollback();
        self.validator_checkpoints.rollback();
        self.commission_checkpoints.rollback();
        self.accrued_commission.rollback();
        self.user_rewards.rollback();
        self.pending_claims.rollback();
        self.slash_votes.rollback();
    }

    /// Journal entries not yet committed or rolled back
    pub(crate) fn pending_changes(&self) -> usize {
        self.validators.pending()
            + self.admin_bindings.pending()
            + self.user_totals.pending()
            + self.pair_stakes.pending()
            + self.cooldowns.pending()
            + self.user_validators.pending()
            + self.validator_stakers.pending()
            + self.reward_tokens.pending()
            + self.rate_checkpoints.pending()
            + self.validator_rewards.pending()
            + self.validator_checkpoints.pending()
            + self.commission_checkpoints.pending()
            + self.accrued_commission.pending()
            + self.user_rewards.pending()
            + self.pending_claims.pending()
            + self.slash_votes.pending()
    }

    // ========================================================================
    // Lookups
    // ========================================================================

    pub(crate) fn validator(&self, id: ValidatorId) -> Result<&Validator> {
        self.validators.get(&id).ok_or(StakingError::ValidatorNotFound(id))
    }

    pub(crate) fn validator_mut(&mut self, id: ValidatorId) -> Result<&mut Validator> {
        self.validators.get_mut(&id).ok_or(StakingError::ValidatorNotFound(id))
    }

    pub(crate) fn token(&self, token: TokenId) -> Result<&RewardTokenConfig> {
        self.reward_tokens.get(&token).ok_or(StakingError::TokenNotFound(token))
    }

    pub(crate) fn pair_stake(&self, user: Address, validator: ValidatorId) -> Amount {
        self.pair_stakes.get(&(user, validator)).copied().unwrap_or(0)
    }

    pub(crate) fn totals(&self, user: Address) -> StakeTotals {
        self.user_totals.get(&user).copied().unwrap_or_default()
    }

    pub(crate) fn associated_validators(&self, user: Address) -> Vec<ValidatorId> {
        self.user_validators
            .range((user, ValidatorId::MIN)..=(user, ValidatorId::MAX))
            .map(|(&(_, v), _)| v)
            .collect()
    }

    pub(crate) fn stakers_of(&self, validator: ValidatorId) -> Vec<Address> {
        self.validator_stakers
            .range((validator, ADDRESS_MIN)..=(validator, ADDRESS_MAX))
            .map(|(&(_, u), _)| u)
            .collect()
    }

    /// (voter, expiration) of every vote held against `target`
    pub(crate) fn votes_against(&self, target: ValidatorId) -> Vec<(ValidatorId, Timestamp)> {
        self.slash_votes
            .range((target, ValidatorId::MIN)..=(target, ValidatorId::MAX))
            .map(|(&(_, voter), &expires_at)| (voter, expires_at))
            .collect()
    }

    pub(crate) fn token_ids(&self) -> Vec<TokenId> {
        self.reward_tokens.keys().copied().collect()
    }

    /// Validators the user has any reward record with, including pairs
    /// whose stake is gone but whose rewards were never claimed
    pub(crate) fn reward_validators(&self, user: Address, token: TokenId) -> Vec<ValidatorId> {
        let lo = (user, ValidatorId::MIN, TokenId(u32::MIN));
        let hi = (user, ValidatorId::MAX, TokenId(u32::MAX));
        self.user_rewards
            .range(lo..=hi)
            .filter(|((_, _, t), _)| *t == token)
            .map(|((_, v, _), _)| *v)
            .collect()
    }

    /// Every validator a user may hold `token` rewards with: current
    /// associations plus reward records left behind, ascending and unique
    pub(crate) fn reward_sources(&self, user: Address, token: TokenId) -> Vec<ValidatorId> {
        let mut sources = self.reward_validators(user, token);
        sources.extend(self.associated_validators(user));
        sources.sort_unstable();
        sources.dedup();
        sources
    }

    /// Effective rate of a token at `at` according to the global history
    pub(crate) fn rate_at(&self, token: TokenId, at: Timestamp) -> u128 {
        let cps = self.rate_checkpoints.get(&token);
        let idx = cps.partition_point(|cp| cp.timestamp <= at);
        if idx == 0 { 0 } else { cps[idx - 1].rate }
    }

    // ========================================================================
    // Bookkeeping
    // ========================================================================

    /// Apply `f` to a user's totals, returning the before/after pair
    pub(crate) fn update_totals(
        &mut self,
        user: Address,
        f: impl FnOnce(&mut StakeTotals) -> Result<()>,
    ) -> Result<(StakeTotals, StakeTotals)> {
        let entry = self.user_totals.get_or_default(user);
        let before = *entry;
        f(entry)?;
        let after = *entry;
        if after.is_empty() {
            self.user_totals.remove(&user);
        }
        Ok((before, after))
    }

    pub(crate) fn add_pair_stake(&mut self, user: Address, validator: ValidatorId, amount: Amount) -> Result<()> {
        let current = self.pair_stake(user, validator);
        self.pair_stakes.insert((user, validator), checked_add(current, amount, "pair stake")?);
        self.associate(user, validator);
        Ok(())
    }

    pub(crate) fn sub_pair_stake(&mut self, user: Address, validator: ValidatorId, amount: Amount) -> Result<()> {
        let remaining = checked_sub(self.pair_stake(user, validator), amount, "pair stake")?;
        if remaining == 0 {
            self.pair_stakes.remove(&(user, validator));
        } else {
            self.pair_stakes.insert((user, validator), remaining);
        }
        Ok(())
    }

    pub(crate) fn associate(&mut self, user: Address, validator: ValidatorId) {
        if !self.user_validators.contains_key(&(user, validator)) {
            self.user_validators.insert((user, validator), ());
            self.validator_stakers.insert((validator, user), ());
        }
    }

    /// Drop the association once neither stake nor a tranche remains
    pub(crate) fn dissociate_if_empty(&mut self, user: Address, validator: ValidatorId) {
        if self.pair_stake(user, validator) > 0 || self.cooldowns.contains_key(&(user, validator)) {
            return;
        }
        self.user_validators.remove(&(user, validator));
        self.validator_stakers.remove(&(validator, user));
    }

    /// Move a user's whole tranche with `validator` from cooling to parked
    pub(crate) fn park_tranche(&mut self, user: Address, validator: ValidatorId) -> Result<Amount> {
        let Some(entry) = self.cooldowns.remove(&(user, validator)) else {
            return Ok(0);
        };
        let amount = entry.amount;
        let v = self.validator_mut(validator)?;
        v.cooling = checked_sub(v.cooling, amount, "validator cooling")?;
        self.total_cooling = checked_sub(self.total_cooling, amount, "total cooling")?;
        self.total_parked = checked_add(self.total_parked, amount, "total parked")?;
        self.update_totals(user, |t| {
            t.cooling = checked_sub(t.cooling, amount, "user cooling")?;
            t.parked = checked_add(t.parked, amount, "user parked")?;
            Ok(())
        })?;
        Ok(amount)
    }

    // ========================================================================
    // Audit
    // ========================================================================

    /// Recompute every aggregate from the per-pair records and compare
    pub fn check_invariants(&self) -> Result<()> {
        let fail = |msg: String| Err(StakingError::AccountingInconsistency(msg));

        let sum_validators: Amount = self.validators.values().map(|v| v.delegated).sum();
        let sum_users: Amount = self.user_totals.values().map(|t| t.staked).sum();
        let sum_pairs: Amount = self.pair_stakes.values().sum();
        if sum_validators != self.total_staked || sum_users != self.total_staked || sum_pairs != self.total_staked {
            return fail(format!(
                "staked: total {} validators {} users {} pairs {}",
                self.total_staked, sum_validators, sum_users, sum_pairs
            ));
        }

        let cooling_validators: Amount = self.validators.values().map(|v| v.cooling).sum();
        let cooling_users: Amount = self.user_totals.values().map(|t| t.cooling).sum();
        let cooling_tranches: Amount = self.cooldowns.values().map(|c| c.amount).sum();
        if cooling_validators != self.total_cooling
            || cooling_users != self.total_cooling
            || cooling_tranches != self.total_cooling
        {
            return fail(format!(
                "cooling: total {} validators {} users {} tranches {}",
                self.total_cooling, cooling_validators, cooling_users, cooling_tranches
            ));
        }

        let parked_users: Amount = self.user_totals.values().map(|t| t.parked).sum();
        if parked_users != self.total_parked {
            return fail(format!("parked: total {} users {}", self.total_parked, parked_users));
        }

        for (&user, totals) in self.user_totals.iter() {
            let staked: Amount = self.pair_stakes.range((user, 0)..=(user, ValidatorId::MAX)).map(|(_, a)| *a).sum();
            if staked != totals.staked {
                return fail(format!("user {user} staked {} but pairs hold {staked}", totals.staked));
            }
        }

        // association list == pairs with stake or a tranche
        for (&(user, validator), &amount) in self.pair_stakes.iter() {
            if amount == 0 {
                return fail(format!("zero stake record for {user} / {validator}"));
            }
            if !self.is_associated(user, validator) {
                return fail(format!("{user} staked with {validator} but not associated"));
            }
        }
        for (&(user, validator), entry) in self.cooldowns.iter() {
            if entry.amount == 0 {
                return fail(format!("empty tranche for {user} / {validator}"));
            }
            if !self.is_associated(user, validator) {
                return fail(format!("{user} cooling with {validator} but not associated"));
            }
        }
        for &(user, validator) in self.user_validators.keys() {
            if self.pair_stake(user, validator) == 0 && !self.cooldowns.contains_key(&(user, validator)) {
                return fail(format!("{user} associated with {validator} without stake or tranche"));
            }
        }
        if self.user_validators.len() != self.validator_stakers.len() {
            return fail(format!(
                "reverse index holds {} pairs, forward index {}",
                self.validator_stakers.len(),
                self.user_validators.len()
            ));
        }

        for v in self.validators.values() {
            if v.slashed && (v.active || v.delegated != 0 || v.cooling != 0) {
                return fail(format!("slashed validator {} still holds stake or is active", v.id));
            }
            if v.max_capacity > 0 && v.delegated > v.max_capacity {
                return fail(format!("validator {} above capacity", v.id));
            }
        }

        Ok(())
    }

    fn is_associated(&self, user: Address, validator: ValidatorId) -> bool {
        self.user_validators.contains_key(&(user, validator)) && self.validator_stakers.contains_key(&(validator, user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator(id: ValidatorId) -> Validator {
        Validator {
            id,
            admin: Address::repeat(id as u8 + 1),
            withdrawal: Address::repeat(id as u8 + 1),
            commission: 0,
            delegated: 0,
            cooling: 0,
            max_capacity: 0,
            active: true,
            slashed: false,
            slashed_at: 0,
            added_at: 0,
        }
    }

    #[test]
    fn test_empty_state_is_consistent() {
        LedgerState::default().check_invariants().unwrap();
    }

    #[test]
    fn test_detects_unbalanced_stake() {
        let mut state = LedgerState::default();
        state.validators.insert(1, validator(1));
        state.total_staked = 10;
        assert!(matches!(
            state.check_invariants(),
            Err(StakingError::AccountingInconsistency(_))
        ));
    }

    #[test]
    fn test_association_follows_stake_and_tranche() {
        let user = Address::repeat(9);
        let mut state = LedgerState::default();
        state.validators.insert(1, validator(1));

        state.add_pair_stake(user, 1, 100).unwrap();
        assert_eq!(state.associated_validators(user), vec![1]);

        state.sub_pair_stake(user, 1, 100).unwrap();
        state.cooldowns.insert((user, 1), CooldownEntry { amount: 5, cooldown_end: 10 });
        state.dissociate_if_empty(user, 1);
        assert_eq!(state.associated_validators(user), vec![1]);

        state.cooldowns.remove(&(user, 1));
        state.dissociate_if_empty(user, 1);
        assert!(state.associated_validators(user).is_empty());
        assert!(state.validator_stakers.is_empty());
    }

    #[test]
    fn test_rate_at_uses_latest_checkpoint() {
        let mut state = LedgerState::default();
        let token = TokenId(7);
        state.rate_checkpoints.push(token, RateCheckpoint { timestamp: 10, rate: 1, cumulative_index: 0 });
        state.rate_checkpoints.push(token, RateCheckpoint { timestamp: 20, rate: 2, cumulative_index: 0 });
        assert_eq!(state.rate_at(token, 5), 0);
        assert_eq!(state.rate_at(token, 10), 1);
        assert_eq!(state.rate_at(token, 19), 1);
        assert_eq!(state.rate_at(token, 25), 2);
    }

    #[test]
    fn test_encode_decode() {
        let mut state = LedgerState::new(StakingConfig::default());
        state.validators.insert(3, validator(3));
        let bytes = state.encode().unwrap();
        assert_eq!(LedgerState::decode(&bytes).unwrap(), state);
    }

    #[test]
    fn test_dropped_transaction_restores_state() {
        let user = Address::repeat(9);
        let mut state = LedgerState::default();
        state.validators.insert(1, validator(1));
        state.add_pair_stake(user, 1, 100).unwrap();
        state.commit();
        let before = state.clone();

        {
            let mut tx = Transaction::begin(&mut state);
            tx.total_staked = 500;
            tx.config.min_stake = 42;
            tx.sub_pair_stake(user, 1, 100).unwrap();
            tx.dissociate_if_empty(user, 1);
            tx.add_pair_stake(user, 2, 7).unwrap();
            tx.rate_checkpoints.push(TokenId::NATIVE, RateCheckpoint { timestamp: 1, rate: 1, cumulative_index: 0 });
            tx.validators.remove(&1);
        }

        assert_eq!(state, before);
        assert_eq!(state.pending_changes(), 0);
    }

    #[test]
    fn test_committed_transaction_clears_journal() {
        let user = Address::repeat(9);
        let mut state = LedgerState::default();
        let mut tx = Transaction::begin(&mut state);
        tx.add_pair_stake(user, 1, 100).unwrap();
        tx.commit();

        assert_eq!(state.pair_stake(user, 1), 100);
        assert_eq!(state.stakers_of(1), vec![user]);
        assert_eq!(state.pending_changes(), 0);
    }
}
