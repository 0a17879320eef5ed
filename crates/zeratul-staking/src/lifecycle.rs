//! Staking lifecycle
//!
//! Principal moves through four states per (user, validator):
//!
//! ```text
//!   stake / restake            unstake             cooldown elapsed      withdraw
//! ──────────────────▶ staked ──────────▶ cooling ─────────────────▶ parked ────────▶ out
//!                       ▲                   │
//!                       └──── restake ──────┘
//! ```
//!
//! A pair holds at most one cooling tranche. Unstaking while it still cools
//! merges into it and resets maturity to the newest unstake; unstaking after
//! it matured parks the old tranche first. Every stake change settles the
//! pair's rewards at the old stake before touching any counter.

use crate::error::{Result, StakingError};
use crate::events::LedgerEvent;
use crate::math::{checked_add, checked_sub};
use crate::session::{Payout, Session};
use crate::types::*;

impl Session<'_> {
    // ========================================================================
    // Entry points
    // ========================================================================

    pub(crate) fn stake(&mut self, staker: Address, validator: ValidatorId, amount: Amount) -> Result<()> {
        self.check_min_stake(amount)?;
        self.admit_stake(validator, amount)?;
        let (before, after) = self.credit_stake(staker, validator, amount)?;
        self.emit(LedgerEvent::Staked { staker, validator, amount, before, after });
        Ok(())
    }

    pub(crate) fn stake_on_behalf(
        &mut self,
        sender: Address,
        beneficiary: Address,
        validator: ValidatorId,
        amount: Amount,
    ) -> Result<()> {
        if beneficiary.is_zero() {
            return Err(StakingError::ZeroAddress("beneficiary"));
        }
        self.check_min_stake(amount)?;
        self.admit_stake(validator, amount)?;
        let (before, after) = self.credit_stake(beneficiary, validator, amount)?;
        self.emit(LedgerEvent::StakedOnBehalf { sender, beneficiary, validator, amount, before, after });
        Ok(())
    }

    /// Return principal from the pair's cooling tranche to active stake
    pub(crate) fn restake(&mut self, staker: Address, validator: ValidatorId, amount: Amount) -> Result<()> {
        if amount == 0 {
            return Err(StakingError::ZeroAmount);
        }
        let available = self.state.cooldowns.get(&(staker, validator)).map_or(0, |c| c.amount);
        if available < amount {
            return Err(StakingError::InsufficientCooling { requested: amount, available });
        }
        self.admit_stake(validator, amount)?;

        // release from cooling without disturbing the tranche's maturity
        let key = (staker, validator);
        if available == amount {
            self.state.cooldowns.remove(&key);
        } else if let Some(entry) = self.state.cooldowns.get_mut(&key) {
            entry.amount -= amount;
        }
        let v = self.state.validator_mut(validator)?;
        v.cooling = checked_sub(v.cooling, amount, "validator cooling")?;
        self.state.total_cooling = checked_sub(self.state.total_cooling, amount, "total cooling")?;
        self.state.update_totals(staker, |t| {
            t.cooling = checked_sub(t.cooling, amount, "user cooling")?;
            Ok(())
        })?;

        let (before, _) = self.credit_stake(staker, validator, amount)?;
        // report cooling as it was before the tranche shrank
        let before = StakeTotals { cooling: before.cooling + amount, ..before };
        let after = self.state.totals(staker);
        self.emit(LedgerEvent::Restaked { staker, validator, amount, before, after });
        Ok(())
    }

    /// Start cooling `amount` (default: everything staked with `validator`)
    pub(crate) fn unstake(&mut self, staker: Address, validator: ValidatorId, amount: Option<Amount>) -> Result<()> {
        let v = self.state.validator(validator)?;
        if v.slashed {
            return Err(StakingError::ValidatorSlashed(validator));
        }

        let staked = self.state.pair_stake(staker, validator);
        let amount = match amount {
            Some(0) => return Err(StakingError::ZeroAmount),
            Some(amount) => amount,
            None if staked == 0 => return Err(StakingError::NoActiveStake(validator)),
            None => staked,
        };
        if amount > staked {
            return Err(StakingError::InsufficientStake { requested: amount, available: staked });
        }

        let before = self.state.totals(staker);
        self.settle_pair(staker, validator)?;

        let key = (staker, validator);
        if self.state.cooldowns.get(&key).is_some_and(|c| c.is_matured(self.now)) {
            let parked = self.state.park_tranche(staker, validator)?;
            tracing::debug!(%staker, validator, parked, "parked matured tranche before new cooldown");
        }

        let cooldown_end = self
            .now
            .checked_add(self.state.config.cooldown_interval)
            .ok_or(StakingError::ArithmeticOverflow("cooldown end"))?;
        let entry = self.state.cooldowns.get_or_default(key);
        entry.amount = checked_add(entry.amount, amount, "tranche")?;
        entry.cooldown_end = cooldown_end;

        self.state.sub_pair_stake(staker, validator, amount)?;
        let v = self.state.validator_mut(validator)?;
        v.delegated = checked_sub(v.delegated, amount, "validator delegated")?;
        v.cooling = checked_add(v.cooling, amount, "validator cooling")?;
        self.state.total_staked = checked_sub(self.state.total_staked, amount, "total staked")?;
        self.state.total_cooling = checked_add(self.state.total_cooling, amount, "total cooling")?;
        let (_, after) = self.state.update_totals(staker, |t| {
            t.staked = checked_sub(t.staked, amount, "user staked")?;
            t.cooling = checked_add(t.cooling, amount, "user cooling")?;
            Ok(())
        })?;
        self.prune_rewards(staker, validator);

        self.emit(LedgerEvent::CooldownStarted { staker, validator, amount, cooldown_end, before, after });
        Ok(())
    }

    /// Park every matured tranche and pay out the caller's whole parked balance
    pub(crate) fn withdraw(&mut self, staker: Address) -> Result<Amount> {
        let before = self.state.totals(staker);
        self.flush_matured(staker)?;

        let amount = self.state.totals(staker).parked;
        if amount == 0 {
            return Err(StakingError::NothingWithdrawable);
        }
        self.state.total_parked = checked_sub(self.state.total_parked, amount, "total parked")?;
        let (_, after) = self.state.update_totals(staker, |t| {
            t.parked = 0;
            Ok(())
        })?;

        self.pay(Payout::Principal { recipient: staker, amount });
        self.emit(LedgerEvent::Withdrawn { staker, amount, before, after });
        Ok(amount)
    }

    /// Compound every native-token reward balance into new stake with `validator`
    pub(crate) fn restake_rewards(&mut self, staker: Address, validator: ValidatorId) -> Result<Amount> {
        let before = self.state.totals(staker);
        self.flush_matured(staker)?;

        if !self.state.reward_tokens.contains_key(&TokenId::NATIVE) {
            return Err(StakingError::NoRewardsToRestake);
        }
        let mut total: Amount = 0;
        for source in self.state.reward_sources(staker, TokenId::NATIVE) {
            let taken = self.take_reward(staker, source, TokenId::NATIVE)?;
            total = checked_add(total, taken, "restaked rewards")?;
        }
        if total == 0 {
            return Err(StakingError::NoRewardsToRestake);
        }
        self.check_min_stake(total)?;
        self.admit_stake(validator, total)?;

        let (_, after) = self.credit_stake(staker, validator, total)?;
        self.pay(Payout::Reward { token: TokenId::NATIVE, amount: total, recipient: Address::STAKING_POOL });
        self.emit(LedgerEvent::RewardsRestaked { staker, validator, amount: total, before, after });
        Ok(total)
    }

    // ========================================================================
    // Shared steps
    // ========================================================================

    fn check_min_stake(&self, amount: Amount) -> Result<()> {
        if amount == 0 {
            return Err(StakingError::ZeroAmount);
        }
        let minimum = self.state.config.min_stake;
        if amount < minimum {
            return Err(StakingError::BelowMinimumStake { amount, minimum });
        }
        Ok(())
    }

    /// Validator-side admission: live, under capacity, under its share of
    /// total stake after the deposit
    fn admit_stake(&self, validator: ValidatorId, amount: Amount) -> Result<()> {
        let v = self.state.validator(validator)?;
        if v.slashed {
            return Err(StakingError::ValidatorSlashed(validator));
        }
        if !v.active {
            return Err(StakingError::ValidatorInactive(validator));
        }

        let delegated = checked_add(v.delegated, amount, "validator delegated")?;
        if v.max_capacity > 0 && delegated > v.max_capacity {
            return Err(StakingError::ExceedsValidatorCapacity { validator, delegated, capacity: v.max_capacity });
        }

        let max_bps = self.state.config.max_validator_percentage_bps as u128;
        // exempt while nothing is staked: the first stake always holds 100%
        if max_bps > 0 && self.state.total_staked > 0 {
            let total = checked_add(self.state.total_staked, amount, "total staked")?;
            let share = delegated
                .checked_mul(BPS_DENOMINATOR)
                .ok_or(StakingError::ArithmeticOverflow("validator share"))?;
            let limit = total.checked_mul(max_bps).ok_or(StakingError::ArithmeticOverflow("share limit"))?;
            if share > limit {
                return Err(StakingError::ExceedsValidatorPercentage {
                    validator,
                    share_bps: share / total,
                    max_bps,
                });
            }
        }
        Ok(())
    }

    /// Settle the pair at its old stake, then add `amount` to every counter
    fn credit_stake(
        &mut self,
        user: Address,
        validator: ValidatorId,
        amount: Amount,
    ) -> Result<(StakeTotals, StakeTotals)> {
        self.settle_pair(user, validator)?;

        self.state.add_pair_stake(user, validator, amount)?;
        let v = self.state.validator_mut(validator)?;
        v.delegated = checked_add(v.delegated, amount, "validator delegated")?;
        self.state.total_staked = checked_add(self.state.total_staked, amount, "total staked")?;
        self.state.update_totals(user, |t| {
            t.staked = checked_add(t.staked, amount, "user staked")?;
            Ok(())
        })
    }

    /// Park each tranche that matured while its validator was still
    /// unslashed; drops associations that became empty
    pub(crate) fn flush_matured(&mut self, user: Address) -> Result<Amount> {
        let mut parked: Amount = 0;
        for validator in self.state.associated_validators(user) {
            let Some(entry) = self.state.cooldowns.get(&(user, validator)).copied() else {
                continue;
            };
            if !entry.is_matured(self.now) {
                continue;
            }
            let v = self.state.validator(validator)?;
            if v.slashed && entry.cooldown_end >= v.slashed_at {
                continue;
            }
            parked = checked_add(parked, self.state.park_tranche(user, validator)?, "parked")?;
            self.state.dissociate_if_empty(user, validator);
        }
        Ok(parked)
    }
}
