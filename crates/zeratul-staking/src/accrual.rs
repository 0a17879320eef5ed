//! Reward accrual engine
//!
//! ## Design:
//!
//! - Each (validator, token) keeps a cumulative net reward-per-unit index,
//!   advanced lazily when someone touches it.
//! - Each (user, validator, token) keeps the index it was last paid up to.
//! - A user's reward is `stake × (index_now − paid_index)`, exact because
//!   every stake change settles the pair first.
//!
//! ## Advancing the index:
//!
//! ```text
//! global rate checkpoints:   r0 ────── t1: r1 ──── t2: r2 ──────
//! validator:          last_update ▲                       now ▲
//!                                 │── r0 ──│── r1 ──│── r2 ──│
//!
//! index += Σ rate_i × dt_i × (1 − commission)
//! commission += Σ delegated × rate_i × dt_i × commission
//! ```
//!
//! Commission and the validator's active flag are constant inside one walk:
//! changing either advances every token first. A slashed validator's walk
//! stops at the slash instant. Nothing divides by total stake, so an empty
//! validator simply accrues nothing.

use crate::error::{Result, StakingError};
use crate::math::{checked_add, checked_sub, mul_div};
use crate::session::Session;
use crate::store::LedgerState;
use crate::types::*;

/// Result of walking a validator's index forward without applying it
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Advance {
    pub index: u128,
    pub commission: Amount,
    pub cursor: usize,
    pub last_update: Timestamp,
    pub checkpoints: Vec<RateCheckpoint>,
}

impl LedgerState {
    /// Walk the token's rate checkpoints from the validator's last update
    /// up to `now`
    pub(crate) fn project_validator(
        &self,
        validator: ValidatorId,
        token: TokenId,
        now: Timestamp,
    ) -> Result<Advance> {
        let v = self.validator(validator)?;
        let vs = self.validator_rewards.get(&(validator, token)).ok_or_else(|| {
            StakingError::AccountingInconsistency(format!(
                "no reward state for validator {validator} in {token}"
            ))
        })?;

        let mut adv = Advance {
            index: vs.cumulative_index,
            commission: 0,
            cursor: vs.cursor,
            last_update: vs.last_update,
            checkpoints: Vec::new(),
        };

        let end = if v.slashed { now.min(v.slashed_at) } else { now };
        if end <= vs.last_update {
            return Ok(adv);
        }

        let cps = self.rate_checkpoints.get(&token);
        let mut rate = if adv.cursor > 0 { cps[adv.cursor - 1].rate } else { 0 };
        let mut from = vs.last_update;

        while adv.cursor < cps.len() && cps[adv.cursor].timestamp <= end {
            let cp = cps[adv.cursor];
            accrue_segment(&mut adv, v, rate, cp.timestamp.saturating_sub(from))?;
            from = from.max(cp.timestamp);
            if cp.rate != rate {
                adv.checkpoints.push(RateCheckpoint {
                    timestamp: from,
                    rate: cp.rate,
                    cumulative_index: adv.index,
                });
            }
            rate = cp.rate;
            adv.cursor += 1;
        }
        accrue_segment(&mut adv, v, rate, end - from)?;
        adv.last_update = end;

        Ok(adv)
    }

    /// Reward owed to a (user, validator) pair if it were settled at `now`
    pub fn pending_reward(
        &self,
        user: Address,
        validator: ValidatorId,
        token: TokenId,
        now: Timestamp,
    ) -> Result<Amount> {
        self.token(token)?;
        let record = self.user_rewards.get(&(user, validator, token)).copied().unwrap_or_default();
        let stake = self.pair_stake(user, validator);
        if stake == 0 {
            return Ok(record.accrued);
        }
        let adv = self.project_validator(validator, token, now)?;
        let earned = earned(stake, adv.index, record.paid_index)?;
        checked_add(record.accrued, earned, "pending reward")
    }

    /// Pending reward across every validator the user has a record with
    pub fn claimable_reward(&self, user: Address, token: TokenId, now: Timestamp) -> Result<Amount> {
        self.token(token)?;
        self.reward_sources(user, token).into_iter().try_fold(0u128, |acc, v| {
            checked_add(acc, self.pending_reward(user, v, token, now)?, "claimable reward")
        })
    }

    /// Validator's accrued commission if settled at `now`
    pub fn accrued_commission_at(&self, validator: ValidatorId, token: TokenId, now: Timestamp) -> Result<Amount> {
        self.token(token)?;
        let stored = self.accrued_commission.get(&(validator, token)).copied().unwrap_or(0);
        let adv = self.project_validator(validator, token, now)?;
        checked_add(stored, adv.commission, "accrued commission")
    }

    /// Cumulative net index of a validator if advanced to `now`
    pub fn reward_index(&self, validator: ValidatorId, token: TokenId, now: Timestamp) -> Result<u128> {
        Ok(self.project_validator(validator, token, now)?.index)
    }
}

fn accrue_segment(adv: &mut Advance, v: &Validator, rate: u128, dt: Timestamp) -> Result<()> {
    if dt == 0 || rate == 0 || !v.is_live() {
        return Ok(());
    }
    let gross_per_unit = rate
        .checked_mul(dt as u128)
        .ok_or(StakingError::ArithmeticOverflow("rate × duration"))?;

    let net_per_unit = mul_div(
        gross_per_unit,
        REWARD_PRECISION - v.commission,
        REWARD_PRECISION,
        "net reward index",
    )?;
    adv.index = checked_add(adv.index, net_per_unit, "reward index")?;

    if v.commission > 0 && v.delegated > 0 {
        let gross = mul_div(v.delegated, gross_per_unit, REWARD_PRECISION, "gross reward")?;
        let commission = mul_div(gross, v.commission, REWARD_PRECISION, "commission")?;
        adv.commission = checked_add(adv.commission, commission, "commission")?;
    }
    Ok(())
}

fn earned(stake: Amount, index: u128, paid_index: u128) -> Result<Amount> {
    let delta = checked_sub(index, paid_index, "reward index")?;
    mul_div(stake, delta, REWARD_PRECISION, "user reward")
}

impl Session<'_> {
    /// Bring a validator's index and commission up to now
    pub(crate) fn advance_validator(&mut self, validator: ValidatorId, token: TokenId) -> Result<()> {
        let adv = self.state.project_validator(validator, token, self.now)?;

        if adv.commission > 0 {
            let slot = self.state.accrued_commission.get_or_default((validator, token));
            *slot = checked_add(*slot, adv.commission, "accrued commission")?;
        }

        let vs = self
            .state
            .validator_rewards
            .get_mut(&(validator, token))
            .ok_or_else(|| StakingError::AccountingInconsistency(format!("no reward state for {validator}")))?;
        debug_assert!(adv.index >= vs.cumulative_index);
        vs.cumulative_index = adv.index;
        vs.cursor = adv.cursor;
        vs.last_update = adv.last_update;
        for cp in adv.checkpoints {
            self.state.validator_checkpoints.push((validator, token), cp);
        }
        Ok(())
    }

    /// Advance every token of a validator; run before its commission,
    /// status or stake set changes
    pub(crate) fn advance_all_tokens(&mut self, validator: ValidatorId) -> Result<()> {
        for token in self.state.token_ids() {
            self.advance_validator(validator, token)?;
        }
        Ok(())
    }

    /// Settle one (user, validator, token) at the current stake and return
    /// the amount added to the pair's accrued balance
    pub(crate) fn settle(&mut self, user: Address, validator: ValidatorId, token: TokenId) -> Result<Amount> {
        self.advance_validator(validator, token)?;

        let index = self
            .state
            .validator_rewards
            .get(&(validator, token))
            .map(|vs| vs.cumulative_index)
            .unwrap_or_default();
        let stake = self.state.pair_stake(user, validator);
        let now = self.now;

        let record = self.state.user_rewards.get_or_default((user, validator, token));
        let delta = if stake == 0 { 0 } else { earned(stake, index, record.paid_index)? };
        record.accrued = checked_add(record.accrued, delta, "accrued reward")?;
        record.paid_index = index;
        record.paid_at = now;

        if delta > 0 {
            tracing::debug!(%user, validator, %token, delta, "settled reward");
        }
        Ok(delta)
    }

    /// Settle every token for a pair, using the stake it holds right now
    pub(crate) fn settle_pair(&mut self, user: Address, validator: ValidatorId) -> Result<()> {
        for token in self.state.token_ids() {
            self.settle(user, validator, token)?;
        }
        Ok(())
    }

    /// Settle and zero a pair's balance for one token
    pub(crate) fn take_reward(&mut self, user: Address, validator: ValidatorId, token: TokenId) -> Result<Amount> {
        self.settle(user, validator, token)?;
        let amount = match self.state.user_rewards.get_mut(&(user, validator, token)) {
            Some(record) => std::mem::take(&mut record.accrued),
            None => 0,
        };
        if self.state.pair_stake(user, validator) == 0 {
            // nothing left to snapshot an index for
            self.state.user_rewards.remove(&(user, validator, token));
        }
        Ok(amount)
    }

    /// Forget settled-and-empty records of a pair that no longer holds stake
    pub(crate) fn prune_rewards(&mut self, user: Address, validator: ValidatorId) {
        if self.state.pair_stake(user, validator) > 0 {
            return;
        }
        for token in self.state.token_ids() {
            if self.state.user_rewards.get(&(user, validator, token)).is_some_and(|r| r.accrued == 0) {
                self.state.user_rewards.remove(&(user, validator, token));
            }
        }
    }

    /// Append to a token's global rate history; a second change in the same
    /// second replaces the first
    pub(crate) fn record_rate(&mut self, token: TokenId, rate: u128) {
        let cp = RateCheckpoint { timestamp: self.now, rate, cumulative_index: 0 };
        self.state.rate_checkpoints.record(token, cp, |last, next| last.timestamp == next.timestamp);
    }

    /// Start a validator's reward state for a token at the current instant
    pub(crate) fn init_reward_state(&mut self, validator: ValidatorId, token: TokenId) {
        let cursor = self.state.rate_checkpoints.get(&token).len();
        let rate = self.state.rate_at(token, self.now);
        self.state
            .validator_rewards
            .insert((validator, token), ValidatorRewardState { cumulative_index: 0, last_update: self.now, cursor });
        self.state
            .validator_checkpoints
            .push((validator, token), RateCheckpoint { timestamp: self.now, rate, cumulative_index: 0 });
    }
}
