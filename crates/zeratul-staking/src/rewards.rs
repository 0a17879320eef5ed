//! Reward claims and reward token listings
//!
//! Tokens are never delisted: removal zeroes the forward rate and marks the
//! listing inactive, so balances accrued before removal stay claimable.

use crate::error::{Result, StakingError};
use crate::events::LedgerEvent;
use crate::math::checked_add;
use crate::session::{Payout, Session};
use crate::types::*;

impl Session<'_> {
    // ========================================================================
    // Claims
    // ========================================================================

    /// Pay out the pair's balance for one token
    pub(crate) fn claim_reward(&mut self, user: Address, token: TokenId, validator: ValidatorId) -> Result<Amount> {
        self.state.token(token)?;
        self.state.validator(validator)?;

        let amount = self.take_reward(user, validator, token)?;
        if amount == 0 {
            return Err(StakingError::NoRewardsToClaim);
        }
        self.pay(Payout::Reward { token, amount, recipient: user });
        self.emit(LedgerEvent::RewardClaimedFromValidator { user, token, validator, amount });
        Ok(amount)
    }

    /// Pay out the user's balance for one token across every validator
    pub(crate) fn claim_all_rewards(&mut self, user: Address, token: TokenId) -> Result<Amount> {
        self.state.token(token)?;

        let mut total: Amount = 0;
        for validator in self.state.reward_sources(user, token) {
            let amount = self.take_reward(user, validator, token)?;
            if amount > 0 {
                self.emit(LedgerEvent::RewardClaimedFromValidator { user, token, validator, amount });
            }
            total = checked_add(total, amount, "claimed rewards")?;
        }
        if total == 0 {
            return Err(StakingError::NoRewardsToClaim);
        }
        self.pay(Payout::Reward { token, amount: total, recipient: user });
        self.emit(LedgerEvent::RewardClaimed { user, token, amount: total });
        Ok(total)
    }

    // ========================================================================
    // Listings
    // ========================================================================

    /// List a token, or reactivate a removed one with fresh limits
    pub(crate) fn add_reward_token(&mut self, token: TokenId, rate: u128, max_rate: u128) -> Result<()> {
        if rate > max_rate {
            return Err(StakingError::RateExceedsMax { rate, max: max_rate });
        }

        match self.state.reward_tokens.get(&token) {
            Some(existing) if existing.active => return Err(StakingError::TokenAlreadyExists(token)),
            Some(_) => {
                // validators already carry state for a relisted token
                self.state.reward_tokens.insert(token, RewardTokenConfig { token, rate, max_rate, active: true });
            }
            None => {
                self.state.reward_tokens.insert(token, RewardTokenConfig { token, rate, max_rate, active: true });
                let validators: Vec<ValidatorId> = self.state.validators.keys().copied().collect();
                for validator in validators {
                    self.init_reward_state(validator, token);
                }
            }
        }
        self.record_rate(token, rate);

        tracing::info!(%token, rate, max_rate, "reward token listed");
        self.emit(LedgerEvent::RewardTokenAdded { token, rate, max_rate });
        Ok(())
    }

    pub(crate) fn remove_reward_token(&mut self, token: TokenId) -> Result<()> {
        let config = self.state.token(token)?;
        if !config.active {
            return Err(StakingError::TokenInactive(token));
        }
        if let Some(config) = self.state.reward_tokens.get_mut(&token) {
            config.rate = 0;
            config.active = false;
        }
        self.record_rate(token, 0);
        self.emit(LedgerEvent::RewardTokenRemoved { token });
        Ok(())
    }

    /// Batch rate update; all entries are validated before any is applied
    pub(crate) fn set_reward_rates(&mut self, tokens: &[TokenId], rates: &[u128]) -> Result<()> {
        if tokens.is_empty() {
            return Err(StakingError::EmptyArray);
        }
        if tokens.len() != rates.len() {
            return Err(StakingError::ArrayLengthMismatch { left: tokens.len(), right: rates.len() });
        }
        for (&token, &rate) in tokens.iter().zip(rates) {
            let config = self.state.token(token)?;
            if !config.active {
                return Err(StakingError::TokenInactive(token));
            }
            if rate > config.max_rate {
                return Err(StakingError::RateExceedsMax { rate, max: config.max_rate });
            }
        }

        for (&token, &new_rate) in tokens.iter().zip(rates) {
            let Some(config) = self.state.reward_tokens.get_mut(&token) else {
                continue;
            };
            let old_rate = std::mem::replace(&mut config.rate, new_rate);
            if old_rate == new_rate {
                continue;
            }
            self.record_rate(token, new_rate);
            self.emit(LedgerEvent::RewardRateSet { token, old_rate, new_rate });
        }
        Ok(())
    }

    pub(crate) fn set_max_reward_rate(&mut self, token: TokenId, new_max: u128) -> Result<()> {
        let config = self.state.token(token)?;
        if new_max < config.rate {
            return Err(StakingError::RateExceedsMax { rate: config.rate, max: new_max });
        }
        let old_max = config.max_rate;
        if let Some(config) = self.state.reward_tokens.get_mut(&token) {
            config.max_rate = new_max;
        }
        self.emit(LedgerEvent::MaxRewardRateSet { token, old_max, new_max });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StakingConfig;
    use crate::store::LedgerState;

    const ALICE: Address = Address::repeat(0xa1);
    const USDC: TokenId = TokenId(1);

    fn ledger() -> LedgerState {
        let config = StakingConfig { min_stake: 1, ..Default::default() };
        let mut state = LedgerState::new(config);
        state.validators.insert(
            1,
            Validator {
                id: 1,
                admin: Address::repeat(1),
                withdrawal: Address::repeat(1),
                commission: 0,
                delegated: 0,
                cooling: 0,
                max_capacity: 0,
                active: true,
                slashed: false,
                slashed_at: 0,
                added_at: 0,
            },
        );
        state
    }

    #[test]
    fn test_claim_pays_and_zeroes() {
        let mut state = ledger();
        let mut s = Session::new(&mut state, 0);
        s.add_reward_token(USDC, REWARD_PRECISION, 2 * REWARD_PRECISION).unwrap();
        s.stake(ALICE, 1, 10).unwrap();

        let mut s = Session::new(&mut state, 5);
        assert_eq!(s.claim_reward(ALICE, USDC, 1).unwrap(), 50);
        assert_eq!(s.payouts, vec![Payout::Reward { token: USDC, amount: 50, recipient: ALICE }]);
        assert_eq!(s.claim_reward(ALICE, USDC, 1), Err(StakingError::NoRewardsToClaim));
    }

    #[test]
    fn test_removed_token_keeps_balance() {
        let mut state = ledger();
        let mut s = Session::new(&mut state, 0);
        s.add_reward_token(USDC, REWARD_PRECISION, REWARD_PRECISION).unwrap();
        s.stake(ALICE, 1, 10).unwrap();

        let mut s = Session::new(&mut state, 3);
        s.remove_reward_token(USDC).unwrap();

        let mut s = Session::new(&mut state, 100);
        assert_eq!(s.claim_all_rewards(ALICE, USDC).unwrap(), 30);
    }

    #[test]
    fn test_relist_reactivates() {
        let mut state = ledger();
        let mut s = Session::new(&mut state, 0);
        s.add_reward_token(USDC, 1, 1).unwrap();
        assert_eq!(s.add_reward_token(USDC, 1, 1), Err(StakingError::TokenAlreadyExists(USDC)));
        s.remove_reward_token(USDC).unwrap();
        s.add_reward_token(USDC, 2, 5).unwrap();
        assert!(s.state.reward_tokens[&USDC].active);
        assert_eq!(s.state.rate_at(USDC, 0), 2);
    }

    #[test]
    fn test_set_rates_validates_whole_batch() {
        let mut state = ledger();
        let mut s = Session::new(&mut state, 0);
        s.add_reward_token(TokenId::NATIVE, 1, 10).unwrap();
        s.add_reward_token(USDC, 1, 10).unwrap();

        assert_eq!(s.set_reward_rates(&[], &[]), Err(StakingError::EmptyArray));
        assert_eq!(
            s.set_reward_rates(&[USDC], &[1, 2]),
            Err(StakingError::ArrayLengthMismatch { left: 1, right: 2 })
        );
        assert_eq!(
            s.set_reward_rates(&[TokenId::NATIVE, USDC], &[5, 11]),
            Err(StakingError::RateExceedsMax { rate: 11, max: 10 })
        );
        assert_eq!(s.state.reward_tokens[&TokenId::NATIVE].rate, 1);

        s.set_reward_rates(&[TokenId::NATIVE, USDC], &[5, 7]).unwrap();
        assert_eq!(s.state.reward_tokens[&USDC].rate, 7);
    }

    #[test]
    fn test_max_rate_cannot_undercut_rate() {
        let mut state = ledger();
        let mut s = Session::new(&mut state, 0);
        s.add_reward_token(USDC, 5, 10).unwrap();
        assert!(s.set_max_reward_rate(USDC, 4).is_err());
        s.set_max_reward_rate(USDC, 5).unwrap();
    }
}
