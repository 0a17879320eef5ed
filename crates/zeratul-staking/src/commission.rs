//! Two-phase commission claims
//!
//! `request` moves the accrued balance into a pending claim right away;
//! `finalize` pays it only after the timelock, so a leaked admin identity
//! cannot drain commission faster than the operators can react.

use crate::error::{Result, StakingError};
use crate::events::LedgerEvent;
use crate::session::{Payout, Session};
use crate::types::*;

impl Session<'_> {
    pub(crate) fn request_commission_claim(
        &mut self,
        caller: Address,
        validator: ValidatorId,
        token: TokenId,
    ) -> Result<Amount> {
        self.require_claimable(caller, validator)?;
        self.state.token(token)?;
        if self.state.pending_claims.contains_key(&(validator, token)) {
            return Err(StakingError::PendingClaimExists { validator, token });
        }

        self.advance_validator(validator, token)?;
        let amount = self.state.accrued_commission.remove(&(validator, token)).unwrap_or(0);
        if amount == 0 {
            return Err(StakingError::NoCommissionToClaim { validator, token });
        }

        let recipient = self.state.validator(validator)?.withdrawal;
        let requested_at = self.now;
        self.state
            .pending_claims
            .insert((validator, token), PendingCommissionClaim { amount, requested_at, recipient });

        self.emit(LedgerEvent::CommissionClaimRequested { validator, token, amount, recipient, requested_at });
        Ok(amount)
    }

    pub(crate) fn finalize_commission_claim(
        &mut self,
        caller: Address,
        validator: ValidatorId,
        token: TokenId,
    ) -> Result<Amount> {
        self.require_claimable(caller, validator)?;
        let claim = *self
            .state
            .pending_claims
            .get(&(validator, token))
            .ok_or(StakingError::NoPendingClaim { validator, token })?;

        let ready_at = claim.requested_at.saturating_add(self.state.config.commission_claim_timelock);
        if self.now < ready_at {
            return Err(StakingError::ClaimTimelockActive { ready_at });
        }

        self.state.pending_claims.remove(&(validator, token));
        let PendingCommissionClaim { amount, recipient, .. } = claim;
        self.pay(Payout::Reward { token, amount, recipient });
        self.emit(LedgerEvent::CommissionClaimFinalized { validator, token, amount, recipient });
        Ok(amount)
    }

    fn require_claimable(&self, caller: Address, validator: ValidatorId) -> Result<()> {
        self.require_validator_admin(caller, validator)?;
        let v = self.state.validator(validator)?;
        if !v.active {
            return Err(StakingError::ValidatorInactive(validator));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{StakingConfig, DAY};
    use crate::registry::NewValidator;
    use crate::store::LedgerState;

    const ADMIN: Address = Address::repeat(0x11);
    const PAYEE: Address = Address::repeat(0x12);

    /// Validator 1 at 50% commission, one staker, native rate 1.0
    fn ledger() -> LedgerState {
        let mut state = LedgerState::new(StakingConfig { min_stake: 1, ..Default::default() });
        let mut s = Session::new(&mut state, 0);
        s.add_reward_token(TokenId::NATIVE, REWARD_PRECISION, REWARD_PRECISION).unwrap();
        s.add_validator(NewValidator {
            id: 1,
            admin: ADMIN,
            withdrawal: PAYEE,
            commission: REWARD_PRECISION / 2,
            max_capacity: 0,
        })
        .unwrap();
        s.stake(Address::repeat(0x55), 1, 10).unwrap();
        state
    }

    #[test]
    fn test_request_then_finalize_after_timelock() {
        let mut state = ledger();
        let mut s = Session::new(&mut state, 100);
        // 10 × 1.0 × 100s × 50%
        assert_eq!(s.request_commission_claim(ADMIN, 1, TokenId::NATIVE).unwrap(), 500);
        assert_eq!(
            s.request_commission_claim(ADMIN, 1, TokenId::NATIVE),
            Err(StakingError::PendingClaimExists { validator: 1, token: TokenId::NATIVE })
        );
        assert_eq!(
            s.finalize_commission_claim(ADMIN, 1, TokenId::NATIVE),
            Err(StakingError::ClaimTimelockActive { ready_at: 100 + 7 * DAY })
        );

        let mut s = Session::new(&mut state, 100 + 7 * DAY);
        assert_eq!(s.finalize_commission_claim(ADMIN, 1, TokenId::NATIVE).unwrap(), 500);
        assert_eq!(s.payouts, vec![Payout::Reward { token: TokenId::NATIVE, amount: 500, recipient: PAYEE }]);
        assert!(s.state.pending_claims.is_empty());
    }

    #[test]
    fn test_claim_requires_admin_and_balance() {
        let mut state = ledger();
        let mut s = Session::new(&mut state, 0);
        assert!(matches!(
            s.request_commission_claim(PAYEE, 1, TokenId::NATIVE),
            Err(StakingError::NotValidatorAdmin { .. })
        ));
        assert_eq!(
            s.request_commission_claim(ADMIN, 1, TokenId::NATIVE),
            Err(StakingError::NoCommissionToClaim { validator: 1, token: TokenId::NATIVE })
        );
        assert_eq!(
            s.finalize_commission_claim(ADMIN, 1, TokenId::NATIVE),
            Err(StakingError::NoPendingClaim { validator: 1, token: TokenId::NATIVE })
        );
    }
}
