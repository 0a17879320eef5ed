//! Validator registry
//!
//! Registration, commission, identity rotation, capacity and status. An
//! admin identity manages at most one validator at a time; the binding is
//! released when the validator rotates its admin or gets slashed.

use crate::error::{Result, StakingError};
use crate::events::LedgerEvent;
use crate::session::Session;
use crate::types::*;

/// Registration request
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewValidator {
    pub id: ValidatorId,
    pub admin: Address,
    pub withdrawal: Address,
    pub commission: u128,
    /// 0 = unlimited
    pub max_capacity: Amount,
}

impl Session<'_> {
    pub(crate) fn add_validator(&mut self, new: NewValidator) -> Result<()> {
        let NewValidator { id, admin, withdrawal, commission, max_capacity } = new;

        if self.state.validators.contains_key(&id) {
            return Err(StakingError::ValidatorAlreadyExists(id));
        }
        if admin.is_zero() {
            return Err(StakingError::ZeroAddress("admin"));
        }
        if withdrawal.is_zero() {
            return Err(StakingError::ZeroAddress("withdrawal"));
        }
        let max = self.state.config.max_allowed_commission;
        if commission > max {
            return Err(StakingError::CommissionExceedsMax { rate: commission, max });
        }
        if self.state.admin_bindings.contains_key(&admin) {
            return Err(StakingError::AdminAlreadyAssigned(admin));
        }

        self.state.validators.insert(
            id,
            Validator {
                id,
                admin,
                withdrawal,
                commission,
                delegated: 0,
                cooling: 0,
                max_capacity,
                active: true,
                slashed: false,
                slashed_at: 0,
                added_at: self.now,
            },
        );
        self.state.admin_bindings.insert(admin, id);
        for token in self.state.token_ids() {
            self.init_reward_state(id, token);
        }
        self.state
            .commission_checkpoints
            .push(id, CommissionCheckpoint { timestamp: self.now, rate: commission });

        tracing::info!(validator = id, %admin, commission, "validator registered");
        self.emit(LedgerEvent::ValidatorAdded { validator: id, admin, withdrawal, commission, max_capacity });
        Ok(())
    }

    /// Change commission; rewards up to now are split at the old rate
    pub(crate) fn set_validator_commission(&mut self, caller: Address, validator: ValidatorId, rate: u128) -> Result<()> {
        self.require_validator_admin(caller, validator)?;
        let max = self.state.config.max_allowed_commission;
        if rate > max {
            return Err(StakingError::CommissionExceedsMax { rate, max });
        }
        let old = self.state.validator(validator)?.commission;
        if old == rate {
            return Ok(());
        }

        self.advance_all_tokens(validator)?;
        self.state.validator_mut(validator)?.commission = rate;
        self.push_commission_checkpoint(validator, rate);

        self.emit(LedgerEvent::CommissionSet { validator, old_commission: old, new_commission: rate });
        Ok(())
    }

    /// Rotate the admin and/or withdrawal identity
    pub(crate) fn set_validator_addresses(
        &mut self,
        caller: Address,
        validator: ValidatorId,
        admin: Option<Address>,
        withdrawal: Option<Address>,
    ) -> Result<()> {
        self.require_validator_admin(caller, validator)?;
        if admin.is_some_and(|a| a.is_zero()) {
            return Err(StakingError::ZeroAddress("admin"));
        }
        if withdrawal.is_some_and(|a| a.is_zero()) {
            return Err(StakingError::ZeroAddress("withdrawal"));
        }

        if let Some(new_admin) = admin.filter(|a| *a != caller) {
            if self.state.admin_bindings.contains_key(&new_admin) {
                return Err(StakingError::AdminAlreadyAssigned(new_admin));
            }
            self.state.admin_bindings.remove(&caller);
            self.state.admin_bindings.insert(new_admin, validator);
        }

        let v = self.state.validator_mut(validator)?;
        if let Some(admin) = admin {
            v.admin = admin;
        }
        if let Some(withdrawal) = withdrawal {
            v.withdrawal = withdrawal;
        }
        let (admin, withdrawal) = (v.admin, v.withdrawal);

        self.emit(LedgerEvent::ValidatorAddressesSet { validator, admin, withdrawal });
        Ok(())
    }

    pub(crate) fn set_validator_capacity(&mut self, validator: ValidatorId, capacity: Amount) -> Result<()> {
        let v = self.state.validator(validator)?;
        if v.slashed {
            return Err(StakingError::ValidatorSlashed(validator));
        }
        if capacity > 0 && capacity < v.delegated {
            return Err(StakingError::ExceedsValidatorCapacity { validator, delegated: v.delegated, capacity });
        }
        let old_capacity = v.max_capacity;
        self.state.validator_mut(validator)?.max_capacity = capacity;
        self.emit(LedgerEvent::ValidatorCapacityUpdated { validator, old_capacity, new_capacity: capacity });
        Ok(())
    }

    pub(crate) fn set_validator_status(&mut self, validator: ValidatorId, active: bool) -> Result<()> {
        let v = self.state.validator(validator)?;
        if v.slashed {
            if active {
                return Err(StakingError::CannotReactivateSlashed(validator));
            }
            return Err(StakingError::ValidatorSlashed(validator));
        }
        if v.active == active {
            return Ok(());
        }

        // close the segment under the old status
        self.advance_all_tokens(validator)?;
        self.state.validator_mut(validator)?.active = active;

        tracing::info!(validator, active, "validator status changed");
        self.emit(LedgerEvent::ValidatorStatusUpdated { validator, active });
        Ok(())
    }

    pub(crate) fn require_validator_admin(&self, caller: Address, validator: ValidatorId) -> Result<()> {
        let v = self.state.validator(validator)?;
        if v.admin != caller || v.slashed {
            return Err(StakingError::NotValidatorAdmin { validator, caller });
        }
        Ok(())
    }

    fn push_commission_checkpoint(&mut self, validator: ValidatorId, rate: u128) {
        let cp = CommissionCheckpoint { timestamp: self.now, rate };
        self.state.commission_checkpoints.record(validator, cp, |last, next| last.timestamp == next.timestamp);
    }
}
