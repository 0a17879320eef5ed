//! Staking service
//!
//! Single entry point wrapping the ledger state. Every mutating call runs as
//! one transaction:
//!
//! ```text
//!  enter ──▶ lock ──▶ authorize ──▶ begin ──▶ session ops ──▶ audit ──▶ payouts ──▶ commit
//!    │                    │                        │            │          │
//!    └─ Reentrancy        └────────────────────────┴────────────┴──────────┴──▶ roll back
//! ```
//!
//! Calls from other threads queue on the state lock. A collaborator calling
//! back into the service from inside a payout is rejected with
//! [`StakingError::Reentrancy`].

use crate::admin::ParamUpdate;
use crate::collab::{Authorizer, BaseAssetBank, Clock, Treasury};
use crate::config::StakingConfig;
use crate::error::{Result, StakingError};
use crate::events::LedgerEvent;
use crate::registry::NewValidator;
use crate::session::{Payout, Session};
use crate::store::{LedgerState, Transaction};
use crate::types::*;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::thread::{self, ThreadId};

/// Collaborators wired into a service
#[derive(Clone)]
pub struct Collaborators {
    pub authorizer: Arc<dyn Authorizer>,
    pub bank: Arc<dyn BaseAssetBank>,
    pub clock: Arc<dyn Clock>,
}

pub struct StakingService {
    state: Mutex<LedgerState>,
    /// Thread currently inside a call
    active: Mutex<Option<ThreadId>>,
    events: Mutex<Vec<LedgerEvent>>,
    treasury: RwLock<Option<Arc<dyn Treasury>>>,
    authorizer: Arc<dyn Authorizer>,
    bank: Arc<dyn BaseAssetBank>,
    clock: Arc<dyn Clock>,
}

/// Clears the active-thread marker when a call ends
struct CallGuard<'a>(&'a Mutex<Option<ThreadId>>);

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        *self.0.lock() = None;
    }
}

impl StakingService {
    pub fn new(config: StakingConfig, collaborators: Collaborators) -> Result<Self> {
        config.validate()?;
        Ok(Self::with_state(LedgerState::new(config), collaborators))
    }

    /// Resume from persisted bytes (see [`LedgerState::encode`])
    pub fn restore(bytes: &[u8], collaborators: Collaborators) -> Result<Self> {
        Ok(Self::with_state(LedgerState::decode(bytes)?, collaborators))
    }

    fn with_state(state: LedgerState, collaborators: Collaborators) -> Self {
        let Collaborators { authorizer, bank, clock } = collaborators;
        Self {
            state: Mutex::new(state),
            active: Mutex::new(None),
            events: Mutex::new(Vec::new()),
            treasury: RwLock::new(None),
            authorizer,
            bank,
            clock,
        }
    }

    // ========================================================================
    // Transaction machinery
    // ========================================================================

    fn check_reentry(&self) -> Result<()> {
        if *self.active.lock() == Some(thread::current().id()) {
            tracing::warn!("re-entrant call rejected");
            return Err(StakingError::Reentrancy);
        }
        Ok(())
    }

    fn require_role(&self, role: Role, caller: Address) -> Result<()> {
        if !self.authorizer.has_role(role, caller) {
            return Err(StakingError::Unauthorized { role, caller });
        }
        Ok(())
    }

    /// Run `f` inside a ledger transaction and commit only if everything
    /// succeeds, payouts included
    fn transact<T>(
        &self,
        op: &'static str,
        role: Option<(Role, Address)>,
        f: impl FnOnce(&mut Session<'_>) -> Result<T>,
    ) -> Result<T> {
        self.transact_and(op, role, f, |_| {})
    }

    /// Like [`Self::transact`], running `on_commit` before the state lock
    /// is released
    fn transact_and<T>(
        &self,
        op: &'static str,
        role: Option<(Role, Address)>,
        f: impl FnOnce(&mut Session<'_>) -> Result<T>,
        on_commit: impl FnOnce(&T),
    ) -> Result<T> {
        self.check_reentry()?;
        let mut state = self.state.lock();
        *self.active.lock() = Some(thread::current().id());
        // dropped before `state`, so no other thread sees a stale marker
        let _guard = CallGuard(&self.active);
        // dropped before `_guard`; rolls back unless committed
        let mut tx = Transaction::begin(&mut *state);

        let result = self.run(&mut tx, op, role, f);
        match result {
            Ok((value, events)) => {
                tx.commit();
                on_commit(&value);
                for event in &events {
                    tracing::info!(op, event = event.name(), "{}", describe(event));
                }
                self.events.lock().extend(events);
                Ok(value)
            }
            Err(e) => {
                tracing::debug!(op, kind = ?e.kind(), error = %e, "call rejected");
                Err(e)
            }
        }
    }

    fn run<T>(
        &self,
        state: &mut LedgerState,
        op: &'static str,
        role: Option<(Role, Address)>,
        f: impl FnOnce(&mut Session<'_>) -> Result<T>,
    ) -> Result<(T, Vec<LedgerEvent>)> {
        if let Some((role, caller)) = role {
            self.require_role(role, caller)?;
        }

        let now = self.clock.now();
        let mut session = Session::new(&mut *state, now);
        let value = f(&mut session)?;
        let Session { events, payouts, .. } = session;

        if cfg!(debug_assertions) {
            state.check_invariants()?;
        }
        for payout in payouts {
            self.execute(op, payout)?;
        }
        Ok((value, events))
    }

    fn execute(&self, op: &'static str, payout: Payout) -> Result<()> {
        match payout {
            Payout::Reward { token, amount, recipient } => {
                let treasury = self.treasury.read().clone().ok_or(StakingError::TreasuryNotConfigured)?;
                treasury
                    .distribute_reward(token, amount, recipient)
                    .map_err(|e| StakingError::TreasuryFailure(e.to_string()))?;
                tracing::debug!(op, %token, amount, %recipient, "reward paid");
            }
            Payout::Principal { recipient, amount } => {
                self.bank
                    .transfer(recipient, amount)
                    .map_err(|e| StakingError::TransferFailed(e.to_string()))?;
                tracing::debug!(op, amount, %recipient, "principal transferred");
            }
        }
        Ok(())
    }

    /// Read-only access under the same lock and re-entry rules
    fn view<T>(&self, f: impl FnOnce(&LedgerState, Timestamp) -> Result<T>) -> Result<T> {
        self.check_reentry()?;
        let state = self.state.lock();
        f(&state, self.clock.now())
    }

    /// Take every event committed since the last drain
    pub fn drain_events(&self) -> Vec<LedgerEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    // ========================================================================
    // Staking lifecycle
    // ========================================================================

    pub fn stake(&self, caller: Address, validator: ValidatorId, amount: Amount) -> Result<()> {
        self.transact("stake", None, |s| s.stake(caller, validator, amount))
    }

    pub fn stake_on_behalf(
        &self,
        caller: Address,
        validator: ValidatorId,
        beneficiary: Address,
        amount: Amount,
    ) -> Result<()> {
        self.transact("stake_on_behalf", None, |s| s.stake_on_behalf(caller, beneficiary, validator, amount))
    }

    pub fn restake(&self, caller: Address, validator: ValidatorId, amount: Amount) -> Result<()> {
        self.transact("restake", None, |s| s.restake(caller, validator, amount))
    }

    /// `amount = None` unstakes the whole pair
    pub fn unstake(&self, caller: Address, validator: ValidatorId, amount: Option<Amount>) -> Result<()> {
        self.transact("unstake", None, |s| s.unstake(caller, validator, amount))
    }

    pub fn withdraw(&self, caller: Address) -> Result<Amount> {
        self.transact("withdraw", None, |s| s.withdraw(caller))
    }

    pub fn restake_rewards(&self, caller: Address, validator: ValidatorId) -> Result<Amount> {
        self.transact("restake_rewards", None, |s| s.restake_rewards(caller, validator))
    }

    pub fn claim_reward(&self, caller: Address, token: TokenId, validator: ValidatorId) -> Result<Amount> {
        self.transact("claim_reward", None, |s| s.claim_reward(caller, token, validator))
    }

    pub fn claim_all_rewards(&self, caller: Address, token: TokenId) -> Result<Amount> {
        self.transact("claim_all_rewards", None, |s| s.claim_all_rewards(caller, token))
    }

    // ========================================================================
    // Validators
    // ========================================================================

    pub fn add_validator(&self, caller: Address, new: NewValidator) -> Result<()> {
        self.transact("add_validator", Some((Role::ValidatorManager, caller)), |s| s.add_validator(new))
    }

    pub fn set_validator_commission(&self, caller: Address, validator: ValidatorId, rate: u128) -> Result<()> {
        self.transact("set_validator_commission", None, |s| s.set_validator_commission(caller, validator, rate))
    }

    pub fn set_validator_addresses(
        &self,
        caller: Address,
        validator: ValidatorId,
        admin: Option<Address>,
        withdrawal: Option<Address>,
    ) -> Result<()> {
        self.transact("set_validator_addresses", None, |s| {
            s.set_validator_addresses(caller, validator, admin, withdrawal)
        })
    }

    pub fn set_validator_capacity(&self, caller: Address, validator: ValidatorId, capacity: Amount) -> Result<()> {
        self.transact("set_validator_capacity", Some((Role::ValidatorManager, caller)), |s| {
            s.set_validator_capacity(validator, capacity)
        })
    }

    pub fn set_validator_status(&self, caller: Address, validator: ValidatorId, active: bool) -> Result<()> {
        self.transact("set_validator_status", Some((Role::ValidatorManager, caller)), |s| {
            s.set_validator_status(validator, active)
        })
    }

    // ========================================================================
    // Slashing
    // ========================================================================

    pub fn vote_to_slash(&self, caller: Address, target: ValidatorId, expires_at: Timestamp) -> Result<()> {
        self.transact("vote_to_slash", None, |s| s.vote_to_slash(caller, target, expires_at))
    }

    pub fn slash_validator(&self, caller: Address, target: ValidatorId) -> Result<()> {
        self.transact("slash_validator", Some((Role::Slasher, caller)), |s| s.slash_validator(target))
    }

    pub fn cleanup_expired_votes(&self, target: ValidatorId) -> Result<usize> {
        self.transact("cleanup_expired_votes", None, |s| s.cleanup_expired_votes(target))
    }

    // ========================================================================
    // Commission
    // ========================================================================

    pub fn request_commission_claim(&self, caller: Address, validator: ValidatorId, token: TokenId) -> Result<Amount> {
        self.transact("request_commission_claim", None, |s| s.request_commission_claim(caller, validator, token))
    }

    pub fn finalize_commission_claim(&self, caller: Address, validator: ValidatorId, token: TokenId) -> Result<Amount> {
        self.transact("finalize_commission_claim", None, |s| s.finalize_commission_claim(caller, validator, token))
    }

    // ========================================================================
    // Administration
    // ========================================================================

    pub fn update_parameter(&self, caller: Address, update: ParamUpdate) -> Result<()> {
        self.transact("update_parameter", Some((Role::Admin, caller)), |s| s.update_parameter(update))
    }

    /// Install the reward treasury; it is in place before the event is
    /// visible to anyone draining events
    pub fn set_treasury(&self, caller: Address, treasury: Arc<dyn Treasury>) -> Result<()> {
        self.transact_and(
            "set_treasury",
            Some((Role::Admin, caller)),
            |s| {
                s.emit(LedgerEvent::TreasurySet);
                Ok(())
            },
            |_| *self.treasury.write() = Some(treasury),
        )
    }

    pub fn add_reward_token(&self, caller: Address, token: TokenId, rate: u128, max_rate: u128) -> Result<()> {
        self.transact("add_reward_token", Some((Role::RewardManager, caller)), |s| {
            s.add_reward_token(token, rate, max_rate)
        })
    }

    pub fn remove_reward_token(&self, caller: Address, token: TokenId) -> Result<()> {
        self.transact("remove_reward_token", Some((Role::RewardManager, caller)), |s| s.remove_reward_token(token))
    }

    pub fn set_reward_rates(&self, caller: Address, tokens: &[TokenId], rates: &[u128]) -> Result<()> {
        self.transact("set_reward_rates", Some((Role::RewardManager, caller)), |s| s.set_reward_rates(tokens, rates))
    }

    pub fn set_max_reward_rate(&self, caller: Address, token: TokenId, max_rate: u128) -> Result<()> {
        self.transact("set_max_reward_rate", Some((Role::RewardManager, caller)), |s| {
            s.set_max_reward_rate(token, max_rate)
        })
    }

    // ========================================================================
    // Views
    // ========================================================================

    pub fn params(&self) -> Result<StakingConfig> {
        self.view(|st, _| Ok(st.config.clone()))
    }

    pub fn total_staked(&self) -> Result<Amount> {
        self.view(|st, _| Ok(st.total_staked))
    }

    pub fn total_cooling(&self) -> Result<Amount> {
        self.view(|st, _| Ok(st.total_cooling))
    }

    pub fn total_parked(&self) -> Result<Amount> {
        self.view(|st, _| Ok(st.total_parked))
    }

    /// Principal lost to slashing so far
    pub fn total_forfeited(&self) -> Result<Amount> {
        self.view(|st, _| Ok(st.total_forfeited))
    }

    pub fn validator(&self, id: ValidatorId) -> Result<Validator> {
        self.view(|st, _| st.validator(id).cloned())
    }

    pub fn validators(&self) -> Result<Vec<Validator>> {
        self.view(|st, _| Ok(st.validators.values().cloned().collect()))
    }

    pub fn user_stake(&self, user: Address) -> Result<StakeTotals> {
        self.view(|st, _| Ok(st.totals(user)))
    }

    pub fn user_validator_stake(&self, user: Address, validator: ValidatorId) -> Result<Amount> {
        self.view(|st, _| Ok(st.pair_stake(user, validator)))
    }

    pub fn user_validators(&self, user: Address) -> Result<Vec<ValidatorId>> {
        self.view(|st, _| Ok(st.associated_validators(user)))
    }

    pub fn cooldowns(&self, user: Address) -> Result<Vec<CooldownView>> {
        self.view(|st, _| {
            Ok(st
                .associated_validators(user)
                .into_iter()
                .filter_map(|validator| {
                    st.cooldowns.get(&(user, validator)).map(|c| CooldownView {
                        validator,
                        amount: c.amount,
                        cooldown_end: c.cooldown_end,
                    })
                })
                .collect())
        })
    }

    pub fn pending_reward(&self, user: Address, validator: ValidatorId, token: TokenId) -> Result<Amount> {
        self.view(|st, now| st.pending_reward(user, validator, token, now))
    }

    pub fn claimable_reward(&self, user: Address, token: TokenId) -> Result<Amount> {
        self.view(|st, now| st.claimable_reward(user, token, now))
    }

    pub fn accrued_commission(&self, validator: ValidatorId, token: TokenId) -> Result<Amount> {
        self.view(|st, now| st.accrued_commission_at(validator, token, now))
    }

    pub fn pending_commission_claim(
        &self,
        validator: ValidatorId,
        token: TokenId,
    ) -> Result<Option<PendingCommissionClaim>> {
        self.view(|st, _| Ok(st.pending_claims.get(&(validator, token)).copied()))
    }

    pub fn reward_token(&self, token: TokenId) -> Result<RewardTokenConfig> {
        self.view(|st, _| st.token(token).cloned())
    }

    pub fn reward_tokens(&self) -> Result<Vec<RewardTokenConfig>> {
        self.view(|st, _| Ok(st.reward_tokens.values().cloned().collect()))
    }

    pub fn rate_checkpoints(&self, token: TokenId) -> Result<Vec<RateCheckpoint>> {
        self.view(|st, _| {
            st.token(token)?;
            Ok(st.rate_checkpoints.get(&token).to_vec())
        })
    }

    pub fn validator_rate_checkpoints(&self, validator: ValidatorId, token: TokenId) -> Result<Vec<RateCheckpoint>> {
        self.view(|st, _| {
            st.validator(validator)?;
            st.token(token)?;
            Ok(st.validator_checkpoints.get(&(validator, token)).to_vec())
        })
    }

    pub fn commission_checkpoints(&self, validator: ValidatorId) -> Result<Vec<CommissionCheckpoint>> {
        self.view(|st, _| {
            st.validator(validator)?;
            Ok(st.commission_checkpoints.get(&validator).to_vec())
        })
    }

    /// Recorded votes against `target`, expired ones included until purged
    pub fn slash_votes(&self, target: ValidatorId) -> Result<Vec<SlashVote>> {
        self.view(|st, _| {
            st.validator(target)?;
            Ok(st
                .votes_against(target)
                .into_iter()
                .map(|(voter, expires_at)| SlashVote { voter, expires_at })
                .collect())
        })
    }

    pub fn reward_index(&self, validator: ValidatorId, token: TokenId) -> Result<u128> {
        self.view(|st, now| st.reward_index(validator, token, now))
    }

    /// Copy of the full state, e.g. for persistence
    pub fn snapshot(&self) -> Result<LedgerState> {
        self.view(|st, _| Ok(st.clone()))
    }
}

/// One-line rendering of an event for logs
fn describe(event: &LedgerEvent) -> String {
    serde_json::to_string(event).unwrap_or_else(|_| event.name().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::{ManualClock, MemoryBank, MemoryTreasury, RoleTable};

    const ROOT: Address = Address::repeat(0xaa);
    const ALICE: Address = Address::repeat(0xa1);

    fn service() -> (StakingService, Arc<ManualClock>, Arc<MemoryTreasury>) {
        let clock = Arc::new(ManualClock::new(0));
        let svc = StakingService::new(
            StakingConfig { min_stake: 1, ..Default::default() },
            Collaborators {
                authorizer: Arc::new(RoleTable::with_superuser(ROOT)),
                bank: Arc::new(MemoryBank::new()),
                clock: clock.clone(),
            },
        )
        .unwrap();
        let treasury = Arc::new(MemoryTreasury::new());
        svc.set_treasury(ROOT, treasury.clone()).unwrap();
        (svc, clock, treasury)
    }

    fn add_validator(svc: &StakingService, id: ValidatorId) {
        let admin = Address::repeat(id as u8);
        svc.add_validator(ROOT, NewValidator { id, admin, withdrawal: admin, commission: 0, max_capacity: 0 })
            .unwrap();
    }

    #[test]
    fn test_privileged_calls_need_roles() {
        let (svc, _, _) = service();
        let err = svc.add_reward_token(ALICE, TokenId::NATIVE, 1, 1).unwrap_err();
        assert_eq!(err, StakingError::Unauthorized { role: Role::RewardManager, caller: ALICE });
        assert_eq!(err.kind(), crate::error::ErrorKind::Authorization);
    }

    #[test]
    fn test_failed_payout_leaves_state_untouched() {
        let (svc, clock, treasury) = service();
        svc.add_reward_token(ROOT, TokenId::NATIVE, REWARD_PRECISION, REWARD_PRECISION).unwrap();
        add_validator(&svc, 1);
        svc.stake(ALICE, 1, 100).unwrap();
        clock.advance(10);

        let before = svc.snapshot().unwrap();
        svc.drain_events();
        // treasury is empty
        assert!(matches!(
            svc.claim_reward(ALICE, TokenId::NATIVE, 1),
            Err(StakingError::TreasuryFailure(_))
        ));
        assert_eq!(svc.snapshot().unwrap(), before);
        assert!(svc.drain_events().is_empty());

        treasury.fund(TokenId::NATIVE, 1000);
        assert_eq!(svc.claim_reward(ALICE, TokenId::NATIVE, 1).unwrap(), 1000);
    }

    #[test]
    fn test_failed_call_rewinds_histories() {
        let (svc, clock, _) = service();
        svc.add_reward_token(ROOT, TokenId::NATIVE, REWARD_PRECISION, REWARD_PRECISION * 4).unwrap();
        add_validator(&svc, 1);
        svc.stake(ALICE, 1, 100).unwrap();
        clock.set(10);
        svc.set_reward_rates(ROOT, &[TokenId::NATIVE], &[REWARD_PRECISION * 2]).unwrap();
        clock.set(20);
        assert_eq!(svc.state.lock().pending_changes(), 0);

        let before = svc.snapshot().unwrap();
        // settling walks past the rate change before the payout fails
        assert!(svc.claim_reward(ALICE, TokenId::NATIVE, 1).is_err());
        assert_eq!(svc.snapshot().unwrap(), before);
        assert_eq!(svc.validator_rate_checkpoints(1, TokenId::NATIVE).unwrap().len(), 1);
        assert_eq!(svc.state.lock().pending_changes(), 0);
    }

    #[test]
    fn test_treasury_in_place_once_event_is_visible() {
        let svc = StakingService::new(
            StakingConfig { min_stake: 1, ..Default::default() },
            Collaborators {
                authorizer: Arc::new(RoleTable::with_superuser(ROOT)),
                bank: Arc::new(MemoryBank::new()),
                clock: Arc::new(ManualClock::new(0)),
            },
        )
        .unwrap();
        let treasury = Arc::new(MemoryTreasury::new());

        assert!(svc.set_treasury(ALICE, treasury.clone()).is_err());
        assert!(svc.treasury.read().is_none());

        thread::scope(|scope| {
            scope.spawn(|| svc.set_treasury(ROOT, treasury).unwrap());
            loop {
                if svc.drain_events().contains(&LedgerEvent::TreasurySet) {
                    assert!(svc.treasury.read().is_some());
                    break;
                }
                thread::yield_now();
            }
        });
    }

    #[test]
    fn test_events_drain_in_order() {
        let (svc, _, _) = service();
        add_validator(&svc, 1);
        svc.stake(ALICE, 1, 5).unwrap();
        let names: Vec<_> = svc.drain_events().iter().map(LedgerEvent::name).collect();
        assert_eq!(names, vec!["treasury_set", "validator_added", "staked"]);
        assert!(svc.drain_events().is_empty());
    }

    #[test]
    fn test_snapshot_restores() {
        let (svc, clock, _) = service();
        add_validator(&svc, 1);
        svc.stake(ALICE, 1, 5).unwrap();
        let bytes = svc.snapshot().unwrap().encode().unwrap();

        let restored = StakingService::restore(
            &bytes,
            Collaborators {
                authorizer: Arc::new(RoleTable::new()),
                bank: Arc::new(MemoryBank::new()),
                clock,
            },
        )
        .unwrap();
        assert_eq!(restored.user_validator_stake(ALICE, 1).unwrap(), 5);
    }
}
