//! Unanimous slashing
//!
//! ```text
//!   A ──vote──┐
//!             ├──▶ votes[B] ──slash(B)──▶ |unexpired votes from live peers| >= |live peers|
//!   C ──vote──┘                                          │
//!                                                        ▼
//!                        settle every staker, forfeit principal, freeze B
//! ```
//!
//! Votes carry their own expiration and are purged lazily. Slashing is
//! terminal: the validator never reactivates and its admin binding is freed.

use crate::error::{Result, StakingError};
use crate::events::LedgerEvent;
use crate::math::{checked_add, checked_sub};
use crate::session::Session;
use crate::types::*;

impl Session<'_> {
    /// Record a vote from the validator administered by `caller` against `target`
    pub(crate) fn vote_to_slash(&mut self, caller: Address, target: ValidatorId, expires_at: Timestamp) -> Result<()> {
        let voter = *self
            .state
            .admin_bindings
            .get(&caller)
            .ok_or(StakingError::NotAValidatorAdmin(caller))?;
        if !self.state.validator(voter)?.is_live() {
            return Err(StakingError::VoterNotEligible(voter));
        }
        if voter == target {
            return Err(StakingError::SelfVote);
        }
        let t = self.state.validator(target)?;
        if t.slashed {
            return Err(StakingError::ValidatorSlashed(target));
        }
        if !t.active {
            return Err(StakingError::ValidatorInactive(target));
        }

        let now = self.now;
        let latest = now.saturating_add(self.state.config.max_slash_vote_duration);
        if expires_at <= now || expires_at > latest {
            return Err(StakingError::InvalidVoteExpiration { expires_at, now, latest });
        }

        if self.state.slash_votes.get(&(target, voter)).is_some_and(|&exp| exp > now) {
            return Err(StakingError::AlreadyVoted { voter, target });
        }
        self.state.slash_votes.insert((target, voter), expires_at);

        tracing::info!(voter, target, expires_at, "slash vote cast");
        self.emit(LedgerEvent::SlashVoteCast { target, voter, expires_at });
        Ok(())
    }

    /// Drop votes against `target` that expired at or before now
    pub(crate) fn cleanup_expired_votes(&mut self, target: ValidatorId) -> Result<usize> {
        self.state.validator(target)?;
        let now = self.now;
        let mut removed = 0;
        for (voter, expires_at) in self.state.votes_against(target) {
            if expires_at <= now {
                self.state.slash_votes.remove(&(target, voter));
                removed += 1;
            }
        }
        if removed > 0 {
            self.emit(LedgerEvent::ExpiredVotesCleared { target, removed });
        }
        Ok(removed)
    }

    /// Slash `target` once every live peer holds an unexpired vote against it
    pub(crate) fn slash_validator(&mut self, target: ValidatorId) -> Result<()> {
        if self.state.validator(target)?.slashed {
            return Err(StakingError::ValidatorSlashed(target));
        }
        self.cleanup_expired_votes(target)?;

        let peers: Vec<ValidatorId> = self
            .state
            .validators
            .values()
            .filter(|v| v.id != target && v.is_live())
            .map(|v| v.id)
            .collect();
        if peers.is_empty() {
            return Err(StakingError::NoEligibleVoters(target));
        }
        let votes = peers.iter().filter(|&&p| self.state.slash_votes.contains_key(&(target, p))).count();
        if votes < peers.len() {
            return Err(StakingError::UnanimityNotReached { votes, required: peers.len() });
        }

        self.execute_slash(target)
    }

    fn execute_slash(&mut self, target: ValidatorId) -> Result<()> {
        // freeze rewards at this instant while stakes are still in place
        self.advance_all_tokens(target)?;
        let stakers = self.state.stakers_of(target);

        let mut forfeited_stake: Amount = 0;
        let mut forfeited_cooling: Amount = 0;
        for staker in stakers {
            self.settle_pair(staker, target)?;

            let stake = self.state.pair_stake(staker, target);
            if stake > 0 {
                self.state.sub_pair_stake(staker, target, stake)?;
                self.state.update_totals(staker, |t| {
                    t.staked = checked_sub(t.staked, stake, "user staked")?;
                    Ok(())
                })?;
                forfeited_stake = checked_add(forfeited_stake, stake, "forfeited stake")?;
            }

            match self.state.cooldowns.get(&(staker, target)).copied() {
                // matured before the slash: already free principal
                Some(entry) if entry.cooldown_end < self.now => {
                    self.state.park_tranche(staker, target)?;
                }
                Some(entry) => {
                    self.state.cooldowns.remove(&(staker, target));
                    self.state.update_totals(staker, |t| {
                        t.cooling = checked_sub(t.cooling, entry.amount, "user cooling")?;
                        Ok(())
                    })?;
                    forfeited_cooling = checked_add(forfeited_cooling, entry.amount, "forfeited cooling")?;
                }
                None => {}
            }

            self.state.dissociate_if_empty(staker, target);
            self.prune_rewards(staker, target);
        }

        self.state.total_staked = checked_sub(self.state.total_staked, forfeited_stake, "total staked")?;
        self.state.total_cooling = checked_sub(self.state.total_cooling, forfeited_cooling, "total cooling")?;
        let forfeited = checked_add(forfeited_stake, forfeited_cooling, "forfeited")?;
        self.state.total_forfeited = checked_add(self.state.total_forfeited, forfeited, "total forfeited")?;

        let now = self.now;
        let v = self.state.validator_mut(target)?;
        v.delegated = checked_sub(v.delegated, forfeited_stake, "validator delegated")?;
        v.cooling = checked_sub(v.cooling, forfeited_cooling, "validator cooling")?;
        v.slashed = true;
        v.active = false;
        v.slashed_at = now;
        let admin = v.admin;

        self.state.admin_bindings.remove(&admin);
        self.state.pending_claims.retain(|&(validator, _), _| validator != target);
        self.state.slash_votes.retain(|&(against, voter), _| against != target && voter != target);

        tracing::warn!(validator = target, forfeited_stake, forfeited_cooling, "validator slashed");
        self.emit(LedgerEvent::ValidatorSlashed { validator: target, slashed_at: now, forfeited_stake, forfeited_cooling });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{StakingConfig, DAY};
    use crate::registry::NewValidator;
    use crate::store::LedgerState;

    fn admin(id: ValidatorId) -> Address {
        Address::repeat(0x10 + id as u8)
    }

    /// Validators 1, 2, 3 registered at t=0
    fn ledger() -> LedgerState {
        let mut state = LedgerState::new(StakingConfig { min_stake: 1, cooldown_interval: 100, ..Default::default() });
        let mut s = Session::new(&mut state, 0);
        for id in 1..=3 {
            s.add_validator(NewValidator {
                id,
                admin: admin(id),
                withdrawal: admin(id),
                commission: 0,
                max_capacity: 0,
            })
            .unwrap();
        }
        state
    }

    #[test]
    fn test_vote_rules() {
        let mut state = ledger();
        let mut s = Session::new(&mut state, 10);
        assert_eq!(s.vote_to_slash(admin(1), 1, 20), Err(StakingError::SelfVote));
        assert_eq!(
            s.vote_to_slash(Address::repeat(0x99), 2, 20),
            Err(StakingError::NotAValidatorAdmin(Address::repeat(0x99)))
        );
        assert!(matches!(s.vote_to_slash(admin(1), 2, 10), Err(StakingError::InvalidVoteExpiration { .. })));
        assert!(matches!(
            s.vote_to_slash(admin(1), 2, 10 + DAY + 1),
            Err(StakingError::InvalidVoteExpiration { .. })
        ));

        s.vote_to_slash(admin(1), 2, 20).unwrap();
        assert_eq!(s.vote_to_slash(admin(1), 2, 30), Err(StakingError::AlreadyVoted { voter: 1, target: 2 }));

        // refreshable once expired
        let mut s = Session::new(&mut state, 20);
        s.vote_to_slash(admin(1), 2, 30).unwrap();
    }

    #[test]
    fn test_single_vote_is_not_unanimous() {
        let mut state = ledger();
        let mut s = Session::new(&mut state, 10);
        s.vote_to_slash(admin(1), 2, 100).unwrap();
        assert_eq!(s.slash_validator(2), Err(StakingError::UnanimityNotReached { votes: 1, required: 2 }));
    }

    #[test]
    fn test_slash_releases_everything() {
        let mut state = ledger();
        let user = Address::repeat(0xee);
        let mut s = Session::new(&mut state, 0);
        s.stake(user, 2, 1000).unwrap();
        s.unstake(user, 2, Some(200)).unwrap();

        let mut s = Session::new(&mut state, 10);
        s.vote_to_slash(admin(1), 2, 100).unwrap();
        s.vote_to_slash(admin(3), 2, 100).unwrap();
        s.vote_to_slash(admin(2), 1, 100).unwrap();
        s.slash_validator(2).unwrap();

        let v = &s.state.validators[&2];
        assert!(v.slashed && !v.active);
        assert_eq!((v.delegated, v.cooling, v.slashed_at), (0, 0, 10));
        assert_eq!(s.state.total_forfeited, 1000);
        assert!(s.state.slash_votes.is_empty());
        assert!(!s.state.admin_bindings.contains_key(&admin(2)));
        assert!(s.state.associated_validators(user).is_empty());
        s.state.check_invariants().unwrap();

        assert_eq!(s.slash_validator(2), Err(StakingError::ValidatorSlashed(2)));
    }

    #[test]
    fn test_matured_tranche_survives_slash() {
        let mut state = ledger();
        let user = Address::repeat(0xee);
        let mut s = Session::new(&mut state, 0);
        s.stake(user, 2, 1000).unwrap();
        s.unstake(user, 2, Some(300)).unwrap();

        let mut s = Session::new(&mut state, 150);
        s.vote_to_slash(admin(1), 2, 200).unwrap();
        s.vote_to_slash(admin(3), 2, 200).unwrap();
        s.slash_validator(2).unwrap();

        assert_eq!(s.state.totals(user), StakeTotals { staked: 0, cooling: 0, parked: 300 });
        assert_eq!(s.state.total_forfeited, 700);
        s.state.check_invariants().unwrap();
    }

    #[test]
    fn test_cleanup_counts_removed() {
        let mut state = ledger();
        let mut s = Session::new(&mut state, 0);
        s.vote_to_slash(admin(1), 2, 5).unwrap();
        s.vote_to_slash(admin(3), 2, 50).unwrap();

        let mut s = Session::new(&mut state, 5);
        assert_eq!(s.cleanup_expired_votes(2).unwrap(), 1);
        assert_eq!(s.state.votes_against(2), vec![(3, 50)]);
    }
}
