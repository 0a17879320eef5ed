//! Shared fixture: a service wired to in-memory collaborators

#![allow(dead_code)]

use std::sync::Arc;
use zeratul_staking::*;

pub const ROOT: Address = Address::repeat(0xaa);
pub const ALICE: Address = Address::repeat(0xa1);
pub const BOB: Address = Address::repeat(0xb0);
pub const CAROL: Address = Address::repeat(0xc0);

/// 0.001 reward per staked unit per second
pub const RATE: u128 = REWARD_PRECISION / 1000;
pub const COOLDOWN: Timestamp = 1000;

pub struct Harness {
    pub svc: StakingService,
    pub clock: Arc<ManualClock>,
    pub roles: Arc<RoleTable>,
    pub treasury: Arc<MemoryTreasury>,
    pub bank: Arc<MemoryBank>,
}

pub fn admin_of(id: ValidatorId) -> Address {
    Address::repeat(id as u8)
}

pub fn config() -> StakingConfig {
    StakingConfig { min_stake: 100, cooldown_interval: COOLDOWN, ..Default::default() }
}

impl Harness {
    /// Funded treasury, native token listed at [`RATE`], no validators
    pub fn new() -> Self {
        Self::with_config(config())
    }

    pub fn with_config(config: StakingConfig) -> Self {
        let clock = Arc::new(ManualClock::new(0));
        let roles = Arc::new(RoleTable::with_superuser(ROOT));
        let treasury = Arc::new(MemoryTreasury::new());
        let bank = Arc::new(MemoryBank::new());
        let svc = StakingService::new(
            config,
            Collaborators { authorizer: roles.clone(), bank: bank.clone(), clock: clock.clone() },
        )
        .unwrap();

        treasury.fund(TokenId::NATIVE, u128::MAX / 2);
        svc.set_treasury(ROOT, treasury.clone()).unwrap();
        svc.add_reward_token(ROOT, TokenId::NATIVE, RATE, RATE * 100).unwrap();
        svc.drain_events();

        Self { svc, clock, roles, treasury, bank }
    }

    /// Register validator `id` administered by `admin_of(id)`
    pub fn validator(&self, id: ValidatorId, commission: u128) {
        self.svc
            .add_validator(
                ROOT,
                NewValidator { id, admin: admin_of(id), withdrawal: admin_of(id), commission, max_capacity: 0 },
            )
            .unwrap();
    }

    pub fn at(&self, now: Timestamp) {
        self.clock.set(now);
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    pub fn audit(&self) {
        self.svc.snapshot().unwrap().check_invariants().unwrap();
    }
}
