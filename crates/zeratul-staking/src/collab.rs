//! External collaborators
//!
//! The ledger only accounts; moving assets, deciding who holds which role
//! and telling time are delegated through these traits. In-memory versions
//! back the tests and the simulator.

use crate::types::{Address, Amount, Role, Timestamp, TokenId};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Failure reported by a collaborator
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct CollaboratorError(pub String);

/// Role membership oracle
pub trait Authorizer: Send + Sync {
    fn has_role(&self, role: Role, principal: Address) -> bool;
}

/// Custodian of reward-token balances
pub trait Treasury: Send + Sync {
    fn distribute_reward(&self, token: TokenId, amount: Amount, recipient: Address) -> Result<(), CollaboratorError>;
}

/// Outbound base-asset transfers (withdrawals)
pub trait BaseAssetBank: Send + Sync {
    fn transfer(&self, recipient: Address, amount: Amount) -> Result<(), CollaboratorError>;
}

pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

// ============================================================================
// Roles
// ============================================================================

/// Explicit (role, principal) grants
#[derive(Default)]
pub struct RoleTable {
    grants: Mutex<BTreeSet<(Role, Address)>>,
}

impl RoleTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Grant every role to one principal
    pub fn with_superuser(principal: Address) -> Self {
        let table = Self::new();
        for role in [Role::Admin, Role::ValidatorManager, Role::RewardManager, Role::Slasher] {
            table.grant(role, principal);
        }
        table
    }

    pub fn grant(&self, role: Role, principal: Address) {
        self.grants.lock().insert((role, principal));
    }

    pub fn revoke(&self, role: Role, principal: Address) {
        self.grants.lock().remove(&(role, principal));
    }
}

impl Authorizer for RoleTable {
    fn has_role(&self, role: Role, principal: Address) -> bool {
        self.grants.lock().contains(&(role, principal))
    }
}

// ============================================================================
// Assets
// ============================================================================

/// Treasury holding per-token balances; payouts fail when underfunded
#[derive(Default)]
pub struct MemoryTreasury {
    balances: Mutex<BTreeMap<TokenId, Amount>>,
    paid: Mutex<BTreeMap<(Address, TokenId), Amount>>,
}

impl MemoryTreasury {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fund(&self, token: TokenId, amount: Amount) {
        let mut balances = self.balances.lock();
        let balance = balances.entry(token).or_default();
        *balance = balance.saturating_add(amount);
    }

    pub fn balance(&self, token: TokenId) -> Amount {
        self.balances.lock().get(&token).copied().unwrap_or(0)
    }

    /// Total paid to `recipient` in `token`
    pub fn paid(&self, recipient: Address, token: TokenId) -> Amount {
        self.paid.lock().get(&(recipient, token)).copied().unwrap_or(0)
    }
}

impl Treasury for MemoryTreasury {
    fn distribute_reward(&self, token: TokenId, amount: Amount, recipient: Address) -> Result<(), CollaboratorError> {
        let mut balances = self.balances.lock();
        let balance = balances.entry(token).or_default();
        if *balance < amount {
            return Err(CollaboratorError(format!("treasury holds {balance} {token}, owes {amount}")));
        }
        *balance -= amount;
        *self.paid.lock().entry((recipient, token)).or_default() += amount;
        Ok(())
    }
}

/// Records outbound transfers; can be switched to fail every transfer
#[derive(Default)]
pub struct MemoryBank {
    sent: Mutex<BTreeMap<Address, Amount>>,
    failing: AtomicBool,
}

impl MemoryBank {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn sent(&self, recipient: Address) -> Amount {
        self.sent.lock().get(&recipient).copied().unwrap_or(0)
    }
}

impl BaseAssetBank for MemoryBank {
    fn transfer(&self, recipient: Address, amount: Amount) -> Result<(), CollaboratorError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(CollaboratorError("transfer rejected".into()));
        }
        *self.sent.lock().entry(recipient).or_default() += amount;
        Ok(())
    }
}

// ============================================================================
// Time
// ============================================================================

/// Clock moved by hand
#[derive(Debug, Default)]
pub struct ManualClock(AtomicU64);

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        Self(AtomicU64::new(start))
    }

    pub fn set(&self, now: Timestamp) {
        self.0.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, seconds: Timestamp) {
        self.0.fetch_add(seconds, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        self.0.load(Ordering::SeqCst)
    }
}

/// Wall clock, unix seconds
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        chrono::Utc::now().timestamp().max(0) as Timestamp
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_table() {
        let roles = RoleTable::new();
        let alice = Address::repeat(1);
        assert!(!roles.has_role(Role::Admin, alice));
        roles.grant(Role::Admin, alice);
        assert!(roles.has_role(Role::Admin, alice));
        assert!(!roles.has_role(Role::Slasher, alice));
        roles.revoke(Role::Admin, alice);
        assert!(!roles.has_role(Role::Admin, alice));
    }

    #[test]
    fn test_treasury_refuses_overdraft() {
        let treasury = MemoryTreasury::new();
        treasury.fund(TokenId::NATIVE, 10);
        assert!(treasury.distribute_reward(TokenId::NATIVE, 11, Address::repeat(1)).is_err());
        treasury.distribute_reward(TokenId::NATIVE, 10, Address::repeat(1)).unwrap();
        assert_eq!(treasury.paid(Address::repeat(1), TokenId::NATIVE), 10);
        assert_eq!(treasury.balance(TokenId::NATIVE), 0);
    }

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new(5);
        clock.advance(10);
        assert_eq!(clock.now(), 15);
        clock.set(1);
        assert_eq!(clock.now(), 1);
    }

    #[test]
    fn test_system_clock_is_recent() {
        // 2020-01-01
        assert!(SystemClock.now() > 1_577_836_800);
    }
}
