//! Zeratul Staking - Delegated Staking Ledger
//!
//! Users delegate base-asset stake to validators, earn several reward tokens
//! at piecewise-constant rates minus validator commission, unstake through a
//! cooldown, and withdraw. Validators can be slashed by unanimous peer vote.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                         StakingService                              │
//! │   re-entry guard · role checks · run → pay out → commit / undo       │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │  ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌────────────┐        │
//! │  │ lifecycle │  │ registry  │  │ slashing  │  │ commission │        │
//! │  │ stake     │  │ validators│  │ votes     │  │ two-phase  │        │
//! │  │ unstake   │  │ capacity  │  │ unanimity │  │ claims     │        │
//! │  └─────┬─────┘  └─────┬─────┘  └─────┬─────┘  └─────┬──────┘        │
//! │        └──────────────┴───────┬──────┴──────────────┘               │
//! │                               ▼                                     │
//! │                ┌─────────────────────────────┐                      │
//! │                │ accrual: checkpointed index │                      │
//! │                └──────────────┬──────────────┘                      │
//! │                               ▼                                     │
//! │                ┌─────────────────────────────┐                      │
//! │                │ store: LedgerState          │                      │
//! │                └─────────────────────────────┘                      │
//! └─────────────────────────────────────────────────────────────────────┘
//!        │ Authorizer        │ Treasury          │ BaseAssetBank   │ Clock
//!        ▼                   ▼                   ▼                 ▼
//! ```
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use zeratul_staking::*;
//!
//! let root = Address::repeat(0xaa);
//! let clock = Arc::new(ManualClock::new(0));
//! let svc = StakingService::new(
//!     StakingConfig { min_stake: 1, ..Default::default() },
//!     Collaborators {
//!         authorizer: Arc::new(RoleTable::with_superuser(root)),
//!         bank: Arc::new(MemoryBank::new()),
//!         clock: clock.clone(),
//!     },
//! )?;
//!
//! let admin = Address::repeat(1);
//! svc.add_validator(root, NewValidator {
//!     id: 1, admin, withdrawal: admin, commission: 0, max_capacity: 0,
//! })?;
//! svc.stake(Address::repeat(7), 1, 1000)?;
//! assert_eq!(svc.total_staked()?, 1000);
//! # Ok::<(), StakingError>(())
//! ```

pub mod types;
pub mod error;
pub mod math;
pub mod config;
pub mod events;
pub mod store;
pub mod collab;
pub mod registry;
pub mod admin;
pub mod service;

mod journal;
mod session;
mod accrual;
mod lifecycle;
mod rewards;
mod slashing;
mod commission;

pub use admin::ParamUpdate;
pub use collab::{
    Authorizer, BaseAssetBank, Clock, CollaboratorError, ManualClock, MemoryBank, MemoryTreasury, RoleTable,
    SystemClock, Treasury,
};
pub use config::StakingConfig;
pub use error::{ErrorKind, Result, StakingError};
pub use events::LedgerEvent;
pub use registry::NewValidator;
pub use service::{Collaborators, StakingService};
pub use store::LedgerState;
pub use types::*;
