//! One call's working view of the ledger
//!
//! A session mutates the state inside an open transaction, collects events
//! and the external payouts the call owes. The service commits all three
//! together or rolls all three back.

use crate::events::LedgerEvent;
use crate::store::LedgerState;
use crate::types::{Address, Amount, Timestamp, TokenId};

/// Asset movement owed to the outside world once the call succeeds
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Payout {
    /// Reward token paid by the treasury
    Reward { token: TokenId, amount: Amount, recipient: Address },
    /// Base-asset principal sent out by the ledger
    Principal { recipient: Address, amount: Amount },
}

pub(crate) struct Session<'a> {
    pub(crate) state: &'a mut LedgerState,
    pub(crate) now: Timestamp,
    pub(crate) events: Vec<LedgerEvent>,
    pub(crate) payouts: Vec<Payout>,
}

impl<'a> Session<'a> {
    pub(crate) fn new(state: &'a mut LedgerState, now: Timestamp) -> Self {
        Self { state, now, events: Vec::new(), payouts: Vec::new() }
    }

    pub(crate) fn emit(&mut self, event: LedgerEvent) {
        self.events.push(event);
    }

    pub(crate) fn pay(&mut self, payout: Payout) {
        self.payouts.push(payout);
    }
}
