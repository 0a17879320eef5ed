//! Simulation scripts
//!
//! A script is a JSON document of timed steps replayed against an in-memory
//! service:
//!
//! ```json
//! {
//!   "start": 0,
//!   "steps": [
//!     { "op": { "grant": { "role": "RewardManager", "principal": "aa..aa" } } },
//!     { "op": { "fund_treasury": { "token": 0, "amount": 1000000 } } },
//!     { "at": 10, "op": { "stake": { "caller": "07..07", "validator": 1, "amount": 1000 } } },
//!     { "op": { "advance": { "seconds": 3600 } } }
//!   ]
//! }
//! ```
//!
//! Steps without `at` run at the current clock. A step that fails is
//! reported and the replay continues, unless it is marked `"must_succeed"`.

use serde::Deserialize;
use std::sync::Arc;
use zeratul_staking::*;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Script {
    #[serde(default)]
    pub start: Timestamp,
    pub steps: Vec<Step>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Step {
    /// Absolute time for this step; must not go backwards
    #[serde(default)]
    pub at: Option<Timestamp>,
    #[serde(default)]
    pub must_succeed: bool,
    pub op: Op,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Op {
    Grant { role: Role, principal: Address },
    FundTreasury { token: u32, amount: Amount },
    Advance { seconds: Timestamp },

    AddRewardToken { caller: Address, token: u32, rate: u128, max_rate: u128 },
    RemoveRewardToken { caller: Address, token: u32 },
    SetRewardRates { caller: Address, tokens: Vec<u32>, rates: Vec<u128> },
    SetMaxRewardRate { caller: Address, token: u32, max_rate: u128 },
    UpdateParameter { caller: Address, update: ParamUpdate },

    AddValidator {
        caller: Address,
        id: ValidatorId,
        admin: Address,
        withdrawal: Address,
        commission: u128,
        #[serde(default)]
        max_capacity: Amount,
    },
    SetCommission { caller: Address, validator: ValidatorId, rate: u128 },
    SetCapacity { caller: Address, validator: ValidatorId, capacity: Amount },
    SetStatus { caller: Address, validator: ValidatorId, active: bool },

    Stake { caller: Address, validator: ValidatorId, amount: Amount },
    StakeOnBehalf { caller: Address, validator: ValidatorId, beneficiary: Address, amount: Amount },
    Restake { caller: Address, validator: ValidatorId, amount: Amount },
    Unstake {
        caller: Address,
        validator: ValidatorId,
        #[serde(default)]
        amount: Option<Amount>,
    },
    Withdraw { caller: Address },
    RestakeRewards { caller: Address, validator: ValidatorId },
    Claim {
        caller: Address,
        token: u32,
        #[serde(default)]
        validator: Option<ValidatorId>,
    },

    Vote { caller: Address, target: ValidatorId, expires_at: Timestamp },
    Slash { caller: Address, target: ValidatorId },
    CleanupVotes { target: ValidatorId },

    RequestCommission { caller: Address, validator: ValidatorId, token: u32 },
    FinalizeCommission { caller: Address, validator: ValidatorId, token: u32 },
}

/// In-memory world a script runs in
pub struct Simulation {
    pub service: StakingService,
    pub clock: Arc<ManualClock>,
    pub roles: Arc<RoleTable>,
    pub treasury: Arc<MemoryTreasury>,
    pub bank: Arc<MemoryBank>,
}

/// Outcome of one step
pub struct StepReport {
    pub index: usize,
    pub at: Timestamp,
    pub label: String,
    pub result: std::result::Result<String, StakingError>,
}

impl Simulation {
    pub fn new(config: StakingConfig, start: Timestamp) -> Result<Self> {
        let clock = Arc::new(ManualClock::new(start));
        let roles = Arc::new(RoleTable::new());
        let treasury = Arc::new(MemoryTreasury::new());
        let bank = Arc::new(MemoryBank::new());
        let service = StakingService::new(
            config,
            Collaborators { authorizer: roles.clone(), bank: bank.clone(), clock: clock.clone() },
        )?;
        Ok(Self { service, clock, roles, treasury, bank })
    }

    /// Replay every step; stops at the first failing `must_succeed` step
    pub fn run(&self, script: &Script) -> anyhow::Result<Vec<StepReport>> {
        let mut reports = Vec::with_capacity(script.steps.len());
        for (index, step) in script.steps.iter().enumerate() {
            if let Some(at) = step.at {
                let now = self.clock.now();
                anyhow::ensure!(at >= now, "step {index}: time goes backwards ({at} < {now})");
                self.clock.set(at);
            }
            let at = self.clock.now();
            let label = label(&step.op);
            let result = self.apply(&step.op);
            if step.must_succeed {
                if let Err(e) = &result {
                    anyhow::bail!("step {index} ({label}) failed: {e}");
                }
            }
            reports.push(StepReport { index, at, label, result });
        }
        Ok(reports)
    }

    fn apply(&self, op: &Op) -> Result<String> {
        let svc = &self.service;
        match op {
            Op::Grant { role, principal } => {
                self.roles.grant(*role, *principal);
                if *role == Role::Admin {
                    svc.set_treasury(*principal, self.treasury.clone())?;
                }
                Ok(String::new())
            }
            Op::FundTreasury { token, amount } => {
                self.treasury.fund(TokenId(*token), *amount);
                Ok(String::new())
            }
            Op::Advance { seconds } => {
                self.clock.advance(*seconds);
                Ok(format!("now {}", self.clock.now()))
            }

            Op::AddRewardToken { caller, token, rate, max_rate } => {
                svc.add_reward_token(*caller, TokenId(*token), *rate, *max_rate).map(done)
            }
            Op::RemoveRewardToken { caller, token } => svc.remove_reward_token(*caller, TokenId(*token)).map(done),
            Op::SetRewardRates { caller, tokens, rates } => {
                let tokens: Vec<TokenId> = tokens.iter().copied().map(TokenId).collect();
                svc.set_reward_rates(*caller, &tokens, rates).map(done)
            }
            Op::SetMaxRewardRate { caller, token, max_rate } => {
                svc.set_max_reward_rate(*caller, TokenId(*token), *max_rate).map(done)
            }
            Op::UpdateParameter { caller, update } => svc.update_parameter(*caller, *update).map(done),

            Op::AddValidator { caller, id, admin, withdrawal, commission, max_capacity } => svc
                .add_validator(
                    *caller,
                    NewValidator {
                        id: *id,
                        admin: *admin,
                        withdrawal: *withdrawal,
                        commission: *commission,
                        max_capacity: *max_capacity,
                    },
                )
                .map(done),
            Op::SetCommission { caller, validator, rate } => {
                svc.set_validator_commission(*caller, *validator, *rate).map(done)
            }
            Op::SetCapacity { caller, validator, capacity } => {
                svc.set_validator_capacity(*caller, *validator, *capacity).map(done)
            }
            Op::SetStatus { caller, validator, active } => {
                svc.set_validator_status(*caller, *validator, *active).map(done)
            }

            Op::Stake { caller, validator, amount } => svc.stake(*caller, *validator, *amount).map(done),
            Op::StakeOnBehalf { caller, validator, beneficiary, amount } => {
                svc.stake_on_behalf(*caller, *validator, *beneficiary, *amount).map(done)
            }
            Op::Restake { caller, validator, amount } => svc.restake(*caller, *validator, *amount).map(done),
            Op::Unstake { caller, validator, amount } => svc.unstake(*caller, *validator, *amount).map(done),
            Op::Withdraw { caller } => svc.withdraw(*caller).map(|a| format!("withdrew {a}")),
            Op::RestakeRewards { caller, validator } => {
                svc.restake_rewards(*caller, *validator).map(|a| format!("restaked {a}"))
            }
            Op::Claim { caller, token, validator } => {
                let claimed = match validator {
                    Some(v) => svc.claim_reward(*caller, TokenId(*token), *v)?,
                    None => svc.claim_all_rewards(*caller, TokenId(*token))?,
                };
                Ok(format!("claimed {claimed}"))
            }

            Op::Vote { caller, target, expires_at } => svc.vote_to_slash(*caller, *target, *expires_at).map(done),
            Op::Slash { caller, target } => svc.slash_validator(*caller, *target).map(done),
            Op::CleanupVotes { target } => svc.cleanup_expired_votes(*target).map(|n| format!("removed {n}")),

            Op::RequestCommission { caller, validator, token } => svc
                .request_commission_claim(*caller, *validator, TokenId(*token))
                .map(|a| format!("requested {a}")),
            Op::FinalizeCommission { caller, validator, token } => svc
                .finalize_commission_claim(*caller, *validator, TokenId(*token))
                .map(|a| format!("paid {a}")),
        }
    }
}

fn done(_: ()) -> String {
    String::new()
}

fn label(op: &Op) -> String {
    let debug = format!("{op:?}");
    let name = debug.split([' ', '{', '(']).next().unwrap_or_default();
    name.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(byte: u8) -> String {
        hex::encode([byte; 32])
    }

    #[test]
    fn test_script_replays_lifecycle() {
        let root = addr(0xaa);
        let json = format!(
            r#"{{
              "steps": [
                {{ "op": {{ "grant": {{ "role": "ValidatorManager", "principal": "{root}" }} }} }},
                {{ "op": {{ "add_validator": {{ "caller": "{root}", "id": 1, "admin": "{a}", "withdrawal": "{a}", "commission": 0 }} }} }},
                {{ "must_succeed": true, "op": {{ "stake": {{ "caller": "{u}", "validator": 1, "amount": 1000 }} }} }},
                {{ "at": 5, "op": {{ "unstake": {{ "caller": "{u}", "validator": 1 }} }} }},
                {{ "op": {{ "withdraw": {{ "caller": "{u}" }} }} }},
                {{ "op": {{ "advance": {{ "seconds": 100 }} }} }},
                {{ "op": {{ "withdraw": {{ "caller": "{u}" }} }} }}
              ]
            }}"#,
            a = addr(1),
            u = addr(7),
        );
        let script: Script = serde_json::from_str(&json).unwrap();
        let config = StakingConfig { min_stake: 1, cooldown_interval: 100, ..Default::default() };
        let sim = Simulation::new(config, 0).unwrap();
        let reports = sim.run(&script).unwrap();

        assert_eq!(reports[4].result, Err(StakingError::NothingWithdrawable));
        assert_eq!(reports[6].result.as_deref(), Ok("withdrew 1000"));
        assert_eq!(reports[3].label, "Unstake");
        assert_eq!(sim.bank.sent(Address::repeat(7)), 1000);
    }

    #[test]
    fn test_must_succeed_aborts() {
        let json = format!(
            r#"{{ "steps": [ {{ "must_succeed": true, "op": {{ "withdraw": {{ "caller": "{}" }} }} }} ] }}"#,
            addr(7)
        );
        let script: Script = serde_json::from_str(&json).unwrap();
        let sim = Simulation::new(StakingConfig::default(), 0).unwrap();
        assert!(sim.run(&script).is_err());
    }
}
