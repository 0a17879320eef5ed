//! Benchmark reward settlement across long rate histories
//!
//! Run with: cargo bench -p zeratul-staking

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use std::sync::Arc;
use zeratul_staking::*;

const ROOT: Address = Address::repeat(0xaa);
const USER: Address = Address::repeat(0xa1);
const RATE: u128 = REWARD_PRECISION / 1000;

/// Ledger with one staked validator and `checkpoints` rate changes nobody settled
fn ledger_with_history(checkpoints: u64) -> (LedgerState, Timestamp) {
    let clock = Arc::new(ManualClock::new(0));
    let treasury = Arc::new(MemoryTreasury::new());
    let svc = StakingService::new(
        StakingConfig { min_stake: 1, ..Default::default() },
        Collaborators {
            authorizer: Arc::new(RoleTable::with_superuser(ROOT)),
            bank: Arc::new(MemoryBank::new()),
            clock: clock.clone(),
        },
    )
    .unwrap();
    svc.set_treasury(ROOT, treasury).unwrap();
    svc.add_reward_token(ROOT, TokenId::NATIVE, RATE, RATE * 10).unwrap();
    svc.add_validator(
        ROOT,
        NewValidator {
            id: 1,
            admin: Address::repeat(1),
            withdrawal: Address::repeat(1),
            commission: REWARD_PRECISION / 10,
            max_capacity: 0,
        },
    )
    .unwrap();
    svc.stake(USER, 1, 1_000_000 * REWARD_PRECISION).unwrap();

    for i in 1..=checkpoints {
        clock.set(i * 60);
        let rate = RATE * (1 + i as u128 % 7);
        svc.set_reward_rates(ROOT, &[TokenId::NATIVE], &[rate]).unwrap();
    }
    let now = checkpoints * 60 + 3600;
    (svc.snapshot().unwrap(), now)
}

fn bench_pending_reward(c: &mut Criterion) {
    let mut group = c.benchmark_group("pending_reward");

    for checkpoints in [10u64, 100, 1_000, 10_000] {
        let (state, now) = ledger_with_history(checkpoints);
        group.throughput(Throughput::Elements(checkpoints));
        group.bench_function(format!("{}_checkpoints", checkpoints), |b| {
            b.iter(|| black_box(state.pending_reward(USER, 1, TokenId::NATIVE, black_box(now)).unwrap()))
        });
    }

    group.finish();
}

fn bench_commission_projection(c: &mut Criterion) {
    let (state, now) = ledger_with_history(1_000);

    c.bench_function("accrued_commission_1000_checkpoints", |b| {
        b.iter(|| black_box(state.accrued_commission_at(1, TokenId::NATIVE, black_box(now)).unwrap()))
    });
}

fn bench_snapshot_codec(c: &mut Criterion) {
    let (state, _) = ledger_with_history(1_000);
    let bytes = state.encode().unwrap();

    let mut group = c.benchmark_group("snapshot");
    group.throughput(Throughput::Bytes(bytes.len() as u64));
    group.bench_function("encode", |b| b.iter(|| black_box(state.encode().unwrap())));
    group.bench_function("decode", |b| b.iter(|| black_box(LedgerState::decode(&bytes).unwrap())));
    group.finish();
}

criterion_group!(benches, bench_pending_reward, bench_commission_projection, bench_snapshot_codec);
criterion_main!(benches);
