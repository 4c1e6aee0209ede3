use liquidity_guard::engine::LifecycleState;
use liquidity_guard::journal::AuditJournal;
use liquidity_guard::storage::GuardStore;
use liquidity_guard::{
    Address, BlockHeader, BlockReason, GuardError, InMemoryLedger, LiquidityGuard, Operation, ProtectionConfig,
    Transfer,
};

fn addr(n: u64) -> Address {
    Address::from_low_u64(n)
}

fn tx(from: u64, to: u64, amount: u128) -> Operation {
    Operation::Transfer(Transfer::new(addr(from), addr(to), amount))
}

const POOL: u64 = 1000;
const ADMIN: u64 = 1;

/// Runs a short launch, journaling every event. Leaves 11 and 13 blocked.
fn launch(journal: &mut AuditJournal) -> (LiquidityGuard, InMemoryLedger) {
    let mut guard = LiquidityGuard::new(ProtectionConfig::default(), addr(POOL), addr(ADMIN)).unwrap();
    let mut ledger = InMemoryLedger::with_balances([(addr(POOL), 10_000), (addr(ADMIN), 500)]);
    let blocks = vec![
        (3, vec![tx(ADMIN, POOL, 100), tx(POOL, 11, 5), tx(POOL, 12, 5)]),
        (4, vec![tx(POOL, 13, 1_000)]),
        (
            5,
            vec![Operation::Unblock {
                caller: addr(ADMIN),
                addresses: vec![addr(12)],
            }],
        ),
    ];
    for (n, ops) in blocks {
        guard.process_block(&mut ledger, BlockHeader::new(n, 0), ops).unwrap();
        journal.append_events(&guard.drain_events()).unwrap();
    }
    (guard, ledger)
}

#[test]
fn test_journal_recovery_rebuilds_registry() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("audit.jsonl");
    let (guard, _) = launch(&mut AuditJournal::open(&path).unwrap());

    let state = AuditJournal::recover(&path).unwrap();
    assert_eq!(state.skipped_lines, 0);
    assert_eq!(state.first_trade_block, Some(3));
    assert_eq!(state.lifecycle, LifecycleState::Active);

    let rebuilt = state.snapshot(addr(POOL), addr(ADMIN));
    let live = guard.snapshot();
    assert_eq!(rebuilt.blocked, live.blocked);
    assert_eq!(rebuilt.first_trade_block, live.first_trade_block);
    assert_eq!(
        rebuilt.blocked.iter().map(|(a, r)| (*a, r.reason)).collect::<Vec<_>>(),
        vec![(addr(11), BlockReason::FirstBlockTrap), (addr(13), BlockReason::PercentTrap)]
    );
}

#[test]
fn test_recovered_guard_keeps_enforcing() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("audit.jsonl");
    let (_, mut ledger) = launch(&mut AuditJournal::open(&path).unwrap());

    let state = AuditJournal::recover(&path).unwrap();
    let mut guard =
        LiquidityGuard::from_snapshot(ProtectionConfig::default(), state.snapshot(addr(POOL), addr(ADMIN))).unwrap();
    guard.begin_block(BlockHeader::new(40, 0)).unwrap();

    let err = guard
        .process_transfer(&mut ledger, Transfer::new(addr(13), addr(2), 1))
        .unwrap_err();
    assert!(matches!(err, GuardError::TransferBlocked { reason: BlockReason::PercentTrap }));
    guard
        .process_transfer(&mut ledger, Transfer::new(addr(12), addr(2), 1))
        .unwrap();
}

#[test]
fn test_store_round_trips_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let journal_path = dir.path().join("audit.jsonl");
    let db_path = dir.path().join("guard.db");
    let (mut guard, _) = launch(&mut AuditJournal::open(&journal_path).unwrap());
    guard.disable_protection(&addr(ADMIN)).unwrap();

    {
        let mut store = GuardStore::new(db_path.to_str().unwrap()).unwrap();
        store.init().unwrap();
        store.save(1, &guard.snapshot()).unwrap();
    }

    let store = GuardStore::new(db_path.to_str().unwrap()).unwrap();
    let loaded = store.load().unwrap().unwrap();
    assert_eq!(loaded, guard.snapshot());

    let restored = LiquidityGuard::from_snapshot(ProtectionConfig::default(), loaded).unwrap();
    assert!(!restored.is_protected());
    assert_eq!(restored.snapshot(), guard.snapshot());
}

#[test]
fn test_checkpoint_then_events() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("audit.jsonl");
    let mut journal = AuditJournal::open(&path).unwrap();
    let (mut guard, mut ledger) = launch(&mut journal);
    journal.checkpoint(&guard.snapshot()).unwrap();

    let report = guard
        .revoke_blocked(&mut ledger, &[addr(11)], addr(999), &addr(ADMIN))
        .unwrap();
    assert!(report.is_complete());
    journal.append_events(&guard.drain_events()).unwrap();

    let state = AuditJournal::recover(&path).unwrap();
    assert!(state.checkpoint.is_some());
    assert!(!state.blocked.contains_key(&addr(11)));
    assert!(state.blocked.contains_key(&addr(13)));
    assert_eq!(state.snapshot(addr(POOL), addr(ADMIN)).blocked, guard.snapshot().blocked);
}
