//! Launch scenarios driven block by block through the guard.

use liquidity_guard::engine::{BlockOutcome, OpOutcome};
use liquidity_guard::types::PERCENT_UNIT;
use liquidity_guard::{
    Address, Amount, BlockHeader, BlockReason, GuardError, GuardEvent, InMemoryLedger, LedgerFacade, LiquidityGuard,
    Operation, ProtectionConfig, Transfer,
};

const EXT: Amount = 1_000_000_000_000_000_000;
const TRAP: Amount = 12_333_333 * EXT;
const LIQUIDITY: Amount = 333_333_333 * EXT;

fn addr(n: u64) -> Address {
    Address::from_low_u64(n)
}

fn owner() -> Address {
    addr(1)
}
fn pool() -> Address {
    addr(1000)
}
fn user1() -> Address {
    addr(11)
}
fn user2() -> Address {
    addr(12)
}
fn user3() -> Address {
    addr(13)
}
fn revoker() -> Address {
    addr(20)
}

fn tx(from: Address, to: Address, amount: Amount) -> Operation {
    Operation::Transfer(Transfer::new(from, to, amount))
}

struct Harness {
    guard: LiquidityGuard,
    ledger: InMemoryLedger,
}

impl Harness {
    fn new(cfg: ProtectionConfig, balances: &[(Address, Amount)]) -> Self {
        Self {
            guard: LiquidityGuard::new(cfg, pool(), owner()).unwrap(),
            ledger: InMemoryLedger::with_balances(balances.iter().copied()),
        }
    }

    fn block(&mut self, number: u64, ops: Vec<Operation>) -> BlockOutcome {
        self.block_at(number, 0, ops)
    }

    fn block_at(&mut self, number: u64, timestamp: u64, ops: Vec<Operation>) -> BlockOutcome {
        self.guard
            .process_block(&mut self.ledger, BlockHeader::new(number, timestamp), ops)
            .unwrap()
    }

    fn send(&mut self, from: Address, to: Address, amount: Amount) -> Result<(), GuardError> {
        self.guard
            .process_transfer(&mut self.ledger, Transfer::new(from, to, amount))
            .map(|_| ())
    }

    fn balance(&self, who: Address) -> Amount {
        self.ledger.balance_of(&who)
    }

    fn revoke_all(&mut self) {
        let report = self
            .guard
            .revoke_blocked(&mut self.ledger, &[user1(), user2(), user3()], revoker(), &owner())
            .unwrap();
        assert!(report.is_complete());
    }

    fn blocked_events(&self) -> Vec<(Address, BlockReason, u64)> {
        self.guard
            .events()
            .iter()
            .filter_map(|e| match e {
                GuardEvent::Blocked { blocked, reason, block, .. } => Some((*blocked, *reason, *block)),
                _ => None,
            })
            .collect()
    }
}

fn failed(outcome: &BlockOutcome, index: usize) -> &str {
    match &outcome.outcomes[index] {
        OpOutcome::Failed { error } => error.as_str(),
        other => panic!("op {} did not fail: {:?}", index, other),
    }
}

fn only_activity_trap() -> ProtectionConfig {
    let mut cfg = ProtectionConfig::all_disabled();
    cfg.activity_trap.enabled = true;
    cfg
}

#[test]
fn test_first_block_buyers_are_trapped() {
    let mut h = Harness::new(ProtectionConfig::default(), &[(owner(), 16_000_000_000 * EXT)]);
    let out = h.block(
        10,
        vec![
            tx(owner(), pool(), LIQUIDITY),
            tx(owner(), user2(), 1),
            tx(owner(), user3(), 2),
            tx(pool(), user1(), 3),
            tx(user1(), user2(), 2),
            tx(user2(), pool(), 1),
            tx(user3(), user2(), 1),
        ],
    );
    assert_eq!(failed(&out, 4), "FirstBlockTrap: blocked");
    assert_eq!(out.outcomes.iter().filter(|o| o.is_failure()).count(), 1);
    assert_eq!(h.guard.first_trade_block(), Some(10));

    h.guard.begin_block(BlockHeader::new(20, 0)).unwrap();
    let err = h.send(user1(), user3(), 1).unwrap_err();
    assert_eq!(err.to_string(), "FirstBlockTrap: blocked");
    assert_eq!(h.balance(user1()), 3);
    assert_eq!(h.balance(user2()), 1);
    assert_eq!(h.balance(user3()), 1);

    h.send(pool(), user1(), 1).unwrap();
    h.send(pool(), user2(), 1).unwrap();
    h.send(user2(), pool(), 1).unwrap();
    h.send(pool(), user3(), 1).unwrap();
    h.send(user3(), pool(), 1).unwrap();

    h.revoke_all();
    assert_eq!(h.balance(revoker()), 4);
    assert_eq!(h.balance(user1()), 0);
    assert_eq!(h.balance(user2()), 1);
    assert_eq!(h.balance(user3()), 1);
}

#[test]
fn test_buyers_above_amount_limit_are_trapped() {
    let mut cfg = ProtectionConfig::default();
    cfg.amount_trap.cumulative = true;
    let mut h = Harness::new(cfg, &[(owner(), 16_000_000_000 * EXT)]);
    h.block(10, vec![tx(owner(), pool(), LIQUIDITY)]);

    let out = h.block(
        13,
        vec![
            tx(owner(), user2(), 1),
            tx(owner(), user3(), 2),
            tx(pool(), user1(), TRAP - 2),
            tx(pool(), user2(), TRAP - 1),
            tx(pool(), user3(), TRAP),
            tx(pool(), user3(), 1),
            tx(user1(), user2(), 2),
            tx(user2(), pool(), 1),
            tx(user3(), user2(), 1),
        ],
    );
    assert_eq!(failed(&out, 8), "LiquidityAmountTrap: blocked");

    // Cumulative: user2 reaches the limit with its second buy.
    h.block(14, vec![tx(pool(), user1(), 1), tx(pool(), user2(), 1)]);
    assert_eq!(
        h.blocked_events(),
        vec![(user3(), BlockReason::AmountTrap, 13), (user2(), BlockReason::AmountTrap, 14)]
    );

    h.guard.begin_block(BlockHeader::new(30, 0)).unwrap();
    assert_eq!(h.send(user2(), user1(), 1).unwrap_err().to_string(), "LiquidityAmountTrap: blocked");
    assert_eq!(h.send(user3(), user1(), 1).unwrap_err().to_string(), "LiquidityAmountTrap: blocked");
    assert_eq!(h.balance(user1()), TRAP - 3);
    assert_eq!(h.balance(user2()), TRAP + 2);
    assert_eq!(h.balance(user3()), TRAP + 3);

    h.send(user1(), pool(), 1).unwrap();
    h.send(pool(), user1(), 1).unwrap();
    h.send(pool(), user2(), 1).unwrap();
    h.send(pool(), user3(), 1).unwrap();
    // Past the window a large buy is fine.
    h.send(pool(), user1(), TRAP).unwrap();
    h.send(user1(), pool(), 1).unwrap();
    assert!(!h.guard.is_blocked(&user1()));

    h.revoke_all();
    assert_eq!(h.balance(revoker()), TRAP + TRAP + 3 + 4);
    assert_eq!(h.balance(user1()), TRAP + TRAP - 4);
    assert_eq!(h.balance(user2()), 0);
    assert_eq!(h.balance(user3()), 0);
}

#[test]
fn test_single_buy_amount_mode_ignores_split_buys() {
    let mut cfg = ProtectionConfig::default();
    cfg.percent_trap.enabled = false;
    let mut h = Harness::new(cfg, &[(pool(), LIQUIDITY), (owner(), 1)]);
    h.block(10, vec![tx(owner(), pool(), 1)]);
    h.block(12, vec![tx(pool(), user1(), TRAP - 1), tx(pool(), user1(), TRAP - 1)]);
    assert!(!h.guard.is_blocked(&user1()));
    h.block(14, vec![tx(pool(), user2(), TRAP)]);
    assert_eq!(h.guard.block_record(&user2()).map(|r| r.reason), Some(BlockReason::AmountTrap));
    // block - first == amount.blocks: outside the window
    h.block(15, vec![tx(pool(), user3(), TRAP)]);
    assert!(!h.guard.is_blocked(&user3()));
}

#[test]
fn test_buyers_above_percent_limit_are_trapped() {
    let mut cfg = ProtectionConfig::default();
    cfg.amount_trap.enabled = false;
    let mut h = Harness::new(cfg, &[(owner(), 10_000)]);
    h.block(10, vec![tx(owner(), pool(), 10_000)]);

    let out = h.block(
        11,
        vec![
            // ceil(4% of 10_000) = 400
            tx(pool(), user1(), 399),
            // ceil(4% of 9_601) = 385
            tx(pool(), user2(), 384),
            // ceil(4% of 9_217) = 369
            tx(pool(), user3(), 369),
            tx(user1(), user2(), 2),
            tx(user2(), pool(), 1),
            tx(user3(), user2(), 1),
        ],
    );
    assert_eq!(failed(&out, 5), "LiquidityPercentTrap: blocked");
    assert!(!h.guard.is_blocked(&user1()));
    assert!(!h.guard.is_blocked(&user2()));
    assert_eq!(h.blocked_events(), vec![(user3(), BlockReason::PercentTrap, 11)]);
    assert_eq!(h.balance(pool()), 10_000 - 399 - 384 - 369 + 1);

    // Same-block buys see the shrinking pool.
    let pool_now = h.balance(pool());
    h.block(12, vec![tx(pool(), user2(), pool_now / 100 * 4 + 100)]);
    assert_eq!(h.guard.block_record(&user2()).map(|r| r.reason), Some(BlockReason::PercentTrap));

    h.block(16, vec![tx(pool(), user1(), 1_000)]);
    assert!(!h.guard.is_blocked(&user1()));

    h.revoke_all();
    assert_ne!(h.balance(revoker()), 0);
    assert_ne!(h.balance(user1()), 0);
    assert_eq!(h.balance(user2()), 0);
    assert_eq!(h.balance(user3()), 0);
}

#[test]
fn test_percent_boundary_on_ten_thousand_pool() {
    let mut cfg = ProtectionConfig::all_disabled();
    cfg.percent_trap.enabled = true;
    cfg.percent_trap.percent = PERCENT_UNIT / 25;

    let mut h = Harness::new(cfg.clone(), &[(pool(), 10_000)]);
    h.block(1, vec![tx(pool(), user1(), 401)]);
    assert!(h.guard.is_blocked(&user1()));

    let mut h = Harness::new(cfg, &[(pool(), 10_000)]);
    h.block(1, vec![tx(pool(), user1(), 399)]);
    assert!(!h.guard.is_blocked(&user1()));
}

#[test]
fn test_eighth_trade_in_window_traps_traders() {
    let mut h = Harness::new(only_activity_trap(), &[(pool(), LIQUIDITY)]);
    let mut ops = vec![
        tx(pool(), user1(), 100),
        tx(user1(), user2(), 10),
        // plain transfers are not trades
        tx(user1(), user3(), 10),
        tx(user3(), user1(), 5),
        tx(user2(), pool(), 5),
    ];
    ops.extend((0..5).map(|_| tx(pool(), user1(), 10)));
    // eighth trade: reverts and traps everyone who traded
    ops.push(tx(user1(), pool(), 10));
    // still over the limit, so this reverts as well
    ops.push(tx(pool(), user1(), 10));
    let out = h.block(10, ops);

    assert!(failed(&out, 10).starts_with("LiquidityActivityTrap"));
    assert!(out.outcomes[11].is_failure());
    assert_eq!(out.outcomes.iter().filter(|o| o.is_failure()).count(), 2);
    assert_eq!(
        h.blocked_events(),
        vec![(user1(), BlockReason::ActivityTrap, 10), (user2(), BlockReason::ActivityTrap, 10)]
    );

    h.guard.begin_block(BlockHeader::new(20, 0)).unwrap();
    assert_eq!(h.send(user2(), user1(), 1).unwrap_err().to_string(), "LiquidityActivityTrap: blocked");
    assert_eq!(h.send(user1(), owner(), 1).unwrap_err().to_string(), "LiquidityActivityTrap: blocked");
    h.send(user3(), user1(), 1).unwrap();
    h.send(pool(), user1(), 1).unwrap();
    h.send(pool(), user2(), 1).unwrap();
    h.send(pool(), user3(), 1).unwrap();

    h.revoke_all();
    assert_eq!(h.balance(revoker()), 137 + 6);
    assert_eq!(h.balance(user1()), 0);
    assert_eq!(h.balance(user2()), 0);
    assert_eq!(h.balance(user3()), 5);
}

#[test]
fn test_trades_spanning_blocks_share_the_window() {
    let mut h = Harness::new(only_activity_trap(), &[(pool(), LIQUIDITY)]);
    let mut ops = vec![
        tx(pool(), user1(), 100),
        tx(user1(), user2(), 10),
        tx(user1(), user3(), 10),
        tx(user3(), user1(), 5),
        tx(user2(), pool(), 5),
    ];
    ops.extend((0..5).map(|_| tx(pool(), user1(), 10)));
    let out = h.block(10, ops);
    assert!(out.outcomes.iter().all(|o| !o.is_failure()));
    assert!(h.guard.registry().is_empty());

    let out = h.block(11, vec![tx(pool(), user1(), 10)]);
    assert!(out.outcomes[0].is_failure());
    assert!(h.guard.is_blocked(&user1()));
    assert!(h.guard.is_blocked(&user2()));
    assert!(!h.guard.is_blocked(&user3()));
    assert!(!h.guard.is_blocked(&pool()));
}

#[test]
fn test_activity_trap_ends_after_window() {
    let mut h = Harness::new(only_activity_trap(), &[(pool(), LIQUIDITY)]);
    h.block(10, vec![tx(pool(), addr(99), 1)]);

    let mut ops = vec![
        tx(pool(), user1(), 100),
        tx(user1(), user2(), 10),
        tx(user1(), user3(), 10),
        tx(user3(), user1(), 5),
        tx(user2(), pool(), 5),
    ];
    ops.extend((0..8).map(|_| tx(pool(), user1(), 10)));
    let out = h.block(13, ops);
    assert!(out.outcomes.iter().all(|o| !o.is_failure()));

    h.send(user1(), user2(), 1).unwrap();
    h.send(user2(), user1(), 1).unwrap();
    h.send(user3(), user1(), 1).unwrap();

    h.revoke_all();
    assert_eq!(h.balance(revoker()), 0);
    assert_ne!(h.balance(user1()), 0);
    assert_ne!(h.balance(user2()), 0);
    assert_ne!(h.balance(user3()), 0);
}

#[test]
fn test_protection_expires_at_deadline() {
    let mut cfg = ProtectionConfig::default();
    cfg.protected_until = Some(1_624_924_799);
    let mut h = Harness::new(cfg, &[(owner(), 16_000_000_000 * EXT)]);
    h.block_at(
        10,
        1_624_000_000,
        vec![
            tx(owner(), pool(), LIQUIDITY),
            tx(owner(), user2(), 1),
            tx(owner(), user3(), 2),
            tx(pool(), user1(), 3),
            tx(user1(), user2(), 2),
            tx(user2(), pool(), 1),
            tx(user3(), user2(), 1),
        ],
    );
    assert_eq!(h.send(user1(), user3(), 1).unwrap_err().to_string(), "FirstBlockTrap: blocked");
    assert!(matches!(
        h.guard.disable_protection(&user1()),
        Err(GuardError::NotAdministrator)
    ));

    h.block_at(11, 1_624_924_799, vec![]);
    assert!(!h.guard.is_protected());
    h.send(user1(), user3(), 1).unwrap();
    h.send(pool(), user1(), 1).unwrap();
    h.send(pool(), user2(), 1).unwrap();
    h.send(user2(), pool(), 1).unwrap();
    h.send(pool(), user3(), 1).unwrap();
    h.send(user3(), pool(), 1).unwrap();

    let err = h
        .guard
        .revoke_blocked(&mut h.ledger, &[user1(), user2(), user3()], revoker(), &owner())
        .unwrap_err();
    assert_eq!(err.to_string(), "protection removed");
}

#[test]
fn test_first_block_trap_catches_zero_amount_buy() {
    let mut h = Harness::new(ProtectionConfig::default(), &[(pool(), 10_000)]);
    h.block(5, vec![tx(pool(), user1(), 0)]);
    assert_eq!(h.guard.block_record(&user1()).map(|r| r.reason), Some(BlockReason::FirstBlockTrap));
}
