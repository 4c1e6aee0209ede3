//! Trap evaluation: the decision for a single proposed transfer.
//!
//! Evaluation is read-only. It returns an [`Evaluation`] describing what
//! would change; [`super::guard::LiquidityGuard::commit`] applies it.
//!
//! Order of checks for a transfer in block `b`:
//!
//! | Step | Applies to | Effect on match |
//! |------|-----------|-----------------|
//! | blocked sender | every transfer | deny, no side effects |
//! | activity trap | buys and sells | deny, block every in-window trader |
//! | first block trap | buys | block buyer, transfer proceeds |
//! | amount trap | buys | block buyer, transfer proceeds |
//! | percent trap | buys | block buyer, transfer proceeds |
//!
//! The activity trap runs first among the traps because it reverts the
//! trade; a reverted buy never reaches the buy traps.

use std::collections::HashSet;

use crate::config::ProtectionConfig;
use crate::error::GuardError;
use crate::ledger::LedgerFacade;
use crate::types::{Address, Amount, BlockNumber, Transfer, TransferKind, PERCENT_UNIT};

use super::registry::{BlockReason, BlockRegistry};
use super::window::{ActivityWindow, Direction};

#[derive(Debug)]
pub enum Verdict {
    Allow,
    Deny(GuardError),
}

/// Outcome of evaluating one transfer, not yet applied.
#[derive(Debug)]
pub struct Evaluation {
    pub transfer: Transfer,
    pub kind: TransferKind,
    pub block: BlockNumber,
    /// Protection was off; nothing is recorded.
    pub bypassed: bool,
    /// This trade is the first one ever seen.
    pub opens_trading: bool,
    /// Addresses that become blocked, in the order they were found.
    pub new_blocks: Vec<(Address, BlockReason)>,
    pub verdict: Verdict,
}

impl Evaluation {
    pub fn passthrough(transfer: Transfer, kind: TransferKind, block: BlockNumber) -> Self {
        Self {
            transfer,
            kind,
            block,
            bypassed: true,
            opens_trading: false,
            new_blocks: Vec::new(),
            verdict: Verdict::Allow,
        }
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self.verdict, Verdict::Allow)
    }

    /// Trade leg as seen by the activity window.
    pub fn trade(&self) -> Option<(Address, Direction)> {
        match self.kind {
            TransferKind::Buy => Some((self.transfer.to, Direction::Buy)),
            TransferKind::Sell => Some((self.transfer.from, Direction::Sell)),
            TransferKind::Plain => None,
        }
    }
}

/// State the evaluator reads.
#[derive(Debug, Clone, Copy)]
pub struct EvalContext<'a> {
    pub block: BlockNumber,
    pub first_trade_block: Option<BlockNumber>,
    pub window: &'a ActivityWindow,
    pub registry: &'a BlockRegistry,
}

#[derive(Debug, Clone)]
pub struct TrapEvaluator {
    cfg: ProtectionConfig,
    pool: Address,
}

impl TrapEvaluator {
    pub fn new(cfg: ProtectionConfig, pool: Address) -> Self {
        Self { cfg, pool }
    }

    pub fn config(&self) -> &ProtectionConfig {
        &self.cfg
    }

    pub fn pool(&self) -> Address {
        self.pool
    }

    pub fn evaluate<L: LedgerFacade + ?Sized>(
        &self,
        ctx: EvalContext<'_>,
        ledger: &L,
        transfer: Transfer,
    ) -> Evaluation {
        let kind = transfer.kind(&self.pool);
        let mut eval = Evaluation {
            transfer,
            kind,
            block: ctx.block,
            bypassed: false,
            opens_trading: false,
            new_blocks: Vec::new(),
            verdict: Verdict::Allow,
        };

        if let Some(rec) = ctx.registry.record(&transfer.from) {
            eval.verdict = Verdict::Deny(GuardError::TransferBlocked { reason: rec.reason });
            return eval;
        }

        let (trader, direction) = match eval.trade() {
            Some(leg) => leg,
            None => return eval,
        };

        eval.opens_trading = ctx.first_trade_block.is_none();
        let first = ctx.first_trade_block.unwrap_or(ctx.block);
        let age = ctx.block.saturating_sub(first);

        if let Some(err) = self.activity_trap(ctx, age, trader, &mut eval.new_blocks) {
            eval.verdict = Verdict::Deny(err);
            return eval;
        }

        if direction == Direction::Buy && !ctx.registry.is_blocked(&trader) {
            let pool_balance = ledger.pool_balance(&self.pool);
            if let Some(reason) = self.buy_trap(ctx, first, age, trader, transfer.amount, pool_balance) {
                eval.new_blocks.push((trader, reason));
            }
        }

        eval
    }

    /// Counts in-window trades including this one; over the limit every
    /// trader seen in the window is caught.
    fn activity_trap(
        &self,
        ctx: EvalContext<'_>,
        age: BlockNumber,
        trader: Address,
        new_blocks: &mut Vec<(Address, BlockReason)>,
    ) -> Option<GuardError> {
        let cfg = &self.cfg.activity_trap;
        if !cfg.enabled || age >= cfg.blocks {
            return None;
        }
        let in_window = ctx.window.trades_in_window(ctx.block, cfg.blocks);
        let trades = in_window.clone().count() + 1;
        if trades <= cfg.count as usize {
            return None;
        }

        let mut seen = HashSet::new();
        for who in in_window.map(|t| t.trader).chain(std::iter::once(trader)) {
            if who == self.pool || !seen.insert(who) || ctx.registry.is_blocked(&who) {
                continue;
            }
            new_blocks.push((who, BlockReason::ActivityTrap));
        }
        Some(GuardError::TriggerReverted {
            trades: u32::try_from(trades).unwrap_or(u32::MAX),
            limit: cfg.count,
        })
    }

    /// First matching buy trap, in precedence order.
    fn buy_trap(
        &self,
        ctx: EvalContext<'_>,
        first: BlockNumber,
        age: BlockNumber,
        buyer: Address,
        amount: Amount,
        pool_balance: Amount,
    ) -> Option<BlockReason> {
        if self.cfg.first_block_trap.enabled && ctx.block == first {
            return Some(BlockReason::FirstBlockTrap);
        }

        let amount_cfg = &self.cfg.amount_trap;
        if amount_cfg.enabled && age < amount_cfg.blocks {
            let measured = if amount_cfg.cumulative {
                ctx.window
                    .bought_in_window(&buyer, ctx.block, age + 1)
                    .saturating_add(amount)
            } else {
                amount
            };
            if measured >= amount_cfg.amount {
                return Some(BlockReason::AmountTrap);
            }
        }

        let percent_cfg = &self.cfg.percent_trap;
        if percent_cfg.enabled && age < percent_cfg.blocks {
            let measured = if percent_cfg.cumulative {
                ctx.window
                    .bought_in_window(&buyer, ctx.block, 1)
                    .saturating_add(amount)
            } else {
                amount
            };
            if measured >= percent_threshold(pool_balance, percent_cfg.percent) {
                return Some(BlockReason::PercentTrap);
            }
        }

        None
    }
}

/// Smallest amount `a` with `a * PERCENT_UNIT >= percent * balance`.
///
/// Split on `PERCENT_UNIT` so the products stay inside u128 for 18-decimal
/// supplies; `percent` is at most `PERCENT_UNIT`.
pub fn percent_threshold(balance: Amount, percent: u128) -> Amount {
    let whole = (balance / PERCENT_UNIT).saturating_mul(percent);
    let frac = (balance % PERCENT_UNIT) * percent.min(PERCENT_UNIT);
    whole.saturating_add(frac.div_ceil(PERCENT_UNIT))
}
