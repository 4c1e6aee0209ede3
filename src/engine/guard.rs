//! The guard: transfer hook, block reducer and admin surface.
//!
//! ```text
//! transfer ─► lifecycle ──(disabled)──────────────────────► allow
//!                 │
//!              (active)
//!                 ▼
//!           TrapEvaluator ─► Evaluation ─► ledger.transfer ─► commit
//!             ▲       ▲                                         │
//!       ActivityWindow BlockRegistry ◄──────────────────────────┘
//! ```
//!
//! Transfers inside a block are reduced strictly left to right; each sees
//! the balances, tallies and flags left by the ones before it.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::ProtectionConfig;
use crate::error::{GuardError, LedgerError, Result};
use crate::ledger::{LedgerFacade, Move};
use crate::logging;
use crate::types::{Address, BlockHeader, BlockNumber, Transfer, TransferKind};

use super::events::{GuardEvent, Operation};
use super::lifecycle::{DisableCause, LifecycleEvent, LifecycleState, ProtectionLifecycle};
use super::registry::{BlockReason, BlockRecord, BlockRegistry};
use super::traps::{EvalContext, Evaluation, TrapEvaluator, Verdict};
use super::window::{ActivityWindow, TradeEvent};

/// What an applied transfer did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferReceipt {
    pub kind: TransferKind,
    pub newly_blocked: Vec<(Address, BlockReason)>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchFailure {
    pub index: usize,
    pub addresses: Vec<Address>,
    pub error: LedgerError,
}

/// Result of a batched revoke. Batches before `failed_batch` stay applied.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RevokeReport {
    pub revoked: Vec<Move>,
    /// Listed addresses that were not blocked.
    pub skipped: Vec<Address>,
    pub batches_applied: usize,
    pub failed_batch: Option<BatchFailure>,
}

impl RevokeReport {
    pub fn is_complete(&self) -> bool {
        self.failed_batch.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OpOutcome {
    Transfer { receipt: TransferReceipt },
    Revoke { report: RevokeReport },
    Unblock { cleared: Vec<Address> },
    Disable,
    Failed { error: String },
}

impl OpOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, OpOutcome::Failed { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockOutcome {
    pub block: BlockNumber,
    pub outcomes: Vec<OpOutcome>,
    pub state_digest: String,
}

/// Persistable guard state. `recent_trades` holds what is still inside the
/// activity ring, oldest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardSnapshot {
    pub pool: Address,
    pub admin: Address,
    pub lifecycle: LifecycleState,
    pub disable_cause: Option<DisableCause>,
    pub first_trade_block: Option<BlockNumber>,
    pub current_block: Option<BlockHeader>,
    pub blocked: Vec<(Address, BlockRecord)>,
    #[serde(default)]
    pub recent_trades: Vec<TradeEvent>,
}

#[derive(Debug, Clone)]
pub struct LiquidityGuard {
    evaluator: TrapEvaluator,
    admin: Address,
    lifecycle: ProtectionLifecycle,
    window: ActivityWindow,
    registry: BlockRegistry,
    first_trade_block: Option<BlockNumber>,
    current: Option<BlockHeader>,
    events: Vec<GuardEvent>,
}

impl LiquidityGuard {
    pub fn new(cfg: ProtectionConfig, pool: Address, admin: Address) -> Result<Self> {
        cfg.validate()?;
        if pool == admin {
            return Err(GuardError::InvalidConfig("pool and administrator must differ".into()));
        }
        Ok(Self {
            window: ActivityWindow::new(cfg.window_capacity()),
            lifecycle: ProtectionLifecycle::new(cfg.protected_until),
            evaluator: TrapEvaluator::new(cfg, pool),
            admin,
            registry: BlockRegistry::new(),
            first_trade_block: None,
            current: None,
            events: Vec::new(),
        })
    }

    /// Rebuild a guard from `snap`. Recent trades are replayed into the
    /// activity ring so window tallies continue where they left off.
    pub fn from_snapshot(cfg: ProtectionConfig, snap: GuardSnapshot) -> Result<Self> {
        let mut guard = Self::new(cfg, snap.pool, snap.admin)?;
        guard.lifecycle = ProtectionLifecycle::restore(
            snap.lifecycle,
            snap.disable_cause,
            guard.config().protected_until,
        );
        guard.first_trade_block = snap.first_trade_block;
        guard.current = snap.current_block;
        guard.registry = snap.blocked.into_iter().collect();
        for t in snap.recent_trades {
            guard.window.record_trade(t.block, t.trader, t.direction, t.amount);
        }
        Ok(guard)
    }

    pub fn snapshot(&self) -> GuardSnapshot {
        GuardSnapshot {
            pool: self.pool(),
            admin: self.admin,
            lifecycle: self.lifecycle.state(),
            disable_cause: self.lifecycle.cause(),
            first_trade_block: self.first_trade_block,
            current_block: self.current,
            blocked: self.registry.entries(),
            recent_trades: self.recent_trades(),
        }
    }

    fn recent_trades(&self) -> Vec<TradeEvent> {
        let cap = self.window.capacity() as u64;
        self.window.trades_in_window(self.block_number(), cap).copied().collect()
    }

    // ---------------------------------------------------------------------
    // Queries
    // ---------------------------------------------------------------------

    pub fn config(&self) -> &ProtectionConfig {
        self.evaluator.config()
    }

    pub fn pool(&self) -> Address {
        self.evaluator.pool()
    }

    pub fn admin(&self) -> Address {
        self.admin
    }

    pub fn is_protected(&self) -> bool {
        self.lifecycle.is_active()
    }

    pub fn lifecycle(&self) -> &ProtectionLifecycle {
        &self.lifecycle
    }

    pub fn is_blocked(&self, who: &Address) -> bool {
        self.registry.is_blocked(who)
    }

    pub fn block_record(&self, who: &Address) -> Option<&BlockRecord> {
        self.registry.record(who)
    }

    pub fn registry(&self) -> &BlockRegistry {
        &self.registry
    }

    pub fn window(&self) -> &ActivityWindow {
        &self.window
    }

    pub fn first_trade_block(&self) -> Option<BlockNumber> {
        self.first_trade_block
    }

    pub fn current_block(&self) -> Option<BlockHeader> {
        self.current
    }

    fn block_number(&self) -> BlockNumber {
        self.current.map(|h| h.number).unwrap_or(0)
    }

    pub fn events(&self) -> &[GuardEvent] {
        &self.events
    }

    pub fn drain_events(&mut self) -> Vec<GuardEvent> {
        std::mem::take(&mut self.events)
    }

    fn emit(&mut self, event: GuardEvent) {
        logging::log_guard_event(&event);
        self.events.push(event);
    }

    // ---------------------------------------------------------------------
    // Block lifecycle
    // ---------------------------------------------------------------------

    /// Open `header` as the current block. Reopening the current block is
    /// allowed; going back is not.
    pub fn begin_block(&mut self, header: BlockHeader) -> Result<()> {
        if let Some(cur) = self.current {
            if header.number < cur.number {
                return Err(GuardError::BlockOutOfOrder {
                    current: cur.number,
                    got: header.number,
                });
            }
        }
        self.current = Some(header);
        if let Some(cause) = self.lifecycle.apply(LifecycleEvent::Clock { timestamp: header.timestamp })? {
            self.emit(GuardEvent::ProtectionDisabled {
                cause,
                block: header.number,
            });
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Transfer hook
    // ---------------------------------------------------------------------

    /// Decide a transfer without changing anything.
    pub fn evaluate<L: LedgerFacade + ?Sized>(&self, ledger: &L, transfer: Transfer) -> Evaluation {
        let block = self.block_number();
        if !self.lifecycle.is_active() {
            return Evaluation::passthrough(transfer, transfer.kind(&self.pool()), block);
        }
        let ctx = EvalContext {
            block,
            first_trade_block: self.first_trade_block,
            window: &self.window,
            registry: &self.registry,
        };
        self.evaluator.evaluate(ctx, ledger, transfer)
    }

    /// Apply an evaluation. For an allowed transfer the caller must already
    /// have moved the balance; if the move failed, drop the evaluation
    /// instead. Denials still record the flags they raised.
    pub fn commit(&mut self, eval: Evaluation) -> Result<TransferReceipt> {
        let pool = self.pool();
        for (who, reason) in &eval.new_blocks {
            if self.registry.block(*who, *reason, eval.block) {
                self.emit(GuardEvent::Blocked {
                    pool,
                    blocked: *who,
                    reason: *reason,
                    block: eval.block,
                });
            }
        }

        if let Verdict::Deny(err) = eval.verdict {
            logging::log_denied(&eval.transfer, eval.block, &err);
            return Err(err);
        }

        if !eval.bypassed {
            if let Some((trader, direction)) = eval.trade() {
                if eval.opens_trading && self.first_trade_block.is_none() {
                    self.first_trade_block = Some(eval.block);
                    self.emit(GuardEvent::TradingOpened { pool, block: eval.block });
                }
                self.window.record_trade(eval.block, trader, direction, eval.transfer.amount);
            }
        }

        Ok(TransferReceipt {
            kind: eval.kind,
            newly_blocked: eval.new_blocks,
        })
    }

    /// Evaluate, move the balance through the ledger, then commit.
    pub fn process_transfer<L: LedgerFacade + ?Sized>(
        &mut self,
        ledger: &mut L,
        transfer: Transfer,
    ) -> Result<TransferReceipt> {
        let eval = self.evaluate(&*ledger, transfer);
        if eval.is_allowed() {
            if let Err(err) = ledger.transfer(&transfer.from, &transfer.to, transfer.amount) {
                let err = GuardError::from(err);
                logging::log_denied(&transfer, eval.block, &err);
                return Err(err);
            }
        }
        self.commit(eval)
    }

    /// Reduce one block's operations in submission order.
    ///
    /// Fails only when the block itself cannot be opened; individual
    /// operations report their own failures.
    pub fn process_block<L: LedgerFacade + ?Sized>(
        &mut self,
        ledger: &mut L,
        header: BlockHeader,
        ops: Vec<Operation>,
    ) -> Result<BlockOutcome> {
        self.begin_block(header)?;
        let mut outcomes = Vec::with_capacity(ops.len());
        for op in ops {
            let outcome = match op {
                Operation::Transfer(t) => self
                    .process_transfer(ledger, t)
                    .map(|receipt| OpOutcome::Transfer { receipt }),
                Operation::Revoke { caller, addresses, to } => self
                    .revoke_blocked(ledger, &addresses, to, &caller)
                    .map(|report| OpOutcome::Revoke { report }),
                Operation::Unblock { caller, addresses } => self
                    .unblock(&addresses, &caller)
                    .map(|cleared| OpOutcome::Unblock { cleared }),
                Operation::Disable { caller } => self.disable_protection(&caller).map(|_| OpOutcome::Disable),
            };
            outcomes.push(outcome.unwrap_or_else(|err| OpOutcome::Failed { error: err.to_string() }));
        }

        let state_digest = self.state_digest();
        let failed = outcomes.iter().filter(|o| o.is_failure()).count();
        logging::log_block_summary(header.number, outcomes.len(), failed, self.registry.len(), &state_digest);
        Ok(BlockOutcome {
            block: header.number,
            outcomes,
            state_digest,
        })
    }

    // ---------------------------------------------------------------------
    // Admin surface
    // ---------------------------------------------------------------------

    fn ensure_admin(&self, caller: &Address) -> Result<()> {
        if *caller == self.admin {
            Ok(())
        } else {
            Err(GuardError::NotAdministrator)
        }
    }

    pub fn disable_protection(&mut self, caller: &Address) -> Result<()> {
        self.ensure_admin(caller)?;
        if let Some(cause) = self.lifecycle.apply(LifecycleEvent::Disable)? {
            self.emit(GuardEvent::ProtectionDisabled {
                cause,
                block: self.block_number(),
            });
        }
        Ok(())
    }

    /// Seize the full balance of every listed blocked address into `to`.
    ///
    /// Works through `revoke_batch_size` addresses at a time. Each batch is
    /// all-or-nothing; the first failing batch stops the run and earlier
    /// batches stay applied.
    pub fn revoke_blocked<L: LedgerFacade + ?Sized>(
        &mut self,
        ledger: &mut L,
        addresses: &[Address],
        to: Address,
        caller: &Address,
    ) -> Result<RevokeReport> {
        self.ensure_admin(caller)?;
        self.lifecycle.ensure_active()?;

        let block = self.block_number();
        let mut report = RevokeReport::default();
        for (index, chunk) in addresses.chunks(self.config().revoke_batch_size).enumerate() {
            let mut moves = Vec::new();
            let mut seized: Vec<(Address, u128)> = Vec::new();
            for who in chunk {
                if seized.iter().any(|(a, _)| a == who) {
                    continue;
                }
                if !self.registry.is_blocked(who) {
                    report.skipped.push(*who);
                    continue;
                }
                let balance = ledger.balance_of(who);
                if balance > 0 && *who != to {
                    moves.push(Move {
                        from: *who,
                        to,
                        amount: balance,
                    });
                }
                seized.push((*who, if *who == to { 0 } else { balance }));
            }

            if let Err(error) = ledger.apply_batch(&moves) {
                logging::log_revoke_failure(index, chunk.len(), &error);
                report.failed_batch = Some(BatchFailure {
                    index,
                    addresses: chunk.to_vec(),
                    error,
                });
                break;
            }

            for (who, amount) in seized {
                self.registry.clear(&who);
                self.emit(GuardEvent::Revoked {
                    blocked: who,
                    to,
                    amount,
                    block,
                });
            }
            report.revoked.extend(moves);
            report.batches_applied += 1;
        }
        Ok(report)
    }

    /// Clear flags without moving funds. Returns the addresses that were
    /// actually blocked.
    pub fn unblock(&mut self, addresses: &[Address], caller: &Address) -> Result<Vec<Address>> {
        self.ensure_admin(caller)?;
        self.lifecycle.ensure_active()?;

        let block = self.block_number();
        let mut cleared = Vec::new();
        for chunk in addresses.chunks(self.config().revoke_batch_size) {
            for who in chunk {
                if self.registry.clear(who).is_some() {
                    cleared.push(*who);
                    self.emit(GuardEvent::Unblocked { address: *who, block });
                }
            }
        }
        Ok(cleared)
    }

    // ---------------------------------------------------------------------
    // Replay validation
    // ---------------------------------------------------------------------

    /// sha256 over the canonical guard state, hex encoded.
    pub fn state_digest(&self) -> String {
        let mut h = Sha256::new();
        h.update(self.pool().as_bytes());
        h.update(self.admin.as_bytes());
        h.update([self.lifecycle.is_active() as u8]);
        h.update([self.first_trade_block.is_some() as u8]);
        h.update(self.first_trade_block.unwrap_or(0).to_be_bytes());
        h.update(self.block_number().to_be_bytes());
        for (who, rec) in self.registry.entries() {
            h.update(who.as_bytes());
            h.update(rec.reason.tag().as_bytes());
            h.update(rec.blocked_at.to_be_bytes());
        }
        for trade in self.recent_trades() {
            h.update(trade.block.to_be_bytes());
            h.update(trade.trader.as_bytes());
            h.update([trade.direction as u8]);
            h.update(trade.amount.to_be_bytes());
        }
        hex::encode(h.finalize())
    }
}
