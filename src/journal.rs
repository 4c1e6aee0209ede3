//! Append-only audit journal.
//!
//! One JSON entry per line. Replaying the journal rebuilds the blocked set
//! and the lifecycle without the ledger: the last checkpoint is the base,
//! and every guard event after it is folded on top.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::engine::events::GuardEvent;
use crate::engine::guard::GuardSnapshot;
use crate::engine::lifecycle::{DisableCause, LifecycleState};
use crate::engine::registry::BlockRecord;
use crate::error::Result;
use crate::logging;
use crate::types::{Address, BlockHeader, BlockNumber};

#[derive(Debug)]
pub struct AuditJournal {
    file: File,
    path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "entry", rename_all = "snake_case")]
pub enum JournalEntry {
    Event { ts: u64, event: GuardEvent },
    Checkpoint { ts: u64, snapshot: GuardSnapshot },
}

/// State rebuilt from a journal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryState {
    pub checkpoint: Option<GuardSnapshot>,
    pub blocked: BTreeMap<Address, BlockRecord>,
    pub lifecycle: LifecycleState,
    pub disable_cause: Option<DisableCause>,
    pub first_trade_block: Option<BlockNumber>,
    pub last_block: Option<BlockNumber>,
    pub events_replayed: usize,
    /// Lines that did not parse (torn writes, foreign content).
    pub skipped_lines: usize,
}

impl Default for RecoveryState {
    fn default() -> Self {
        Self {
            checkpoint: None,
            blocked: BTreeMap::new(),
            lifecycle: LifecycleState::Active,
            disable_cause: None,
            first_trade_block: None,
            last_block: None,
            events_replayed: 0,
            skipped_lines: 0,
        }
    }
}

impl RecoveryState {
    fn reset_to(&mut self, snap: GuardSnapshot) {
        self.blocked = snap.blocked.iter().copied().collect();
        self.lifecycle = snap.lifecycle;
        self.disable_cause = snap.disable_cause;
        self.first_trade_block = snap.first_trade_block;
        self.last_block = snap.current_block.map(|h| h.number);
        self.checkpoint = Some(snap);
    }

    fn fold(&mut self, event: GuardEvent) {
        match event {
            GuardEvent::TradingOpened { block, .. } => {
                self.first_trade_block.get_or_insert(block);
                self.bump(block);
            }
            GuardEvent::Blocked { blocked, reason, block, .. } => {
                self.blocked
                    .entry(blocked)
                    .or_insert(BlockRecord { reason, blocked_at: block });
                self.bump(block);
            }
            GuardEvent::Revoked { blocked, block, .. } => {
                self.blocked.remove(&blocked);
                self.bump(block);
            }
            GuardEvent::Unblocked { address, block } => {
                self.blocked.remove(&address);
                self.bump(block);
            }
            GuardEvent::ProtectionDisabled { cause, block } => {
                if self.lifecycle == LifecycleState::Active {
                    self.lifecycle = LifecycleState::Disabled;
                    self.disable_cause = Some(cause);
                }
                self.bump(block);
            }
        }
        self.events_replayed += 1;
    }

    fn bump(&mut self, block: BlockNumber) {
        self.last_block = Some(self.last_block.map_or(block, |b| b.max(block)));
    }

    /// Snapshot suitable for `LiquidityGuard::from_snapshot`. The last seen
    /// block is restored with a zero timestamp; the host's next
    /// `begin_block` supplies the real clock.
    ///
    /// Recent trades come from the last checkpoint only. Events do not carry
    /// trades, so tallies made after that checkpoint are not recovered.
    pub fn snapshot(&self, pool: Address, admin: Address) -> GuardSnapshot {
        let current_block = match (&self.checkpoint, self.last_block) {
            (Some(cp), Some(n)) => match cp.current_block {
                Some(h) if h.number == n => Some(h),
                _ => Some(BlockHeader::new(n, 0)),
            },
            (_, last) => last.map(|n| BlockHeader::new(n, 0)),
        };
        GuardSnapshot {
            pool,
            admin,
            lifecycle: self.lifecycle,
            disable_cause: self.disable_cause,
            first_trade_block: self.first_trade_block,
            current_block,
            blocked: self.blocked.iter().map(|(a, r)| (*a, *r)).collect(),
            recent_trades: self
                .checkpoint
                .as_ref()
                .map(|cp| cp.recent_trades.clone())
                .unwrap_or_default(),
        }
    }
}

impl AuditJournal {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append_entry(&mut self, entry: &JournalEntry) -> Result<()> {
        let line = serde_json::to_string(entry)?;
        self.file.write_all(line.as_bytes())?;
        self.file.write_all(b"\n")?;
        self.file.flush()?;
        Ok(())
    }

    pub fn append_event(&mut self, event: &GuardEvent) -> Result<()> {
        self.append_entry(&JournalEntry::Event {
            ts: logging::ts_epoch_ms(),
            event: event.clone(),
        })
    }

    pub fn append_events<'a>(&mut self, events: impl IntoIterator<Item = &'a GuardEvent>) -> Result<()> {
        for event in events {
            self.append_event(event)?;
        }
        Ok(())
    }

    pub fn checkpoint(&mut self, snapshot: &GuardSnapshot) -> Result<()> {
        self.append_entry(&JournalEntry::Checkpoint {
            ts: logging::ts_epoch_ms(),
            snapshot: snapshot.clone(),
        })
    }

    /// Raw lines; a missing file is an empty journal.
    pub fn replay(path: impl AsRef<Path>) -> Result<Vec<String>> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(vec![]);
        }
        let reader = BufReader::new(File::open(path)?);
        let mut lines = Vec::new();
        for line in reader.lines() {
            lines.push(line?);
        }
        Ok(lines)
    }

    pub fn recover(path: impl AsRef<Path>) -> Result<RecoveryState> {
        let mut state = RecoveryState::default();
        for line in Self::replay(path)? {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<JournalEntry>(&line) {
                Ok(JournalEntry::Event { event, .. }) => state.fold(event),
                Ok(JournalEntry::Checkpoint { snapshot, .. }) => state.reset_to(snapshot),
                Err(_) => state.skipped_lines += 1,
            }
        }
        Ok(state)
    }

    /// Drop everything written so far, typically right after a checkpoint
    /// has been persisted elsewhere.
    pub fn truncate(&mut self) -> Result<()> {
        self.file.set_len(0)?;
        Ok(())
    }
}
