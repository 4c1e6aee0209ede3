use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection, OptionalExtension};

use crate::engine::guard::GuardSnapshot;
use crate::engine::lifecycle::{DisableCause, LifecycleState};
use crate::engine::registry::{BlockReason, BlockRecord};
use crate::engine::window::{Direction, TradeEvent};
use crate::types::{Address, BlockHeader};

/// sqlite snapshot of the guard: one meta row, the blocked set and the
/// trades still inside the activity window.
pub struct GuardStore {
    conn: Connection,
}

impl GuardStore {
    pub fn new(path: &str) -> Result<Self> {
        Ok(Self { conn: Connection::open(path)? })
    }

    pub fn in_memory() -> Result<Self> {
        Ok(Self { conn: Connection::open_in_memory()? })
    }

    pub fn init(&mut self) -> Result<()> {
        self.conn.execute_batch(
            "BEGIN;
            CREATE TABLE IF NOT EXISTS guard_meta (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                pool TEXT NOT NULL,
                admin TEXT NOT NULL,
                lifecycle TEXT NOT NULL,
                disable_cause TEXT,
                first_trade_block INTEGER,
                current_block INTEGER,
                current_ts INTEGER,
                saved_at INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS blocked (
                address TEXT PRIMARY KEY,
                reason TEXT NOT NULL,
                blocked_at INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS recent_trades (
                seq INTEGER PRIMARY KEY,
                block INTEGER NOT NULL,
                trader TEXT NOT NULL,
                direction TEXT NOT NULL,
                amount TEXT NOT NULL
            );
            COMMIT;",
        )?;
        Ok(())
    }

    /// Replace the stored state with `snap`.
    pub fn save(&mut self, ts: u64, snap: &GuardSnapshot) -> Result<()> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM blocked", [])?;
        tx.execute("DELETE FROM recent_trades", [])?;
        tx.execute(
            "INSERT OR REPLACE INTO guard_meta
                (id, pool, admin, lifecycle, disable_cause, first_trade_block, current_block, current_ts, saved_at)
             VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                snap.pool.to_string(),
                snap.admin.to_string(),
                lifecycle_str(snap.lifecycle),
                snap.disable_cause.map(cause_str),
                snap.first_trade_block.map(|b| b as i64),
                snap.current_block.map(|h| h.number as i64),
                snap.current_block.map(|h| h.timestamp as i64),
                ts as i64
            ],
        )?;
        for (who, rec) in &snap.blocked {
            tx.execute(
                "INSERT INTO blocked (address, reason, blocked_at) VALUES (?1, ?2, ?3)",
                params![who.to_string(), rec.reason.tag(), rec.blocked_at as i64],
            )?;
        }
        for (seq, t) in snap.recent_trades.iter().enumerate() {
            tx.execute(
                "INSERT INTO recent_trades (seq, block, trader, direction, amount) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    seq as i64,
                    t.block as i64,
                    t.trader.to_string(),
                    direction_str(t.direction),
                    t.amount.to_string()
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn load(&self) -> Result<Option<GuardSnapshot>> {
        type MetaRow = (String, String, String, Option<String>, Option<i64>, Option<i64>, Option<i64>);
        let meta: Option<MetaRow> = self
            .conn
            .query_row(
                "SELECT pool, admin, lifecycle, disable_cause, first_trade_block, current_block, current_ts
                 FROM guard_meta WHERE id = 1",
                [],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?, r.get(5)?, r.get(6)?)),
            )
            .optional()?;
        let Some((pool, admin, lifecycle, cause, first, block, block_ts)) = meta else {
            return Ok(None);
        };

        let mut stmt = self
            .conn
            .prepare("SELECT address, reason, blocked_at FROM blocked ORDER BY address")?;
        let rows = stmt.query_map([], |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?, r.get::<_, i64>(2)?))
        })?;
        let mut blocked = Vec::new();
        for row in rows {
            let (who, reason, at) = row?;
            let who: Address = who.parse().with_context(|| format!("blocked row {}", who))?;
            let reason: BlockReason = reason.parse()?;
            blocked.push((who, BlockRecord { reason, blocked_at: at as u64 }));
        }

        let mut stmt = self
            .conn
            .prepare("SELECT block, trader, direction, amount FROM recent_trades ORDER BY seq")?;
        let rows = stmt.query_map([], |r| {
            Ok((
                r.get::<_, i64>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
            ))
        })?;
        let mut recent_trades = Vec::new();
        for row in rows {
            let (block, trader, direction, amount) = row?;
            recent_trades.push(TradeEvent {
                block: block as u64,
                trader: trader.parse().with_context(|| format!("trade row {}", trader))?,
                direction: parse_direction(&direction)?,
                amount: amount.parse().with_context(|| format!("trade amount {}", amount))?,
            });
        }

        Ok(Some(GuardSnapshot {
            pool: pool.parse()?,
            admin: admin.parse()?,
            lifecycle: parse_lifecycle(&lifecycle)?,
            disable_cause: cause.as_deref().map(parse_cause).transpose()?,
            first_trade_block: first.map(|b| b as u64),
            current_block: block.map(|n| BlockHeader::new(n as u64, block_ts.unwrap_or(0) as u64)),
            blocked,
            recent_trades,
        }))
    }

    pub fn blocked_count(&self) -> Result<usize> {
        let n: i64 = self.conn.query_row("SELECT COUNT(*) FROM blocked", [], |r| r.get(0))?;
        Ok(n as usize)
    }
}

fn lifecycle_str(state: LifecycleState) -> &'static str {
    match state {
        LifecycleState::Active => "active",
        LifecycleState::Disabled => "disabled",
    }
}

fn parse_lifecycle(s: &str) -> Result<LifecycleState> {
    match s {
        "active" => Ok(LifecycleState::Active),
        "disabled" => Ok(LifecycleState::Disabled),
        other => Err(anyhow!("unknown lifecycle state {:?}", other)),
    }
}

fn cause_str(cause: DisableCause) -> &'static str {
    match cause {
        DisableCause::Manual => "manual",
        DisableCause::Expired => "expired",
    }
}

fn parse_cause(s: &str) -> Result<DisableCause> {
    match s {
        "manual" => Ok(DisableCause::Manual),
        "expired" => Ok(DisableCause::Expired),
        other => Err(anyhow!("unknown disable cause {:?}", other)),
    }
}

fn direction_str(direction: Direction) -> &'static str {
    match direction {
        Direction::Buy => "buy",
        Direction::Sell => "sell",
    }
}

fn parse_direction(s: &str) -> Result<Direction> {
    match s {
        "buy" => Ok(Direction::Buy),
        "sell" => Ok(Direction::Sell),
        other => Err(anyhow!("unknown trade direction {:?}", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap() -> GuardSnapshot {
        GuardSnapshot {
            pool: Address::from_low_u64(1000),
            admin: Address::from_low_u64(1),
            lifecycle: LifecycleState::Disabled,
            disable_cause: Some(DisableCause::Expired),
            first_trade_block: Some(7),
            current_block: Some(BlockHeader::new(9, 1_700_000_000)),
            blocked: vec![
                (Address::from_low_u64(2), BlockRecord { reason: BlockReason::FirstBlockTrap, blocked_at: 7 }),
                (Address::from_low_u64(3), BlockRecord { reason: BlockReason::ActivityTrap, blocked_at: 8 }),
            ],
            recent_trades: vec![
                TradeEvent {
                    block: 8,
                    trader: Address::from_low_u64(3),
                    direction: Direction::Buy,
                    amount: u128::MAX,
                },
                TradeEvent {
                    block: 9,
                    trader: Address::from_low_u64(2),
                    direction: Direction::Sell,
                    amount: 5,
                },
            ],
        }
    }

    #[test]
    fn test_empty_store_loads_none() {
        let mut store = GuardStore::in_memory().unwrap();
        store.init().unwrap();
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_save_then_load() {
        let mut store = GuardStore::in_memory().unwrap();
        store.init().unwrap();
        store.save(1, &snap()).unwrap();
        assert_eq!(store.load().unwrap(), Some(snap()));
        assert_eq!(store.blocked_count().unwrap(), 2);
    }

    #[test]
    fn test_save_replaces_blocked_set() {
        let mut store = GuardStore::in_memory().unwrap();
        store.init().unwrap();
        store.save(1, &snap()).unwrap();
        let mut next = snap();
        next.blocked.truncate(1);
        next.recent_trades.clear();
        store.save(2, &next).unwrap();
        assert_eq!(store.blocked_count().unwrap(), 1);
        assert_eq!(store.load().unwrap(), Some(next));
    }
}
