//! Replays a scenario file through the guard.
//!
//! Usage: `liquidity-guard <scenario.json>`
//!
//! Prints one JSON line per block on stdout. `JOURNAL_PATH` appends guard
//! events to an audit journal; `STORE_PATH` saves the final state to sqlite.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use serde_json::json;

use liquidity_guard::engine::Operation;
use liquidity_guard::journal::AuditJournal;
use liquidity_guard::logging::{self, log, obj, v_str, Domain, Level};
use liquidity_guard::storage::GuardStore;
use liquidity_guard::types::amount_string;
use liquidity_guard::{Address, Amount, BlockHeader, InMemoryLedger, LiquidityGuard, ProtectionConfig};

#[derive(Debug, Deserialize)]
struct Scenario {
    /// Falls back to `ProtectionConfig::from_env()` when absent.
    #[serde(default)]
    config: Option<ProtectionConfig>,
    pool: Address,
    admin: Address,
    #[serde(default)]
    balances: Vec<Balance>,
    blocks: Vec<ScenarioBlock>,
}

#[derive(Debug, Deserialize)]
struct Balance {
    address: Address,
    #[serde(with = "amount_string")]
    amount: Amount,
}

#[derive(Debug, Deserialize)]
struct ScenarioBlock {
    number: u64,
    #[serde(default)]
    timestamp: u64,
    #[serde(default)]
    ops: Vec<Operation>,
}

fn main() -> Result<()> {
    let path = match std::env::args().nth(1) {
        Some(p) => p,
        None => bail!("usage: liquidity-guard <scenario.json>"),
    };
    let raw = std::fs::read_to_string(&path).with_context(|| format!("reading {}", path))?;
    let scenario: Scenario = serde_json::from_str(&raw).with_context(|| format!("parsing {}", path))?;

    let cfg = scenario.config.unwrap_or_else(ProtectionConfig::from_env);
    logging::log_startup(
        &scenario.pool.to_string(),
        &scenario.admin.to_string(),
        serde_json::to_value(&cfg)?,
    );

    let mut guard = LiquidityGuard::new(cfg, scenario.pool, scenario.admin)?;
    let mut ledger = InMemoryLedger::with_balances(scenario.balances.iter().map(|b| (b.address, b.amount)));
    let mut journal = match std::env::var("JOURNAL_PATH") {
        Ok(p) => Some(AuditJournal::open(&p)?),
        Err(_) => None,
    };

    for block in scenario.blocks {
        let header = BlockHeader::new(block.number, block.timestamp);
        let outcome = guard.process_block(&mut ledger, header, block.ops)?;
        let events = guard.drain_events();
        if let Some(j) = journal.as_mut() {
            j.append_events(&events)?;
        }
        println!(
            "{}",
            json!({
                "block": outcome.block,
                "outcomes": outcome.outcomes,
                "events": events,
                "blocked_total": guard.registry().len(),
                "protected": guard.is_protected(),
                "state_digest": outcome.state_digest,
            })
        );
    }

    let snapshot = guard.snapshot();
    if let Some(j) = journal.as_mut() {
        j.checkpoint(&snapshot)?;
    }
    if let Ok(p) = std::env::var("STORE_PATH") {
        let mut store = GuardStore::new(&p)?;
        store.init()?;
        store.save(logging::ts_epoch_ms(), &snapshot)?;
    }

    log(
        Level::Info,
        Domain::System,
        "replay_done",
        obj(&[
            ("scenario", v_str(&path)),
            ("blocked_total", json!(guard.registry().len())),
            ("state_digest", v_str(&guard.state_digest())),
        ]),
    );
    Ok(())
}
