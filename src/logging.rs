//! Structured logging for the guard.
//!
//! One JSON object per line on stderr. When `LOG_DIR` is set, records are
//! also appended under `<LOG_DIR>/<RUN_ID>/`: `events.jsonl` for info and
//! above, `trace.jsonl` for trace/debug.
//!
//! Filtering: `LOG_LEVEL` (default `info`) and `LOG_DOMAINS` (comma list
//! or `all`).

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fs::{create_dir_all, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};

use crate::engine::events::GuardEvent;
use crate::error::{GuardError, LedgerError};
use crate::types::{BlockNumber, Transfer};

// =============================================================================
// Log Levels
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Trace = 0,
    Debug = 1,
    Info = 2,
    Warn = 3,
    Error = 4,
}

impl Level {
    pub fn from_env() -> Self {
        match std::env::var("LOG_LEVEL").as_deref() {
            Ok("trace") => Level::Trace,
            Ok("debug") => Level::Debug,
            Ok("info") => Level::Info,
            Ok("warn") => Level::Warn,
            Ok("error") => Level::Error,
            _ => Level::Info,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Trace => "trace",
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
        }
    }
}

// =============================================================================
// Log Domains
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Trap,      // Trap hits and reverted transfers
    Registry,  // Block flag changes
    Admin,     // Revoke, unblock, disable
    Lifecycle, // Protection on/off
    Ledger,    // Balance movement failures
    System,    // Startup, config, replay
    Audit,     // Per-block summaries and digests
}

impl Domain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Trap => "trap",
            Domain::Registry => "registry",
            Domain::Admin => "admin",
            Domain::Lifecycle => "lifecycle",
            Domain::Ledger => "ledger",
            Domain::System => "system",
            Domain::Audit => "audit",
        }
    }

    pub fn is_enabled(&self) -> bool {
        match std::env::var("LOG_DOMAINS").as_deref() {
            Ok("all") | Err(_) => true,
            Ok(domains) => domains.split(',').any(|d| d.trim() == self.as_str()),
        }
    }
}

// =============================================================================
// Run context
// =============================================================================

static LOG_SEQ: AtomicU64 = AtomicU64::new(0);
static RUN_CONTEXT: OnceLock<RunContext> = OnceLock::new();

fn next_seq() -> u64 {
    LOG_SEQ.fetch_add(1, Ordering::SeqCst)
}

#[derive(Debug)]
struct RunContext {
    run_id: String,
    files: Option<RunFiles>,
}

#[derive(Debug)]
struct RunFiles {
    events: Mutex<BufWriter<File>>,
    trace: Mutex<BufWriter<File>>,
}

fn open_append(path: PathBuf) -> Option<Mutex<BufWriter<File>>> {
    match OpenOptions::new().create(true).append(true).open(&path) {
        Ok(f) => Some(Mutex::new(BufWriter::new(f))),
        Err(err) => {
            eprintln!("[log] failed to open {}: {}", path.display(), err);
            None
        }
    }
}

fn ensure_run_context() -> &'static RunContext {
    RUN_CONTEXT.get_or_init(|| {
        let run_id = std::env::var("RUN_ID")
            .unwrap_or_else(|_| format!("r-{}-{}", ts_epoch_ms(), process::id()));
        let files = std::env::var("LOG_DIR").ok().and_then(|base| {
            let mut run_dir = PathBuf::from(base);
            run_dir.push(&run_id);
            if let Err(err) = create_dir_all(&run_dir) {
                eprintln!("[log] failed to create run dir: {}", err);
                return None;
            }
            Some(RunFiles {
                events: open_append(run_dir.join("events.jsonl"))?,
                trace: open_append(run_dir.join("trace.jsonl"))?,
            })
        });
        RunContext { run_id, files }
    })
}

fn write_line(writer: &Mutex<BufWriter<File>>, line: &str) {
    if let Ok(mut w) = writer.lock() {
        let _ = writeln!(w, "{}", line);
        let _ = w.flush();
    }
}

// =============================================================================
// Core logging functions
// =============================================================================

/// RFC3339 timestamp with milliseconds
pub fn ts_now() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

pub fn ts_epoch_ms() -> u64 {
    Utc::now().timestamp_millis() as u64
}

/// Emit a structured log entry
pub fn log(level: Level, domain: Domain, event: &str, fields: Map<String, Value>) {
    if level < Level::from_env() || !domain.is_enabled() {
        return;
    }
    let ctx = ensure_run_context();
    let line = Value::Object(record(&ctx.run_id, level, domain, event, fields)).to_string();
    if let Some(files) = &ctx.files {
        match level {
            Level::Trace | Level::Debug => write_line(&files.trace, &line),
            _ => write_line(&files.events, &line),
        }
    }
    eprintln!("{}", line);
}

fn record(run_id: &str, level: Level, domain: Domain, event: &str, mut fields: Map<String, Value>) -> Map<String, Value> {
    let msg = fields.remove("msg").unwrap_or(Value::String(String::new()));
    let mut entry = Map::new();
    entry.insert("ts".to_string(), json!(ts_now()));
    entry.insert("run_id".to_string(), json!(run_id));
    entry.insert("seq".to_string(), json!(next_seq()));
    entry.insert("lvl".to_string(), json!(level.as_str().to_uppercase()));
    entry.insert("domain".to_string(), json!(domain.as_str()));
    entry.insert("event".to_string(), json!(event));
    entry.insert("msg".to_string(), msg);
    entry.insert("data".to_string(), Value::Object(fields));
    entry
}

// =============================================================================
// Domain-Specific Logging Helpers
// =============================================================================

/// Every guard event goes through here; the `blocked` record carries
/// `{pool, blocked, reason}` for off-engine auditing.
pub fn log_guard_event(event: &GuardEvent) {
    let (level, domain) = match event {
        GuardEvent::Blocked { .. } => (Level::Warn, Domain::Registry),
        GuardEvent::TradingOpened { .. } => (Level::Info, Domain::Trap),
        GuardEvent::Revoked { .. } | GuardEvent::Unblocked { .. } => (Level::Info, Domain::Admin),
        GuardEvent::ProtectionDisabled { .. } => (Level::Warn, Domain::Lifecycle),
    };
    let mut fields = match serde_json::to_value(event) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    };
    fields.remove("event");
    if let GuardEvent::Blocked { reason, .. } = event {
        fields.insert("reason".to_string(), v_str(reason.tag()));
    }
    log(level, domain, event.name(), fields);
}

pub fn log_denied(transfer: &Transfer, block: BlockNumber, err: &GuardError) {
    let domain = match err {
        GuardError::Ledger(_) => Domain::Ledger,
        _ => Domain::Trap,
    };
    log(
        Level::Info,
        domain,
        "transfer_reverted",
        obj(&[
            ("from", v_str(&transfer.from.to_string())),
            ("to", v_str(&transfer.to.to_string())),
            ("amount", v_str(&transfer.amount.to_string())),
            ("block", json!(block)),
            ("msg", v_str(&err.to_string())),
        ]),
    );
}

pub fn log_revoke_failure(batch: usize, size: usize, err: &LedgerError) {
    log(
        Level::Error,
        Domain::Admin,
        "revoke_batch_failed",
        obj(&[
            ("batch", json!(batch)),
            ("size", json!(size)),
            ("msg", v_str(&err.to_string())),
        ]),
    );
}

pub fn log_block_summary(block: BlockNumber, ops: usize, failed: usize, blocked_total: usize, digest: &str) {
    log(
        Level::Debug,
        Domain::Audit,
        "block_summary",
        obj(&[
            ("block", json!(block)),
            ("ops", json!(ops)),
            ("failed", json!(failed)),
            ("blocked_total", json!(blocked_total)),
            ("state_digest", v_str(digest)),
        ]),
    );
}

pub fn log_startup(pool: &str, admin: &str, config: Value) {
    log(
        Level::Info,
        Domain::System,
        "startup",
        obj(&[("pool", v_str(pool)), ("admin", v_str(admin)), ("config", config)]),
    );
}

// =============================================================================
// Utility Functions
// =============================================================================

pub fn obj(pairs: &[(&str, Value)]) -> Map<String, Value> {
    let mut map = Map::new();
    for (k, v) in pairs {
        map.insert((*k).to_string(), v.clone());
    }
    map
}

pub fn v_str(s: &str) -> Value {
    Value::String(s.to_string())
}
