//! Trap-evaluation and address-blocking engine.
//!
//! ```text
//! ┌──────────────┐     ┌──────────────┐     ┌──────────────┐
//! │  Operations  │────►│    Guard     │────►│  GuardEvents │
//! │  (per block) │     │  (reducer)   │     │   (audit)    │
//! └──────────────┘     └──────────────┘     └──────────────┘
//!                             │
//!          ┌──────────────────┼──────────────────┐
//!          ▼                  ▼                  ▼
//!   ┌────────────┐     ┌────────────┐     ┌────────────┐
//!   │ Lifecycle  │     │   Traps    │     │  Registry  │
//!   └────────────┘     └────────────┘     └────────────┘
//!                             │
//!                             ▼
//!                      ┌────────────┐
//!                      │   Window   │
//!                      └────────────┘
//! ```

pub mod events;
pub mod guard;
pub mod lifecycle;
pub mod registry;
pub mod traps;
pub mod window;

pub use events::{GuardEvent, Operation};
pub use guard::{BlockOutcome, GuardSnapshot, LiquidityGuard, OpOutcome, RevokeReport, TransferReceipt};
pub use lifecycle::{DisableCause, LifecycleState, ProtectionLifecycle};
pub use registry::{BlockReason, BlockRecord, BlockRegistry};
pub use traps::{Evaluation, TrapEvaluator, Verdict};
pub use window::{ActivityWindow, Direction, TradeEvent};
