//! DelTran Credit Core
//!
//! Prepaid credit-pack ledger: ordered pools of message credit, drained in
//! priority order, with guarded mutation of individual packs.
//!
//! # Architecture
//!
//! - **Position Allocator**: new packs land on the position they ask for;
//!   packs at or after a taken position move up by one
//! - **Consumption Engine**: greedy draw across packs in position order,
//!   reporting units taken from each pack and unmet demand
//! - **Rule Chains**: ordered guards in front of an effect on one pack
//! - **Single Writer**: one actor task owns every mutation
//! - **Atomic Write Sets**: each operation commits all of its writes or none
//!
//! # Invariants
//!
//! - Unique positions: no two packs share a position after any commit
//! - Order stability: inserts never reorder existing packs
//! - Balance floor: credit never goes negative
//! - Conservation: units consumed + units unmet == units requested

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod types;
pub mod error;
pub mod config;
pub mod store;
pub mod storage;
pub mod memory;
pub mod allocator;
pub mod consumption;
pub mod rules;
pub mod guards;
pub mod actor;
pub mod ledger;
pub mod metrics;

// Re-exports
pub use error::{Error, Result};
pub use types::{ConsumptionPlan, CreditPack, NewPack, Order, PackField, PackId, PackUsage};
pub use config::{Config, StorageBackend};
pub use store::{PackStore, WriteOp, WriteSet};
pub use storage::Storage;
pub use memory::MemoryStore;
pub use rules::{guard_fn, Guard, RuleChain};
pub use guards::{Limits, LowBudget, NotExpensive, PackLimits};
pub use ledger::CreditLedger;
pub use metrics::Metrics;
pub use tokio_util::sync::CancellationToken;
