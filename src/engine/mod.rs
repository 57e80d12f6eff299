//! Arbitrage Analytics Engine
//!
//! Deterministic detection and execution-risk pipeline over a multi-venue
//! currency graph.
//!
//! # Architecture
//!
//! ```text
//! normalized edges
//!        │
//!        ▼
//! ┌─────────────┐     ┌──────────────┐     ┌───────────────┐
//! │ EdgePruner  │────▶│  TokenGraph  │────▶│ CycleDetector │
//! │ (thresholds)│     │ (arena+index)│     │ (Bellman-Ford)│
//! └─────────────┘     └──────────────┘     └───────┬───────┘
//!                                                  │ cycles
//!                     per-cycle fan-out (rayon)    ▼
//!        ┌──────────────┬──────────────┬──────────────┐
//!        ▼              ▼              ▼              ▼
//! ┌────────────┐ ┌─────────────┐ ┌────────────┐ ┌────────────┐
//! │ ImpactModel│ │ MonteCarlo  │ │ RiskEngine │ │ StressTest │
//! │ (slippage) │ │ (seeded RNG)│ │ (5 factors)│ │ (7 shocks) │
//! └────────────┘ └─────────────┘ └────────────┘ └────────────┘
//!                       │ ordered results
//!                       ▼
//!     ┌─────────────┐ ┌────────────┐ ┌───────────────┐
//!     │ Persistence │ │  Regime    │ │   Allocator   │
//!     │ (lifecycle) │ │ (windows)  │ │ (greedy/LP/RP)│
//!     └─────────────┘ └────────────┘ └───────────────┘
//! ```
//!
//! # Determinism Guarantees
//!
//! - Every Monte Carlo sample derives its RNG from (seed, sample index);
//!   worker count never changes a number.
//! - Cycles are emitted in source-index order and fan-out results are folded
//!   back in cycle-index order.
//! - Shared state takes writes only at scan boundaries, behind
//!   `parking_lot::RwLock`.

pub mod allocator;
pub mod detector;
pub mod error;
pub mod graph;
pub mod impact;
pub mod market_data;
pub mod monte_carlo;
pub mod persistence;
pub mod pipeline;
pub mod pruner;
pub mod regime;
pub mod risk;
pub mod stress;

pub use error::EngineError;
pub use pipeline::{EngineContext, ScanOptions, ScanReport};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative cancellation flag for one scan. Workers poll it between
/// sample batches and scenarios; the host sets it on timeout.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}
