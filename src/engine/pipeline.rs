//! Scan Pipeline
//!
//! Wires the engine together: validate -> prune -> build graph -> detect ->
//! per-cycle fan-out (impact, Monte Carlo, risk, stress) -> persistence ->
//! metrics -> allocation.
//!
//! The fan-out runs on rayon; results carry their cycle index and are folded
//! back in canonical order, so worker count never changes the output.
//! Process-wide state (metrics, persistence, regime, opportunity cache)
//! lives in an `EngineContext` threaded through explicitly and guarded by
//! reader-writer locks with writes only at scan boundaries. Metrics update
//! atomically at the end of a successful scan; a failed scan leaves them
//! untouched.

use crate::engine::allocator::{
    allocate, AllocationCandidate, AllocationPlan, AllocatorConfig, AllocatorMode,
};
use crate::engine::detector::{detect_cycles, Cycle, DetectorConfig};
use crate::engine::error::EngineError;
use crate::engine::graph::TokenGraph;
use crate::engine::impact::ImpactModel;
use crate::engine::monte_carlo::{
    expected_return, latency_half_life, run_simulation, HalfLife, HopParams, SimulationConfig,
    SimulationSummary, DEFAULT_HALF_LIFE_MS, DEFAULT_LATENCY_MAX_MS, DEFAULT_LIQUIDITY_DELTA,
    DEFAULT_SAMPLES, MAX_SAMPLES,
};
use crate::engine::persistence::{
    DecayPattern, PersistenceSummary, PersistenceTracker, DEFAULT_TTL_MS,
};
use crate::engine::pruner::{prune, PrunerConfig};
use crate::engine::regime::{RegimeSnapshot, RegimeTracker};
use crate::engine::risk::{assess, RiskInput, RiskProfile};
use crate::engine::stress::{run_stress, StressContext, StressReport};
use crate::engine::CancellationToken;
use chrono::Utc;
use parking_lot::RwLock;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Fraction of rejected samples above which a cycle's confidence zeroes out.
const DEGENERACY_REJECTION_LIMIT: f64 = 0.10;

/// One normalized rate tuple, as delivered by the host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeInput {
    pub from_token: String,
    pub to_token: String,
    pub rate: f64,
    #[serde(default)]
    pub fee: f64,
    #[serde(default = "default_liquidity")]
    pub liquidity: f64,
    #[serde(default = "default_venue")]
    pub venue: String,
    #[serde(default = "default_volatility")]
    pub volatility: f64,
}

fn default_liquidity() -> f64 {
    10_000.0
}

fn default_venue() -> String {
    "simulated".to_string()
}

fn default_volatility() -> f64 {
    0.01
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanOptions {
    pub max_cycles: usize,
    pub run_monte_carlo: bool,
    pub mc_samples: usize,
    pub run_stress: bool,
    pub allocator_mode: AllocatorMode,
    pub seed: Option<u64>,
    pub latency_max_ms: f64,
    pub spread_bps: f64,
    pub conservative: bool,
    #[serde(default)]
    pub pruner: PrunerConfig,
    #[serde(default)]
    pub allocator: AllocatorConfig,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            max_cycles: 10,
            run_monte_carlo: true,
            mc_samples: DEFAULT_SAMPLES,
            run_stress: true,
            allocator_mode: AllocatorMode::Greedy,
            seed: None,
            latency_max_ms: DEFAULT_LATENCY_MAX_MS,
            spread_bps: 10.0,
            conservative: false,
            pruner: PrunerConfig::default(),
            allocator: AllocatorConfig::default(),
        }
    }
}

/// Everything the engine knows about one detected opportunity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpportunityAnalysis {
    pub id: String,
    pub fingerprint: String,
    pub cycle: Cycle,
    pub hops: Vec<HopParams>,
    pub min_hop_liquidity: f64,
    /// Analytic return with impact at nominal liquidity, zero latency.
    pub expected_return: f64,
    /// Simulated mean when Monte Carlo ran, analytic otherwise.
    pub realized_return: f64,
    pub half_life_ms: HalfLife,
    pub simulation: Option<SimulationSummary>,
    pub risk: RiskProfile,
    pub stress: Option<StressReport>,
    pub persistence_score: Option<f64>,
    pub decay_pattern: Option<DecayPattern>,
    /// Capital the analysis was computed against.
    pub volume: f64,
    /// Simulator parameters, kept so later stress calls replay exactly.
    pub sim_config: SimulationConfig,
}

/// Process-wide counters, single writer at scan boundaries.
#[derive(Debug, Default)]
pub struct EngineMetrics {
    pub total_scans: u64,
    pub total_cycles_found: u64,
    pub total_detection_time_ms: f64,
    pub last_scan_unix_ms: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub total_scans: u64,
    pub total_cycles_found: u64,
    pub avg_detection_time_ms: f64,
    pub last_scan_unix_ms: i64,
}

impl EngineMetrics {
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_scans: self.total_scans,
            total_cycles_found: self.total_cycles_found,
            avg_detection_time_ms: if self.total_scans > 0 {
                self.total_detection_time_ms / self.total_scans as f64
            } else {
                0.0
            },
            last_scan_unix_ms: self.last_scan_unix_ms,
        }
    }
}

/// Shared engine state. Init on startup, teardown on shutdown; no ambient
/// globals.
pub struct EngineContext {
    pub metrics: RwLock<EngineMetrics>,
    pub persistence: RwLock<PersistenceTracker>,
    pub regime: RwLock<RegimeTracker>,
    pub opportunities: RwLock<HashMap<String, OpportunityAnalysis>>,
    pub persistence_ttl_ms: i64,
}

impl Default for EngineContext {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineContext {
    pub fn new() -> Self {
        Self {
            metrics: RwLock::new(EngineMetrics::default()),
            persistence: RwLock::new(PersistenceTracker::new()),
            regime: RwLock::new(RegimeTracker::default()),
            opportunities: RwLock::new(HashMap::new()),
            persistence_ttl_ms: DEFAULT_TTL_MS,
        }
    }

    pub fn cached_opportunity(&self, id: &str) -> Option<OpportunityAnalysis> {
        self.opportunities.read().get(id).cloned()
    }

    pub fn persistence_summary(
        &self,
        capital_weights: Option<&HashMap<String, f64>>,
    ) -> PersistenceSummary {
        let now_ms = Utc::now().timestamp_millis();
        self.persistence
            .read()
            .summary(now_ms, self.persistence_ttl_ms, capital_weights)
    }
}

/// Full result of one scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanReport {
    pub opportunities: Vec<OpportunityAnalysis>,
    pub allocation: Option<AllocationPlan>,
    pub edges_pruned: usize,
    pub detection_time_ms: f64,
    pub regime: Option<RegimeSnapshot>,
    pub metrics: MetricsSnapshot,
    pub persistence: PersistenceSummary,
    pub seed: u64,
}

fn validate_inputs(edges: &[EdgeInput], capital: f64, options: &ScanOptions) -> Result<(), EngineError> {
    if capital <= 0.0 || !capital.is_finite() {
        return Err(EngineError::InvalidInput(format!(
            "capital must be positive and finite, got {capital}"
        )));
    }
    if options.mc_samples == 0 || options.mc_samples > MAX_SAMPLES {
        return Err(EngineError::InvalidInput(format!(
            "mc_samples must be in 1..={MAX_SAMPLES}, got {}",
            options.mc_samples
        )));
    }
    for (i, edge) in edges.iter().enumerate() {
        if edge.from_token.is_empty() || edge.to_token.is_empty() {
            return Err(EngineError::InvalidInput(format!(
                "edge {i}: token symbols must be non-empty"
            )));
        }
        if edge.rate <= 0.0 || !edge.rate.is_finite() {
            return Err(EngineError::InvalidInput(format!(
                "edge {i} ({} -> {}): rate must be positive and finite, got {}",
                edge.from_token, edge.to_token, edge.rate
            )));
        }
        if !(0.0..1.0).contains(&edge.fee) {
            return Err(EngineError::InvalidInput(format!(
                "edge {i} ({} -> {}): fee must be in [0, 1), got {}",
                edge.from_token, edge.to_token, edge.fee
            )));
        }
        if edge.liquidity < 0.0 || !edge.liquidity.is_finite() {
            return Err(EngineError::InvalidInput(format!(
                "edge {i} ({} -> {}): liquidity must be non-negative and finite, got {}",
                edge.from_token, edge.to_token, edge.liquidity
            )));
        }
    }
    Ok(())
}

fn build_graph(edges: &[EdgeInput]) -> TokenGraph {
    let mut graph = TokenGraph::new();
    for edge in edges {
        graph.add_edge(
            &edge.from_token,
            &edge.to_token,
            edge.rate,
            edge.fee,
            edge.liquidity,
            &edge.venue,
            edge.volatility,
        );
    }
    graph
}

fn derive_seed(seed: u64, stream: u64) -> u64 {
    let mut hasher = DefaultHasher::new();
    seed.hash(&mut hasher);
    stream.hash(&mut hasher);
    hasher.finish()
}

fn opportunity_id(fingerprint: &str) -> String {
    let mut hasher = DefaultHasher::new();
    fingerprint.hash(&mut hasher);
    format!("opp_{:016x}", hasher.finish())
}

/// Analyze one cycle: impact parameterization, simulation, risk, stress.
fn analyze_cycle(
    graph: &TokenGraph,
    cycle: Cycle,
    cycle_index: u64,
    capital: f64,
    options: &ScanOptions,
    seed: u64,
    cancel: &CancellationToken,
) -> Result<OpportunityAnalysis, EngineError> {
    let model = ImpactModel::default();

    let hops: Vec<HopParams> = cycle
        .edge_indices
        .iter()
        .map(|&idx| {
            let edge = graph.edge(idx).expect("cycle references valid edges");
            HopParams {
                rate: edge.rate,
                fee: edge.fee,
                liquidity: edge.liquidity,
                sigma: edge.volatility,
            }
        })
        .collect();
    let min_hop_liquidity = hops
        .iter()
        .map(|h| h.liquidity)
        .fold(f64::INFINITY, f64::min);

    let analytic = expected_return(&hops, capital, &model);
    let half_life = latency_half_life(analytic, DEFAULT_HALF_LIFE_MS);

    let sim_config = SimulationConfig {
        samples: options.mc_samples,
        latency_max_ms: options.latency_max_ms,
        liquidity_delta: DEFAULT_LIQUIDITY_DELTA,
        half_life_ms: half_life,
        seed: derive_seed(seed, cycle_index),
    };

    let simulation = if options.run_monte_carlo {
        Some(run_simulation(&hops, capital, &sim_config, &model, cancel)?)
    } else {
        None
    };
    let realized_return = simulation.as_ref().map(|s| s.mean).unwrap_or(analytic);

    let mean_sigma = if hops.is_empty() {
        0.0
    } else {
        hops.iter().map(|h| h.sigma).sum::<f64>() / hops.len() as f64
    };
    let spread_frac = options.spread_bps / 10_000.0;
    let mut risk = assess(&RiskInput {
        capital,
        min_hop_liquidity,
        path_length: cycle.path_length,
        mean_hop_sigma: mean_sigma,
        half_life_ms: half_life,
        spread: spread_frac,
        mid_price: 1.0,
        conservative: options.conservative,
    });

    // Local recovery for numerical degeneracy: the samples were already
    // rejected; past the limit the cycle keeps flowing but with no
    // confidence behind it.
    if let Some(summary) = &simulation {
        let rejected_frac = summary.rejected_samples as f64 / summary.requested_samples as f64;
        if rejected_frac > DEGENERACY_REJECTION_LIMIT {
            warn!(
                fingerprint = %cycle.fingerprint(),
                rejected_frac,
                "excess sample rejection, zeroing confidence"
            );
            risk.confidence = 0.0;
            risk.warnings.push(format!(
                "{:.1}% of simulation samples were numerically degenerate",
                rejected_frac * 100.0
            ));
        }
    }

    let stress = if options.run_stress {
        let ctx = StressContext {
            hops: &hops,
            volume: capital,
            config: &sim_config,
            model: &model,
            spread_frac,
            cancel,
        };
        Some(run_stress(&ctx, realized_return, false)?)
    } else {
        None
    };

    let fingerprint = cycle.fingerprint();
    Ok(OpportunityAnalysis {
        id: opportunity_id(&fingerprint),
        fingerprint,
        cycle,
        hops,
        min_hop_liquidity,
        expected_return: analytic,
        realized_return,
        half_life_ms: HalfLife(half_life),
        simulation,
        risk,
        stress,
        persistence_score: None,
        decay_pattern: None,
        volume: capital,
        sim_config,
    })
}

/// Run a full scan. Cancellable via `cancel`; a 5 s timeout is enforced by
/// the host setting the token externally.
pub fn scan(
    ctx: &EngineContext,
    edges: &[EdgeInput],
    capital: f64,
    options: &ScanOptions,
    cancel: &CancellationToken,
) -> Result<ScanReport, EngineError> {
    validate_inputs(edges, capital, options)?;
    let seed = options.seed.unwrap_or(0);

    // Phase 1: prune, then build the scan-local graph.
    let full_graph = build_graph(edges);
    let prune_outcome = prune(&full_graph, &options.pruner);
    let graph = prune_outcome.graph;
    if cancel.is_cancelled() {
        return Err(EngineError::Cancelled);
    }

    // Phase 2: negative-cycle detection.
    let detect_started = Instant::now();
    let cycles = detect_cycles(&graph, &DetectorConfig { max_cycles: options.max_cycles });
    let detection_time_ms = detect_started.elapsed().as_secs_f64() * 1000.0;
    if cancel.is_cancelled() {
        return Err(EngineError::Cancelled);
    }
    debug!(cycles = cycles.len(), detection_time_ms, "detection phase done");

    // Phase 3: per-cycle fan-out. Work is independent, results are tagged by
    // index and collected in canonical order.
    let analyses: Result<Vec<OpportunityAnalysis>, EngineError> = cycles
        .into_par_iter()
        .enumerate()
        .map(|(idx, cycle)| {
            analyze_cycle(&graph, cycle, idx as u64, capital, options, seed, cancel)
        })
        .collect();
    let mut analyses = analyses?;
    if cancel.is_cancelled() {
        return Err(EngineError::Cancelled);
    }

    // Phase 4: persistence and regime updates (single writer, scan boundary).
    let now_ms = Utc::now().timestamp_millis();
    {
        let mut persistence = ctx.persistence.write();
        for analysis in &mut analyses {
            persistence.record_observation(
                &analysis.fingerprint,
                &analysis.cycle.path,
                analysis.realized_return,
                now_ms,
            );
            if let Some(record) = persistence.get(&analysis.fingerprint) {
                analysis.persistence_score = Some(record.persistence_score());
                analysis.decay_pattern = Some(record.decay_pattern());
            }
        }
        persistence.prune(now_ms, ctx.persistence_ttl_ms);
    }
    {
        let mut regime = ctx.regime.write();
        for edge in edges {
            let pair = format!("{}/{}", edge.from_token, edge.to_token);
            regime.observe(&pair, edge.rate, edge.liquidity);
        }
    }

    // Phase 5: allocation across surviving cycles.
    let candidates: Vec<AllocationCandidate> = analyses
        .iter()
        .map(|a| AllocationCandidate {
            id: a.id.clone(),
            fingerprint: a.fingerprint.clone(),
            path: a.cycle.path.clone(),
            expected_return: a.realized_return,
            sharpe: a.simulation.as_ref().and_then(|s| s.sharpe),
            risk: a.risk.composite,
            confidence: a.risk.confidence,
            min_hop_liquidity: a.min_hop_liquidity,
        })
        .collect();
    let allocation = if candidates.is_empty() {
        None
    } else {
        Some(allocate(
            &candidates,
            capital,
            options.allocator_mode,
            &options.allocator,
        )?)
    };

    // Persistence summary weighted by the plan's capital assignment.
    let capital_weights: Option<HashMap<String, f64>> = allocation.as_ref().map(|plan| {
        plan.entries
            .iter()
            .map(|e| (e.fingerprint.clone(), e.capital))
            .collect()
    });

    let regime = analyses.first().and_then(|a| {
        let edge = graph.edge(a.cycle.edge_indices[0])?;
        let pair = format!("{}/{}", graph.token(edge.from)?, graph.token(edge.to)?);
        Some(ctx.regime.read().snapshot(&pair))
    });

    // Phase 6: publish results and update metrics atomically. Nothing below
    // can fail, so a failed scan never reaches this point.
    {
        let mut cache = ctx.opportunities.write();
        for analysis in &analyses {
            cache.insert(analysis.id.clone(), analysis.clone());
        }
    }
    let metrics = {
        let mut metrics = ctx.metrics.write();
        metrics.total_scans += 1;
        metrics.total_cycles_found += analyses.len() as u64;
        metrics.total_detection_time_ms += detection_time_ms;
        metrics.last_scan_unix_ms = now_ms;
        metrics.snapshot()
    };
    let persistence = ctx
        .persistence
        .read()
        .summary(now_ms, ctx.persistence_ttl_ms, capital_weights.as_ref());

    info!(
        opportunities = analyses.len(),
        pruned = prune_outcome.edges_removed,
        detection_time_ms,
        "scan complete"
    );

    Ok(ScanReport {
        opportunities: analyses,
        allocation,
        edges_pruned: prune_outcome.edges_removed,
        detection_time_ms,
        regime,
        metrics,
        persistence,
        seed,
    })
}

/// Allocate against previously scanned opportunities by id.
pub fn allocate_from_cache(
    ctx: &EngineContext,
    opportunity_ids: &[String],
    capital: f64,
    mode: AllocatorMode,
    config: &AllocatorConfig,
) -> Result<AllocationPlan, EngineError> {
    let cache = ctx.opportunities.read();
    let mut candidates = Vec::with_capacity(opportunity_ids.len());
    for id in opportunity_ids {
        let analysis = cache
            .get(id)
            .ok_or_else(|| EngineError::InvalidInput(format!("unknown opportunity id '{id}'")))?;
        candidates.push(AllocationCandidate {
            id: analysis.id.clone(),
            fingerprint: analysis.fingerprint.clone(),
            path: analysis.cycle.path.clone(),
            expected_return: analysis.realized_return,
            sharpe: analysis.simulation.as_ref().and_then(|s| s.sharpe),
            risk: analysis.risk.composite,
            confidence: analysis.risk.confidence,
            min_hop_liquidity: analysis.min_hop_liquidity,
        });
    }
    drop(cache);
    allocate(&candidates, capital, mode, config)
}

/// Re-run the stress battery for a cached opportunity, breakeven included.
pub fn stress_from_cache(
    ctx: &EngineContext,
    opportunity_id: &str,
    cancel: &CancellationToken,
) -> Result<StressReport, EngineError> {
    let analysis = ctx.cached_opportunity(opportunity_id).ok_or_else(|| {
        EngineError::InvalidInput(format!("unknown opportunity id '{opportunity_id}'"))
    })?;
    let model = ImpactModel::default();
    let stress_ctx = StressContext {
        hops: &analysis.hops,
        volume: analysis.volume,
        config: &analysis.sim_config,
        model: &model,
        spread_frac: 0.001,
        cancel,
    };
    run_stress(&stress_ctx, analysis.realized_return, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triangle_edges() -> Vec<EdgeInput> {
        vec![
            EdgeInput {
                from_token: "BTC".into(),
                to_token: "ETH".into(),
                rate: 15.0,
                fee: 0.0,
                liquidity: 1e6,
                venue: "binance".into(),
                volatility: 0.0,
            },
            EdgeInput {
                from_token: "ETH".into(),
                to_token: "USDT".into(),
                rate: 2500.0,
                fee: 0.0,
                liquidity: 1e6,
                venue: "binance".into(),
                volatility: 0.0,
            },
            EdgeInput {
                from_token: "USDT".into(),
                to_token: "BTC".into(),
                rate: 1.01 / (15.0 * 2500.0),
                fee: 0.0,
                liquidity: 1e6,
                venue: "kraken".into(),
                volatility: 0.0,
            },
        ]
    }

    fn fast_options() -> ScanOptions {
        ScanOptions {
            mc_samples: 128,
            latency_max_ms: 0.0,
            run_stress: false,
            seed: Some(42),
            ..Default::default()
        }
    }

    #[test]
    fn test_scan_finds_triangle() {
        let ctx = EngineContext::new();
        let cancel = CancellationToken::new();
        let report = scan(&ctx, &triangle_edges(), 1000.0, &fast_options(), &cancel).unwrap();
        assert_eq!(report.opportunities.len(), 1);
        let opp = &report.opportunities[0];
        assert!((opp.cycle.raw_profit - 0.01).abs() < 1e-9);
        assert!(opp.simulation.is_some());
        assert!(report.allocation.is_some());
        assert_eq!(report.metrics.total_scans, 1);
    }

    #[test]
    fn test_scan_rejects_bad_fee() {
        let ctx = EngineContext::new();
        let cancel = CancellationToken::new();
        let mut edges = triangle_edges();
        edges[0].fee = 1.0;
        let err = scan(&ctx, &edges, 1000.0, &fast_options(), &cancel).unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(_)));
        // Failed scans must not touch metrics.
        assert_eq!(ctx.metrics.read().total_scans, 0);
    }

    #[test]
    fn test_scan_rejects_nonpositive_rate() {
        let ctx = EngineContext::new();
        let cancel = CancellationToken::new();
        let mut edges = triangle_edges();
        edges[1].rate = 0.0;
        assert!(matches!(
            scan(&ctx, &edges, 1000.0, &fast_options(), &cancel),
            Err(EngineError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_cancelled_scan_publishes_nothing() {
        let ctx = EngineContext::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = scan(&ctx, &triangle_edges(), 1000.0, &fast_options(), &cancel);
        assert!(matches!(result, Err(EngineError::Cancelled)));
        assert_eq!(ctx.metrics.read().total_scans, 0);
        assert!(ctx.opportunities.read().is_empty());
    }

    #[test]
    fn test_scan_numeric_determinism() {
        let ctx_a = EngineContext::new();
        let ctx_b = EngineContext::new();
        let cancel = CancellationToken::new();
        let opts = ScanOptions { run_stress: true, ..fast_options() };
        let a = scan(&ctx_a, &triangle_edges(), 1000.0, &opts, &cancel).unwrap();
        let b = scan(&ctx_b, &triangle_edges(), 1000.0, &opts, &cancel).unwrap();
        assert_eq!(a.opportunities.len(), b.opportunities.len());
        for (x, y) in a.opportunities.iter().zip(&b.opportunities) {
            assert_eq!(x.id, y.id);
            assert_eq!(x.cycle.path, y.cycle.path);
            assert_eq!(x.realized_return.to_bits(), y.realized_return.to_bits());
            let (sx, sy) = (x.simulation.as_ref().unwrap(), y.simulation.as_ref().unwrap());
            assert_eq!(sx.mean.to_bits(), sy.mean.to_bits());
            assert_eq!(sx.p5.to_bits(), sy.p5.to_bits());
            let (tx, ty) = (x.stress.as_ref().unwrap(), y.stress.as_ref().unwrap());
            for (sa, sb) in tx.scenarios.iter().zip(&ty.scenarios) {
                assert_eq!(sa.stressed_return.to_bits(), sb.stressed_return.to_bits());
            }
        }
    }

    #[test]
    fn test_persistence_accumulates_across_scans() {
        let ctx = EngineContext::new();
        let cancel = CancellationToken::new();
        let opts = fast_options();
        for _ in 0..3 {
            scan(&ctx, &triangle_edges(), 1000.0, &opts, &cancel).unwrap();
        }
        let summary = ctx.persistence_summary(None);
        assert_eq!(summary.total_opportunities, 1);
        let report = scan(&ctx, &triangle_edges(), 1000.0, &opts, &cancel).unwrap();
        let opp = &report.opportunities[0];
        assert!(opp.persistence_score.unwrap() > 0.0);
        assert_eq!(ctx.metrics.read().total_scans, 4);
    }

    #[test]
    fn test_allocate_from_cache_roundtrip() {
        let ctx = EngineContext::new();
        let cancel = CancellationToken::new();
        let report = scan(&ctx, &triangle_edges(), 1000.0, &fast_options(), &cancel).unwrap();
        let id = report.opportunities[0].id.clone();
        let plan = allocate_from_cache(
            &ctx,
            &[id],
            1000.0,
            AllocatorMode::Greedy,
            &AllocatorConfig::default(),
        )
        .unwrap();
        assert_eq!(plan.entries.len(), 1);

        let missing = allocate_from_cache(
            &ctx,
            &["opp_nope".to_string()],
            1000.0,
            AllocatorMode::Greedy,
            &AllocatorConfig::default(),
        );
        assert!(matches!(missing, Err(EngineError::InvalidInput(_))));
    }

    #[test]
    fn test_stress_from_cache() {
        let ctx = EngineContext::new();
        let cancel = CancellationToken::new();
        let report = scan(&ctx, &triangle_edges(), 1000.0, &fast_options(), &cancel).unwrap();
        let id = report.opportunities[0].id.clone();
        let stress = stress_from_cache(&ctx, &id, &cancel).unwrap();
        assert_eq!(stress.scenarios_tested, 7);
        assert!(stress.breakeven_price_shock.is_some());
    }

    #[test]
    fn test_opportunity_id_is_stable() {
        assert_eq!(opportunity_id("BTC|ETH|USDT"), opportunity_id("BTC|ETH|USDT"));
        assert_ne!(opportunity_id("BTC|ETH|USDT"), opportunity_id("BTC|ETH|SOL"));
    }
}
