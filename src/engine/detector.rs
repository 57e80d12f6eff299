//! Negative-Cycle Detection
//!
//! Repeated Bellman-Ford over the log-weighted exchange graph. Every node is
//! tried as a source in index order; a relaxation that still succeeds after
//! |V| - 1 passes betrays a reachable negative cycle, which multiplies out to
//! an arbitrage loop in rate space.
//!
//! Cycle recovery follows the textbook trick: the node caught by the final
//! relaxation pass is only guaranteed to be *reachable from* the cycle, so we
//! walk the parent chain |V| times first to land on a node that is provably
//! on it, then collect the loop and reverse it into traversal order.

use crate::engine::graph::TokenGraph;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Instant;
use tracing::{debug, trace};

/// A profitable closed walk through the exchange graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cycle {
    /// Token path in traversal order; first and last entries are equal.
    pub path: Vec<String>,
    /// Arena indices of the edges walked, one per hop.
    pub edge_indices: Vec<usize>,
    /// Multiplicative profit: product of effective rates minus one.
    pub raw_profit: f64,
    /// Sum of log-weights; negative for a true arbitrage.
    pub log_profit: f64,
    /// Number of hops.
    pub path_length: usize,
    /// Share of the detection wall time attributed to this cycle.
    pub detection_time_ms: f64,
}

impl Cycle {
    /// Canonical dedup key: the order-insensitive multiset of tokens on the
    /// cycle (closing duplicate excluded), joined with a separator.
    pub fn fingerprint(&self) -> String {
        fingerprint_of(&self.path)
    }
}

/// Fingerprint for an arbitrary cycle path (first token repeated at the end).
pub fn fingerprint_of(path: &[String]) -> String {
    let mut tokens: Vec<&str> = path
        .iter()
        .take(path.len().saturating_sub(1))
        .map(String::as_str)
        .collect();
    tokens.sort_unstable();
    tokens.join("|")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// Stop after this many distinct cycles.
    pub max_cycles: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self { max_cycles: 10 }
    }
}

/// Bellman-Ford state for one source.
struct RelaxationState {
    dist: Vec<f64>,
    parent: Vec<i64>,
    /// Edge that produced each parent link, kept alongside so recovery can
    /// pick the exact edge the relaxation used.
    parent_edge: Vec<i64>,
}

/// Enumerate profitable cycles, deduplicated by fingerprint.
///
/// Deterministic for identical inputs: sources iterate in node-index order
/// and edges relax in arena order. O(|V| * |E|) per source.
pub fn detect_cycles(graph: &TokenGraph, config: &DetectorConfig) -> Vec<Cycle> {
    let started = Instant::now();
    let node_count = graph.node_count();
    let mut cycles: Vec<Cycle> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();

    if node_count == 0 || graph.edge_count() == 0 {
        return cycles;
    }

    for source in 0..node_count {
        if cycles.len() >= config.max_cycles {
            break;
        }

        let Some(state) = run_bellman_ford(graph, source) else {
            continue;
        };

        // One more pass: the target of any edge that still relaxes sits on or
        // downstream of a negative cycle.
        let Some(entry) = find_relaxable_target(graph, &state) else {
            continue;
        };

        let Some(mut cycle) = extract_cycle(graph, entry, &state) else {
            continue;
        };

        // Numerical drift can surface a walk that is not actually profitable.
        if cycle.log_profit >= 0.0 {
            trace!(log_profit = cycle.log_profit, "discarding non-negative cycle");
            continue;
        }

        let key = cycle.fingerprint();
        if seen.contains(&key) {
            continue;
        }
        seen.insert(key);
        cycle.path_length = cycle.edge_indices.len();
        cycles.push(cycle);
    }

    let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
    if !cycles.is_empty() {
        let share = elapsed_ms / cycles.len() as f64;
        for cycle in &mut cycles {
            cycle.detection_time_ms = share;
        }
    }

    debug!(
        cycles = cycles.len(),
        nodes = node_count,
        edges = graph.edge_count(),
        elapsed_ms,
        "cycle detection complete"
    );

    cycles
}

/// |V| - 1 relaxation passes from `source`. Returns the state only when the
/// graph has any chance of containing a reachable negative cycle.
fn run_bellman_ford(graph: &TokenGraph, source: usize) -> Option<RelaxationState> {
    let n = graph.node_count();
    let mut state = RelaxationState {
        dist: vec![f64::INFINITY; n],
        parent: vec![-1; n],
        parent_edge: vec![-1; n],
    };
    state.dist[source] = 0.0;

    for _pass in 0..n.saturating_sub(1) {
        let mut any_update = false;
        for (edge_idx, edge) in graph.edges().iter().enumerate() {
            let w = edge.weight();
            if !w.is_finite() || !state.dist[edge.from].is_finite() {
                continue;
            }
            let candidate = state.dist[edge.from] + w;
            if candidate < state.dist[edge.to] {
                state.dist[edge.to] = candidate;
                state.parent[edge.to] = edge.from as i64;
                state.parent_edge[edge.to] = edge_idx as i64;
                any_update = true;
            }
        }
        if !any_update {
            return None; // Converged: no negative cycle reachable from here.
        }
    }

    Some(state)
}

/// The extra pass of step 3: first edge (arena order) that still relaxes.
fn find_relaxable_target(graph: &TokenGraph, state: &RelaxationState) -> Option<usize> {
    for edge in graph.edges() {
        let w = edge.weight();
        if !w.is_finite() || !state.dist[edge.from].is_finite() {
            continue;
        }
        if state.dist[edge.from] + w < state.dist[edge.to] {
            return Some(edge.to);
        }
    }
    None
}

/// Walk parents from a node known to be reachable from the cycle, landing on
/// the cycle itself, then collect and orient the loop.
fn extract_cycle(graph: &TokenGraph, entry: usize, state: &RelaxationState) -> Option<Cycle> {
    let n = graph.node_count();

    // |V| applications of parent guarantee we are on the cycle, not merely
    // downstream of it.
    let mut on_cycle = entry;
    for _ in 0..n {
        let p = state.parent[on_cycle];
        if p < 0 {
            return None;
        }
        on_cycle = p as usize;
    }

    // Collect node indices walking backwards until the loop closes, close
    // it, then reverse the whole walk into traversal order.
    let start = on_cycle;
    let mut backward = vec![start];
    let mut current = state.parent[start];
    while current >= 0 && current as usize != start && backward.len() <= n {
        backward.push(current as usize);
        current = state.parent[current as usize];
    }
    if current < 0 || current as usize != start {
        return None;
    }
    backward.push(start);
    let nodes: Vec<usize> = backward.into_iter().rev().collect();

    let mut path = Vec::with_capacity(nodes.len());
    let mut edge_indices = Vec::with_capacity(nodes.len() - 1);
    let mut log_profit = 0.0;
    let mut gross = 1.0;

    for window in nodes.windows(2) {
        let (from, to) = (window[0], window[1]);
        path.push(graph.token(from)?.to_string());

        // Prefer the exact edge the relaxation recorded for this link.
        let preferred = if state.parent[to] == from as i64 && state.parent_edge[to] >= 0 {
            graph.edge(state.parent_edge[to] as usize).map(|e| e.weight())
        } else {
            None
        };
        let edge_idx = graph.edge_between(from, to, preferred)?;
        let edge = graph.edge(edge_idx)?;
        log_profit += edge.weight();
        gross *= edge.effective_rate();
        edge_indices.push(edge_idx);
    }
    path.push(graph.token(*nodes.last()?)?.to_string());

    Some(Cycle {
        path_length: edge_indices.len(),
        path,
        edge_indices,
        raw_profit: gross - 1.0,
        log_profit,
        detection_time_ms: 0.0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triangle(premium: f64, fee: f64) -> TokenGraph {
        let mut g = TokenGraph::new();
        g.add_edge("BTC", "ETH", 15.0, fee, 1e6, "x", 0.0);
        g.add_edge("ETH", "USDT", 2500.0, fee, 1e6, "x", 0.0);
        g.add_edge("USDT", "BTC", premium / (15.0 * 2500.0), fee, 1e6, "x", 0.0);
        g
    }

    #[test]
    fn test_triangle_arbitrage_detected() {
        // Closed product 1.01 -> one cycle at ~1% raw profit.
        let g = triangle(1.01, 0.0);
        let cycles = detect_cycles(&g, &DetectorConfig::default());
        assert_eq!(cycles.len(), 1);

        let cycle = &cycles[0];
        assert_eq!(cycle.path.first(), cycle.path.last());
        assert_eq!(cycle.edge_indices.len(), cycle.path_length);
        assert_eq!(cycle.path_length, cycle.path.len() - 1);
        assert!((cycle.raw_profit - 0.01).abs() < 1e-9);
        assert!((cycle.log_profit + 1.01f64.ln()).abs() < 1e-9);
        assert!(cycle.log_profit < 0.0);
    }

    #[test]
    fn test_no_arbitrage_when_product_is_one() {
        let g = triangle(1.0, 0.0);
        assert!(detect_cycles(&g, &DetectorConfig::default()).is_empty());
    }

    #[test]
    fn test_fees_wipe_out_arbitrage() {
        // 1.01 * 0.99^3 ≈ 0.980 < 1: nothing to emit.
        let g = triangle(1.01, 0.01);
        assert!(detect_cycles(&g, &DetectorConfig::default()).is_empty());
    }

    #[test]
    fn test_empty_graph_is_not_an_error() {
        let g = TokenGraph::new();
        assert!(detect_cycles(&g, &DetectorConfig::default()).is_empty());
    }

    #[test]
    fn test_raw_and_log_profit_agree() {
        let g = triangle(1.05, 0.001);
        let cycles = detect_cycles(&g, &DetectorConfig::default());
        assert_eq!(cycles.len(), 1);
        let c = &cycles[0];
        // raw > 0 iff log < 0, and exp(-log) - 1 == raw.
        assert!(c.raw_profit > 0.0 && c.log_profit < 0.0);
        let reconstructed = (-c.log_profit).exp() - 1.0;
        assert!((reconstructed - c.raw_profit).abs() / c.raw_profit < 1e-9);
    }

    #[test]
    fn test_fingerprints_are_distinct_within_one_call() {
        // Two disjoint triangles, both profitable.
        let mut g = triangle(1.02, 0.0);
        g.add_edge("SOL", "BNB", 2.0, 0.0, 1e6, "x", 0.0);
        g.add_edge("BNB", "DOGE", 3.0, 0.0, 1e6, "x", 0.0);
        g.add_edge("DOGE", "SOL", 1.03 / 6.0, 0.0, 1e6, "x", 0.0);
        let cycles = detect_cycles(&g, &DetectorConfig::default());
        assert_eq!(cycles.len(), 2);
        let fps: HashSet<String> = cycles.iter().map(|c| c.fingerprint()).collect();
        assert_eq!(fps.len(), cycles.len());
    }

    #[test]
    fn test_max_cycles_early_exit() {
        let mut g = triangle(1.02, 0.0);
        g.add_edge("SOL", "BNB", 2.0, 0.0, 1e6, "x", 0.0);
        g.add_edge("BNB", "DOGE", 3.0, 0.0, 1e6, "x", 0.0);
        g.add_edge("DOGE", "SOL", 1.03 / 6.0, 0.0, 1e6, "x", 0.0);
        let cycles = detect_cycles(&g, &DetectorConfig { max_cycles: 1 });
        assert_eq!(cycles.len(), 1);
    }

    #[test]
    fn test_parallel_edges_prefer_relaxed_edge() {
        let mut g = triangle(1.01, 0.0);
        // A worse parallel edge on the first hop must not end up in the path.
        g.add_edge("BTC", "ETH", 14.0, 0.0, 1e6, "slow", 0.0);
        let cycles = detect_cycles(&g, &DetectorConfig::default());
        assert_eq!(cycles.len(), 1);
        for &idx in &cycles[0].edge_indices {
            assert_ne!(g.edge(idx).unwrap().venue, "slow");
        }
    }

    #[test]
    fn test_determinism_across_runs() {
        let g = triangle(1.01, 0.0);
        let a = detect_cycles(&g, &DetectorConfig::default());
        let b = detect_cycles(&g, &DetectorConfig::default());
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(&b) {
            assert_eq!(x.path, y.path);
            assert_eq!(x.edge_indices, y.edge_indices);
            assert_eq!(x.raw_profit.to_bits(), y.raw_profit.to_bits());
            assert_eq!(x.log_profit.to_bits(), y.log_profit.to_bits());
        }
    }

    #[test]
    fn test_fingerprint_is_order_insensitive() {
        let a = fingerprint_of(&["BTC".into(), "ETH".into(), "USDT".into(), "BTC".into()]);
        let b = fingerprint_of(&["ETH".into(), "USDT".into(), "BTC".into(), "ETH".into()]);
        assert_eq!(a, b);
    }
}
