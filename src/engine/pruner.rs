//! Edge Pruning
//!
//! Drops edges that cannot participate in a viable cycle before detection
//! runs. Each threshold is independently enableable; pruning is a pure
//! function of the configuration, so applying it twice is a no-op.

use crate::engine::graph::TokenGraph;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Pruning thresholds. A `None` field disables that check.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PrunerConfig {
    /// Minimum liquidity an edge must carry.
    #[serde(default)]
    pub min_liquidity: Option<f64>,
    /// Maximum acceptable fee.
    #[serde(default)]
    pub max_fee: Option<f64>,
    /// Minimum acceptable rate.
    #[serde(default)]
    pub min_rate: Option<f64>,
    /// Maximum acceptable rate.
    #[serde(default)]
    pub max_rate: Option<f64>,
}

impl PrunerConfig {
    pub fn is_enabled(&self) -> bool {
        self.min_liquidity.is_some()
            || self.max_fee.is_some()
            || self.min_rate.is_some()
            || self.max_rate.is_some()
    }

    fn should_prune(&self, rate: f64, fee: f64, liquidity: f64) -> bool {
        if let Some(min_liquidity) = self.min_liquidity {
            if liquidity < min_liquidity {
                return true;
            }
        }
        if let Some(max_fee) = self.max_fee {
            if fee > max_fee {
                return true;
            }
        }
        if let Some(min_rate) = self.min_rate {
            if rate < min_rate {
                return true;
            }
        }
        if let Some(max_rate) = self.max_rate {
            if rate > max_rate {
                return true;
            }
        }
        false
    }
}

/// Outcome of a pruning pass.
#[derive(Debug)]
pub struct PruneOutcome {
    pub graph: TokenGraph,
    pub edges_removed: usize,
    /// True when node indices survived unchanged.
    pub indices_preserved: bool,
}

/// Apply the configured thresholds and rebuild the graph from the surviving
/// edges. Node identity (and therefore every index) is preserved unless some
/// token loses all incident edges, in which case the rebuild re-indexes from
/// the surviving edges in insertion order.
pub fn prune(graph: &TokenGraph, config: &PrunerConfig) -> PruneOutcome {
    let retained: Vec<usize> = graph
        .edges()
        .iter()
        .enumerate()
        .filter(|(_, e)| !config.should_prune(e.rate, e.fee, e.liquidity))
        .map(|(i, _)| i)
        .collect();
    let edges_removed = graph.edge_count() - retained.len();

    if edges_removed == 0 {
        return PruneOutcome {
            graph: graph.clone(),
            edges_removed: 0,
            indices_preserved: true,
        };
    }

    // A token stays connected if at least one surviving edge touches it.
    let mut touched = vec![false; graph.node_count()];
    for &idx in &retained {
        let e = &graph.edges()[idx];
        touched[e.from] = true;
        touched[e.to] = true;
    }
    let indices_preserved = touched.iter().all(|&t| t);

    let mut rebuilt = TokenGraph::new();
    if indices_preserved {
        // Seed every token first so indices carry over unchanged.
        for symbol in graph.tokens() {
            rebuilt.add_node(symbol);
        }
    }
    for &idx in &retained {
        let e = &graph.edges()[idx];
        let from = graph.token(e.from).unwrap_or_default();
        let to = graph.token(e.to).unwrap_or_default();
        rebuilt.add_edge(from, to, e.rate, e.fee, e.liquidity, &e.venue, e.volatility);
    }

    debug!(
        edges_removed,
        indices_preserved,
        remaining = rebuilt.edge_count(),
        "pruned exchange graph"
    );

    PruneOutcome {
        graph: rebuilt,
        edges_removed,
        indices_preserved,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triangle_with_thin_edge() -> TokenGraph {
        let mut g = TokenGraph::new();
        g.add_edge("BTC", "ETH", 15.0, 0.0, 1e6, "x", 0.0);
        g.add_edge("ETH", "USDT", 2500.0, 0.0, 1e6, "x", 0.0);
        g.add_edge("USDT", "BTC", 1.0 / (15.0 * 2500.0 * 1.01), 0.0, 1e6, "x", 0.0);
        g.add_edge("BTC", "XYZ", 1.0, 0.0, 10.0, "x", 0.0);
        g
    }

    #[test]
    fn test_liquidity_pruning_reindexes_disconnected_token() {
        let g = triangle_with_thin_edge();
        let config = PrunerConfig {
            min_liquidity: Some(100.0),
            ..Default::default()
        };
        let outcome = prune(&g, &config);
        assert_eq!(outcome.edges_removed, 1);
        // XYZ had only the pruned edge, so the rebuild re-indexes without it.
        assert!(!outcome.indices_preserved);
        assert_eq!(outcome.graph.node_count(), 3);
        assert!(outcome.graph.index_of("XYZ").is_none());
    }

    #[test]
    fn test_indices_preserved_when_all_tokens_stay_connected() {
        let mut g = TokenGraph::new();
        g.add_edge("A", "B", 2.0, 0.0, 1e6, "x", 0.0);
        g.add_edge("A", "B", 2.1, 0.0, 50.0, "y", 0.0);
        g.add_edge("B", "A", 0.5, 0.0, 1e6, "x", 0.0);
        let config = PrunerConfig {
            min_liquidity: Some(100.0),
            ..Default::default()
        };
        let outcome = prune(&g, &config);
        assert_eq!(outcome.edges_removed, 1);
        assert!(outcome.indices_preserved);
        assert_eq!(outcome.graph.index_of("A"), g.index_of("A"));
        assert_eq!(outcome.graph.index_of("B"), g.index_of("B"));
    }

    #[test]
    fn test_pruning_is_idempotent() {
        let g = triangle_with_thin_edge();
        let config = PrunerConfig {
            min_liquidity: Some(100.0),
            max_fee: Some(0.01),
            ..Default::default()
        };
        let once = prune(&g, &config);
        let twice = prune(&once.graph, &config);
        assert_eq!(twice.edges_removed, 0);
        assert_eq!(once.graph.edge_count(), twice.graph.edge_count());
        assert_eq!(once.graph.tokens(), twice.graph.tokens());
    }

    #[test]
    fn test_disabled_config_removes_nothing() {
        let g = triangle_with_thin_edge();
        let outcome = prune(&g, &PrunerConfig::default());
        assert_eq!(outcome.edges_removed, 0);
        assert_eq!(outcome.graph.edge_count(), 4);
    }

    #[test]
    fn test_rate_bounds() {
        let mut g = TokenGraph::new();
        g.add_edge("A", "B", 1e-12, 0.0, 1e6, "x", 0.0);
        g.add_edge("B", "A", 1e12, 0.0, 1e6, "x", 0.0);
        g.add_edge("A", "B", 2.0, 0.0, 1e6, "y", 0.0);
        let config = PrunerConfig {
            min_rate: Some(1e-9),
            max_rate: Some(1e9),
            ..Default::default()
        };
        let outcome = prune(&g, &config);
        assert_eq!(outcome.edges_removed, 2);
        assert_eq!(outcome.graph.edge_count(), 1);
    }
}
