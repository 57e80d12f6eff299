//! Exchange-Rate Graph
//!
//! Directed multigraph over token symbols. Nodes are insertion-ordered and
//! unique by symbol; edges are an append-only arena referenced by index, so a
//! cycle is just a flat list of edge indices into the owning graph.
//!
//! The log-space transformation turns multiplicative arbitrage into additive
//! shortest-path arithmetic: w = -ln(rate * (1 - fee)). A closed walk whose
//! weights sum below zero multiplies out above 1.0.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A single directed exchange hop. Immutable once inserted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    /// Source node index.
    pub from: usize,
    /// Target node index.
    pub to: usize,
    /// Units of `to` received per unit of `from`, before fees.
    pub rate: f64,
    /// Proportional fee in [0, 1).
    pub fee: f64,
    /// Depth available at this rate, denominated in the source token's quote.
    pub liquidity: f64,
    /// Venue label; parallel edges from different venues are distinct.
    pub venue: String,
    /// Declared per-hop volatility (stdev of the multiplicative noise).
    pub volatility: f64,
}

impl Edge {
    /// Rate net of fees.
    pub fn effective_rate(&self) -> f64 {
        self.rate * (1.0 - self.fee)
    }

    /// Log-space weight, computed on demand so the edge attributes stay the
    /// single source of truth. Non-positive or non-finite effective rates
    /// yield +inf, which no relaxation will ever accept.
    pub fn weight(&self) -> f64 {
        let effective = self.effective_rate();
        if effective <= 0.0 || !effective.is_finite() {
            return f64::INFINITY;
        }
        -effective.ln()
    }

    /// Whether the edge can participate in relaxation at all.
    pub fn is_traversable(&self) -> bool {
        self.weight().is_finite()
    }
}

/// Insertion-ordered token graph with an edge arena and per-node adjacency.
#[derive(Debug, Clone, Default)]
pub struct TokenGraph {
    tokens: Vec<String>,
    token_index: HashMap<String, usize>,
    edges: Vec<Edge>,
    adjacency: Vec<Vec<usize>>,
}

impl TokenGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a token, returning its stable index. Idempotent on repeats.
    pub fn add_node(&mut self, symbol: &str) -> usize {
        if let Some(&idx) = self.token_index.get(symbol) {
            return idx;
        }
        let idx = self.tokens.len();
        self.tokens.push(symbol.to_string());
        self.token_index.insert(symbol.to_string(), idx);
        self.adjacency.push(Vec::new());
        idx
    }

    /// Insert a directed edge, implicitly creating missing endpoints.
    /// Returns the edge's arena index.
    #[allow(clippy::too_many_arguments)]
    pub fn add_edge(
        &mut self,
        from: &str,
        to: &str,
        rate: f64,
        fee: f64,
        liquidity: f64,
        venue: &str,
        volatility: f64,
    ) -> usize {
        let from_idx = self.add_node(from);
        let to_idx = self.add_node(to);
        let edge_idx = self.edges.len();
        self.edges.push(Edge {
            from: from_idx,
            to: to_idx,
            rate,
            fee,
            liquidity,
            venue: venue.to_string(),
            volatility,
        });
        self.adjacency[from_idx].push(edge_idx);
        edge_idx
    }

    pub fn node_count(&self) -> usize {
        self.tokens.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn token(&self, index: usize) -> Option<&str> {
        self.tokens.get(index).map(String::as_str)
    }

    pub fn index_of(&self, symbol: &str) -> Option<usize> {
        self.token_index.get(symbol).copied()
    }

    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn edge(&self, index: usize) -> Option<&Edge> {
        self.edges.get(index)
    }

    /// Outgoing edge indices for a node, in insertion order.
    pub fn outgoing(&self, node: usize) -> &[usize] {
        self.adjacency
            .get(node)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Lowest-weight edge index between a node pair. Prefers an edge whose
    /// weight matches `preferred_weight` (within 1e-12), otherwise the
    /// minimum weight, ties broken by insertion order.
    pub fn edge_between(&self, from: usize, to: usize, preferred_weight: Option<f64>) -> Option<usize> {
        let mut best: Option<(usize, f64)> = None;
        for &edge_idx in self.outgoing(from) {
            let edge = &self.edges[edge_idx];
            if edge.to != to {
                continue;
            }
            let w = edge.weight();
            if let Some(preferred) = preferred_weight {
                if (w - preferred).abs() < 1e-12 {
                    return Some(edge_idx);
                }
            }
            match best {
                Some((_, best_w)) if w >= best_w => {}
                _ => best = Some((edge_idx, w)),
            }
        }
        best.map(|(idx, _)| idx)
    }
}
