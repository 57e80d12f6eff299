//! Default Edge Sources
//!
//! Quick scans need edges without a caller supplying them. The simulated
//! source generates a small multi-venue universe with consistent base rates
//! plus deterministic per-venue perturbations, which leaves an occasional
//! triangle slightly open. A live source is a host concern; requesting one
//! here reports that none is configured.

use crate::engine::error::EngineError;
use crate::engine::pipeline::EdgeInput;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// USD reference prices for the simulated universe.
const UNIVERSE: [(&str, f64); 5] = [
    ("BTC", 60_000.0),
    ("ETH", 4_000.0),
    ("SOL", 150.0),
    ("BNB", 550.0),
    ("USDT", 1.0),
];

const VENUES: [&str; 3] = ["binance", "kraken", "coinbase"];

/// Deterministic simulated edge set for a given seed.
pub fn simulated_edges(seed: u64) -> Vec<EdgeInput> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut edges = Vec::new();

    for (i, &(from, from_usd)) in UNIVERSE.iter().enumerate() {
        for &(to, to_usd) in UNIVERSE.iter().skip(i + 1) {
            let base_rate = from_usd / to_usd;
            for venue in VENUES {
                // Venue rates wobble up to ±30 bps around the reference,
                // which occasionally leaves a triangle slightly open.
                let forward_skew = 1.0 + (rng.gen::<f64>() - 0.5) * 0.006;
                let backward_skew = 1.0 + (rng.gen::<f64>() - 0.5) * 0.006;
                let liquidity = 50_000.0 + rng.gen::<f64>() * 950_000.0;
                let fee = 0.0005 + rng.gen::<f64>() * 0.0015;
                let volatility = 0.002 + rng.gen::<f64>() * 0.008;

                edges.push(EdgeInput {
                    from_token: from.to_string(),
                    to_token: to.to_string(),
                    rate: base_rate * forward_skew,
                    fee,
                    liquidity,
                    venue: venue.to_string(),
                    volatility,
                });
                edges.push(EdgeInput {
                    from_token: to.to_string(),
                    to_token: from.to_string(),
                    rate: backward_skew / base_rate,
                    fee,
                    liquidity,
                    venue: venue.to_string(),
                    volatility,
                });
            }
        }
    }

    edges
}

/// Edge source selector for quick scans.
pub fn quick_scan_edges(use_real_data: bool, seed: u64) -> Result<Vec<EdgeInput>, EngineError> {
    if use_real_data {
        return Err(EngineError::InvalidInput(
            "no live market data source is configured; set use_real_data=false".into(),
        ));
    }
    Ok(simulated_edges(seed))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simulated_edges_are_deterministic() {
        let a = simulated_edges(42);
        let b = simulated_edges(42);
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(&b) {
            assert_eq!(x.rate.to_bits(), y.rate.to_bits());
            assert_eq!(x.venue, y.venue);
        }
        let c = simulated_edges(43);
        assert!(a.iter().zip(&c).any(|(x, y)| x.rate != y.rate));
    }

    #[test]
    fn test_simulated_edges_are_valid_inputs() {
        for edge in simulated_edges(7) {
            assert!(edge.rate > 0.0 && edge.rate.is_finite());
            assert!((0.0..1.0).contains(&edge.fee));
            assert!(edge.liquidity > 0.0);
            assert!(!edge.from_token.is_empty() && !edge.to_token.is_empty());
        }
    }

    #[test]
    fn test_both_directions_present() {
        let edges = simulated_edges(1);
        let forward = edges
            .iter()
            .any(|e| e.from_token == "BTC" && e.to_token == "ETH");
        let backward = edges
            .iter()
            .any(|e| e.from_token == "ETH" && e.to_token == "BTC");
        assert!(forward && backward);
    }

    #[test]
    fn test_live_source_not_configured() {
        assert!(matches!(
            quick_scan_edges(true, 0),
            Err(EngineError::InvalidInput(_))
        ));
        assert!(quick_scan_edges(false, 0).is_ok());
    }
}
