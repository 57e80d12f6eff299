//! Slippage & Market Impact
//!
//! Convex power-law price impact: impact = k * (volume / liquidity)^alpha,
//! clamped to [0, 0.5]. Larger trades against thinner books degrade the
//! realized rate disproportionately (alpha > 1).

use rand::rngs::StdRng;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Default impact coefficient.
pub const DEFAULT_IMPACT_K: f64 = 0.5;
/// Default impact exponent (convex).
pub const DEFAULT_IMPACT_ALPHA: f64 = 1.5;
/// Impact never exceeds half the notional.
pub const IMPACT_CAP: f64 = 0.5;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ImpactModel {
    pub k: f64,
    pub alpha: f64,
}

impl Default for ImpactModel {
    fn default() -> Self {
        Self {
            k: DEFAULT_IMPACT_K,
            alpha: DEFAULT_IMPACT_ALPHA,
        }
    }
}

/// Per-hop view of the impact a trade of `volume` takes against `liquidity`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HopImpact {
    pub impact: f64,
    pub impact_bps: f64,
    pub utilization: f64,
}

impl ImpactModel {
    pub fn new(k: f64, alpha: f64) -> Self {
        Self { k, alpha }
    }

    /// Fractional impact in [0, 0.5]. A non-positive book takes the cap.
    pub fn impact(&self, volume: f64, liquidity: f64) -> f64 {
        if liquidity <= 0.0 {
            return IMPACT_CAP;
        }
        let utilization = volume / liquidity;
        (self.k * utilization.powf(self.alpha)).clamp(0.0, IMPACT_CAP)
    }

    pub fn hop_impact(&self, volume: f64, liquidity: f64) -> HopImpact {
        let impact = self.impact(volume, liquidity);
        HopImpact {
            impact,
            impact_bps: impact * 10_000.0,
            utilization: if liquidity > 0.0 { volume / liquidity } else { f64::INFINITY },
        }
    }

    /// Rate net of fee and impact.
    pub fn effective_rate(&self, rate: f64, fee: f64, volume: f64, liquidity: f64) -> f64 {
        rate * (1.0 - fee) * (1.0 - self.impact(volume, liquidity))
    }

    /// Directional variant: multiplies a volatility-noise term (1 + eps),
    /// eps ~ N(0, sigma^2), onto the effective rate.
    pub fn noisy_effective_rate(
        &self,
        rate: f64,
        fee: f64,
        volume: f64,
        liquidity: f64,
        sigma: f64,
        rng: &mut StdRng,
    ) -> f64 {
        let eps = sample_normal(rng, 0.0, sigma);
        self.effective_rate(rate, fee, volume, liquidity) * (1.0 + eps)
    }

    /// Impact curve over volume multipliers, for side-by-side comparison of
    /// trade sizes against the same book.
    pub fn comparison_curve(&self, volume: f64, liquidity: f64) -> Vec<ImpactCurvePoint> {
        const MULTIPLIERS: [f64; 8] = [0.25, 0.5, 0.75, 1.0, 1.5, 2.0, 2.5, 3.0];
        MULTIPLIERS
            .iter()
            .map(|&m| ImpactCurvePoint {
                volume_multiplier: m,
                impact_pct: self.impact(volume * m, liquidity) * 100.0,
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ImpactCurvePoint {
    pub volume_multiplier: f64,
    pub impact_pct: f64,
}

/// Box-Muller draw; sigma of zero degenerates to the mean.
pub fn sample_normal(rng: &mut StdRng, mean: f64, std: f64) -> f64 {
    if std <= 0.0 {
        return mean;
    }
    let u1: f64 = rng.gen::<f64>().max(f64::MIN_POSITIVE);
    let u2: f64 = rng.gen();
    let z = (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos();
    mean + std * z
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn test_impact_is_convex_in_volume() {
        let model = ImpactModel::default();
        let small = model.impact(1_000.0, 1e6);
        let double = model.impact(2_000.0, 1e6);
        // alpha = 1.5: doubling volume multiplies impact by 2^1.5 ≈ 2.83.
        assert!((double / small - 2f64.powf(1.5)).abs() < 1e-9);
    }

    #[test]
    fn test_impact_clamped_at_cap() {
        let model = ImpactModel::default();
        assert_eq!(model.impact(1e9, 1.0), IMPACT_CAP);
        assert_eq!(model.impact(1.0, 0.0), IMPACT_CAP);
    }

    #[test]
    fn test_effective_rate_orders_degradations() {
        let model = ImpactModel::default();
        let clean = model.effective_rate(2.0, 0.0, 0.0, 1e6);
        let with_fee = model.effective_rate(2.0, 0.01, 0.0, 1e6);
        let with_all = model.effective_rate(2.0, 0.01, 5e5, 1e6);
        assert!(clean > with_fee && with_fee > with_all);
        assert!((clean - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_hop_impact_bps() {
        let model = ImpactModel::default();
        let hop = model.hop_impact(1e5, 1e6);
        assert!((hop.impact_bps - hop.impact * 10_000.0).abs() < 1e-9);
        assert!((hop.utilization - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_zero_sigma_noise_is_deterministic() {
        let model = ImpactModel::default();
        let mut rng = StdRng::seed_from_u64(7);
        let noisy = model.noisy_effective_rate(2.0, 0.0, 0.0, 1e6, 0.0, &mut rng);
        assert!((noisy - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_comparison_curve_monotone() {
        let model = ImpactModel::default();
        let curve = model.comparison_curve(1_000.0, 1e6);
        assert_eq!(curve.len(), 8);
        for pair in curve.windows(2) {
            assert!(pair[0].impact_pct <= pair[1].impact_pct);
        }
    }
}
