//! Stress Battery
//!
//! Seven named market shocks, each a pure mutation of the cycle's hop
//! parameters (or the simulator's latency bound) followed by a re-simulation
//! under the same seed. Survival means the shocked expected return stays
//! positive; robustness is the surviving fraction of the battery.

use crate::engine::error::EngineError;
use crate::engine::impact::ImpactModel;
use crate::engine::monte_carlo::{run_simulation, HopParams, SimulationConfig};
use crate::engine::CancellationToken;
use serde::{Deserialize, Serialize};
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShockKind {
    /// Adverse move applied to every rate.
    Price,
    /// Depth drains on every hop.
    Liquidity,
    /// Per-hop sigma scales up.
    Volatility,
    /// Every fee scales up.
    Fee,
    /// The simulator's latency bound stretches.
    Latency,
    /// Bid-ask spreads widen.
    Spread,
    /// Price, liquidity and fee shocks land together.
    Combined,
}

impl ShockKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Price => "Price ±1%",
            Self::Liquidity => "Liquidity -30%",
            Self::Volatility => "Volatility x2",
            Self::Fee => "Fee x2",
            Self::Latency => "Latency x10",
            Self::Spread => "Spread x3",
            Self::Combined => "Combined stress",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Price => "Uniform adverse 1% move on every rate",
            Self::Liquidity => "30% depth reduction on every hop",
            Self::Volatility => "Per-hop volatility doubles",
            Self::Fee => "Every fee doubles",
            Self::Latency => "Latency ceiling stretches tenfold",
            Self::Spread => "Bid-ask spreads triple",
            Self::Combined => "Price -1%, liquidity -30% and fee x2 at once",
        }
    }

    /// Canonical magnitude for the named battery, on the same scale the
    /// breakeven search sweeps.
    fn battery_magnitude(&self) -> f64 {
        match self {
            Self::Price => 0.01,
            Self::Liquidity => 0.30,
            _ => 1.0,
        }
    }
}

/// The seven-scenario battery, in reporting order.
pub const BATTERY: [ShockKind; 7] = [
    ShockKind::Price,
    ShockKind::Liquidity,
    ShockKind::Volatility,
    ShockKind::Fee,
    ShockKind::Latency,
    ShockKind::Spread,
    ShockKind::Combined,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RobustnessRating {
    Excellent,
    Strong,
    Moderate,
    Weak,
    VeryWeak,
}

impl RobustnessRating {
    pub fn from_survived(survived: usize) -> Self {
        match survived {
            n if n >= 6 => Self::Excellent,
            4 | 5 => Self::Strong,
            2 | 3 => Self::Moderate,
            1 => Self::Weak,
            _ => Self::VeryWeak,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioOutcome {
    pub name: String,
    pub description: String,
    pub base_return: f64,
    pub stressed_return: f64,
    pub return_change: f64,
    pub impact_pct: f64,
    pub survived: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StressReport {
    pub scenarios: Vec<ScenarioOutcome>,
    pub scenarios_tested: usize,
    pub scenarios_survived: usize,
    /// survived / 7, always a multiple of 1/7.
    pub robustness: f64,
    pub worst_case_return: f64,
    pub best_case_return: f64,
    pub rating: RobustnessRating,
    /// Price-shock magnitude that zeroes the return, when requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub breakeven_price_shock: Option<f64>,
}

/// Everything a stress run needs about the cycle under test.
pub struct StressContext<'a> {
    pub hops: &'a [HopParams],
    pub volume: f64,
    pub config: &'a SimulationConfig,
    pub model: &'a ImpactModel,
    /// Per-hop half-spread as a fraction of mid.
    pub spread_frac: f64,
    pub cancel: &'a CancellationToken,
}

/// Mutated inputs for one scenario at a given magnitude.
fn apply_shock(
    ctx: &StressContext<'_>,
    kind: ShockKind,
    magnitude: f64,
) -> (Vec<HopParams>, SimulationConfig, f64) {
    let mut hops = ctx.hops.to_vec();
    let mut config = ctx.config.clone();
    let mut spread_multiplier = 1.0;

    match kind {
        ShockKind::Price => {
            for hop in &mut hops {
                hop.rate *= 1.0 - magnitude;
            }
        }
        ShockKind::Liquidity => {
            for hop in &mut hops {
                hop.liquidity *= 1.0 - magnitude;
            }
        }
        ShockKind::Volatility => {
            for hop in &mut hops {
                hop.sigma *= 1.0 + magnitude;
            }
        }
        ShockKind::Fee => {
            for hop in &mut hops {
                hop.fee = (hop.fee * (1.0 + magnitude)).min(0.99);
            }
        }
        ShockKind::Latency => {
            config.latency_max_ms *= 1.0 + 9.0 * magnitude;
        }
        ShockKind::Spread => {
            spread_multiplier = 1.0 + 2.0 * magnitude;
        }
        ShockKind::Combined => {
            for hop in &mut hops {
                hop.rate *= 1.0 - 0.01 * magnitude;
                hop.liquidity *= 1.0 - 0.30 * magnitude;
                hop.fee = (hop.fee * (1.0 + magnitude)).min(0.99);
            }
        }
    }

    (hops, config, spread_multiplier)
}

/// Expected return after one shock: re-simulated mean minus the widened
/// spread cost (spreads are not part of the hop multiplier, so their change
/// lands as a per-hop crossing cost).
fn shocked_return(
    ctx: &StressContext<'_>,
    kind: ShockKind,
    magnitude: f64,
) -> Result<f64, EngineError> {
    let (hops, config, spread_multiplier) = apply_shock(ctx, kind, magnitude);
    let summary = run_simulation(&hops, ctx.volume, &config, ctx.model, ctx.cancel)?;
    let spread_cost = (spread_multiplier - 1.0) * ctx.spread_frac * hops.len() as f64;
    Ok(summary.mean - spread_cost)
}

/// Run the full battery against a cycle.
pub fn run_stress(
    ctx: &StressContext<'_>,
    base_return: f64,
    include_breakeven: bool,
) -> Result<StressReport, EngineError> {
    let mut scenarios = Vec::with_capacity(BATTERY.len());

    for kind in BATTERY {
        if ctx.cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        let stressed_return = shocked_return(ctx, kind, kind.battery_magnitude())?;
        let return_change = stressed_return - base_return;
        let impact_pct = if base_return.abs() > f64::EPSILON {
            return_change / base_return * 100.0
        } else {
            -100.0
        };
        trace!(scenario = kind.name(), stressed_return, "stress scenario evaluated");
        scenarios.push(ScenarioOutcome {
            name: kind.name().to_string(),
            description: kind.description().to_string(),
            base_return,
            stressed_return,
            return_change,
            impact_pct,
            survived: stressed_return > 0.0,
        });
    }

    let scenarios_survived = scenarios.iter().filter(|s| s.survived).count();
    let worst_case_return = scenarios
        .iter()
        .map(|s| s.stressed_return)
        .fold(f64::INFINITY, f64::min);
    let best_case_return = scenarios
        .iter()
        .map(|s| s.stressed_return)
        .fold(f64::NEG_INFINITY, f64::max);

    let breakeven_price_shock = if include_breakeven {
        Some(breakeven_shock(ctx, ShockKind::Price)?)
    } else {
        None
    };

    Ok(StressReport {
        scenarios_tested: BATTERY.len(),
        scenarios_survived,
        robustness: scenarios_survived as f64 / BATTERY.len() as f64,
        worst_case_return,
        best_case_return,
        rating: RobustnessRating::from_survived(scenarios_survived),
        scenarios,
        breakeven_price_shock,
    })
}

/// Shock magnitude in [0, 1] that brings the expected return to zero, by
/// bisection. Returns 0 when the cycle is already underwater and 1 when it
/// survives the whole magnitude range.
pub fn breakeven_shock(ctx: &StressContext<'_>, kind: ShockKind) -> Result<f64, EngineError> {
    let (mut lo, mut hi) = (0.0_f64, 1.0_f64);
    if shocked_return(ctx, kind, lo)? <= 0.0 {
        return Ok(0.0);
    }
    if shocked_return(ctx, kind, hi)? > 0.0 {
        return Ok(1.0);
    }
    for _ in 0..24 {
        if ctx.cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        let mid = 0.5 * (lo + hi);
        if shocked_return(ctx, kind, mid)? > 0.0 {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    Ok(0.5 * (lo + hi))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn healthy_hops() -> Vec<HopParams> {
        vec![
            HopParams { rate: 15.0, fee: 0.0, liquidity: 1e6, sigma: 0.0 },
            HopParams { rate: 2500.0, fee: 0.0, liquidity: 1e6, sigma: 0.0 },
            HopParams { rate: 1.05 / (15.0 * 2500.0), fee: 0.0, liquidity: 1e6, sigma: 0.0 },
        ]
    }

    fn no_latency_config() -> SimulationConfig {
        SimulationConfig {
            samples: 256,
            latency_max_ms: 0.0,
            liquidity_delta: 0.0,
            half_life_ms: 100.0,
            seed: 42,
        }
    }

    #[test]
    fn test_battery_has_seven_scenarios() {
        let hops = healthy_hops();
        let config = no_latency_config();
        let model = ImpactModel::default();
        let cancel = CancellationToken::new();
        let ctx = StressContext {
            hops: &hops,
            volume: 1.0,
            config: &config,
            model: &model,
            spread_frac: 0.0005,
            cancel: &cancel,
        };
        let report = run_stress(&ctx, 0.05, false).unwrap();
        assert_eq!(report.scenarios_tested, 7);
        assert_eq!(report.scenarios.len(), 7);
        let k = report.scenarios_survived as f64;
        assert!((report.robustness - k / 7.0).abs() < 1e-12);
    }

    #[test]
    fn test_healthy_cycle_survives_most_shocks() {
        // A 5% edge with deep books should shrug off nearly everything.
        let hops = healthy_hops();
        let config = no_latency_config();
        let model = ImpactModel::default();
        let cancel = CancellationToken::new();
        let ctx = StressContext {
            hops: &hops,
            volume: 1.0,
            config: &config,
            model: &model,
            spread_frac: 0.0005,
            cancel: &cancel,
        };
        let report = run_stress(&ctx, 0.05, false).unwrap();
        assert!(report.scenarios_survived >= 6, "survived {}", report.scenarios_survived);
        assert_eq!(report.rating, RobustnessRating::Excellent);
    }

    #[test]
    fn test_thin_cycle_dies_under_combined_shock() {
        // A 0.5% edge cannot absorb price -1% plus liquidity and fee shocks.
        let mut hops = healthy_hops();
        hops[2].rate = 1.005 / (15.0 * 2500.0);
        let config = no_latency_config();
        let model = ImpactModel::default();
        let cancel = CancellationToken::new();
        let ctx = StressContext {
            hops: &hops,
            volume: 1.0,
            config: &config,
            model: &model,
            spread_frac: 0.0005,
            cancel: &cancel,
        };
        let report = run_stress(&ctx, 0.005, false).unwrap();
        let combined = report
            .scenarios
            .iter()
            .find(|s| s.name == ShockKind::Combined.name())
            .unwrap();
        assert!(!combined.survived);
        assert!(combined.stressed_return < 0.0);
    }

    #[test]
    fn test_rating_buckets() {
        assert_eq!(RobustnessRating::from_survived(7), RobustnessRating::Excellent);
        assert_eq!(RobustnessRating::from_survived(6), RobustnessRating::Excellent);
        assert_eq!(RobustnessRating::from_survived(5), RobustnessRating::Strong);
        assert_eq!(RobustnessRating::from_survived(4), RobustnessRating::Strong);
        assert_eq!(RobustnessRating::from_survived(3), RobustnessRating::Moderate);
        assert_eq!(RobustnessRating::from_survived(2), RobustnessRating::Moderate);
        assert_eq!(RobustnessRating::from_survived(1), RobustnessRating::Weak);
        assert_eq!(RobustnessRating::from_survived(0), RobustnessRating::VeryWeak);
    }

    #[test]
    fn test_breakeven_price_shock_brackets_the_edge() {
        // A 5% edge over three hops breaks even near a 1.7% uniform move.
        let hops = healthy_hops();
        let config = no_latency_config();
        let model = ImpactModel::default();
        let cancel = CancellationToken::new();
        let ctx = StressContext {
            hops: &hops,
            volume: 1.0,
            config: &config,
            model: &model,
            spread_frac: 0.0,
            cancel: &cancel,
        };
        let breakeven = breakeven_shock(&ctx, ShockKind::Price).unwrap();
        assert!(breakeven > 0.005 && breakeven < 0.05, "breakeven {breakeven}");
    }

    #[test]
    fn test_stress_is_deterministic() {
        let hops = healthy_hops();
        let config = no_latency_config();
        let model = ImpactModel::default();
        let cancel = CancellationToken::new();
        let ctx = StressContext {
            hops: &hops,
            volume: 1.0,
            config: &config,
            model: &model,
            spread_frac: 0.0005,
            cancel: &cancel,
        };
        let a = run_stress(&ctx, 0.05, false).unwrap();
        let b = run_stress(&ctx, 0.05, false).unwrap();
        for (x, y) in a.scenarios.iter().zip(&b.scenarios) {
            assert_eq!(x.stressed_return.to_bits(), y.stressed_return.to_bits());
        }
    }
}
