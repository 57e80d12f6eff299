//! Risk Engine
//!
//! Five-factor composite risk for a detected cycle. Each component maps to
//! [0, 100]; the composite is a fixed-weight blend and buckets into a level.
//! Conservative mode scales the final composite by 1.3 (capped), leaving the
//! component scores untouched.

use serde::{Deserialize, Serialize};

/// Longest path the complexity score normalizes against.
pub const MAX_PATH: usize = 6;
/// Reference half-life for the execution score.
pub const EXECUTION_H_REF_MS: f64 = 500.0;
/// Component score above which a warning fires.
const WARNING_THRESHOLD: f64 = 70.0;
/// Conservative-mode composite multiplier.
const CONSERVATIVE_MULTIPLIER: f64 = 1.3;

const WEIGHT_LIQUIDITY: f64 = 0.3;
const WEIGHT_COMPLEXITY: f64 = 0.2;
const WEIGHT_VOLATILITY: f64 = 0.2;
const WEIGHT_EXECUTION: f64 = 0.2;
const WEIGHT_SPREAD: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskLevel {
    VeryLow,
    Low,
    Moderate,
    High,
    VeryHigh,
}

impl RiskLevel {
    pub fn from_composite(composite: f64) -> Self {
        if composite < 20.0 {
            Self::VeryLow
        } else if composite < 40.0 {
            Self::Low
        } else if composite < 60.0 {
            Self::Moderate
        } else if composite < 80.0 {
            Self::High
        } else {
            Self::VeryHigh
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::VeryLow => "Very Low",
            Self::Low => "Low",
            Self::Moderate => "Moderate",
            Self::High => "High",
            Self::VeryHigh => "Very High",
        }
    }
}

/// Everything the scorer needs about one cycle.
#[derive(Debug, Clone)]
pub struct RiskInput {
    pub capital: f64,
    pub min_hop_liquidity: f64,
    pub path_length: usize,
    /// Mean of the per-hop volatility sigmas.
    pub mean_hop_sigma: f64,
    /// Latency half-life; +inf means latency-immune.
    pub half_life_ms: f64,
    /// Bid-ask spread in price units.
    pub spread: f64,
    pub mid_price: f64,
    pub conservative: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskProfile {
    pub liquidity: f64,
    pub complexity: f64,
    pub volatility: f64,
    pub execution: f64,
    pub spread: f64,
    pub composite: f64,
    pub level: RiskLevel,
    pub confidence: f64,
    pub warnings: Vec<String>,
    pub recommendations: Vec<String>,
}

fn clamp_score(value: f64) -> f64 {
    value.clamp(0.0, 100.0)
}

/// Score one cycle.
pub fn assess(input: &RiskInput) -> RiskProfile {
    let liquidity = if input.min_hop_liquidity > 0.0 {
        clamp_score(100.0 * input.capital / input.min_hop_liquidity)
    } else {
        100.0
    };
    let complexity = clamp_score(100.0 * input.path_length as f64 / MAX_PATH as f64);
    let volatility = clamp_score(1000.0 * input.mean_hop_sigma);
    let execution = {
        let h = input.half_life_ms.min(EXECUTION_H_REF_MS).max(0.0);
        clamp_score(100.0 * (1.0 - h / EXECUTION_H_REF_MS))
    };
    let spread = if input.mid_price > 0.0 {
        clamp_score(100.0 * input.spread / input.mid_price)
    } else {
        100.0
    };

    let mut composite = WEIGHT_LIQUIDITY * liquidity
        + WEIGHT_COMPLEXITY * complexity
        + WEIGHT_VOLATILITY * volatility
        + WEIGHT_EXECUTION * execution
        + WEIGHT_SPREAD * spread;
    if input.conservative {
        composite = (composite * CONSERVATIVE_MULTIPLIER).min(100.0);
    }

    let level = RiskLevel::from_composite(composite);
    let confidence = clamp_score(100.0 - composite);

    let mut warnings = Vec::new();
    if liquidity > WARNING_THRESHOLD {
        warnings.push("High liquidity risk: capital approaches available depth".to_string());
    }
    if complexity > WARNING_THRESHOLD {
        warnings.push("Long multi-hop path: execution fragility compounds per hop".to_string());
    }
    if volatility > WARNING_THRESHOLD {
        warnings.push("High volatility: prices may move materially during execution".to_string());
    }
    if execution > WARNING_THRESHOLD {
        warnings.push("Latency sensitive: the opportunity decays before slow fills land".to_string());
    }
    if spread > WARNING_THRESHOLD {
        warnings.push("Wide spreads: crossing costs erode the edge".to_string());
    }
    if confidence < 50.0 {
        warnings.push("Low confidence: negative outcomes dominate the distribution".to_string());
    }

    let mut recommendations = Vec::new();
    if matches!(level, RiskLevel::High | RiskLevel::VeryHigh) {
        recommendations.push("Reduce position size".to_string());
    }
    if liquidity > 60.0 {
        recommendations.push("Split execution across multiple passes".to_string());
    }
    if complexity > 60.0 {
        recommendations.push("Prefer shorter paths over the same tokens".to_string());
    }
    if execution > 60.0 {
        recommendations.push("Use faster execution infrastructure".to_string());
    }
    if volatility > 60.0 {
        recommendations.push("Wait for a calmer volatility regime".to_string());
    }

    RiskProfile {
        liquidity,
        complexity,
        volatility,
        execution,
        spread,
        composite,
        level,
        confidence,
        warnings,
        recommendations,
    }
}
