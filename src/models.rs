//! Wire Models
//!
//! Request and response types for the HTTP and CLI adapters, plus the
//! response envelope every endpoint wraps its payload in. Analytic helpers
//! for the standalone market-impact and latency-sensitivity endpoints live
//! here too, directly on their request types.

use crate::engine::allocator::{AllocatorMode, RankCriterion};
use crate::engine::error::EngineError;
use crate::engine::impact::{ImpactCurvePoint, ImpactModel, DEFAULT_IMPACT_ALPHA, DEFAULT_IMPACT_K};
use crate::engine::monte_carlo::{
    decayed_return, latency_half_life, HalfLife, DEFAULT_HALF_LIFE_MS, DEFAULT_LATENCY_MAX_MS,
    DEFAULT_SAMPLES,
};
use crate::engine::persistence::PersistenceSummary;
use crate::engine::pipeline::{EdgeInput, MetricsSnapshot, ScanOptions, ScanReport};
use crate::engine::pruner::PrunerConfig;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};

// ============================================================================
// Response envelope
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub kind: String,
    pub message: String,
}

/// Uniform `{success, data | error, elapsed_ms}` wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiEnvelope<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiError>,
    pub elapsed_ms: f64,
}

impl<T> ApiEnvelope<T> {
    pub fn ok(data: T, elapsed_ms: f64) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            elapsed_ms,
        }
    }

    pub fn err(error: &EngineError, elapsed_ms: f64) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(ApiError {
                kind: error.kind().to_string(),
                message: error.to_string(),
            }),
            elapsed_ms,
        }
    }
}

// ============================================================================
// Scan
// ============================================================================

fn default_capital() -> f64 {
    1_000.0
}

fn default_max_cycles() -> usize {
    10
}

fn default_true() -> bool {
    true
}

fn default_mc_samples() -> usize {
    DEFAULT_SAMPLES
}

fn default_allocator_mode() -> AllocatorMode {
    AllocatorMode::Greedy
}

fn default_latency_max_ms() -> f64 {
    DEFAULT_LATENCY_MAX_MS
}

fn default_spread_bps() -> f64 {
    10.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanRequest {
    pub market_data: Vec<EdgeInput>,
    #[serde(default = "default_capital")]
    pub capital: f64,
    #[serde(default = "default_max_cycles")]
    pub max_cycles: usize,
    #[serde(default = "default_true")]
    pub run_monte_carlo: bool,
    #[serde(default = "default_mc_samples")]
    pub mc_samples: usize,
    #[serde(default = "default_true")]
    pub run_stress: bool,
    #[serde(default = "default_allocator_mode")]
    pub allocator_mode: AllocatorMode,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default = "default_latency_max_ms")]
    pub latency_max_ms: f64,
    #[serde(default = "default_spread_bps")]
    pub spread_bps: f64,
    #[serde(default)]
    pub conservative: bool,
    #[serde(default)]
    pub pruner: PrunerConfig,
}

impl ScanRequest {
    pub fn options(&self) -> ScanOptions {
        ScanOptions {
            max_cycles: self.max_cycles,
            run_monte_carlo: self.run_monte_carlo,
            mc_samples: self.mc_samples,
            run_stress: self.run_stress,
            allocator_mode: self.allocator_mode,
            seed: self.seed,
            latency_max_ms: self.latency_max_ms,
            spread_bps: self.spread_bps,
            conservative: self.conservative,
            pruner: self.pruner.clone(),
            allocator: Default::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanResponse {
    pub scan_id: String,
    #[serde(flatten)]
    pub report: ScanReport,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QuickScanQuery {
    #[serde(default)]
    pub use_real_data: bool,
    #[serde(default)]
    pub seed: Option<u64>,
}

// ============================================================================
// Metrics
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsResponse {
    pub system: MetricsSnapshot,
    pub persistence: PersistenceSummary,
    pub opportunities_cached: usize,
}

// ============================================================================
// Allocation
// ============================================================================

fn default_max_position() -> f64 {
    0.3
}

fn default_min_confidence() -> f64 {
    50.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocateRequest {
    pub capital: f64,
    pub opportunity_ids: Vec<String>,
    #[serde(default = "default_allocator_mode")]
    pub mode: AllocatorMode,
    #[serde(default = "default_max_position")]
    pub max_position: f64,
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
}

impl AllocateRequest {
    pub fn allocator_config(&self) -> crate::engine::allocator::AllocatorConfig {
        crate::engine::allocator::AllocatorConfig {
            max_position: self.max_position,
            min_confidence: self.min_confidence,
            criterion: RankCriterion::Composite,
        }
    }
}

// ============================================================================
// Market impact
// ============================================================================

fn default_impact_k() -> f64 {
    DEFAULT_IMPACT_K
}

fn default_impact_alpha() -> f64 {
    DEFAULT_IMPACT_ALPHA
}

fn default_volatility() -> f64 {
    0.01
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketImpactRequest {
    pub volume: f64,
    pub liquidity: f64,
    pub base_price: f64,
    #[serde(default = "default_impact_k")]
    pub k: f64,
    #[serde(default = "default_impact_alpha")]
    pub alpha: f64,
    #[serde(default = "default_volatility")]
    pub volatility: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketImpactResponse {
    pub impact_pct: f64,
    pub impact_bps: f64,
    pub impacted_price: f64,
    pub price_increase: f64,
    pub utilization_pct: f64,
    /// Volatility-scaled slippage on top of pure impact.
    pub volatility_component_pct: f64,
    pub total_slippage_pct: f64,
    pub comparison_data: Vec<ImpactCurvePoint>,
}

impl MarketImpactRequest {
    pub fn evaluate(&self) -> Result<MarketImpactResponse, EngineError> {
        if self.volume < 0.0 || self.liquidity < 0.0 || self.base_price <= 0.0 {
            return Err(EngineError::InvalidInput(
                "volume and liquidity must be non-negative, base_price positive".into(),
            ));
        }
        let model = ImpactModel::new(self.k, self.alpha);
        let hop = model.hop_impact(self.volume, self.liquidity);
        let impacted_price = self.base_price * (1.0 + hop.impact);
        let volatility_component = if hop.utilization.is_finite() {
            self.volatility * hop.utilization.sqrt()
        } else {
            self.volatility
        };
        Ok(MarketImpactResponse {
            impact_pct: hop.impact * 100.0,
            impact_bps: hop.impact_bps,
            impacted_price,
            price_increase: impacted_price - self.base_price,
            utilization_pct: if hop.utilization.is_finite() {
                hop.utilization * 100.0
            } else {
                100.0
            },
            volatility_component_pct: volatility_component * 100.0,
            total_slippage_pct: (hop.impact + volatility_component) * 100.0,
            comparison_data: model.comparison_curve(self.volume, self.liquidity),
        })
    }
}

// ============================================================================
// Latency sensitivity
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LatencyReliability {
    /// Return survives the whole search domain.
    LatencyImmune,
    /// Half-life at or above 200 ms.
    Robust,
    /// Half-life in [100, 200) ms.
    Moderate,
    /// Half-life in [50, 100) ms.
    Sensitive,
    /// Half-life under 50 ms (or the cycle is already underwater).
    Critical,
}

impl LatencyReliability {
    fn from_half_life(half_life_ms: f64) -> Self {
        if half_life_ms.is_infinite() {
            Self::LatencyImmune
        } else if half_life_ms >= 200.0 {
            Self::Robust
        } else if half_life_ms >= 100.0 {
            Self::Moderate
        } else if half_life_ms >= 50.0 {
            Self::Sensitive
        } else {
            Self::Critical
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LatencySensitivityRequest {
    pub base_return: f64,
    pub path_length: usize,
    pub liquidity: f64,
    #[serde(default = "default_volatility")]
    pub volatility: f64,
    #[serde(default)]
    pub fee_per_hop: f64,
    #[serde(default = "default_capital")]
    pub initial_capital: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecayPoint {
    pub latency_ms: f64,
    pub return_pct: f64,
    pub is_profitable: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LatencyKeyMetric {
    pub latency_ms: f64,
    pub return_pct: f64,
    pub is_profitable: bool,
    /// P(return > 0) under per-hop gaussian noise.
    pub probability_positive: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LatencySensitivityResponse {
    pub half_life_ms: HalfLife,
    /// Return net of fees and impact, before any latency decay.
    pub adjusted_return: f64,
    pub decay_curve: Vec<DecayPoint>,
    pub key_metrics: Vec<LatencyKeyMetric>,
    pub reliability: LatencyReliability,
}

impl LatencySensitivityRequest {
    pub fn evaluate(&self) -> Result<LatencySensitivityResponse, EngineError> {
        if self.path_length == 0 {
            return Err(EngineError::InvalidInput("path_length must be positive".into()));
        }
        if !(0.0..1.0).contains(&self.fee_per_hop) {
            return Err(EngineError::InvalidInput(format!(
                "fee_per_hop must be in [0, 1), got {}",
                self.fee_per_hop
            )));
        }
        if self.liquidity <= 0.0 || self.initial_capital <= 0.0 {
            return Err(EngineError::InvalidInput(
                "liquidity and initial_capital must be positive".into(),
            ));
        }

        // Net the gross return down by fees and impact on every hop.
        let model = ImpactModel::default();
        let per_hop =
            (1.0 - self.fee_per_hop) * (1.0 - model.impact(self.initial_capital, self.liquidity));
        let adjusted_return =
            (1.0 + self.base_return) * per_hop.powi(self.path_length as i32) - 1.0;

        let half_life = latency_half_life(adjusted_return, DEFAULT_HALF_LIFE_MS);

        let decay_curve: Vec<DecayPoint> = (0..=20)
            .map(|i| {
                let latency_ms = i as f64 * 20.0;
                let ret = decayed_return(adjusted_return, latency_ms, DEFAULT_HALF_LIFE_MS);
                DecayPoint {
                    latency_ms,
                    return_pct: ret * 100.0,
                    is_profitable: ret > 0.0,
                }
            })
            .collect();

        // Gaussian noise across the path widens into sigma * sqrt(hops).
        let sigma_total = self.volatility * (self.path_length as f64).sqrt();
        let key_metrics = [0.0, 50.0, 100.0, 200.0]
            .iter()
            .map(|&latency_ms| {
                let ret = decayed_return(adjusted_return, latency_ms, DEFAULT_HALF_LIFE_MS);
                let probability_positive = match Normal::new(0.0, sigma_total) {
                    Ok(normal) if sigma_total > 0.0 => 1.0 - normal.cdf(-ret),
                    _ => {
                        if ret > 0.0 {
                            1.0
                        } else {
                            0.0
                        }
                    }
                };
                LatencyKeyMetric {
                    latency_ms,
                    return_pct: ret * 100.0,
                    is_profitable: ret > 0.0,
                    probability_positive,
                }
            })
            .collect();

        Ok(LatencySensitivityResponse {
            half_life_ms: HalfLife(half_life),
            adjusted_return,
            decay_curve,
            key_metrics,
            reliability: LatencyReliability::from_half_life(half_life),
        })
    }
}

// ============================================================================
// Service info
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct ServiceInfo {
    pub name: &'static str,
    pub version: &'static str,
    pub status: &'static str,
    pub disclaimer: &'static str,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        Self {
            name: "arbscope-backend",
            version: env!("CARGO_PKG_VERSION"),
            status: "operational",
            disclaimer: "Research and educational tool. No trades are executed.",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp_ms: i64,
    pub total_scans: u64,
    pub opportunities_cached: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_request_defaults() {
        let request: ScanRequest = serde_json::from_str(
            r#"{"market_data": [{"from_token": "BTC", "to_token": "ETH", "rate": 15.0}]}"#,
        )
        .unwrap();
        assert_eq!(request.capital, 1_000.0);
        assert_eq!(request.max_cycles, 10);
        assert_eq!(request.mc_samples, DEFAULT_SAMPLES);
        assert!(request.run_monte_carlo);
        assert_eq!(request.allocator_mode, AllocatorMode::Greedy);
        assert_eq!(request.market_data[0].fee, 0.0);
        assert_eq!(request.market_data[0].liquidity, 10_000.0);
        assert_eq!(request.market_data[0].venue, "simulated");
    }

    #[test]
    fn test_envelope_shapes() {
        let ok = ApiEnvelope::ok(42, 1.5);
        assert!(ok.success);
        assert_eq!(ok.data, Some(42));
        let err: ApiEnvelope<i32> =
            ApiEnvelope::err(&EngineError::InvalidInput("bad".into()), 0.5);
        assert!(!err.success);
        assert_eq!(err.error.as_ref().unwrap().kind, "invalid_input");
    }

    #[test]
    fn test_market_impact_identities() {
        let response = MarketImpactRequest {
            volume: 1_000.0,
            liquidity: 100_000.0,
            base_price: 50.0,
            k: 0.5,
            alpha: 1.5,
            volatility: 0.0,
        }
        .evaluate()
        .unwrap();
        // impact = 0.5 * 0.01^1.5 = 5e-4
        assert!((response.impact_pct - 0.05).abs() < 1e-9);
        assert!((response.impact_bps - 5.0).abs() < 1e-9);
        assert!((response.impacted_price - 50.0 * 1.0005).abs() < 1e-9);
        assert!((response.utilization_pct - 1.0).abs() < 1e-9);
        assert_eq!(response.comparison_data.len(), 8);
    }

    #[test]
    fn test_latency_sensitivity_decay_identities() {
        // 1% base return, deep book, tiny capital: half-life lands on the
        // default decay reference and the curve hits the canonical points.
        let response = LatencySensitivityRequest {
            base_return: 0.01,
            path_length: 3,
            liquidity: 1e9,
            volatility: 0.0,
            fee_per_hop: 0.0,
            initial_capital: 1.0,
        }
        .evaluate()
        .unwrap();
        assert!((response.half_life_ms.0 - 100.0).abs() < 1e-6);

        let at = |ms: f64| {
            response
                .decay_curve
                .iter()
                .find(|p| (p.latency_ms - ms).abs() < 1e-9)
                .unwrap()
        };
        assert!((at(50.0).return_pct - 0.5).abs() < 1e-4);
        assert!(at(100.0).return_pct.abs() < 1e-4);
        assert!(at(200.0).return_pct < 0.0);
        assert!(!at(200.0).is_profitable);
        assert_eq!(response.reliability, LatencyReliability::Moderate);
    }

    #[test]
    fn test_latency_sensitivity_unprofitable_is_critical() {
        let response = LatencySensitivityRequest {
            base_return: -0.01,
            path_length: 3,
            liquidity: 1e9,
            volatility: 0.01,
            fee_per_hop: 0.0,
            initial_capital: 1.0,
        }
        .evaluate()
        .unwrap();
        assert_eq!(response.half_life_ms.0, 0.0);
        assert_eq!(response.reliability, LatencyReliability::Critical);
    }

    #[test]
    fn test_latency_sensitivity_rejects_bad_fee() {
        let result = LatencySensitivityRequest {
            base_return: 0.01,
            path_length: 3,
            liquidity: 1e9,
            volatility: 0.0,
            fee_per_hop: 1.0,
            initial_capital: 1.0,
        }
        .evaluate();
        assert!(matches!(result, Err(EngineError::InvalidInput(_))));
    }

    #[test]
    fn test_probability_positive_with_noise() {
        let response = LatencySensitivityRequest {
            base_return: 0.01,
            path_length: 4,
            liquidity: 1e9,
            volatility: 0.005,
            fee_per_hop: 0.0,
            initial_capital: 1.0,
        }
        .evaluate()
        .unwrap();
        let at_zero = &response.key_metrics[0];
        assert!(at_zero.probability_positive > 0.5);
        assert!(at_zero.probability_positive <= 1.0);
        let at_200 = response.key_metrics.last().unwrap();
        assert!(at_200.probability_positive < 0.5);
    }
}
