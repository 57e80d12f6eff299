//! Market Regime Detection
//!
//! Classifies volatility, liquidity and trend per trading pair from a
//! rolling window of (price, volume) observations. The tracker is
//! append-only; callers wrap it in a reader-writer lock for the
//! single-writer / multi-reader discipline.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

/// Default rolling window length.
pub const DEFAULT_WINDOW: usize = 100;
/// Short moving-average span for trend detection.
pub const SHORT_SMA: usize = 10;
/// Long moving-average span for trend detection.
pub const LONG_SMA: usize = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VolatilityClass {
    VeryLow,
    Low,
    Moderate,
    High,
    VeryHigh,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LiquidityClass {
    Drought,
    Low,
    Normal,
    High,
    Abundant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrendClass {
    StrongDown,
    Down,
    Sideways,
    Up,
    StrongUp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeSnapshot {
    pub volatility_class: VolatilityClass,
    pub liquidity_class: LiquidityClass,
    pub trend_class: TrendClass,
    pub volatility_value: f64,
    pub liquidity_percentile: f64,
    pub trend_strength: f64,
    /// Window fill fraction in [0, 1].
    pub confidence: f64,
    pub recommendation: String,
}

impl Default for RegimeSnapshot {
    fn default() -> Self {
        Self {
            volatility_class: VolatilityClass::Moderate,
            liquidity_class: LiquidityClass::Normal,
            trend_class: TrendClass::Sideways,
            volatility_value: 0.0,
            liquidity_percentile: 0.5,
            trend_strength: 0.0,
            confidence: 0.0,
            recommendation: "Insufficient data for regime classification".to_string(),
        }
    }
}

#[derive(Debug, Default)]
struct PairWindow {
    prices: VecDeque<f64>,
    volumes: VecDeque<f64>,
}

impl PairWindow {
    fn push(&mut self, price: f64, volume: f64, window: usize) {
        if self.prices.len() >= window {
            self.prices.pop_front();
            self.volumes.pop_front();
        }
        self.prices.push_back(price);
        self.volumes.push_back(volume);
    }
}

#[derive(Debug)]
pub struct RegimeTracker {
    window: usize,
    pairs: HashMap<String, PairWindow>,
}

impl Default for RegimeTracker {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

fn stdev(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 2 {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / n as f64;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1) as f64;
    var.sqrt()
}

fn sma(values: &[f64], span: usize) -> f64 {
    let tail = &values[values.len().saturating_sub(span)..];
    if tail.is_empty() {
        return 0.0;
    }
    tail.iter().sum::<f64>() / tail.len() as f64
}

/// Empirical percentile rank of `value` within `samples`, in [0, 1].
fn percentile_rank(samples: &[f64], value: f64) -> f64 {
    if samples.is_empty() {
        return 0.5;
    }
    let below = samples.iter().filter(|&&s| s < value).count();
    let equal = samples.iter().filter(|&&s| s == value).count();
    (below as f64 + 0.5 * equal as f64) / samples.len() as f64
}

fn quintile<T: Copy>(percentile: f64, classes: [T; 5]) -> T {
    let idx = ((percentile * 5.0).floor() as usize).min(4);
    classes[idx]
}

impl RegimeTracker {
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(SHORT_SMA),
            pairs: HashMap::new(),
        }
    }

    /// Append one (price, volume) observation for a pair.
    pub fn observe(&mut self, pair: &str, price: f64, volume: f64) {
        if price <= 0.0 || !price.is_finite() || !volume.is_finite() {
            return;
        }
        let window = self.window;
        self.pairs
            .entry(pair.to_string())
            .or_default()
            .push(price, volume, window);
    }

    pub fn pairs(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.pairs.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Classify the current regime for a pair.
    pub fn snapshot(&self, pair: &str) -> RegimeSnapshot {
        let Some(window) = self.pairs.get(pair) else {
            return RegimeSnapshot::default();
        };
        let prices: Vec<f64> = window.prices.iter().copied().collect();
        let volumes: Vec<f64> = window.volumes.iter().copied().collect();
        if prices.len() < SHORT_SMA {
            return RegimeSnapshot::default();
        }

        // Volatility: stdev of log-returns over the short span, ranked by
        // quintile against the same statistic across the whole window.
        let log_returns: Vec<f64> = prices
            .windows(2)
            .map(|w| (w[1] / w[0]).ln())
            .collect();
        let current_vol = stdev(&log_returns[log_returns.len().saturating_sub(SHORT_SMA)..]);
        let rolling_vols: Vec<f64> = if log_returns.len() >= SHORT_SMA {
            log_returns
                .windows(SHORT_SMA)
                .map(stdev)
                .collect()
        } else {
            vec![current_vol]
        };
        let vol_percentile = percentile_rank(&rolling_vols, current_vol);
        let volatility_class = quintile(
            vol_percentile,
            [
                VolatilityClass::VeryLow,
                VolatilityClass::Low,
                VolatilityClass::Moderate,
                VolatilityClass::High,
                VolatilityClass::VeryHigh,
            ],
        );

        // Liquidity: recent volume ranked by quintile within the window.
        let recent_volume = sma(&volumes, SHORT_SMA);
        let liquidity_percentile = percentile_rank(&volumes, recent_volume);
        let liquidity_class = quintile(
            liquidity_percentile,
            [
                LiquidityClass::Drought,
                LiquidityClass::Low,
                LiquidityClass::Normal,
                LiquidityClass::High,
                LiquidityClass::Abundant,
            ],
        );

        // Trend: SMA(short) - SMA(long), normalized by the price stdev.
        let price_std = stdev(&prices);
        let trend_strength = if price_std > 0.0 {
            (sma(&prices, SHORT_SMA) - sma(&prices, LONG_SMA)) / price_std
        } else {
            0.0
        };
        let trend_class = if trend_strength < -0.5 {
            TrendClass::StrongDown
        } else if trend_strength < -0.2 {
            TrendClass::Down
        } else if trend_strength <= 0.2 {
            TrendClass::Sideways
        } else if trend_strength <= 0.5 {
            TrendClass::Up
        } else {
            TrendClass::StrongUp
        };

        let confidence = (prices.len() as f64 / self.window as f64).min(1.0);
        let recommendation =
            recommend(volatility_class, liquidity_class, trend_class);

        RegimeSnapshot {
            volatility_class,
            liquidity_class,
            trend_class,
            volatility_value: current_vol,
            liquidity_percentile,
            trend_strength,
            confidence,
            recommendation,
        }
    }
}

fn recommend(
    volatility: VolatilityClass,
    liquidity: LiquidityClass,
    trend: TrendClass,
) -> String {
    let mut notes = Vec::new();
    match volatility {
        VolatilityClass::VeryHigh => notes.push("High volatility: reduce position sizes"),
        VolatilityClass::VeryLow => notes.push("Low volatility: favorable for arbitrage"),
        _ => {}
    }
    match liquidity {
        LiquidityClass::Drought | LiquidityClass::Low => {
            notes.push("Thin books: expect heavier slippage")
        }
        LiquidityClass::Abundant => notes.push("Deep books: favorable execution"),
        _ => {}
    }
    match trend {
        TrendClass::StrongDown | TrendClass::StrongUp => {
            notes.push("Strong trend: cycles close faster than usual")
        }
        TrendClass::Sideways => notes.push("Sideways market: ideal for arbitrage"),
        _ => {}
    }
    if notes.is_empty() {
        "Normal conditions".to_string()
    } else {
        notes.join("; ")
    }
}
