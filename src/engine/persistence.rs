//! Opportunity Persistence
//!
//! Process-wide lifecycle records keyed by cycle fingerprint: when an
//! opportunity was first and last seen, how often, how strong at peak, and a
//! bounded ring of recent returns for stability analysis. Records evict when
//! unseen for the configured TTL.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

/// Ring capacity for rolling returns.
pub const RETURN_RING_CAPACITY: usize = 128;
/// Default eviction TTL: 30 minutes.
pub const DEFAULT_TTL_MS: i64 = 30 * 60 * 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecayPattern {
    /// Returns only ever fell.
    Monotonic,
    /// Returns only ever rose.
    Improving,
    /// Returns moved both ways.
    Oscillating,
    /// Returns barely moved (or too few samples to say otherwise).
    Stable,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpportunityRecord {
    pub fingerprint: String,
    pub path: Vec<String>,
    pub first_seen_ms: i64,
    pub last_seen_ms: i64,
    pub detection_count: u64,
    pub peak_return: f64,
    pub peak_ts_ms: i64,
    /// Rolling returns, oldest first, bounded at 128 entries.
    returns: VecDeque<f64>,
}

impl OpportunityRecord {
    fn new(fingerprint: String, path: Vec<String>, ret: f64, now_ms: i64) -> Self {
        let mut returns = VecDeque::with_capacity(RETURN_RING_CAPACITY);
        returns.push_back(ret);
        Self {
            fingerprint,
            path,
            first_seen_ms: now_ms,
            last_seen_ms: now_ms,
            detection_count: 1,
            peak_return: ret,
            peak_ts_ms: now_ms,
            returns,
        }
    }

    fn observe(&mut self, ret: f64, now_ms: i64) {
        self.last_seen_ms = now_ms;
        self.detection_count += 1;
        if ret > self.peak_return {
            self.peak_return = ret;
            self.peak_ts_ms = now_ms;
        }
        if self.returns.len() >= RETURN_RING_CAPACITY {
            self.returns.pop_front();
        }
        self.returns.push_back(ret);
    }

    pub fn lifespan_ms(&self) -> i64 {
        self.last_seen_ms - self.first_seen_ms
    }

    pub fn returns(&self) -> impl Iterator<Item = f64> + '_ {
        self.returns.iter().copied()
    }

    fn return_stats(&self) -> (f64, f64) {
        let n = self.returns.len();
        if n == 0 {
            return (0.0, 0.0);
        }
        let mean = self.returns.iter().sum::<f64>() / n as f64;
        if n < 2 {
            return (mean, 0.0);
        }
        let var = self.returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1) as f64;
        (mean, var.sqrt())
    }

    /// Per-opportunity Sharpe over the rolling ring; undefined for a flat or
    /// single-sample ring.
    pub fn sharpe(&self) -> Option<f64> {
        let (mean, std) = self.return_stats();
        (std > 0.0).then(|| mean / std)
    }

    /// Composite of detection frequency (0-40), lifespan (0-40) and return
    /// stability (0-20), capped at 100.
    pub fn persistence_score(&self) -> f64 {
        let frequency = (self.detection_count as f64 * 4.0).min(40.0);
        let duration = (self.lifespan_ms() as f64 / 100.0).min(40.0);
        let stability = if self.returns.len() >= 2 {
            let (mean, std) = self.return_stats();
            if mean.abs() > f64::EPSILON {
                let cv_pct = std / mean.abs() * 100.0;
                (100.0 - cv_pct).clamp(0.0, 100.0) * 0.2
            } else {
                0.0
            }
        } else {
            10.0
        };
        (frequency + duration + stability).min(100.0)
    }

    /// Classify the rolling returns by sign sequence and monotonicity.
    pub fn decay_pattern(&self) -> DecayPattern {
        if self.returns.len() < 2 {
            return DecayPattern::Stable;
        }
        let values: Vec<f64> = self.returns.iter().copied().collect();
        let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
        let scale = max.abs().max(min.abs()).max(f64::EPSILON);
        if (max - min) / scale < 1e-9 {
            return DecayPattern::Stable;
        }
        let non_increasing = values.windows(2).all(|w| w[0] >= w[1]);
        let non_decreasing = values.windows(2).all(|w| w[0] <= w[1]);
        if non_increasing {
            DecayPattern::Monotonic
        } else if non_decreasing {
            DecayPattern::Improving
        } else {
            DecayPattern::Oscillating
        }
    }
}

/// Aggregate view over all tracked opportunities.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PersistenceSummary {
    pub total_opportunities: usize,
    pub active_opportunities: usize,
    pub avg_lifespan_ms: f64,
    pub median_lifespan_ms: f64,
    pub avg_detection_count: f64,
    pub avg_persistence_score: f64,
    pub most_persistent_path: Vec<String>,
    /// Capital-weighted mean of per-opportunity Sharpe ratios.
    pub portfolio_sharpe: f64,
}

/// Fingerprint-keyed store. Single-writer / multi-reader: the pipeline takes
/// the write lock only at scan boundaries.
#[derive(Debug, Default)]
pub struct PersistenceTracker {
    records: HashMap<String, OpportunityRecord>,
}

impl PersistenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one observation of a fingerprinted opportunity.
    pub fn record_observation(
        &mut self,
        fingerprint: &str,
        path: &[String],
        ret: f64,
        now_ms: i64,
    ) {
        match self.records.get_mut(fingerprint) {
            Some(record) => record.observe(ret, now_ms),
            None => {
                self.records.insert(
                    fingerprint.to_string(),
                    OpportunityRecord::new(fingerprint.to_string(), path.to_vec(), ret, now_ms),
                );
            }
        }
    }

    /// Evict records unseen for longer than `ttl_ms`. Returns the eviction count.
    pub fn prune(&mut self, now_ms: i64, ttl_ms: i64) -> usize {
        let before = self.records.len();
        self.records.retain(|_, r| r.last_seen_ms + ttl_ms >= now_ms);
        before - self.records.len()
    }

    pub fn get(&self, fingerprint: &str) -> Option<&OpportunityRecord> {
        self.records.get(fingerprint)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records seen within `ttl_ms` of `now_ms`.
    pub fn active(&self, now_ms: i64, ttl_ms: i64) -> Vec<&OpportunityRecord> {
        let mut active: Vec<&OpportunityRecord> = self
            .records
            .values()
            .filter(|r| r.last_seen_ms + ttl_ms >= now_ms)
            .collect();
        active.sort_by(|a, b| a.fingerprint.cmp(&b.fingerprint));
        active
    }

    /// Aggregate metrics. `capital_weights` maps fingerprint to allocated
    /// capital; without weights the Sharpe aggregate is a plain mean.
    pub fn summary(
        &self,
        now_ms: i64,
        ttl_ms: i64,
        capital_weights: Option<&HashMap<String, f64>>,
    ) -> PersistenceSummary {
        if self.records.is_empty() {
            return PersistenceSummary::default();
        }

        let mut lifespans: Vec<f64> = self
            .records
            .values()
            .map(|r| r.lifespan_ms() as f64)
            .collect();
        lifespans.sort_by(|a, b| a.partial_cmp(b).expect("finite lifespans"));
        let n = lifespans.len();
        let avg_lifespan_ms = lifespans.iter().sum::<f64>() / n as f64;
        let median_lifespan_ms = if n % 2 == 1 {
            lifespans[n / 2]
        } else {
            0.5 * (lifespans[n / 2 - 1] + lifespans[n / 2])
        };

        let avg_detection_count = self
            .records
            .values()
            .map(|r| r.detection_count as f64)
            .sum::<f64>()
            / n as f64;

        let avg_persistence_score = self
            .records
            .values()
            .map(|r| r.persistence_score())
            .sum::<f64>()
            / n as f64;

        let most_persistent_path = self
            .records
            .values()
            .max_by(|a, b| {
                a.persistence_score()
                    .partial_cmp(&b.persistence_score())
                    .expect("finite scores")
                    .then_with(|| b.fingerprint.cmp(&a.fingerprint))
            })
            .map(|r| r.path.clone())
            .unwrap_or_default();

        let mut weighted_sum = 0.0;
        let mut weight_total = 0.0;
        for record in self.records.values() {
            let Some(sharpe) = record.sharpe() else { continue };
            let weight = capital_weights
                .and_then(|w| w.get(&record.fingerprint).copied())
                .unwrap_or(1.0);
            if weight > 0.0 {
                weighted_sum += sharpe * weight;
                weight_total += weight;
            }
        }
        let portfolio_sharpe = if weight_total > 0.0 {
            weighted_sum / weight_total
        } else {
            0.0
        };

        PersistenceSummary {
            total_opportunities: n,
            active_opportunities: self.active(now_ms, ttl_ms).len(),
            avg_lifespan_ms,
            median_lifespan_ms,
            avg_detection_count,
            avg_persistence_score,
            most_persistent_path,
            portfolio_sharpe,
        }
    }
}
