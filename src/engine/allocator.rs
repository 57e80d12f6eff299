//! Capital Allocation
//!
//! Assigns capital fractions across surviving cycles under hard caps: total
//! at most the working capital, per-cycle fraction at most `max_position`,
//! per-cycle dollars at most the cycle's thinnest hop, and a confidence
//! floor. Three strategies share the constraint set; every returned plan is
//! re-checked and a violation is a fatal internal error.

use crate::engine::error::EngineError;
use good_lp::solvers::highs::highs;
use good_lp::{constraint, variable, variables, Expression, Solution, SolverModel};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::{debug, warn};

/// Guard against division by a vanishing risk score.
pub const RISK_EPSILON: f64 = 1.0;
/// Slack tolerated when re-checking plan invariants.
const CONSTRAINT_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocatorMode {
    Greedy,
    Lp,
    RiskParity,
}

impl FromStr for AllocatorMode {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "greedy" => Ok(Self::Greedy),
            "lp" => Ok(Self::Lp),
            "risk_parity" => Ok(Self::RiskParity),
            other => Err(EngineError::InvalidInput(format!(
                "unknown allocator mode '{other}' (expected greedy | lp | risk_parity)"
            ))),
        }
    }
}

/// Ranking criterion for the greedy pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RankCriterion {
    Sharpe,
    MeanReturn,
    Composite,
}

/// One cycle as the allocator sees it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocationCandidate {
    pub id: String,
    pub fingerprint: String,
    pub path: Vec<String>,
    /// Simulated mean return.
    pub expected_return: f64,
    pub sharpe: Option<f64>,
    /// Composite risk score in [0, 100].
    pub risk: f64,
    /// Confidence in [0, 100].
    pub confidence: f64,
    /// Thinnest hop liquidity, the per-cycle dollar cap.
    pub min_hop_liquidity: f64,
}

impl AllocationCandidate {
    fn objective_coefficient(&self) -> f64 {
        self.expected_return * self.confidence / self.risk.max(RISK_EPSILON)
    }

    fn ranking_score(&self, criterion: RankCriterion) -> f64 {
        match criterion {
            RankCriterion::Sharpe => self.sharpe.unwrap_or(0.0),
            RankCriterion::MeanReturn => self.expected_return,
            RankCriterion::Composite => {
                self.sharpe.unwrap_or(0.0) * self.confidence / self.risk.max(RISK_EPSILON)
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocatorConfig {
    /// Per-cycle fraction ceiling.
    pub max_position: f64,
    /// Minimum candidate confidence.
    pub min_confidence: f64,
    pub criterion: RankCriterion,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            max_position: 0.3,
            min_confidence: 50.0,
            criterion: RankCriterion::Composite,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocationEntry {
    pub id: String,
    pub fingerprint: String,
    pub path: Vec<String>,
    pub fraction: f64,
    pub capital: f64,
    pub expected_return: f64,
    pub risk: f64,
    pub confidence: f64,
    pub ranking_score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocationPlan {
    pub mode: AllocatorMode,
    pub total_capital: f64,
    pub capital_allocated: f64,
    pub capital_remaining: f64,
    pub utilization_pct: f64,
    pub expected_portfolio_return: f64,
    pub portfolio_risk: f64,
    pub entries: Vec<AllocationEntry>,
}

impl AllocationPlan {
    /// Objective value under the LP criterion, for cross-mode comparison.
    pub fn objective_value(&self) -> f64 {
        self.entries
            .iter()
            .map(|e| e.capital * e.expected_return * e.confidence / e.risk.max(RISK_EPSILON))
            .sum()
    }
}

/// Allocate `capital` across `candidates` with the chosen mode.
pub fn allocate(
    candidates: &[AllocationCandidate],
    capital: f64,
    mode: AllocatorMode,
    config: &AllocatorConfig,
) -> Result<AllocationPlan, EngineError> {
    if capital <= 0.0 || !capital.is_finite() {
        return Err(EngineError::InvalidInput(format!(
            "capital must be positive and finite, got {capital}"
        )));
    }

    let eligible: Vec<&AllocationCandidate> = candidates
        .iter()
        .filter(|c| c.confidence >= config.min_confidence)
        .collect();

    let assignments = match mode {
        AllocatorMode::Greedy => greedy(&eligible, capital, config),
        AllocatorMode::Lp => lp(&eligible, capital, config)
            .unwrap_or_else(|e| {
                warn!(error = %e, "LP solve failed, falling back to greedy");
                greedy(&eligible, capital, config)
            }),
        AllocatorMode::RiskParity => risk_parity(&eligible, capital, config),
    };

    let plan = build_plan(mode, capital, &eligible, assignments, config.criterion);
    check_plan(&plan, &eligible, capital, config)?;
    debug!(
        mode = ?mode,
        entries = plan.entries.len(),
        allocated = plan.capital_allocated,
        "allocation complete"
    );
    Ok(plan)
}

fn per_cycle_cap(candidate: &AllocationCandidate, capital: f64, config: &AllocatorConfig) -> f64 {
    (capital * config.max_position).min(candidate.min_hop_liquidity)
}

/// Rank by the configured criterion, assign up to each cap until capital is
/// exhausted. Ties break on candidate id for determinism.
fn greedy(
    eligible: &[&AllocationCandidate],
    capital: f64,
    config: &AllocatorConfig,
) -> Vec<f64> {
    let mut order: Vec<usize> = (0..eligible.len()).collect();
    order.sort_by(|&a, &b| {
        let sa = eligible[a].ranking_score(config.criterion);
        let sb = eligible[b].ranking_score(config.criterion);
        sb.partial_cmp(&sa)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| eligible[a].id.cmp(&eligible[b].id))
    });

    let mut assigned = vec![0.0; eligible.len()];
    let mut remaining = capital;
    for idx in order {
        if remaining <= 0.0 {
            break;
        }
        let cap = per_cycle_cap(eligible[idx], capital, config);
        let amount = remaining.min(cap).max(0.0);
        if amount > 0.0 {
            assigned[idx] = amount;
            remaining -= amount;
        }
    }
    assigned
}

/// Maximize sum x_i * mu_i * confidence_i / max(risk_i, eps) subject to the
/// shared box and budget constraints, via HiGHS.
fn lp(
    eligible: &[&AllocationCandidate],
    capital: f64,
    config: &AllocatorConfig,
) -> Result<Vec<f64>, EngineError> {
    if eligible.is_empty() {
        return Ok(Vec::new());
    }

    let mut vars = variables!();
    let xs: Vec<_> = eligible
        .iter()
        .map(|c| vars.add(variable().min(0.0).max(per_cycle_cap(c, capital, config))))
        .collect();

    let objective: Expression = xs
        .iter()
        .zip(eligible)
        .map(|(&x, c)| c.objective_coefficient() * x)
        .sum();
    let budget: Expression = xs.iter().map(|&x| 1.0 * x).sum();

    let solution = vars
        .maximise(objective)
        .using(highs)
        .with(constraint!(budget <= capital))
        .solve()
        .map_err(|e| EngineError::Internal(format!("LP solver error: {e}")))?;

    Ok(xs
        .iter()
        .map(|&x| solution.value(x).max(0.0))
        .collect())
}

/// Equalize x_i * risk_i across the chosen set, admitting cycles in
/// descending confidence until another would violate a cap.
fn risk_parity(
    eligible: &[&AllocationCandidate],
    capital: f64,
    config: &AllocatorConfig,
) -> Vec<f64> {
    let mut order: Vec<usize> = (0..eligible.len()).collect();
    order.sort_by(|&a, &b| {
        eligible[b]
            .confidence
            .partial_cmp(&eligible[a].confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| eligible[a].id.cmp(&eligible[b].id))
    });

    let mut assigned = vec![0.0; eligible.len()];
    let mut chosen: Vec<usize> = Vec::new();

    for idx in order {
        let mut trial = chosen.clone();
        trial.push(idx);
        // Equal risk budget c means x_i = c / risk_i. The budget spends the
        // whole capital unless some member's cap binds first, in which case
        // every member shrinks to keep risk dollars equal.
        let inv_risk_sum: f64 = trial
            .iter()
            .map(|&i| 1.0 / eligible[i].risk.max(RISK_EPSILON))
            .sum();
        let c_budget = capital / inv_risk_sum;
        let c_caps = trial
            .iter()
            .map(|&i| {
                per_cycle_cap(eligible[i], capital, config) * eligible[i].risk.max(RISK_EPSILON)
            })
            .fold(f64::INFINITY, f64::min);
        let c = c_budget.min(c_caps);
        // Admission stops once a candidate's cap squeezes the shared budget
        // to nothing.
        if c <= 0.0 {
            break;
        }
        chosen = trial;
        for &i in &chosen {
            assigned[i] = c / eligible[i].risk.max(RISK_EPSILON);
        }
    }

    assigned
}

fn build_plan(
    mode: AllocatorMode,
    capital: f64,
    eligible: &[&AllocationCandidate],
    assignments: Vec<f64>,
    criterion: RankCriterion,
) -> AllocationPlan {
    let mut entries: Vec<AllocationEntry> = eligible
        .iter()
        .zip(&assignments)
        .filter(|(_, &amount)| amount > 0.0)
        .map(|(c, &amount)| AllocationEntry {
            id: c.id.clone(),
            fingerprint: c.fingerprint.clone(),
            path: c.path.clone(),
            fraction: amount / capital,
            capital: amount,
            expected_return: c.expected_return,
            risk: c.risk,
            confidence: c.confidence,
            ranking_score: c.ranking_score(criterion),
        })
        .collect();
    entries.sort_by(|a, b| {
        b.capital
            .partial_cmp(&a.capital)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });

    let capital_allocated: f64 = entries.iter().map(|e| e.capital).sum();
    let expected_portfolio_return = if capital_allocated > 0.0 {
        entries
            .iter()
            .map(|e| e.capital * e.expected_return)
            .sum::<f64>()
            / capital_allocated
    } else {
        0.0
    };
    let portfolio_risk = if capital_allocated > 0.0 {
        entries.iter().map(|e| e.capital * e.risk).sum::<f64>() / capital_allocated
    } else {
        0.0
    };

    AllocationPlan {
        mode,
        total_capital: capital,
        capital_allocated,
        capital_remaining: capital - capital_allocated,
        utilization_pct: capital_allocated / capital * 100.0,
        expected_portfolio_return,
        portfolio_risk,
        entries,
    }
}

/// Hard invariant check: a violating plan is an internal error, never a
/// degraded result.
fn check_plan(
    plan: &AllocationPlan,
    eligible: &[&AllocationCandidate],
    capital: f64,
    config: &AllocatorConfig,
) -> Result<(), EngineError> {
    let total_fraction: f64 = plan.entries.iter().map(|e| e.fraction).sum();
    if total_fraction > 1.0 + CONSTRAINT_TOLERANCE {
        return Err(EngineError::Internal(format!(
            "allocation exceeds capital: total fraction {total_fraction}"
        )));
    }
    for entry in &plan.entries {
        if entry.fraction < 0.0 || entry.fraction > config.max_position + CONSTRAINT_TOLERANCE {
            return Err(EngineError::Internal(format!(
                "position cap violated for {}: fraction {}",
                entry.id, entry.fraction
            )));
        }
        let candidate = eligible
            .iter()
            .find(|c| c.id == entry.id)
            .ok_or_else(|| {
                EngineError::Internal(format!("plan references unknown candidate {}", entry.id))
            })?;
        if entry.capital > candidate.min_hop_liquidity + CONSTRAINT_TOLERANCE * capital {
            return Err(EngineError::Internal(format!(
                "liquidity cap violated for {}: {} > {}",
                entry.id, entry.capital, candidate.min_hop_liquidity
            )));
        }
        if candidate.confidence < config.min_confidence {
            return Err(EngineError::Internal(format!(
                "confidence floor violated for {}",
                entry.id
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(id: &str, ret: f64, sharpe: f64, risk: f64, confidence: f64, liq: f64) -> AllocationCandidate {
        AllocationCandidate {
            id: id.to_string(),
            fingerprint: id.to_string(),
            path: vec!["A".into(), "B".into(), "A".into()],
            expected_return: ret,
            sharpe: Some(sharpe),
            risk,
            confidence,
            min_hop_liquidity: liq,
        }
    }

    fn twin_candidates() -> Vec<AllocationCandidate> {
        vec![
            candidate("opp_a", 0.01, 2.0, 30.0, 80.0, 1e6),
            candidate("opp_b", 0.01, 2.0, 30.0, 80.0, 1e6),
        ]
    }

    #[test]
    fn test_greedy_respects_position_cap() {
        // Two equal cycles, capital 1000, cap 30%: 300 each, 400 left over.
        let plan = allocate(
            &twin_candidates(),
            1000.0,
            AllocatorMode::Greedy,
            &AllocatorConfig::default(),
        )
        .unwrap();
        assert_eq!(plan.entries.len(), 2);
        for entry in &plan.entries {
            assert!((entry.capital - 300.0).abs() < 1e-9);
            assert!((entry.fraction - 0.3).abs() < 1e-12);
        }
        assert!((plan.capital_remaining - 400.0).abs() < 1e-9);
    }

    #[test]
    fn test_lp_no_worse_than_greedy() {
        let candidates = vec![
            candidate("opp_a", 0.02, 3.0, 40.0, 90.0, 1e6),
            candidate("opp_b", 0.01, 2.0, 30.0, 80.0, 1e6),
            candidate("opp_c", 0.005, 1.0, 20.0, 70.0, 1e6),
        ];
        let config = AllocatorConfig::default();
        let greedy_plan =
            allocate(&candidates, 1000.0, AllocatorMode::Greedy, &config).unwrap();
        let lp_plan = allocate(&candidates, 1000.0, AllocatorMode::Lp, &config).unwrap();
        assert!(lp_plan.objective_value() >= greedy_plan.objective_value() - 1e-6);
    }

    #[test]
    fn test_lp_matches_greedy_on_twins() {
        let config = AllocatorConfig::default();
        let greedy_plan =
            allocate(&twin_candidates(), 1000.0, AllocatorMode::Greedy, &config).unwrap();
        let lp_plan = allocate(&twin_candidates(), 1000.0, AllocatorMode::Lp, &config).unwrap();
        assert!((lp_plan.objective_value() - greedy_plan.objective_value()).abs() < 1e-6);
        assert!((lp_plan.capital_allocated - 600.0).abs() < 1e-6);
    }

    #[test]
    fn test_liquidity_cap_binds() {
        let candidates = vec![candidate("opp_thin", 0.05, 3.0, 20.0, 90.0, 50.0)];
        let plan = allocate(
            &candidates,
            1000.0,
            AllocatorMode::Greedy,
            &AllocatorConfig::default(),
        )
        .unwrap();
        assert_eq!(plan.entries.len(), 1);
        assert!(plan.entries[0].capital <= 50.0 + 1e-9);
    }

    #[test]
    fn test_confidence_floor_filters() {
        let candidates = vec![
            candidate("opp_good", 0.01, 2.0, 30.0, 80.0, 1e6),
            candidate("opp_shaky", 0.05, 4.0, 30.0, 20.0, 1e6),
        ];
        let plan = allocate(
            &candidates,
            1000.0,
            AllocatorMode::Greedy,
            &AllocatorConfig::default(),
        )
        .unwrap();
        assert_eq!(plan.entries.len(), 1);
        assert_eq!(plan.entries[0].id, "opp_good");
    }

    #[test]
    fn test_risk_parity_equalizes_risk_dollars() {
        let candidates = vec![
            candidate("opp_calm", 0.01, 2.0, 20.0, 90.0, 1e6),
            candidate("opp_wild", 0.02, 2.0, 60.0, 85.0, 1e6),
        ];
        let plan = allocate(
            &candidates,
            1000.0,
            AllocatorMode::RiskParity,
            &AllocatorConfig::default(),
        )
        .unwrap();
        assert_eq!(plan.entries.len(), 2);
        let risk_dollars: Vec<f64> = plan.entries.iter().map(|e| e.capital * e.risk).collect();
        assert!((risk_dollars[0] - risk_dollars[1]).abs() < 1e-6);
    }

    #[test]
    fn test_empty_candidates_yield_empty_plan() {
        let plan = allocate(&[], 1000.0, AllocatorMode::Greedy, &AllocatorConfig::default()).unwrap();
        assert!(plan.entries.is_empty());
        assert_eq!(plan.capital_remaining, 1000.0);
        assert_eq!(plan.utilization_pct, 0.0);
    }

    #[test]
    fn test_invalid_capital_rejected() {
        let result = allocate(
            &twin_candidates(),
            0.0,
            AllocatorMode::Greedy,
            &AllocatorConfig::default(),
        );
        assert!(matches!(result, Err(EngineError::InvalidInput(_))));
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("greedy".parse::<AllocatorMode>().unwrap(), AllocatorMode::Greedy);
        assert_eq!("lp".parse::<AllocatorMode>().unwrap(), AllocatorMode::Lp);
        assert_eq!(
            "risk_parity".parse::<AllocatorMode>().unwrap(),
            AllocatorMode::RiskParity
        );
        assert!("martingale".parse::<AllocatorMode>().is_err());
    }

    #[test]
    fn test_plan_invariants_hold_across_modes() {
        let candidates = vec![
            candidate("opp_a", 0.02, 3.0, 40.0, 90.0, 250.0),
            candidate("opp_b", 0.01, 2.0, 30.0, 80.0, 1e6),
            candidate("opp_c", 0.005, 1.0, 55.0, 75.0, 100.0),
        ];
        for mode in [AllocatorMode::Greedy, AllocatorMode::Lp, AllocatorMode::RiskParity] {
            let plan = allocate(&candidates, 1000.0, mode, &AllocatorConfig::default()).unwrap();
            let total: f64 = plan.entries.iter().map(|e| e.fraction).sum();
            assert!(total <= 1.0 + 1e-6, "{mode:?} total fraction {total}");
            for entry in &plan.entries {
                assert!(entry.fraction <= 0.3 + 1e-6, "{mode:?} fraction {}", entry.fraction);
                let cand = candidates.iter().find(|c| c.id == entry.id).unwrap();
                assert!(entry.capital <= cand.min_hop_liquidity + 1e-3);
            }
        }
    }
}
