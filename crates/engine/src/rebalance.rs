//! Weight rebalancing from windowed performance.
//!
//! score = (0.5 + win_rate) * min(profit_factor, cap). A strategy's new weight
//! is its initial weight scaled by score / mean score of all strategies that
//! traded in the window, clamped to [min_ratio, max_ratio] * initial weight.
//! Strategies without trades keep their weight. The result depends only on
//! the snapshots and initial weights, so repeated runs are idempotent.

use common::{PerformanceSnapshot, StrategyType};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RebalanceParams {
    /// Upper bound applied to the profit factor (unbounded when there are no losses).
    pub profit_factor_cap: f64,
    pub min_weight_ratio: f64,
    pub max_weight_ratio: f64,
}

impl Default for RebalanceParams {
    fn default() -> Self {
        Self {
            profit_factor_cap: 10.0,
            min_weight_ratio: 0.1,
            max_weight_ratio: 3.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RebalanceInput {
    pub strategy_type: StrategyType,
    pub initial_weight: f64,
    pub snapshot: PerformanceSnapshot,
}

/// Neutral score of 1 when there is no evidence in the window.
pub fn score(snapshot: &PerformanceSnapshot, profit_factor_cap: f64) -> f64 {
    if snapshot.trade_count == 0 {
        return 1.0;
    }
    let profit_factor = if snapshot.profit_factor.is_nan() {
        0.0
    } else {
        snapshot.profit_factor.clamp(0.0, profit_factor_cap)
    };
    (0.5 + snapshot.win_rate) * profit_factor
}

/// New weights for every input that traded in the window. Empty when no
/// strategy has trades, in which case nothing should change.
pub fn rebalance(inputs: &[RebalanceInput], params: &RebalanceParams) -> Vec<(StrategyType, f64)> {
    let traded: Vec<(&RebalanceInput, f64)> = inputs
        .iter()
        .filter(|i| i.snapshot.trade_count > 0)
        .map(|i| (i, score(&i.snapshot, params.profit_factor_cap)))
        .collect();

    if traded.is_empty() {
        return Vec::new();
    }

    let avg_score = traded.iter().map(|(_, s)| s).sum::<f64>() / traded.len() as f64;

    traded
        .into_iter()
        .map(|(input, score)| {
            let relative = if avg_score > 0.0 { score / avg_score } else { 0.0 };
            let floor = input.initial_weight * params.min_weight_ratio;
            let ceiling = input.initial_weight * params.max_weight_ratio;
            let weight = (input.initial_weight * relative).clamp(floor, ceiling);
            (input.strategy_type, weight)
        })
        .collect()
}
