use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Screening style of a strategy. Doubles as the join key between the
/// strategy file, the registry and performance records, so each type may be
/// configured at most once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyType {
    Momentum,
    Breakout,
    EndOfDay,
    TrendFollowing,
    Vwap,
    Scalping,
}

impl StrategyType {
    pub const ALL: [StrategyType; 6] = [
        StrategyType::Momentum,
        StrategyType::Breakout,
        StrategyType::EndOfDay,
        StrategyType::TrendFollowing,
        StrategyType::Vwap,
        StrategyType::Scalping,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyType::Momentum => "momentum",
            StrategyType::Breakout => "breakout",
            StrategyType::EndOfDay => "end_of_day",
            StrategyType::TrendFollowing => "trend_following",
            StrategyType::Vwap => "vwap",
            StrategyType::Scalping => "scalping",
        }
    }
}

impl std::fmt::Display for StrategyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StrategyType {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StrategyType::ALL
            .into_iter()
            .find(|t| t.as_str() == s.trim().to_lowercase())
            .ok_or_else(|| crate::Error::UnknownStrategy(s.to_string()))
    }
}

/// Immutable pairing of a strategy type with its server-side condition query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyConfig {
    #[serde(rename = "type")]
    pub strategy_type: StrategyType,
    /// Brokerage-assigned id of the saved condition query (`seq` on the wire).
    pub condition_id: String,
    /// Baseline weight; rebalancing scales and clamps relative to this.
    pub initial_weight: f64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl StrategyConfig {
    pub fn new(strategy_type: StrategyType, condition_id: impl Into<String>, initial_weight: f64) -> Self {
        Self {
            strategy_type,
            condition_id: condition_id.into(),
            initial_weight,
            enabled: true,
        }
    }
}

/// One closed trade attributed to a strategy. `profit` is a signed fractional
/// return (-0.02 = 2% loss).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TradeOutcome {
    pub timestamp: DateTime<Utc>,
    pub successful: bool,
    pub profit: f64,
}

/// Windowed statistics over a strategy's trade ledger.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PerformanceSnapshot {
    pub win_rate: f64,
    /// `f64::INFINITY` when there are gains and no losses.
    pub profit_factor: f64,
    pub net_profit: f64,
    pub trade_count: usize,
}

/// A ranked symbol produced by a search round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateSymbol {
    pub symbol: String,
    pub weight: f64,
    pub contributing_strategies: Vec<String>,
}

/// Entry of the brokerage's saved-condition catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionInfo {
    pub sequence_id: String,
    pub name: String,
}

/// Connection lifecycle of the condition-search channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ClientState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Authenticated,
    Error,
}

impl std::fmt::Display for ClientState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientState::Disconnected => write!(f, "disconnected"),
            ClientState::Connecting => write!(f, "connecting"),
            ClientState::Connected => write!(f, "connected"),
            ClientState::Authenticated => write!(f, "authenticated"),
            ClientState::Error => write!(f, "error"),
        }
    }
}

/// Process-lifetime counters owned by the search engine.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct EngineStats {
    /// Incremented by the number of strategies searched per round.
    pub total_searches: u64,
    pub total_results: u64,
    pub cache_hits: u64,
    pub cumulative_search_time: Duration,
}

impl EngineStats {
    pub fn avg_search_time(&self) -> Duration {
        if self.total_searches == 0 {
            return Duration::ZERO;
        }
        self.cumulative_search_time
            .div_f64(self.total_searches as f64)
    }
}

/// Per-strategy view inside an [`EngineReport`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyReport {
    pub strategy_type: StrategyType,
    pub condition_id: String,
    pub enabled: bool,
    pub weight: f64,
    pub performance: PerformanceSnapshot,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineReport {
    pub stats: EngineStats,
    pub avg_search_time: Duration,
    pub strategies: Vec<StrategyReport>,
}

/// Exported state of one strategy, used to carry performance history across
/// restarts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceRecord {
    pub strategy_type: StrategyType,
    pub enabled: bool,
    pub weight: f64,
    #[serde(default)]
    pub trades: Vec<TradeOutcome>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategy_type_parses_snake_case_names() {
        assert_eq!("end_of_day".parse::<StrategyType>().unwrap(), StrategyType::EndOfDay);
        assert_eq!(" VWAP ".parse::<StrategyType>().unwrap(), StrategyType::Vwap);
        assert!("pairs_trading".parse::<StrategyType>().is_err());
    }

    #[test]
    fn strategy_type_display_matches_serde_name() {
        for ty in StrategyType::ALL {
            let json = serde_json::to_string(&ty).unwrap();
            assert_eq!(json, format!("\"{ty}\""));
        }
    }

    #[test]
    fn avg_search_time_is_zero_without_searches() {
        assert_eq!(EngineStats::default().avg_search_time(), Duration::ZERO);

        let stats = EngineStats {
            total_searches: 4,
            cumulative_search_time: Duration::from_millis(200),
            ..EngineStats::default()
        };
        assert_eq!(stats.avg_search_time(), Duration::from_millis(50));
    }
}
