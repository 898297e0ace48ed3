use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use common::{
    Error, PerformanceRecord, PerformanceSnapshot, Result, StrategyConfig, StrategyType,
    TradeOutcome,
};

use crate::config;
use crate::performance::{snapshot_since, window_start};

/// Mutable state of one configured strategy.
#[derive(Debug, Clone, PartialEq)]
pub struct StrategyState {
    pub config: StrategyConfig,
    pub enabled: bool,
    weight: f64,
    trades: Vec<TradeOutcome>,
}

impl StrategyState {
    fn new(config: StrategyConfig) -> Self {
        Self {
            enabled: config.enabled,
            weight: config.initial_weight,
            config,
            trades: Vec::new(),
        }
    }

    pub fn strategy_type(&self) -> StrategyType {
        self.config.strategy_type
    }

    pub fn condition_id(&self) -> &str {
        &self.config.condition_id
    }

    pub fn weight(&self) -> f64 {
        self.weight
    }

    pub fn trades(&self) -> &[TradeOutcome] {
        &self.trades
    }
}

/// Holds every configured strategy with its enable flag, current weight and
/// trade ledger. Iteration order is configuration order.
///
/// Strategies cannot be added or removed after construction, only toggled.
#[derive(Debug, Clone, Default)]
pub struct StrategyRegistry {
    strategies: Vec<StrategyState>,
}

impl StrategyRegistry {
    /// Build the registry from validated strategy configs.
    pub fn from_configs(configs: Vec<StrategyConfig>) -> Result<Self> {
        config::validate(&configs)?;

        let strategies = configs
            .into_iter()
            .map(|cfg| {
                info!(
                    strategy = %cfg.strategy_type,
                    condition_id = %cfg.condition_id,
                    weight = cfg.initial_weight,
                    enabled = cfg.enabled,
                    "Registered strategy"
                );
                StrategyState::new(cfg)
            })
            .collect();

        Ok(Self { strategies })
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &StrategyState> {
        self.strategies.iter()
    }

    /// Enabled strategies in configuration order.
    pub fn enabled_strategies(&self) -> impl Iterator<Item = &StrategyState> {
        self.strategies.iter().filter(|s| s.enabled)
    }

    pub fn get(&self, strategy_type: StrategyType) -> Option<&StrategyState> {
        self.strategies
            .iter()
            .find(|s| s.strategy_type() == strategy_type)
    }

    fn get_mut(&mut self, strategy_type: StrategyType) -> Result<&mut StrategyState> {
        self.strategies
            .iter_mut()
            .find(|s| s.strategy_type() == strategy_type)
            .ok_or_else(|| Error::UnknownStrategy(strategy_type.to_string()))
    }

    /// Append a trade outcome to the strategy's ledger.
    ///
    /// Reporting against a type that is not configured is a caller error and
    /// returns `UnknownStrategy`; the ledger is left untouched.
    pub fn record_outcome(
        &mut self,
        strategy_type: StrategyType,
        successful: bool,
        profit: f64,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let state = self.get_mut(strategy_type)?;
        state.trades.push(TradeOutcome {
            timestamp: at,
            successful,
            profit,
        });
        debug!(strategy = %strategy_type, successful, profit, "Recorded trade outcome");
        Ok(())
    }

    /// Statistics over the trailing `window_days` ending at `now`.
    pub fn stats_for(
        &self,
        strategy_type: StrategyType,
        window_days: i64,
        now: DateTime<Utc>,
    ) -> Result<PerformanceSnapshot> {
        let state = self
            .get(strategy_type)
            .ok_or_else(|| Error::UnknownStrategy(strategy_type.to_string()))?;
        Ok(snapshot_since(&state.trades, window_start(now, window_days)))
    }

    /// Physically drop outcomes that fell out of the window. Returns the
    /// number of outcomes removed across all strategies.
    pub fn prune(&mut self, window_days: i64, now: DateTime<Utc>) -> usize {
        let since = window_start(now, window_days);
        self.strategies
            .iter_mut()
            .map(|s| {
                let before = s.trades.len();
                s.trades.retain(|o| o.timestamp >= since);
                before - s.trades.len()
            })
            .sum()
    }

    /// Set the current weight. Negative or non-finite inputs are clamped to 0.
    pub fn set_weight(&mut self, strategy_type: StrategyType, weight: f64) -> Result<()> {
        let state = self.get_mut(strategy_type)?;
        state.weight = if weight.is_finite() { weight.max(0.0) } else { 0.0 };
        Ok(())
    }

    pub fn set_enabled(&mut self, strategy_type: StrategyType, enabled: bool) -> Result<()> {
        let state = self.get_mut(strategy_type)?;
        if state.enabled != enabled {
            info!(strategy = %strategy_type, enabled, "Strategy toggled");
        }
        state.enabled = enabled;
        Ok(())
    }

    pub fn export(&self) -> Vec<PerformanceRecord> {
        self.strategies
            .iter()
            .map(|s| PerformanceRecord {
                strategy_type: s.strategy_type(),
                enabled: s.enabled,
                weight: s.weight,
                trades: s.trades.clone(),
            })
            .collect()
    }

    /// Restore exported records. Records for unconfigured types are skipped
    /// and counted in the returned value.
    pub fn import(&mut self, records: Vec<PerformanceRecord>) -> usize {
        let mut skipped = 0;
        for record in records {
            match self.get_mut(record.strategy_type) {
                Ok(state) => {
                    state.enabled = record.enabled;
                    state.weight = if record.weight.is_finite() {
                        record.weight.max(0.0)
                    } else {
                        state.config.initial_weight
                    };
                    state.trades = record.trades;
                    state.trades.sort_by_key(|o| o.timestamp);
                }
                Err(_) => {
                    warn!(strategy = %record.strategy_type, "Skipping history for unconfigured strategy");
                    skipped += 1;
                }
            }
        }
        skipped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn registry() -> StrategyRegistry {
        StrategyRegistry::from_configs(vec![
            StrategyConfig::new(StrategyType::Momentum, "0", 1.0),
            StrategyConfig::new(StrategyType::Breakout, "1", 0.8),
            StrategyConfig::new(StrategyType::Scalping, "2", 0.5),
        ])
        .unwrap()
    }

    #[test]
    fn enabled_strategies_follow_config_order() {
        let mut reg = registry();
        reg.set_enabled(StrategyType::Breakout, false).unwrap();

        let order: Vec<_> = reg.enabled_strategies().map(|s| s.strategy_type()).collect();
        assert_eq!(order, vec![StrategyType::Momentum, StrategyType::Scalping]);
    }

    #[test]
    fn disabled_strategy_keeps_weight_and_history() {
        let mut reg = registry();
        let now = Utc::now();
        reg.record_outcome(StrategyType::Breakout, true, 0.03, now).unwrap();
        reg.set_weight(StrategyType::Breakout, 1.7).unwrap();
        reg.set_enabled(StrategyType::Breakout, false).unwrap();

        let state = reg.get(StrategyType::Breakout).unwrap();
        assert!(!state.enabled);
        assert_eq!(state.weight(), 1.7);
        assert_eq!(state.trades().len(), 1);
    }

    #[test]
    fn recording_for_unconfigured_type_is_an_error() {
        let mut reg = registry();
        let err = reg
            .record_outcome(StrategyType::Vwap, true, 0.01, Utc::now())
            .unwrap_err();
        assert!(matches!(err, Error::UnknownStrategy(_)));
        assert!(reg.iter().all(|s| s.trades().is_empty()));
    }

    #[test]
    fn stats_use_only_the_window() {
        let mut reg = registry();
        let now = Utc::now();
        reg.record_outcome(StrategyType::Momentum, false, -0.05, now - Duration::days(10))
            .unwrap();
        reg.record_outcome(StrategyType::Momentum, true, 0.05, now).unwrap();
        reg.record_outcome(StrategyType::Momentum, false, -0.02, now).unwrap();

        let snap = reg.stats_for(StrategyType::Momentum, 5, now).unwrap();
        assert_eq!(snap.trade_count, 2);
        assert!((snap.profit_factor - 2.5).abs() < 1e-9);

        // logical prune only
        assert_eq!(reg.get(StrategyType::Momentum).unwrap().trades().len(), 3);
        assert_eq!(reg.prune(5, now), 1);
        assert_eq!(reg.get(StrategyType::Momentum).unwrap().trades().len(), 2);
    }

    #[test]
    fn weight_is_never_negative() {
        let mut reg = registry();
        reg.set_weight(StrategyType::Scalping, -3.0).unwrap();
        assert_eq!(reg.get(StrategyType::Scalping).unwrap().weight(), 0.0);
        reg.set_weight(StrategyType::Scalping, f64::NAN).unwrap();
        assert_eq!(reg.get(StrategyType::Scalping).unwrap().weight(), 0.0);
    }

    #[test]
    fn export_then_import_restores_ledger() {
        let mut reg = registry();
        let now = Utc::now();
        reg.record_outcome(StrategyType::Momentum, true, 0.04, now).unwrap();
        reg.set_weight(StrategyType::Momentum, 1.3).unwrap();
        reg.set_enabled(StrategyType::Scalping, false).unwrap();
        let mut exported = reg.export();
        exported.push(PerformanceRecord {
            strategy_type: StrategyType::Vwap,
            enabled: true,
            weight: 1.0,
            trades: Vec::new(),
        });

        let mut fresh = registry();
        assert_eq!(fresh.import(exported), 1);
        let momentum = fresh.get(StrategyType::Momentum).unwrap();
        assert_eq!(momentum.weight(), 1.3);
        assert_eq!(momentum.trades().len(), 1);
        assert!(!fresh.get(StrategyType::Scalping).unwrap().enabled);
    }

    #[test]
    fn duplicate_types_are_rejected() {
        let result = StrategyRegistry::from_configs(vec![
            StrategyConfig::new(StrategyType::Momentum, "0", 1.0),
            StrategyConfig::new(StrategyType::Momentum, "1", 1.0),
        ]);
        assert!(result.is_err());
    }
}
