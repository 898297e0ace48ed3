use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use common::{Error, Result, StrategyConfig};

/// Top-level strategy config file (TOML).
///
/// Example `config/strategies.toml`:
/// ```toml
/// [[strategy]]
/// type = "momentum"
/// condition_id = "0"
/// initial_weight = 1.0
///
/// [[strategy]]
/// type = "breakout"
/// condition_id = "3"
/// initial_weight = 0.8
/// enabled = false
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StrategyFileConfig {
    #[serde(rename = "strategy", default)]
    pub strategies: Vec<StrategyConfig>,
}

impl StrategyFileConfig {
    /// Load and validate a TOML strategy file.
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read strategy config at '{path}': {e}"))
        })?;
        Self::from_toml_str(&content)
            .map_err(|e| Error::Config(format!("strategy config at '{path}': {e}")))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: StrategyFileConfig =
            toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        validate(&file.strategies)?;
        Ok(file)
    }
}

/// Each type configured once, non-empty condition id, finite positive weight.
pub fn validate(strategies: &[StrategyConfig]) -> Result<()> {
    let mut seen = HashSet::new();
    for cfg in strategies {
        if !seen.insert(cfg.strategy_type) {
            return Err(Error::Config(format!(
                "strategy type '{}' configured more than once",
                cfg.strategy_type
            )));
        }
        if cfg.condition_id.trim().is_empty() {
            return Err(Error::Config(format!(
                "strategy '{}' has an empty condition_id",
                cfg.strategy_type
            )));
        }
        if !cfg.initial_weight.is_finite() || cfg.initial_weight <= 0.0 {
            return Err(Error::Config(format!(
                "strategy '{}' initial_weight must be > 0, got {}",
                cfg.strategy_type, cfg.initial_weight
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::StrategyType;

    #[test]
    fn parses_strategy_tables_in_order() {
        let file = StrategyFileConfig::from_toml_str(
            r#"
            [[strategy]]
            type = "momentum"
            condition_id = "0"
            initial_weight = 1.0

            [[strategy]]
            type = "end_of_day"
            condition_id = "7"
            initial_weight = 0.5
            enabled = false
            "#,
        )
        .unwrap();

        assert_eq!(file.strategies.len(), 2);
        assert_eq!(file.strategies[0].strategy_type, StrategyType::Momentum);
        assert!(file.strategies[0].enabled);
        assert_eq!(file.strategies[1].strategy_type, StrategyType::EndOfDay);
        assert_eq!(file.strategies[1].condition_id, "7");
        assert!(!file.strategies[1].enabled);
    }

    #[test]
    fn rejects_duplicate_strategy_type() {
        let err = StrategyFileConfig::from_toml_str(
            r#"
            [[strategy]]
            type = "vwap"
            condition_id = "1"
            initial_weight = 1.0

            [[strategy]]
            type = "vwap"
            condition_id = "2"
            initial_weight = 1.0
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn rejects_non_positive_weight() {
        let err = StrategyFileConfig::from_toml_str(
            r#"
            [[strategy]]
            type = "scalping"
            condition_id = "1"
            initial_weight = 0.0
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("initial_weight"));
    }

    #[test]
    fn rejects_unknown_strategy_type() {
        let result = StrategyFileConfig::from_toml_str(
            r#"
            [[strategy]]
            type = "astrology"
            condition_id = "1"
            initial_weight = 1.0
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn bundled_strategy_file_is_valid() {
        let file =
            StrategyFileConfig::from_toml_str(include_str!("../../../config/strategies.toml")).unwrap();
        assert_eq!(file.strategies.len(), StrategyType::ALL.len());
    }
}
