use chrono::{Duration, Utc};
use proptest::prelude::*;

use common::{StrategyConfig, StrategyType};
use strategy::StrategyRegistry;

proptest! {
    /// Windowed statistics stay within their defined ranges for arbitrary ledgers.
    #[test]
    fn stats_are_bounded_for_random_ledgers(
        trades in prop::collection::vec((any::<bool>(), -0.5f64..0.5f64, 0i64..60), 0..64),
        window_days in 1i64..45,
    ) {
        let now = Utc::now();
        let mut reg = StrategyRegistry::from_configs(vec![
            StrategyConfig::new(StrategyType::Momentum, "0", 1.0),
        ]).unwrap();

        for (successful, profit, age_days) in &trades {
            reg.record_outcome(StrategyType::Momentum, *successful, *profit, now - Duration::days(*age_days))
                .unwrap();
        }

        let snap = reg.stats_for(StrategyType::Momentum, window_days, now).unwrap();
        let in_window = trades.iter().filter(|(_, _, age)| *age <= window_days).count();

        prop_assert_eq!(snap.trade_count, in_window);
        prop_assert!((0.0..=1.0).contains(&snap.win_rate));
        prop_assert!(snap.profit_factor >= 0.0);
        if in_window == 0 {
            prop_assert_eq!(snap.win_rate, 0.0);
            prop_assert_eq!(snap.profit_factor, 0.0);
        }
    }
}
