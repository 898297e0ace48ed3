use chrono::{DateTime, Duration, Utc};

use common::{PerformanceSnapshot, TradeOutcome};

/// Oldest timestamp still inside a `window_days` lookback ending at `now`.
/// A window reaching past the representable range covers all history.
pub fn window_start(now: DateTime<Utc>, window_days: i64) -> DateTime<Utc> {
    Duration::try_days(window_days.max(0))
        .and_then(|span| now.checked_sub_signed(span))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Compute win rate, profit factor and net profit over the outcomes recorded
/// at or after `since`. Outcomes outside the window are ignored, not removed.
pub fn snapshot_since<'a, I>(outcomes: I, since: DateTime<Utc>) -> PerformanceSnapshot
where
    I: IntoIterator<Item = &'a TradeOutcome>,
{
    let mut wins = 0usize;
    let mut losses = 0usize;
    let mut gross_profit = 0.0;
    let mut gross_loss = 0.0;

    for outcome in outcomes.into_iter().filter(|o| o.timestamp >= since) {
        if outcome.successful {
            wins += 1;
        } else {
            losses += 1;
        }
        if outcome.profit > 0.0 {
            gross_profit += outcome.profit;
        } else if outcome.profit < 0.0 {
            gross_loss += outcome.profit.abs();
        }
    }

    let trade_count = wins + losses;
    let win_rate = if trade_count == 0 {
        0.0
    } else {
        wins as f64 / trade_count as f64
    };

    PerformanceSnapshot {
        win_rate,
        profit_factor: profit_factor(gross_profit, gross_loss),
        net_profit: gross_profit - gross_loss,
        trade_count,
    }
}

/// Gains over absolute losses. No losses with gains is unbounded; neither is 0.
pub fn profit_factor(gross_profit: f64, gross_loss: f64) -> f64 {
    if gross_loss > 0.0 {
        gross_profit / gross_loss
    } else if gross_profit > 0.0 {
        f64::INFINITY
    } else {
        0.0
    }
}
