use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use common::{Config, Error, PerformanceRecord, SessionProvider, StaticSession};
use engine::{ConditionSearchEngine, KiwoomClient, SearchConfig};
use strategy::StrategyFileConfig;

/// Candidates logged after each search round.
const TOP_CANDIDATES: usize = 10;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── Logging ──────────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    // ── Config ────────────────────────────────────────────────────────────────
    let cfg = Config::from_env();
    info!(url = %cfg.kiwoom_ws_url, "Screener starting");

    let strategy_file = StrategyFileConfig::load(&cfg.strategy_config_path)?;
    info!(
        path = %cfg.strategy_config_path,
        strategies = strategy_file.strategies.len(),
        "Strategy config loaded"
    );

    // ── Brokerage channel ─────────────────────────────────────────────────────
    let session: Arc<dyn SessionProvider> = Arc::new(StaticSession::new(cfg.kiwoom_token.clone()));
    let client = Arc::new(KiwoomClient::new(
        &cfg.kiwoom_ws_url,
        session.clone(),
        Duration::from_secs(cfg.auth_timeout_secs),
    )?);
    client
        .establish()
        .await
        .context("failed to open condition-search channel")?;

    // ── Engine ────────────────────────────────────────────────────────────────
    let engine = ConditionSearchEngine::new(
        SearchConfig::from_config(&cfg),
        strategy_file.strategies,
        client.clone(),
    )?;

    match engine.validate_conditions().await {
        Ok(missing) if missing.is_empty() => info!("All configured conditions exist in the catalog"),
        Ok(missing) => warn!(?missing, "Some configured conditions are missing; they will return no hits"),
        Err(e) => warn!(error = %e, "Could not fetch condition catalog"),
    }

    if let Some(path) = &cfg.performance_history_path {
        match load_history(path) {
            Ok(Some(records)) => {
                engine.import_performance(records).await;
            }
            Ok(None) => info!(path = %path, "No performance history yet"),
            Err(e) => warn!(path = %path, error = %e, "Ignoring unreadable performance history"),
        }
    }

    // ── Main loop ─────────────────────────────────────────────────────────────
    let mut search_tick = tokio::time::interval(Duration::from_secs(cfg.search_interval_secs.max(1)));
    search_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut rebalance_tick =
        tokio::time::interval(Duration::from_secs(cfg.rebalance_interval_secs.max(1)));
    rebalance_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first rebalance tick fires immediately; there is nothing to learn yet.
    rebalance_tick.tick().await;

    info!("Screener running. Waiting for shutdown signal.");
    loop {
        tokio::select! {
            _ = search_tick.tick() => run_search(&engine).await,
            _ = rebalance_tick.tick() => {
                let updated = engine.rebalance_weights().await;
                info!(adjusted = updated.len(), "Rebalance complete");
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    // ── Shutdown ──────────────────────────────────────────────────────────────
    let report = engine.get_stats().await;
    info!(
        total_searches = report.stats.total_searches,
        total_results = report.stats.total_results,
        cache_hits = report.stats.cache_hits,
        avg_search_ms = report.avg_search_time.as_millis() as u64,
        "Final engine stats"
    );

    if let Some(path) = &cfg.performance_history_path {
        let records = engine.export_performance().await;
        match save_history(path, &records) {
            Ok(()) => info!(path = %path, strategies = records.len(), "Performance history saved"),
            Err(e) => error!(path = %path, error = %e, "Failed to save performance history"),
        }
    }

    client.close().await;
    session.close().await?;
    info!("Screener stopped");
    Ok(())
}

async fn run_search(engine: &ConditionSearchEngine) {
    match engine.search(true).await {
        Ok(candidates) => {
            for (rank, c) in candidates.iter().take(TOP_CANDIDATES).enumerate() {
                info!(
                    rank = rank + 1,
                    symbol = %c.symbol,
                    weight = c.weight,
                    strategies = %c.contributing_strategies.join(","),
                    "Candidate"
                );
            }
        }
        Err(Error::SearchAborted { source, partial }) => {
            error!(error = %source, partial = partial.len(), "Search aborted after reconnect");
        }
        Err(e) => error!(error = %e, "Search failed"),
    }
}

fn load_history(path: &str) -> anyhow::Result<Option<Vec<PerformanceRecord>>> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e).with_context(|| format!("reading {path}")),
    };
    let records = serde_json::from_str(&content).with_context(|| format!("parsing {path}"))?;
    Ok(Some(records))
}

fn save_history(path: &str, records: &[PerformanceRecord]) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(records)?;
    std::fs::write(path, json).with_context(|| format!("writing {path}"))?;
    Ok(())
}
