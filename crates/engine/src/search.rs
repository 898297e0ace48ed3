use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use common::{
    CandidateSymbol, ConditionClient, Config, EngineReport, EngineStats, Error,
    PerformanceRecord, Result, StrategyConfig, StrategyReport, StrategyType,
};
use strategy::performance::{snapshot_since, window_start};
use strategy::StrategyRegistry;

use crate::cache::ResultCache;
use crate::rebalance::{rebalance, RebalanceInput, RebalanceParams};

/// Engine-wide tuning.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchConfig {
    /// How long a condition result is served from cache.
    pub cache_ttl: Duration,
    /// Per-query response deadline.
    pub query_timeout: Duration,
    /// Lookback for win rate / profit factor.
    pub performance_window_days: i64,
    pub rebalance: RebalanceParams,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(60),
            query_timeout: Duration::from_secs(10),
            performance_window_days: 30,
            rebalance: RebalanceParams::default(),
        }
    }
}

impl SearchConfig {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            cache_ttl: Duration::from_secs(cfg.cache_ttl_secs),
            query_timeout: Duration::from_secs(cfg.query_timeout_secs),
            performance_window_days: cfg.performance_window_days,
            ..Self::default()
        }
    }
}

/// Symbols returned by one strategy in a round, with the weight it had when
/// the round started.
#[derive(Debug, Clone, PartialEq)]
pub struct StrategyHits {
    pub strategy: String,
    pub weight: f64,
    pub symbols: Vec<String>,
}

/// Snapshot of an enabled strategy taken at the start of a search.
#[derive(Debug, Clone)]
struct SearchTarget {
    strategy_type: StrategyType,
    condition_id: String,
    weight: f64,
}

/// Runs every enabled strategy's condition query concurrently, merges the
/// hits into one weighted ranking, and tunes strategy weights from reported
/// trade outcomes.
pub struct ConditionSearchEngine {
    config: SearchConfig,
    client: Arc<dyn ConditionClient>,
    cache: ResultCache,
    registry: RwLock<StrategyRegistry>,
    stats: Mutex<EngineStats>,
}

impl ConditionSearchEngine {
    pub fn new(
        config: SearchConfig,
        strategies: Vec<StrategyConfig>,
        client: Arc<dyn ConditionClient>,
    ) -> Result<Self> {
        let registry = StrategyRegistry::from_configs(strategies)?;
        info!(
            strategies = registry.len(),
            cache_ttl = ?config.cache_ttl,
            query_timeout = ?config.query_timeout,
            "Condition search engine ready"
        );
        Ok(Self {
            config,
            client,
            cache: ResultCache::new(),
            registry: RwLock::new(registry),
            stats: Mutex::new(EngineStats::default()),
        })
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// Run one search round over all enabled strategies.
    ///
    /// Query timeouts and rejected queries count as an empty result for that
    /// strategy. A lost connection triggers exactly one reconnect, after which
    /// the affected strategies are retried once; if that fails too the round
    /// ends with `SearchAborted` carrying whatever was merged so far.
    pub async fn search(&self, deduplicate: bool) -> Result<Vec<CandidateSymbol>> {
        let targets: Vec<SearchTarget> = self
            .registry
            .read()
            .await
            .enabled_strategies()
            .map(|s| SearchTarget {
                strategy_type: s.strategy_type(),
                condition_id: s.condition_id().to_string(),
                weight: s.weight(),
            })
            .collect();

        if targets.is_empty() {
            debug!("No enabled strategies; search skipped");
            return Ok(Vec::new());
        }

        let started = Instant::now();
        let mut outcomes = join_all(targets.iter().map(|t| self.fetch(t))).await;

        let broken: Vec<usize> = outcomes
            .iter()
            .enumerate()
            .filter(|(_, outcome)| outcome.is_err())
            .map(|(i, _)| i)
            .collect();

        let mut failure = None;
        if !broken.is_empty() {
            warn!(affected = broken.len(), "Connection lost during search, reconnecting once");
            match self.client.reconnect().await {
                Ok(()) => {
                    let retried = join_all(broken.iter().map(|&i| self.fetch(&targets[i]))).await;
                    for (&i, outcome) in broken.iter().zip(retried) {
                        outcomes[i] = outcome;
                    }
                }
                Err(e) => failure = Some(e),
            }
        }
        let elapsed = started.elapsed();

        let mut hits = Vec::with_capacity(targets.len());
        for (target, outcome) in targets.iter().zip(outcomes) {
            match outcome {
                Ok(symbols) => hits.push(StrategyHits {
                    strategy: target.strategy_type.to_string(),
                    weight: target.weight,
                    symbols,
                }),
                Err(e) => {
                    failure.get_or_insert(e);
                }
            }
        }
        let candidates = merge_results(&hits, deduplicate);

        {
            let mut stats = self.stats.lock().await;
            stats.total_searches += targets.len() as u64;
            stats.total_results += candidates.len() as u64;
            stats.cumulative_search_time += elapsed;
        }

        info!(
            strategies = targets.len(),
            candidates = candidates.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            deduplicate,
            "Search round complete"
        );

        match failure {
            Some(source) => Err(Error::SearchAborted {
                source: Box::new(source),
                partial: candidates,
            }),
            None => Ok(candidates),
        }
    }

    /// Cached or fresh symbols for one strategy. Only connection-level
    /// failures are returned as errors.
    async fn fetch(&self, target: &SearchTarget) -> Result<Vec<String>> {
        if let Some(symbols) = self.cache.get(&target.condition_id, self.config.cache_ttl).await {
            self.stats.lock().await.cache_hits += 1;
            debug!(strategy = %target.strategy_type, condition_id = %target.condition_id, "Cache hit");
            return Ok(symbols);
        }

        match self
            .client
            .run_query(&target.condition_id, self.config.query_timeout)
            .await
        {
            Ok(symbols) => {
                debug!(
                    strategy = %target.strategy_type,
                    condition_id = %target.condition_id,
                    hits = symbols.len(),
                    "Condition query returned"
                );
                self.cache
                    .put(&target.condition_id, symbols.clone(), Utc::now())
                    .await;
                Ok(symbols)
            }
            Err(e) if e.is_recoverable() => {
                warn!(
                    strategy = %target.strategy_type,
                    condition_id = %target.condition_id,
                    error = %e,
                    "Condition query failed, treating as no hits"
                );
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }

    /// Record a closed trade for `strategy_type`.
    pub async fn update_performance(
        &self,
        strategy_type: StrategyType,
        successful: bool,
        profit: f64,
    ) -> Result<()> {
        self.update_performance_at(strategy_type, successful, profit, Utc::now())
            .await
    }

    pub async fn update_performance_at(
        &self,
        strategy_type: StrategyType,
        successful: bool,
        profit: f64,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.registry
            .write()
            .await
            .record_outcome(strategy_type, successful, profit, at)
    }

    /// Recompute enabled strategies' weights from their windowed performance.
    /// Returns the weights that were applied; empty when no enabled strategy
    /// traded in the window.
    pub async fn rebalance_weights(&self) -> Vec<(StrategyType, f64)> {
        let now = Utc::now();
        let window = self.config.performance_window_days;
        let mut registry = self.registry.write().await;

        let pruned = registry.prune(window, now);
        if pruned > 0 {
            debug!(pruned, "Dropped outcomes outside the performance window");
        }

        let since = window_start(now, window);
        let inputs: Vec<RebalanceInput> = registry
            .enabled_strategies()
            .map(|s| RebalanceInput {
                strategy_type: s.strategy_type(),
                initial_weight: s.config.initial_weight,
                snapshot: snapshot_since(s.trades(), since),
            })
            .collect();

        let updated = rebalance(&inputs, &self.config.rebalance);
        if updated.is_empty() {
            debug!("No trade history in window, weights unchanged");
            return updated;
        }

        for (strategy_type, weight) in &updated {
            let previous = registry.get(*strategy_type).map(|s| s.weight());
            if let Err(e) = registry.set_weight(*strategy_type, *weight) {
                warn!(strategy = %strategy_type, error = %e, "Failed to apply weight");
                continue;
            }
            info!(strategy = %strategy_type, previous = ?previous, weight, "Weight rebalanced");
        }
        updated
    }

    pub async fn get_stats(&self) -> EngineReport {
        let stats = *self.stats.lock().await;
        let since = window_start(Utc::now(), self.config.performance_window_days);
        let strategies = self
            .registry
            .read()
            .await
            .iter()
            .map(|s| StrategyReport {
                strategy_type: s.strategy_type(),
                condition_id: s.condition_id().to_string(),
                enabled: s.enabled,
                weight: s.weight(),
                performance: snapshot_since(s.trades(), since),
            })
            .collect();

        EngineReport {
            avg_search_time: stats.avg_search_time(),
            stats,
            strategies,
        }
    }

    pub async fn set_enabled(&self, strategy_type: StrategyType, enabled: bool) -> Result<()> {
        self.registry.write().await.set_enabled(strategy_type, enabled)
    }

    pub async fn weight(&self, strategy_type: StrategyType) -> Option<f64> {
        self.registry.read().await.get(strategy_type).map(|s| s.weight())
    }

    /// Configured condition ids that the brokerage catalog does not list.
    pub async fn validate_conditions(&self) -> Result<Vec<String>> {
        let catalog = self.client.list_conditions().await?;
        let known: HashSet<&str> = catalog.iter().map(|c| c.sequence_id.as_str()).collect();

        let missing: Vec<String> = self
            .registry
            .read()
            .await
            .iter()
            .filter(|s| !known.contains(s.condition_id()))
            .map(|s| s.condition_id().to_string())
            .collect();

        for id in &missing {
            warn!(condition_id = %id, "Configured condition not found in brokerage catalog");
        }
        Ok(missing)
    }

    pub async fn clear_cache(&self) {
        self.cache.clear().await;
    }

    pub async fn export_performance(&self) -> Vec<PerformanceRecord> {
        self.registry.read().await.export()
    }

    /// Restore exported history. Returns the number of records skipped
    /// because their strategy is not configured.
    pub async fn import_performance(&self, records: Vec<PerformanceRecord>) -> usize {
        let total = records.len();
        let skipped = self.registry.write().await.import(records);
        info!(restored = total - skipped, skipped, "Performance history imported");
        skipped
    }
}

/// Merge per-strategy hits into a ranked candidate list.
///
/// With `deduplicate`, a symbol found by several strategies becomes one row
/// whose weight is the sum of those strategies' weights (each strategy counted
/// once). Without it, every (strategy, symbol) pair is its own row. Rows are
/// ordered by weight descending, then symbol ascending.
pub fn merge_results(hits: &[StrategyHits], deduplicate: bool) -> Vec<CandidateSymbol> {
    let mut rows: Vec<CandidateSymbol> = if deduplicate {
        let mut merged: HashMap<&str, CandidateSymbol> = HashMap::new();
        for hit in hits {
            for symbol in &hit.symbols {
                let row = merged
                    .entry(symbol.as_str())
                    .or_insert_with(|| CandidateSymbol {
                        symbol: symbol.clone(),
                        weight: 0.0,
                        contributing_strategies: Vec::new(),
                    });
                if row.contributing_strategies.contains(&hit.strategy) {
                    continue;
                }
                row.weight += hit.weight;
                row.contributing_strategies.push(hit.strategy.clone());
            }
        }
        merged.into_values().collect()
    } else {
        hits.iter()
            .flat_map(|hit| {
                hit.symbols.iter().map(move |symbol| CandidateSymbol {
                    symbol: symbol.clone(),
                    weight: hit.weight,
                    contributing_strategies: vec![hit.strategy.clone()],
                })
            })
            .collect()
    };

    rows.sort_by(|a, b| {
        b.weight
            .total_cmp(&a.weight)
            .then_with(|| a.symbol.cmp(&b.symbol))
            .then_with(|| a.contributing_strategies.cmp(&b.contributing_strategies))
    });
    rows
}
