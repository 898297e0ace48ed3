pub mod cache;
pub mod kiwoom;
pub mod rebalance;
pub mod search;

pub use cache::ResultCache;
pub use kiwoom::KiwoomClient;
pub use rebalance::RebalanceParams;
pub use search::{merge_results, ConditionSearchEngine, SearchConfig, StrategyHits};
