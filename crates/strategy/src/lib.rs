pub mod config;
pub mod performance;
pub mod registry;

pub use config::StrategyFileConfig;
pub use registry::{StrategyRegistry, StrategyState};
