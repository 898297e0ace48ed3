use std::time::Duration;

use async_trait::async_trait;

use crate::{ConditionInfo, Result};

/// Abstraction over the brokerage's condition-search channel.
///
/// `KiwoomClient` implements this over the live websocket. Only the search
/// engine holds a `dyn ConditionClient`; strategies never talk to the
/// channel directly.
#[async_trait]
pub trait ConditionClient: Send + Sync {
    /// Execute the saved condition `condition_id` and return the raw symbols.
    ///
    /// `QueryTimeout` and `Query` errors leave the connection usable.
    /// `Connection` means the client must be re-established.
    async fn run_query(&self, condition_id: &str, timeout: Duration) -> Result<Vec<String>>;

    /// Fetch the catalog of saved condition queries.
    async fn list_conditions(&self) -> Result<Vec<ConditionInfo>>;

    /// Tear down the current connection and run one connect + authenticate cycle.
    async fn reconnect(&self) -> Result<()>;
}
