use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::contract::model::{Expense, FriendRecord, Group};

/// Everything the session keeps across restarts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedData {
    #[serde(default)]
    pub groups: Vec<Group>,
    #[serde(default)]
    pub expenses: Vec<Expense>,
    #[serde(default)]
    pub friends: Vec<FriendRecord>,
}

/// Durable local blob store. Contents are round-tripped, never inspected.
#[async_trait]
pub trait LocalCache: Send + Sync {
    async fn load(&self) -> anyhow::Result<CachedData>;

    async fn save(&self, data: &CachedData) -> anyhow::Result<()>;

    async fn clear(&self) -> anyhow::Result<()>;
}
