use async_trait::async_trait;
use parking_lot::Mutex;

use crate::domain::ports::{CachedData, LocalCache};

/// Process-local cache; contents are lost on exit.
#[derive(Default)]
pub struct MemoryCache {
    data: Mutex<CachedData>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> CachedData {
        self.data.lock().clone()
    }
}

#[async_trait]
impl LocalCache for MemoryCache {
    async fn load(&self) -> anyhow::Result<CachedData> {
        Ok(self.data.lock().clone())
    }

    async fn save(&self, data: &CachedData) -> anyhow::Result<()> {
        *self.data.lock() = data.clone();
        Ok(())
    }

    async fn clear(&self) -> anyhow::Result<()> {
        *self.data.lock() = CachedData::default();
        Ok(())
    }
}
