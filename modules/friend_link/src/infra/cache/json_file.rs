use anyhow::Context;
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::domain::ports::{CachedData, LocalCache};

pub const DEFAULT_CACHE_FILE: &str = "friend_link_cache.json";

/// Local cache kept as one JSON document.
///
/// Writes go to a sibling temp file first and are renamed into place, so a
/// crash mid-write leaves the previous document intact.
pub struct JsonFileCache {
    path: PathBuf,
}

impl JsonFileCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Cache file `friend_link_cache.json` under `home_dir`.
    pub fn in_home_dir(home_dir: &Path) -> Self {
        Self::new(home_dir.join(DEFAULT_CACHE_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl LocalCache for JsonFileCache {
    async fn load(&self) -> anyhow::Result<CachedData> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .with_context(|| format!("corrupt cache file {}", self.path.display())),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(CachedData::default()),
            Err(e) => Err(e).with_context(|| format!("reading {}", self.path.display())),
        }
    }

    async fn save(&self, data: &CachedData) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let bytes = serde_json::to_vec_pretty(data)?;
        let tmp = self.temp_path();
        tokio::fs::write(&tmp, bytes)
            .await
            .with_context(|| format!("writing {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("replacing {}", self.path.display()))?;
        Ok(())
    }

    async fn clear(&self) -> anyhow::Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("removing {}", self.path.display())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::model::{Group, GroupMember, MemberKey};
    use chrono::Utc;
    use tempfile::tempdir;
    use uuid::Uuid;

    fn sample() -> CachedData {
        CachedData {
            groups: vec![Group {
                id: Uuid::new_v4(),
                name: "Flat".into(),
                owner_email: "a@x.io".into(),
                members: vec![GroupMember {
                    member_key: MemberKey::new(),
                    name: "Bo".into(),
                    account_email: None,
                }],
                updated_at: Utc::now(),
            }],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn missing_file_loads_empty() {
        let dir = tempdir().unwrap();
        let cache = JsonFileCache::in_home_dir(dir.path());
        assert_eq!(cache.load().await.unwrap(), CachedData::default());
        cache.clear().await.unwrap();
    }

    #[tokio::test]
    async fn save_then_load_and_clear() {
        let dir = tempdir().unwrap();
        let cache = JsonFileCache::new(dir.path().join("nested/cache.json"));
        let data = sample();
        cache.save(&data).await.unwrap();
        assert_eq!(cache.load().await.unwrap(), data);
        assert!(!cache.temp_path().exists());

        cache.clear().await.unwrap();
        assert!(!cache.path().exists());
    }

    #[tokio::test]
    async fn corrupt_file_is_an_error() {
        let dir = tempdir().unwrap();
        let cache = JsonFileCache::in_home_dir(dir.path());
        std::fs::write(cache.path(), b"{ not json").unwrap();
        let err = cache.load().await.unwrap_err();
        assert!(err.to_string().contains("corrupt cache file"));
    }
}
