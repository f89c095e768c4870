use std::sync::Arc;

use tracing::info;

use crate::config::FriendLinkConfig;
use crate::contract::client::FriendLinkApi;
use crate::domain::ports::{LocalCache, RemoteStore};
use crate::domain::session::LinkSession;
use crate::gateways::local::FriendLinkLocalClient;

/// Name of this module's section under `modules:` in the app config.
pub const MODULE_NAME: &str = "friend_link";

/// Wiring root: builds the session controller over the given collaborators
/// and exposes it through the public client trait.
#[derive(Clone)]
pub struct FriendLinkModule {
    session: LinkSession,
    api: Arc<dyn FriendLinkApi>,
}

impl FriendLinkModule {
    pub fn init(
        config: FriendLinkConfig,
        remote: Arc<dyn RemoteStore>,
        cache: Arc<dyn LocalCache>,
    ) -> anyhow::Result<Self> {
        let session = LinkSession::new(config, remote, cache)?;
        let api: Arc<dyn FriendLinkApi> = Arc::new(FriendLinkLocalClient::new(session.clone()));
        info!(module = MODULE_NAME, "friend_link module initialized");
        Ok(Self { session, api })
    }

    /// Session controller, for sign-in and host signals.
    pub fn session(&self) -> &LinkSession {
        &self.session
    }

    pub fn api(&self) -> Arc<dyn FriendLinkApi> {
        self.api.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::{InMemoryRemoteStore, MemoryCache};

    #[test]
    fn invalid_config_is_rejected() {
        let config = FriendLinkConfig {
            max_failure_attempts: 0,
            ..Default::default()
        };
        let res = FriendLinkModule::init(
            config,
            Arc::new(InMemoryRemoteStore::new()),
            Arc::new(MemoryCache::new()),
        );
        assert!(res.is_err());
    }

    #[tokio::test]
    async fn api_requires_a_session() {
        let module = FriendLinkModule::init(
            FriendLinkConfig::default(),
            Arc::new(InMemoryRemoteStore::new()),
            Arc::new(MemoryCache::new()),
        )
        .unwrap();
        assert!(!module.session().is_signed_in());
        let err = module.api().friend_members().unwrap_err();
        assert_eq!(err, crate::contract::error::FriendLinkError::AuthSessionMissing);
    }
}
