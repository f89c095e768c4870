#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use sessionkit::RetryPolicy;
use uuid::Uuid;

use friend_link::config::FriendLinkConfig;
use friend_link::contract::client::FriendLinkApi;
use friend_link::contract::model::{
    Expense, ExpenseSplit, Group, GroupMember, MemberKey, SessionAccount,
};
use friend_link::domain::session::LinkSession;
use friend_link::infra::{InMemoryRemoteStore, MemoryCache};
use friend_link::FriendLinkModule;

/// Fast retries so offline scenarios finish quickly.
pub fn test_config() -> FriendLinkConfig {
    FriendLinkConfig {
        retry: RetryPolicy {
            max_attempts: 2,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
            backoff_multiplier: 2.0,
        },
        ..Default::default()
    }
}

/// One signed-in account with its own session and cache over a shared remote.
pub struct Party {
    pub module: FriendLinkModule,
    pub cache: Arc<MemoryCache>,
    pub account: SessionAccount,
    pub self_key: MemberKey,
}

impl Party {
    pub async fn sign_in(remote: &Arc<InMemoryRemoteStore>, email: &str, name: &str) -> Self {
        Self::sign_in_with(remote, test_config(), email, name).await
    }

    pub async fn sign_in_with(
        remote: &Arc<InMemoryRemoteStore>,
        config: FriendLinkConfig,
        email: &str,
        name: &str,
    ) -> Self {
        let cache = Arc::new(MemoryCache::new());
        let module = FriendLinkModule::init(config, remote.clone(), cache.clone())
            .expect("module init");
        let self_key = MemberKey::new();
        let account = module
            .session()
            .sign_in(email, name, self_key)
            .await
            .expect("sign in");
        Self {
            module,
            cache,
            account,
            self_key,
        }
    }

    pub fn session(&self) -> &LinkSession {
        self.module.session()
    }

    pub fn api(&self) -> Arc<dyn FriendLinkApi> {
        self.module.api()
    }

    pub fn email(&self) -> &str {
        &self.account.email
    }
}

pub fn shared_remote() -> Arc<InMemoryRemoteStore> {
    Arc::new(InMemoryRemoteStore::new())
}

pub fn member(key: MemberKey, name: &str, account_email: Option<&str>) -> GroupMember {
    GroupMember {
        member_key: key,
        name: name.to_string(),
        account_email: account_email.map(str::to_string),
    }
}

pub fn group(owner_email: &str, name: &str, members: Vec<GroupMember>) -> Group {
    Group {
        id: Uuid::new_v4(),
        name: name.to_string(),
        owner_email: owner_email.to_string(),
        members,
        updated_at: Utc::now(),
    }
}

/// Amounts are in cents.
pub fn expense(
    owner_email: &str,
    group_id: Option<Uuid>,
    paid_by: MemberKey,
    splits: &[(MemberKey, i64)],
) -> Expense {
    let splits: Vec<ExpenseSplit> = splits
        .iter()
        .map(|(key, cents)| ExpenseSplit {
            member_key: *key,
            amount: Decimal::new(*cents, 2),
        })
        .collect();
    Expense {
        id: Uuid::new_v4(),
        owner_email: owner_email.to_string(),
        group_id,
        description: "dinner".to_string(),
        amount: splits.iter().map(|s| s.amount).sum(),
        paid_by,
        splits,
        settled: false,
        date: Utc::now(),
        updated_at: Utc::now(),
    }
}

/// Poll `check` until it holds or a second passes.
pub async fn eventually<F: FnMut() -> bool>(mut check: F) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
