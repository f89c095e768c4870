use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::contract::model::{
    AccountId, Expense, FriendRecord, Group, InviteToken, LinkRequest, LinkRequestStatus,
    LinkedAccount, MemberKey, SessionAccount,
};

/// Notification pushed by the remote store after a mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteChange {
    Friends { owner_email: String },
    Groups,
    Expenses { owner_email: String },
    LinkRequest { id: Uuid },
    InviteToken { id: Uuid },
}

/// Result of a compare-and-set from `pending`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionOutcome {
    Applied(LinkRequest),
    NotFound,
    /// The request had already left `pending`; carries the stored status.
    NotPending(LinkRequestStatus),
}

/// Result of the single serialized check-and-set over `claimed_by`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    Claimed(InviteToken),
    NotFound,
    AlreadyClaimed,
    Revoked,
    Expired,
}

/// Authoritative store shared by every account.
///
/// Transport failures are errors; business outcomes of the check-and-set
/// operations are values.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    // --- accounts ---

    async fn lookup_account_by_email(&self, email: &str) -> anyhow::Result<Option<SessionAccount>>;

    async fn create_account(&self, email: &str, display_name: &str) -> anyhow::Result<SessionAccount>;

    /// Update `owner_email`'s friend record for `member_key` to point at
    /// `account`, keeping the owner's nickname and aliases.
    async fn update_linked_member(
        &self,
        owner_email: &str,
        member_key: MemberKey,
        account: &LinkedAccount,
        display_name: &str,
    ) -> anyhow::Result<()>;

    // --- friends ---

    async fn fetch_friends(&self, owner_email: &str) -> anyhow::Result<Vec<FriendRecord>>;

    async fn sync_friends(&self, owner_email: &str, friends: &[FriendRecord]) -> anyhow::Result<()>;

    // --- groups & expenses ---

    async fn upsert_group(&self, group: &Group) -> anyhow::Result<()>;

    async fn delete_groups(&self, ids: &[Uuid]) -> anyhow::Result<()>;

    async fn upsert_expense(&self, expense: &Expense) -> anyhow::Result<()>;

    async fn delete_expense(&self, id: Uuid) -> anyhow::Result<()>;

    /// Groups owned by `email` or listing it as a member account.
    async fn fetch_groups(&self, email: &str) -> anyhow::Result<Vec<Group>>;

    async fn groups_with_member(&self, member_key: MemberKey) -> anyhow::Result<Vec<Group>>;

    async fn fetch_expenses(&self, owner_email: &str) -> anyhow::Result<Vec<Expense>>;

    // --- link requests ---

    async fn insert_link_request(&self, request: &LinkRequest) -> anyhow::Result<()>;

    async fn get_link_request(&self, id: Uuid) -> anyhow::Result<Option<LinkRequest>>;

    async fn link_requests_for_recipient(&self, email: &str) -> anyhow::Result<Vec<LinkRequest>>;

    async fn link_requests_from_requester(&self, requester: AccountId) -> anyhow::Result<Vec<LinkRequest>>;

    async fn transition_link_request(
        &self,
        id: Uuid,
        to: LinkRequestStatus,
        at: DateTime<Utc>,
    ) -> anyhow::Result<TransitionOutcome>;

    // --- invite tokens ---

    async fn insert_invite_token(&self, token: &InviteToken) -> anyhow::Result<()>;

    async fn get_invite_token(&self, id: Uuid) -> anyhow::Result<Option<InviteToken>>;

    async fn invite_tokens_by_creator(&self, creator: AccountId) -> anyhow::Result<Vec<InviteToken>>;

    async fn claim_invite_token(
        &self,
        id: Uuid,
        claimant: AccountId,
        at: DateTime<Utc>,
    ) -> anyhow::Result<ClaimOutcome>;

    /// Returns false when the token is unknown.
    async fn revoke_invite_token(&self, id: Uuid, at: DateTime<Utc>) -> anyhow::Result<bool>;

    // --- push ---

    fn changes(&self) -> broadcast::Receiver<RemoteChange>;
}
