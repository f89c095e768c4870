use async_trait::async_trait;
use futures::stream::BoxStream;
use uuid::Uuid;

use crate::contract::error::FriendLinkError;
use crate::contract::model::{
    AccountFriend, GeneratedInvite, InviteToken, InviteValidation, LinkAcceptResult, LinkRequest,
    MemberKey,
};

pub type FriendLinkResult<T> = Result<T, FriendLinkError>;

/// Public API trait for the friend_link module that other modules can use
#[async_trait]
pub trait FriendLinkApi: Send + Sync {
    // --- link requests ---

    /// Ask the account behind `recipient_email` to take over `target_member_key`
    async fn create_link_request(
        &self,
        recipient_email: &str,
        target_member_key: MemberKey,
        target_member_name: &str,
    ) -> FriendLinkResult<LinkRequest>;

    async fn incoming_link_requests(&self) -> FriendLinkResult<Vec<LinkRequest>>;

    async fn outgoing_link_requests(&self) -> FriendLinkResult<Vec<LinkRequest>>;

    /// Requests of either direction that reached a terminal state
    async fn previous_link_requests(&self) -> FriendLinkResult<Vec<LinkRequest>>;

    async fn accept_link_request(&self, request_id: Uuid) -> FriendLinkResult<LinkAcceptResult>;

    async fn decline_link_request(&self, request_id: Uuid) -> FriendLinkResult<()>;

    /// Idempotent: cancelling an already cancelled request succeeds
    async fn cancel_link_request(&self, request_id: Uuid) -> FriendLinkResult<()>;

    // --- invite tokens ---

    async fn generate_invite(
        &self,
        target_member_key: MemberKey,
        target_member_name: &str,
    ) -> FriendLinkResult<GeneratedInvite>;

    /// Invalid tokens are reported inside the returned value, not as errors
    async fn validate_invite(&self, token_id: Uuid) -> FriendLinkResult<InviteValidation>;

    /// Live variant of `validate_invite`; ends once the token is claimed or revoked
    async fn watch_invite(
        &self,
        token_id: Uuid,
    ) -> FriendLinkResult<BoxStream<'static, InviteValidation>>;

    async fn claim_invite(&self, token_id: Uuid) -> FriendLinkResult<LinkAcceptResult>;

    async fn revoke_invite(&self, token_id: Uuid) -> FriendLinkResult<()>;

    async fn active_invites(&self) -> FriendLinkResult<Vec<InviteToken>>;

    // --- reconciliation & queries ---

    async fn reconcile(&self) -> FriendLinkResult<()>;

    fn friend_members(&self) -> FriendLinkResult<Vec<AccountFriend>>;

    fn confirmed_friend_members(&self) -> FriendLinkResult<Vec<AccountFriend>>;

    fn are_same_person(&self, a: MemberKey, b: MemberKey) -> FriendLinkResult<bool>;
}
