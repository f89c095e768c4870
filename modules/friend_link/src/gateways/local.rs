use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use uuid::Uuid;

use crate::contract::{
    client::{FriendLinkApi, FriendLinkResult},
    model::{
        AccountFriend, GeneratedInvite, InviteToken, InviteValidation, LinkAcceptResult,
        LinkRequest, MemberKey,
    },
};
use crate::domain::session::LinkSession;

/// Local implementation of the FriendLinkApi trait that delegates to the session controller
pub struct FriendLinkLocalClient {
    session: LinkSession,
}

impl FriendLinkLocalClient {
    pub fn new(session: LinkSession) -> Self {
        Self { session }
    }
}

#[async_trait]
impl FriendLinkApi for FriendLinkLocalClient {
    async fn create_link_request(
        &self,
        recipient_email: &str,
        target_member_key: MemberKey,
        target_member_name: &str,
    ) -> FriendLinkResult<LinkRequest> {
        Ok(self
            .session
            .create_link_request(recipient_email, target_member_key, target_member_name)
            .await?)
    }

    async fn incoming_link_requests(&self) -> FriendLinkResult<Vec<LinkRequest>> {
        Ok(self.session.incoming_link_requests().await?)
    }

    async fn outgoing_link_requests(&self) -> FriendLinkResult<Vec<LinkRequest>> {
        Ok(self.session.outgoing_link_requests().await?)
    }

    async fn previous_link_requests(&self) -> FriendLinkResult<Vec<LinkRequest>> {
        Ok(self.session.previous_link_requests().await?)
    }

    async fn accept_link_request(&self, request_id: Uuid) -> FriendLinkResult<LinkAcceptResult> {
        Ok(self.session.accept_link_request(request_id).await?)
    }

    async fn decline_link_request(&self, request_id: Uuid) -> FriendLinkResult<()> {
        Ok(self.session.decline_link_request(request_id).await?)
    }

    async fn cancel_link_request(&self, request_id: Uuid) -> FriendLinkResult<()> {
        Ok(self.session.cancel_link_request(request_id).await?)
    }

    async fn generate_invite(
        &self,
        target_member_key: MemberKey,
        target_member_name: &str,
    ) -> FriendLinkResult<GeneratedInvite> {
        Ok(self
            .session
            .generate_invite(target_member_key, target_member_name)
            .await?)
    }

    async fn validate_invite(&self, token_id: Uuid) -> FriendLinkResult<InviteValidation> {
        Ok(self.session.validate_invite(token_id).await?)
    }

    async fn watch_invite(
        &self,
        token_id: Uuid,
    ) -> FriendLinkResult<BoxStream<'static, InviteValidation>> {
        Ok(self.session.watch_invite(token_id).boxed())
    }

    async fn claim_invite(&self, token_id: Uuid) -> FriendLinkResult<LinkAcceptResult> {
        Ok(self.session.claim_invite(token_id).await?)
    }

    async fn revoke_invite(&self, token_id: Uuid) -> FriendLinkResult<()> {
        Ok(self.session.revoke_invite(token_id).await?)
    }

    async fn active_invites(&self) -> FriendLinkResult<Vec<InviteToken>> {
        Ok(self.session.active_invites().await?)
    }

    async fn reconcile(&self) -> FriendLinkResult<()> {
        Ok(self.session.reconcile_now().await?)
    }

    fn friend_members(&self) -> FriendLinkResult<Vec<AccountFriend>> {
        Ok(self.session.friend_members()?)
    }

    fn confirmed_friend_members(&self) -> FriendLinkResult<Vec<AccountFriend>> {
        Ok(self.session.confirmed_friend_members()?)
    }

    fn are_same_person(&self, a: MemberKey, b: MemberKey) -> FriendLinkResult<bool> {
        Ok(self.session.are_same_person(a, b)?)
    }
}
