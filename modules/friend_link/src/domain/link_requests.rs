use chrono::{DateTime, Utc};
use sessionkit::RetryPolicy;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::contract::model::{
    AccountFriend, LinkAcceptResult, LinkRequest, LinkRequestStatus, MemberKey, SessionAccount,
};
use crate::domain::error::{DomainError, DomainResult};
use crate::domain::normalize::normalize_email;
use crate::domain::ports::{RemoteStore, TransitionOutcome};
use crate::domain::remote_call;

/// Explicit "link your account to this member" invitations.
#[derive(Clone)]
pub struct LinkRequestService {
    remote: Arc<dyn RemoteStore>,
    ttl: chrono::Duration,
    retry: RetryPolicy,
}

impl LinkRequestService {
    pub fn new(remote: Arc<dyn RemoteStore>, ttl: chrono::Duration, retry: RetryPolicy) -> Self {
        Self { remote, ttl, retry }
    }

    /// Validation happens locally before the first remote call, except for
    /// the duplicate check which needs the requester's outgoing list.
    #[instrument(
        name = "friend_link.link_requests.create",
        skip(self, me, recipient_email, friends, target_member_key, target_member_name),
        fields(requester = %me.email, target = %target_member_key)
    )]
    pub async fn create(
        &self,
        me: &SessionAccount,
        recipient_email: &str,
        target_member_key: MemberKey,
        target_member_name: &str,
        friends: &[AccountFriend],
    ) -> DomainResult<LinkRequest> {
        let recipient = normalize_email(recipient_email);
        if recipient.is_empty() {
            return Err(DomainError::invalid_input("recipient email is blank"));
        }
        if recipient == normalize_email(&me.email) {
            return Err(DomainError::SelfLink);
        }
        if let Some(f) = friends
            .iter()
            .find(|f| f.answers_to(target_member_key) && f.link.is_linked())
        {
            return Err(DomainError::member_already_linked(f.display_name()));
        }
        if friends.iter().any(|f| {
            f.link
                .account()
                .is_some_and(|a| a.is_account(None, Some(&recipient)))
        }) {
            return Err(DomainError::account_already_linked(recipient));
        }

        let now = Utc::now();
        let expires_at = now
            .checked_add_signed(self.ttl)
            .ok_or_else(|| DomainError::invalid_input("link request expiry out of range"))?;
        let outgoing = remote_call(&self.retry, "link_requests_from_requester", || {
            self.remote.link_requests_from_requester(me.id)
        })
        .await?;
        if let Some(existing) = outgoing.iter().find(|r| {
            r.is_active_at(now)
                && r.target_member_key == target_member_key
                && normalize_email(&r.recipient_email) == recipient
        }) {
            return Err(DomainError::DuplicateRequest {
                existing: existing.id,
            });
        }

        let request = LinkRequest {
            id: Uuid::new_v4(),
            requester_id: me.id,
            requester_email: normalize_email(&me.email),
            requester_name: me.display_name.clone(),
            recipient_email: recipient,
            target_member_key,
            target_member_name: target_member_name.trim().to_string(),
            status: LinkRequestStatus::Pending,
            created_at: now,
            expires_at,
            rejected_at: None,
        };
        remote_call(&self.retry, "insert_link_request", || {
            self.remote.insert_link_request(&request)
        })
        .await?;
        info!(request_id = %request.id, "link request created");
        Ok(request)
    }

    #[instrument(name = "friend_link.link_requests.incoming", skip_all)]
    pub async fn incoming(&self, me: &SessionAccount) -> DomainResult<Vec<LinkRequest>> {
        let email = normalize_email(&me.email);
        let now = Utc::now();
        let mut out: Vec<LinkRequest> = remote_call(&self.retry, "link_requests_for_recipient", || {
            self.remote.link_requests_for_recipient(&email)
        })
        .await?
        .into_iter()
        .filter(|r| r.is_active_at(now))
        .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }

    #[instrument(name = "friend_link.link_requests.outgoing", skip_all)]
    pub async fn outgoing(&self, me: &SessionAccount) -> DomainResult<Vec<LinkRequest>> {
        let now = Utc::now();
        let mut out: Vec<LinkRequest> = remote_call(&self.retry, "link_requests_from_requester", || {
            self.remote.link_requests_from_requester(me.id)
        })
        .await?
        .into_iter()
        .filter(|r| r.is_active_at(now))
        .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }

    /// Both directions, terminal or expired, newest first. Expired pending
    /// requests are reported with status `expired`.
    #[instrument(name = "friend_link.link_requests.previous", skip_all)]
    pub async fn previous(&self, me: &SessionAccount) -> DomainResult<Vec<LinkRequest>> {
        let email = normalize_email(&me.email);
        let now = Utc::now();
        let received = remote_call(&self.retry, "link_requests_for_recipient", || {
            self.remote.link_requests_for_recipient(&email)
        })
        .await?;
        let sent = remote_call(&self.retry, "link_requests_from_requester", || {
            self.remote.link_requests_from_requester(me.id)
        })
        .await?;

        let mut by_id: HashMap<Uuid, LinkRequest> = HashMap::new();
        for mut r in received.into_iter().chain(sent) {
            if r.is_active_at(now) {
                continue;
            }
            r.status = r.status_at(now);
            by_id.insert(r.id, r);
        }
        let mut out: Vec<LinkRequest> = by_id.into_values().collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }

    async fn fetch(&self, id: Uuid) -> DomainResult<LinkRequest> {
        remote_call(&self.retry, "get_link_request", || self.remote.get_link_request(id))
            .await?
            .ok_or(DomainError::RequestNotFound { id })
    }

    fn ensure_pending(request: &LinkRequest, now: DateTime<Utc>) -> DomainResult<()> {
        match request.status_at(now) {
            LinkRequestStatus::Pending => Ok(()),
            LinkRequestStatus::Expired => Err(DomainError::RequestExpired { id: request.id }),
            status => Err(DomainError::RequestNotPending {
                id: request.id,
                status,
            }),
        }
    }

    async fn transition(
        &self,
        id: Uuid,
        to: LinkRequestStatus,
        at: DateTime<Utc>,
    ) -> DomainResult<LinkRequest> {
        let outcome = remote_call(&self.retry, "transition_link_request", || {
            self.remote.transition_link_request(id, to, at)
        })
        .await?;
        match outcome {
            TransitionOutcome::Applied(request) => Ok(request),
            TransitionOutcome::NotFound => Err(DomainError::RequestNotFound { id }),
            // A retried call whose first attempt already landed.
            TransitionOutcome::NotPending(status) if status == to => self.fetch(id).await,
            TransitionOutcome::NotPending(status) => {
                Err(DomainError::RequestNotPending { id, status })
            }
        }
    }

    /// Accept as recipient. The recipient's account is resolved remotely and
    /// compared with the requester once more before the transition.
    #[instrument(name = "friend_link.link_requests.accept", skip(self, me), fields(recipient = %me.email))]
    pub async fn accept(
        &self,
        me: &SessionAccount,
        request_id: Uuid,
    ) -> DomainResult<(LinkAcceptResult, LinkRequest)> {
        let request = self.fetch(request_id).await?;
        if normalize_email(&request.recipient_email) != normalize_email(&me.email) {
            return Err(DomainError::NotRequestParty { id: request_id });
        }
        let now = Utc::now();
        Self::ensure_pending(&request, now)?;

        let recipient = remote_call(&self.retry, "lookup_account_by_email", || {
            self.remote.lookup_account_by_email(&request.recipient_email)
        })
        .await?
        .ok_or_else(|| DomainError::account_not_found(request.recipient_email.clone()))?;

        if recipient.id == request.requester_id {
            debug!(%request_id, "recipient resolves to the requester; rejecting");
            self.transition(request_id, LinkRequestStatus::Rejected, now)
                .await?;
            return Err(DomainError::SelfLink);
        }

        let accepted = self
            .transition(request_id, LinkRequestStatus::Accepted, now)
            .await?;
        info!(%request_id, member_key = %accepted.target_member_key, "link request accepted");
        Ok((
            LinkAcceptResult {
                member_key: accepted.target_member_key,
                linked_account_id: recipient.id,
                linked_account_email: recipient.email,
            },
            accepted,
        ))
    }

    #[instrument(name = "friend_link.link_requests.decline", skip(self, me), fields(recipient = %me.email))]
    pub async fn decline(&self, me: &SessionAccount, request_id: Uuid) -> DomainResult<()> {
        let request = self.fetch(request_id).await?;
        if normalize_email(&request.recipient_email) != normalize_email(&me.email) {
            return Err(DomainError::NotRequestParty { id: request_id });
        }
        let now = Utc::now();
        Self::ensure_pending(&request, now)?;
        self.transition(request_id, LinkRequestStatus::Declined, now)
            .await?;
        info!(%request_id, "link request declined");
        Ok(())
    }

    /// Idempotent for the requester: a request already cancelled, or one that
    /// disappeared concurrently, is a no-op.
    #[instrument(name = "friend_link.link_requests.cancel", skip(self, me), fields(requester = %me.email))]
    pub async fn cancel(&self, me: &SessionAccount, request_id: Uuid) -> DomainResult<()> {
        let request = self.fetch(request_id).await?;
        if request.requester_id != me.id {
            return Err(DomainError::NotRequestParty { id: request_id });
        }
        match request.status {
            LinkRequestStatus::Cancelled => {
                debug!(%request_id, "already cancelled");
                return Ok(());
            }
            LinkRequestStatus::Pending => {}
            status => {
                return Err(DomainError::RequestNotPending {
                    id: request_id,
                    status,
                })
            }
        }

        let outcome = remote_call(&self.retry, "transition_link_request", || {
            self.remote
                .transition_link_request(request_id, LinkRequestStatus::Cancelled, Utc::now())
        })
        .await?;
        match outcome {
            TransitionOutcome::Applied(_)
            | TransitionOutcome::NotFound
            | TransitionOutcome::NotPending(LinkRequestStatus::Cancelled) => {
                info!(%request_id, "link request cancelled");
                Ok(())
            }
            TransitionOutcome::NotPending(status) => Err(DomainError::RequestNotPending {
                id: request_id,
                status,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::model::AccountId;
    use crate::infra::InMemoryRemoteStore;

    #[tokio::test]
    async fn expiry_overflow_is_an_error() {
        let remote = Arc::new(InMemoryRemoteStore::new());
        let service = LinkRequestService::new(remote.clone(), chrono::Duration::MAX, RetryPolicy::once());
        let me = SessionAccount {
            id: AccountId::new(),
            email: "ann@example.com".into(),
            display_name: "Ann".into(),
        };

        let err = service
            .create(&me, "bo@example.com", MemberKey::new(), "Bo", &[])
            .await
            .unwrap_err();

        assert!(matches!(err, DomainError::InvalidInput { .. }));
        assert_eq!(remote.call_count("insert_link_request"), 0);
    }
}
