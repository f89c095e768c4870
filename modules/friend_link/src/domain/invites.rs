use chrono::Utc;
use sessionkit::RetryPolicy;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, instrument, warn};
use url::Url;
use uuid::Uuid;

use crate::contract::model::{
    AccountFriend, GeneratedInvite, InviteStatus, InviteToken, InviteValidation, LinkAcceptResult,
    MemberKey, SessionAccount,
};
use crate::domain::error::{DomainError, DomainResult};
use crate::domain::normalize::normalize_email;
use crate::domain::ports::{ClaimOutcome, RemoteChange, RemoteStore};
use crate::domain::preview::compute_preview;
use crate::domain::remote_call;

const NOT_FOUND: &str = "Invite not found";
const REVOKED: &str = "This invite has been revoked";
const CLAIMED: &str = "This invite has already been claimed";
const EXPIRED: &str = "This invite has expired";

/// Bearer-token invitations.
#[derive(Clone)]
pub struct InviteService {
    remote: Arc<dyn RemoteStore>,
    ttl: chrono::Duration,
    base_url: Url,
    retry: RetryPolicy,
}

impl InviteService {
    pub fn new(
        remote: Arc<dyn RemoteStore>,
        ttl: chrono::Duration,
        base_url: Url,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            remote,
            ttl,
            base_url,
            retry,
        }
    }

    /// Shareable locator: the base url with the token id as last segment.
    pub fn invite_url(&self, id: Uuid) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(&id.to_string());
        }
        url
    }

    #[instrument(
        name = "friend_link.invites.generate",
        skip(self, me, friends, creator_member_key, target_member_key, target_member_name),
        fields(creator = %me.email, target = %target_member_key)
    )]
    pub async fn generate(
        &self,
        me: &SessionAccount,
        creator_member_key: MemberKey,
        target_member_key: MemberKey,
        target_member_name: &str,
        friends: &[AccountFriend],
    ) -> DomainResult<GeneratedInvite> {
        if target_member_key == creator_member_key {
            return Err(DomainError::SelfLink);
        }
        if let Some(f) = friends
            .iter()
            .find(|f| f.answers_to(target_member_key) && f.link.is_linked())
        {
            return Err(DomainError::member_already_linked(f.display_name()));
        }

        let now = Utc::now();
        let expires_at = now
            .checked_add_signed(self.ttl)
            .ok_or_else(|| DomainError::invalid_input("invite expiry out of range"))?;
        let token = InviteToken {
            id: Uuid::new_v4(),
            creator_id: me.id,
            creator_email: normalize_email(&me.email),
            creator_name: me.display_name.clone(),
            creator_member_key,
            target_member_key,
            target_member_name: target_member_name.trim().to_string(),
            created_at: now,
            expires_at,
            claimed_by: None,
            claimed_at: None,
            revoked_at: None,
        };
        remote_call(&self.retry, "insert_invite_token", || {
            self.remote.insert_invite_token(&token)
        })
        .await?;

        let url = self.invite_url(token.id);
        let share_text = format!(
            "{} added you as \"{}\" on TabShare. Open {} to link your account and see your shared expenses.",
            token.creator_name, token.target_member_name, url
        );
        info!(token_id = %token.id, "invite generated");
        Ok(GeneratedInvite {
            token,
            url,
            share_text,
        })
    }

    /// Invalid tokens produce `Ok` with `is_valid == false`; only transport
    /// failures are errors.
    #[instrument(name = "friend_link.invites.validate", skip(self))]
    pub async fn validate(&self, token_id: Uuid) -> DomainResult<InviteValidation> {
        let Some(token) = remote_call(&self.retry, "get_invite_token", || {
            self.remote.get_invite_token(token_id)
        })
        .await?
        else {
            return Ok(InviteValidation::invalid(None, NOT_FOUND));
        };

        let message = match token.status_at(Utc::now()) {
            InviteStatus::Active => None,
            InviteStatus::Revoked => Some(REVOKED),
            InviteStatus::Claimed => Some(CLAIMED),
            InviteStatus::Expired => Some(EXPIRED),
        };
        if let Some(message) = message {
            return Ok(InviteValidation::invalid(Some(token), message));
        }

        let expenses = remote_call(&self.retry, "fetch_expenses", || {
            self.remote.fetch_expenses(&token.creator_email)
        })
        .await?;
        let groups = remote_call(&self.retry, "fetch_groups", || {
            self.remote.fetch_groups(&token.creator_email)
        })
        .await?;
        let preview = compute_preview(
            &expenses,
            &groups,
            token.creator_member_key,
            token.target_member_key,
        );
        Ok(InviteValidation::valid(token, preview))
    }

    /// Single-winner claim; the check-and-set runs inside the remote store.
    #[instrument(name = "friend_link.invites.claim", skip(self, me), fields(claimant = %me.email))]
    pub async fn claim(
        &self,
        me: &SessionAccount,
        token_id: Uuid,
    ) -> DomainResult<(LinkAcceptResult, InviteToken)> {
        let token = remote_call(&self.retry, "get_invite_token", || {
            self.remote.get_invite_token(token_id)
        })
        .await?
        .ok_or(DomainError::TokenNotFound { id: token_id })?;
        if token.creator_id == me.id || token.creator_email == normalize_email(&me.email) {
            return Err(DomainError::SelfLink);
        }

        let outcome = remote_call(&self.retry, "claim_invite_token", || {
            self.remote.claim_invite_token(token_id, me.id, Utc::now())
        })
        .await?;
        let token = match outcome {
            ClaimOutcome::Claimed(token) => token,
            ClaimOutcome::AlreadyClaimed => {
                // A retried claim whose first attempt landed sees its own win.
                let current = remote_call(&self.retry, "get_invite_token", || {
                    self.remote.get_invite_token(token_id)
                })
                .await?;
                match current {
                    Some(token) if token.claimed_by == Some(me.id) => {
                        debug!(%token_id, "claim already recorded for this account");
                        token
                    }
                    _ => return Err(DomainError::TokenClaimed { id: token_id }),
                }
            }
            ClaimOutcome::Revoked => return Err(DomainError::TokenRevoked { id: token_id }),
            ClaimOutcome::Expired => return Err(DomainError::TokenExpired { id: token_id }),
            ClaimOutcome::NotFound => return Err(DomainError::TokenNotFound { id: token_id }),
        };
        info!(%token_id, member_key = %token.target_member_key, "invite claimed");
        Ok((
            LinkAcceptResult {
                member_key: token.target_member_key,
                linked_account_id: me.id,
                linked_account_email: normalize_email(&me.email),
            },
            token,
        ))
    }

    #[instrument(name = "friend_link.invites.revoke", skip(self, me), fields(creator = %me.email))]
    pub async fn revoke(&self, me: &SessionAccount, token_id: Uuid) -> DomainResult<()> {
        let token = remote_call(&self.retry, "get_invite_token", || {
            self.remote.get_invite_token(token_id)
        })
        .await?
        .ok_or(DomainError::TokenNotFound { id: token_id })?;
        if token.creator_id != me.id {
            return Err(DomainError::NotTokenOwner { id: token_id });
        }
        match token.status_at(Utc::now()) {
            InviteStatus::Revoked => return Err(DomainError::TokenRevoked { id: token_id }),
            InviteStatus::Claimed => return Err(DomainError::TokenClaimed { id: token_id }),
            InviteStatus::Active | InviteStatus::Expired => {}
        }

        let found = remote_call(&self.retry, "revoke_invite_token", || {
            self.remote.revoke_invite_token(token_id, Utc::now())
        })
        .await?;
        if !found {
            return Err(DomainError::TokenNotFound { id: token_id });
        }
        info!(%token_id, "invite revoked");
        Ok(())
    }

    #[instrument(name = "friend_link.invites.list_active", skip_all)]
    pub async fn list_active(&self, me: &SessionAccount) -> DomainResult<Vec<InviteToken>> {
        let now = Utc::now();
        let mut tokens: Vec<InviteToken> = remote_call(&self.retry, "invite_tokens_by_creator", || {
            self.remote.invite_tokens_by_creator(me.id)
        })
        .await?
        .into_iter()
        .filter(|t| t.status_at(now) == InviteStatus::Active)
        .collect();
        tokens.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(tokens)
    }

    /// Continuously re-validated view of one token.
    ///
    /// Emits the current validation immediately, then again whenever the
    /// token or the creator's expense data changes. The stream ends after a
    /// claimed, revoked or unknown token was reported, or when the consumer
    /// drops it.
    pub fn watch(&self, token_id: Uuid) -> ReceiverStream<InviteValidation> {
        let (tx, rx) = mpsc::channel(8);
        let service = self.clone();
        let changes = self.remote.changes();
        tokio::spawn(async move {
            service.watch_loop(token_id, changes, tx).await;
        });
        ReceiverStream::new(rx)
    }

    #[instrument(name = "friend_link.invites.watch", skip(self, changes, tx))]
    async fn watch_loop(
        &self,
        token_id: Uuid,
        mut changes: broadcast::Receiver<RemoteChange>,
        tx: mpsc::Sender<InviteValidation>,
    ) {
        let mut last: Option<InviteValidation> = None;
        let mut refresh = true;
        loop {
            if refresh {
                match self.validate(token_id).await {
                    Ok(v) => {
                        let finished = is_final(&v);
                        if last.as_ref() != Some(&v) {
                            if tx.send(v.clone()).await.is_err() {
                                return;
                            }
                            last = Some(v);
                        }
                        if finished {
                            debug!("invite watch finished");
                            return;
                        }
                    }
                    Err(e) => warn!(error = %e, "invite re-validation failed"),
                }
            }

            let creator = last
                .as_ref()
                .and_then(|v| v.token.as_ref())
                .map(|t| t.creator_email.clone());
            tokio::select! {
                _ = tx.closed() => return,
                change = changes.recv() => {
                    refresh = match change {
                        Ok(RemoteChange::InviteToken { id }) => id == token_id,
                        Ok(RemoteChange::Expenses { owner_email }) => {
                            creator.as_deref().map_or(true, |c| c == normalize_email(&owner_email))
                        }
                        Ok(RemoteChange::Groups) => true,
                        Ok(_) => false,
                        Err(broadcast::error::RecvError::Lagged(_)) => true,
                        Err(broadcast::error::RecvError::Closed) => return,
                    };
                }
            }
        }
    }
}

fn is_final(v: &InviteValidation) -> bool {
    match (&v.is_valid, &v.token) {
        (true, _) => false,
        (false, None) => true,
        (false, Some(t)) => matches!(
            t.status_at(Utc::now()),
            InviteStatus::Claimed | InviteStatus::Revoked
        ),
    }
}
