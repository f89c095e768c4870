//! In-process implementation of the remote store.
//!
//! All data sits behind one mutex, which makes every check-and-set atomic.
//! Failure injection (`set_offline`, `fail_next`) lets callers exercise the
//! retry and failure-tracking paths.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use sessionkit::Feed;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::contract::model::{
    AccountId, Expense, FriendRecord, FriendStatus, Group, InviteStatus, InviteToken, LinkRequest,
    LinkRequestStatus, LinkedAccount, MemberKey, SessionAccount,
};
use crate::domain::normalize::normalize_email;
use crate::domain::ports::{ClaimOutcome, RemoteChange, RemoteStore, TransitionOutcome};

#[derive(Default)]
struct State {
    accounts: HashMap<String, SessionAccount>,
    friends: HashMap<String, Vec<FriendRecord>>,
    groups: HashMap<Uuid, Group>,
    expenses: HashMap<Uuid, Expense>,
    link_requests: HashMap<Uuid, LinkRequest>,
    invite_tokens: HashMap<Uuid, InviteToken>,
}

impl State {
    fn group_visible_to(group: &Group, email: &str) -> bool {
        normalize_email(&group.owner_email) == email
            || group
                .members
                .iter()
                .filter_map(|m| m.account_email.as_deref())
                .any(|e| normalize_email(e) == email)
    }
}

pub struct InMemoryRemoteStore {
    state: Mutex<State>,
    offline: AtomicBool,
    injected: Mutex<HashMap<String, u32>>,
    calls: DashMap<String, u32>,
    feed: Feed<RemoteChange>,
}

impl Default for InMemoryRemoteStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRemoteStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            offline: AtomicBool::new(false),
            injected: Mutex::new(HashMap::new()),
            calls: DashMap::new(),
            feed: Feed::new(256),
        }
    }

    /// While offline every call fails with a transport error.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn is_offline(&self) -> bool {
        self.offline.load(Ordering::SeqCst)
    }

    /// Make the next `times` calls of `op` fail.
    pub fn fail_next(&self, op: &str, times: u32) {
        *self.injected.lock().entry(op.to_string()).or_insert(0) += times;
    }

    /// Drop every failure still queued by [`fail_next`](Self::fail_next).
    pub fn clear_injected(&self) {
        self.injected.lock().clear();
    }

    /// Number of attempts made for `op`, failed ones included.
    pub fn call_count(&self, op: &str) -> u32 {
        self.calls.get(op).map(|c| *c).unwrap_or(0)
    }

    /// Stored friend list of `owner_email`, as the remote sees it.
    pub fn friends_of(&self, owner_email: &str) -> Vec<FriendRecord> {
        self.state
            .lock()
            .friends
            .get(&normalize_email(owner_email))
            .cloned()
            .unwrap_or_default()
    }

    pub fn seed_friends(&self, owner_email: &str, friends: Vec<FriendRecord>) {
        let owner = normalize_email(owner_email);
        self.state.lock().friends.insert(owner.clone(), friends);
        self.feed.send(RemoteChange::Friends { owner_email: owner });
    }

    pub fn group(&self, id: Uuid) -> Option<Group> {
        self.state.lock().groups.get(&id).cloned()
    }

    /// Direct edit of a stored link request, bypassing the state machine.
    pub fn edit_link_request(&self, id: Uuid, edit: impl FnOnce(&mut LinkRequest)) -> bool {
        let found = self.state.lock().link_requests.get_mut(&id).map(edit).is_some();
        if found {
            self.feed.send(RemoteChange::LinkRequest { id });
        }
        found
    }

    /// Direct edit of a stored invite token, bypassing the claim protocol.
    pub fn edit_invite_token(&self, id: Uuid, edit: impl FnOnce(&mut InviteToken)) -> bool {
        let found = self.state.lock().invite_tokens.get_mut(&id).map(edit).is_some();
        if found {
            self.feed.send(RemoteChange::InviteToken { id });
        }
        found
    }

    fn check(&self, op: &str) -> anyhow::Result<()> {
        *self.calls.entry(op.to_string()).or_insert(0) += 1;
        if self.is_offline() {
            anyhow::bail!("remote store unreachable ({op})");
        }
        let mut injected = self.injected.lock();
        if let Some(left) = injected.get_mut(op) {
            if *left > 0 {
                *left -= 1;
                anyhow::bail!("injected failure ({op})");
            }
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for InMemoryRemoteStore {
    async fn lookup_account_by_email(&self, email: &str) -> anyhow::Result<Option<SessionAccount>> {
        self.check("lookup_account_by_email")?;
        Ok(self.state.lock().accounts.get(&normalize_email(email)).cloned())
    }

    async fn create_account(&self, email: &str, display_name: &str) -> anyhow::Result<SessionAccount> {
        self.check("create_account")?;
        let email = normalize_email(email);
        let mut state = self.state.lock();
        let account = state
            .accounts
            .entry(email.clone())
            .or_insert_with(|| SessionAccount {
                id: AccountId::new(),
                email,
                display_name: display_name.trim().to_string(),
            })
            .clone();
        Ok(account)
    }

    async fn update_linked_member(
        &self,
        owner_email: &str,
        member_key: MemberKey,
        account: &LinkedAccount,
        display_name: &str,
    ) -> anyhow::Result<()> {
        self.check("update_linked_member")?;
        let owner = normalize_email(owner_email);
        {
            let mut state = self.state.lock();
            let friends = state.friends.entry(owner.clone()).or_default();
            let now = Utc::now();
            let existing = friends
                .iter_mut()
                .find(|f| f.member_id == member_key || f.alias_member_ids.contains(&member_key));
            match existing {
                Some(record) => {
                    if !display_name.is_empty() && record.name != display_name {
                        if record.original_name.is_none() {
                            record.original_name = Some(record.name.clone());
                        }
                        record.name = display_name.to_string();
                    }
                    record.has_linked_account = true;
                    record.linked_account_id = account.id();
                    record.linked_account_email = account.email().map(str::to_string);
                    record.status = Some(FriendStatus::Friend);
                    record.updated_at = now;
                }
                None => friends.push(FriendRecord {
                    member_id: member_key,
                    name: display_name.to_string(),
                    nickname: None,
                    original_name: None,
                    has_linked_account: true,
                    linked_account_id: account.id(),
                    linked_account_email: account.email().map(str::to_string),
                    alias_member_ids: Vec::new(),
                    status: Some(FriendStatus::Friend),
                    updated_at: now,
                }),
            }
        }
        self.feed.send(RemoteChange::Friends { owner_email: owner });
        Ok(())
    }

    async fn fetch_friends(&self, owner_email: &str) -> anyhow::Result<Vec<FriendRecord>> {
        self.check("fetch_friends")?;
        Ok(self.friends_of(owner_email))
    }

    /// Upsert per member key; a pushed record older than the stored one is
    /// ignored and records missing from the push are kept.
    async fn sync_friends(&self, owner_email: &str, friends: &[FriendRecord]) -> anyhow::Result<()> {
        self.check("sync_friends")?;
        let owner = normalize_email(owner_email);
        {
            let mut state = self.state.lock();
            let stored = state.friends.entry(owner.clone()).or_default();
            for incoming in friends {
                match stored.iter_mut().find(|f| f.member_id == incoming.member_id) {
                    Some(current) if current.updated_at > incoming.updated_at => {}
                    Some(current) => *current = incoming.clone(),
                    None => stored.push(incoming.clone()),
                }
            }
        }
        self.feed.send(RemoteChange::Friends { owner_email: owner });
        Ok(())
    }

    async fn upsert_group(&self, group: &Group) -> anyhow::Result<()> {
        self.check("upsert_group")?;
        self.state.lock().groups.insert(group.id, group.clone());
        self.feed.send(RemoteChange::Groups);
        Ok(())
    }

    async fn delete_groups(&self, ids: &[Uuid]) -> anyhow::Result<()> {
        self.check("delete_groups")?;
        {
            let mut state = self.state.lock();
            for id in ids {
                state.groups.remove(id);
            }
        }
        self.feed.send(RemoteChange::Groups);
        Ok(())
    }

    async fn upsert_expense(&self, expense: &Expense) -> anyhow::Result<()> {
        self.check("upsert_expense")?;
        self.state.lock().expenses.insert(expense.id, expense.clone());
        self.feed.send(RemoteChange::Expenses {
            owner_email: normalize_email(&expense.owner_email),
        });
        Ok(())
    }

    async fn delete_expense(&self, id: Uuid) -> anyhow::Result<()> {
        self.check("delete_expense")?;
        let removed = self.state.lock().expenses.remove(&id);
        if let Some(expense) = removed {
            self.feed.send(RemoteChange::Expenses {
                owner_email: normalize_email(&expense.owner_email),
            });
        }
        Ok(())
    }

    async fn fetch_groups(&self, email: &str) -> anyhow::Result<Vec<Group>> {
        self.check("fetch_groups")?;
        let email = normalize_email(email);
        let mut groups: Vec<Group> = self
            .state
            .lock()
            .groups
            .values()
            .filter(|g| State::group_visible_to(g, &email))
            .cloned()
            .collect();
        groups.sort_by_key(|g| g.id);
        Ok(groups)
    }

    async fn groups_with_member(&self, member_key: MemberKey) -> anyhow::Result<Vec<Group>> {
        self.check("groups_with_member")?;
        let mut groups: Vec<Group> = self
            .state
            .lock()
            .groups
            .values()
            .filter(|g| g.has_member(member_key))
            .cloned()
            .collect();
        groups.sort_by_key(|g| g.id);
        Ok(groups)
    }

    /// Expenses owned by `owner_email` plus those of groups it can see.
    async fn fetch_expenses(&self, owner_email: &str) -> anyhow::Result<Vec<Expense>> {
        self.check("fetch_expenses")?;
        let email = normalize_email(owner_email);
        let state = self.state.lock();
        let mut expenses: Vec<Expense> = state
            .expenses
            .values()
            .filter(|e| {
                normalize_email(&e.owner_email) == email
                    || e.group_id
                        .and_then(|gid| state.groups.get(&gid))
                        .is_some_and(|g| State::group_visible_to(g, &email))
            })
            .cloned()
            .collect();
        expenses.sort_by(|a, b| a.date.cmp(&b.date).then(a.id.cmp(&b.id)));
        Ok(expenses)
    }

    async fn insert_link_request(&self, request: &LinkRequest) -> anyhow::Result<()> {
        self.check("insert_link_request")?;
        self.state
            .lock()
            .link_requests
            .insert(request.id, request.clone());
        self.feed.send(RemoteChange::LinkRequest { id: request.id });
        Ok(())
    }

    async fn get_link_request(&self, id: Uuid) -> anyhow::Result<Option<LinkRequest>> {
        self.check("get_link_request")?;
        Ok(self.state.lock().link_requests.get(&id).cloned())
    }

    async fn link_requests_for_recipient(&self, email: &str) -> anyhow::Result<Vec<LinkRequest>> {
        self.check("link_requests_for_recipient")?;
        let email = normalize_email(email);
        Ok(self
            .state
            .lock()
            .link_requests
            .values()
            .filter(|r| normalize_email(&r.recipient_email) == email)
            .cloned()
            .collect())
    }

    async fn link_requests_from_requester(&self, requester: AccountId) -> anyhow::Result<Vec<LinkRequest>> {
        self.check("link_requests_from_requester")?;
        Ok(self
            .state
            .lock()
            .link_requests
            .values()
            .filter(|r| r.requester_id == requester)
            .cloned()
            .collect())
    }

    async fn transition_link_request(
        &self,
        id: Uuid,
        to: LinkRequestStatus,
        at: DateTime<Utc>,
    ) -> anyhow::Result<TransitionOutcome> {
        self.check("transition_link_request")?;
        let outcome = {
            let mut state = self.state.lock();
            match state.link_requests.get_mut(&id) {
                None => TransitionOutcome::NotFound,
                Some(r) if r.status != LinkRequestStatus::Pending => {
                    TransitionOutcome::NotPending(r.status)
                }
                Some(r) => {
                    r.status = to;
                    if to == LinkRequestStatus::Rejected {
                        r.rejected_at = Some(at);
                    }
                    TransitionOutcome::Applied(r.clone())
                }
            }
        };
        if matches!(outcome, TransitionOutcome::Applied(_)) {
            self.feed.send(RemoteChange::LinkRequest { id });
        }
        Ok(outcome)
    }

    async fn insert_invite_token(&self, token: &InviteToken) -> anyhow::Result<()> {
        self.check("insert_invite_token")?;
        self.state
            .lock()
            .invite_tokens
            .insert(token.id, token.clone());
        self.feed.send(RemoteChange::InviteToken { id: token.id });
        Ok(())
    }

    async fn get_invite_token(&self, id: Uuid) -> anyhow::Result<Option<InviteToken>> {
        self.check("get_invite_token")?;
        Ok(self.state.lock().invite_tokens.get(&id).cloned())
    }

    async fn invite_tokens_by_creator(&self, creator: AccountId) -> anyhow::Result<Vec<InviteToken>> {
        self.check("invite_tokens_by_creator")?;
        Ok(self
            .state
            .lock()
            .invite_tokens
            .values()
            .filter(|t| t.creator_id == creator)
            .cloned()
            .collect())
    }

    async fn claim_invite_token(
        &self,
        id: Uuid,
        claimant: AccountId,
        at: DateTime<Utc>,
    ) -> anyhow::Result<ClaimOutcome> {
        self.check("claim_invite_token")?;
        tokio::task::yield_now().await;
        let outcome = {
            let mut state = self.state.lock();
            match state.invite_tokens.get_mut(&id) {
                None => ClaimOutcome::NotFound,
                Some(token) => match token.status_at(at) {
                    InviteStatus::Revoked => ClaimOutcome::Revoked,
                    InviteStatus::Claimed => ClaimOutcome::AlreadyClaimed,
                    InviteStatus::Expired => ClaimOutcome::Expired,
                    InviteStatus::Active => {
                        token.claimed_by = Some(claimant);
                        token.claimed_at = Some(at);
                        ClaimOutcome::Claimed(token.clone())
                    }
                },
            }
        };
        if matches!(outcome, ClaimOutcome::Claimed(_)) {
            self.feed.send(RemoteChange::InviteToken { id });
        }
        Ok(outcome)
    }

    async fn revoke_invite_token(&self, id: Uuid, at: DateTime<Utc>) -> anyhow::Result<bool> {
        self.check("revoke_invite_token")?;
        let found = {
            let mut state = self.state.lock();
            match state.invite_tokens.get_mut(&id) {
                Some(token) => {
                    token.revoked_at.get_or_insert(at);
                    true
                }
                None => false,
            }
        };
        if found {
            self.feed.send(RemoteChange::InviteToken { id });
        }
        Ok(found)
    }

    fn changes(&self) -> broadcast::Receiver<RemoteChange> {
        self.feed.subscribe()
    }
}
