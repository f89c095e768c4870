//! Session-scoped owner of one signed-in account's friend, group and
//! expense state.
//!
//! State lives behind a synchronous mutex that is never held across an
//! await: remote I/O runs outside the lock and rejoins it to apply results.

use chrono::Utc;
use parking_lot::Mutex;
use sessionkit::{StopReason, TaskSlot};
use std::collections::HashSet;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::FriendLinkConfig;
use crate::contract::model::{
    AccountFriend, Expense, FailureRecord, FriendRecord, GeneratedInvite, Group, InviteToken,
    InviteValidation, LinkAcceptResult, LinkRequest, LinkedAccount, MemberKey, SelfIdentity,
    SessionAccount,
};
use crate::domain::alias::stale_self_keys;
use crate::domain::error::{DomainError, DomainResult};
use crate::domain::failures::{FailureTracker, RetrySummary};
use crate::domain::fanout::fanout_targets;
use crate::domain::friends::FriendStore;
use crate::domain::invites::InviteService;
use crate::domain::link_requests::LinkRequestService;
use crate::domain::normalize::normalize_email;
use crate::domain::pending::PendingWrites;
use crate::domain::ports::{CachedData, LocalCache, RemoteChange, RemoteStore};
use crate::domain::reconcile::{local_only, reconcile, ReconciliationState};
use crate::domain::remote_call;

const TASK_STOP_TIMEOUT: Duration = Duration::from_secs(2);

struct SessionState {
    me: SelfIdentity,
    friends: FriendStore,
    groups: Vec<Group>,
    expenses: Vec<Expense>,
    pending_groups: PendingWrites<Group>,
    pending_expenses: PendingWrites<Expense>,
}

impl SessionState {
    fn cached(&self) -> CachedData {
        CachedData {
            groups: self.groups.clone(),
            expenses: self.expenses.clone(),
            friends: self
                .friends
                .friend_members()
                .iter()
                .map(FriendRecord::from)
                .collect(),
        }
    }
}

struct Inner {
    config: FriendLinkConfig,
    remote: Arc<dyn RemoteStore>,
    cache: Arc<dyn LocalCache>,
    requests: LinkRequestService,
    invites: InviteService,
    failures: FailureTracker,
    state: Mutex<Option<SessionState>>,
    reconciliation: Mutex<ReconciliationState>,
    friend_sync: TaskSlot,
    remote_reload: TaskSlot,
    wake: Arc<Notify>,
    side_effects: Mutex<Vec<JoinHandle<()>>>,
    /// Friend keys whose link propagation is still running.
    in_flight: Mutex<HashSet<MemberKey>>,
}

/// Controller for one signed-in account.
#[derive(Clone)]
pub struct LinkSession {
    inner: Arc<Inner>,
}

impl LinkSession {
    pub fn new(
        config: FriendLinkConfig,
        remote: Arc<dyn RemoteStore>,
        cache: Arc<dyn LocalCache>,
    ) -> anyhow::Result<Self> {
        config.validate()?;
        let requests = LinkRequestService::new(
            remote.clone(),
            config.link_request_ttl_chrono(),
            config.retry.clone(),
        );
        let invites = InviteService::new(
            remote.clone(),
            config.invite_ttl_chrono(),
            config.invite_base()?,
            config.retry.clone(),
        );
        let failures = FailureTracker::new(config.max_failure_attempts);
        let reconciliation = ReconciliationState::new(config.reconcile_min_interval);
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                remote,
                cache,
                requests,
                invites,
                failures,
                state: Mutex::new(None),
                reconciliation: Mutex::new(reconciliation),
                friend_sync: TaskSlot::new("friend_sync"),
                remote_reload: TaskSlot::new("remote_reload"),
                wake: Arc::new(Notify::new()),
                side_effects: Mutex::new(Vec::new()),
                in_flight: Mutex::new(HashSet::new()),
            }),
        })
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut SessionState) -> R) -> DomainResult<R> {
        let mut guard = self.inner.state.lock();
        let state = guard.as_mut().ok_or(DomainError::NoSession)?;
        Ok(f(state))
    }

    fn account(&self) -> DomainResult<SessionAccount> {
        self.with_state(|s| s.me.account.clone())
    }

    fn retry(&self) -> &sessionkit::RetryPolicy {
        &self.inner.config.retry
    }

    pub fn is_signed_in(&self) -> bool {
        self.inner.state.lock().is_some()
    }

    // ----- lifecycle ---------------------------------------------------------

    /// Resolve (or register) the account, load the local cache and start the
    /// background tasks. A previous session is torn down first.
    #[instrument(name = "friend_link.session.sign_in", skip(self, email, display_name), fields(email = %email))]
    pub async fn sign_in(
        &self,
        email: &str,
        display_name: &str,
        self_member_key: MemberKey,
    ) -> DomainResult<SessionAccount> {
        if self.is_signed_in() {
            self.sign_out_inner(false).await;
        }

        let email = normalize_email(email);
        let existing = remote_call(self.retry(), "lookup_account_by_email", || {
            self.inner.remote.lookup_account_by_email(&email)
        })
        .await?;
        let account = match existing {
            Some(account) => account,
            None => {
                remote_call(self.retry(), "create_account", || {
                    self.inner.remote.create_account(&email, display_name)
                })
                .await?
            }
        };

        let cached = match self.inner.cache.load().await {
            Ok(data) => data,
            Err(e) => {
                warn!(error = %e, "local cache unreadable; starting empty");
                CachedData::default()
            }
        };

        let me = SelfIdentity::new(account.clone(), self_member_key, display_name);
        let friends: Vec<AccountFriend> = cached.friends.into_iter().map(AccountFriend::from).collect();
        let state = SessionState {
            friends: FriendStore::new(friends, &me),
            me,
            groups: cached.groups,
            expenses: cached.expenses,
            pending_groups: PendingWrites::default(),
            pending_expenses: PendingWrites::default(),
        };
        *self.inner.state.lock() = Some(state);
        self.inner.reconciliation.lock().invalidate();

        self.start_friend_sync();
        self.start_remote_reload();
        info!(account_id = %account.id, "signed in");
        Ok(account)
    }

    /// Cancel background work and drop every piece of session state,
    /// including the local cache.
    #[instrument(name = "friend_link.session.sign_out", skip(self))]
    pub async fn sign_out(&self) {
        self.sign_out_inner(true).await;
        info!("signed out");
    }

    async fn sign_out_inner(&self, clear_cache: bool) {
        for slot in [&self.inner.friend_sync, &self.inner.remote_reload] {
            if slot.stop(TASK_STOP_TIMEOUT).await == StopReason::Timeout {
                warn!(task = slot.name(), "background task did not stop in time");
            }
        }
        let handles = std::mem::take(&mut *self.inner.side_effects.lock());
        for handle in handles {
            handle.abort();
        }
        self.inner.in_flight.lock().clear();
        *self.inner.state.lock() = None;
        self.inner.failures.clear();
        self.inner.reconciliation.lock().invalidate();
        if clear_cache {
            if let Err(e) = self.inner.cache.clear().await {
                warn!(error = %e, "failed to clear local cache");
            }
        }
    }

    /// Signal from the host that connectivity is back.
    pub fn network_recovered(&self) {
        debug!("network recovered; scheduling reconciliation");
        self.invalidate();
    }

    /// Make the next reconciliation check pass and wake the sync task.
    pub fn invalidate(&self) {
        self.inner.reconciliation.lock().invalidate();
        self.inner.wake.notify_one();
    }

    pub fn should_reconcile(&self) -> bool {
        self.inner.reconciliation.lock().should_reconcile()
    }

    /// Wait for every spawned link side effect to settle.
    pub async fn flush_side_effects(&self) {
        loop {
            let handles = std::mem::take(&mut *self.inner.side_effects.lock());
            if handles.is_empty() {
                return;
            }
            for handle in handles {
                let _ = handle.await;
            }
        }
    }

    fn start_friend_sync(&self) {
        let weak = Arc::downgrade(&self.inner);
        let wake = self.inner.wake.clone();
        let changes = self.inner.remote.changes();
        self.inner
            .friend_sync
            .replace(move |cancel| friend_sync_loop(weak, wake, changes, cancel));
    }

    fn start_remote_reload(&self) {
        let weak = Arc::downgrade(&self.inner);
        let changes = self.inner.remote.changes();
        self.inner
            .remote_reload
            .replace(move |cancel| remote_reload_loop(weak, changes, cancel));
    }

    // ----- reconciliation ----------------------------------------------------

    /// Fetch the remote friend list, merge remote-wins, dedup, retry pending
    /// link failures and mark the pass done.
    #[instrument(name = "friend_link.session.reconcile", skip(self))]
    pub async fn reconcile_now(&self) -> DomainResult<()> {
        let email = self.account()?.email;

        let remote: Vec<AccountFriend> = remote_call(self.retry(), "fetch_friends", || {
            self.inner.remote.fetch_friends(&email)
        })
        .await?
        .into_iter()
        .map(AccountFriend::from)
        .collect();

        // Keys with a queued or running side effect may be ahead of the remote.
        let mut propagating: HashSet<MemberKey> = self
            .inner
            .failures
            .pending()
            .into_iter()
            .map(|r| r.member_key)
            .collect();
        propagating.extend(self.inner.in_flight.lock().iter().copied());

        // Merge against the local list as it is now, not as it was before the fetch.
        let (records, push) = self.with_state(|s| {
            let local = s.friends.records();
            // Remote wins unless it is an older copy of a link still propagating.
            let remote: Vec<AccountFriend> = remote
                .into_iter()
                .filter(|r| !(propagating.contains(&r.member_key) && local_is_newer(&local, r)))
                .collect();
            let push = !local_only(&local, &remote).is_empty();
            s.friends.rebuild(reconcile(&local, &remote), &s.me);
            (s.friends.records(), push)
        })?;

        if push {
            let payload: Vec<FriendRecord> = records.iter().map(FriendRecord::from).collect();
            if let Err(e) = remote_call(self.retry(), "sync_friends", || {
                self.inner.remote.sync_friends(&email, &payload)
            })
            .await
            {
                warn!(error = %e, "pushing local-only friends failed");
            }
        }

        let summary = self
            .inner
            .failures
            .retry_pending(&records, |record| {
                let session = self.clone();
                async move { session.propagate_link(&record).await }
            })
            .await;
        if summary != RetrySummary::default() {
            debug!(?summary, "failure retry pass");
        }

        self.persist().await;
        self.inner.reconciliation.lock().mark_reconciled();
        Ok(())
    }

    // ----- link requests -----------------------------------------------------

    pub async fn create_link_request(
        &self,
        recipient_email: &str,
        target_member_key: MemberKey,
        target_member_name: &str,
    ) -> DomainResult<LinkRequest> {
        let (me, friends) = self.with_state(|s| (s.me.account.clone(), s.friends.records()))?;
        self.inner
            .requests
            .create(&me, recipient_email, target_member_key, target_member_name, &friends)
            .await
    }

    pub async fn incoming_link_requests(&self) -> DomainResult<Vec<LinkRequest>> {
        let me = self.account()?;
        self.inner.requests.incoming(&me).await
    }

    pub async fn outgoing_link_requests(&self) -> DomainResult<Vec<LinkRequest>> {
        let me = self.account()?;
        self.inner.requests.outgoing(&me).await
    }

    pub async fn previous_link_requests(&self) -> DomainResult<Vec<LinkRequest>> {
        let me = self.account()?;
        self.inner.requests.previous(&me).await
    }

    pub async fn accept_link_request(&self, request_id: Uuid) -> DomainResult<LinkAcceptResult> {
        let me = self.account()?;
        let (result, request) = self.inner.requests.accept(&me, request_id).await?;
        let counterpart = LinkedAccount::full(request.requester_id, request.requester_email.clone());
        self.complete_link(&result, counterpart, &request.requester_name)?;
        Ok(result)
    }

    pub async fn decline_link_request(&self, request_id: Uuid) -> DomainResult<()> {
        let me = self.account()?;
        self.inner.requests.decline(&me, request_id).await
    }

    pub async fn cancel_link_request(&self, request_id: Uuid) -> DomainResult<()> {
        let me = self.account()?;
        self.inner.requests.cancel(&me, request_id).await
    }

    // ----- invite tokens -----------------------------------------------------

    pub async fn generate_invite(
        &self,
        target_member_key: MemberKey,
        target_member_name: &str,
    ) -> DomainResult<GeneratedInvite> {
        let (me, own_key, friends) =
            self.with_state(|s| (s.me.account.clone(), s.me.member_key, s.friends.records()))?;
        self.inner
            .invites
            .generate(&me, own_key, target_member_key, target_member_name, &friends)
            .await
    }

    /// Needs no session: the recipient may not be signed in yet.
    pub async fn validate_invite(&self, token_id: Uuid) -> DomainResult<InviteValidation> {
        self.inner.invites.validate(token_id).await
    }

    pub fn watch_invite(&self, token_id: Uuid) -> ReceiverStream<InviteValidation> {
        self.inner.invites.watch(token_id)
    }

    pub async fn claim_invite(&self, token_id: Uuid) -> DomainResult<LinkAcceptResult> {
        let me = self.account()?;
        let (result, token) = self.inner.invites.claim(&me, token_id).await?;
        let counterpart = LinkedAccount::full(token.creator_id, token.creator_email.clone());
        self.complete_link(&result, counterpart, &token.creator_name)?;
        Ok(result)
    }

    pub async fn revoke_invite(&self, token_id: Uuid) -> DomainResult<()> {
        let me = self.account()?;
        self.inner.invites.revoke(&me, token_id).await
    }

    pub async fn active_invites(&self) -> DomainResult<Vec<InviteToken>> {
        let me = self.account()?;
        self.inner.invites.list_active(&me).await
    }

    // ----- link completion ---------------------------------------------------

    /// Local half of a successful accept or claim: adopt the represented key
    /// as an equivalent of "me", link the counterpart friend, then spawn the
    /// remote side effects.
    fn complete_link(
        &self,
        result: &LinkAcceptResult,
        counterpart: LinkedAccount,
        counterpart_name: &str,
    ) -> DomainResult<()> {
        let counterpart_email = counterpart.email().unwrap_or_default().to_string();
        let counterpart_id = counterpart.id();
        let friend_key = self.with_state(|s| {
            s.me.merge_equivalent(result.member_key);
            let key = s
                .friends
                .find_by_account(counterpart_id, Some(counterpart_email.as_str()))
                .map(|f| f.member_key)
                .or_else(|| {
                    s.groups
                        .iter()
                        .flat_map(|g| g.members.iter())
                        .find(|m| {
                            m.account_email
                                .as_deref()
                                .is_some_and(|e| normalize_email(e) == counterpart_email)
                        })
                        .map(|m| m.member_key)
                })
                .unwrap_or_default();
            s.friends
                .apply_link(key, counterpart_name, counterpart.clone(), Some(counterpart_name), &s.me)
                .member_key
        })?;
        self.invalidate();

        let Some(counterpart_id) = counterpart_id else {
            return Ok(());
        };
        let record = FailureRecord {
            member_key: friend_key,
            linked_account_id: counterpart_id,
            linked_account_email: counterpart_email,
            represented_member_key: result.member_key,
            reason: String::new(),
            retry_count: 0,
            recorded_at: Utc::now(),
        };

        self.inner.in_flight.lock().insert(friend_key);
        let session = self.clone();
        let handle = tokio::spawn(async move {
            let key = record.member_key;
            if let Err(e) = session.propagate_link(&record).await {
                warn!(member_key = %key, error = %e, "link propagation failed; queued for retry");
                if session.is_signed_in() {
                    session.inner.failures.record(FailureRecord {
                        reason: e.to_string(),
                        recorded_at: Utc::now(),
                        ..record
                    });
                }
            }
            session.inner.in_flight.lock().remove(&key);
        });
        let mut effects = self.inner.side_effects.lock();
        effects.retain(|h| !h.is_finished());
        effects.push(handle);
        Ok(())
    }

    /// Remote half of a link: push my friend list, re-push records that
    /// reference the represented key, and update the counterpart and every
    /// account sharing a group with both parties.
    #[instrument(
        name = "friend_link.session.propagate_link",
        skip(self, record),
        fields(member_key = %record.member_key, represented = %record.represented_member_key)
    )]
    async fn propagate_link(&self, record: &FailureRecord) -> anyhow::Result<()> {
        let (me, friends) = self.with_state(|s| (s.me.account.clone(), s.friends.records()))?;
        let represented = record.represented_member_key;

        // (a) my own friend record for the counterpart
        let payload: Vec<FriendRecord> = friends.iter().map(FriendRecord::from).collect();
        remote_call(self.retry(), "sync_friends", || {
            self.inner.remote.sync_friends(&me.email, &payload)
        })
        .await?;

        // (b) groups and expenses referencing the represented key
        let groups = remote_call(self.retry(), "groups_with_member", || {
            self.inner.remote.groups_with_member(represented)
        })
        .await?;
        for group in &groups {
            let mut updated = group.clone();
            let mut changed = false;
            for m in updated.members.iter_mut().filter(|m| m.member_key == represented) {
                if m.account_email.as_deref().map(normalize_email) != Some(me.email.clone()) {
                    m.account_email = Some(me.email.clone());
                    changed = true;
                }
            }
            if changed {
                updated.updated_at = Utc::now();
                remote_call(self.retry(), "upsert_group", || {
                    self.inner.remote.upsert_group(&updated)
                })
                .await?;
            }
        }
        let expenses: Vec<Expense> = self.with_state(|s| {
            s.expenses
                .iter()
                .filter(|e| e.involves(represented))
                .cloned()
                .collect()
        })?;
        for expense in &expenses {
            remote_call(self.retry(), "upsert_expense", || {
                self.inner.remote.upsert_expense(expense)
            })
            .await?;
        }

        // (c) counterpart plus transitive fan-out
        let mut targets = fanout_targets(&groups, represented, &record.linked_account_email, &me.email);
        targets.insert(normalize_email(&record.linked_account_email));
        let linked = me_as_linked(&me);
        for owner in &targets {
            remote_call(self.retry(), "update_linked_member", || {
                self.inner
                    .remote
                    .update_linked_member(owner, represented, &linked, &me.display_name)
            })
            .await?;
        }
        debug!(targets = targets.len(), "link propagated");
        Ok(())
    }

    // ----- groups & expenses -------------------------------------------------

    pub async fn save_group(&self, group: Group) -> DomainResult<()> {
        self.with_state(|s| {
            s.pending_groups.mark_upsert(group.id);
            upsert_by_id(&mut s.groups, group.clone(), |g| g.id);
        })?;
        self.persist().await;
        if let Err(e) = remote_call(self.retry(), "upsert_group", || {
            self.inner.remote.upsert_group(&group)
        })
        .await
        {
            warn!(group_id = %group.id, error = %e, "group push failed; kept locally");
        }
        Ok(())
    }

    pub async fn delete_groups(&self, ids: &[Uuid]) -> DomainResult<()> {
        self.with_state(|s| {
            for id in ids {
                s.pending_groups.mark_delete(*id);
            }
            s.groups.retain(|g| !ids.contains(&g.id));
        })?;
        self.persist().await;
        if let Err(e) = remote_call(self.retry(), "delete_groups", || {
            self.inner.remote.delete_groups(ids)
        })
        .await
        {
            warn!(error = %e, "group delete push failed; kept locally");
        }
        Ok(())
    }

    pub async fn save_expense(&self, expense: Expense) -> DomainResult<()> {
        self.with_state(|s| {
            s.pending_expenses.mark_upsert(expense.id);
            upsert_by_id(&mut s.expenses, expense.clone(), |e| e.id);
        })?;
        self.persist().await;
        if let Err(e) = remote_call(self.retry(), "upsert_expense", || {
            self.inner.remote.upsert_expense(&expense)
        })
        .await
        {
            warn!(expense_id = %expense.id, error = %e, "expense push failed; kept locally");
        }
        Ok(())
    }

    pub async fn delete_expense(&self, id: Uuid) -> DomainResult<()> {
        self.with_state(|s| {
            s.pending_expenses.mark_delete(id);
            s.expenses.retain(|e| e.id != id);
        })?;
        self.persist().await;
        if let Err(e) = remote_call(self.retry(), "delete_expense", || {
            self.inner.remote.delete_expense(id)
        })
        .await
        {
            warn!(expense_id = %id, error = %e, "expense delete push failed; kept locally");
        }
        Ok(())
    }

    /// Merge a delivered snapshot against pending local writes.
    pub async fn apply_remote_snapshot(
        &self,
        groups: Vec<Group>,
        expenses: Vec<Expense>,
    ) -> DomainResult<()> {
        self.with_state(|s| {
            s.groups = s.pending_groups.merge_snapshot(&s.groups, groups);
            s.expenses = s.pending_expenses.merge_snapshot(&s.expenses, expenses);
            let stale = stale_self_keys(&s.groups, &s.me);
            if !stale.is_empty() {
                debug!(count = stale.len(), "folding group members into own identity");
                for key in stale {
                    s.me.merge_equivalent(key);
                }
                let records = s.friends.records();
                s.friends.rebuild(records, &s.me);
            }
        })?;
        self.persist().await;
        Ok(())
    }

    async fn reload_remote_data(&self) -> DomainResult<()> {
        let email = self.account()?.email;
        let groups = remote_call(self.retry(), "fetch_groups", || {
            self.inner.remote.fetch_groups(&email)
        })
        .await?;
        let expenses = remote_call(self.retry(), "fetch_expenses", || {
            self.inner.remote.fetch_expenses(&email)
        })
        .await?;
        self.apply_remote_snapshot(groups, expenses).await
    }

    async fn persist(&self) {
        let Ok(data) = self.with_state(|s| s.cached()) else {
            return;
        };
        if let Err(e) = self.inner.cache.save(&data).await {
            warn!(error = %e, "failed to persist local cache");
        }
    }

    // ----- queries -----------------------------------------------------------

    pub fn identity(&self) -> DomainResult<SelfIdentity> {
        self.with_state(|s| s.me.clone())
    }

    pub fn friend_members(&self) -> DomainResult<Vec<AccountFriend>> {
        self.with_state(|s| s.friends.records())
    }

    pub fn confirmed_friend_members(&self) -> DomainResult<Vec<AccountFriend>> {
        self.with_state(|s| s.friends.confirmed_friend_members())
    }

    pub fn are_same_person(&self, a: MemberKey, b: MemberKey) -> DomainResult<bool> {
        self.with_state(|s| s.friends.are_same_person(a, b))
    }

    pub fn canonical_member_key(&self, key: MemberKey) -> DomainResult<MemberKey> {
        self.with_state(|s| s.friends.canonical_key(key))
    }

    pub fn failure_records(&self) -> Vec<FailureRecord> {
        self.inner.failures.pending()
    }

    pub fn groups(&self) -> DomainResult<Vec<Group>> {
        self.with_state(|s| s.groups.clone())
    }

    pub fn expenses(&self) -> DomainResult<Vec<Expense>> {
        self.with_state(|s| s.expenses.clone())
    }

    /// Insert or replace a friend locally, through the dedup pass.
    pub fn upsert_friend(&self, friend: AccountFriend) -> DomainResult<()> {
        self.with_state(|s| s.friends.upsert(friend, &s.me))
    }
}

fn local_is_newer(local: &[AccountFriend], remote: &AccountFriend) -> bool {
    local
        .iter()
        .find(|l| l.member_key == remote.member_key)
        .is_some_and(|l| l.updated_at > remote.updated_at)
}

fn me_as_linked(me: &SessionAccount) -> LinkedAccount {
    LinkedAccount::full(me.id, me.email.clone())
}

fn upsert_by_id<T>(items: &mut Vec<T>, item: T, id: impl Fn(&T) -> Uuid) {
    let key = id(&item);
    match items.iter_mut().find(|i| id(i) == key) {
        Some(slot) => *slot = item,
        None => items.push(item),
    }
}

// ----- background tasks ------------------------------------------------------

async fn friend_sync_loop(
    inner: Weak<Inner>,
    wake: Arc<Notify>,
    mut changes: broadcast::Receiver<RemoteChange>,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    loop {
        let Some(strong) = inner.upgrade() else {
            return Ok(());
        };
        let session = LinkSession { inner: strong };
        if session.should_reconcile() {
            if let Err(e) = session.reconcile_now().await {
                warn!(error = %e, "background reconciliation failed");
                // stay rate-limited instead of spinning while offline
                session.inner.reconciliation.lock().mark_reconciled();
            }
        }
        let email = session.account().map(|a| a.email).unwrap_or_default();
        drop(session);

        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            _ = wake.notified() => {}
            change = changes.recv() => match change {
                Ok(RemoteChange::Friends { owner_email }) if normalize_email(&owner_email) == email => {
                    debug!("remote friend list changed");
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(n)) => debug!(skipped = n, "change feed lagged"),
                Err(broadcast::error::RecvError::Closed) => return Ok(()),
            },
        }
    }
}

async fn remote_reload_loop(
    inner: Weak<Inner>,
    mut changes: broadcast::Receiver<RemoteChange>,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let mut reload = true;
    loop {
        if reload {
            let Some(strong) = inner.upgrade() else {
                return Ok(());
            };
            let session = LinkSession { inner: strong };
            if let Err(e) = session.reload_remote_data().await {
                warn!(error = %e, "remote data reload failed");
            }
        }
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            change = changes.recv() => {
                reload = match change {
                    Ok(RemoteChange::Groups | RemoteChange::Expenses { .. }) => true,
                    Ok(_) => false,
                    Err(broadcast::error::RecvError::Lagged(_)) => true,
                    Err(broadcast::error::RecvError::Closed) => return Ok(()),
                };
            }
        }
    }
}
