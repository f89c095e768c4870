use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::contract::model::{AccountFriend, AccountId, MemberKey};

/// Session-scoped rate limiter for reconciliation passes.
#[derive(Debug, Clone)]
pub struct ReconciliationState {
    min_interval: Duration,
    last_reconciled: Option<Instant>,
}

impl ReconciliationState {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_reconciled: None,
        }
    }

    pub fn should_reconcile(&self) -> bool {
        self.should_reconcile_at(Instant::now())
    }

    pub fn should_reconcile_at(&self, now: Instant) -> bool {
        match self.last_reconciled {
            None => true,
            Some(at) => now.saturating_duration_since(at) >= self.min_interval,
        }
    }

    pub fn mark_reconciled(&mut self) {
        self.mark_reconciled_at(Instant::now());
    }

    pub fn mark_reconciled_at(&mut self, at: Instant) {
        self.last_reconciled = Some(at);
    }

    /// Forget the last pass so the next check asks for a new one.
    pub fn invalidate(&mut self) {
        self.last_reconciled = None;
    }

    pub fn last_reconciled(&self) -> Option<Instant> {
        self.last_reconciled
    }
}

/// Case-insensitive display-name order, member key as tie-break.
pub fn sort_for_display(friends: &mut [AccountFriend]) {
    friends.sort_by(|a, b| {
        a.display_name()
            .to_lowercase()
            .cmp(&b.display_name().to_lowercase())
            .then_with(|| a.member_key.cmp(&b.member_key))
    });
}

/// Remote-wins merge of the local and remote friend lists.
///
/// A key present on both sides takes the remote record unchanged; keys known
/// to one side only are kept.
pub fn reconcile(local: &[AccountFriend], remote: &[AccountFriend]) -> Vec<AccountFriend> {
    let mut merged: HashMap<MemberKey, AccountFriend> = remote
        .iter()
        .map(|f| (f.member_key, f.clone()))
        .collect();
    for friend in local {
        merged
            .entry(friend.member_key)
            .or_insert_with(|| friend.clone());
    }
    let mut out: Vec<AccountFriend> = merged.into_values().collect();
    sort_for_display(&mut out);
    out
}

/// Keys present locally but missing from the remote list.
pub fn local_only(local: &[AccountFriend], remote: &[AccountFriend]) -> Vec<AccountFriend> {
    local
        .iter()
        .filter(|l| !remote.iter().any(|r| r.member_key == l.member_key))
        .cloned()
        .collect()
}

/// Whether a queued link side effect still describes the current state:
/// a record for `member_key` exists and is linked to `account_id`.
pub fn validate_link_completion(
    member_key: MemberKey,
    account_id: AccountId,
    friends: &[AccountFriend],
) -> bool {
    friends
        .iter()
        .find(|f| f.answers_to(member_key))
        .is_some_and(|f| f.link.account_id() == Some(account_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::model::LinkedAccount;

    fn linked(key: MemberKey, name: &str, id: AccountId) -> AccountFriend {
        AccountFriend::new(key, name).linked_to(LinkedAccount::full(id, "z@example.com"))
    }

    #[test]
    fn remote_wins_on_shared_keys() {
        let key = MemberKey::new();
        let (local_id, remote_id) = (AccountId::new(), AccountId::new());
        let merged = reconcile(
            &[linked(key, "Local", local_id)],
            &[linked(key, "Remote", remote_id)],
        );
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].link.account_id(), Some(remote_id));
        assert_eq!(merged[0].name, "Remote");
    }

    #[test]
    fn one_sided_keys_survive_and_output_is_sorted() {
        let local = vec![AccountFriend::new(MemberKey::new(), "zed")];
        let remote = vec![
            AccountFriend::new(MemberKey::new(), "Bea"),
            AccountFriend::new(MemberKey::new(), "al"),
        ];
        let names: Vec<_> = reconcile(&local, &remote).into_iter().map(|f| f.name).collect();
        assert_eq!(names, vec!["al", "Bea", "zed"]);
        assert_eq!(local_only(&local, &remote).len(), 1);
    }

    #[test]
    fn unlinked_remote_overrides_linked_local() {
        let key = MemberKey::new();
        let merged = reconcile(
            &[linked(key, "Cy", AccountId::new())],
            &[AccountFriend::new(key, "Cy")],
        );
        assert!(!merged[0].link.is_linked());
    }

    #[test]
    fn rate_limit_and_invalidate() {
        let mut state = ReconciliationState::new(Duration::from_secs(300));
        assert!(state.should_reconcile());

        let t0 = Instant::now();
        state.mark_reconciled_at(t0);
        assert!(!state.should_reconcile_at(t0));
        assert!(!state.should_reconcile_at(t0 + Duration::from_secs(299)));
        assert!(state.should_reconcile_at(t0 + Duration::from_secs(300)));

        state.invalidate();
        assert!(state.should_reconcile_at(t0));
    }

    #[test]
    fn link_completion_requires_matching_account() {
        let (key, alias) = (MemberKey::new(), MemberKey::new());
        let id = AccountId::new();
        let friends = vec![linked(key, "Di", id).with_aliases([alias])];
        assert!(validate_link_completion(key, id, &friends));
        assert!(validate_link_completion(alias, id, &friends));
        assert!(!validate_link_completion(key, AccountId::new(), &friends));
        assert!(!validate_link_completion(MemberKey::new(), id, &friends));

        let unlinked = vec![AccountFriend::new(key, "Di")];
        assert!(!validate_link_completion(key, id, &unlinked));
    }
}
