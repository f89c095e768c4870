use crate::contract::model::{
    AccountFriend, AccountId, FriendStatus, LinkState, LinkedAccount, MemberKey, SelfIdentity,
};
use crate::domain::alias::{resolve_aliases, AliasResolution};
use crate::domain::reconcile::sort_for_display;

/// The owner's deduplicated friend list.
///
/// Every mutation goes back through the alias resolver, so the list and the
/// alias map are always derived from the same input.
#[derive(Debug, Clone, Default)]
pub struct FriendStore {
    resolution: AliasResolution,
}

impl FriendStore {
    pub fn new(friends: Vec<AccountFriend>, owner: &SelfIdentity) -> Self {
        let mut store = Self::default();
        store.rebuild(friends, owner);
        store
    }

    /// Replace the whole list.
    pub fn rebuild(&mut self, friends: Vec<AccountFriend>, owner: &SelfIdentity) {
        let mut resolution = resolve_aliases(&friends, Some(owner));
        sort_for_display(&mut resolution.masters);
        self.resolution = resolution;
    }

    /// Insert or replace one record, then re-run the dedup pass.
    /// Aliases of the replaced record are kept.
    pub fn upsert(&mut self, mut friend: AccountFriend, owner: &SelfIdentity) {
        if let Some(prev) = self
            .resolution
            .masters
            .iter()
            .find(|f| f.member_key == friend.member_key)
        {
            for alias in prev.aliases() {
                friend.add_alias(*alias);
            }
        }
        let mut all: Vec<AccountFriend> = self
            .resolution
            .masters
            .iter()
            .filter(|f| f.member_key != friend.member_key)
            .cloned()
            .collect();
        all.push(friend);
        self.rebuild(all, owner);
    }

    /// Mark `member_key` (or the master it belongs to) as linked to `account`.
    ///
    /// Creates the record when the key is unknown. Returns the stored master.
    pub fn apply_link(
        &mut self,
        member_key: MemberKey,
        fallback_name: &str,
        account: LinkedAccount,
        display_name: Option<&str>,
        owner: &SelfIdentity,
    ) -> AccountFriend {
        let mut friend = self
            .resolution
            .master(member_key)
            .cloned()
            .unwrap_or_else(|| AccountFriend::new(member_key, fallback_name));

        if let Some(name) = display_name.filter(|n| !n.trim().is_empty()) {
            if friend.name != name {
                if friend.original_name.is_none() {
                    friend.original_name = Some(friend.name.clone());
                }
                friend.name = name.to_string();
            }
        }
        friend.link = LinkState::Linked(account);
        friend.status = Some(FriendStatus::Friend);
        friend.add_alias(member_key);
        friend.updated_at = chrono::Utc::now();

        let key = friend.member_key;
        self.upsert(friend, owner);
        self.resolution
            .master(key)
            .cloned()
            .unwrap_or_else(|| AccountFriend::new(key, fallback_name))
    }

    pub fn friend_members(&self) -> &[AccountFriend] {
        &self.resolution.masters
    }

    /// Linked friends whose status is neither pending nor rejected.
    pub fn confirmed_friend_members(&self) -> Vec<AccountFriend> {
        self.resolution
            .masters
            .iter()
            .filter(|f| f.link.is_linked())
            .filter(|f| !matches!(f.status, Some(FriendStatus::Pending | FriendStatus::Rejected)))
            .cloned()
            .collect()
    }

    pub fn are_same_person(&self, a: MemberKey, b: MemberKey) -> bool {
        self.resolution.are_same_person(a, b)
    }

    pub fn canonical_key(&self, key: MemberKey) -> MemberKey {
        self.resolution.canonical(key)
    }

    pub fn get(&self, key: MemberKey) -> Option<&AccountFriend> {
        self.resolution.master(key)
    }

    /// Master linked to the given account, if any.
    pub fn find_by_account(&self, id: Option<AccountId>, email: Option<&str>) -> Option<&AccountFriend> {
        self.resolution
            .masters
            .iter()
            .find(|f| f.link.account().is_some_and(|a| a.is_account(id, email)))
    }

    pub fn records(&self) -> Vec<AccountFriend> {
        self.resolution.masters.clone()
    }

    pub fn len(&self) -> usize {
        self.resolution.masters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resolution.masters.is_empty()
    }
}
