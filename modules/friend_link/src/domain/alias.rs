//! Deduplication of friend records into one master per real-world person.
//!
//! Records are connected through their declared alias keys; every connected
//! component collapses into the most preferred record of that component.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};

use crate::contract::model::{AccountFriend, Group, MemberKey, SelfIdentity};
use crate::domain::normalize::{looks_like_self, normalize_email};

/// Masters plus the alias map derived from them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AliasResolution {
    pub masters: Vec<AccountFriend>,
    pub alias_map: HashMap<MemberKey, MemberKey>,
}

impl AliasResolution {
    /// Master key for `key`, or `key` itself when unmapped.
    pub fn canonical(&self, key: MemberKey) -> MemberKey {
        self.alias_map.get(&key).copied().unwrap_or(key)
    }

    pub fn are_same_person(&self, a: MemberKey, b: MemberKey) -> bool {
        match (self.alias_map.get(&a), self.alias_map.get(&b)) {
            (Some(ma), Some(mb)) => ma == mb,
            _ => a == b,
        }
    }

    pub fn master(&self, key: MemberKey) -> Option<&AccountFriend> {
        let canonical = self.alias_map.get(&key)?;
        self.masters.iter().find(|m| m.member_key == *canonical)
    }
}

/// Whether a record stands for the owner and must never be kept as a friend.
pub fn is_self_record(friend: &AccountFriend, owner: &SelfIdentity) -> bool {
    if owner.is_me(friend.member_key) {
        return true;
    }
    // A link settles identity; the name heuristic is only for unlinked records.
    match friend.link.account() {
        Some(linked) => linked.is_account(Some(owner.account.id), Some(&owner.account.email)),
        None => looks_like_self(&friend.name, &owner.member_name, &owner.account.display_name),
    }
}

/// Group member keys that stand for the owner but are not yet known as such:
/// entries carrying the owner's email, or entries without an email whose
/// name looks like the owner.
pub fn stale_self_keys(groups: &[Group], owner: &SelfIdentity) -> BTreeSet<MemberKey> {
    let email = normalize_email(&owner.account.email);
    groups
        .iter()
        .flat_map(|g| g.members.iter())
        .filter(|m| !owner.is_me(m.member_key))
        .filter(|m| match m.account_email.as_deref() {
            Some(e) => normalize_email(e) == email,
            None => looks_like_self(&m.name, &owner.member_name, &owner.account.display_name),
        })
        .map(|m| m.member_key)
        .collect()
}

/// Has-linked-account first, then more aliases, then key order.
fn preference(a: &AccountFriend, b: &AccountFriend) -> Ordering {
    b.link
        .is_linked()
        .cmp(&a.link.is_linked())
        .then_with(|| b.aliases().len().cmp(&a.aliases().len()))
        .then_with(|| a.member_key.to_string().cmp(&b.member_key.to_string()))
}

#[derive(Default)]
struct DisjointSet {
    parent: HashMap<MemberKey, MemberKey>,
}

impl DisjointSet {
    fn find(&mut self, key: MemberKey) -> MemberKey {
        let mut root = key;
        while let Some(&p) = self.parent.get(&root) {
            if p == root {
                break;
            }
            root = p;
        }
        // path compression
        let mut cur = key;
        while cur != root {
            let next = self.parent.get(&cur).copied().unwrap_or(root);
            self.parent.insert(cur, root);
            cur = next;
        }
        self.parent.entry(root).or_insert(root);
        root
    }

    fn union(&mut self, a: MemberKey, b: MemberKey) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra != rb {
            self.parent.insert(rb, ra);
        }
    }
}

/// Collapse `friends` into one master per connected alias component.
///
/// With an `owner`, records naming the owner are dropped before master
/// selection and the owner's own keys are never used to connect records.
pub fn resolve_aliases(friends: &[AccountFriend], owner: Option<&SelfIdentity>) -> AliasResolution {
    let mut candidates: Vec<&AccountFriend> = friends
        .iter()
        .filter(|f| owner.map_or(true, |o| !is_self_record(f, o)))
        .collect();
    candidates.sort_by(|a, b| preference(a, b));

    let is_owner_key = |k: MemberKey| owner.is_some_and(|o| o.is_me(k));

    let mut sets = DisjointSet::default();
    for friend in &candidates {
        sets.find(friend.member_key);
        for alias in friend.aliases() {
            if !is_owner_key(*alias) {
                sets.union(friend.member_key, *alias);
            }
        }
    }

    // component root -> index into `masters`
    let mut master_of_root: HashMap<MemberKey, usize> = HashMap::new();
    let mut masters: Vec<AccountFriend> = Vec::new();
    let mut members: Vec<BTreeSet<MemberKey>> = Vec::new();

    for friend in &candidates {
        let root = sets.find(friend.member_key);
        match master_of_root.get(&root) {
            None => {
                master_of_root.insert(root, masters.len());
                masters.push((*friend).clone());
                members.push(BTreeSet::new());
            }
            Some(&idx) => {
                let master = &mut masters[idx];
                if master.nickname.is_none() {
                    master.nickname.clone_from(&friend.nickname);
                }
                if master.original_name.is_none() {
                    master.original_name.clone_from(&friend.original_name);
                }
                if master.status.is_none() {
                    master.status = friend.status;
                }
            }
        }
    }

    // Every key seen in the graph, including aliases that have no record.
    let keys: Vec<MemberKey> = sets.parent.keys().copied().collect();
    for key in keys {
        let root = sets.find(key);
        if let Some(&idx) = master_of_root.get(&root) {
            members[idx].insert(key);
        }
    }

    let mut alias_map = HashMap::new();
    for (master, keys) in masters.iter_mut().zip(members) {
        for key in &keys {
            alias_map.insert(*key, master.member_key);
        }
        alias_map.insert(master.member_key, master.member_key);
        master.replace_aliases(keys);
    }

    AliasResolution { masters, alias_map }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::model::{AccountId, LinkedAccount, SessionAccount};

    fn linked(key: MemberKey, name: &str) -> AccountFriend {
        AccountFriend::new(key, name).linked_to(LinkedAccount::full(AccountId::new(), "x@example.com"))
    }

    fn owner() -> SelfIdentity {
        SelfIdentity::new(
            SessionAccount {
                id: AccountId::new(),
                email: "alex@example.com".into(),
                display_name: "Alex Kim".into(),
            },
            MemberKey::new(),
            "Alex",
        )
    }

    #[test]
    fn stale_self_entries_are_found_by_email_or_name() {
        use crate::contract::model::GroupMember;
        use chrono::Utc;
        use uuid::Uuid;

        let me = owner();
        let (by_email, by_name, other) = (MemberKey::new(), MemberKey::new(), MemberKey::new());
        let member = |key, name: &str, email: Option<&str>| GroupMember {
            member_key: key,
            name: name.into(),
            account_email: email.map(str::to_string),
        };
        let group = Group {
            id: Uuid::new_v4(),
            name: "Trip".into(),
            owner_email: "z@example.com".into(),
            members: vec![
                member(me.member_key, "Alex", Some("alex@example.com")),
                member(by_email, "A.", Some(" ALEX@example.com")),
                member(by_name, "alex (me)", None),
                member(other, "Alex Other", Some("other@example.com")),
            ],
            updated_at: Utc::now(),
        };
        let keys = stale_self_keys(&[group], &me);
        assert_eq!(keys, BTreeSet::from([by_email, by_name]));
    }

    #[test]
    fn linked_record_absorbs_unlinked_alias() {
        let x = MemberKey::new();
        let y = MemberKey::new();
        let friends = vec![
            AccountFriend::new(x, "Bo"),
            linked(y, "Bo Lee").with_aliases([x]),
        ];
        let res = resolve_aliases(&friends, None);
        assert_eq!(res.masters.len(), 1);
        let master = &res.masters[0];
        assert_eq!(master.member_key, y);
        assert!(master.aliases().contains(&x));
        assert_eq!(res.canonical(x), y);
        assert!(res.are_same_person(x, y));
    }

    #[test]
    fn alias_chains_are_transitive() {
        let (a, b, c) = (MemberKey::new(), MemberKey::new(), MemberKey::new());
        let friends = vec![
            AccountFriend::new(a, "Cy").with_aliases([b]),
            AccountFriend::new(c, "Cyrus").with_aliases([b]),
        ];
        let res = resolve_aliases(&friends, None);
        assert_eq!(res.masters.len(), 1);
        assert!(res.are_same_person(a, c));
        assert!(res.are_same_person(c, b));
        assert!(res.are_same_person(b, a));
    }

    #[test]
    fn unmapped_keys_compare_by_equality() {
        let res = resolve_aliases(&[], None);
        let k = MemberKey::new();
        assert!(res.are_same_person(k, k));
        assert!(!res.are_same_person(k, MemberKey::new()));
    }

    #[test]
    fn dedup_is_idempotent() {
        let (a, b, c, d) = (MemberKey::new(), MemberKey::new(), MemberKey::new(), MemberKey::new());
        let friends = vec![
            AccountFriend::new(a, "Dee").with_nickname("D"),
            linked(b, "Dee Dee").with_aliases([a, c]),
            AccountFriend::new(c, "Dee"),
            AccountFriend::new(d, "Eve"),
        ];
        let once = resolve_aliases(&friends, None);
        let twice = resolve_aliases(&once.masters, None);
        assert_eq!(once.masters, twice.masters);
        assert_eq!(once.alias_map, twice.alias_map);
    }

    #[test]
    fn master_fills_missing_nickname_from_absorbed_record() {
        let (a, b) = (MemberKey::new(), MemberKey::new());
        let friends = vec![
            AccountFriend::new(a, "Fay").with_nickname("Fifi"),
            linked(b, "Fay Wu").with_aliases([a]),
        ];
        let res = resolve_aliases(&friends, None);
        assert_eq!(res.masters[0].nickname.as_deref(), Some("Fifi"));
    }

    #[test]
    fn owner_is_never_a_friend() {
        let me = owner();
        let by_name = AccountFriend::new(MemberKey::new(), "alex kim");
        let by_key = AccountFriend::new(me.member_key, "Someone");
        let by_link = AccountFriend::new(MemberKey::new(), "Al")
            .linked_to(LinkedAccount::full(me.account.id, "alex@example.com"));
        let other = AccountFriend::new(MemberKey::new(), "Sam");
        let res = resolve_aliases(&[by_name, by_key, by_link, other.clone()], Some(&me));
        assert_eq!(res.masters.len(), 1);
        assert_eq!(res.masters[0].member_key, other.member_key);
    }

    #[test]
    fn namesake_linked_to_another_account_is_kept() {
        let me = owner();
        let namesake = AccountFriend::new(MemberKey::new(), "Alex")
            .linked_to(LinkedAccount::full(AccountId::new(), "alex.other@example.com"));
        let res = resolve_aliases(&[namesake.clone()], Some(&me));
        assert_eq!(res.masters.len(), 1);
        assert_eq!(res.masters[0].member_key, namesake.member_key);
    }

    #[test]
    fn owner_keys_do_not_bridge_two_friends() {
        let me = owner();
        let (a, b) = (MemberKey::new(), MemberKey::new());
        let friends = vec![
            AccountFriend::new(a, "Gus").with_aliases([me.member_key]),
            AccountFriend::new(b, "Hal").with_aliases([me.member_key]),
        ];
        let res = resolve_aliases(&friends, Some(&me));
        assert_eq!(res.masters.len(), 2);
        assert!(!res.are_same_person(a, b));
        assert!(res.masters.iter().all(|m| m.aliases().is_empty()));
    }
}
