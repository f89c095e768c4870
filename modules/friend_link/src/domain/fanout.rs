use std::collections::BTreeSet;

use crate::contract::model::{Group, MemberKey};
use crate::domain::normalize::normalize_email;

fn group_has_account(group: &Group, email: &str) -> bool {
    normalize_email(&group.owner_email) == email
        || group
            .members
            .iter()
            .filter_map(|m| m.account_email.as_deref())
            .any(|e| normalize_email(e) == email)
}

/// Accounts whose friend record for `linked_key` must learn about a new link.
///
/// Only groups holding both the linked key and the requester count: an
/// account that shares a group with the linked member alone is not reached.
/// The requester and the linked account themselves are excluded.
pub fn fanout_targets(
    groups: &[Group],
    linked_key: MemberKey,
    requester_email: &str,
    linked_email: &str,
) -> BTreeSet<String> {
    let requester = normalize_email(requester_email);
    let linked = normalize_email(linked_email);

    let mut targets = BTreeSet::new();
    for group in groups
        .iter()
        .filter(|g| g.has_member(linked_key) && group_has_account(g, &requester))
    {
        let owner = normalize_email(&group.owner_email);
        let emails = std::iter::once(owner).chain(
            group
                .members
                .iter()
                .filter_map(|m| m.account_email.as_deref())
                .map(normalize_email),
        );
        for email in emails {
            if !email.is_empty() && email != requester && email != linked {
                targets.insert(email);
            }
        }
    }
    targets
}
