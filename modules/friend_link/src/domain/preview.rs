use std::collections::HashMap;
use uuid::Uuid;

use crate::contract::model::{Expense, ExpensePreview, Group, MemberKey};

/// Unsettled expenses of the creator that involve `target`, split into
/// direct and group buckets with a running balance from the creator's side.
pub fn compute_preview(
    expenses: &[Expense],
    groups: &[Group],
    creator_key: MemberKey,
    target: MemberKey,
) -> ExpensePreview {
    let group_names: HashMap<Uuid, &str> = groups.iter().map(|g| (g.id, g.name.as_str())).collect();
    let mut preview = ExpensePreview::default();

    for expense in expenses.iter().filter(|e| !e.settled && e.involves(target)) {
        if expense.paid_by == creator_key {
            preview.balance += expense.share_of(target);
        } else if expense.paid_by == target {
            preview.balance -= expense.share_of(creator_key);
        }

        match expense.group_id {
            Some(gid) => {
                if let Some(name) = group_names.get(&gid) {
                    preview.group_names.insert((*name).to_string());
                }
                preview.group_expenses.push(expense.clone());
            }
            None => preview.direct_expenses.push(expense.clone()),
        }
    }

    preview
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::model::ExpenseSplit;
    use rust_decimal::Decimal;
    use chrono::Utc;

    fn expense(paid_by: MemberKey, splits: &[(MemberKey, i64)], group: Option<Uuid>) -> Expense {
        let amount: i64 = splits.iter().map(|(_, a)| a).sum();
        Expense {
            id: Uuid::new_v4(),
            owner_email: "c@x.io".into(),
            group_id: group,
            description: "dinner".into(),
            amount: Decimal::new(amount, 2),
            paid_by,
            splits: splits
                .iter()
                .map(|(k, a)| ExpenseSplit {
                    member_key: *k,
                    amount: Decimal::new(*a, 2),
                })
                .collect(),
            settled: false,
            date: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn balance_follows_who_paid() {
        let (me, t, other) = (MemberKey::new(), MemberKey::new(), MemberKey::new());
        let trip = Group {
            id: Uuid::new_v4(),
            name: "Trip".into(),
            owner_email: "c@x.io".into(),
            members: vec![],
            updated_at: Utc::now(),
        };
        let expenses = vec![
            // I paid 30.00, target owes 15.00
            expense(me, &[(me, 1500), (t, 1500)], None),
            // target paid 10.00, I owe 5.00
            expense(t, &[(me, 500), (t, 500)], Some(trip.id)),
            // someone else paid: listed, balance untouched
            expense(other, &[(t, 700), (other, 700)], Some(trip.id)),
            // not involving the target
            expense(me, &[(me, 100), (other, 100)], None),
        ];
        let preview = compute_preview(&expenses, &[trip], me, t);
        assert_eq!(preview.direct_expenses.len(), 1);
        assert_eq!(preview.group_expenses.len(), 2);
        assert_eq!(preview.balance, Decimal::new(1000, 2));
        assert_eq!(preview.group_names.iter().collect::<Vec<_>>(), vec!["Trip"]);
    }

    #[test]
    fn settled_expenses_are_left_out() {
        let (me, t) = (MemberKey::new(), MemberKey::new());
        let mut e = expense(me, &[(t, 900)], None);
        e.settled = true;
        let preview = compute_preview(&[e], &[], me, t);
        assert!(preview.direct_expenses.is_empty());
        assert_eq!(preview.balance, Decimal::ZERO);
    }
}
