//! Tracking of local group/expense edits not yet observed remotely.

use std::collections::HashMap;
use uuid::Uuid;

use crate::contract::model::{Expense, Group};

pub trait Keyed {
    fn key(&self) -> Uuid;
}

impl Keyed for Group {
    fn key(&self) -> Uuid {
        self.id
    }
}

impl Keyed for Expense {
    fn key(&self) -> Uuid {
        self.id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingOp {
    Upsert,
    Delete,
}

/// Pending markers by record id.
#[derive(Debug, Clone)]
pub struct PendingWrites<T> {
    ops: HashMap<Uuid, PendingOp>,
    _marker: std::marker::PhantomData<fn() -> T>,
}

impl<T> Default for PendingWrites<T> {
    fn default() -> Self {
        Self {
            ops: HashMap::new(),
            _marker: std::marker::PhantomData,
        }
    }
}

impl<T: Keyed + PartialEq + Clone> PendingWrites<T> {
    pub fn mark_upsert(&mut self, id: Uuid) {
        self.ops.insert(id, PendingOp::Upsert);
    }

    pub fn mark_delete(&mut self, id: Uuid) {
        self.ops.insert(id, PendingOp::Delete);
    }

    pub fn get(&self, id: Uuid) -> Option<PendingOp> {
        self.ops.get(&id).copied()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn clear(&mut self) {
        self.ops.clear();
    }

    /// Merge a delivered remote snapshot into `local`.
    ///
    /// A pending upsert keeps the local value until the remote value equals
    /// it. A pending delete hides the id until the snapshot no longer
    /// contains it. Every other id takes the remote value.
    pub fn merge_snapshot(&mut self, local: &[T], remote: Vec<T>) -> Vec<T> {
        let local_by_id: HashMap<Uuid, &T> = local.iter().map(|item| (item.key(), item)).collect();
        let mut out = Vec::with_capacity(remote.len());
        let mut seen = std::collections::HashSet::new();

        for item in remote {
            let id = item.key();
            seen.insert(id);
            match self.ops.get(&id).copied() {
                None => out.push(item),
                Some(PendingOp::Delete) => {}
                Some(PendingOp::Upsert) => match local_by_id.get(&id) {
                    Some(mine) if **mine == item => {
                        self.ops.remove(&id);
                        out.push(item);
                    }
                    Some(mine) => out.push((*mine).clone()),
                    None => {
                        self.ops.remove(&id);
                        out.push(item);
                    }
                },
            }
        }

        // Pending upserts the remote has not seen at all yet.
        for item in local {
            let id = item.key();
            if !seen.contains(&id) && self.ops.get(&id) == Some(&PendingOp::Upsert) {
                out.push(item.clone());
            }
        }

        self.ops
            .retain(|id, op| !(*op == PendingOp::Delete && !seen.contains(id)));
        out
    }
}
