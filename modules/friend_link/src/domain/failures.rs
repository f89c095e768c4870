use dashmap::DashMap;
use std::future::Future;
use tracing::{debug, instrument, warn};

use crate::contract::model::{AccountFriend, FailureRecord, MemberKey};
use crate::domain::reconcile::validate_link_completion;

/// Outcome counters of one retry pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetrySummary {
    pub succeeded: usize,
    pub failed: usize,
    /// Records dropped because the link they describe no longer holds.
    pub discarded: usize,
    /// Records dropped because their attempt budget ran out.
    pub exhausted: usize,
}

/// Link side effects that failed after their immediate retries.
pub struct FailureTracker {
    records: DashMap<MemberKey, FailureRecord>,
    max_attempts: u32,
}

impl FailureTracker {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            records: DashMap::new(),
            max_attempts: max_attempts.max(1),
        }
    }

    /// Store or refresh the record for its member key. A refreshed record
    /// keeps the retry count already spent.
    pub fn record(&self, mut record: FailureRecord) {
        if let Some(prev) = self.records.get(&record.member_key) {
            record.retry_count = record.retry_count.max(prev.retry_count);
        }
        debug!(member_key = %record.member_key, reason = %record.reason, "link side effect queued for retry");
        self.records.insert(record.member_key, record);
    }

    pub fn pending(&self) -> Vec<FailureRecord> {
        let mut out: Vec<FailureRecord> = self.records.iter().map(|r| r.value().clone()).collect();
        out.sort_by_key(|r| r.recorded_at);
        out
    }

    pub fn resolve(&self, member_key: MemberKey) -> bool {
        self.records.remove(&member_key).is_some()
    }

    pub fn clear(&self) {
        self.records.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Re-attempt every pending record with `push`.
    ///
    /// Records whose link is no longer valid in `friends` are discarded
    /// without pushing.
    #[instrument(name = "friend_link.failures.retry_pending", skip_all, fields(pending = self.records.len()))]
    pub async fn retry_pending<F, Fut>(&self, friends: &[AccountFriend], mut push: F) -> RetrySummary
    where
        F: FnMut(FailureRecord) -> Fut,
        Fut: Future<Output = anyhow::Result<()>>,
    {
        let mut summary = RetrySummary::default();
        for record in self.pending() {
            let key = record.member_key;
            if !validate_link_completion(key, record.linked_account_id, friends) {
                debug!(member_key = %key, "link superseded; dropping queued side effect");
                self.records.remove(&key);
                summary.discarded += 1;
                continue;
            }

            match push(record.clone()).await {
                Ok(()) => {
                    self.records.remove(&key);
                    summary.succeeded += 1;
                }
                Err(e) => {
                    let attempts = record.retry_count + 1;
                    if attempts >= self.max_attempts {
                        warn!(
                            member_key = %key,
                            retry_count = attempts,
                            error = %e,
                            "giving up on link propagation"
                        );
                        self.records.remove(&key);
                        summary.exhausted += 1;
                    } else {
                        warn!(member_key = %key, retry_count = attempts, error = %e, "link propagation retry failed");
                        if let Some(mut stored) = self.records.get_mut(&key) {
                            stored.retry_count = attempts;
                            stored.reason = e.to_string();
                        }
                        summary.failed += 1;
                    }
                }
            }
        }
        summary
    }
}
