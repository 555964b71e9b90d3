use ptq_core::{BuildRequestStatus, CommitSetId, GroupSnapshot};

/// What to do with a group whose `may_need_more_requests` flag is set.
/// This stays pure and testable; the scheduler applies it to storage.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RetryDecision {
    /// Schedule `count` additional test requests. `target` names one commit
    /// set for sequential groups; alternating and paired-parallel groups grow
    /// uniformly in whole rounds and carry no target.
    AddRequests { count: u32, target: Option<CommitSetId> },
    /// Nothing more will ever help; drop the flag.
    ClearFlag,
    /// Outcome still undecided (requests in flight); keep the flag and look
    /// again later.
    Wait,
}

#[derive(Debug, Default)]
struct SetStats {
    completed: u32,
    failed: u32,
    unfinished: u32,
}

impl SetStats {
    fn scheduled(&self) -> u32 {
        self.completed + self.failed + self.unfinished
    }
}

/// Decide whether a flagged group should grow, wait, or give up.
///
/// Each commit set gets up to `initial_repetition_count` successful runs, but
/// never more than `floor(max_retry_factor * initial_repetition_count)` total
/// requests. A set that has finished without a single success is beyond
/// saving, and blocks additions for the whole group.
pub fn plan_more_requests(snapshot: &GroupSnapshot, max_retry_factor: f64) -> RetryDecision {
    if !snapshot.group.may_need_more_requests {
        return RetryDecision::Wait;
    }
    if snapshot.group.hidden {
        return RetryDecision::ClearFlag;
    }

    let repetition_count = snapshot.group.initial_repetition_count;
    let allowance = (max_retry_factor * f64::from(repetition_count)).floor() as u32;

    let sets = snapshot.distinct_commit_sets();
    let mut stats = Vec::with_capacity(sets.len());
    for &set in &sets {
        let mut entry = SetStats::default();
        for request in snapshot.test_requests().filter(|r| r.commit_set == set) {
            match request.status {
                BuildRequestStatus::Completed => entry.completed += 1,
                BuildRequestStatus::Pending | BuildRequestStatus::Running => entry.unfinished += 1,
                _ => entry.failed += 1,
            }
        }
        if entry.completed == 0 && entry.unfinished == 0 && entry.failed > 0 {
            return RetryDecision::ClearFlag;
        }
        stats.push(entry);
    }

    for (&set, entry) in sets.iter().zip(&stats) {
        if entry.completed == 0 {
            continue;
        }
        let still_needed = repetition_count.saturating_sub(entry.completed + entry.unfinished);
        let budget_left = allowance.saturating_sub(entry.scheduled());
        let deficit = still_needed.min(budget_left);
        if deficit == 0 {
            continue;
        }
        return if snapshot.group.repetition_type.is_sequential() {
            RetryDecision::AddRequests { count: deficit, target: Some(set) }
        } else {
            let rounds = deficit * sets.len() as u32;
            RetryDecision::AddRequests { count: rounds, target: None }
        };
    }

    if stats.iter().any(|entry| entry.completed == 0 && entry.unfinished > 0) {
        return RetryDecision::Wait;
    }
    RetryDecision::ClearFlag
}
