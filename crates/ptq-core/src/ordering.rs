use crate::error::SchedulerError;
use crate::ids::{BuildRequestId, CommitSetId};
use crate::model::RepetitionType;

/// One (commit set, repetition) slot and the order it dispatches at.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OrderAssignment {
    pub set_index: usize,
    pub repetition: usize,
    pub order: u32,
}

/// Assign a unique order to every (set, repetition) pair.
///
/// Sequential keeps all repetitions of a set in one contiguous block
/// (`i·R + r`); alternating and paired-parallel interleave round-robin
/// (`r·N + i`). Deterministic for the same inputs; growth re-runs the same
/// formulas to extend a group.
pub fn assign_orders(
    set_count: usize,
    repetition_count: usize,
    ty: RepetitionType,
) -> Vec<OrderAssignment> {
    let mut assignments = Vec::with_capacity(set_count * repetition_count);
    for set_index in 0..set_count {
        for repetition in 0..repetition_count {
            let order = match ty {
                RepetitionType::Sequential => set_index * repetition_count + repetition,
                RepetitionType::Alternating | RepetitionType::PairedParallel => {
                    repetition * set_count + set_index
                }
            };
            assignments.push(OrderAssignment { set_index, repetition, order: order as u32 });
        }
    }
    assignments.sort_by_key(|assignment| assignment.order);
    assignments
}

/// A request to be created by a growth operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PlannedRequest {
    pub commit_set: CommitSetId,
    pub order: u32,
}

/// Outcome of planning a growth operation: order changes for existing
/// requests plus the new requests to insert, all applied atomically by the
/// caller.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GrowthPlan {
    pub reorders: Vec<(BuildRequestId, u32)>,
    pub additions: Vec<PlannedRequest>,
}

/// Plan growing a group by `add_count` requests.
///
/// `requests` are the group's test requests as (id, commit set, order),
/// sorted by order. Build-only rows are excluded by the caller; they precede
/// every test order and are never shifted.
pub fn plan_growth(
    ty: RepetitionType,
    requests: &[(BuildRequestId, CommitSetId, u32)],
    add_count: u32,
    target: Option<CommitSetId>,
) -> Result<GrowthPlan, SchedulerError> {
    match ty {
        RepetitionType::Sequential => plan_sequential_growth(requests, add_count, target),
        RepetitionType::Alternating | RepetitionType::PairedParallel => {
            if target.is_some() {
                return Err(SchedulerError::CommitSetNotSupportedRepetitionType);
            }
            plan_interleaved_growth(requests, add_count)
        }
    }
}

fn distinct_sets(requests: &[(BuildRequestId, CommitSetId, u32)]) -> Vec<CommitSetId> {
    let mut sets = Vec::new();
    for &(_, set, _) in requests {
        if !sets.contains(&set) {
            sets.push(set);
        }
    }
    sets
}

fn plan_sequential_growth(
    requests: &[(BuildRequestId, CommitSetId, u32)],
    add_count: u32,
    target: Option<CommitSetId>,
) -> Result<GrowthPlan, SchedulerError> {
    if add_count == 0 || requests.is_empty() {
        return Ok(GrowthPlan::default());
    }

    if let Some(target) = target {
        let block_end = requests
            .iter()
            .filter(|(_, set, _)| *set == target)
            .map(|&(_, _, order)| order)
            .max()
            .ok_or(SchedulerError::NoCommitSetInTestGroup(target))?;
        let insert_at = block_end + 1;

        let reorders = requests
            .iter()
            .filter(|&&(_, _, order)| order >= insert_at)
            .map(|&(id, _, order)| (id, order + add_count))
            .collect();
        let additions = (insert_at..insert_at + add_count)
            .map(|order| PlannedRequest { commit_set: target, order })
            .collect();
        return Ok(GrowthPlan { reorders, additions });
    }

    // Uniform growth: every block gains `add_count` requests at its end. Lay
    // the blocks out again from the first test order and diff against the
    // current orders.
    let base = requests[0].2;
    let mut next_order = base;
    let mut plan = GrowthPlan::default();
    for set in distinct_sets(requests) {
        for &(id, _, order) in requests.iter().filter(|(_, s, _)| *s == set) {
            if order != next_order {
                plan.reorders.push((id, next_order));
            }
            next_order += 1;
        }
        for _ in 0..add_count {
            plan.additions.push(PlannedRequest { commit_set: set, order: next_order });
            next_order += 1;
        }
    }
    Ok(plan)
}

fn plan_interleaved_growth(
    requests: &[(BuildRequestId, CommitSetId, u32)],
    add_count: u32,
) -> Result<GrowthPlan, SchedulerError> {
    if add_count == 0 || requests.is_empty() {
        return Ok(GrowthPlan::default());
    }

    let sets = distinct_sets(requests);
    let set_count = sets.len();
    if add_count as usize % set_count != 0 {
        return Err(SchedulerError::InvalidAddCount { add_count, set_count });
    }

    // Continue the round-robin formula from the current maximum round: the
    // order-to-set mapping stays `(order - base) mod N`.
    let base = requests[0].2;
    let next = requests.last().map(|&(_, _, order)| order + 1).unwrap_or(base);
    let additions = (next..next + add_count)
        .map(|order| PlannedRequest {
            commit_set: sets[(order - base) as usize % set_count],
            order,
        })
        .collect();
    Ok(GrowthPlan { reorders: Vec::new(), additions })
}
