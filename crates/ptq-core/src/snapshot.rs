use crate::{ids::*, model::*, types::*};

/// Read-only view of one test group and everything the scheduler needs to
/// plan against it. Storage produces this inside a transaction so completion
/// checks see a consistent commit set state.
#[derive(Clone, Debug)]
pub struct GroupSnapshot {
    pub group: TestGroup,
    /// Sorted by `order`.
    pub requests: Vec<BuildRequest>,
    pub commit_sets: Vec<CommitSet>,
}

impl GroupSnapshot {
    pub fn commit_set(&self, id: CommitSetId) -> Option<&CommitSet> {
        self.commit_sets.iter().find(|set| set.id == id)
    }

    pub fn request(&self, id: BuildRequestId) -> Option<&BuildRequest> {
        self.requests.iter().find(|request| request.id == id)
    }

    /// Requests that execute a test, excluding build-only rows.
    pub fn test_requests(&self) -> impl Iterator<Item = &BuildRequest> {
        self.requests.iter().filter(|request| request.is_test())
    }

    pub fn requires_build(&self, request: &BuildRequest) -> bool {
        self.commit_set(request.commit_set)
            .map(|set| set.requires_build())
            .unwrap_or(false)
    }

    /// Distinct commit sets in order of first appearance among test requests.
    /// For sequential groups this is block order; for alternating groups it is
    /// the first round's order-to-set mapping.
    pub fn distinct_commit_sets(&self) -> Vec<CommitSetId> {
        let mut sets = Vec::new();
        for request in self.test_requests() {
            if !sets.contains(&request.commit_set) {
                sets.push(request.commit_set);
            }
        }
        sets
    }

    pub fn has_finished(&self) -> bool {
        self.requests.iter().all(|request| request.status.is_terminal())
    }

    pub fn has_started(&self) -> bool {
        self.requests
            .iter()
            .any(|request| request.status != BuildRequestStatus::Pending)
    }

    pub fn has_pending(&self) -> bool {
        self.requests
            .iter()
            .any(|request| request.status == BuildRequestStatus::Pending)
    }
}
