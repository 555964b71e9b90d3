use std::time::{SystemTime, UNIX_EPOCH};

use ptq_core::{
    assign_orders, plan_growth, BuildRequestId, BuildRequestStatus, CommitId, CommitSetId,
    GroupSnapshot, PlatformId, RepetitionType, RepositoryId, SchedulerError, TaskId, TestGroupId,
    TestId, TriggerableId, UploadedFileId,
};
use ptq_retry::{plan_more_requests, RetryDecision};
use ptq_storage::{
    GroupFieldUpdate, NewBuildRequest, NewCommitSetItem, NewTestGroup, Storage, StorageTxn,
};
use tracing::{info, warn};

use crate::capabilities::{AllowAllCapabilities, TriggerableCapabilities};

pub fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// One desired source configuration, as supplied by the group creator.
#[derive(Clone, Debug)]
pub struct CommitSetSpec {
    pub items: Vec<NewCommitSetItem>,
}

impl CommitSetSpec {
    fn requires_build(&self) -> bool {
        self.items.iter().any(|item| item.requires_build)
    }

    /// Configuration identity: the sorted (commit, patch) pairs. Sets with
    /// the same signature share one stored commit set row.
    fn signature(&self) -> Vec<(CommitId, Option<UploadedFileId>)> {
        let mut sig: Vec<_> = self.items.iter().map(|i| (i.commit, i.patch_file)).collect();
        sig.sort();
        sig
    }
}

#[derive(Clone, Debug)]
pub struct CreateGroupRequest {
    pub task: TaskId,
    pub name: String,
    pub triggerable: TriggerableId,
    pub platform: PlatformId,
    pub test: TestId,
    pub repetition_count: u32,
    pub repetition_type: RepetitionType,
    pub commit_sets: Vec<CommitSetSpec>,
    pub hidden: bool,
    pub needs_notification: bool,
}

#[derive(Clone, Debug)]
pub struct CreatedGroup {
    pub test_group: TestGroupId,
    pub build_requests: Vec<BuildRequestId>,
}

/// Identifies which commit set item a root upload is for. Component
/// repositories appear once per owning commit, so they need the owner
/// repository spelled out.
#[derive(Clone, Copy, Debug)]
pub struct RepositoryKey {
    pub repository: RepositoryId,
    pub owner_repository: Option<RepositoryId>,
}

#[derive(Clone, Debug)]
pub struct RootUpload {
    pub filename: String,
    pub external_build_id: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct TestGroupUpdate {
    pub hidden: Option<bool>,
    pub needs_notification: Option<bool>,
    pub notification_sent_at: Option<Option<i64>>,
    pub may_need_more_requests: Option<bool>,
    pub cancel: bool,
}

/// The build-request scheduler. Every public operation runs inside one
/// storage transaction and either fully applies or leaves no trace.
pub struct Scheduler<S> {
    storage: S,
    capabilities: Box<dyn TriggerableCapabilities + Send + Sync>,
}

impl<S: Storage> Scheduler<S> {
    pub fn new(storage: S) -> Self {
        Self { storage, capabilities: Box::new(AllowAllCapabilities) }
    }

    pub fn with_capabilities(
        storage: S,
        capabilities: Box<dyn TriggerableCapabilities + Send + Sync>,
    ) -> Self {
        Self { storage, capabilities }
    }

    pub fn group_snapshot(
        &self,
        group: TestGroupId,
    ) -> Result<Option<GroupSnapshot>, SchedulerError> {
        let mut txn = self.storage.begin()?;
        Ok(txn.group_snapshot(group)?)
    }

    pub fn group_ids(&self) -> Result<Vec<TestGroupId>, SchedulerError> {
        let mut txn = self.storage.begin()?;
        Ok(txn.group_ids()?)
    }

    /// Create a test group with `N·R` test requests ordered by the repetition
    /// policy, preceded by one build-only request per distinct commit set
    /// that requires a build. `R = 0` creates the group with no requests.
    pub fn create_group(
        &self,
        request: &CreateGroupRequest,
    ) -> Result<CreatedGroup, SchedulerError> {
        if request.commit_sets.is_empty() {
            return Err(SchedulerError::InvalidCommitSets(
                "at least one commit set is required".into(),
            ));
        }
        if !self.capabilities.supports_repetition_type(
            request.triggerable,
            request.platform,
            request.test,
            request.repetition_type,
        ) {
            return Err(SchedulerError::UnsupportedRepetitionTypeForTriggerable);
        }

        let mut txn = self.storage.begin()?;

        let repository_count = request.commit_sets[0].items.len();
        for spec in &request.commit_sets {
            if spec.items.len() != repository_count {
                return Err(SchedulerError::InvalidCommitSets(
                    "commit sets select different numbers of repositories".into(),
                ));
            }
            validate_spec(txn.as_mut(), spec)?;
        }

        // Repeated configurations share one stored commit set, so a root
        // uploaded against one request is visible to every sibling.
        let mut stored: Vec<(Vec<(CommitId, Option<UploadedFileId>)>, CommitSetId, bool)> = vec![];
        let mut set_ids = Vec::with_capacity(request.commit_sets.len());
        for spec in &request.commit_sets {
            let signature = spec.signature();
            let id = match stored.iter().find(|(sig, _, _)| *sig == signature) {
                Some(&(_, id, _)) => id,
                None => {
                    let id = txn.insert_commit_set(&spec.items)?;
                    stored.push((signature, id, spec.requires_build()));
                    id
                }
            };
            set_ids.push(id);
        }

        let created_at = now_unix();
        let group_id = txn.insert_test_group(&NewTestGroup {
            task: request.task,
            name: request.name.clone(),
            repetition_type: request.repetition_type,
            initial_repetition_count: request.repetition_count,
            hidden: request.hidden,
            needs_notification: request.needs_notification,
            created_at_unix: created_at,
        })?;

        let mut request_ids = vec![];
        if request.repetition_count > 0 {
            let mut build_order = 0u32;
            for &(_, set, requires_build) in &stored {
                if !requires_build {
                    continue;
                }
                let id = txn.insert_build_request(&NewBuildRequest {
                    test_group: group_id,
                    order: build_order,
                    commit_set: set,
                    triggerable: request.triggerable,
                    platform: request.platform,
                    test: None,
                    status: BuildRequestStatus::Pending,
                    created_at_unix: created_at,
                })?;
                request_ids.push(id);
                build_order += 1;
            }

            let assignments = assign_orders(
                set_ids.len(),
                request.repetition_count as usize,
                request.repetition_type,
            );
            for assignment in assignments {
                let id = txn.insert_build_request(&NewBuildRequest {
                    test_group: group_id,
                    order: build_order + assignment.order,
                    commit_set: set_ids[assignment.set_index],
                    triggerable: request.triggerable,
                    platform: request.platform,
                    test: Some(request.test),
                    status: BuildRequestStatus::Pending,
                    created_at_unix: created_at,
                })?;
                request_ids.push(id);
            }
        }

        txn.commit_txn()?;
        info!(
            group = group_id.as_i64(),
            requests = request_ids.len(),
            repetition_type = request.repetition_type.as_str(),
            "created test group"
        );
        Ok(CreatedGroup { test_group: group_id, build_requests: request_ids })
    }

    /// Grow a group by `add_count` test requests, targeted at one commit set
    /// for sequential groups or spread uniformly for interleaved ones.
    pub fn add_build_requests(
        &self,
        group: TestGroupId,
        add_count: u32,
        target: Option<CommitSetId>,
    ) -> Result<Vec<BuildRequestId>, SchedulerError> {
        if let Some(target) = target {
            if target.as_i64() <= 0 {
                return Err(SchedulerError::InvalidCommitSet);
            }
        }
        let mut txn = self.storage.begin()?;
        let snapshot = txn
            .group_snapshot(group)?
            .ok_or(SchedulerError::TestGroupNotFound(group))?;
        let added = grow_in_txn(txn.as_mut(), &snapshot, add_count, target)?;
        txn.commit_txn()?;
        info!(group = group.as_i64(), added = added.len(), "grew test group");
        Ok(added)
    }

    /// Record a worker-reported status change. Re-reporting the current
    /// non-terminal status refreshes the status URL.
    pub fn report_status(
        &self,
        request: BuildRequestId,
        status: BuildRequestStatus,
        url: Option<&str>,
    ) -> Result<(), SchedulerError> {
        let mut txn = self.storage.begin()?;
        let group = txn
            .find_request_group(request)?
            .ok_or(SchedulerError::InvalidBuildRequestType(request))?;
        let snapshot = txn
            .group_snapshot(group)?
            .ok_or(SchedulerError::TestGroupNotFound(group))?;
        let current = snapshot
            .request(request)
            .ok_or(SchedulerError::InvalidBuildRequestType(request))?;

        let refresh = status == current.status && !status.is_terminal();
        if !refresh && !current.status.can_transition_to(status) {
            warn!(
                request = request.as_i64(),
                from = ?current.status,
                to = ?status,
                "rejected status report"
            );
            return Err(SchedulerError::InvalidStatusTransition {
                from: current.status,
                to: status,
            });
        }
        if status == BuildRequestStatus::Completed
            && snapshot.requires_build(current)
            && !snapshot
                .commit_set(current.commit_set)
                .map(|set| set.roots_satisfied())
                .unwrap_or(false)
        {
            return Err(SchedulerError::IncompleteRootUploads(request));
        }

        txn.update_request_status(request, status, url)?;
        if matches!(
            status,
            BuildRequestStatus::Failed | BuildRequestStatus::FailedIfNotCompleted
        ) {
            txn.update_group_fields(
                group,
                &GroupFieldUpdate { may_need_more_requests: Some(true), ..Default::default() },
            )?;
        }
        txn.commit_txn()?;
        Ok(())
    }

    /// Record a built root for one commit set item. When the upload satisfies
    /// the last item still requiring a build, the request completes and the
    /// worker's build tag is recorded on it.
    pub fn upload_root(
        &self,
        request: BuildRequestId,
        key: RepositoryKey,
        upload: &RootUpload,
    ) -> Result<UploadedFileId, SchedulerError> {
        let mut txn = self.storage.begin()?;
        let group = txn
            .find_request_group(request)?
            .ok_or(SchedulerError::InvalidBuildRequestType(request))?;
        let snapshot = txn
            .group_snapshot(group)?
            .ok_or(SchedulerError::TestGroupNotFound(group))?;
        let current = snapshot
            .request(request)
            .ok_or(SchedulerError::InvalidBuildRequestType(request))?;
        let set = snapshot
            .commit_set(current.commit_set)
            .ok_or(SchedulerError::InvalidBuildRequestType(request))?;
        if !set.requires_build() {
            return Err(SchedulerError::InvalidBuildRequestType(request));
        }
        if current.status.is_terminal() {
            return Err(SchedulerError::InvalidStatusTransition {
                from: current.status,
                to: BuildRequestStatus::Completed,
            });
        }

        let commit = resolve_upload_target(txn.as_mut(), set, key)?;
        let file = txn.insert_uploaded_file(&upload.filename, now_unix())?;
        txn.set_root_file(set.id, commit, file)?;

        let satisfied = txn
            .commit_set(set.id)?
            .map(|set| set.roots_satisfied())
            .unwrap_or(false);
        if satisfied {
            txn.update_request_status(
                request,
                BuildRequestStatus::Completed,
                current.status_url.as_deref(),
            )?;
            txn.set_request_build_id(request, upload.external_build_id.as_deref())?;
            info!(request = request.as_i64(), "all roots uploaded, request completed");
        }
        txn.commit_txn()?;
        Ok(file)
    }

    /// Apply field updates and/or cancel the whole group.
    pub fn update_group(
        &self,
        group: TestGroupId,
        update: &TestGroupUpdate,
    ) -> Result<(), SchedulerError> {
        let mut txn = self.storage.begin()?;
        let snapshot = txn
            .group_snapshot(group)?
            .ok_or(SchedulerError::TestGroupNotFound(group))?;

        let needs_notification = update
            .needs_notification
            .unwrap_or(snapshot.group.needs_notification);
        if matches!(update.notification_sent_at, Some(Some(_))) && needs_notification {
            return Err(
                SchedulerError::NotificationSentAtFieldShouldOnlyBeSetWhenNeedsNotificationIsFalse,
            );
        }

        let mut fields = GroupFieldUpdate {
            hidden: update.hidden,
            needs_notification: update.needs_notification,
            notification_sent_at: update.notification_sent_at,
            may_need_more_requests: update.may_need_more_requests,
        };
        if update.needs_notification == Some(true) {
            fields.notification_sent_at = Some(None);
        }
        if update.hidden == Some(true) {
            fields.may_need_more_requests = Some(false);
        }

        if update.cancel {
            for request in &snapshot.requests {
                if request.status.is_terminal() {
                    continue;
                }
                txn.update_request_status(
                    request.id,
                    BuildRequestStatus::Canceled,
                    request.status_url.as_deref(),
                )?;
            }
            fields.may_need_more_requests = Some(false);
            info!(group = group.as_i64(), "canceled test group");
        }

        txn.update_group_fields(group, &fields)?;
        txn.commit_txn()?;
        Ok(())
    }

    /// Act on a group's `may_need_more_requests` flag: grow it, clear the
    /// flag, or leave it for later. Returns the decision taken.
    pub fn process_may_need_more_requests(
        &self,
        group: TestGroupId,
        max_retry_factor: f64,
    ) -> Result<RetryDecision, SchedulerError> {
        let mut txn = self.storage.begin()?;
        let snapshot = txn
            .group_snapshot(group)?
            .ok_or(SchedulerError::TestGroupNotFound(group))?;
        let decision = plan_more_requests(&snapshot, max_retry_factor);
        match &decision {
            RetryDecision::AddRequests { count, target } => {
                grow_in_txn(txn.as_mut(), &snapshot, *count, *target)?;
                info!(group = group.as_i64(), count = *count, "scheduled retry requests");
            }
            RetryDecision::ClearFlag => {
                txn.update_group_fields(
                    group,
                    &GroupFieldUpdate {
                        may_need_more_requests: Some(false),
                        ..Default::default()
                    },
                )?;
            }
            RetryDecision::Wait => {}
        }
        txn.commit_txn()?;
        Ok(decision)
    }
}

fn validate_spec(txn: &mut dyn StorageTxn, spec: &CommitSetSpec) -> Result<(), SchedulerError> {
    let mut seen_repositories: Vec<RepositoryId> = vec![];
    for item in &spec.items {
        let commit = txn.commit(item.commit)?.ok_or_else(|| {
            SchedulerError::InvalidCommitSets(format!("unknown commit {}", item.commit.as_i64()))
        })?;
        if commit.repository != item.repository {
            return Err(SchedulerError::InvalidCommitSets(format!(
                "commit {} does not belong to repository {}",
                item.commit.as_i64(),
                item.repository.as_i64()
            )));
        }
        if seen_repositories.contains(&item.repository) {
            return Err(SchedulerError::InvalidCommitSets(format!(
                "repository {} appears twice in one commit set",
                item.repository.as_i64()
            )));
        }
        seen_repositories.push(item.repository);

        if let Some(owner) = item.commit_owner {
            if !spec.items.iter().any(|other| other.commit == owner) {
                return Err(SchedulerError::InvalidCommitSets(format!(
                    "owner commit {} is not part of the same commit set",
                    owner.as_i64()
                )));
            }
            if !txn.commit_is_owned_by(owner, item.commit)? {
                return Err(SchedulerError::InvalidCommitSets(format!(
                    "commit {} is not owned by commit {}",
                    item.commit.as_i64(),
                    owner.as_i64()
                )));
            }
        }
    }
    Ok(())
}

fn grow_in_txn(
    txn: &mut dyn StorageTxn,
    snapshot: &GroupSnapshot,
    add_count: u32,
    target: Option<CommitSetId>,
) -> Result<Vec<BuildRequestId>, SchedulerError> {
    if snapshot.group.hidden {
        return Err(SchedulerError::CannotAddToHiddenTestGroup);
    }
    if let Some(target) = target {
        if !snapshot.distinct_commit_sets().contains(&target) {
            return Err(SchedulerError::NoCommitSetInTestGroup(target));
        }
    }

    let requests: Vec<_> = snapshot
        .test_requests()
        .map(|request| (request.id, request.commit_set, request.order))
        .collect();
    let plan = plan_growth(snapshot.group.repetition_type, &requests, add_count, target)?;

    for &(id, order) in &plan.reorders {
        txn.update_request_order(id, order)?;
    }
    let created_at = now_unix();
    let mut added = vec![];
    for planned in &plan.additions {
        // New requests repeat an existing configuration, so a template test
        // request for the set always exists.
        let template = snapshot
            .test_requests()
            .find(|request| request.commit_set == planned.commit_set)
            .ok_or(SchedulerError::NoCommitSetInTestGroup(planned.commit_set))?;
        let id = txn.insert_build_request(&NewBuildRequest {
            test_group: snapshot.group.id,
            order: planned.order,
            commit_set: planned.commit_set,
            triggerable: template.triggerable,
            platform: template.platform,
            test: template.test,
            status: BuildRequestStatus::Pending,
            created_at_unix: created_at,
        })?;
        added.push(id);
    }
    Ok(added)
}

/// Pick the commit whose item receives the root. A bare repository key means
/// the top-level item; component repositories are disambiguated by the owner
/// repository of the owning commit.
fn resolve_upload_target(
    txn: &mut dyn StorageTxn,
    set: &ptq_core::CommitSet,
    key: RepositoryKey,
) -> Result<CommitId, SchedulerError> {
    let candidates: Vec<_> = set.items_for_repository(key.repository).collect();
    if candidates.is_empty() {
        return Err(SchedulerError::InvalidRepository(key.repository));
    }
    match key.owner_repository {
        None => candidates
            .iter()
            .find(|item| item.commit_owner.is_none())
            .map(|item| item.commit)
            .ok_or(SchedulerError::InvalidKeyForRepository(key.repository)),
        Some(owner_repository) => {
            for item in candidates {
                let Some(owner_commit) = item.commit_owner else {
                    continue;
                };
                let Some(owner) = txn.commit(owner_commit)? else {
                    continue;
                };
                if owner.repository == owner_repository {
                    return Ok(item.commit);
                }
            }
            Err(SchedulerError::InvalidKeyForRepository(key.repository))
        }
    }
}
