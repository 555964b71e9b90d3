use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

use anyhow::bail;
use ptq_core::{
    BuildRequest, BuildRequestId, BuildRequestStatus, Commit, CommitId, CommitSet, CommitSetId,
    CommitSetItem, GroupSnapshot, Repository, RepositoryId, TestGroup, TestGroupId, UploadedFile,
    UploadedFileId,
};

use crate::traits::{GroupFieldUpdate, NewBuildRequest, NewCommitSetItem, NewTestGroup, Storage, StorageTxn};

#[derive(Clone, Debug, Default)]
struct Inner {
    repositories: BTreeMap<RepositoryId, Repository>,
    commits: BTreeMap<CommitId, Commit>,
    commit_ownerships: BTreeSet<(CommitId, CommitId)>,
    uploaded_files: BTreeMap<UploadedFileId, UploadedFile>,
    commit_sets: BTreeMap<CommitSetId, CommitSet>,
    groups: BTreeMap<TestGroupId, TestGroup>,
    requests: BTreeMap<BuildRequestId, BuildRequest>,
    next_id: i64,
}

impl Inner {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Map-backed storage for tests and the demo CLI. Transactions take the lock
/// for their whole lifetime and work on a clone, which is swapped back in on
/// commit; a dropped transaction leaves the published state untouched.
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    inner: Mutex<Inner>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for InMemoryStorage {
    fn begin(&self) -> anyhow::Result<Box<dyn StorageTxn + '_>> {
        let guard = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let work = guard.clone();
        Ok(Box::new(InMemoryTxn { guard, work }))
    }
}

struct InMemoryTxn<'a> {
    guard: MutexGuard<'a, Inner>,
    work: Inner,
}

impl StorageTxn for InMemoryTxn<'_> {
    fn insert_repository(
        &mut self,
        name: &str,
        owner: Option<RepositoryId>,
    ) -> anyhow::Result<RepositoryId> {
        let id = RepositoryId(self.work.next_id());
        self.work
            .repositories
            .insert(id, Repository { id, name: name.to_string(), owner });
        Ok(id)
    }

    fn insert_commit(
        &mut self,
        repository: RepositoryId,
        revision: &str,
        commit_order: Option<i64>,
        time_unix: Option<i64>,
    ) -> anyhow::Result<CommitId> {
        let id = CommitId(self.work.next_id());
        self.work.commits.insert(
            id,
            Commit { id, repository, revision: revision.to_string(), commit_order, time_unix },
        );
        Ok(id)
    }

    fn insert_commit_ownership(&mut self, owner: CommitId, owned: CommitId) -> anyhow::Result<()> {
        self.work.commit_ownerships.insert((owner, owned));
        Ok(())
    }

    fn repository(&mut self, id: RepositoryId) -> anyhow::Result<Option<Repository>> {
        Ok(self.work.repositories.get(&id).cloned())
    }

    fn commit(&mut self, id: CommitId) -> anyhow::Result<Option<Commit>> {
        Ok(self.work.commits.get(&id).cloned())
    }

    fn commit_is_owned_by(&mut self, owner: CommitId, owned: CommitId) -> anyhow::Result<bool> {
        Ok(self.work.commit_ownerships.contains(&(owner, owned)))
    }

    fn insert_uploaded_file(
        &mut self,
        filename: &str,
        created_at_unix: i64,
    ) -> anyhow::Result<UploadedFileId> {
        let id = UploadedFileId(self.work.next_id());
        self.work
            .uploaded_files
            .insert(id, UploadedFile { id, filename: filename.to_string(), created_at_unix });
        Ok(id)
    }

    fn insert_commit_set(&mut self, items: &[NewCommitSetItem]) -> anyhow::Result<CommitSetId> {
        let id = CommitSetId(self.work.next_id());
        let items = items
            .iter()
            .map(|item| CommitSetItem {
                commit: item.commit,
                repository: item.repository,
                commit_owner: item.commit_owner,
                patch_file: item.patch_file,
                requires_build: item.requires_build,
                root_file: None,
            })
            .collect();
        self.work.commit_sets.insert(id, CommitSet { id, items });
        Ok(id)
    }

    fn commit_set(&mut self, id: CommitSetId) -> anyhow::Result<Option<CommitSet>> {
        Ok(self.work.commit_sets.get(&id).cloned())
    }

    fn set_root_file(
        &mut self,
        set: CommitSetId,
        commit: CommitId,
        root: UploadedFileId,
    ) -> anyhow::Result<()> {
        let Some(commit_set) = self.work.commit_sets.get_mut(&set) else {
            bail!("no commit set {}", set.as_i64());
        };
        let Some(item) = commit_set.items.iter_mut().find(|item| item.commit == commit) else {
            bail!("commit {} is not in commit set {}", commit.as_i64(), set.as_i64());
        };
        item.root_file = Some(root);
        Ok(())
    }

    fn insert_test_group(&mut self, group: &NewTestGroup) -> anyhow::Result<TestGroupId> {
        let id = TestGroupId(self.work.next_id());
        self.work.groups.insert(
            id,
            TestGroup {
                id,
                task: group.task,
                name: group.name.clone(),
                repetition_type: group.repetition_type,
                initial_repetition_count: group.initial_repetition_count,
                hidden: group.hidden,
                needs_notification: group.needs_notification,
                notification_sent_at: None,
                may_need_more_requests: false,
                created_at_unix: group.created_at_unix,
            },
        );
        Ok(id)
    }

    fn insert_build_request(
        &mut self,
        request: &NewBuildRequest,
    ) -> anyhow::Result<BuildRequestId> {
        let id = BuildRequestId(self.work.next_id());
        self.work.requests.insert(
            id,
            BuildRequest {
                id,
                test_group: request.test_group,
                order: request.order,
                commit_set: request.commit_set,
                triggerable: request.triggerable,
                platform: request.platform,
                test: request.test,
                status: request.status,
                status_url: None,
                external_build_id: None,
                created_at_unix: request.created_at_unix,
            },
        );
        Ok(id)
    }

    fn group_snapshot(&mut self, id: TestGroupId) -> anyhow::Result<Option<GroupSnapshot>> {
        let Some(group) = self.work.groups.get(&id).cloned() else {
            return Ok(None);
        };
        let mut requests: Vec<_> = self
            .work
            .requests
            .values()
            .filter(|request| request.test_group == id)
            .cloned()
            .collect();
        requests.sort_by_key(|request| request.order);
        let mut commit_sets: Vec<CommitSet> = Vec::new();
        for request in &requests {
            if commit_sets.iter().any(|set| set.id == request.commit_set) {
                continue;
            }
            let Some(set) = self.work.commit_sets.get(&request.commit_set) else {
                bail!("request {} references missing commit set", request.id.as_i64());
            };
            commit_sets.push(set.clone());
        }
        Ok(Some(GroupSnapshot { group, requests, commit_sets }))
    }

    fn group_ids(&mut self) -> anyhow::Result<Vec<TestGroupId>> {
        Ok(self.work.groups.keys().copied().collect())
    }

    fn find_request_group(
        &mut self,
        id: BuildRequestId,
    ) -> anyhow::Result<Option<TestGroupId>> {
        Ok(self.work.requests.get(&id).map(|request| request.test_group))
    }

    fn update_request_order(&mut self, id: BuildRequestId, order: u32) -> anyhow::Result<()> {
        let Some(request) = self.work.requests.get_mut(&id) else {
            bail!("no build request {}", id.as_i64());
        };
        request.order = order;
        Ok(())
    }

    fn update_request_status(
        &mut self,
        id: BuildRequestId,
        status: BuildRequestStatus,
        url: Option<&str>,
    ) -> anyhow::Result<()> {
        let Some(request) = self.work.requests.get_mut(&id) else {
            bail!("no build request {}", id.as_i64());
        };
        request.status = status;
        request.status_url = url.map(str::to_string);
        Ok(())
    }

    fn set_request_build_id(
        &mut self,
        id: BuildRequestId,
        build_id: Option<&str>,
    ) -> anyhow::Result<()> {
        let Some(request) = self.work.requests.get_mut(&id) else {
            bail!("no build request {}", id.as_i64());
        };
        request.external_build_id = build_id.map(str::to_string);
        Ok(())
    }

    fn update_group_fields(
        &mut self,
        id: TestGroupId,
        fields: &GroupFieldUpdate,
    ) -> anyhow::Result<()> {
        let Some(group) = self.work.groups.get_mut(&id) else {
            bail!("no test group {}", id.as_i64());
        };
        if let Some(hidden) = fields.hidden {
            group.hidden = hidden;
        }
        if let Some(needs_notification) = fields.needs_notification {
            group.needs_notification = needs_notification;
        }
        if let Some(notification_sent_at) = fields.notification_sent_at {
            group.notification_sent_at = notification_sent_at;
        }
        if let Some(flag) = fields.may_need_more_requests {
            group.may_need_more_requests = flag;
        }
        Ok(())
    }

    fn commit_txn(self: Box<Self>) -> anyhow::Result<()> {
        let InMemoryTxn { mut guard, work } = *self;
        *guard = work;
        Ok(())
    }
}
