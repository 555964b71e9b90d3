use ptq_core::{
    BuildRequestId, BuildRequestStatus, Commit, CommitId, CommitSet, CommitSetId, GroupSnapshot,
    PlatformId, Repository, RepositoryId, RepetitionType, TaskId, TestGroupId, TestId,
    TriggerableId, UploadedFileId,
};

/// Commit set item as supplied at creation time. `root_file` always starts
/// empty; roots arrive later by upload.
#[derive(Clone, Debug)]
pub struct NewCommitSetItem {
    pub commit: CommitId,
    pub repository: RepositoryId,
    pub commit_owner: Option<CommitId>,
    pub patch_file: Option<UploadedFileId>,
    pub requires_build: bool,
}

#[derive(Clone, Debug)]
pub struct NewTestGroup {
    pub task: TaskId,
    pub name: String,
    pub repetition_type: RepetitionType,
    pub initial_repetition_count: u32,
    pub hidden: bool,
    pub needs_notification: bool,
    pub created_at_unix: i64,
}

#[derive(Clone, Debug)]
pub struct NewBuildRequest {
    pub test_group: TestGroupId,
    pub order: u32,
    pub commit_set: CommitSetId,
    pub triggerable: TriggerableId,
    pub platform: PlatformId,
    pub test: Option<TestId>,
    pub status: BuildRequestStatus,
    pub created_at_unix: i64,
}

/// Partial update of test group fields. `notification_sent_at` uses a nested
/// option so callers can clear the timestamp explicitly.
#[derive(Clone, Debug, Default)]
pub struct GroupFieldUpdate {
    pub hidden: Option<bool>,
    pub needs_notification: Option<bool>,
    pub notification_sent_at: Option<Option<i64>>,
    pub may_need_more_requests: Option<bool>,
}

/// One atomic unit of scheduler work. Dropping a transaction without calling
/// `commit_txn` discards every mutation made through it.
pub trait StorageTxn {
    fn insert_repository(&mut self, name: &str, owner: Option<RepositoryId>)
        -> anyhow::Result<RepositoryId>;
    fn insert_commit(
        &mut self,
        repository: RepositoryId,
        revision: &str,
        commit_order: Option<i64>,
        time_unix: Option<i64>,
    ) -> anyhow::Result<CommitId>;
    fn insert_commit_ownership(&mut self, owner: CommitId, owned: CommitId) -> anyhow::Result<()>;
    fn repository(&mut self, id: RepositoryId) -> anyhow::Result<Option<Repository>>;
    fn commit(&mut self, id: CommitId) -> anyhow::Result<Option<Commit>>;
    fn commit_is_owned_by(&mut self, owner: CommitId, owned: CommitId) -> anyhow::Result<bool>;

    fn insert_uploaded_file(
        &mut self,
        filename: &str,
        created_at_unix: i64,
    ) -> anyhow::Result<UploadedFileId>;

    fn insert_commit_set(&mut self, items: &[NewCommitSetItem]) -> anyhow::Result<CommitSetId>;
    fn commit_set(&mut self, id: CommitSetId) -> anyhow::Result<Option<CommitSet>>;
    fn set_root_file(
        &mut self,
        set: CommitSetId,
        commit: CommitId,
        root: UploadedFileId,
    ) -> anyhow::Result<()>;

    fn insert_test_group(&mut self, group: &NewTestGroup) -> anyhow::Result<TestGroupId>;
    fn insert_build_request(&mut self, request: &NewBuildRequest)
        -> anyhow::Result<BuildRequestId>;
    fn group_snapshot(&mut self, id: TestGroupId) -> anyhow::Result<Option<GroupSnapshot>>;
    fn group_ids(&mut self) -> anyhow::Result<Vec<TestGroupId>>;
    fn find_request_group(&mut self, id: BuildRequestId)
        -> anyhow::Result<Option<TestGroupId>>;
    fn update_request_order(&mut self, id: BuildRequestId, order: u32) -> anyhow::Result<()>;
    fn update_request_status(
        &mut self,
        id: BuildRequestId,
        status: BuildRequestStatus,
        url: Option<&str>,
    ) -> anyhow::Result<()>;
    fn set_request_build_id(
        &mut self,
        id: BuildRequestId,
        build_id: Option<&str>,
    ) -> anyhow::Result<()>;
    fn update_group_fields(
        &mut self,
        id: TestGroupId,
        fields: &GroupFieldUpdate,
    ) -> anyhow::Result<()>;

    fn commit_txn(self: Box<Self>) -> anyhow::Result<()>;
}

pub trait Storage: Send + Sync {
    /// Begin a transaction. Transactions on the same storage serialize; the
    /// whole read-recompute-write sequence of a scheduler operation runs
    /// inside one.
    fn begin(&self) -> anyhow::Result<Box<dyn StorageTxn + '_>>;
}
