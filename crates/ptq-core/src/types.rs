use serde::{Deserialize, Serialize};

use crate::{ids::*, model::*};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Repository {
    pub id: RepositoryId,
    pub name: String,
    /// Component repositories carry the repository whose commits bundle theirs.
    pub owner: Option<RepositoryId>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Commit {
    pub id: CommitId,
    pub repository: RepositoryId,
    pub revision: String,
    pub commit_order: Option<i64>,
    pub time_unix: Option<i64>,
}

/// One repository's selection inside a commit set. Only `root_file` mutates
/// after creation, via root upload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CommitSetItem {
    pub commit: CommitId,
    pub repository: RepositoryId,
    /// The commit in the same set this item is nested under, for component
    /// repositories bundled inside a parent revision.
    pub commit_owner: Option<CommitId>,
    pub patch_file: Option<UploadedFileId>,
    pub requires_build: bool,
    pub root_file: Option<UploadedFileId>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CommitSet {
    pub id: CommitSetId,
    pub items: Vec<CommitSetItem>,
}

impl CommitSet {
    /// A set needing at least one freshly built artifact makes every request
    /// referencing it build-kind.
    pub fn requires_build(&self) -> bool {
        self.items.iter().any(|item| item.requires_build)
    }

    pub fn roots_satisfied(&self) -> bool {
        self.items
            .iter()
            .filter(|item| item.requires_build)
            .all(|item| item.root_file.is_some())
    }

    /// The top-level (non-component) item for a repository, if any.
    pub fn top_level_item(&self, repository: RepositoryId) -> Option<&CommitSetItem> {
        self.items
            .iter()
            .find(|item| item.repository == repository && item.commit_owner.is_none())
    }

    pub fn items_for_repository(
        &self,
        repository: RepositoryId,
    ) -> impl Iterator<Item = &CommitSetItem> {
        self.items.iter().filter(move |item| item.repository == repository)
    }

    pub fn item_for_commit(&self, commit: CommitId) -> Option<&CommitSetItem> {
        self.items.iter().find(|item| item.commit == commit)
    }

    pub fn all_root_files(&self) -> Vec<UploadedFileId> {
        self.items.iter().filter_map(|item| item.root_file).collect()
    }

    /// Two sets describe the same configuration when they pick the same
    /// (commit, patch) pairs. Root and requires-build state is ignored; it is
    /// derived, not part of the configuration identity.
    pub fn same_configuration(&self, other: &CommitSet) -> bool {
        if self.items.len() != other.items.len() {
            return false;
        }
        let mut lhs: Vec<_> = self.items.iter().map(|i| (i.commit, i.patch_file)).collect();
        let mut rhs: Vec<_> = other.items.iter().map(|i| (i.commit, i.patch_file)).collect();
        lhs.sort();
        rhs.sort();
        lhs == rhs
    }
}

/// A file uploaded by a worker (patch or built root). Content storage is the
/// collaborator's concern; the scheduler only tracks identity.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UploadedFile {
    pub id: UploadedFileId,
    pub filename: String,
    pub created_at_unix: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BuildRequest {
    pub id: BuildRequestId,
    pub test_group: TestGroupId,
    pub order: u32,
    pub commit_set: CommitSetId,
    pub triggerable: TriggerableId,
    pub platform: PlatformId,
    /// `None` marks a build-only request that exists to produce roots before
    /// any testing of its commit set starts.
    pub test: Option<TestId>,
    pub status: BuildRequestStatus,
    pub status_url: Option<String>,
    pub external_build_id: Option<String>,
    pub created_at_unix: i64,
}

impl BuildRequest {
    pub fn is_test(&self) -> bool {
        self.test.is_some()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TestGroup {
    pub id: TestGroupId,
    pub task: TaskId,
    pub name: String,
    pub repetition_type: RepetitionType,
    pub initial_repetition_count: u32,
    pub hidden: bool,
    pub needs_notification: bool,
    pub notification_sent_at: Option<i64>,
    pub may_need_more_requests: bool,
    pub created_at_unix: i64,
}
