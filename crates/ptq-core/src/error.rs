use thiserror::Error;

use crate::ids::{BuildRequestId, CommitSetId, RepositoryId, TestGroupId};
use crate::model::BuildRequestStatus;

/// Categorical outcomes of scheduler operations. Every public operation
/// validates before mutating; an error means no state changed.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("invalid commit sets: {0}")]
    InvalidCommitSets(String),

    #[error("invalid repetition type `{0}`")]
    InvalidRepetitionType(String),

    #[error("the triggerable configuration does not support this repetition type")]
    UnsupportedRepetitionTypeForTriggerable,

    #[error("cannot add build requests to a hidden test group")]
    CannotAddToHiddenTestGroup,

    #[error("commit set id must be a positive integer")]
    InvalidCommitSet,

    #[error("commit set {0} is not referenced by this test group")]
    NoCommitSetInTestGroup(CommitSetId),

    #[error("targeted growth is not supported for this repetition type")]
    CommitSetNotSupportedRepetitionType,

    #[error("add count {add_count} must be a positive multiple of the commit set count {set_count}")]
    InvalidAddCount { add_count: u32, set_count: usize },

    #[error("test group {0} not found")]
    TestGroupNotFound(TestGroupId),

    #[error("build request {0} not found or not eligible for this operation")]
    InvalidBuildRequestType(BuildRequestId),

    #[error("cannot transition build request from {from:?} to {to:?}")]
    InvalidStatusTransition {
        from: BuildRequestStatus,
        to: BuildRequestStatus,
    },

    #[error("build request {0} still has commit set items awaiting a root")]
    IncompleteRootUploads(BuildRequestId),

    #[error("repository {0} is not part of the commit set")]
    InvalidRepository(RepositoryId),

    #[error("invalid owner key for repository {0}")]
    InvalidKeyForRepository(RepositoryId),

    #[error("notificationSentAt may only be set while needsNotification is false")]
    NotificationSentAtFieldShouldOnlyBeSetWhenNeedsNotificationIsFalse,

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}
