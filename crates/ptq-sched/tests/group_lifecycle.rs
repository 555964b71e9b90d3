use ptq_core::{
    BuildRequestStatus, CommitId, CommitSetId, PlatformId, RepetitionType, RepositoryId,
    SchedulerError, TaskId, TestGroupId, TestId, TriggerableId,
};
use ptq_retry::RetryDecision;
use ptq_sched::{
    CommitSetSpec, CreateGroupRequest, RepositoryKey, RootUpload, Scheduler, TestGroupUpdate,
    TriggerableCapabilities,
};
use ptq_storage::{InMemoryStorage, NewCommitSetItem, Storage};

const TRIGGERABLE: TriggerableId = TriggerableId(3);
const PLATFORM: PlatformId = PlatformId(31);
const TEST: TestId = TestId(844);

struct Fixture {
    scheduler: Scheduler<InMemoryStorage>,
    webkit: RepositoryId,
    shared: RepositoryId,
    revisions: Vec<CommitId>,
    shared_revisions: Vec<CommitId>,
}

fn fixture() -> Fixture {
    let storage = InMemoryStorage::new();
    let (webkit, shared, revisions, shared_revisions) = {
        let mut txn = storage.begin().unwrap();
        let webkit = txn.insert_repository("WebKit", None).unwrap();
        let shared = txn.insert_repository("Shared", None).unwrap();
        let revisions = (0..4i64)
            .map(|i| txn.insert_commit(webkit, &format!("19162{i}"), Some(191620 + i), None).unwrap())
            .collect();
        let shared_revisions = (0..4i64)
            .map(|i| txn.insert_commit(shared, &format!("80{i}"), Some(800 + i), None).unwrap())
            .collect();
        txn.commit_txn().unwrap();
        (webkit, shared, revisions, shared_revisions)
    };
    Fixture { scheduler: Scheduler::new(storage), webkit, shared, revisions, shared_revisions }
}

fn item(commit: CommitId, repository: RepositoryId, requires_build: bool) -> NewCommitSetItem {
    NewCommitSetItem { commit, repository, commit_owner: None, patch_file: None, requires_build }
}

impl Fixture {
    /// One single-repository configuration per given revision index.
    fn specs(&self, indices: &[usize], requires_build: bool) -> Vec<CommitSetSpec> {
        indices
            .iter()
            .map(|&i| CommitSetSpec {
                items: vec![item(self.revisions[i], self.webkit, requires_build)],
            })
            .collect()
    }

    fn create(
        &self,
        ty: RepetitionType,
        repetition_count: u32,
        commit_sets: Vec<CommitSetSpec>,
    ) -> Result<ptq_sched::CreatedGroup, SchedulerError> {
        self.scheduler.create_group(&CreateGroupRequest {
            task: TaskId(1376),
            name: "Confirm regression".into(),
            triggerable: TRIGGERABLE,
            platform: PLATFORM,
            test: TEST,
            repetition_count,
            repetition_type: ty,
            commit_sets,
            hidden: false,
            needs_notification: false,
        })
    }

    fn snapshot(&self, group: TestGroupId) -> ptq_core::GroupSnapshot {
        self.scheduler.group_snapshot(group).unwrap().unwrap()
    }
}

#[test]
fn sequential_creation_lays_out_contiguous_blocks() {
    let fx = fixture();
    let created = fx.create(RepetitionType::Sequential, 2, fx.specs(&[0, 1], false)).unwrap();
    assert_eq!(created.build_requests.len(), 4);

    let snapshot = fx.snapshot(created.test_group);
    let orders: Vec<u32> = snapshot.requests.iter().map(|r| r.order).collect();
    assert_eq!(orders, vec![0, 1, 2, 3]);
    assert_eq!(snapshot.requests[0].commit_set, snapshot.requests[1].commit_set);
    assert_eq!(snapshot.requests[2].commit_set, snapshot.requests[3].commit_set);
    assert_ne!(snapshot.requests[0].commit_set, snapshot.requests[2].commit_set);
    assert!(snapshot.requests.iter().all(|r| r.test == Some(TEST)));
    assert!(snapshot.requests.iter().all(|r| r.status == BuildRequestStatus::Pending));
}

#[test]
fn alternating_creation_interleaves_rounds() {
    let fx = fixture();
    let created = fx.create(RepetitionType::Alternating, 2, fx.specs(&[0, 1], false)).unwrap();

    let snapshot = fx.snapshot(created.test_group);
    let sets: Vec<CommitSetId> = snapshot.requests.iter().map(|r| r.commit_set).collect();
    assert_eq!(sets[0], sets[2]);
    assert_eq!(sets[1], sets[3]);
    assert_ne!(sets[0], sets[1]);
}

#[test]
fn build_only_requests_precede_test_requests() {
    let fx = fixture();
    let created = fx.create(RepetitionType::Sequential, 2, fx.specs(&[0, 1], true)).unwrap();
    // two build-only rows plus 2 sets x 2 repetitions
    assert_eq!(created.build_requests.len(), 6);

    let snapshot = fx.snapshot(created.test_group);
    assert_eq!(snapshot.requests[0].test, None);
    assert_eq!(snapshot.requests[1].test, None);
    assert_eq!(snapshot.requests[0].order, 0);
    assert_eq!(snapshot.requests[1].order, 1);
    let test_orders: Vec<u32> = snapshot.test_requests().map(|r| r.order).collect();
    assert_eq!(test_orders, vec![2, 3, 4, 5]);
    // build-only row for each set references that set
    assert_eq!(snapshot.requests[0].commit_set, snapshot.requests[2].commit_set);
    assert_eq!(snapshot.requests[1].commit_set, snapshot.requests[4].commit_set);
}

#[test]
fn repeated_configurations_share_one_commit_set() {
    let fx = fixture();
    let mut specs = fx.specs(&[0], false);
    specs.push(fx.specs(&[0], false).remove(0));
    let created = fx.create(RepetitionType::Sequential, 2, specs).unwrap();

    let snapshot = fx.snapshot(created.test_group);
    assert_eq!(snapshot.commit_sets.len(), 1);
    assert_eq!(snapshot.requests.len(), 4);
    let set = snapshot.requests[0].commit_set;
    assert!(snapshot.requests.iter().all(|r| r.commit_set == set));
}

#[test]
fn zero_repetitions_create_an_empty_group() {
    let fx = fixture();
    let created = fx.create(RepetitionType::Sequential, 0, fx.specs(&[0, 1], true)).unwrap();
    assert!(created.build_requests.is_empty());
    let snapshot = fx.snapshot(created.test_group);
    assert!(snapshot.requests.is_empty());
}

#[test]
fn creation_rejects_empty_and_mismatched_sets() {
    let fx = fixture();
    assert!(matches!(
        fx.create(RepetitionType::Sequential, 2, vec![]),
        Err(SchedulerError::InvalidCommitSets(_))
    ));

    let mismatched = vec![
        CommitSetSpec { items: vec![item(fx.revisions[0], fx.webkit, false)] },
        CommitSetSpec {
            items: vec![
                item(fx.revisions[1], fx.webkit, false),
                item(fx.shared_revisions[0], fx.shared, false),
            ],
        },
    ];
    assert!(matches!(
        fx.create(RepetitionType::Sequential, 2, mismatched),
        Err(SchedulerError::InvalidCommitSets(_))
    ));

    let duplicated_repository = vec![CommitSetSpec {
        items: vec![
            item(fx.revisions[0], fx.webkit, false),
            item(fx.revisions[1], fx.webkit, false),
        ],
    }];
    assert!(matches!(
        fx.create(RepetitionType::Sequential, 2, duplicated_repository),
        Err(SchedulerError::InvalidCommitSets(_))
    ));
}

struct SequentialOnly;

impl TriggerableCapabilities for SequentialOnly {
    fn supports_repetition_type(
        &self,
        _triggerable: TriggerableId,
        _platform: PlatformId,
        _test: TestId,
        ty: RepetitionType,
    ) -> bool {
        ty.is_sequential()
    }
}

#[test]
fn creation_consults_the_capability_registry() {
    let fx = fixture();
    let scheduler = Scheduler::with_capabilities(InMemoryStorage::new(), Box::new(SequentialOnly));
    let request = CreateGroupRequest {
        task: TaskId(1376),
        name: "Confirm regression".into(),
        triggerable: TRIGGERABLE,
        platform: PLATFORM,
        test: TEST,
        repetition_count: 2,
        repetition_type: RepetitionType::PairedParallel,
        commit_sets: fx.specs(&[0, 1], false),
        hidden: false,
        needs_notification: false,
    };
    assert!(matches!(
        scheduler.create_group(&request),
        Err(SchedulerError::UnsupportedRepetitionTypeForTriggerable)
    ));
}

#[test]
fn targeted_sequential_growth_matches_the_documented_example() {
    let fx = fixture();
    let created = fx.create(RepetitionType::Sequential, 2, fx.specs(&[0, 1], false)).unwrap();
    let snapshot = fx.snapshot(created.test_group);
    let set_a = snapshot.requests[0].commit_set;
    let set_b = snapshot.requests[2].commit_set;

    let added = fx.scheduler.add_build_requests(created.test_group, 2, Some(set_a)).unwrap();
    assert_eq!(added.len(), 2);

    let snapshot = fx.snapshot(created.test_group);
    let orders_for = |set: CommitSetId| -> Vec<u32> {
        snapshot.requests.iter().filter(|r| r.commit_set == set).map(|r| r.order).collect()
    };
    assert_eq!(orders_for(set_a), vec![0, 1, 2, 3]);
    assert_eq!(orders_for(set_b), vec![4, 5]);
    for id in added {
        let request = snapshot.request(id).unwrap();
        assert_eq!(request.status, BuildRequestStatus::Pending);
        assert_eq!(request.test, Some(TEST));
        assert_eq!(request.platform, PLATFORM);
    }
}

#[test]
fn untargeted_sequential_growth_extends_every_block() {
    let fx = fixture();
    let created = fx.create(RepetitionType::Sequential, 2, fx.specs(&[0, 1], false)).unwrap();
    fx.scheduler.add_build_requests(created.test_group, 1, None).unwrap();

    let snapshot = fx.snapshot(created.test_group);
    let sets = snapshot.distinct_commit_sets();
    for (i, &set) in sets.iter().enumerate() {
        let orders: Vec<u32> = snapshot
            .requests
            .iter()
            .filter(|r| r.commit_set == set)
            .map(|r| r.order)
            .collect();
        let base = (i * 3) as u32;
        assert_eq!(orders, vec![base, base + 1, base + 2]);
    }
}

#[test]
fn alternating_growth_is_uniform_rounds_only() {
    let fx = fixture();
    let created = fx.create(RepetitionType::Alternating, 2, fx.specs(&[0, 1], false)).unwrap();
    let set_a = fx.snapshot(created.test_group).requests[0].commit_set;

    assert!(matches!(
        fx.scheduler.add_build_requests(created.test_group, 2, Some(set_a)),
        Err(SchedulerError::CommitSetNotSupportedRepetitionType)
    ));
    assert!(matches!(
        fx.scheduler.add_build_requests(created.test_group, 3, None),
        Err(SchedulerError::InvalidAddCount { add_count: 3, set_count: 2 })
    ));

    fx.scheduler.add_build_requests(created.test_group, 2, None).unwrap();
    let snapshot = fx.snapshot(created.test_group);
    let sets: Vec<CommitSetId> = snapshot.requests.iter().map(|r| r.commit_set).collect();
    assert_eq!(sets.len(), 6);
    // order mod 2 keeps mapping to the same set
    assert_eq!(sets[4], sets[0]);
    assert_eq!(sets[5], sets[1]);
}

#[test]
fn growth_preconditions_are_checked_in_order() {
    let fx = fixture();
    let created = fx.create(RepetitionType::Sequential, 2, fx.specs(&[0, 1], false)).unwrap();

    assert!(matches!(
        fx.scheduler.add_build_requests(created.test_group, 1, Some(CommitSetId(0))),
        Err(SchedulerError::InvalidCommitSet)
    ));
    assert!(matches!(
        fx.scheduler.add_build_requests(TestGroupId(9999), 1, None),
        Err(SchedulerError::TestGroupNotFound(TestGroupId(9999)))
    ));
    assert!(matches!(
        fx.scheduler.add_build_requests(created.test_group, 1, Some(CommitSetId(12345))),
        Err(SchedulerError::NoCommitSetInTestGroup(_))
    ));

    fx.scheduler
        .update_group(created.test_group, &TestGroupUpdate { hidden: Some(true), ..Default::default() })
        .unwrap();
    assert!(matches!(
        fx.scheduler.add_build_requests(created.test_group, 1, None),
        Err(SchedulerError::CannotAddToHiddenTestGroup)
    ));
}

#[test]
fn status_reports_follow_the_lifecycle() {
    let fx = fixture();
    let created = fx.create(RepetitionType::Sequential, 1, fx.specs(&[0, 1], false)).unwrap();
    let request = created.build_requests[0];

    assert!(matches!(
        fx.scheduler.report_status(request, BuildRequestStatus::Completed, None),
        Err(SchedulerError::InvalidStatusTransition { .. })
    ));

    fx.scheduler
        .report_status(request, BuildRequestStatus::Running, Some("https://build.example/1"))
        .unwrap();
    // same-state report refreshes the URL
    fx.scheduler
        .report_status(request, BuildRequestStatus::Running, Some("https://build.example/2"))
        .unwrap();
    let snapshot = fx.snapshot(created.test_group);
    assert_eq!(
        snapshot.request(request).unwrap().status_url.as_deref(),
        Some("https://build.example/2")
    );

    fx.scheduler.report_status(request, BuildRequestStatus::Completed, None).unwrap();
    assert!(matches!(
        fx.scheduler.report_status(request, BuildRequestStatus::Running, None),
        Err(SchedulerError::InvalidStatusTransition { .. })
    ));

    assert!(matches!(
        fx.scheduler.report_status(ptq_core::BuildRequestId(9999), BuildRequestStatus::Running, None),
        Err(SchedulerError::InvalidBuildRequestType(_))
    ));
}

#[test]
fn failures_raise_the_may_need_more_requests_flag() {
    let fx = fixture();
    let created = fx.create(RepetitionType::Sequential, 1, fx.specs(&[0, 1], false)).unwrap();

    fx.scheduler.report_status(created.build_requests[0], BuildRequestStatus::Running, None).unwrap();
    fx.scheduler.report_status(created.build_requests[0], BuildRequestStatus::Failed, None).unwrap();
    assert!(fx.snapshot(created.test_group).group.may_need_more_requests);

    let created = fx.create(RepetitionType::Sequential, 1, fx.specs(&[2, 3], false)).unwrap();
    fx.scheduler.report_status(created.build_requests[1], BuildRequestStatus::Running, None).unwrap();
    fx.scheduler
        .report_status(created.build_requests[1], BuildRequestStatus::FailedIfNotCompleted, None)
        .unwrap();
    assert!(fx.snapshot(created.test_group).group.may_need_more_requests);
}

#[test]
fn build_kind_completion_waits_for_all_roots() {
    let fx = fixture();
    let spec = CommitSetSpec {
        items: vec![
            item(fx.revisions[0], fx.webkit, true),
            item(fx.shared_revisions[0], fx.shared, true),
        ],
    };
    let created = fx.create(RepetitionType::Sequential, 1, vec![spec]).unwrap();
    let build_request = created.build_requests[0];

    fx.scheduler.report_status(build_request, BuildRequestStatus::Running, None).unwrap();
    assert!(matches!(
        fx.scheduler.report_status(build_request, BuildRequestStatus::Completed, None),
        Err(SchedulerError::IncompleteRootUploads(_))
    ));

    let first = fx
        .scheduler
        .upload_root(
            build_request,
            RepositoryKey { repository: fx.webkit, owner_repository: None },
            &RootUpload { filename: "webkit-root.tar.gz".into(), external_build_id: None },
        )
        .unwrap();
    let snapshot = fx.snapshot(created.test_group);
    assert_eq!(snapshot.request(build_request).unwrap().status, BuildRequestStatus::Running);

    let second = fx
        .scheduler
        .upload_root(
            build_request,
            RepositoryKey { repository: fx.shared, owner_repository: None },
            &RootUpload { filename: "shared-root.tar.gz".into(), external_build_id: Some("7361".into()) },
        )
        .unwrap();
    let snapshot = fx.snapshot(created.test_group);
    let request = snapshot.request(build_request).unwrap();
    assert_eq!(request.status, BuildRequestStatus::Completed);
    assert_eq!(request.external_build_id.as_deref(), Some("7361"));
    let set = snapshot.commit_set(request.commit_set).unwrap();
    assert_eq!(set.all_root_files(), vec![first, second]);
}

#[test]
fn owned_commit_roots_use_the_owner_repository_key() {
    let storage = InMemoryStorage::new();
    let (webkit, jsc, webkit_commit, jsc_commit) = {
        let mut txn = storage.begin().unwrap();
        let webkit = txn.insert_repository("WebKit", None).unwrap();
        let jsc = txn.insert_repository("JavaScriptCore", Some(webkit)).unwrap();
        let webkit_commit = txn.insert_commit(webkit, "owner-rev", None, None).unwrap();
        let jsc_commit = txn.insert_commit(jsc, "owned-rev", None, None).unwrap();
        txn.insert_commit_ownership(webkit_commit, jsc_commit).unwrap();
        txn.commit_txn().unwrap();
        (webkit, jsc, webkit_commit, jsc_commit)
    };
    let scheduler = Scheduler::new(storage);
    let created = scheduler
        .create_group(&CreateGroupRequest {
            task: TaskId(1376),
            name: "Confirm regression".into(),
            triggerable: TRIGGERABLE,
            platform: PLATFORM,
            test: TEST,
            repetition_count: 1,
            repetition_type: RepetitionType::Sequential,
            commit_sets: vec![CommitSetSpec {
                items: vec![
                    item(webkit_commit, webkit, true),
                    NewCommitSetItem {
                        commit: jsc_commit,
                        repository: jsc,
                        commit_owner: Some(webkit_commit),
                        patch_file: None,
                        requires_build: true,
                    },
                ],
            }],
            hidden: false,
            needs_notification: false,
        })
        .unwrap();
    let build_request = created.build_requests[0];

    // wrong owner key for the component repository
    assert!(matches!(
        scheduler.upload_root(
            build_request,
            RepositoryKey { repository: jsc, owner_repository: Some(jsc) },
            &RootUpload { filename: "jsc-root.tar.gz".into(), external_build_id: None },
        ),
        Err(SchedulerError::InvalidKeyForRepository(_))
    ));
    // repository absent from the set
    assert!(matches!(
        scheduler.upload_root(
            build_request,
            RepositoryKey { repository: RepositoryId(9999), owner_repository: None },
            &RootUpload { filename: "stray.tar.gz".into(), external_build_id: None },
        ),
        Err(SchedulerError::InvalidRepository(_))
    ));

    scheduler
        .upload_root(
            build_request,
            RepositoryKey { repository: jsc, owner_repository: Some(webkit) },
            &RootUpload { filename: "jsc-root.tar.gz".into(), external_build_id: None },
        )
        .unwrap();
    let snapshot = scheduler.group_snapshot(created.test_group).unwrap().unwrap();
    assert_ne!(snapshot.request(build_request).unwrap().status, BuildRequestStatus::Completed);

    scheduler
        .upload_root(
            build_request,
            RepositoryKey { repository: webkit, owner_repository: None },
            &RootUpload { filename: "webkit-root.tar.gz".into(), external_build_id: Some("99".into()) },
        )
        .unwrap();
    let snapshot = scheduler.group_snapshot(created.test_group).unwrap().unwrap();
    let request = snapshot.request(build_request).unwrap();
    assert_eq!(request.status, BuildRequestStatus::Completed);
    assert_eq!(snapshot.commit_set(request.commit_set).unwrap().all_root_files().len(), 2);
}

#[test]
fn commit_set_items_reject_an_owner_absent_from_the_set() {
    let storage = InMemoryStorage::new();
    let (webkit, jsc, other_commit, jsc_commit) = {
        let mut txn = storage.begin().unwrap();
        let webkit = txn.insert_repository("WebKit", None).unwrap();
        let jsc = txn.insert_repository("JavaScriptCore", Some(webkit)).unwrap();
        let owner_commit = txn.insert_commit(webkit, "owner-rev", None, None).unwrap();
        let other_commit = txn.insert_commit(webkit, "other-rev", None, None).unwrap();
        let jsc_commit = txn.insert_commit(jsc, "owned-rev", None, None).unwrap();
        txn.insert_commit_ownership(owner_commit, jsc_commit).unwrap();
        txn.commit_txn().unwrap();
        (webkit, jsc, other_commit, jsc_commit)
    };
    let scheduler = Scheduler::new(storage);

    // the named owner commit is not one of the set's items
    let result = scheduler.create_group(&CreateGroupRequest {
        task: TaskId(1376),
        name: "Confirm regression".into(),
        triggerable: TRIGGERABLE,
        platform: PLATFORM,
        test: TEST,
        repetition_count: 1,
        repetition_type: RepetitionType::Sequential,
        commit_sets: vec![CommitSetSpec {
            items: vec![
                item(other_commit, webkit, true),
                NewCommitSetItem {
                    commit: jsc_commit,
                    repository: jsc,
                    commit_owner: Some(CommitId(9999)),
                    patch_file: None,
                    requires_build: true,
                },
            ],
        }],
        hidden: false,
        needs_notification: false,
    });
    assert!(matches!(result, Err(SchedulerError::InvalidCommitSets(_))));
}

#[test]
fn commit_set_items_reject_an_owner_without_an_ownership_edge() {
    let storage = InMemoryStorage::new();
    let (webkit, jsc, other_commit, jsc_commit) = {
        let mut txn = storage.begin().unwrap();
        let webkit = txn.insert_repository("WebKit", None).unwrap();
        let jsc = txn.insert_repository("JavaScriptCore", Some(webkit)).unwrap();
        let owner_commit = txn.insert_commit(webkit, "owner-rev", None, None).unwrap();
        let other_commit = txn.insert_commit(webkit, "other-rev", None, None).unwrap();
        let jsc_commit = txn.insert_commit(jsc, "owned-rev", None, None).unwrap();
        txn.insert_commit_ownership(owner_commit, jsc_commit).unwrap();
        txn.commit_txn().unwrap();
        (webkit, jsc, other_commit, jsc_commit)
    };
    let scheduler = Scheduler::new(storage);

    // the owner is in the set, but the registry has no edge for this pair
    let result = scheduler.create_group(&CreateGroupRequest {
        task: TaskId(1376),
        name: "Confirm regression".into(),
        triggerable: TRIGGERABLE,
        platform: PLATFORM,
        test: TEST,
        repetition_count: 1,
        repetition_type: RepetitionType::Sequential,
        commit_sets: vec![CommitSetSpec {
            items: vec![
                item(other_commit, webkit, true),
                NewCommitSetItem {
                    commit: jsc_commit,
                    repository: jsc,
                    commit_owner: Some(other_commit),
                    patch_file: None,
                    requires_build: true,
                },
            ],
        }],
        hidden: false,
        needs_notification: false,
    });
    assert!(matches!(result, Err(SchedulerError::InvalidCommitSets(_))));
}

#[test]
fn uploads_are_rejected_for_non_build_requests_and_terminal_requests() {
    let fx = fixture();
    let created = fx.create(RepetitionType::Sequential, 1, fx.specs(&[0], false)).unwrap();
    assert!(matches!(
        fx.scheduler.upload_root(
            created.build_requests[0],
            RepositoryKey { repository: fx.webkit, owner_repository: None },
            &RootUpload { filename: "root.tar.gz".into(), external_build_id: None },
        ),
        Err(SchedulerError::InvalidBuildRequestType(_))
    ));

    let created = fx.create(RepetitionType::Sequential, 1, fx.specs(&[1], true)).unwrap();
    fx.scheduler
        .update_group(created.test_group, &TestGroupUpdate { cancel: true, ..Default::default() })
        .unwrap();
    assert!(matches!(
        fx.scheduler.upload_root(
            created.build_requests[0],
            RepositoryKey { repository: fx.webkit, owner_repository: None },
            &RootUpload { filename: "root.tar.gz".into(), external_build_id: None },
        ),
        Err(SchedulerError::InvalidStatusTransition { .. })
    ));
}

#[test]
fn cancel_leaves_completed_requests_alone() {
    let fx = fixture();
    let created = fx.create(RepetitionType::Sequential, 1, fx.specs(&[0, 1], false)).unwrap();
    fx.scheduler.report_status(created.build_requests[0], BuildRequestStatus::Running, None).unwrap();
    fx.scheduler.report_status(created.build_requests[0], BuildRequestStatus::Completed, None).unwrap();
    fx.scheduler.report_status(created.build_requests[1], BuildRequestStatus::Running, None).unwrap();
    fx.scheduler.report_status(created.build_requests[1], BuildRequestStatus::Failed, None).unwrap();
    assert!(fx.snapshot(created.test_group).group.may_need_more_requests);

    fx.scheduler
        .update_group(created.test_group, &TestGroupUpdate { cancel: true, ..Default::default() })
        .unwrap();
    let snapshot = fx.snapshot(created.test_group);
    assert_eq!(snapshot.request(created.build_requests[0]).unwrap().status, BuildRequestStatus::Completed);
    assert_eq!(snapshot.request(created.build_requests[1]).unwrap().status, BuildRequestStatus::Failed);
    assert!(!snapshot.group.may_need_more_requests);
    assert!(snapshot.has_finished());
}

#[test]
fn hiding_clears_the_flag_without_touching_statuses() {
    let fx = fixture();
    let created = fx.create(RepetitionType::Sequential, 1, fx.specs(&[0, 1], false)).unwrap();
    fx.scheduler.report_status(created.build_requests[0], BuildRequestStatus::Running, None).unwrap();
    fx.scheduler.report_status(created.build_requests[0], BuildRequestStatus::Failed, None).unwrap();

    fx.scheduler
        .update_group(created.test_group, &TestGroupUpdate { hidden: Some(true), ..Default::default() })
        .unwrap();
    let snapshot = fx.snapshot(created.test_group);
    assert!(snapshot.group.hidden);
    assert!(!snapshot.group.may_need_more_requests);
    assert_eq!(snapshot.request(created.build_requests[1]).unwrap().status, BuildRequestStatus::Pending);
}

#[test]
fn notification_fields_are_mutually_exclusive() {
    let fx = fixture();
    let created = fx.create(RepetitionType::Sequential, 1, fx.specs(&[0], false)).unwrap();

    fx.scheduler
        .update_group(
            created.test_group,
            &TestGroupUpdate { needs_notification: Some(true), ..Default::default() },
        )
        .unwrap();
    assert!(matches!(
        fx.scheduler.update_group(
            created.test_group,
            &TestGroupUpdate { notification_sent_at: Some(Some(1_700_000_000)), ..Default::default() },
        ),
        Err(SchedulerError::NotificationSentAtFieldShouldOnlyBeSetWhenNeedsNotificationIsFalse)
    ));

    fx.scheduler
        .update_group(
            created.test_group,
            &TestGroupUpdate {
                needs_notification: Some(false),
                notification_sent_at: Some(Some(1_700_000_000)),
                ..Default::default()
            },
        )
        .unwrap();
    let snapshot = fx.snapshot(created.test_group);
    assert!(!snapshot.group.needs_notification);
    assert_eq!(snapshot.group.notification_sent_at, Some(1_700_000_000));

    // re-arming notification clears the sent timestamp
    fx.scheduler
        .update_group(
            created.test_group,
            &TestGroupUpdate { needs_notification: Some(true), ..Default::default() },
        )
        .unwrap();
    let snapshot = fx.snapshot(created.test_group);
    assert!(snapshot.group.needs_notification);
    assert_eq!(snapshot.group.notification_sent_at, None);
}

#[test]
fn retry_processing_grows_then_clears() {
    let fx = fixture();
    let created = fx.create(RepetitionType::Sequential, 2, fx.specs(&[0, 1], false)).unwrap();

    // first set: one success, one failure; second set: two successes
    for (i, &request) in created.build_requests.iter().enumerate() {
        fx.scheduler.report_status(request, BuildRequestStatus::Running, None).unwrap();
        let outcome = if i == 1 { BuildRequestStatus::Failed } else { BuildRequestStatus::Completed };
        fx.scheduler.report_status(request, outcome, None).unwrap();
    }
    assert!(fx.snapshot(created.test_group).group.may_need_more_requests);

    let decision = fx.scheduler.process_may_need_more_requests(created.test_group, 2.0).unwrap();
    let target = fx.snapshot(created.test_group).distinct_commit_sets()[0];
    assert_eq!(decision, RetryDecision::AddRequests { count: 1, target: Some(target) });

    let snapshot = fx.snapshot(created.test_group);
    assert_eq!(snapshot.requests.len(), 5);
    let retry = snapshot.requests.iter().find(|r| r.status == BuildRequestStatus::Pending).unwrap();
    assert_eq!(retry.commit_set, target);
    assert_eq!(retry.order, 2);
    assert!(snapshot.group.may_need_more_requests);

    fx.scheduler.report_status(retry.id, BuildRequestStatus::Running, None).unwrap();
    fx.scheduler.report_status(retry.id, BuildRequestStatus::Completed, None).unwrap();
    let decision = fx.scheduler.process_may_need_more_requests(created.test_group, 2.0).unwrap();
    assert_eq!(decision, RetryDecision::ClearFlag);
    assert!(!fx.snapshot(created.test_group).group.may_need_more_requests);
}
