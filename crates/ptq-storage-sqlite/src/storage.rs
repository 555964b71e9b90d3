use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use anyhow::{bail, Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use ptq_core::{
    BuildRequest, BuildRequestId, BuildRequestStatus, Commit, CommitId, CommitSet, CommitSetId,
    CommitSetItem, GroupSnapshot, PlatformId, RepetitionType, Repository, RepositoryId, TaskId,
    TestGroup, TestGroupId, TestId, TriggerableId, UploadedFileId,
};
use ptq_storage::{GroupFieldUpdate, NewBuildRequest, NewCommitSetItem, NewTestGroup, Storage, StorageTxn};

pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

impl SqliteStorage {
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(db_path)
            .with_context(|| format!("open sqlite db {}", db_path.display()))?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        let init_sql = include_str!("../migrations/0001_init.sql");
        conn.execute_batch(init_sql)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("open in-memory sqlite db")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        let init_sql = include_str!("../migrations/0001_init.sql");
        conn.execute_batch(init_sql)?;
        Ok(Self { conn: Mutex::new(conn) })
    }
}

fn status_to_str(s: BuildRequestStatus) -> &'static str {
    match s {
        BuildRequestStatus::Pending => "pending",
        BuildRequestStatus::Running => "running",
        BuildRequestStatus::Completed => "completed",
        BuildRequestStatus::Failed => "failed",
        BuildRequestStatus::FailedIfNotCompleted => "failedifnotcompleted",
        BuildRequestStatus::Canceled => "canceled",
    }
}

fn str_to_status(s: &str) -> BuildRequestStatus {
    match s {
        "running" => BuildRequestStatus::Running,
        "completed" => BuildRequestStatus::Completed,
        "failed" => BuildRequestStatus::Failed,
        "failedifnotcompleted" => BuildRequestStatus::FailedIfNotCompleted,
        "canceled" => BuildRequestStatus::Canceled,
        _ => BuildRequestStatus::Pending,
    }
}

fn str_to_repetition(s: &str) -> RepetitionType {
    match s {
        "sequential" => RepetitionType::Sequential,
        "paired-parallel" => RepetitionType::PairedParallel,
        _ => RepetitionType::Alternating,
    }
}

impl Storage for SqliteStorage {
    fn begin(&self) -> Result<Box<dyn StorageTxn + '_>> {
        let guard = match self.conn.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.execute_batch("BEGIN IMMEDIATE;")?;
        Ok(Box::new(SqliteTxn { guard, committed: false }))
    }
}

struct SqliteTxn<'a> {
    guard: MutexGuard<'a, Connection>,
    committed: bool,
}

impl Drop for SqliteTxn<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.guard.execute_batch("ROLLBACK;").ok();
        }
    }
}

impl SqliteTxn<'_> {
    fn load_commit_set(&self, id: CommitSetId) -> Result<Option<CommitSet>> {
        let mut stmt = self.guard.prepare(
            "SELECT commit_id, repository, commit_owner, patch_file, requires_build, root_file
             FROM commit_set_items WHERE commit_set=?1 ORDER BY item_index",
        )?;
        let rows = stmt.query_map([id.0], |r| {
            Ok(CommitSetItem {
                commit: CommitId(r.get(0)?),
                repository: RepositoryId(r.get(1)?),
                commit_owner: r.get::<_, Option<i64>>(2)?.map(CommitId),
                patch_file: r.get::<_, Option<i64>>(3)?.map(UploadedFileId),
                requires_build: r.get::<_, i64>(4)? != 0,
                root_file: r.get::<_, Option<i64>>(5)?.map(UploadedFileId),
            })
        })?;
        let mut items = vec![];
        for row in rows {
            items.push(row?);
        }
        if items.is_empty() {
            let exists: i64 = self.guard.query_row(
                "SELECT COUNT(1) FROM commit_sets WHERE id=?1",
                [id.0],
                |r| r.get(0),
            )?;
            if exists == 0 {
                return Ok(None);
            }
        }
        Ok(Some(CommitSet { id, items }))
    }
}

impl StorageTxn for SqliteTxn<'_> {
    fn insert_repository(&mut self, name: &str, owner: Option<RepositoryId>) -> Result<RepositoryId> {
        self.guard.execute(
            "INSERT INTO repositories(name, owner) VALUES (?1, ?2)",
            params![name, owner.map(|o| o.0)],
        )?;
        Ok(RepositoryId(self.guard.last_insert_rowid()))
    }

    fn insert_commit(
        &mut self,
        repository: RepositoryId,
        revision: &str,
        commit_order: Option<i64>,
        time_unix: Option<i64>,
    ) -> Result<CommitId> {
        self.guard.execute(
            "INSERT INTO commits(repository, revision, commit_order, commit_time) VALUES (?1, ?2, ?3, ?4)",
            params![repository.0, revision, commit_order, time_unix],
        )?;
        Ok(CommitId(self.guard.last_insert_rowid()))
    }

    fn insert_commit_ownership(&mut self, owner: CommitId, owned: CommitId) -> Result<()> {
        self.guard.execute(
            "INSERT OR IGNORE INTO commit_ownerships(owner, owned) VALUES (?1, ?2)",
            params![owner.0, owned.0],
        )?;
        Ok(())
    }

    fn repository(&mut self, id: RepositoryId) -> Result<Option<Repository>> {
        let row = self
            .guard
            .query_row(
                "SELECT id, name, owner FROM repositories WHERE id=?1",
                [id.0],
                |r| {
                    Ok(Repository {
                        id: RepositoryId(r.get(0)?),
                        name: r.get(1)?,
                        owner: r.get::<_, Option<i64>>(2)?.map(RepositoryId),
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    fn commit(&mut self, id: CommitId) -> Result<Option<Commit>> {
        let row = self
            .guard
            .query_row(
                "SELECT id, repository, revision, commit_order, commit_time FROM commits WHERE id=?1",
                [id.0],
                |r| {
                    Ok(Commit {
                        id: CommitId(r.get(0)?),
                        repository: RepositoryId(r.get(1)?),
                        revision: r.get(2)?,
                        commit_order: r.get(3)?,
                        time_unix: r.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    fn commit_is_owned_by(&mut self, owner: CommitId, owned: CommitId) -> Result<bool> {
        let count: i64 = self.guard.query_row(
            "SELECT COUNT(1) FROM commit_ownerships WHERE owner=?1 AND owned=?2",
            params![owner.0, owned.0],
            |r| r.get(0),
        )?;
        Ok(count != 0)
    }

    fn insert_uploaded_file(&mut self, filename: &str, created_at_unix: i64) -> Result<UploadedFileId> {
        self.guard.execute(
            "INSERT INTO uploaded_files(filename, created_at) VALUES (?1, ?2)",
            params![filename, created_at_unix],
        )?;
        Ok(UploadedFileId(self.guard.last_insert_rowid()))
    }

    fn insert_commit_set(&mut self, items: &[NewCommitSetItem]) -> Result<CommitSetId> {
        self.guard.execute("INSERT INTO commit_sets DEFAULT VALUES", [])?;
        let id = CommitSetId(self.guard.last_insert_rowid());
        for (index, item) in items.iter().enumerate() {
            self.guard.execute(
                "INSERT INTO commit_set_items(commit_set, commit_id, repository, commit_owner, patch_file, requires_build, root_file, item_index)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, NULL, ?7)",
                params![
                    id.0,
                    item.commit.0,
                    item.repository.0,
                    item.commit_owner.map(|c| c.0),
                    item.patch_file.map(|f| f.0),
                    item.requires_build as i64,
                    index as i64
                ],
            )?;
        }
        Ok(id)
    }

    fn commit_set(&mut self, id: CommitSetId) -> Result<Option<CommitSet>> {
        self.load_commit_set(id)
    }

    fn set_root_file(&mut self, set: CommitSetId, commit: CommitId, root: UploadedFileId) -> Result<()> {
        let changed = self.guard.execute(
            "UPDATE commit_set_items SET root_file=?1 WHERE commit_set=?2 AND commit_id=?3",
            params![root.0, set.0, commit.0],
        )?;
        if changed == 0 {
            bail!("commit {} is not in commit set {}", commit.0, set.0);
        }
        Ok(())
    }

    fn insert_test_group(&mut self, group: &NewTestGroup) -> Result<TestGroupId> {
        self.guard.execute(
            "INSERT INTO test_groups(task, name, repetition_type, initial_repetition_count, hidden, needs_notification, notification_sent_at, may_need_more_requests, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, NULL, 0, ?7)",
            params![
                group.task.0,
                group.name,
                group.repetition_type.as_str(),
                group.initial_repetition_count as i64,
                group.hidden as i64,
                group.needs_notification as i64,
                group.created_at_unix
            ],
        )?;
        Ok(TestGroupId(self.guard.last_insert_rowid()))
    }

    fn insert_build_request(&mut self, request: &NewBuildRequest) -> Result<BuildRequestId> {
        self.guard.execute(
            "INSERT INTO build_requests(test_group, request_order, commit_set, triggerable, platform, test, status, status_url, external_build_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, NULL, NULL, ?8)",
            params![
                request.test_group.0,
                request.order as i64,
                request.commit_set.0,
                request.triggerable.0,
                request.platform.0,
                request.test.map(|t| t.0),
                status_to_str(request.status),
                request.created_at_unix
            ],
        )?;
        Ok(BuildRequestId(self.guard.last_insert_rowid()))
    }

    fn group_snapshot(&mut self, id: TestGroupId) -> Result<Option<GroupSnapshot>> {
        let group = self
            .guard
            .query_row(
                "SELECT id, task, name, repetition_type, initial_repetition_count, hidden, needs_notification, notification_sent_at, may_need_more_requests, created_at
                 FROM test_groups WHERE id=?1",
                [id.0],
                |r| {
                    Ok(TestGroup {
                        id: TestGroupId(r.get(0)?),
                        task: TaskId(r.get(1)?),
                        name: r.get(2)?,
                        repetition_type: str_to_repetition(&r.get::<_, String>(3)?),
                        initial_repetition_count: r.get::<_, i64>(4)? as u32,
                        hidden: r.get::<_, i64>(5)? != 0,
                        needs_notification: r.get::<_, i64>(6)? != 0,
                        notification_sent_at: r.get(7)?,
                        may_need_more_requests: r.get::<_, i64>(8)? != 0,
                        created_at_unix: r.get(9)?,
                    })
                },
            )
            .optional()?;
        let Some(group) = group else {
            return Ok(None);
        };

        let mut requests = vec![];
        {
            let mut stmt = self.guard.prepare(
                "SELECT id, test_group, request_order, commit_set, triggerable, platform, test, status, status_url, external_build_id, created_at
                 FROM build_requests WHERE test_group=?1 ORDER BY request_order",
            )?;
            let rows = stmt.query_map([id.0], |r| {
                Ok(BuildRequest {
                    id: BuildRequestId(r.get(0)?),
                    test_group: TestGroupId(r.get(1)?),
                    order: r.get::<_, i64>(2)? as u32,
                    commit_set: CommitSetId(r.get(3)?),
                    triggerable: TriggerableId(r.get(4)?),
                    platform: PlatformId(r.get(5)?),
                    test: r.get::<_, Option<i64>>(6)?.map(TestId),
                    status: str_to_status(&r.get::<_, String>(7)?),
                    status_url: r.get(8)?,
                    external_build_id: r.get(9)?,
                    created_at_unix: r.get(10)?,
                })
            })?;
            for row in rows {
                requests.push(row?);
            }
        }

        let mut commit_sets: Vec<CommitSet> = vec![];
        for request in &requests {
            if commit_sets.iter().any(|set| set.id == request.commit_set) {
                continue;
            }
            let Some(set) = self.load_commit_set(request.commit_set)? else {
                bail!("request {} references missing commit set", request.id.0);
            };
            commit_sets.push(set);
        }

        Ok(Some(GroupSnapshot { group, requests, commit_sets }))
    }

    fn group_ids(&mut self) -> Result<Vec<TestGroupId>> {
        let mut stmt = self.guard.prepare("SELECT id FROM test_groups ORDER BY id")?;
        let rows = stmt.query_map([], |r| Ok(TestGroupId(r.get(0)?)))?;
        let mut ids = vec![];
        for row in rows {
            ids.push(row?);
        }
        Ok(ids)
    }

    fn find_request_group(&mut self, id: BuildRequestId) -> Result<Option<TestGroupId>> {
        let row = self
            .guard
            .query_row(
                "SELECT test_group FROM build_requests WHERE id=?1",
                [id.0],
                |r| Ok(TestGroupId(r.get(0)?)),
            )
            .optional()?;
        Ok(row)
    }

    fn update_request_order(&mut self, id: BuildRequestId, order: u32) -> Result<()> {
        self.guard.execute(
            "UPDATE build_requests SET request_order=?1 WHERE id=?2",
            params![order as i64, id.0],
        )?;
        Ok(())
    }

    fn update_request_status(
        &mut self,
        id: BuildRequestId,
        status: BuildRequestStatus,
        url: Option<&str>,
    ) -> Result<()> {
        self.guard.execute(
            "UPDATE build_requests SET status=?1, status_url=?2 WHERE id=?3",
            params![status_to_str(status), url, id.0],
        )?;
        Ok(())
    }

    fn set_request_build_id(&mut self, id: BuildRequestId, build_id: Option<&str>) -> Result<()> {
        self.guard.execute(
            "UPDATE build_requests SET external_build_id=?1 WHERE id=?2",
            params![build_id, id.0],
        )?;
        Ok(())
    }

    fn update_group_fields(&mut self, id: TestGroupId, fields: &GroupFieldUpdate) -> Result<()> {
        if let Some(hidden) = fields.hidden {
            self.guard.execute(
                "UPDATE test_groups SET hidden=?1 WHERE id=?2",
                params![hidden as i64, id.0],
            )?;
        }
        if let Some(needs_notification) = fields.needs_notification {
            self.guard.execute(
                "UPDATE test_groups SET needs_notification=?1 WHERE id=?2",
                params![needs_notification as i64, id.0],
            )?;
        }
        if let Some(sent_at) = fields.notification_sent_at {
            self.guard.execute(
                "UPDATE test_groups SET notification_sent_at=?1 WHERE id=?2",
                params![sent_at, id.0],
            )?;
        }
        if let Some(flag) = fields.may_need_more_requests {
            self.guard.execute(
                "UPDATE test_groups SET may_need_more_requests=?1 WHERE id=?2",
                params![flag as i64, id.0],
            )?;
        }
        Ok(())
    }

    fn commit_txn(mut self: Box<Self>) -> Result<()> {
        self.guard.execute_batch("COMMIT;")?;
        self.committed = true;
        Ok(())
    }
}
