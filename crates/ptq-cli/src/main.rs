use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use ptq_core::{BuildRequestStatus, CommitSetId, TestGroupId};
use ptq_retry::RetryDecision;
use ptq_sched::{Scheduler, TestGroupUpdate};
use ptq_storage_sqlite::SqliteStorage;

mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "ptq", version)]
struct Cli {
    /// Path to the TOML config file
    #[arg(long, default_value = "ptq.toml")]
    config: PathBuf,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a default config and create the database
    Init,

    /// List every test group with its request counts
    Status {
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Show one test group in detail
    GroupShow {
        #[arg(long)]
        id: i64,
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Add test requests to a group
    GroupGrow {
        #[arg(long)]
        id: i64,
        #[arg(long)]
        count: u32,
        /// Commit set to grow (sequential groups only)
        #[arg(long)]
        commit_set: Option<i64>,
    },

    /// Cancel every unfinished request in a group
    GroupCancel {
        #[arg(long)]
        id: i64,
    },

    /// Hide a group from dashboards
    GroupHide {
        #[arg(long)]
        id: i64,
    },

    /// Act on a group's may-need-more-requests flag
    Retry {
        #[arg(long)]
        id: i64,
    },
}

#[derive(Serialize)]
struct GroupSummary {
    id: i64,
    name: String,
    repetition_type: &'static str,
    hidden: bool,
    may_need_more_requests: bool,
    pending: usize,
    running: usize,
    completed: usize,
    failed: usize,
    canceled: usize,
    finished: bool,
}

#[derive(Serialize)]
struct RequestSummary {
    id: i64,
    order: u32,
    commit_set: i64,
    kind: &'static str,
    status: String,
    status_url: Option<String>,
}

fn summarize(snapshot: &ptq_core::GroupSnapshot) -> GroupSummary {
    let count = |status: BuildRequestStatus| {
        snapshot.requests.iter().filter(|r| r.status == status).count()
    };
    GroupSummary {
        id: snapshot.group.id.as_i64(),
        name: snapshot.group.name.clone(),
        repetition_type: snapshot.group.repetition_type.as_str(),
        hidden: snapshot.group.hidden,
        may_need_more_requests: snapshot.group.may_need_more_requests,
        pending: count(BuildRequestStatus::Pending),
        running: count(BuildRequestStatus::Running),
        completed: count(BuildRequestStatus::Completed),
        failed: count(BuildRequestStatus::Failed)
            + count(BuildRequestStatus::FailedIfNotCompleted),
        canceled: count(BuildRequestStatus::Canceled),
        finished: snapshot.has_finished(),
    }
}

fn open_scheduler(config_path: &Path) -> anyhow::Result<(Config, Scheduler<SqliteStorage>)> {
    let config = Config::load(config_path)?;
    let storage = SqliteStorage::open(Path::new(&config.database.path))?;
    Ok((config, Scheduler::new(storage)))
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let cli = Cli::parse();

    match cli.cmd {
        Command::Init => {
            let config = Config::default_config();
            config.save(&cli.config)?;
            SqliteStorage::open(Path::new(&config.database.path))?;
            println!("Initialized {} and {}", cli.config.display(), config.database.path);
        }
        Command::Status { json } => {
            let (_, scheduler) = open_scheduler(&cli.config)?;
            let mut summaries = vec![];
            for id in scheduler.group_ids()? {
                if let Some(snapshot) = scheduler.group_snapshot(id)? {
                    summaries.push(summarize(&snapshot));
                }
            }
            if json {
                println!("{}", serde_json::to_string_pretty(&summaries)?);
            } else {
                println!("Test groups: {}", summaries.len());
                for s in summaries {
                    println!(
                        "- #{} {} [{}] pending={} running={} completed={} failed={} canceled={}{}",
                        s.id,
                        s.name,
                        s.repetition_type,
                        s.pending,
                        s.running,
                        s.completed,
                        s.failed,
                        s.canceled,
                        if s.may_need_more_requests { " (may need more)" } else { "" },
                    );
                }
            }
        }
        Command::GroupShow { id, json } => {
            let (_, scheduler) = open_scheduler(&cli.config)?;
            let snapshot = scheduler
                .group_snapshot(TestGroupId(id))?
                .ok_or_else(|| anyhow::anyhow!("test group {id} not found"))?;
            let requests: Vec<RequestSummary> = snapshot
                .requests
                .iter()
                .map(|r| RequestSummary {
                    id: r.id.as_i64(),
                    order: r.order,
                    commit_set: r.commit_set.as_i64(),
                    kind: if r.is_test() { "test" } else { "build" },
                    status: format!("{:?}", r.status),
                    status_url: r.status_url.clone(),
                })
                .collect();
            if json {
                println!("{}", serde_json::to_string_pretty(&requests)?);
            } else {
                let summary = summarize(&snapshot);
                println!("#{} {} [{}]", summary.id, summary.name, summary.repetition_type);
                for r in requests {
                    println!(
                        "  {:>3} {} set={} request={} {}",
                        r.order,
                        r.kind,
                        r.commit_set,
                        r.id,
                        r.status,
                    );
                }
            }
        }
        Command::GroupGrow { id, count, commit_set } => {
            let (_, scheduler) = open_scheduler(&cli.config)?;
            let added = scheduler.add_build_requests(
                TestGroupId(id),
                count,
                commit_set.map(CommitSetId),
            )?;
            println!("Added {} build requests to group {}", added.len(), id);
        }
        Command::GroupCancel { id } => {
            let (_, scheduler) = open_scheduler(&cli.config)?;
            scheduler
                .update_group(TestGroupId(id), &TestGroupUpdate { cancel: true, ..Default::default() })?;
            println!("Canceled group {}", id);
        }
        Command::GroupHide { id } => {
            let (_, scheduler) = open_scheduler(&cli.config)?;
            scheduler.update_group(
                TestGroupId(id),
                &TestGroupUpdate { hidden: Some(true), ..Default::default() },
            )?;
            println!("Hid group {}", id);
        }
        Command::Retry { id } => {
            let (config, scheduler) = open_scheduler(&cli.config)?;
            let decision =
                scheduler.process_may_need_more_requests(TestGroupId(id), config.retry.max_factor)?;
            match decision {
                RetryDecision::AddRequests { count, .. } => {
                    println!("Scheduled {} more requests for group {}", count, id)
                }
                RetryDecision::ClearFlag => println!("Cleared the flag on group {}", id),
                RetryDecision::Wait => println!("Group {} still has requests in flight", id),
            }
        }
    }
    Ok(())
}
