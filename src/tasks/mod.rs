//! The fixed maintenance and reporting sequence run against one database session.

pub mod maintenance;
pub mod reports;

use anyhow::Result;
use rusqlite::Connection;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::RunConfiguration;
use crate::directory::{self, DirectoryService};
use crate::enrichment::EnrichmentCache;
use crate::report::MessageBody;
use crate::sqlite::{self, TransactionMode};

pub const NO_MATCHING_DATA: &str = "No matching data.";

/// State shared by every task in one run.
pub struct RunContext<'a> {
    pub config: &'a RunConfiguration,
    pub cache: EnrichmentCache,
    /// Whether `temp.reference_uids` holds this run's directory accounts.
    pub reference_uids_loaded: bool,
}

impl<'a> RunContext<'a> {
    pub fn new(config: &'a RunConfiguration, cache: EnrichmentCache) -> Self {
        RunContext {
            config,
            cache,
            reference_uids_loaded: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Task {
    PreMaintenance,
    DailyEventCount,
    TopCounts,
    PostMaintenance,
}

impl Task {
    pub const SEQUENCE: [Task; 4] = [
        Task::PreMaintenance,
        Task::DailyEventCount,
        Task::TopCounts,
        Task::PostMaintenance,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Task::PreMaintenance => "pre-maintenance",
            Task::DailyEventCount => "daily event count",
            Task::TopCounts => "top counts",
            Task::PostMaintenance => "post-maintenance",
        }
    }

    pub fn mode(&self) -> TransactionMode {
        match self {
            Task::PreMaintenance => TransactionMode::GuardedMutation,
            Task::DailyEventCount | Task::TopCounts => TransactionMode::AlwaysRollback,
            Task::PostMaintenance => TransactionMode::AutoCommit,
        }
    }

    pub fn is_enabled(&self, config: &RunConfiguration) -> bool {
        match self {
            Task::PreMaintenance | Task::PostMaintenance => config.should_maintain,
            Task::DailyEventCount | Task::TopCounts => config.should_report,
        }
    }

    /// Run the task body. Callers are expected to wrap this in the task's scope.
    pub fn run(&self, conn: &Connection, ctx: &mut RunContext<'_>) -> Result<Vec<String>> {
        match self {
            Task::PreMaintenance => maintenance::pre_maintenance(conn, ctx),
            Task::DailyEventCount => reports::daily_event_count(conn, ctx),
            Task::TopCounts => reports::top_counts(conn, ctx),
            Task::PostMaintenance => maintenance::post_maintenance(conn, ctx),
        }
    }
}

/// Turn a sub-report outcome into report sections: the heading, then either
/// the rendered blocks or a single error line.
pub fn section(heading: &str, subject: &str, outcome: Result<Vec<String>>) -> Vec<String> {
    let mut sections = vec![heading.to_string()];
    match outcome {
        Ok(blocks) => sections.extend(blocks),
        Err(e) => {
            warn!(action = "report", component = "task_runner", subject = subject, error = %e, "Sub-report failed");
            sections.push(format!("ERROR:  Failed to produce {}: {:#}", subject, e));
        }
    }
    sections
}

/// Runs tasks in order against one shared session.
pub struct TaskRunner<'c> {
    conn: &'c Connection,
}

impl<'c> TaskRunner<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        TaskRunner { conn }
    }

    /// Load the directory's account ids for the reference-account report.
    ///
    /// Skipped when reports are off or no directory is configured. A failure
    /// is reported in the body and leaves the reference set disabled.
    pub fn load_reference_uids(
        &self,
        directory: Option<&dyn DirectoryService>,
        ctx: &mut RunContext<'_>,
        body: &mut MessageBody,
    ) {
        ctx.reference_uids_loaded = false;
        if !ctx.config.should_report {
            return;
        }
        let Some(directory) = directory else {
            info!(action = "skip", component = "reference_uids", "No directory configured");
            return;
        };
        match directory::load_reference_uids(self.conn, directory) {
            Ok(_) => ctx.reference_uids_loaded = true,
            Err(e) => {
                warn!(action = "load", component = "reference_uids", error = %e, "Reference user ids unavailable");
                body.append([format!(
                    "ERROR:  Failed to load reference user ids from directory: {:#}",
                    e
                )]);
            }
        }
    }

    pub fn run(&self, tasks: &[Task], ctx: &mut RunContext<'_>, body: &mut MessageBody) {
        for task in tasks {
            if !task.is_enabled(ctx.config) {
                debug!(action = "skip", component = "task_runner", task = task.name(), "Task disabled");
                continue;
            }

            let start_time = Instant::now();
            info!(action = "start", component = "task_runner", task = task.name(), mode = ?task.mode(), "Running task");
            let is_dry_run = ctx.config.is_dry_run;
            let outcome = sqlite::scoped(self.conn, task.mode(), is_dry_run, |conn| {
                task.run(conn, ctx)
            });

            match outcome {
                Ok(sections) => {
                    info!(
                        action = "complete",
                        component = "task_runner",
                        task = task.name(),
                        section_count = sections.len(),
                        duration_ms = start_time.elapsed().as_millis(),
                        "Task completed"
                    );
                    body.append(sections);
                }
                Err(e) => {
                    error!(action = "complete", component = "task_runner", task = task.name(), error = %e, "Task failed");
                    body.append([format!("ERROR:  Failed to complete {}: {:#}", task.name(), e)]);
                }
            }
        }
    }
}
