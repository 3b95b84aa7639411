//! Drives one task through `spec -> implementation -> review -> test_report`.
//!
//! Each stage attempt is: pick the agent (with domain routing for review),
//! resolve skills, run the pre-gate, execute, run the post-gate, append the
//! artifact. An all-satisfied post-gate advances the task; anything else
//! records the artifact as `needs_revision` and re-enters the stage until
//! `pipeline.max_revisions` is exhausted. Cancellation is honoured only at
//! gate boundaries, never while an agent is executing.

use crate::artifact::{ArtifactDraft, ArtifactRecord, HandoffArtifact};
use crate::catalog::Catalog;
use crate::error::{RelayError, Result};
use crate::executor::{AgentExecutor, Invocation};
use crate::gate::{self, GateContext, GateVerdict, RequirementCheckResult};
use crate::paths;
use crate::profile::AgentProfile;
use crate::skill::Skill;
use crate::store::ArtifactStore;
use crate::task::Task;
use crate::types::{Disposition, Stage, TaskStatus};
use chrono::Utc;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

/// Cancellation handle. Cloned handles share one flag; a task-bound handle
/// also watches the task's cancel marker so another process can cancel it.
#[derive(Debug, Clone, Default)]
pub struct Cancellation {
    flag: Arc<AtomicBool>,
    marker: Option<PathBuf>,
}

impl Cancellation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_task(root: &Path, task_id: &str) -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            marker: Some(paths::cancel_marker(root, task_id)),
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst) || self.marker.as_deref().is_some_and(Path::exists)
    }
}

/// What `request_cancel` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelRequest {
    /// The task was idle and is now cancelled.
    Cancelled,
    /// The task is running; its sequencer stops at the next gate boundary.
    Pending,
}

/// Cancel a task from outside its sequencer. An idle task is cancelled on
/// the spot; a running one is signalled through its cancel marker.
pub fn request_cancel(root: &Path, store: &ArtifactStore, task_id: &str) -> Result<CancelRequest> {
    let mut task = Task::load(root, task_id)?;
    if task.status.is_terminal() {
        return Err(RelayError::TaskNotRunnable {
            task: task_id.to_string(),
            reason: format!("status is {}", task.status),
        });
    }

    crate::io::atomic_write(&paths::cancel_marker(root, task_id), b"")?;
    if task.status == TaskStatus::Running {
        tracing::info!(task = task_id, "cancellation requested");
        return Ok(CancelRequest::Pending);
    }

    task.set_status(TaskStatus::Cancelled, Vec::new());
    task.save(root)?;
    store.mark_cancelled(task_id)?;
    tracing::info!(task = task_id, stage = %task.stage, "task cancelled");
    Ok(CancelRequest::Cancelled)
}

// ---------------------------------------------------------------------------
// RunLock
// ---------------------------------------------------------------------------

/// Exclusive claim on a task for one sequencer, in this process or another.
/// Held as a no-clobber `run.lock` file in the task directory and removed on
/// drop. A lock left behind by a killed process must be deleted by hand.
struct RunLock {
    path: PathBuf,
}

impl RunLock {
    fn acquire(root: &Path, task_id: &str) -> Result<Self> {
        let path = paths::run_lock(root, task_id);
        let holder = format!(
            "pid: {}\nsince: {}\n",
            std::process::id(),
            Utc::now().to_rfc3339()
        );
        match crate::io::write_new(&path, holder.as_bytes()) {
            Ok(()) => Ok(Self { path }),
            Err(RelayError::Io(e)) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(RelayError::TaskNotRunnable {
                    task: task_id.to_string(),
                    reason: format!("another run holds {}", path.display()),
                })
            }
            Err(e) => Err(e),
        }
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to release run lock");
        }
    }
}

// ---------------------------------------------------------------------------
// RunOutcome
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    Done,
    Blocked {
        stage: Stage,
        agent: String,
        failures: Vec<RequirementCheckResult>,
    },
    MaxRevisionsExceeded {
        stage: Stage,
        agent: String,
        revisions: u32,
        failures: Vec<RequirementCheckResult>,
    },
    Cancelled {
        stage: Stage,
    },
}

impl RunOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            RunOutcome::Done => 0,
            _ => 1,
        }
    }

    pub fn failures(&self) -> &[RequirementCheckResult] {
        match self {
            RunOutcome::Blocked { failures, .. }
            | RunOutcome::MaxRevisionsExceeded { failures, .. } => failures,
            _ => &[],
        }
    }
}

impl std::fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunOutcome::Done => write!(f, "done"),
            RunOutcome::Blocked { stage, agent, .. } => {
                write!(f, "blocked at {stage} ({agent})")
            }
            RunOutcome::MaxRevisionsExceeded {
                stage,
                agent,
                revisions,
                ..
            } => write!(
                f,
                "failed at {stage} ({agent}): {revisions} revisions exceeded the limit"
            ),
            RunOutcome::Cancelled { stage } => write!(f, "cancelled at {stage}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Sequencer
// ---------------------------------------------------------------------------

pub struct Sequencer<'a> {
    root: &'a Path,
    catalog: &'a Catalog,
    store: &'a ArtifactStore,
    executor: &'a dyn AgentExecutor,
    cancel: Cancellation,
}

impl<'a> Sequencer<'a> {
    pub fn new(
        root: &'a Path,
        catalog: &'a Catalog,
        store: &'a ArtifactStore,
        executor: &'a dyn AgentExecutor,
    ) -> Self {
        Self {
            root,
            catalog,
            store,
            executor,
            cancel: Cancellation::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: Cancellation) -> Self {
        self.cancel = cancel;
        self
    }

    /// Run the task until it is done, blocked, failed, or cancelled.
    ///
    /// A blocked task resumes from its blocked stage. A done task returns
    /// `Done` without executing anything. Failed and cancelled tasks are
    /// refused.
    pub fn run(&self, task_id: &str) -> Result<RunOutcome> {
        Task::load(self.root, task_id)?;
        let _lock = RunLock::acquire(self.root, task_id)?;
        // Reloaded under the lock: a previous holder may have moved it on.
        let mut task = Task::load(self.root, task_id)?;
        match task.status {
            TaskStatus::Done => return Ok(RunOutcome::Done),
            TaskStatus::Failed | TaskStatus::Cancelled => {
                return Err(RelayError::TaskNotRunnable {
                    task: task_id.to_string(),
                    reason: format!("status is {}", task.status),
                })
            }
            _ => {}
        }
        tracing::info!(task = task_id, stage = %task.stage, status = %task.status, "run started");

        loop {
            if self.check_cancelled(&mut task)? {
                return Ok(RunOutcome::Cancelled { stage: task.stage });
            }

            let stage = task.stage;
            let history = self.store.history(task_id)?;
            let agent = self.select_agent(stage, &task, &history)?;

            let pre = gate::check_pre(
                agent,
                &GateContext {
                    root: self.root,
                    task: &task,
                    history: &history,
                },
            );
            if let GateVerdict::Blocked(failures) = GateVerdict::pre(&pre) {
                tracing::warn!(
                    task = task_id,
                    stage = %stage,
                    agent = %agent.id,
                    failed = %requirement_ids(&failures),
                    "pre-gate blocked"
                );
                task.set_status(TaskStatus::Blocked, failures.clone());
                task.save(self.root)?;
                return Ok(RunOutcome::Blocked {
                    stage,
                    agent: agent.id.clone(),
                    failures,
                });
            }

            task.set_status(TaskStatus::Running, Vec::new());
            task.save(self.root)?;

            let draft = match self.execute(&task, stage, agent, &history) {
                Ok(draft) => draft,
                Err(e) => {
                    tracing::warn!(
                        task = task_id,
                        stage = %stage,
                        agent = %agent.id,
                        error = %e,
                        "agent invocation failed"
                    );
                    task.set_status(
                        TaskStatus::Blocked,
                        vec![RequirementCheckResult {
                            requirement: "executor".into(),
                            satisfied: false,
                            detail: e.to_string(),
                            fields: Vec::new(),
                        }],
                    );
                    task.save(self.root)?;
                    return Err(e);
                }
            };
            let artifact = HandoffArtifact::from_draft(stage, agent.id.clone(), draft);
            let post = gate::check_post(
                agent,
                &GateContext {
                    root: self.root,
                    task: &task,
                    history: &history,
                },
                &artifact,
            );
            let verdict = GateVerdict::post(&post);
            let disposition = if verdict.is_pass() {
                Disposition::Accepted
            } else {
                Disposition::NeedsRevision
            };
            let record = self.store.append(task_id, artifact, disposition, post)?;

            match verdict {
                GateVerdict::Pass => {
                    tracing::info!(
                        task = task_id,
                        stage = %stage,
                        agent = %agent.id,
                        seq = record.seq,
                        "stage accepted"
                    );
                    match stage.next() {
                        Some(next) => task.advance_to(next),
                        None => task.set_status(TaskStatus::Done, Vec::new()),
                    }
                    task.save(self.root)?;
                    if task.status == TaskStatus::Done {
                        tracing::info!(task = task_id, "task done");
                        return Ok(RunOutcome::Done);
                    }
                }
                GateVerdict::NeedsRevision(failures) | GateVerdict::Blocked(failures) => {
                    task.revisions += 1;
                    let max = self.catalog.pipeline().max_revisions;
                    if task.revisions > max {
                        tracing::warn!(
                            task = task_id,
                            stage = %stage,
                            revisions = task.revisions,
                            max,
                            "revision limit exceeded"
                        );
                        task.set_status(TaskStatus::Failed, failures.clone());
                        task.save(self.root)?;
                        return Ok(RunOutcome::MaxRevisionsExceeded {
                            stage,
                            agent: agent.id.clone(),
                            revisions: task.revisions,
                            failures,
                        });
                    }
                    tracing::warn!(
                        task = task_id,
                        stage = %stage,
                        agent = %agent.id,
                        seq = record.seq,
                        revision = task.revisions,
                        failed = %requirement_ids(&failures),
                        "needs revision"
                    );
                    task.set_status(TaskStatus::NeedsRevision, failures);
                    task.save(self.root)?;
                }
            }
        }
    }

    fn check_cancelled(&self, task: &mut Task) -> Result<bool> {
        if !self.cancel.is_cancelled() {
            return Ok(false);
        }
        task.set_status(TaskStatus::Cancelled, Vec::new());
        task.save(self.root)?;
        self.store.mark_cancelled(&task.id)?;
        tracing::info!(task = %task.id, stage = %task.stage, "task cancelled");
        Ok(true)
    }

    /// The stage's default agent; for review, routed by the topics of the
    /// accepted implementation (or the task's topics when it declares none).
    fn select_agent(
        &self,
        stage: Stage,
        task: &Task,
        history: &[ArtifactRecord],
    ) -> Result<&'a AgentProfile> {
        let catalog: &'a Catalog = self.catalog;
        let default = catalog.agent_for(stage)?;
        if stage != Stage::Review {
            return Ok(default);
        }

        let implementation = history
            .iter()
            .rev()
            .find(|r| r.is_accepted() && r.artifact.stage == Stage::Implementation);
        let topics = match implementation {
            Some(r) if !r.artifact.topics.is_empty() => &r.artifact.topics,
            _ => &task.topics,
        };

        let route = catalog.route(default, topics);
        if let Some(topic) = &route.topic {
            tracing::info!(
                task = %task.id,
                from = %default.id,
                to = %route.agent.id,
                topic = %topic,
                "review routed by domain"
            );
        }
        Ok(route.agent)
    }

    fn execute(
        &self,
        task: &Task,
        stage: Stage,
        agent: &AgentProfile,
        history: &[ArtifactRecord],
    ) -> Result<ArtifactDraft> {
        let registry = self.catalog.registry();
        let preloaded = registry.preloaded_for(agent)?;
        let triggered: Vec<&Skill> = registry
            .matches(&task.trigger_text(), agent)
            .iter()
            .filter(|id| !preloaded.iter().any(|s| &s.id == *id))
            .map(|id| registry.resolve(id))
            .collect::<Result<_>>()?;
        tracing::debug!(
            task = %task.id,
            agent = %agent.id,
            preloaded = ?preloaded.iter().map(|s| s.id.as_str()).collect::<Vec<_>>(),
            triggered = ?triggered.iter().map(|s| s.id.as_str()).collect::<Vec<_>>(),
            "skills resolved"
        );

        let find_accepted = |s: Stage| {
            history
                .iter()
                .rev()
                .find(|r| r.is_accepted() && r.artifact.stage == s)
        };
        let previous = Stage::all()
            .get(stage.index().wrapping_sub(1))
            .and_then(|prev| find_accepted(*prev));
        let revision_of = history
            .last()
            .filter(|r| task.revisions > 0 && r.artifact.stage == stage && !r.is_accepted());

        let invocation = Invocation {
            root: self.root,
            task,
            stage,
            agent,
            preloaded,
            triggered,
            spec: find_accepted(Stage::Spec).map(|r| &r.artifact),
            previous,
            revision_of,
            revision: task.revisions,
        };
        tracing::info!(
            task = %task.id,
            stage = %stage,
            agent = %agent.id,
            revision = task.revisions,
            "invoking agent"
        );
        self.executor.execute(&invocation)
    }
}

fn requirement_ids(results: &[RequirementCheckResult]) -> String {
    results
        .iter()
        .map(|r| r.requirement.as_str())
        .collect::<Vec<_>>()
        .join(",")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
