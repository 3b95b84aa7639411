//! The seam between the sequencer and whatever actually plays a role.
//!
//! [`CommandExecutor`] runs a configured shell command once per invocation.
//! The command sees the invocation through environment variables:
//!
//! | Variable | Value |
//! |---|---|
//! | `RELAY_ROOT` | project root (also the working directory) |
//! | `RELAY_TASK` | task id |
//! | `RELAY_STAGE` | `spec`, `implementation`, `review`, `test_report` |
//! | `RELAY_AGENT` | agent profile id |
//! | `RELAY_ALLOWED_TOOLS` | comma-separated tool names |
//! | `RELAY_REVISION` | `0` on first attempt, then 1, 2, ... |
//! | `RELAY_PROMPT_FILE` | rendered instructions |
//! | `RELAY_OUTPUT_FILE` | where the YAML artifact draft must be written |
//!
//! stdin is closed; stdout and stderr go to a log next to the prompt in the
//! task's `work/` directory.

use crate::artifact::{ArtifactDraft, ArtifactRecord, HandoffArtifact};
use crate::config::ExecutorConfig;
use crate::error::{ConfigError, RelayError, Result};
use crate::paths;
use crate::profile::AgentProfile;
use crate::skill::Skill;
use crate::task::Task;
use crate::types::Stage;
use std::fs::File;
#[cfg(unix)]
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

// ---------------------------------------------------------------------------
// Invocation
// ---------------------------------------------------------------------------

/// Everything an agent gets for one stage attempt.
#[derive(Debug, Clone)]
pub struct Invocation<'a> {
    pub root: &'a Path,
    pub task: &'a Task,
    pub stage: Stage,
    pub agent: &'a AgentProfile,
    pub preloaded: Vec<&'a Skill>,
    pub triggered: Vec<&'a Skill>,
    /// Accepted Spec, once there is one.
    pub spec: Option<&'a HandoffArtifact>,
    /// Accepted artifact of the preceding stage.
    pub previous: Option<&'a ArtifactRecord>,
    /// The record sent back for revision, when re-entering a stage.
    pub revision_of: Option<&'a ArtifactRecord>,
    pub revision: u32,
}

// ---------------------------------------------------------------------------
// AgentExecutor
// ---------------------------------------------------------------------------

/// Runs one agent invocation to completion. Blocking; never retried.
pub trait AgentExecutor: Send + Sync {
    fn execute(&self, invocation: &Invocation<'_>) -> Result<ArtifactDraft>;
}

impl<F> AgentExecutor for F
where
    F: Fn(&Invocation<'_>) -> Result<ArtifactDraft> + Send + Sync,
{
    fn execute(&self, invocation: &Invocation<'_>) -> Result<ArtifactDraft> {
        self(invocation)
    }
}

// ---------------------------------------------------------------------------
// CommandExecutor
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct CommandExecutor {
    command: String,
    timeout: Duration,
}

impl CommandExecutor {
    pub fn new(command: impl Into<String>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            timeout,
        }
    }

    pub fn from_config(config: &ExecutorConfig) -> Result<Self> {
        let command = config
            .command
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .ok_or_else(|| ConfigError::InvalidConfig("executor.command is not set".into()))?;
        if config.timeout_seconds == 0 {
            return Err(
                ConfigError::InvalidConfig("executor.timeout_seconds must be > 0".into()).into(),
            );
        }
        Ok(Self::new(
            command,
            Duration::from_secs(config.timeout_seconds),
        ))
    }
}

impl AgentExecutor for CommandExecutor {
    fn execute(&self, inv: &Invocation<'_>) -> Result<ArtifactDraft> {
        let work = paths::work_dir(inv.root, &inv.task.id);
        crate::io::ensure_dir(&work)?;

        let stem = format!("{}-r{}", inv.stage, inv.revision);
        let prompt_path = work.join(format!("{stem}.prompt.md"));
        let output_path = work.join(format!("{stem}.artifact.yaml"));
        let log_path = work.join(format!("{stem}.log"));

        crate::io::atomic_write(&prompt_path, crate::prompt::render(inv).as_bytes())?;
        if output_path.exists() {
            std::fs::remove_file(&output_path)?;
        }

        let log = File::create(&log_path)?;
        let log_err = log.try_clone()?;
        let tools: Vec<&str> = inv.agent.allowed_tools.iter().map(String::as_str).collect();

        let mut command = Command::new("sh");
        command
            .arg("-c")
            .arg(&self.command)
            .current_dir(inv.root)
            .env("RELAY_ROOT", inv.root)
            .env("RELAY_TASK", &inv.task.id)
            .env("RELAY_STAGE", inv.stage.as_str())
            .env("RELAY_AGENT", &inv.agent.id)
            .env("RELAY_ALLOWED_TOOLS", tools.join(","))
            .env("RELAY_REVISION", inv.revision.to_string())
            .env("RELAY_PROMPT_FILE", &prompt_path)
            .env("RELAY_OUTPUT_FILE", &output_path)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err));
        // Own process group, so a timeout also reaches background jobs.
        #[cfg(unix)]
        command.process_group(0);
        let mut child = command
            .spawn()
            .map_err(|e| RelayError::Executor(format!("failed to spawn '{}': {e}", self.command)))?;

        tracing::debug!(
            task = %inv.task.id,
            stage = %inv.stage,
            agent = %inv.agent.id,
            pid = child.id(),
            "agent command started"
        );

        let started = Instant::now();
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if started.elapsed() >= self.timeout {
                kill_group(&mut child);
                return Err(RelayError::Executor(format!(
                    "agent '{}' timed out after {}s on {} (log: {})",
                    inv.agent.id,
                    self.timeout.as_secs(),
                    inv.stage,
                    log_path.display()
                )));
            }
            std::thread::sleep(POLL_INTERVAL);
        };

        if !status.success() {
            return Err(RelayError::Executor(format!(
                "agent '{}' exited with {status} on {} (log: {})",
                inv.agent.id,
                inv.stage,
                log_path.display()
            )));
        }

        let raw = std::fs::read_to_string(&output_path).map_err(|_| {
            RelayError::Executor(format!(
                "agent '{}' wrote no artifact to {}",
                inv.agent.id,
                output_path.display()
            ))
        })?;
        serde_yaml::from_str(&raw).map_err(|e| {
            RelayError::Executor(format!(
                "invalid artifact draft in {}: {e}",
                output_path.display()
            ))
        })
    }
}

/// Kill the agent command and every process in its group.
fn kill_group(child: &mut Child) {
    #[cfg(unix)]
    {
        let group = format!("-{}", child.id());
        let killed = Command::new("kill")
            .args(["-KILL", "--", &group])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
        if !killed.is_ok_and(|s| s.success()) {
            tracing::warn!(pgid = child.id(), "failed to kill agent process group");
        }
    }
    let _ = child.kill();
    let _ = child.wait();
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::{RequirementCheck, RequirementStatement};
    use std::collections::BTreeSet;
    use tempfile::TempDir;

    fn agent() -> AgentProfile {
        AgentProfile {
            id: "pm".into(),
            display_name: "PM".into(),
            allowed_tools: BTreeSet::from(["read".to_string(), "write".to_string()]),
            critical_requirements: vec![RequirementStatement {
                id: "ack".into(),
                statement: "s".into(),
                check: RequirementCheck::Attested,
            }],
            ..Default::default()
        }
    }

    fn run(dir: &Path, command: &str, timeout: Duration) -> Result<ArtifactDraft> {
        let task = Task::new("t1", "Title");
        let agent = agent();
        let inv = Invocation {
            root: dir,
            task: &task,
            stage: Stage::Spec,
            agent: &agent,
            preloaded: vec![],
            triggered: vec![],
            spec: None,
            previous: None,
            revision_of: None,
            revision: 0,
        };
        CommandExecutor::new(command, timeout).execute(&inv)
    }

    #[test]
    fn reads_draft_from_output_file() {
        let dir = TempDir::new().unwrap();
        let cmd = r#"test -f "$RELAY_PROMPT_FILE" && printf 'summary: %s %s %s\n' "$RELAY_STAGE" "$RELAY_AGENT" "$RELAY_ALLOWED_TOOLS" > "$RELAY_OUTPUT_FILE""#;
        let draft = run(dir.path(), cmd, Duration::from_secs(10)).unwrap();
        assert_eq!(draft.summary, "spec pm read,write");
        assert!(dir.path().join(".relay/tasks/t1/work/spec-r0.prompt.md").exists());
    }

    #[test]
    fn nonzero_exit_is_executor_error() {
        let dir = TempDir::new().unwrap();
        let err = run(dir.path(), "echo boom >&2; exit 3", Duration::from_secs(10)).unwrap_err();
        assert!(matches!(err, RelayError::Executor(ref m) if m.contains("exited")));
        let log = std::fs::read_to_string(dir.path().join(".relay/tasks/t1/work/spec-r0.log"))
            .unwrap();
        assert!(log.contains("boom"));
    }

    #[test]
    fn missing_output_is_executor_error() {
        let dir = TempDir::new().unwrap();
        let err = run(dir.path(), "true", Duration::from_secs(10)).unwrap_err();
        assert!(matches!(err, RelayError::Executor(ref m) if m.contains("wrote no artifact")));
    }

    #[test]
    fn invalid_draft_is_executor_error() {
        let dir = TempDir::new().unwrap();
        let err = run(
            dir.path(),
            r#"echo 'sumary: typo' > "$RELAY_OUTPUT_FILE""#,
            Duration::from_secs(10),
        )
        .unwrap_err();
        assert!(matches!(err, RelayError::Executor(ref m) if m.contains("invalid artifact draft")));
    }

    #[test]
    fn slow_command_times_out() {
        let dir = TempDir::new().unwrap();
        let started = Instant::now();
        let err = run(dir.path(), "sleep 5", Duration::from_millis(200)).unwrap_err();
        assert!(matches!(err, RelayError::Executor(ref m) if m.contains("timed out")));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn timeout_kills_background_jobs() {
        let dir = TempDir::new().unwrap();
        let pid_file = dir.path().join("bg.pid");
        let cmd = format!(
            r#"sh -c 'echo $$ > "{}"; exec sleep 30' & wait"#,
            pid_file.display()
        );
        let err = run(dir.path(), &cmd, Duration::from_millis(300)).unwrap_err();
        assert!(matches!(err, RelayError::Executor(ref m) if m.contains("timed out")));

        let pid = std::fs::read_to_string(&pid_file).unwrap();
        let stat = Path::new("/proc").join(pid.trim()).join("stat");
        let deadline = Instant::now() + Duration::from_secs(3);
        // Gone, or a zombie waiting to be reaped.
        let dead = || match std::fs::read_to_string(&stat) {
            Err(_) => true,
            Ok(s) => s
                .rsplit(')')
                .next()
                .is_some_and(|state| state.trim_start().starts_with('Z')),
        };
        loop {
            if dead() {
                break;
            }
            assert!(Instant::now() < deadline, "background job survived the timeout");
            std::thread::sleep(Duration::from_millis(50));
        }
    }

    #[test]
    fn from_config_requires_command() {
        let err = CommandExecutor::from_config(&ExecutorConfig::default()).unwrap_err();
        assert!(err.is_configuration());
    }
}
