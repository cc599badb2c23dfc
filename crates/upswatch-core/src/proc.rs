//! ---
//! upswatch_section: "02-shutdown-orchestration"
//! upswatch_subsection: "module"
//! upswatch_type: "source"
//! upswatch_scope: "code"
//! upswatch_description: "Deadline-bounded subprocess execution."
//! upswatch_version: "v0.1.0"
//! upswatch_owner: "tbd"
//! ---
//! Every external invocation in this daemon runs through [`run`], which
//! enforces a wall-clock deadline and kills the child on expiry. Hanging
//! `umount` and `ssh` calls must never stall the shutdown path.

use std::ffi::OsStr;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::debug;

/// Result of one bounded subprocess invocation. Callers log and continue;
/// nothing here aborts a stage.
#[derive(Debug)]
pub enum CommandOutcome {
    Completed {
        code: i32,
        stdout: String,
        stderr: String,
    },
    /// Deadline expired; the child was killed.
    TimedOut,
    /// The program could not be spawned at all.
    LaunchFailed(std::io::Error),
}

impl CommandOutcome {
    pub fn success(&self) -> bool {
        matches!(self, CommandOutcome::Completed { code: 0, .. })
    }

    pub fn stdout(&self) -> &str {
        match self {
            CommandOutcome::Completed { stdout, .. } => stdout,
            _ => "",
        }
    }

    pub fn stderr(&self) -> &str {
        match self {
            CommandOutcome::Completed { stderr, .. } => stderr,
            _ => "",
        }
    }

    /// Short description for log lines.
    pub fn describe(&self) -> String {
        match self {
            CommandOutcome::Completed { code, .. } => format!("exit code {code}"),
            CommandOutcome::TimedOut => "timed out".to_owned(),
            CommandOutcome::LaunchFailed(err) => format!("failed to launch: {err}"),
        }
    }
}

/// Run `program` with `args`, killing the child when `deadline` expires.
pub async fn run<S: AsRef<OsStr>>(program: &str, args: &[S], deadline: Duration) -> CommandOutcome {
    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .env("LC_NUMERIC", "C")
        .kill_on_drop(true);

    let child = match command.spawn() {
        Ok(child) => child,
        Err(err) => return CommandOutcome::LaunchFailed(err),
    };

    // Dropping the in-flight future on timeout reaps the child via
    // kill_on_drop; the deadline is therefore a hard bound.
    match tokio::time::timeout(deadline, child.wait_with_output()).await {
        Err(_) => {
            debug!(program, deadline_s = deadline.as_secs(), "subprocess deadline expired");
            CommandOutcome::TimedOut
        }
        Ok(Err(err)) => CommandOutcome::LaunchFailed(err),
        Ok(Ok(output)) => CommandOutcome::Completed {
            code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        },
    }
}

/// Whether `name` resolves on the current `PATH`.
pub async fn command_exists(name: &str) -> bool {
    run("which", &[name], Duration::from_secs(5)).await.success()
}
