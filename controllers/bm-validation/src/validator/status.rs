//! Task status probing
//!
//! The task writes its pid to `validation.pid` while running and its exit
//! code to `validation_exitcode` when it finishes.

use ssh_client::ExecOutput;
use std::collections::HashMap;
use std::fmt;

pub const WORK_DIR: &str = "/tmp/validation/";
pub const WRAPPER_SCRIPT: &str = "/tmp/validation/wrapper_script.sh";
pub const REMOTE_ARCHIVE: &str = "/tmp/validation/validation.tar.gz";
pub const OUTPUT_FILE: &str = "/tmp/validation/validation.out";

/// Prints `NotStarted` without a pid file, otherwise the pid if the process is alive.
pub const PID_PROBE: &str = "[[ ! -f /tmp/validation/validation.pid ]] && echo \"NotStarted\" || ps -o pid= -q `cat /tmp/validation/validation.pid`";
pub const EXIT_CODE_PROBE: &str = "cat /tmp/validation/validation_exitcode";
pub const RESULT_META_PROBE: &str = "cat /tmp/validation_result.meta";

const NOT_STARTED: &str = "NotStarted";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    NotStarted,
    InProgress,
    Success,
    Failed,
}

impl TaskStatus {
    #[must_use]
    pub fn is_finished(self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::NotStarted => "NotStarted",
            Self::InProgress => "InProgress",
            Self::Success => "Success",
            Self::Failed => "Failed",
        })
    }
}

/// What the pid probe saw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PidProbe {
    NotStarted,
    Running,
    /// A pid file exists but the process is gone
    Exited,
}

/// Interpret the output of [`PID_PROBE`]. A failed probe counts as an exited process.
#[must_use]
pub fn parse_pid_probe(probe: &ExecOutput) -> PidProbe {
    let text = if probe.success() { probe.output.trim() } else { "" };
    match text {
        "" => PidProbe::Exited,
        NOT_STARTED => PidProbe::NotStarted,
        _ => PidProbe::Running,
    }
}

/// Outcome of a finished task from its exit-code file; a missing file means the task died.
#[must_use]
pub fn status_from_exit_code(probe: &ExecOutput) -> TaskStatus {
    if probe.success() && probe.output.trim() == "0" {
        TaskStatus::Success
    } else {
        TaskStatus::Failed
    }
}

/// Parse `key=value` lines; only the first `=` splits, lines without one are skipped.
#[must_use]
pub fn parse_result_meta(text: &str) -> HashMap<String, String> {
    text.lines()
        .filter_map(|line| line.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .filter(|(k, _)| !k.is_empty())
        .collect()
}
