//! Remote validator
//!
//! Drives the validation task on an instance over SSH. The task runs
//! detached; its progress is derived from the pid and exit-code files it
//! leaves in the work directory, so every call here is safe to repeat.

pub mod artifact;
pub mod factory;
pub mod shell;
pub mod status;

pub use artifact::ArtifactCache;
pub use factory::{SshValidatorFactory, ValidatorFactory};
pub use shell::RemoteShell;
pub use status::TaskStatus;

use crate::error::ControllerError;
use crate::firmware::Version;
use crate::task_meta::{render_env, TaskCredentials, TaskMeta, ValidationMode};
use chrono::Utc;
use status::{
    parse_pid_probe, parse_result_meta, status_from_exit_code, PidProbe, EXIT_CODE_PROBE, OUTPUT_FILE,
    PID_PROBE, REMOTE_ARCHIVE, RESULT_META_PROBE, WORK_DIR, WRAPPER_SCRIPT,
};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use tracing::{debug, info, warn};

const WRAPPER_MODE: u32 = 0o777;
const ARCHIVE_MODE: u32 = 0o666;

/// Addresses of the non-master members of a group round.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupMembers {
    pub ips: Vec<String>,
    pub names: Vec<String>,
}

/// Local inputs of a validator besides the connection.
#[derive(Debug, Clone)]
pub struct ValidatorSettings {
    pub credentials: TaskCredentials,
    pub wrapper_script: PathBuf,
    pub cache_base: PathBuf,
}

pub struct Validator {
    shell: Box<dyn RemoteShell>,
    ip: String,
    meta: TaskMeta,
    settings: ValidatorSettings,
    members: Option<GroupMembers>,
}

impl fmt::Debug for Validator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Validator")
            .field("ip", &self.ip)
            .field("host", &self.meta.host_name)
            .field("members", &self.members)
            .finish_non_exhaustive()
    }
}

impl Validator {
    #[must_use]
    pub fn new(
        shell: Box<dyn RemoteShell>,
        ip: impl Into<String>,
        meta: TaskMeta,
        settings: ValidatorSettings,
        members: Option<GroupMembers>,
    ) -> Self {
        Self {
            shell,
            ip: ip.into(),
            meta,
            settings,
            members,
        }
    }

    #[must_use]
    pub fn meta(&self) -> &TaskMeta {
        &self.meta
    }

    /// Start the instance task. Returns true when it was already started.
    pub async fn start_instance_task(&self, firmware: &Version) -> Result<bool, ControllerError> {
        self.start_task(ValidationMode::Instance, firmware, HashMap::new()).await
    }

    /// Start the group task from the master. Returns true when it was already started.
    pub async fn start_group_task(&self, firmware: &Version) -> Result<bool, ControllerError> {
        let members = self.members.clone().unwrap_or_default();
        let extra = HashMap::from([
            ("MASTER_IP".to_string(), self.ip.clone()),
            ("MASTER_NAME".to_string(), self.meta.host_name.clone()),
            ("MEMBER_IPS".to_string(), members.ips.join(",")),
            ("MEMBER_NAMES".to_string(), members.names.join(",")),
        ]);
        info!(
            host = %self.meta.host_name,
            members = %members.names.join(","),
            "Starting group validation task"
        );
        self.start_task(ValidationMode::Group, firmware, extra).await
    }

    async fn start_task(
        &self,
        mode: ValidationMode,
        firmware: &Version,
        extra: HashMap<String, String>,
    ) -> Result<bool, ControllerError> {
        self.run(&format!("mkdir -p {WORK_DIR}")).await?;

        let current = self.task_status().await?;
        if current != TaskStatus::NotStarted {
            info!(host = %self.meta.host_name, ?mode, status = %current, "Validation task has already started");
            return Ok(true);
        }

        self.shell
            .upload_file(&self.settings.wrapper_script, WRAPPER_SCRIPT, WRAPPER_MODE)
            .await
            .map_err(|e| e.context("copying wrapper script"))?;
        let archive = self.meta.cache_path(&self.settings.cache_base, mode);
        self.shell
            .upload_file(&archive, REMOTE_ARCHIVE, ARCHIVE_MODE)
            .await
            .map_err(|e| e.context("copying validation archive"))?;

        let mut env = self
            .meta
            .task_env(mode, &self.settings.credentials, firmware, Utc::now());
        env.extend(extra);
        debug!(host = %self.meta.host_name, upload_path = ?env.get("uploadPath"), "Launching validation task");

        self.run(&format!(
            "{}nohup {WRAPPER_SCRIPT} >{OUTPUT_FILE} 2>&1 &",
            render_env(&env)
        ))
        .await?;
        info!(host = %self.meta.host_name, ?mode, "Validation task started");
        Ok(false)
    }

    /// Current status of the task on the instance.
    pub async fn task_status(&self) -> Result<TaskStatus, ControllerError> {
        let probe = self.shell.exec(PID_PROBE).await?;
        Ok(match parse_pid_probe(&probe) {
            PidProbe::NotStarted => TaskStatus::NotStarted,
            PidProbe::Running => TaskStatus::InProgress,
            PidProbe::Exited => status_from_exit_code(&self.shell.exec(EXIT_CODE_PROBE).await?),
        })
    }

    /// Returns (complete, status). A task that was never started counts as failed.
    pub async fn is_completed(&self) -> Result<(bool, TaskStatus), ControllerError> {
        let status = self.task_status().await?;
        Ok(match status {
            TaskStatus::NotStarted => (true, TaskStatus::Failed),
            s if s.is_finished() => (true, s),
            s => (false, s),
        })
    }

    /// Metadata written by the task; callers treat an error as "no metadata".
    pub async fn result_meta(&self) -> Result<HashMap<String, String>, ControllerError> {
        let output = self.shell.exec(RESULT_META_PROBE).await?;
        if !output.success() {
            return Err(ControllerError::retryable(format!(
                "reading validation result metadata: {}",
                output.output.trim()
            )));
        }
        Ok(parse_result_meta(&output.output))
    }

    /// Move the work directory aside so a later round starts clean.
    pub async fn clear_test_data(&self) {
        let backup = format!("/tmp/validationbkup-{}", Utc::now().format("%Y%m%d%H%M%S"));
        match self.shell.exec(&format!("mv -f {WORK_DIR} {backup}")).await {
            Ok(out) if !out.success() => {
                warn!(host = %self.meta.host_name, output = %out.output.trim(), "Failed to move validation data aside");
            }
            Err(e) => warn!(host = %self.meta.host_name, error = %e, "Failed to move validation data aside"),
            Ok(_) => {}
        }
    }

    /// Close the instance and bastion sessions.
    pub async fn close(self) {
        self.shell.close().await;
    }

    async fn run(&self, command: &str) -> Result<(), ControllerError> {
        let out = self.shell.exec(command).await?;
        if out.success() {
            Ok(())
        } else {
            Err(ControllerError::retryable(format!(
                "remote command failed with status {:?}: {}",
                out.exit_status,
                out.output.trim()
            )))
        }
    }
}
