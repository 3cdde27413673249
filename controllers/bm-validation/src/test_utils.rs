//! Test utilities for unit testing the reconciler
//!
//! In-memory stand-ins for the Kubernetes API, the remote shell, the event
//! recorder and the validator factory, plus builders for test hosts.

#[cfg(test)]
use crate::config::OperatorConfig;
#[cfg(test)]
use crate::error::ControllerError;
#[cfg(test)]
use crate::events::EventPublisher;
#[cfg(test)]
use crate::firmware::FirmwareVersionMap;
#[cfg(test)]
use crate::store::{HostStore, MAX_UPDATE_ATTEMPTS};
#[cfg(test)]
use crate::task_meta::{TaskCredentials, TaskMeta};
#[cfg(test)]
use crate::transitions::{apply_all, Transition};
#[cfg(test)]
use crate::validator::status::{EXIT_CODE_PROBE, PID_PROBE, RESULT_META_PROBE, WORK_DIR};
#[cfg(test)]
use crate::validator::{GroupMembers, RemoteShell, Validator, ValidatorFactory, ValidatorSettings};
#[cfg(test)]
use async_trait::async_trait;
#[cfg(test)]
use crds::{labels, BareMetalHost, Instance};
#[cfg(test)]
use k8s_openapi::api::core::v1::ObjectReference;
#[cfg(test)]
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
#[cfg(test)]
use kube::runtime::events::EventType;
#[cfg(test)]
use kube::ResourceExt;
#[cfg(test)]
use ssh_client::ExecOutput;
#[cfg(test)]
use std::collections::{BTreeMap, HashMap};
#[cfg(test)]
use std::path::{Path, PathBuf};
#[cfg(test)]
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
#[cfg(test)]
use std::sync::{Arc, Mutex};

/// Operator configuration used across tests
#[cfg(test)]
pub fn test_config() -> OperatorConfig {
    OperatorConfig::from_yaml(
        r"
cloudAccountId: '123456789012'
enabledInstanceTypes: [bm-icp-gaudi2, bm-spr]
featureFlags:
  groupValidation: true
  enabledGroupInstanceTypes: [bm-icp-gaudi2]
  enableFirmwareUpgrade: true
envConfiguration:
  region: us-dev-1
  availabilityZone: us-dev-1a
validationReportS3Config:
  bucketName: reports
  cloudfrontPrefix: https://reports.example.com
validationTaskRepositoryUrl: https://repo.example.com/
validationTaskVersion:
  instanceVersionMap:
    bm-icp-gaudi2: 0.0.3
  clusterVersionMap:
    bm-icp-gaudi2: 1.0.0
sshConfig:
  privateKeyFilePath: /etc/ssh-keys/id_rsa
computeApiServerAddr: compute-api:80
",
    )
    .expect("test configuration is valid")
}

/// Host with the given labels and no status
#[cfg(test)]
pub fn host_with_labels(name: &str, namespace: &str, host_labels: &[(&str, &str)]) -> BareMetalHost {
    BareMetalHost {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(
                host_labels
                    .iter()
                    .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                    .collect(),
            ),
            ..Default::default()
        },
        spec: Default::default(),
        status: None,
    }
}

/// Enrolled gaudi2 host of cluster group `cluster` taking part in round `validation_id`
#[cfg(test)]
pub fn group_host(name: &str, cluster: &str, validation_id: &str) -> BareMetalHost {
    let type_label = labels::instance_type_label("bm-icp-gaudi2");
    host_with_labels(
        name,
        "metal3-1",
        &[
            (labels::READY_TO_TEST, labels::TRUE),
            (type_label.as_str(), labels::TRUE),
            (labels::CLUSTER_GROUP_ID, cluster),
            (labels::VALIDATION_ID, validation_id),
        ],
    )
}

/// Host store with optimistic concurrency on `resourceVersion`
#[cfg(test)]
#[derive(Debug, Default)]
pub struct InMemoryHostStore {
    hosts: Mutex<BTreeMap<(String, String), BareMetalHost>>,
    instances: Mutex<BTreeMap<(String, String), Instance>>,
    firmware: Mutex<HashMap<String, FirmwareVersionMap>>,
    version: AtomicU64,
    /// Label writes that lose the race to a concurrent writer
    conflicts: AtomicUsize,
    write_attempts: AtomicUsize,
}

#[cfg(test)]
impl InMemoryHostStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a host, bumping its resourceVersion.
    pub fn insert_host(&self, mut host: BareMetalHost) {
        host.metadata.resource_version = Some(self.next_version());
        let key = (host.namespace().unwrap_or_default(), host.name_any());
        self.hosts.lock().unwrap().insert(key, host);
    }

    /// Mutate a stored host the way metal3 would.
    pub fn update_host(&self, namespace: &str, name: &str, update: impl FnOnce(&mut BareMetalHost)) {
        let mut host = self.host(namespace, name);
        update(&mut host);
        self.insert_host(host);
    }

    /// Stored host; panics when it is missing.
    pub fn host(&self, namespace: &str, name: &str) -> BareMetalHost {
        self.hosts
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .unwrap_or_else(|| panic!("host {namespace}/{name} not found"))
    }

    pub fn insert_instance(&self, instance: Instance) {
        let key = (instance.namespace().unwrap_or_default(), instance.name_any());
        self.instances.lock().unwrap().insert(key, instance);
    }

    pub fn set_firmware_map(&self, namespace: &str, map: FirmwareVersionMap) {
        self.firmware.lock().unwrap().insert(namespace.to_string(), map);
    }

    /// Make the next `count` label writes find a newer resourceVersion.
    pub fn inject_conflicts(&self, count: usize) {
        self.conflicts.store(count, Ordering::SeqCst);
    }

    /// Label writes attempted so far, conflicting ones included.
    pub fn write_attempts(&self) -> usize {
        self.write_attempts.load(Ordering::SeqCst)
    }

    fn next_version(&self) -> String {
        (self.version.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }
}

#[cfg(test)]
#[async_trait]
impl HostStore for InMemoryHostStore {
    async fn get_host(&self, namespace: &str, name: &str) -> Result<Option<BareMetalHost>, ControllerError> {
        Ok(self
            .hosts
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn list_hosts(&self, namespace: &str) -> Result<Vec<BareMetalHost>, ControllerError> {
        Ok(self
            .hosts
            .lock()
            .unwrap()
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .map(|(_, host)| host.clone())
            .collect())
    }

    async fn list_cluster_members(&self, cluster_group_id: &str) -> Result<Vec<BareMetalHost>, ControllerError> {
        Ok(self
            .hosts
            .lock()
            .unwrap()
            .values()
            .filter(|host| host.label(labels::CLUSTER_GROUP_ID) == Some(cluster_group_id))
            .cloned()
            .collect())
    }

    async fn apply_labels(
        &self,
        namespace: &str,
        name: &str,
        transitions: &[Transition],
    ) -> Result<BareMetalHost, ControllerError> {
        let key = (namespace.to_string(), name.to_string());
        for _ in 0..MAX_UPDATE_ATTEMPTS {
            let Some(mut host) = self.hosts.lock().unwrap().get(&key).cloned() else {
                return Err(ControllerError::retryable(format!("host {namespace}/{name} not found")));
            };
            let next = apply_all(host.labels(), transitions);
            if &next == host.labels() {
                return Ok(host);
            }
            let read_version = host.metadata.resource_version.clone();
            host.metadata.labels = Some(next);

            // Let concurrent writers interleave between the read and the write.
            tokio::task::yield_now().await;

            self.write_attempts.fetch_add(1, Ordering::SeqCst);
            let mut hosts = self.hosts.lock().unwrap();
            let Some(stored) = hosts.get_mut(&key) else {
                return Err(ControllerError::retryable(format!("host {namespace}/{name} not found")));
            };
            if self
                .conflicts
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                stored.metadata.resource_version = Some(self.next_version());
            }
            if stored.metadata.resource_version == read_version {
                host.metadata.resource_version = Some(self.next_version());
                *stored = host.clone();
                return Ok(host);
            }
        }
        Err(ControllerError::Conflict(format!("{namespace}/{name}")))
    }

    async fn get_instance(&self, namespace: &str, name: &str) -> Result<Option<Instance>, ControllerError> {
        Ok(self
            .instances
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn firmware_map(&self, namespace: &str) -> Result<Option<FirmwareVersionMap>, ControllerError> {
        Ok(self.firmware.lock().unwrap().get(namespace).cloned())
    }
}

#[cfg(test)]
#[derive(Debug, Default)]
struct ShellState {
    commands: Vec<String>,
    uploads: Vec<(PathBuf, String, u32)>,
    launches: Vec<String>,
    /// A launch writes the pid file; moving the work directory aside removes it
    pid_file: bool,
    /// `Some(code)` once the task exited; an inner `None` means no exit-code file
    exit_code: Option<Option<i32>>,
    result_meta: Option<String>,
    closes: usize,
}

/// Remote shell emulating the validation task's pid and exit-code files
#[cfg(test)]
#[derive(Debug, Clone, Default)]
pub struct FakeShell {
    state: Arc<Mutex<ShellState>>,
}

#[cfg(test)]
impl FakeShell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn launches(&self) -> usize {
        self.state.lock().unwrap().launches.len()
    }

    pub fn last_launch(&self) -> Option<String> {
        self.state.lock().unwrap().launches.last().cloned()
    }

    pub fn uploads(&self) -> Vec<(PathBuf, String, u32)> {
        self.state.lock().unwrap().uploads.clone()
    }

    pub fn commands(&self) -> Vec<String> {
        self.state.lock().unwrap().commands.clone()
    }

    /// Make the task exit with `code`; `None` leaves no exit-code file.
    pub fn finish_task(&self, code: Option<i32>) {
        self.state.lock().unwrap().exit_code = Some(code);
    }

    pub fn set_result_meta(&self, meta: &str) {
        self.state.lock().unwrap().result_meta = Some(meta.to_string());
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closes > 0
    }
}

#[cfg(test)]
fn exec_output(output: &str, status: u32) -> ExecOutput {
    ExecOutput {
        output: output.to_string(),
        exit_status: Some(status),
    }
}

#[cfg(test)]
#[async_trait]
impl RemoteShell for FakeShell {
    async fn exec(&self, command: &str) -> Result<ExecOutput, ControllerError> {
        let mut state = self.state.lock().unwrap();
        state.commands.push(command.to_string());
        let out = if command == PID_PROBE {
            match (state.pid_file, state.exit_code) {
                (false, _) => exec_output("NotStarted", 0),
                (true, None) => exec_output("4242", 0),
                (true, Some(_)) => exec_output("", 1),
            }
        } else if command == EXIT_CODE_PROBE {
            match state.exit_code {
                Some(Some(code)) => exec_output(&code.to_string(), 0),
                _ => exec_output("cat: /tmp/validation/validation_exitcode: No such file or directory", 1),
            }
        } else if command == RESULT_META_PROBE {
            match &state.result_meta {
                Some(meta) => exec_output(meta, 0),
                None => exec_output("cat: /tmp/validation_result.meta: No such file or directory", 1),
            }
        } else {
            if command.contains("nohup ") {
                state.launches.push(command.to_string());
                state.pid_file = true;
                state.exit_code = None;
            } else if command.starts_with(&format!("mv -f {WORK_DIR} ")) {
                state.pid_file = false;
                state.exit_code = None;
            }
            exec_output("", 0)
        };
        Ok(out)
    }

    async fn upload_file(&self, local: &Path, remote: &str, mode: u32) -> Result<(), ControllerError> {
        self.state
            .lock()
            .unwrap()
            .uploads
            .push((local.to_path_buf(), remote.to_string(), mode));
        Ok(())
    }

    async fn close(self: Box<Self>) {
        self.state.lock().unwrap().closes += 1;
    }
}

/// Event publisher keeping every event in memory
#[cfg(test)]
#[derive(Debug, Default)]
pub struct RecordingEventPublisher {
    events: Mutex<Vec<(String, String, Option<String>)>>,
}

#[cfg(test)]
impl RecordingEventPublisher {
    /// Reasons of the events published on the object named `name`, oldest first.
    pub fn reasons_for(&self, name: &str) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(object, _, _)| object == name)
            .map(|(_, reason, _)| reason.clone())
            .collect()
    }

    /// Notes of the events published on `name`.
    pub fn notes_for(&self, name: &str) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(object, _, _)| object == name)
            .filter_map(|(_, _, note)| note.clone())
            .collect()
    }
}

#[cfg(test)]
#[async_trait]
impl EventPublisher for RecordingEventPublisher {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        _type_: EventType,
        reason: &str,
        _action: &str,
        note: Option<String>,
    ) {
        self.events.lock().unwrap().push((
            resource_ref.name.clone().unwrap_or_default(),
            reason.to_string(),
            note,
        ));
    }
}

/// Validator factory handing out one [`FakeShell`] per host
#[cfg(test)]
#[derive(Debug, Default)]
pub struct FakeValidatorFactory {
    shells: Mutex<HashMap<String, FakeShell>>,
    missing_artifact: Mutex<bool>,
    cache_failure: Mutex<bool>,
    members: Mutex<Vec<Option<GroupMembers>>>,
}

#[cfg(test)]
impl FakeValidatorFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shell of the validator for host `host_name`.
    pub fn shell(&self, host_name: &str) -> FakeShell {
        self.shells
            .lock()
            .unwrap()
            .entry(host_name.to_string())
            .or_default()
            .clone()
    }

    /// Fail every creation as if the validation archive were missing.
    pub fn fail_with_missing_artifact(&self) {
        *self.missing_artifact.lock().unwrap() = true;
    }

    /// Fail every creation with a missing archive reported through the cache layer.
    pub fn fail_caching_artifact(&self) {
        *self.cache_failure.lock().unwrap() = true;
    }

    /// Members passed to each validator created so far.
    pub fn members(&self) -> Vec<Option<GroupMembers>> {
        self.members.lock().unwrap().clone()
    }
}

#[cfg(test)]
#[async_trait]
impl ValidatorFactory for FakeValidatorFactory {
    async fn create(
        &self,
        instance: &Instance,
        meta: TaskMeta,
        members: Option<GroupMembers>,
    ) -> Result<Validator, ControllerError> {
        if *self.missing_artifact.lock().unwrap() {
            return Err(ControllerError::non_retryable("validation archive not found"));
        }
        if *self.cache_failure.lock().unwrap() {
            return Err(ControllerError::non_retryable("HEAD returned 404 Not Found")
                .context("caching validation archive")
                .context(format!("creating validator for {}", meta.host_name)));
        }
        self.members.lock().unwrap().push(members.clone());
        let ip = instance.primary_address().unwrap_or("10.0.0.1").to_string();
        let shell = self.shell(&meta.host_name);
        let settings = ValidatorSettings {
            credentials: TaskCredentials::default(),
            wrapper_script: PathBuf::from("wrapper_script.sh"),
            cache_base: PathBuf::from("/tmp/"),
        };
        Ok(Validator::new(Box::new(shell), ip, meta, settings, members))
    }
}
