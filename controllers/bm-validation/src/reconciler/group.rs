//! Cluster-mate queries for group validation rounds.

use super::{HostContext, Reconciler};
use crate::error::ControllerError;
use crate::state::{classify, ValidationState};
use crate::validator::GroupMembers;
use crds::{labels, BareMetalHost, Instance, ProvisioningState};
use kube::ResourceExt;
use tracing::{debug, info};

/// A group round needs at least this many hosts.
const MIN_GROUP_SIZE: usize = 2;

/// Master instance and the members it validates with.
#[derive(Debug)]
pub(super) struct InitializedGroup {
    pub master: Instance,
    pub members: GroupMembers,
}

impl Reconciler {
    /// Hosts to image together with `ctx.host`, or `None` while the group is not ready.
    ///
    /// Mates that are already in use, verified, not enrolled or imaging are left
    /// out. A host still settling (not available, or gated) holds the whole group,
    /// whether it is a mate or `ctx.host` itself.
    pub(super) async fn available_group(
        &self,
        ctx: &HostContext,
    ) -> Result<Option<Vec<BareMetalHost>>, ControllerError> {
        if ctx.host.provisioning_state() != ProvisioningState::Available {
            info!(host = %ctx.name, state = ?ctx.host.provisioning_state(), "Waiting for host to become available");
            return Ok(None);
        }
        if ctx.host.has_label(labels::GATE_VALIDATION) {
            info!(host = %ctx.name, "Host is gated, holding group validation");
            return Ok(None);
        }
        let cluster_group_id = ctx.cluster_group_id()?;
        let mates = self.services.store.list_cluster_members(cluster_group_id).await?;

        let mut hosts = vec![ctx.host.clone()];
        for mate in &mates {
            let name = mate.name_any();
            if name == ctx.name && mate.namespace().as_deref() == Some(ctx.namespace.as_str()) {
                continue;
            }
            if mate.is_owned_by(&self.config.cloud_account_id)
                || matches!(
                    mate.provisioning_state(),
                    ProvisioningState::Provisioned | ProvisioningState::Provisioning
                )
                || mate.has_label(labels::VERIFIED)
                || !mate.has_label(labels::READY_TO_TEST)
                || mate.has_label(labels::IMAGING)
            {
                debug!(host = %ctx.name, mate = %name, "Skipping cluster mate");
                continue;
            }
            if mate.provisioning_state() != ProvisioningState::Available || mate.has_label(labels::GATE_VALIDATION) {
                info!(
                    host = %ctx.name,
                    mate = %name,
                    state = ?mate.provisioning_state(),
                    gated = mate.has_label(labels::GATE_VALIDATION),
                    "Waiting for cluster mate before group validation"
                );
                return Ok(None);
            }
            hosts.push(mate.clone());
        }

        if hosts.len() < MIN_GROUP_SIZE {
            info!(host = %ctx.name, cluster_group_id, hosts = hosts.len(), "Not enough hosts for group validation");
            return Ok(None);
        }
        Ok(Some(hosts))
    }

    /// Master instance and members of the round, or `None` while a host of
    /// the round is still running instance validation.
    pub(super) async fn initialized_group(
        &self,
        ctx: &HostContext,
    ) -> Result<Option<InitializedGroup>, ControllerError> {
        let validation_id = ctx.validation_id()?;
        let mates = self
            .services
            .store
            .list_cluster_members(ctx.cluster_group_id()?)
            .await?;

        let mut round = Vec::new();
        for mate in mates
            .iter()
            .filter(|m| m.has_label(labels::READY_TO_TEST) && m.label(labels::VALIDATION_ID) == Some(validation_id))
        {
            match classify(mate.labels(), true) {
                state if state.is_group_stage() => round.push(mate),
                ValidationState::Initializing | ValidationState::Initialized | ValidationState::Verifying => {
                    info!(host = %ctx.name, mate = %mate.name_any(), "Waiting for instance validation of cluster mate");
                    return Ok(None);
                }
                ValidationState::BeginInstanceGroup => {}
                state => {
                    return Err(ControllerError::retryable(format!(
                        "cluster mate {} of validation {validation_id} is in unexpected state {state}",
                        mate.name_any()
                    )));
                }
            }
        }
        if round.is_empty() {
            return Err(ControllerError::retryable(format!(
                "no hosts found for validation {validation_id}"
            )));
        }

        let mut master = None;
        let mut members = GroupMembers::default();
        for host in round {
            let instance = self.require_instance(host).await?;
            if host.has_label(labels::MASTER_NODE) {
                master = Some(instance);
                continue;
            }
            let ip = instance.primary_address().ok_or_else(|| {
                ControllerError::retryable(format!("instance {} has no address yet", instance.name_any()))
            })?;
            members.ips.push(ip.to_string());
            members.names.push(host.name_any());
        }

        let master = master.ok_or_else(|| {
            ControllerError::retryable(format!("no master found for validation {validation_id}"))
        })?;
        Ok(Some(InitializedGroup { master, members }))
    }
}
