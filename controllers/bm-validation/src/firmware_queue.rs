//! Firmware re-check queue
//!
//! Firmware map changes and the startup sweep enqueue hosts here instead of
//! on the host controller, so their reconcile runs with the firmware trigger.
//! A host is queued at most once at a time.

use crate::reconciler::{Outcome, Reconciler, Trigger};
use crds::{labels, BareMetalHost, ProvisioningState};
use kube::ResourceExt;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Host to re-check against the firmware map.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FirmwareRequest {
    pub namespace: String,
    pub name: String,
}

impl FirmwareRequest {
    #[must_use]
    pub fn for_host(host: &BareMetalHost) -> Self {
        Self {
            namespace: host.namespace().unwrap_or_default(),
            name: host.name_any(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FirmwareQueue {
    tx: mpsc::Sender<FirmwareRequest>,
    queued: Arc<Mutex<HashSet<FirmwareRequest>>>,
}

impl FirmwareQueue {
    #[must_use]
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<FirmwareRequest>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self {
                tx,
                queued: Arc::default(),
            },
            rx,
        )
    }

    /// Queue `request` unless it is already waiting.
    pub fn enqueue(&self, request: FirmwareRequest) {
        if !self.lock().insert(request.clone()) {
            debug!(host = %request.name, namespace = %request.namespace, "Firmware check already queued");
            return;
        }
        if let Err(e) = self.tx.try_send(request) {
            let request = match e {
                mpsc::error::TrySendError::Full(r) | mpsc::error::TrySendError::Closed(r) => r,
            };
            warn!(host = %request.name, namespace = %request.namespace, "Firmware queue unavailable, dropping request");
            self.lock().remove(&request);
        }
    }

    /// Queue `request` once `delay` has passed.
    pub fn enqueue_after(&self, request: FirmwareRequest, delay: Duration) {
        let queue = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.enqueue(request);
        });
    }

    /// Mark `request` as taken off the queue.
    pub fn take(&self, request: &FirmwareRequest) {
        self.lock().remove(request);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashSet<FirmwareRequest>> {
        self.queued.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Hosts of a namespace whose firmware is re-checked after a firmware map change.
#[must_use]
pub fn firmware_targets(hosts: &[BareMetalHost], cloud_account_id: &str) -> Vec<FirmwareRequest> {
    hosts
        .iter()
        .filter(|host| {
            let state = host.provisioning_state();
            state == ProvisioningState::Available
                || host.is_owned_by(cloud_account_id)
                || (state == ProvisioningState::Deprovisioning && host.has_label(labels::VERIFIED))
        })
        .map(FirmwareRequest::for_host)
        .collect()
}

/// Reconcile queued hosts one at a time with the firmware trigger.
pub async fn run_firmware_worker(
    reconciler: Arc<Reconciler>,
    queue: FirmwareQueue,
    mut rx: mpsc::Receiver<FirmwareRequest>,
) {
    info!("Firmware worker started");
    while let Some(request) = rx.recv().await {
        queue.take(&request);
        let FirmwareRequest { namespace, name } = &request;
        match reconciler.reconcile(namespace, name, Trigger::Firmware).await {
            Ok(Outcome::Done) => reconciler.reset_backoff(namespace, name),
            Ok(Outcome::Requeue(delay)) => {
                reconciler.reset_backoff(namespace, name);
                queue.enqueue_after(request, delay);
            }
            Err(e) => {
                let delay = reconciler.backoff_delay(namespace, name);
                error!(host = %name, namespace = %namespace, error = %e, ?delay, "Firmware reconcile failed");
                queue.enqueue_after(request, delay);
            }
        }
    }
    info!("Firmware worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::host_with_labels;
    use crds::{BareMetalHostStatus, ConsumerRef, ProvisionStatus};

    fn host_in_state(name: &str, state: ProvisioningState, host_labels: &[(&str, &str)]) -> BareMetalHost {
        let mut host = host_with_labels(name, "metal3-1", host_labels);
        host.status = Some(BareMetalHostStatus {
            provisioning: ProvisionStatus {
                state,
                ..Default::default()
            },
            ..Default::default()
        });
        host
    }

    #[tokio::test]
    async fn test_enqueue_dedupes_until_taken() {
        let (queue, mut rx) = FirmwareQueue::new(8);
        let request = FirmwareRequest {
            namespace: "metal3-1".to_string(),
            name: "device-1".to_string(),
        };
        queue.enqueue(request.clone());
        queue.enqueue(request.clone());
        assert_eq!(rx.recv().await, Some(request.clone()));
        assert!(rx.try_recv().is_err());

        queue.take(&request);
        queue.enqueue(request.clone());
        assert_eq!(rx.recv().await, Some(request));
    }

    #[tokio::test]
    async fn test_enqueue_after_delay() {
        let (queue, mut rx) = FirmwareQueue::new(8);
        let request = FirmwareRequest {
            namespace: "metal3-1".to_string(),
            name: "device-1".to_string(),
        };
        queue.enqueue_after(request.clone(), Duration::from_millis(20));
        assert!(rx.try_recv().is_err());
        assert_eq!(rx.recv().await, Some(request));
    }

    #[test]
    fn test_firmware_targets() {
        let mut owned = host_in_state("device-2", ProvisioningState::Provisioned, &[]);
        owned.spec.consumer_ref = Some(ConsumerRef {
            name: "device-2-validation".to_string(),
            namespace: "123456789012".to_string(),
            ..Default::default()
        });
        let hosts = vec![
            host_in_state("device-1", ProvisioningState::Available, &[]),
            owned,
            host_in_state("device-3", ProvisioningState::Deprovisioning, &[(labels::VERIFIED, labels::TRUE)]),
            host_in_state("device-4", ProvisioningState::Deprovisioning, &[]),
            host_in_state("device-5", ProvisioningState::Provisioned, &[]),
        ];
        let names: Vec<_> = firmware_targets(&hosts, "123456789012")
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(names, vec!["device-1", "device-2", "device-3"]);
    }
}
