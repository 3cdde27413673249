//! Master election for a group validation round.
//!
//! All hosts of a round share a validation id. The host with the smallest
//! name among them is the anchor; candidates write a claim on the anchor
//! only if none is present, so the first successful write decides the
//! round. A candidate is master iff the anchor's claim names it.

use crate::error::ControllerError;
use crate::state::{classify, ValidationState};
use crate::store::HostStore;
use crate::transitions::Transition;
use crds::{labels, BareMetalHost};
use kube::ResourceExt;
use tracing::info;

/// Hosts of `mates` taking part in round `validation_id`.
pub fn round_members<'a>(
    mates: &'a [BareMetalHost],
    validation_id: &'a str,
) -> impl Iterator<Item = &'a BareMetalHost> + 'a {
    mates
        .iter()
        .filter(move |m| m.label(labels::VALIDATION_ID) == Some(validation_id))
}

/// True when a host of the round is already marked master while still running instance work.
#[must_use]
pub fn has_active_master(mates: &[BareMetalHost], validation_id: &str) -> bool {
    round_members(mates, validation_id).any(|m| {
        m.has_label(labels::MASTER_NODE)
            && matches!(
                classify(m.labels(), true),
                ValidationState::Initializing
                    | ValidationState::Initialized
                    | ValidationState::InitializingInstanceGroup
                    | ValidationState::Verifying
            )
    })
}

/// Try to make `host` the master of its round. Returns true when it won.
///
/// `mates` must include `host` itself.
pub async fn elect_master(
    store: &dyn HostStore,
    host: &BareMetalHost,
    mates: &[BareMetalHost],
) -> Result<bool, ControllerError> {
    let Some(validation_id) = host.label(labels::VALIDATION_ID) else {
        return Err(ControllerError::non_retryable(format!(
            "host {} has no validation id",
            host.name_any()
        )));
    };
    if has_active_master(mates, validation_id) {
        return Ok(false);
    }

    let name = host.name_any();
    let Some(anchor) = round_members(mates, validation_id).min_by_key(|m| m.name_any()) else {
        return Ok(false);
    };
    let anchor = store
        .apply_labels(
            &anchor.namespace().unwrap_or_default(),
            &anchor.name_any(),
            &[Transition::ClaimMaster {
                candidate: name.clone(),
            }],
        )
        .await?;

    if anchor.label(labels::MASTER_CLAIM) != Some(name.as_str()) {
        return Ok(false);
    }
    store
        .apply_labels(&host.namespace().unwrap_or_default(), &name, &[Transition::MarkMaster])
        .await?;
    info!(host = %name, validation_id, "Elected master of the validation round");
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{group_host, InMemoryHostStore};
    use proptest::prelude::*;
    use std::sync::Arc;

    async fn elect_all(store: Arc<InMemoryHostStore>, names: Vec<String>) -> Vec<String> {
        let mates = store.list_cluster_members("cg-1").await.unwrap();
        let tasks = names.into_iter().map(|name| {
            let store = Arc::clone(&store);
            let mates = mates.clone();
            tokio::spawn(async move {
                let host = store.get_host("metal3-1", &name).await.unwrap().unwrap();
                elect_master(store.as_ref(), &host, &mates)
                    .await
                    .unwrap()
                    .then_some(name)
            })
        });
        futures::future::join_all(tasks)
            .await
            .into_iter()
            .filter_map(|r| r.unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_single_winner() {
        let store = Arc::new(InMemoryHostStore::new());
        for name in ["device-3", "device-1", "device-2"] {
            store.insert_host(group_host(name, "cg-1", "12345678"));
        }
        let winners = elect_all(Arc::clone(&store), vec!["device-3".into(), "device-2".into()]).await;
        assert_eq!(winners.len(), 1);

        let anchor = store.get_host("metal3-1", "device-1").await.unwrap().unwrap();
        assert_eq!(anchor.label(labels::MASTER_CLAIM), Some(winners[0].as_str()));
        let master = store.get_host("metal3-1", &winners[0]).await.unwrap().unwrap();
        assert!(master.has_label(labels::MASTER_NODE));
    }

    #[tokio::test]
    async fn test_other_round_is_ignored() {
        let store = Arc::new(InMemoryHostStore::new());
        store.insert_host(group_host("device-0", "cg-1", "00000001"));
        store.insert_host(group_host("device-1", "cg-1", "12345678"));

        let winners = elect_all(Arc::clone(&store), vec!["device-1".into()]).await;
        assert_eq!(winners, vec!["device-1".to_string()]);
        let other = store.get_host("metal3-1", "device-0").await.unwrap().unwrap();
        assert!(!other.has_label(labels::MASTER_CLAIM));
        assert!(!other.has_label(labels::MASTER_NODE));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_at_most_one_master_per_round(suffixes in proptest::collection::btree_set(0u32..100, 2..6)) {
            let names: Vec<String> = suffixes.iter().map(|s| format!("device-{s:02}")).collect();
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .worker_threads(4)
                .build()
                .unwrap();
            let winners = runtime.block_on(async {
                let store = Arc::new(InMemoryHostStore::new());
                for name in &names {
                    store.insert_host(group_host(name, "cg-1", "12345678"));
                }
                elect_all(store, names.clone()).await
            });
            prop_assert_eq!(winners.len(), 1);
        }
    }
}
