//! Firmware resolver
//!
//! Desired firmware versions come from the `ironic-fw-update` ConfigMap of
//! the host's namespace. Machine images advertise the firmware builds they
//! support; the newest image supporting the desired build is used for
//! validation.

use crate::error::ControllerError;
use chrono::{DateTime, Duration, Utc};
use compute_client::proto::MachineImage;
use k8s_openapi::api::core::v1::ConfigMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Name of the firmware ConfigMap, one per host namespace.
pub const FIRMWARE_CONFIGMAP: &str = "ironic-fw-update";
/// Data key holding the JSON document.
pub const FIRMWARE_DATA_KEY: &str = "ironic-fw-update.json";

/// Desired firmware of an instance type. Empty fields mean "no constraint".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Version {
    #[serde(default)]
    pub build_version: String,
    #[serde(default)]
    pub spi_version: String,
    #[serde(default)]
    pub full_fw_version: String,
}

/// Firmware versions per instance type.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FirmwareVersionMap {
    #[serde(default)]
    pub instance_type_firmware_versions: HashMap<String, Version>,
    #[serde(default)]
    pub last_modified: Option<DateTime<Utc>>,
}

impl FirmwareVersionMap {
    /// Decode the map carried by a firmware ConfigMap; `None` when the data key is absent.
    pub fn from_config_map(config_map: &ConfigMap) -> Result<Option<Self>, ControllerError> {
        config_map
            .data
            .as_ref()
            .and_then(|d| d.get(FIRMWARE_DATA_KEY))
            .map(|json| serde_json::from_str(json).map_err(ControllerError::from))
            .transpose()
    }
}

/// Desired firmware for `instance_type`; the zero value when the map or the entry is missing.
#[must_use]
pub fn desired_firmware(map: Option<&FirmwareVersionMap>, instance_type: &str) -> Version {
    map.and_then(|m| m.instance_type_firmware_versions.get(instance_type))
        .cloned()
        .unwrap_or_default()
}

/// Pick the image to validate with.
///
/// Images must list `desired.build_version` among their firmware versions
/// (any image qualifies when it is empty). The winner has the greatest
/// version suffix after the last `delimiter`, compared as plain strings;
/// names without a suffix lose to names with one.
pub fn select_latest_image(
    images: &[MachineImage],
    desired: &Version,
    delimiter: &str,
) -> Result<String, ControllerError> {
    if images.is_empty() {
        return Err(ControllerError::non_retryable("no machine images found for instance type"));
    }

    images
        .iter()
        .filter(|image| {
            desired.build_version.is_empty()
                || image.firmware_versions.iter().any(|v| *v == desired.build_version)
        })
        .max_by(|a, b| {
            (version_suffix(&a.name, delimiter), a.name.as_str())
                .cmp(&(version_suffix(&b.name, delimiter), b.name.as_str()))
        })
        .map(|image| image.name.clone())
        .ok_or_else(|| {
            ControllerError::retryable(format!(
                "no machine image supports firmware build {}",
                desired.build_version
            ))
        })
}

/// Text after the last `delimiter`, when it looks like a version (starts with a digit).
fn version_suffix<'a>(name: &'a str, delimiter: &str) -> Option<&'a str> {
    let (_, suffix) = name.rsplit_once(delimiter)?;
    suffix.starts_with(|c: char| c.is_ascii_digit()).then_some(suffix)
}

/// True once `minutes` have elapsed between `start` and `now`.
#[must_use]
pub fn is_timed_out(start: DateTime<Utc>, now: DateTime<Utc>, minutes: i64) -> bool {
    now - start >= Duration::minutes(minutes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn image(name: &str, firmware: &[&str]) -> MachineImage {
        MachineImage {
            name: name.to_string(),
            firmware_versions: firmware.iter().map(ToString::to_string).collect(),
        }
    }

    fn names(images: &[&str]) -> Vec<MachineImage> {
        images.iter().map(|n| image(n, &[])).collect()
    }

    #[test]
    fn test_highest_suffix_wins() {
        let images = names(&["img-v1", "img-v20240104", "img-no-version"]);
        assert_eq!(
            select_latest_image(&images, &Version::default(), "-v").unwrap(),
            "img-v20240104"
        );
    }

    #[test]
    fn test_image_without_delimiter() {
        let images = names(&["img-no-version"]);
        assert_eq!(
            select_latest_image(&images, &Version::default(), "-v").unwrap(),
            "img-no-version"
        );
    }

    #[test]
    fn test_suffixes_compare_as_strings() {
        let images = names(&["ubuntu-v10", "ubuntu-v9"]);
        assert_eq!(select_latest_image(&images, &Version::default(), "-v").unwrap(), "ubuntu-v9");
    }

    #[test]
    fn test_filters_on_build_version() {
        let images = vec![
            image("img-v3", &["1.0.0"]),
            image("img-v2", &["1.1.0", "1.2.0"]),
            image("img-v1", &["1.1.0"]),
        ];
        let desired = Version {
            build_version: "1.1.0".to_string(),
            ..Default::default()
        };
        assert_eq!(select_latest_image(&images, &desired, "-v").unwrap(), "img-v2");
    }

    #[test]
    fn test_no_images_is_permanent() {
        let err = select_latest_image(&[], &Version::default(), "-v").unwrap_err();
        assert!(err.is_non_retryable());
    }

    #[test]
    fn test_no_matching_firmware_is_transient() {
        let images = vec![image("img-v1", &["1.0.0"])];
        let desired = Version {
            build_version: "2.0.0".to_string(),
            ..Default::default()
        };
        let err = select_latest_image(&images, &desired, "-v").unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn test_timeout_boundary() {
        let start = Utc::now();
        assert!(!is_timed_out(start, start + Duration::minutes(29), 30));
        assert!(is_timed_out(start, start + Duration::minutes(30), 30));
        assert!(is_timed_out(start, start + Duration::minutes(31), 30));
    }

    #[test]
    fn test_map_from_config_map() {
        let json = r#"{
            "instanceTypeFirmwareVersions": {
                "bm-icp-gaudi2": {"buildVersion": "1.17.0-fw-50.0.1", "spiVersion": "50.0.1", "fullFwVersion": "hl-gaudi2-1.17.0-fw-50.0.1"}
            },
            "lastModified": "2024-07-01T10:00:00Z"
        }"#;
        let config_map = ConfigMap {
            data: Some(BTreeMap::from([(FIRMWARE_DATA_KEY.to_string(), json.to_string())])),
            ..Default::default()
        };
        let map = FirmwareVersionMap::from_config_map(&config_map).unwrap().unwrap();
        assert!(map.last_modified.is_some());

        let desired = desired_firmware(Some(&map), "bm-icp-gaudi2");
        assert_eq!(desired.build_version, "1.17.0-fw-50.0.1");
        assert_eq!(desired.spi_version, "50.0.1");
        assert_eq!(desired_firmware(Some(&map), "bm-spr"), Version::default());
        assert_eq!(desired_firmware(None, "bm-icp-gaudi2"), Version::default());
    }

    #[test]
    fn test_config_map_without_document() {
        assert!(FirmwareVersionMap::from_config_map(&ConfigMap::default()).unwrap().is_none());
    }
}
