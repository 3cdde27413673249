//! Validation status on the NetBox device record.

use crate::error::ControllerError;
use chrono::Utc;
use netbox_client::{DeviceCustomFields, NetBoxClientTrait};
use tracing::{debug, info};

/// Mark validation of `device_name` as running.
pub async fn validation_in_progress(
    netbox: &dyn NetBoxClientTrait,
    device_name: &str,
) -> Result<(), ControllerError> {
    update_status(netbox, device_name, DeviceCustomFields::in_progress()).await
}

/// Record the outcome of validation and where its report lives.
pub async fn validation_completed(
    netbox: &dyn NetBoxClientTrait,
    device_name: &str,
    report_prefix: &str,
    upload_path: Option<&str>,
    succeeded: bool,
) -> Result<(), ControllerError> {
    let fields = DeviceCustomFields {
        bm_validation_status: completed_status(succeeded, &Utc::now().to_string()),
        bm_validation_report_url: report_url(report_prefix, upload_path),
    };
    update_status(netbox, device_name, fields).await
}

fn completed_status(succeeded: bool, timestamp: &str) -> String {
    if succeeded {
        format!("Success {timestamp}")
    } else {
        format!("Failure {timestamp}")
    }
}

fn report_url(prefix: &str, upload_path: Option<&str>) -> String {
    match upload_path.filter(|p| !p.is_empty()) {
        Some(path) => format!("{prefix}{path}/validation_logs.tar.gz"),
        None => DeviceCustomFields::NO_REPORT.to_string(),
    }
}

async fn update_status(
    netbox: &dyn NetBoxClientTrait,
    device_name: &str,
    fields: DeviceCustomFields,
) -> Result<(), ControllerError> {
    debug!(device = %device_name, "Fetching NetBox device id");
    let device_id = netbox.get_device_id(device_name).await?;
    info!(
        device = %device_name,
        device_id,
        status = %fields.bm_validation_status,
        report = %fields.bm_validation_report_url,
        "Updating NetBox validation status"
    );
    netbox
        .update_bm_validation_status(device_id, device_name, &fields)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use netbox_client::MockNetBoxClient;

    #[test]
    fn test_report_url() {
        assert_eq!(
            report_url("https://reports.example.com", Some("/us-dev-1/us-dev-1a/metal3-1/device-1-20240104103015")),
            "https://reports.example.com/us-dev-1/us-dev-1a/metal3-1/device-1-20240104103015/validation_logs.tar.gz"
        );
        assert_eq!(report_url("https://reports.example.com", None), "--");
        assert_eq!(report_url("https://reports.example.com", Some("")), "--");
    }

    #[test]
    fn test_completed_status() {
        assert_eq!(completed_status(true, "2024-01-04 10:30:15 UTC"), "Success 2024-01-04 10:30:15 UTC");
        assert_eq!(completed_status(false, "t"), "Failure t");
    }

    #[tokio::test]
    async fn test_status_updates() {
        let netbox = MockNetBoxClient::new("http://netbox.test");
        netbox.add_device("device-1");

        validation_in_progress(&netbox, "device-1").await.unwrap();
        validation_completed(&netbox, "device-1", "https://r/", Some("a/b"), false)
            .await
            .unwrap();

        let updates = netbox.status_updates();
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0].1.bm_validation_status, "InProgress");
        assert_eq!(updates[0].1.bm_validation_report_url, "--");
        assert!(updates[1].1.bm_validation_status.starts_with("Failure "));
        assert_eq!(updates[1].1.bm_validation_report_url, "https://r/a/b/validation_logs.tar.gz");
    }

    #[tokio::test]
    async fn test_unknown_device_is_an_error() {
        let netbox = MockNetBoxClient::new("http://netbox.test");
        assert!(validation_in_progress(&netbox, "device-9").await.is_err());
    }
}
