//! The device list.

use channel_messages::JobKind;
use inventory::{select_devices, sort_needing_update_first, DeviceRecord, DeviceSelection};
use tokio_util::sync::CancellationToken;

use crate::{orchestrator::Orchestrator, JobReport};

impl Orchestrator {
    /// Render the selected devices, outdated ones first. With `refresh` the
    /// devices that miss a version are asked for them beforehand.
    pub(crate) async fn list_devices(
        &self,
        devices: Vec<DeviceRecord>,
        selection: &DeviceSelection,
        refresh: bool,
        cancel: &CancellationToken,
    ) -> Result<JobReport, anyhow::Error> {
        let mut report = JobReport::new(JobKind::ListDevices { refresh });

        let mut devices = if refresh {
            let incomplete: Vec<&DeviceRecord> = devices
                .iter()
                .filter(|record| record.state.is_incomplete())
                .collect();
            report.cancelled = !self.refresh_versions(&incomplete, cancel).await;

            select_devices(self.inventory.load_devices().await?, selection).devices
        } else {
            devices
        };

        sort_needing_update_first(&mut devices);
        report.listing = Some(render_device_list(&devices));
        Ok(report)
    }

    /// Read and store the versions of `records`; unreachable devices are
    /// skipped. Returns `false` when the job was stopped meanwhile.
    pub(crate) async fn refresh_versions(
        &self,
        records: &[&DeviceRecord],
        cancel: &CancellationToken,
    ) -> bool {
        for record in records {
            if cancel.is_cancelled() {
                return false;
            }

            match self.connect(&record.device, cancel).await {
                Ok(session) => {
                    if let Err(error) = self.read_versions(record, session.as_ref()).await {
                        tracing::warn!(
                            message = "can't refresh versions",
                            name = %record.device.name,
                            %error
                        );
                    }
                }
                Err(error) => {
                    tracing::warn!(
                        message = "device unreachable, versions not refreshed",
                        name = %record.device.name,
                        %error
                    );
                }
            }
        }
        true
    }
}

fn or_unknown(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or("?")
}

/// One line per device: marker, name, address, versions, firmware and the
/// last stored status.
pub fn render_device_list(records: &[DeviceRecord]) -> String {
    if records.is_empty() {
        return "No devices.".to_owned();
    }

    records
        .iter()
        .map(|record| {
            let marker = match record.state.needs_update() {
                Some(true) => "⚠",
                Some(false) => "✅",
                None => "❔",
            };
            let state = &record.state;
            format!(
                "{marker} {} ({}:{}) {} -> {}, firmware {}, status {}",
                record.device.name,
                record.device.host,
                record.device.port,
                or_unknown(&state.installed_version),
                or_unknown(&state.latest_version),
                or_unknown(&state.routerboard_firmware),
                or_unknown(&state.backup_status_final),
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}
