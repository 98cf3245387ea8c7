//! Package and RouterBoard firmware jobs.

use channel_messages::JobKind;
use inventory::{DeviceRecord, DeviceVersions, FinalStatus};
use routeros_client::{ClientError, DeviceSession};
use routeros_logic::{
    commands, parse_package_update, parse_routerboard, truncate_message, PackageUpdate,
    UpdateDecision, MAX_MESSAGE_CHARS,
};
use tokio_util::sync::CancellationToken;

use crate::{
    messages,
    orchestrator::{DeviceStep, Orchestrator},
    DeviceReport, JobReport,
};

impl Orchestrator {
    /// Check for a newer package version and install it; the text describes
    /// the outcome for the backup summary.
    pub(crate) async fn check_and_update(
        &self,
        record: &DeviceRecord,
        session: &dyn DeviceSession,
    ) -> String {
        let device = &record.device;
        match self.install_pending_update(record, session).await {
            Ok(UpdateDecision::UpdateAvailable { latest, .. }) => {
                messages::update_installed(device, &latest)
            }
            Ok(UpdateDecision::UpToDate { installed }) => messages::up_to_date(device, &installed),
            Ok(UpdateDecision::Unknown) => messages::versions_unknown(device),
            Err(error) => {
                self.notify_error(&messages::update_failed(device, &error))
                    .await
            }
        }
    }

    async fn install_pending_update(
        &self,
        record: &DeviceRecord,
        session: &dyn DeviceSession,
    ) -> Result<UpdateDecision, ClientError> {
        let device = &record.device;
        let update = parse_package_update(&session.run(commands::CHECK_FOR_UPDATES).await?);
        tracing::info!(
            message = "package versions",
            name = %device.name,
            installed = ?update.installed_version,
            latest = ?update.latest_version,
            status = ?update.status
        );

        let versions = versions(&update, record.state.routerboard_firmware.clone());
        self.record_versions(device, &versions).await;

        let decision = update.decision();
        if let UpdateDecision::UpdateAvailable { installed, latest } = &decision {
            tracing::info!(message = "installing update", name = %device.name, %installed, %latest);
            self.run_until_disconnect(session, commands::INSTALL_UPDATE, false)
                .await?;
        }
        Ok(decision)
    }

    /// Package versions plus the RouterBoard firmware, which is optional:
    /// CHR and x86 installs have no RouterBoard.
    pub(crate) async fn read_versions(
        &self,
        record: &DeviceRecord,
        session: &dyn DeviceSession,
    ) -> Result<(PackageUpdate, Option<String>), ClientError> {
        let update = parse_package_update(&session.run(commands::CHECK_FOR_UPDATES).await?);

        let firmware = match session.run(commands::ROUTERBOARD_PRINT).await {
            Ok(output) => parse_routerboard(&output).current_firmware,
            Err(error) => {
                tracing::warn!(
                    message = "can't read RouterBoard firmware",
                    name = %record.device.name,
                    %error
                );
                None
            }
        };

        let versions = versions(&update, firmware.clone());
        self.record_versions(&record.device, &versions).await;

        Ok((update, firmware))
    }

    pub(crate) async fn check_updates(
        &self,
        devices: &[DeviceRecord],
        cancel: &CancellationToken,
    ) -> JobReport {
        let mut report = JobReport::new(JobKind::CheckUpdates);

        for (position, record) in devices.iter().enumerate() {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            let device_report = match self.connect(&record.device, cancel).await {
                Ok(session) => self.check_device(record, session.as_ref()).await,
                Err(error) => {
                    let status = self
                        .notify_error(&messages::version_check_failed(&record.device, &error))
                        .await;
                    self.conclude(&record.device, status, FinalStatus::Error)
                        .await
                }
            };
            report.record(device_report);

            if position + 1 < devices.len()
                && !self
                    .pause(self.options.timings.between_devices, cancel)
                    .await
            {
                report.cancelled = true;
                break;
            }
        }

        if report.cancelled {
            self.notify(messages::job_stopped(report.kind.title())).await;
        }
        report
    }

    /// Only devices that need an update, or could not be checked, are
    /// broadcast.
    async fn check_device(
        &self,
        record: &DeviceRecord,
        session: &dyn DeviceSession,
    ) -> DeviceReport {
        let device = &record.device;

        let (update, firmware) = match self.read_versions(record, session).await {
            Ok(versions) => versions,
            Err(error) => {
                let status = self
                    .notify_error(&messages::version_check_failed(device, &error))
                    .await;
                return self.conclude(device, status, FinalStatus::Error).await;
            }
        };

        match update.decision() {
            UpdateDecision::UpdateAvailable { installed, latest } => {
                self.notify(messages::needs_update_alert(
                    device,
                    &installed,
                    &latest,
                    firmware.as_deref(),
                ))
                .await;
                let status = messages::needs_update_status(device, &installed, &latest);
                self.conclude(device, status, FinalStatus::NeedsUpdate)
                    .await
            }
            UpdateDecision::UpToDate { installed } => {
                let status = messages::up_to_date(device, &installed);
                self.conclude(device, status, FinalStatus::Ok).await
            }
            UpdateDecision::Unknown => {
                let status = self
                    .notify_error(&messages::versions_unknown(device))
                    .await;
                self.conclude(device, status, FinalStatus::Error).await
            }
        }
    }

    pub(crate) async fn upgrade(
        &self,
        devices: &[DeviceRecord],
        cancel: &CancellationToken,
    ) -> JobReport {
        let mut report = JobReport::new(JobKind::Upgrade);
        self.notify(messages::updates_started()).await;

        self.run_with_retry_pass(&mut report, devices, DeviceStep::Upgrade, cancel)
            .await;

        if report.cancelled {
            self.notify(messages::job_stopped(report.kind.title())).await;
        }
        self.notify(messages::updates_finished()).await;
        report
    }

    pub(crate) async fn upgrade_device(
        &self,
        index: usize,
        record: &DeviceRecord,
        session: &dyn DeviceSession,
        cancel: &CancellationToken,
    ) -> DeviceReport {
        let device = &record.device;

        let (status, final_status) = match self.install_pending_update(record, session).await {
            Ok(UpdateDecision::UpdateAvailable { latest, .. }) => {
                if !self.pause(self.options.timings.reboot_wait, cancel).await {
                    tracing::warn!(message = "stopped while the device reboots", name = %device.name);
                }
                (messages::update_installed(device, &latest), FinalStatus::Ok)
            }
            Ok(UpdateDecision::UpToDate { installed }) => {
                (messages::up_to_date(device, &installed), FinalStatus::Ok)
            }
            Ok(UpdateDecision::Unknown) => (messages::versions_unknown(device), FinalStatus::Error),
            Err(error) => (messages::update_failed(device, &error), FinalStatus::Error),
        };

        let marker = match final_status {
            FinalStatus::Error => "❌",
            _ => "✅",
        };
        let status = truncate_message(&status, MAX_MESSAGE_CHARS);
        self.notify(format!(
            "{}\n{marker} {status}",
            messages::device_header(index, device)
        ))
        .await;
        self.conclude(device, status, final_status).await
    }

    pub(crate) async fn routerboard_upgrade(
        &self,
        devices: &[DeviceRecord],
        cancel: &CancellationToken,
    ) -> JobReport {
        let mut report = JobReport::new(JobKind::RouterboardUpgrade);

        for (position, record) in devices.iter().enumerate() {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            let device = &record.device;
            let device_report = match self.connect(device, cancel).await {
                Ok(session) => self.routerboard_device(record, session.as_ref(), cancel).await,
                Err(error) => {
                    let status = self
                        .notify_error(&messages::routerboard_failed(device, &error))
                        .await;
                    self.conclude(device, status, FinalStatus::Error).await
                }
            };
            report.record(device_report);

            if position + 1 < devices.len()
                && !self
                    .pause(self.options.timings.between_devices, cancel)
                    .await
            {
                report.cancelled = true;
                break;
            }
        }

        if report.cancelled {
            self.notify(messages::job_stopped(report.kind.title())).await;
        }
        self.notify(messages::routerboard_finished()).await;
        report
    }

    async fn routerboard_device(
        &self,
        record: &DeviceRecord,
        session: &dyn DeviceSession,
        cancel: &CancellationToken,
    ) -> DeviceReport {
        let device = &record.device;
        self.notify(messages::routerboard_started(device)).await;

        if let Err(error) = self.upgrade_routerboard(session).await {
            let status = self
                .notify_error(&messages::routerboard_failed(device, &error))
                .await;
            return self.conclude(device, status, FinalStatus::Error).await;
        }

        if !self.pause(self.options.timings.reboot_wait, cancel).await {
            tracing::warn!(message = "stopped while the device reboots", name = %device.name);
        }

        self.notify(messages::routerboard_done(device)).await;
        self.conclude(device, messages::routerboard_status(device), FinalStatus::Ok)
            .await
    }

    async fn upgrade_routerboard(&self, session: &dyn DeviceSession) -> Result<(), ClientError> {
        session.run(commands::ROUTERBOARD_MANUAL_UPGRADE).await?;
        session.run_confirmed(commands::ROUTERBOARD_UPGRADE).await?;
        self.run_until_disconnect(session, commands::REBOOT, true)
            .await
    }
}

fn versions(update: &PackageUpdate, routerboard_firmware: Option<String>) -> DeviceVersions {
    DeviceVersions {
        installed_version: update.installed_version.clone(),
        latest_version: update.latest_version.clone(),
        routerboard_firmware,
    }
}
