//! The shared machinery of the jobs: connecting with retries, pauses that
//! honour a stop request, status bookkeeping and the retry pass.

use std::{fmt, path::PathBuf, sync::Arc, time::Duration};

use channel_messages::{JobKind, JobRequest};
use ftp_storage::BackupStorage;
use inventory::{
    select_devices, Device, DeviceRecord, DeviceSelection, DeviceVersions, FinalStatus,
    Inventory,
};
use routeros_client::{ClientError, DeviceConnector, DeviceSession};
use routeros_logic::{truncate_message, MAX_MESSAGE_CHARS};
use telegram::NotificationHandle;
use tokio_util::sync::CancellationToken;

use crate::{messages, DeviceReport, JobReport};

#[derive(Debug, Clone)]
pub struct Timings {
    /// Between two connection attempts.
    pub retry_delay: Duration,
    pub after_backup_save: Duration,
    pub after_export: Duration,
    pub between_downloads: Duration,
    pub between_devices: Duration,
    /// After an action that reboots the device.
    pub reboot_wait: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Timings {
            retry_delay: Duration::from_secs(3),
            after_backup_save: Duration::from_secs(3),
            after_export: Duration::from_secs(1),
            between_downloads: Duration::from_secs(3),
            between_devices: Duration::from_secs(5),
            reboot_wait: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Options {
    /// Local copies go to `<backup_dir>/<device name>/`.
    pub backup_dir: PathBuf,
    /// Dated backups kept on the device.
    pub keep_count: usize,
    pub connect_attempts: u32,
    pub timings: Timings,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            backup_dir: PathBuf::from("./BackUp/"),
            keep_count: 2,
            connect_attempts: 3,
            timings: Timings::default(),
        }
    }
}

/// What a job does with a device once connected, for the jobs that retry
/// unreachable devices at the end.
#[derive(Clone, Copy)]
pub(crate) enum DeviceStep<'a> {
    Backup {
        storage: &'a dyn BackupStorage,
        with_update: bool,
    },
    Upgrade,
}

/// The last connection error and how many attempts were made before giving
/// up; fewer than configured when the job was stopped.
#[derive(Debug)]
pub(crate) struct ConnectFailure {
    pub(crate) error: ClientError,
    pub(crate) attempts: u32,
}

impl fmt::Display for ConnectFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.error.fmt(f)
    }
}

pub struct Orchestrator {
    pub(crate) inventory: Arc<dyn Inventory>,
    pub(crate) connector: Arc<dyn DeviceConnector>,
    pub(crate) storage: Option<Arc<dyn BackupStorage>>,
    pub(crate) notifications: NotificationHandle,
    pub(crate) options: Options,
}

impl Orchestrator {
    pub fn new(
        inventory: Arc<dyn Inventory>,
        connector: Arc<dyn DeviceConnector>,
        storage: Option<Arc<dyn BackupStorage>>,
        notifications: NotificationHandle,
        options: Options,
    ) -> Self {
        Orchestrator {
            inventory,
            connector,
            storage,
            notifications,
            options,
        }
    }

    pub fn inventory(&self) -> &Arc<dyn Inventory> {
        &self.inventory
    }

    pub async fn run_job(
        &self,
        request: &JobRequest,
        cancel: &CancellationToken,
    ) -> Result<JobReport, anyhow::Error> {
        tracing::info!(message = "starting job", kind = ?request.kind, selection = ?request.selection);

        let mut records = self.inventory.load_devices().await?;
        if request.selection == DeviceSelection::NeedingUpdate {
            let unknown: Vec<&DeviceRecord> = records
                .iter()
                .filter(|record| record.state.needs_update().is_none())
                .collect();
            if !unknown.is_empty() {
                tracing::info!(
                    message = "reading versions before selecting outdated devices",
                    devices = unknown.len()
                );
                self.refresh_versions(&unknown, cancel).await;
                records = self.inventory.load_devices().await?;
            }
        }

        let selected = select_devices(records, &request.selection);
        for name in &selected.unknown_names {
            tracing::warn!(message = "no such device in the inventory", %name);
        }

        let mut report = match request.kind {
            JobKind::ListDevices { refresh } => {
                self.list_devices(selected.devices, &request.selection, refresh, cancel)
                    .await?
            }
            _ if selected.devices.is_empty() => {
                tracing::warn!(message = "no devices selected", kind = ?request.kind);
                JobReport::new(request.kind.clone())
            }
            JobKind::Backup { with_update } => {
                self.backup(&selected.devices, with_update, cancel).await?
            }
            JobKind::CheckUpdates => self.check_updates(&selected.devices, cancel).await,
            JobKind::Upgrade => self.upgrade(&selected.devices, cancel).await,
            JobKind::RouterboardUpgrade => {
                self.routerboard_upgrade(&selected.devices, cancel).await
            }
        };

        report.unknown_names = selected.unknown_names;
        tracing::info!(
            message = "job finished",
            kind = ?report.kind,
            devices = report.devices.len(),
            failed = report.failed(),
            cancelled = report.cancelled
        );
        Ok(report)
    }

    /// Up to `connect_attempts` tries, `retry_delay` apart.
    pub(crate) async fn connect(
        &self,
        device: &Device,
        cancel: &CancellationToken,
    ) -> Result<Box<dyn DeviceSession>, ConnectFailure> {
        let attempts = self.options.connect_attempts.max(1);
        let mut attempt = 1;

        loop {
            match self.connector.connect(device).await {
                Ok(session) => {
                    tracing::info!(
                        message = "connected",
                        name = %device.name,
                        host = %device.host,
                        attempt
                    );
                    return Ok(session);
                }
                Err(error) => {
                    if error.is_authentication() {
                        tracing::error!(
                            message = "authentication failed",
                            name = %device.name,
                            host = %device.host,
                            username = %device.username,
                            attempt,
                            %error
                        );
                    } else {
                        tracing::warn!(
                            message = "connection failed",
                            name = %device.name,
                            host = %device.host,
                            attempt,
                            %error
                        );
                    }

                    if attempt >= attempts
                        || !self.pause(self.options.timings.retry_delay, cancel).await
                    {
                        return Err(ConnectFailure {
                            error,
                            attempts: attempt,
                        });
                    }
                    attempt += 1;
                }
            }
        }
    }

    /// Returns `false` when the job was stopped before the time ran out.
    pub(crate) async fn pause(&self, duration: Duration, cancel: &CancellationToken) -> bool {
        if cancel.is_cancelled() {
            return false;
        }
        if duration.is_zero() {
            return true;
        }

        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }

    /// A wait the device needs between two commands.
    pub(crate) async fn settle(&self, duration: Duration) {
        if !duration.is_zero() {
            tokio::time::sleep(duration).await;
        }
    }

    pub(crate) async fn notify(&self, text: impl Into<String>) {
        self.notifications.broadcast(text).await;
    }

    /// Broadcast an error text, cut down to the stored status length.
    pub(crate) async fn notify_error(&self, text: &str) -> String {
        let text = truncate_message(text, MAX_MESSAGE_CHARS);
        self.notify(text.clone()).await;
        text
    }

    /// Store the outcome of a device; a storage failure does not fail the job.
    pub(crate) async fn conclude(
        &self,
        device: &Device,
        status: String,
        final_status: FinalStatus,
    ) -> DeviceReport {
        if let Err(error) = self
            .inventory
            .update_device_status(device.id, &status, final_status)
            .await
        {
            tracing::error!(message = "can't store device status", name = %device.name, ?error);
        }

        DeviceReport {
            device_id: device.id,
            name: device.name.clone(),
            final_status,
            status: truncate_message(&status, MAX_MESSAGE_CHARS),
        }
    }

    pub(crate) async fn record_versions(&self, device: &Device, versions: &DeviceVersions) {
        if let Err(error) = self.inventory.update_versions(device.id, versions).await {
            tracing::error!(message = "can't store device versions", name = %device.name, ?error);
        }
    }

    /// Run a command after which the device reboots; the session dropping
    /// after the command was sent is expected. Anything that keeps the
    /// command from reaching the device is still an error.
    pub(crate) async fn run_until_disconnect(
        &self,
        session: &dyn DeviceSession,
        command: &str,
        confirmed: bool,
    ) -> Result<(), ClientError> {
        let result = if confirmed {
            session.run_confirmed(command).await
        } else {
            session.run(command).await
        };

        match result {
            Ok(output) => {
                tracing::debug!(message = "command finished", %command, %output);
                Ok(())
            }
            Err(ClientError::Disconnected { message, .. }) => {
                tracing::warn!(message = "session closed by the device", %command, reason = %message);
                Ok(())
            }
            Err(error) => Err(error),
        }
    }

    async fn run_step(
        &self,
        step: DeviceStep<'_>,
        index: usize,
        record: &DeviceRecord,
        session: &dyn DeviceSession,
        cancel: &CancellationToken,
    ) -> DeviceReport {
        match step {
            DeviceStep::Backup {
                storage,
                with_update,
            } => {
                self.backup_device(index, record, session, storage, with_update)
                    .await
            }
            DeviceStep::Upgrade => self.upgrade_device(index, record, session, cancel).await,
        }
    }

    /// Every device gets `step`; the unreachable ones get a second chance
    /// once the others are done.
    pub(crate) async fn run_with_retry_pass(
        &self,
        report: &mut JobReport,
        devices: &[DeviceRecord],
        step: DeviceStep<'_>,
        cancel: &CancellationToken,
    ) {
        let mut unreachable = vec![];

        for (position, record) in devices.iter().enumerate() {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            let index = position + 1;
            match self.connect(&record.device, cancel).await {
                Ok(session) => {
                    let device_report = self
                        .run_step(step, index, record, session.as_ref(), cancel)
                        .await;
                    report.record(device_report);
                }
                Err(failure) => {
                    tracing::warn!(
                        message = "device unreachable, will retry",
                        name = %record.device.name,
                        error = %failure,
                        attempts = failure.attempts
                    );
                    let status = messages::connect_failed(&record.device, failure.attempts);
                    report.record(
                        self.conclude(&record.device, status, FinalStatus::Error)
                            .await,
                    );
                    unreachable.push((index, record));
                }
            }

            if index < devices.len()
                && !self
                    .pause(self.options.timings.between_devices, cancel)
                    .await
            {
                report.cancelled = true;
                break;
            }
        }

        if unreachable.is_empty() || report.cancelled {
            return;
        }

        self.notify(messages::retry_header()).await;
        for (index, record) in unreachable {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            let device = &record.device;
            self.notify(messages::retry_attempt(device)).await;
            match self.connect(device, cancel).await {
                Ok(session) => {
                    self.notify(messages::retry_succeeded(device)).await;
                    let device_report = self
                        .run_step(step, index, record, session.as_ref(), cancel)
                        .await;
                    report.record(device_report);
                }
                Err(error) => {
                    tracing::error!(message = "device unreachable after the retry", name = %device.name, %error);
                    self.notify(messages::retry_failed(device)).await;
                }
            }
        }
    }
}
