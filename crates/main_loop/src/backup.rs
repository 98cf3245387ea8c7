//! The backup job.

use std::path::PathBuf;

use anyhow::Context;
use channel_messages::JobKind;
use ftp_storage::BackupStorage;
use inventory::{DeviceRecord, FinalStatus};
use routeros_client::{ClientError, DeviceSession};
use routeros_logic::{backup_group, backup_name, commands, plan_retention, RetentionPlan};
use tokio_util::sync::CancellationToken;

use crate::{
    messages,
    orchestrator::{DeviceStep, Orchestrator},
    DeviceReport, JobReport,
};

const BACKUP_EXTENSIONS: [&str; 2] = ["backup", "rsc"];

/// A file downloaded from the device.
#[derive(Debug)]
struct LocalCopy {
    path: PathBuf,
    file_name: String,
}

impl Orchestrator {
    pub(crate) async fn backup(
        &self,
        devices: &[DeviceRecord],
        with_update: bool,
        cancel: &CancellationToken,
    ) -> Result<JobReport, anyhow::Error> {
        let storage = self
            .storage
            .clone()
            .context("FTP settings are missing, backups can't be stored off-site")?;

        let mut report = JobReport::new(JobKind::Backup { with_update });
        self.notify(messages::backup_started()).await;

        let step = DeviceStep::Backup {
            storage: storage.as_ref(),
            with_update,
        };
        self.run_with_retry_pass(&mut report, devices, step, cancel)
            .await;

        if report.cancelled {
            self.notify(messages::job_stopped(report.kind.title())).await;
        }
        self.notify(messages::task_completed()).await;
        Ok(report)
    }

    pub(crate) async fn backup_device(
        &self,
        index: usize,
        record: &DeviceRecord,
        session: &dyn DeviceSession,
        storage: &dyn BackupStorage,
        with_update: bool,
    ) -> DeviceReport {
        let device = &record.device;
        let backup_name = backup_name(&device.name, chrono::Local::now().naive_local());
        tracing::info!(message = "creating backup", name = %device.name, %backup_name);

        if let Err(error) = self.create_backup(session, &backup_name).await {
            let status = self
                .notify_error(&messages::backup_failed(device, &error))
                .await;
            return self.conclude(device, status, FinalStatus::Error).await;
        }

        let copies = match self.download_backup(record, session, &backup_name).await {
            Ok(copies) => copies,
            Err(error) => {
                self.notify_error(&messages::download_failed(device, &format!("{error:#}")))
                    .await;
                let status = messages::backup_download_status(device, &backup_name);
                return self.conclude(device, status, FinalStatus::Error).await;
            }
        };

        let mut uploaded = true;
        for copy in &copies {
            if let Err(error) = storage
                .upload(&copy.path, backup_group(&backup_name), &copy.file_name)
                .await
            {
                tracing::error!(message = "upload failed", file = %copy.file_name, %error);
                self.notify_error(&messages::upload_failed(&copy.file_name, &error))
                    .await;
                uploaded = false;
            }
        }

        self.apply_retention(record, session).await;

        let update_message = if with_update {
            Some(self.check_and_update(record, session).await)
        } else {
            None
        };

        self.notify(messages::backup_summary(
            index,
            device,
            &backup_name,
            uploaded,
            update_message.as_deref(),
        ))
        .await;

        if uploaded {
            let status = messages::backup_status(device, &backup_name);
            self.conclude(device, status, FinalStatus::Ok).await
        } else {
            let status = messages::upload_status(device, &backup_name);
            self.conclude(device, status, FinalStatus::Error).await
        }
    }

    async fn create_backup(
        &self,
        session: &dyn DeviceSession,
        backup_name: &str,
    ) -> Result<(), ClientError> {
        session.run(&commands::backup_save(backup_name)).await?;
        self.settle(self.options.timings.after_backup_save).await;
        session.run(&commands::export(backup_name)).await?;
        self.settle(self.options.timings.after_export).await;
        Ok(())
    }

    async fn download_backup(
        &self,
        record: &DeviceRecord,
        session: &dyn DeviceSession,
        backup_name: &str,
    ) -> Result<Vec<LocalCopy>, anyhow::Error> {
        let dir = self.options.backup_dir.join(&record.device.name);
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("can't create {}", dir.display()))?;

        let mut copies = Vec::with_capacity(BACKUP_EXTENSIONS.len());
        for (position, extension) in BACKUP_EXTENSIONS.iter().enumerate() {
            if position > 0 {
                self.settle(self.options.timings.between_downloads).await;
            }

            let file_name = format!("{backup_name}.{extension}");
            let path = dir.join(&file_name);
            let bytes = session.download(&format!("/{file_name}"), &path).await?;
            tracing::info!(message = "downloaded", name = %record.device.name, %file_name, bytes);

            copies.push(LocalCopy { path, file_name });
        }

        Ok(copies)
    }

    /// Remove all but the newest dated backups from the device.
    async fn apply_retention(&self, record: &DeviceRecord, session: &dyn DeviceSession) {
        let device = &record.device;

        let listing = match session.run(commands::FILE_PRINT).await {
            Ok(listing) => listing,
            Err(error) => {
                self.notify_error(&messages::retention_failed(device, &error))
                    .await;
                return;
            }
        };

        let files = match plan_retention(&listing, self.options.keep_count) {
            RetentionPlan::NoBackupFiles => {
                tracing::info!(message = "no backup files on the device", name = %device.name);
                return;
            }
            RetentionPlan::NoDatedFiles => {
                tracing::warn!(message = "no backup file carries a date", name = %device.name);
                return;
            }
            RetentionPlan::NothingToDelete => {
                tracing::info!(message = "no old backups to remove", name = %device.name);
                return;
            }
            RetentionPlan::Delete(files) => files,
        };

        for file in files {
            tracing::info!(
                message = "removing old backup",
                name = %device.name,
                file = %file.name,
                created_at = %file.created_at
            );
            if let Err(error) = session.run(&commands::file_remove(&file.name)).await {
                self.notify_error(&messages::retention_failed(device, &error))
                    .await;
                return;
            }
        }
    }
}
