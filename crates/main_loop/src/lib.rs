//! Main loop.

#![allow(missing_docs, clippy::missing_docs_in_private_items)]

mod backup;
mod devices;
mod messages;
mod orchestrator;
mod updates;

use std::{fmt::Write, sync::Arc};

use channel_messages::{ChatRegistration, JobKind, JobRequest, Notification, StopRequest};
use inventory::FinalStatus;
use tokio::{sync::mpsc, task::JoinSet};
use tokio_util::sync::CancellationToken;

pub use devices::render_device_list;
pub use orchestrator::{Options, Orchestrator, Timings};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceReport {
    pub device_id: i32,
    pub name: String,
    pub final_status: FinalStatus,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobReport {
    pub kind: JobKind,
    /// One entry per device, in processing order.
    pub devices: Vec<DeviceReport>,
    /// Requested names missing from the inventory.
    pub unknown_names: Vec<String>,
    pub cancelled: bool,
    /// The rendered device list of a [`JobKind::ListDevices`] job.
    pub listing: Option<String>,
}

impl JobReport {
    pub fn new(kind: JobKind) -> Self {
        JobReport {
            kind,
            devices: vec![],
            unknown_names: vec![],
            cancelled: false,
            listing: None,
        }
    }

    /// A later outcome of the same device replaces the earlier one.
    pub fn record(&mut self, report: DeviceReport) {
        match self
            .devices
            .iter_mut()
            .find(|existing| existing.device_id == report.device_id)
        {
            Some(existing) => *existing = report,
            None => self.devices.push(report),
        }
    }

    fn count(&self, final_status: FinalStatus) -> usize {
        self.devices
            .iter()
            .filter(|device| device.final_status == final_status)
            .count()
    }

    pub fn failed(&self) -> usize {
        self.count(FinalStatus::Error)
    }

    pub fn summary(&self) -> String {
        let mut text = match &self.listing {
            Some(listing) => listing.clone(),
            None => {
                let mut text = format!(
                    "{} finished: {} OK, {} failed",
                    capitalize(self.kind.title()),
                    self.count(FinalStatus::Ok),
                    self.failed()
                );
                let needs_update = self.count(FinalStatus::NeedsUpdate);
                if needs_update > 0 {
                    let _ = write!(text, ", {needs_update} need an update");
                }
                text.push('.');

                let failed: Vec<&str> = self
                    .devices
                    .iter()
                    .filter(|device| device.final_status == FinalStatus::Error)
                    .map(|device| device.name.as_str())
                    .collect();
                if !failed.is_empty() {
                    let _ = write!(text, "\nFailed: {}", failed.join(", "));
                }
                text
            }
        };

        if self.cancelled {
            text.push_str("\nStopped before all devices were processed.");
        }
        if !self.unknown_names.is_empty() {
            let _ = write!(text, "\nUnknown devices: {}", self.unknown_names.join(", "));
        }
        text
    }
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

pub struct Params {
    pub orchestrator: Arc<Orchestrator>,
    pub notifications: telegram::NotificationHandle,
    pub jobs_rx: mpsc::Receiver<JobRequest>,
    pub stop_rx: mpsc::Receiver<StopRequest>,
    pub registrations_rx: mpsc::Receiver<ChatRegistration>,
}

pub async fn run(params: Params) -> Result<JoinSet<()>, anyhow::Error> {
    let Params {
        orchestrator,
        notifications,
        mut jobs_rx,
        mut stop_rx,
        mut registrations_rx,
    } = params;

    let devices = orchestrator.inventory().load_devices().await?;
    tracing::info!(message = "Got all load", devices = devices.len());

    let mut tasks = JoinSet::new();

    {
        let orchestrator = Arc::clone(&orchestrator);
        tasks.spawn(async move {
            while let Some(ChatRegistration { chat_id }) = registrations_rx.recv().await {
                match orchestrator.inventory().add_chat_id(chat_id).await {
                    Ok(true) => tracing::info!(message = "chat registered", chat_id),
                    Ok(false) => tracing::debug!(message = "chat already registered", chat_id),
                    Err(error) => {
                        tracing::error!(message = "can't store chat id", chat_id, ?error)
                    }
                }
            }
        });
    }

    tasks.spawn(async move {
        loop {
            let request = tokio::select! {
                request = jobs_rx.recv() => match request {
                    Some(request) => request,
                    None => break,
                },
                Some(StopRequest { chat_id }) = stop_rx.recv() => {
                    tracing::info!(message = "stop requested while idle", chat_id);
                    direct(&notifications, chat_id, "No job is running.").await;
                    continue;
                }
            };

            let cancel = CancellationToken::new();
            let job = orchestrator.run_job(&request, &cancel);
            tokio::pin!(job);

            let result = loop {
                tokio::select! {
                    result = &mut job => break result,
                    Some(StopRequest { chat_id }) = stop_rx.recv() => {
                        tracing::info!(message = "stopping the running job", chat_id, kind = ?request.kind);
                        cancel.cancel();
                    }
                }
            };

            let text = match result {
                Ok(report) => report.summary(),
                Err(error) => {
                    tracing::error!(message = "job failed", kind = ?request.kind, ?error);
                    format!("{} failed: {error:#}", capitalize(request.kind.title()))
                }
            };

            if let Some(chat_id) = request.requested_by {
                direct(&notifications, chat_id, &text).await;
            }
        }

        tracing::info!("job channel closed");
    });

    Ok(tasks)
}

async fn direct(notifications: &telegram::NotificationHandle, chat_id: i64, text: &str) {
    let notification = Notification::Direct {
        chat_id,
        text: text.to_owned(),
    };
    if let Err(error) = notifications.send_notification(notification).await {
        tracing::error!(message = "notifier is gone", %error);
    }
}

#[cfg(test)]
mod tests;
