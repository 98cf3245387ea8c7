use std::{
    collections::{HashMap, HashSet},
    path::Path,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use channel_messages::{
    ChatRegistration, JobKind, JobRequest, Notification, StopRequest,
};
use ftp_storage::{BackupStorage, StorageError};
use inventory::{
    Device, DeviceRecord, DeviceSelection, DeviceState, DeviceVersions, FinalStatus, Inventory,
    Settings,
};
use routeros_client::{ClientError, DeviceConnector, DeviceSession};
use routeros_logic::commands;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_test::traced_test;

use crate::{
    render_device_list, DeviceReport, JobReport, Options, Orchestrator, Params, Timings,
};

const OUTDATED: &str = "\
          channel: stable
installed-version: 7.11.2
   latest-version: 7.12.1
           status: New version is available
";

const ROUTERBOARD: &str = "\
       routerboard: yes
             model: RB4011iGS+
  current-firmware: 7.11.2
  upgrade-firmware: 7.12.1
";

const OLD_BACKUPS: &str = "\
 #  NAME                               TYPE       SIZE     CREATION-TIME
 0  core-Backup-20240101-0300.backup   backup     45.3KiB  2024-01-01 03:00:05
 1  core-Backup-20240101-0300.rsc      script     12.1KiB  2024-01-01 03:00:09
 2  core-Backup-20240108-0300.backup   backup     45.4KiB  2024-01-08 03:00:05
 3  core-Backup-20240108-0300.rsc      script     12.2KiB  2024-01-08 03:00:09
";

fn record(id: i32, name: &str) -> DeviceRecord {
    DeviceRecord {
        device: Device {
            id,
            name: name.to_owned(),
            host: format!("10.0.0.{id}"),
            port: 22,
            username: "admin".to_owned(),
            password: "pw".to_owned(),
        },
        state: DeviceState::default(),
    }
}

#[derive(Debug, Default)]
struct MemoryInventory {
    records: Mutex<Vec<DeviceRecord>>,
    chat_ids: Mutex<Vec<i64>>,
}

impl MemoryInventory {
    fn new(records: Vec<DeviceRecord>) -> Self {
        MemoryInventory {
            records: Mutex::new(records),
            chat_ids: Mutex::default(),
        }
    }

    fn state(&self, device_id: i32) -> DeviceState {
        self.records
            .lock()
            .unwrap()
            .iter()
            .find(|record| record.device.id == device_id)
            .map(|record| record.state.clone())
            .unwrap()
    }

    fn with_state(&self, device_id: i32, update: impl FnOnce(&mut DeviceState)) {
        let mut records = self.records.lock().unwrap();
        if let Some(record) = records.iter_mut().find(|record| record.device.id == device_id) {
            update(&mut record.state);
        }
    }
}

#[async_trait]
impl Inventory for MemoryInventory {
    async fn load_devices(&self) -> Result<Vec<DeviceRecord>, anyhow::Error> {
        Ok(self.records.lock().unwrap().clone())
    }

    async fn load_settings(&self) -> Result<Settings, anyhow::Error> {
        Ok(Settings::default())
    }

    async fn load_chat_ids(&self) -> Result<Vec<i64>, anyhow::Error> {
        Ok(self.chat_ids.lock().unwrap().clone())
    }

    async fn add_chat_id(&self, chat_id: i64) -> Result<bool, anyhow::Error> {
        let mut chat_ids = self.chat_ids.lock().unwrap();
        if chat_ids.contains(&chat_id) {
            return Ok(false);
        }
        chat_ids.push(chat_id);
        Ok(true)
    }

    async fn update_device_status(
        &self,
        device_id: i32,
        status: &str,
        final_status: FinalStatus,
    ) -> Result<(), anyhow::Error> {
        self.with_state(device_id, |state| {
            state.backup_status = Some(status.to_owned());
            state.backup_status_final = Some(final_status.to_string());
        });
        Ok(())
    }

    async fn update_versions(
        &self,
        device_id: i32,
        versions: &DeviceVersions,
    ) -> Result<(), anyhow::Error> {
        self.with_state(device_id, |state| {
            state.installed_version = versions.installed_version.clone();
            state.latest_version = versions.latest_version.clone();
            state.routerboard_firmware = versions.routerboard_firmware.clone();
        });
        Ok(())
    }
}

/// What the fake devices answer, and a log of what they were asked.
#[derive(Debug, Default)]
struct Script {
    outputs: HashMap<&'static str, &'static str>,
    /// Commands during which the device drops the session.
    dropping: HashSet<&'static str>,
    /// Host and command prefix pairs the device refuses to run.
    failing: Vec<(&'static str, &'static str)>,
    /// Hosts whose files can't be fetched.
    failed_downloads: HashSet<&'static str>,
    /// Connection failures left per host.
    refusals: Mutex<HashMap<String, u32>>,
    calls: Mutex<Vec<String>>,
}

impl Script {
    fn output(mut self, command: &'static str, output: &'static str) -> Self {
        self.outputs.insert(command, output);
        self
    }

    fn drops_on(mut self, command: &'static str) -> Self {
        self.dropping.insert(command);
        self
    }

    fn fails_on(mut self, host: &'static str, command_prefix: &'static str) -> Self {
        self.failing.push((host, command_prefix));
        self
    }

    fn download_fails(mut self, host: &'static str) -> Self {
        self.failed_downloads.insert(host);
        self
    }

    fn refuse(self, host: &str, times: u32) -> Self {
        self.refusals.lock().unwrap().insert(host.to_owned(), times);
        self
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn log(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn answer(&self, host: &str, command: &str, verb: &str) -> Result<String, ClientError> {
        self.log(format!("{verb} {host} {command}"));
        if self
            .failing
            .iter()
            .any(|(failing_host, prefix)| *failing_host == host && command.starts_with(prefix))
        {
            return Err(ClientError::Command {
                command: command.to_owned(),
                message: "[Session(-7)] Unable to send channel-open request".to_owned(),
            });
        }
        if self.dropping.contains(command) {
            return Err(ClientError::Disconnected {
                command: command.to_owned(),
                message: "connection closed".to_owned(),
            });
        }
        Ok(self.outputs.get(command).copied().unwrap_or_default().to_owned())
    }
}

struct FakeConnector {
    script: Arc<Script>,
}

#[async_trait]
impl DeviceConnector for FakeConnector {
    async fn connect(&self, device: &Device) -> Result<Box<dyn DeviceSession>, ClientError> {
        self.script.log(format!("connect {}", device.host));

        let mut refusals = self.script.refusals.lock().unwrap();
        if let Some(left) = refusals.get_mut(&device.host) {
            if *left > 0 {
                *left -= 1;
                return Err(ClientError::Connect {
                    address: format!("{}:{}", device.host, device.port),
                    source: std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused"),
                });
            }
        }

        Ok(Box::new(FakeSession {
            host: device.host.clone(),
            script: Arc::clone(&self.script),
        }))
    }
}

struct FakeSession {
    host: String,
    script: Arc<Script>,
}

#[async_trait]
impl DeviceSession for FakeSession {
    async fn run(&self, command: &str) -> Result<String, ClientError> {
        self.script.answer(&self.host, command, "run")
    }

    async fn run_confirmed(&self, command: &str) -> Result<String, ClientError> {
        self.script.answer(&self.host, command, "confirm")
    }

    async fn download(&self, remote_path: &str, local_path: &Path) -> Result<u64, ClientError> {
        self.script
            .log(format!("download {} {remote_path}", self.host));
        if self.script.failed_downloads.contains(self.host.as_str()) {
            return Err(ClientError::Transfer {
                remote_path: remote_path.to_owned(),
                message: "no such file".to_owned(),
            });
        }
        tokio::fs::write(local_path, b"backup")
            .await
            .map_err(|error| ClientError::Transfer {
                remote_path: remote_path.to_owned(),
                message: error.to_string(),
            })?;
        Ok(6)
    }
}

#[derive(Debug, Default)]
struct FakeStorage {
    failing: bool,
    uploads: Mutex<Vec<(String, String)>>,
}

impl FakeStorage {
    fn uploads(&self) -> Vec<(String, String)> {
        self.uploads.lock().unwrap().clone()
    }
}

#[async_trait]
impl BackupStorage for FakeStorage {
    async fn upload(
        &self,
        local_path: &Path,
        group: &str,
        file_name: &str,
    ) -> Result<(), StorageError> {
        assert!(local_path.exists(), "{} is missing", local_path.display());
        if self.failing {
            return Err(StorageError::Resolve("ftp.example.net".to_owned()));
        }
        self.uploads
            .lock()
            .unwrap()
            .push((group.to_owned(), file_name.to_owned()));
        Ok(())
    }
}

fn no_waits() -> Timings {
    Timings {
        retry_delay: Duration::ZERO,
        after_backup_save: Duration::ZERO,
        after_export: Duration::ZERO,
        between_downloads: Duration::ZERO,
        between_devices: Duration::ZERO,
        reboot_wait: Duration::ZERO,
    }
}

struct Harness {
    orchestrator: Arc<Orchestrator>,
    inventory: Arc<MemoryInventory>,
    script: Arc<Script>,
    storage: Arc<FakeStorage>,
    notifications_rx: mpsc::Receiver<Notification>,
    notifications: telegram::NotificationHandle,
    backup_dir: TempDir,
}

impl Harness {
    fn new(records: Vec<DeviceRecord>, script: Script) -> Self {
        Self::build(records, script, Some(FakeStorage::default()), |_| {})
    }

    fn build(
        records: Vec<DeviceRecord>,
        script: Script,
        storage: Option<FakeStorage>,
        configure: impl FnOnce(&mut Options),
    ) -> Self {
        let (tx, notifications_rx) = mpsc::channel(256);
        let notifications = telegram::NotificationHandle { tx };

        let inventory = Arc::new(MemoryInventory::new(records));
        let script = Arc::new(script);
        let backup_dir = tempfile::tempdir().unwrap();

        let has_storage = storage.is_some();
        let storage = Arc::new(storage.unwrap_or_default());
        let job_storage: Option<Arc<dyn BackupStorage>> =
            has_storage.then(|| Arc::clone(&storage) as Arc<dyn BackupStorage>);

        let mut options = Options {
            backup_dir: backup_dir.path().to_owned(),
            keep_count: 2,
            connect_attempts: 1,
            timings: no_waits(),
        };
        configure(&mut options);

        let orchestrator = Orchestrator::new(
            Arc::clone(&inventory) as Arc<dyn Inventory>,
            Arc::new(FakeConnector {
                script: Arc::clone(&script),
            }),
            job_storage,
            notifications.clone(),
            options,
        );

        Harness {
            orchestrator: Arc::new(orchestrator),
            inventory,
            script,
            storage,
            notifications_rx,
            notifications,
            backup_dir,
        }
    }

    async fn run(&self, kind: JobKind, selection: DeviceSelection) -> JobReport {
        let request = JobRequest {
            kind,
            selection,
            requested_by: None,
        };
        self.orchestrator
            .run_job(&request, &CancellationToken::new())
            .await
            .unwrap()
    }

    fn broadcasts(&mut self) -> Vec<String> {
        let mut texts = vec![];
        while let Ok(notification) = self.notifications_rx.try_recv() {
            if let Notification::Broadcast { text } = notification {
                texts.push(text);
            }
        }
        texts
    }
}

fn position(texts: &[String], needle: &str) -> usize {
    texts
        .iter()
        .position(|text| text.contains(needle))
        .unwrap_or_else(|| panic!("no notification mentions {needle:?}: {texts:#?}"))
}

#[tokio::test]
#[traced_test]
async fn backup_stores_files_and_removes_old_ones() {
    let script = Script::default().output(commands::FILE_PRINT, OLD_BACKUPS);
    let mut harness = Harness::new(vec![record(1, "core")], script);

    let report = harness
        .run(JobKind::Backup { with_update: false }, DeviceSelection::All)
        .await;

    assert_eq!(report.devices.len(), 1);
    assert_eq!(report.devices[0].final_status, FinalStatus::Ok);
    assert!(report.devices[0].status.starts_with("Backup for core completed: core-Backup-"));

    let uploads = harness.storage.uploads();
    assert_eq!(uploads.len(), 2);
    assert!(uploads.iter().all(|(group, _)| group == "core"));
    assert!(uploads[0].1.ends_with(".backup"));
    assert!(uploads[1].1.ends_with(".rsc"));
    for (_, file_name) in &uploads {
        assert!(harness.backup_dir.path().join("core").join(file_name).exists());
    }

    let calls = harness.script.calls();
    assert!(calls
        .iter()
        .any(|call| call.starts_with("run 10.0.0.1 /system backup save name=\"core-Backup-")));
    assert!(calls
        .iter()
        .any(|call| call.starts_with("run 10.0.0.1 /export file=\"core-Backup-")));
    let removed: Vec<&String> = calls
        .iter()
        .filter(|call| call.contains("/file remove"))
        .collect();
    assert_eq!(removed.len(), 2);
    assert!(removed.iter().all(|call| call.contains("20240101-0300")));

    let state = harness.inventory.state(1);
    assert_eq!(state.backup_status_final.as_deref(), Some("OK"));

    let texts = harness.broadcasts();
    assert!(position(&texts, "Scheduled backups started") < position(&texts, "created and uploaded"));
    assert!(position(&texts, "created and uploaded") < position(&texts, "Task completed"));
}

#[tokio::test]
#[traced_test]
async fn failed_upload_marks_the_device() {
    let mut harness = Harness::build(
        vec![record(1, "core")],
        Script::default(),
        Some(FakeStorage {
            failing: true,
            ..FakeStorage::default()
        }),
        |_| {},
    );

    let report = harness
        .run(JobKind::Backup { with_update: false }, DeviceSelection::All)
        .await;

    assert_eq!(report.devices[0].final_status, FinalStatus::Error);
    assert!(report.devices[0].status.contains("was not uploaded to FTP"));

    let texts = harness.broadcasts();
    assert!(texts.iter().any(|text| text.starts_with("FTP upload of core-Backup-")));
    assert!(texts.iter().any(|text| text.contains("the FTP upload failed")));
}

#[tokio::test]
#[traced_test]
async fn backup_without_storage_is_refused() {
    let harness = Harness::build(vec![record(1, "core")], Script::default(), None, |_| {});

    let request = JobRequest {
        kind: JobKind::Backup { with_update: false },
        selection: DeviceSelection::All,
        requested_by: Some(7),
    };
    let error = harness
        .orchestrator
        .run_job(&request, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(error.to_string().contains("FTP settings are missing"));
    assert!(harness.script.calls().is_empty());
}

#[tokio::test]
#[traced_test]
async fn unreachable_devices_are_retried_at_the_end() {
    let script = Script::default()
        .refuse("10.0.0.2", 1)
        .refuse("10.0.0.3", u32::MAX);
    let mut harness = Harness::new(
        vec![record(1, "core"), record(2, "edge"), record(3, "branch")],
        script,
    );

    let report = harness
        .run(JobKind::Backup { with_update: false }, DeviceSelection::All)
        .await;

    let outcome: Vec<(&str, FinalStatus)> = report
        .devices
        .iter()
        .map(|device| (device.name.as_str(), device.final_status))
        .collect();
    assert_eq!(
        outcome,
        vec![
            ("core", FinalStatus::Ok),
            ("edge", FinalStatus::Ok),
            ("branch", FinalStatus::Error),
        ]
    );

    let texts = harness.broadcasts();
    let header = position(&texts, "could not be reached");
    assert!(position(&texts, "#1 *#core*") < header);
    assert!(header < position(&texts, "Connected to 10.0.0.2 on the retry"));
    assert!(header < position(&texts, "#2 *#edge*"));
    assert!(header < position(&texts, "Could not connect to 10.0.0.3 on the retry"));
    assert!(logs_contain("device unreachable after the retry"));

    let state = harness.inventory.state(3);
    assert_eq!(state.backup_status_final.as_deref(), Some("Error"));
    assert!(state
        .backup_status
        .unwrap()
        .contains("Could not connect to 10.0.0.3 after 1 attempt."));
}

#[tokio::test]
#[traced_test]
async fn backup_with_update_installs_the_new_version() {
    let script = Script::default()
        .output(commands::CHECK_FOR_UPDATES, OUTDATED)
        .drops_on(commands::INSTALL_UPDATE);
    let mut harness = Harness::new(vec![record(1, "core")], script);

    let report = harness
        .run(JobKind::Backup { with_update: true }, DeviceSelection::All)
        .await;

    assert_eq!(report.devices[0].final_status, FinalStatus::Ok);
    assert!(harness
        .script
        .calls()
        .contains(&format!("run 10.0.0.1 {}", commands::INSTALL_UPDATE)));
    assert!(logs_contain("session closed by the device"));

    let texts = harness.broadcasts();
    let summary = &texts[position(&texts, "created and uploaded")];
    assert!(summary.ends_with("Update for MikroTik *#core* to version 7.12.1 completed."));

    let state = harness.inventory.state(1);
    assert_eq!(state.installed_version.as_deref(), Some("7.11.2"));
    assert_eq!(state.latest_version.as_deref(), Some("7.12.1"));
}

#[tokio::test]
#[traced_test]
async fn update_check_flags_outdated_devices() {
    let script = Script::default()
        .output(commands::CHECK_FOR_UPDATES, OUTDATED)
        .output(commands::ROUTERBOARD_PRINT, ROUTERBOARD);
    let mut harness = Harness::new(vec![record(1, "core")], script);

    let report = harness
        .run(JobKind::CheckUpdates, DeviceSelection::All)
        .await;

    assert_eq!(report.devices[0].final_status, FinalStatus::NeedsUpdate);
    assert_eq!(report.devices[0].status, "#core needs an update: 7.11.2 -> 7.12.1");
    assert!(!harness
        .script
        .calls()
        .iter()
        .any(|call| call.contains(commands::INSTALL_UPDATE)));

    let state = harness.inventory.state(1);
    assert_eq!(state.routerboard_firmware.as_deref(), Some("7.11.2"));
    assert_eq!(state.backup_status_final.as_deref(), Some("Needs Update"));

    let texts = harness.broadcasts();
    assert_eq!(
        texts,
        vec!["⚠ #core needs an update: 7.11.2 -> 7.12.1 | RouterBoard firmware: 7.11.2"]
    );
}

#[tokio::test]
#[traced_test]
async fn update_check_stays_quiet_for_current_devices() {
    let script = Script::default().output(
        commands::CHECK_FOR_UPDATES,
        "installed-version: 7.12.1\nlatest-version: 7.12.1\n",
    );
    let mut harness = Harness::new(vec![record(1, "core")], script);

    let report = harness
        .run(JobKind::CheckUpdates, DeviceSelection::All)
        .await;

    assert_eq!(report.devices[0].final_status, FinalStatus::Ok);
    assert!(harness.broadcasts().is_empty());
    assert_eq!(harness.inventory.state(1).routerboard_firmware, None);
}

#[tokio::test]
#[traced_test]
async fn upgrade_reports_every_device() {
    let script = Script::default()
        .output(commands::CHECK_FOR_UPDATES, OUTDATED)
        .drops_on(commands::INSTALL_UPDATE);
    let mut harness = Harness::new(vec![record(1, "core")], script);

    let report = harness.run(JobKind::Upgrade, DeviceSelection::All).await;

    assert_eq!(report.devices[0].final_status, FinalStatus::Ok);
    let texts = harness.broadcasts();
    assert!(texts[0].starts_with("🔹 Scheduled updates started!"));
    assert_eq!(
        texts[1],
        "🔹 #1 *#core* (10.0.0.1):\n✅ Update for MikroTik *#core* to version 7.12.1 completed."
    );
    assert!(texts[2].starts_with("✅ Update finished for all devices!"));
}

#[tokio::test]
#[traced_test]
async fn routerboard_upgrade_confirms_and_reboots() {
    let script = Script::default().drops_on(commands::REBOOT);
    let mut harness = Harness::new(vec![record(1, "core")], script);

    let report = harness
        .run(JobKind::RouterboardUpgrade, DeviceSelection::All)
        .await;

    assert_eq!(report.devices[0].final_status, FinalStatus::Ok);
    assert_eq!(
        harness.script.calls(),
        vec![
            "connect 10.0.0.1".to_owned(),
            format!("run 10.0.0.1 {}", commands::ROUTERBOARD_MANUAL_UPGRADE),
            format!("confirm 10.0.0.1 {}", commands::ROUTERBOARD_UPGRADE),
            format!("confirm 10.0.0.1 {}", commands::REBOOT),
        ]
    );

    let texts = harness.broadcasts();
    assert!(position(&texts, "RouterBoard upgrade started") < position(&texts, "upgraded and rebooted"));
    assert!(texts
        .last()
        .unwrap()
        .starts_with("✅ RouterBoard upgrade finished for all devices!"));
}

#[tokio::test]
#[traced_test]
async fn device_list_refreshes_incomplete_devices() {
    let mut core = record(1, "core");
    core.state = DeviceState {
        installed_version: Some("7.12.1".to_owned()),
        latest_version: Some("7.12.1".to_owned()),
        routerboard_firmware: Some("7.12.1".to_owned()),
        backup_status: Some("Backup for core completed".to_owned()),
        backup_status_final: Some("OK".to_owned()),
    };
    let script = Script::default()
        .output(commands::CHECK_FOR_UPDATES, OUTDATED)
        .output(commands::ROUTERBOARD_PRINT, ROUTERBOARD);
    let harness = Harness::new(vec![core, record(2, "edge")], script);

    let report = harness
        .run(JobKind::ListDevices { refresh: true }, DeviceSelection::All)
        .await;

    assert_eq!(
        report.summary(),
        "⚠ edge (10.0.0.2:22) 7.11.2 -> 7.12.1, firmware 7.11.2, status ?\n\
         ✅ core (10.0.0.1:22) 7.12.1 -> 7.12.1, firmware 7.12.1, status OK"
    );
    let connects: Vec<String> = harness
        .script
        .calls()
        .into_iter()
        .filter(|call| call.starts_with("connect"))
        .collect();
    assert_eq!(connects, vec!["connect 10.0.0.2"]);
}

#[test]
fn device_list_marks_unknown_versions() {
    assert_eq!(render_device_list(&[]), "No devices.");
    assert_eq!(
        render_device_list(&[record(3, "branch")]),
        "❔ branch (10.0.0.3:22) ? -> ?, firmware ?, status ?"
    );
}

#[tokio::test]
#[traced_test]
async fn named_selection_reports_unknown_names() {
    let harness = Harness::new(vec![record(1, "core")], Script::default());

    let report = harness
        .run(
            JobKind::CheckUpdates,
            DeviceSelection::Named(vec!["nowhere".to_owned()]),
        )
        .await;

    assert!(report.devices.is_empty());
    assert_eq!(report.unknown_names, vec!["nowhere"]);
    assert!(harness.script.calls().is_empty());
    assert!(logs_contain("no devices selected"));
}

#[tokio::test]
#[traced_test]
async fn cancelled_job_stops_before_the_next_device() {
    let mut harness = Harness::new(vec![record(1, "core"), record(2, "edge")], Script::default());

    let cancel = CancellationToken::new();
    cancel.cancel();
    let request = JobRequest {
        kind: JobKind::Upgrade,
        selection: DeviceSelection::All,
        requested_by: None,
    };
    let report = harness.orchestrator.run_job(&request, &cancel).await.unwrap();

    assert!(report.cancelled);
    assert!(report.devices.is_empty());
    assert!(harness.script.calls().is_empty());
    let texts = harness.broadcasts();
    position(&texts, "The upgrade was stopped on request");
}

fn device_report(id: i32, name: &str, final_status: FinalStatus) -> DeviceReport {
    DeviceReport {
        device_id: id,
        name: name.to_owned(),
        final_status,
        status: String::new(),
    }
}

#[test]
fn report_keeps_the_latest_outcome_per_device() {
    let mut report = JobReport::new(JobKind::Backup { with_update: false });
    report.record(device_report(1, "core", FinalStatus::Ok));
    report.record(device_report(2, "edge", FinalStatus::Error));
    report.record(device_report(3, "branch", FinalStatus::Error));
    report.record(device_report(2, "edge", FinalStatus::Ok));

    assert_eq!(report.devices.len(), 3);
    assert_eq!(report.failed(), 1);
    assert_eq!(
        report.summary(),
        "Backup finished: 2 OK, 1 failed.\nFailed: branch"
    );

    report.cancelled = true;
    report.unknown_names = vec!["nowhere".to_owned()];
    report.record(device_report(4, "lab", FinalStatus::NeedsUpdate));
    assert_eq!(
        report.summary(),
        "Backup finished: 2 OK, 1 failed, 1 need an update.\nFailed: branch\n\
         Stopped before all devices were processed.\nUnknown devices: nowhere"
    );
}

async fn next_direct(rx: &mut mpsc::Receiver<Notification>) -> (i64, String) {
    loop {
        let notification = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("no notification in time")
            .expect("notifier channel closed");
        if let Notification::Direct { chat_id, text } = notification {
            return (chat_id, text);
        }
    }
}

#[tokio::test]
#[traced_test]
async fn job_loop_runs_jobs_and_registers_chats() {
    let mut harness = Harness::new(vec![record(1, "core")], Script::default());

    let (jobs_tx, jobs_rx) = mpsc::channel(8);
    let (stop_tx, stop_rx) = mpsc::channel(8);
    let (registrations_tx, registrations_rx) = mpsc::channel(8);

    let mut tasks = crate::run(Params {
        orchestrator: Arc::clone(&harness.orchestrator),
        notifications: harness.notifications.clone(),
        jobs_rx,
        stop_rx,
        registrations_rx,
    })
    .await
    .unwrap();

    stop_tx.send(StopRequest { chat_id: 7 }).await.unwrap();
    assert_eq!(
        next_direct(&mut harness.notifications_rx).await,
        (7, "No job is running.".to_owned())
    );

    registrations_tx
        .send(ChatRegistration { chat_id: 42 })
        .await
        .unwrap();
    registrations_tx
        .send(ChatRegistration { chat_id: 42 })
        .await
        .unwrap();

    jobs_tx
        .send(JobRequest {
            kind: JobKind::ListDevices { refresh: false },
            selection: DeviceSelection::All,
            requested_by: Some(7),
        })
        .await
        .unwrap();
    assert_eq!(
        next_direct(&mut harness.notifications_rx).await,
        (7, "❔ core (10.0.0.1:22) ? -> ?, firmware ?, status ?".to_owned())
    );

    drop(jobs_tx);
    drop(registrations_tx);
    while tasks.join_next().await.is_some() {}

    assert_eq!(harness.inventory.load_chat_ids().await.unwrap(), vec![42]);
    assert!(logs_contain("chat already registered"));
}

#[tokio::test]
#[traced_test]
async fn stop_request_cancels_the_running_job() {
    let mut harness = Harness::build(
        vec![record(1, "core"), record(2, "edge")],
        Script::default(),
        Some(FakeStorage::default()),
        |options| options.timings.between_devices = Duration::from_secs(3600),
    );

    let (jobs_tx, jobs_rx) = mpsc::channel(8);
    let (stop_tx, stop_rx) = mpsc::channel(8);
    let (_registrations_tx, registrations_rx) = mpsc::channel(8);

    let _tasks = crate::run(Params {
        orchestrator: Arc::clone(&harness.orchestrator),
        notifications: harness.notifications.clone(),
        jobs_rx,
        stop_rx,
        registrations_rx,
    })
    .await
    .unwrap();

    jobs_tx
        .send(JobRequest {
            kind: JobKind::Backup { with_update: false },
            selection: DeviceSelection::All,
            requested_by: Some(7),
        })
        .await
        .unwrap();

    loop {
        let notification = tokio::time::timeout(
            Duration::from_secs(5),
            harness.notifications_rx.recv(),
        )
        .await
        .unwrap()
        .unwrap();
        if notification.text().contains("Backup and RSC for #core") {
            break;
        }
    }
    stop_tx.send(StopRequest { chat_id: 7 }).await.unwrap();

    let (chat_id, summary) = next_direct(&mut harness.notifications_rx).await;
    assert_eq!(chat_id, 7);
    assert_eq!(
        summary,
        "Backup finished: 1 OK, 0 failed.\nStopped before all devices were processed."
    );
    assert!(!harness
        .script
        .calls()
        .contains(&"connect 10.0.0.2".to_owned()));
}

#[tokio::test]
#[traced_test]
async fn upgrade_that_never_started_is_a_failure() {
    let script = Script::default()
        .output(commands::CHECK_FOR_UPDATES, OUTDATED)
        .fails_on("10.0.0.1", commands::INSTALL_UPDATE);
    let mut harness = Harness::new(vec![record(1, "core")], script);

    let report = harness.run(JobKind::Upgrade, DeviceSelection::All).await;

    assert_eq!(report.devices[0].final_status, FinalStatus::Error);
    assert!(report.devices[0]
        .status
        .starts_with("Update failed on #core (10.0.0.1): "));
    assert!(report.devices[0].status.contains("Unable to send channel-open request"));
    assert!(!logs_contain("session closed by the device"));

    let texts = harness.broadcasts();
    assert!(texts[1].starts_with("🔹 #1 *#core* (10.0.0.1):\n❌ Update failed on #core"));
    assert!(!texts.iter().any(|text| text.contains("to version 7.12.1 completed")));

    let state = harness.inventory.state(1);
    assert_eq!(state.backup_status_final.as_deref(), Some("Error"));
}

#[tokio::test]
#[traced_test]
async fn reboot_that_never_started_is_a_failure() {
    let script = Script::default().fails_on("10.0.0.1", commands::REBOOT);
    let mut harness = Harness::new(vec![record(1, "core")], script);

    let report = harness
        .run(JobKind::RouterboardUpgrade, DeviceSelection::All)
        .await;

    assert_eq!(report.devices[0].final_status, FinalStatus::Error);
    assert!(report.devices[0]
        .status
        .starts_with("RouterBoard upgrade failed for #core (10.0.0.1): "));

    let texts = harness.broadcasts();
    assert!(!texts.iter().any(|text| text.contains("upgraded and rebooted")));
}

#[tokio::test]
#[traced_test]
async fn failed_backup_commands_skip_to_the_next_device() {
    let script = Script::default()
        .fails_on("10.0.0.1", "/system backup save")
        .fails_on("10.0.0.2", "/export");
    let mut harness = Harness::new(
        vec![record(1, "core"), record(2, "edge"), record(3, "branch")],
        script,
    );

    let report = harness
        .run(JobKind::Backup { with_update: false }, DeviceSelection::All)
        .await;

    let outcome: Vec<(&str, FinalStatus)> = report
        .devices
        .iter()
        .map(|device| (device.name.as_str(), device.final_status))
        .collect();
    assert_eq!(
        outcome,
        vec![
            ("core", FinalStatus::Error),
            ("edge", FinalStatus::Error),
            ("branch", FinalStatus::Ok),
        ]
    );

    for (id, name, host) in [(1, "core", "10.0.0.1"), (2, "edge", "10.0.0.2")] {
        let state = harness.inventory.state(id);
        assert_eq!(state.backup_status_final.as_deref(), Some("Error"));
        assert!(state
            .backup_status
            .unwrap()
            .starts_with(&format!("Backup failed on #{name} ({host}): ")));
    }

    let calls = harness.script.calls();
    assert!(!calls
        .iter()
        .any(|call| call.starts_with("run 10.0.0.1 /export")));
    assert!(calls
        .iter()
        .any(|call| call.starts_with("run 10.0.0.2 /export")));
    for host in ["10.0.0.1", "10.0.0.2"] {
        assert!(!calls.iter().any(|call| call.starts_with(&format!("download {host}"))));
        assert!(!calls.iter().any(|call| call.starts_with(&format!("run {host} /file"))));
    }

    let uploads = harness.storage.uploads();
    assert_eq!(uploads.len(), 2);
    assert!(uploads.iter().all(|(group, _)| group == "branch"));

    let texts = harness.broadcasts();
    assert!(position(&texts, "Backup failed on #core") < position(&texts, "Backup failed on #edge"));
    assert!(position(&texts, "Backup failed on #edge") < position(&texts, "#3 *#branch*"));
    assert!(texts.last().unwrap().starts_with("✅ Task completed!"));
}

#[tokio::test]
#[traced_test]
async fn failed_download_skips_upload_and_cleanup() {
    let script = Script::default()
        .output(commands::FILE_PRINT, OLD_BACKUPS)
        .download_fails("10.0.0.1");
    let mut harness = Harness::new(vec![record(1, "core")], script);

    let report = harness
        .run(JobKind::Backup { with_update: false }, DeviceSelection::All)
        .await;

    assert_eq!(report.devices[0].final_status, FinalStatus::Error);
    let status = &report.devices[0].status;
    assert!(status.starts_with("Backup core-Backup-"));
    assert!(status.ends_with("for core was not downloaded"));

    let state = harness.inventory.state(1);
    assert_eq!(state.backup_status_final.as_deref(), Some("Error"));
    assert_eq!(state.backup_status.as_deref(), Some(status.as_str()));

    assert!(harness.storage.uploads().is_empty());
    let calls = harness.script.calls();
    assert_eq!(
        calls.iter().filter(|call| call.starts_with("download")).count(),
        1
    );
    assert!(!calls.iter().any(|call| call.contains("/file")));

    let texts = harness.broadcasts();
    assert!(position(&texts, "Download failed on #core (10.0.0.1)") < position(&texts, "Task completed"));
    assert!(!texts.iter().any(|text| text.contains("created and uploaded")));
}

#[tokio::test]
#[traced_test]
async fn failed_cleanup_still_completes_the_backup() {
    let script = Script::default()
        .output(commands::FILE_PRINT, OLD_BACKUPS)
        .fails_on("10.0.0.1", commands::FILE_PRINT)
        .fails_on("10.0.0.2", "/file remove");
    let mut harness = Harness::new(vec![record(1, "core"), record(2, "edge")], script);

    let report = harness
        .run(JobKind::Backup { with_update: false }, DeviceSelection::All)
        .await;

    assert!(report
        .devices
        .iter()
        .all(|device| device.final_status == FinalStatus::Ok));
    assert_eq!(harness.storage.uploads().len(), 4);

    let calls = harness.script.calls();
    let removals = |host: &str| {
        calls
            .iter()
            .filter(|call| call.starts_with(&format!("run {host} /file remove")))
            .count()
    };
    assert_eq!(removals("10.0.0.1"), 0);
    assert_eq!(removals("10.0.0.2"), 1);

    let texts = harness.broadcasts();
    let core = position(&texts, "Removing old backups failed on core (10.0.0.1)");
    let edge = position(&texts, "Removing old backups failed on edge (10.0.0.2)");
    assert!(core < edge);
    assert!(edge < position(&texts, "Task completed"));
}

#[tokio::test]
#[traced_test]
async fn outdated_selection_reads_unknown_versions_first() {
    let mut edge = record(2, "edge");
    edge.state.installed_version = Some("7.12.1".to_owned());
    edge.state.latest_version = Some("7.12.1".to_owned());
    let script = Script::default()
        .output(commands::CHECK_FOR_UPDATES, OUTDATED)
        .drops_on(commands::INSTALL_UPDATE);
    let harness = Harness::new(vec![record(1, "core"), edge], script);

    let report = harness
        .run(JobKind::Upgrade, DeviceSelection::NeedingUpdate)
        .await;

    assert_eq!(report.devices.len(), 1);
    assert_eq!(report.devices[0].name, "core");
    assert_eq!(report.devices[0].final_status, FinalStatus::Ok);

    let connects: Vec<String> = harness
        .script
        .calls()
        .into_iter()
        .filter(|call| call.starts_with("connect"))
        .collect();
    assert_eq!(connects, vec!["connect 10.0.0.1", "connect 10.0.0.1"]);
    assert!(logs_contain("reading versions before selecting outdated devices"));
}

#[tokio::test]
#[traced_test]
async fn stopped_retries_report_the_attempts_made() {
    let script = Script::default().refuse("10.0.0.1", u32::MAX);
    let harness = Harness::build(
        vec![record(1, "core")],
        script,
        Some(FakeStorage::default()),
        |options| {
            options.connect_attempts = 3;
            options.timings.retry_delay = Duration::from_secs(3600);
        },
    );

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        });
    }

    let request = JobRequest {
        kind: JobKind::Backup { with_update: false },
        selection: DeviceSelection::All,
        requested_by: None,
    };
    let report = tokio::time::timeout(
        Duration::from_secs(5),
        harness.orchestrator.run_job(&request, &cancel),
    )
    .await
    .unwrap()
    .unwrap();

    assert!(report.cancelled);
    assert_eq!(report.devices[0].final_status, FinalStatus::Error);
    assert_eq!(harness.script.calls(), vec!["connect 10.0.0.1".to_owned()]);

    let status = harness.inventory.state(1).backup_status.unwrap();
    assert!(status.contains("Could not connect to 10.0.0.1 after 1 attempt."));
}
