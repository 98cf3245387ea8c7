//! The device inventory: devices, their last known state, settings and the
//! chat ids that receive notifications.

#![allow(missing_docs, clippy::missing_docs_in_private_items)]

use std::fmt;

use async_trait::async_trait;
use derivative::Derivative;
use serde::{Deserialize, Serialize};

mod file;

pub use file::{FileConfig, FileDevice, FileInventory};

pub const DEFAULT_SSH_PORT: u16 = 22;
pub const DEFAULT_FTP_PORT: u16 = 21;
pub const DEFAULT_USERNAME: &str = "admin";

#[derive(Derivative, Clone, PartialEq, Eq)]
#[derivative(Debug)]
pub struct Device {
    pub id: i32,
    pub name: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    #[derivative(Debug = "ignore")]
    pub password: String,
}

/// What we last learned about a device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceState {
    pub installed_version: Option<String>,
    pub latest_version: Option<String>,
    pub routerboard_firmware: Option<String>,
    pub backup_status: Option<String>,
    pub backup_status_final: Option<String>,
}

impl DeviceState {
    /// `None` unless both package versions are known.
    pub fn needs_update(&self) -> Option<bool> {
        match (&self.installed_version, &self.latest_version) {
            (Some(installed), Some(latest)) => routeros_logic::needs_update(installed, latest),
            _ => None,
        }
    }

    /// Some of the version fields were never collected.
    pub fn is_incomplete(&self) -> bool {
        self.installed_version.is_none()
            || self.latest_version.is_none()
            || self.routerboard_firmware.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRecord {
    pub device: Device,
    pub state: DeviceState,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceVersions {
    pub installed_version: Option<String>,
    pub latest_version: Option<String>,
    pub routerboard_firmware: Option<String>,
}

/// The short status stored next to the free-form one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalStatus {
    Ok,
    Error,
    NeedsUpdate,
}

impl FinalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FinalStatus::Ok => "OK",
            FinalStatus::Error => "Error",
            FinalStatus::NeedsUpdate => "Needs Update",
        }
    }
}

impl fmt::Display for FinalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_ftp_port() -> u16 {
    DEFAULT_FTP_PORT
}

#[derive(Derivative, Clone, PartialEq, Eq, Deserialize)]
#[derivative(Debug)]
pub struct FtpSettings {
    pub host: String,
    #[serde(default = "default_ftp_port")]
    pub port: u16,
    #[serde(alias = "user")]
    pub username: String,
    #[derivative(Debug = "ignore")]
    pub password: String,
    /// Base folder for the uploads.
    #[serde(default)]
    pub dir: String,
}

#[derive(Derivative, Clone, Default)]
#[derivative(Debug)]
pub struct Settings {
    #[derivative(Debug = "ignore")]
    pub telegram_token: Option<String>,
    pub ftp: Option<FtpSettings>,
}

/// Which devices a job works on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceSelection {
    #[default]
    All,
    Named(Vec<String>),
    /// Devices with both versions known and an older installed one.
    NeedingUpdate,
}

impl DeviceSelection {
    /// Parse command arguments: nothing means all devices, `outdated` means
    /// the devices needing an update, anything else is a list of names.
    pub fn from_args(args: &str) -> Self {
        let names: Vec<String> = args
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|name| !name.is_empty())
            .map(str::to_owned)
            .collect();

        match names.as_slice() {
            [] => DeviceSelection::All,
            [single] if single.eq_ignore_ascii_case("outdated") => DeviceSelection::NeedingUpdate,
            _ => DeviceSelection::Named(names),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Selected {
    pub devices: Vec<DeviceRecord>,
    pub unknown_names: Vec<String>,
}

pub fn select_devices(records: Vec<DeviceRecord>, selection: &DeviceSelection) -> Selected {
    match selection {
        DeviceSelection::All => Selected {
            devices: records,
            unknown_names: vec![],
        },
        DeviceSelection::NeedingUpdate => Selected {
            devices: records
                .into_iter()
                .filter(|record| record.state.needs_update() == Some(true))
                .collect(),
            unknown_names: vec![],
        },
        DeviceSelection::Named(names) => {
            let unknown_names = names
                .iter()
                .filter(|name| {
                    !records
                        .iter()
                        .any(|record| record.device.name.eq_ignore_ascii_case(name))
                })
                .cloned()
                .collect();
            let devices = records
                .into_iter()
                .filter(|record| {
                    names
                        .iter()
                        .any(|name| record.device.name.eq_ignore_ascii_case(name))
                })
                .collect();
            Selected {
                devices,
                unknown_names,
            }
        }
    }
}

/// Put the devices that need an update on top; unknown versions count as
/// needing one so that they get looked at.
pub fn sort_needing_update_first(records: &mut [DeviceRecord]) {
    records.sort_by_key(|record| !record.state.needs_update().unwrap_or(true));
}

/// Storage for the inventory and the per-device status.
#[async_trait]
pub trait Inventory: Send + Sync {
    async fn load_devices(&self) -> Result<Vec<DeviceRecord>, anyhow::Error>;

    async fn load_settings(&self) -> Result<Settings, anyhow::Error>;

    async fn load_chat_ids(&self) -> Result<Vec<i64>, anyhow::Error>;

    /// Returns `false` when the chat id was already known.
    async fn add_chat_id(&self, chat_id: i64) -> Result<bool, anyhow::Error>;

    async fn update_device_status(
        &self,
        device_id: i32,
        status: &str,
        final_status: FinalStatus,
    ) -> Result<(), anyhow::Error>;

    async fn update_versions(
        &self,
        device_id: i32,
        versions: &DeviceVersions,
    ) -> Result<(), anyhow::Error>;
}
