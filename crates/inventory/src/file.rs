//! JSON file backed inventory, for running without a database.

use std::{
    collections::HashMap,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use anyhow::Context;
use async_trait::async_trait;
use derivative::Derivative;
use routeros_logic::{truncate_message, MAX_MESSAGE_CHARS};
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::{
    Device, DeviceRecord, DeviceState, DeviceVersions, FinalStatus, FtpSettings, Inventory,
    Settings, DEFAULT_SSH_PORT, DEFAULT_USERNAME,
};

#[derive(Derivative, Clone, Deserialize)]
#[derivative(Debug)]
pub struct FileDevice {
    pub name: String,
    pub host: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default, alias = "user")]
    pub username: Option<String>,
    #[serde(default)]
    #[derivative(Debug = "ignore")]
    pub password: Option<String>,
}

impl FileDevice {
    fn to_device(&self, id: i32) -> Device {
        Device {
            id,
            name: self.name.clone(),
            host: self.host.clone(),
            port: self.port.unwrap_or(DEFAULT_SSH_PORT),
            username: self
                .username
                .clone()
                .filter(|username| !username.is_empty())
                .unwrap_or_else(|| DEFAULT_USERNAME.to_owned()),
            password: self.password.clone().unwrap_or_default(),
        }
    }
}

/// The `config.json` layout.
#[derive(Derivative, Clone, Deserialize)]
#[derivative(Debug)]
pub struct FileConfig {
    #[serde(default)]
    #[derivative(Debug = "ignore")]
    pub telegram_token: Option<String>,
    #[serde(default)]
    pub ftp: Option<FtpSettings>,
    #[serde(default, rename = "mikrotiks", alias = "devices")]
    pub devices: Vec<FileDevice>,
}

impl FileConfig {
    pub fn from_json(json: &str) -> Result<Self, anyhow::Error> {
        Ok(serde_json::from_str(json)?)
    }

    pub async fn load(path: &Path) -> Result<Self, anyhow::Error> {
        let json = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_json(&json).with_context(|| format!("parsing {}", path.display()))
    }

    /// Devices numbered by their position, starting at 1.
    pub fn devices(&self) -> Vec<Device> {
        self.devices
            .iter()
            .zip(1..)
            .map(|(device, id)| device.to_device(id))
            .collect()
    }
}

/// Reads `config.json` on every load and keeps the chat ids in their own file.
/// Statuses and versions only live as long as the process.
#[derive(Debug)]
pub struct FileInventory {
    config_path: PathBuf,
    chat_ids_path: PathBuf,
    states: Mutex<HashMap<i32, DeviceState>>,
}

impl FileInventory {
    pub fn new(config_path: impl Into<PathBuf>, chat_ids_path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: config_path.into(),
            chat_ids_path: chat_ids_path.into(),
            states: Mutex::new(HashMap::new()),
        }
    }

    async fn read_chat_ids(&self) -> Result<Vec<i64>, anyhow::Error> {
        match tokio::fs::read_to_string(&self.chat_ids_path).await {
            Ok(json) => serde_json::from_str(&json)
                .with_context(|| format!("parsing {}", self.chat_ids_path.display())),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(vec![]),
            Err(error) => Err(anyhow::Error::new(error)
                .context(format!("reading {}", self.chat_ids_path.display()))),
        }
    }
}

#[async_trait]
impl Inventory for FileInventory {
    async fn load_devices(&self) -> Result<Vec<DeviceRecord>, anyhow::Error> {
        let config = FileConfig::load(&self.config_path).await?;
        let states = self.states.lock().await;

        Ok(config
            .devices()
            .into_iter()
            .map(|device| DeviceRecord {
                state: states.get(&device.id).cloned().unwrap_or_default(),
                device,
            })
            .collect())
    }

    async fn load_settings(&self) -> Result<Settings, anyhow::Error> {
        let config = FileConfig::load(&self.config_path).await?;
        Ok(Settings {
            telegram_token: config.telegram_token,
            ftp: config.ftp,
        })
    }

    async fn load_chat_ids(&self) -> Result<Vec<i64>, anyhow::Error> {
        self.read_chat_ids().await
    }

    async fn add_chat_id(&self, chat_id: i64) -> Result<bool, anyhow::Error> {
        let mut chat_ids = self.read_chat_ids().await?;
        if chat_ids.contains(&chat_id) {
            return Ok(false);
        }
        chat_ids.push(chat_id);

        let json = serde_json::to_string(&chat_ids)?;
        tokio::fs::write(&self.chat_ids_path, json)
            .await
            .with_context(|| format!("writing {}", self.chat_ids_path.display()))?;

        tracing::info!(message = "chat id stored", ?chat_id, path = %self.chat_ids_path.display());
        Ok(true)
    }

    async fn update_device_status(
        &self,
        device_id: i32,
        status: &str,
        final_status: FinalStatus,
    ) -> Result<(), anyhow::Error> {
        let mut states = self.states.lock().await;
        let state = states.entry(device_id).or_default();
        state.backup_status = Some(truncate_message(status, MAX_MESSAGE_CHARS));
        state.backup_status_final = Some(final_status.to_string());
        Ok(())
    }

    async fn update_versions(
        &self,
        device_id: i32,
        versions: &DeviceVersions,
    ) -> Result<(), anyhow::Error> {
        let mut states = self.states.lock().await;
        let state = states.entry(device_id).or_default();
        state.installed_version = versions.installed_version.clone();
        state.latest_version = versions.latest_version.clone();
        state.routerboard_firmware = versions.routerboard_firmware.clone();
        Ok(())
    }
}
