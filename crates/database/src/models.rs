//! Models for interaction with the database.

#![allow(missing_docs, clippy::missing_docs_in_private_items)]

use crate::schema::{ftp_settings, mikrotik_devices};
use diesel::prelude::*;
use inventory::{
    Device, DeviceRecord, DeviceState, FtpSettings, DEFAULT_FTP_PORT, DEFAULT_SSH_PORT,
};

/// A row of the device inventory.
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = mikrotik_devices)]
pub struct DeviceRow {
    pub id: i32,
    pub name: String,
    pub host: String,
    pub port: i32,
    pub username: String,
    pub password: String,
    pub installed_version: Option<String>,
    pub latest_version: Option<String>,
    pub routerboard_firmware: Option<String>,
    pub backup_status: Option<String>,
    pub backup_status_final: Option<String>,
}

/// The first row of the FTP settings.
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = ftp_settings)]
pub struct FtpSettingsRow {
    pub host: String,
    pub port: i32,
    pub username: String,
    pub password: String,
    pub dir: String,
}

fn port_or(port: i32, default: u16) -> u16 {
    u16::try_from(port).unwrap_or_else(|_| {
        tracing::warn!(message = "port out of range, using default", port, default);
        default
    })
}

impl From<DeviceRow> for DeviceRecord {
    fn from(row: DeviceRow) -> Self {
        DeviceRecord {
            device: Device {
                id: row.id,
                name: row.name,
                host: row.host,
                port: port_or(row.port, DEFAULT_SSH_PORT),
                username: row.username,
                password: row.password,
            },
            state: DeviceState {
                installed_version: row.installed_version,
                latest_version: row.latest_version,
                routerboard_firmware: row.routerboard_firmware,
                backup_status: row.backup_status,
                backup_status_final: row.backup_status_final,
            },
        }
    }
}

impl From<FtpSettingsRow> for FtpSettings {
    fn from(row: FtpSettingsRow) -> Self {
        FtpSettings {
            host: row.host,
            port: port_or(row.port, DEFAULT_FTP_PORT),
            username: row.username,
            password: row.password,
            dir: row.dir,
        }
    }
}

#[cfg(test)]
mod tests {
    use inventory::{DeviceRecord, FtpSettings};

    use super::{DeviceRow, FtpSettingsRow};

    #[test]
    fn rows_convert_with_port_fallback() {
        let record = DeviceRecord::from(DeviceRow {
            id: 7,
            name: "core".to_owned(),
            host: "10.0.0.1".to_owned(),
            port: 70_000,
            username: "admin".to_owned(),
            password: "pw".to_owned(),
            installed_version: Some("7.11".to_owned()),
            latest_version: Some("7.12".to_owned()),
            routerboard_firmware: None,
            backup_status: None,
            backup_status_final: Some("OK".to_owned()),
        });
        assert_eq!(record.device.port, 22);
        assert_eq!(record.state.needs_update(), Some(true));
        assert!(record.state.is_incomplete());

        let ftp = FtpSettings::from(FtpSettingsRow {
            host: "ftp.example.net".to_owned(),
            port: 2121,
            username: "backup".to_owned(),
            password: "secret".to_owned(),
            dir: "/mikrotik".to_owned(),
        });
        assert_eq!(ftp.port, 2121);
    }
}
