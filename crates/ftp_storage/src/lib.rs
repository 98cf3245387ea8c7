//! Off-site copies of the device backups.

#![allow(missing_docs, clippy::missing_docs_in_private_items)]

use std::{
    net::ToSocketAddrs,
    path::{Path, PathBuf},
    time::Duration,
};

use async_trait::async_trait;
use inventory::FtpSettings;
use suppaftp::{types::FileType, FtpStream};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("can't resolve FTP host {0}")]
    Resolve(String),
    #[error("FTP error: {0}")]
    Ftp(#[from] suppaftp::FtpError),
    #[error("can't read {path}: {source}")]
    Local {
        path: String,
        source: std::io::Error,
    },
    #[error("FTP task failed: {0}")]
    Background(#[from] tokio::task::JoinError),
}

#[async_trait]
pub trait BackupStorage: Send + Sync {
    /// Store `local_path` as `<group>/<file_name>` under the storage root.
    async fn upload(
        &self,
        local_path: &Path,
        group: &str,
        file_name: &str,
    ) -> Result<(), StorageError>;
}

/// `<base>/<group>`, without doubling the separator.
pub fn remote_dir(base: &str, group: &str) -> String {
    format!("{}/{group}", base.trim_end_matches('/'))
}

#[derive(Debug, Clone)]
pub struct FtpStorage {
    settings: FtpSettings,
    timeout: Duration,
}

impl FtpStorage {
    pub fn new(settings: FtpSettings) -> Self {
        FtpStorage {
            settings,
            timeout: Duration::from_secs(20),
        }
    }

    fn upload_blocking(
        &self,
        local_path: &Path,
        remote_dir: &str,
        remote_file: &str,
    ) -> Result<u64, StorageError> {
        let address = (self.settings.host.as_str(), self.settings.port)
            .to_socket_addrs()
            .ok()
            .and_then(|mut addresses| addresses.next())
            .ok_or_else(|| StorageError::Resolve(self.settings.host.clone()))?;

        let mut file = std::fs::File::open(local_path).map_err(|source| StorageError::Local {
            path: local_path.display().to_string(),
            source,
        })?;

        let mut ftp = FtpStream::connect_timeout(address, self.timeout)?;
        ftp.login(self.settings.username.as_str(), self.settings.password.as_str())?;

        if let Err(error) = ftp.mkdir(remote_dir) {
            tracing::debug!(message = "mkdir failed, assuming the folder exists", %remote_dir, %error);
        }

        ftp.transfer_type(FileType::Binary)?;
        let bytes = ftp.put_file(remote_file, &mut file)?;

        if let Err(error) = ftp.quit() {
            tracing::warn!(message = "FTP quit failed", %error);
        }

        Ok(bytes)
    }
}

#[async_trait]
impl BackupStorage for FtpStorage {
    async fn upload(
        &self,
        local_path: &Path,
        group: &str,
        file_name: &str,
    ) -> Result<(), StorageError> {
        let remote_dir = remote_dir(&self.settings.dir, group);
        let remote_file = format!("{remote_dir}/{file_name}");

        tracing::info!(message = "uploading to FTP", host = %self.settings.host, %remote_file);

        let storage = self.clone();
        let local_path: PathBuf = local_path.to_owned();
        let uploaded = remote_file.clone();
        let bytes = tokio::task::spawn_blocking(move || {
            storage.upload_blocking(&local_path, &remote_dir, &remote_file)
        })
        .await??;

        tracing::info!(message = "uploaded to FTP", remote_file = %uploaded, bytes);
        Ok(())
    }
}
