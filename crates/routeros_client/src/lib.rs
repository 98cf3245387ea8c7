//! Shell and file access to RouterOS devices.
//!
//! [`DeviceConnector`] and [`DeviceSession`] are what the jobs work against;
//! [`SshConnector`] implements them over SSH, with SFTP for file transfers.
//! libssh2 is blocking, so every call is moved to the blocking thread pool.

#![allow(missing_docs, clippy::missing_docs_in_private_items)]

use std::{
    io::{Read, Write},
    net::{TcpStream, ToSocketAddrs},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use inventory::Device;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("can't resolve {host}: {source}")]
    Resolve {
        host: String,
        source: std::io::Error,
    },
    #[error("can't connect to {address}: {source}")]
    Connect {
        address: String,
        source: std::io::Error,
    },
    #[error("SSH handshake with {host} failed: {source}")]
    Handshake { host: String, source: ssh2::Error },
    #[error("authentication as {username} on {host} failed: {source}")]
    Authentication {
        host: String,
        username: String,
        source: ssh2::Error,
    },
    #[error("command `{command}` failed: {message}")]
    Command { command: String, message: String },
    /// The command reached the device, then the session went away.
    #[error("session closed while `{command}` ran: {message}")]
    Disconnected { command: String, message: String },
    #[error("transfer of {remote_path} failed: {message}")]
    Transfer {
        remote_path: String,
        message: String,
    },
    #[error("SSH session is unusable after an earlier panic")]
    Poisoned,
    #[error("SSH task failed: {0}")]
    Background(#[from] tokio::task::JoinError),
}

impl ClientError {
    pub fn is_authentication(&self) -> bool {
        matches!(self, ClientError::Authentication { .. })
    }

    pub fn is_disconnect(&self) -> bool {
        matches!(self, ClientError::Disconnected { .. })
    }
}

/// An open shell on a device.
#[async_trait]
pub trait DeviceSession: Send + Sync {
    /// Run a command and return everything it printed.
    async fn run(&self, command: &str) -> Result<String, ClientError>;

    /// Run a command that asks `[y/N]` and confirm it.
    async fn run_confirmed(&self, command: &str) -> Result<String, ClientError>;

    /// Copy a file from the device, returning the number of bytes written.
    async fn download(&self, remote_path: &str, local_path: &Path) -> Result<u64, ClientError>;
}

#[async_trait]
pub trait DeviceConnector: Send + Sync {
    async fn connect(&self, device: &Device) -> Result<Box<dyn DeviceSession>, ClientError>;
}

#[derive(Debug, Clone)]
pub struct SshConnector {
    pub connect_timeout: Duration,
    /// Applies to every blocking libssh2 call of the session.
    pub session_timeout: Duration,
}

impl Default for SshConnector {
    fn default() -> Self {
        SshConnector {
            connect_timeout: Duration::from_secs(30),
            session_timeout: Duration::from_secs(20),
        }
    }
}

impl SshConnector {
    fn open_tcp(&self, host: &str, port: u16) -> Result<TcpStream, ClientError> {
        let addresses = (host, port)
            .to_socket_addrs()
            .map_err(|source| ClientError::Resolve {
                host: host.to_owned(),
                source,
            })?;

        let mut last_error = None;
        for address in addresses {
            match TcpStream::connect_timeout(&address, self.connect_timeout) {
                Ok(stream) => return Ok(stream),
                Err(source) => {
                    tracing::debug!(message = "tcp connect failed", %address, %source);
                    last_error = Some(ClientError::Connect {
                        address: address.to_string(),
                        source,
                    });
                }
            }
        }

        Err(last_error.unwrap_or_else(|| ClientError::Resolve {
            host: host.to_owned(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no addresses"),
        }))
    }

    fn open_session(&self, device: &Device) -> Result<ssh2::Session, ClientError> {
        let stream = self.open_tcp(&device.host, device.port)?;

        let handshake_error = |source| ClientError::Handshake {
            host: device.host.clone(),
            source,
        };

        let mut session = ssh2::Session::new().map_err(handshake_error)?;
        session.set_tcp_stream(stream);
        session.set_timeout(u32::try_from(self.session_timeout.as_millis()).unwrap_or(u32::MAX));
        session.handshake().map_err(handshake_error)?;
        session
            .userauth_password(&device.username, &device.password)
            .map_err(|source| ClientError::Authentication {
                host: device.host.clone(),
                username: device.username.clone(),
                source,
            })?;

        Ok(session)
    }
}

#[async_trait]
impl DeviceConnector for SshConnector {
    async fn connect(&self, device: &Device) -> Result<Box<dyn DeviceSession>, ClientError> {
        let connector = self.clone();
        let device = device.clone();

        tracing::debug!(message = "opening ssh session", host = %device.host, port = device.port, username = %device.username);

        let host = device.host.clone();
        let session =
            tokio::task::spawn_blocking(move || connector.open_session(&device)).await??;

        Ok(Box::new(SshSession {
            host,
            session: Arc::new(Mutex::new(session)),
        }))
    }
}

pub struct SshSession {
    host: String,
    session: Arc<Mutex<ssh2::Session>>,
}

impl SshSession {
    async fn blocking<T, F>(&self, f: F) -> Result<T, ClientError>
    where
        F: FnOnce(&ssh2::Session) -> Result<T, ClientError> + Send + 'static,
        T: Send + 'static,
    {
        let session = Arc::clone(&self.session);
        tokio::task::spawn_blocking(move || {
            let session = session.lock().map_err(|_| ClientError::Poisoned)?;
            f(&session)
        })
        .await?
    }

    async fn exec(&self, command: &str, answer: Option<&'static str>) -> Result<String, ClientError> {
        tracing::debug!(message = "running command", host = %self.host, %command);
        let command = command.to_owned();
        self.blocking(move |session| exec(session, &command, answer))
            .await
    }
}

fn exec(
    session: &ssh2::Session,
    command: &str,
    answer: Option<&str>,
) -> Result<String, ClientError> {
    let command_error = |message: String| ClientError::Command {
        command: command.to_owned(),
        message,
    };
    let disconnected = |message: String| ClientError::Disconnected {
        command: command.to_owned(),
        message,
    };

    let mut channel = session
        .channel_session()
        .map_err(|error| command_error(error.to_string()))?;
    channel
        .exec(command)
        .map_err(|error| command_error(error.to_string()))?;

    if let Some(answer) = answer {
        channel
            .write_all(answer.as_bytes())
            .map_err(|error| command_error(error.to_string()))?;
    }

    // From here on the device has the command.
    channel
        .send_eof()
        .map_err(|error| disconnected(error.to_string()))?;

    let mut output = vec![];
    channel
        .read_to_end(&mut output)
        .map_err(|error| disconnected(error.to_string()))?;
    channel
        .wait_close()
        .map_err(|error| disconnected(error.to_string()))?;

    Ok(String::from_utf8_lossy(&output).into_owned())
}

fn download(
    session: &ssh2::Session,
    remote_path: &str,
    local_path: &Path,
) -> Result<u64, ClientError> {
    let transfer_error = |message: String| ClientError::Transfer {
        remote_path: remote_path.to_owned(),
        message,
    };

    let sftp = session
        .sftp()
        .map_err(|error| transfer_error(error.to_string()))?;
    let mut remote = sftp
        .open(Path::new(remote_path))
        .map_err(|error| transfer_error(error.to_string()))?;
    let mut local = std::fs::File::create(local_path)
        .map_err(|error| transfer_error(format!("{}: {error}", local_path.display())))?;

    std::io::copy(&mut remote, &mut local).map_err(|error| transfer_error(error.to_string()))
}

#[async_trait]
impl DeviceSession for SshSession {
    async fn run(&self, command: &str) -> Result<String, ClientError> {
        self.exec(command, None).await
    }

    async fn run_confirmed(&self, command: &str) -> Result<String, ClientError> {
        self.exec(command, Some("y\n")).await
    }

    async fn download(&self, remote_path: &str, local_path: &Path) -> Result<u64, ClientError> {
        tracing::debug!(message = "downloading", host = %self.host, %remote_path, local_path = %local_path.display());
        let remote_path = remote_path.to_owned();
        let local_path: PathBuf = local_path.to_owned();
        self.blocking(move |session| download(session, &remote_path, &local_path))
            .await
    }
}
