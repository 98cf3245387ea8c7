//! The entrypoint to the MikroTik manager.

#![allow(missing_docs)]

use std::{path::PathBuf, sync::Arc};

use anyhow::Context;
use channel_messages::{JobKind, JobRequest};
use clap::{Args, Parser, Subcommand};
use ftp_storage::{BackupStorage, FtpStorage};
use inventory::{DeviceSelection, FileInventory, Inventory};
use routeros_client::SshConnector;
use teloxide::{
    dispatching::dialogue::{serializer::Bincode, InMemStorage, RedisStorage, Storage},
    dispatching::ShutdownToken,
    requests::Requester,
};
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(version, about, long_about = None)]
#[command(name = "mikrotik-manager")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the Telegram bot and run the jobs it asks for.
    Bot,
    /// Back up the devices and store the copies on FTP.
    Backup {
        /// Install a pending RouterOS update after the backup.
        #[arg(long)]
        with_update: bool,
        #[command(flatten)]
        devices: DeviceArgs,
    },
    /// Check for RouterOS updates without installing them.
    CheckUpdates {
        #[command(flatten)]
        devices: DeviceArgs,
    },
    /// Install pending RouterOS updates.
    Upgrade {
        /// Only the devices known to run an older version.
        #[arg(long, conflicts_with = "names")]
        outdated: bool,
        #[command(flatten)]
        devices: DeviceArgs,
    },
    /// Upgrade the RouterBoard firmware and reboot.
    Routerboard {
        #[command(flatten)]
        devices: DeviceArgs,
    },
    /// Print the devices with their versions and last status.
    Devices {
        /// Ask the devices with missing versions first.
        #[arg(long)]
        refresh: bool,
        #[command(flatten)]
        devices: DeviceArgs,
    },
}

#[derive(Args)]
struct DeviceArgs {
    /// Work on this device only; can be repeated.
    #[arg(long = "device", value_name = "NAME")]
    names: Vec<String>,
}

impl DeviceArgs {
    fn selection(self) -> DeviceSelection {
        if self.names.is_empty() {
            DeviceSelection::All
        } else {
            DeviceSelection::Named(self.names)
        }
    }
}

impl Commands {
    /// `None` for the bot.
    fn into_job(self) -> Option<JobRequest> {
        let (kind, selection) = match self {
            Commands::Bot => return None,
            Commands::Backup {
                with_update,
                devices,
            } => (JobKind::Backup { with_update }, devices.selection()),
            Commands::CheckUpdates { devices } => (JobKind::CheckUpdates, devices.selection()),
            Commands::Upgrade { outdated: true, .. } => {
                (JobKind::Upgrade, DeviceSelection::NeedingUpdate)
            }
            Commands::Upgrade { devices, .. } => (JobKind::Upgrade, devices.selection()),
            Commands::Routerboard { devices } => {
                (JobKind::RouterboardUpgrade, devices.selection())
            }
            Commands::Devices { refresh, devices } => {
                (JobKind::ListDevices { refresh }, devices.selection())
            }
        };

        Some(JobRequest {
            kind,
            selection,
            requested_by: None,
        })
    }
}

struct Config {
    database_url: Option<String>,
    mikrotik_config: PathBuf,
    chat_ids_file: PathBuf,
    backup_dir: PathBuf,
    keep_count: usize,
    connect_attempts: u32,
    telegram_token: Option<String>,
    admin_chat_ids: telegram::AdminChatIds,
    redis_url: Option<String>,
}

impl Config {
    fn from_env() -> Result<Self, anyhow::Error> {
        let admin_chat_ids = match envfury::maybe::<String>("ADMIN_CHAT_IDS")? {
            Some(value) => telegram::AdminChatIds::parse(&value)
                .with_context(|| format!("ADMIN_CHAT_IDS is not a list of chat ids: {value}"))?,
            None => telegram::AdminChatIds::default(),
        };

        Ok(Config {
            database_url: envfury::maybe("DATABASE_URL")?,
            mikrotik_config: envfury::maybe("MIKROTIK_CONFIG")?
                .unwrap_or_else(|| PathBuf::from("./config.json")),
            chat_ids_file: envfury::maybe("CHAT_IDS_FILE")?
                .unwrap_or_else(|| PathBuf::from("./chat_ids.json")),
            backup_dir: envfury::maybe("BACKUP_DIR")?
                .unwrap_or_else(|| PathBuf::from("./BackUp/")),
            keep_count: envfury::maybe("BACKUP_KEEP_COUNT")?.unwrap_or(2),
            connect_attempts: envfury::maybe("CONNECT_ATTEMPTS")?.unwrap_or(3),
            telegram_token: envfury::maybe("TELOXIDE_TOKEN")?,
            admin_chat_ids,
            redis_url: envfury::maybe("REDIS_URL")?,
        })
    }

    fn options(&self) -> main_loop::Options {
        main_loop::Options {
            backup_dir: self.backup_dir.clone(),
            keep_count: self.keep_count,
            connect_attempts: self.connect_attempts,
            timings: main_loop::Timings::default(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    let inventory: Arc<dyn Inventory> = match &config.database_url {
        Some(database_url) => {
            tracing::info!("using the database inventory");
            Arc::new(database::db::Db::connect(database_url).await?)
        }
        None => {
            tracing::info!(
                message = "using the file inventory",
                config = %config.mikrotik_config.display(),
                chat_ids = %config.chat_ids_file.display()
            );
            Arc::new(FileInventory::new(
                config.mikrotik_config.clone(),
                config.chat_ids_file.clone(),
            ))
        }
    };

    let settings = inventory.load_settings().await?;
    tracing::info!(message = "Got settings", ?settings);

    let telegram_token = config
        .telegram_token
        .clone()
        .or(settings.telegram_token)
        .context("no Telegram token: set TELOXIDE_TOKEN or store one in the inventory")?;

    let storage = match settings.ftp {
        Some(ftp) => Some(Arc::new(FtpStorage::new(ftp)) as Arc<dyn BackupStorage>),
        None => {
            tracing::warn!("no FTP settings, backups will be refused");
            None
        }
    };

    let chat_ids: telegram::ChatIds = Arc::new(RwLock::new(
        inventory.load_chat_ids().await?.into_iter().collect(),
    ));

    let reqwest = teloxide::net::default_reqwest_settings().build()?;
    let bot = teloxide::Bot::with_client(telegram_token, reqwest);

    let (notification_tx, notification_rx) = mpsc::channel(100);
    let notifications = telegram::NotificationHandle {
        tx: notification_tx,
    };
    let notifier = tokio::spawn(telegram::notifier::run_loop(
        telegram::notifier::RunLoopParams {
            sender: bot.clone(),
            notification_rx,
            chat_ids: Arc::clone(&chat_ids),
            pause: telegram::notifier::PAUSE_BETWEEN_CHATS,
        },
    ));

    let orchestrator = Arc::new(main_loop::Orchestrator::new(
        inventory,
        Arc::new(SshConnector::default()),
        storage,
        notifications.clone(),
        config.options(),
    ));

    let result = match cli.command.into_job() {
        Some(request) => {
            drop(notifications);
            run_once(&orchestrator, request).await
        }
        None => serve(&config, bot, chat_ids, Arc::clone(&orchestrator), notifications).await,
    };

    // The notifier drains what is queued once the last handle is gone.
    drop(orchestrator);
    notifier.await?;

    tracing::info!(message = "Shutdown complete");
    result
}

/// Run a single job; Ctrl+C stops it between two steps.
async fn run_once(
    orchestrator: &main_loop::Orchestrator,
    request: JobRequest,
) -> Result<(), anyhow::Error> {
    let cancel = CancellationToken::new();

    let ctrl_c = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    tracing::info!("stopping the job");
                    cancel.cancel();
                }
                Err(error) => tracing::error!(message = "can't listen for Ctrl+C", ?error),
            }
        })
    };

    let report = orchestrator.run_job(&request, &cancel).await;
    ctrl_c.abort();
    let report = report?;

    println!("{}", report.summary());
    if report.failed() > 0 {
        anyhow::bail!("{} of {} devices failed", report.failed(), report.devices.len());
    }
    Ok(())
}

async fn serve(
    config: &Config,
    bot: teloxide::Bot,
    chat_ids: telegram::ChatIds,
    orchestrator: Arc<main_loop::Orchestrator>,
    notifications: telegram::NotificationHandle,
) -> Result<(), anyhow::Error> {
    let storage = dialogue_storage(config.redis_url.clone()).await?;

    let me = bot.get_me().await?;
    tracing::info!(message = "Bot info", ?me);

    let (jobs_tx, jobs_rx) = mpsc::channel(100);
    let (stop_tx, stop_rx) = mpsc::channel(100);
    let (registrations_tx, registrations_rx) = mpsc::channel(100);

    let telegram = telegram::Telegram {
        bot,
        storage,
        admin_chat_ids: config.admin_chat_ids.clone(),
        chat_ids,
        job_control: telegram::JobControl {
            jobs_tx,
            stop_tx,
            registrations_tx,
        },
    };

    telegram.set_commands().await?;

    let (fut, shutdown_token) = telegram.setup();

    tracing::info!("Telegram commands successfully setup");

    let mut loops = main_loop::run(main_loop::Params {
        orchestrator,
        notifications,
        jobs_rx,
        stop_rx,
        registrations_rx,
    })
    .await?;

    tracing::info!("Main loop successfully run");

    setup_shutdown_handler(shutdown_token);
    fut.await;
    loops.shutdown().await;

    Ok(())
}

async fn dialogue_storage(redis_url: Option<String>) -> Result<telegram::MyStorage, anyhow::Error> {
    match redis_url {
        Some(redis_url) => {
            let storage = RedisStorage::open(redis_url, Bincode)
                .await
                .map_err(|error| anyhow::anyhow!("can't open the Redis storage: {error}"))?;
            Ok(storage.erase())
        }
        None => {
            tracing::info!("no REDIS_URL, dialogues are kept in memory");
            Ok(InMemStorage::new().erase())
        }
    }
}

/// Set up the system signal callbacks to trigger the graceful shutdown.
fn setup_shutdown_handler(teloxide_shutdown_token: ShutdownToken) {
    tokio::spawn(async move {
        loop {
            if let Err(error) = tokio::signal::ctrl_c().await {
                tracing::error!(message = "can't listen for Ctrl+C", ?error);
                return;
            }

            if let Ok(fut) = teloxide_shutdown_token.shutdown() {
                fut.await
            }
        }
    });
}
