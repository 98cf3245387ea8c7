//! Telegram implementation.
#![allow(missing_docs)]

mod handlers;
mod messages;
pub mod notifier;
mod teloxide_ext;

use std::{collections::BTreeSet, future::Future, sync::Arc};

use channel_messages::{ChatRegistration, JobRequest, Notification, StopRequest};
use derivative::Derivative;
use teloxide::dispatching::dialogue::ErasedStorage;
use teloxide::utils::command::BotCommands;
use teloxide::{dispatching::ShutdownToken, prelude::*};
use tokio::sync::{mpsc, RwLock};

pub use handlers::{Command, ConfirmCommand, State};

/// Dialogue storage, in memory or in Redis.
pub type MyStorage = Arc<ErasedStorage<State>>;

/// Chats that receive broadcasts.
pub type ChatIds = Arc<RwLock<BTreeSet<i64>>>;

/// Chats allowed to run jobs.
#[derive(Debug, Clone, Default)]
pub struct AdminChatIds(pub Vec<i64>);

impl AdminChatIds {
    /// Comma separated ids; blanks are skipped.
    pub fn parse(value: &str) -> Result<Self, std::num::ParseIntError> {
        let ids = value
            .split(',')
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::parse::<i64>)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(AdminChatIds(ids))
    }

    pub fn contains(&self, chat_id: ChatId) -> bool {
        self.0.contains(&chat_id.0)
    }
}

/// Senders the handlers use to reach the job loop.
#[derive(Debug, Clone)]
pub struct JobControl {
    pub jobs_tx: mpsc::Sender<JobRequest>,
    pub stop_tx: mpsc::Sender<StopRequest>,
    pub registrations_tx: mpsc::Sender<ChatRegistration>,
}

#[derive(Derivative)]
#[derivative(Debug)]
/// Telegram encapsulates the interface to the telegram.
pub struct Telegram {
    /// The underlying Telegram Bot client.
    pub bot: Bot,
    #[derivative(Debug = "ignore")]
    pub storage: MyStorage,
    pub admin_chat_ids: AdminChatIds,
    pub chat_ids: ChatIds,
    pub job_control: JobControl,
}

#[derive(Debug, Clone)]
pub struct NotificationHandle {
    pub tx: mpsc::Sender<Notification>,
}

impl NotificationHandle {
    pub async fn send_notification(
        &self,
        notification: Notification,
    ) -> Result<(), mpsc::error::SendError<Notification>> {
        self.tx.send(notification).await
    }

    pub async fn broadcast(&self, text: impl Into<String>) {
        if let Err(error) = self.send_notification(Notification::broadcast(text)).await {
            tracing::error!(message = "notifier is gone, dropping broadcast", text = %error.0.text());
        }
    }
}

impl Telegram {
    /// Set bot commands.
    pub async fn set_commands(&self) -> Result<(), anyhow::Error> {
        self.bot.set_my_commands(Command::bot_commands()).await?;
        Ok(())
    }

    /// Prepare the control future and a shutdown token.
    pub fn setup(self) -> (impl Future<Output = ()>, ShutdownToken) {
        let Telegram {
            bot,
            storage,
            admin_chat_ids,
            chat_ids,
            job_control,
        } = self;

        if admin_chat_ids.0.is_empty() {
            tracing::warn!("no admin chats configured, job commands will be refused");
        }

        let mut dispatcher = Dispatcher::builder(bot, handlers::schema())
            .dependencies(dptree::deps![storage, admin_chat_ids, chat_ids, job_control])
            .build();

        let shutdown_token = dispatcher.shutdown_token();

        let fut = async move {
            dispatcher.dispatch().await;
        };

        (fut, shutdown_token)
    }
}
