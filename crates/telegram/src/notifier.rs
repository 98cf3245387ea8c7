//! Delivery of the job notifications to the registered chats.

use std::time::Duration;

use async_trait::async_trait;
use channel_messages::Notification;
use teloxide::{prelude::*, types::ChatId, Bot};
use tokio::sync::mpsc;

use crate::ChatIds;

/// Telegram throttles bots that message many chats at once.
pub const PAUSE_BETWEEN_CHATS: Duration = Duration::from_millis(500);

#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<(), anyhow::Error>;
}

#[async_trait]
impl MessageSender for Bot {
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<(), anyhow::Error> {
        self.send_message(ChatId(chat_id), text).await?;
        Ok(())
    }
}

/// Messages go out as plain text, so the markdown markers are dropped.
pub fn strip_markup(text: &str) -> String {
    text.replace(['*', '_'], "").trim().to_owned()
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastReport {
    pub sent: usize,
    pub failed: usize,
}

pub async fn broadcast<S: MessageSender + ?Sized>(
    sender: &S,
    chat_ids: &[i64],
    text: &str,
    pause: Duration,
) -> BroadcastReport {
    let mut report = BroadcastReport::default();

    if chat_ids.is_empty() {
        tracing::warn!(message = "no chat ids registered, notification dropped", %text);
        return report;
    }

    let text = strip_markup(text);
    if text.is_empty() {
        tracing::warn!("empty notification dropped");
        return report;
    }

    for (index, chat_id) in chat_ids.iter().enumerate() {
        if index > 0 && !pause.is_zero() {
            tokio::time::sleep(pause).await;
        }

        match sender.send_text(*chat_id, &text).await {
            Ok(()) => report.sent += 1,
            Err(error) => {
                tracing::error!(message = "notification delivery failed", chat_id, ?error);
                report.failed += 1;
            }
        }
    }

    tracing::info!(
        message = "notification delivered",
        sent = report.sent,
        failed = report.failed
    );
    report
}

#[derive(Debug)]
pub struct RunLoopParams<S> {
    pub sender: S,
    pub notification_rx: mpsc::Receiver<Notification>,
    pub chat_ids: ChatIds,
    pub pause: Duration,
}

/// Runs until every [`crate::NotificationHandle`] is dropped.
pub async fn run_loop<S: MessageSender>(params: RunLoopParams<S>) {
    let RunLoopParams {
        sender,
        mut notification_rx,
        chat_ids,
        pause,
    } = params;

    while let Some(notification) = notification_rx.recv().await {
        tracing::debug!(message = "run_loop: Got new notification", ?notification);

        match notification {
            Notification::Broadcast { text } => {
                let chat_ids: Vec<i64> = chat_ids.read().await.iter().copied().collect();
                broadcast(&sender, &chat_ids, &text, pause).await;
            }
            Notification::Direct { chat_id, text } => {
                let text = strip_markup(&text);
                if let Err(error) = sender.send_text(chat_id, &text).await {
                    tracing::error!(message = "direct notification failed", chat_id, ?error);
                }
            }
        }
    }

    tracing::info!("notification channel closed");
}
