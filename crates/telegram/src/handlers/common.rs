use channel_messages::ChatRegistration;
use teloxide::{prelude::*, utils::command::BotCommands};

use crate::{messages, ChatIds, JobControl};

use super::{utils::HandlerResult, Command, State};

pub async fn start(
    bot: Bot,
    message: Message,
    chat_ids: ChatIds,
    job_control: JobControl,
) -> HandlerResult {
    let chat_id = message.chat.id;
    let is_new = chat_ids.write().await.insert(chat_id.0);

    if is_new {
        tracing::info!(message = "registering chat", chat_id = chat_id.0);
        if let Err(error) = job_control
            .registrations_tx
            .send(ChatRegistration { chat_id: chat_id.0 })
            .await
        {
            tracing::error!(message = "can't persist chat registration", %error);
        }
    }

    bot.send_message(chat_id, messages::MESSAGE_WELCOME).await?;
    Ok(())
}

pub async fn help(bot: Bot, message: Message) -> HandlerResult {
    bot.send_message(message.chat.id, Command::descriptions().to_string())
        .await?;
    Ok(())
}

pub async fn unknown_interaction(bot: Bot, message: Message, state: State) -> HandlerResult {
    let text = match state {
        State::Start => messages::MESSAGE_OTHER,
        State::AwaitingConfirmation { .. } => messages::MESSAGE_AWAITING_CONFIRMATION,
    };
    bot.send_message(message.chat.id, text).await?;
    Ok(())
}
