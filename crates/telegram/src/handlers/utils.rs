use teloxide::{
    prelude::*,
    types::{BotCommand, BotCommandScope},
    Bot,
};

use crate::{messages, AdminChatIds};

pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;
pub type HandlerResult = Result<(), HandlerError>;

/// Set new commands for a given local context deduced from the message.
pub async fn set_local_commands(
    chat_id: ChatId,
    bot: &Bot,
    commands: Vec<BotCommand>,
) -> HandlerResult {
    let chat_id = chat_id.into();
    bot.set_my_commands(commands)
        .scope(BotCommandScope::Chat { chat_id })
        .send()
        .await?;
    Ok(())
}

/// Replies with a refusal and returns `false` for chats outside the admin list.
pub async fn ensure_admin(
    bot: &Bot,
    message: &Message,
    admins: &AdminChatIds,
) -> Result<bool, HandlerError> {
    if admins.contains(message.chat.id) {
        return Ok(true);
    }

    tracing::warn!(message = "job command from a non-admin chat", chat_id = message.chat.id.0);
    bot.send_message(message.chat.id, messages::MESSAGE_NOT_ADMIN)
        .await?;
    Ok(false)
}
