use channel_messages::JobRequest;
use serde::{Deserialize, Serialize};
use teloxide::{
    dispatching::{dialogue::ErasedStorage, UpdateHandler},
    prelude::*,
    utils::command::BotCommands,
};
use utils::{set_local_commands, HandlerError, HandlerResult};

use crate::teloxide_ext::dialogue_enter;

pub mod common;
pub mod jobs;
pub mod utils;

pub type GlobalDialogue = Dialogue<State, ErasedStorage<State>>;

#[derive(BotCommands, Clone, Debug)]
#[command(
    rename_rule = "lowercase",
    description = "These commands are supported:"
)]
pub enum Command {
    #[command(description = "display this text.")]
    Help,
    #[command(description = "subscribe this chat to the notifications")]
    Start,
    #[command(description = "list the devices, outdated first; `/devices refresh` re-reads missing versions")]
    Devices(String),
    #[command(description = "back up all devices or the named ones: /backup core, edge")]
    Backup(String),
    #[command(description = "back up and install pending package updates")]
    BackupUpdate(String),
    #[command(description = "check for package and RouterBoard firmware updates")]
    CheckUpdates(String),
    #[command(description = "install package updates, `/upgrade outdated` for devices known to need one")]
    Upgrade(String),
    #[command(description = "upgrade the RouterBoard firmware and reboot")]
    Routerboard(String),
    #[command(description = "stop the running job after the current device")]
    Stop,
}

#[derive(BotCommands, Clone, Debug)]
#[command(
    rename_rule = "lowercase",
    description = "These commands are available while a job waits for confirmation:"
)]
pub enum ConfirmCommand {
    #[command(description = "display this text")]
    Help,
    #[command(description = "run the job")]
    Confirm,
    #[command(description = "cancel the operation")]
    Cancel,
}

#[derive(Clone, Default, Debug, Serialize, Deserialize)]
pub enum State {
    #[default]
    Start,
    AwaitingConfirmation {
        job: JobRequest,
    },
}

pub async fn transition_to_start(
    chat_id: ChatId,
    bot: &Bot,
    dialogue: GlobalDialogue,
) -> HandlerResult {
    dialogue.update(State::Start).await?;
    set_local_commands(chat_id, bot, Command::bot_commands()).await
}

pub fn schema() -> UpdateHandler<HandlerError> {
    use dptree::case;

    let root_commands = teloxide::filter_command::<Command, _>()
        .branch(case![Command::Help].endpoint(common::help))
        .branch(case![Command::Start].endpoint(common::start))
        .branch(case![Command::Devices(args)].endpoint(jobs::devices))
        .branch(case![Command::Backup(args)].endpoint(jobs::backup))
        .branch(case![Command::BackupUpdate(args)].endpoint(jobs::backup_update))
        .branch(case![Command::CheckUpdates(args)].endpoint(jobs::check_updates))
        .branch(case![Command::Upgrade(args)].endpoint(jobs::upgrade))
        .branch(case![Command::Routerboard(args)].endpoint(jobs::routerboard))
        .branch(case![Command::Stop].endpoint(jobs::stop));

    let confirm_commands = teloxide::filter_command::<ConfirmCommand, _>()
        .branch(case![ConfirmCommand::Help].endpoint(jobs::confirm_help))
        .branch(case![ConfirmCommand::Confirm].endpoint(jobs::confirm))
        .branch(case![ConfirmCommand::Cancel].endpoint(jobs::cancel));

    let message_handler = Update::filter_message()
        .branch(case![State::AwaitingConfirmation { job }].branch(confirm_commands))
        .branch(case![State::Start].branch(root_commands))
        .branch(dptree::endpoint(common::unknown_interaction));

    dialogue_enter::<Update, _>().branch(message_handler)
}
