use channel_messages::{JobKind, JobRequest, StopRequest};
use inventory::DeviceSelection;
use teloxide::{prelude::*, utils::command::BotCommands};

use crate::{messages, AdminChatIds, JobControl};

use super::{
    transition_to_start,
    utils::{ensure_admin, set_local_commands, HandlerResult},
    ConfirmCommand, GlobalDialogue, State,
};

pub fn job_request(kind: JobKind, args: &str, chat_id: ChatId) -> JobRequest {
    JobRequest {
        kind,
        selection: DeviceSelection::from_args(args),
        requested_by: Some(chat_id.0),
    }
}

pub fn describe_selection(selection: &DeviceSelection) -> String {
    match selection {
        DeviceSelection::All => "all devices".to_owned(),
        DeviceSelection::Named(names) => names.join(", "),
        DeviceSelection::NeedingUpdate => "devices that need an update".to_owned(),
    }
}

async fn submit(
    bot: &Bot,
    message: &Message,
    job_control: &JobControl,
    job: JobRequest,
) -> HandlerResult {
    let text = format!(
        "{} queued for {}.",
        capitalize(job.kind.title()),
        describe_selection(&job.selection)
    );

    tracing::info!(message = "queueing job", ?job);
    match job_control.jobs_tx.send(job).await {
        Ok(()) => bot.send_message(message.chat.id, text).await?,
        Err(error) => {
            tracing::error!(message = "job loop is gone", %error);
            bot.send_message(message.chat.id, messages::MESSAGE_JOB_LOOP_GONE)
                .await?
        }
    };
    Ok(())
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

async fn run_job(
    bot: Bot,
    message: Message,
    admins: AdminChatIds,
    job_control: JobControl,
    kind: JobKind,
    args: String,
) -> HandlerResult {
    if !ensure_admin(&bot, &message, &admins).await? {
        return Ok(());
    }
    let job = job_request(kind, &args, message.chat.id);
    submit(&bot, &message, &job_control, job).await
}

async fn ask_confirmation(
    bot: Bot,
    message: Message,
    dialogue: GlobalDialogue,
    admins: AdminChatIds,
    kind: JobKind,
    args: String,
) -> HandlerResult {
    if !ensure_admin(&bot, &message, &admins).await? {
        return Ok(());
    }
    let job = job_request(kind, &args, message.chat.id);
    let text = format!(
        "{} requested for {}. The devices will reboot.\n\n{}",
        capitalize(job.kind.title()),
        describe_selection(&job.selection),
        messages::MESSAGE_CONFIRM_PROMPT,
    );

    dialogue.update(State::AwaitingConfirmation { job }).await?;
    set_local_commands(message.chat.id, &bot, ConfirmCommand::bot_commands()).await?;
    bot.send_message(message.chat.id, text).await?;
    Ok(())
}

pub async fn devices(
    bot: Bot,
    message: Message,
    admins: AdminChatIds,
    job_control: JobControl,
    args: String,
) -> HandlerResult {
    let refresh = args.trim().eq_ignore_ascii_case("refresh");
    let args = if refresh { String::new() } else { args };
    run_job(bot, message, admins, job_control, JobKind::ListDevices { refresh }, args).await
}

pub async fn backup(
    bot: Bot,
    message: Message,
    admins: AdminChatIds,
    job_control: JobControl,
    args: String,
) -> HandlerResult {
    let kind = JobKind::Backup { with_update: false };
    run_job(bot, message, admins, job_control, kind, args).await
}

pub async fn backup_update(
    bot: Bot,
    message: Message,
    admins: AdminChatIds,
    job_control: JobControl,
    args: String,
) -> HandlerResult {
    let kind = JobKind::Backup { with_update: true };
    run_job(bot, message, admins, job_control, kind, args).await
}

pub async fn check_updates(
    bot: Bot,
    message: Message,
    admins: AdminChatIds,
    job_control: JobControl,
    args: String,
) -> HandlerResult {
    run_job(bot, message, admins, job_control, JobKind::CheckUpdates, args).await
}

pub async fn upgrade(
    bot: Bot,
    message: Message,
    dialogue: GlobalDialogue,
    admins: AdminChatIds,
    args: String,
) -> HandlerResult {
    ask_confirmation(bot, message, dialogue, admins, JobKind::Upgrade, args).await
}

pub async fn routerboard(
    bot: Bot,
    message: Message,
    dialogue: GlobalDialogue,
    admins: AdminChatIds,
    args: String,
) -> HandlerResult {
    ask_confirmation(bot, message, dialogue, admins, JobKind::RouterboardUpgrade, args).await
}

pub async fn stop(
    bot: Bot,
    message: Message,
    admins: AdminChatIds,
    job_control: JobControl,
) -> HandlerResult {
    if !ensure_admin(&bot, &message, &admins).await? {
        return Ok(());
    }

    let chat_id = message.chat.id;
    if let Err(error) = job_control
        .stop_tx
        .send(StopRequest { chat_id: chat_id.0 })
        .await
    {
        tracing::error!(message = "job loop is gone", %error);
        bot.send_message(chat_id, messages::MESSAGE_JOB_LOOP_GONE)
            .await?;
        return Ok(());
    }

    bot.send_message(chat_id, messages::MESSAGE_STOP_REQUESTED)
        .await?;
    Ok(())
}

pub async fn confirm(
    bot: Bot,
    message: Message,
    dialogue: GlobalDialogue,
    job_control: JobControl,
    job: JobRequest,
) -> HandlerResult {
    submit(&bot, &message, &job_control, job).await?;
    transition_to_start(message.chat.id, &bot, dialogue).await
}

pub async fn cancel(bot: Bot, message: Message, dialogue: GlobalDialogue) -> HandlerResult {
    bot.send_message(message.chat.id, messages::MESSAGE_DIALOGUE_CANCEL)
        .await?;
    transition_to_start(message.chat.id, &bot, dialogue).await
}

pub async fn confirm_help(bot: Bot, message: Message) -> HandlerResult {
    bot.send_message(message.chat.id, ConfirmCommand::descriptions().to_string())
        .await?;
    Ok(())
}
