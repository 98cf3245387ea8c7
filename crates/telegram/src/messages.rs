//! Response message constants.

use indoc::indoc;

/// For the `/start` command.
pub(crate) const MESSAGE_WELCOME: &str = indoc! {"
    Welcome to the MikroTik manager!

    This chat now receives the backup and update reports.

    Admin chats can run /backup, /checkupdates, /upgrade and the other jobs.
    Use /help to display bot usage instructions.
"};

/// For an unknown command.
pub(crate) const MESSAGE_OTHER: &str = indoc! {"
    Unknown command. Try /help for list of commands.
"};

/// For anything but the confirmation commands while a job waits.
pub(crate) const MESSAGE_AWAITING_CONFIRMATION: &str = indoc! {"
    A job is waiting for your decision: /confirm or /cancel.
"};

pub(crate) const MESSAGE_CONFIRM_PROMPT: &str = indoc! {"
    Use /confirm to run it or /cancel to drop it.
"};

pub(crate) const MESSAGE_NOT_ADMIN: &str = indoc! {"
    Only admin chats can run jobs.
"};

pub(crate) const MESSAGE_STOP_REQUESTED: &str = indoc! {"
    Stop requested. The running job stops after the current device.
"};

pub(crate) const MESSAGE_JOB_LOOP_GONE: &str = indoc! {"
    The job runner is not available, try again later.
"};

/// For a dialogue cancellation.
pub(crate) const MESSAGE_DIALOGUE_CANCEL: &str = indoc! {"
    You have canceled the action.

    use /help command to display bot usage instructions.
"};
