//! RouterOS specific logic that does not need a live device: command texts,
//! output parsing, version ordering, backup naming and retention planning.

#![allow(missing_docs, clippy::missing_docs_in_private_items)]

use chrono::NaiveDateTime;

mod output;
mod retention;
mod version;

pub use output::{parse_package_update, parse_routerboard, PackageUpdate, RouterboardInfo};
pub use retention::{
    extract_timestamp, list_backup_files, plan_retention, BackupFile, RetentionPlan,
};
pub use version::{needs_update, ParseVersionError, RouterOsVersion, UpdateDecision};

/// Upper bound for status and error texts that get stored or broadcast.
pub const MAX_MESSAGE_CHARS: usize = 200;

const BACKUP_TIMESTAMP_FORMAT: &str = "%Y%m%d-%H%M";

/// Commands sent to the device over the shell.
pub mod commands {
    pub const FILE_PRINT: &str = "/file print";
    pub const CHECK_FOR_UPDATES: &str = "/system package update check-for-updates";
    pub const INSTALL_UPDATE: &str = "/system package update install";
    pub const ROUTERBOARD_PRINT: &str = "/system routerboard print";
    pub const ROUTERBOARD_MANUAL_UPGRADE: &str =
        "/system routerboard settings set auto-upgrade=no";
    pub const ROUTERBOARD_UPGRADE: &str = "/system routerboard upgrade";
    pub const REBOOT: &str = "/system reboot";

    pub fn backup_save(backup_name: &str) -> String {
        format!("/system backup save name=\"{backup_name}\"")
    }

    pub fn export(backup_name: &str) -> String {
        format!("/export file=\"{backup_name}\"")
    }

    pub fn file_remove(file_name: &str) -> String {
        format!("/file remove \"{file_name}\"")
    }
}

/// The name shared by the `.backup` and `.rsc` files of a single run.
pub fn backup_name(device_name: &str, at: NaiveDateTime) -> String {
    format!(
        "{device_name}-Backup-{}",
        at.format(BACKUP_TIMESTAMP_FORMAT)
    )
}

/// The remote folder a backup is grouped under: everything before the first dash.
pub fn backup_group(backup_name: &str) -> &str {
    backup_name.split('-').next().unwrap_or(backup_name)
}

/// Cut a text down to `max_chars` characters.
pub fn truncate_message(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        None => text.to_owned(),
        Some((byte_index, _)) => text[..byte_index].to_owned(),
    }
}
