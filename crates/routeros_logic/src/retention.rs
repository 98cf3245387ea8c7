use std::sync::LazyLock;

use chrono::NaiveDateTime;
use regex::Regex;

use crate::BACKUP_TIMESTAMP_FORMAT;

static BACKUP_FILE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\S+\.backup|\S+\.rsc)").expect("static regex"));

static EMBEDDED_TIMESTAMP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{8}-\d{4})").expect("static regex"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupFile {
    pub name: String,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetentionPlan {
    /// The listing has no `.backup` or `.rsc` files at all.
    NoBackupFiles,
    /// There are backup files, but none carries a timestamp.
    NoDatedFiles,
    /// Not more dated files than we keep.
    NothingToDelete,
    /// Oldest first.
    Delete(Vec<BackupFile>),
}

/// File names of `.backup`/`.rsc` files found in a `/file print` listing.
pub fn list_backup_files(listing: &str) -> Vec<String> {
    listing
        .lines()
        .filter_map(|line| BACKUP_FILE.captures(line))
        .map(|captures| captures[1].to_owned())
        .collect()
}

/// The `YYYYMMDD-HHMM` timestamp embedded in a backup file name.
pub fn extract_timestamp(file_name: &str) -> Option<NaiveDateTime> {
    let Some(captures) = EMBEDDED_TIMESTAMP.captures(file_name) else {
        tracing::debug!(message = "no timestamp in file name", %file_name);
        return None;
    };

    match NaiveDateTime::parse_from_str(&captures[1], BACKUP_TIMESTAMP_FORMAT) {
        Ok(created_at) => Some(created_at),
        Err(error) => {
            tracing::warn!(message = "bad timestamp in file name", %file_name, %error);
            None
        }
    }
}

/// Decide which backup files to remove so that only the `keep_count` newest
/// dated files stay on the device. A `keep_count` of zero is treated as one.
pub fn plan_retention(listing: &str, keep_count: usize) -> RetentionPlan {
    let keep_count = keep_count.max(1);
    let file_names = list_backup_files(listing);

    tracing::debug!(message = "backup files found", ?file_names);

    if file_names.is_empty() {
        return RetentionPlan::NoBackupFiles;
    }

    let mut dated: Vec<BackupFile> = file_names
        .into_iter()
        .filter_map(|name| {
            extract_timestamp(&name).map(|created_at| BackupFile { name, created_at })
        })
        .collect();

    if dated.is_empty() {
        return RetentionPlan::NoDatedFiles;
    }

    // Stable: a `.backup` and its `.rsc` keep their listing order.
    dated.sort_by_key(|file| file.created_at);

    if dated.len() <= keep_count {
        return RetentionPlan::NothingToDelete;
    }

    dated.truncate(dated.len() - keep_count);
    RetentionPlan::Delete(dated)
}
