//! Notification and status texts.
//!
//! `*` marks the parts Telegram would show in bold; the notifier strips it
//! before sending.

use inventory::Device;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M";

pub fn timestamp() -> String {
    chrono::Local::now().format(TIMESTAMP_FORMAT).to_string()
}

pub fn backup_started() -> String {
    format!("🔹 Scheduled backups started! ({})", timestamp())
}

pub fn updates_started() -> String {
    format!("🔹 Scheduled updates started! ({})", timestamp())
}

pub fn task_completed() -> String {
    format!("✅ Task completed! ({})", timestamp())
}

pub fn updates_finished() -> String {
    format!("✅ Update finished for all devices! ({})", timestamp())
}

pub fn routerboard_finished() -> String {
    format!(
        "✅ RouterBoard upgrade finished for all devices! ({})",
        timestamp()
    )
}

pub fn job_stopped(title: &str) -> String {
    format!("⏹ The {title} was stopped on request. ({})", timestamp())
}

pub fn device_header(index: usize, device: &Device) -> String {
    format!("🔹 #{index} *#{}* ({}):", device.name, device.host)
}

pub fn backup_summary(
    index: usize,
    device: &Device,
    backup_name: &str,
    uploaded: bool,
    update_message: Option<&str>,
) -> String {
    let outcome = if uploaded {
        format!("✅ Backup and RSC for #{} created and uploaded.", device.name)
    } else {
        format!(
            "⚠ Backup and RSC for #{} created, the FTP upload failed.",
            device.name
        )
    };

    let mut text = format!(
        "{}\n{outcome}\nFiles:\n*{backup_name}.backup*,\n*{backup_name}.rsc*",
        device_header(index, device),
    );
    if let Some(update_message) = update_message {
        text.push('\n');
        text.push_str(update_message);
    }
    text
}

pub fn backup_status(device: &Device, backup_name: &str) -> String {
    format!("Backup for {} completed: {backup_name}", device.name)
}

pub fn backup_download_status(device: &Device, backup_name: &str) -> String {
    format!("Backup {backup_name} for {} was not downloaded", device.name)
}

pub fn upload_status(device: &Device, backup_name: &str) -> String {
    format!(
        "Backup {backup_name} for {} was not uploaded to FTP",
        device.name
    )
}

pub fn backup_failed(device: &Device, error: &dyn std::fmt::Display) -> String {
    format!(
        "Backup failed on #{} ({}): {error}",
        device.name, device.host
    )
}

pub fn download_failed(device: &Device, error: &dyn std::fmt::Display) -> String {
    format!(
        "Download failed on #{} ({}): {error}",
        device.name, device.host
    )
}

pub fn upload_failed(backup_name: &str, error: &dyn std::fmt::Display) -> String {
    format!("FTP upload of {backup_name} failed: {error}")
}

pub fn retention_failed(device: &Device, error: &dyn std::fmt::Display) -> String {
    format!(
        "Removing old backups failed on {} ({}): {error}",
        device.name, device.host
    )
}

pub fn connect_failed(device: &Device, attempts: u32) -> String {
    let plural = if attempts == 1 { "" } else { "s" };
    format!(
        "❌ Could not connect to {} after {attempts} attempt{plural}. Skipping.",
        device.host
    )
}

pub fn retry_header() -> String {
    "🔴 Retrying the MikroTik devices that could not be reached:".to_owned()
}

pub fn retry_attempt(device: &Device) -> String {
    format!("Retrying the connection to {}...", device.host)
}

pub fn retry_succeeded(device: &Device) -> String {
    format!("✅ Connected to {} on the retry.", device.host)
}

pub fn retry_failed(device: &Device) -> String {
    format!("❌ Could not connect to {} on the retry.", device.host)
}

pub fn update_installed(device: &Device, latest: &str) -> String {
    format!(
        "Update for MikroTik *#{}* to version {latest} completed.",
        device.name
    )
}

pub fn up_to_date(device: &Device, installed: &str) -> String {
    format!(
        "MikroTik *#{}* runs the current version {installed}.",
        device.name
    )
}

pub fn versions_unknown(device: &Device) -> String {
    format!(
        "Could not read the versions of #{} ({})",
        device.name, device.host
    )
}

pub fn update_failed(device: &Device, error: &dyn std::fmt::Display) -> String {
    format!(
        "Update failed on #{} ({}): {error}",
        device.name, device.host
    )
}

pub fn needs_update_status(device: &Device, installed: &str, latest: &str) -> String {
    format!("#{} needs an update: {installed} -> {latest}", device.name)
}

pub fn needs_update_alert(
    device: &Device,
    installed: &str,
    latest: &str,
    firmware: Option<&str>,
) -> String {
    format!(
        "⚠ {} | RouterBoard firmware: {}",
        needs_update_status(device, installed, latest),
        firmware.unwrap_or("unknown")
    )
}

pub fn version_check_failed(device: &Device, error: &dyn std::fmt::Display) -> String {
    format!(
        "Version check failed for #{} ({}): {error}",
        device.name, device.host
    )
}

pub fn routerboard_started(device: &Device) -> String {
    format!(
        "🔹 RouterBoard upgrade started for *#{}* ({})",
        device.name, device.host
    )
}

pub fn routerboard_done(device: &Device) -> String {
    format!(
        "✅ RouterBoard upgraded and rebooted: *#{}*",
        device.name
    )
}

pub fn routerboard_status(device: &Device) -> String {
    format!(
        "Manual RouterBoard upgrade and reboot completed for {}",
        device.name
    )
}

pub fn routerboard_failed(device: &Device, error: &dyn std::fmt::Display) -> String {
    format!(
        "RouterBoard upgrade failed for #{} ({}): {error}",
        device.name, device.host
    )
}
