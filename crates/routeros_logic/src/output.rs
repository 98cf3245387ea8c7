use crate::version::{needs_update, UpdateDecision};

/// Parsed `/system package update check-for-updates` output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageUpdate {
    pub channel: Option<String>,
    pub installed_version: Option<String>,
    pub latest_version: Option<String>,
    pub status: Option<String>,
}

/// Parsed `/system routerboard print` output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouterboardInfo {
    pub model: Option<String>,
    pub current_firmware: Option<String>,
    pub upgrade_firmware: Option<String>,
}

/// The value of the first line mentioning `key`: the text between the first
/// and the second colon, trimmed.
fn field_value(output: &str, key: &str) -> Option<String> {
    output
        .lines()
        .find(|line| line.contains(key))
        .and_then(|line| line.split(':').nth(1))
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

pub fn parse_package_update(output: &str) -> PackageUpdate {
    PackageUpdate {
        channel: field_value(output, "channel"),
        installed_version: field_value(output, "installed-version"),
        latest_version: field_value(output, "latest-version"),
        status: field_value(output, "status"),
    }
}

pub fn parse_routerboard(output: &str) -> RouterboardInfo {
    RouterboardInfo {
        model: field_value(output, "model"),
        current_firmware: field_value(output, "current-firmware"),
        upgrade_firmware: field_value(output, "upgrade-firmware"),
    }
}

impl PackageUpdate {
    pub fn decision(&self) -> UpdateDecision {
        let (Some(installed), Some(latest)) = (&self.installed_version, &self.latest_version)
        else {
            return UpdateDecision::Unknown;
        };

        match needs_update(installed, latest) {
            None => {
                tracing::warn!(message = "unparsable package versions", %installed, %latest);
                UpdateDecision::Unknown
            }
            Some(true) => UpdateDecision::UpdateAvailable {
                installed: installed.clone(),
                latest: latest.clone(),
            },
            Some(false) => UpdateDecision::UpToDate {
                installed: installed.clone(),
            },
        }
    }
}
