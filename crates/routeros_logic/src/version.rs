use std::{fmt, str::FromStr};

/// A dotted RouterOS version, compared component by component.
///
/// A version that is a prefix of another one is the older of the two, so
/// `7.12 < 7.12.1`. Prerelease suffixes (`7.13rc1`, `7.13beta2`) end the
/// version at the component that carries them.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RouterOsVersion(Vec<u32>);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseVersionError(String);

impl fmt::Display for ParseVersionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid RouterOS version: {:?}", self.0)
    }
}

impl std::error::Error for ParseVersionError {}

impl RouterOsVersion {
    pub fn components(&self) -> &[u32] {
        &self.0
    }
}

impl FromStr for RouterOsVersion {
    type Err = ParseVersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut components = vec![];

        for component in s.trim().split('.') {
            let digits_len = component
                .bytes()
                .take_while(|byte| byte.is_ascii_digit())
                .count();
            if digits_len == 0 {
                break;
            }

            let value = component[..digits_len]
                .parse::<u32>()
                .map_err(|_| ParseVersionError(s.to_owned()))?;
            components.push(value);

            if digits_len != component.len() {
                break;
            }
        }

        if components.is_empty() {
            return Err(ParseVersionError(s.to_owned()));
        }

        Ok(Self(components))
    }
}

impl fmt::Display for RouterOsVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for component in &self.0 {
            if !first {
                f.write_str(".")?;
            }
            write!(f, "{component}")?;
            first = false;
        }
        Ok(())
    }
}

/// `Some(true)` when `installed` is older than `latest`, `None` when either
/// of them can't be parsed.
pub fn needs_update(installed: &str, latest: &str) -> Option<bool> {
    let installed = installed.parse::<RouterOsVersion>().ok()?;
    let latest = latest.parse::<RouterOsVersion>().ok()?;
    Some(installed < latest)
}

/// What to do with the packages of a device after a check for updates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateDecision {
    UpdateAvailable { installed: String, latest: String },
    UpToDate { installed: String },
    Unknown,
}
