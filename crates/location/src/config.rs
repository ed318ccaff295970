//! Typed configurations of all supported backends.
//!
//! Each backend has its own configuration struct together with a `parse` function turning a
//! location string `<scheme>:<body>` into that struct. [`BackendConfig`] is the sum of all of
//! them.
pub mod azure;
pub mod b2;
pub mod gs;
pub mod local;
pub mod rclone;
pub mod rest;
pub mod s3;
pub mod sftp;
pub mod swift;

use std::{fmt, str::FromStr, time::Duration};

pub use crate::config::{
    azure::AzureConfig, b2::B2Config, gs::GsConfig, local::LocalConfig, rclone::RcloneConfig,
    rest::RestConfig, s3::S3Config, sftp::SftpConfig, swift::SwiftConfig,
};

use crate::{
    environment::Environment,
    error::{ErrorKind, RusticError, RusticResult},
};

/// Setting a single `key=value` option on a configuration.
pub trait ApplyOptions {
    /// Apply the option `key` with the given `value`.
    ///
    /// # Errors
    ///
    /// * If the key is not known or the value cannot be parsed.
    fn apply_option(&mut self, key: &str, value: &str) -> RusticResult<()>;
}

/// The parsed configuration of a backend location.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BackendConfig {
    /// Local directory
    Local(LocalConfig),
    /// SFTP server
    Sftp(SftpConfig),
    /// Amazon S3 or S3 compatible storage
    S3(S3Config),
    /// Google Cloud Storage
    Gs(GsConfig),
    /// Azure Blob Storage
    Azure(AzureConfig),
    /// OpenStack Swift
    Swift(SwiftConfig),
    /// Backblaze B2
    B2(B2Config),
    /// restic REST server
    Rest(RestConfig),
    /// rclone remote
    Rclone(RcloneConfig),
}

impl BackendConfig {
    /// The scheme of this configuration.
    #[must_use]
    pub const fn scheme(&self) -> &'static str {
        match self {
            Self::Local(_) => "local",
            Self::Sftp(_) => "sftp",
            Self::S3(_) => "s3",
            Self::Gs(_) => "gs",
            Self::Azure(_) => "azure",
            Self::Swift(_) => "swift",
            Self::B2(_) => "b2",
            Self::Rest(_) => "rest",
            Self::Rclone(_) => "rclone",
        }
    }

    /// Fill empty credential fields from the environment.
    pub(crate) fn apply_environment(&mut self, env: &dyn Environment) {
        match self {
            Self::S3(cfg) => cfg.apply_environment(env),
            Self::Gs(cfg) => cfg.apply_environment(env),
            Self::Azure(cfg) => cfg.apply_environment(env),
            Self::Swift(cfg) => cfg.apply_environment(env),
            Self::B2(cfg) => cfg.apply_environment(env),
            Self::Local(_) | Self::Sftp(_) | Self::Rest(_) | Self::Rclone(_) => {}
        }
    }
}

impl ApplyOptions for BackendConfig {
    fn apply_option(&mut self, key: &str, value: &str) -> RusticResult<()> {
        match self {
            Self::Local(cfg) => cfg.apply_option(key, value),
            Self::Sftp(cfg) => cfg.apply_option(key, value),
            Self::S3(cfg) => cfg.apply_option(key, value),
            Self::Gs(cfg) => cfg.apply_option(key, value),
            Self::Azure(cfg) => cfg.apply_option(key, value),
            Self::Swift(cfg) => cfg.apply_option(key, value),
            Self::B2(cfg) => cfg.apply_option(key, value),
            Self::Rest(cfg) => cfg.apply_option(key, value),
            Self::Rclone(cfg) => cfg.apply_option(key, value),
        }
    }
}

/// A credential whose value never shows up in `Debug` output.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    /// Wrap a secret value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The clear text of the secret.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Whether no secret is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            f.write_str("\"\"")
        } else {
            f.write_str("\"***\"")
        }
    }
}

impl From<&str> for Secret {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Secret {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Error for a location which does not match the grammar of its backend.
pub(crate) fn malformed(scheme: &str, guidance: &str, location: &str) -> Box<RusticError> {
    RusticError::new(
        ErrorKind::MalformedConfig,
        format!("{guidance} Location: `{{location}}`"),
    )
    .attach_context("scheme", scheme)
    .attach_context("location", location)
}

/// Error for an option key a backend doesn't know.
pub(crate) fn unknown_option(scheme: &str, key: &str) -> Box<RusticError> {
    RusticError::new(
        ErrorKind::OptionApplication,
        "Option `{option}` is not known for backend `{scheme}`.",
    )
    .attach_context("option", format!("{scheme}.{key}"))
    .attach_context("scheme", scheme)
}

/// Parse an option value into `T`.
pub(crate) fn option_value<T>(key: &str, value: &str) -> RusticResult<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value.parse().map_err(|err| {
        RusticError::with_source(
            ErrorKind::OptionApplication,
            "Cannot parse value `{value}`, invalid value for option `{option}`.",
            err,
        )
        .attach_context("value", value)
        .attach_context("option", key)
    })
}

/// Parse an option value as `humantime` duration, e.g. `2m 30s`.
pub(crate) fn duration_value(key: &str, value: &str) -> RusticResult<Duration> {
    option_value::<humantime::Duration>(key, value).map(Into::into)
}

/// Lexically clean a slash separated prefix: empty and `.` segments are dropped, `..` removes
/// the preceding segment and leading slashes are removed.
pub(crate) fn clean_prefix(prefix: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in prefix.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                _ = segments.pop();
            }
            segment => segments.push(segment),
        }
    }
    segments.join("/")
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("", "")]
    #[case("/", "")]
    #[case("prefix", "prefix")]
    #[case("/a//b/./c/", "a/b/c")]
    #[case("a/../b", "b")]
    #[case("../a", "a")]
    fn test_clean_prefix(#[case] prefix: &str, #[case] expected: &str) {
        assert_eq!(clean_prefix(prefix), expected);
    }

    #[test]
    fn test_secret_debug_is_masked() {
        assert_eq!(format!("{:?}", Secret::new("hunter2")), "\"***\"");
        assert_eq!(format!("{:?}", Secret::default()), "\"\"");
        assert_eq!(Secret::from("hunter2").expose(), "hunter2");
    }

    #[test]
    fn test_option_value_reports_option() {
        let err = option_value::<usize>("connections", "many").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OptionApplication);
        assert_eq!(err.context_value("option"), Some("connections"));
    }
}
