//! Configuration of the rclone backend, `rclone:<remote>`.
use std::time::Duration;

use crate::{
    config::{ApplyOptions, BackendConfig, duration_value, malformed, option_value, unknown_option},
    error::RusticResult,
};

pub(super) mod constants {
    use std::time::Duration;

    /// Default number of concurrent connections
    pub(super) const DEFAULT_CONNECTIONS: usize = 5;
    /// Default time to wait for rclone to serve the REST API
    pub(super) const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
}

/// Configuration of a repository on an rclone remote.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RcloneConfig {
    /// The rclone remote and path, e.g. `b2prod:bucket/repo`.
    pub remote: String,
    /// Command used to start rclone instead of `rclone serve restic --addr localhost:0`.
    pub command: Option<String>,
    /// Protect the REST API served by rclone with a random user and password.
    pub use_password: bool,
    /// URL of the REST API served by rclone, if known in advance. rclone is started anyway, but
    /// its output is not searched for the URL.
    pub rest_url: Option<String>,
    /// Time to wait for rclone to serve the REST API.
    pub timeout: Duration,
    /// Number of concurrent connections.
    pub connections: usize,
}

/// Parse an `rclone:<remote>` location.
///
/// # Errors
///
/// * If no remote is given.
pub fn parse(location: &str) -> RusticResult<BackendConfig> {
    let Some(remote) = location.strip_prefix("rclone:") else {
        return Err(malformed(
            "rclone",
            "Invalid format, prefix `rclone:` not found.",
            location,
        ));
    };

    if remote.is_empty() {
        return Err(malformed(
            "rclone",
            "Invalid format, no remote given.",
            location,
        ));
    }

    Ok(BackendConfig::Rclone(RcloneConfig {
        remote: remote.to_string(),
        command: None,
        use_password: true,
        rest_url: None,
        timeout: constants::DEFAULT_TIMEOUT,
        connections: constants::DEFAULT_CONNECTIONS,
    }))
}

impl ApplyOptions for RcloneConfig {
    fn apply_option(&mut self, key: &str, value: &str) -> RusticResult<()> {
        match key {
            "connections" => self.connections = option_value(key, value)?,
            "command" => self.command = Some(value.to_string()),
            "use-password" => self.use_password = option_value(key, value)?,
            "rest-url" => self.rest_url = Some(value.to_string()),
            "timeout" => self.timeout = duration_value(key, value)?,
            _ => return Err(unknown_option("rclone", key)),
        }
        Ok(())
    }
}
