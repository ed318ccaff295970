//! Configuration of the sftp backend.
//!
//! Two forms are understood: `sftp:[user@]host:<path>` and `sftp://[user@]host[:port]/<path>`.
use url::Url;

use crate::{
    config::{ApplyOptions, BackendConfig, malformed, option_value, unknown_option},
    error::RusticResult,
};

pub(super) mod constants {
    /// Default number of concurrent connections
    pub(super) const DEFAULT_CONNECTIONS: usize = 5;
}

/// Configuration of a repository on an SFTP server.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SftpConfig {
    /// The user to log in as, if not given by the ssh configuration.
    pub user: Option<String>,
    /// The host name.
    pub host: String,
    /// The port, if not the default one.
    pub port: Option<u16>,
    /// The directory of the repository on the server.
    pub path: String,
    /// Command to start the sftp session, replaces the ssh invocation entirely.
    pub command: Option<String>,
    /// Additional arguments for ssh.
    pub args: Option<String>,
    /// Number of concurrent connections.
    pub connections: usize,
}

impl SftpConfig {
    fn new(user: Option<String>, host: String, port: Option<u16>, path: String) -> Self {
        Self {
            user,
            host,
            port,
            path,
            command: None,
            args: None,
            connections: constants::DEFAULT_CONNECTIONS,
        }
    }
}

/// Parse an `sftp:` location.
///
/// # Errors
///
/// * If host or path cannot be found.
/// * If the path starts with `~`, which most sftp servers don't expand.
pub fn parse(location: &str) -> RusticResult<BackendConfig> {
    let (user, host, port, path) = if location.starts_with("sftp://") {
        let url = Url::parse(location).map_err(|_| {
            malformed("sftp", "Invalid format, the URL cannot be parsed.", location)
        })?;
        let user = Some(url.username())
            .filter(|user| !user.is_empty())
            .map(ToString::to_string);
        let host = url.host_str().unwrap_or_default().to_string();
        let path = url.path().strip_prefix('/').unwrap_or_default().to_string();
        if path.is_empty() {
            return Err(malformed(
                "sftp",
                "Invalid format, no directory specified.",
                location,
            ));
        }
        (user, host, url.port(), path)
    } else if let Some(rest) = location.strip_prefix("sftp:") {
        let Some((user_host, path)) = rest.split_once(':') else {
            return Err(malformed(
                "sftp",
                "Invalid format, hostname or path not found.",
                location,
            ));
        };
        // the user may contain an `@` itself, the host never does
        let (user, host) = match user_host.rsplit_once('@') {
            Some((user, host)) => (Some(user.to_string()), host.to_string()),
            None => (None, user_host.to_string()),
        };
        (user, host, None, path.to_string())
    } else {
        return Err(malformed(
            "sftp",
            "Invalid format, prefix `sftp:` not found.",
            location,
        ));
    };

    if host.is_empty() {
        return Err(malformed(
            "sftp",
            "Invalid format, hostname not found.",
            location,
        ));
    }

    if path.starts_with('~') {
        return Err(malformed(
            "sftp",
            "The sftp path starts with the tilde (~) character, that fails for most sftp servers. Use a relative directory, most servers interpret this as relative to the user's home directory.",
            location,
        ));
    }

    Ok(BackendConfig::Sftp(SftpConfig::new(user, host, port, path)))
}

impl ApplyOptions for SftpConfig {
    fn apply_option(&mut self, key: &str, value: &str) -> RusticResult<()> {
        match key {
            "connections" => self.connections = option_value(key, value)?,
            "command" => self.command = Some(value.to_string()),
            "args" => self.args = Some(value.to_string()),
            _ => return Err(unknown_option("sftp", key)),
        }
        Ok(())
    }
}
