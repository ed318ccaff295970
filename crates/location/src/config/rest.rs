//! Configuration of the REST backend, `rest:<url>`, and redaction of its password.
use std::{ops::Range, time::Duration};

use url::Url;

use crate::{
    config::{ApplyOptions, BackendConfig, duration_value, malformed, option_value, unknown_option},
    error::RusticResult,
};

pub(super) mod constants {
    /// Default number of concurrent connections
    pub(super) const DEFAULT_CONNECTIONS: usize = 5;
    /// Default number of retries
    pub(super) const DEFAULT_RETRY: usize = 5;
    /// Replacement of a redacted password
    pub(super) const REDACTED: &str = "***";
}

/// Configuration of a repository served by a restic REST server.
#[derive(Clone, PartialEq, Eq)]
pub struct RestConfig {
    /// The URL of the repository, always ending with `/`.
    pub url: Url,
    /// Number of concurrent connections.
    pub connections: usize,
    /// Maximum number of retries of a failed request.
    pub retry: usize,
    /// Timeout of a single request, overriding the transport's timeout.
    pub timeout: Option<Duration>,
}

impl std::fmt::Debug for RestConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestConfig")
            .field("url", &redact_url(&self.url).as_str())
            .field("connections", &self.connections)
            .field("retry", &self.retry)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Add a trailing `/` if there is none.
fn prepare_url(url: &str) -> String {
    if url.ends_with('/') {
        url.to_string()
    } else {
        let mut url = url.to_string();
        url.push('/');
        url
    }
}

/// Parse a `rest:<url>` location.
///
/// # Errors
///
/// * If the location doesn't start with `rest:` or the URL cannot be parsed.
pub fn parse(location: &str) -> RusticResult<BackendConfig> {
    let Some(url) = location.strip_prefix("rest:") else {
        return Err(malformed(
            "rest",
            "Invalid REST backend specification, prefix `rest:` not found.",
            &strip_password(location),
        ));
    };

    let url = Url::parse(&prepare_url(url)).map_err(|err| {
        malformed(
            "rest",
            "Invalid REST backend specification, the URL cannot be parsed.",
            &strip_password(location),
        )
        .attach_source(err)
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(malformed(
            "rest",
            "Invalid REST backend specification, the URL must start with `http://` or `https://`.",
            &strip_password(location),
        ));
    }

    Ok(BackendConfig::Rest(RestConfig {
        url,
        connections: constants::DEFAULT_CONNECTIONS,
        retry: constants::DEFAULT_RETRY,
        timeout: None,
    }))
}

/// Replace the password of `url` with `***`.
///
/// An URL like `https://user:123/x@host` has no password but a port; its textual
/// `user:password@` part is redacted instead.
pub(crate) fn redact_url(url: &Url) -> String {
    if url.password().is_some() {
        let mut url = url.clone();
        _ = url.set_password(Some(constants::REDACTED));
        url.to_string()
    } else {
        strip_password_textually(url.as_str())
    }
}

/// Replace the password of the `rest:` location `location` wherever it occurs in `message`.
pub(crate) fn redact_message(message: &str, location: &str) -> String {
    let Some(body) = location.strip_prefix("rest:") else {
        return message.to_string();
    };
    let password = match Url::parse(body) {
        Ok(url) if url.password().is_some() => url.password().map(ToString::to_string),
        _ => password_range(body).map(|range| body[range].to_string()),
    };

    match password {
        Some(password) if !password.is_empty() && password != constants::REDACTED => {
            message.replace(&password, constants::REDACTED)
        }
        _ => message.to_string(),
    }
}

/// Remove the password from a `rest:` location.
///
/// Locations without password are returned unchanged. If the URL cannot be parsed or yields
/// no password, the password part of a `user:password@` prefix is replaced textually.
#[must_use]
pub fn strip_password(location: &str) -> String {
    let Some(body) = location.strip_prefix("rest:") else {
        return location.to_string();
    };

    match Url::parse(body) {
        Ok(url) if url.password().is_some() => {
            if url.password() == Some(constants::REDACTED) {
                location.to_string()
            } else {
                format!("rest:{}", redact_url(&url))
            }
        }
        _ => format!("rest:{}", strip_password_textually(body)),
    }
}

/// The byte range of the password in the `user:password@` part of an URL-like string.
///
/// A password may contain `/`, so if the authority has a `:` but no `@`, the user info
/// extends up to the last `@` of the string.
fn password_range(url: &str) -> Option<Range<usize>> {
    let authority_start = url.find("://").map_or(0, |pos| pos + 3);
    let rest = &url[authority_start..];
    let authority = &rest[..rest.find('/').unwrap_or(rest.len())];

    let at = match authority.rfind('@') {
        Some(at) => at,
        None if authority.contains(':') => rest.rfind('@')?,
        None => return None,
    };
    let colon = rest[..at].find(':')?;
    Some(authority_start + colon + 1..authority_start + at)
}

/// Replace the password in the `user:password@` part of an URL-like string.
fn strip_password_textually(url: &str) -> String {
    let Some(range) = password_range(url) else {
        return url.to_string();
    };
    let mut stripped = url.to_string();
    stripped.replace_range(range, constants::REDACTED);
    stripped
}

impl ApplyOptions for RestConfig {
    fn apply_option(&mut self, key: &str, value: &str) -> RusticResult<()> {
        match key {
            "connections" => self.connections = option_value(key, value)?,
            "retry" => {
                self.retry = match value {
                    "false" | "off" => 0,
                    "default" => constants::DEFAULT_RETRY,
                    _ => option_value(key, value)?,
                };
            }
            "timeout" => self.timeout = Some(duration_value(key, value)?),
            _ => return Err(unknown_option("rest", key)),
        }
        Ok(())
    }
}
