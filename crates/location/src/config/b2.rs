//! Configuration of the Backblaze B2 backend, `b2:<bucket>[:<prefix>]`.
use crate::{
    config::{
        ApplyOptions, BackendConfig, Secret, clean_prefix, malformed, option_value,
        unknown_option,
    },
    environment::{Environment, fill_from_env, fill_secret_from_env},
    error::RusticResult,
};

pub(super) mod constants {
    /// Default number of concurrent connections
    pub(super) const DEFAULT_CONNECTIONS: usize = 5;
}

/// Configuration of a repository in a B2 bucket.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct B2Config {
    /// The account id, `$B2_ACCOUNT_ID`.
    pub account_id: String,
    /// The application key, `$B2_ACCOUNT_KEY`.
    pub key: Secret,
    /// The bucket name.
    pub bucket: String,
    /// Prefix of all files within the bucket.
    pub prefix: String,
    /// Number of concurrent connections.
    pub connections: usize,
}

impl B2Config {
    /// Fill empty account fields from `B2_ACCOUNT_*` variables.
    pub(crate) fn apply_environment(&mut self, env: &dyn Environment) {
        fill_from_env(&mut self.account_id, env, "B2_ACCOUNT_ID");
        fill_secret_from_env(&mut self.key, env, "B2_ACCOUNT_KEY");
    }
}

/// Parse a `b2:<bucket>[:<prefix>]` location.
///
/// # Errors
///
/// * If the bucket name is empty or contains characters other than `a-z`, `A-Z`, `0-9`
///   and `-`.
pub fn parse(location: &str) -> RusticResult<BackendConfig> {
    let Some(rest) = location.strip_prefix("b2:") else {
        return Err(malformed("b2", "Invalid format, prefix `b2:` not found.", location));
    };

    let (bucket, prefix) = rest.split_once(':').unwrap_or((rest, ""));
    if bucket.is_empty()
        || !bucket
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-')
    {
        return Err(malformed(
            "b2",
            "Bucket name contains invalid characters, allowed are: a-z, 0-9, dash (-).",
            location,
        ));
    }

    Ok(BackendConfig::B2(B2Config {
        account_id: String::new(),
        key: Secret::default(),
        bucket: bucket.to_string(),
        prefix: clean_prefix(prefix),
        connections: constants::DEFAULT_CONNECTIONS,
    }))
}

impl ApplyOptions for B2Config {
    fn apply_option(&mut self, key: &str, value: &str) -> RusticResult<()> {
        match key {
            "connections" => self.connections = option_value(key, value)?,
            _ => return Err(unknown_option("b2", key)),
        }
        Ok(())
    }
}
