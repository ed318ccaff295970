//! Configuration of the Google Cloud Storage backend, `gs:<bucket>:<prefix>`.
use crate::{
    config::{ApplyOptions, BackendConfig, clean_prefix, malformed, option_value, unknown_option},
    environment::{Environment, fill_from_env},
    error::RusticResult,
};

pub(super) mod constants {
    /// Default number of concurrent connections
    pub(super) const DEFAULT_CONNECTIONS: usize = 5;
    /// Default region for new buckets
    pub(super) const DEFAULT_REGION: &str = "us";
}

/// Configuration of a repository in a Google Cloud Storage bucket.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GsConfig {
    /// The project id, `$GOOGLE_PROJECT_ID`.
    pub project_id: String,
    /// The bucket name.
    pub bucket: String,
    /// Prefix of all objects within the bucket.
    pub prefix: String,
    /// Region used when the bucket is created.
    pub region: String,
    /// Number of concurrent connections.
    pub connections: usize,
}

impl GsConfig {
    /// Fill the project id from `$GOOGLE_PROJECT_ID`.
    pub(crate) fn apply_environment(&mut self, env: &dyn Environment) {
        fill_from_env(&mut self.project_id, env, "GOOGLE_PROJECT_ID");
    }
}

/// Parse a `gs:<bucket>:<prefix>` location.
///
/// # Errors
///
/// * If bucket name or prefix separator cannot be found.
pub fn parse(location: &str) -> RusticResult<BackendConfig> {
    let Some(rest) = location.strip_prefix("gs:") else {
        return Err(malformed("gs", "Invalid format, prefix `gs:` not found.", location));
    };

    let Some((bucket, prefix)) = rest.split_once(':') else {
        return Err(malformed(
            "gs",
            "Invalid format, bucket name or path not found.",
            location,
        ));
    };

    if bucket.is_empty() {
        return Err(malformed("gs", "Invalid format, bucket name not found.", location));
    }

    Ok(BackendConfig::Gs(GsConfig {
        project_id: String::new(),
        bucket: bucket.to_string(),
        prefix: clean_prefix(prefix),
        region: constants::DEFAULT_REGION.to_string(),
        connections: constants::DEFAULT_CONNECTIONS,
    }))
}

impl ApplyOptions for GsConfig {
    fn apply_option(&mut self, key: &str, value: &str) -> RusticResult<()> {
        match key {
            "connections" => self.connections = option_value(key, value)?,
            "region" => self.region = value.to_string(),
            _ => return Err(unknown_option("gs", key)),
        }
        Ok(())
    }
}
