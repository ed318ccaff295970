//! Configuration of Amazon S3 and S3 compatible backends.
use strum_macros::{Display, EnumString};
use url::Url;

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
    /// Endpoint used for `s3:<bucket>`
    pub(super) const DEFAULT_ENDPOINT: &str = "s3.amazonaws.com";
}

/// How buckets are addressed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum BucketLookup {
    /// Let the client decide
    #[default]
    Auto,
    /// Virtual host style, `<bucket>.<endpoint>`
    Dns,
    /// Path style, `<endpoint>/<bucket>`
    Path,
}

/// Configuration of a repository in an S3 bucket.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct S3Config {
    /// The endpoint (host and optional port).
    pub endpoint: String,
    /// Use `http` instead of `https`.
    pub use_http: bool,
    /// The bucket name.
    pub bucket: String,
    /// Prefix of all objects within the bucket.
    pub prefix: String,
    /// Access key id, `$AWS_ACCESS_KEY_ID`.
    pub key_id: String,
    /// Secret access key, `$AWS_SECRET_ACCESS_KEY`.
    pub secret: Secret,
    /// Region, `$AWS_DEFAULT_REGION`.
    pub region: String,
    /// Storage class for new objects.
    pub storage_class: String,
    /// Bucket addressing style.
    pub bucket_lookup: BucketLookup,
    /// Use the legacy v1 object listing.
    pub list_objects_v1: bool,
    /// Credential profile, `$AWS_PROFILE`.
    pub profile: String,
    /// Number of concurrent connections.
    pub connections: usize,
}

impl S3Config {
    fn new(endpoint: &str, bucket: &str, prefix: &str, use_http: bool) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            use_http,
            bucket: bucket.to_string(),
            prefix: clean_prefix(prefix),
            key_id: String::new(),
            secret: Secret::default(),
            region: String::new(),
            storage_class: String::new(),
            bucket_lookup: BucketLookup::Auto,
            list_objects_v1: false,
            profile: String::new(),
            connections: constants::DEFAULT_CONNECTIONS,
        }
    }

    /// Fill empty credential fields from `AWS_*` variables.
    pub(crate) fn apply_environment(&mut self, env: &dyn Environment) {
        fill_from_env(&mut self.key_id, env, "AWS_ACCESS_KEY_ID");
        fill_secret_from_env(&mut self.secret, env, "AWS_SECRET_ACCESS_KEY");
        fill_from_env(&mut self.region, env, "AWS_DEFAULT_REGION");
        fill_from_env(&mut self.profile, env, "AWS_PROFILE");
    }
}

/// Parse an `s3:` location.
///
/// Understood forms are
/// * `s3:<bucket>` - a bucket on the default endpoint,
/// * `s3:<endpoint>/<bucket>[/<prefix>]` and `s3://<endpoint>/<bucket>[/<prefix>]`,
/// * `s3:http[s]://<endpoint>/<bucket>[/<prefix>]`.
///
/// # Errors
///
/// * If endpoint or bucket cannot be found.
pub fn parse(location: &str) -> RusticResult<BackendConfig> {
    let cfg = if location.starts_with("s3:http") {
        let url = Url::parse(&location[3..]).map_err(|_| {
            malformed("s3", "Invalid format, the URL cannot be parsed.", location)
        })?;
        let path = url.path().strip_prefix('/').unwrap_or_default();
        let (bucket, prefix) = path.split_once('/').unwrap_or((path, ""));
        let endpoint = match url.port() {
            Some(port) => format!("{}:{port}", url.host_str().unwrap_or_default()),
            None => url.host_str().unwrap_or_default().to_string(),
        };
        S3Config::new(&endpoint, bucket, prefix, url.scheme() == "http")
    } else {
        let Some(rest) = location
            .strip_prefix("s3://")
            .or_else(|| location.strip_prefix("s3:"))
        else {
            return Err(malformed("s3", "Invalid format, prefix `s3:` not found.", location));
        };
        match rest.split_once('/') {
            Some((endpoint, rest)) => {
                let (bucket, prefix) = rest.split_once('/').unwrap_or((rest, ""));
                S3Config::new(endpoint, bucket, prefix, false)
            }
            None => S3Config::new(constants::DEFAULT_ENDPOINT, rest, "", false),
        }
    };

    if cfg.endpoint.is_empty() {
        return Err(malformed(
            "s3",
            "Invalid format, host/region not found.",
            location,
        ));
    }
    if cfg.bucket.is_empty() {
        return Err(malformed(
            "s3",
            "Invalid format, bucket name not found.",
            location,
        ));
    }

    Ok(BackendConfig::S3(cfg))
}

impl ApplyOptions for S3Config {
    fn apply_option(&mut self, key: &str, value: &str) -> RusticResult<()> {
        match key {
            "connections" => self.connections = option_value(key, value)?,
            "region" => self.region = value.to_string(),
            "storage-class" => self.storage_class = value.to_string(),
            "bucket-lookup" => self.bucket_lookup = option_value(key, value)?,
            "list-objects-v1" => self.list_objects_v1 = option_value(key, value)?,
            "profile" => self.profile = value.to_string(),
            _ => return Err(unknown_option("s3", key)),
        }
        Ok(())
    }
}
