//! Configuration of the OpenStack Swift backend, `swift:<container>:<prefix>`.
use crate::{
    config::{ApplyOptions, BackendConfig, Secret, malformed, option_value, unknown_option},
    environment::{Environment, fill_from_env, fill_secret_from_env},
    error::RusticResult,
};

pub(super) mod constants {
    /// Default number of concurrent connections
    pub(super) const DEFAULT_CONNECTIONS: usize = 5;
}

/// Configuration of a repository in a Swift container.
///
/// Authentication works with keystone v1, v2 and v3, with application credentials or with a
/// pre-authenticated storage URL and token. Empty fields are filled from the usual `OS_*`
/// and `ST_*` variables.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SwiftConfig {
    /// The container name.
    pub container: String,
    /// Prefix of all objects within the container.
    pub prefix: String,
    /// `$OS_USERNAME` or `$ST_USER`
    pub user_name: String,
    /// `$OS_PASSWORD` or `$ST_KEY`
    pub api_key: Secret,
    /// `$OS_REGION_NAME`
    pub region: String,
    /// `$OS_AUTH_URL` or `$ST_AUTH`
    pub auth_url: String,
    /// `$OS_USER_ID`
    pub user_id: String,
    /// `$OS_USER_DOMAIN_NAME`
    pub domain: String,
    /// `$OS_USER_DOMAIN_ID`
    pub domain_id: String,
    /// `$OS_PROJECT_NAME` or `$OS_TENANT_NAME`
    pub tenant: String,
    /// `$OS_PROJECT_DOMAIN_NAME`
    pub tenant_domain: String,
    /// `$OS_PROJECT_DOMAIN_ID`
    pub tenant_domain_id: String,
    /// `$OS_TRUST_ID`
    pub trust_id: String,
    /// `$OS_TENANT_ID`
    pub tenant_id: String,
    /// `$OS_APPLICATION_CREDENTIAL_ID`
    pub application_credential_id: String,
    /// `$OS_APPLICATION_CREDENTIAL_NAME`
    pub application_credential_name: String,
    /// `$OS_APPLICATION_CREDENTIAL_SECRET`
    pub application_credential_secret: Secret,
    /// `$OS_STORAGE_URL`
    pub storage_url: String,
    /// `$OS_AUTH_TOKEN`
    pub auth_token: Secret,
    /// Storage policy of a newly created container, `$SWIFT_DEFAULT_CONTAINER_POLICY`.
    pub default_container_policy: String,
    /// Number of concurrent connections.
    pub connections: usize,
}

impl SwiftConfig {
    /// Fill empty fields from `OS_*`, `ST_*` and `SWIFT_*` variables.
    ///
    /// Fields listed for more than one variable take the first non-empty one.
    pub(crate) fn apply_environment(&mut self, env: &dyn Environment) {
        let fields = [
            // v2/v3
            (&mut self.user_name, "OS_USERNAME"),
            (&mut self.region, "OS_REGION_NAME"),
            (&mut self.auth_url, "OS_AUTH_URL"),
            // v3
            (&mut self.user_id, "OS_USER_ID"),
            (&mut self.domain, "OS_USER_DOMAIN_NAME"),
            (&mut self.domain_id, "OS_USER_DOMAIN_ID"),
            (&mut self.tenant, "OS_PROJECT_NAME"),
            (&mut self.tenant_domain, "OS_PROJECT_DOMAIN_NAME"),
            (&mut self.tenant_domain_id, "OS_PROJECT_DOMAIN_ID"),
            (&mut self.trust_id, "OS_TRUST_ID"),
        ];
        for (field, key) in fields {
            fill_from_env(field, env, key);
        }
        fill_secret_from_env(&mut self.api_key, env, "OS_PASSWORD");

        // v2
        fill_from_env(&mut self.tenant_id, env, "OS_TENANT_ID");
        fill_from_env(&mut self.tenant, env, "OS_TENANT_NAME");

        // v1
        fill_from_env(&mut self.auth_url, env, "ST_AUTH");
        fill_from_env(&mut self.user_name, env, "ST_USER");
        fill_secret_from_env(&mut self.api_key, env, "ST_KEY");

        // application credentials
        fill_from_env(
            &mut self.application_credential_id,
            env,
            "OS_APPLICATION_CREDENTIAL_ID",
        );
        fill_from_env(
            &mut self.application_credential_name,
            env,
            "OS_APPLICATION_CREDENTIAL_NAME",
        );
        fill_secret_from_env(
            &mut self.application_credential_secret,
            env,
            "OS_APPLICATION_CREDENTIAL_SECRET",
        );

        // manual authentication
        fill_from_env(&mut self.storage_url, env, "OS_STORAGE_URL");
        fill_secret_from_env(&mut self.auth_token, env, "OS_AUTH_TOKEN");

        fill_from_env(
            &mut self.default_container_policy,
            env,
            "SWIFT_DEFAULT_CONTAINER_POLICY",
        );
    }
}

/// Parse a `swift:<container>:<prefix>` location.
///
/// # Errors
///
/// * If the prefix is missing.
pub fn parse(location: &str) -> RusticResult<BackendConfig> {
    let Some(rest) = location.strip_prefix("swift:") else {
        return Err(malformed(
            "swift",
            "Invalid format, prefix `swift:` not found.",
            location,
        ));
    };

    let (container, prefix) = rest.split_once(':').unwrap_or((rest, ""));
    if container.is_empty() {
        return Err(malformed(
            "swift",
            "Invalid format, container not found.",
            location,
        ));
    }
    if prefix.is_empty() {
        return Err(malformed(
            "swift",
            "Invalid format, prefix not found.",
            location,
        ));
    }

    Ok(BackendConfig::Swift(SwiftConfig {
        container: container.to_string(),
        prefix: super::clean_prefix(prefix),
        connections: constants::DEFAULT_CONNECTIONS,
        ..SwiftConfig::default()
    }))
}

impl ApplyOptions for SwiftConfig {
    fn apply_option(&mut self, key: &str, value: &str) -> RusticResult<()> {
        match key {
            "connections" => self.connections = option_value(key, value)?,
            "default-container-policy" => self.default_container_policy = value.to_string(),
            _ => return Err(unknown_option("swift", key)),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env(vars: &[(&str, &str)]) -> HashMap<String, String> {
        vars.iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_parse_requires_prefix() {
        let BackendConfig::Swift(cfg) = parse("swift:container:/prefix").unwrap() else {
            panic!("expected swift config");
        };
        assert_eq!(cfg.container, "container");
        assert_eq!(cfg.prefix, "prefix");
        assert!(parse("swift:container").is_err());
        assert!(parse("swift:container:").is_err());
    }

    #[test]
    fn test_first_non_empty_variable_wins() {
        let mut cfg = SwiftConfig::default();
        cfg.apply_environment(&env(&[
            ("OS_AUTH_URL", ""),
            ("ST_AUTH", "https://auth.v1"),
            ("OS_PROJECT_NAME", "project"),
            ("OS_TENANT_NAME", "tenant"),
            ("OS_PASSWORD", "os-pass"),
            ("ST_KEY", "st-key"),
        ]));
        assert_eq!(cfg.auth_url, "https://auth.v1");
        assert_eq!(cfg.tenant, "project");
        assert_eq!(cfg.api_key.expose(), "os-pass");
    }
}
