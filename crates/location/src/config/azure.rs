//! Configuration of the Azure Blob Storage backend, `azure:<container>:<prefix>`.
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

/// Configuration of a repository in an Azure Blob Storage container.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AzureConfig {
    /// The storage account name, `$AZURE_ACCOUNT_NAME`.
    pub account_name: String,
    /// The storage account key, `$AZURE_ACCOUNT_KEY`.
    pub account_key: Secret,
    /// A shared access signature, `$AZURE_ACCOUNT_SAS`.
    pub account_sas: Secret,
    /// The container name.
    pub container: String,
    /// Prefix of all blobs within the container.
    pub prefix: String,
    /// Endpoint suffix, e.g. `core.chinacloudapi.cn`.
    pub endpoint_suffix: String,
    /// Access tier for new blobs (`Hot`, `Cool` or `Cold`).
    pub access_tier: String,
    /// Number of concurrent connections.
    pub connections: usize,
}

impl AzureConfig {
    /// Fill empty account fields from `AZURE_ACCOUNT_*` variables.
    pub(crate) fn apply_environment(&mut self, env: &dyn Environment) {
        fill_from_env(&mut self.account_name, env, "AZURE_ACCOUNT_NAME");
        fill_secret_from_env(&mut self.account_key, env, "AZURE_ACCOUNT_KEY");
        fill_secret_from_env(&mut self.account_sas, env, "AZURE_ACCOUNT_SAS");
    }
}

/// Parse an `azure:<container>:<prefix>` location.
///
/// # Errors
///
/// * If container name or prefix separator cannot be found.
pub fn parse(location: &str) -> RusticResult<BackendConfig> {
    let Some(rest) = location.strip_prefix("azure:") else {
        return Err(malformed(
            "azure",
            "Invalid format, prefix `azure:` not found.",
            location,
        ));
    };

    let Some((container, prefix)) = rest.split_once(':') else {
        return Err(malformed(
            "azure",
            "Invalid format, container name or path not found.",
            location,
        ));
    };

    if container.is_empty() {
        return Err(malformed(
            "azure",
            "Invalid format, container name not found.",
            location,
        ));
    }

    Ok(BackendConfig::Azure(AzureConfig {
        account_name: String::new(),
        account_key: Secret::default(),
        account_sas: Secret::default(),
        container: container.to_string(),
        prefix: clean_prefix(prefix),
        endpoint_suffix: String::new(),
        access_tier: String::new(),
        connections: constants::DEFAULT_CONNECTIONS,
    }))
}

impl ApplyOptions for AzureConfig {
    fn apply_option(&mut self, key: &str, value: &str) -> RusticResult<()> {
        match key {
            "connections" => self.connections = option_value(key, value)?,
            "endpoint-suffix" => self.endpoint_suffix = value.to_string(),
            "access-tier" => self.access_tier = value.to_string(),
            _ => return Err(unknown_option("azure", key)),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_container_and_prefix() {
        let BackendConfig::Azure(cfg) = parse("azure:container:/dir/sub").unwrap() else {
            panic!("expected azure config");
        };
        assert_eq!(cfg.container, "container");
        assert_eq!(cfg.prefix, "dir/sub");
        assert!(parse("azure:container").is_err());
    }
}
