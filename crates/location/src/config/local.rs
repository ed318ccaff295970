//! Configuration of the local backend, `local:<path>`.
use std::path::PathBuf;

use crate::{
    config::{ApplyOptions, BackendConfig, malformed, option_value, unknown_option},
    error::RusticResult,
};

pub(super) mod constants {
    /// Default number of concurrent connections
    pub(super) const DEFAULT_CONNECTIONS: usize = 2;
}

/// Configuration of a repository in a local directory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocalConfig {
    /// The directory of the repository.
    pub path: PathBuf,
    /// Number of concurrent connections.
    pub connections: usize,
    /// Command to call after a file was created.
    ///
    /// `%file`, `%type` and `%id` are replaced by the file name, its type and id.
    pub post_create_command: Option<String>,
    /// Command to call after a file was deleted.
    ///
    /// `%file`, `%type` and `%id` are replaced by the file name, its type and id.
    pub post_delete_command: Option<String>,
}

impl LocalConfig {
    /// Create a new configuration for the given directory.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            connections: constants::DEFAULT_CONNECTIONS,
            post_create_command: None,
            post_delete_command: None,
        }
    }
}

/// Parse a `local:<path>` location.
///
/// # Errors
///
/// * If the location does not start with `local:` or names no path.
pub fn parse(location: &str) -> RusticResult<BackendConfig> {
    let Some(path) = location.strip_prefix("local:") else {
        return Err(malformed(
            "local",
            "Invalid format, prefix `local:` not found.",
            location,
        ));
    };

    if path.is_empty() {
        return Err(malformed(
            "local",
            "Invalid format, no directory given.",
            location,
        ));
    }

    Ok(BackendConfig::Local(LocalConfig::new(path)))
}

impl ApplyOptions for LocalConfig {
    fn apply_option(&mut self, key: &str, value: &str) -> RusticResult<()> {
        match key {
            "connections" => self.connections = option_value(key, value)?,
            "post-create-command" => self.post_create_command = Some(value.to_string()),
            "post-delete-command" => self.post_delete_command = Some(value.to_string()),
            _ => return Err(unknown_option("local", key)),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use crate::error::ErrorKind;

    use super::*;

    #[rstest]
    #[case("local:/srv/repo", "/srv/repo")]
    #[case("local:relative/repo", "relative/repo")]
    #[case(r"local:C:\repo", r"C:\repo")]
    #[case("local:with:colon", "with:colon")]
    fn test_parse_is_ok(#[case] location: &str, #[case] expected: &str) {
        let BackendConfig::Local(cfg) = parse(location).unwrap() else {
            panic!("expected local config");
        };
        assert_eq!(cfg.path, PathBuf::from(expected));
        assert_eq!(cfg.connections, constants::DEFAULT_CONNECTIONS);
    }

    #[rstest]
    #[case("local:")]
    #[case("/srv/repo")]
    #[case("sftp:host:/srv")]
    fn test_parse_fails(#[case] location: &str) {
        assert_eq!(
            parse(location).unwrap_err().kind(),
            ErrorKind::MalformedConfig
        );
    }

    #[test]
    fn test_apply_options() {
        let mut cfg = LocalConfig::new("/srv/repo");
        cfg.apply_option("connections", "7").unwrap();
        cfg.apply_option("post-create-command", "sync %file").unwrap();
        assert_eq!(cfg.connections, 7);
        assert_eq!(cfg.post_create_command.as_deref(), Some("sync %file"));
        assert!(cfg.apply_option("layout", "default").is_err());
    }
}
