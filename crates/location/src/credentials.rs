//! Completing a parsed location with environment credentials and extended options.
use log::debug;

use crate::{
    config::{B2Config, BackendConfig, S3Config},
    environment::Environment,
    error::{ErrorKind, RusticError, RusticResult},
    location::Location,
    options::Options,
};

/// Build the final configuration of `location`.
///
/// Credential fields which are still empty are filled from the environment first, the
/// options for the location's scheme are applied afterwards.
///
/// # Errors
///
/// * [`ErrorKind::MissingCredential`] - If only one half of the S3 key pair is given, or the
///   B2 account id or key is missing.
/// * [`ErrorKind::OptionApplication`] - If an option is unknown or has an invalid value.
pub fn resolve_config(
    location: &Location,
    options: &Options,
    env: &dyn Environment,
) -> RusticResult<BackendConfig> {
    let opts = options.extract(location.scheme);
    let mut config = location.config.clone();

    config.apply_environment(env);

    match &config {
        BackendConfig::S3(cfg) => check_s3_credentials(cfg)?,
        BackendConfig::B2(cfg) => check_b2_credentials(cfg)?,
        BackendConfig::Local(_)
        | BackendConfig::Sftp(_)
        | BackendConfig::Gs(_)
        | BackendConfig::Azure(_)
        | BackendConfig::Swift(_)
        | BackendConfig::Rest(_)
        | BackendConfig::Rclone(_) => {}
    }

    opts.apply(location.scheme, &mut config)?;
    debug!(
        "resolved config for scheme {} with {} option(s)",
        location.scheme,
        opts.len()
    );

    Ok(config)
}

fn missing_credential(backend: &str, what: &str, variable: &str) -> Box<RusticError> {
    RusticError::new(
        ErrorKind::MissingCredential,
        "Unable to open {backend} backend: {what} (${variable}) is empty.",
    )
    .attach_context("backend", backend)
    .attach_context("what", what)
    .attach_context("variable", variable)
}

/// Key id and secret must be given both or not at all.
fn check_s3_credentials(cfg: &S3Config) -> RusticResult<()> {
    match (cfg.key_id.is_empty(), cfg.secret.is_empty()) {
        (true, false) => Err(missing_credential("S3", "Key ID", "AWS_ACCESS_KEY_ID")),
        (false, true) => Err(missing_credential(
            "S3",
            "Secret",
            "AWS_SECRET_ACCESS_KEY",
        )),
        (true, true) | (false, false) => Ok(()),
    }
}

/// Account id and key are both mandatory.
fn check_b2_credentials(cfg: &B2Config) -> RusticResult<()> {
    if cfg.account_id.is_empty() {
        return Err(missing_credential("B2", "Account ID", "B2_ACCOUNT_ID"));
    }
    if cfg.key.is_empty() {
        return Err(missing_credential("B2", "Key", "B2_ACCOUNT_KEY"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use rstest::rstest;

    use crate::{config::Secret, location::parse_location};

    use super::*;

    fn env(vars: &[(&str, &str)]) -> HashMap<String, String> {
        vars.iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_explicit_credentials_are_kept() {
        let mut location = parse_location("s3:bucket").unwrap();
        let BackendConfig::S3(cfg) = &mut location.config else {
            panic!("expected s3 config");
        };
        cfg.key_id = "explicit-id".to_string();
        cfg.secret = Secret::new("explicit-secret");

        let vars = env(&[
            ("AWS_ACCESS_KEY_ID", "env-id"),
            ("AWS_SECRET_ACCESS_KEY", "env-secret"),
            ("AWS_DEFAULT_REGION", "eu-west-1"),
        ]);
        let BackendConfig::S3(cfg) = resolve_config(&location, &Options::new(), &vars).unwrap()
        else {
            panic!("expected s3 config");
        };
        assert_eq!(cfg.key_id, "explicit-id");
        assert_eq!(cfg.secret.expose(), "explicit-secret");
        assert_eq!(cfg.region, "eu-west-1");
    }

    #[test]
    fn test_empty_credentials_are_filled() {
        let location = parse_location("s3:bucket").unwrap();
        let vars = env(&[
            ("AWS_ACCESS_KEY_ID", "env-id"),
            ("AWS_SECRET_ACCESS_KEY", "env-secret"),
        ]);
        let BackendConfig::S3(cfg) = resolve_config(&location, &Options::new(), &vars).unwrap()
        else {
            panic!("expected s3 config");
        };
        assert_eq!(cfg.key_id, "env-id");
        assert_eq!(cfg.secret.expose(), "env-secret");
    }

    #[rstest]
    #[case("s3:bucket", &[("AWS_ACCESS_KEY_ID", "id")], "AWS_SECRET_ACCESS_KEY")]
    #[case("s3:bucket", &[("AWS_SECRET_ACCESS_KEY", "secret")], "AWS_ACCESS_KEY_ID")]
    #[case("b2:bucket", &[], "B2_ACCOUNT_ID")]
    #[case("b2:bucket", &[("B2_ACCOUNT_ID", "id")], "B2_ACCOUNT_KEY")]
    #[case("b2:bucket", &[("B2_ACCOUNT_KEY", "key")], "B2_ACCOUNT_ID")]
    fn test_missing_credential_names_variable(
        #[case] location: &str,
        #[case] vars: &[(&str, &str)],
        #[case] variable: &str,
    ) {
        let location = parse_location(location).unwrap();
        let err = resolve_config(&location, &Options::new(), &env(vars)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingCredential);
        assert_eq!(err.context_value("variable"), Some(variable));
        assert!(err.to_string().contains(&format!("${variable}")));
    }

    #[rstest]
    #[case(None, "env-project")]
    #[case(Some("explicit-project"), "explicit-project")]
    fn test_gs_project_id_fallback(#[case] explicit: Option<&str>, #[case] expected: &str) {
        let mut location = parse_location("gs:bucket:/prefix").unwrap();
        if let (BackendConfig::Gs(cfg), Some(project_id)) = (&mut location.config, explicit) {
            cfg.project_id = project_id.to_string();
        }
        let vars = env(&[("GOOGLE_PROJECT_ID", "env-project")]);

        let BackendConfig::Gs(cfg) = resolve_config(&location, &Options::new(), &vars).unwrap()
        else {
            panic!("expected gs config");
        };
        assert_eq!(cfg.project_id, expected);
    }

    #[rstest]
    #[case(None, ("env-account", "env-key"))]
    #[case(Some(("explicit-account", "explicit-key")), ("explicit-account", "explicit-key"))]
    fn test_azure_account_fallback(
        #[case] explicit: Option<(&str, &str)>,
        #[case] expected: (&str, &str),
    ) {
        let mut location = parse_location("azure:container:/prefix").unwrap();
        if let (BackendConfig::Azure(cfg), Some((name, key))) = (&mut location.config, explicit) {
            cfg.account_name = name.to_string();
            cfg.account_key = Secret::new(key);
        }
        let vars = env(&[
            ("AZURE_ACCOUNT_NAME", "env-account"),
            ("AZURE_ACCOUNT_KEY", "env-key"),
            ("AZURE_ACCOUNT_SAS", "env-sas"),
        ]);

        let BackendConfig::Azure(cfg) =
            resolve_config(&location, &Options::new(), &vars).unwrap()
        else {
            panic!("expected azure config");
        };
        assert_eq!(cfg.account_name, expected.0);
        assert_eq!(cfg.account_key.expose(), expected.1);
        assert_eq!(cfg.account_sas.expose(), "env-sas");
    }

    #[rstest]
    #[case(None, "env-profile")]
    #[case(Some("explicit-profile"), "explicit-profile")]
    fn test_s3_profile_fallback(#[case] explicit: Option<&str>, #[case] expected: &str) {
        let mut location = parse_location("s3:bucket").unwrap();
        if let (BackendConfig::S3(cfg), Some(profile)) = (&mut location.config, explicit) {
            cfg.profile = profile.to_string();
        }
        let vars = env(&[("AWS_PROFILE", "env-profile")]);

        let BackendConfig::S3(cfg) = resolve_config(&location, &Options::new(), &vars).unwrap()
        else {
            panic!("expected s3 config");
        };
        assert_eq!(cfg.profile, expected);
    }

    #[test]
    fn test_s3_without_credentials_is_ok() {
        let location = parse_location("s3:bucket").unwrap();
        assert!(resolve_config(&location, &Options::new(), &env(&[])).is_ok());
    }

    #[test]
    fn test_options_are_applied_after_environment() {
        let location = parse_location("s3:bucket").unwrap();
        let vars = env(&[("AWS_DEFAULT_REGION", "from-env")]);
        let options = Options::parse(["s3.region=from-option", "rest.retry=off"]).unwrap();

        let BackendConfig::S3(cfg) = resolve_config(&location, &options, &vars).unwrap() else {
            panic!("expected s3 config");
        };
        assert_eq!(cfg.region, "from-option");
    }

    #[test]
    fn test_unknown_option_fails() {
        let location = parse_location("/srv/repo").unwrap();
        let options = Options::parse(["local.region=x"]).unwrap();
        let err = resolve_config(&location, &options, &env(&[])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OptionApplication);
    }
}
