//! The sftp backend, a wrapper around the `OpenDAL` sftp service.
use std::{collections::HashMap, sync::Arc};

use log::{debug, warn};
use opendal::Scheme;

use crate::{
    backend::WriteBackend,
    config::{BackendConfig, SftpConfig},
    error::{ErrorKind, RusticError, RusticResult},
    opendal::OpenDALBackend,
    registry::{DriverContext, unexpected_config},
};

/// Open an sftp backend.
///
/// # Errors
///
/// * If a custom command is configured, which the `OpenDAL` service cannot run.
/// * If the operator cannot be built.
// the signature is given by `ConstructFn`
#[allow(clippy::needless_pass_by_value)]
pub(crate) fn open(
    config: BackendConfig,
    ctx: DriverContext,
) -> RusticResult<Arc<dyn WriteBackend>> {
    let cfg = match config {
        BackendConfig::Sftp(cfg) => cfg,
        config => return Err(unexpected_config("sftp", &config)),
    };
    if ctx.cancel.is_cancelled() {
        return Err(RusticError::new(
            ErrorKind::Cancelled,
            "Connecting to the sftp server was cancelled.",
        ));
    }
    if cfg.command.is_some() {
        return Err(RusticError::new(
            ErrorKind::Unsupported,
            "The option `sftp.command` is not supported by the sftp driver. Please use `sftp.args` to pass the identity file or port.",
        ));
    }

    let location = location(&cfg);
    let options = operator_options(&cfg)?;
    debug!("opening sftp backend {location}");
    Ok(Arc::new(OpenDALBackend::new(
        Scheme::Sftp,
        location,
        options,
        cfg.connections,
    )?))
}

fn location(cfg: &SftpConfig) -> String {
    let user = cfg
        .user
        .as_ref()
        .map_or_else(String::new, |user| format!("{user}@"));
    match cfg.port {
        Some(port) => format!("sftp://{user}{}:{port}/{}", cfg.host, cfg.path),
        None => format!("sftp:{user}{}:{}", cfg.host, cfg.path),
    }
}

/// The configuration of the `OpenDAL` sftp service.
///
/// Of the ssh arguments only `-i <identity file>` and `-p <port>` are understood.
fn operator_options(cfg: &SftpConfig) -> RusticResult<HashMap<String, String>> {
    let mut port = cfg.port;
    let mut key = None;

    if let Some(args) = &cfg.args {
        let args = shell_words::split(args).map_err(|err| {
            RusticError::with_source(
                ErrorKind::InvalidInput,
                "Could not parse the ssh arguments `{args}`.",
                err,
            )
            .attach_context("args", args.clone())
        })?;
        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "-i" => key = args.next(),
                "-p" => {
                    port = args
                        .next()
                        .map(|port| {
                            port.parse().map_err(|err| {
                                RusticError::with_source(
                                    ErrorKind::InvalidInput,
                                    "Invalid ssh port `{port}`.",
                                    err,
                                )
                                .attach_context("port", port)
                            })
                        })
                        .transpose()?;
                }
                arg => warn!("ignoring ssh argument {arg}"),
            }
        }
    }

    let mut options = HashMap::new();
    let endpoint = match port {
        Some(port) => format!("{}:{port}", cfg.host),
        None => cfg.host.clone(),
    };
    _ = options.insert("endpoint".to_string(), endpoint);
    _ = options.insert("root".to_string(), cfg.path.clone());
    if let Some(user) = &cfg.user {
        _ = options.insert("user".to_string(), user.clone());
    }
    if let Some(key) = key {
        _ = options.insert("key".to_string(), key);
    }
    Ok(options)
}
