//! This module contains [`BackendOptions`] to open the backend of a repository.
use std::{collections::HashMap, path::PathBuf, sync::Arc};

use derive_setters::Setters;
use serde_with::{DisplayFromStr, serde_as};
use tokio_util::sync::CancellationToken;

use crate::{
    backend::WriteBackend,
    error::{ErrorKind, RusticError, RusticResult},
    factory::BackendFactory,
    limiter::Limits,
    options::Options,
    transport::TransportOptions,
};

#[cfg(feature = "clap")]
use clap::ValueHint;

/// Options for the backend of a repository.
#[serde_as]
#[cfg_attr(feature = "clap", derive(clap::Parser))]
#[cfg_attr(feature = "merge", derive(conflate::Merge))]
#[derive(Clone, Default, Debug, serde::Deserialize, serde::Serialize, Setters)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
#[setters(into, strip_option)]
#[non_exhaustive]
pub struct BackendOptions {
    /// Repository to use
    #[cfg_attr(
        feature = "clap",
        clap(short, long, global = true, visible_alias = "repo", env = "RUSTIC_REPOSITORY", value_hint = ValueHint::DirPath)
    )]
    #[cfg_attr(feature = "merge", merge(strategy = conflate::option::overwrite_none))]
    pub repository: Option<String>,

    /// Extended backend options given as `<scheme>.<key>=<value>`, e.g. `s3.region=eu-west-1`
    #[cfg_attr(
        feature = "clap",
        clap(short = 'o', long = "option", global = true, value_name = "KEY=VALUE")
    )]
    #[cfg_attr(feature = "merge", merge(strategy = conflate::vec::overwrite_empty))]
    pub option: Vec<String>,

    /// Extended backend options as table, keyed by `<scheme>.<key>`
    #[cfg_attr(feature = "clap", clap(skip))]
    #[cfg_attr(feature = "merge", merge(strategy = conflate::hashmap::ignore))]
    pub options: HashMap<String, String>,

    /// Limit the upload bandwidth (KiB/s)
    #[cfg_attr(
        feature = "clap",
        clap(long, global = true, value_name = "KIB/S", env = "RUSTIC_LIMIT_UPLOAD")
    )]
    #[cfg_attr(feature = "merge", merge(strategy = conflate::option::overwrite_none))]
    pub limit_upload: Option<u32>,

    /// Limit the download bandwidth (KiB/s)
    #[cfg_attr(
        feature = "clap",
        clap(long, global = true, value_name = "KIB/S", env = "RUSTIC_LIMIT_DOWNLOAD")
    )]
    #[cfg_attr(feature = "merge", merge(strategy = conflate::option::overwrite_none))]
    pub limit_download: Option<u32>,

    /// Additional root certificates (PEM) for HTTPS backends
    #[cfg_attr(
        feature = "clap",
        clap(long, global = true, value_hint = ValueHint::FilePath)
    )]
    #[cfg_attr(feature = "merge", merge(strategy = conflate::vec::append))]
    pub cacert: Vec<PathBuf>,

    /// Client certificate and key (PEM) for TLS client authentication
    #[cfg_attr(
        feature = "clap",
        clap(long, global = true, value_hint = ValueHint::FilePath)
    )]
    #[cfg_attr(feature = "merge", merge(strategy = conflate::option::overwrite_none))]
    pub tls_client_cert: Option<PathBuf>,

    /// Don't verify TLS certificates
    #[cfg_attr(feature = "clap", clap(long, global = true))]
    #[cfg_attr(feature = "merge", merge(strategy = conflate::bool::overwrite_false))]
    pub insecure_tls: bool,

    /// Timeout for a single HTTP request, e.g. `10min`
    #[cfg_attr(feature = "clap", clap(long, global = true, value_name = "DURATION"))]
    #[cfg_attr(feature = "merge", merge(strategy = conflate::option::overwrite_none))]
    #[serde_as(as = "Option<DisplayFromStr>")]
    pub timeout: Option<humantime::Duration>,
}

impl BackendOptions {
    /// The extended options, from the `option` list and the `options` table.
    ///
    /// # Errors
    ///
    /// * If an option is malformed or given more than once.
    pub fn to_options(&self) -> RusticResult<Options> {
        let mut options = Options::parse(&self.option)?;
        let mut table: Vec<_> = self.options.iter().collect();
        table.sort();
        for (key, value) in table {
            options.insert(key, value)?;
        }
        Ok(options)
    }

    /// The options of the HTTP transport.
    #[must_use]
    pub fn transport_options(&self) -> TransportOptions {
        let mut options = TransportOptions::default()
            .cacert(self.cacert.clone())
            .insecure_tls(self.insecure_tls);
        options.tls_client_cert.clone_from(&self.tls_client_cert);
        options.timeout = self.timeout.map(Into::into);
        options
    }

    /// The bandwidth limits, unset limits are unlimited.
    #[must_use]
    pub fn limits(&self) -> Limits {
        Limits::new(
            self.limit_upload.unwrap_or_default(),
            self.limit_download.unwrap_or_default(),
        )
    }

    fn repository_location(&self) -> RusticResult<&str> {
        self.repository.as_deref().ok_or_else(|| {
            RusticError::new(
                ErrorKind::InvalidInput,
                "No repository given. Please make sure, that you have set the repository.",
            )
        })
    }

    /// Open the backend of the repository.
    ///
    /// # Errors
    ///
    /// * If no repository is given.
    /// * If the options are invalid or the backend cannot be opened, see
    ///   [`BackendFactory::open`].
    pub async fn to_backend(
        &self,
        factory: &BackendFactory,
        cancel: &CancellationToken,
    ) -> RusticResult<Arc<dyn WriteBackend>> {
        factory
            .open(
                cancel,
                self.repository_location()?,
                &self.to_options()?,
                &self.transport_options(),
                self.limits(),
            )
            .await
    }

    /// Create the repository layout and return the (unthrottled) backend.
    ///
    /// # Errors
    ///
    /// * If no repository is given.
    /// * If the options are invalid or the backend cannot be created, see
    ///   [`BackendFactory::create`].
    pub async fn init_backend(
        &self,
        factory: &BackendFactory,
        cancel: &CancellationToken,
    ) -> RusticResult<Arc<dyn WriteBackend>> {
        factory
            .create(
                cancel,
                self.repository_location()?,
                &self.to_options()?,
                &self.transport_options(),
            )
            .await
    }
}
