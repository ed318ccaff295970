//! Opening backends from location strings.
//!
//! [`BackendFactory`] runs the whole pipeline: parse the location, resolve credentials and
//! options, build the HTTP transport and run the driver on the blocking pool. Opened backends
//! are throttled by one [`Limiter`] per call. HTTP speaking backends get a throttled
//! transport, all other backends are wrapped as a whole.
use std::{fmt, sync::Arc};

use log::debug;
use tokio::task;
use tokio_util::sync::CancellationToken;

use crate::{
    backend::WriteBackend,
    config::{self, BackendConfig},
    credentials::resolve_config,
    environment::{Environment, ProcessEnvironment},
    error::{ErrorKind, RusticError, RusticResult},
    limiter::{Limiter, Limits},
    options::Options,
    registry::{BackendDriver, BackendRegistry, DriverContext, TransportKind},
    transport::{HttpTransport, TransportOptions},
};

/// Builds the base HTTP transport for one call.
///
/// It runs on the blocking pool.
pub type TransportBuilder =
    Arc<dyn Fn(&TransportOptions) -> RusticResult<Arc<dyn HttpTransport>> + Send + Sync>;

#[derive(Clone, Copy, Debug)]
enum Action {
    Open,
    Create,
}

/// Opens and creates backends.
#[derive(Clone)]
pub struct BackendFactory {
    registry: Arc<BackendRegistry>,
    environment: Arc<dyn Environment>,
    transport_builder: TransportBuilder,
}

impl fmt::Debug for BackendFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendFactory")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl Default for BackendFactory {
    /// The built-in drivers, the process environment and a `reqwest` transport.
    fn default() -> Self {
        Self {
            registry: Arc::new(BackendRegistry::builtin().clone()),
            environment: Arc::new(ProcessEnvironment),
            transport_builder: Arc::new(|options: &TransportOptions| {
                let transport: Arc<dyn HttpTransport> = Arc::new(options.to_transport()?);
                Ok(transport)
            }),
        }
    }
}

impl BackendFactory {
    /// Use `registry` instead of the built-in drivers.
    #[must_use]
    pub fn with_registry(mut self, registry: BackendRegistry) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    /// Read credentials from `environment` instead of the process environment.
    #[must_use]
    pub fn with_environment(mut self, environment: impl Environment + 'static) -> Self {
        self.environment = Arc::new(environment);
        self
    }

    /// Build HTTP transports with `builder`.
    #[must_use]
    pub fn with_transport_builder(mut self, builder: TransportBuilder) -> Self {
        self.transport_builder = builder;
        self
    }

    /// The registry used to parse and open locations.
    #[must_use]
    pub fn registry(&self) -> &BackendRegistry {
        &self.registry
    }

    /// Open the backend at `location`, throttled to `limits`.
    ///
    /// # Errors
    ///
    /// * [`ErrorKind::Cancelled`] - If `cancel` is cancelled before the backend is opened.
    /// * [`ErrorKind::AmbiguousLocation`], [`ErrorKind::MalformedConfig`] - If the location
    ///   cannot be parsed.
    /// * [`ErrorKind::MissingCredential`], [`ErrorKind::OptionApplication`] - If the
    ///   configuration cannot be resolved.
    /// * [`ErrorKind::BackendConstruction`] - If the driver fails.
    pub async fn open(
        &self,
        cancel: &CancellationToken,
        location: &str,
        options: &Options,
        transport_options: &TransportOptions,
        limits: Limits,
    ) -> RusticResult<Arc<dyn WriteBackend>> {
        let limiter = Arc::new(Limiter::new(limits));
        self.open_with_limiter(cancel, location, options, transport_options, limiter)
            .await
    }

    /// Like [`BackendFactory::open`], but throttled by the given `limiter`.
    ///
    /// This allows inspecting the [`Limiter::statistics`] of the opened backend.
    ///
    /// # Errors
    ///
    /// See [`BackendFactory::open`].
    pub async fn open_with_limiter(
        &self,
        cancel: &CancellationToken,
        location: &str,
        options: &Options,
        transport_options: &TransportOptions,
        limiter: Arc<Limiter>,
    ) -> RusticResult<Arc<dyn WriteBackend>> {
        self.construct(
            cancel,
            location,
            options,
            transport_options,
            Some(limiter),
            Action::Open,
        )
        .await
    }

    /// Create the repository layout at `location` and return the backend.
    ///
    /// The returned backend is not throttled.
    ///
    /// # Errors
    ///
    /// See [`BackendFactory::open`].
    pub async fn create(
        &self,
        cancel: &CancellationToken,
        location: &str,
        options: &Options,
        transport_options: &TransportOptions,
    ) -> RusticResult<Arc<dyn WriteBackend>> {
        self.construct(
            cancel,
            location,
            options,
            transport_options,
            None,
            Action::Create,
        )
        .await
    }

    /// Parse `location` and resolve its configuration.
    ///
    /// # Errors
    ///
    /// * If the location cannot be parsed or its configuration cannot be resolved.
    pub fn resolve(
        &self,
        location: &str,
        options: &Options,
    ) -> RusticResult<(&BackendDriver, BackendConfig)> {
        let with_location = |err: Box<RusticError>| {
            if err.context_value("location").is_some() {
                err
            } else {
                err.attach_context("location", self.registry.strip_password(location))
            }
        };

        let parsed = self
            .registry
            .parse_location(location)
            .map_err(with_location)?;
        let config =
            resolve_config(&parsed, options, self.environment.as_ref()).map_err(with_location)?;
        let driver = self.registry.get(parsed.scheme).ok_or_else(|| {
            RusticError::new(ErrorKind::UnknownScheme, "Unknown scheme `{scheme}`.")
                .attach_context("scheme", parsed.scheme)
                .attach_context("location", self.registry.strip_password(location))
        })?;
        Ok((driver, config))
    }

    async fn construct(
        &self,
        cancel: &CancellationToken,
        location: &str,
        options: &Options,
        transport_options: &TransportOptions,
        limiter: Option<Arc<Limiter>>,
        action: Action,
    ) -> RusticResult<Arc<dyn WriteBackend>> {
        let stripped = self.registry.strip_password(location);
        if cancel.is_cancelled() {
            return Err(cancelled(&stripped));
        }

        let (driver, config) = self.resolve(location, options)?;
        let constructor = match action {
            Action::Open => Arc::clone(&driver.open),
            Action::Create => Arc::clone(&driver.create),
        };
        let kind = driver.transport;
        let transport_builder = Arc::clone(&self.transport_builder);
        let transport_options = transport_options.clone();
        let token = cancel.clone();
        debug!("{action:?} {kind} backend {stripped}");

        let blocking = task::spawn_blocking(move || -> RusticResult<Arc<dyn WriteBackend>> {
            let transport = match kind {
                TransportKind::Http => {
                    let transport = transport_builder(&transport_options)?;
                    Some(match &limiter {
                        Some(limiter) => limiter.transport(transport),
                        None => transport,
                    })
                }
                TransportKind::Native => None,
            };

            let backend = constructor(
                config,
                DriverContext {
                    transport,
                    cancel: token,
                },
            )?;

            Ok(match (kind, limiter) {
                (TransportKind::Native, Some(limiter)) => limiter.backend(backend),
                _ => backend,
            })
        });

        // a backend finished after cancellation is dropped on the blocking thread
        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(cancelled(&stripped)),
            joined = blocking => joined.map_err(|err| {
                RusticError::with_source(
                    ErrorKind::Internal,
                    "The task opening the backend `{location}` failed.",
                    err,
                )
                .attach_context("location", stripped.clone())
            })?,
        };

        result.map_err(|err| construction_error(&err, driver.scheme, location, &stripped))
    }
}

fn cancelled(stripped: &str) -> Box<RusticError> {
    RusticError::new(
        ErrorKind::Cancelled,
        "Opening the backend `{location}` was cancelled.",
    )
    .attach_context("location", stripped)
}

/// Wrap a driver error, removing the password of `location` from everything it says.
fn construction_error(
    err: &RusticError,
    scheme: &str,
    location: &str,
    stripped: &str,
) -> Box<RusticError> {
    if err.is_kind(ErrorKind::Cancelled) {
        return cancelled(stripped);
    }

    let redact = |message: String| {
        let message = if location == stripped {
            message
        } else {
            message.replace(location, stripped)
        };
        config::rest::redact_message(&message, location)
    };

    let mut error = RusticError::new(
        ErrorKind::BackendConstruction,
        "Could not open the {scheme} backend `{location}`: {message}",
    )
    .attach_context("scheme", scheme)
    .attach_context("location", stripped)
    .attach_context("kind", err.kind().to_string())
    .attach_context("message", redact(err.display_guidance()));

    if let Some(cause) = std::error::Error::source(err) {
        error = error.attach_context("cause", redact(cause.to_string()));
    }
    error
}
