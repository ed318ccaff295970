//! The backend speaking the restic REST protocol.
use std::{fmt, sync::Arc, time::Duration};

use backoff::{ExponentialBackoff, ExponentialBackoffBuilder, backoff::Backoff};
use bytes::Bytes;
use log::{trace, warn};
use reqwest::Method;
use serde::Deserialize;
use url::Url;

use crate::{
    backend::{FileType, ReadBackend, WriteBackend},
    config::{BackendConfig, RestConfig, rest::redact_url},
    error::{ErrorKind, RusticError, RusticResult},
    id::Id,
    registry::{DriverContext, unexpected_config},
    transport::{HttpRequest, HttpResponse, HttpTransport, TransportError},
};

/// [`RestErrorKind`] describes the errors of a single request to a REST server
#[derive(thiserror::Error, Debug, displaydoc::Display)]
#[non_exhaustive]
pub enum RestErrorKind {
    /// {0}
    Transport(#[from] TransportError),
    /// the server responded with status {0}
    Status(u16),
    /// the file listing cannot be parsed: `{0}`
    Listing(#[from] serde_json::Error),
}

// trait CheckError to add user-defined method check_error on HttpResponse
pub(crate) trait CheckError {
    /// Check the response for error and treat errors as permanent or transient
    fn check_error(self) -> Result<HttpResponse, backoff::Error<RestErrorKind>>;
}

impl CheckError for HttpResponse {
    /// Client errors are permanent, all other errors are transient.
    fn check_error(self) -> Result<HttpResponse, backoff::Error<RestErrorKind>> {
        if self.is_success() {
            Ok(self)
        } else if self.is_client_error() {
            Err(backoff::Error::Permanent(RestErrorKind::Status(self.status)))
        } else {
            Err(backoff::Error::Transient {
                err: RestErrorKind::Status(self.status),
                retry_after: None,
            })
        }
    }
}

/// A backoff implementation that limits the number of retries
#[derive(Clone, Debug)]
struct LimitRetryBackoff {
    /// The maximum number of retries
    max_retries: usize,
    /// The current number of retries
    retries: usize,
    /// The exponential backoff
    exp: ExponentialBackoff,
}

impl LimitRetryBackoff {
    fn new(max_retries: usize) -> Self {
        Self {
            max_retries,
            retries: 0,
            exp: ExponentialBackoffBuilder::new()
                .with_max_elapsed_time(None) // no maximum elapsed time; we count number of retries
                .build(),
        }
    }
}

impl Backoff for LimitRetryBackoff {
    /// Returns the next backoff duration, `None` once the maximum number of retries is
    /// exceeded.
    fn next_backoff(&mut self) -> Option<Duration> {
        self.retries += 1;
        if self.retries > self.max_retries {
            None
        } else {
            self.exp.next_backoff()
        }
    }

    fn reset(&mut self) {
        self.retries = 0;
        self.exp.reset();
    }
}

/// Notify function for backoff in case of error
// We need to pass the error by value to satisfy the signature of the notify function
// for handling errors in backoff
#[allow(clippy::needless_pass_by_value)]
fn notify(err: RestErrorKind, duration: Duration) {
    warn!("Error {err} at {duration:?}, retrying");
}

/// A backend implementation that uses REST to access the backend.
#[derive(Clone)]
pub struct RestBackend {
    /// The url of the backend, may contain credentials.
    url: Url,
    /// The transport to send requests with.
    transport: Arc<dyn HttpTransport>,
    /// The backoff implementation to use.
    backoff: LimitRetryBackoff,
    /// Timeout of a single request.
    timeout: Option<Duration>,
}

impl fmt::Debug for RestBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RestBackend")
            .field("url", &redact_url(&self.url).as_str())
            .field("transport", &self.transport)
            .field("backoff", &self.backoff)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Open a REST backend using the transport of `ctx`.
// the signature is given by `ConstructFn`
#[allow(clippy::needless_pass_by_value)]
pub(crate) fn open(
    config: BackendConfig,
    ctx: DriverContext,
) -> RusticResult<Arc<dyn WriteBackend>> {
    match config {
        BackendConfig::Rest(cfg) => Ok(Arc::new(RestBackend::new(
            cfg,
            ctx.require_transport("rest")?,
        ))),
        config => Err(unexpected_config("rest", &config)),
    }
}

impl RestBackend {
    /// Create a new [`RestBackend`] sending its requests through `transport`.
    #[must_use]
    pub fn new(config: RestConfig, transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            url: config.url,
            transport,
            backoff: LimitRetryBackoff::new(config.retry),
            timeout: config.timeout,
        }
    }

    /// Returns the url for a given type and id.
    ///
    /// # Errors
    ///
    /// * If the url could not be joined.
    fn url(&self, tpe: FileType, id: &Id) -> RusticResult<Url> {
        let id_path = if tpe == FileType::Config {
            "config".to_string()
        } else {
            let hex_id = id.to_hex();
            let mut path = tpe.dirname().to_string();
            path.push('/');
            path.push_str(&hex_id);
            path
        };

        self.join(&id_path)
    }

    fn join(&self, path: &str) -> RusticResult<Url> {
        self.url.join(path).map_err(|err| {
            RusticError::with_source(
                ErrorKind::Internal,
                "Joining URL `{url}` with `{join_input}` failed",
                err,
            )
            .attach_context("url", redact_url(&self.url))
            .attach_context("join_input", path)
        })
    }

    /// Send `request`, retrying transient failures.
    fn send(&self, request: &HttpRequest) -> RusticResult<HttpResponse> {
        let request = request.clone().timeout(self.timeout);
        backoff::retry_notify(
            self.backoff.clone(),
            || {
                self.transport
                    .send(request.clone())
                    .map_err(|err| backoff::Error::transient(err.into()))?
                    .check_error()
            },
            notify,
        )
        .map_err(|err| self.backoff_error(err))
    }

    fn backoff_error(&self, err: backoff::Error<RestErrorKind>) -> Box<RusticError> {
        RusticError::with_source(
            ErrorKind::Backend,
            "Backoff failed, please check the logs for more information.",
            err,
        )
        .attach_context("location", self.location())
    }
}

impl ReadBackend for RestBackend {
    /// Returns the location of the backend, with the password replaced by `***`.
    fn location(&self) -> String {
        format!("rest:{}", redact_url(&self.url))
    }

    /// Returns a list of all files of a given type with their size.
    ///
    /// For the config file, a single entry with size 0 is returned if it exists.
    ///
    /// # Errors
    ///
    /// * If the url could not be created.
    /// * If the request failed or the listing cannot be parsed.
    fn list_with_size(&self, tpe: FileType) -> RusticResult<Vec<(Id, u32)>> {
        // format which is delivered by the REST-service
        #[derive(Deserialize)]
        struct ListEntry {
            name: String,
            size: u32,
        }

        trace!("listing tpe: {tpe:?}");

        if tpe == FileType::Config {
            let url = self.join("config")?;
            let response = backoff::retry_notify(
                self.backoff.clone(),
                || {
                    let response = self
                        .transport
                        .send(HttpRequest::new(Method::HEAD, url.clone()).timeout(self.timeout))
                        .map_err(|err| backoff::Error::transient(RestErrorKind::from(err)))?;
                    // a missing config is no error
                    if response.is_success() || response.is_client_error() {
                        Ok(response)
                    } else {
                        response.check_error()
                    }
                },
                notify,
            )
            .map_err(|err| self.backoff_error(err))?;

            return Ok(if response.is_success() {
                vec![(Id::default(), 0)]
            } else {
                Vec::new()
            });
        }

        let mut path = tpe.dirname().to_string();
        path.push('/');
        let url = self.join(&path)?;

        let request = HttpRequest::new(Method::GET, url)
            .header("Accept", "application/vnd.x.restic.rest.v2");
        let response = self.send(&request)?;

        // use Option to handle a null json value
        let list = serde_json::from_slice::<Option<Vec<ListEntry>>>(&response.body)
            .map_err(|err| self.backoff_error(backoff::Error::permanent(err.into())))?
            .unwrap_or_default();

        Ok(list
            .into_iter()
            .filter_map(|i| match i.name.parse::<Id>() {
                Ok(id) => Some((id, i.size)),
                Err(_) => None,
            })
            .collect())
    }

    fn read_full(&self, tpe: FileType, id: &Id) -> RusticResult<Bytes> {
        trace!("reading tpe: {tpe:?}, id: {id}");
        let request = HttpRequest::new(Method::GET, self.url(tpe, id)?);
        Ok(self.send(&request)?.body)
    }

    fn read_partial(
        &self,
        tpe: FileType,
        id: &Id,
        _cacheable: bool,
        offset: u32,
        length: u32,
    ) -> RusticResult<Bytes> {
        trace!("reading tpe: {tpe:?}, id: {id}, offset: {offset}, length: {length}");
        let end = u64::from(offset) + u64::from(length.max(1)) - 1;
        let request = HttpRequest::new(Method::GET, self.url(tpe, id)?)
            .header("Range", format!("bytes={offset}-{end}"));
        Ok(self.send(&request)?.body)
    }

    /// [`RestBackend`] is used with the blocking `reqwest` client, which
    /// uses an `async` runtime under the hood.
    fn is_async_incompatible(&self) -> bool {
        true
    }
}

impl WriteBackend for RestBackend {
    /// Creates the repository on the server.
    fn create(&self) -> RusticResult<()> {
        let url = self.join("?create=true")?;
        _ = self.send(&HttpRequest::new(Method::POST, url))?;
        Ok(())
    }

    fn write_bytes(
        &self,
        tpe: FileType,
        id: &Id,
        _cacheable: bool,
        buf: Bytes,
    ) -> RusticResult<()> {
        trace!("writing tpe: {:?}, id: {}", &tpe, &id);
        let request = HttpRequest::new(Method::POST, self.url(tpe, id)?).body(buf);
        _ = self.send(&request)?;
        Ok(())
    }

    fn remove(&self, tpe: FileType, id: &Id, _cacheable: bool) -> RusticResult<()> {
        trace!("removing tpe: {:?}, id: {}", &tpe, &id);
        _ = self.send(&HttpRequest::new(Method::DELETE, self.url(tpe, id)?))?;
        Ok(())
    }
}
