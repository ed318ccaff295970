//! The HTTP transport used by all HTTP speaking backends.
//!
//! Backends never talk to `reqwest` directly but send [`HttpRequest`]s through an
//! [`HttpTransport`]. This allows wrapping the transport, e.g. to throttle the bandwidth, and
//! replacing it in tests.
use std::{
    fmt, fs,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use bytes::Bytes;
use derive_setters::Setters;
use log::{debug, trace};
use reqwest::{
    Certificate, Identity, Method,
    blocking::{Client, ClientBuilder},
    header::{HeaderMap, HeaderValue},
};
use url::Url;

use crate::error::{ErrorKind, RusticError, RusticResult};

pub(super) mod constants {
    use std::time::Duration;

    /// Default timeout for the client
    /// This is set to 10 minutes
    pub(super) const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);

    /// The user agent sent with every request
    pub(super) const USER_AGENT: &str = "rustic";
}

/// [`TransportError`] describes the errors that can happen when sending a request.
#[derive(thiserror::Error, Debug, displaydoc::Display)]
#[non_exhaustive]
pub enum TransportError {
    /// sending the request failed: `{0}`
    Request(reqwest::Error),
    /// the transport is not available: `{0}`
    Unavailable(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        // the URL may contain credentials
        Self::Request(err.without_url())
    }
}

/// A single HTTP request.
#[derive(Clone, Debug)]
pub struct HttpRequest {
    /// The HTTP method.
    pub method: Method,
    /// The full URL, including basic auth credentials if needed.
    pub url: Url,
    /// Additional headers.
    pub headers: Vec<(&'static str, String)>,
    /// The request body.
    pub body: Option<Bytes>,
    /// Timeout overriding the transport's default.
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    /// Create a request without headers and body.
    #[must_use]
    pub const fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: Vec::new(),
            body: None,
            timeout: None,
        }
    }

    /// Add a header.
    #[must_use]
    pub fn header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }

    /// Set the body.
    #[must_use]
    pub fn body(mut self, body: Bytes) -> Self {
        self.body = Some(body);
        self
    }

    /// Set the timeout.
    #[must_use]
    pub const fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// The length of the body, 0 if there is none.
    #[must_use]
    pub fn body_len(&self) -> usize {
        self.body.as_ref().map_or(0, Bytes::len)
    }
}

/// The response to an [`HttpRequest`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HttpResponse {
    /// The HTTP status code.
    pub status: u16,
    /// The response body.
    pub body: Bytes,
}

impl HttpResponse {
    /// Create a response.
    #[must_use]
    pub const fn new(status: u16, body: Bytes) -> Self {
        Self { status, body }
    }

    /// Whether the status is in the 2xx range.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }

    /// Whether the status is in the 4xx range.
    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        self.status >= 400 && self.status < 500
    }
}

/// Sends HTTP requests.
pub trait HttpTransport: Send + Sync + fmt::Debug + 'static {
    /// Send `request` and wait for the full response.
    ///
    /// A response with an error status is not an error of the transport.
    ///
    /// # Errors
    ///
    /// * If the request could not be sent or the response could not be received.
    fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

impl<T: HttpTransport + ?Sized> HttpTransport for Arc<T> {
    fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        (**self).send(request)
    }
}

/// Options used to build the base HTTP transport.
#[derive(Clone, Debug, Default, PartialEq, Eq, Setters)]
#[setters(into, strip_option)]
#[non_exhaustive]
pub struct TransportOptions {
    /// Additional root certificates (PEM) to trust.
    pub cacert: Vec<PathBuf>,
    /// Client certificate and key (PEM) for TLS client authentication.
    pub tls_client_cert: Option<PathBuf>,
    /// Don't verify TLS certificates.
    pub insecure_tls: bool,
    /// Timeout of a single request, defaults to 10 minutes.
    pub timeout: Option<Duration>,
}

impl TransportOptions {
    /// Build a [`ReqwestTransport`] from these options.
    ///
    /// This must not be called from within an `async` context.
    ///
    /// # Errors
    ///
    /// * If a certificate file cannot be read or parsed.
    /// * If the client could not be built.
    pub fn to_transport(&self) -> RusticResult<ReqwestTransport> {
        let mut headers = HeaderMap::new();
        _ = headers.insert("User-Agent", HeaderValue::from_static(constants::USER_AGENT));

        let mut builder = ClientBuilder::new()
            .default_headers(headers)
            // we can have *large* pack files
            .timeout(self.timeout.unwrap_or(constants::DEFAULT_TIMEOUT))
            .danger_accept_invalid_certs(self.insecure_tls);

        for path in &self.cacert {
            let pem = read_pem(path)?;
            let cert = Certificate::from_pem(&pem).map_err(|err| {
                RusticError::with_source(
                    ErrorKind::InvalidInput,
                    "Could not parse root certificate `{path}`. Please check the file.",
                    err,
                )
                .attach_context("path", path.display().to_string())
            })?;
            builder = builder.add_root_certificate(cert);
        }

        if let Some(path) = &self.tls_client_cert {
            let pem = read_pem(path)?;
            let identity = Identity::from_pem(&pem).map_err(|err| {
                RusticError::with_source(
                    ErrorKind::InvalidInput,
                    "Could not parse TLS client certificate `{path}`. The file must contain the certificate and the private key.",
                    err,
                )
                .attach_context("path", path.display().to_string())
            })?;
            builder = builder.identity(identity);
        }

        let client = builder.build().map_err(|err| {
            RusticError::with_source(ErrorKind::Backend, "Failed to build HTTP client", err)
        })?;
        debug!(
            "built HTTP transport, insecure_tls: {}, {} root certificate(s)",
            self.insecure_tls,
            self.cacert.len()
        );

        Ok(ReqwestTransport { client })
    }
}

fn read_pem(path: &Path) -> RusticResult<Vec<u8>> {
    fs::read(path).map_err(|err| {
        RusticError::with_source(
            ErrorKind::InputOutput,
            "Could not read certificate file `{path}`.",
            err,
        )
        .attach_context("path", path.display().to_string())
    })
}

/// The default [`HttpTransport`] using a blocking `reqwest` client.
#[derive(Clone, Debug)]
pub struct ReqwestTransport {
    client: Client,
}

impl HttpTransport for ReqwestTransport {
    fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        trace!("{} {}", request.method, request.url.path());
        let mut builder = self.client.request(request.method, request.url);
        for (name, value) in request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }

        let response = builder.send()?;
        let status = response.status().as_u16();
        let body = response.bytes()?;
        Ok(HttpResponse { status, body })
    }
}
