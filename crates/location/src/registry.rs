//! The registry of backend drivers.
//!
//! A [`BackendDriver`] bundles everything needed for one scheme: how to parse a location, how
//! to redact it and how to open or create the backend. The [`BackendRegistry`] is an ordered,
//! immutable list of drivers with unique schemes; its first entry is always `local`.
use std::{
    fmt,
    sync::{Arc, OnceLock},
};

use log::debug;
use tokio_util::sync::CancellationToken;

use crate::{
    backend::WriteBackend,
    config::{self, BackendConfig},
    error::{ErrorKind, RusticError, RusticResult},
    location::Location,
    local, rclone, rest,
    scheme::{extract_scheme, is_path},
    transport::HttpTransport,
};

/// How a backend talks to its storage.
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum_macros::Display)]
pub enum TransportKind {
    /// The backend sends its requests through an [`HttpTransport`].
    #[strum(to_string = "http")]
    Http,
    /// The backend uses a protocol of its own, e.g. the filesystem or ssh.
    #[strum(to_string = "native")]
    Native,
}

/// Parses a location into the configuration of a backend.
pub type ParseFn = fn(&str) -> RusticResult<BackendConfig>;

/// Removes passwords from a location.
pub type StripPasswordFn = fn(&str) -> String;

/// Opens or creates a backend from its resolved configuration.
///
/// Constructors block and run on a thread of the blocking pool.
pub type ConstructFn =
    Arc<dyn Fn(BackendConfig, DriverContext) -> RusticResult<Arc<dyn WriteBackend>> + Send + Sync>;

/// What a constructor gets besides the configuration.
#[derive(Clone, Debug)]
pub struct DriverContext {
    /// The transport to use, given for [`TransportKind::Http`] drivers only.
    pub transport: Option<Arc<dyn HttpTransport>>,
    /// Cancelled when the caller is no longer interested in the backend.
    pub cancel: CancellationToken,
}

impl DriverContext {
    /// The transport, failing if the driver was called without one.
    ///
    /// # Errors
    ///
    /// * If no transport is given.
    pub fn require_transport(&self, scheme: &str) -> RusticResult<Arc<dyn HttpTransport>> {
        self.transport.clone().ok_or_else(|| {
            RusticError::new(
                ErrorKind::Internal,
                "The `{scheme}` backend needs an HTTP transport, but none was given.",
            )
            .attach_context("scheme", scheme)
        })
    }
}

/// Parse, redact, open and create functions of one scheme.
#[derive(Clone)]
pub struct BackendDriver {
    /// The scheme, e.g. `s3`
    pub scheme: &'static str,
    /// How the backend talks to its storage
    pub transport: TransportKind,
    /// Parses a location of this scheme
    pub parse: ParseFn,
    /// Removes passwords from a location of this scheme
    pub strip_password: StripPasswordFn,
    /// Opens an existing repository
    pub open: ConstructFn,
    /// Opens a backend and creates the repository layout
    pub create: ConstructFn,
}

impl fmt::Debug for BackendDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendDriver")
            .field("scheme", &self.scheme)
            .field("transport", &self.transport)
            .finish_non_exhaustive()
    }
}

impl BackendDriver {
    /// Create a driver whose `create` opens the backend and calls [`WriteBackend::create`].
    pub fn new(
        scheme: &'static str,
        transport: TransportKind,
        parse: ParseFn,
        strip_password: StripPasswordFn,
        open: ConstructFn,
    ) -> Self {
        let create = create_from_open(Arc::clone(&open));
        Self {
            scheme,
            transport,
            parse,
            strip_password,
            open,
            create,
        }
    }
}

/// A `create` constructor which opens the backend and creates the repository layout.
pub fn create_from_open(open: ConstructFn) -> ConstructFn {
    Arc::new(move |config: BackendConfig, ctx: DriverContext| {
        let backend = open(config, ctx)?;
        backend.create()?;
        Ok(backend)
    })
}

/// Locations of most schemes contain no password.
fn keep_location(location: &str) -> String {
    location.to_string()
}

/// A driver for a scheme whose wire protocol is not part of this crate.
fn unbundled(scheme: &'static str, transport: TransportKind, parse: ParseFn) -> BackendDriver {
    let open: ConstructFn = Arc::new(move |_: BackendConfig, _: DriverContext| {
        Err(RusticError::new(
            ErrorKind::Unsupported,
            "There is no built-in driver for the `{scheme}` backend. Please install one using `BackendRegistry::with_driver`.",
        )
        .attach_context("scheme", scheme))
    });
    BackendDriver {
        scheme,
        transport,
        parse,
        strip_password: keep_location,
        open: Arc::clone(&open),
        create: open,
    }
}

/// The ordered set of all known backend drivers.
#[derive(Clone, Debug)]
pub struct BackendRegistry {
    drivers: Vec<BackendDriver>,
}

impl BackendRegistry {
    /// The registry of all built-in drivers.
    ///
    /// The order is `local`, `sftp`, `s3`, `gs`, `azure`, `swift`, `b2`, `rest`, `rclone`.
    pub fn builtin() -> &'static Self {
        static BUILTIN: OnceLock<BackendRegistry> = OnceLock::new();
        BUILTIN.get_or_init(|| Self {
            drivers: vec![
                BackendDriver::new(
                    "local",
                    TransportKind::Native,
                    config::local::parse,
                    keep_location,
                    Arc::new(local::open),
                ),
                sftp_driver(),
                unbundled("s3", TransportKind::Http, config::s3::parse),
                unbundled("gs", TransportKind::Http, config::gs::parse),
                unbundled("azure", TransportKind::Http, config::azure::parse),
                unbundled("swift", TransportKind::Http, config::swift::parse),
                unbundled("b2", TransportKind::Http, config::b2::parse),
                BackendDriver::new(
                    "rest",
                    TransportKind::Http,
                    config::rest::parse,
                    config::rest::strip_password,
                    Arc::new(rest::open),
                ),
                BackendDriver::new(
                    "rclone",
                    TransportKind::Http,
                    config::rclone::parse,
                    keep_location,
                    Arc::new(rclone::open),
                ),
            ],
        })
    }

    /// Create a registry from the given drivers.
    ///
    /// # Errors
    ///
    /// * If the first driver is not `local` or a scheme is given more than once.
    pub fn new(drivers: Vec<BackendDriver>) -> RusticResult<Self> {
        if drivers.first().map(|driver| driver.scheme) != Some("local") {
            return Err(RusticError::new(
                ErrorKind::Internal,
                "The first driver of a registry must be the `local` driver.",
            ));
        }
        for (i, driver) in drivers.iter().enumerate() {
            if drivers[..i].iter().any(|other| other.scheme == driver.scheme) {
                return Err(RusticError::new(
                    ErrorKind::Internal,
                    "The scheme `{scheme}` is registered more than once.",
                )
                .attach_context("scheme", driver.scheme));
            }
        }
        Ok(Self { drivers })
    }

    /// All drivers in their order of precedence.
    #[must_use]
    pub fn drivers(&self) -> &[BackendDriver] {
        &self.drivers
    }

    /// The driver for `scheme`.
    #[must_use]
    pub fn get(&self, scheme: &str) -> Option<&BackendDriver> {
        self.drivers.iter().find(|driver| driver.scheme == scheme)
    }

    /// The driver responsible for `location`, if it starts with `<scheme>:`.
    fn driver_for(&self, location: &str) -> Option<&BackendDriver> {
        if location.contains(':') {
            self.get(extract_scheme(location))
        } else {
            None
        }
    }

    /// A copy of this registry with the constructors of `scheme` replaced.
    ///
    /// # Errors
    ///
    /// * [`ErrorKind::UnknownScheme`] - If there is no driver for `scheme`.
    pub fn with_driver(
        &self,
        scheme: &str,
        open: ConstructFn,
        create: ConstructFn,
    ) -> RusticResult<Self> {
        let mut registry = self.clone();
        let driver = registry
            .drivers
            .iter_mut()
            .find(|driver| driver.scheme == scheme)
            .ok_or_else(|| {
                RusticError::new(ErrorKind::UnknownScheme, "Unknown scheme `{scheme}`.")
                    .attach_context("scheme", scheme)
            })?;
        driver.open = open;
        driver.create = create;
        Ok(registry)
    }

    /// Parse a location string.
    ///
    /// Strings without a known scheme are local paths, unless they contain a `:` and don't look
    /// like a path.
    ///
    /// # Errors
    ///
    /// * [`ErrorKind::MalformedConfig`] - If the backend cannot parse the location.
    /// * [`ErrorKind::AmbiguousLocation`] - If there is no scheme but the location contains a `:`.
    pub fn parse_location(&self, location: &str) -> RusticResult<Location> {
        let (scheme, config) = if let Some(driver) = self.driver_for(location) {
            (driver.scheme, (driver.parse)(location)?)
        } else if !is_path(location) && location.contains(':') {
            return Err(RusticError::new(
                ErrorKind::AmbiguousLocation,
                "Invalid backend `{location}`. If this is a local path, prefix it with `local:`, e.g. `local:{location}`.",
            )
            .attach_context("location", self.strip_password(location)));
        } else {
            let local = &self.drivers[0];
            (local.scheme, (local.parse)(&format!("local:{location}"))?)
        };

        debug!("parsed location {}", self.strip_password(location));
        Ok(Location { scheme, config })
    }

    /// Remove passwords from a location string, using the redaction of its scheme.
    ///
    /// Locations of unknown schemes are returned unchanged.
    #[must_use]
    pub fn strip_password(&self, location: &str) -> String {
        self.driver_for(location)
            .map_or_else(|| location.to_string(), |driver| (driver.strip_password)(location))
    }
}

#[cfg(all(feature = "sftp", not(windows)))]
fn sftp_driver() -> BackendDriver {
    BackendDriver::new(
        "sftp",
        TransportKind::Native,
        config::sftp::parse,
        keep_location,
        Arc::new(crate::opendal::sftp::open),
    )
}

#[cfg(not(all(feature = "sftp", not(windows))))]
fn sftp_driver() -> BackendDriver {
    let open: ConstructFn = Arc::new(|_: BackendConfig, _: DriverContext| {
        Err(RusticError::new(
            ErrorKind::Unsupported,
            "This build has no sftp support. Please enable the `sftp` feature (not available on Windows).",
        ))
    });
    BackendDriver {
        scheme: "sftp",
        transport: TransportKind::Native,
        parse: config::sftp::parse,
        strip_password: keep_location,
        open: Arc::clone(&open),
        create: open,
    }
}

/// Error for a constructor called with the configuration of another scheme.
pub(crate) fn unexpected_config(scheme: &str, config: &BackendConfig) -> Box<RusticError> {
    RusticError::new(
        ErrorKind::Internal,
        "The `{scheme}` driver was called with a `{given}` configuration.",
    )
    .attach_context("scheme", scheme)
    .attach_context("given", config.scheme())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[test]
    fn test_builtin_order_and_uniqueness() {
        let registry = BackendRegistry::builtin();
        let schemes: Vec<_> = registry.drivers().iter().map(|d| d.scheme).collect();
        assert_eq!(
            schemes,
            ["local", "sftp", "s3", "gs", "azure", "swift", "b2", "rest", "rclone"]
        );
        assert!(BackendRegistry::new(registry.drivers().to_vec()).is_ok());
    }

    #[rstest]
    #[case("local", TransportKind::Native)]
    #[case("sftp", TransportKind::Native)]
    #[case("s3", TransportKind::Http)]
    #[case("gs", TransportKind::Http)]
    #[case("azure", TransportKind::Http)]
    #[case("swift", TransportKind::Http)]
    #[case("b2", TransportKind::Http)]
    #[case("rest", TransportKind::Http)]
    #[case("rclone", TransportKind::Http)]
    fn test_transport_kinds(#[case] scheme: &str, #[case] kind: TransportKind) {
        assert_eq!(
            BackendRegistry::builtin().get(scheme).unwrap().transport,
            kind
        );
    }

    #[test]
    fn test_new_rejects_duplicates_and_missing_local() {
        let drivers = BackendRegistry::builtin().drivers();
        let mut duplicated = drivers.to_vec();
        duplicated.push(drivers[7].clone());
        assert_eq!(
            BackendRegistry::new(duplicated).unwrap_err().kind(),
            ErrorKind::Internal
        );
        assert!(BackendRegistry::new(drivers[1..].to_vec()).is_err());
        assert!(BackendRegistry::new(Vec::new()).is_err());
    }

    #[test]
    fn test_with_driver_replaces_constructors() {
        let open: ConstructFn = Arc::new(|_: BackendConfig, _: DriverContext| {
            Err(RusticError::new(ErrorKind::Backend, "replaced"))
        });
        let registry = BackendRegistry::builtin()
            .with_driver("s3", Arc::clone(&open), open)
            .unwrap();
        let driver = registry.get("s3").unwrap();
        let config = (driver.parse)("s3:bucket").unwrap();
        let ctx = DriverContext {
            transport: None,
            cancel: CancellationToken::new(),
        };
        let err = (driver.open)(config, ctx).unwrap_err();
        assert_eq!(err.display_guidance(), "replaced");

        let never: ConstructFn = Arc::new(|_: BackendConfig, _: DriverContext| unreachable!());
        assert_eq!(
            BackendRegistry::builtin()
                .with_driver("ftp", Arc::clone(&never), never)
                .unwrap_err()
                .kind(),
            ErrorKind::UnknownScheme
        );
    }

    #[test]
    fn test_unbundled_drivers_are_unsupported() {
        let driver = BackendRegistry::builtin().get("b2").unwrap();
        let config = (driver.parse)("b2:bucket").unwrap();
        let ctx = DriverContext {
            transport: None,
            cancel: CancellationToken::new(),
        };
        assert_eq!(
            (driver.open)(config, ctx).unwrap_err().kind(),
            ErrorKind::Unsupported
        );
    }
}
