//! Testing utilities for `rustic_location`.

/// Backends to be used solely for testing.
pub mod backend;
/// Drivers to be installed into a `BackendRegistry` in tests.
pub mod driver;
/// An in-memory REST server behind the `HttpTransport` interface.
pub mod transport;

use std::collections::HashMap;

/// A fixed environment with the given variables.
#[must_use]
pub fn environment<const N: usize>(vars: [(&str, &str); N]) -> HashMap<String, String> {
    vars.into_iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}
