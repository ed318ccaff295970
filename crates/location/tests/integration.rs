//! Integration tests for resolving and opening backends
//!
//! # Fixtures
//!
//! We use the `rstest` crate to define fixtures. HTTP backends talk to a
//! [`MemoryRestTransport`] instead of a real server and credentials are read from a fixed
//! environment instead of the process environment.

use std::sync::Arc;

use rstest::fixture;
// uncomment for logging output
// use simplelog::{Config, SimpleLogger};

use rustic_location::{BackendFactory, HttpTransport, TransportOptions};
use rustic_testing::{environment, transport::MemoryRestTransport};

mod integration {
    mod factory;
    mod location;
    mod options;
}

#[fixture]
fn rest_server() -> Arc<MemoryRestTransport> {
    Arc::new(MemoryRestTransport::new())
}

/// A factory sending all HTTP requests to `server`, with an empty environment.
fn factory_for(server: &Arc<MemoryRestTransport>) -> BackendFactory {
    let server = Arc::clone(server);
    BackendFactory::default()
        .with_environment(environment([]))
        .with_transport_builder(Arc::new(move |_: &TransportOptions| {
            let transport: Arc<dyn HttpTransport> = server.clone();
            Ok(transport)
        }))
}
