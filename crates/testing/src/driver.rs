use std::{
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
    time::Duration,
};

use rustic_location::{BackendConfig, ConstructFn, DriverContext, HttpTransport, WriteBackend};

use crate::backend::InMemoryBackend;

/// What a [`RecordingDriver`] was called with.
#[derive(Clone, Debug)]
pub struct DriverCall {
    /// The scheme of the configuration
    pub scheme: &'static str,
    /// The transport, if one was given
    pub transport: Option<Arc<dyn HttpTransport>>,
}

/// A driver remembering its calls; it always opens a fresh [`InMemoryBackend`].
#[derive(Clone, Debug, Default)]
pub struct RecordingDriver {
    calls: Arc<Mutex<Vec<DriverCall>>>,
}

impl RecordingDriver {
    /// Create a driver without calls.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The constructor to install with `BackendRegistry::with_driver`.
    #[must_use]
    pub fn construct(&self) -> ConstructFn {
        let calls = Arc::clone(&self.calls);
        Arc::new(move |config: BackendConfig, ctx: DriverContext| {
            calls
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(DriverCall {
                    scheme: config.scheme(),
                    transport: ctx.transport,
                });
            let backend: Arc<dyn WriteBackend> = Arc::new(InMemoryBackend::new());
            Ok(backend)
        })
    }

    /// All calls so far.
    #[must_use]
    pub fn calls(&self) -> Vec<DriverCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Whether both transports are the same object.
#[must_use]
pub fn same_transport(left: &Arc<dyn HttpTransport>, right: &Arc<dyn HttpTransport>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(left), Arc::as_ptr(right))
}

/// A driver which blocks for `delay`, ignoring cancellation, and counts its calls in `calls`.
#[must_use]
pub fn slow_driver(delay: Duration, calls: Arc<AtomicUsize>) -> ConstructFn {
    Arc::new(move |_: BackendConfig, _: DriverContext| {
        _ = calls.fetch_add(1, Ordering::SeqCst);
        thread::sleep(delay);
        let backend: Arc<dyn WriteBackend> = Arc::new(InMemoryBackend::new());
        Ok(backend)
    })
}
