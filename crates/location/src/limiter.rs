//! Bandwidth limits for opened backends.
//!
//! A [`Limiter`] holds one token bucket per direction. It is either put in front of the HTTP
//! transport of a backend ([`Limiter::transport`]) or around the backend handle itself
//! ([`Limiter::backend`]). Both adapters share the same accounting, so every read or write
//! operation is accounted exactly once.
use std::{
    fmt,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use bytes::Bytes;
use derive_setters::Setters;
use log::trace;
use reqwest::Method;

use crate::{
    backend::{FileType, ReadBackend, WriteBackend},
    error::RusticResult,
    id::Id,
    transport::{HttpRequest, HttpResponse, HttpTransport, TransportError},
};

/// Upload and download limits in KiB/s, `0` means unlimited.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Setters)]
#[non_exhaustive]
pub struct Limits {
    /// Upload limit in KiB/s
    pub upload_kib: u32,
    /// Download limit in KiB/s
    pub download_kib: u32,
}

impl Limits {
    /// Create limits for upload and download in KiB/s.
    #[must_use]
    pub const fn new(upload_kib: u32, download_kib: u32) -> Self {
        Self {
            upload_kib,
            download_kib,
        }
    }

    /// Whether neither direction is limited.
    #[must_use]
    pub const fn is_unlimited(&self) -> bool {
        self.upload_kib == 0 && self.download_kib == 0
    }
}

/// A token bucket allowing bursts of up to one second worth of bytes.
///
/// Taking more tokens than available puts the bucket into debt; the caller has to wait until
/// the debt is paid off.
#[derive(Debug)]
struct TokenBucket {
    /// bytes per second
    rate: f64,
    tokens: f64,
    last: Instant,
}

impl TokenBucket {
    fn new(kib_per_sec: u32) -> Self {
        let rate = f64::from(kib_per_sec) * 1024.0;
        Self {
            rate,
            tokens: rate,
            last: Instant::now(),
        }
    }

    /// Take `bytes` tokens and return how long to wait before continuing.
    #[allow(clippy::cast_precision_loss)]
    fn take(&mut self, bytes: usize) -> Duration {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last).as_secs_f64();
        self.last = now;
        self.tokens = self.rate.min(self.tokens + elapsed * self.rate);
        self.tokens -= bytes as f64;

        if self.tokens < 0.0 {
            Duration::from_secs_f64(-self.tokens / self.rate)
        } else {
            Duration::ZERO
        }
    }
}

/// Counters of the accounted operations of a [`Limiter`].
#[derive(Debug, Default)]
struct Counters {
    upload_calls: AtomicU64,
    upload_bytes: AtomicU64,
    download_calls: AtomicU64,
    download_bytes: AtomicU64,
}

/// A snapshot of the statistics of a [`Limiter`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[non_exhaustive]
pub struct LimiterStatistics {
    /// Number of accounted uploads
    pub upload_calls: u64,
    /// Number of uploaded bytes
    pub upload_bytes: u64,
    /// Number of accounted downloads
    pub download_calls: u64,
    /// Number of downloaded bytes
    pub download_bytes: u64,
}

/// Throttles the bandwidth of one opened backend.
pub struct Limiter {
    limits: Limits,
    upload: Option<Mutex<TokenBucket>>,
    download: Option<Mutex<TokenBucket>>,
    counters: Counters,
}

impl fmt::Debug for Limiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Limiter")
            .field("limits", &self.limits)
            .field("statistics", &self.statistics())
            .finish_non_exhaustive()
    }
}

impl Limiter {
    /// Create a new limiter.
    #[must_use]
    pub fn new(limits: Limits) -> Self {
        let bucket = |kib| (kib > 0).then(|| Mutex::new(TokenBucket::new(kib)));
        Self {
            limits,
            upload: bucket(limits.upload_kib),
            download: bucket(limits.download_kib),
            counters: Counters::default(),
        }
    }

    /// The limits of this limiter.
    #[must_use]
    pub const fn limits(&self) -> Limits {
        self.limits
    }

    /// The current statistics.
    #[must_use]
    pub fn statistics(&self) -> LimiterStatistics {
        LimiterStatistics {
            upload_calls: self.counters.upload_calls.load(Ordering::Relaxed),
            upload_bytes: self.counters.upload_bytes.load(Ordering::Relaxed),
            download_calls: self.counters.download_calls.load(Ordering::Relaxed),
            download_bytes: self.counters.download_bytes.load(Ordering::Relaxed),
        }
    }

    /// Account an upload of `bytes` bytes, blocking if the upload limit is exceeded.
    pub fn account_upload(&self, bytes: usize) {
        _ = self.counters.upload_calls.fetch_add(1, Ordering::Relaxed);
        _ = self
            .counters
            .upload_bytes
            .fetch_add(bytes as u64, Ordering::Relaxed);
        Self::throttle(self.upload.as_ref(), bytes);
    }

    /// Account a download of `bytes` bytes, blocking if the download limit is exceeded.
    pub fn account_download(&self, bytes: usize) {
        _ = self.counters.download_calls.fetch_add(1, Ordering::Relaxed);
        _ = self
            .counters
            .download_bytes
            .fetch_add(bytes as u64, Ordering::Relaxed);
        Self::throttle(self.download.as_ref(), bytes);
    }

    fn throttle(bucket: Option<&Mutex<TokenBucket>>, bytes: usize) {
        let Some(bucket) = bucket else {
            return;
        };
        // the lock is released before sleeping
        let wait = bucket
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take(bytes);
        if !wait.is_zero() {
            trace!("throttling for {wait:?}");
            thread::sleep(wait);
        }
    }

    /// Wrap an HTTP transport; uploads are request bodies, downloads are bodies of `GET`
    /// responses.
    ///
    /// Accounting happens per request, not per backend operation: listings are downloads too,
    /// and every retried attempt of an operation is accounted again. A read or write which
    /// succeeds on the first attempt is accounted exactly once.
    #[must_use]
    pub fn transport(self: &Arc<Self>, inner: Arc<dyn HttpTransport>) -> Arc<dyn HttpTransport> {
        Arc::new(LimitedTransport {
            inner,
            limiter: Arc::clone(self),
        })
    }

    /// Wrap a backend handle; `write_bytes`, `read_full` and `read_partial` are accounted.
    #[must_use]
    pub fn backend(self: &Arc<Self>, inner: Arc<dyn WriteBackend>) -> Arc<dyn WriteBackend> {
        Arc::new(LimitedBackend {
            inner,
            limiter: Arc::clone(self),
        })
    }
}

/// An [`HttpTransport`] throttled by a [`Limiter`].
#[derive(Debug)]
struct LimitedTransport {
    inner: Arc<dyn HttpTransport>,
    limiter: Arc<Limiter>,
}

impl HttpTransport for LimitedTransport {
    fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        if request.body.is_some() {
            self.limiter.account_upload(request.body_len());
        }
        let is_get = request.method == Method::GET;
        let response = self.inner.send(request)?;
        if is_get {
            self.limiter.account_download(response.body.len());
        }
        Ok(response)
    }
}

/// A backend throttled by a [`Limiter`].
#[derive(Debug)]
struct LimitedBackend {
    inner: Arc<dyn WriteBackend>,
    limiter: Arc<Limiter>,
}

impl ReadBackend for LimitedBackend {
    fn location(&self) -> String {
        self.inner.location()
    }

    fn list_with_size(&self, tpe: FileType) -> RusticResult<Vec<(Id, u32)>> {
        self.inner.list_with_size(tpe)
    }

    fn list(&self, tpe: FileType) -> RusticResult<Vec<Id>> {
        self.inner.list(tpe)
    }

    fn stat(&self, tpe: FileType, id: &Id) -> RusticResult<u32> {
        self.inner.stat(tpe, id)
    }

    fn read_full(&self, tpe: FileType, id: &Id) -> RusticResult<Bytes> {
        let data = self.inner.read_full(tpe, id)?;
        self.limiter.account_download(data.len());
        Ok(data)
    }

    fn read_partial(
        &self,
        tpe: FileType,
        id: &Id,
        cacheable: bool,
        offset: u32,
        length: u32,
    ) -> RusticResult<Bytes> {
        let data = self
            .inner
            .read_partial(tpe, id, cacheable, offset, length)?;
        self.limiter.account_download(data.len());
        Ok(data)
    }

    fn is_async_incompatible(&self) -> bool {
        self.inner.is_async_incompatible()
    }
}

impl WriteBackend for LimitedBackend {
    fn create(&self) -> RusticResult<()> {
        self.inner.create()
    }

    fn write_bytes(&self, tpe: FileType, id: &Id, cacheable: bool, buf: Bytes) -> RusticResult<()> {
        self.limiter.account_upload(buf.len());
        self.inner.write_bytes(tpe, id, cacheable, buf)
    }

    fn remove(&self, tpe: FileType, id: &Id, cacheable: bool) -> RusticResult<()> {
        self.inner.remove(tpe, id, cacheable)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;

    use pretty_assertions::assert_eq;
    use url::Url;

    use super::*;

    #[derive(Debug)]
    struct EchoTransport;

    impl HttpTransport for EchoTransport {
        fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
            Ok(HttpResponse::new(
                200,
                request.body.unwrap_or_else(|| Bytes::from_static(b"0123456789")),
            ))
        }
    }

    fn request(method: Method) -> HttpRequest {
        HttpRequest::new(method, Url::parse("http://localhost/repo/").unwrap())
    }

    #[test]
    fn test_unlimited_limiter_only_counts() {
        let limiter = Limiter::new(Limits::default());
        assert!(limiter.limits().is_unlimited());
        limiter.account_upload(100);
        limiter.account_download(50);
        limiter.account_download(25);
        assert_eq!(
            limiter.statistics(),
            LimiterStatistics {
                upload_calls: 1,
                upload_bytes: 100,
                download_calls: 2,
                download_bytes: 75,
            }
        );
    }

    #[test]
    fn test_transport_accounts_bodies() {
        let limiter = Arc::new(Limiter::new(Limits::default()));
        let transport = limiter.transport(Arc::new(EchoTransport));

        _ = transport
            .send(request(Method::POST).body(Bytes::from_static(b"abc")))
            .unwrap();
        _ = transport.send(request(Method::GET)).unwrap();
        _ = transport.send(request(Method::HEAD)).unwrap();
        _ = transport.send(request(Method::DELETE)).unwrap();

        let stats = limiter.statistics();
        assert_eq!(stats.upload_calls, 1);
        assert_eq!(stats.upload_bytes, 3);
        assert_eq!(stats.download_calls, 1);
        assert_eq!(stats.download_bytes, 10);
    }

    #[derive(Debug)]
    struct FlakyTransport {
        failed: AtomicBool,
    }

    impl HttpTransport for FlakyTransport {
        fn send(&self, _: HttpRequest) -> Result<HttpResponse, TransportError> {
            let status = if self.failed.swap(true, Ordering::SeqCst) {
                200
            } else {
                503
            };
            Ok(HttpResponse::new(status, Bytes::from_static(b"abcd")))
        }
    }

    #[test]
    fn test_transport_accounts_every_attempt() {
        let limiter = Arc::new(Limiter::new(Limits::default()));
        let transport = limiter.transport(Arc::new(FlakyTransport {
            failed: AtomicBool::new(false),
        }));

        assert_eq!(transport.send(request(Method::GET)).unwrap().status, 503);
        assert_eq!(transport.send(request(Method::GET)).unwrap().status, 200);

        let stats = limiter.statistics();
        assert_eq!(stats.download_calls, 2);
        assert_eq!(stats.download_bytes, 8);
    }

    #[test]
    fn test_bucket_allows_burst_then_waits() {
        let mut bucket = TokenBucket::new(1);
        assert_eq!(bucket.take(1024), Duration::ZERO);
        let wait = bucket.take(1024);
        assert!(wait > Duration::from_millis(900), "waited {wait:?}");
        assert!(wait <= Duration::from_secs(1), "waited {wait:?}");
    }

    #[test]
    fn test_limited_upload_is_throttled() {
        let limiter = Limiter::new(Limits::new(1, 0));
        let start = Instant::now();
        // one second burst plus a quarter second of debt
        limiter.account_upload(1024 + 256);
        assert!(start.elapsed() >= Duration::from_millis(200));
    }
}
