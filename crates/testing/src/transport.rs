use std::{
    collections::BTreeMap,
    sync::{Mutex, PoisonError},
};

use bytes::Bytes;
use log::trace;
use reqwest::Method;
use serde_json::json;

use rustic_location::{HttpRequest, HttpResponse, HttpTransport, TransportError};

/// A request seen by a [`MemoryRestTransport`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SeenRequest {
    /// The method
    pub method: Method,
    /// The path of the URL, without leading `/`
    pub path: String,
    /// The length of the request body
    pub body_len: usize,
}

/// Serves the restic REST protocol from memory.
///
/// Files are keyed by the path of the request URL, so any host and base path can be used.
#[derive(Debug, Default)]
pub struct MemoryRestTransport {
    files: Mutex<BTreeMap<String, Bytes>>,
    requests: Mutex<Vec<SeenRequest>>,
}

impl MemoryRestTransport {
    /// Create an empty server.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All requests seen so far.
    #[must_use]
    pub fn requests(&self) -> Vec<SeenRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The stored file at `path`, e.g. `repo/keys/<id>`.
    #[must_use]
    pub fn file(&self, path: &str) -> Option<Bytes> {
        self.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .cloned()
    }

    fn list(files: &BTreeMap<String, Bytes>, dir: &str) -> Bytes {
        let entries: Vec<_> = files
            .range(dir.to_string()..)
            .take_while(|(path, _)| path.starts_with(dir))
            .filter_map(|(path, data)| {
                let name = &path[dir.len()..];
                (!name.contains('/')).then(|| json!({ "name": name, "size": data.len() }))
            })
            .collect();
        serde_json::to_vec(&entries).map_or_else(|_| Bytes::new(), Bytes::from)
    }

    fn range(request: &HttpRequest, data: &Bytes) -> Option<Bytes> {
        let (_, range) = request.headers.iter().find(|(name, _)| *name == "Range")?;
        let (start, end) = range.strip_prefix("bytes=")?.split_once('-')?;
        let start: usize = start.parse().ok()?;
        let end: usize = end.parse().ok()?;
        let end = (end + 1).min(data.len());
        Some(data.slice(start.min(end)..end))
    }
}

impl HttpTransport for MemoryRestTransport {
    fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let path = request.url.path().trim_start_matches('/').to_string();
        trace!("{} {path}", request.method);
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(SeenRequest {
                method: request.method.clone(),
                path: path.clone(),
                body_len: request.body_len(),
            });

        let mut files = self.files.lock().unwrap_or_else(PoisonError::into_inner);
        let not_found = HttpResponse::new(404, Bytes::new());
        let ok = |body| HttpResponse::new(200, body);

        let response = match request.method {
            Method::HEAD => files
                .get(&path)
                .map_or(not_found, |_| ok(Bytes::new())),
            Method::GET if path.is_empty() || path.ends_with('/') => ok(Self::list(&files, &path)),
            Method::GET => match files.get(&path) {
                Some(data) => ok(Self::range(&request, data).unwrap_or_else(|| data.clone())),
                None => not_found,
            },
            Method::POST if request.url.query() == Some("create=true") => ok(Bytes::new()),
            Method::POST => {
                _ = files.insert(path, request.body.unwrap_or_default());
                ok(Bytes::new())
            }
            Method::DELETE => files
                .remove(&path)
                .map_or(not_found, |_| ok(Bytes::new())),
            _ => HttpResponse::new(405, Bytes::new()),
        };
        Ok(response)
    }
}
