//! Backends built on top of an `OpenDAL` operator.
pub mod sftp;

use std::{
    collections::HashMap,
    path::PathBuf,
    sync::OnceLock,
};

use bytes::Bytes;
use log::trace;
use opendal::{
    BlockingOperator, Metakey, Operator, Scheme,
    layers::{BlockingLayer, ConcurrentLimitLayer, LoggingLayer, RetryLayer},
};
use rayon::prelude::{IntoParallelIterator, ParallelIterator};
use tokio::runtime::Runtime;

use crate::{
    backend::{ALL_FILE_TYPES, FileType, ReadBackend, WriteBackend},
    error::{ErrorKind, RusticError, RusticResult},
    id::Id,
};

mod consts {
    /// Default number of retries
    pub(super) const DEFAULT_RETRY: usize = 5;
}

/// A backend using a blocking `OpenDAL` operator.
#[derive(Clone, Debug)]
pub struct OpenDALBackend {
    operator: BlockingOperator,
    /// The location shown to users, without credentials
    location: String,
}

/// The runtime driving the async operators behind the blocking layer.
fn runtime() -> RusticResult<&'static Runtime> {
    static RUNTIME: OnceLock<Runtime> = OnceLock::new();
    if let Some(runtime) = RUNTIME.get() {
        return Ok(runtime);
    }
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| {
            RusticError::with_source(
                ErrorKind::Internal,
                "Could not start the runtime for the OpenDAL backend.",
                err,
            )
        })?;
    // another thread may have won the race, its runtime is used then
    _ = RUNTIME.set(runtime);
    RUNTIME.get().ok_or_else(|| {
        RusticError::new(
            ErrorKind::Internal,
            "The runtime for the OpenDAL backend is not initialized.",
        )
    })
}

fn opendal_error(err: opendal::Error, guidance: &'static str) -> Box<RusticError> {
    RusticError::with_source(ErrorKind::Backend, guidance, err)
}

impl OpenDALBackend {
    /// Create a new `OpenDAL` backend.
    ///
    /// # Arguments
    ///
    /// * `scheme` - The `OpenDAL` service to use.
    /// * `location` - The redacted location, used for [`ReadBackend::location`].
    /// * `options` - The configuration of the service.
    /// * `connections` - The maximum number of concurrent requests.
    ///
    /// # Errors
    ///
    /// * If the operator cannot be built.
    pub fn new(
        scheme: Scheme,
        location: String,
        options: HashMap<String, String>,
        connections: usize,
    ) -> RusticResult<Self> {
        let mut operator = Operator::via_map(scheme, options)
            .map_err(|err| {
                opendal_error(err, "Could not configure the OpenDAL backend `{location}`.")
                    .attach_context("location", location.clone())
            })?
            .layer(
                RetryLayer::new()
                    .with_max_times(consts::DEFAULT_RETRY)
                    .with_jitter(),
            );

        if connections > 0 {
            operator = operator.layer(ConcurrentLimitLayer::new(connections));
        }

        let _guard = runtime()?.enter();
        let operator = operator
            .layer(LoggingLayer::default())
            .layer(
                BlockingLayer::create()
                    .map_err(|err| opendal_error(err, "Could not create the blocking layer."))?,
            )
            .blocking();

        Ok(Self { operator, location })
    }

    fn path(tpe: FileType, id: &Id) -> String {
        let hex_id = id.to_hex();
        match tpe {
            FileType::Config => PathBuf::from("config"),
            FileType::Pack => PathBuf::from("data").join(&hex_id[0..2]).join(hex_id),
            _ => PathBuf::from(tpe.dirname()).join(hex_id),
        }
        .to_string_lossy()
        .to_string()
    }
}

impl ReadBackend for OpenDALBackend {
    fn location(&self) -> String {
        self.location.clone()
    }

    /// Lists all files of the given type.
    ///
    /// If the file type is `FileType::Config`, this will return a list with a single default id.
    fn list(&self, tpe: FileType) -> RusticResult<Vec<Id>> {
        trace!("listing tpe: {tpe:?}");
        if tpe == FileType::Config {
            return Ok(
                if self
                    .operator
                    .is_exist("config")
                    .map_err(|err| opendal_error(err, "Checking for the config file failed."))?
                {
                    vec![Id::default()]
                } else {
                    Vec::new()
                },
            );
        }

        Ok(self
            .operator
            .list_with(&(tpe.dirname().to_string() + "/"))
            .recursive(true)
            .call()
            .map_err(|err| opendal_error(err, "Listing files failed."))?
            .into_iter()
            .filter(|e| e.metadata().is_file())
            .filter_map(|e| Id::from_hex(e.name()).ok())
            .collect())
    }

    fn list_with_size(&self, tpe: FileType) -> RusticResult<Vec<(Id, u32)>> {
        trace!("listing tpe: {tpe:?}");
        if tpe == FileType::Config {
            return match self.operator.stat("config") {
                Ok(entry) => Ok(vec![(
                    Id::default(),
                    entry.content_length().try_into().map_err(|err| {
                        RusticError::with_source(
                            ErrorKind::Internal,
                            "The size of the config file exceeds `u32`.",
                            err,
                        )
                    })?,
                )]),
                Err(err) if err.kind() == opendal::ErrorKind::NotFound => Ok(Vec::new()),
                Err(err) => Err(opendal_error(err, "Querying the config file failed.")),
            };
        }

        Ok(self
            .operator
            .list_with(&(tpe.dirname().to_string() + "/"))
            .recursive(true)
            .metakey(Metakey::ContentLength)
            .call()
            .map_err(|err| opendal_error(err, "Listing files failed."))?
            .into_iter()
            .filter(|e| e.metadata().is_file())
            .filter_map(|e| {
                Some((
                    Id::from_hex(e.name()).ok()?,
                    e.metadata().content_length().try_into().ok()?,
                ))
            })
            .collect())
    }

    fn read_full(&self, tpe: FileType, id: &Id) -> RusticResult<Bytes> {
        trace!("reading tpe: {tpe:?}, id: {id}");

        Ok(self
            .operator
            .read(&Self::path(tpe, id))
            .map_err(|err| opendal_error(err, "Reading the file failed."))?
            .into())
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
        let range = u64::from(offset)..u64::from(offset) + u64::from(length);
        Ok(self
            .operator
            .read_with(&Self::path(tpe, id))
            .range(range)
            .call()
            .map_err(|err| opendal_error(err, "Reading the file failed."))?
            .into())
    }
}

impl WriteBackend for OpenDALBackend {
    fn create(&self) -> RusticResult<()> {
        trace!("creating repo at {}", self.location);

        for tpe in ALL_FILE_TYPES {
            self.operator
                .create_dir(&(tpe.dirname().to_string() + "/"))
                .map_err(|err| opendal_error(err, "Creating a directory failed."))?;
        }
        // creating 256 dirs can be slow on remote backends, hence we parallelize it.
        (0u8..=255)
            .into_par_iter()
            .try_for_each(|i| {
                self.operator
                    .create_dir(&format!("data/{}/", hex::encode([i])))
            })
            .map_err(|err| opendal_error(err, "Creating a directory failed."))?;

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
        self.operator
            .write(&Self::path(tpe, id), buf)
            .map_err(|err| opendal_error(err, "Writing the file failed."))?;
        Ok(())
    }

    fn remove(&self, tpe: FileType, id: &Id, _cacheable: bool) -> RusticResult<()> {
        trace!("removing tpe: {:?}, id: {}", &tpe, &id);
        self.operator
            .delete(&Self::path(tpe, id))
            .map_err(|err| opendal_error(err, "Removing the file failed."))?;
        Ok(())
    }
}
