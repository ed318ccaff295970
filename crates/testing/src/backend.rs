use std::{
    collections::BTreeMap,
    sync::{PoisonError, RwLock},
};

use bytes::Bytes;
use enum_map::EnumMap;

use rustic_location::{
    ErrorKind, FileType, Id, ReadBackend, RusticError, RusticResult, WriteBackend,
};

/// In-Memory backend to be used for testing
#[derive(Debug)]
pub struct InMemoryBackend(RwLock<EnumMap<FileType, BTreeMap<Id, Bytes>>>);

impl InMemoryBackend {
    /// Create a new (empty) `InMemoryBackend`
    #[must_use]
    pub fn new() -> Self {
        Self(RwLock::new(EnumMap::from_fn(|_| BTreeMap::new())))
    }

    fn not_found(id: &Id) -> Box<RusticError> {
        RusticError::new(ErrorKind::Backend, "ID `{id}` does not exist.")
            .attach_context("id", id.to_string())
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadBackend for InMemoryBackend {
    fn location(&self) -> String {
        "test".to_string()
    }

    fn list_with_size(&self, tpe: FileType) -> RusticResult<Vec<(Id, u32)>> {
        let files = self.0.read().unwrap_or_else(PoisonError::into_inner);
        files[tpe]
            .iter()
            .map(|(id, bytes)| {
                let size = u32::try_from(bytes.len()).map_err(|err| {
                    RusticError::with_source(ErrorKind::Internal, "File `{id}` is too large.", err)
                        .attach_context("id", id.to_string())
                })?;
                Ok((*id, size))
            })
            .collect()
    }

    fn read_full(&self, tpe: FileType, id: &Id) -> RusticResult<Bytes> {
        self.0.read().unwrap_or_else(PoisonError::into_inner)[tpe]
            .get(id)
            .cloned()
            .ok_or_else(|| Self::not_found(id))
    }

    fn read_partial(
        &self,
        tpe: FileType,
        id: &Id,
        _cacheable: bool,
        offset: u32,
        length: u32,
    ) -> RusticResult<Bytes> {
        let data = self.read_full(tpe, id)?;
        let start = (offset as usize).min(data.len());
        let end = (start + length as usize).min(data.len());
        Ok(data.slice(start..end))
    }
}

impl WriteBackend for InMemoryBackend {
    fn create(&self) -> RusticResult<()> {
        Ok(())
    }

    fn write_bytes(
        &self,
        tpe: FileType,
        id: &Id,
        _cacheable: bool,
        buf: Bytes,
    ) -> RusticResult<()> {
        if self.0.write().unwrap_or_else(PoisonError::into_inner)[tpe]
            .insert(*id, buf)
            .is_some()
        {
            return Err(
                RusticError::new(ErrorKind::Backend, "ID `{id}` already exists.")
                    .attach_context("id", id.to_string()),
            );
        }

        Ok(())
    }

    fn remove(&self, tpe: FileType, id: &Id, _cacheable: bool) -> RusticResult<()> {
        if self.0.write().unwrap_or_else(PoisonError::into_inner)[tpe]
            .remove(id)
            .is_none()
        {
            return Err(Self::not_found(id));
        }
        Ok(())
    }
}
