//! The backend for repositories in a local directory.
use std::{
    fs::{self, File},
    io::{Read, Seek, SeekFrom, Write},
    num::TryFromIntError,
    path::{Path, PathBuf},
    process::{Command, ExitStatus},
    sync::Arc,
};

use aho_corasick::AhoCorasick;
use bytes::Bytes;
use log::{debug, trace, warn};
use walkdir::WalkDir;

use crate::{
    backend::{ALL_FILE_TYPES, FileType, ReadBackend, WriteBackend},
    config::{BackendConfig, LocalConfig},
    error::{ErrorKind, RusticError, RusticResult},
    id::Id,
    registry::{DriverContext, unexpected_config},
};

/// [`LocalBackendErrorKind`] describes the errors that can be returned by an action on the filesystem in Backends
#[derive(thiserror::Error, Debug, displaydoc::Display)]
#[non_exhaustive]
pub enum LocalBackendErrorKind {
    /// directory creation failed: `{0:?}`
    DirectoryCreationFailed(std::io::Error),
    /// querying metadata failed: `{0:?}`
    QueryingMetadataFailed(std::io::Error),
    /// querying WalkDir metadata failed: `{0:?}`
    QueryingWalkDirMetadataFailed(walkdir::Error),
    /// execution of command failed: `{0:?}`
    CommandExecutionFailed(std::io::Error),
    /// command was not successful for filename {file_name}, type {file_type}, id {id}: {status}
    CommandNotSuccessful {
        /// File name
        file_name: String,
        /// File type
        file_type: String,
        /// Item ID
        id: String,
        /// Exit status
        status: ExitStatus,
    },
    /// parsing the command `{command}` failed: `{source}`
    CommandParsingFailed {
        /// The command
        command: String,
        /// The cause
        source: shell_words::ParseError,
    },
    /// the command is empty
    EmptyCommand,
    /// error building automaton `{0:?}`
    FromAhoCorasick(aho_corasick::BuildError),
    /// {0:?}
    #[error(transparent)]
    FromTryIntError(TryFromIntError),
    /// removing file failed: `{0:?}`
    FileRemovalFailed(std::io::Error),
    /// opening file failed: `{0:?}`
    OpeningFileFailed(std::io::Error),
    /// setting file length failed: `{0:?}`
    SettingFileLengthFailed(std::io::Error),
    /// can't jump to position in file: `{0:?}`
    CouldNotSeekToPositionInFile(std::io::Error),
    /// couldn't write to buffer: `{0:?}`
    CouldNotWriteToBuffer(std::io::Error),
    /// reading file contents failed: `{0:?}`
    ReadingContentsOfFileFailed(std::io::Error),
    /// reading exact length of file contents failed: `{0:?}`
    ReadingExactLengthOfFileFailed(std::io::Error),
    /// failed to sync OS Metadata to disk: `{0:?}`
    SyncingOfOsMetadataFailed(std::io::Error),
}

impl From<LocalBackendErrorKind> for Box<RusticError> {
    fn from(err: LocalBackendErrorKind) -> Self {
        let kind = match &err {
            LocalBackendErrorKind::CommandExecutionFailed(_)
            | LocalBackendErrorKind::CommandNotSuccessful { .. }
            | LocalBackendErrorKind::CommandParsingFailed { .. }
            | LocalBackendErrorKind::EmptyCommand => ErrorKind::ExternalCommand,
            LocalBackendErrorKind::FromAhoCorasick(_)
            | LocalBackendErrorKind::FromTryIntError(_) => ErrorKind::Internal,
            _ => ErrorKind::InputOutput,
        };
        RusticError::with_source(
            kind,
            "Accessing the local repository failed. Please check the path and its permissions.",
            err,
        )
    }
}

/// A local backend.
#[derive(Clone, Debug)]
pub struct LocalBackend {
    /// The base path of the backend.
    path: PathBuf,
    /// The command to call after a file was created.
    post_create_command: Option<String>,
    /// The command to call after a file was deleted.
    post_delete_command: Option<String>,
}

/// Open a local backend; the directory is not accessed until the first operation.
// the signature is given by `ConstructFn`
#[allow(clippy::needless_pass_by_value)]
pub(crate) fn open(
    config: BackendConfig,
    _ctx: DriverContext,
) -> RusticResult<Arc<dyn WriteBackend>> {
    match config {
        BackendConfig::Local(cfg) => Ok(Arc::new(LocalBackend::new(cfg))),
        config => Err(unexpected_config("local", &config)),
    }
}

impl LocalBackend {
    /// Create a new [`LocalBackend`] from its configuration.
    #[must_use]
    pub fn new(config: LocalConfig) -> Self {
        Self {
            path: config.path,
            post_create_command: config.post_create_command,
            post_delete_command: config.post_delete_command,
        }
    }

    /// Path to the given file type and id.
    ///
    /// Pack files are stored in a subdirectory named by the first two hex digits of the id.
    fn path(&self, tpe: FileType, id: &Id) -> PathBuf {
        let hex_id = id.to_hex();
        match tpe {
            FileType::Config => self.path.join("config"),
            FileType::Pack => self.path.join("data").join(&hex_id[0..2]).join(hex_id),
            _ => self.path.join(tpe.dirname()).join(hex_id),
        }
    }

    /// Call the given command.
    ///
    /// The placeholders `%file`, `%type` and `%id` are replaced by the path of the file, the
    /// directory name of its type and its id.
    ///
    /// # Errors
    ///
    /// * If the command cannot be parsed or executed, or its exit status is not successful.
    fn call_command(tpe: FileType, id: &Id, filename: &Path, command: &str) -> RusticResult<()> {
        let id = id.to_hex();
        let filename = filename.to_string_lossy();
        let patterns = &["%file", "%type", "%id"];
        let ac = AhoCorasick::new(patterns).map_err(LocalBackendErrorKind::FromAhoCorasick)?;
        let replace_with = &[filename.as_ref(), tpe.dirname(), id.as_str()];
        let actual_command = ac.replace_all(command, replace_with);
        debug!("calling {actual_command}...");

        let args = shell_words::split(&actual_command).map_err(|source| {
            LocalBackendErrorKind::CommandParsingFailed {
                command: actual_command.clone(),
                source,
            }
        })?;
        let Some((program, args)) = args.split_first() else {
            return Err(LocalBackendErrorKind::EmptyCommand.into());
        };

        let status = Command::new(program)
            .args(args)
            .status()
            .map_err(LocalBackendErrorKind::CommandExecutionFailed)?;
        if !status.success() {
            return Err(LocalBackendErrorKind::CommandNotSuccessful {
                file_name: replace_with[0].to_owned(),
                file_type: replace_with[1].to_owned(),
                id: replace_with[2].to_owned(),
                status,
            }
            .into());
        }
        Ok(())
    }
}

impl ReadBackend for LocalBackend {
    /// Returns the location of the backend.
    ///
    /// This is `local:<path>`.
    fn location(&self) -> String {
        let mut location = "local:".to_string();
        location.push_str(&self.path.to_string_lossy());
        location
    }

    /// Lists all files of the given type.
    ///
    /// If the file type is `FileType::Config`, this will return a list with a single default id.
    fn list(&self, tpe: FileType) -> RusticResult<Vec<Id>> {
        trace!("listing tpe: {tpe:?}");
        if tpe == FileType::Config {
            return Ok(if self.path.join("config").exists() {
                vec![Id::default()]
            } else {
                Vec::new()
            });
        }

        let walker = WalkDir::new(self.path.join(tpe.dirname()))
            .into_iter()
            .filter_map(walkdir::Result::ok)
            .filter(|e| e.file_type().is_file())
            .filter_map(|e| e.file_name().to_string_lossy().parse::<Id>().ok());
        Ok(walker.collect())
    }

    /// Lists all files with their size of the given type.
    ///
    /// Entries whose name is no id are skipped.
    ///
    /// # Errors
    ///
    /// * If the metadata of a file cannot be queried or its size exceeds `u32`.
    fn list_with_size(&self, tpe: FileType) -> RusticResult<Vec<(Id, u32)>> {
        trace!("listing tpe: {tpe:?}");
        let path = self.path.join(tpe.dirname());

        if tpe == FileType::Config {
            return Ok(if path.exists() {
                vec![(
                    Id::default(),
                    path.metadata()
                        .map_err(LocalBackendErrorKind::QueryingMetadataFailed)?
                        .len()
                        .try_into()
                        .map_err(LocalBackendErrorKind::FromTryIntError)?,
                )]
            } else {
                Vec::new()
            });
        }

        let mut files = Vec::new();
        for entry in WalkDir::new(path)
            .into_iter()
            .filter_map(walkdir::Result::ok)
            .filter(|e| e.file_type().is_file())
        {
            let Ok(id) = entry.file_name().to_string_lossy().parse::<Id>() else {
                continue;
            };
            let size = entry
                .metadata()
                .map_err(LocalBackendErrorKind::QueryingWalkDirMetadataFailed)?
                .len()
                .try_into()
                .map_err(LocalBackendErrorKind::FromTryIntError)?;
            files.push((id, size));
        }

        Ok(files)
    }

    fn read_full(&self, tpe: FileType, id: &Id) -> RusticResult<Bytes> {
        trace!("reading tpe: {tpe:?}, id: {id}");
        Ok(fs::read(self.path(tpe, id))
            .map_err(LocalBackendErrorKind::ReadingContentsOfFileFailed)?
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
        let mut file =
            File::open(self.path(tpe, id)).map_err(LocalBackendErrorKind::OpeningFileFailed)?;
        _ = file
            .seek(SeekFrom::Start(offset.into()))
            .map_err(LocalBackendErrorKind::CouldNotSeekToPositionInFile)?;
        let mut vec = vec![
            0;
            length
                .try_into()
                .map_err(LocalBackendErrorKind::FromTryIntError)?
        ];
        file.read_exact(&mut vec)
            .map_err(LocalBackendErrorKind::ReadingExactLengthOfFileFailed)?;
        Ok(vec.into())
    }
}

impl WriteBackend for LocalBackend {
    /// Create the repository directories, including the 256 subdirectories of `data`.
    ///
    /// # Errors
    ///
    /// * If a directory could not be created.
    fn create(&self) -> RusticResult<()> {
        trace!("creating repo at {}", self.path.display());
        fs::create_dir_all(&self.path).map_err(LocalBackendErrorKind::DirectoryCreationFailed)?;

        for tpe in ALL_FILE_TYPES {
            fs::create_dir_all(self.path.join(tpe.dirname()))
                .map_err(LocalBackendErrorKind::DirectoryCreationFailed)?;
        }
        for i in 0u8..=255 {
            fs::create_dir_all(self.path.join("data").join(hex::encode([i])))
                .map_err(LocalBackendErrorKind::DirectoryCreationFailed)?;
        }
        Ok(())
    }

    /// Write the given bytes to the given file and call the post-create command.
    ///
    /// A failing post-create command is only logged.
    fn write_bytes(
        &self,
        tpe: FileType,
        id: &Id,
        _cacheable: bool,
        buf: Bytes,
    ) -> RusticResult<()> {
        trace!("writing tpe: {:?}, id: {}", &tpe, &id);
        let filename = self.path(tpe, id);
        let mut file = fs::OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(&filename)
            .map_err(LocalBackendErrorKind::OpeningFileFailed)?;
        file.set_len(
            buf.len()
                .try_into()
                .map_err(LocalBackendErrorKind::FromTryIntError)?,
        )
        .map_err(LocalBackendErrorKind::SettingFileLengthFailed)?;
        file.write_all(&buf)
            .map_err(LocalBackendErrorKind::CouldNotWriteToBuffer)?;
        file.sync_all()
            .map_err(LocalBackendErrorKind::SyncingOfOsMetadataFailed)?;
        if let Some(command) = &self.post_create_command {
            if let Err(err) = Self::call_command(tpe, id, &filename, command) {
                warn!("post-create: {err}");
            }
        }
        Ok(())
    }

    /// Remove the given file and call the post-delete command.
    fn remove(&self, tpe: FileType, id: &Id, _cacheable: bool) -> RusticResult<()> {
        trace!("removing tpe: {:?}, id: {}", &tpe, &id);
        let filename = self.path(tpe, id);
        fs::remove_file(&filename).map_err(LocalBackendErrorKind::FileRemovalFailed)?;
        if let Some(command) = &self.post_delete_command {
            if let Err(err) = Self::call_command(tpe, id, &filename, command) {
                warn!("post-delete: {err}");
            }
        }
        Ok(())
    }
}
