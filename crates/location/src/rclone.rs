//! The backend using `rclone serve restic` to access an rclone remote.
use std::{
    io::{BufRead, BufReader},
    process::{Child, ChildStderr, Command, Stdio},
    sync::{
        Arc,
        mpsc::{self, RecvTimeoutError, Sender},
    },
    thread::{self, JoinHandle},
    time::Instant,
};

use bytes::Bytes;
use log::{debug, info, warn};
use rand::{
    distr::{Alphanumeric, SampleString},
    rng,
};
use semver::{BuildMetadata, Prerelease, Version, VersionReq};

use crate::{
    backend::{FileType, ReadBackend, WriteBackend},
    config::{self, BackendConfig, RcloneConfig},
    error::{ErrorKind, RusticError, RusticResult},
    id::Id,
    registry::{DriverContext, unexpected_config},
    rest::RestBackend,
};

pub(super) mod constants {
    use std::time::Duration;

    /// The default command called if no other is specified
    pub(super) const DEFAULT_COMMAND: &str = "rclone serve restic --addr localhost:0";
    /// The string to search for in the rclone output.
    pub(super) const SEARCHSTRING: &str = "Serving restic REST API on ";
    /// How often to check for cancellation while waiting for rclone
    pub(super) const POLL_INTERVAL: Duration = Duration::from_millis(100);
}

/// The running rclone process; killed when dropped.
#[derive(Debug)]
struct RcloneProcess {
    child: Child,
    /// The [`JoinHandle`] of the thread printing rclone's output
    handle: Option<JoinHandle<()>>,
}

impl Drop for RcloneProcess {
    fn drop(&mut self) {
        debug!("killing rclone.");
        if let Err(err) = self.child.kill() {
            warn!("failed to kill rclone: {err}");
        }
        _ = self.child.wait();
        if let Some(Err(_)) = self.handle.take().map(JoinHandle::join) {
            warn!("the thread logging rclone's output panicked");
        }
    }
}

/// `RcloneBackend` is a backend that uses rclone to access a remote backend.
#[derive(Debug)]
pub struct RcloneBackend {
    /// The REST backend.
    rest: RestBackend,
    /// The rclone remote.
    remote: String,
    /// The rclone process, killed when the backend is dropped.
    _process: RcloneProcess,
}

/// Check the rclone version.
///
/// # Arguments
///
/// * `rclone_version_output` - The output of `rclone version`.
///
/// # Errors
///
/// * If the rclone version could not be determined or parsed.
/// * If the rclone version is not supported.
fn check_clone_version(rclone_version_output: &[u8]) -> RusticResult<()> {
    let rclone_version = std::str::from_utf8(rclone_version_output)
        .map_err(|err| {
            RusticError::with_source(
                ErrorKind::Internal,
                "Expected rclone version to be valid utf8, but it was not. Please check the `rclone version` output manually.",
                err
            )
        })?
        .lines()
        .next()
        .ok_or_else(|| {
            RusticError::new(
                ErrorKind::Internal,
                "Expected rclone version to have at least one line, but it did not. Please check the `rclone version` output manually.",
            )
        })?
        .trim_start_matches(|c: char| !c.is_numeric());

    let mut parsed_version = Version::parse(rclone_version).map_err(|err| {
        RusticError::with_source(ErrorKind::Internal,
            "Error parsing rclone version `{version}`. Please check the `rclone version` output manually.",
            err)
            .attach_context("version", rclone_version)
    })?;

    // pre-releases of a supported version are fine
    parsed_version.pre = Prerelease::EMPTY;
    parsed_version.build = BuildMetadata::EMPTY;

    // rclone < 1.52.2 ignores user/password given via env variables and would serve the
    // repository without authentication
    if VersionReq::parse("<1.52.2")
        .map_err(|err| {
            RusticError::with_source(
                ErrorKind::Internal,
                "Error parsing version requirement. This should not happen.",
                err,
            )
        })?
        .matches(&parsed_version)
    {
        return Err(RusticError::new(
            ErrorKind::Unsupported,
            "Unsupported rclone version `{version}`. We must not use rclone without authentication! Please upgrade to rclone >= 1.52.2!",
        )
        .attach_context("version", rclone_version.to_string()));
    }

    Ok(())
}

/// Run `rclone version` and check the result.
fn check_installed_version() -> RusticResult<()> {
    let output = Command::new("rclone")
        .arg("version")
        .output()
        .map_err(|err| RusticError::with_source(
            ErrorKind::ExternalCommand,
            "Experienced an error while running `rclone version` command. Please check if rclone is installed correctly and is in your PATH.",
            err
        ))?;
    check_clone_version(&output.stdout)
}

/// Log rclone's output; the first line announcing the REST API is sent to `url`.
fn log_output(stderr: ChildStderr, url: Sender<String>) {
    let mut url = Some(url);
    let mut stderr = BufReader::new(stderr);
    loop {
        let mut line = String::new();
        match stderr.read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {}
            Err(err) => {
                warn!("error reading rclone output: {err}");
                break;
            }
        }

        match (line.find(constants::SEARCHSTRING), url.take()) {
            (Some(pos), Some(sender)) => {
                let found = &line[pos + constants::SEARCHSTRING.len()..];
                // rclone > 1.61 adds brackets around the url
                let brackets: &[_] = &['[', ']'];
                _ = sender.send(found.trim_end().trim_matches(brackets).to_string());
            }
            (_, sender) => {
                url = sender;
                if !line.trim().is_empty() {
                    info!("rclone output: {}", line.trim_end());
                }
            }
        }
    }
}

/// Open an rclone backend; the REST requests are sent through the transport of `ctx`.
// the signature is given by `ConstructFn`
#[allow(clippy::needless_pass_by_value)]
pub(crate) fn open(
    config: BackendConfig,
    ctx: DriverContext,
) -> RusticResult<Arc<dyn WriteBackend>> {
    match config {
        BackendConfig::Rclone(cfg) => Ok(Arc::new(RcloneBackend::new(&cfg, &ctx)?)),
        config => Err(unexpected_config("rclone", &config)),
    }
}

impl RcloneBackend {
    /// Start rclone and create a [`RcloneBackend`] talking to it.
    ///
    /// # Errors
    ///
    /// * If the rclone version is not supported.
    /// * If rclone cannot be started or exits before serving the REST API.
    /// * If rclone does not serve the REST API within the configured timeout.
    /// * If `ctx` is cancelled while waiting for rclone.
    /// * If the served URL does not start with `http://`.
    pub fn new(cfg: &RcloneConfig, ctx: &DriverContext) -> RusticResult<Self> {
        let transport = ctx.require_transport("rclone")?;

        if cfg.use_password && cfg.command.is_none() {
            check_installed_version()?;
        }

        let command_line = cfg.command.as_deref().unwrap_or(constants::DEFAULT_COMMAND);
        let mut args = shell_words::split(command_line).map_err(|err| {
            RusticError::with_source(
                ErrorKind::InvalidInput,
                "Expected rclone command `{command}` to be valid, but it was not. Please check the `rclone.command` option.",
                err,
            )
            .attach_context("command", command_line)
        })?;
        if args.is_empty() {
            return Err(RusticError::new(
                ErrorKind::InvalidInput,
                "The rclone command is empty. Please check the `rclone.command` option.",
            ));
        }
        let program = args.remove(0);
        args.push(cfg.remote.clone());
        debug!("starting rclone via {program} {args:?}");

        let mut command = Command::new(&program);
        let user = Alphanumeric.sample_string(&mut rng(), 12);
        let password = Alphanumeric.sample_string(&mut rng(), 12);
        if cfg.use_password {
            _ = command
                .env("RCLONE_USER", &user)
                .env("RCLONE_PASS", &password);
        }

        let mut child = command
            .args(&args)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| {
                RusticError::with_source(
                    ErrorKind::ExternalCommand,
                    "Experienced an error while running rclone: `{rclone_command}`. Please check if rclone is installed and working correctly.",
                    err,
                )
                .attach_context("rclone_command", command_line)
            })?;

        let stderr = child.stderr.take();
        let (sender, receiver) = mpsc::channel();
        let handle = stderr.map(|stderr| thread::spawn(move || log_output(stderr, sender)));
        let mut process = RcloneProcess { child, handle };

        let mut rest_url = match &cfg.rest_url {
            Some(url) => url.clone(),
            None => {
                let deadline = Instant::now() + cfg.timeout;
                loop {
                    if ctx.cancel.is_cancelled() {
                        return Err(RusticError::new(
                            ErrorKind::Cancelled,
                            "Starting rclone was cancelled.",
                        ));
                    }
                    match receiver.recv_timeout(constants::POLL_INTERVAL) {
                        Ok(url) => break url,
                        Err(RecvTimeoutError::Timeout) => {}
                        // rclone closed its output
                        Err(RecvTimeoutError::Disconnected) => {
                            thread::sleep(constants::POLL_INTERVAL);
                        }
                    }
                    let status = process.child.try_wait().map_err(|err| {
                        RusticError::with_source(
                            ErrorKind::ExternalCommand,
                            "Experienced an error while running rclone. Please check if rclone is installed and working correctly.",
                            err,
                        )
                    })?;
                    if let Some(status) = status {
                        return Err(RusticError::new(
                            ErrorKind::ExternalCommand,
                            "rclone exited before it could start the REST server: `{exit_status}`. Please check the exit status for more information.",
                        )
                        .attach_context("exit_status", status.to_string()));
                    }
                    if Instant::now() >= deadline {
                        return Err(RusticError::new(
                            ErrorKind::ExternalCommand,
                            "rclone did not serve the REST API within {timeout}. Please check the rclone output or increase `rclone.timeout`.",
                        )
                        .attach_context(
                            "timeout",
                            humantime::format_duration(cfg.timeout).to_string(),
                        ));
                    }
                }
            }
        };

        if cfg.use_password {
            let Some(address) = rest_url.strip_prefix("http://") else {
                return Err(RusticError::new(
                    ErrorKind::InputOutput,
                    "Please make sure, the URL `{url}` starts with 'http://'!",
                )
                .attach_context("url", rest_url));
            };
            rest_url = format!("http://{user}:{password}@{address}");
        }

        let rest_cfg = match config::rest::parse(&format!("rest:{rest_url}"))? {
            BackendConfig::Rest(mut rest_cfg) => {
                rest_cfg.connections = cfg.connections;
                rest_cfg
            }
            config => return Err(unexpected_config("rest", &config)),
        };
        debug!(
            "using REST backend with url {}.",
            config::rest::redact_url(&rest_cfg.url)
        );

        Ok(Self {
            rest: RestBackend::new(rest_cfg, transport),
            remote: cfg.remote.clone(),
            _process: process,
        })
    }
}

impl ReadBackend for RcloneBackend {
    fn location(&self) -> String {
        "rclone:".to_string() + &self.remote
    }

    fn list_with_size(&self, tpe: FileType) -> RusticResult<Vec<(Id, u32)>> {
        self.rest.list_with_size(tpe)
    }

    fn read_full(&self, tpe: FileType, id: &Id) -> RusticResult<Bytes> {
        self.rest.read_full(tpe, id)
    }

    fn read_partial(
        &self,
        tpe: FileType,
        id: &Id,
        cacheable: bool,
        offset: u32,
        length: u32,
    ) -> RusticResult<Bytes> {
        self.rest.read_partial(tpe, id, cacheable, offset, length)
    }

    fn is_async_incompatible(&self) -> bool {
        self.rest.is_async_incompatible()
    }
}

impl WriteBackend for RcloneBackend {
    fn create(&self) -> RusticResult<()> {
        self.rest.create()
    }

    fn write_bytes(&self, tpe: FileType, id: &Id, cacheable: bool, buf: Bytes) -> RusticResult<()> {
        self.rest.write_bytes(tpe, id, cacheable, buf)
    }

    fn remove(&self, tpe: FileType, id: &Id, cacheable: bool) -> RusticResult<()> {
        self.rest.remove(tpe, id, cacheable)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(b"rclone v1.52.2\n- os/arch: linux/amd64\n- go version: go1.14.4\n")]
    #[case(b"rclone v1.66.0\n- os/version: Microsoft Windows 11 Pro 23H2 (64 bit)\n- os/kernel: 10.0.22631.3155 (x86_64)\n- os/type: windows\n- os/arch: amd64\n- go/version: go1.22.1\n- go/linking: static\n- go/tags: cmount")]
    #[case(b"rclone v1.63.0-beta.7022.e649cf4d5\n- os/arch: linux/amd64\n- go version: go1.14.4\n")]
    fn test_check_clone_version_passes(#[case] rclone_version_output: &[u8]) {
        assert!(check_clone_version(rclone_version_output).is_ok());
    }

    #[rstest]
    #[case(b"")]
    #[case(b"rclone v1.52.1\n- os/arch: linux/amd64\n- go version: go1.14.4\n")]
    #[case(b"rclone v1.51.3-beta\n- os/arch: linux/amd64\n- go version: go1.14.4\n")]
    fn test_check_clone_version_fails(#[case] rclone_version_output: &[u8]) {
        assert!(check_clone_version(rclone_version_output).is_err());
    }

    #[cfg(unix)]
    mod process {
        use std::time::Duration;

        use tokio_util::sync::CancellationToken;

        use crate::transport::{HttpRequest, HttpResponse, HttpTransport, TransportError};

        use super::super::*;

        #[derive(Debug)]
        struct NoTransport;

        impl HttpTransport for NoTransport {
            fn send(&self, _: HttpRequest) -> Result<HttpResponse, TransportError> {
                Err(TransportError::Unavailable("no server".to_string()))
            }
        }

        fn config(command: &str) -> RcloneConfig {
            let BackendConfig::Rclone(mut cfg) =
                config::rclone::parse("rclone:remote:repo").unwrap()
            else {
                panic!("expected rclone config");
            };
            cfg.command = Some(command.to_string());
            cfg.timeout = Duration::from_secs(5);
            cfg
        }

        fn ctx() -> DriverContext {
            DriverContext {
                transport: Some(Arc::new(NoTransport)),
                cancel: CancellationToken::new(),
            }
        }

        #[test]
        fn test_url_is_read_from_output() {
            let cfg = config(
                "sh -c 'echo starting >&2; echo \"Serving restic REST API on [http://127.0.0.1:4242/]\" >&2; exec sleep 10'",
            );
            let be = RcloneBackend::new(&cfg, &ctx()).unwrap();
            assert_eq!(be.location(), "rclone:remote:repo");
            assert!(be.is_async_incompatible());
        }

        #[test]
        fn test_early_exit_fails() {
            let err = RcloneBackend::new(&config("sh -c 'exit 3'"), &ctx()).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::ExternalCommand);
        }

        #[test]
        fn test_waiting_times_out() {
            let mut cfg = config("sh -c 'exec sleep 10'");
            cfg.timeout = Duration::from_millis(300);
            let err = RcloneBackend::new(&cfg, &ctx()).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::ExternalCommand);
        }

        #[test]
        fn test_waiting_is_cancelled() {
            let ctx = ctx();
            ctx.cancel.cancel();
            let err = RcloneBackend::new(&config("sh -c 'exec sleep 10'"), &ctx).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Cancelled);
        }

        #[test]
        fn test_password_needs_http_url() {
            let mut cfg = config("sh -c 'exec sleep 10'");
            cfg.rest_url = Some("https://127.0.0.1:4242/".to_string());
            let err = RcloneBackend::new(&cfg, &ctx()).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InputOutput);

            cfg.use_password = false;
            assert!(RcloneBackend::new(&cfg, &ctx()).is_ok());
        }

        #[test]
        fn test_generated_credentials_are_not_printed() {
            let mut cfg = config("sh -c 'exec sleep 10'");
            cfg.use_password = true;
            cfg.rest_url = Some("http://127.0.0.1:4242/".to_string());
            let be = RcloneBackend::new(&cfg, &ctx()).unwrap();

            let debug = format!("{be:?}");
            assert!(debug.contains(":***@127.0.0.1:4242/"), "{debug}");
        }

        #[test]
        fn test_empty_command_fails() {
            let err = RcloneBackend::new(&config("  "), &ctx()).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidInput);
        }
    }
}
