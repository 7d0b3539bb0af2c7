//! Named, process-wide binary signals shared with the worker.
//!
//! A signal is a pure wake-up: it carries no payload and touches no shared file.
//! Waiting consumes the signal, so each raise satisfies at most one wait.

use crate::config::{SIGNAL_DIR_NAME, SIGNAL_POLL_GRANULARITY};
use crate::error::ProtocolError;
use crate::model::SharedChannelConfig;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Upper bound on consumes performed by one reset, in case the other side keeps raising.
const MAX_DRAIN: usize = 1024;

/// An opened signal object. Dropping it releases the OS handle.
pub trait SignalHandle: Send + Sync {
    fn name(&self) -> &str;

    /// Set the signal.
    fn post(&self) -> Result<(), ProtocolError>;

    /// Consume the signal if it is set, without blocking.
    fn try_wait(&self) -> Result<bool, ProtocolError>;
}

/// A family of named signal objects (POSIX semaphores, marker files, ...).
pub trait SignalBackend: Send + Sync + fmt::Debug {
    /// Open an existing signal object. Fails with `SignalUnavailable` if nobody created it.
    fn open(&self, name: &str) -> Result<Box<dyn SignalHandle>, ProtocolError>;

    /// Create (or open) the signal object. This is the worker's side of the contract.
    fn create(&self, name: &str) -> Result<Box<dyn SignalHandle>, ProtocolError>;

    /// Remove the signal object name.
    fn unlink(&self, name: &str) -> Result<(), ProtocolError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum SignalBackendKind {
    /// POSIX named semaphores (unix only)
    Semaphore,
    /// Marker files in a shared directory
    File,
}

impl Default for SignalBackendKind {
    fn default() -> Self {
        if cfg!(unix) {
            SignalBackendKind::Semaphore
        } else {
            SignalBackendKind::File
        }
    }
}

/// Build the backend selected on the command line.
pub fn backend_for(
    kind: SignalBackendKind,
    signal_dir: Option<PathBuf>,
) -> anyhow::Result<Arc<dyn SignalBackend>> {
    match kind {
        SignalBackendKind::File => {
            let dir = signal_dir.unwrap_or_else(FileSignalBackend::default_dir);
            Ok(Arc::new(FileSignalBackend::new(dir)))
        }
        #[cfg(unix)]
        SignalBackendKind::Semaphore => Ok(Arc::new(posix::NamedSemaphoreBackend)),
        #[cfg(not(unix))]
        SignalBackendKind::Semaphore => Err(anyhow::anyhow!(
            "the semaphore signal backend is only available on unix; use --signal-backend file"
        )),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Signaled,
    TimedOut,
}

/// Wait until `handle` is set or `timeout` elapses, consuming the signal on success.
///
/// Suspends only the calling task. A zero timeout performs a single non-blocking check.
pub async fn wait_for(handle: &dyn SignalHandle, timeout: Duration) -> Result<WaitOutcome, ProtocolError> {
    let deadline = Instant::now() + timeout;
    loop {
        if handle.try_wait()? {
            return Ok(WaitOutcome::Signaled);
        }
        let now = Instant::now();
        if now >= deadline {
            return Ok(WaitOutcome::TimedOut);
        }
        tokio::time::sleep(SIGNAL_POLL_GRANULARITY.min(deadline - now)).await;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalId {
    Start,
    Completion,
}

/// The two protocol signals: the controller raises `Start` and waits on `Completion`;
/// the worker does the opposite.
#[derive(Debug, Clone)]
pub struct SignalChannel {
    backend: Arc<dyn SignalBackend>,
    start: String,
    completion: String,
}

impl SignalChannel {
    pub fn new(backend: Arc<dyn SignalBackend>, channel: &SharedChannelConfig) -> Self {
        Self {
            backend,
            start: channel.start_signal.clone(),
            completion: channel.completion_signal.clone(),
        }
    }

    pub fn name(&self, id: SignalId) -> &str {
        match id {
            SignalId::Start => &self.start,
            SignalId::Completion => &self.completion,
        }
    }

    pub fn backend(&self) -> &Arc<dyn SignalBackend> {
        &self.backend
    }

    pub fn open(&self, id: SignalId) -> Result<Box<dyn SignalHandle>, ProtocolError> {
        self.backend.open(self.name(id))
    }

    /// Open the signal, set it, release the handle.
    pub fn raise(&self, id: SignalId) -> Result<(), ProtocolError> {
        let handle = self.open(id)?;
        handle.post()?;
        debug!("raised signal {}", handle.name());
        Ok(())
    }

    pub async fn wait_for(&self, id: SignalId, timeout: Duration) -> Result<WaitOutcome, ProtocolError> {
        let handle = self.open(id)?;
        wait_for(handle.as_ref(), timeout).await
    }

    /// Consume any pending raise of `id`. Returns how many were drained.
    pub fn reset(&self, id: SignalId) -> Result<usize, ProtocolError> {
        let handle = self.open(id)?;
        drain(handle.as_ref())
    }
}

/// Consume every pending raise on an already opened handle.
pub fn drain(handle: &dyn SignalHandle) -> Result<usize, ProtocolError> {
    let mut drained = 0;
    while drained < MAX_DRAIN && handle.try_wait()? {
        drained += 1;
    }
    if drained > 0 {
        debug!("drained {} stale raise(s) of {}", drained, handle.name());
    }
    Ok(drained)
}

/// Reduce an OS signal name (`Global\ComputeEvent`, `/ComputeEvent`) to its bare form.
fn bare_name(name: &str) -> &str {
    let name = name.rsplit('\\').next().unwrap_or(name);
    name.trim_start_matches('/')
}

// ============================================================================
// File backend
// ============================================================================

/// Signals as marker files: `<dir>/<name>.sem` is the object, `<dir>/<name>.set`
/// the set state. Consuming is an atomic `remove_file`, so only one waiter wins.
#[derive(Debug, Clone)]
pub struct FileSignalBackend {
    dir: PathBuf,
}

impl FileSignalBackend {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn default_dir() -> PathBuf {
        dirs::runtime_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join(SIGNAL_DIR_NAME)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn paths(&self, name: &str) -> (PathBuf, PathBuf) {
        let stem: String = bare_name(name)
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        (
            self.dir.join(format!("{stem}.sem")),
            self.dir.join(format!("{stem}.set")),
        )
    }
}

struct FileSignalHandle {
    name: String,
    object: PathBuf,
    set: PathBuf,
}

impl SignalBackend for FileSignalBackend {
    fn open(&self, name: &str) -> Result<Box<dyn SignalHandle>, ProtocolError> {
        let (object, set) = self.paths(name);
        fs::metadata(&object).map_err(|source| ProtocolError::SignalUnavailable {
            name: name.to_string(),
            source,
        })?;
        Ok(Box::new(FileSignalHandle {
            name: name.to_string(),
            object,
            set,
        }))
    }

    fn create(&self, name: &str) -> Result<Box<dyn SignalHandle>, ProtocolError> {
        let (object, set) = self.paths(name);
        fs::create_dir_all(&self.dir)
            .and_then(|_| {
                fs::OpenOptions::new()
                    .write(true)
                    .create(true)
                    .truncate(false)
                    .open(&object)
            })
            .map_err(|source| ProtocolError::SignalFailed {
                name: name.to_string(),
                source,
            })?;
        Ok(Box::new(FileSignalHandle {
            name: name.to_string(),
            object,
            set,
        }))
    }

    fn unlink(&self, name: &str) -> Result<(), ProtocolError> {
        let (object, set) = self.paths(name);
        for path in [set, object] {
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(source) => {
                    return Err(ProtocolError::SignalFailed {
                        name: name.to_string(),
                        source,
                    })
                }
            }
        }
        Ok(())
    }
}

impl SignalHandle for FileSignalHandle {
    fn name(&self) -> &str {
        &self.name
    }

    fn post(&self) -> Result<(), ProtocolError> {
        // The object disappearing means the other side tore the channel down.
        fs::metadata(&self.object).map_err(|source| ProtocolError::SignalUnavailable {
            name: self.name.clone(),
            source,
        })?;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.set)
            .map(|_| ())
            .map_err(|source| ProtocolError::SignalFailed {
                name: self.name.clone(),
                source,
            })
    }

    fn try_wait(&self) -> Result<bool, ProtocolError> {
        match fs::remove_file(&self.set) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(ProtocolError::SignalFailed {
                name: self.name.clone(),
                source,
            }),
        }
    }
}

// ============================================================================
// POSIX named semaphore backend
// ============================================================================

#[cfg(unix)]
pub use posix::NamedSemaphoreBackend;

#[cfg(unix)]
mod posix {
    use super::{bare_name, SignalBackend, SignalHandle};
    use crate::error::ProtocolError;
    use std::ffi::CString;
    use std::io;

    /// POSIX named semaphores (`/<name>`), used as binary events.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct NamedSemaphoreBackend;

    struct SemaphoreHandle {
        name: String,
        sem: *mut libc::sem_t,
    }

    // sem_post/sem_trywait are thread-safe; the pointer is only released in Drop.
    unsafe impl Send for SemaphoreHandle {}
    unsafe impl Sync for SemaphoreHandle {}

    fn os_name(name: &str) -> Result<CString, ProtocolError> {
        CString::new(format!("/{}", bare_name(name))).map_err(|e| ProtocolError::SignalUnavailable {
            name: name.to_string(),
            source: io::Error::new(io::ErrorKind::InvalidInput, e),
        })
    }

    impl SignalBackend for NamedSemaphoreBackend {
        fn open(&self, name: &str) -> Result<Box<dyn SignalHandle>, ProtocolError> {
            let c_name = os_name(name)?;
            let sem = unsafe { libc::sem_open(c_name.as_ptr(), 0) };
            if sem == libc::SEM_FAILED {
                return Err(ProtocolError::SignalUnavailable {
                    name: name.to_string(),
                    source: io::Error::last_os_error(),
                });
            }
            Ok(Box::new(SemaphoreHandle {
                name: name.to_string(),
                sem,
            }))
        }

        fn create(&self, name: &str) -> Result<Box<dyn SignalHandle>, ProtocolError> {
            let c_name = os_name(name)?;
            let sem = unsafe {
                libc::sem_open(
                    c_name.as_ptr(),
                    libc::O_CREAT,
                    0o600 as libc::c_uint,
                    0 as libc::c_uint,
                )
            };
            if sem == libc::SEM_FAILED {
                return Err(ProtocolError::SignalFailed {
                    name: name.to_string(),
                    source: io::Error::last_os_error(),
                });
            }
            Ok(Box::new(SemaphoreHandle {
                name: name.to_string(),
                sem,
            }))
        }

        fn unlink(&self, name: &str) -> Result<(), ProtocolError> {
            let c_name = os_name(name)?;
            if unsafe { libc::sem_unlink(c_name.as_ptr()) } != 0 {
                let err = io::Error::last_os_error();
                if err.raw_os_error() != Some(libc::ENOENT) {
                    return Err(ProtocolError::SignalFailed {
                        name: name.to_string(),
                        source: err,
                    });
                }
            }
            Ok(())
        }
    }

    impl SignalHandle for SemaphoreHandle {
        fn name(&self) -> &str {
            &self.name
        }

        fn post(&self) -> Result<(), ProtocolError> {
            // Keep the semaphore binary: a second raise before the wait is a no-op.
            #[cfg(target_os = "linux")]
            {
                let mut value: libc::c_int = 0;
                if unsafe { libc::sem_getvalue(self.sem, &mut value) } == 0 && value > 0 {
                    return Ok(());
                }
            }
            if unsafe { libc::sem_post(self.sem) } != 0 {
                return Err(ProtocolError::SignalFailed {
                    name: self.name.clone(),
                    source: io::Error::last_os_error(),
                });
            }
            Ok(())
        }

        fn try_wait(&self) -> Result<bool, ProtocolError> {
            if unsafe { libc::sem_trywait(self.sem) } == 0 {
                return Ok(true);
            }
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::EAGAIN) | Some(libc::EINTR) => Ok(false),
                _ => Err(ProtocolError::SignalFailed {
                    name: self.name.clone(),
                    source: err,
                }),
            }
        }
    }

    impl Drop for SemaphoreHandle {
        fn drop(&mut self) {
            unsafe {
                libc::sem_close(self.sem);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn file_channel(dir: &TempDir) -> (SignalChannel, Arc<dyn SignalBackend>) {
        let backend: Arc<dyn SignalBackend> = Arc::new(FileSignalBackend::new(dir.path().join("signals")));
        let shared = SharedChannelConfig::in_dir(dir.path());
        (SignalChannel::new(backend.clone(), &shared), backend)
    }

    #[test]
    fn raise_without_worker_is_unavailable() {
        let dir = TempDir::new().unwrap();
        let (signals, _) = file_channel(&dir);
        let err = signals.raise(SignalId::Start).unwrap_err();
        assert!(matches!(err, ProtocolError::SignalUnavailable { .. }), "{err}");
    }

    #[tokio::test]
    async fn raise_is_consumed_by_exactly_one_wait() {
        let dir = TempDir::new().unwrap();
        let (signals, backend) = file_channel(&dir);
        let _worker_side = backend.create(signals.name(SignalId::Completion)).unwrap();

        signals.raise(SignalId::Completion).unwrap();
        let first = signals
            .wait_for(SignalId::Completion, Duration::from_millis(50))
            .await
            .unwrap();
        assert_eq!(first, WaitOutcome::Signaled);

        let second = signals
            .wait_for(SignalId::Completion, Duration::from_millis(30))
            .await
            .unwrap();
        assert_eq!(second, WaitOutcome::TimedOut);
    }

    #[tokio::test]
    async fn signals_are_independent() {
        let dir = TempDir::new().unwrap();
        let (signals, backend) = file_channel(&dir);
        let _start = backend.create(signals.name(SignalId::Start)).unwrap();
        let _done = backend.create(signals.name(SignalId::Completion)).unwrap();

        signals.raise(SignalId::Start).unwrap();
        let outcome = signals
            .wait_for(SignalId::Completion, Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(outcome, WaitOutcome::TimedOut);
        assert_eq!(
            signals.wait_for(SignalId::Start, Duration::ZERO).await.unwrap(),
            WaitOutcome::Signaled
        );
    }

    #[tokio::test]
    async fn reset_discards_stale_completion() {
        let dir = TempDir::new().unwrap();
        let (signals, backend) = file_channel(&dir);
        let worker = backend.create(signals.name(SignalId::Completion)).unwrap();
        worker.post().unwrap();

        assert_eq!(signals.reset(SignalId::Completion).unwrap(), 1);
        let outcome = signals
            .wait_for(SignalId::Completion, Duration::from_millis(20))
            .await
            .unwrap();
        assert_eq!(outcome, WaitOutcome::TimedOut);
    }

    #[test]
    fn windows_style_names_map_to_files() {
        let backend = FileSignalBackend::new("/tmp/x");
        let (object, set) = backend.paths("Global\\ComputeEvent");
        assert_eq!(object, PathBuf::from("/tmp/x/ComputeEvent.sem"));
        assert_eq!(set, PathBuf::from("/tmp/x/ComputeEvent.set"));
        assert_eq!(bare_name("/CompletionEvent"), "CompletionEvent");
    }

    #[test]
    fn unlink_removes_object() {
        let dir = TempDir::new().unwrap();
        let backend = FileSignalBackend::new(dir.path());
        backend.create("ComputeEvent").unwrap().post().unwrap();
        backend.unlink("ComputeEvent").unwrap();
        assert!(backend.open("ComputeEvent").is_err());
        // Unlinking twice is fine.
        backend.unlink("ComputeEvent").unwrap();
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn posix_semaphore_round_trip() {
        let backend = NamedSemaphoreBackend;
        let name = format!("compute-bench-test-{}", std::process::id());
        let _ = backend.unlink(&name);

        assert!(matches!(
            backend.open(&name).err(),
            Some(ProtocolError::SignalUnavailable { .. })
        ));

        let worker = backend.create(&name).unwrap();
        let controller = backend.open(&name).unwrap();
        controller.post().unwrap();
        controller.post().unwrap();

        assert_eq!(
            wait_for(worker.as_ref(), Duration::from_millis(50)).await.unwrap(),
            WaitOutcome::Signaled
        );
        // Binary: the second post before the wait did not accumulate.
        assert_eq!(
            wait_for(worker.as_ref(), Duration::from_millis(20)).await.unwrap(),
            WaitOutcome::TimedOut
        );

        drop(controller);
        drop(worker);
        backend.unlink(&name).unwrap();
    }
}
