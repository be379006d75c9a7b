//! Session management
//!
//! A [`Session`] owns a shell running under a pseudo-terminal. It exposes
//! the raw byte streams, keeps the shell's terminal size and signal state in
//! step with ours through two forwarder threads, and tears everything down
//! on [`Session::close`].

use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use portable_pty::ExitStatus;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::cancel::CancellationToken;
use super::pty::{self, Pty, PtyError, SpawnOptions};
use super::signals::Forwarder;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Failed to start session: {0}")]
    Spawn(#[from] PtyError),

    #[error("Failed to read from PTY: {0}")]
    Read(#[source] io::Error),

    #[error("Failed to write to PTY: {0}")]
    Write(#[source] io::Error),

    #[error("Session is closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, SessionError>;

impl From<SessionError> for io::Error {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Read(e) | SessionError::Write(e) => e,
            SessionError::Closed => io::Error::new(io::ErrorKind::BrokenPipe, "session is closed"),
            SessionError::Spawn(e) => io::Error::new(io::ErrorKind::Other, e),
        }
    }
}

/// How to start the shell.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Initial pty rows
    pub rows: u16,
    /// Initial pty columns
    pub cols: u16,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    /// Relay SIGHUP/SIGINT/SIGTERM to the shell
    pub forward_signals: bool,
    /// Copy our terminal size onto the pty on SIGWINCH
    pub follow_window_size: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        let spawn = SpawnOptions::default();
        Self {
            rows: spawn.rows,
            cols: spawn.cols,
            cwd: spawn.cwd,
            env: spawn.env,
            forward_signals: true,
            follow_window_size: true,
        }
    }
}

impl SessionOptions {
    fn spawn_options(&self) -> SpawnOptions {
        SpawnOptions {
            rows: self.rows,
            cols: self.cols,
            cwd: self.cwd.clone(),
            env: self.env.clone(),
        }
    }
}

/// A shell attached to a pseudo-terminal.
///
/// Cloning is cheap and every clone refers to the same shell; the session
/// is closed by the first [`Session::close`] or when the last clone drops.
#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

struct Inner {
    pty: Arc<Pty>,
    reader: Mutex<Box<dyn Read + Send>>,
    writer: Mutex<Option<Box<dyn Write + Send>>>,
    cancel: CancellationToken,
    forwarders: Mutex<Vec<Forwarder>>,
    closed: AtomicBool,
}

impl Session {
    /// Spawn `shell args...` with default options.
    pub fn open(shell: &str, args: &[String]) -> Result<Self> {
        Self::open_with(shell, args, &SessionOptions::default())
    }

    /// Spawn `shell args...` and start the background forwarders.
    pub fn open_with(shell: &str, args: &[String], options: &SessionOptions) -> Result<Self> {
        let (pty, streams) = Pty::spawn(shell, args, &options.spawn_options())?;
        let pty = Arc::new(pty);
        let cancel = CancellationToken::new();

        let forwarders = start_forwarders(&pty, &cancel, options);

        Ok(Self {
            inner: Arc::new(Inner {
                pty,
                reader: Mutex::new(streams.reader),
                writer: Mutex::new(Some(streams.writer)),
                cancel,
                forwarders: Mutex::new(forwarders),
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// Blocking read of raw shell output. `Ok(0)` means the shell is gone
    /// or the session was closed.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
        if self.is_closed() {
            return Ok(0);
        }

        let mut reader = self.inner.reader.lock();
        loop {
            match reader.read(buf) {
                Ok(_) if self.is_closed() => return Ok(0),
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if pty::is_end_of_stream(&e) => {
                    debug!("pty reached end of stream: {}", e);
                    return Ok(0);
                }
                Err(_) if self.is_closed() => return Ok(0),
                Err(e) => return Err(SessionError::Read(e)),
            }
        }
    }

    /// Blocking write of input bytes to the shell.
    pub fn write(&self, data: &[u8]) -> Result<usize> {
        let mut writer = self.inner.writer.lock();
        let writer = writer.as_mut().ok_or(SessionError::Closed)?;
        let n = writer.write(data).map_err(SessionError::Write)?;
        writer.flush().map_err(SessionError::Write)?;
        Ok(n)
    }

    /// Write the whole buffer.
    pub fn write_all(&self, data: &[u8]) -> Result<()> {
        let mut writer = self.inner.writer.lock();
        let writer = writer.as_mut().ok_or(SessionError::Closed)?;
        writer.write_all(data).map_err(SessionError::Write)?;
        writer.flush().map_err(SessionError::Write)
    }

    /// Resize the pty directly, independent of the resize forwarder.
    pub fn resize(&self, rows: u16, cols: u16) -> Result<()> {
        if self.is_closed() {
            return Err(SessionError::Closed);
        }
        self.inner.pty.resize(rows, cols)?;
        Ok(())
    }

    /// Current pty size as `(rows, cols)`.
    pub fn size(&self) -> Result<(u16, u16)> {
        if self.is_closed() {
            return Err(SessionError::Closed);
        }
        Ok(self.inner.pty.size()?)
    }

    pub fn pid(&self) -> Option<u32> {
        self.inner.pty.pid()
    }

    /// Exit status if the shell has already exited.
    pub fn try_wait(&self) -> io::Result<Option<ExitStatus>> {
        self.inner.pty.try_wait()
    }

    /// Block until the shell exits.
    pub fn wait(&self) -> io::Result<ExitStatus> {
        self.inner.pty.wait()
    }

    /// The session's cancellation token. Cancelled by [`Session::close`].
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.inner.cancel
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Cancel background work, close the pty and kill the shell's process
    /// tree. Idempotent; wakes a reader blocked in [`Session::read`].
    pub fn close(&self) {
        self.inner.close();
    }
}

impl Inner {
    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        self.cancel.cancel();
        self.writer.lock().take();
        self.pty.kill_tree();
        self.pty.close();

        for forwarder in self.forwarders.lock().drain(..) {
            let name = forwarder.name();
            forwarder.join();
            debug!(forwarder = name, "forwarder joined");
        }
        info!(pid = ?self.pty.pid(), "session closed");
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.close();
    }
}

impl Read for Session {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Session::read(self, buf).map_err(io::Error::from)
    }
}

impl Read for &Session {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Session::read(self, buf).map_err(io::Error::from)
    }
}

impl Write for Session {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Session::write(self, buf).map_err(io::Error::from)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Write for &Session {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Session::write(self, buf).map_err(io::Error::from)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(unix)]
fn start_forwarders(pty: &Arc<Pty>, cancel: &CancellationToken, options: &SessionOptions) -> Vec<Forwarder> {
    use super::signals::{spawn_resize_forwarder, spawn_signal_forwarder};

    let mut forwarders = Vec::with_capacity(2);
    if options.follow_window_size {
        match spawn_resize_forwarder(pty.clone(), cancel) {
            Ok(f) => forwarders.push(f),
            Err(e) => warn!("resize forwarding disabled: {}", e),
        }
    }
    if options.forward_signals {
        match spawn_signal_forwarder(pty.clone(), cancel) {
            Ok(f) => forwarders.push(f),
            Err(e) => warn!("signal forwarding disabled: {}", e),
        }
    }
    forwarders
}

#[cfg(not(unix))]
fn start_forwarders(_pty: &Arc<Pty>, _cancel: &CancellationToken, _options: &SessionOptions) -> Vec<Forwarder> {
    debug!("signal forwarding is not available on this platform");
    Vec::new()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::thread;
    use std::time::{Duration, Instant};

    fn quiet_options() -> SessionOptions {
        SessionOptions {
            forward_signals: false,
            follow_window_size: false,
            ..SessionOptions::default()
        }
    }

    fn read_until(session: &Session, needle: &str, timeout: Duration) -> String {
        let deadline = Instant::now() + timeout;
        let mut output = Vec::new();
        let mut buf = [0u8; 1024];
        while Instant::now() < deadline {
            match session.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    output.extend_from_slice(&buf[..n]);
                    if String::from_utf8_lossy(&output).contains(needle) {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
        String::from_utf8_lossy(&output).into_owned()
    }

    #[test]
    fn test_open_missing_shell_is_spawn_error() {
        let result = Session::open("/no/such/shell", &[]);
        assert!(matches!(result, Err(SessionError::Spawn(_))));
    }

    #[test]
    fn test_echo_round_trip() {
        let session = Session::open_with("/bin/sh", &[], &quiet_options()).unwrap();
        session.write_all(b"echo hello-world\n").unwrap();
        let out = read_until(&session, "hello-world\r\n", Duration::from_secs(5));
        assert!(out.contains("hello-world"), "output: {:?}", out);
        session.close();
    }

    #[test]
    fn test_read_reports_end_of_stream_when_shell_exits() {
        let session = Session::open_with(
            "/bin/sh",
            &["-c".to_string(), "printf done".to_string()],
            &quiet_options(),
        )
        .unwrap();
        let out = read_until(&session, "\u{0}", Duration::from_secs(5));
        assert!(out.contains("done"));
        let mut buf = [0u8; 16];
        assert_eq!(session.read(&mut buf).unwrap(), 0);
        session.close();
    }

    #[test]
    fn test_close_is_idempotent_and_blocks_io() {
        let session = Session::open_with("/bin/sh", &[], &quiet_options()).unwrap();
        session.close();
        session.close();
        assert!(session.is_closed());
        assert!(session.cancel_token().is_cancelled());
        assert!(matches!(session.write(b"x"), Err(SessionError::Closed)));
        let mut buf = [0u8; 8];
        assert_eq!(session.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_close_wakes_blocked_reader() {
        let session = Session::open_with(
            "/bin/sh",
            &["-c".to_string(), "sleep 30".to_string()],
            &quiet_options(),
        )
        .unwrap();
        let reader = {
            let session = session.clone();
            thread::spawn(move || {
                let mut buf = [0u8; 64];
                loop {
                    match session.read(&mut buf) {
                        Ok(0) | Err(_) => return,
                        Ok(_) => continue,
                    }
                }
            })
        };
        thread::sleep(Duration::from_millis(100));
        session.close();
        reader.join().unwrap();
    }

    #[test]
    fn test_try_wait_reports_exit() {
        let session = Session::open_with(
            "/bin/sh",
            &["-c".to_string(), "exit 3".to_string()],
            &quiet_options(),
        )
        .unwrap();
        let status = session.wait().unwrap();
        assert_eq!(status.exit_code(), 3);
        let polled = session.try_wait().unwrap();
        assert_eq!(polled.map(|s| s.exit_code()), Some(3));
        session.close();
    }

    #[test]
    fn test_resize_after_close_fails() {
        let session = Session::open_with("/bin/sh", &[], &quiet_options()).unwrap();
        session.resize(30, 100).unwrap();
        assert_eq!(session.size().unwrap(), (30, 100));
        session.close();
        assert!(matches!(session.resize(30, 100), Err(SessionError::Closed)));
    }
}
