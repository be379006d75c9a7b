//! Pseudo-terminal wrapper
//!
//! Allocates a pty pair through `portable-pty`, spawns the shell on the
//! slave side and keeps the master side for resizing. The byte streams are
//! handed out once at spawn time so reads and writes never contend with
//! resize or kill on a lock.

use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use portable_pty::{native_pty_system, Child, ChildKiller, CommandBuilder, ExitStatus, MasterPty, PtySize};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum PtyError {
    #[error("Failed to allocate pseudo terminal: {0}")]
    Open(#[source] anyhow::Error),

    #[error("Failed to spawn `{shell}`: {source}")]
    Spawn {
        shell: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Failed to open pty stream: {0}")]
    Stream(#[source] anyhow::Error),

    #[error("Failed to resize pseudo terminal: {0}")]
    Resize(#[source] anyhow::Error),

    #[error("Failed to signal process {pid}: {source}")]
    Signal {
        pid: u32,
        #[source]
        source: io::Error,
    },

    #[error("Pseudo terminal is closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, PtyError>;

/// What to run and how big the terminal starts out.
#[derive(Debug, Clone)]
pub struct SpawnOptions {
    pub rows: u16,
    pub cols: u16,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
}

impl Default for SpawnOptions {
    fn default() -> Self {
        Self {
            rows: 24,
            cols: 80,
            cwd: None,
            env: vec![("TERM".to_string(), "xterm-256color".to_string())],
        }
    }
}

/// Byte streams of a freshly spawned pty.
pub struct PtyStreams {
    pub reader: Box<dyn Read + Send>,
    pub writer: Box<dyn Write + Send>,
}

/// Master side of a pty plus the child process attached to it.
pub struct Pty {
    master: Mutex<Option<Box<dyn MasterPty + Send>>>,
    child: Mutex<Box<dyn Child + Send + Sync>>,
    killer: Mutex<Box<dyn ChildKiller + Send + Sync>>,
    pid: Option<u32>,
    /// Set once the child has been reaped; its pid may be reused after that.
    exited: AtomicBool,
}

impl Pty {
    /// Allocate a pty and start `shell args...` on it.
    pub fn spawn(shell: &str, args: &[String], options: &SpawnOptions) -> Result<(Self, PtyStreams)> {
        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows: options.rows,
                cols: options.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(PtyError::Open)?;

        let mut cmd = CommandBuilder::new(shell);
        cmd.args(args);
        if let Some(cwd) = &options.cwd {
            cmd.cwd(cwd);
        }
        for (key, value) in &options.env {
            cmd.env(key, value);
        }

        let child = pair.slave.spawn_command(cmd).map_err(|source| PtyError::Spawn {
            shell: shell.to_string(),
            source,
        })?;
        // The child holds its own copy of the slave; ours would keep the
        // master readable after the shell exits.
        drop(pair.slave);

        let reader = pair.master.try_clone_reader().map_err(PtyError::Stream)?;
        let writer = pair.master.take_writer().map_err(PtyError::Stream)?;
        let killer = child.clone_killer();
        let pid = child.process_id();

        info!(shell, ?args, ?pid, rows = options.rows, cols = options.cols, "spawned shell");

        Ok((
            Self {
                master: Mutex::new(Some(pair.master)),
                child: Mutex::new(child),
                killer: Mutex::new(killer),
                pid,
                exited: AtomicBool::new(false),
            },
            PtyStreams { reader, writer },
        ))
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn live_pid(&self) -> Option<u32> {
        if self.exited.load(Ordering::SeqCst) {
            None
        } else {
            self.pid
        }
    }

    /// Push a new size onto the pty.
    pub fn resize(&self, rows: u16, cols: u16) -> Result<()> {
        let master = self.master.lock();
        let master = master.as_ref().ok_or(PtyError::Closed)?;
        master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(PtyError::Resize)
    }

    /// Current pty size as (rows, cols).
    pub fn size(&self) -> Result<(u16, u16)> {
        let master = self.master.lock();
        let master = master.as_ref().ok_or(PtyError::Closed)?;
        let size = master.get_size().map_err(PtyError::Resize)?;
        Ok((size.rows, size.cols))
    }

    /// Deliver `signal` to the child process.
    #[cfg(unix)]
    pub fn signal(&self, signal: libc::c_int) -> Result<()> {
        let pid = self.live_pid().ok_or(PtyError::Closed)?;
        // SAFETY: kill(2) has no memory-safety preconditions.
        let rc = unsafe { libc::kill(pid as libc::pid_t, signal) };
        if rc != 0 {
            return Err(PtyError::Signal {
                pid,
                source: io::Error::last_os_error(),
            });
        }
        Ok(())
    }

    /// Non-blocking exit status check.
    pub fn try_wait(&self) -> io::Result<Option<ExitStatus>> {
        let status = self.child.lock().try_wait()?;
        if status.is_some() {
            self.exited.store(true, Ordering::SeqCst);
        }
        Ok(status)
    }

    /// Block until the child exits.
    pub fn wait(&self) -> io::Result<ExitStatus> {
        let status = self.child.lock().wait()?;
        self.exited.store(true, Ordering::SeqCst);
        Ok(status)
    }

    /// Release the master descriptor.
    pub fn close(&self) {
        if self.master.lock().take().is_some() {
            debug!(pid = ?self.pid, "closed pty master");
        }
    }

    /// Kill the child and everything in its process group.
    pub fn kill_tree(&self) {
        if self.exited.load(Ordering::SeqCst) {
            return;
        }

        // portable-pty starts the child in its own session, so its pid is
        // also the process group id.
        #[cfg(unix)]
        if let Some(pid) = self.live_pid() {
            // SAFETY: kill(2) has no memory-safety preconditions.
            unsafe {
                libc::kill(-(pid as libc::pid_t), libc::SIGKILL);
            }
        }

        if let Err(e) = self.killer.lock().kill() {
            debug!("kill after group kill: {}", e);
        }
        info!(pid = ?self.pid, "killed shell process tree");
    }
}

/// Is this read error just the pty reporting that the slave side is gone?
pub fn is_end_of_stream(err: &io::Error) -> bool {
    #[cfg(unix)]
    if err.raw_os_error() == Some(libc::EIO) {
        return true;
    }
    matches!(err.kind(), io::ErrorKind::UnexpectedEof | io::ErrorKind::BrokenPipe)
}
