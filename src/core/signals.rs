//! Background signal forwarders owned by a session.
//!
//! - **resize**: on `SIGWINCH`, copies the controlling terminal's size onto
//!   the pty so the shell sees the same geometry as the display.
//! - **termination**: relays `SIGHUP`, `SIGINT` and `SIGTERM` to the shell.
//!
//! Each forwarder is one thread blocked on signal delivery. Both stop when
//! the session's cancellation token fires. Delivery is best-effort: every
//! failure is logged and the forwarder keeps waiting for the next signal.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use thiserror::Error;
use tracing::{debug, warn};

use super::cancel::CancellationToken;
use super::pty::{Pty, PtyError};

#[derive(Error, Debug)]
pub enum SignalForwardError {
    #[error("Failed to register signal handler: {0}")]
    Register(#[source] io::Error),

    #[error("Failed to read terminal size: {0}")]
    TerminalSize(#[source] io::Error),

    #[error("Failed to forward signal {signal}: {source}")]
    Relay {
        signal: i32,
        #[source]
        source: PtyError,
    },
}

/// A running forwarder thread.
pub struct Forwarder {
    name: &'static str,
    thread: Option<JoinHandle<()>>,
}

impl Forwarder {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Wait for the thread to finish. The owning token must already be
    /// cancelled, otherwise this blocks until the next cancellation.
    pub fn join(mut self) {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!(forwarder = self.name, "forwarder thread panicked");
            }
        }
    }
}

/// Start the `SIGWINCH` → pty size forwarder.
#[cfg(unix)]
pub fn spawn_resize_forwarder(
    pty: Arc<Pty>,
    cancel: &CancellationToken,
) -> Result<Forwarder, SignalForwardError> {
    use signal_hook::consts::signal::SIGWINCH;

    spawn_forwarder("resize", &[SIGWINCH], cancel, move |_| {
        apply_window_size(&pty, crossterm::terminal::size())
    })
}

/// Copy a `(cols, rows)` terminal size onto the pty.
#[cfg(unix)]
fn apply_window_size(pty: &Pty, size: io::Result<(u16, u16)>) -> Result<(), SignalForwardError> {
    use signal_hook::consts::signal::SIGWINCH;

    let (cols, rows) = size.map_err(SignalForwardError::TerminalSize)?;
    pty.resize(rows, cols).map_err(|source| SignalForwardError::Relay {
        signal: SIGWINCH,
        source,
    })?;
    debug!(rows, cols, "forwarded window size");
    Ok(())
}

/// Start the `SIGHUP`/`SIGINT`/`SIGTERM` → child forwarder.
#[cfg(unix)]
pub fn spawn_signal_forwarder(
    pty: Arc<Pty>,
    cancel: &CancellationToken,
) -> Result<Forwarder, SignalForwardError> {
    use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGTERM};

    spawn_forwarder("signal", &[SIGHUP, SIGINT, SIGTERM], cancel, move |signal| {
        pty.signal(signal)
            .map_err(|source| SignalForwardError::Relay { signal, source })?;
        debug!(signal, pid = ?pty.pid(), "relayed signal to shell");
        Ok(())
    })
}

#[cfg(unix)]
fn spawn_forwarder<F>(
    name: &'static str,
    signals: &[i32],
    cancel: &CancellationToken,
    mut on_signal: F,
) -> Result<Forwarder, SignalForwardError>
where
    F: FnMut(i32) -> Result<(), SignalForwardError> + Send + 'static,
{
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new(signals).map_err(SignalForwardError::Register)?;
    let handle = signals.handle();
    cancel.on_cancel(move || handle.close());

    let cancel = cancel.clone();
    let thread = thread::Builder::new()
        .name(format!("vtgrid-{}", name))
        .spawn(move || {
            debug!(forwarder = name, "forwarder started");
            for signal in signals.forever() {
                if cancel.is_cancelled() {
                    break;
                }
                if let Err(e) = on_signal(signal) {
                    warn!(forwarder = name, "{}", e);
                }
            }
            debug!(forwarder = name, "forwarder stopped");
        })
        .map_err(SignalForwardError::Register)?;

    Ok(Forwarder {
        name,
        thread: Some(thread),
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::core::pty::SpawnOptions;
    use std::io::Read;
    use std::time::{Duration, Instant};

    fn spawn_sh(script: &str) -> (Arc<Pty>, Box<dyn Read + Send>) {
        let (pty, streams) = Pty::spawn(
            "/bin/sh",
            &["-c".to_string(), script.to_string()],
            &SpawnOptions::default(),
        )
        .unwrap();
        (Arc::new(pty), streams.reader)
    }

    fn read_until(reader: &mut dyn Read, needle: &str, timeout: Duration) -> String {
        let deadline = Instant::now() + timeout;
        let mut output = Vec::new();
        let mut buf = [0u8; 256];
        while Instant::now() < deadline {
            match reader.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    output.extend_from_slice(&buf[..n]);
                    if String::from_utf8_lossy(&output).contains(needle) {
                        break;
                    }
                }
            }
        }
        String::from_utf8_lossy(&output).into_owned()
    }

    #[test]
    fn test_hangup_is_relayed_to_shell() {
        use signal_hook::consts::signal::SIGHUP;

        let (pty, mut reader) = spawn_sh("trap 'echo relayed' HUP; echo ready; while :; do sleep 0.1; done");
        let cancel = CancellationToken::new();
        let forwarder = spawn_signal_forwarder(pty.clone(), &cancel).unwrap();

        let out = read_until(&mut reader, "ready", Duration::from_secs(5));
        assert!(out.contains("ready"), "output: {:?}", out);

        // The forwarder owns the handler, so this does not hang us up.
        signal_hook::low_level::raise(SIGHUP).unwrap();
        let out = read_until(&mut reader, "relayed", Duration::from_secs(5));
        assert!(out.contains("relayed"), "output: {:?}", out);

        cancel.cancel();
        forwarder.join();
        pty.kill_tree();
        pty.wait().unwrap();
    }

    #[test]
    fn test_window_size_is_applied_to_pty() {
        let (pty, _reader) = spawn_sh("sleep 5");

        apply_window_size(&pty, Ok((132, 43))).unwrap();
        assert_eq!(pty.size().unwrap(), (43, 132));

        let err = apply_window_size(&pty, Err(io::Error::new(io::ErrorKind::Other, "not a tty")));
        assert!(matches!(err, Err(SignalForwardError::TerminalSize(_))));
        assert_eq!(pty.size().unwrap(), (43, 132));

        pty.kill_tree();
        pty.wait().unwrap();
    }

    #[test]
    fn test_forwarders_stop_on_cancel() {
        let (pty, _streams) = Pty::spawn(
            "/bin/sh",
            &["-c".to_string(), "sleep 5".to_string()],
            &SpawnOptions::default(),
        )
        .unwrap();
        let pty = Arc::new(pty);
        let cancel = CancellationToken::new();

        let resize = spawn_resize_forwarder(pty.clone(), &cancel).unwrap();
        let signal = spawn_signal_forwarder(pty.clone(), &cancel).unwrap();
        assert_eq!(resize.name(), "resize");
        assert_eq!(signal.name(), "signal");

        cancel.cancel();
        resize.join();
        signal.join();

        pty.kill_tree();
        pty.wait().unwrap();
    }
}
