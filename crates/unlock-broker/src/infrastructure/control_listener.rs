//! Control socket listener.
//!
//! The listener runs on its own OS thread and accepts one control connection
//! at a time.  Each connection carries a single `device,key[,device,key...]`
//! message that is parsed and inserted into the shared [`CredentialStore`].
//!
//! # Stopping a thread that is blocked in `accept`
//!
//! A blocking `accept` does not look at any flag.  To stop the thread, the
//! owner sets the shared stop flag and then connects to the control socket
//! itself.  That connection makes `accept` return, the thread sees the flag
//! and leaves its loop, removes its socket file and exits.  The owner then
//! joins it.
//!
//! Each control connection is read with a timeout, so a client that never
//! closes its end cannot keep the thread away from `accept` for long.

use std::io::{self, Read};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, info, warn};
use unlock_core::{parse_control_message, protocol::MAX_CONTROL_MSG};

use crate::application::CredentialStore;
use crate::infrastructure::error::{BrokerError, Endpoint};
use crate::infrastructure::socket::{bind_fresh, remove_socket_file};

/// Longest time a control client may take to deliver its message.
pub const CONTROL_READ_TIMEOUT: Duration = Duration::from_secs(5);

const THREAD_NAME: &str = "afunix-control";

/// Entry point for starting the control thread.
pub struct ControlListener;

impl ControlListener {
    /// Binds the control socket at `path` and starts the listener thread.
    ///
    /// The socket is bound before this function returns, so a client may
    /// connect as soon as it gets the handle.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Bind`] if the socket cannot be bound, or
    /// [`BrokerError::Spawn`] if the thread cannot be created.
    pub fn start(path: PathBuf, store: Arc<CredentialStore>) -> Result<ControlHandle, BrokerError> {
        let listener = bind_fresh(&path, Endpoint::Control)?;
        info!(path = %path.display(), "control socket listening");

        let stop = Arc::new(AtomicBool::new(false));
        let thread = {
            let stop = Arc::clone(&stop);
            let path = path.clone();
            thread::Builder::new()
                .name(THREAD_NAME.to_string())
                .spawn(move || {
                    let result = control_loop(&listener, &store, &stop);
                    drop(listener);
                    remove_socket_file(&path);
                    result
                })
        };

        let thread = match thread {
            Ok(thread) => thread,
            Err(e) => {
                remove_socket_file(&path);
                return Err(BrokerError::Spawn(e));
            }
        };

        Ok(ControlHandle {
            path,
            stop,
            thread: Some(thread),
        })
    }
}

/// Owner's handle on a running control thread.
///
/// Dropping the handle stops and joins the thread as well, discarding its
/// result; call [`ControlHandle::stop_and_join`] to observe it.
pub struct ControlHandle {
    path: PathBuf,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<Result<(), BrokerError>>>,
}

impl ControlHandle {
    /// Path of the bound control socket.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns `true` once the thread has exited.
    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Asks the thread to stop, wakes its `accept`, and waits for it to exit.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::ControlThreadPanicked`] if the thread panicked,
    /// or [`BrokerError::ControlListener`] wrapping the error it stopped with.
    pub fn stop_and_join(mut self) -> Result<(), BrokerError> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<(), BrokerError> {
        let Some(thread) = self.thread.take() else {
            return Ok(());
        };

        self.stop.store(true, Ordering::Release);
        if !thread.is_finished() {
            // Wake the blocked accept.  If the thread already left its loop the
            // connect is refused, which is fine.
            if let Err(e) = UnixStream::connect(&self.path) {
                debug!("control wake-up connect failed: {e}");
            }
        }

        match thread.join() {
            Ok(Ok(())) => {
                info!("control listener stopped");
                Ok(())
            }
            Ok(Err(e)) => Err(BrokerError::ControlListener(Box::new(e))),
            Err(_) => Err(BrokerError::ControlThreadPanicked),
        }
    }
}

impl Drop for ControlHandle {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            error!("control listener stopped with error: {e}");
        }
    }
}

/// The accept loop executed on the control thread.
fn control_loop(
    listener: &UnixListener,
    store: &CredentialStore,
    stop: &AtomicBool,
) -> Result<(), BrokerError> {
    loop {
        let accepted = listener.accept();
        if stop.load(Ordering::Acquire) {
            debug!("control listener received stop request");
            return Ok(());
        }

        match accepted {
            Ok((stream, _)) => handle_control_connection(stream, store),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(source) => {
                error!("control accept failed: {source}");
                return Err(BrokerError::Accept {
                    endpoint: Endpoint::Control,
                    source,
                });
            }
        }
    }
}

/// Reads one control message and applies it to the store.
fn handle_control_connection(stream: UnixStream, store: &CredentialStore) {
    let raw = match read_control_message(stream) {
        Ok(raw) => raw,
        Err(e) => {
            warn!("dropping control connection: {e}");
            return;
        }
    };

    if raw.is_empty() {
        debug!("empty control message ignored");
        return;
    }

    let message = parse_control_message(&raw);
    let outcome = store.apply_control_message(&message);
    info!(
        inserted = outcome.inserted,
        rejected = outcome.rejected,
        malformed = outcome.malformed,
        total = store.len(),
        "control message processed"
    );
}

/// Reads until the client closes, the size limit is hit, or the read times out.
///
/// A timeout after some bytes arrived still yields those bytes; a timeout
/// with nothing read is an error.
fn read_control_message(stream: UnixStream) -> io::Result<Vec<u8>> {
    stream.set_read_timeout(Some(CONTROL_READ_TIMEOUT))?;

    let mut raw = Vec::with_capacity(MAX_CONTROL_MSG);
    match stream.take(MAX_CONTROL_MSG as u64).read_to_end(&mut raw) {
        Ok(_) => Ok(raw),
        Err(e)
            if !raw.is_empty()
                && matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) =>
        {
            warn!(len = raw.len(), "control client did not close; using partial message");
            Ok(raw)
        }
        Err(e) => Err(e),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Instant;
    use tempfile::tempdir;

    fn send(path: &Path, message: &[u8]) {
        let mut stream = UnixStream::connect(path).unwrap();
        stream.write_all(message).unwrap();
    }

    /// Polls until `check` holds or a generous timeout expires.
    fn wait_until(check: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(10);
        while Instant::now() < deadline {
            if check() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        check()
    }

    #[test]
    fn test_control_message_populates_store() {
        // Arrange
        let dir = tempdir().unwrap();
        let path = dir.path().join("unlock.control.sock");
        let store = Arc::new(CredentialStore::new(16));
        let handle = ControlListener::start(path.clone(), Arc::clone(&store)).unwrap();

        // Act
        send(&path, b"devA,keyA,devB,keyB");

        // Assert
        assert!(wait_until(|| store.len() == 2));
        assert_eq!(store.lookup("devB").unwrap().as_slice(), b"keyB");
        assert!(store.credentials_available());
        handle.stop_and_join().unwrap();
    }

    #[test]
    fn test_listener_keeps_serving_after_full_table() {
        // Arrange: room for two entries
        let dir = tempdir().unwrap();
        let path = dir.path().join("c.sock");
        let store = Arc::new(CredentialStore::new(2));
        let handle = ControlListener::start(path.clone(), Arc::clone(&store)).unwrap();

        // Act: the first message fits; the second fills the table and overflows
        send(&path, b"devA,keyA");
        assert!(wait_until(|| store.len() == 1));
        send(&path, b"devB,keyB,devC,keyC");

        // Assert: the second message was read, its first pair stored, the rest rejected
        assert!(wait_until(|| store.lookup("devB").is_some()));
        assert_eq!(store.len(), 2);
        assert!(store.lookup("devC").is_none());
        assert!(!handle.is_finished());
        handle.stop_and_join().unwrap();
    }

    #[test]
    fn test_stop_and_join_unblocks_idle_accept_and_removes_socket() {
        // Arrange: a listener that never receives a message
        let dir = tempdir().unwrap();
        let path = dir.path().join("idle.sock");
        let handle = ControlListener::start(path.clone(), Arc::new(CredentialStore::new(4))).unwrap();
        assert!(path.exists());

        // Act
        let started = Instant::now();
        let result = handle.stop_and_join();

        // Assert
        assert!(result.is_ok());
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(!path.exists());
    }

    #[test]
    fn test_dropping_handle_stops_thread() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("dropped.sock");
        let handle = ControlListener::start(path.clone(), Arc::new(CredentialStore::new(4))).unwrap();

        drop(handle);

        assert!(!path.exists());
    }

    #[test]
    fn test_start_fails_when_directory_is_missing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing").join("c.sock");

        let result = ControlListener::start(path, Arc::new(CredentialStore::new(4)));

        assert!(matches!(result, Err(BrokerError::Bind { endpoint: Endpoint::Control, .. })));
    }

    #[test]
    fn test_read_control_message_stops_at_size_limit() {
        let (mut client, server) = UnixStream::pair().unwrap();
        let oversized = vec![b'x'; MAX_CONTROL_MSG + 100];
        client.write_all(&oversized).unwrap();
        drop(client);

        let raw = read_control_message(server).unwrap();

        assert_eq!(raw.len(), MAX_CONTROL_MSG);
    }
}
