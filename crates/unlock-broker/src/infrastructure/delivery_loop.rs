//! Delivery loop: serves unlock requests on the primary socket.
//!
//! Each iteration moves through these states:
//!
//! ```text
//! WaitingDelay → Accepting → Resolving → Responding → (WaitingDelay | Done)
//! ```
//!
//! 1. **WaitingDelay** – until the start delay has passed, hold back unless a
//!    control message has already delivered keys.
//! 2. **Accepting** – block in `accept` on the primary socket.
//! 3. **Resolving** – read the peer's bound address, parse the device name
//!    from it and pick a key (static key, or table lookup).
//! 4. **Responding** – write the raw key bytes (nothing at all on a miss) and
//!    close the connection.
//!
//! After `max_iterations` requests the loop stops the control thread, waits
//! for it and removes its own socket file.
//!
//! # Wire protocol
//!
//! There is no framing: the client reads until EOF.  Zero bytes followed by
//! EOF means "no key for this device".

use std::io::{self, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};
use unlock_core::parse_peer_device;

use crate::application::{resolve_key, CredentialStore, KeyResolution};
use crate::domain::BrokerConfig;
use crate::infrastructure::control_listener::{ControlHandle, ControlListener};
use crate::infrastructure::error::{BrokerError, Endpoint};
use crate::infrastructure::socket::{bind_fresh, peer_address_bytes, remove_socket_file};

/// Counters describing a finished run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Requests that received a key.
    pub served: u32,
    /// Requests for which no key was known.
    pub missed: u32,
    /// Requests whose key could not be written (peer already gone).
    pub failed: u32,
}

impl DeliveryReport {
    /// Total number of accepted requests.
    pub fn requests(&self) -> u32 {
        self.served + self.missed + self.failed
    }
}

/// A bound broker: both sockets listening, control thread running.
///
/// Binding and running are separate steps so a caller knows the sockets exist
/// before any client tries to connect.
pub struct Broker {
    config: BrokerConfig,
    listener: UnixListener,
    control: ControlHandle,
    store: Arc<CredentialStore>,
    started: Instant,
}

impl Broker {
    /// Binds the primary socket and starts the control listener.
    ///
    /// Stale socket files at either path are replaced.  The start delay is
    /// measured from this call.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Bind`] if either socket cannot be bound, or
    /// [`BrokerError::Spawn`] if the control thread cannot start.
    pub fn bind(config: BrokerConfig) -> Result<Self, BrokerError> {
        let started = Instant::now();
        let store = Arc::new(CredentialStore::new(config.table_capacity));

        let listener = bind_fresh(&config.socket_path, Endpoint::Primary)?;
        info!(path = %config.socket_path.display(), "primary socket listening");

        let control = match ControlListener::start(config.control_path(), Arc::clone(&store)) {
            Ok(control) => control,
            Err(e) => {
                drop(listener);
                remove_socket_file(&config.socket_path);
                return Err(e);
            }
        };

        Ok(Self {
            config,
            listener,
            control,
            store,
            started,
        })
    }

    /// Shared credential store, for callers that want to seed keys directly.
    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.store
    }

    /// Configuration this broker was bound with.
    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Serves `max_iterations` unlock requests, then shuts down.
    ///
    /// The control thread is stopped and joined on every exit path, and both
    /// socket files are removed.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Accept`] or [`BrokerError::PeerAddress`] if the
    /// primary socket fails, or the control thread's error if it stopped
    /// abnormally.  A primary socket error takes precedence.
    pub fn run(self) -> Result<DeliveryReport, BrokerError> {
        let Broker {
            config,
            listener,
            control,
            store,
            started,
        } = self;

        let mut report = DeliveryReport::default();
        let served = serve(&config, &listener, &store, started, &mut report);

        info!(
            served = report.served,
            missed = report.missed,
            failed = report.failed,
            "closing (max tries reached)"
        );
        let stopped = control.stop_and_join();
        drop(listener);
        remove_socket_file(&config.socket_path);

        served?;
        stopped?;
        Ok(report)
    }
}

/// Binds a broker for `config` and runs it to completion.
///
/// # Errors
///
/// See [`Broker::bind`] and [`Broker::run`].
pub fn run_broker(config: BrokerConfig) -> Result<DeliveryReport, BrokerError> {
    Broker::bind(config)?.run()
}

fn serve(
    config: &BrokerConfig,
    listener: &UnixListener,
    store: &CredentialStore,
    started: Instant,
    report: &mut DeliveryReport,
) -> Result<(), BrokerError> {
    // A delay too large for `Instant` means "wait for control keys only".
    let deadline = started.checked_add(config.start_delay);

    for iteration in 1..=config.max_iterations {
        wait_for_start(store, deadline);

        let stream = accept(listener)?;
        let raw_peer = peer_address_bytes(&stream).map_err(BrokerError::PeerAddress)?;
        let device = parse_peer_device(&raw_peer);
        info!(
            iteration,
            max = config.max_iterations,
            peer = ?String::from_utf8_lossy(&raw_peer),
            device = %device,
            "unlock request"
        );

        let resolution = resolve_key(config.static_key.as_deref().map(Vec::as_slice), store, &device);
        respond(stream, &device, &resolution, report);
    }
    Ok(())
}

/// WaitingDelay: returns once the deadline passes or keys arrive.
///
/// With no deadline only the arrival of keys ends the wait.
fn wait_for_start(store: &CredentialStore, deadline: Option<Instant>) {
    if store.credentials_available() {
        return;
    }
    let Some(deadline) = deadline else {
        info!("start delay unbounded; waiting for control keys");
        store.wait_for_credentials_unbounded();
        info!("control keys arrived");
        return;
    };
    let now = Instant::now();
    if now >= deadline {
        return;
    }

    info!(remaining = ?(deadline - now), "waiting for start delay or control keys");
    if store.wait_for_credentials(deadline) {
        info!("control keys arrived; start delay cut short");
    } else {
        info!("start delay elapsed");
    }
}

/// Accepting: blocks until a client connects.  `EINTR` is retried.
fn accept(listener: &UnixListener) -> Result<UnixStream, BrokerError> {
    loop {
        match listener.accept() {
            Ok((stream, _)) => return Ok(stream),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(source) => {
                return Err(BrokerError::Accept {
                    endpoint: Endpoint::Primary,
                    source,
                })
            }
        }
    }
}

/// Responding: writes the key (if any) and closes the connection.
fn respond(
    mut stream: UnixStream,
    device: &str,
    resolution: &KeyResolution,
    report: &mut DeliveryReport,
) {
    match resolution.key() {
        Some(key) => match stream.write_all(key).and_then(|()| stream.flush()) {
            Ok(()) => {
                info!(
                    device,
                    source = resolution.source_name(),
                    key_len = key.len(),
                    "key sent"
                );
                report.served += 1;
            }
            Err(e) => {
                warn!(device, "failed to send key: {e}");
                report.failed += 1;
            }
        },
        None => {
            info!(device, "device not found");
            report.missed += 1;
        }
    }
    drop(stream);
    debug!(device, "connection closed");
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::os::fd::OwnedFd;
    use std::thread;
    use std::time::Duration;
    use tempfile::tempdir;

    fn read_all(path: &std::path::Path) -> Vec<u8> {
        let mut stream = UnixStream::connect(path).unwrap();
        let mut buf = Vec::new();
        stream.read_to_end(&mut buf).unwrap();
        buf
    }

    #[test]
    fn test_zero_iterations_returns_immediately_and_cleans_up() {
        // Arrange
        let dir = tempdir().unwrap();
        let mut config = BrokerConfig::new(dir.path().join("b.sock"));
        config.max_iterations = 0;
        let control_path = config.control_path();

        // Act
        let report = run_broker(config).unwrap();

        // Assert
        assert_eq!(report, DeliveryReport::default());
        assert!(!dir.path().join("b.sock").exists());
        assert!(!control_path.exists());
    }

    #[test]
    fn test_static_key_is_sent_to_unnamed_client() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("s.sock");
        let mut config = BrokerConfig::new(&path).with_static_key("KEY1");
        config.max_iterations = 1;

        let broker = Broker::bind(config).unwrap();
        let server = thread::spawn(move || broker.run());

        assert_eq!(read_all(&path), b"KEY1");
        let report = server.join().unwrap().unwrap();
        assert_eq!(report.served, 1);
    }

    #[test]
    fn test_unknown_device_gets_zero_bytes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("m.sock");
        let mut config = BrokerConfig::new(&path);
        config.max_iterations = 1;

        let broker = Broker::bind(config).unwrap();
        let server = thread::spawn(move || broker.run());

        assert!(read_all(&path).is_empty());
        let report = server.join().unwrap().unwrap();
        assert_eq!(report.missed, 1);
    }

    #[test]
    fn test_seeded_store_key_reaches_matching_pathname_client() {
        // Arrange: a client bound to a filesystem path whose last component is the device
        let dir = tempdir().unwrap();
        let path = dir.path().join("p.sock");
        let mut config = BrokerConfig::new(&path);
        config.max_iterations = 1;
        let broker = Broker::bind(config).unwrap();
        broker.store().insert("devP", b"keyP").unwrap();
        let server = thread::spawn(move || broker.run());

        // Act: bind the client socket to <dir>/clients/devP, then connect
        let client_dir = dir.path().join("clients");
        std::fs::create_dir(&client_dir).unwrap();
        let socket = socket2::Socket::new(socket2::Domain::UNIX, socket2::Type::STREAM, None).unwrap();
        socket.bind(&socket2::SockAddr::unix(client_dir.join("devP")).unwrap()).unwrap();
        socket.connect(&socket2::SockAddr::unix(&path).unwrap()).unwrap();
        let mut stream = UnixStream::from(OwnedFd::from(socket));
        let mut buf = Vec::new();
        stream.read_to_end(&mut buf).unwrap();

        // Assert
        assert_eq!(buf, b"keyP");
        assert_eq!(server.join().unwrap().unwrap().served, 1);
    }

    #[test]
    fn test_start_delay_holds_back_first_response() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("d.sock");
        let mut config = BrokerConfig::new(&path).with_static_key("K");
        config.max_iterations = 1;
        config.start_delay = Duration::from_millis(300);

        let started = Instant::now();
        let broker = Broker::bind(config).unwrap();
        let server = thread::spawn(move || broker.run());

        // The connection is queued, but the key only arrives after the delay.
        assert_eq!(read_all(&path), b"K");
        assert!(started.elapsed() >= Duration::from_millis(300));
        server.join().unwrap().unwrap();
    }

    #[test]
    fn test_unrepresentable_start_delay_waits_for_keys_only() {
        // Arrange: a delay no Instant can hold, keys already stored
        let dir = tempdir().unwrap();
        let path = dir.path().join("huge.sock");
        let mut config = BrokerConfig::new(&path);
        config.max_iterations = 1;
        config.start_delay = Duration::from_secs(u64::MAX);
        let broker = Broker::bind(config).unwrap();
        broker.store().insert("", b"keyE").unwrap();
        let control_path = broker.config().control_path();
        let server = thread::spawn(move || broker.run());

        // Act: an unnamed client parses to the empty device
        let received = read_all(&path);
        let report = server.join().unwrap().unwrap();

        // Assert
        assert_eq!(received, b"keyE");
        assert_eq!(report.served, 1);
        assert!(!path.exists());
        assert!(!control_path.exists());
    }

    #[test]
    fn test_unrepresentable_start_delay_ends_when_keys_arrive() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("late.sock");
        let mut config = BrokerConfig::new(&path);
        config.max_iterations = 1;
        config.start_delay = Duration::MAX;
        let broker = Broker::bind(config).unwrap();
        let store = Arc::clone(broker.store());
        let server = thread::spawn(move || broker.run());

        thread::sleep(Duration::from_millis(50));
        store.insert("", b"late").unwrap();

        assert_eq!(read_all(&path), b"late");
        assert_eq!(server.join().unwrap().unwrap().served, 1);
    }

    #[test]
    fn test_peer_that_hangs_up_is_counted_as_failed() {
        // Arrange: a key far larger than the socket buffer
        let dir = tempdir().unwrap();
        let path = dir.path().join("gone.sock");
        let mut config = BrokerConfig::new(&path).with_static_key(vec![b'k'; 1 << 20]);
        config.max_iterations = 1;
        let broker = Broker::bind(config).unwrap();

        // Act: the client leaves before the broker writes
        drop(UnixStream::connect(&path).unwrap());
        let report = broker.run();

        // Assert: the run finishes normally
        let report = report.unwrap();
        assert_eq!(report, DeliveryReport { served: 0, missed: 0, failed: 1 });
        assert!(!path.exists());
    }

    #[test]
    fn test_report_counts_requests() {
        let report = DeliveryReport { served: 2, missed: 1, failed: 1 };
        assert_eq!(report.requests(), 4);
    }
}
