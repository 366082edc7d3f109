//! afunix-unlock — entry point.
//!
//! Hands disk-encryption keys to systemd-cryptsetup over an `AF_UNIX` socket
//! so encrypted volumes unlock at boot without a passphrase prompt.
//!
//! # Usage
//!
//! ```text
//! afunix-unlock serve   -f <SOCKET> [-c <CONTROL>] [-k <KEY>] [-t <N>] [-s <SECS>]
//! afunix-unlock push    --control <CONTROL> <DEVICE> <KEY> [<DEVICE> <KEY>...]
//! afunix-unlock request --socket <SOCKET> --device <DEVICE>
//! ```
//!
//! # Environment variable overrides
//!
//! | Variable                     | Flag            |
//! |------------------------------|-----------------|
//! | `AFUNIX_UNLOCK_SOCKET`       | `--socket`      |
//! | `AFUNIX_UNLOCK_CONTROL`      | `--control`     |
//! | `AFUNIX_UNLOCK_ITERATIONS`   | `--iterations`  |
//! | `AFUNIX_UNLOCK_START_DELAY`  | `--start-delay` |
//! | `AFUNIX_UNLOCK_CONFIG`       | `--config`      |
//!
//! The static key has no environment variable on purpose: the environment of
//! a boot-time service is easy to read back.

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use unlock_broker::domain::BrokerConfig;
use unlock_broker::infrastructure::client::{push_keys, request_key};
use unlock_broker::infrastructure::config_file::FileConfig;
use unlock_broker::infrastructure::run_broker;

// ── CLI argument definitions ──────────────────────────────────────────────────

/// AF_UNIX key broker for systemd-cryptsetup.
#[derive(Debug, Parser)]
#[command(name = "afunix-unlock", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the broker.
    Serve(ServeArgs),
    /// Send device keys to a running broker's control socket.
    Push(PushArgs),
    /// Ask a running broker for a device key, as systemd-cryptsetup would.
    Request(RequestArgs),
}

#[derive(Debug, Args)]
struct ServeArgs {
    /// Primary socket that systemd-cryptsetup connects to.
    #[arg(short = 'f', long = "socket", env = "AFUNIX_UNLOCK_SOCKET")]
    socket: Option<PathBuf>,

    /// Control socket path [default: primary path with `.sock` → `.control.sock`].
    #[arg(short = 'c', long, env = "AFUNIX_UNLOCK_CONTROL")]
    control: Option<PathBuf>,

    /// Send this key to every client instead of looking it up by device.
    #[arg(short = 'k', long)]
    key: Option<String>,

    /// Number of unlock requests to serve before exiting [default: 3].
    #[arg(short = 't', long, env = "AFUNIX_UNLOCK_ITERATIONS")]
    iterations: Option<u32>,

    /// Seconds to wait before serving, unless keys arrive first [default: 0].
    #[arg(short = 's', long, env = "AFUNIX_UNLOCK_START_DELAY")]
    start_delay: Option<u64>,

    /// Maximum number of device keys held [default: 1024].
    #[arg(long)]
    capacity: Option<usize>,

    /// TOML config file; flags override its values.
    #[arg(long, env = "AFUNIX_UNLOCK_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct PushArgs {
    /// Control socket of the running broker.
    #[arg(short = 'c', long, env = "AFUNIX_UNLOCK_CONTROL")]
    control: PathBuf,

    /// Alternating device and key values.
    #[arg(value_name = "DEVICE KEY", num_args = 2.., required = true)]
    pairs: Vec<String>,
}

#[derive(Debug, Args)]
struct RequestArgs {
    /// Primary socket of the running broker.
    #[arg(short = 'f', long = "socket", env = "AFUNIX_UNLOCK_SOCKET")]
    socket: PathBuf,

    /// Device name to claim in the client's socket address.
    #[arg(short = 'd', long)]
    device: String,
}

impl ServeArgs {
    /// Merges defaults, the config file and flags into a [`BrokerConfig`].
    ///
    /// # Errors
    ///
    /// Returns an error if no primary socket path is given anywhere.
    fn into_broker_config(self, file: &FileConfig) -> anyhow::Result<BrokerConfig> {
        let socket = self
            .socket
            .clone()
            .or_else(|| file.broker.socket.clone())
            .context("a primary socket path must be provided (--socket or [broker] socket)")?;

        let mut config = BrokerConfig::new(socket);
        file.apply_to(&mut config);

        if let Some(control) = self.control {
            config.control_path = Some(control);
        }
        if let Some(key) = self.key {
            config = config.with_static_key(key.into_bytes());
        }
        if let Some(iterations) = self.iterations {
            config.max_iterations = iterations;
        }
        if let Some(secs) = self.start_delay {
            config.start_delay = Duration::from_secs(secs);
        }
        if let Some(capacity) = self.capacity {
            config.table_capacity = capacity;
        }
        if let Some(socket) = self.socket {
            config.socket_path = socket;
        }
        Ok(config)
    }
}

/// Splits `DEVICE KEY DEVICE KEY...` into pairs.
fn pair_up(values: &[String]) -> anyhow::Result<Vec<(&str, &str)>> {
    if values.len() % 2 != 0 {
        bail!("expected DEVICE KEY pairs, got an odd number of values");
    }
    Ok(values
        .chunks_exact(2)
        .map(|pair| (pair[0].as_str(), pair[1].as_str()))
        .collect())
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn init_logging(default_level: &str) {
    // Logs go to stderr so `request` can print the key alone on stdout.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve(args) => serve(args),
        Command::Push(args) => {
            init_logging("warn");
            let pairs = pair_up(&args.pairs)?;
            push_keys(&args.control, &pairs)
                .with_context(|| format!("push keys to {}", args.control.display()))?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Request(args) => {
            init_logging("warn");
            let key = request_key(&args.socket, &args.device)
                .with_context(|| format!("request key from {}", args.socket.display()))?;
            if key.is_empty() {
                eprintln!("no key for device {}", args.device);
                return Ok(ExitCode::FAILURE);
            }
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&key).context("write key to stdout")?;
            stdout.flush().context("flush stdout")?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn serve(args: ServeArgs) -> anyhow::Result<ExitCode> {
    let file = match &args.config {
        Some(path) => {
            FileConfig::load(path).with_context(|| format!("load config {}", path.display()))?
        }
        None => FileConfig::default(),
    };
    init_logging(&file.logging.level);

    let config = args.into_broker_config(&file)?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        socket = %config.socket_path.display(),
        control = %config.control_path().display(),
        static_key = config.static_key.is_some(),
        iterations = config.max_iterations,
        start_delay = ?config.start_delay,
        capacity = config.table_capacity,
        "afunix-unlock starting"
    );

    let report = run_broker(config).context("broker failed")?;
    info!(
        served = report.served,
        missed = report.missed,
        failed = report.failed,
        "afunix-unlock stopped"
    );
    Ok(ExitCode::SUCCESS)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
