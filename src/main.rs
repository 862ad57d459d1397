//! limelight - discover, pair with and launch sessions on LAN streaming hosts.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use limelight_client::{ClientBuilder, ClientConfig, DiscoveryEvent, SessionCoordinator};
use limelight_core::{Error, StreamPreset, DEFAULT_PAIRING_PORT};
use limelight_pairing::{serve_tcp, PairingIdentity, PairingResponder, Pin};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::{self, Instant};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Host identity file for `serve-pairing`, inside the state directory.
const HOST_IDENTITY_FILE: &str = "host-identity";

enum Command {
    Discover { seconds: u64 },
    Pair { host: String, pin: String },
    Stream {
        host: String,
        preset: Option<StreamPreset>,
        pin: Option<String>,
    },
    Forget { host: String },
    ServePairing { port: u16 },
}

/// Command-line arguments
struct Args {
    /// Enable debug logging
    debug: bool,
    /// Write logs to this file instead of stderr
    log_file: Option<PathBuf>,
    config: Option<PathBuf>,
    state_dir: Option<PathBuf>,
    command: Command,
}

fn parse_args() -> Result<Args> {
    let mut debug = false;
    let mut log_file = None;
    let mut config = None;
    let mut state_dir = None;
    let mut command = None;
    let mut host = None;
    let mut pin = None;
    let mut preset = None;
    let mut seconds = 5;
    let mut port = DEFAULT_PAIRING_PORT;

    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        let mut value = |name: &str| {
            iter.next()
                .ok_or_else(|| anyhow!("{} needs a value", name))
        };
        match arg.as_str() {
            "--debug" | "-d" => debug = true,
            "--log-file" | "-l" => log_file = Some(PathBuf::from(value(&arg)?)),
            "--config" | "-c" => config = Some(PathBuf::from(value(&arg)?)),
            "--state-dir" => state_dir = Some(PathBuf::from(value(&arg)?)),
            "--host" => host = Some(value(&arg)?),
            "--pin" => pin = Some(value(&arg)?),
            "--preset" => preset = Some(value(&arg)?.parse::<StreamPreset>()?),
            "--seconds" => seconds = value(&arg)?.parse().context("--seconds")?,
            "--port" => port = value(&arg)?.parse().context("--port")?,
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            "discover" | "pair" | "stream" | "forget" | "serve-pairing" if command.is_none() => {
                command = Some(arg.clone())
            }
            _ => {
                eprintln!("Unknown argument: {}", arg);
                print_help();
                std::process::exit(1);
            }
        }
    }

    let require_host = |host: Option<String>| host.ok_or_else(|| anyhow!("--host is required"));
    let command = match command.as_deref() {
        Some("discover") | None => Command::Discover { seconds },
        Some("pair") => Command::Pair {
            host: require_host(host)?,
            pin: pin.ok_or_else(|| anyhow!("--pin is required"))?,
        },
        Some("stream") => Command::Stream {
            host: require_host(host)?,
            preset,
            pin,
        },
        Some("forget") => Command::Forget {
            host: require_host(host)?,
        },
        Some(_) => Command::ServePairing { port },
    };

    Ok(Args {
        debug,
        log_file,
        config,
        state_dir,
        command,
    })
}

fn print_help() {
    println!("limelight - discover, pair with and launch sessions on LAN game-streaming hosts");
    println!();
    println!("Usage: limelight [OPTIONS] <COMMAND>");
    println!();
    println!("Commands:");
    println!("  discover                          List hosts seen on the network");
    println!("  pair --host NAME --pin PIN        Pair with a host");
    println!("  stream --host NAME [--pin PIN]    Launch a stream, pairing first if needed");
    println!("  forget --host NAME                Drop the cached key for a host");
    println!("  serve-pairing [--port PORT]       Run a pairing host on this machine");
    println!();
    println!("Options:");
    println!("  -d, --debug          Enable debug logging");
    println!("  -l, --log-file PATH  Write logs to PATH instead of stderr");
    println!("  -c, --config PATH    Load client configuration from a TOML file");
    println!("      --state-dir DIR  Persist identity and keys under DIR");
    println!("      --preset NAME    720p30, 720p60, 1080p30 or 1080p60");
    println!("      --seconds N      How long `discover` browses (default: 5)");
    println!("  -h, --help           Show this help message");
    println!();
    println!("RUST_LOG overrides the log filter.");
}

fn setup_logging(args: &Args) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let default = if args.debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let Some(path) = &args.log_file else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(args.debug)
            .init();
        return Ok(None);
    };

    let file = std::fs::File::create(path)
        .with_context(|| format!("cannot create log file {}", path.display()))?;
    let (non_blocking, guard) = tracing_appender::non_blocking(file);
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();
    info!("Logging to {:?}", path);
    Ok(Some(guard))
}

fn load_config(args: &Args) -> Result<ClientConfig> {
    let mut config = match &args.config {
        Some(path) => ClientConfig::load(path)?,
        None => ClientConfig::default(),
    };
    if let Some(dir) = &args.state_dir {
        config.state_dir = Some(dir.clone());
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = parse_args()?;
    let _guard = setup_logging(&args)?;
    let config = load_config(&args)?;

    let result = match &args.command {
        Command::Discover { seconds } => discover(config, Duration::from_secs(*seconds)).await,
        Command::Pair { host, pin } => pair(config, host, pin).await,
        Command::Stream { host, preset, pin } => {
            stream(config, host, *preset, pin.as_deref()).await
        }
        Command::Forget { host } => forget(config, host).await,
        Command::ServePairing { port } => serve_pairing(config, *port).await,
    };

    if let Err(e) = &result {
        if let Some(Error::Pairing(pairing)) = e.downcast_ref::<Error>() {
            eprintln!("{}", pairing.recovery_hint());
        }
    }
    result
}

async fn discover(config: ClientConfig, duration: Duration) -> Result<()> {
    let mut coordinator = ClientBuilder::from_config(config).build()?;
    let (tx, mut events) = mpsc::unbounded_channel::<DiscoveryEvent>();
    coordinator.start_discovery(tx)?;

    let deadline = Instant::now() + duration;
    while let Ok(Some(event)) = time::timeout_at(deadline, events.recv()).await {
        match &event {
            DiscoveryEvent::Updated { host, current, .. } => {
                info!("{} is {} ({:?})", host.name, current, host.address())
            }
            DiscoveryEvent::Removed(host) => info!("{} went away", host.name),
        }
    }
    coordinator.stop_discovery();

    let hosts = coordinator.hosts().await;
    if hosts.is_empty() {
        println!("No hosts found");
    }
    for host in hosts {
        let address = host
            .address()
            .map_or_else(|| "-".to_string(), |a| a.to_string());
        let paired = coordinator.cached_key(&host.name).await.is_some();
        println!(
            "{:<24} {:<10} {:<24} {}",
            host.name,
            host.state,
            address,
            if paired { "paired" } else { "" }
        );
    }
    Ok(())
}

/// Start discovery and wait until `name` resolves.
async fn connect_to(config: ClientConfig, name: &str) -> Result<SessionCoordinator> {
    let wait = config.resolve_timeout() * 2;
    let mut coordinator = ClientBuilder::from_config(config).build()?;
    let (tx, mut events) = mpsc::unbounded_channel::<DiscoveryEvent>();
    coordinator.start_discovery(tx)?;

    let deadline = Instant::now() + wait;
    loop {
        match time::timeout_at(deadline, events.recv()).await {
            Ok(Some(event)) if event.host().name == name && event.host().is_resolved() => break,
            Ok(Some(_)) => continue,
            Ok(None) | Err(_) => bail!("host {} did not resolve within {:?}", name, wait),
        }
    }
    Ok(coordinator)
}

async fn pair(config: ClientConfig, name: &str, pin: &str) -> Result<()> {
    let coordinator = connect_to(config, name).await?;
    let key = coordinator.pair(name, pin).await?;
    println!("Paired with {} (key id {})", name, key.key_id());
    Ok(())
}

async fn stream(
    config: ClientConfig,
    name: &str,
    preset: Option<StreamPreset>,
    pin: Option<&str>,
) -> Result<()> {
    let coordinator = connect_to(config, name).await?;
    let launched = coordinator.begin_streaming(name, preset, pin).await?;
    println!(
        "Launched {}x{}@{} on {}{}",
        launched.config.width(),
        launched.config.height(),
        launched.config.fps(),
        launched.host.name,
        if launched.newly_paired { " (newly paired)" } else { "" }
    );
    Ok(())
}

async fn forget(config: ClientConfig, name: &str) -> Result<()> {
    let coordinator = connect_to(config, name).await?;
    if coordinator.forget(name).await? {
        println!("Forgot {}", name);
    } else {
        println!("{} was not paired", name);
    }
    Ok(())
}

async fn serve_pairing(config: ClientConfig, port: u16) -> Result<()> {
    let identity = match &config.state_dir {
        Some(dir) => PairingIdentity::load_or_generate(&dir.join(HOST_IDENTITY_FILE))?,
        None => {
            warn!("No state directory; host identity will not survive a restart");
            PairingIdentity::generate()
        }
    };
    let pin = Pin::random();
    let responder = PairingResponder::new(identity, pin.clone());
    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("cannot listen on port {}", port))?;

    println!("Pairing PIN: {}", pin.as_str());
    println!("Fingerprint: {}", responder.fingerprint().to_hex());
    info!("Accepting pairing requests on {}", listener.local_addr()?);
    serve_tcp(responder, listener).await?;
    Ok(())
}
