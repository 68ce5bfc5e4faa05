use anyhow::Result;
use clap::Parser;
use gatecam::logging::{init_logging, level_from_flags};
use gatecam::error::EventBusError;
use gatecam::{
    EventBus, EventFilter, EventReceiver, FrameSurface, GatecamConfig, SessionEvent, SessionStore,
    StreamView,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, Instant};
use tracing::{debug, error, info, warn};

const SESSION_POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Parser, Debug)]
#[command(name = "gatecam")]
#[command(about = "Live video client for the gate access dashboard")]
#[command(version)]
#[command(long_about = "Mounts the gate camera live view: plays the MJPEG stream and falls back \
to base64 frames over WebSocket after repeated MJPEG failures. Stream URLs are derived from the \
API base URL and the session token.")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "gatecam.toml", help = "Path to TOML configuration file")]
    config: String,

    /// Enable debug logging (most verbose)
    #[arg(short, long, help = "Enable debug level logging")]
    debug: bool,

    /// Enable verbose logging (info level)
    #[arg(short, long, help = "Enable verbose info level logging")]
    verbose: bool,

    /// Enable quiet mode (errors only)
    #[arg(short, long, help = "Enable quiet mode - only log errors")]
    quiet: bool,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration file and exit")]
    validate_config: bool,

    /// Print default configuration and exit
    #[arg(long, help = "Print default configuration in TOML format and exit")]
    print_config: bool,

    /// Override log format (json, pretty, compact)
    #[arg(long, value_name = "FORMAT", help = "Log output format: json, pretty, or compact")]
    log_format: Option<String>,

    /// Also write logs to this file
    #[arg(long, value_name = "PATH")]
    log_file: Option<PathBuf>,

    /// Stream token; defaults to the signed-in session's token
    #[arg(long)]
    token: Option<String>,

    /// Use this MJPEG URL instead of deriving it
    #[arg(long, value_name = "URL")]
    mjpeg_url: Option<String>,

    /// Use this WebSocket URL instead of deriving it
    #[arg(long, value_name = "URL")]
    ws_url: Option<String>,

    /// Write the last rendered frame here on exit
    #[arg(long, value_name = "PATH")]
    snapshot: Option<PathBuf>,

    /// Stop after this many seconds
    #[arg(long, value_name = "SECONDS")]
    duration: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_config {
        println!("# Gatecam Configuration File");
        println!("# This is the default configuration with all available options");
        println!();
        println!("{}", GatecamConfig::default().to_toml()?);
        return Ok(());
    }

    let _log_guard = init_logging(
        level_from_flags(args.debug, args.verbose, args.quiet),
        args.log_format.as_deref(),
        args.log_file.as_deref(),
        args.debug,
    )?;

    info!("Starting gatecam v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", args.config);

    let mut config = GatecamConfig::load_from_file(&args.config).map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;
    if args.mjpeg_url.is_some() {
        config.stream.mjpeg_url = args.mjpeg_url.clone();
    }
    if args.ws_url.is_some() {
        config.stream.ws_url = args.ws_url.clone();
    }

    if args.validate_config {
        match config.validate() {
            Ok(()) => {
                println!("✓ Configuration is valid");
                return Ok(());
            }
            Err(e) => {
                eprintln!("✗ Configuration validation failed: {}", e);
                std::process::exit(1);
            }
        }
    }
    config.validate()?;

    let session = SessionStore::init_global(config.system.session_file.as_ref().map(PathBuf::from));
    let follow_session = args.token.is_none();
    let Some(token) = args.token.clone().or_else(|| session.token()) else {
        anyhow::bail!("No stream token: pass --token or sign in first");
    };

    let event_bus = Arc::new(if args.debug {
        EventBus::with_debug_logging(config.system.event_bus_capacity)
    } else {
        EventBus::new(config.system.event_bus_capacity)
    });
    let mut events = EventReceiver::new(event_bus.subscribe(), EventFilter::All, "cli".to_string());
    let surface = Arc::new(FrameSurface::new());
    let mut frames = surface.subscribe();

    let view = StreamView::from_config(&config, &token, Arc::clone(&surface), Arc::clone(&event_bus))?;

    // A session cleared elsewhere ends the view, like signing out in the dashboard
    let (signed_out_tx, mut signed_out_rx) = tokio::sync::mpsc::unbounded_channel();
    let subscription = follow_session.then(|| {
        session.subscribe(move |event, user| {
            if user.is_none() && *event != SessionEvent::SignedIn {
                let _ = signed_out_tx.send(());
            }
        })
    });

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let deadline = args.duration.map(|secs| Instant::now() + Duration::from_secs(secs));
    let expired = async move {
        match deadline {
            Some(deadline) => tokio::time::sleep_until(deadline).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(expired);
    let mut session_poll = interval(SESSION_POLL_INTERVAL);

    let reason = loop {
        tokio::select! {
            _ = &mut ctrl_c => break "interrupted",
            _ = &mut expired => break "duration elapsed",
            Some(()) = signed_out_rx.recv() => break "signed out",
            _ = session_poll.tick(), if follow_session => {
                session.reload();
            }
            event = events.recv() => match event {
                Ok(event) => info!("[{}] {}", event.event_type(), event.description()),
                Err(EventBusError::Lagged { .. }) => {}
                Err(_) => break "event bus closed",
            },
            changed = frames.changed() => {
                if changed.is_err() {
                    break "surface dropped";
                }
                let rendered = *frames.borrow_and_update();
                if rendered % 100 == 0 {
                    info!("{} frames rendered ({})", rendered, view.status().label);
                } else {
                    debug!("Frame {} rendered", rendered);
                }
            }
        }
    };
    info!("Stopping live view: {}", reason);

    if let Some(id) = subscription {
        session.unsubscribe(id);
    }

    let status = view.status();
    if let Some(path) = &args.snapshot {
        match surface.latest_frame() {
            Some(frame) => {
                tokio::fs::write(path, &frame.data).await?;
                info!("Wrote frame {} to {}", frame.id, path.display());
            }
            None => warn!("No frame was rendered, snapshot not written"),
        }
    }
    view.shutdown().await;

    println!(
        "{}: {} frames rendered, {} MJPEG failures",
        status.label, status.frames_rendered, status.failures
    );
    Ok(())
}
