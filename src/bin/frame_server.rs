use anyhow::Result;
use clap::Parser;
use gatecam::logging::{init_logging, level_from_flags};
use gatecam::{GatecamConfig, StreamServerBuilder};
use std::path::PathBuf;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "gatecam-frames")]
#[command(about = "Serve a directory of JPEG frames as MJPEG and WebSocket live video")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "gatecam.toml")]
    config: String,

    #[arg(short, long, help = "Enable debug level logging")]
    debug: bool,

    #[arg(short, long, help = "Enable verbose info level logging")]
    verbose: bool,

    #[arg(short, long, help = "Enable quiet mode - only log errors")]
    quiet: bool,

    #[arg(long, value_name = "FORMAT", help = "Log output format: json, pretty, or compact")]
    log_format: Option<String>,

    #[arg(long, value_name = "PATH")]
    log_file: Option<PathBuf>,

    /// Address to bind (overrides server.ip)
    #[arg(long)]
    ip: Option<String>,

    /// Port to listen on (overrides server.port)
    #[arg(short, long)]
    port: Option<u16>,

    /// Directory of JPEG frames (overrides server.frames_dir)
    #[arg(long, value_name = "DIR")]
    frames_dir: Option<String>,

    /// Frames per second per client (overrides server.fps)
    #[arg(long)]
    fps: Option<u32>,

    /// Accepted stream token; repeat for several
    #[arg(long = "token", value_name = "TOKEN")]
    tokens: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let _log_guard = init_logging(
        level_from_flags(args.debug, args.verbose, args.quiet),
        args.log_format.as_deref(),
        args.log_file.as_deref(),
        args.debug,
    )?;

    let mut config = GatecamConfig::load_from_file(&args.config)?;
    if let Some(ip) = args.ip {
        config.server.ip = ip;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(frames_dir) = args.frames_dir {
        config.server.frames_dir = frames_dir;
    }
    if let Some(fps) = args.fps {
        config.server.fps = fps;
    }
    if !args.tokens.is_empty() {
        config.server.accepted_tokens = args.tokens;
    }
    config.validate()?;

    let server = StreamServerBuilder::new()
        .config(config.server)
        .build()
        .await
        .map_err(|e| {
            error!("Failed to prepare frame server: {}", e);
            e
        })?;

    tokio::select! {
        result = server.start() => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down frame server");
        }
    }

    Ok(())
}
