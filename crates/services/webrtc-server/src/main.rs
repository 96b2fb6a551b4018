//! WebRTC echo server entry point
//!
//! Answers WebRTC offers posted to `/offer` and echoes every data channel
//! message back to its sender.
//!
//! # Usage
//!
//! ```bash
//! # HTTPS on the default port
//! cargo run -p webrtc-echo-server -- \
//!   --cert-file ./cert.pem \
//!   --key-file ./key.pem
//!
//! # Plain HTTP on a local port with a STUN server and a fixed UDP range
//! cargo run -p webrtc-echo-server -- \
//!   --port 8080 \
//!   --stun-url stun:stun.l.google.com:19302 \
//!   --min-port 50000 --max-port 50100
//! ```

use clap::builder::BoolishValueParser;
use clap::{ArgAction, Parser};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use webrtc_echo::{
    FailureResponse, OfferServer, RtcSessionEngine, ServerConfig, SignalingConfig,
};

/// WebRTC echo server
///
/// Non-trickle offer/answer signaling over HTTP(S) with a data channel echo.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Listen address
    #[arg(long, default_value = "127.0.0.1", env = "SERVER_ADDR")]
    addr: String,

    /// Listen port
    #[arg(long, default_value_t = 443, env = "SERVER_PORT")]
    port: u16,

    /// TLS certificate (PEM); HTTPS is used when both cert and key are set
    #[arg(long, env = "CERT_FILE")]
    cert_file: Option<PathBuf>,

    /// TLS private key (PEM)
    #[arg(long, env = "KEY_FILE")]
    key_file: Option<PathBuf>,

    /// ICE (STUN) server URL
    #[arg(long, env = "STUN_URL")]
    stun_url: Option<String>,

    /// Externally visible IP advertised as the host candidate
    #[arg(long, env = "EXTERNAL_IP")]
    external_ip: Option<String>,

    /// Allowed CORS origins (comma-separated); everything when unset
    #[arg(long, value_delimiter = ',', env = "ALLOWED_ORIGINS")]
    allowed_origins: Vec<String>,

    /// Verbose diagnostics
    #[arg(
        long,
        env = "DEBUG",
        action = ArgAction::SetTrue,
        value_parser = BoolishValueParser::new()
    )]
    debug: bool,

    /// Lower bound of the UDP port range
    #[arg(long, default_value_t = 0, env = "MIN_PORT")]
    min_port: u16,

    /// Upper bound of the UDP port range
    #[arg(long, default_value_t = 0, env = "MAX_PORT")]
    max_port: u16,

    /// Maximum requests per second on /offer; unlimited when unset
    #[arg(long, env = "MAX_REQ_RATE")]
    max_req_rate: Option<f64>,

    /// Candidate gathering bound in seconds; 0 waits forever
    #[arg(long, default_value_t = 30, env = "GATHER_TIMEOUT_SECS")]
    gather_timeout_secs: u64,

    /// Report failed offers with 4xx/5xx statuses instead of an empty 200
    #[arg(
        long,
        env = "STRICT_ERRORS",
        action = ArgAction::SetTrue,
        value_parser = BoolishValueParser::new()
    )]
    strict_errors: bool,
}

impl Args {
    fn server_config(&self) -> anyhow::Result<ServerConfig> {
        let tls = ServerConfig::tls_from_paths(self.cert_file.clone(), self.key_file.clone())?;

        let allowed_origins = self
            .allowed_origins
            .iter()
            .map(|origin| origin.trim().to_string())
            .filter(|origin| !origin.is_empty())
            .collect();

        let gather_timeout = match self.gather_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };

        Ok(ServerConfig {
            addr: self.addr.clone(),
            port: self.port,
            tls,
            allowed_origins,
            max_request_rate: self.max_req_rate,
            failure_response: if self.strict_errors {
                FailureResponse::Status
            } else {
                FailureResponse::Silent
            },
            signaling: SignalingConfig {
                ice_server_url: self.stun_url.clone().filter(|url| !url.is_empty()),
                min_port: self.min_port,
                max_port: self.max_port,
                external_ip: self.external_ip.clone().filter(|ip| !ip.is_empty()),
                gather_timeout,
                diagnostics: self.debug,
                include_loopback_candidates: false,
            },
        })
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Set up Ctrl+C handler at the very start
    let shutdown_flag = Arc::new(AtomicBool::new(false));
    let shutdown_flag_handler = Arc::clone(&shutdown_flag);

    ctrlc::set_handler(move || {
        eprintln!("\nCtrl+C received, shutting down");

        if shutdown_flag_handler.swap(true, Ordering::SeqCst) {
            eprintln!("Shutdown already in progress, forcing immediate exit");
            std::process::exit(0);
        }
    })?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(num_cpus::get())
        .thread_name("echo-worker")
        .enable_all()
        .build()?;

    runtime.block_on(async_main(args, shutdown_flag))
}

async fn async_main(args: Args, shutdown_flag: Arc<AtomicBool>) -> anyhow::Result<()> {
    init_tracing(args.debug);

    let config = args.server_config()?;
    config.validate()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "WebRTC echo server starting"
    );
    info!(
        stun_url = config.signaling.ice_server_url.as_deref().unwrap_or("none"),
        cert_file = ?config.tls.as_ref().map(|t| &t.cert_file),
        key_file = ?config.tls.as_ref().map(|t| &t.key_file),
        debug = args.debug,
        min_port = config.signaling.min_port,
        max_port = config.signaling.max_port,
        max_req_rate = ?config.rate_limit(),
        gather_timeout = ?config.signaling.gather_timeout,
        "Configuration loaded"
    );

    let server = OfferServer::new(config, Arc::new(RtcSessionEngine::new()));

    let shutdown = async move {
        while !shutdown_flag.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        info!("Shutdown signal received, stopping server...");
    };

    server.serve(shutdown).await?;

    info!("Server shut down gracefully");
    Ok(())
}

fn init_tracing(debug: bool) {
    // RUST_LOG wins over the debug flag
    let default_level = if debug { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
