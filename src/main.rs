//! src/main.rs
//! Binary entry point: loads config, starts the prober, accepts client
//! connections, and exposes a minimal stdin REPL onto the control surface.

use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpListener;
use tracing::{error, info};

use runway_proxy::config::Config;
use runway_proxy::control::{ControlSurface, EventFeed, Stats};
use runway_proxy::platform;
use runway_proxy::registry::Registry;
use runway_proxy::resolver::DnsCache;
use runway_proxy::{logging, prober, session};

#[derive(Parser, Debug)]
#[command(name = "runway-proxy", about = "Multi-interface SOCKS5/HTTP CONNECT proxy")]
struct Args {
    /// Path to the JSON config file; created with defaults if missing.
    #[arg(long, default_value = "proxy_config.json")]
    config: PathBuf,

    /// Overrides the bind address from the config file, e.g. 0.0.0.0:1080.
    #[arg(long)]
    bind: Option<String>,

    /// Initial tracing filter directive (e.g. "info", "debug,tokio=warn").
    #[arg(long, default_value = "info")]
    log_filter: String,
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let args = Args::parse();
    logging::init_logging(&args.log_filter);

    let mut config = Config::load_or_init(&args.config);
    if let Some(bind) = &args.bind {
        match parse_bind(bind) {
            Ok((ip, port)) => {
                config.bind_ip = ip;
                config.bind_port = port;
            }
            Err(e) => {
                error!(error = %e, "invalid --bind value");
                return std::process::ExitCode::FAILURE;
            }
        }
    }

    let bind_addr = format!("{}:{}", config.bind_ip, config.bind_port);
    let listener = match TcpListener::bind(&bind_addr).await {
        Ok(l) => l,
        Err(e) => {
            error!(error = %e, addr = %bind_addr, "failed to bind listener");
            return std::process::ExitCode::FAILURE;
        }
    };
    info!(addr = %bind_addr, "listening");

    let interfaces = platform::list_interfaces();
    let registry = Arc::new(Registry::new(&interfaces, &config.upstream_proxies));
    let stats = Arc::new(Stats::default());
    let events = Arc::new(EventFeed::default());
    let dns_cache = Arc::new(DnsCache::new());
    let config = Arc::new(tokio::sync::RwLock::new(config));
    let control = Arc::new(ControlSurface::new(
        registry.clone(),
        stats.clone(),
        events.clone(),
        config.clone(),
        args.config.clone(),
    ));

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let prober_handle = tokio::spawn(prober::run(
        registry.clone(),
        config.clone(),
        events.clone(),
        shutdown_rx.clone(),
    ));

    let accept_handle = tokio::spawn(accept_loop(
        listener,
        registry.clone(),
        config.clone(),
        stats.clone(),
        dns_cache.clone(),
        shutdown_rx.clone(),
    ));

    let repl_handle = tokio::spawn(run_repl(control, shutdown_tx.clone()));

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("received interrupt, shutting down");
        }
        _ = repl_handle => {
            info!("control REPL exited, shutting down");
        }
    }

    let _ = shutdown_tx.send(true);
    let _ = prober_handle.await;
    accept_handle.abort();

    std::process::ExitCode::SUCCESS
}

fn parse_bind(bind: &str) -> Result<(String, u16), String> {
    let (ip, port) = bind
        .rsplit_once(':')
        .ok_or_else(|| format!("expected host:port, got {bind}"))?;
    let port: u16 = port
        .parse()
        .map_err(|_| format!("invalid port in {bind}"))?;
    Ok((ip.to_string(), port))
}

async fn accept_loop(
    listener: TcpListener,
    registry: Arc<Registry>,
    config: Arc<tokio::sync::RwLock<Config>>,
    stats: Arc<Stats>,
    dns_cache: Arc<DnsCache>,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        info!(%peer, "accepted connection");
                        let registry = registry.clone();
                        let config = config.clone();
                        let stats = stats.clone();
                        let dns_cache = dns_cache.clone();
                        tokio::spawn(async move {
                            session::handle(stream, registry, config, stats, dns_cache).await;
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "accept failed");
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return;
                }
            }
        }
    }
}

/// A thin line-oriented REPL onto the control surface: `stats`, `runways`,
/// `latency`, `events [n]`, `reload`, `quit`. The interactive operator shell
/// itself lives outside this process; this is just enough to drive it from
/// a terminal during local operation.
async fn run_repl(control: Arc<ControlSurface>, shutdown_tx: tokio::sync::watch::Sender<bool>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("runway> ");
        let _ = std::io::stdout().flush();

        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => return,
            Err(_) => return,
        };

        match line.trim() {
            "stats" => {
                let s = control.stats();
                println!(
                    "total={} active={} failed={}",
                    s.total_connections, s.active_connections, s.failed_connections
                );
            }
            "runways" => {
                for view in control.runway_view() {
                    println!(
                        "{} status={} last_probe_age_secs={:?}",
                        view.key, view.status, view.last_probe_age_secs
                    );
                }
            }
            "latency" => {
                for view in control.runway_view() {
                    for (target, secs) in view.latencies {
                        println!("{} {} {:.4}s", view.key, target, secs);
                    }
                }
            }
            cmd if cmd.starts_with("events") => {
                let n: usize = cmd
                    .strip_prefix("events")
                    .unwrap_or("")
                    .trim()
                    .parse()
                    .unwrap_or(20);
                for event in control.recent_events(n) {
                    println!(
                        "{} {:?}->{:?} latency={:?}",
                        event.runway, event.from, event.to, event.latency
                    );
                }
            }
            "reload" => match control.reload_config().await {
                Ok(()) => println!("config reloaded"),
                Err(e) => println!("reload failed: {e}"),
            },
            "quit" | "exit" => {
                let _ = shutdown_tx.send(true);
                return;
            }
            "" => {}
            other => println!("unrecognized command: {other}"),
        }
    }
}
