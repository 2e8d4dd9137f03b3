use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info, warn};

/// Stand-in worker service for supervisor tests
#[derive(Parser, Debug, Clone)]
#[command(name = "fakeworker")]
struct Args {
    /// Instance directory; tells concurrent workers apart
    instance: Option<PathBuf>,

    #[arg(long, default_value = "127.0.0.1")]
    listen: String,

    #[arg(long, default_value = "8188")]
    port: u16,

    /// Keep running when interrupted
    #[arg(long)]
    ignore_interrupt: bool,

    /// Replace this process with a fresh copy after this many milliseconds
    #[arg(long)]
    restart_after_ms: Option<u64>,

    /// Exit by itself after this many milliseconds
    #[arg(long)]
    exit_after_ms: Option<u64>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_ansi(false)
        .init();

    let args = Args::parse();
    info!(pid = std::process::id(), "fakeworker starting with {:?}", args);

    let addr: SocketAddr = match format!("{}:{}", args.listen, args.port).parse() {
        Ok(addr) => addr,
        Err(e) => {
            error!("Invalid listen address: {}", e);
            std::process::exit(2);
        }
    };
    // Installed before the port opens
    let mut interrupts = match Interrupts::install() {
        Ok(interrupts) => interrupts,
        Err(e) => {
            error!("Failed to install signal handlers: {}", e);
            std::process::exit(2);
        }
    };
    tokio::spawn(run_stats_server(addr));

    let restart = async {
        match args.restart_after_ms {
            Some(ms) => tokio::time::sleep(Duration::from_millis(ms)).await,
            None => std::future::pending().await,
        }
    };
    let exit = async {
        match args.exit_after_ms {
            Some(ms) => tokio::time::sleep(Duration::from_millis(ms)).await,
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        _ = wait_for_interrupt(&mut interrupts, args.ignore_interrupt) => info!("Interrupted, shutting down"),
        _ = exit => info!("Exit timer elapsed"),
        _ = restart => {
            respawn(&args);
            info!("Handing over to restarted copy");
        }
    }
}

/// Starts a copy of this worker without the restart flag, then returns.
fn respawn(args: &Args) {
    let exe = match std::env::current_exe() {
        Ok(exe) => exe,
        Err(e) => {
            error!("Cannot locate own executable: {}", e);
            return;
        }
    };

    let mut command = std::process::Command::new(exe);
    if let Some(instance) = &args.instance {
        command.arg(instance);
    }
    command
        .args(["--listen", &args.listen])
        .args(["--port", &args.port.to_string()]);
    if args.ignore_interrupt {
        command.arg("--ignore-interrupt");
    }

    match command.spawn() {
        Ok(child) => info!(pid = child.id(), "Restarted copy spawned"),
        Err(e) => error!("Failed to spawn restarted copy: {}", e),
    }
}

struct Interrupts {
    #[cfg(unix)]
    sigint: tokio::signal::unix::Signal,
    #[cfg(unix)]
    sigterm: tokio::signal::unix::Signal,
}

impl Interrupts {
    #[cfg(unix)]
    fn install() -> std::io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};
        Ok(Self {
            sigint: signal(SignalKind::interrupt())?,
            sigterm: signal(SignalKind::terminate())?,
        })
    }

    #[cfg(windows)]
    fn install() -> std::io::Result<Self> {
        Ok(Self {})
    }

    #[cfg(unix)]
    async fn recv(&mut self) -> &'static str {
        tokio::select! {
            _ = self.sigint.recv() => "SIGINT",
            _ = self.sigterm.recv() => "SIGTERM",
        }
    }

    #[cfg(windows)]
    async fn recv(&mut self) -> &'static str {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
        "Ctrl+C"
    }
}

async fn wait_for_interrupt(interrupts: &mut Interrupts, ignore: bool) {
    loop {
        let signal = interrupts.recv().await;
        info!("Received {}", signal);
        if !ignore {
            return;
        }
        warn!("Ignoring {}", signal);
    }
}

async fn run_stats_server(addr: SocketAddr) {
    use http_body_util::Full;
    use hyper::body::Bytes;
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper::{Request, Response, StatusCode};
    use hyper_util::rt::TokioIo;
    use tokio::net::TcpListener;

    // A restarted copy may race its predecessor for the port
    let mut attempts = 0;
    let listener = loop {
        match TcpListener::bind(addr).await {
            Ok(listener) => break listener,
            Err(e) if attempts < 100 => {
                attempts += 1;
                if attempts == 1 {
                    warn!("Port busy ({}), retrying", e);
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            Err(e) => {
                error!("Failed to bind {}: {}", addr, e);
                return;
            }
        }
    };
    info!("Listening on http://{}", addr);

    loop {
        let (stream, _) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!("Failed to accept connection: {}", e);
                continue;
            }
        };

        tokio::spawn(async move {
            let service = service_fn(|req: Request<hyper::body::Incoming>| async move {
                let response = if req.uri().path() == "/system_stats" {
                    let body = serde_json::json!({
                        "system": {
                            "os": "fakeworker",
                            "pid": std::process::id(),
                        }
                    });
                    Response::builder()
                        .status(StatusCode::OK)
                        .header("content-type", "application/json")
                        .body(Full::new(Bytes::from(body.to_string())))
                } else {
                    Response::builder()
                        .status(StatusCode::NOT_FOUND)
                        .body(Full::new(Bytes::from_static(b"not found")))
                };
                response.map_err(|e| e.to_string())
            });

            if let Err(e) = http1::Builder::new()
                .serve_connection(TokioIo::new(stream), service)
                .await
            {
                warn!("Error serving connection: {}", e);
            }
        });
    }
}
