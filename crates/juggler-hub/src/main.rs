use clap::Parser;
use juggler_core::http_frame::DEFAULT_MAX_REQUEST_BYTES;
use juggler_core::QueueOrderMode;
use juggler_hub::bridge::{SharedBridge, UnconfiguredBridge};
use juggler_hub::listener::{self, ListenerContext};
use juggler_hub::registry::{RegistrySettings, SessionRegistry};
use juggler_hub::{actor, controller};
use std::{
    fs::OpenOptions,
    io::{self, Write},
    net::SocketAddr,
    path::PathBuf,
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt::writer::BoxMakeWriter, EnvFilter};

const DEFAULT_ADDR: &str = "127.0.0.1:7483";
const LOG_FILE_NAME: &str = "juggler-hub.log";
const REGISTRY_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Clone, Debug)]
struct Config {
    addr: String,
    queue_order: QueueOrderMode,
    auto_advance: bool,
    auto_restart: bool,
    debug: bool,
    log_dir: String,
    command_capacity: usize,
}

#[derive(Parser, Debug)]
#[command(name = "juggler-hub")]
struct Args {
    #[arg(long, default_value = "")]
    addr: String,
    #[arg(long, default_value = "")]
    queue_order: String,
    #[arg(long, default_value_t = false)]
    auto_advance: bool,
    #[arg(long, default_value = "")]
    auto_restart: String,
    #[arg(long, default_value_t = false)]
    debug: bool,
    #[arg(long, default_value = "")]
    log_dir: String,
    #[arg(long, default_value_t = 256)]
    command_capacity: usize,
}

#[tokio::main]
async fn main() {
    let config = load_config();
    let _log_guard = init_logging(&config);
    let addr: SocketAddr = match config.addr.parse() {
        Ok(value) => value,
        Err(err) => {
            error!(event = "invalid_addr", error = %err, addr = %config.addr);
            return;
        }
    };
    if !addr.ip().is_loopback() {
        error!(event = "invalid_addr", addr = %config.addr);
        return;
    }

    let settings = RegistrySettings {
        queue_order: config.queue_order,
        auto_advance: config.auto_advance,
        auto_restart: config.auto_restart,
    };
    let (registry, registry_task) =
        actor::spawn(SessionRegistry::new(settings), config.command_capacity);
    let bridge: SharedBridge = Arc::new(UnconfiguredBridge);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(value) => value,
        Err(err) => {
            error!(event = "hub_error", error = %err, addr = %addr);
            return;
        }
    };

    info!(
        event = "hub_start",
        addr = %addr,
        queue_order = %config.queue_order,
        auto_advance = config.auto_advance,
        auto_restart = config.auto_restart
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        let _ = shutdown_tx.send(true);
    });

    let controller_task = tokio::spawn(controller::run(
        registry.clone(),
        registry.subscribe_notices(),
        bridge.clone(),
        shutdown_rx.clone(),
    ));

    let ctx = Arc::new(ListenerContext {
        registry,
        bridge,
        max_request_bytes: DEFAULT_MAX_REQUEST_BYTES,
    });
    if let Err(err) = listener::run(listener, ctx, shutdown_rx).await {
        error!(event = "hub_error", error = %err);
    }

    let _ = controller_task.await;
    if tokio::time::timeout(REGISTRY_DRAIN_TIMEOUT, registry_task)
        .await
        .is_err()
    {
        warn!(event = "registry_drain_timeout");
    }
    info!(event = "hub_stop");
}

fn load_config() -> Config {
    let args = Args::parse();
    let debug = args.debug || env_true("JUGGLER_DEBUG");
    let auto_advance = args.auto_advance || env_true("JUGGLER_AUTO_ADVANCE");
    let auto_restart = resolve_flag(&args.auto_restart, "JUGGLER_AUTO_RESTART", true);
    Config {
        addr: resolve_addr(&args.addr),
        queue_order: resolve_queue_order(&args.queue_order),
        auto_advance,
        auto_restart,
        debug,
        log_dir: resolve_log_dir(&args.log_dir),
        command_capacity: args.command_capacity,
    }
}

fn init_logging(config: &Config) -> Option<LogGuard> {
    let level = if config.debug {
        "debug".to_string()
    } else if let Ok(level) = std::env::var("JUGGLER_LOG_LEVEL") {
        level
    } else {
        "info".to_string()
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let writer = match open_log_file(&config.log_dir) {
        Ok(log_guard) => log_guard,
        Err(err) => {
            eprintln!("log_file_error: {err}");
            LogGuard { file: None }
        }
    };
    let file = writer.file.clone();
    let make_writer = BoxMakeWriter::new(move || MultiWriter::new(file.clone()));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(make_writer)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        return None;
    }
    Some(writer)
}

struct LogGuard {
    file: Option<Arc<Mutex<std::fs::File>>>,
}

struct MultiWriter {
    stdout: io::Stdout,
    file: Option<Arc<Mutex<std::fs::File>>>,
}

impl MultiWriter {
    fn new(file: Option<Arc<Mutex<std::fs::File>>>) -> Self {
        Self {
            stdout: io::stdout(),
            file,
        }
    }
}

impl Write for MultiWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let _ = self.stdout.write_all(buf);
        if let Some(file) = &self.file {
            if let Ok(mut file) = file.lock() {
                let _ = file.write_all(buf);
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let _ = self.stdout.flush();
        if let Some(file) = &self.file {
            if let Ok(mut file) = file.lock() {
                let _ = file.flush();
            }
        }
        Ok(())
    }
}

fn open_log_file(log_dir: &str) -> io::Result<LogGuard> {
    if log_dir.trim().is_empty() {
        return Ok(LogGuard { file: None });
    }
    let dir = PathBuf::from(log_dir);
    if std::fs::create_dir_all(&dir).is_err() {
        return Ok(LogGuard { file: None });
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join(LOG_FILE_NAME))?;
    Ok(LogGuard {
        file: Some(Arc::new(Mutex::new(file))),
    })
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn env_true(key: &str) -> bool {
    std::env::var(key)
        .ok()
        .and_then(|value| parse_bool(&value))
        .unwrap_or(false)
}

fn resolve_flag(flag: &str, env_key: &str, default: bool) -> bool {
    if let Some(value) = parse_bool(flag) {
        return value;
    }
    std::env::var(env_key)
        .ok()
        .and_then(|value| parse_bool(&value))
        .unwrap_or(default)
}

fn resolve_env(flag: &str, env_key: &str) -> Option<String> {
    if !flag.trim().is_empty() {
        return Some(flag.to_string());
    }
    std::env::var(env_key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

fn resolve_addr(addr_flag: &str) -> String {
    resolve_env(addr_flag, "JUGGLER_ADDR").unwrap_or_else(|| DEFAULT_ADDR.to_string())
}

fn resolve_queue_order(flag: &str) -> QueueOrderMode {
    let Some(raw) = resolve_env(flag, "JUGGLER_QUEUE_ORDER") else {
        return QueueOrderMode::default();
    };
    match raw.parse() {
        Ok(mode) => mode,
        Err(err) => {
            eprintln!("queue_order_error: {err}");
            QueueOrderMode::default()
        }
    }
}

fn resolve_log_dir(log_dir_flag: &str) -> String {
    resolve_env(log_dir_flag, "JUGGLER_LOG_DIR").unwrap_or_else(|| ".juggler/logs".to_string())
}
