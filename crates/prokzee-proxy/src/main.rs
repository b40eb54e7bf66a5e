//! ProKZee proxy core CLI: wires the config, store, CA, and subsystem
//! drivers together and runs the proxy listener and Admin API concurrently.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use prokzee_proxy::admin_api::{AdminApiServer, AppState, FuzzRegistry, ReplayRegistry};
use prokzee_proxy::broker::ApprovalBroker;
use prokzee_proxy::ca::CaManager;
use prokzee_proxy::config::Config;
use prokzee_proxy::error::StartupError;
use prokzee_proxy::events::EventBus;
use prokzee_proxy::fuzz::FuzzDriver;
use prokzee_proxy::matchreplace::MatchReplaceEngine;
use prokzee_proxy::oob::OobManager;
use prokzee_proxy::proxy::ProxyServer;
use prokzee_proxy::replay::ReplayDriver;
use prokzee_proxy::rules::RuleEngine;
use prokzee_proxy::scope::ScopeFilter;
use prokzee_proxy::store::Store;

#[derive(Parser, Debug)]
#[command(name = "prokzee-proxy")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the proxy listener and Admin API
    Run {
        /// Path to a YAML config file
        #[arg(long, value_name = "FILE", env = "PROKZEE_CONFIG")]
        config: Option<PathBuf>,
    },

    /// Parse and validate a config file without starting anything
    Validate {
        #[arg(long, value_name = "FILE")]
        config: PathBuf,
    },

    /// Print the root CA's subject, serial, and expiry
    CaInfo {
        /// Directory holding the root CA cert/key
        #[arg(long, value_name = "DIR")]
        ca_dir: Option<PathBuf>,
    },
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if let Err(err) = rustls::crypto::ring::default_provider().install_default() {
        error!(?err, "failed to install default rustls crypto provider");
        std::process::exit(1);
    }

    let exit_code = match cli.command {
        Commands::Run { config } => run(config),
        Commands::Validate { config } => validate(&config),
        Commands::CaInfo { ca_dir } => ca_info(ca_dir),
    };
    std::process::exit(exit_code);
}

fn validate(path: &PathBuf) -> i32 {
    match Config::from_file(path) {
        Ok(_) => {
            info!(path = %path.display(), "config is valid");
            0
        }
        Err(err) => {
            error!(%err, "config validation failed");
            StartupError::Config(err.to_string()).exit_code()
        }
    }
}

fn ca_info(ca_dir: Option<PathBuf>) -> i32 {
    let cert_dir = ca_dir.unwrap_or_else(CaManager::default_cert_dir);
    match CaManager::load_or_create(&cert_dir) {
        Ok(ca) => {
            let info = ca.info();
            println!("subject:    {}", info.subject);
            println!("serial:     {}", info.serial_hex);
            println!("not after:  {}", info.not_after);
            0
        }
        Err(err) => {
            error!(%err, "failed to load or create CA");
            err.exit_code()
        }
    }
}

fn run(config_path: Option<PathBuf>) -> i32 {
    let config = match config_path {
        Some(path) => match Config::from_file(&path) {
            Ok(c) => c,
            Err(err) => {
                error!(%err, path = %path.display(), "failed to load config");
                return StartupError::Config(err.to_string()).exit_code();
            }
        },
        None => Config::default(),
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(err) => {
            error!(%err, "failed to start tokio runtime");
            return 1;
        }
    };

    match runtime.block_on(run_async(config)) {
        Ok(()) => 0,
        Err(err) => {
            error!(%err, "fatal startup error");
            err.exit_code()
        }
    }
}

async fn run_async(config: Config) -> Result<(), StartupError> {
    let cert_dir = config
        .listen
        .ca_dir
        .as_ref()
        .map(PathBuf::from)
        .unwrap_or_else(CaManager::default_cert_dir);
    let ca = Arc::new(CaManager::load_or_create(&cert_dir)?);
    info!(cert_dir = %cert_dir.display(), "CA ready");

    let database_path = config
        .database_path
        .clone()
        .map(PathBuf::from)
        .unwrap_or_else(|| cert_dir.join("requests.db"));
    let store = Arc::new(Store::open(&database_path).map_err(|source| StartupError::DatabaseOpen {
        path: database_path.display().to_string(),
        source,
    })?);
    info!(path = %database_path.display(), "store opened");

    let scope = Arc::new(ScopeFilter::new(&config.scope).map_err(|e| StartupError::Config(e.to_string()))?);
    let rules = Arc::new(RuleEngine::new(config.rules.clone()).map_err(|e| StartupError::Config(e.to_string()))?);
    let match_replace = Arc::new(MatchReplaceEngine::new(config.match_replace.clone()));
    let broker = Arc::new(ApprovalBroker::new());
    let bus = Arc::new(EventBus::new());
    let intercept_enabled = Arc::new(AtomicBool::new(config.intercept_enabled));
    let replay = Arc::new(ReplayDriver::new());
    let fuzz = Arc::new(FuzzDriver::new());
    let oob = Arc::new(OobManager::new(bus.clone()));

    let proxy_addr: SocketAddr = config
        .listen
        .addr
        .parse()
        .map_err(|e| StartupError::Config(format!("invalid listen.addr: {e}")))?;
    let admin_addr: SocketAddr = config
        .admin_api
        .addr
        .parse()
        .map_err(|e| StartupError::Config(format!("invalid admin_api.addr: {e}")))?;

    let proxy_server = ProxyServer::new(
        proxy_addr,
        ca.clone(),
        scope.clone(),
        rules.clone(),
        match_replace.clone(),
        broker.clone(),
        store.clone(),
        bus.clone(),
        intercept_enabled.clone(),
    );

    let admin_state = AppState {
        ca,
        scope,
        rules,
        match_replace,
        broker,
        store,
        bus,
        intercept_enabled,
        replay,
        replay_registry: Arc::new(ReplayRegistry::default()),
        fuzz,
        fuzz_registry: Arc::new(FuzzRegistry::default()),
        oob,
    };
    let admin_server = AdminApiServer::new(admin_addr, admin_state);

    if let Some(server) = &config.oob_server {
        info!(server, "OOB server configured; start it via the Admin API to begin polling");
    }

    let proxy_task = tokio::spawn(async move {
        proxy_server
            .run()
            .await
            .map_err(|e| StartupError::ListenerBind { addr: proxy_addr, source: e })
    });
    let admin_task = tokio::spawn(async move {
        admin_server
            .run()
            .await
            .map_err(|e| StartupError::ListenerBind { addr: admin_addr, source: e })
    });

    tokio::select! {
        res = proxy_task => res.expect("proxy task panicked")?,
        res = admin_task => res.expect("admin task panicked")?,
    }

    Ok(())
}
