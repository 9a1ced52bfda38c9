use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use clap::builder::ValueHint;
use clap::Parser;
use clap_derive::Parser;
use tokio::net::TcpListener;
use tokio::select;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use gaia_lib::db::store::{AccountStore, ObjectStore};
use gaia_lib::db::{open_account_store, open_object_store, CacheConfig, WorldCache};
use gaia_lib::input::Registry;
use gaia_lib::model::account::Role;
use gaia_lib::model::Account;
use gaia_lib::objdef;
use gaia_lib::tasks::sessions::MessageSink;
use gaia_lib::tasks::ticker::spawn_ticker;
use gaia_lib::tasks::{SessionHub, Shell};
use gaia_lib::values::config_object;
use gaia_lib::vm::Engine;

mod server;

const EXIT_OK: i32 = 0;
const EXIT_STARTUP: i32 = 1;
const EXIT_STORE: i32 = 2;
const EXIT_BIND: i32 = 3;

#[derive(Parser, Debug)]
struct Args {
    #[arg(
        long,
        env = "GAIA_WORLD",
        default_value = "mem:",
        help = "World store connection string (mem: or dir:<path>)"
    )]
    world: String,

    #[arg(
        long,
        env = "GAIA_ACCOUNTS",
        default_value = "mem:",
        help = "Account store connection string (mem: or dir:<path>)"
    )]
    accounts: String,

    #[arg(
        long,
        env = "GAIA_TELNET_ADDRESS",
        default_value = "0.0.0.0",
        help = "Listen address for the telnet listener"
    )]
    telnet_address: String,

    #[arg(
        long,
        env = "GAIA_TELNET_PORT",
        default_value = "8888",
        help = "Listen port for the telnet listener"
    )]
    telnet_port: u16,

    #[arg(
        long,
        env = "GAIA_WS_ADDRESS",
        default_value = "0.0.0.0",
        help = "Listen address for the WebSocket listener"
    )]
    ws_address: String,

    #[arg(
        long,
        env = "GAIA_WS_PORT",
        default_value = "4000",
        help = "Listen port for the WebSocket listener"
    )]
    ws_port: u16,

    #[arg(long, env = "GAIA_LOG_LEVEL", default_value = "info", help = "Log level")]
    log_level: String,

    #[arg(
        long,
        env = "GAIA_WORLD_DEFS",
        help = "Directory of world definition files to load at startup",
        value_hint = ValueHint::DirPath
    )]
    world_defs: Option<PathBuf>,

    #[arg(
        long,
        env = "GAIA_ADMIN_USER",
        help = "Bootstrap admin login, created if missing"
    )]
    admin_user: Option<String>,

    #[arg(
        long,
        env = "GAIA_ADMIN_PASSWORD",
        help = "Bootstrap admin password",
        hide_env_values = true
    )]
    admin_password: Option<String>,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() {
    let args = Args::parse();

    let level = tracing::Level::from_str(&args.log_level).unwrap_or(tracing::Level::INFO);
    let subscriber = tracing_subscriber::fmt()
        .compact()
        .with_target(false)
        .with_max_level(level)
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("could not configure logging");

    std::process::exit(run(args).await);
}

async fn run(args: Args) -> i32 {
    info!("GAIA server starting");

    let world_store: Arc<dyn ObjectStore> = match open_object_store(&args.world).await {
        Ok(store) => store,
        Err(e) => {
            error!(error = %e, conn = %args.world, "could not open world store");
            return EXIT_STORE;
        }
    };
    let account_store: Arc<dyn AccountStore> = match open_account_store(&args.accounts).await {
        Ok(store) => store,
        Err(e) => {
            error!(error = %e, conn = %args.accounts, "could not open account store");
            return EXIT_STORE;
        }
    };

    let cache_config = cache_config_from_store(&world_store).await;
    let cache = Arc::new(WorldCache::new(world_store, cache_config));

    if let Err(e) = objdef::ensure_core_objects(&cache).await {
        error!(error = %e, "could not establish core objects");
        return EXIT_STARTUP;
    }
    if let Some(defs) = &args.world_defs {
        match objdef::load_dir(&cache, defs).await {
            Ok(count) => info!(count, "world definitions loaded"),
            Err(e) => {
                error!(error = %e, "world definition load failed");
                return EXIT_STARTUP;
            }
        }
    }

    if let Err(e) = bootstrap_admin(&account_store, &args).await {
        error!(error = %e, "admin bootstrap failed");
        return EXIT_STARTUP;
    }

    let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
    let hub = Arc::new(SessionHub::new(cache.clone(), shutdown_tx));
    let registry = Arc::new(Registry::with_defaults());
    let engine = Arc::new(Engine::new(
        cache.clone(),
        hub.clone() as Arc<dyn MessageSink>,
        registry,
    ));
    let shell = Arc::new(Shell::new(engine.clone(), hub.clone(), account_store));

    let telnet_listener =
        match TcpListener::bind((args.telnet_address.as_str(), args.telnet_port)).await {
            Ok(listener) => listener,
            Err(e) => {
                error!(error = %e, port = args.telnet_port, "could not bind telnet listener");
                return EXIT_BIND;
            }
        };
    let ws_listener = match TcpListener::bind((args.ws_address.as_str(), args.ws_port)).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(error = %e, port = args.ws_port, "could not bind websocket listener");
            return EXIT_BIND;
        }
    };

    let writeback = cache.spawn_writeback();
    let ticker = spawn_ticker(engine.clone());
    let telnet = tokio::spawn(server::telnet::run_telnet_listener(
        telnet_listener,
        shell.clone(),
    ));
    let ws = tokio::spawn(server::ws::run_ws_listener(ws_listener, shell.clone()));

    let mut hup_signal = signal(SignalKind::hangup()).expect("could not register HUP handler");
    let mut int_signal = signal(SignalKind::interrupt()).expect("could not register INT handler");
    let mut term_signal = signal(SignalKind::terminate()).expect("could not register TERM handler");

    let code = loop {
        select! {
            message = shutdown_rx.recv() => {
                info!(message = ?message, "shutdown requested from in-game");
                break EXIT_OK;
            }
            _ = hup_signal.recv() => {
                info!("HUP received, stopping");
                break EXIT_OK;
            }
            _ = int_signal.recv() => {
                info!("INT received, stopping");
                break EXIT_OK;
            }
            _ = term_signal.recv() => {
                info!("TERM received, stopping");
                break EXIT_OK;
            }
        }
    };

    telnet.abort();
    ws.abort();
    ticker.abort();
    writeback.abort();
    if let Err(e) = cache.flush_now().await {
        warn!(error = %e, "final write-back incomplete");
    }
    info!("GAIA server stopped");
    code
}

/// Write-back tuning comes from the persisted `#config` document when one
/// exists; definition files loaded afterwards affect the interpreter's
/// limits but not the write-back cadence of this process.
async fn cache_config_from_store(store: &Arc<dyn ObjectStore>) -> CacheConfig {
    let mut config = CacheConfig::default();
    if let Ok(Some((obj, _))) = store.fetch(&config_object()).await {
        if let Some(v) = obj.own_attribute("writeback_interval_s") {
            let n = v.coerce_num();
            if n >= 1.0 {
                config.writeback_interval = Duration::from_secs(n as u64);
            }
        }
        if let Some(v) = obj.own_attribute("dirty_threshold") {
            let n = v.coerce_num();
            if n >= 1.0 {
                config.dirty_threshold = n as usize;
            }
        }
    }
    config
}

async fn bootstrap_admin(
    accounts: &Arc<dyn AccountStore>,
    args: &Args,
) -> Result<(), anyhow::Error> {
    let (Some(login), Some(password)) = (&args.admin_user, &args.admin_password) else {
        return Ok(());
    };
    if accounts.fetch_by_login(login).await?.is_some() {
        return Ok(());
    }
    let mut account = Account::new(login, password, "")?;
    account.roles.insert(Role::Builder);
    account.roles.insert(Role::Wizard);
    account.roles.insert(Role::Admin);
    accounts.store(&account, None).await?;
    info!(login = %login, "bootstrap admin account created");
    Ok(())
}
