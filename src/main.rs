use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use droid_notifier::actions::{CopyAction, DisplayAction, ExecuteAction, MuteAction};
use droid_notifier::app::preferences::{self, PreferenceStore, PreferenceValue};
use droid_notifier::app::Config;
use droid_notifier::listener::{DatagramListener, StreamListener, TcpTransport};
use droid_notifier::manager::{DispatchManager, ManagerError};
use droid_notifier::notify::protocol::encode_v2;
use droid_notifier::notify::{self, EventType, DEFAULT_PORT};

/// Droid Notifier - receive notifications pushed from an Android phone
#[derive(Parser)]
#[command(name = "droid-notifier")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the notifier until interrupted (default)
    Run,
    /// Send one raw payload to a running notifier
    Send {
        #[arg(long, value_enum, default_value_t = Transport::Udp)]
        transport: Transport,
        #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::LOCALHOST))]
        host: IpAddr,
        #[arg(long, default_value_t = DEFAULT_PORT)]
        port: u16,
        /// Payload text, e.g. "v2/dev1/42/SMS/+15551234/hello"; a ping when omitted
        payload: Option<String>,
    },
    /// Decode a payload and print it as JSON
    Decode {
        payload: String,
    },
    /// Inspect or change preferences
    Prefs {
        #[command(subcommand)]
        action: PrefsAction,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Transport {
    Udp,
    Tcp,
}

#[derive(Subcommand)]
enum PrefsAction {
    /// Print every preference
    List,
    /// Print one preference
    Get { key: String },
    /// Set a preference (`true`/`false`, comma-separated for pairedDevices)
    Set { key: String, value: String },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load().unwrap_or_else(|e| {
        eprintln!("Warning: {:#}; using default config", e);
        Config::default()
    });

    // ログ初期化
    let level = cli.log_level.as_deref().unwrap_or(&config.log_level);
    init_logging(level)?;

    match cli.command {
        Some(Commands::Send {
            transport,
            host,
            port,
            payload,
        }) => {
            let payload = payload.unwrap_or_else(ping_payload);
            handle_send(transport, SocketAddr::new(host, port), &payload)
        }
        Some(Commands::Decode { payload }) => handle_decode(&payload),
        Some(Commands::Prefs { action }) => handle_prefs(&config, action),
        Some(Commands::Run) | None => run_daemon(config),
    }
}

fn handle_send(transport: Transport, target: SocketAddr, payload: &str) -> Result<()> {
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async {
        match transport {
            Transport::Udp => notify::send_datagram(target, payload).await,
            Transport::Tcp => notify::send_stream(target, payload).await,
        }
    })?;
    info!(%target, "Payload sent");
    Ok(())
}

fn ping_payload() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    encode_v2("desktop", &id, &EventType::Ping, "", "Test notification")
}

fn handle_decode(payload: &str) -> Result<()> {
    let notification = notify::decode_str(payload)?;
    println!("{}", serde_json::to_string_pretty(&notification)?);
    Ok(())
}

fn handle_prefs(config: &Config, action: PrefsAction) -> Result<()> {
    let store = PreferenceStore::open(&config.preferences_path)?;

    match action {
        PrefsAction::List => {
            for (key, value) in store.snapshot() {
                println!("{} = {}", key, value);
            }
        }
        PrefsAction::Get { key } => match store.get(&key) {
            Some(value) => println!("{}", value),
            None => anyhow::bail!("unknown preference: {}", key),
        },
        PrefsAction::Set { key, value } => {
            let list = key == preferences::PAIRED_DEVICES;
            store.set(key, PreferenceValue::parse(&value, list));
            store.save()?;
            if let Some(path) = store.path() {
                info!("Preferences saved to {}", path.display());
            }
        }
    }
    Ok(())
}

fn init_logging(level: &str) -> Result<()> {
    let log_dir = directories::ProjectDirs::from("", "", "droid-notifier")
        .map(|d| d.data_dir().to_path_buf())
        .unwrap_or_else(|| std::env::temp_dir().join("droid-notifier"));

    std::fs::create_dir_all(&log_dir)?;
    let log_file = std::fs::File::create(log_dir.join("droid-notifier.log"))?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(log_file),
        )
        .init();

    Ok(())
}

fn run_daemon(config: Config) -> Result<()> {
    info!("Droid Notifier starting");

    let prefs = Arc::new(
        PreferenceStore::open(&config.preferences_path).with_context(|| {
            format!(
                "Failed to open preferences at {}",
                config.preferences_path.display()
            )
        })?,
    );

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async {
        // ファイル変更を監視してリスナー構成に反映
        let _watcher = match prefs.watch_file() {
            Ok(w) => w,
            Err(e) => {
                warn!("Preference file watch disabled: {:#}", e);
                None
            }
        };

        let mut manager = build_manager(&config, prefs.clone());

        if let Err(ManagerError::ListenersFailed(failures)) = manager.start().await {
            for failure in &failures {
                error!(listener = failure.listener(), "{}", failure);
                eprintln!("Warning: {}", failure);
            }
        }

        manager
            .run(async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    error!("Failed to listen for Ctrl-C: {}", e);
                }
            })
            .await;
    });

    info!("Droid Notifier stopped");
    Ok(())
}

fn build_manager(config: &Config, prefs: Arc<PreferenceStore>) -> DispatchManager {
    let mut manager = DispatchManager::new(prefs.clone()).with_dedup_window(config.dedup_window);

    manager.add_listener(
        Box::new(DatagramListener::new(config.datagram.socket_addr())),
        preferences::WIFI_METHOD,
    );
    manager.add_listener(
        Box::new(
            StreamListener::new("tcp", TcpTransport::new(config.tcp.socket_addr()))
                .with_poll_timeout(config.stream_poll_timeout())
                .with_read_timeout(config.stream_read_timeout()),
        ),
        preferences::TCP_METHOD,
    );
    add_bluetooth_listener(&mut manager, config, &prefs);

    manager.add_action(Arc::new(DisplayAction::new()));
    manager.add_action(Arc::new(CopyAction::new()));
    manager.add_action(Arc::new(MuteAction::new()));
    manager.add_action(Arc::new(ExecuteAction::new(prefs)));

    manager
}

#[cfg(feature = "bluetooth")]
fn add_bluetooth_listener(
    manager: &mut DispatchManager,
    config: &Config,
    _prefs: &PreferenceStore,
) {
    use droid_notifier::listener::RfcommTransport;

    let transport = RfcommTransport::new(
        config.bluetooth.service_name.clone(),
        config.bluetooth.service_uuid,
        config.bluetooth.channel,
    );
    manager.add_listener(
        Box::new(
            StreamListener::new("bluetooth", transport)
                .with_poll_timeout(config.stream_poll_timeout())
                .with_read_timeout(config.stream_read_timeout()),
        ),
        preferences::BLUETOOTH_METHOD,
    );
}

#[cfg(not(feature = "bluetooth"))]
fn add_bluetooth_listener(_manager: &mut DispatchManager, _config: &Config, prefs: &PreferenceStore) {
    if prefs.is_enabled(preferences::BLUETOOTH_METHOD) {
        warn!("bluetoothMethod is enabled but this build has no Bluetooth support");
    }
}
