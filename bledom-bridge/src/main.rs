use std::path::PathBuf;
use std::time::Duration;

use bledom_bridge::config::{Config, default_config_path};
use bledom_bridge::mqtt::MqttBus;
use bledom_bridge::{Bridge, LightCommand, StatePayload};
use bledom_link::btle::BtleTransport;
use log::{error, info, warn};

#[derive(clap::Parser)]
#[command(name = "bledom-bridge")]
#[command(about = "MQTT to BLE bridge for ELK-BLEDOM lights")]
struct Cli {
    /// Config file (default: $BLEDOM_HOME/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Log debug output, including every frame sent
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Run the bridge (default)
    Run,
    /// Apply one JSON command to the light directly, bypassing MQTT
    Send {
        /// e.g. '{"state":"ON","color":{"r":255,"g":0,"b":0},"brightness":80}'
        json: String,
        /// Give up if the light cannot be reached within this many seconds
        #[arg(long, default_value_t = 60)]
        timeout: u64,
    },
    /// Validate the configuration and print what it resolves to
    CheckConfig,
}

#[tokio::main]
async fn main() {
    let cli: Cli = clap::Parser::parse();
    let level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let config = load_config(cli.config);

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(config).await,
        Commands::Send { json, timeout } => send(config, &json, Duration::from_secs(timeout)).await,
        Commands::CheckConfig => check_config(&config),
    }
}

fn load_config(path: Option<PathBuf>) -> Config {
    let path = match path.map_or_else(default_config_path, Ok) {
        Ok(path) => path,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };
    Config::load(&path).unwrap_or_else(|e| {
        eprintln!("Failed to load config from {}: {e}", path.display());
        std::process::exit(1);
    })
}

fn initial_state(config: &Config) -> bledom_bridge::LightState {
    // validated on load
    config.initial_state().unwrap_or_default()
}

async fn transport() -> BtleTransport {
    BtleTransport::new().await.unwrap_or_else(|e| {
        eprintln!("Failed to open Bluetooth adapter: {e}");
        std::process::exit(1);
    })
}

async fn run(config: Config) {
    let (link, events, link_task) = bledom_link::spawn(transport().await, config.link_config());
    let bus = MqttBus::start(&config.mqtt_settings());
    info!(
        "bridging {} to {} on {}:{}",
        config.device_address,
        bus.topics().command,
        config.mqtt_broker,
        config.mqtt_port
    );

    let bridge = Bridge::new(bus, link, events, initial_state(&config));
    let bus = bridge.run(shutdown_signal()).await;
    bus.close().await;
    if let Err(e) = link_task.await {
        error!("device link task failed: {e}");
    }
}

async fn send(config: Config, json: &str, timeout: Duration) {
    let command = LightCommand::parse(json.as_bytes()).unwrap_or_else(|e| {
        eprintln!("Invalid command: {e}");
        std::process::exit(1);
    });

    let (link, mut events, link_task) =
        bledom_link::spawn(transport().await, config.link_config());
    let applied = tokio::time::timeout(
        timeout,
        bledom_bridge::apply_once(&link, &mut events, initial_state(&config), &command),
    )
    .await;
    link.shutdown().await;
    if let Err(e) = link_task.await {
        warn!("device link task failed: {e}");
    }

    match applied {
        Ok(Ok(state)) => println!("{}", StatePayload::from(&state).to_json()),
        Ok(Err(e)) => {
            eprintln!("Failed to apply command: {e}");
            std::process::exit(1);
        }
        Err(_) => {
            eprintln!(
                "Could not reach {} within {}s",
                config.device_address,
                timeout.as_secs()
            );
            std::process::exit(1);
        }
    }
}

fn check_config(config: &Config) {
    let topics = config.topics();
    let link = config.link_config();
    println!("device:       {}", link.address);
    println!("broker:       {}:{}", config.mqtt_broker, config.mqtt_port);
    println!("client id:    {}", config.client_id);
    println!("command:      {}", topics.command);
    println!("state:        {}", topics.state);
    println!("availability: {}", topics.availability);
    println!(
        "backoff:      {}s doubling to {}s, jitter {}",
        config.backoff_base_secs, config.backoff_max_secs, config.backoff_jitter
    );
    println!(
        "initial:      {}",
        StatePayload::from(&initial_state(config)).to_json()
    );
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("cannot listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("cannot listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
