use coindrop::config::AppConfig;
use coindrop::mqtt::MqttConnector;
use coindrop::session::SessionHandle;
use coindrop::ui::ConsoleUi;
use color_eyre::{eyre::eyre, Result};
use tokio::io::BufReader;
use tracing::{debug, info, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    let config_path = AppConfig::config_path();
    let config = AppConfig::load_from(config_path.as_deref())
        .map_err(|e| eyre!("Failed to load configuration: {}", e))?;
    setup_logging(&config)?;

    match config_path {
        Some(path) if path.exists() => info!("Loaded configuration from {}", path.display()),
        Some(path) => debug!("No config file at {}, using defaults", path.display()),
        None => debug!("No config directory available, using defaults"),
    }

    info!(
        "Starting coin-drop simulator: broker={} topic={} cooldown={}s",
        config.broker.url, config.broker.topic, config.publish.cooldown_secs
    );

    let handle = SessionHandle::spawn(&config, &MqttConnector);

    let stdin = BufReader::new(tokio::io::stdin());
    let last_view = ConsoleUi::new(handle, std::io::stdout())
        .run(stdin)
        .await?;

    info!(
        "Session closed after {} acknowledged publishes",
        last_view.messages_sent
    );
    Ok(())
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    Ok(())
}

fn setup_logging(config: &AppConfig) -> Result<()> {
    let level: Level = config
        .logging
        .level
        .parse()
        .map_err(|_| eyre!("Invalid log level '{}'", config.logging.level))?;

    FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
    Ok(())
}
