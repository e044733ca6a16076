use bambustatus::config::{self, AppConfig};
use bambustatus::mqtt::MqttHandler;
use color_eyre::{eyre::WrapErr, Result};
use std::path::PathBuf;
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(config::default_config_path);

    let mut app_config = AppConfig::load(&config_path)
        .wrap_err_with(|| format!("Failed to load config from {}", config_path.display()))?;
    app_config.apply_env();

    setup(&app_config.log_level)?;
    info!("Using configuration {}", config_path.display());
    app_config.validate().wrap_err("Invalid configuration")?;

    let mut mqtt_handler = MqttHandler::new(app_config.mqtt);
    mqtt_handler.set_update_callback(|status| {
        debug!("Status update: {}", status);
    });

    mqtt_handler
        .connect()
        .await
        .wrap_err("Failed to connect to MQTT broker")?;

    tokio::signal::ctrl_c()
        .await
        .wrap_err("Failed to listen for shutdown signal")?;

    info!("Shutting down...");
    mqtt_handler.disconnect().await;

    Ok(())
}

fn setup(log_level: &str) -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    setup_logging_env(log_level);
    Ok(())
}

fn setup_logging_env(log_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
}
