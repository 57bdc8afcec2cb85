// logs.rs
use bbrconfig::Config;
use tracing::{Level, Subscriber};
use tracing_subscriber::{
    EnvFilter, Registry, filter::LevelFilter, layer::SubscriberExt, util::SubscriberInitExt,
};

/// Convertit un niveau textuel ("INFO", "debug", ...) en filtre
fn parse_level_filter(level: &str) -> Option<LevelFilter> {
    match level.trim().to_ascii_uppercase().as_str() {
        "TRACE" => Some(LevelFilter::TRACE),
        "DEBUG" => Some(LevelFilter::DEBUG),
        "INFO" => Some(LevelFilter::INFO),
        "WARN" | "WARNING" => Some(LevelFilter::WARN),
        "ERROR" => Some(LevelFilter::ERROR),
        "OFF" => Some(LevelFilter::OFF),
        _ => None,
    }
}

/// Subscriber temporaire couvrant le chargement de la configuration.
///
/// Le niveau vient de `RUST_LOG`, INFO par défaut ; il est remplacé par
/// [`init_logging`] dès que la configuration est connue.
pub fn bootstrap_subscriber() -> impl Subscriber + Send + Sync {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .finish()
}

/// Installe le subscriber global.
///
/// `RUST_LOG` prime sur `host.logger.min_level` lorsqu'il est défini.
pub fn init_logging(config: &Config) {
    let min_level = config.get_log_min_level();
    let level_filter = parse_level_filter(&min_level).unwrap_or_else(|| {
        eprintln!("❌ Invalid log level '{}', using INFO", min_level);
        LevelFilter::from_level(Level::INFO)
    });

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::default().add_directive(level_filter.into()));

    let subscriber = Registry::default().with(filter);

    if config.get_log_enable_console() {
        subscriber
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_level(true)
                    .with_ansi(true),
            )
            .init();
    } else {
        subscriber.init();
    }
}
